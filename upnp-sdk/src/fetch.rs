//! Retrieval of description documents.

use std::time::Duration;

use tracing::trace;

use crate::error::{Result, SdkError};

/// Fetches device and service description documents.
pub trait DescriptionFetcher: Send + Sync {
    fn fetch_document(&self, url: &str) -> Result<String>;
}

/// Plain HTTP GET with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SdkError::Fetch(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl DescriptionFetcher for HttpFetcher {
    fn fetch_document(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| SdkError::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SdkError::Fetch(format!("{}: HTTP {}", url, status.as_u16())));
        }

        let body = response
            .text()
            .map_err(|e| SdkError::Fetch(format!("{}: failed to read body: {}", url, e)))?;
        trace!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }
}
