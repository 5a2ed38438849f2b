//! SOAP control and GENA eventing client for UPnP devices
//!
//! This crate provides the HTTP side of UPnP: calling actions on a service's
//! control URL, managing event subscriptions on its event URL, and sending
//! event notifications to a subscriber's callback URL. The envelope
//! builders and parsers in [`envelope`] are shared with device-side code.

pub mod envelope;
mod error;

pub use envelope::SoapRequest;
pub use error::{Result, SoapError, UpnpError};

use std::time::Duration;
use tracing::{debug, trace};

/// Default bound on connecting to a device.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a whole request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response from a UPnP subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    /// Subscription ID returned by the device
    pub sid: String,
    /// Actual timeout granted by the device (in seconds)
    pub timeout_seconds: u32,
}

/// A minimal blocking client for UPnP control and eventing
#[derive(Debug, Clone)]
pub struct SoapClient {
    agent: ureq::Agent,
    timeout: Duration,
}

impl SoapClient {
    /// Create a new client with default timeouts
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Create a client whose requests fail with `SoapError::Timeout` after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(CONNECT_TIMEOUT.min(timeout))
                .timeout(timeout)
                .user_agent(concat!("upnp-sdk/", env!("CARGO_PKG_VERSION"), " UPnP/1.1"))
                .build(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke `action` on the service at `control_url`.
    ///
    /// Returns the output arguments in the order the device sent them.
    ///
    /// # Errors
    ///
    /// - `SoapError::Fault` when the device answers with a UPnP fault, whatever
    ///   the HTTP status
    /// - `SoapError::Timeout` when no answer arrives within `timeout`
    /// - `SoapError::Status` for an error status without a fault body
    pub fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Vec<(String, String)>> {
        let body = envelope::build_request(service_type, action, arguments);
        debug!("Invoking {} on {}", action, control_url);
        trace!("SOAP request: {}", body);

        let result = self
            .agent
            .post(control_url)
            .timeout(timeout)
            .set("Content-Type", envelope::CONTENT_TYPE)
            .set("SOAPACTION", &envelope::soap_action_header(service_type, action))
            .send_string(&body);

        match result {
            Ok(response) => {
                let text = read_body(response)?;
                trace!("SOAP response: {}", text);
                envelope::parse_response(text.as_bytes(), action)
            }
            Err(ureq::Error::Status(status, response)) => {
                // Faults arrive as 500 with an envelope; anything else is a plain status error.
                let text = response.into_string().unwrap_or_default();
                match envelope::parse_response(text.as_bytes(), action) {
                    Err(SoapError::Fault(fault)) => {
                        debug!("{} on {} failed: {}", action, control_url, fault);
                        Err(SoapError::Fault(fault))
                    }
                    _ => Err(SoapError::Status(status)),
                }
            }
            Err(ureq::Error::Transport(transport)) => Err(transport_error(transport)),
        }
    }

    /// Subscribe to events of the service at `event_url`.
    ///
    /// The granted timeout falls back to the requested one when the device
    /// omits the `TIMEOUT` header.
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_seconds: u32,
    ) -> Result<SubscriptionResponse> {
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("CALLBACK", &format!("<{}>", callback_url))
            .set("NT", "upnp:event")
            .set("TIMEOUT", &envelope::format_timeout_header(timeout_seconds))
            .call()
            .map_err(request_error)?;

        let sid = response
            .header("SID")
            .filter(|sid| !sid.trim().is_empty())
            .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?
            .trim()
            .to_string();

        let granted = response
            .header("TIMEOUT")
            .and_then(envelope::parse_timeout_header)
            .unwrap_or(timeout_seconds);

        debug!("Subscribed to {} as {} for {}s", event_url, sid, granted);
        Ok(SubscriptionResponse {
            sid,
            timeout_seconds: granted,
        })
    }

    /// Renew an existing subscription, returning the granted timeout
    pub fn renew_subscription(&self, event_url: &str, sid: &str, timeout_seconds: u32) -> Result<u32> {
        let response = self
            .agent
            .request("SUBSCRIBE", event_url)
            .set("SID", sid)
            .set("TIMEOUT", &envelope::format_timeout_header(timeout_seconds))
            .call()
            .map_err(request_error)?;

        Ok(response
            .header("TIMEOUT")
            .and_then(envelope::parse_timeout_header)
            .unwrap_or(timeout_seconds))
    }

    /// Cancel a subscription
    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()> {
        self.agent
            .request("UNSUBSCRIBE", event_url)
            .set("SID", sid)
            .call()
            .map_err(request_error)?;
        debug!("Unsubscribed {} from {}", sid, event_url);
        Ok(())
    }

    /// Deliver one event notification to a subscriber's callback URL
    pub fn notify(&self, callback_url: &str, sid: &str, seq: u32, body: &str) -> Result<()> {
        self.agent
            .request("NOTIFY", callback_url)
            .set("Content-Type", envelope::CONTENT_TYPE)
            .set("NT", "upnp:event")
            .set("NTS", "upnp:propchange")
            .set("SID", sid)
            .set("SEQ", &seq.to_string())
            .send_string(body)
            .map_err(request_error)?;
        trace!("Delivered event {} #{} to {}", sid, seq, callback_url);
        Ok(())
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

fn read_body(response: ureq::Response) -> Result<String> {
    response.into_string().map_err(|e| {
        if is_timeout(&e) {
            SoapError::Timeout
        } else {
            SoapError::Network(e.to_string())
        }
    })
}

fn is_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

fn transport_error(transport: ureq::Transport) -> SoapError {
    let timed_out = std::error::Error::source(&transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(is_timeout);

    if timed_out {
        SoapError::Timeout
    } else {
        SoapError::Network(transport.to_string())
    }
}

fn request_error(error: ureq::Error) -> SoapError {
    match error {
        ureq::Error::Status(status, _) => SoapError::Status(status),
        ureq::Error::Transport(transport) => transport_error(transport),
    }
}
