use soap_client::SoapError;
use ssdp::SsdpError;
use thiserror::Error;
use upnp_api::ApiError;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Discovery error: {0}")]
    Ssdp(#[from] SsdpError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to fetch {0}")]
    Fetch(String),
}

impl From<SoapError> for SdkError {
    fn from(error: SoapError) -> Self {
        SdkError::Api(error.into())
    }
}

pub type Result<T> = std::result::Result<T, SdkError>;
