//! Error types for the SOAP client

use thiserror::Error;

/// Structured error carried in a UPnP fault response.
///
/// Remote faults are surfaced verbatim; the code is never reinterpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("UPnP error {code}: {description}")]
pub struct UpnpError {
    pub code: u16,
    pub description: String,
}

impl UpnpError {
    pub const INVALID_ACTION: u16 = 401;
    pub const INVALID_ARGS: u16 = 402;
    pub const ACTION_FAILED: u16 = 501;
    pub const ARGUMENT_VALUE_INVALID: u16 = 600;
    pub const OPTIONAL_ACTION_NOT_IMPLEMENTED: u16 = 602;

    pub fn new(code: u16, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn invalid_action() -> Self {
        Self::new(Self::INVALID_ACTION, "Invalid Action")
    }

    pub fn invalid_args() -> Self {
        Self::new(Self::INVALID_ARGS, "Invalid Args")
    }

    pub fn action_failed() -> Self {
        Self::new(Self::ACTION_FAILED, "Action Failed")
    }

    pub fn argument_value_invalid() -> Self {
        Self::new(Self::ARGUMENT_VALUE_INVALID, "Argument Value Invalid")
    }

    pub fn optional_action_not_implemented() -> Self {
        Self::new(
            Self::OPTIONAL_ACTION_NOT_IMPLEMENTED,
            "Optional Action Not Implemented",
        )
    }
}

/// Errors that can occur during SOAP and eventing communication
#[derive(Debug, Error)]
pub enum SoapError {
    /// Connection or HTTP transport failure
    #[error("Network/HTTP error: {0}")]
    Network(String),

    /// The remote side did not answer within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Envelope or header could not be parsed
    #[error("XML parsing error: {0}")]
    Parse(String),

    /// SOAP fault returned by the device
    #[error("SOAP fault: {0}")]
    Fault(UpnpError),

    /// Non-success HTTP status without a fault body
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
}

pub type Result<T> = std::result::Result<T, SoapError>;
