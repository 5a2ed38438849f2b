use soap_client::{SoapError, UpnpError};
use thiserror::Error;

/// Errors raised by the device model, action invocation and eventing
///
/// Lookup misses and invocation contract violations are returned to the
/// caller. Remote UPnP faults are carried verbatim in [`ApiError::Upnp`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// No device with this UDN or type in the tree
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// No service with this type or id on the device
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// No action with this name on the service
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// No argument with this name on the action
    #[error("Argument not found: {0}")]
    ArgumentNotFound(String),

    /// No state variable with this name on the service
    #[error("State variable not found: {0}")]
    StateVariableNotFound(String),

    /// An `in` argument was not supplied by the caller
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    /// An `out` argument was absent from the device's response
    #[error("Missing result: {0}")]
    MissingResult(String),

    /// The device did not answer within the invocation timeout
    #[error("Invocation timed out")]
    InvocationTimeout,

    /// Subscribe request without a usable callback URL
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// Renew or unsubscribe for an unknown subscription id
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A relative URL could not be resolved against the device's base
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// String value cannot be converted to the requested type
    #[error("Invalid argument value: {0}")]
    InvalidArgumentValue(String),

    /// Device or service description is malformed or inconsistent
    #[error("Description error: {0}")]
    Description(String),

    /// Structured error returned by the remote device
    #[error(transparent)]
    Upnp(#[from] UpnpError),

    /// HTTP or envelope failure below the UPnP layer
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl From<SoapError> for ApiError {
    fn from(error: SoapError) -> Self {
        match error {
            SoapError::Fault(fault) => ApiError::Upnp(fault),
            SoapError::Timeout => ApiError::InvocationTimeout,
            SoapError::Network(msg) | SoapError::Parse(msg) => ApiError::Transport(msg),
            SoapError::Status(status) => ApiError::Transport(format!("HTTP status {}", status)),
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(error: url::ParseError) -> Self {
        ApiError::InvalidUrl(error.to_string())
    }
}
