//! Error types for device hosting.

use ssdp::SsdpError;
use thiserror::Error;
use upnp_api::ApiError;

/// Error type for [`DeviceHost`](crate::DeviceHost) operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// The HTTP listener could not be started
    #[error("Failed to bind HTTP server: {0}")]
    Bind(String),

    /// No address is available to put in the advertised location
    #[error("No address to advertise: {0}")]
    NoAdvertiseAddress(String),

    /// Two services share a description, control or event path
    #[error("Conflicting path {0}")]
    PathConflict(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Discovery error: {0}")]
    Ssdp(#[from] SsdpError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// A background task could not be completed
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Convenience Result type alias for device hosting.
pub type Result<T> = std::result::Result<T, HostError>;
