//! Vehicle link error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`VehicleLink`](crate::hardware::VehicleLink)
#[derive(Debug, Error)]
pub enum LinkError {
    /// Could not open the telemetry endpoint
    #[error("failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    /// Send or receive on an open link failed
    #[error("link I/O error: {0}")]
    Io(String),

    /// Vehicle answered with something the protocol does not allow here
    #[error("protocol error during {operation}: {details}")]
    Protocol { operation: String, details: String },

    /// Vehicle refused a command or a mission upload
    #[error("{operation} rejected by vehicle: {result}")]
    Rejected { operation: String, result: String },

    /// No answer within the allotted time
    #[error("{operation} timed out after {waited:?}")]
    Timeout { operation: String, waited: Duration },

    /// The link was closed before the operation
    #[error("link is closed")]
    Closed,
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

impl LinkError {
    pub(crate) fn protocol(operation: &str, details: impl Into<String>) -> Self {
        LinkError::Protocol {
            operation: operation.to_string(),
            details: details.into(),
        }
    }

    pub(crate) fn rejected(operation: &str, result: impl std::fmt::Debug) -> Self {
        LinkError::Rejected {
            operation: operation.to_string(),
            result: format!("{result:?}"),
        }
    }
}
