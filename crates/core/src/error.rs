use crate::models::SessionState;
use std::time::Duration;
use thiserror::Error;

/// UPnP AVTransport error 718: the renderer no longer knows our instance
const UPNP_INVALID_INSTANCE_ID: u32 = 718;

/// Errors surfaced by discovery, streaming and control
#[derive(Debug, Error)]
pub enum CastError {
    /// Nothing answered within the collection window
    #[error("no matching device answered within {timeout:?}")]
    DiscoveryTimeout { timeout: Duration },

    /// One advertisement or description could not be understood
    #[error("malformed device advertisement: {0}")]
    DiscoveryParse(String),

    /// Discovery socket could not be created, bound or joined
    #[error("discovery socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// Unknown streaming path
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Range header cannot be satisfied for a resource of this size
    #[error("requested range not satisfiable (resource size {size})")]
    RangeUnsatisfiable { size: u64 },

    /// The device answered with a SOAP fault
    #[error("{action} failed with UPnP fault {}: {description}", fault_code_label(.code))]
    ControlFault {
        action: String,
        code: Option<u32>,
        description: String,
    },

    /// Network error, timeout or non-SOAP reply while talking to a device
    #[error("{action} transport failure: {reason}")]
    TransportFailure { action: String, reason: String },

    /// Command not permitted in the session's current state
    #[error("cannot {command} while session is {state}")]
    SessionState {
        command: &'static str,
        state: SessionState,
    },

    /// Device does not expose the service needed for a command
    #[error("device has no {0} service")]
    MissingService(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CastError {
    pub fn transport(action: impl Into<String>, reason: impl ToString) -> Self {
        CastError::TransportFailure {
            action: action.into(),
            reason: reason.to_string(),
        }
    }

    /// UPnP error code, when this is a device fault
    pub fn fault_code(&self) -> Option<u32> {
        match self {
            CastError::ControlFault { code, .. } => *code,
            _ => None,
        }
    }

    /// Whether this failure leaves a running session unusable
    pub fn is_session_fatal(&self) -> bool {
        self.fault_code() == Some(UPNP_INVALID_INSTANCE_ID)
    }
}

fn fault_code_label(code: &Option<u32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string())
}

pub type Result<T> = std::result::Result<T, CastError>;
