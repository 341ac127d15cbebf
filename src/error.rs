//! Error taxonomy shared by the client, protocol and storage layers.

use thiserror::Error;

use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors surfaced by [`Client`](crate::Client) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or I/O failure while talking to the platform.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// A mandatory response field was missing or malformed.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The platform answered a login or init call with a non-zero code.
    #[error("{stage} rejected by server (ret={code})")]
    Auth { stage: &'static str, code: i64 },
    /// No contact matched the requested name or id.
    #[error("contact not found: {0}")]
    Lookup(String),
    /// An outbound operation was answered with a non-zero code.
    #[error("{operation} rejected by server (ret={code})")]
    Rejected { operation: &'static str, code: i64 },
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The session lacks the tokens required for this call.
    #[error("not logged in; call `login` first")]
    NotLoggedIn,
}

impl ClientError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        ClientError::Protocol(message.into())
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
