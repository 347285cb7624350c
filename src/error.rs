use std::sync::Arc;
use thiserror::Error;

use crate::dns::ProtoError;

pub type Result<T> = std::result::Result<T, ApexError>;

/// Unified error type for the gateway.
///
/// `Parse` and `Upstream` render bare because their messages travel to
/// HTTP clients verbatim inside `{"error": …}` documents.
#[derive(Debug, Clone, Error)]
pub enum ApexError {
    /// Malformed DoH request (bad type/cd/do/ECS, undecodable body).
    #[error("{0}")]
    Parse(String),

    /// DNS wire-format errors.
    #[error("{0}")]
    Proto(#[from] ProtoError),

    /// Dial/read/write/timeout against an upstream resolver.
    #[error("{0}")]
    Upstream(String),

    /// Malformed Apexfile or invalid directive arguments.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicated plugin name: {0}")]
    DuplicatePlugin(String),

    #[error("duplicated endpoint name: {0}")]
    DuplicateEndpoint(String),

    #[error("plugin `{0}` not registered yet")]
    UnknownPlugin(String),

    #[error("endpoint `{0}` not registered yet")]
    UnknownEndpoint(String),

    /// No response and no recorded error, e.g. no matching zone engine.
    #[error("internal error")]
    Internal,

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for ApexError {
    fn from(err: std::io::Error) -> Self {
        ApexError::Io(Arc::new(err))
    }
}
