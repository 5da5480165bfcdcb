//! Typed error kinds for the terminal core. These are the errors that
//! callers (the RPC dispatcher, the session manager) need to match on;
//! anything that only needs to be logged and wrapped with context uses
//! `anyhow` instead, the same split the rest of this crate's bootstrap
//! code uses.

use ptyhub_protocol::SessionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to spawn shell: {reason}")]
    SpawnFailed { reason: String },

    #[error("session is not active")]
    NotActive,

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("Attached session {0} not found")]
    AttachedSessionNotFound(SessionId),

    #[error("connection closed")]
    Closed,

    #[error("could not parse request: {0}")]
    ParseError(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("missing parameter: {0}")]
    MissingParam(&'static str),

    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("recording io error: {0}")]
    RecorderIo(String),

    #[error("recording already finalized")]
    AlreadyFinalized,

    #[error("recording limit reached")]
    LimitReached,

    #[error("No terminal attached. Enable MCP on a terminal tab first.")]
    NotAttached,
}

pub type CoreResult<T> = Result<T, CoreError>;
