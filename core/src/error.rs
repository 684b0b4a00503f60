use thiserror::Error;

use crate::models::EntityKind;

/// Status used when the remote call never produced an HTTP response.
pub const TRANSPORT_FAILURE_STATUS: u16 = 503;
/// Status used when the remote call exceeded its time budget.
pub const TIMEOUT_STATUS: u16 = 408;

/// Errors surfaced by the synchronization layer.
///
/// `Clone` so that a single coalesced refresh result can be handed to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network or HTTP failure from the remote lookup service. The local cache
    /// is left untouched when this is returned from a search.
    #[error("remote lookup failed ({code}): {message}")]
    Remote { code: u16, message: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An index entry points at an entity that no longer exists. Never returned
    /// from a search; the orchestrator treats it as a cache miss.
    #[error("search index points at missing {kind} '{id}'")]
    StaleReference { kind: EntityKind, id: String },

    #[error("storage error: {0}")]
    Storage(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn remote(code: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// HTTP status to report for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Remote { code, .. } => *code,
            Self::NotFound { .. } => 404,
            Self::InvalidInput(_) => 400,
            Self::StaleReference { .. } | Self::Storage(_) => 500,
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
