use crate::session::manager::SessionError;
use crate::store::record::CaseKey;
use anyhow::Error as AnyError;

/// Failure taxonomy of an ingestion run.
///
/// Only `Session` and `Persistence` stop a run. `ItemFetch` is recorded
/// against the item and the loop moves on; `Blocked` surfaces only when the
/// consecutive-block threshold is reached.
#[derive(Debug)]
pub enum IngestError {
    Session(SessionError),
    Blocked {
        consecutive_blocks: u32,
        message: String,
    },
    ItemFetch {
        key: CaseKey,
        status: Option<u16>,
        message: String,
    },
    Persistence {
        target: &'static str,
        source: AnyError,
    },
}

impl IngestError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IngestError::ItemFetch { .. })
    }
}

impl core::fmt::Display for IngestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IngestError::Session(err) => write!(f, "session error: {err}"),
            IngestError::Blocked {
                consecutive_blocks,
                message,
            } => write!(
                f,
                "upstream blocked {consecutive_blocks} consecutive requests: {message}"
            ),
            IngestError::ItemFetch {
                key,
                status: Some(status),
                message,
            } => write!(f, "fetch of {key} failed with status {status}: {message}"),
            IngestError::ItemFetch {
                key,
                status: None,
                message,
            } => write!(f, "fetch of {key} failed: {message}"),
            IngestError::Persistence { target, source } => {
                write!(f, "failed to persist {target}: {source:#}")
            }
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Session(err) => Some(err),
            IngestError::Persistence { source, .. } => Some(source.as_ref()),
            IngestError::Blocked { .. } | IngestError::ItemFetch { .. } => None,
        }
    }
}

impl From<SessionError> for IngestError {
    fn from(err: SessionError) -> Self {
        IngestError::Session(err)
    }
}
