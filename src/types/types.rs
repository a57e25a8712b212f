use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Everything that can end a transfer abnormally.
///
/// `Cancelled` is an internal flow marker: a session that unwinds with it
/// finalizes as the `Cancelled` outcome, never as `Faulted`.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("a transfer is already in flight on this engine")]
    EngineBusy,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    #[error("no data received within {0:?}")]
    Stalled(Duration),

    #[error("server answered {0}")]
    Protocol(reqwest::StatusCode),

    #[error("disk error: {0}")]
    Disk(#[from] io::Error),

    #[error("transfer cancelled")]
    Cancelled,
}

/// What a successful transfer produced, per start operation.
#[derive(Debug)]
pub enum TransferPayload {
    Buffer(Vec<u8>),
    File { bytes_written: u64 },
    Text(String),
}

/// Terminal result of one logical transfer.
#[derive(Debug)]
pub enum TransferResult {
    Success(TransferPayload),
    Cancelled,
    Faulted(TransferError),
}

/// The terminal notification: the caller's correlation token echoed back
/// unchanged, plus the result.
#[derive(Debug)]
pub struct TransferOutcome {
    pub token: String,
    pub result: TransferResult,
}

impl TransferOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, TransferResult::Cancelled)
    }

    pub fn error(&self) -> Option<&TransferError> {
        match &self.result {
            TransferResult::Faulted(error) => Some(error),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&TransferPayload> {
        match &self.result {
            TransferResult::Success(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Response metadata handed to observers once headers are in, before the
/// body read begins.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub final_uri: String,
    /// Bytes the server declared for this response body, when known.
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub attachment_name: Option<String>,
    /// Resume offset the request carried; already-held bytes.
    pub resumed_from: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Where a file download lands: a path the engine opens itself
/// (create-or-truncate, write-only), or a writable stream the caller
/// already owns.
pub enum FileDestination {
    Path(PathBuf),
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl FileDestination {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        FileDestination::Path(path.into())
    }

    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        FileDestination::Writer(Box::new(writer))
    }
}

impl From<PathBuf> for FileDestination {
    fn from(path: PathBuf) -> Self {
        FileDestination::Path(path)
    }
}

impl From<&std::path::Path> for FileDestination {
    fn from(path: &std::path::Path) -> Self {
        FileDestination::Path(path.to_path_buf())
    }
}

impl fmt::Debug for FileDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileDestination::Path(path) => f.debug_tuple("Path").field(path).finish(),
            FileDestination::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}
