use std::{fmt::Display, io, path::PathBuf, time::Duration};

use thiserror::Error;

/// The execution channel could not be established or used.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("could not connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("authentication as {user} failed: {reason}")]
    Auth { user: String, reason: String },

    #[error("ssh session error: {0}")]
    Session(#[from] ssh2::Error),

    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid connection settings: {0}")]
    Config(String),
}

/// A snapshot could not be collected. Always fatal for the run.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("remote listing of {root} failed: {reason}")]
    RemoteList { root: String, reason: String },

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("listing {root} did not finish within {after:?}")]
    Timeout { root: String, after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// A single planned action failed. Recorded, never aborts the run.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("upload of {path} failed: {cause}")]
    Upload { path: String, cause: String },

    #[error("download of {path} failed: {cause}")]
    Download { path: String, cause: String },

    #[error("{direction} of {path} timed out after {after:?}")]
    Timeout {
        path: String,
        direction: Direction,
        after: Duration,
    },

    #[error("{path} was not transferred: run cancelled")]
    Cancelled { path: String },

    #[error("{path} differs after transfer (local {local}, remote {remote})")]
    Verify {
        path: String,
        local: String,
        remote: String,
    },
}

impl TransferError {
    pub fn upload(path: &str, cause: impl Display) -> Self {
        Self::Upload {
            path: path.to_owned(),
            cause: cause.to_string(),
        }
    }

    pub fn download(path: &str, cause: impl Display) -> Self {
        Self::Download {
            path: path.to_owned(),
            cause: cause.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            TransferError::Upload { path, .. }
            | TransferError::Download { path, .. }
            | TransferError::Timeout { path, .. }
            | TransferError::Cancelled { path }
            | TransferError::Verify { path, .. } => path,
        }
    }
}

/// A listing record that could not be parsed. Kept as a warning on the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record #{index}: {reason}")]
pub struct MalformedRecord {
    pub index: usize,
    pub reason: String,
}
