use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::types::{TxnStatus, Xid};

/// Errors returned by the resource cache. Both are recoverable.
#[derive(Error, Debug)]
pub enum CacheError<E> {
    #[error("Cache is full")]
    Full,

    #[error("Failed to load resource: {0}")]
    Load(#[source] E),
}

/// Unrecoverable transaction log failures.
///
/// Any of these means the durable transaction state can no longer be trusted.
/// The hosting system decides how to shut down; the log itself refuses all
/// further work once one has been observed.
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("I/O error while trying to {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Bad xid file {}: expected {expected} bytes, found {actual}", .path.display())]
    Corruption {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Bad xid file {}: header truncated to {actual} bytes", .path.display())]
    HeaderTruncated { path: PathBuf, actual: u64 },

    #[error("Invalid status byte {byte:#04x} for {xid}")]
    InvalidStatus { xid: Xid, byte: u8 },

    #[error("Transaction log is poisoned by an earlier fatal error")]
    Poisoned,
}

impl FatalError {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| FatalError::Io { op, source }
    }
}

/// Errors returned by transaction log operations.
#[derive(Error, Debug)]
pub enum TxnLogError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("{0} has not been allocated")]
    UnknownTransaction(Xid),

    #[error("The super transaction cannot change state")]
    SuperTransaction,

    #[error("{xid} is already {status}")]
    AlreadyTerminal { xid: Xid, status: TxnStatus },
}

impl TxnLogError {
    /// Returns true when the error means the log must not be used any further.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TxnLogError::Fatal(_))
    }
}

pub type TxnResult<T> = std::result::Result<T, TxnLogError>;
