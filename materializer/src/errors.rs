use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::task::JoinError;

use crate::path_resolver::PathSecurityError;
use crate::Digest;

/// The category of a materialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The blob is absent from the remote store.
    NotFound,
    /// The content did not match its declared size or hash.
    IntegrityMismatch,
    /// Network-level failure talking to the remote store.
    TransportError,
    /// Permission, disk space, or an unexpected existing entry.
    LocalIOError,
    /// A declared path escapes the output root.
    PathSecurityError,
    /// A tree descriptor could not be decoded or is incomplete.
    InvalidTree,
    /// The materialization was cancelled.
    Cancelled,
}

/// Errors emitted while materializing an action result.
/// All variants except [Error::Cancelled] carry the local path that failed,
/// and the digest involved, if any.
#[derive(Debug, Error)]
pub enum Error {
    #[error("blob {digest} for {path:?} not found")]
    NotFound { path: PathBuf, digest: Digest },

    #[error("unexpected size for {path:?}, wanted {digest} got {got} bytes")]
    UnexpectedSize {
        path: PathBuf,
        digest: Digest,
        got: u64,
    },

    #[error("digest mismatch for {path:?}, wanted {digest} got {got}")]
    UnexpectedDigest {
        path: PathBuf,
        digest: Digest,
        got: Digest,
    },

    #[error("unable to fetch blob {digest} for {path:?}: {source}")]
    Transport {
        path: PathBuf,
        digest: Digest,
        #[source]
        source: io::Error,
    },

    #[error("i/o error at {path:?}: {source}")]
    LocalIO {
        path: PathBuf,
        digest: Option<Digest>,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    PathSecurity(#[from] PathSecurityError),

    #[error("invalid tree {digest} for {path:?}: {reason}")]
    InvalidTree {
        path: PathBuf,
        digest: Digest,
        reason: String,
    },

    #[error("materialization task failed: {0}")]
    TaskFailed(String),

    #[error("materialization cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::LocalIO {
            path: path.into(),
            digest: None,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::UnexpectedSize { .. } | Error::UnexpectedDigest { .. } => {
                ErrorKind::IntegrityMismatch
            }
            Error::Transport { .. } => ErrorKind::TransportError,
            // a task that panicked left the local tree in an unknown state.
            Error::LocalIO { .. } | Error::TaskFailed(_) => ErrorKind::LocalIOError,
            Error::PathSecurity(_) => ErrorKind::PathSecurityError,
            Error::InvalidTree { .. } => ErrorKind::InvalidTree,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The local (or, for path security errors, declared) path that failed.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::NotFound { path, .. }
            | Error::UnexpectedSize { path, .. }
            | Error::UnexpectedDigest { path, .. }
            | Error::Transport { path, .. }
            | Error::LocalIO { path, .. }
            | Error::InvalidTree { path, .. } => Some(path),
            Error::PathSecurity(e) => Some(&e.path),
            Error::TaskFailed(_) | Error::Cancelled => None,
        }
    }

    /// The digest of the content that failed to materialize, if any.
    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Error::NotFound { digest, .. }
            | Error::UnexpectedSize { digest, .. }
            | Error::UnexpectedDigest { digest, .. }
            | Error::Transport { digest, .. }
            | Error::InvalidTree { digest, .. } => Some(digest),
            Error::LocalIO { digest, .. } => digest.as_ref(),
            Error::PathSecurity(_) | Error::TaskFailed(_) | Error::Cancelled => None,
        }
    }

    /// Whether retrying the failed operation might succeed.
    /// Missing blobs and integrity mismatches are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::LocalIO { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        if value.is_cancelled() {
            Error::Cancelled
        } else {
            Error::TaskFailed(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use rstest::rstest;

    use super::{Error, ErrorKind};
    use crate::fixtures::HELLOWORLD_BLOB_DIGEST;

    #[rstest]
    #[case::connection_reset(io::ErrorKind::ConnectionReset)]
    #[case::not_connected(io::ErrorKind::NotConnected)]
    fn transport_is_transient(#[case] kind: io::ErrorKind) {
        let e = Error::Transport {
            path: PathBuf::from("/out/foo"),
            digest: HELLOWORLD_BLOB_DIGEST.clone(),
            source: io::Error::from(kind),
        };

        assert_eq!(ErrorKind::TransportError, e.kind());
        assert!(e.is_transient());
    }

    #[rstest]
    #[case::interrupted(io::ErrorKind::Interrupted, true)]
    #[case::timed_out(io::ErrorKind::TimedOut, true)]
    #[case::permission_denied(io::ErrorKind::PermissionDenied, false)]
    #[case::already_exists(io::ErrorKind::AlreadyExists, false)]
    fn local_io_transience(#[case] kind: io::ErrorKind, #[case] expected: bool) {
        let e = Error::local_io("/out/foo", io::Error::from(kind));

        assert_eq!(ErrorKind::LocalIOError, e.kind());
        assert_eq!(expected, e.is_transient());
        assert_eq!(None, e.digest());
    }

    #[test]
    fn permanent_errors_carry_context() {
        let e = Error::NotFound {
            path: PathBuf::from("/out/foo"),
            digest: HELLOWORLD_BLOB_DIGEST.clone(),
        };

        assert!(!e.is_transient());
        assert_eq!(Some(PathBuf::from("/out/foo").as_path()), e.path());
        assert_eq!(Some(&*HELLOWORLD_BLOB_DIGEST), e.digest());

        let e = Error::UnexpectedSize {
            path: PathBuf::from("/out/foo"),
            digest: HELLOWORLD_BLOB_DIGEST.clone(),
            got: 3,
        };
        assert_eq!(ErrorKind::IntegrityMismatch, e.kind());
        assert!(!e.is_transient());
    }
}
