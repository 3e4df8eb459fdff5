use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::protocol::{HeaderError, Response, Status};

/// Every way a single request can fail.
///
/// Cloneable so that one connection fault can be handed to every pending caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    MalformedHeader(#[from] HeaderError),

    #[error("local file '{0}' not found")]
    FileNotFound(PathBuf),

    #[error("failed to read local file '{path}': {reason}")]
    FileRead { path: PathBuf, reason: String },

    #[error("failed to write local file '{path}': {reason}")]
    FileWrite { path: PathBuf, reason: String },

    /// The server answered a READ but its payload could not be stored locally.
    /// The fetched response is kept so the caller can still use it.
    #[error("{error}")]
    StoreFailed {
        error: Box<ClientError>,
        response: Response,
    },

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to start worker thread: {0}")]
    Spawn(String),

    #[error("failed to write request to connection: {0}")]
    TransportWrite(String),

    #[error("connection closed")]
    TransportClosed,

    #[error("received a response with no outstanding request")]
    UnexpectedResponse,

    #[error("server rejected request [{status}]: {message}")]
    Server { status: Status, message: String },

    #[error("too many outstanding requests (limit {limit})")]
    Backpressure { limit: usize },

    #[error("request canceled")]
    Canceled,

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    pub(crate) fn file_read(path: PathBuf, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ClientError::FileNotFound(path),
            _ => ClientError::FileRead {
                path,
                reason: err.to_string(),
            },
        }
    }

    pub(crate) fn file_write(path: PathBuf, err: io::Error) -> Self {
        ClientError::FileWrite {
            path,
            reason: err.to_string(),
        }
    }

    /// Whether the error ends the whole session rather than a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::TransportClosed | ClientError::TransportWrite(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_its_own_kind() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(
            ClientError::file_read("a.txt".into(), err),
            ClientError::FileNotFound("a.txt".into())
        );

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            ClientError::file_read("a.txt".into(), err),
            ClientError::FileRead { .. }
        ));
    }

    #[test]
    fn transport_errors_are_fatal() {
        assert!(ClientError::TransportClosed.is_fatal());
        assert!(ClientError::TransportWrite("broken pipe".into()).is_fatal());
        assert!(!ClientError::Canceled.is_fatal());
    }
}
