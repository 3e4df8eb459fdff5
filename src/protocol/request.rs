use std::{fmt, path::PathBuf};

use super::{Header, HeaderError, Operation};

/// Process-local correlation token. Never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An in-flight request. Owned by exactly one pipeline stage at a time.
#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub header: Header,
    pub payload: Option<Vec<u8>>,
    /// Local file backing a WRITE payload or receiving a READ result.
    pub local_path: Option<PathBuf>,
}

impl Request {
    pub fn new(id: RequestId, header: Header, local_path: Option<PathBuf>) -> Self {
        Self {
            id,
            header,
            payload: None,
            local_path,
        }
    }

    pub fn operation(&self) -> Operation {
        self.header.operation
    }

    /// Attaches a payload, keeping `header.size` equal to its length.
    pub fn attach_payload(&mut self, payload: Vec<u8>) {
        self.header.size = payload.len() as u64;
        self.payload = Some(payload);
    }

    /// Whether the payload still has to be staged from local disk.
    pub fn needs_staging(&self) -> bool {
        self.operation() == Operation::Write && self.payload.is_none()
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Fails if `header.size` disagrees with the payload that would follow it.
    pub fn check_size(&self) -> Result<(), HeaderError> {
        let actual = self.payload().len() as u64;
        if self.header.size != actual {
            return Err(HeaderError::SizeMismatch {
                declared: self.header.size,
                actual,
            });
        }
        Ok(())
    }
}
