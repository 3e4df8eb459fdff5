//! Request header codec.
//!
//! A request header is a single line of four `:` separated fields:
//!
//! ```text
//! OPERATION:ACCOUNT:FILENAME:SIZE\n
//! ```
//!
//! `SIZE` is the decimal byte length of the payload that immediately follows the
//! newline. `ACCOUNT` and `FILENAME` are escaped so that the delimiter, the
//! terminator and the escape character itself never appear raw inside a field:
//! `\` becomes `\\`, `:` becomes `\:` and a newline becomes `\n`.
//!
//! # Example
//! ```rust
//! use derpfs::protocol::{Header, Operation};
//!
//! let header = Header::new(Operation::Create, "alice", "", 0);
//! assert_eq!(header.encode(), b"CREATE:alice::0\n");
//!
//! let decoded = Header::decode(&header.encode()).unwrap();
//! assert_eq!(decoded, header);
//! ```
use std::{fmt, str::FromStr};

use thiserror::Error;

pub const DELIMITER: u8 = b':';
pub const TERMINATOR: u8 = b'\n';
const ESCAPE: u8 = b'\\';

/// Upper bound on the length of a single header line, terminator included.
pub const MAX_HEADER_LEN: usize = 8 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("malformed header: missing {0} field")]
    MissingField(&'static str),

    #[error("malformed header: unexpected trailing field")]
    TrailingField,

    #[error("malformed header: unrecognized operation '{0}'")]
    UnknownOperation(String),

    #[error("malformed header: unrecognized status '{0}'")]
    UnknownStatus(String),

    #[error("malformed header: size '{0}' is not a number")]
    InvalidSize(String),

    #[error("malformed header: size {0} exceeds the allowed maximum")]
    SizeTooLarge(u64),

    #[error("malformed header: declared size {declared} but payload has {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("malformed header: dangling escape sequence")]
    BadEscape,

    #[error("malformed header: not valid UTF-8")]
    Utf8,

    #[error("malformed header: line exceeds the maximum header length")]
    TooLong,
}

/// Operations understood by the storage server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Write,
    Delete,
    List,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Read => "READ",
            Operation::Write => "WRITE",
            Operation::Delete => "DELETE",
            Operation::List => "LIST",
        }
    }

    /// Whether requests of this kind address a file inside the account.
    pub fn targets_file(&self) -> bool {
        matches!(
            self,
            Operation::Read | Operation::Write | Operation::Delete
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Operation::Create),
            "READ" => Ok(Operation::Read),
            "WRITE" => Ok(Operation::Write),
            "DELETE" => Ok(Operation::Delete),
            "LIST" => Ok(Operation::List),
            other => Err(HeaderError::UnknownOperation(other.to_string())),
        }
    }
}

/// Fixed-field request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub operation: Operation,
    pub account: String,
    pub file_name: String,
    /// Exact number of payload bytes following the header on the wire.
    pub size: u64,
}

impl Header {
    pub fn new(operation: Operation, account: &str, file_name: &str, size: u64) -> Self {
        Self {
            operation,
            account: account.to_string(),
            file_name: file_name.to_string(),
            size,
        }
    }

    /// Serializes the header, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.operation.as_str().len() + self.account.len() + self.file_name.len() + 24,
        );
        out.extend_from_slice(self.operation.as_str().as_bytes());
        out.push(DELIMITER);
        escape_into(&self.account, &mut out);
        out.push(DELIMITER);
        escape_into(&self.file_name, &mut out);
        out.push(DELIMITER);
        out.extend_from_slice(self.size.to_string().as_bytes());
        out.push(TERMINATOR);
        out
    }

    /// Parses a header line. A single trailing terminator is accepted but not required.
    pub fn decode(line: &[u8]) -> Result<Self, HeaderError> {
        let mut fields = split_fields(strip_terminator(line))?.into_iter();

        let operation = fields
            .next()
            .ok_or(HeaderError::MissingField("operation"))?;
        let operation: Operation = operation.parse()?;
        let account = fields.next().ok_or(HeaderError::MissingField("account"))?;
        let file_name = fields
            .next()
            .ok_or(HeaderError::MissingField("file name"))?;
        let size = parse_size(fields.next().ok_or(HeaderError::MissingField("size"))?)?;

        if fields.next().is_some() {
            return Err(HeaderError::TrailingField);
        }

        Ok(Self {
            operation,
            account,
            file_name,
            size,
        })
    }
}

pub(crate) fn strip_terminator(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&TERMINATOR, rest)) => rest,
        _ => line,
    }
}

pub(crate) fn parse_size(field: String) -> Result<u64, HeaderError> {
    // `u64::from_str` tolerates a leading '+', the wire format does not.
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HeaderError::InvalidSize(field));
    }
    field.parse().map_err(|_| HeaderError::InvalidSize(field))
}

fn escape_into(value: &str, out: &mut Vec<u8>) {
    for &b in value.as_bytes() {
        match b {
            ESCAPE => out.extend_from_slice(b"\\\\"),
            DELIMITER => out.extend_from_slice(b"\\:"),
            TERMINATOR => out.extend_from_slice(b"\\n"),
            b => out.push(b),
        }
    }
}

/// Splits an unterminated line on unescaped delimiters, unescaping each field.
pub(crate) fn split_fields(line: &[u8]) -> Result<Vec<String>, HeaderError> {
    let mut fields = Vec::with_capacity(4);
    let mut current = Vec::new();
    let mut bytes = line.iter().copied();

    while let Some(b) = bytes.next() {
        match b {
            ESCAPE => match bytes.next() {
                Some(ESCAPE) => current.push(ESCAPE),
                Some(DELIMITER) => current.push(DELIMITER),
                Some(b'n') => current.push(TERMINATOR),
                _ => return Err(HeaderError::BadEscape),
            },
            DELIMITER => fields.push(into_field(std::mem::take(&mut current))?),
            b => current.push(b),
        }
    }
    fields.push(into_field(current)?);

    Ok(fields)
}

fn into_field(bytes: Vec<u8>) -> Result<String, HeaderError> {
    String::from_utf8(bytes).map_err(|_| HeaderError::Utf8)
}
