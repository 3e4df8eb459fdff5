use std::{fmt, str::FromStr};

use super::header::{
    DELIMITER, HeaderError, TERMINATOR, parse_size, split_fields, strip_terminator,
};

/// Outcome reported by the server for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotFound,
    Permission,
    Malformed,
    Internal,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "NOT_FOUND",
            Status::Permission => "PERMISSION",
            Status::Malformed => "MALFORMED",
            Status::Internal => "INTERNAL",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Status::Ok),
            "NOT_FOUND" => Ok(Status::NotFound),
            "PERMISSION" => Ok(Status::Permission),
            "MALFORMED" => Ok(Status::Malformed),
            "INTERNAL" => Ok(Status::Internal),
            other => Err(HeaderError::UnknownStatus(other.to_string())),
        }
    }
}

/// Response frame header: `STATUS:SIZE\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: Status,
    pub size: u64,
}

impl ResponseHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(self.status.as_str().as_bytes());
        out.push(DELIMITER);
        out.extend_from_slice(self.size.to_string().as_bytes());
        out.push(TERMINATOR);
        out
    }

    pub fn decode(line: &[u8]) -> Result<Self, HeaderError> {
        let mut fields = split_fields(strip_terminator(line))?.into_iter();

        let status: Status = fields
            .next()
            .ok_or(HeaderError::MissingField("status"))?
            .parse()?;
        let size = parse_size(fields.next().ok_or(HeaderError::MissingField("size"))?)?;

        if fields.next().is_some() {
            return Err(HeaderError::TrailingField);
        }

        Ok(Self { status, size })
    }
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    pub fn header(&self) -> ResponseHeader {
        ResponseHeader {
            status: self.status,
            size: self.payload.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_response_header() {
        let resp = Response::ok(b"hello".to_vec());
        assert_eq!(resp.header().encode(), b"OK:5\n".to_vec());

        let header = ResponseHeader {
            status: Status::NotFound,
            size: 0,
        };
        assert_eq!(header.encode(), b"NOT_FOUND:0\n".to_vec());
    }

    #[test]
    fn decode_every_status() {
        for status in [
            Status::Ok,
            Status::NotFound,
            Status::Permission,
            Status::Malformed,
            Status::Internal,
        ] {
            let header = ResponseHeader { status, size: 42 };
            assert_eq!(ResponseHeader::decode(&header.encode()).unwrap(), header);
        }
    }

    #[test]
    fn decode_rejects_bad_headers() {
        assert_eq!(
            ResponseHeader::decode(b"OK"),
            Err(HeaderError::MissingField("size"))
        );
        assert_eq!(
            ResponseHeader::decode(b"MAYBE:0"),
            Err(HeaderError::UnknownStatus("MAYBE".to_string()))
        );
        assert!(matches!(
            ResponseHeader::decode(b"OK:x"),
            Err(HeaderError::InvalidSize(_))
        ));
        assert_eq!(
            ResponseHeader::decode(b"OK:1:2"),
            Err(HeaderError::TrailingField)
        );
    }
}
