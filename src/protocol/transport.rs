use std::{
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    net::{self, TcpStream},
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use thiserror::Error;

use super::{
    Header, Request, Response,
    header::{HeaderError, MAX_HEADER_LEN, TERMINATOR},
    response::ResponseHeader,
};

/// Largest payload the reader will buffer for a single frame.
pub const MAX_PAYLOAD_SIZE: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to decode frame: {0}")]
    Header(#[from] HeaderError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

/// A ready bidirectional byte stream, split into one read half, one write half and
/// a handle that can shut the stream down from any thread.
///
/// Shutting the stream down must unblock a reader parked on the read half.
pub trait Connection {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + 'static;
    type Closer: Shutdown + Send + Sync + 'static;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer, Self::Closer)>;
}

/// Streams that can be shut down through any clone of their handle.
pub trait Shutdown {
    fn shutdown_both(&self) -> io::Result<()>;
}

impl Shutdown for TcpStream {
    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(net::Shutdown::Both)
    }
}

impl Connection for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;
    type Closer = TcpStream;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer, Self::Closer)> {
        Ok((self.try_clone()?, self.try_clone()?, self))
    }
}

#[cfg(unix)]
impl Shutdown for UnixStream {
    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(net::Shutdown::Both)
    }
}

#[cfg(unix)]
impl Connection for UnixStream {
    type Reader = UnixStream;
    type Writer = UnixStream;
    type Closer = UnixStream;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer, Self::Closer)> {
        Ok((self.try_clone()?, self.try_clone()?, self))
    }
}

/// Write side of the framing: one header line followed by exactly `size` bytes.
pub struct FrameWriter<W: Write> {
    stream: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream: BufWriter::new(stream),
        }
    }

    /// Writes a complete request frame and flushes it.
    ///
    /// A request whose declared size disagrees with its payload is refused before
    /// any byte reaches the stream.
    pub fn write_request(&mut self, req: &Request) -> Result<(), TransportError> {
        req.check_size()?;
        self.write_frame(&req.header.encode(), req.payload())
    }

    pub fn write_response(&mut self, resp: &Response) -> Result<(), TransportError> {
        self.write_frame(&resp.header().encode(), &resp.payload)
    }

    fn write_frame(&mut self, header: &[u8], payload: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(header)?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &W {
        self.stream.get_ref()
    }
}

/// Read side of the framing.
pub struct FrameReader<R: Read> {
    stream: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Reads the next response frame, or `None` if the peer closed the stream
    /// cleanly between frames.
    pub fn read_response(&mut self) -> Result<Option<Response>, TransportError> {
        let Some(line) = self.read_line()? else {
            return Ok(None);
        };
        let header = ResponseHeader::decode(&line)?;
        let payload = self.read_payload(header.size)?;

        Ok(Some(Response {
            status: header.status,
            payload,
        }))
    }

    /// Reads the next request frame, payload attached.
    pub fn read_request(&mut self) -> Result<Option<(Header, Vec<u8>)>, TransportError> {
        let Some(line) = self.read_line()? else {
            return Ok(None);
        };
        let header = Header::decode(&line)?;
        let payload = self.read_payload(header.size)?;

        Ok(Some((header, payload)))
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(MAX_HEADER_LEN as u64)
            .read_until(TERMINATOR, &mut line)?;

        match line.last() {
            _ if read == 0 => Ok(None),
            Some(&TERMINATOR) => Ok(Some(line)),
            _ if line.len() >= MAX_HEADER_LEN => Err(HeaderError::TooLong.into()),
            _ => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated header").into()),
        }
    }

    fn read_payload(&mut self, size: u64) -> Result<Vec<u8>, TransportError> {
        if size > MAX_PAYLOAD_SIZE {
            return Err(HeaderError::SizeTooLarge(size).into());
        }

        let mut payload = vec![0; size as usize];
        self.stream.read_exact(&mut payload)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::protocol::{Operation, RequestId, Status};

    use super::*;

    #[test]
    fn read_write_request() {
        let mut writer = FrameWriter::new(Vec::new());
        let header = Header::new(Operation::Write, "bob", "notes.txt", 0);
        let mut req = Request::new(RequestId(0), header, None);
        req.attach_payload(b"12345".to_vec());

        writer.write_request(&req).unwrap();
        writer.stream.flush().unwrap();
        assert_eq!(writer.get_ref().as_slice(), b"WRITE:bob:notes.txt:5\n12345");

        let mut reader = FrameReader::new(Cursor::new(writer.get_ref().clone()));
        let (header, payload) = reader.read_request().unwrap().unwrap();
        assert_eq!(header, req.header);
        assert_eq!(payload, b"12345");
        assert!(reader.read_request().unwrap().is_none());
    }

    #[test]
    fn mismatched_request_is_not_written() {
        let mut writer = FrameWriter::new(Vec::new());
        let header = Header::new(Operation::Write, "bob", "notes.txt", 10);
        let mut req = Request::new(RequestId(0), header, None);
        req.payload = Some(b"12345".to_vec());

        assert!(matches!(
            writer.write_request(&req),
            Err(TransportError::Header(HeaderError::SizeMismatch {
                declared: 10,
                actual: 5
            }))
        ));
        writer.stream.flush().unwrap();
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn read_write_response() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_response(&Response::ok(b"abc".to_vec())).unwrap();
        writer
            .write_response(&Response {
                status: Status::NotFound,
                payload: vec![],
            })
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(writer.get_ref().clone()));
        assert_eq!(
            reader.read_response().unwrap(),
            Some(Response::ok(b"abc".to_vec()))
        );
        assert_eq!(
            reader.read_response().unwrap().map(|r| r.status),
            Some(Status::NotFound)
        );
        assert_eq!(reader.read_response().unwrap(), None);
    }

    #[test]
    fn truncated_frames_are_errors() {
        let mut reader = FrameReader::new(Cursor::new(b"OK:10\nshort".to_vec()));
        assert!(matches!(
            reader.read_response(),
            Err(TransportError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof
        ));

        let mut reader = FrameReader::new(Cursor::new(b"OK:1".to_vec()));
        assert!(matches!(reader.read_response(), Err(TransportError::Io(_))));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let line = vec![b'A'; MAX_HEADER_LEN + 10];
        let mut reader = FrameReader::new(Cursor::new(line));
        assert!(matches!(
            reader.read_response(),
            Err(TransportError::Header(HeaderError::TooLong))
        ));

        let huge = format!("OK:{}\n", MAX_PAYLOAD_SIZE + 1);
        let mut reader = FrameReader::new(Cursor::new(huge.into_bytes()));
        assert!(matches!(
            reader.read_response(),
            Err(TransportError::Header(HeaderError::SizeTooLarge(_)))
        ));
    }
}
