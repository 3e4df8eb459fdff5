//! Client-server communication protocol.
//!
//! This module defines the wire contract spoken between a derpfs client and a storage
//! server: the request header codec, the response frame, and the transport halves used
//! to move frames over a single shared connection.
//!
//! # Frames
//!
//! Every message is a frame: a textual header line followed by exactly `size` raw
//! payload bytes.
//!
//! - Requests: `OPERATION:ACCOUNT:FILENAME:SIZE\n` then the payload (WRITE only).
//! - Responses: `STATUS:SIZE\n` then the result payload (READ and LIST).
//!
//! Fields that may carry user data are escaped so the delimiter never appears raw
//! inside them; see [`Header`].
//!
//! # Correlation
//!
//! Frames carry no request id. The n-th response answers the n-th request written to
//! the connection, so a connection must only ever be written from one critical
//! section at a time and read by a single reader.
//!
//! # Key Components
//!
//! - [`Header`]: request header and its codec.
//! - [`Response`]: decoded response frame with its [`Status`].
//! - [`Connection`]: a byte stream split into a read half, a write half and a closer.
//! - [`FrameWriter`] / [`FrameReader`]: framing over those halves.
//!
//! # See Also
//!
//! - [`client`](crate::client): the request pipeline built on top of this module.
mod header;
mod request;
mod response;
mod transport;

pub use header::{Header, HeaderError, MAX_HEADER_LEN, Operation};
pub use request::{Request, RequestId};
pub use response::{Response, ResponseHeader, Status};
pub use transport::{
    Connection, FrameReader, FrameWriter, MAX_PAYLOAD_SIZE, Shutdown, TransportError,
};
