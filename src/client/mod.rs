//! Concurrent request pipeline over a single shared connection.
//!
//! A [`Session`] owns one connection and three kinds of workers:
//!
//! - a disk staging pool that reads WRITE payloads from local files and stores READ
//!   results into them,
//! - a network writer pool whose workers take turns on the connection's write side,
//!   one whole frame at a time,
//! - a single network reader that drains response frames and resolves the waiting
//!   callers through the [`PendingTable`].
//!
//! # Request lifecycle
//!
//! ```text
//! CREATED -> STAGING (WRITE only) -> QUEUED_FOR_SEND -> SENT -> AWAITING_RESPONSE
//!         -> COMPLETED | FAILED
//! ```
//!
//! A failure local to one request (missing file, server status) only fails that
//! request. A failure of the connection fails every pending request with
//! [`ClientError::TransportClosed`] and the session stops admitting new ones.
//!
//! # Example
//! ```no_run
//! use derpfs::{ClientConfig, client::Session};
//!
//! let config = ClientConfig::default();
//! let session = Session::connect("127.0.0.1:4000", &config).unwrap();
//!
//! session.create("alice").unwrap();
//! for name in session.list("alice").unwrap() {
//!     println!("{name}");
//! }
//! ```
mod disk;
mod error;
mod pending;
mod reader;
mod session;
mod thread;
mod writer;

pub use error::ClientError;
pub use pending::{Completion, Outcome, PendingTable, RequestState, ResponseHandle};
pub use session::{Session, SessionCloser, validate};
