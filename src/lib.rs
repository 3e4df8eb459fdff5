pub mod cli;
pub mod client;
pub mod config;
pub mod protocol;

pub use client::{ClientError, Session};
pub use config::ClientConfig;
pub use protocol::{Header, Operation};
