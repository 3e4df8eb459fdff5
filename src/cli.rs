//! Command line surface for the derpfs client.
//!
//! Parsing only; validation of the operation and account happens in
//! [`client::validate`](crate::client::validate) before a request is built.
use std::path::PathBuf;

use clap::Parser;

use crate::{
    ClientConfig,
    client::{ClientError, validate},
    protocol::Operation,
};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: &str = "0";

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address to connect to
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub address: String,
    /// Port to connect to
    #[arg(long, default_value = DEFAULT_PORT)]
    pub port: String,
    /// Account to access
    #[arg(long, default_value = "")]
    pub account: String,
    /// Operation to perform: CREATE, READ, WRITE, DELETE or LIST
    #[arg(long, default_value = "NOOP")]
    pub op: String,
    /// File to read or write into
    #[arg(long = "file-name", default_value = "")]
    pub file_name: String,
    /// Start an interactive session
    #[arg(long)]
    pub interactive: bool,
    /// Directory local files are read from and written to
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

impl Cli {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.interactive).with_local_dir(&self.dir)
    }

    pub fn operation(&self) -> Result<Operation, ClientError> {
        validate(&self.op, &self.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags() {
        let cli = Cli::try_parse_from(["derpfs"]).unwrap();

        assert_eq!(cli.endpoint(), "127.0.0.1:0");
        assert!(!cli.interactive);
        assert!(matches!(cli.operation(), Err(ClientError::InvalidRequest(_))));
    }

    #[test]
    fn parses_full_invocation() {
        let cli = Cli::try_parse_from([
            "derpfs",
            "--address",
            "10.0.0.2",
            "--port",
            "7000",
            "--account",
            "bob",
            "--op",
            "WRITE",
            "--file-name",
            "notes.txt",
            "--interactive",
        ])
        .unwrap();

        assert_eq!(cli.endpoint(), "10.0.0.2:7000");
        assert_eq!(cli.operation().unwrap(), Operation::Write);
        assert_eq!(cli.config().net_workers, 3);
        assert_eq!(cli.file_name, "notes.txt");
    }
}
