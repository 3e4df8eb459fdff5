//! Client configuration.
//!
//! A [`ClientConfig`] is built once (usually from the command line) and handed to
//! [`Session::new`](crate::client::Session::new) by reference. The interactive flag
//! only changes the size of the worker pools, never protocol behavior.
use std::path::PathBuf;

use crate::client::ClientError;

/// Workers per pool for a one-shot invocation.
pub const BATCH_WORKERS: usize = 1;
/// Workers per pool for an interactive session.
pub const INTERACTIVE_WORKERS: usize = 3;

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_MAX_OUTSTANDING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Threads reading/writing local files.
    pub disk_workers: usize,
    /// Threads writing frames to the shared connection.
    pub net_workers: usize,
    /// Bound of each pool's intake queue.
    pub queue_capacity: usize,
    /// Maximum number of requests admitted but not yet resolved.
    pub max_outstanding: usize,
    /// Directory local file names are resolved against.
    pub local_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(interactive: bool) -> Self {
        let workers = if interactive {
            INTERACTIVE_WORKERS
        } else {
            BATCH_WORKERS
        };

        Self {
            disk_workers: workers,
            net_workers: workers,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            local_dir: PathBuf::from("."),
        }
    }

    pub fn with_local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.disk_workers == 0 || self.net_workers == 0 {
            return Err(ClientError::Config(
                "every worker pool needs at least one worker".to_string(),
            ));
        }
        if self.max_outstanding == 0 {
            return Err(ClientError::Config(
                "max_outstanding must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(false)
    }
}
