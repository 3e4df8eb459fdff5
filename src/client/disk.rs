//! Local disk staging.
//!
//! WRITE requests arrive here without a payload; a worker reads the named local file
//! into memory and forwards the request to the network writer. Successful READ
//! responses come back here so their payload can be stored in the local file named
//! by the request that fetched it.
use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    process,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, trace, warn};

use crate::protocol::{Request, Response};

use super::{
    ClientError, Completion, PendingTable, RequestState,
    thread::JobSender,
};

#[derive(Debug)]
pub enum DiskJob {
    /// Read the request's local file and attach it as payload.
    Stage(Request),
    /// Store a READ result, then resolve its caller.
    Store {
        response: Response,
        completion: Completion,
    },
}

pub fn read_payload(path: &Path) -> Result<Vec<u8>, ClientError> {
    fs::read(path).map_err(|e| ClientError::file_read(path.to_path_buf(), e))
}

/// Replaces the contents of `path` with `payload`.
///
/// The bytes land in a sibling file that is synced and then renamed over `path`, so
/// anyone opening `path` sees either the previous file or the whole new one.
pub fn write_payload(path: &Path, payload: &[u8]) -> Result<(), ClientError> {
    let partial = partial_path(path);
    let write = || -> io::Result<()> {
        let mut file = File::create(&partial)?;
        file.write_all(payload)?;
        file.sync_all()?;
        fs::rename(&partial, path)
    };

    write().map_err(|e| {
        if let Err(rm) = fs::remove_file(&partial) {
            trace!("removing {}: {rm}", partial.display());
        }
        ClientError::file_write(path.to_path_buf(), e)
    })
}

/// Unique hidden sibling of `path` used while its new contents are written.
fn partial_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = NEXT.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}.{seq}.part", process::id()))
}

/// Handler shared by every disk staging worker.
pub struct DiskStage {
    table: Arc<PendingTable>,
    writer: JobSender<Request>,
}

impl DiskStage {
    pub fn new(table: Arc<PendingTable>, writer: JobSender<Request>) -> Self {
        Self { table, writer }
    }

    pub fn handle(&self, job: DiskJob) {
        match job {
            DiskJob::Stage(req) => self.stage(req),
            DiskJob::Store {
                response,
                completion,
            } => store(response, completion),
        }
    }

    fn stage(&self, mut req: Request) {
        let id = req.id;
        if !self.table.is_pending(id) {
            debug!("{id} no longer pending, skipping staging");
            return;
        }

        let Some(path) = req.local_path.clone() else {
            self.table.complete(
                id,
                Err(ClientError::InvalidRequest(format!(
                    "{id}: WRITE without a local file"
                ))),
            );
            return;
        };

        match read_payload(&path) {
            Ok(payload) => {
                trace!("staged {} bytes from {} for {id}", payload.len(), path.display());
                req.attach_payload(payload);
                self.table.set_state(id, RequestState::QueuedForSend);

                if self.writer.send(req).is_err() {
                    self.table.complete(id, Err(ClientError::TransportClosed));
                }
            }
            Err(e) => {
                warn!("staging {id} failed: {e}");
                self.table.complete(id, Err(e));
            }
        }
    }
}

/// Stores a successful READ result and resolves the caller.
///
/// A local write failure resolves the caller with [`ClientError::StoreFailed`],
/// which still carries the fetched response. Nothing is re-sent.
pub fn store(response: Response, completion: Completion) {
    let outcome = match completion.destination() {
        Some(path) => match write_payload(path, &response.payload) {
            Ok(()) => {
                trace!(
                    "stored {} bytes into {} for {}",
                    response.payload.len(),
                    path.display(),
                    completion.id()
                );
                Ok(response)
            }
            Err(e) => {
                warn!("storing {} failed: {e}", completion.id());
                Err(ClientError::StoreFailed {
                    error: Box::new(e),
                    response,
                })
            }
        },
        None => Ok(response),
    };

    completion.complete(outcome);
}
