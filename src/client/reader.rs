use std::{io::Read, sync::Arc};

use log::{debug, error, info, trace, warn};

use crate::protocol::{FrameReader, Operation, Response, Shutdown};

use super::{
    ClientError, Completion, PendingTable,
    disk::{self, DiskJob},
    thread::JobSender,
};

/// The single owner of the connection's read side.
///
/// Each response frame answers the oldest request written to the connection. Once
/// the stream ends or fails, every request still pending is failed with
/// [`ClientError::TransportClosed`].
pub struct NetworkReader<R: Read> {
    table: Arc<PendingTable>,
    frames: FrameReader<R>,
    disk: JobSender<DiskJob>,
    closer: Arc<dyn Shutdown + Send + Sync>,
}

impl<R: Read> NetworkReader<R> {
    pub fn new(
        table: Arc<PendingTable>,
        stream: R,
        disk: JobSender<DiskJob>,
        closer: Arc<dyn Shutdown + Send + Sync>,
    ) -> Self {
        Self {
            table,
            frames: FrameReader::new(stream),
            disk,
            closer,
        }
    }

    pub fn run(mut self) {
        loop {
            match self.frames.read_response() {
                Ok(Some(resp)) => self.dispatch(resp),
                Ok(None) => {
                    info!("connection closed by server");
                    break;
                }
                Err(e) => {
                    error!("failed to read response: {e}");
                    break;
                }
            }
        }

        let failed = self.table.close(ClientError::TransportClosed);
        if failed > 0 {
            warn!("connection lost with {failed} requests pending");
        }
        if let Err(e) = self.closer.shutdown_both() {
            trace!("shutdown after read side closed: {e}");
        }
    }

    fn dispatch(&self, resp: Response) {
        let Some((id, completion)) = self.table.next_sent() else {
            warn!(
                "{}, discarding {} frame of {} bytes",
                ClientError::UnexpectedResponse,
                resp.status,
                resp.payload.len()
            );
            return;
        };
        let Some(completion) = completion else {
            debug!("discarding response for canceled {id}");
            return;
        };
        trace!("{id} answered with {}", resp.status);

        if !resp.status.is_success() {
            let message = String::from_utf8_lossy(&resp.payload).into_owned();
            completion.complete(Err(ClientError::Server {
                status: resp.status,
                message,
            }));
            return;
        }

        match completion.operation() {
            Operation::Read if completion.destination().is_some() => self.store(resp, completion),
            _ => {
                completion.complete(Ok(resp));
            }
        }
    }

    fn store(&self, response: Response, completion: Completion) {
        // Never block the only reader on a saturated disk pool.
        let job = DiskJob::Store {
            response,
            completion,
        };
        if let Err(DiskJob::Store {
            response,
            completion,
        }) = self.disk.try_send(job)
        {
            debug!("disk pool busy, storing {} inline", completion.id());
            disk::store(response, completion);
        }
    }
}
