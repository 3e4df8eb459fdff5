use std::{
    io::Write,
    sync::{Arc, Mutex, PoisonError},
};

use log::{debug, error, trace};

use crate::protocol::{FrameWriter, Request, RequestId, Shutdown};

use super::{ClientError, PendingTable, RequestState};

/// Handler shared by every network writer worker.
///
/// The write half of the connection sits behind one mutex; a worker holds it for
/// exactly one frame, so header and payload of a request are never interleaved
/// with another request's bytes.
pub struct NetworkWriter<W: Write> {
    table: Arc<PendingTable>,
    stream: Mutex<FrameWriter<W>>,
    closer: Arc<dyn Shutdown + Send + Sync>,
}

impl<W: Write> NetworkWriter<W> {
    pub fn new(
        table: Arc<PendingTable>,
        stream: W,
        closer: Arc<dyn Shutdown + Send + Sync>,
    ) -> Self {
        Self {
            table,
            stream: Mutex::new(FrameWriter::new(stream)),
            closer,
        }
    }

    pub fn handle(&self, req: Request) {
        let id = req.id;
        if let Err(e) = req.check_size() {
            self.fail(id, ClientError::MalformedHeader(e));
            return;
        }

        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);

        // Registering the send order under the connection lock keeps it identical
        // to the order responses come back in.
        if !self.table.mark_sent(id) {
            debug!("{id} no longer pending, not sending");
            return;
        }
        let written = stream.write_request(&req);
        drop(stream);

        match written {
            Ok(()) => {
                self.table.set_state(id, RequestState::Sent);
                trace!("sent {id}: {} {} bytes", req.header.operation, req.header.size);
                self.table.set_state(id, RequestState::AwaitingResponse);
            }
            Err(e) => self.fail(id, ClientError::TransportWrite(e.to_string())),
        }
    }

    fn fail(&self, id: RequestId, err: ClientError) {
        error!("failed to send {id}: {err}");
        let fatal = err.is_fatal();
        self.table.complete(id, Err(err));
        if !fatal {
            return;
        }

        let failed = self.table.close(ClientError::TransportClosed);
        debug!("connection fault failed {failed} other requests");
        if let Err(e) = self.closer.shutdown_both() {
            trace!("shutdown after write failure: {e}");
        }
    }
}
