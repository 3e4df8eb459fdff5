use std::{
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{debug, info, trace, warn};

use crate::{
    config::ClientConfig,
    protocol::{Connection, Header, Operation, Request, Shutdown},
};

use super::{
    ClientError, PendingTable, RequestState, ResponseHandle,
    disk::{DiskJob, DiskStage},
    reader::NetworkReader,
    thread::WorkerPool,
    writer::NetworkWriter,
};

/// Checks a raw operation name and account before anything enters the pipeline.
pub fn validate(operation: &str, account: &str) -> Result<Operation, ClientError> {
    let operation = operation
        .parse::<Operation>()
        .map_err(|_| ClientError::InvalidRequest(format!("unrecognized operation '{operation}'")))?;

    if account.is_empty() {
        return Err(ClientError::InvalidRequest(
            "invalid account name: ''".to_string(),
        ));
    }

    Ok(operation)
}

/// Cloneable handle that tears a session's connection down from another thread,
/// e.g. a signal handler.
#[derive(Clone)]
pub struct SessionCloser {
    table: Arc<PendingTable>,
    closer: Arc<dyn Shutdown + Send + Sync>,
}

impl SessionCloser {
    /// Fails every pending request, refuses new ones and shuts the connection down.
    pub fn close(&self) {
        let failed = self.table.close(ClientError::TransportClosed);
        debug!("closing session, {failed} requests failed");

        if let Err(e) = self.closer.shutdown_both() {
            trace!("shutdown on close: {e}");
        }
    }
}

/// A client session over one shared connection.
///
/// Requests flow `submit` → disk staging (WRITE only) → network writer pool →
/// server, and responses flow back through the single network reader, which
/// resolves the matching [`ResponseHandle`].
pub struct Session {
    table: Arc<PendingTable>,
    local_dir: PathBuf,
    disk: WorkerPool<DiskJob>,
    writer: WorkerPool<Request>,
    reader: Option<JoinHandle<()>>,
    closer: SessionCloser,
}

impl Session {
    /// Dials `address` over TCP and starts a session on it.
    pub fn connect<A: ToSocketAddrs>(address: A, config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).map_err(|e| ClientError::Connect(e.to_string()))?;
        if let Ok(peer) = stream.peer_addr() {
            info!("connected to {peer}");
        }

        Self::new(stream, config)
    }

    /// Starts the worker pools and the reader over an established connection.
    pub fn new<C: Connection>(conn: C, config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let (read_half, write_half, closer) =
            conn.split().map_err(|e| ClientError::Connect(e.to_string()))?;
        let closer: Arc<dyn Shutdown + Send + Sync> = Arc::new(closer);
        let table = Arc::new(PendingTable::new(config.max_outstanding));
        let spawn_err = |e: std::io::Error| ClientError::Spawn(e.to_string());

        let net = NetworkWriter::new(Arc::clone(&table), write_half, Arc::clone(&closer));
        let writer = WorkerPool::new(
            "net-writer",
            config.net_workers,
            config.queue_capacity,
            move |req: Request| net.handle(req),
        )
        .map_err(spawn_err)?;

        let stage = DiskStage::new(
            Arc::clone(&table),
            writer.sender().ok_or(ClientError::TransportClosed)?,
        );
        let disk = WorkerPool::new(
            "disk",
            config.disk_workers,
            config.queue_capacity,
            move |job: DiskJob| stage.handle(job),
        )
        .map_err(spawn_err)?;

        let net = NetworkReader::new(
            Arc::clone(&table),
            read_half,
            disk.sender().ok_or(ClientError::TransportClosed)?,
            Arc::clone(&closer),
        );
        let reader = thread::Builder::new()
            .name("net-reader".to_string())
            .spawn(move || net.run())
            .map_err(spawn_err)?;

        debug!(
            "session started with {} disk and {} network workers",
            disk.size(),
            writer.size()
        );

        Ok(Self {
            closer: SessionCloser {
                table: Arc::clone(&table),
                closer,
            },
            table,
            local_dir: config.local_dir.clone(),
            disk,
            writer,
            reader: Some(reader),
        })
    }

    /// Admits a request into the pipeline and returns the handle its result will
    /// be delivered to.
    ///
    /// `file_name` is ignored for CREATE and LIST. Invalid requests never enter
    /// the pipeline.
    pub fn submit(
        &self,
        operation: Operation,
        account: &str,
        file_name: &str,
    ) -> Result<ResponseHandle, ClientError> {
        if account.is_empty() {
            return Err(ClientError::InvalidRequest(
                "invalid account name: ''".to_string(),
            ));
        }
        if operation.targets_file() && file_name.is_empty() {
            return Err(ClientError::InvalidRequest(format!(
                "{operation} requires a file name"
            )));
        }

        let file_name = if operation.targets_file() {
            file_name
        } else {
            ""
        };
        let local_path = match operation {
            Operation::Read | Operation::Write => Some(self.local_dir.join(file_name)),
            _ => None,
        };

        let handle = self.table.register(operation, local_path.clone())?;
        let id = handle.id();
        let req = Request::new(id, Header::new(operation, account, file_name, 0), local_path);

        let queued = if req.needs_staging() {
            self.table.set_state(id, RequestState::Staging);
            self.disk.execute(DiskJob::Stage(req)).is_ok()
        } else {
            self.table.set_state(id, RequestState::QueuedForSend);
            self.writer.execute(req).is_ok()
        };
        if !queued {
            self.table.complete(id, Err(ClientError::TransportClosed));
        }

        Ok(handle)
    }

    pub fn create(&self, account: &str) -> Result<(), ClientError> {
        self.submit(Operation::Create, account, "")?.wait()?;
        Ok(())
    }

    /// Fetches `file_name` into the local directory and returns its contents.
    ///
    /// If the contents arrive but cannot be stored, the error is
    /// [`ClientError::StoreFailed`] and still carries them.
    pub fn read(&self, account: &str, file_name: &str) -> Result<Vec<u8>, ClientError> {
        let resp = self.submit(Operation::Read, account, file_name)?.wait()?;
        Ok(resp.payload)
    }

    /// Uploads the local file `file_name`.
    pub fn write(&self, account: &str, file_name: &str) -> Result<(), ClientError> {
        self.submit(Operation::Write, account, file_name)?.wait()?;
        Ok(())
    }

    pub fn delete(&self, account: &str, file_name: &str) -> Result<(), ClientError> {
        self.submit(Operation::Delete, account, file_name)?.wait()?;
        Ok(())
    }

    /// Names of the files in `account`, one per line of the response payload.
    pub fn list(&self, account: &str) -> Result<Vec<String>, ClientError> {
        let resp = self.submit(Operation::List, account, "")?.wait()?;
        Ok(String::from_utf8_lossy(&resp.payload)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Number of admitted requests that are not resolved yet.
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    pub fn closer(&self) -> SessionCloser {
        self.closer.clone()
    }

    /// Closes the connection, fails whatever is still pending and waits for every
    /// worker to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };

        self.closer.close();
        if reader.join().is_err() {
            warn!("network reader panicked");
        }
        // The reader's disk handle is gone now, so the disk pool can drain, and
        // with it the last handles into the writer pool.
        self.disk.shutdown();
        self.writer.shutdown();
        info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        io::{BufRead, BufReader, Read},
        os::unix::net::UnixStream,
        sync::{Barrier, mpsc},
        time::Duration,
    };

    use tempdir::TempDir;

    use crate::protocol::{FrameWriter, Response, Status};

    use super::*;

    /// Reads one request frame off the server end exactly as it was sent.
    fn read_raw_frame(server: &mut BufReader<UnixStream>) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut line = Vec::new();
        if server.read_until(b'\n', &mut line).unwrap() == 0 {
            return None;
        }
        let header = Header::decode(&line).unwrap();
        let mut payload = vec![0; header.size as usize];
        server.read_exact(&mut payload).unwrap();
        Some((line, payload))
    }

    fn session(config: &ClientConfig) -> (Session, BufReader<UnixStream>, FrameWriter<UnixStream>) {
        let (client, server) = UnixStream::pair().unwrap();
        let session = Session::new(client, config).unwrap();
        let reply = FrameWriter::new(server.try_clone().unwrap());
        (session, BufReader::new(server), reply)
    }

    fn config(dir: &TempDir) -> ClientConfig {
        ClientConfig::default().with_local_dir(dir.path())
    }

    #[test]
    fn create_sends_bare_header() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        let handle = session.submit(Operation::Create, "alice", "").unwrap();
        let (line, payload) = read_raw_frame(&mut server).unwrap();
        assert_eq!(line, b"CREATE:alice::0\n");
        assert!(payload.is_empty());

        reply.write_response(&Response::ok(vec![])).unwrap();
        assert_eq!(handle.wait(), Ok(Response::ok(vec![])));
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn write_stages_file_then_sends_frame() {
        let temp = TempDir::new("session").unwrap();
        fs::write(temp.path().join("notes.txt"), b"hello").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        let handle = session.submit(Operation::Write, "bob", "notes.txt").unwrap();
        let (line, payload) = read_raw_frame(&mut server).unwrap();
        assert_eq!(line, b"WRITE:bob:notes.txt:5\n");
        assert_eq!(payload, b"hello");

        reply.write_response(&Response::ok(vec![])).unwrap();
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn write_of_missing_file_never_reaches_the_wire() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        let err = session.write("bob", "absent.txt").unwrap_err();
        assert_eq!(err, ClientError::FileNotFound(temp.path().join("absent.txt")));

        // The next request is the first thing the server sees.
        let handle = session.submit(Operation::List, "bob", "").unwrap();
        let (line, _) = read_raw_frame(&mut server).unwrap();
        assert_eq!(line, b"LIST:bob::0\n");
        reply.write_response(&Response::ok(b"a\nb\n".to_vec())).unwrap();
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn read_not_found_creates_no_file() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        let handle = session.submit(Operation::Read, "bob", "ghost.txt").unwrap();
        let (line, _) = read_raw_frame(&mut server).unwrap();
        assert_eq!(line, b"READ:bob:ghost.txt:0\n");
        reply
            .write_response(&Response {
                status: Status::NotFound,
                payload: vec![],
            })
            .unwrap();

        assert!(matches!(
            handle.wait(),
            Err(ClientError::Server {
                status: Status::NotFound,
                ..
            })
        ));
        assert!(!temp.path().join("ghost.txt").exists());
    }

    #[test]
    fn read_stores_payload_locally() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        let server = thread::spawn(move || {
            read_raw_frame(&mut server).unwrap();
            reply.write_response(&Response::ok(b"remote".to_vec())).unwrap();
            server
        });

        assert_eq!(session.read("bob", "copy.txt").unwrap(), b"remote");
        assert_eq!(fs::read(temp.path().join("copy.txt")).unwrap(), b"remote");
        drop(server.join().unwrap());
    }

    #[test]
    fn list_splits_names() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        let server = thread::spawn(move || {
            read_raw_frame(&mut server).unwrap();
            reply.write_response(&Response::ok(b"a.txt\nb.txt\n".to_vec())).unwrap();
            server
        });

        assert_eq!(session.list("carol").unwrap(), vec!["a.txt", "b.txt"]);
        drop(server.join().unwrap());
    }

    #[test]
    fn invalid_requests_are_rejected_up_front() {
        let temp = TempDir::new("session").unwrap();
        let (session, _server, _reply) = session(&config(&temp));

        assert!(matches!(
            session.submit(Operation::List, "", ""),
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(
            session.submit(Operation::Read, "bob", ""),
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(validate("NOOP", "bob"), Err(ClientError::InvalidRequest(_))));
        assert!(matches!(validate("LIST", ""), Err(ClientError::InvalidRequest(_))));
        assert_eq!(validate("DELETE", "bob"), Ok(Operation::Delete));
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn outstanding_requests_are_bounded() {
        let temp = TempDir::new("session").unwrap();
        let mut config = config(&temp);
        config.max_outstanding = 1;
        let (session, _server, _reply) = session(&config);

        let _first = session.submit(Operation::List, "bob", "").unwrap();
        assert_eq!(
            session.submit(Operation::List, "bob", "").unwrap_err(),
            ClientError::Backpressure { limit: 1 }
        );
    }

    #[test]
    fn connection_loss_fails_every_pending_request() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, reply) = session(&config(&temp));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                session
                    .submit(Operation::Delete, "bob", &format!("f{i}"))
                    .unwrap()
            })
            .collect();
        for _ in 0..4 {
            read_raw_frame(&mut server).unwrap();
        }
        drop(reply);
        drop(server);

        for handle in handles {
            assert_eq!(
                handle.wait_timeout(Duration::from_secs(5)),
                Err(ClientError::TransportClosed)
            );
        }
        assert_eq!(
            session.submit(Operation::List, "bob", "").unwrap_err(),
            ClientError::TransportClosed
        );
    }

    #[test]
    fn concurrent_writes_through_one_disk_worker() {
        let temp = TempDir::new("session").unwrap();
        fs::write(temp.path().join("one.txt"), b"first file").unwrap();
        fs::write(temp.path().join("two.txt"), b"second").unwrap();
        let mut config = config(&temp);
        config.disk_workers = 1;
        config.queue_capacity = 1;
        let (session, mut server, mut reply) = session(&config);

        let server = thread::spawn(move || {
            let mut frames = Vec::new();
            while frames.len() < 2 {
                let (line, payload) = read_raw_frame(&mut server).unwrap();
                reply.write_response(&Response::ok(vec![])).unwrap();
                frames.push((line, payload));
            }
            frames.sort();
            frames
        });

        let session = Arc::new(session);
        let barrier = Arc::new(Barrier::new(2));
        let writers: Vec<_> = ["one.txt", "two.txt"]
            .into_iter()
            .map(|name| {
                let session = Arc::clone(&session);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    session.write("bob", name)
                })
            })
            .collect();
        for w in writers {
            assert_eq!(w.join().unwrap(), Ok(()));
        }

        let frames = server.join().unwrap();
        assert_eq!(frames[0].0, b"WRITE:bob:one.txt:10\n");
        assert_eq!(frames[0].1, b"first file");
        assert_eq!(frames[1].0, b"WRITE:bob:two.txt:6\n");
        assert_eq!(frames[1].1, b"second");
    }

    #[test]
    fn responses_match_requests_under_concurrency() {
        let temp = TempDir::new("session").unwrap();
        let config = ClientConfig::new(true).with_local_dir(temp.path());
        let (session, mut server, mut reply) = session(&config);
        const COUNT: usize = 40;

        // Answer every READ with its own file name as the contents.
        let server = thread::spawn(move || {
            for _ in 0..COUNT {
                let (line, _) = read_raw_frame(&mut server).unwrap();
                let header = Header::decode(&line).unwrap();
                reply
                    .write_response(&Response::ok(header.file_name.into_bytes()))
                    .unwrap();
            }
        });

        let session = Arc::new(session);
        let (tx, rx) = mpsc::channel();
        let callers: Vec<_> = (0..4)
            .map(|t| {
                let session = Arc::clone(&session);
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..COUNT / 4 {
                        let name = format!("file-{t}-{i}");
                        let data = session.read("bob", &name).unwrap();
                        tx.send((name, data)).unwrap();
                    }
                })
            })
            .collect();
        drop(tx);

        for c in callers {
            c.join().unwrap();
        }
        server.join().unwrap();

        let results: Vec<_> = rx.iter().collect();
        assert_eq!(results.len(), COUNT);
        for (name, data) in results {
            assert_eq!(data, name.as_bytes());
            assert_eq!(fs::read(temp.path().join(&name)).unwrap(), name.as_bytes());
        }
    }

    #[test]
    fn reader_survives_an_unmatched_response() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        // Nothing has been sent yet, so this frame answers no one.
        reply.write_response(&Response::ok(b"stray".to_vec())).unwrap();
        thread::sleep(Duration::from_millis(100));

        let handle = session.submit(Operation::List, "bob", "").unwrap();
        let (line, _) = read_raw_frame(&mut server).unwrap();
        assert_eq!(line, b"LIST:bob::0\n");
        reply.write_response(&Response::ok(b"a.txt\n".to_vec())).unwrap();

        assert_eq!(
            handle.wait_timeout(Duration::from_secs(5)),
            Ok(Response::ok(b"a.txt\n".to_vec()))
        );
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn shutdown_releases_waiting_callers() {
        let temp = TempDir::new("session").unwrap();
        let (session, _server, _reply) = session(&config(&temp));

        let handle = session.submit(Operation::List, "bob", "").unwrap();
        let closer = session.closer();
        let waiter = thread::spawn(move || handle.wait());

        closer.close();
        assert_eq!(waiter.join().unwrap(), Err(ClientError::TransportClosed));
        session.shutdown();
    }

    #[test]
    fn canceled_request_does_not_desync_the_stream() {
        let temp = TempDir::new("session").unwrap();
        let (session, mut server, mut reply) = session(&config(&temp));

        let first = session.submit(Operation::Delete, "bob", "a").unwrap();
        read_raw_frame(&mut server).unwrap();
        assert!(first.cancel());

        let second = session.submit(Operation::Delete, "bob", "b").unwrap();
        read_raw_frame(&mut server).unwrap();

        reply.write_response(&Response::ok(b"for a".to_vec())).unwrap();
        reply.write_response(&Response::ok(b"for b".to_vec())).unwrap();

        assert_eq!(first.wait(), Err(ClientError::Canceled));
        assert_eq!(second.wait(), Ok(Response::ok(b"for b".to_vec())));
    }
}
