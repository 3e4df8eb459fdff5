use std::{
    io,
    sync::{
        Arc, Mutex, PoisonError,
        mpsc::{self, Receiver, SyncSender, TrySendError},
    },
    thread,
};

use log::{debug, warn};

/// Handle for feeding jobs into a [`WorkerPool`]'s bounded queue.
#[derive(Debug)]
pub struct JobSender<T> {
    sender: SyncSender<T>,
}

impl<T> Clone for JobSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> JobSender<T> {
    /// Queues a job, blocking while the queue is full. Hands the job back if the
    /// pool has shut down.
    pub fn send(&self, job: T) -> Result<(), T> {
        self.sender.send(job).map_err(|e| e.0)
    }

    /// Queues a job only if there is room right now.
    pub fn try_send(&self, job: T) -> Result<(), T> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Disconnected(job) => job,
        })
    }
}

/// A fixed set of named threads pulling jobs of type `T` from one shared bounded
/// queue. Every job is handed to the same handler.
#[derive(Debug)]
pub struct WorkerPool<T> {
    name: &'static str,
    workers: Vec<Worker>,
    sender: Option<JobSender<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(name: &'static str, size: usize, capacity: usize, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        assert!(size > 0);

        let (sender, receiver) = mpsc::sync_channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let handler = Arc::clone(&handler);
            workers.push(Worker::new(name, i, Arc::clone(&receiver), move |job| {
                handler(job)
            })?);
        }

        Ok(Self {
            name,
            workers,
            sender: Some(JobSender { sender }),
        })
    }

    /// A new handle to this pool's queue. The pool only drains and stops once
    /// every handle has been dropped.
    pub fn sender(&self) -> Option<JobSender<T>> {
        self.sender.clone()
    }

    pub fn execute(&self, job: T) -> Result<(), T> {
        match &self.sender {
            Some(sender) => sender.send(job),
            None => Err(job),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl<T> WorkerPool<T> {
    /// Closes this pool's own queue handle and waits for the workers to finish the
    /// remaining jobs.
    pub fn shutdown(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("shutting down {} worker {}", self.name, worker.id);

            if worker.thread.join().is_err() {
                warn!("{} worker {} panicked", self.name, worker.id);
            }
        }
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new<T, F>(
        name: &'static str,
        id: usize,
        receiver: Arc<Mutex<Receiver<T>>>,
        handler: F,
    ) -> io::Result<Self>
    where
        T: Send + 'static,
        F: Fn(T) + Send + 'static,
    {
        let thread = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || {
                loop {
                    let msg = receiver
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .recv();
                    match msg {
                        Ok(job) => handler(job),
                        Err(_) => {
                            debug!("{name} worker {id} disconnected");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self { id, thread })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn runs_every_job() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        let mut pool = WorkerPool::new("test", 3, 2, move |n: usize| {
            handle.fetch_add(n, Ordering::SeqCst);
        })
        .unwrap();

        for _ in 0..50 {
            pool.execute(1).unwrap();
        }
        pool.shutdown();

        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn rejects_jobs_after_shutdown() {
        let mut pool = WorkerPool::new("test", 1, 1, |_: u8| {}).unwrap();
        pool.shutdown();

        assert_eq!(pool.execute(7), Err(7));
        assert!(pool.sender().is_none());
    }

    #[test]
    fn outstanding_senders_keep_pool_alive() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        let mut pool = WorkerPool::new("test", 2, 4, move |_: ()| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let sender = pool.sender().unwrap();
        let producer = thread::spawn(move || {
            for _ in 0..10 {
                sender.send(()).unwrap();
            }
        });

        producer.join().unwrap();
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }
}
