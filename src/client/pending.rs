//! Correlation between requests on the wire and the callers waiting on them.
//!
//! The [`PendingTable`] holds one entry per admitted request, keyed by its
//! [`RequestId`]. Frames carry no id, so the table also records the order in which
//! requests reach the connection: the network writer appends an id while it holds the
//! connection, and the network reader pops the oldest id for every response frame.
//!
//! Each entry points at a single-assignment [`Slot`]. The producer side holds a
//! [`Completion`], the caller holds a [`ResponseHandle`]. Whoever resolves the slot
//! first wins; every later attempt is a no-op, so a late network error racing a
//! successful response (or a cancellation) can never resolve a request twice.
//!
//! # Lock ordering
//!
//! The network writer takes the connection lock and then the table lock. Nothing
//! takes the connection lock while holding the table lock.
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, trace};

use crate::protocol::{Operation, RequestId, Response};

use super::ClientError;

/// Final result of a request as seen by its caller.
pub type Outcome = Result<Response, ClientError>;

/// Lifecycle of a single request.
///
/// Progress only moves forward; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestState {
    Created,
    Staging,
    QueuedForSend,
    Sent,
    AwaitingResponse,
    Completed,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }
}

#[derive(Debug)]
struct SlotState {
    state: RequestState,
    outcome: Option<Outcome>,
}

/// Single-assignment completion slot shared by a [`Completion`] and a
/// [`ResponseHandle`].
#[derive(Debug)]
struct Slot {
    operation: Operation,
    destination: Option<PathBuf>,
    inner: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new(operation: Operation, destination: Option<PathBuf>) -> Self {
        Self {
            operation,
            destination,
            inner: Mutex::new(SlotState {
                state: RequestState::Created,
                outcome: None,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: RequestState) {
        let mut inner = self.lock();
        if !inner.state.is_terminal() && next > inner.state {
            inner.state = next;
        }
    }

    /// Resolves the slot. Returns `false` if it was already resolved.
    fn resolve(&self, outcome: Outcome) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }

        inner.state = match outcome {
            Ok(_) => RequestState::Completed,
            Err(_) => RequestState::Failed,
        };
        inner.outcome = Some(outcome);
        self.ready.notify_all();
        true
    }

    fn state(&self) -> RequestState {
        self.lock().state
    }
}

/// Producer side of a pending entry, obtained by removing it from the table.
///
/// Dropping an unresolved completion fails the request with
/// [`ClientError::TransportClosed`] so its caller is never stranded.
#[derive(Debug)]
pub struct Completion {
    id: RequestId,
    slot: Arc<Slot>,
}

impl Completion {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn operation(&self) -> Operation {
        self.slot.operation
    }

    /// Local file a READ result should be stored in.
    pub fn destination(&self) -> Option<&PathBuf> {
        self.slot.destination.as_ref()
    }

    /// Resolves the request. Returns `false` if the caller already gave up on it.
    pub fn complete(self, outcome: Outcome) -> bool {
        let resolved = self.slot.resolve(outcome);
        if !resolved {
            debug!("discarding late result for {}", self.id);
        }
        resolved
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.slot.resolve(Err(ClientError::TransportClosed)) {
            debug!("{} dropped before completion", self.id);
        }
    }
}

/// Caller side of a pending entry.
#[derive(Debug)]
pub struct ResponseHandle {
    id: RequestId,
    slot: Arc<Slot>,
    table: Arc<PendingTable>,
}

impl ResponseHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.slot.state()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Blocks until the request is resolved.
    pub fn wait(self) -> Outcome {
        let mut inner = self
            .slot
            .ready
            .wait_while(self.slot.lock(), |s| s.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        inner.outcome.take().unwrap_or(Err(ClientError::Canceled))
    }

    /// Blocks for at most `timeout`. On expiry the request is cancelled and
    /// [`ClientError::Timeout`] is returned.
    pub fn wait_timeout(self, timeout: Duration) -> Outcome {
        let timed_out = {
            let (_inner, result) = self
                .slot
                .ready
                .wait_timeout_while(self.slot.lock(), timeout, |s| s.outcome.is_none())
                .unwrap_or_else(PoisonError::into_inner);
            result.timed_out()
        };

        if timed_out {
            self.table
                .discard(self.id, &self.slot, ClientError::Timeout(timeout));
        }
        self.wait()
    }

    /// Cancels the request if it is still unresolved. In-flight disk or network
    /// work is not interrupted; its result is dropped when it arrives.
    pub fn cancel(&self) -> bool {
        self.table.discard(self.id, &self.slot, ClientError::Canceled)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RequestId, Arc<Slot>>,
    /// Ids in the order their frames were written to the connection.
    sent: VecDeque<RequestId>,
    next_id: u64,
    closed: Option<ClientError>,
}

/// Bounded, thread-safe map from request id to completion slot.
#[derive(Debug)]
pub struct PendingTable {
    inner: Mutex<Inner>,
    limit: usize,
}

impl PendingTable {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits a new request, failing fast once the table is closed or full.
    pub fn register(
        self: &Arc<Self>,
        operation: Operation,
        destination: Option<PathBuf>,
    ) -> Result<ResponseHandle, ClientError> {
        let mut inner = self.lock();
        if let Some(err) = &inner.closed {
            return Err(err.clone());
        }
        // A cancelled request already on the wire keeps its place until the
        // reader drains its response.
        let abandoned = inner
            .sent
            .iter()
            .filter(|&id| !inner.entries.contains_key(id))
            .count();
        if inner.entries.len() + abandoned >= self.limit {
            return Err(ClientError::Backpressure { limit: self.limit });
        }

        let id = RequestId(inner.next_id);
        inner.next_id += 1;

        let slot = Arc::new(Slot::new(operation, destination));
        let previous = inner.entries.insert(id, Arc::clone(&slot));
        debug_assert!(previous.is_none(), "request id {id} registered twice");
        trace!("registered {id} ({operation})");

        Ok(ResponseHandle {
            id,
            slot,
            table: Arc::clone(self),
        })
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Moves a still-pending request forward in its lifecycle.
    pub fn set_state(&self, id: RequestId, state: RequestState) {
        if let Some(slot) = self.lock().entries.get(&id) {
            slot.advance(state);
        }
    }

    /// Queues `id` as the next request to be answered on the connection.
    ///
    /// Must be called while holding the connection's write side, right before the
    /// frame is written. The state is left alone; the writer reports
    /// [`RequestState::Sent`] once the bytes are out. Returns `false` if the
    /// request was cancelled or failed and should not be sent.
    pub fn mark_sent(&self, id: RequestId) -> bool {
        let mut inner = self.lock();
        if !inner.entries.contains_key(&id) {
            return false;
        }
        inner.sent.push_back(id);
        true
    }

    /// Pops the oldest request on the wire, i.e. the one the next response
    /// answers. The completion is `None` if that request was cancelled meanwhile.
    pub fn next_sent(&self) -> Option<(RequestId, Option<Completion>)> {
        let mut inner = self.lock();
        let id = inner.sent.pop_front()?;
        let completion = inner
            .entries
            .remove(&id)
            .map(|slot| Completion { id, slot });

        Some((id, completion))
    }

    /// Removes `id` and hands back its producer side, if still pending.
    pub fn take(&self, id: RequestId) -> Option<Completion> {
        self.lock()
            .entries
            .remove(&id)
            .map(|slot| Completion { id, slot })
    }

    /// Removes and resolves `id`. Returns `false` if it was not pending.
    pub fn complete(&self, id: RequestId, outcome: Outcome) -> bool {
        match self.take(id) {
            Some(completion) => completion.complete(outcome),
            None => {
                debug!("{id} already resolved, dropping result");
                false
            }
        }
    }

    fn discard(&self, id: RequestId, slot: &Slot, reason: ClientError) -> bool {
        self.lock().entries.remove(&id);
        let resolved = slot.resolve(Err(reason));
        if resolved {
            debug!("{id} discarded by caller");
        }
        resolved
    }

    /// Fails every pending request with `reason` and refuses new ones.
    /// Returns how many requests were failed.
    pub fn close(&self, reason: ClientError) -> usize {
        let drained: Vec<_> = {
            let mut inner = self.lock();
            if inner.closed.is_none() {
                inner.closed = Some(reason.clone());
            }
            inner.sent.clear();
            inner.entries.drain().collect()
        };

        drained
            .into_iter()
            .filter(|(_, slot)| slot.resolve(Err(reason.clone())))
            .count()
    }
}
