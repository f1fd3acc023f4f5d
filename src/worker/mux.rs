//! Correlation of concurrent requests with their responses.
//!
//! The worker answers over a single shared stream, possibly out of order.
//! The multiplexer hands out monotonically increasing request ids, keeps a
//! table of pending calls, and routes each decoded response to the one
//! caller waiting on that id. Completion is exactly-once: a pending call is
//! finalized by a matching response, by the caller's timeout, or by a
//! state-change sweep, whichever comes first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use super::error::{WorkerError, WorkerResult};
use super::protocol::ResponseEnvelope;

/// One end of a pending call: the supervisor side resolves it, the
/// dispatching caller awaits the receiver.
type PendingSender = oneshot::Sender<WorkerResult<ResponseEnvelope>>;

/// Receiver a dispatching caller awaits until its call is finalized.
pub type PendingReceiver = oneshot::Receiver<WorkerResult<ResponseEnvelope>>;

/// Tracks in-flight calls keyed by correlation id.
#[derive(Debug)]
pub struct Multiplexer {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingSender>>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next correlation id and record a pending call for it.
    ///
    /// Ids never repeat within a supervisor lifetime, so each id maps to at
    /// most one pending call.
    pub fn register(&self) -> (u64, PendingReceiver) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    /// Resolve the pending call matching this response.
    ///
    /// Returns `false` for late or duplicate responses with no matching
    /// entry; those are discarded, never an error.
    pub fn complete(&self, response: ResponseEnvelope) -> bool {
        let tx = self
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(&response.request_id);

        match tx {
            Some(tx) => {
                // The caller may have given up already; that is fine.
                let _ = tx.send(Ok(response));
                true
            }
            None => {
                debug!(
                    request_id = response.request_id,
                    "discarding response with no pending call"
                );
                false
            }
        }
    }

    /// Drop the pending entry for a call the caller has abandoned
    /// (timeout or write failure). Returns `false` if a response won the
    /// race and the entry is already gone.
    pub fn remove(&self, id: u64) -> bool {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Fail every pending call with the same error.
    ///
    /// Invoked when the worker leaves the `Ready` state, so no caller waits
    /// for a response that can never arrive. Returns how many calls were
    /// swept.
    pub fn fail_all(&self, make_err: impl Fn() -> WorkerError) -> usize {
        let drained: Vec<PendingSender> = {
            let mut pending = self.pending.lock().expect("pending table lock poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };

        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(make_err()));
        }
        count
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }
}
