//! Correlation of daemon responses with the callers waiting for them.
//!
//! A waiter is satisfied either by the response carrying its request index or
//! by any response whose kind it accepts. One response resolves at most one
//! waiter by index, but may resolve any number of waiters by kind.
use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
    },
    time::Duration,
};

use log::trace;

use crate::protocol::{Response, ResponseKind};

use super::ClientError;

type Outcome = Result<Response, ClientError>;

/// What a waiter accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matcher {
    pub idx: Option<u64>,
    pub kinds: Vec<ResponseKind>,
}

impl Matcher {
    pub fn idx(idx: u64) -> Self {
        Self {
            idx: Some(idx),
            kinds: Vec::new(),
        }
    }

    pub fn kinds(kinds: &[ResponseKind]) -> Self {
        Self {
            idx: None,
            kinds: kinds.to_vec(),
        }
    }

    pub fn with_kinds(mut self, kinds: &[ResponseKind]) -> Self {
        self.kinds.extend_from_slice(kinds);
        self
    }

    fn by_idx(&self, response: &Response) -> bool {
        self.idx.is_some_and(|idx| idx != 0 && idx == response.idx)
    }

    fn by_kind(&self, response: &Response) -> bool {
        self.kinds.contains(&response.kind)
    }
}

struct Entry {
    id: u64,
    generation: u64,
    matcher: Matcher,
    slot: SyncSender<Outcome>,
}

/// Pending waiters of one client, shared between callers and the reader thread.
pub(crate) struct Waiters {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Waiters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a waiter for responses read from socket `generation`.
    ///
    /// Register before sending the request so a fast reply cannot be missed.
    pub fn register(
        self: &Arc<Self>,
        generation: u64,
        matcher: Matcher,
        command: &'static str,
    ) -> Pending {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, outcome) = mpsc::sync_channel(1);

        self.entries().push(Entry {
            id,
            generation,
            matcher,
            slot,
        });

        Pending {
            id,
            command,
            waiters: Arc::clone(self),
            outcome,
        }
    }

    /// Resolve every waiter `response` satisfies; returns how many there were.
    pub fn dispatch(&self, generation: u64, response: &Response) -> usize {
        let mut entries = self.entries();
        let mut resolved = 0;
        let mut idx_matched = false;

        entries.retain(|entry| {
            if entry.generation != generation {
                return true;
            }

            let outcome = if !idx_matched && entry.matcher.by_idx(response) {
                idx_matched = true;
                match response.error() {
                    Some(err) => Err(ClientError::Daemon {
                        message: err.error_message,
                        error_type: err.error_type,
                    }),
                    None => Ok(response.clone()),
                }
            } else if entry.matcher.by_kind(response) {
                Ok(response.clone())
            } else {
                return true;
            };

            trace!("waiter {} resolved by {}", entry.id, response.command);
            // The receiver is gone only if the caller already stopped waiting.
            let _ = entry.slot.try_send(outcome);
            resolved += 1;
            false
        });

        resolved
    }

    /// Fail every waiter bound to socket `generation`.
    pub fn reject_generation(&self, generation: u64, error: ClientError) {
        self.entries().retain(|entry| {
            if entry.generation != generation {
                return true;
            }
            let _ = entry.slot.try_send(Err(error.clone()));
            false
        });
    }

    pub fn reject_all(&self, error: ClientError) {
        for entry in self.entries().drain(..) {
            let _ = entry.slot.try_send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }
}

/// Caller side of a registered waiter.
///
/// Dropping it unregisters the waiter.
pub(crate) struct Pending {
    id: u64,
    command: &'static str,
    waiters: Arc<Waiters>,
    outcome: Receiver<Outcome>,
}

impl Pending {
    /// Block until the waiter is resolved, rejected, or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> Outcome {
        match self.outcome.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                if self.waiters.remove(self.id) {
                    return Err(ClientError::Timeout {
                        command: self.command,
                    });
                }
                // Resolved between the timeout and the removal.
                self.outcome
                    .try_recv()
                    .unwrap_or(Err(ClientError::Timeout {
                        command: self.command,
                    }))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionClosed),
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.waiters.remove(self.id);
    }
}
