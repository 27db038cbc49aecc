//! Key-scoped concurrency limiting with FIFO admission.
//!
//! Each key owns an independent slot pool. Operations submitted through
//! [`ConcurrencyLimiter::enqueue`] start immediately while a slot is free
//! and otherwise wait in arrival order. A waiting operation can be aborted
//! before it starts, in which case it never runs at all; a started
//! operation is cancelled cooperatively through its [`CancellationToken`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Cap applied to keys that were never configured explicitly.
const DEFAULT_LIMIT: usize = 1;

struct Waiter {
    seq: u64,
    grant: oneshot::Sender<()>,
}

struct KeyState {
    limit: usize,
    running: usize,
    pending: VecDeque<Waiter>,
}

impl KeyState {
    fn new() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            running: 0,
            pending: VecDeque::new(),
        }
    }
}

struct Inner<K> {
    states: Mutex<HashMap<K, KeyState>>,
    next_seq: AtomicU64,
}

impl<K: Eq + Hash> Inner<K> {
    fn release(&self, key: &K) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(key) {
            state.running = state.running.saturating_sub(1);
            Self::drain(state);
        }
    }

    /// Promote waiters in arrival order until the limit is reached again.
    fn drain(state: &mut KeyState) {
        while state.running < state.limit {
            match state.pending.pop_front() {
                Some(waiter) => {
                    state.running += 1;
                    if waiter.grant.send(()).is_err() {
                        // The waiting task is gone; give the slot back.
                        state.running -= 1;
                    }
                }
                None => break,
            }
        }
    }
}

enum Admission {
    Granted,
    Waiting(oneshot::Receiver<()>),
}

/// A claimed slot. Dropping it releases the slot and promotes the next
/// waiter for the same key.
pub struct SlotGuard<K: Eq + Hash> {
    inner: Arc<Inner<K>>,
    key: K,
}

impl<K: Eq + Hash> Drop for SlotGuard<K> {
    fn drop(&mut self) {
        self.inner.release(&self.key);
    }
}

/// Handle to an enqueued operation.
pub struct OpHandle<K, T> {
    join: JoinHandle<Option<T>>,
    token: CancellationToken,
    inner: Arc<Inner<K>>,
    key: K,
    seq: u64,
}

impl<K: Eq + Hash, T> OpHandle<K, T> {
    /// Abort the operation. If it is still waiting for a slot it is removed
    /// from the queue and never runs; if it already started, its token is
    /// cancelled and the operation stops at the next await point.
    pub fn abort(&self) {
        {
            let mut states = self.inner.states.lock().unwrap();
            if let Some(state) = states.get_mut(&self.key) {
                state.pending.retain(|waiter| waiter.seq != self.seq);
            }
        }
        self.token.cancel();
    }

    /// Whether the underlying task has finished, for any reason.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the operation. `None` means it was aborted before producing
    /// a value.
    pub async fn join(self) -> Option<T> {
        self.join.await.ok().flatten()
    }
}

/// FIFO slot pool keyed by `K`.
pub struct ConcurrencyLimiter<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for ConcurrencyLimiter<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for ConcurrencyLimiter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ConcurrencyLimiter<K> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }
}

impl<K: Eq + Hash + Clone + Send + 'static> ConcurrencyLimiter<K> {
    /// Enqueue `op` under `key` with a fresh cancellation token.
    pub fn enqueue<F>(&self, key: K, op: F) -> OpHandle<K, F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.enqueue_with_token(key, CancellationToken::new(), op)
    }

    /// Enqueue `op` under `key`. The operation starts once a slot is free
    /// and holds it until it finishes; `token` cancels it cooperatively
    /// after it has started.
    pub fn enqueue_with_token<F>(
        &self,
        key: K,
        token: CancellationToken,
        op: F,
    ) -> OpHandle<K, F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let admission = {
            let mut states = self.inner.states.lock().unwrap();
            let state = states.entry(key.clone()).or_insert_with(KeyState::new);
            if state.running < state.limit {
                state.running += 1;
                Admission::Granted
            } else {
                let (grant, rx) = oneshot::channel();
                state.pending.push_back(Waiter { seq, grant });
                Admission::Waiting(rx)
            }
        };

        let slot_inner = Arc::clone(&self.inner);
        let slot_key = key.clone();
        let run_token = token.clone();
        let join = tokio::spawn(async move {
            if let Admission::Waiting(rx) = admission {
                if rx.await.is_err() {
                    // Aborted out of the wait queue; no slot was ever held.
                    return None;
                }
            }
            let _slot = SlotGuard {
                inner: slot_inner,
                key: slot_key,
            };
            tokio::select! {
                _ = run_token.cancelled() => None,
                out = op => Some(out),
            }
        });

        OpHandle {
            join,
            token,
            inner: Arc::clone(&self.inner),
            key,
            seq,
        }
    }

    /// Claim a slot unconditionally, bypassing the wait queue. Used to
    /// account for work that is already in flight, such as tasks resumed
    /// after a restart.
    pub fn occupy(&self, key: K) -> SlotGuard<K> {
        let mut states = self.inner.states.lock().unwrap();
        let state = states.entry(key.clone()).or_insert_with(KeyState::new);
        state.running += 1;
        SlotGuard {
            inner: Arc::clone(&self.inner),
            key,
        }
    }

    /// Change the cap for `key`. Raising it promotes waiters immediately;
    /// lowering it never interrupts running operations, the excess drains
    /// as they finish.
    pub fn set_limit(&self, key: K, limit: usize) -> Result<(), EngineError> {
        if limit == 0 {
            return Err(EngineError::InvalidLimit(0));
        }
        let mut states = self.inner.states.lock().unwrap();
        let state = states.entry(key).or_insert_with(KeyState::new);
        state.limit = limit;
        Inner::<K>::drain(state);
        Ok(())
    }

    pub fn limit(&self, key: &K) -> usize {
        let states = self.inner.states.lock().unwrap();
        states.get(key).map_or(DEFAULT_LIMIT, |state| state.limit)
    }

    pub fn running(&self, key: &K) -> usize {
        let states = self.inner.states.lock().unwrap();
        states.get(key).map_or(0, |state| state.running)
    }

    pub fn waiting(&self, key: &K) -> usize {
        let states = self.inner.states.lock().unwrap();
        states.get(key).map_or(0, |state| state.pending.len())
    }
}
