//! Background polling engine.
//!
//! Bridges C-style "call this repeatedly until it says done" APIs into
//! single-shot async completions. Poll steps are registered under an opaque
//! [`OwnerKey`] and invoked on a dedicated worker thread once per tick (1 ms)
//! until each reports completion. The worker thread starts lazily with the
//! first step and exits when the table drains; continuation code never runs
//! on the worker thread — completion is handed back to the awaiting task
//! through a oneshot channel, so it resumes on its own executor.
//!
//! The engine is an explicitly-owned service object: construct one, clone it
//! (cheap, `Arc` inner) and inject it into whatever components need it.
//!
//! # Example
//!
//! ```no_run
//! use wiremux::{OwnerKey, PollOutcome, PollingEngine};
//!
//! # async fn demo() -> wiremux::Result<()> {
//! let engine = PollingEngine::new();
//! let owner = OwnerKey::next();
//!
//! let mut remaining = 3;
//! let value = engine
//!     .poll_until_complete(owner, move || {
//!         if remaining > 0 {
//!             remaining -= 1;
//!             PollOutcome::Pending
//!         } else {
//!             PollOutcome::Ready(42)
//!         }
//!     })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{ErrorCode, ErrorInfo, Result};

/// Interval between worker ticks while steps remain.
pub const TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Opaque token grouping poll steps for lifecycle and cancellation.
///
/// Tied to the async operation's owning object; it is only ever compared,
/// never dereferenced. Obtain one per owning object via [`OwnerKey::next`]
/// and pass it to every `add` made on that object's behalf, so a single
/// [`PollingEngine::remove`] can cancel all of them at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerKey(u64);

impl OwnerKey {
    /// Allocate a fresh, process-unique key.
    pub fn next() -> Self {
        static NEXT_KEY: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Tri-state outcome of one probe of a non-blocking native operation.
pub enum PollOutcome<T> {
    /// The operation finished; here is its value.
    Ready(T),
    /// The operation finished with a terminal failure. The adapter supplies
    /// the native code (`ErrorCode::Backend`) and any raw-status pairs.
    Failed(ErrorInfo),
    /// Not done yet; probe again next tick.
    Pending,
}

/// One poll step: invoked once per tick, returns `true` when finished.
type PollStep = Box<dyn FnMut() -> bool + Send>;

/// Step table plus the lazy-start flag, guarded together so a step added
/// while the worker is winding down still gets a worker.
struct StepTable {
    owners: HashMap<OwnerKey, VecDeque<PollStep>>,
    worker_running: bool,
}

struct Inner {
    steps: Mutex<StepTable>,
    // Thread-handle lifecycle has its own lock so an `add` never blocks on
    // worker startup/teardown.
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Inner {
    fn lock_steps(&self) -> MutexGuard<'_, StepTable> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The polling engine service object. Cloning shares the same worker.
#[derive(Clone)]
pub struct PollingEngine {
    inner: Arc<Inner>,
}

impl Default for PollingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingEngine {
    /// Create an idle engine. No thread is started until the first `add`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                steps: Mutex::new(StepTable {
                    owners: HashMap::new(),
                    worker_running: false,
                }),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Enqueue a poll step under `owner`.
    ///
    /// The step is invoked once per tick, in insertion order within its
    /// owner's queue, until it returns `true`. A step that completes must
    /// hand its result to the awaiting side itself (see
    /// [`poll_until_complete`](Self::poll_until_complete), which wires this
    /// up); the engine only drives the probing.
    pub fn add(&self, owner: OwnerKey, step: impl FnMut() -> bool + Send + 'static) {
        let mut table = self.inner.lock_steps();
        table
            .owners
            .entry(owner)
            .or_default()
            .push_back(Box::new(step));

        if !table.worker_running {
            table.worker_running = true;
            let weak = Arc::downgrade(&self.inner);
            let handle = thread::spawn(move || worker_loop(weak));
            let mut slot = self
                .inner
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // A finished predecessor's handle may still be parked here.
            *slot = Some(handle);
        }
    }

    /// Drop every pending step registered under `owner`.
    ///
    /// Prevents any future tick from invoking them. A completion the worker
    /// already dispatched is not retracted; the resumed continuation must
    /// tolerate that race (or the owner must not be torn down with a poll
    /// outstanding).
    pub fn remove(&self, owner: OwnerKey) {
        self.inner.lock_steps().owners.remove(&owner);
    }

    /// Number of owners with steps still pending.
    pub fn pending_owners(&self) -> usize {
        self.inner.lock_steps().owners.len()
    }

    /// Drive `poll` once per tick until it reports a terminal outcome, then
    /// resume the caller with the result.
    ///
    /// The closure runs on the worker thread; the returned future completes
    /// on the caller's own executor. If the owner is removed before the
    /// operation finishes, the future resolves to an `Internal` error.
    pub async fn poll_until_complete<T, F>(&self, owner: OwnerKey, mut poll: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnMut() -> PollOutcome<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let mut tx = Some(tx);

        self.add(owner, move || match poll() {
            PollOutcome::Pending => false,
            PollOutcome::Ready(value) => {
                if let Some(tx) = tx.take() {
                    if tx.send(Ok(value)).is_err() {
                        tracing::debug!("poll completion dropped, awaiting side went away");
                    }
                }
                true
            }
            PollOutcome::Failed(error) => {
                if let Some(tx) = tx.take() {
                    if tx.send(Err(error)).is_err() {
                        tracing::debug!("poll failure dropped, awaiting side went away");
                    }
                }
                true
            }
        });

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ErrorInfo::new(ErrorCode::Internal)
                .with_message("poll step removed before completion")),
        }
    }

    #[cfg(test)]
    fn worker_running(&self) -> bool {
        self.inner.lock_steps().worker_running
    }
}

/// Worker thread body. Holds only a weak reference so dropping the last
/// engine handle lets the thread wind down on its next tick.
fn worker_loop(inner: Weak<Inner>) {
    loop {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        {
            let mut table = inner.lock_steps();
            table.owners.retain(|_, queue| {
                queue.retain_mut(|step| !step());
                !queue.is_empty()
            });

            if table.owners.is_empty() {
                table.worker_running = false;
                drop(table);
                // Detach our own handle; the next `add` spawns a fresh worker.
                let mut slot = inner.worker.lock().unwrap_or_else(PoisonError::into_inner);
                *slot = None;
                return;
            }
        }

        drop(inner);
        thread::sleep(TICK_INTERVAL);
    }
}
