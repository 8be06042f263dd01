//! Cooperative cancellation.
//!
//! The worker creates one `CancelSource` per unit it runs and hands the unit a
//! `CancelToken`. The `CancellationChannel` only holds a weak reference to the
//! source of the unit currently executing, so it never keeps a finished unit
//! alive.

use std::future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::TaskError;

/// A pending cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    pub requeue: bool,
}

type Signal = watch::Sender<Option<CancelRequest>>;

/// Owning side of one unit's cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: Arc<Signal>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Request cancellation. The first request wins.
    pub fn cancel(&self, requeue: bool) {
        request(&self.tx, requeue);
    }

    fn downgrade(&self) -> Weak<Signal> {
        Arc::downgrade(&self.tx)
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

fn request(signal: &Signal, requeue: bool) -> bool {
    signal.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(CancelRequest { requeue });
        true
    })
}

/// Observing side, polled by the unit at its safe points.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<Option<CancelRequest>>,
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        CancelSource::new().token()
    }

    pub fn requested(&self) -> Option<CancelRequest> {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested().is_some()
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), TaskError> {
        match self.requested() {
            Some(CancelRequest { requeue }) => Err(TaskError::Cancelled { requeue }),
            None => Ok(()),
        }
    }

    /// Resolves when cancellation is requested; pends forever if the source
    /// is gone without having cancelled.
    pub async fn cancelled(&self) -> CancelRequest {
        let mut rx = self.rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(request) = current {
                return request;
            }
            if rx.changed().await.is_err() {
                return future::pending().await;
            }
        }
    }
}

#[derive(Default)]
enum Slot {
    #[default]
    Idle,
    /// Dequeued and being prepared; a request is held until `register`.
    Starting { id: String, pending: Option<CancelRequest> },
    Running { id: String, signal: Weak<Signal> },
}

/// Points at the unit currently executing on one worker, if it is cancellable.
///
/// The worker calls `begin` as soon as it dequeues an item, before the unit is
/// built, so a request for an item that just turned RUNNING is not lost: it is
/// held and applied when the unit registers. A unit that turns out not to be
/// cancellable drops it.
#[derive(Default)]
pub struct CancellationChannel {
    current: Mutex<Slot>,
}

impl CancellationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn begin(&self, id: impl Into<String>) {
        *self.slot() = Slot::Starting {
            id: id.into(),
            pending: None,
        };
    }

    pub(crate) fn register(&self, id: impl Into<String>, source: &CancelSource) {
        let id = id.into();
        let mut slot = self.slot();
        if let Slot::Starting {
            id: starting,
            pending: Some(held),
        } = &*slot
        {
            if *starting == id {
                info!(task_id = %id, requeue = held.requeue, "applying cancellation requested while starting");
                source.cancel(held.requeue);
            }
        }
        *slot = Slot::Running {
            id,
            signal: source.downgrade(),
        };
    }

    pub(crate) fn clear(&self) {
        *self.slot() = Slot::Idle;
    }

    /// Id of the unit currently starting or executing.
    pub fn current(&self) -> Option<String> {
        match &*self.slot() {
            Slot::Idle => None,
            Slot::Starting { id, .. } | Slot::Running { id, .. } => Some(id.clone()),
        }
    }

    /// Cancel the current unit if `task_id` is `None` or matches it.
    ///
    /// Returns whether the running unit was signalled, or the request was held
    /// for the unit being started. The record of a general task turns RUNNING
    /// inside the worker's pull, just before `begin`; a request landing in
    /// between finds the channel idle and returns false.
    pub fn request_cancellation(&self, task_id: Option<&str>, requeue: bool) -> bool {
        let mut slot = self.slot();
        let current = match &*slot {
            Slot::Idle => {
                debug!(?task_id, "no cancellable unit running");
                return false;
            }
            Slot::Starting { id, .. } | Slot::Running { id, .. } => id.clone(),
        };
        if task_id.is_some_and(|id| id != current) {
            debug!(?task_id, %current, "cancellation targets another unit");
            return false;
        }
        match &mut *slot {
            Slot::Starting { pending, .. } => {
                info!(task_id = %current, requeue, "cancellation held until the unit starts");
                pending.get_or_insert(CancelRequest { requeue });
                true
            }
            Slot::Running { signal, .. } => match signal.upgrade() {
                Some(signal) => {
                    info!(task_id = %current, requeue, "cancellation requested");
                    request(&signal, requeue);
                    true
                }
                None => false,
            },
            Slot::Idle => false,
        }
    }
}
