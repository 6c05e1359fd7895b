//! Rate-limited status publisher.
//!
//! Shard events arrive far faster than any observer wants to redraw a
//! progress line, so the subject keeps only the newest snapshot and a
//! timer-driven flusher delivers it at most once per interval. Observers
//! always see the latest state, never every state. Terminal snapshots
//! bypass the timer so the final notification is never delayed or lost.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::TaskStatus;

type ObserverCallback = Box<dyn FnMut(TaskStatus) + Send>;

struct Observer {
    last_size: u64,
    last_notify: Instant,
    callback: ObserverCallback,
}

#[derive(Default)]
struct Slot {
    latest: Option<TaskStatus>,
    dirty: bool,
}

struct SubjectShared {
    interval: Duration,
    slot: Mutex<Slot>,
    observers: Mutex<Vec<Observer>>,
    stop: CancellationToken,
}

impl SubjectShared {
    /// Deliver the latest snapshot to every observer if one arrived since
    /// the previous delivery.
    fn flush(&self) {
        let status = {
            let mut slot = self.slot.lock().unwrap();
            if !slot.dirty {
                return;
            }
            slot.dirty = false;
            match slot.latest {
                Some(status) => status,
                None => return,
            }
        };

        let now = Instant::now();
        let mut observers = self.observers.lock().unwrap();
        for observer in observers.iter_mut() {
            let elapsed_ms = now
                .duration_since(observer.last_notify)
                .as_millis()
                .max(1) as f64;
            let delta = status.download_size.saturating_sub(observer.last_size) as f64;

            let mut delivered = status;
            delivered.speed = delta / elapsed_ms;

            observer.last_size = status.download_size;
            observer.last_notify = now;
            (observer.callback)(delivered);
        }
    }
}

/// Latest-value publisher with time-coalesced observer notification.
pub struct StatusSubject {
    shared: Arc<SubjectShared>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl StatusSubject {
    /// Create a subject delivering at most one notification per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            shared: Arc::new(SubjectShared {
                interval,
                slot: Mutex::new(Slot::default()),
                observers: Mutex::new(Vec::new()),
                stop: CancellationToken::new(),
            }),
            flusher: Mutex::new(None),
        }
    }

    /// Register an observer.
    ///
    /// `baseline` is the byte count already on disk when the observer
    /// attaches, so the first speed computation covers only fresh bytes.
    pub fn subscribe(&self, baseline: u64, callback: impl FnMut(TaskStatus) + Send + 'static) {
        self.shared.observers.lock().unwrap().push(Observer {
            last_size: baseline,
            last_notify: Instant::now(),
            callback: Box::new(callback),
        });
    }

    /// Store a new snapshot.
    ///
    /// Non-terminal snapshots wait for the flusher; a terminal snapshot
    /// (`is_shutdown`) is delivered immediately and stops the flusher.
    pub fn publish(&self, status: TaskStatus) {
        {
            let mut slot = self.shared.slot.lock().unwrap();
            slot.latest = Some(status);
            slot.dirty = true;
        }
        if status.is_shutdown {
            self.shared.flush();
            self.shared.stop.cancel();
        }
    }

    /// Spawn the timer-driven flusher. Must be called from within a tokio
    /// runtime; idempotent.
    pub fn start(&self) {
        let mut flusher = self.flusher.lock().unwrap();
        if flusher.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *flusher = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.stop.cancelled() => break,
                    _ = tokio::time::sleep(shared.interval) => shared.flush(),
                }
            }
        }));
    }

    /// Stop the flusher and wait for it to finish.
    pub async fn close(&self) {
        self.shared.stop.cancel();
        let flusher = self.flusher.lock().unwrap().take();
        if let Some(flusher) = flusher {
            let _ = flusher.await;
        }
    }
}
