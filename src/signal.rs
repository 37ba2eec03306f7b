//! End-of-playback notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

type Observer = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle returned by [`FinishedSignal::connect`], used to disconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Multi-observer broadcast of "playback reached the end of its range".
///
/// Fired at most once per playback cycle from a short-lived detached thread,
/// so observers may call back into the player (including starting the next
/// source) without deadlocking the renderer worker.
pub struct FinishedSignal {
    observers: Arc<Mutex<Vec<(u64, Observer)>>>,
    next_id: AtomicU64,
}

impl FinishedSignal {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn connect<F>(&self, f: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().unwrap().push((id, Arc::new(f)));
        ObserverId(id)
    }

    pub fn disconnect(&self, id: ObserverId) {
        self.observers.lock().unwrap().retain(|(i, _)| *i != id.0);
    }

    /// Invoke every observer from a detached thread.
    ///
    /// The observer list is snapshotted inside that thread and the lock is
    /// released before the first callback runs, so no engine lock is held
    /// while observers execute.
    pub(crate) fn fire_detached(&self) {
        let observers = self.observers.clone();
        thread::spawn(move || {
            let snapshot: Vec<Observer> = observers
                .lock()
                .unwrap()
                .iter()
                .map(|(_, f)| f.clone())
                .collect();
            for observer in snapshot {
                observer();
            }
        });
    }
}

impl Default for FinishedSignal {
    fn default() -> Self {
        Self::new()
    }
}
