//! Counting signalling primitive for the worker handshakes.

use std::sync::{Condvar, Mutex};

/// A post/wait/clear latch.
///
/// Each `post` releases exactly one `wait`; `clear` discards pending posts.
/// The worker threads use three of these apiece: `wake` (engine → worker,
/// start a cycle), `begin` (worker → engine, cycle entered) and `end`
/// (worker → engine, cycle left). A worker clears its own `begin`/`end` at
/// the top of every cycle so stale posts from a previous cycle cannot
/// satisfy a future wait.
pub struct Latch {
    pending: Mutex<u32>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending += 1;
        drop(pending);
        self.cv.notify_one();
    }

    /// Block until a post is available, then consume it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap();
        while *pending == 0 {
            pending = self.cv.wait(pending).unwrap();
        }
        *pending -= 1;
    }

    /// Discard pending posts.
    pub fn clear(&self) {
        *self.pending.lock().unwrap() = 0;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_consumes_a_post() {
        let latch = Latch::new();
        latch.post();
        latch.wait();
        // A second wait would block; verify indirectly via the counter.
        assert_eq!(*latch.pending.lock().unwrap(), 0);
    }

    #[test]
    fn posts_accumulate() {
        let latch = Latch::new();
        latch.post();
        latch.post();
        latch.wait();
        latch.wait();
        assert_eq!(*latch.pending.lock().unwrap(), 0);
    }

    #[test]
    fn clear_discards_pending_posts() {
        let latch = Latch::new();
        latch.post();
        latch.clear();
        assert_eq!(*latch.pending.lock().unwrap(), 0);
    }

    #[test]
    fn wait_blocks_until_posted() {
        let latch = Arc::new(Latch::new());
        let woke = Arc::new(AtomicBool::new(false));

        let latch_waiter = latch.clone();
        let woke_waiter = woke.clone();
        let handle = thread::spawn(move || {
            latch_waiter.wait();
            woke_waiter.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(Ordering::SeqCst));

        latch.post();
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }
}
