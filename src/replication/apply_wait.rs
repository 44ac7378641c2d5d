//! Apply-index waiter
//!
//! Tracks the highest log index whose store mutation has completed and lets
//! linearizable reads park until the cursor reaches their read-index. The
//! cursor is a watch channel: `trigger` only ever moves it forward, `wait`
//! for an already-applied index resolves immediately.

use tokio::sync::watch;

/// Monotonic apply cursor with wait-until-reached semantics.
pub struct ApplyWait {
    cursor: watch::Sender<u64>,
}

impl ApplyWait {
    pub fn new() -> Self {
        let (cursor, _) = watch::channel(0);
        Self { cursor }
    }

    /// Highest index whose apply-side effects have completed.
    pub fn current(&self) -> u64 {
        *self.cursor.borrow()
    }

    /// Advance the cursor to `max(cursor, index)`, waking every waiter whose
    /// target is now covered. Re-triggering an old index is a no-op.
    pub fn trigger(&self, index: u64) {
        self.cursor.send_if_modified(|cursor| {
            if index > *cursor {
                *cursor = index;
                true
            } else {
                false
            }
        });
    }

    /// Resolve once the cursor is at least `index`.
    pub async fn wait(&self, index: u64) {
        let mut rx = self.cursor.subscribe();
        // The sender lives in self, so wait_for cannot observe a closed
        // channel while we hold &self.
        let _ = rx.wait_for(|cursor| *cursor >= index).await;
    }
}

impl Default for ApplyWait {
    fn default() -> Self {
        Self::new()
    }
}
