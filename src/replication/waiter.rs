//! Pending-request registry
//!
//! Maps request id to the one-shot slot a caller is parked on. Trigger-once:
//! the slot is removed from the map before its value is sent, so of two
//! racing triggers (commit vs. timeout) exactly one is honored and the loser
//! silently discards its payload.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ReplError, ReplResult};

/// Payload delivered through a pending slot.
pub type SlotResult = ReplResult<Vec<u8>>;

/// Registry of in-flight requests awaiting commit.
#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<u64, oneshot::Sender<SlotResult>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot for `id` and return its receiving half.
    ///
    /// A duplicate id is a programming error in id allocation and is
    /// reported rather than overwriting the live slot.
    pub fn register(&self, id: u64) -> ReplResult<oneshot::Receiver<SlotResult>> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock();
        if slots.contains_key(&id) {
            return Err(ReplError::Internal {
                message: format!("request id {id:#x} already registered"),
            });
        }
        slots.insert(id, tx);
        Ok(rx)
    }

    /// Deliver `result` to the slot for `id`, removing it.
    ///
    /// Returns whether a slot existed. Delivery to a caller that already
    /// gave up (dropped receiver) counts as consumed; a missing slot is a
    /// silent no-op.
    pub fn trigger(&self, id: u64, result: SlotResult) -> bool {
        let slot = self.slots.lock().remove(&id);
        match slot {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding slot. Used on shutdown.
    pub fn cancel_all(&self, make_err: impl Fn() -> ReplError) {
        let drained: Vec<_> = {
            let mut slots = self.slots.lock();
            slots.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(make_err()));
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_trigger_delivers() {
        let pending = PendingRequests::new();
        let rx = pending.register(1).unwrap();
        assert!(pending.trigger(1, Ok(b"done".to_vec())));
        assert_eq!(rx.await.unwrap().unwrap(), b"done");
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_duplicate_register_is_rejected() {
        let pending = PendingRequests::new();
        let _rx = pending.register(9).unwrap();
        assert!(pending.register(9).is_err());
    }

    #[test]
    fn test_trigger_unknown_id_is_noop() {
        let pending = PendingRequests::new();
        assert!(!pending.trigger(42, Ok(Vec::new())));
    }

    #[test]
    fn test_trigger_after_receiver_dropped_is_consumed() {
        let pending = PendingRequests::new();
        let rx = pending.register(5).unwrap();
        drop(rx);
        // The slot is still consumed even though nobody is listening.
        assert!(pending.trigger(5, Ok(Vec::new())));
        assert!(!pending.trigger(5, Ok(Vec::new())));
    }

    #[tokio::test]
    async fn test_racing_triggers_exactly_one_honored() {
        use std::sync::Arc;

        for _ in 0..100 {
            let pending = Arc::new(PendingRequests::new());
            let rx = pending.register(7).unwrap();

            let commit = {
                let pending = pending.clone();
                std::thread::spawn(move || pending.trigger(7, Ok(b"committed".to_vec())))
            };
            let timeout = {
                let pending = pending.clone();
                std::thread::spawn(move || {
                    pending.trigger(7, Err(ReplError::Timeout { operation: "save" }))
                })
            };

            let commit_won = commit.join().unwrap();
            let timeout_won = timeout.join().unwrap();
            assert!(
                commit_won ^ timeout_won,
                "exactly one trigger must be honored"
            );

            // Whichever won, the consumer observes a single value.
            let observed = rx.await.unwrap();
            match observed {
                Ok(data) => assert_eq!(data, b"committed"),
                Err(err) => assert!(matches!(err, ReplError::Timeout { .. })),
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_all_fails_every_slot() {
        let pending = PendingRequests::new();
        let rx1 = pending.register(1).unwrap();
        let rx2 = pending.register(2).unwrap();
        pending.cancel_all(|| ReplError::Shutdown);
        assert!(matches!(rx1.await.unwrap(), Err(ReplError::Shutdown)));
        assert!(matches!(rx2.await.unwrap(), Err(ReplError::Shutdown)));
        assert_eq!(pending.len(), 0);
    }
}
