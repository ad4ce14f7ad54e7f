//! Session admission control.
//!
//! The gate owns a single occupancy slot. [`SessionGate::try_claim`] flips it
//! from 0 to 1 atomically and hands back a [`SessionSlot`] guard; dropping
//! the guard releases the slot. A claim that finds the slot taken fails
//! immediately: excess connections are rejected, never queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One-slot admission gate shared by every connection handler.
///
/// Cloning is cheap and every clone observes the same slot.
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    occupancy: Arc<AtomicUsize>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session slot.
    ///
    /// Returns `None` when a session is already active.
    pub fn try_claim(&self) -> Option<SessionSlot> {
        self.occupancy
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionSlot {
                occupancy: self.occupancy.clone(),
            })
    }

    /// Current occupancy, 0 or 1.
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    pub fn is_occupied(&self) -> bool {
        self.occupancy() != 0
    }
}

/// RAII guard for a claimed session slot. Releases the slot on drop.
/// Owns an `Arc` so it is `Send` and can be moved into spawned tasks.
#[derive(Debug)]
pub struct SessionSlot {
    occupancy: Arc<AtomicUsize>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.occupancy.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let gate = SessionGate::new();
        assert_eq!(gate.occupancy(), 0);
        {
            let _slot = gate.try_claim().expect("slot should be free");
            assert_eq!(gate.occupancy(), 1);
            assert!(gate.is_occupied());
        }
        assert_eq!(gate.occupancy(), 0);
        assert!(gate.try_claim().is_some());
    }

    #[test]
    fn test_second_claim_rejected() {
        let gate = SessionGate::new();
        let _slot = gate.try_claim().unwrap();
        assert!(gate.try_claim().is_none());
        assert!(gate.clone().try_claim().is_none());
        assert_eq!(gate.occupancy(), 1);
    }

    #[test]
    fn test_concurrent_claims_admit_exactly_one() {
        let gate = SessionGate::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.try_claim()
                })
            })
            .collect();

        let slots: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(slots.len(), 1);
        assert_eq!(gate.occupancy(), 1);

        drop(slots);
        assert_eq!(gate.occupancy(), 0);
    }

    #[test]
    fn test_slot_released_on_panic() {
        let gate = SessionGate::new();
        let inner = gate.clone();
        let result = std::thread::spawn(move || {
            let _slot = inner.try_claim().unwrap();
            panic!("session blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(gate.occupancy(), 0);
    }
}
