//! Process-wide admission control by buffered bytes
//!
//! The gateway admits a batch only if its estimated size fits under the
//! ceiling. Check-and-increment is a single compare-and-swap, so the admitted
//! total never exceeds the ceiling under any interleaving.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct BackpressureController {
    ceiling: u64,
    admitted: AtomicU64,
    admitted_total: AtomicU64,
    rejected_total: AtomicU64,
    released_total: AtomicU64,
}

impl BackpressureController {
    pub fn new(ceiling_bytes: u64) -> Self {
        Self {
            ceiling: ceiling_bytes,
            admitted: AtomicU64::new(0),
            admitted_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            released_total: AtomicU64::new(0),
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Bytes currently admitted and not yet released
    pub fn admitted_bytes(&self) -> u64 {
        self.admitted.load(Ordering::Acquire)
    }

    pub fn admitted_total(&self) -> u64 {
        self.admitted_total.load(Ordering::Relaxed)
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }

    pub fn released_total(&self) -> u64 {
        self.released_total.load(Ordering::Relaxed)
    }

    /// Atomically admit `size` bytes if they fit under the ceiling. Never blocks.
    pub fn try_admit(&self, size: u64) -> bool {
        let result = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(size)
                    .filter(|&next| next <= self.ceiling)
            });

        match result {
            Ok(_) => {
                self.admitted_total.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.rejected_total.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Return `size` bytes to the budget; saturates at zero
    pub fn release(&self, size: u64) {
        let _ = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(size))
            });
        self.released_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Admit and wrap the reservation in a lease that releases exactly once
    pub fn admit(self: &Arc<Self>, size: u64) -> Option<AdmissionLease> {
        if self.try_admit(size) {
            Some(AdmissionLease {
                controller: Arc::clone(self),
                size,
                released: AtomicBool::new(false),
            })
        } else {
            None
        }
    }
}

/// Reservation of admitted bytes, released on drop or on demand
#[derive(Debug)]
pub struct AdmissionLease {
    controller: Arc<BackpressureController>,
    size: u64,
    released: AtomicBool,
}

impl AdmissionLease {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release the reservation. Returns false if it was already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.controller.release(self.size);
        true
    }
}

impl Drop for AdmissionLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_admit_until_ceiling() {
        let controller = BackpressureController::new(100);
        assert!(controller.try_admit(60));
        assert!(controller.try_admit(40));
        assert_eq!(controller.admitted_bytes(), 100);
        assert!(!controller.try_admit(1));
        assert_eq!(controller.rejected_total(), 1);

        controller.release(40);
        assert!(controller.try_admit(1));
        assert_eq!(controller.admitted_bytes(), 61);
    }

    #[test]
    fn test_oversized_request_always_rejected() {
        let controller = BackpressureController::new(10);
        assert!(!controller.try_admit(11));
        assert!(!controller.try_admit(u64::MAX));
        assert_eq!(controller.admitted_bytes(), 0);
    }

    #[test]
    fn test_release_saturates() {
        let controller = BackpressureController::new(10);
        controller.try_admit(5);
        controller.release(50);
        assert_eq!(controller.admitted_bytes(), 0);
    }

    #[test]
    fn test_lease_releases_once() {
        let controller = Arc::new(BackpressureController::new(100));
        let lease = controller.admit(30).unwrap();
        assert_eq!(controller.admitted_bytes(), 30);

        assert!(lease.release());
        assert!(!lease.release());
        assert_eq!(controller.admitted_bytes(), 0);

        drop(lease);
        assert_eq!(controller.admitted_bytes(), 0);
    }

    #[test]
    fn test_lease_released_on_drop() {
        let controller = Arc::new(BackpressureController::new(100));
        {
            let _lease = controller.admit(70).unwrap();
            assert!(controller.admit(40).is_none());
        }
        assert!(controller.admit(40).is_some());
    }

    #[test]
    fn test_concurrent_admit_release_never_exceeds_ceiling() {
        const CEILING: u64 = 10_000;
        let controller = Arc::new(BackpressureController::new(CEILING));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..5_000u64 {
                        let size = 100 + (i * 7 + t) % 900;
                        if controller.try_admit(size) {
                            held.push(size);
                        }
                        assert!(controller.admitted_bytes() <= CEILING);
                        if held.len() > 3 {
                            controller.release(held.remove(0));
                        }
                    }
                    for size in held {
                        controller.release(size);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(controller.admitted_bytes(), 0);
        assert!(controller.rejected_total() > 0);
    }

    #[test]
    fn test_full_ceiling_rejects_until_release() {
        let controller = Arc::new(BackpressureController::new(1_000));
        let leases: Vec<_> = (0..10).map(|_| controller.admit(100).unwrap()).collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || (0..1_000).all(|_| !controller.try_admit(1)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        drop(leases);
        assert!(controller.try_admit(1));
    }
}
