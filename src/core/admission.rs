//! Bounded admission for producer/consumer fan-out.
//!
//! The gate only caps how many callers are inside at once. Rejected callers
//! are not queued and there is no fairness among concurrent `try_enter`s.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::wait::{futex_wait, futex_wake};
use crate::core::Result;

#[derive(Clone, Debug)]
pub struct AdmissionGate {
    inner: Arc<GateState>,
}

#[derive(Debug)]
struct GateState {
    max_count: u32,
    /// Callers currently admitted. Also the futex word `wait_empty` parks on.
    count: AtomicU32,
}

/// Holds one admission slot until dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: AdmissionGate,
}

impl AdmissionGate {
    pub fn new(max_count: u32) -> Self {
        Self {
            inner: Arc::new(GateState {
                max_count,
                count: AtomicU32::new(0),
            }),
        }
    }

    pub fn max_count(&self) -> u32 {
        self.inner.max_count
    }

    pub fn count(&self) -> u32 {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Take a slot if one is free. Never blocks.
    pub fn try_enter(&self) -> bool {
        let next = self.inner.count.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if next > self.inner.max_count {
            self.release();
            return false;
        }
        true
    }

    /// Give back a slot taken with `try_enter`. An unmatched call is ignored.
    pub fn exit(&self) {
        let released = self
            .inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        match released {
            Ok(1) => self.signal_empty(),
            Ok(_) => {}
            Err(_) => log::warn!("admission gate exit without matching enter"),
        }
    }

    /// `try_enter` returning a permit that exits on drop.
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        self.try_enter().then(|| AdmissionPermit { gate: self.clone() })
    }

    /// Block until no caller is admitted. Returns `false` if `timeout`
    /// elapsed first.
    pub fn wait_empty(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let observed = self.inner.count.load(Ordering::Acquire);
            if observed == 0 {
                return Ok(true);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            futex_wait(&self.inner.count, observed, remaining)?;
        }
    }

    fn release(&self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.signal_empty();
        }
    }

    fn signal_empty(&self) {
        if let Err(err) = futex_wake(&self.inner.count) {
            log::warn!("admission gate wake failed: {err}");
        }
    }
}

impl AdmissionPermit {
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.exit();
    }
}
