//! Process-wide concurrency gate (spec §4.3).
//!
//! Only HTTP-mode connections install the gate (see §4.7's install order); SOCKS5
//! connections are not subject to it.

use std::sync::atomic::{AtomicUsize, Ordering};

/// An admission ticket. Dropping it releases the slot, the way the teacher's
/// atomic log-rate counters in `util.rs` are read-modify-write without holding a
/// lock across an await.
pub struct GateTicket<'a> {
    gate: &'a ConcurrencyGate,
    active: bool,
}

impl Drop for GateTicket<'_> {
    fn drop(&mut self) {
        if self.active {
            self.gate.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

pub struct ConcurrencyGate {
    max_concurrent: usize,
    active: AtomicUsize,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            active: AtomicUsize::new(0),
        }
    }

    /// Atomically increments the counter and reads it back. Returns `Some(ticket)`
    /// when admission succeeds, `None` when the (n+1)th connection would exceed
    /// `max_concurrent` (the counter is decremented again before returning `None`).
    pub fn try_acquire(&self) -> Option<GateTicket<'_>> {
        let n = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        if n > self.max_concurrent {
            self.active.fetch_sub(1, Ordering::AcqRel);
            None
        } else {
            Some(GateTicket {
                gate: self,
                active: true,
            })
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let gate = ConcurrencyGate::new(2);
        let t1 = gate.try_acquire();
        let t2 = gate.try_acquire();
        let t3 = gate.try_acquire();
        assert!(t1.is_some());
        assert!(t2.is_some());
        assert!(t3.is_none());
        assert_eq!(gate.active_count(), 2);
    }

    #[test]
    fn releases_on_drop() {
        let gate = ConcurrencyGate::new(1);
        {
            let _t1 = gate.try_acquire().unwrap();
            assert_eq!(gate.active_count(), 1);
        }
        assert_eq!(gate.active_count(), 0);
        let t2 = gate.try_acquire();
        assert!(t2.is_some());
    }
}
