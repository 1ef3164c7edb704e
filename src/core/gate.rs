/// Single-flight generation gate and per-address suppression windows.
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
struct GateState {
    holder: Option<u32>,
    in_flight: FxHashSet<u32>,
    suppressed_until: FxHashMap<u32, Instant>,
}

/// Process-wide gate shared by every channel.
///
/// The global slot and the address's in-flight flag are taken in one
/// locked step by [`GenerationGate::try_acquire`] and given back together
/// when the returned [`GatePermit`] drops, whichever way the attempt ends.
#[derive(Debug, Default)]
pub struct GenerationGate {
    state: Mutex<GateState>,
}

/// Proof of holding the gate for one address. Releases on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<GenerationGate>,
    address: u32,
}

impl GatePermit {
    pub fn address(&self) -> u32 {
        self.address
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        if state.holder == Some(self.address) {
            state.holder = None;
        }
        state.in_flight.remove(&self.address);
    }
}

impl GenerationGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the gate for `address`, or `None` if any generation is running.
    pub fn try_acquire(self: &Arc<Self>, address: u32) -> Option<GatePermit> {
        let mut state = self.state.lock();
        if state.holder.is_some() || state.in_flight.contains(&address) {
            return None;
        }
        state.holder = Some(address);
        state.in_flight.insert(address);
        Some(GatePermit {
            gate: Arc::clone(self),
            address,
        })
    }

    pub fn is_free(&self) -> bool {
        self.state.lock().holder.is_none()
    }

    pub fn holder(&self) -> Option<u32> {
        self.state.lock().holder
    }

    /// Whether `address` has a generation outstanding. Its polling pauses
    /// until the permit is released.
    pub fn is_in_flight(&self, address: u32) -> bool {
        self.state.lock().in_flight.contains(&address)
    }

    /// Ignore polled changes on `address` until `until`.
    pub fn suppress(&self, address: u32, until: Instant) {
        self.state.lock().suppressed_until.insert(address, until);
    }

    pub fn is_suppressed(&self, address: u32, now: Instant) -> bool {
        self.state
            .lock()
            .suppressed_until
            .get(&address)
            .is_some_and(|until| now < *until)
    }

    pub fn clear_suppression(&self, address: u32) {
        self.state.lock().suppressed_until.remove(&address);
    }
}
