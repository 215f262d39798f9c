//! Signal bits polled at evaluator step boundaries.
//!
//! The recycle bit is raised by the allocator when the ballast runs out;
//! the halt bit is raised by the host (Ctrl-C or an embedding call). The
//! evaluator polls between steps, runs the collector inline for recycle,
//! and throws the halt label for halt.

use bitflags::bitflags;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SignalFlags: u32 {
        /// GC watermark crossed; collect at the next boundary.
        const RECYCLE = 1 << 0;
        /// Host requested cancellation; throw the halt label.
        const HALT = 1 << 1;
        /// Deferred event delivery is pending.
        const EVENT = 1 << 2;
    }
}

/// Shared signal mask. Atomic so a host thread can request a halt while
/// the single-threaded interpreter is mid-script; the interpreter itself
/// only touches it between steps.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    bits: Arc<AtomicU32>,
}

impl Signals {
    pub fn raise(&mut self, flags: SignalFlags) {
        self.bits.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub fn test(&self, flags: SignalFlags) -> bool {
        SignalFlags::from_bits_retain(self.bits.load(Ordering::Relaxed)).intersects(flags)
    }

    /// Clear and return whether the flag was set.
    pub fn take(&mut self, flags: SignalFlags) -> bool {
        let prior = self.bits.fetch_and(!flags.bits(), Ordering::Relaxed);
        SignalFlags::from_bits_retain(prior).intersects(flags)
    }

    /// A second handle for the host side (e.g. a Ctrl-C hook).
    pub fn remote(&self) -> RemoteSignals {
        RemoteSignals {
            bits: Arc::clone(&self.bits),
        }
    }
}

/// Host-side handle; can only raise, never consume.
#[derive(Debug, Clone)]
pub struct RemoteSignals {
    bits: Arc<AtomicU32>,
}

impl RemoteSignals {
    pub fn request_halt(&self) {
        self.bits.fetch_or(SignalFlags::HALT.bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_test_take() {
        let mut signals = Signals::default();
        assert!(!signals.test(SignalFlags::RECYCLE));
        signals.raise(SignalFlags::RECYCLE);
        assert!(signals.test(SignalFlags::RECYCLE));
        assert!(signals.take(SignalFlags::RECYCLE));
        assert!(!signals.test(SignalFlags::RECYCLE));
        assert!(!signals.take(SignalFlags::RECYCLE));
    }

    #[test]
    fn remote_handle_raises_halt() {
        let mut signals = Signals::default();
        let remote = signals.remote();
        remote.request_halt();
        assert!(signals.take(SignalFlags::HALT));
    }
}
