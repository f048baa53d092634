use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of time-stamp counter readings
pub trait TscSource: Send {
    fn read(&self) -> u64;
}

/// Nanoseconds elapsed since the source was created.
pub struct MonotonicTsc {
    origin: Instant,
}

impl MonotonicTsc {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicTsc {
    fn default() -> Self {
        Self::new()
    }
}

impl TscSource for MonotonicTsc {
    fn read(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Counter driven by hand, for tests and simulated targets.
///
/// Clones share the same counter. Each read advances it by `step`.
#[derive(Clone, Default)]
pub struct ManualTsc {
    counter: Arc<AtomicU64>,
    step: u64,
}

impl ManualTsc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(step: u64) -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(0)),
            step,
        }
    }

    pub fn set(&self, value: u64) {
        self.counter.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, cycles: u64) {
        self.counter.fetch_add(cycles, Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl TscSource for ManualTsc {
    fn read(&self) -> u64 {
        self.counter.fetch_add(self.step, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_tsc_shared_between_clones() {
        let tsc = ManualTsc::with_step(10);
        let handle = tsc.clone();
        assert_eq!(tsc.read(), 0);
        assert_eq!(tsc.read(), 10);
        handle.advance(5);
        assert_eq!(tsc.read(), 25);
        handle.set(3);
        assert_eq!(handle.get(), 3);
    }

    #[test]
    fn test_monotonic_never_decreases() {
        let tsc = MonotonicTsc::new();
        let a = tsc.read();
        let b = tsc.read();
        assert!(b >= a);
    }
}
