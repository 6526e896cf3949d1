//! The host-supplied clock that drives [`Expiration::ClockTick`](super::Expiration::ClockTick).

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically non-decreasing counter owned by the host, such as a
/// simulation or game tick.
pub trait TickSource: Send + Sync {
    fn current_tick(&self) -> u64;
}

/// A tick counter the host advances by hand.
#[derive(Debug, Default)]
pub struct ManualTickSource {
    tick: AtomicU64,
}

impl ManualTickSource {
    pub fn new(start: u64) -> Self {
        Self {
            tick: AtomicU64::new(start),
        }
    }

    /// Moves the counter forward and returns the new tick.
    pub fn advance(&self, ticks: u64) -> u64 {
        self.tick.fetch_add(ticks, Ordering::AcqRel) + ticks
    }

    /// Sets the counter. Values below the current tick are ignored.
    pub fn set(&self, tick: u64) {
        self.tick.fetch_max(tick, Ordering::AcqRel);
    }
}

impl TickSource for ManualTickSource {
    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_moves_backwards() {
        let ticks = ManualTickSource::new(10);
        assert_eq!(ticks.advance(5), 15);
        ticks.set(3);
        assert_eq!(ticks.current_tick(), 15);
        ticks.set(600);
        assert_eq!(ticks.current_tick(), 600);
    }
}
