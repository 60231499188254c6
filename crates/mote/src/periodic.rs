//! Periodic tick: the timer interrupt's view of the runtime.
//!
//! [`Periodic::tick`] is the only writer of the tick state. It may run on
//! another OS thread standing in for the timer interrupt, so everything here
//! is atomics and it never touches the heap or the frame chains. The dispatch
//! loop polls [`Periodic::take_reschedule`] at instruction boundaries and does
//! the actual thread switch there.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Microseconds between timer interrupts on the reference board.
pub const TICK_PERIOD_US: u32 = 975;

#[derive(Debug)]
pub struct Periodic {
    ms_ticks: AtomicU32,
    /// Sub-millisecond remainder carried between ticks.
    us_accum: AtomicU32,
    /// Milliseconds into the current timeslice.
    slice_ms: AtomicU32,
    timeslice_ms: u32,
    reschedule: AtomicBool,
}

impl Periodic {
    #[must_use]
    pub fn new(timeslice_ms: u32) -> Self {
        Self {
            ms_ticks: AtomicU32::new(0),
            us_accum: AtomicU32::new(0),
            slice_ms: AtomicU32::new(0),
            timeslice_ms: timeslice_ms.max(1),
            reschedule: AtomicBool::new(false),
        }
    }

    /// Advances time by `elapsed_us`. Safe to call from the timer context.
    pub fn tick(&self, elapsed_us: u32) {
        let total = self.us_accum.load(Ordering::Relaxed) + elapsed_us;
        let whole_ms = total / 1000;
        self.us_accum.store(total % 1000, Ordering::Relaxed);
        if whole_ms == 0 {
            return;
        }
        self.ms_ticks.fetch_add(whole_ms, Ordering::Release);
        let slice = self.slice_ms.load(Ordering::Relaxed) + whole_ms;
        if slice >= self.timeslice_ms {
            self.slice_ms.store(0, Ordering::Relaxed);
            self.reschedule.store(true, Ordering::Release);
        } else {
            self.slice_ms.store(slice, Ordering::Relaxed);
        }
    }

    /// Milliseconds since start. A single atomic load, so never a torn read.
    #[must_use]
    pub fn ms_ticks(&self) -> u32 {
        self.ms_ticks.load(Ordering::Acquire)
    }

    /// Consumes a pending reschedule request.
    pub fn take_reschedule(&self) -> bool {
        self.reschedule.swap(false, Ordering::AcqRel)
    }
}

impl Default for Periodic {
    fn default() -> Self {
        Self::new(10)
    }
}
