//! Presentation pacing
//!
//! Bounds the number of presentable frames in flight based on measured
//! frame latency. Degraded performance reduces queued work instead of
//! compounding latency: above 185 ms average only one drawable may be in
//! flight, above 85 ms two, otherwise the configured maximum.
//!
//! `complete` runs from the command-buffer completion handler on a
//! driver-owned thread, so the shared state is an atomic counter plus a
//! mutex-guarded sample window; nothing here may touch context state.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Default maximum number of drawables in flight
pub const MAX_DRAWABLES_IN_FLIGHT: u32 = 3;

/// Number of frame latency samples in the rolling average
pub const FRAME_LATENCY_WINDOW: usize = 5;

/// Average latency above which only one drawable may be in flight
const LATENCY_CAP_ONE_US: u64 = 185_000;

/// Average latency above which at most two drawables may be in flight
const LATENCY_CAP_TWO_US: u64 = 85_000;

/// Poll interval while waiting for an in-flight slot
const ACQUIRE_POLL: Duration = Duration::from_millis(2);

struct LatencyWindow {
    samples: [u64; FRAME_LATENCY_WINDOW],
    next: usize,
    filled: usize,
}

/// Latency-adaptive drawables-in-flight limiter
pub struct PresentationPacer {
    max_drawables: u32,
    in_flight: AtomicU32,
    /// Cached rolling average in microseconds, readable without the lock
    avg_latency_us: AtomicU64,
    window: Mutex<LatencyWindow>,
}

impl PresentationPacer {
    pub fn new(max_drawables: u32) -> Self {
        Self {
            max_drawables: max_drawables.max(1),
            in_flight: AtomicU32::new(0),
            avg_latency_us: AtomicU64::new(0),
            window: Mutex::new(LatencyWindow {
                samples: [0; FRAME_LATENCY_WINDOW],
                next: 0,
                filled: 0,
            }),
        }
    }

    /// Number of drawables currently in flight
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Rolling average frame latency in microseconds
    pub fn average_latency_us(&self) -> u64 {
        self.avg_latency_us.load(Ordering::Acquire)
    }

    /// The currently allowed number of in-flight drawables, derived from the
    /// rolling latency average
    pub fn current_cap(&self) -> u32 {
        let avg = self.average_latency_us();
        if avg > LATENCY_CAP_ONE_US {
            1
        } else if avg > LATENCY_CAP_TWO_US {
            2
        } else {
            self.max_drawables
        }
    }

    /// Claim an in-flight slot without blocking. Returns false when the
    /// current cap is reached.
    pub fn try_acquire(&self) -> bool {
        let cap = self.current_cap();
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= cap {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Block (sleep-poll) until an in-flight slot is available, then claim
    /// it. This is the one intentional throttling wait in the frame path.
    pub fn acquire(&self) {
        while !self.try_acquire() {
            std::thread::sleep(ACQUIRE_POLL);
        }
    }

    /// Release a slot and fold the measured frame latency into the rolling
    /// average. Called from the command-buffer completion handler on a
    /// driver thread.
    pub fn complete(&self, latency: Duration) {
        let mut window = self.window.lock().unwrap();
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        let next = window.next;
        window.samples[next] = micros;
        window.next = (next + 1) % FRAME_LATENCY_WINDOW;
        window.filled = (window.filled + 1).min(FRAME_LATENCY_WINDOW);
        let filled = window.filled;
        let avg = window.samples[..filled].iter().sum::<u64>() / filled as u64;
        drop(window);

        self.avg_latency_us.store(avg, Ordering::Release);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for PresentationPacer {
    fn default() -> Self {
        Self::new(MAX_DRAWABLES_IN_FLIGHT)
    }
}

#[cfg(test)]
#[path = "pacer_tests.rs"]
mod tests;
