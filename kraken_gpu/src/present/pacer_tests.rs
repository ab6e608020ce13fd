//! Unit tests for presentation backpressure

use std::time::Duration;

use crate::present::{PresentationPacer, FRAME_LATENCY_WINDOW, MAX_DRAWABLES_IN_FLIGHT};

/// Fill the rolling window with a constant per-frame latency
fn feed_latency(pacer: &PresentationPacer, millis: u64) {
    for _ in 0..FRAME_LATENCY_WINDOW {
        assert!(pacer.try_acquire() || {
            // Drain a slot if the cap is already saturated mid-feed
            pacer.complete(Duration::from_millis(millis));
            pacer.try_acquire()
        });
        pacer.complete(Duration::from_millis(millis));
    }
}

#[test]
fn test_fast_frames_allow_configured_max() {
    // Under 85 ms the configured maximum applies.
    let pacer = PresentationPacer::new(MAX_DRAWABLES_IN_FLIGHT);
    feed_latency(&pacer, 16);

    assert_eq!(pacer.current_cap(), MAX_DRAWABLES_IN_FLIGHT);
    assert!(pacer.try_acquire());
    assert!(pacer.try_acquire());
    assert!(pacer.try_acquire());
    assert!(!pacer.try_acquire());
    assert_eq!(pacer.in_flight(), 3);
}

#[test]
fn test_high_latency_caps_at_one() {
    // Above 185 ms only one drawable may be in flight.
    let pacer = PresentationPacer::new(MAX_DRAWABLES_IN_FLIGHT);
    feed_latency(&pacer, 200);

    assert_eq!(pacer.current_cap(), 1);
    assert!(pacer.try_acquire());
    assert!(!pacer.try_acquire());
    assert_eq!(pacer.in_flight(), 1);
}

#[test]
fn test_medium_latency_caps_at_two() {
    let pacer = PresentationPacer::new(MAX_DRAWABLES_IN_FLIGHT);
    feed_latency(&pacer, 120);

    assert_eq!(pacer.current_cap(), 2);
    assert!(pacer.try_acquire());
    assert!(pacer.try_acquire());
    assert!(!pacer.try_acquire());
}

#[test]
fn test_band_transition_applies_on_next_acquire() {
    // Moving between latency bands updates the cap for the next present.
    let pacer = PresentationPacer::new(MAX_DRAWABLES_IN_FLIGHT);
    feed_latency(&pacer, 200);
    assert_eq!(pacer.current_cap(), 1);

    // Latency recovers; once the window rolls over the cap widens again
    feed_latency(&pacer, 10);
    assert_eq!(pacer.current_cap(), MAX_DRAWABLES_IN_FLIGHT);
}

#[test]
fn test_complete_releases_slot() {
    let pacer = PresentationPacer::new(1);
    assert!(pacer.try_acquire());
    assert!(!pacer.try_acquire());

    pacer.complete(Duration::from_millis(5));
    assert_eq!(pacer.in_flight(), 0);
    assert!(pacer.try_acquire());
}

#[test]
fn test_rolling_average_tracks_window() {
    let pacer = PresentationPacer::new(MAX_DRAWABLES_IN_FLIGHT);
    feed_latency(&pacer, 100);
    assert_eq!(pacer.average_latency_us(), 100_000);

    // One fast frame pulls the average down by one window share
    assert!(pacer.try_acquire());
    pacer.complete(Duration::ZERO);
    assert_eq!(pacer.average_latency_us(), 80_000);
}

#[test]
fn test_acquire_blocks_until_slot_free() {
    use std::sync::Arc;

    let pacer = Arc::new(PresentationPacer::new(1));
    assert!(pacer.try_acquire());

    // A second acquire must wait for the completion callback thread
    let waiter = {
        let pacer = Arc::clone(&pacer);
        std::thread::spawn(move || {
            pacer.acquire();
            pacer.in_flight()
        })
    };
    std::thread::sleep(Duration::from_millis(10));
    pacer.complete(Duration::from_millis(1));

    assert_eq!(waiter.join().unwrap(), 1);
}
