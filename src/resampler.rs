//! # Heart Rate Resampler
//!
//! Turns irregular sensor readings into one sample per tick.
//!
//! Raw readings are bucketed between ticks. On each tick the bucket is
//! averaged into a single output; an empty bucket repeats the last known bpm
//! marked stale.
//!
//! The resampler itself holds no timer. Whoever owns it calls `tick` once per
//! `interval()` while it is running (see `ConnectionManager`), on the same
//! execution context that calls `receive`, so bucket and counters are never
//! touched concurrently.

use crate::samples::{RawSample, ResampledSample, Timestamp};
use std::time::Duration;

pub const DEFAULT_RESAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Resampler {
    interval: Duration,
    running: bool,
    bucket: Vec<RawSample>,
    last_known_bpm: Option<f64>,
    consecutive_empty_ticks: u32,
}

impl Resampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: false,
            bucket: Vec::new(),
            last_known_bpm: None,
            consecutive_empty_ticks: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn consecutive_empty_ticks(&self) -> u32 {
        self.consecutive_empty_ticks
    }

    pub fn last_known_bpm(&self) -> Option<f64> {
        self.last_known_bpm
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stops ticking and forgets everything, including the last known bpm.
    pub fn stop(&mut self) {
        self.running = false;
        self.clear();
    }

    /// Clears bucket, counters and the last known bpm while staying in the
    /// current running state, so a new connection never repeats a value seen
    /// on the previous one.
    pub fn reset(&mut self) {
        self.clear();
    }

    pub fn receive(&mut self, sample: RawSample) {
        self.bucket.push(sample);
        self.consecutive_empty_ticks = 0;
    }

    /// Emits the sample for the window that closes at `now`, or `None` when stopped.
    pub fn tick(&mut self, now: Timestamp) -> Option<ResampledSample> {
        if !self.running {
            return None;
        }

        if self.bucket.is_empty() {
            self.consecutive_empty_ticks += 1;
            return Some(ResampledSample {
                timestamp: now,
                bpm: self.last_known_bpm,
                is_stale: true,
            });
        }

        let total: f64 = self.bucket.iter().map(|sample| f64::from(sample.bpm)).sum();
        let average = total / self.bucket.len() as f64;
        let is_stale = self.bucket.iter().all(|sample| sample.is_stale);
        self.bucket.clear();
        self.last_known_bpm = Some(average);
        self.consecutive_empty_ticks = 0;

        Some(ResampledSample {
            timestamp: now,
            bpm: Some(average),
            is_stale,
        })
    }

    fn clear(&mut self) {
        self.bucket.clear();
        self.consecutive_empty_ticks = 0;
        self.last_known_bpm = None;
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(DEFAULT_RESAMPLE_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn running() -> Resampler {
        let mut resampler = Resampler::default();
        resampler.start();
        resampler
    }

    #[test]
    fn test_stopped_resampler_does_not_emit() {
        let mut resampler = Resampler::default();
        resampler.receive(RawSample::new(at(0), 80));
        assert_eq!(resampler.tick(at(1)), None);
    }

    #[test]
    fn test_empty_ticks_without_history_have_no_bpm() {
        let mut resampler = running();
        for second in 1..=4 {
            let sample = resampler.tick(at(second)).unwrap();
            assert!(sample.is_stale);
            assert_eq!(sample.bpm, None);
        }
        assert_eq!(resampler.consecutive_empty_ticks(), 4);
    }

    #[test]
    fn test_bucket_is_averaged_then_repeated_stale() {
        let mut resampler = running();
        resampler.receive(RawSample::new(at(0), 70));
        resampler.receive(RawSample::new(at(0), 80));
        resampler.receive(RawSample::new(at(0), 90));

        let first = resampler.tick(at(1)).unwrap();
        assert_eq!(first.bpm, Some(80.0));
        assert!(!first.is_stale);

        for second in 2..=5 {
            let sample = resampler.tick(at(second)).unwrap();
            assert!(sample.is_stale);
            assert_eq!(sample.bpm, Some(80.0));
            assert_eq!(sample.timestamp, at(second));
        }
    }

    #[test]
    fn test_window_is_stale_only_if_every_reading_is() {
        let mut resampler = running();
        resampler.receive(RawSample::stale(at(0), 100));
        resampler.receive(RawSample::stale(at(0), 102));
        assert!(resampler.tick(at(1)).unwrap().is_stale);

        resampler.receive(RawSample::stale(at(1), 100));
        resampler.receive(RawSample::new(at(1), 104));
        let mixed = resampler.tick(at(2)).unwrap();
        assert!(!mixed.is_stale);
        assert_eq!(mixed.bpm, Some(102.0));
    }

    #[test]
    fn test_receive_resets_empty_counter_before_tick() {
        let mut resampler = running();
        resampler.tick(at(1));
        resampler.tick(at(2));
        assert_eq!(resampler.consecutive_empty_ticks(), 2);
        resampler.receive(RawSample::new(at(2), 75));
        assert_eq!(resampler.consecutive_empty_ticks(), 0);
    }

    #[test]
    fn test_reset_keeps_running_but_forgets_bpm() {
        let mut resampler = running();
        resampler.receive(RawSample::new(at(0), 90));
        resampler.tick(at(1));
        resampler.receive(RawSample::new(at(1), 95));

        resampler.reset();
        assert!(resampler.is_running());
        let sample = resampler.tick(at(2)).unwrap();
        assert!(sample.is_stale);
        assert_eq!(sample.bpm, None);
    }

    #[test]
    fn test_stop_clears_everything() {
        let mut resampler = running();
        resampler.receive(RawSample::new(at(0), 90));
        resampler.tick(at(1));
        resampler.stop();
        assert!(!resampler.is_running());
        assert_eq!(resampler.last_known_bpm(), None);

        resampler.start();
        assert_eq!(resampler.tick(at(2)).unwrap().bpm, None);
    }
}
