//! # Heart Rate Sample Types
//!
//! The values that flow through the pipeline, from least to most refined:
//!
//! ```text
//! RawSample ──► ResampledSample ──► InputSample ──► ProcessedSample
//! (adapter)     (1 Hz resampler)    (analytics in)   (preprocessor out)
//! ```
//!
//! All of them are transient: produced and consumed within one processing
//! tick, with no identity beyond their timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall clock instant attached to every sample
pub type Timestamp = DateTime<Utc>;

/// Seconds elapsed from `earlier` to `later`, negative if `later` is before `earlier`.
pub fn seconds_between(later: Timestamp, earlier: Timestamp) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// A single reading as delivered by a hardware adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: Timestamp,
    pub bpm: i32,
    /// Set by the transport when it knows the reading is a repeat or unreliable
    pub is_stale: bool,
}

impl RawSample {
    pub fn new(timestamp: Timestamp, bpm: i32) -> Self {
        Self {
            timestamp,
            bpm,
            is_stale: false,
        }
    }

    pub fn stale(timestamp: Timestamp, bpm: i32) -> Self {
        Self {
            timestamp,
            bpm,
            is_stale: true,
        }
    }
}

/// One output of the resampler per tick.
///
/// `bpm` is `None` only while no reading has ever been observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResampledSample {
    pub timestamp: Timestamp,
    pub bpm: Option<f64>,
    pub is_stale: bool,
}

/// Input to the analytics layer: a reading whose bpm may be absent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    pub timestamp: Timestamp,
    pub bpm: Option<f64>,
    pub is_stale: bool,
}

impl InputSample {
    pub fn new(timestamp: Timestamp, bpm: Option<f64>, is_stale: bool) -> Self {
        Self {
            timestamp,
            bpm,
            is_stale,
        }
    }
}

impl From<ResampledSample> for InputSample {
    fn from(sample: ResampledSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            bpm: sample.bpm,
            is_stale: sample.is_stale,
        }
    }
}

impl From<RawSample> for InputSample {
    fn from(sample: RawSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            bpm: Some(f64::from(sample.bpm)),
            is_stale: sample.is_stale,
        }
    }
}

/// Preprocessor output: the reading enriched with smoothing and trend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSample {
    pub timestamp: Timestamp,
    pub raw_bpm: Option<f64>,
    pub smoothed_bpm: Option<f64>,
    /// Trend in bpm per second
    pub trend_per_second: Option<f64>,
    pub is_stale: bool,
}

impl ProcessedSample {
    /// Smoothed bpm when available, the raw reading otherwise
    pub fn best_bpm(&self) -> Option<f64> {
        self.smoothed_bpm.or(self.raw_bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seconds_between_handles_fractions_and_sign() {
        let a = Utc.timestamp_millis_opt(1_000).unwrap();
        let b = Utc.timestamp_millis_opt(3_500).unwrap();
        assert!((seconds_between(b, a) - 2.5).abs() < 1e-9);
        assert!((seconds_between(a, b) + 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_best_bpm_prefers_smoothed() {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        let mut sample = ProcessedSample {
            timestamp: t,
            raw_bpm: Some(100.0),
            smoothed_bpm: Some(95.0),
            trend_per_second: None,
            is_stale: false,
        };
        assert_eq!(sample.best_bpm(), Some(95.0));
        sample.smoothed_bpm = None;
        assert_eq!(sample.best_bpm(), Some(100.0));
    }

    #[test]
    fn test_raw_sample_converts_to_input() {
        let t = Utc.timestamp_opt(10, 0).unwrap();
        let input = InputSample::from(RawSample::stale(t, 88));
        assert_eq!(input.bpm, Some(88.0));
        assert!(input.is_stale);
    }
}
