//! # Heart Rate Preprocessor
//!
//! Per-sample EWMA smoothing plus a short window linear trend.
//!
//! The trend is the slope between the oldest and newest smoothed values still
//! inside the trend window, in bpm per second. Samples without a bpm carry the
//! previous smoothed value forward and never enter the trend history.

use crate::samples::{seconds_between, InputSample, ProcessedSample, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    /// Smoothing factor in (0, 1]; 1 disables smoothing
    pub ewma_alpha: f64,
    /// Trend window in seconds
    pub trend_window_secs: f64,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.3,
            trend_window_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessorConfig,
    last_smoothed: Option<f64>,
    history: VecDeque<(Timestamp, f64)>,
}

impl Preprocessor {
    pub fn new(config: PreprocessorConfig) -> Self {
        Self {
            config,
            last_smoothed: None,
            history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Forget smoothing state; the next sample behaves as the first one.
    pub fn reset(&mut self) {
        self.last_smoothed = None;
        self.history.clear();
    }

    pub fn process(&mut self, sample: &InputSample) -> ProcessedSample {
        let smoothed = self.smooth(sample);
        self.prune(sample.timestamp);

        ProcessedSample {
            timestamp: sample.timestamp,
            raw_bpm: sample.bpm,
            smoothed_bpm: smoothed,
            trend_per_second: self.trend(),
            is_stale: sample.is_stale,
        }
    }

    fn smooth(&mut self, sample: &InputSample) -> Option<f64> {
        let bpm = match sample.bpm {
            Some(bpm) => bpm,
            None => return self.last_smoothed,
        };

        let alpha = self.config.ewma_alpha;
        let smoothed = match self.last_smoothed {
            Some(last) => alpha * bpm + (1.0 - alpha) * last,
            None => bpm,
        };

        self.last_smoothed = Some(smoothed);
        self.history.push_back((sample.timestamp, smoothed));
        Some(smoothed)
    }

    fn prune(&mut self, now: Timestamp) {
        let window = Duration::milliseconds((self.config.trend_window_secs * 1_000.0) as i64);
        let limit = now - window;
        self.history.retain(|(timestamp, _)| *timestamp >= limit);
    }

    fn trend(&self) -> Option<f64> {
        if self.history.len() < 2 {
            return None;
        }
        let (oldest_time, oldest_value) = self.history.front()?;
        let (newest_time, newest_value) = self.history.back()?;

        let delta_time = seconds_between(*newest_time, *oldest_time);
        if delta_time <= 0.0 {
            return None;
        }
        Some((newest_value - oldest_value) / delta_time)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(PreprocessorConfig::default())
    }
}
