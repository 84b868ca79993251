//! # Activity Detection
//!
//! Classifies an athlete as `Active` or `Paused` from preprocessed samples.
//!
//! ## Hysteresis
//! A transition needs its qualifying condition to hold continuously for a
//! minimum duration. Any disqualifying sample zeroes the accumulator, there is
//! no partial credit.
//!
//! ```text
//!            bpm >= baseline + delta_on  OR  zone >= active threshold
//!            held for min_active_duration
//!   Paused ─────────────────────────────────────────────────────► Active
//!          ◄─────────────────────────────────────────────────────
//!            bpm <= baseline + delta_off OR  trend <= recovery threshold
//!            held for min_pause_duration
//! ```
//!
//! ## Recovery slope
//! While paused, samples inside `recovery_slope_window` seconds after the
//! pause started are kept; the slope between the first and last of them is
//! reported in bpm per minute.

use crate::samples::{seconds_between, ProcessedSample, Timestamp};
use crate::zones::ZoneModel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    Active,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDetectionConfig {
    pub baseline_bpm: f64,
    pub delta_on: f64,
    pub delta_off: f64,
    /// Seconds the activation condition must hold
    pub min_active_duration: f64,
    /// Seconds the pause condition must hold
    pub min_pause_duration: f64,
    pub active_zone_threshold: usize,
    /// Negative slope in bpm per second that signals recovery
    pub recovery_trend_threshold: f64,
    /// Seconds after entering pause during which recovery samples are kept
    pub recovery_slope_window: f64,
    pub zone_model: ZoneModel,
}

impl Default for ActivityDetectionConfig {
    fn default() -> Self {
        Self {
            baseline_bpm: 70.0,
            delta_on: 30.0,
            delta_off: 15.0,
            min_active_duration: 8.0,
            min_pause_duration: 10.0,
            active_zone_threshold: 2,
            recovery_trend_threshold: -0.5,
            recovery_slope_window: 60.0,
            zone_model: ZoneModel::default(),
        }
    }
}

/// Output of every `process` call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub state: ActivityState,
    pub zone: Option<usize>,
    pub recovery_slope_bpm_per_minute: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ActivityStateMachine {
    config: ActivityDetectionConfig,
    state: ActivityState,
    last_timestamp: Option<Timestamp>,
    active_accumulator: f64,
    pause_accumulator: f64,
    recovery_samples: Vec<(Timestamp, f64)>,
    pause_start: Option<Timestamp>,
}

impl ActivityStateMachine {
    pub fn new(config: ActivityDetectionConfig) -> Self {
        Self {
            config,
            state: ActivityState::Paused,
            last_timestamp: None,
            active_accumulator: 0.0,
            pause_accumulator: 0.0,
            recovery_samples: Vec::new(),
            pause_start: None,
        }
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn config(&self) -> &ActivityDetectionConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.state = ActivityState::Paused;
        self.last_timestamp = None;
        self.active_accumulator = 0.0;
        self.pause_accumulator = 0.0;
        self.recovery_samples.clear();
        self.pause_start = None;
    }

    pub fn process(&mut self, sample: &ProcessedSample) -> ActivitySnapshot {
        let timestamp = sample.timestamp;
        let delta = self
            .last_timestamp
            .map_or(0.0, |last| seconds_between(timestamp, last));
        self.last_timestamp = Some(timestamp);

        // The initial paused state has no transition, so it starts its recovery clock here
        if self.state == ActivityState::Paused && self.pause_start.is_none() {
            self.pause_start = Some(timestamp);
        }

        let bpm = sample.best_bpm();
        let zone = bpm.map(|bpm| self.config.zone_model.zone(bpm));

        let next_state = match self.state {
            ActivityState::Paused => {
                if self.meets_activation(bpm, zone) {
                    self.active_accumulator += delta;
                    self.pause_accumulator = 0.0;
                } else {
                    self.active_accumulator = 0.0;
                }
                if self.active_accumulator >= self.config.min_active_duration {
                    ActivityState::Active
                } else {
                    ActivityState::Paused
                }
            }
            ActivityState::Active => {
                if self.meets_pause(bpm, sample.trend_per_second) {
                    self.pause_accumulator += delta;
                    self.active_accumulator = 0.0;
                } else {
                    self.pause_accumulator = 0.0;
                }
                if self.pause_accumulator >= self.config.min_pause_duration {
                    ActivityState::Paused
                } else {
                    ActivityState::Active
                }
            }
        };

        if next_state != self.state {
            self.transition(next_state, timestamp, bpm);
        } else {
            self.maintain(timestamp, bpm);
        }

        ActivitySnapshot {
            state: self.state,
            zone,
            recovery_slope_bpm_per_minute: self.recovery_slope(),
        }
    }

    fn meets_activation(&self, bpm: Option<f64>, zone: Option<usize>) -> bool {
        match (bpm, zone) {
            (Some(bpm), Some(zone)) => {
                bpm >= self.config.baseline_bpm + self.config.delta_on
                    || zone >= self.config.active_zone_threshold
            }
            _ => false,
        }
    }

    fn meets_pause(&self, bpm: Option<f64>, trend: Option<f64>) -> bool {
        let below_off = bpm.map_or(false, |bpm| {
            bpm <= self.config.baseline_bpm + self.config.delta_off
        });
        let recovering = trend.map_or(false, |trend| {
            trend <= self.config.recovery_trend_threshold
        });
        below_off || recovering
    }

    fn transition(&mut self, state: ActivityState, timestamp: Timestamp, bpm: Option<f64>) {
        log::debug!("Activity state {:?} -> {:?} at {}", self.state, state, timestamp);
        self.state = state;
        self.active_accumulator = 0.0;
        self.pause_accumulator = 0.0;
        self.recovery_samples.clear();
        self.pause_start = match state {
            ActivityState::Paused => Some(timestamp),
            ActivityState::Active => None,
        };
        self.maintain(timestamp, bpm);
    }

    fn maintain(&mut self, timestamp: Timestamp, bpm: Option<f64>) {
        match self.state {
            ActivityState::Active => {
                self.recovery_samples.clear();
                self.pause_start = None;
            }
            ActivityState::Paused => {
                let (Some(bpm), Some(pause_start)) = (bpm, self.pause_start) else {
                    return;
                };
                if seconds_between(timestamp, pause_start) <= self.config.recovery_slope_window {
                    self.recovery_samples.push((timestamp, bpm));
                }
            }
        }
    }

    fn recovery_slope(&self) -> Option<f64> {
        if self.state != ActivityState::Paused || self.recovery_samples.len() < 2 {
            return None;
        }
        let (first_time, first_bpm) = self.recovery_samples.first()?;
        let (last_time, last_bpm) = self.recovery_samples.last()?;
        let duration = seconds_between(*last_time, *first_time);
        if duration <= 0.0 {
            return None;
        }
        Some((last_bpm - first_bpm) / duration * 60.0)
    }
}
