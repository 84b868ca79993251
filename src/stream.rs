//! Stale detection layered over the resampler.
//!
//! `StreamCoordinator` owns its `Resampler` and counts consecutive stale
//! emissions. That count, not the resampler's empty-tick counter, is what the
//! connection controller reacts to: a window filled only with transport-flagged
//! stale readings counts as stale here even though the bucket was not empty.

use crate::resampler::Resampler;
use crate::samples::{RawSample, ResampledSample, Timestamp};
use std::time::Duration;

/// One resampled tick together with the stale run length it extends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamEmission {
    pub sample: ResampledSample,
    pub consecutive_stale_count: u32,
}

#[derive(Debug, Clone)]
pub struct StreamCoordinator {
    resampler: Resampler,
    consecutive_stale: u32,
    last_sample: Option<ResampledSample>,
}

impl StreamCoordinator {
    pub fn new(resampler: Resampler) -> Self {
        Self {
            resampler,
            consecutive_stale: 0,
            last_sample: None,
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self::new(Resampler::new(interval))
    }

    pub fn interval(&self) -> Duration {
        self.resampler.interval()
    }

    pub fn is_running(&self) -> bool {
        self.resampler.is_running()
    }

    pub fn last_sample(&self) -> Option<&ResampledSample> {
        self.last_sample.as_ref()
    }

    pub fn consecutive_stale_count(&self) -> u32 {
        self.consecutive_stale
    }

    pub fn start(&mut self) {
        self.resampler.start();
    }

    pub fn stop(&mut self) {
        self.resampler.stop();
        self.consecutive_stale = 0;
        self.last_sample = None;
    }

    pub fn reset(&mut self) {
        self.resampler.reset();
        self.consecutive_stale = 0;
        self.last_sample = None;
    }

    pub fn handle_incoming_sample(&mut self, sample: RawSample) {
        self.resampler.receive(sample);
    }

    pub fn tick(&mut self, now: Timestamp) -> Option<StreamEmission> {
        let sample = self.resampler.tick(now)?;
        if sample.is_stale {
            self.consecutive_stale += 1;
        } else {
            self.consecutive_stale = 0;
        }
        self.last_sample = Some(sample);

        Some(StreamEmission {
            sample,
            consecutive_stale_count: self.consecutive_stale,
        })
    }
}

impl Default for StreamCoordinator {
    fn default() -> Self {
        Self::new(Resampler::default())
    }
}
