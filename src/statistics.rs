//! # Heart Rate Statistics
//!
//! Time-in-zone and min/max/average aggregation over preprocessed samples.
//!
//! ## Zone time attribution
//! A usable sample closes the interval opened by the previous usable sample and
//! credits that interval to the previous sample's zone. Stale or bpm-less
//! samples break the run: the interval leading into them is not credited.
//! The final sample has no successor, so `make_summary` credits it with a
//! caller-chosen dwell time.

use crate::samples::{seconds_between, ProcessedSample, Timestamp};
use crate::zones::ZoneModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of aggregated heart rate data
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HeartRateStatistics {
    pub average_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_bpm: Option<f64>,
    /// Seconds spent in each 1-based zone
    pub time_in_zones: BTreeMap<usize, f64>,
    /// Seconds, equal to the sum of `time_in_zones`
    pub total_duration: f64,
}

#[derive(Debug, Clone)]
pub struct StatisticsCalculator {
    zone_model: ZoneModel,
    zone_durations: BTreeMap<usize, f64>,
    total_duration: f64,
    sum_bpm: f64,
    count_bpm: usize,
    max_bpm: Option<f64>,
    min_bpm: Option<f64>,
    last_timestamp: Option<Timestamp>,
    last_zone: Option<usize>,
}

impl StatisticsCalculator {
    pub fn new(zone_model: ZoneModel) -> Self {
        Self {
            zone_model,
            zone_durations: BTreeMap::new(),
            total_duration: 0.0,
            sum_bpm: 0.0,
            count_bpm: 0,
            max_bpm: None,
            min_bpm: None,
            last_timestamp: None,
            last_zone: None,
        }
    }

    pub fn reset(&mut self) {
        self.zone_durations.clear();
        self.total_duration = 0.0;
        self.sum_bpm = 0.0;
        self.count_bpm = 0;
        self.max_bpm = None;
        self.min_bpm = None;
        self.last_timestamp = None;
        self.last_zone = None;
    }

    /// Number of usable samples ingested since construction or `reset`
    pub fn sample_count(&self) -> usize {
        self.count_bpm
    }

    pub fn ingest(&mut self, sample: &ProcessedSample) {
        let bpm = match sample.best_bpm() {
            Some(bpm) if !sample.is_stale => bpm,
            _ => {
                self.last_timestamp = Some(sample.timestamp);
                self.last_zone = None;
                return;
            }
        };

        if let (Some(last_timestamp), Some(last_zone)) = (self.last_timestamp, self.last_zone) {
            let delta = seconds_between(sample.timestamp, last_timestamp);
            if delta > 0.0 {
                *self.zone_durations.entry(last_zone).or_insert(0.0) += delta;
                self.total_duration += delta;
            }
        }

        let zone = self.zone_model.zone(bpm);
        self.sum_bpm += bpm;
        self.count_bpm += 1;
        self.max_bpm = Some(self.max_bpm.map_or(bpm, |max| max.max(bpm)));
        self.min_bpm = Some(self.min_bpm.map_or(bpm, |min| min.min(bpm)));
        self.last_timestamp = Some(sample.timestamp);
        self.last_zone = Some(zone);
    }

    /// Summary with `final_sample_duration` seconds credited to the last known zone.
    pub fn make_summary(&self, final_sample_duration: f64) -> HeartRateStatistics {
        let mut durations = self.zone_durations.clone();
        let mut total = self.total_duration;
        if let Some(last_zone) = self.last_zone {
            if final_sample_duration > 0.0 {
                *durations.entry(last_zone).or_insert(0.0) += final_sample_duration;
                total += final_sample_duration;
            }
        }

        HeartRateStatistics {
            average_bpm: (self.count_bpm > 0).then(|| self.sum_bpm / self.count_bpm as f64),
            max_bpm: self.max_bpm,
            min_bpm: self.min_bpm,
            time_in_zones: durations,
            total_duration: total,
        }
    }
}

/// Merges per-session results into a pooled summary.
///
/// The average is pooled over every valid reading, not an average of averages.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAccumulator {
    bpm_sum: f64,
    bpm_count: usize,
    max_bpm: Option<f64>,
    min_bpm: Option<f64>,
    total_duration: f64,
    zone_durations: BTreeMap<usize, f64>,
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in one session summary together with the raw sum/count behind its average.
    pub fn append(&mut self, summary: &HeartRateStatistics, bpm_sum: f64, bpm_count: usize) {
        self.bpm_sum += bpm_sum;
        self.bpm_count += bpm_count;

        if let Some(session_max) = summary.max_bpm {
            self.max_bpm = Some(self.max_bpm.map_or(session_max, |max| max.max(session_max)));
        }
        if let Some(session_min) = summary.min_bpm {
            self.min_bpm = Some(self.min_bpm.map_or(session_min, |min| min.min(session_min)));
        }

        self.total_duration += summary.total_duration;
        for (zone, duration) in &summary.time_in_zones {
            *self.zone_durations.entry(*zone).or_insert(0.0) += duration;
        }
    }

    pub fn make_statistics(&self) -> HeartRateStatistics {
        HeartRateStatistics {
            average_bpm: (self.bpm_count > 0).then(|| self.bpm_sum / self.bpm_count as f64),
            max_bpm: self.max_bpm,
            min_bpm: self.min_bpm,
            time_in_zones: self.zone_durations.clone(),
            total_duration: self.total_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(second: i64, bpm: Option<f64>, is_stale: bool) -> ProcessedSample {
        ProcessedSample {
            timestamp: Utc.timestamp_opt(second, 0).unwrap(),
            raw_bpm: bpm,
            smoothed_bpm: bpm,
            trend_per_second: None,
            is_stale,
        }
    }

    fn calculator() -> StatisticsCalculator {
        StatisticsCalculator::new(ZoneModel::new(vec![120.0, 140.0, 160.0, 180.0]).unwrap())
    }

    #[test]
    fn test_time_in_zone_and_extremes() {
        let mut calc = calculator();
        for (index, bpm) in [100.0, 130.0, 150.0, 170.0, 190.0].iter().enumerate() {
            calc.ingest(&sample(index as i64, Some(*bpm), false));
        }

        let summary = calc.make_summary(1.0);
        assert!((summary.average_bpm.unwrap() - 148.0).abs() < 1e-9);
        assert_eq!(summary.max_bpm, Some(190.0));
        assert_eq!(summary.min_bpm, Some(100.0));
        assert!((summary.total_duration - 5.0).abs() < 1e-9);
        for zone in 1..=5 {
            assert!((summary.time_in_zones[&zone] - 1.0).abs() < 1e-9, "zone {}", zone);
        }
    }

    #[test]
    fn test_zone_durations_sum_to_total() {
        let mut calc = calculator();
        let bpms = [110.0, 125.0, 125.0, 145.0, 165.0, 185.0, 185.0, 115.0];
        for (index, bpm) in bpms.iter().enumerate() {
            calc.ingest(&sample(index as i64 * 2, Some(*bpm), false));
        }

        let summary = calc.make_summary(1.5);
        let expected_total = (bpms.len() - 1) as f64 * 2.0 + 1.5;
        let zone_sum: f64 = summary.time_in_zones.values().sum();
        assert!((summary.total_duration - expected_total).abs() < 1e-9);
        assert!((zone_sum - summary.total_duration).abs() < 1e-9);
    }

    #[test]
    fn test_stale_sample_breaks_zone_run() {
        let mut calc = calculator();
        calc.ingest(&sample(0, Some(130.0), false));
        calc.ingest(&sample(1, Some(130.0), true));
        calc.ingest(&sample(2, Some(130.0), false));

        let summary = calc.make_summary(1.0);
        // 0→1 and 1→2 are both broken by the stale reading; only the final dwell counts
        assert!((summary.total_duration - 1.0).abs() < 1e-9);
        assert_eq!(calc.sample_count(), 2);
    }

    #[test]
    fn test_sample_without_bpm_is_ignored_for_extremes() {
        let mut calc = calculator();
        calc.ingest(&sample(0, Some(100.0), false));
        calc.ingest(&sample(1, None, false));
        let summary = calc.make_summary(0.0);
        assert_eq!(summary.max_bpm, Some(100.0));
        assert_eq!(summary.total_duration, 0.0);
        assert!(summary.time_in_zones.is_empty());
    }

    #[test]
    fn test_empty_summary() {
        let calc = calculator();
        let summary = calc.make_summary(1.0);
        assert_eq!(summary, HeartRateStatistics::default());
    }

    #[test]
    fn test_reset_clears_totals() {
        let mut calc = calculator();
        calc.ingest(&sample(0, Some(150.0), false));
        calc.ingest(&sample(1, Some(150.0), false));
        calc.reset();
        assert_eq!(calc.make_summary(1.0), HeartRateStatistics::default());
    }

    #[test]
    fn test_accumulator_pools_average() {
        let mut acc = StatisticsAccumulator::new();
        let low = HeartRateStatistics {
            average_bpm: Some(100.0),
            max_bpm: Some(100.0),
            min_bpm: Some(100.0),
            time_in_zones: BTreeMap::from([(1, 5.0)]),
            total_duration: 5.0,
        };
        let high = HeartRateStatistics {
            average_bpm: Some(200.0),
            max_bpm: Some(200.0),
            min_bpm: Some(200.0),
            time_in_zones: BTreeMap::from([(1, 1.0), (5, 9.0)]),
            total_duration: 10.0,
        };
        acc.append(&low, 300.0, 3);
        acc.append(&high, 200.0, 1);

        let merged = acc.make_statistics();
        assert!((merged.average_bpm.unwrap() - 125.0).abs() < 1e-9);
        assert_eq!(merged.max_bpm, Some(200.0));
        assert_eq!(merged.min_bpm, Some(100.0));
        assert_eq!(merged.time_in_zones[&1], 6.0);
        assert_eq!(merged.time_in_zones[&5], 9.0);
        assert_eq!(merged.total_duration, 15.0);
    }
}
