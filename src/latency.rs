//! Stream latency tracking.
//!
//! Keeps the latest latency per stream, reports threshold crossings as
//! analytics events and optionally mirrors the latest samples to a JSON
//! report file for CI collection.

use crate::samples::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyThresholds {
    pub warning_secs: f64,
    pub critical_secs: f64,
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self {
            warning_secs: 2.0,
            critical_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub stream_id: Uuid,
    pub label: String,
    pub latency_secs: f64,
    pub sample_timestamp: Timestamp,
    pub recorded_at: Timestamp,
}

impl LatencySample {
    pub fn latency_millis(&self) -> i64 {
        (self.latency_secs * 1000.0).round() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    pub generated_at: Timestamp,
    pub thresholds: LatencyThresholds,
    pub samples: Vec<LatencySample>,
}

/// Named analytics event with string metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsEvent {
    pub name: &'static str,
    pub metadata: BTreeMap<&'static str, String>,
}

impl AnalyticsEvent {
    fn emit(self) -> Self {
        let metadata: Vec<String> = self
            .metadata
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        log::debug!("event={} {}", self.name, metadata.join(" "));
        self
    }
}

#[derive(Debug)]
pub struct LatencyMonitor {
    thresholds: LatencyThresholds,
    report_path: Option<PathBuf>,
    latest: HashMap<Uuid, LatencySample>,
}

impl LatencyMonitor {
    pub fn new(thresholds: LatencyThresholds, report_path: Option<PathBuf>) -> Self {
        Self {
            thresholds,
            report_path,
            latest: HashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &LatencyThresholds {
        &self.thresholds
    }

    pub fn latest(&self, stream_id: &Uuid) -> Option<&LatencySample> {
        self.latest.get(stream_id)
    }

    /// Records one observation and returns the events it produced.
    pub fn record_latency(
        &mut self,
        stream_id: Uuid,
        label: &str,
        sample_timestamp: Timestamp,
        latency_secs: f64,
    ) -> Vec<AnalyticsEvent> {
        let sample = LatencySample {
            stream_id,
            label: label.to_string(),
            latency_secs,
            sample_timestamp,
            recorded_at: Utc::now(),
        };
        let events = self.events_for(&sample);
        self.latest.insert(stream_id, sample);
        self.write_report();
        events
    }

    pub fn report(&self) -> LatencyReport {
        let mut samples: Vec<LatencySample> = self.latest.values().cloned().collect();
        samples.sort_by(|a, b| a.label.cmp(&b.label));
        LatencyReport {
            generated_at: Utc::now(),
            thresholds: self.thresholds,
            samples,
        }
    }

    fn events_for(&self, sample: &LatencySample) -> Vec<AnalyticsEvent> {
        let stream_id = sample.stream_id.to_string();
        let latency_ms = sample.latency_millis().to_string();

        let observed = AnalyticsEvent {
            name: "latency_observed",
            metadata: BTreeMap::from([
                ("stream_id", stream_id.clone()),
                ("label", sample.label.clone()),
                ("latency_ms", latency_ms.clone()),
            ]),
        };
        let mut events = vec![observed.emit()];

        let threshold_event = |name| AnalyticsEvent {
            name,
            metadata: BTreeMap::from([("stream_id", stream_id.clone()), ("latency_ms", latency_ms.clone())]),
        };
        if sample.latency_secs >= self.thresholds.critical_secs {
            log::error!("Latency critical for {} latency_ms={}", sample.label, latency_ms);
            events.push(threshold_event("latency_critical").emit());
        } else if sample.latency_secs >= self.thresholds.warning_secs {
            log::warn!("Latency warning for {} latency_ms={}", sample.label, latency_ms);
            events.push(threshold_event("latency_warning").emit());
        }

        events
    }

    fn write_report(&self) {
        let Some(path) = &self.report_path else {
            return;
        };

        let result = serde_json::to_vec_pretty(&self.report())
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(path, bytes).map_err(|e| e.to_string()));
        if let Err(e) = result {
            log::error!("Failed to persist latency report to {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn names(events: &[AnalyticsEvent]) -> Vec<&'static str> {
        events.iter().map(|event| event.name).collect()
    }

    fn thresholds(warning_secs: f64, critical_secs: f64) -> LatencyThresholds {
        LatencyThresholds {
            warning_secs,
            critical_secs,
        }
    }

    #[test]
    fn test_below_warning_only_observed() {
        let mut monitor = LatencyMonitor::new(thresholds(2.0, 4.0), None);
        let stream = Uuid::new_v4();
        let events = monitor.record_latency(stream, "Warmup", Utc.timestamp_opt(100, 0).unwrap(), 0.5);

        assert_eq!(names(&events), vec!["latency_observed"]);
        assert_eq!(events[0].metadata["latency_ms"], "500");
        assert_eq!(events[0].metadata["label"], "Warmup");
        assert_eq!(monitor.latest(&stream).unwrap().latency_secs, 0.5);
    }

    #[test]
    fn test_warning_and_critical_thresholds() {
        let mut monitor = LatencyMonitor::new(thresholds(0.5, 1.0), None);
        let now = Utc::now();

        let warning = monitor.record_latency(Uuid::new_v4(), "Main", now, 0.75);
        assert_eq!(names(&warning), vec!["latency_observed", "latency_warning"]);
        assert!(!warning[1].metadata.contains_key("label"));

        let critical = monitor.record_latency(Uuid::new_v4(), "Stream", now, 1.5);
        assert_eq!(names(&critical), vec!["latency_observed", "latency_critical"]);

        let boundary = monitor.record_latency(Uuid::new_v4(), "Edge", now, 1.0);
        assert_eq!(names(&boundary), vec!["latency_observed", "latency_critical"]);
    }

    #[test]
    fn test_report_keeps_latest_per_stream_sorted_by_label() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latency-report.json");
        let mut monitor = LatencyMonitor::new(thresholds(1.0, 2.0), Some(path.clone()));

        let beta = Uuid::new_v4();
        let base = Utc.timestamp_opt(500, 0).unwrap();
        monitor.record_latency(beta, "Beta", base, 0.4);
        monitor.record_latency(Uuid::new_v4(), "Alpha", base, 0.8);
        monitor.record_latency(beta, "Beta", base, 0.6);

        let report: LatencyReport = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let labels: Vec<&str> = report.samples.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Alpha", "Beta"]);
        assert_eq!(report.samples[1].latency_secs, 0.6);
        assert_eq!(report.thresholds, thresholds(1.0, 2.0));
    }

    #[test]
    fn test_report_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let mut monitor = LatencyMonitor::new(LatencyThresholds::default(), Some(dir.path().to_path_buf()));
        let events = monitor.record_latency(Uuid::new_v4(), "Err", Utc::now(), 0.1);
        assert_eq!(names(&events), vec!["latency_observed"]);
    }
}
