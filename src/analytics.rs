//! # Cross-Session Analytics
//!
//! Batch evaluation of recorded sessions. Each session runs through a fresh
//! preprocessor and statistics calculator; results are merged per athlete and
//! overall with `StatisticsAccumulator`.
//!
//! Input is validated in full before any session is processed, so a failing
//! call never yields partial results.

use crate::error::AnalyticsError;
use crate::preprocessor::{Preprocessor, PreprocessorConfig};
use crate::samples::{seconds_between, InputSample, ProcessedSample};
use crate::statistics::{HeartRateStatistics, StatisticsAccumulator, StatisticsCalculator};
use crate::zones::ZoneModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One recorded session to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: Uuid,
    pub athlete_id: Uuid,
    pub samples: Vec<InputSample>,
}

impl SessionDescriptor {
    pub fn new(athlete_id: Uuid, samples: Vec<InputSample>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            athlete_id,
            samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub overall: HeartRateStatistics,
    pub per_athlete: HashMap<Uuid, HeartRateStatistics>,
    pub session_count_per_athlete: HashMap<Uuid, usize>,
}

struct SessionResult {
    summary: HeartRateStatistics,
    bpm_sum: f64,
    bpm_count: usize,
}

pub struct AnalyticsAggregator {
    zone_model: ZoneModel,
    preprocessor_config: PreprocessorConfig,
}

impl AnalyticsAggregator {
    pub fn new(zone_model: ZoneModel, preprocessor_config: PreprocessorConfig) -> Self {
        Self {
            zone_model,
            preprocessor_config,
        }
    }

    pub fn evaluate(&self, sessions: &[SessionDescriptor]) -> Result<AnalyticsSummary, AnalyticsError> {
        if sessions.is_empty() {
            return Err(AnalyticsError::NoSessions);
        }
        if let Some(empty) = sessions.iter().find(|session| session.samples.is_empty()) {
            return Err(AnalyticsError::EmptySamples {
                session_id: empty.session_id,
            });
        }

        let mut athlete_accumulators: HashMap<Uuid, StatisticsAccumulator> = HashMap::new();
        let mut session_count_per_athlete: HashMap<Uuid, usize> = HashMap::new();
        let mut overall = StatisticsAccumulator::new();

        for session in sessions {
            let result = self.evaluate_session(session);
            log::debug!(
                "Session {} for athlete {}: {} valid samples",
                session.session_id,
                session.athlete_id,
                result.bpm_count
            );

            athlete_accumulators
                .entry(session.athlete_id)
                .or_default()
                .append(&result.summary, result.bpm_sum, result.bpm_count);
            overall.append(&result.summary, result.bpm_sum, result.bpm_count);
            *session_count_per_athlete.entry(session.athlete_id).or_insert(0) += 1;
        }

        Ok(AnalyticsSummary {
            overall: overall.make_statistics(),
            per_athlete: athlete_accumulators
                .into_iter()
                .map(|(athlete, accumulator)| (athlete, accumulator.make_statistics()))
                .collect(),
            session_count_per_athlete,
        })
    }

    fn evaluate_session(&self, session: &SessionDescriptor) -> SessionResult {
        let mut preprocessor = Preprocessor::new(self.preprocessor_config);
        let processed: Vec<ProcessedSample> = session
            .samples
            .iter()
            .map(|sample| preprocessor.process(sample))
            .collect();

        let mut calculator = StatisticsCalculator::new(self.zone_model.clone());
        let mut bpm_sum = 0.0;
        let mut bpm_count = 0;
        for sample in &processed {
            calculator.ingest(sample);
            if let Some(bpm) = sample.best_bpm().filter(|_| !sample.is_stale) {
                bpm_sum += bpm;
                bpm_count += 1;
            }
        }

        SessionResult {
            summary: calculator.make_summary(final_sample_duration(&processed)),
            bpm_sum,
            bpm_count,
        }
    }
}

/// Dwell time credited to the last sample: the spacing of the last two
/// non-stale samples, 1s when that is unknown, 0 when nothing was valid.
fn final_sample_duration(samples: &[ProcessedSample]) -> f64 {
    let mut valid = samples.iter().rev().filter(|sample| !sample.is_stale);
    match (valid.next(), valid.next()) {
        (None, _) => 0.0,
        (Some(_), None) => 1.0,
        (Some(last), Some(previous)) => {
            let duration = seconds_between(last.timestamp, previous.timestamp);
            if duration > 0.0 {
                duration
            } else {
                1.0
            }
        }
    }
}
