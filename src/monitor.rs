//! Live per-athlete pipeline: resampled samples in, activity snapshots out.
//!
//! ```text
//! ResampledSample ─► Preprocessor ─┬─► ActivityStateMachine ─► ActivitySnapshot
//!                                  ├─► StatisticsCalculator
//!                                  └─► SampleRecorder (fresh readings only)
//! ```

use crate::activity::{ActivityDetectionConfig, ActivitySnapshot, ActivityStateMachine};
use crate::preprocessor::{Preprocessor, PreprocessorConfig};
use crate::recorder::{HeartRateRecord, SampleRecorder};
use crate::samples::{seconds_between, InputSample, ProcessedSample, ResampledSample};
use crate::statistics::{HeartRateStatistics, StatisticsCalculator};
use uuid::Uuid;

struct Recording {
    recorder: SampleRecorder,
    session_id: Uuid,
    athlete_id: Uuid,
}

pub struct ActivityMonitor {
    preprocessor: Preprocessor,
    activity: ActivityStateMachine,
    statistics: StatisticsCalculator,
    recording: Option<Recording>,
    last_fresh: Option<ProcessedSample>,
    previous_fresh: Option<ProcessedSample>,
}

impl ActivityMonitor {
    pub fn new(preprocessor: PreprocessorConfig, activity: ActivityDetectionConfig) -> Self {
        let zone_model = activity.zone_model.clone();
        Self {
            preprocessor: Preprocessor::new(preprocessor),
            activity: ActivityStateMachine::new(activity),
            statistics: StatisticsCalculator::new(zone_model),
            recording: None,
            last_fresh: None,
            previous_fresh: None,
        }
    }

    /// Forwards every fresh reading to `recorder` under the given session
    pub fn with_recorder(mut self, recorder: SampleRecorder, session_id: Uuid, athlete_id: Uuid) -> Self {
        self.recording = Some(Recording {
            recorder,
            session_id,
            athlete_id,
        });
        self
    }

    pub fn process(&mut self, sample: &ResampledSample) -> ActivitySnapshot {
        let processed = self.preprocessor.process(&InputSample::from(*sample));
        self.statistics.ingest(&processed);

        if !processed.is_stale && processed.best_bpm().is_some() {
            self.previous_fresh = self.last_fresh.replace(processed);
        }

        if let (Some(recording), Some(bpm), false) = (&self.recording, sample.bpm, sample.is_stale) {
            let record = HeartRateRecord::new(
                recording.session_id,
                recording.athlete_id,
                sample.timestamp,
                bpm.round() as i32,
            );
            if let Err(e) = recording.recorder.record(record) {
                log::error!("{}", e);
            }
        }

        self.activity.process(&processed)
    }

    /// Running summary, crediting the latest reading with the spacing of the
    /// last two fresh readings
    pub fn statistics(&self) -> HeartRateStatistics {
        let final_duration = match (&self.last_fresh, &self.previous_fresh) {
            (None, _) => 0.0,
            (Some(_), None) => 1.0,
            (Some(last), Some(previous)) => {
                let spacing = seconds_between(last.timestamp, previous.timestamp);
                if spacing > 0.0 {
                    spacing
                } else {
                    1.0
                }
            }
        };
        self.statistics.make_summary(final_duration)
    }

    pub fn reset(&mut self) {
        self.preprocessor.reset();
        self.activity.reset();
        self.statistics.reset();
        self.last_fresh = None;
        self.previous_fresh = None;
    }
}
