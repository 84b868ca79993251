//! # LanePulse
//!
//! Heart rate pipeline for coaching: sensor connection management, fixed
//! rate resampling with stale detection, smoothing and trend, activity
//! detection, zone statistics and cross-session analytics.
//!
//! ## Data Flow
//! ```text
//! HardwareAdapter ─► ConnectionController ─► StreamCoordinator/Resampler
//!                                                    │ ResampledSample
//!                                                    ▼
//!                      ActivityMonitor: Preprocessor ─► ActivityStateMachine
//!                                                   └─► StatisticsCalculator
//!
//! recorded sessions ─► AnalyticsAggregator ─► AnalyticsSummary
//! ```

pub mod activity;
pub mod adapter;
pub mod analytics;
#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod latency;
pub mod monitor;
pub mod preprocessor;
pub mod recorder;
pub mod resampler;
pub mod samples;
pub mod simulated;
pub mod statistics;
pub mod stream;
pub mod telemetry;
pub mod zones;

pub use activity::{ActivityDetectionConfig, ActivitySnapshot, ActivityState, ActivityStateMachine};
pub use adapter::{AdapterEvent, AdapterId, AdapterSink, Device, HardwareAdapter};
pub use analytics::{AnalyticsAggregator, AnalyticsSummary, SessionDescriptor};
pub use config::Config;
pub use connection::{ConnectionCommand, ConnectionManager, ManagerHandle};
pub use controller::{ConnectionController, ConnectionState, ControllerSnapshot, ControllerUpdate, ReconnectPolicy};
pub use error::{AnalyticsError, ConfigError, ConnectionError, RecorderError, TelemetryError, ZoneModelError};
pub use monitor::ActivityMonitor;
pub use preprocessor::{Preprocessor, PreprocessorConfig};
pub use resampler::Resampler;
pub use samples::{InputSample, ProcessedSample, RawSample, ResampledSample, Timestamp};
pub use statistics::{HeartRateStatistics, StatisticsAccumulator, StatisticsCalculator};
pub use stream::{StreamCoordinator, StreamEmission};
pub use zones::ZoneModel;
