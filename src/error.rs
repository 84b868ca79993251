//! # Error Types Module
//!
//! Centralized error handling for LanePulse.
//! One error enum per concern, each with a human readable `Display` and
//! error chaining through `source()` where an underlying error exists.
//!
//! ## Error Types
//! - `ConnectionError`: hardware adapter and runtime failures, carried inside
//!   `ConnectionState::Disconnected` rather than returned
//! - `ConfigError`: configuration file I/O, parsing and validation
//! - `ZoneModelError`: malformed zone boundaries
//! - `AnalyticsError`: caller-facing validation of analytics input
//! - `TelemetryError`: malformed telemetry packets at the parsing boundary
//! - `RecorderError`: persistence boundary failures
//!
//! Numeric edge cases (empty windows, missing bpm, zero durations) are not
//! errors anywhere in the crate; they surface as `None`.

use std::fmt;
use uuid::Uuid;

/// Errors reported by hardware adapters or the connection runtime
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Failed to create Tokio runtime
    RuntimeCreation(String),
    /// Bluetooth adapter not found or not available
    NoAdapter,
    /// Failed to connect to specific device
    DeviceConnection { device_id: String, reason: String },
    /// Transport level failure after the link was established
    Transport(String),
    /// Connection was interrupted
    Interrupted,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
            ConnectionError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            ConnectionError::DeviceConnection { device_id, reason } => {
                write!(f, "Failed to connect to device {}: {}", device_id, reason)
            }
            ConnectionError::Transport(msg) => {
                write!(f, "Transport failure: {}", msg)
            }
            ConnectionError::Interrupted => {
                write!(f, "Connection was interrupted")
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
    /// Values parsed but are out of range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
            ConfigError::Invalid(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Zone boundaries that violate the ascending invariant
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneModelError {
    /// Boundary at `index` is not strictly greater than its predecessor
    NotAscending { index: usize },
    /// Boundary at `index` is NaN or infinite
    NonFinite { index: usize },
}

impl fmt::Display for ZoneModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneModelError::NotAscending { index } => {
                write!(f, "Zone boundary #{} is not strictly ascending", index)
            }
            ZoneModelError::NonFinite { index } => {
                write!(f, "Zone boundary #{} is not a finite number", index)
            }
        }
    }
}

impl std::error::Error for ZoneModelError {}

/// Input validation failures from `AnalyticsAggregator::evaluate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    /// No sessions were supplied
    NoSessions,
    /// A session carried zero samples
    EmptySamples { session_id: Uuid },
}

impl fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsError::NoSessions => write!(f, "No sessions to evaluate"),
            AnalyticsError::EmptySamples { session_id } => {
                write!(f, "Session {} has no samples", session_id)
            }
        }
    }
}

impl std::error::Error for AnalyticsError {}

/// Malformed telemetry input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// Payload is not JSON, or not an object / array of objects
    InvalidJson(String),
    /// A required field is absent or has the wrong shape
    MissingField(&'static str),
    /// Comma separated BLE payload could not be decoded
    InvalidPayload,
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::InvalidJson(msg) => write!(f, "Invalid telemetry JSON: {}", msg),
            TelemetryError::MissingField(field) => {
                write!(f, "Telemetry field missing or invalid: {}", field)
            }
            TelemetryError::InvalidPayload => write!(f, "Invalid BLE telemetry payload"),
        }
    }
}

impl std::error::Error for TelemetryError {}

/// Errors at the persistence boundary
#[derive(Debug)]
pub enum RecorderError {
    /// The external sink rejected a batch
    Sink(String),
    /// Pending store file could not be read or written
    PendingStore(std::io::Error),
    /// Pending store content could not be encoded or decoded
    Encoding(serde_json::Error),
    /// The writer thread is gone
    WriterStopped,
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Sink(msg) => write!(f, "Failed to persist heart rate batch: {}", msg),
            RecorderError::PendingStore(e) => write!(f, "Pending sample store I/O failed: {}", e),
            RecorderError::Encoding(e) => write!(f, "Pending sample store encoding failed: {}", e),
            RecorderError::WriterStopped => write!(f, "Recorder writer thread has stopped"),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::PendingStore(e) => Some(e),
            RecorderError::Encoding(e) => Some(e),
            _ => None,
        }
    }
}
