//! Synthetic heart rate strap.
//!
//! Discovers a single virtual device, connects after a short delay and
//! streams one reading per second following an effort/recovery curve. An
//! optional dropout makes the strap fall silent so stale detection and
//! reconnects can be exercised without hardware.
//!
//! Methods spawn onto the current Tokio runtime and must be called from
//! inside it (the `ConnectionManager` task does this).

use crate::adapter::{AdapterSink, Device, HardwareAdapter};
use crate::error::ConnectionError;
use crate::samples::RawSample;
use chrono::Utc;
use std::f64::consts::PI;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationScript {
    pub resting_bpm: f64,
    pub peak_bpm: f64,
    /// Seconds for one full effort and recovery cycle
    pub cycle_secs: f64,
    /// Readings sent per subscription before the strap goes quiet
    pub dropout_after: Option<u32>,
    pub reading_interval: Duration,
    pub connect_delay: Duration,
}

impl Default for SimulationScript {
    fn default() -> Self {
        Self {
            resting_bpm: 72.0,
            peak_bpm: 168.0,
            cycle_secs: 120.0,
            dropout_after: None,
            reading_interval: Duration::from_secs(1),
            connect_delay: Duration::from_millis(250),
        }
    }
}

impl SimulationScript {
    /// Raised cosine between resting and peak, starting at rest
    pub fn bpm_at(&self, elapsed_secs: f64) -> i32 {
        let phase = if self.cycle_secs > 0.0 {
            2.0 * PI * elapsed_secs / self.cycle_secs
        } else {
            0.0
        };
        let effort = 0.5 - 0.5 * phase.cos();
        (self.resting_bpm + (self.peak_bpm - self.resting_bpm) * effort).round() as i32
    }
}

pub struct SimulatedAdapter {
    device: Device,
    script: SimulationScript,
    sink: Option<AdapterSink>,
    connecting: Option<JoinHandle<()>>,
    streaming: Option<JoinHandle<()>>,
    connected: bool,
}

impl SimulatedAdapter {
    pub fn new(script: SimulationScript) -> Self {
        Self {
            device: Device::new("sim-0001", "LanePulse Sim Strap", Some(-42)),
            script,
            sink: None,
            connecting: None,
            streaming: None,
            connected: false,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(task) = self.streaming.take() {
            task.abort();
        }
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new(SimulationScript::default())
    }
}

impl HardwareAdapter for SimulatedAdapter {
    fn name(&self) -> &str {
        "simulated"
    }

    fn attach(&mut self, sink: AdapterSink) {
        self.sink = Some(sink);
    }

    fn start_scanning(&mut self) {
        if let Some(sink) = &self.sink {
            sink.discovered(self.device.clone());
        }
    }

    fn stop_scanning(&mut self) {}

    fn connect(&mut self, device: &Device) {
        let Some(sink) = self.sink.clone() else {
            log::warn!("Simulated adapter used before being attached");
            return;
        };

        if *device != self.device {
            sink.connect_failed(
                device.clone(),
                Some(ConnectionError::DeviceConnection {
                    device_id: device.id.clone(),
                    reason: "unknown simulated device".to_string(),
                }),
            );
            return;
        }

        self.abort_tasks();
        sink.connect_started(device.clone());
        let device = device.clone();
        let delay = self.script.connect_delay;
        self.connecting = Some(tokio::spawn(async move {
            sleep(delay).await;
            sink.connected(device);
        }));
        self.connected = true;
    }

    fn disconnect(&mut self, device: Option<&Device>) {
        self.abort_tasks();
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Some(sink) = &self.sink {
            let device = device.cloned().unwrap_or_else(|| self.device.clone());
            sink.disconnected(device, None);
        }
    }

    fn subscribe_to_heart_rate(&mut self, device: &Device) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        if let Some(task) = self.streaming.take() {
            task.abort();
        }

        let device = device.clone();
        let script = self.script.clone();
        self.streaming = Some(tokio::spawn(async move {
            let mut ticker = interval(script.reading_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let started = tokio::time::Instant::now();
            let mut sent = 0u32;
            loop {
                ticker.tick().await;
                if script.dropout_after.map_or(false, |limit| sent >= limit) {
                    log::debug!("Simulated strap went quiet after {} readings", sent);
                    break;
                }
                let bpm = script.bpm_at(started.elapsed().as_secs_f64());
                sink.heart_rate(RawSample::new(Utc::now(), bpm), device.clone());
                sent += 1;
            }
        }));
    }

    fn cancel_heart_rate_streaming(&mut self, _device: &Device) {
        if let Some(task) = self.streaming.take() {
            task.abort();
        }
    }
}

impl Drop for SimulatedAdapter {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
