use lanepulse::adapter::HardwareAdapter;
use lanepulse::config::Config;
use lanepulse::connection::ConnectionManager;
use lanepulse::controller::{ConnectionController, ControllerUpdate};
use lanepulse::latency::LatencyMonitor;
use lanepulse::monitor::ActivityMonitor;
use lanepulse::recorder::{HeartRateRecord, RecordSink, RecorderOptions, SampleRecorder};
use lanepulse::simulated::SimulatedAdapter;
use lanepulse::stream::StreamCoordinator;
use lanepulse::RecorderError;
use chrono::Utc;
use std::thread;
use uuid::Uuid;

/// Sink used when no storage backend is wired in: batches only show up in the log
struct LogSink;

impl RecordSink for LogSink {
    fn write_batch(&mut self, records: &[HeartRateRecord]) -> Result<(), RecorderError> {
        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            log::info!(
                "Recorded {} heart rate samples ({} .. {})",
                records.len(),
                first.timestamp.to_rfc3339(),
                last.timestamp.to_rfc3339()
            );
        }
        Ok(())
    }
}

fn build_adapters(use_bluetooth: bool) -> Vec<Box<dyn HardwareAdapter>> {
    #[cfg(feature = "bluetooth")]
    if use_bluetooth {
        return vec![Box::new(lanepulse::bluetooth::BluetoothAdapter::new())];
    }
    #[cfg(not(feature = "bluetooth"))]
    if use_bluetooth {
        log::warn!("Built without the `bluetooth` feature, using the simulated strap");
    }
    vec![Box::new(SimulatedAdapter::default())]
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default configuration", e);
            Config::default()
        }
    };
    let activity_config = match config.activity_config() {
        Ok(activity) => activity,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };

    let use_bluetooth = std::env::args().any(|arg| arg == "--bluetooth");
    let controller = ConnectionController::new(
        build_adapters(use_bluetooth),
        StreamCoordinator::with_interval(config.resample_interval()),
        config.reconnect_policy(),
    );
    let (manager, handle) = ConnectionManager::new(controller);
    let updates = handle.updates();

    let manager_thread = match manager.spawn_on_thread() {
        Ok(thread) => thread,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };

    // Consume updates on their own thread so Ctrl-C handling stays responsive
    let monitor_handle = handle.clone();
    let recorder = SampleRecorder::new(
        LogSink,
        RecorderOptions {
            max_batch_size: config.recorder.max_batch_size,
            pending_store_path: config.recorder.pending_store_path.clone(),
        },
    );
    let session_id = Uuid::new_v4();
    let athlete_id = Uuid::new_v4();
    let mut monitor = ActivityMonitor::new(config.preprocessor, activity_config)
        .with_recorder(recorder, session_id, athlete_id);
    let mut latency = LatencyMonitor::new(config.latency_thresholds(), config.latency.report_path.clone());

    let monitor_thread = thread::spawn(move || {
        let mut connecting = false;
        for update in updates {
            match update {
                ControllerUpdate::Devices(devices) => {
                    if let (false, Some(device)) = (connecting, devices.first()) {
                        connecting = true;
                        let _ = monitor_handle.stop_scanning();
                        let _ = monitor_handle.connect(device.clone());
                    }
                }
                ControllerUpdate::State(state) => log::info!("Connection {}", state),
                ControllerUpdate::Scanning(scanning) => log::debug!("Scanning: {}", scanning),
                ControllerUpdate::Sample(sample) => {
                    let lag = (Utc::now() - sample.timestamp).num_milliseconds() as f64 / 1000.0;
                    latency.record_latency(session_id, "resampled", sample.timestamp, lag);

                    let snapshot = monitor.process(&sample);
                    log::info!(
                        "bpm={} stale={} state={:?} zone={:?} recovery={:?}",
                        sample.bpm.map_or("-".to_string(), |bpm| format!("{:.0}", bpm)),
                        sample.is_stale,
                        snapshot.state,
                        snapshot.zone,
                        snapshot.recovery_slope_bpm_per_minute
                    );
                }
            }
        }
        monitor
    });

    if let Err(e) = handle.start_scanning() {
        log::error!("{}", e);
    }

    wait_for_ctrl_c();
    log::info!("Shutting down");
    handle.shutdown();
    let _ = manager_thread.join();

    match monitor_thread.join() {
        Ok(monitor) => {
            let statistics = monitor.statistics();
            log::info!(
                "Session {}: avg={:?} max={:?} min={:?} duration={:.0}s zones={:?}",
                session_id,
                statistics.average_bpm,
                statistics.max_bpm,
                statistics.min_bpm,
                statistics.total_duration,
                statistics.time_in_zones
            );
        }
        Err(_) => log::error!("Monitor thread panicked"),
    }
}

fn wait_for_ctrl_c() {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to create signal runtime: {}", e);
            return;
        }
    };
    if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
        log::error!("Failed to listen for Ctrl-C: {}", e);
    }
}
