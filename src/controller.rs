//! # Connection Controller
//!
//! The connection state machine: scanning, connecting, streaming, stale
//! detection and bounded automatic reconnection.
//!
//! `ConnectionController` is plain synchronous state. It never sleeps and
//! never spawns; the async host (`ConnectionManager`) feeds it commands,
//! adapter events, resampler ticks and reconnect deadlines one at a time,
//! which is what keeps every transition serialized.
//!
//! ## Reconnect accounting
//! A stale episode (`stale_emission_threshold` consecutive stale ticks) or a
//! failed connect costs one attempt. Attempts survive the reconnect itself
//! and are only given back once a fresh reading arrives, so a sensor that
//! links up but never delivers data exhausts the budget and the controller
//! ends `Disconnected`.

use crate::adapter::{AdapterEvent, AdapterId, AdapterSink, Device, HardwareAdapter};
use crate::error::ConnectionError;
use crate::samples::{ResampledSample, Timestamp};
use crate::stream::{StreamCoordinator, StreamEmission};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting(Device),
    Connected(Device),
    Streaming(Device),
    Stale { device: Device, since: Timestamp },
    Reconnecting { device: Device, attempt: u32 },
    Disconnected {
        device: Option<Device>,
        error: Option<ConnectionError>,
    },
}

impl ConnectionState {
    pub fn device(&self) -> Option<&Device> {
        match self {
            ConnectionState::Idle | ConnectionState::Scanning => None,
            ConnectionState::Connecting(device)
            | ConnectionState::Connected(device)
            | ConnectionState::Streaming(device)
            | ConnectionState::Stale { device, .. }
            | ConnectionState::Reconnecting { device, .. } => Some(device),
            ConnectionState::Disconnected { device, .. } => device.as_ref(),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connecting(device) => write!(f, "connecting to {}", device),
            ConnectionState::Connected(device) => write!(f, "connected to {}", device),
            ConnectionState::Streaming(device) => write!(f, "streaming from {}", device),
            ConnectionState::Stale { device, since } => {
                write!(f, "stale on {} since {}", device, since.to_rfc3339())
            }
            ConnectionState::Reconnecting { device, attempt } => {
                write!(f, "reconnecting to {} (attempt {})", device, attempt)
            }
            ConnectionState::Disconnected { device, error } => {
                write!(f, "disconnected")?;
                if let Some(device) = device {
                    write!(f, " from {}", device)?;
                }
                if let Some(error) = error {
                    write!(f, ": {}", error)?;
                }
                Ok(())
            }
        }
    }
}

/// Stale detection and reconnect limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub stale_emission_threshold: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            stale_emission_threshold: 3,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Observable changes, delivered to subscribers in the order they happen
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerUpdate {
    State(ConnectionState),
    Scanning(bool),
    Devices(Vec<Device>),
    Sample(ResampledSample),
}

/// Point-in-time view of everything a UI would render
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSnapshot {
    pub state: ConnectionState,
    pub is_scanning: bool,
    pub discovered_devices: Vec<Device>,
    pub last_resampled_sample: Option<ResampledSample>,
}

#[derive(Debug, Clone)]
struct PendingReconnect {
    adapter: AdapterId,
    device: Device,
    generation: u64,
}

pub struct ConnectionController {
    policy: ReconnectPolicy,
    adapters: Vec<Box<dyn HardwareAdapter>>,
    coordinator: StreamCoordinator,
    state: ConnectionState,
    is_scanning: bool,
    discovered: Vec<Device>,
    adapter_for_device: HashMap<String, AdapterId>,
    last_resampled: Option<ResampledSample>,
    current_device: Option<Device>,
    active_adapter: Option<AdapterId>,
    reconnect_attempts: u32,
    performing_reconnect: bool,
    reconnect_cycle: bool,
    should_maintain: bool,
    expected_disconnect: bool,
    pending_reconnect: Option<PendingReconnect>,
    reconnect_generation: u64,
    subscribers: Vec<Sender<ControllerUpdate>>,
}

impl ConnectionController {
    pub fn new(
        adapters: Vec<Box<dyn HardwareAdapter>>,
        coordinator: StreamCoordinator,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            policy,
            adapters,
            coordinator,
            state: ConnectionState::Idle,
            is_scanning: false,
            discovered: Vec::new(),
            adapter_for_device: HashMap::new(),
            last_resampled: None,
            current_device: None,
            active_adapter: None,
            reconnect_attempts: 0,
            performing_reconnect: false,
            reconnect_cycle: false,
            should_maintain: false,
            expected_disconnect: false,
            pending_reconnect: None,
            reconnect_generation: 0,
            subscribers: Vec::new(),
        }
    }

    /// Hands every adapter its sink, built by `make_sink` from the adapter id
    pub fn attach_sinks<F>(&mut self, make_sink: F)
    where
        F: Fn(AdapterId) -> AdapterSink,
    {
        for (index, adapter) in self.adapters.iter_mut().enumerate() {
            log::debug!("Attaching adapter {} as #{}", adapter.name(), index);
            adapter.attach(make_sink(AdapterId(index)));
        }
    }

    pub fn subscribe(&mut self) -> Receiver<ControllerUpdate> {
        let (sender, receiver) = unbounded();
        self.add_subscriber(sender);
        receiver
    }

    /// Subscribers that hang up are dropped on the next publish
    pub fn add_subscriber(&mut self, subscriber: Sender<ControllerUpdate>) {
        self.subscribers.push(subscriber);
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state.clone(),
            is_scanning: self.is_scanning,
            discovered_devices: self.discovered.clone(),
            last_resampled_sample: self.last_resampled,
        }
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    pub fn discovered_devices(&self) -> &[Device] {
        &self.discovered
    }

    pub fn last_resampled_sample(&self) -> Option<&ResampledSample> {
        self.last_resampled.as_ref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Whether the host should be ticking the stream
    pub fn stream_running(&self) -> bool {
        self.coordinator.is_running()
    }

    pub fn stream_interval(&self) -> Duration {
        self.coordinator.interval()
    }

    /// Generation of the scheduled reconnect, if one is waiting to fire
    pub fn pending_reconnect(&self) -> Option<u64> {
        self.pending_reconnect.as_ref().map(|pending| pending.generation)
    }

    pub fn start_scanning(&mut self) {
        if self.adapters.is_empty() {
            log::warn!("No hardware adapters registered, nothing to scan with");
            return;
        }
        if self.is_scanning {
            return;
        }
        log::info!("Starting device scan");
        for adapter in self.adapters.iter_mut() {
            adapter.start_scanning();
        }
        self.is_scanning = true;
        self.publish(ControllerUpdate::Scanning(true));
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Disconnected { .. }) {
            self.set_state(ConnectionState::Scanning);
        }
    }

    pub fn stop_scanning(&mut self) {
        if !self.is_scanning {
            return;
        }
        for adapter in self.adapters.iter_mut() {
            adapter.stop_scanning();
        }
        log::info!("Stopped device scan");
        self.is_scanning = false;
        self.publish(ControllerUpdate::Scanning(false));
        if self.state == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle);
        }
    }

    pub fn connect(&mut self, device: Device) {
        let adapter = self
            .adapter_for_device
            .get(&device.id)
            .copied()
            .or_else(|| (!self.adapters.is_empty()).then_some(AdapterId(0)))
            .filter(|adapter| adapter.0 < self.adapters.len());

        self.reconnect_attempts = 0;
        self.performing_reconnect = false;
        self.reconnect_cycle = false;
        self.expected_disconnect = false;
        self.pending_reconnect = None;

        let Some(adapter) = adapter else {
            log::error!("No adapter available to connect to {}", device);
            self.should_maintain = false;
            self.current_device = None;
            self.active_adapter = None;
            self.set_state(ConnectionState::Disconnected {
                device: Some(device),
                error: None,
            });
            return;
        };

        log::info!("Connecting to {}", device);
        self.should_maintain = true;
        self.current_device = Some(device.clone());
        self.active_adapter = Some(adapter);
        self.set_state(ConnectionState::Connecting(device.clone()));
        if let Some(hardware) = self.adapters.get_mut(adapter.0) {
            hardware.connect(&device);
        }
    }

    /// User initiated disconnect. Safe to call repeatedly. The state settles
    /// once the adapter reports the link is down.
    pub fn disconnect(&mut self) {
        self.pending_reconnect = None;
        let Some(device) = self.current_device.take() else {
            return;
        };

        log::info!("Disconnecting from {}", device);
        self.should_maintain = false;
        self.expected_disconnect = true;
        self.reconnect_attempts = 0;
        self.performing_reconnect = false;
        self.reconnect_cycle = false;
        self.coordinator.stop();
        self.coordinator.reset();

        if let Some(adapter) = self.active_adapter.take().and_then(|id| self.adapters.get_mut(id.0)) {
            adapter.cancel_heart_rate_streaming(&device);
            adapter.disconnect(Some(&device));
        }
    }

    pub fn subscribe_to_heart_rate(&mut self) {
        let (Some(device), Some(adapter)) = (self.current_device.clone(), self.active_adapter) else {
            log::warn!("Heart rate subscription requested without a connected device");
            return;
        };

        self.should_maintain = true;
        self.coordinator.start();
        if matches!(self.state, ConnectionState::Connected(_)) {
            self.set_state(ConnectionState::Streaming(device.clone()));
        }
        log::info!("Subscribing to heart rate on {}", device);
        if let Some(hardware) = self.adapters.get_mut(adapter.0) {
            hardware.subscribe_to_heart_rate(&device);
        }
    }

    /// Events from an adapter id that was never registered are dropped
    pub fn handle_adapter_event(&mut self, adapter: AdapterId, event: AdapterEvent) {
        if adapter.0 >= self.adapters.len() {
            log::warn!("Ignoring event from unknown adapter #{}: {:?}", adapter.0, event);
            return;
        }
        match event {
            AdapterEvent::Discovered(device) => self.record_discovery(adapter, device),
            AdapterEvent::ConnectStarted(device) => {
                self.current_device = Some(device.clone());
                self.active_adapter = Some(adapter);
                self.set_state(ConnectionState::Connecting(device));
            }
            AdapterEvent::Connected(device) => {
                log::info!("Connected to {}", device);
                self.current_device = Some(device.clone());
                self.active_adapter = Some(adapter);
                if !self.reconnect_cycle {
                    self.reconnect_attempts = 0;
                }
                self.performing_reconnect = false;
                self.expected_disconnect = false;
                self.coordinator.reset();
                self.set_state(ConnectionState::Connected(device));
                if self.should_maintain {
                    self.subscribe_to_heart_rate();
                }
            }
            AdapterEvent::ConnectFailed(device, error) => {
                match &error {
                    Some(error) => log::error!("Connecting to {} failed: {}", device, error),
                    None => log::error!("Connecting to {} failed", device),
                }
                self.reconnect_attempts += 1;
                self.handle_disconnect(adapter, device, error);
            }
            AdapterEvent::Disconnected(device, error) => {
                log::warn!("{} disconnected", device);
                if self.expected_disconnect {
                    self.expected_disconnect = false;
                    self.should_maintain = false;
                    self.current_device = None;
                    self.active_adapter = None;
                    self.set_state(ConnectionState::Disconnected {
                        device: Some(device),
                        error,
                    });
                } else {
                    self.handle_disconnect(adapter, device, error);
                }
            }
            AdapterEvent::HeartRate(sample, device) => {
                if self.current_device.as_ref() == Some(&device) {
                    self.coordinator.handle_incoming_sample(sample);
                } else {
                    log::trace!("Dropping reading from {}, not the current device", device);
                }
            }
        }
    }

    /// Drives one resampler tick. The host calls this every `stream_interval()`
    /// while `stream_running()`.
    pub fn on_tick(&mut self, now: Timestamp) {
        if let Some(emission) = self.coordinator.tick(now) {
            self.handle_emission(emission);
        }
    }

    /// Fires the reconnect scheduled under `generation`. Stale generations and
    /// reconnects cancelled in the meantime are ignored.
    pub fn on_reconnect_due(&mut self, generation: u64) {
        let Some(pending) = self.pending_reconnect.take() else {
            return;
        };
        if pending.generation != generation {
            self.pending_reconnect = Some(pending);
            return;
        }
        if !self.should_maintain {
            return;
        }

        log::info!(
            "Reconnecting to {} (attempt {}/{})",
            pending.device,
            self.reconnect_attempts,
            self.policy.max_reconnect_attempts
        );
        match self.adapters.get_mut(pending.adapter.0) {
            Some(adapter) => adapter.connect(&pending.device),
            None => self.abandon(pending.device),
        }
    }

    fn handle_emission(&mut self, emission: StreamEmission) {
        let sample = emission.sample;
        self.last_resampled = Some(sample);
        self.publish(ControllerUpdate::Sample(sample));

        let Some(device) = self.current_device.clone() else {
            return;
        };

        if sample.is_stale {
            if emission.consecutive_stale_count == 1 && matches!(self.state, ConnectionState::Streaming(_)) {
                log::warn!("Heart rate stream from {} went stale", device);
                self.set_state(ConnectionState::Stale {
                    device: device.clone(),
                    since: sample.timestamp,
                });
            }

            if self.should_maintain
                && !self.performing_reconnect
                && emission.consecutive_stale_count >= self.policy.stale_emission_threshold
                && self.reconnect_attempts < self.policy.max_reconnect_attempts
            {
                self.reconnect_attempts += 1;
                self.initiate_reconnect(device);
            }
        } else {
            if matches!(self.state, ConnectionState::Stale { .. } | ConnectionState::Connected(_)) {
                self.set_state(ConnectionState::Streaming(device));
            }
            if emission.consecutive_stale_count == 0 {
                self.reconnect_attempts = 0;
                self.reconnect_cycle = false;
            }
        }
    }

    fn initiate_reconnect(&mut self, device: Device) {
        let Some(adapter) = self.active_adapter else {
            return;
        };

        log::warn!(
            "No fresh data from {}, tearing down link (attempt {}/{})",
            device,
            self.reconnect_attempts,
            self.policy.max_reconnect_attempts
        );
        self.performing_reconnect = true;
        self.set_state(ConnectionState::Reconnecting {
            device: device.clone(),
            attempt: self.reconnect_attempts,
        });
        self.coordinator.stop();

        let Some(adapter) = self.adapters.get_mut(adapter.0) else {
            self.abandon(device);
            return;
        };
        adapter.cancel_heart_rate_streaming(&device);
        adapter.disconnect(Some(&device));
    }

    /// No adapter can serve `device` any more: stop maintaining the link
    fn abandon(&mut self, device: Device) {
        log::error!("No adapter available for {}", device);
        self.should_maintain = false;
        self.performing_reconnect = false;
        self.reconnect_cycle = false;
        self.expected_disconnect = false;
        self.pending_reconnect = None;
        self.current_device = None;
        self.active_adapter = None;
        self.coordinator.stop();
        self.coordinator.reset();
        self.set_state(ConnectionState::Disconnected {
            device: Some(device),
            error: None,
        });
    }

    fn handle_disconnect(&mut self, adapter: AdapterId, device: Device, error: Option<ConnectionError>) {
        self.coordinator.stop();
        self.coordinator.reset();
        self.set_state(ConnectionState::Disconnected {
            device: Some(device.clone()),
            error,
        });
        self.performing_reconnect = false;

        if self.should_maintain
            && !self.expected_disconnect
            && self.reconnect_attempts < self.policy.max_reconnect_attempts
        {
            self.reconnect_generation += 1;
            log::info!(
                "Scheduling reconnect to {} in {:?}",
                device,
                self.policy.reconnect_delay
            );
            self.reconnect_cycle = true;
            self.pending_reconnect = Some(PendingReconnect {
                adapter,
                device,
                generation: self.reconnect_generation,
            });
        } else {
            if self.should_maintain {
                log::error!(
                    "Giving up on {} after {} reconnect attempts",
                    device,
                    self.reconnect_attempts
                );
            }
            self.should_maintain = false;
            self.expected_disconnect = false;
            self.reconnect_cycle = false;
            self.current_device = None;
            self.active_adapter = None;
            self.pending_reconnect = None;
        }
    }

    fn record_discovery(&mut self, adapter: AdapterId, device: Device) {
        self.adapter_for_device.insert(device.id.clone(), adapter);
        match self.discovered.iter_mut().find(|known| **known == device) {
            Some(known) => *known = device,
            None => {
                log::info!("Discovered {}", device);
                self.discovered.push(device);
            }
        }
        self.discovered
            .sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        self.publish(ControllerUpdate::Devices(self.discovered.clone()));
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        log::debug!("Connection state: {} -> {}", self.state, state);
        self.state = state.clone();
        self.publish(ControllerUpdate::State(state));
    }

    fn publish(&mut self, update: ControllerUpdate) {
        self.subscribers
            .retain(|subscriber| subscriber.send(update.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::RawSample;
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        StartScanning,
        StopScanning,
        Connect(String),
        Disconnect(Option<String>),
        Subscribe(String),
        Cancel(String),
    }

    /// Records every call; events are fed back by the test itself
    struct RecordingAdapter {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl HardwareAdapter for RecordingAdapter {
        fn name(&self) -> &str {
            "recording"
        }

        fn attach(&mut self, _sink: AdapterSink) {}

        fn start_scanning(&mut self) {
            self.calls.lock().unwrap().push(Call::StartScanning);
        }

        fn stop_scanning(&mut self) {
            self.calls.lock().unwrap().push(Call::StopScanning);
        }

        fn connect(&mut self, device: &Device) {
            self.calls.lock().unwrap().push(Call::Connect(device.id.clone()));
        }

        fn disconnect(&mut self, device: Option<&Device>) {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Disconnect(device.map(|device| device.id.clone())));
        }

        fn subscribe_to_heart_rate(&mut self, device: &Device) {
            self.calls.lock().unwrap().push(Call::Subscribe(device.id.clone()));
        }

        fn cancel_heart_rate_streaming(&mut self, device: &Device) {
            self.calls.lock().unwrap().push(Call::Cancel(device.id.clone()));
        }
    }

    struct Harness {
        controller: ConnectionController,
        calls: Arc<Mutex<Vec<Call>>>,
        clock: i64,
    }

    impl Harness {
        fn new() -> Self {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let adapter = RecordingAdapter { calls: calls.clone() };
            let controller = ConnectionController::new(
                vec![Box::new(adapter)],
                StreamCoordinator::default(),
                ReconnectPolicy::default(),
            );
            Self {
                controller,
                calls,
                clock: 0,
            }
        }

        fn count(&self, call: &Call) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
        }

        fn event(&mut self, event: AdapterEvent) {
            self.controller.handle_adapter_event(AdapterId(0), event);
        }

        fn tick(&mut self) {
            self.clock += 1;
            self.controller.on_tick(Utc.timestamp_opt(self.clock, 0).unwrap());
        }

        fn reading(&mut self, bpm: i32) {
            let sample = RawSample::new(Utc.timestamp_opt(self.clock, 0).unwrap(), bpm);
            self.event(AdapterEvent::HeartRate(sample, strap()));
        }

        fn connect_and_stream(&mut self) {
            self.controller.connect(strap());
            self.event(AdapterEvent::Connected(strap()));
        }

        /// Three empty ticks, then the adapter confirms the teardown
        fn stale_episode(&mut self) {
            for _ in 0..3 {
                self.tick();
            }
            self.event(AdapterEvent::Disconnected(strap(), None));
        }

        fn fire_reconnect(&mut self) {
            let generation = self.controller.pending_reconnect().expect("reconnect scheduled");
            self.controller.on_reconnect_due(generation);
            self.event(AdapterEvent::Connected(strap()));
        }
    }

    fn strap() -> Device {
        Device::new("strap-1", "Polar H10", Some(-50))
    }

    #[test]
    fn test_connect_then_connected_streams() {
        let mut harness = Harness::new();
        let updates = harness.controller.subscribe();

        harness.connect_and_stream();
        assert_eq!(*harness.controller.connection_state(), ConnectionState::Streaming(strap()));
        assert!(harness.controller.stream_running());
        assert_eq!(harness.count(&Call::Connect("strap-1".into())), 1);
        assert_eq!(harness.count(&Call::Subscribe("strap-1".into())), 1);

        let states: Vec<ConnectionState> = updates
            .try_iter()
            .filter_map(|update| match update {
                ControllerUpdate::State(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting(strap()),
                ConnectionState::Connected(strap()),
                ConnectionState::Streaming(strap()),
            ]
        );
    }

    #[test]
    fn test_readings_reach_the_stream() {
        let mut harness = Harness::new();
        harness.connect_and_stream();
        harness.reading(80);
        harness.reading(90);
        harness.tick();

        let sample = harness.controller.last_resampled_sample().unwrap();
        assert_eq!(sample.bpm, Some(85.0));
        assert!(!sample.is_stale);

        let other = Device::new("someone-else", "Other", None);
        let sample = RawSample::new(Utc.timestamp_opt(1, 0).unwrap(), 200);
        harness.event(AdapterEvent::HeartRate(sample, other));
        harness.tick();
        assert_eq!(harness.controller.last_resampled_sample().unwrap().bpm, Some(85.0));
    }

    #[test]
    fn test_stale_then_reconnect_after_threshold() {
        let mut harness = Harness::new();
        harness.connect_and_stream();
        harness.reading(100);
        harness.tick();

        harness.tick();
        assert!(matches!(
            harness.controller.connection_state(),
            ConnectionState::Stale { .. }
        ));
        harness.tick();
        assert_eq!(harness.count(&Call::Cancel("strap-1".into())), 0);
        harness.tick();

        assert_eq!(
            *harness.controller.connection_state(),
            ConnectionState::Reconnecting {
                device: strap(),
                attempt: 1
            }
        );
        assert_eq!(harness.count(&Call::Cancel("strap-1".into())), 1);
        assert_eq!(harness.count(&Call::Disconnect(Some("strap-1".into()))), 1);
        assert!(!harness.controller.stream_running());

        harness.event(AdapterEvent::Disconnected(strap(), None));
        assert!(harness.controller.pending_reconnect().is_some());
        harness.fire_reconnect();
        assert_eq!(harness.count(&Call::Connect("strap-1".into())), 2);
        assert_eq!(*harness.controller.connection_state(), ConnectionState::Streaming(strap()));
    }

    #[test]
    fn test_fresh_reading_returns_to_streaming_and_refunds_attempts() {
        let mut harness = Harness::new();
        harness.connect_and_stream();
        harness.stale_episode();
        harness.fire_reconnect();
        assert_eq!(harness.controller.reconnect_attempts(), 1);

        harness.tick();
        assert!(matches!(
            harness.controller.connection_state(),
            ConnectionState::Stale { .. }
        ));
        harness.reading(110);
        harness.tick();
        assert_eq!(*harness.controller.connection_state(), ConnectionState::Streaming(strap()));
        assert_eq!(harness.controller.reconnect_attempts(), 0);
    }

    #[test]
    fn test_reconnect_cap_ends_disconnected() {
        let mut harness = Harness::new();
        harness.connect_and_stream();

        harness.stale_episode();
        harness.fire_reconnect();
        harness.stale_episode();
        harness.fire_reconnect();
        harness.stale_episode();

        assert_eq!(
            *harness.controller.connection_state(),
            ConnectionState::Disconnected {
                device: Some(strap()),
                error: None
            }
        );
        assert_eq!(harness.controller.pending_reconnect(), None);
        assert!(!harness.controller.stream_running());
        assert_eq!(harness.count(&Call::Connect("strap-1".into())), 3);

        for _ in 0..5 {
            harness.tick();
        }
        assert_eq!(harness.count(&Call::Connect("strap-1".into())), 3);
        assert!(matches!(
            harness.controller.connection_state(),
            ConnectionState::Disconnected { .. }
        ));
    }

    #[test]
    fn test_disconnect_cancels_pending_reconnect() {
        let mut harness = Harness::new();
        harness.connect_and_stream();
        harness.stale_episode();
        let generation = harness.controller.pending_reconnect().unwrap();

        harness.controller.disconnect();
        assert_eq!(harness.controller.pending_reconnect(), None);
        harness.controller.on_reconnect_due(generation);
        assert_eq!(harness.count(&Call::Connect("strap-1".into())), 1);
    }

    #[test]
    fn test_user_disconnect_is_idempotent_and_not_retried() {
        let mut harness = Harness::new();
        harness.connect_and_stream();

        harness.controller.disconnect();
        harness.controller.disconnect();
        assert_eq!(harness.count(&Call::Disconnect(Some("strap-1".into()))), 1);
        assert!(!harness.controller.stream_running());

        harness.event(AdapterEvent::Disconnected(strap(), None));
        assert_eq!(
            *harness.controller.connection_state(),
            ConnectionState::Disconnected {
                device: Some(strap()),
                error: None
            }
        );
        assert_eq!(harness.controller.pending_reconnect(), None);
    }

    #[test]
    fn test_connect_failure_schedules_retry() {
        let mut harness = Harness::new();
        harness.controller.connect(strap());
        let error = ConnectionError::DeviceConnection {
            device_id: "strap-1".into(),
            reason: "timeout".into(),
        };
        harness.event(AdapterEvent::ConnectFailed(strap(), Some(error.clone())));

        assert_eq!(harness.controller.reconnect_attempts(), 1);
        assert_eq!(
            *harness.controller.connection_state(),
            ConnectionState::Disconnected {
                device: Some(strap()),
                error: Some(error)
            }
        );
        assert!(harness.controller.pending_reconnect().is_some());
    }

    #[test]
    fn test_connect_without_adapters_disconnects_immediately() {
        let mut controller =
            ConnectionController::new(Vec::new(), StreamCoordinator::default(), ReconnectPolicy::default());
        controller.connect(strap());
        assert_eq!(
            *controller.connection_state(),
            ConnectionState::Disconnected {
                device: Some(strap()),
                error: None
            }
        );
        assert_eq!(controller.pending_reconnect(), None);
    }

    #[test]
    fn test_discovered_devices_sorted_by_name() {
        let mut harness = Harness::new();
        harness.controller.start_scanning();
        assert!(harness.controller.is_scanning());
        assert_eq!(*harness.controller.connection_state(), ConnectionState::Scanning);

        harness.event(AdapterEvent::Discovered(Device::new("b", "zephyr", None)));
        harness.event(AdapterEvent::Discovered(Device::new("a", "Polar H10", None)));
        harness.event(AdapterEvent::Discovered(Device::new("c", "garmin HRM", None)));
        harness.event(AdapterEvent::Discovered(Device::new("a", "Polar H10", Some(-30))));

        let names: Vec<&str> = harness
            .controller
            .discovered_devices()
            .iter()
            .map(|device| device.name.as_str())
            .collect();
        assert_eq!(names, vec!["garmin HRM", "Polar H10", "zephyr"]);
        assert_eq!(harness.controller.discovered_devices()[1].rssi, Some(-30));

        harness.controller.stop_scanning();
        assert!(!harness.controller.is_scanning());
        assert_eq!(*harness.controller.connection_state(), ConnectionState::Idle);
        assert_eq!(harness.count(&Call::StopScanning), 1);
    }

    #[test]
    fn test_scanning_toggles_are_idempotent() {
        let mut harness = Harness::new();
        let updates = harness.controller.subscribe();

        harness.controller.stop_scanning();
        harness.controller.start_scanning();
        harness.controller.start_scanning();
        harness.controller.stop_scanning();
        harness.controller.stop_scanning();

        assert_eq!(harness.count(&Call::StartScanning), 1);
        assert_eq!(harness.count(&Call::StopScanning), 1);
        let scanning: Vec<bool> = updates
            .try_iter()
            .filter_map(|update| match update {
                ControllerUpdate::Scanning(scanning) => Some(scanning),
                _ => None,
            })
            .collect();
        assert_eq!(scanning, vec![true, false]);
    }

    #[test]
    fn test_unknown_adapter_events_are_ignored() {
        let mut harness = Harness::new();
        harness
            .controller
            .handle_adapter_event(AdapterId(3), AdapterEvent::Discovered(strap()));
        assert!(harness.controller.discovered_devices().is_empty());

        harness.controller.connect(strap());
        assert_eq!(
            *harness.controller.connection_state(),
            ConnectionState::Connecting(strap())
        );
        assert_eq!(harness.count(&Call::Connect("strap-1".into())), 1);

        harness
            .controller
            .handle_adapter_event(AdapterId(3), AdapterEvent::Disconnected(strap(), None));
        assert_eq!(
            *harness.controller.connection_state(),
            ConnectionState::Connecting(strap())
        );
    }

    #[test]
    fn test_snapshot_tracks_state() {
        let mut harness = Harness::new();
        harness.connect_and_stream();
        harness.reading(72);
        harness.tick();

        let snapshot = harness.controller.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Streaming(strap()));
        assert_eq!(snapshot.last_resampled_sample.unwrap().bpm, Some(72.0));
        assert!(!snapshot.is_scanning);
    }

    #[test]
    fn test_state_display() {
        let state = ConnectionState::Reconnecting {
            device: strap(),
            attempt: 2,
        };
        assert_eq!(state.to_string(), "reconnecting to Polar H10 [strap-1] (attempt 2)");
        let state = ConnectionState::Disconnected {
            device: None,
            error: Some(ConnectionError::Interrupted),
        };
        assert_eq!(state.to_string(), "disconnected: Connection was interrupted");
    }
}
