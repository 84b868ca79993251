//! # Bluetooth LE Adapter
//!
//! `HardwareAdapter` over btleplug for any strap exposing the standard Heart
//! Rate service.
//!
//! ## Structure
//! btleplug is async, the adapter trait is not. Requests are queued to a
//! worker task that owns the BLE central; a second task follows central
//! events and reports discoveries and link loss. Both are spawned on first
//! use, from inside the connection manager's runtime.

use crate::adapter::{AdapterSink, Device, HardwareAdapter};
use crate::error::ConnectionError;
use crate::samples::RawSample;
use crate::telemetry::{parse_heart_rate_measurement, HEART_RATE_MEASUREMENT_UUID16, HEART_RATE_SERVICE_UUID16};
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::Utc;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
enum BleRequest {
    StartScan,
    StopScan,
    Connect(Device),
    Disconnect(Option<Device>),
    Subscribe(Device),
    Cancel(Device),
}

/// Address of the peripheral we hold a link to, shared with the event watcher
type LinkedDevice = Arc<Mutex<Option<Device>>>;

#[derive(Default)]
pub struct BluetoothAdapter {
    sink: Option<AdapterSink>,
    requests: Option<mpsc::UnboundedSender<BleRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl BluetoothAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn request(&mut self, request: BleRequest) {
        let Some(sink) = self.sink.clone() else {
            log::warn!("Bluetooth adapter used before being attached");
            return;
        };

        let sender = self.requests.get_or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            self.worker = Some(tokio::spawn(run_worker(sink, receiver)));
            sender
        });
        if sender.send(request).is_err() {
            log::error!("Bluetooth worker has stopped");
        }
    }
}

impl HardwareAdapter for BluetoothAdapter {
    fn name(&self) -> &str {
        "bluetooth"
    }

    fn attach(&mut self, sink: AdapterSink) {
        self.sink = Some(sink);
    }

    fn start_scanning(&mut self) {
        self.request(BleRequest::StartScan);
    }

    fn stop_scanning(&mut self) {
        self.request(BleRequest::StopScan);
    }

    fn connect(&mut self, device: &Device) {
        self.request(BleRequest::Connect(device.clone()));
    }

    fn disconnect(&mut self, device: Option<&Device>) {
        self.request(BleRequest::Disconnect(device.cloned()));
    }

    fn subscribe_to_heart_rate(&mut self, device: &Device) {
        self.request(BleRequest::Subscribe(device.clone()));
    }

    fn cancel_heart_rate_streaming(&mut self, device: &Device) {
        self.request(BleRequest::Cancel(device.clone()));
    }
}

impl Drop for BluetoothAdapter {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn first_central() -> Result<Adapter, ConnectionError> {
    let manager = Manager::new()
        .await
        .map_err(|e| ConnectionError::Transport(format!("Failed to create BLE manager: {}", e)))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| ConnectionError::Transport(format!("Failed to get adapters: {}", e)))?;

    adapters.into_iter().next().ok_or(ConnectionError::NoAdapter)
}

async fn run_worker(sink: AdapterSink, mut requests: mpsc::UnboundedReceiver<BleRequest>) {
    let central = match first_central().await {
        Ok(central) => central,
        Err(e) => {
            log::error!("{}", e);
            while let Some(request) = requests.recv().await {
                if let BleRequest::Connect(device) = request {
                    sink.connect_failed(device, Some(e.clone()));
                }
            }
            return;
        }
    };

    let linked: LinkedDevice = Arc::new(Mutex::new(None));
    let watcher = tokio::spawn(watch_central(central.clone(), sink.clone(), linked.clone()));
    let mut streaming: Option<JoinHandle<()>> = None;

    while let Some(request) = requests.recv().await {
        match request {
            BleRequest::StartScan => {
                let filter = ScanFilter {
                    services: vec![uuid_from_u16(HEART_RATE_SERVICE_UUID16)],
                };
                if let Err(e) = central.start_scan(filter).await {
                    log::error!("Failed to start scan: {}", e);
                }
            }
            BleRequest::StopScan => {
                if let Err(e) = central.stop_scan().await {
                    log::warn!("Failed to stop scan: {}", e);
                }
            }
            BleRequest::Connect(device) => {
                sink.connect_started(device.clone());
                match connect_peripheral(&central, &device).await {
                    Ok(()) => {
                        set_linked(&linked, Some(device.clone()));
                        sink.connected(device);
                    }
                    Err(e) => sink.connect_failed(device, Some(e)),
                }
            }
            BleRequest::Subscribe(device) => {
                if let Some(task) = streaming.take() {
                    task.abort();
                }
                match subscribe(&central, &device, sink.clone()).await {
                    Ok(task) => streaming = Some(task),
                    Err(e) => log::error!("Heart rate subscription on {} failed: {}", device, e),
                }
            }
            BleRequest::Cancel(device) => {
                if let Some(task) = streaming.take() {
                    task.abort();
                }
                if let Ok(peripheral) = find_peripheral(&central, &device).await {
                    for characteristic in peripheral.characteristics() {
                        if characteristic.uuid == uuid_from_u16(HEART_RATE_MEASUREMENT_UUID16) {
                            let _ = peripheral.unsubscribe(&characteristic).await;
                        }
                    }
                }
            }
            BleRequest::Disconnect(device) => {
                if let Some(task) = streaming.take() {
                    task.abort();
                }
                let target = device.or_else(|| linked_device(&linked));
                set_linked(&linked, None);
                let Some(device) = target else {
                    continue;
                };
                if let Ok(peripheral) = find_peripheral(&central, &device).await {
                    if let Err(e) = peripheral.disconnect().await {
                        log::warn!("Disconnecting {} failed: {}", device, e);
                    }
                }
                sink.disconnected(device, None);
            }
        }
    }

    watcher.abort();
}

/// Reports discoveries and unexpected link loss
async fn watch_central(central: Adapter, sink: AdapterSink, linked: LinkedDevice) {
    let mut events = match central.events().await {
        Ok(events) => events,
        Err(e) => {
            log::error!("Failed to follow BLE events: {}", e);
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = central.peripheral(&id).await else {
                    continue;
                };
                if let Ok(Some(props)) = peripheral.properties().await {
                    let name = display_name(props.local_name);
                    sink.discovered(Device::new(peripheral.address().to_string(), name, props.rssi));
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let Ok(peripheral) = central.peripheral(&id).await else {
                    continue;
                };
                let address = peripheral.address().to_string();
                let lost = {
                    let Ok(mut guard) = linked.lock() else {
                        continue;
                    };
                    match guard.as_ref() {
                        Some(device) if device.id == address => guard.take(),
                        _ => None,
                    }
                };
                if let Some(device) = lost {
                    sink.disconnected(device, Some(ConnectionError::Interrupted));
                }
            }
            _ => {}
        }
    }
}

async fn find_peripheral(central: &Adapter, device: &Device) -> Result<Peripheral, ConnectionError> {
    let peripherals = central
        .peripherals()
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;

    peripherals
        .into_iter()
        .find(|peripheral| peripheral.address().to_string() == device.id)
        .ok_or_else(|| ConnectionError::DeviceConnection {
            device_id: device.id.clone(),
            reason: "peripheral not found".to_string(),
        })
}

async fn connect_peripheral(central: &Adapter, device: &Device) -> Result<(), ConnectionError> {
    let peripheral = find_peripheral(central, device).await?;
    let failed = |e: btleplug::Error| ConnectionError::DeviceConnection {
        device_id: device.id.clone(),
        reason: e.to_string(),
    };

    if !peripheral.is_connected().await.map_err(failed)? {
        peripheral.connect().await.map_err(failed)?;
    }
    peripheral.discover_services().await.map_err(failed)?;
    Ok(())
}

async fn subscribe(central: &Adapter, device: &Device, sink: AdapterSink) -> Result<JoinHandle<()>, ConnectionError> {
    let peripheral = find_peripheral(central, device).await?;
    let measurement_uuid = uuid_from_u16(HEART_RATE_MEASUREMENT_UUID16);
    let characteristic = peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == measurement_uuid)
        .ok_or_else(|| ConnectionError::Transport("heart rate characteristic not found".to_string()))?;

    let mut notifications = peripheral
        .notifications()
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;
    peripheral
        .subscribe(&characteristic)
        .await
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;

    let device = device.clone();
    Ok(tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if notification.uuid != measurement_uuid {
                continue;
            }
            match parse_heart_rate_measurement(&notification.value) {
                Some(bpm) => sink.heart_rate(RawSample::new(Utc::now(), i32::from(bpm)), device.clone()),
                None => log::debug!("Ignoring short heart rate notification from {}", device),
            }
        }
        log::debug!("Notification stream from {} ended", device);
    }))
}

fn linked_device(linked: &LinkedDevice) -> Option<Device> {
    linked.lock().ok().and_then(|guard| guard.clone())
}

fn set_linked(linked: &LinkedDevice, device: Option<Device>) {
    if let Ok(mut guard) = linked.lock() {
        *guard = device;
    }
}

fn display_name(local_name: Option<String>) -> String {
    local_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Unknown heart rate sensor".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(display_name(Some("Polar H10 1A2B".into())), "Polar H10 1A2B");
        assert_eq!(display_name(Some("  ".into())), "Unknown heart rate sensor");
        assert_eq!(display_name(None), "Unknown heart rate sensor");
    }

    #[test]
    fn test_unattached_adapter_ignores_requests() {
        let mut adapter = BluetoothAdapter::new();
        adapter.start_scanning();
        assert!(adapter.requests.is_none());
    }
}
