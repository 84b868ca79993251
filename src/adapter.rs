//! # Hardware Adapter Boundary
//!
//! The capability every transport (btleplug, vendor SDK, simulator) provides
//! to the connection controller, and the callback path back into it.
//!
//! ## Ownership
//! The controller owns its adapters. An adapter never holds the controller;
//! it gets an `AdapterSink` at registration and reports everything through it.
//! Adapter calls are fire-and-forget: completion always arrives later as an
//! `AdapterEvent`.

use crate::error::ConnectionError;
use crate::samples::RawSample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A sensor as seen by a transport. Identity is `id` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub rssi: Option<i16>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rssi,
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id)
    }
}

/// Index of an adapter in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(pub usize);

/// Callbacks from an adapter into the controller
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Discovered(Device),
    ConnectStarted(Device),
    Connected(Device),
    ConnectFailed(Device, Option<ConnectionError>),
    Disconnected(Device, Option<ConnectionError>),
    HeartRate(RawSample, Device),
}

/// Non-owning handle an adapter uses to report events
#[derive(Clone)]
pub struct AdapterSink {
    adapter: AdapterId,
    deliver: Arc<dyn Fn(AdapterId, AdapterEvent) + Send + Sync>,
}

impl AdapterSink {
    pub fn new<F>(adapter: AdapterId, deliver: F) -> Self
    where
        F: Fn(AdapterId, AdapterEvent) + Send + Sync + 'static,
    {
        Self {
            adapter,
            deliver: Arc::new(deliver),
        }
    }

    pub fn adapter(&self) -> AdapterId {
        self.adapter
    }

    pub fn send(&self, event: AdapterEvent) {
        (self.deliver)(self.adapter, event);
    }

    pub fn discovered(&self, device: Device) {
        self.send(AdapterEvent::Discovered(device));
    }

    pub fn connect_started(&self, device: Device) {
        self.send(AdapterEvent::ConnectStarted(device));
    }

    pub fn connected(&self, device: Device) {
        self.send(AdapterEvent::Connected(device));
    }

    pub fn connect_failed(&self, device: Device, error: Option<ConnectionError>) {
        self.send(AdapterEvent::ConnectFailed(device, error));
    }

    pub fn disconnected(&self, device: Device, error: Option<ConnectionError>) {
        self.send(AdapterEvent::Disconnected(device, error));
    }

    pub fn heart_rate(&self, sample: RawSample, device: Device) {
        self.send(AdapterEvent::HeartRate(sample, device));
    }
}

impl fmt::Debug for AdapterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSink").field("adapter", &self.adapter).finish()
    }
}

/// A transport the controller can drive.
///
/// Implementations must not block: start the work and report the outcome
/// through the attached sink.
pub trait HardwareAdapter: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Called once when the adapter is registered with a running manager
    fn attach(&mut self, sink: AdapterSink);

    fn start_scanning(&mut self);

    fn stop_scanning(&mut self);

    fn connect(&mut self, device: &Device);

    /// Disconnect `device`, or whatever is connected when `None`
    fn disconnect(&mut self, device: Option<&Device>);

    fn subscribe_to_heart_rate(&mut self, device: &Device);

    fn cancel_heart_rate_streaming(&mut self, device: &Device);
}
