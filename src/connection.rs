//! # Connection Management Module
//!
//! Hosts a `ConnectionController` on a single Tokio task and is the only
//! place that owns timers.
//!
//! ## Key Components
//! - `ConnectionManager`: the event loop. One `select!` serializes commands,
//!   adapter callbacks, resample ticks and reconnect deadlines, so controller
//!   state is never touched from two places at once
//! - `ManagerHandle`: cloneable front door for other threads
//! - `ConnectionCommand`: what callers can ask for
//!
//! ## Timers
//! The resample interval only exists while the stream is running and its
//! first tick lands one full period after start. At most one reconnect
//! deadline is armed at a time; rescheduling replaces it and a deadline that
//! fires for an outdated generation is ignored by the controller.

use crate::adapter::{AdapterEvent, AdapterId, AdapterSink, Device};
use crate::controller::{ConnectionController, ControllerSnapshot, ControllerUpdate};
use crate::error::ConnectionError;
use chrono::Utc;
use std::future::pending;
use std::pin::Pin;
use std::thread::JoinHandle;
use tokio::runtime::Builder;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionCommand {
    StartScanning,
    StopScanning,
    Connect(Device),
    Disconnect,
    SubscribeToHeartRate,
}

/// Everything that can wake the manager loop from outside
#[derive(Debug)]
pub enum ControllerEvent {
    Command(ConnectionCommand),
    Adapter { adapter: AdapterId, event: AdapterEvent },
    Subscribe(crossbeam_channel::Sender<ControllerUpdate>),
    Shutdown,
}

enum Wake {
    Event(Option<ControllerEvent>),
    Tick,
    ReconnectDue(u64),
}

/// Runs the connection controller.
///
/// Create with `new`, then either `spawn_on_thread` (dedicated thread with its
/// own runtime) or `await` `run` on an existing runtime.
pub struct ConnectionManager {
    controller: ConnectionController,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    snapshot: watch::Sender<ControllerSnapshot>,
}

impl ConnectionManager {
    /// Wraps `controller`, wiring every adapter's sink into the event loop.
    ///
    /// Returns the manager and a handle for issuing commands from other threads.
    pub fn new(mut controller: ConnectionController) -> (Self, ManagerHandle) {
        let (event_sender, events) = mpsc::unbounded_channel();

        let sink_sender = event_sender.clone();
        controller.attach_sinks(|id| {
            let sender = sink_sender.clone();
            AdapterSink::new(id, move |adapter, event| {
                if sender.send(ControllerEvent::Adapter { adapter, event }).is_err() {
                    log::trace!("Connection manager gone, dropping adapter event");
                }
            })
        });

        let (snapshot, snapshot_receiver) = watch::channel(controller.snapshot());
        let manager = ConnectionManager {
            controller,
            events,
            snapshot,
        };
        let handle = ManagerHandle {
            events: event_sender,
            snapshot: snapshot_receiver,
        };

        (manager, handle)
    }

    /// Runs the loop on a new thread with a current-thread runtime.
    pub fn spawn_on_thread(self) -> Result<JoinHandle<()>, ConnectionError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConnectionError::RuntimeCreation(e.to_string()))?;

        Ok(std::thread::spawn(move || runtime.block_on(self.run())))
    }

    /// Processes events until `shutdown` is requested.
    ///
    /// Adapters are called from inside this task, so they may `tokio::spawn`.
    pub async fn run(mut self) {
        log::info!("Connection manager: started");
        let mut ticker: Option<Interval> = None;
        let mut reconnect: Option<(u64, Pin<Box<Sleep>>)> = None;

        loop {
            self.sync_timers(&mut ticker, &mut reconnect);

            let wake = tokio::select! {
                event = self.events.recv() => Wake::Event(event),
                _ = next_tick(&mut ticker) => Wake::Tick,
                generation = reconnect_due(&mut reconnect) => Wake::ReconnectDue(generation),
            };

            match wake {
                Wake::Event(None) | Wake::Event(Some(ControllerEvent::Shutdown)) => break,
                Wake::Event(Some(event)) => self.dispatch(event),
                Wake::Tick => self.controller.on_tick(Utc::now()),
                Wake::ReconnectDue(generation) => {
                    reconnect = None;
                    self.controller.on_reconnect_due(generation);
                }
            }

            self.snapshot.send_replace(self.controller.snapshot());
        }

        log::info!("Connection manager: shutting down");
        self.controller.stop_scanning();
        self.controller.disconnect();
        self.snapshot.send_replace(self.controller.snapshot());
    }

    fn dispatch(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Command(command) => {
                log::debug!("Connection manager: {:?}", command);
                match command {
                    ConnectionCommand::StartScanning => self.controller.start_scanning(),
                    ConnectionCommand::StopScanning => self.controller.stop_scanning(),
                    ConnectionCommand::Connect(device) => self.controller.connect(device),
                    ConnectionCommand::Disconnect => self.controller.disconnect(),
                    ConnectionCommand::SubscribeToHeartRate => self.controller.subscribe_to_heart_rate(),
                }
            }
            ControllerEvent::Adapter { adapter, event } => {
                self.controller.handle_adapter_event(adapter, event)
            }
            ControllerEvent::Subscribe(subscriber) => self.controller.add_subscriber(subscriber),
            ControllerEvent::Shutdown => {}
        }
    }

    fn sync_timers(&self, ticker: &mut Option<Interval>, reconnect: &mut Option<(u64, Pin<Box<Sleep>>)>) {
        if self.controller.stream_running() {
            if ticker.is_none() {
                let period = self.controller.stream_interval();
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *ticker = Some(interval);
            }
        } else {
            *ticker = None;
        }

        match self.controller.pending_reconnect() {
            Some(generation) => {
                let armed = reconnect.as_ref().map(|(armed, _)| *armed);
                if armed != Some(generation) {
                    let delay = self.controller.policy().reconnect_delay;
                    *reconnect = Some((generation, Box::pin(sleep(delay))));
                }
            }
            None => *reconnect = None,
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn reconnect_due(reconnect: &mut Option<(u64, Pin<Box<Sleep>>)>) -> u64 {
    match reconnect {
        Some((generation, deadline)) => {
            deadline.as_mut().await;
            *generation
        }
        None => pending().await,
    }
}

/// Cloneable handle to a running `ConnectionManager`
#[derive(Clone)]
pub struct ManagerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    snapshot: watch::Receiver<ControllerSnapshot>,
}

impl ManagerHandle {
    pub fn send(&self, command: ConnectionCommand) -> Result<(), ConnectionError> {
        self.events
            .send(ControllerEvent::Command(command))
            .map_err(|_| ConnectionError::Interrupted)
    }

    pub fn start_scanning(&self) -> Result<(), ConnectionError> {
        self.send(ConnectionCommand::StartScanning)
    }

    pub fn stop_scanning(&self) -> Result<(), ConnectionError> {
        self.send(ConnectionCommand::StopScanning)
    }

    pub fn connect(&self, device: Device) -> Result<(), ConnectionError> {
        self.send(ConnectionCommand::Connect(device))
    }

    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        self.send(ConnectionCommand::Disconnect)
    }

    pub fn subscribe_to_heart_rate(&self) -> Result<(), ConnectionError> {
        self.send(ConnectionCommand::SubscribeToHeartRate)
    }

    /// Asks the manager to disconnect and leave its loop
    pub fn shutdown(&self) {
        if self.events.send(ControllerEvent::Shutdown).is_err() {
            log::debug!("Connection manager already stopped");
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch receiver that is notified after every processed event
    pub fn watch(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot.clone()
    }

    /// Ordered stream of updates from the moment the manager handles this request
    pub fn updates(&self) -> crossbeam_channel::Receiver<ControllerUpdate> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        if self.events.send(ControllerEvent::Subscribe(sender)).is_err() {
            log::debug!("Connection manager already stopped, updates will be empty");
        }
        receiver
    }
}
