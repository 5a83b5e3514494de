//! In-process stand-ins for the platform profile and output devices
//!
//! Used by the simulator and by tests: every request is recorded, and the
//! profile can answer requests with the callbacks a real stack would send.

use std::sync::Arc;

use async_trait::async_trait;
use autotype_common::{
    ConnectionState, DeviceAddress, HidAppDescriptor, HidMode, OutputChannel,
    ProfileRegistrationError, ScancodeReport, TransportError,
};
use autotype_input::Translator;
use parking_lot::Mutex;
use tracing::debug;

use crate::{HidDeviceProfile, OutputTransport, ProfileEvent};

/// A request received by [`LoopbackProfile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileCall {
    RegisterApp(HidMode),
    UnregisterApp,
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    SendReport {
        device: DeviceAddress,
        report_id: u8,
        data: Vec<u8>,
    },
}

/// Receiver for events emitted by the loopback profile
pub type EventSink = Arc<dyn Fn(ProfileEvent) + Send + Sync>;

/// How the loopback profile answers requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackBehavior {
    /// Answer `register_app` with `AppStatusChanged`
    pub ack_registration: bool,
    /// Answer with `registered: false` instead
    pub decline_registration: bool,
    /// Fail `register_app` outright, as a stack without the HID profile does
    pub fail_registration: bool,
    /// Answer `unregister_app` with `AppStatusChanged { registered: false }`
    pub ack_unregistration: bool,
    /// Answer `connect` with a CONNECTED event
    pub connect_succeeds: bool,
    /// Report connected hosts as bonded
    pub bonded: bool,
}

impl LoopbackBehavior {
    /// Record requests, never answer
    pub const SILENT: Self = Self {
        ack_registration: false,
        decline_registration: false,
        fail_registration: false,
        ack_unregistration: false,
        connect_succeeds: false,
        bonded: true,
    };

    /// Answer every request the way a healthy stack would
    pub const RESPONSIVE: Self = Self {
        ack_registration: true,
        decline_registration: false,
        fail_registration: false,
        ack_unregistration: true,
        connect_succeeds: true,
        bonded: true,
    };
}

/// Recording [`HidDeviceProfile`]
pub struct LoopbackProfile {
    calls: Mutex<Vec<ProfileCall>>,
    behavior: Mutex<LoopbackBehavior>,
    sink: Mutex<Option<EventSink>>,
    connected: Mutex<Option<DeviceAddress>>,
}

impl LoopbackProfile {
    /// A profile that records requests and never answers
    pub fn new() -> Self {
        Self::with_behavior(LoopbackBehavior::SILENT)
    }

    pub fn with_behavior(behavior: LoopbackBehavior) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            behavior: Mutex::new(behavior),
            sink: Mutex::new(None),
            connected: Mutex::new(None),
        }
    }

    /// Route emitted events to `sink`
    pub fn attach(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    pub fn set_behavior(&self, behavior: LoopbackBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Deliver a callback as if the stack raised it
    pub fn emit(&self, event: ProfileEvent) {
        debug!("Loopback event: {:?}", event);
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    pub fn calls(&self) -> Vec<ProfileCall> {
        self.calls.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<ProfileCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Number of `connect` requests for `device`
    pub fn connect_count(&self, device: &DeviceAddress) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ProfileCall::Connect(d) if d == device))
            .count()
    }

    /// Payloads of all `send_report` requests, in order
    pub fn sent_reports(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ProfileCall::SendReport { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ProfileCall) {
        self.calls.lock().push(call);
    }
}

impl Default for LoopbackProfile {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HidDeviceProfile for LoopbackProfile {
    async fn register_app(
        &self,
        mode: HidMode,
        app: &HidAppDescriptor,
    ) -> Result<(), ProfileRegistrationError> {
        debug!("Loopback register {} as {:?}", mode, app.name);
        self.record(ProfileCall::RegisterApp(mode));

        let behavior = *self.behavior.lock();
        if behavior.fail_registration {
            return Err(ProfileRegistrationError::Platform(
                "HID device profile unavailable".into(),
            ));
        }
        if behavior.ack_registration {
            self.emit(ProfileEvent::AppStatusChanged {
                registered: !behavior.decline_registration,
            });
        }
        Ok(())
    }

    async fn unregister_app(&self) -> Result<(), ProfileRegistrationError> {
        self.record(ProfileCall::UnregisterApp);
        if self.behavior.lock().ack_unregistration {
            self.emit(ProfileEvent::AppStatusChanged { registered: false });
        }
        Ok(())
    }

    async fn connect(&self, device: &DeviceAddress) -> Result<(), TransportError> {
        self.record(ProfileCall::Connect(device.clone()));

        let behavior = *self.behavior.lock();
        if behavior.connect_succeeds {
            *self.connected.lock() = Some(device.clone());
            self.emit(ProfileEvent::ConnectionStateChanged {
                device: device.clone(),
                state: ConnectionState::Connected,
                bonded: behavior.bonded,
            });
        }
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceAddress) -> Result<(), TransportError> {
        self.record(ProfileCall::Disconnect(device.clone()));

        let was_connected = {
            let mut connected = self.connected.lock();
            if connected.as_ref() == Some(device) {
                *connected = None;
                true
            } else {
                false
            }
        };
        if was_connected {
            self.emit(ProfileEvent::ConnectionStateChanged {
                device: device.clone(),
                state: ConnectionState::Disconnected,
                bonded: self.behavior.lock().bonded,
            });
        }
        Ok(())
    }

    async fn send_report(
        &self,
        device: &DeviceAddress,
        report_id: u8,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.record(ProfileCall::SendReport {
            device: device.clone(),
            report_id,
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// Recording [`OutputTransport`]
pub struct RecordingTransport {
    channel: OutputChannel,
    translator: Translator,
    reports: Mutex<Vec<ScancodeReport>>,
    writes: Mutex<usize>,
    failure: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    pub fn new(channel: OutputChannel, translator: Translator) -> Self {
        Self {
            channel,
            translator,
            reports: Mutex::new(Vec::new()),
            writes: Mutex::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Fail every following write with `error`
    pub fn fail_with(&self, error: TransportError) {
        *self.failure.lock() = Some(error);
    }

    pub fn reports(&self) -> Vec<ScancodeReport> {
        self.reports.lock().clone()
    }

    /// Number of write attempts, failed ones included
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

#[async_trait]
impl OutputTransport for RecordingTransport {
    fn channel(&self) -> OutputChannel {
        self.channel
    }

    fn translator(&self) -> &Translator {
        &self.translator
    }

    async fn send_report(&self, report: &ScancodeReport) -> Result<(), TransportError> {
        *self.writes.lock() += 1;
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        self.reports.lock().push(*report);
        Ok(())
    }
}
