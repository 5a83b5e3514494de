//! Platform Bluetooth HID Device profile interface
//!
//! The platform stack is consumed, not implemented: requests go out through
//! [`HidDeviceProfile`] and completions come back as [`ProfileEvent`]s on
//! whatever thread the stack uses for callbacks.

use async_trait::async_trait;
use autotype_common::{
    ConnectionState, DeviceAddress, HidAppDescriptor, HidMode, ProfileRegistrationError,
    TransportError,
};
use bytes::Bytes;

/// Requests into the platform HID Device profile.
///
/// `register_app` and `unregister_app` only start the operation; the
/// outcome arrives later as [`ProfileEvent::AppStatusChanged`].
#[async_trait]
pub trait HidDeviceProfile: Send + Sync {
    async fn register_app(
        &self,
        mode: HidMode,
        app: &HidAppDescriptor,
    ) -> Result<(), ProfileRegistrationError>;

    async fn unregister_app(&self) -> Result<(), ProfileRegistrationError>;

    async fn connect(&self, device: &DeviceAddress) -> Result<(), TransportError>;

    async fn disconnect(&self, device: &DeviceAddress) -> Result<(), TransportError>;

    /// Send an input report on the interrupt channel
    async fn send_report(
        &self,
        device: &DeviceAddress,
        report_id: u8,
        data: &[u8],
    ) -> Result<(), TransportError>;
}

/// Callbacks from the platform stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    /// Registration completed (`true`) or the app was unregistered (`false`)
    AppStatusChanged { registered: bool },
    ConnectionStateChanged {
        device: DeviceAddress,
        state: ConnectionState,
        bonded: bool,
    },
    /// Output report written by the host. The platform may deliver no payload.
    InterruptData {
        device: DeviceAddress,
        report_id: u8,
        data: Option<Bytes>,
    },
    /// Bluetooth adapter switched on or off
    AdapterStateChanged { enabled: bool },
}
