//! Bluetooth HID keyboard writer

use std::sync::Arc;

use async_trait::async_trait;
use autotype_common::{
    DeviceAddress, OutputChannel, ScancodeReport, TransportError, KEYBOARD_REPORT_ID,
};
use autotype_input::Translator;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{HidDeviceProfile, OutputTransport};

/// Writes keyboard reports to the host connected in keyboard mode.
///
/// The controller sets the host once a keyboard-mode connection is up and
/// clears it when the connection or the mode goes away.
pub struct BluetoothKeyboardTransport {
    profile: Arc<dyn HidDeviceProfile>,
    host: Mutex<Option<DeviceAddress>>,
    translator: Translator,
}

impl BluetoothKeyboardTransport {
    pub fn new(profile: Arc<dyn HidDeviceProfile>, translator: Translator) -> Self {
        Self {
            profile,
            host: Mutex::new(None),
            translator,
        }
    }

    /// Set or clear the connected keyboard host
    pub fn set_host(&self, host: Option<DeviceAddress>) {
        debug!("Keyboard host: {:?}", host);
        *self.host.lock() = host;
    }

    pub fn host(&self) -> Option<DeviceAddress> {
        self.host.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.host.lock().is_some()
    }
}

#[async_trait]
impl OutputTransport for BluetoothKeyboardTransport {
    fn channel(&self) -> OutputChannel {
        OutputChannel::Bluetooth
    }

    fn translator(&self) -> &Translator {
        &self.translator
    }

    async fn send_report(&self, report: &ScancodeReport) -> Result<(), TransportError> {
        let host = self.host().ok_or(TransportError::NotConnected)?;
        trace!("BT {} > {}", host, report);
        self.profile
            .send_report(&host, KEYBOARD_REPORT_ID, &report.to_bytes())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoopbackProfile, ProfileCall};
    use autotype_input::LayoutId;

    #[tokio::test]
    async fn test_requires_connected_host() {
        let profile = Arc::new(LoopbackProfile::new());
        let bt = BluetoothKeyboardTransport::new(profile.clone(), Translator::new(LayoutId::EnUs));

        assert_eq!(bt.send_return().await, Err(TransportError::NotConnected));
        assert!(profile.calls().is_empty());

        let host = DeviceAddress::new("00:11:22:33:44:55");
        bt.set_host(Some(host.clone()));
        bt.send_return().await.unwrap();

        assert_eq!(
            profile.calls(),
            vec![
                ProfileCall::SendReport {
                    device: host.clone(),
                    report_id: KEYBOARD_REPORT_ID,
                    data: vec![0, 0, 0x28, 0, 0, 0, 0, 0],
                },
                ProfileCall::SendReport {
                    device: host,
                    report_id: KEYBOARD_REPORT_ID,
                    data: vec![0; 8],
                },
            ]
        );
    }
}
