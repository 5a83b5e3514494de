//! USB HID gadget writer
//!
//! The gadget node (`/dev/hidg0`) accepts raw 8-byte keyboard reports. Opening
//! it normally requires root, so a permission failure is reported at
//! construction time, separately from later write failures.

use async_trait::async_trait;
use autotype_common::{reports_to_bytes, OutputChannel, ScancodeReport, TransportError};
use autotype_input::Translator;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use crate::{OutputTransport, TransportConfig};

/// Writes reports straight into the gadget device node
pub struct UsbGadgetTransport {
    path: String,
    device: Mutex<File>,
    translator: Translator,
}

impl UsbGadgetTransport {
    /// Open the gadget node for appending
    pub async fn open(config: &TransportConfig, translator: Translator) -> Result<Self, TransportError> {
        let path = config.gadget_path.clone();
        let device = OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| TransportError::from_io(&e, &path))?;

        info!("Opened USB HID gadget {} ({})", path, translator.layout());

        Ok(Self {
            path,
            device: Mutex::new(device),
            translator,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut device = self.device.lock().await;
        device
            .write_all(data)
            .await
            .map_err(|e| TransportError::from_io(&e, &self.path))?;
        device
            .flush()
            .await
            .map_err(|e| TransportError::from_io(&e, &self.path))
    }
}

#[async_trait]
impl OutputTransport for UsbGadgetTransport {
    fn channel(&self) -> OutputChannel {
        OutputChannel::Usb
    }

    fn translator(&self) -> &Translator {
        &self.translator
    }

    async fn send_report(&self, report: &ScancodeReport) -> Result<(), TransportError> {
        trace!("USB > {}", report);
        self.write(&report.to_bytes()).await
    }

    async fn send_reports(&self, reports: &[ScancodeReport]) -> Result<(), TransportError> {
        // Reports are fixed-size, so one write keeps them contiguous
        debug!("Writing {} reports to {}", reports.len(), self.path);
        self.write(&reports_to_bytes(reports)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotype_input::LayoutId;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("autotype-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_missing_node_is_device_not_found() {
        let config = TransportConfig {
            gadget_path: "/nonexistent/hidg0".into(),
            ..Default::default()
        };
        let result = UsbGadgetTransport::open(&config, Translator::new(LayoutId::EnUs)).await;
        assert!(matches!(result, Err(TransportError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_text_written_as_report_pairs() {
        let path = temp_path("usb");
        std::fs::write(&path, b"").unwrap();

        let config = TransportConfig {
            gadget_path: path.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let usb = UsbGadgetTransport::open(&config, Translator::new(LayoutId::EnUs))
            .await
            .unwrap();

        let dropped = usb.send_text("hi").await.unwrap();
        usb.send_return().await.unwrap();
        assert_eq!(dropped, 0);

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 6 * 8);
        assert_eq!(&written[..8], &[0, 0, 0x0B, 0, 0, 0, 0, 0]);
        assert_eq!(&written[40..], &[0u8; 8]);
        assert_eq!(written[34], 0x28);

        std::fs::remove_file(&path).ok();
    }
}
