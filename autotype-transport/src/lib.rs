//! Autotype Transport Layer
//!
//! Delivers keyboard reports to a host through one of:
//! - USB HID gadget node, written directly
//! - USB HID gadget node, written through a root shell
//! - Bluetooth HID Device profile connection

pub mod usb;
pub mod root;
pub mod profile;
pub mod bluetooth;
pub mod loopback;

pub use usb::*;
pub use root::*;
pub use profile::*;
pub use bluetooth::*;
pub use loopback::*;

use async_trait::async_trait;
use autotype_common::{
    usage, AutotypeResult, OutputChannel, ScancodeReport, TransportError, DEFAULT_GADGET_PATH,
};
use autotype_input::{KeyStroke, Translator};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// USB HID gadget device node
    pub gadget_path: String,
    /// Write the gadget node through a root shell instead of opening it
    pub use_root: bool,
    /// Command used to obtain a root shell
    pub su_command: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            gadget_path: DEFAULT_GADGET_PATH.to_string(),
            use_root: false,
            su_command: "su".to_string(),
        }
    }
}

/// A sink for keyboard reports.
///
/// Writes are fire-and-forget: the boot protocol has no acknowledgement, so
/// success only means the bytes left this process.
#[async_trait]
pub trait OutputTransport: Send + Sync {
    /// Channel this transport writes to
    fn channel(&self) -> OutputChannel;

    /// Translator for the host's layout
    fn translator(&self) -> &Translator;

    /// Write a single report
    async fn send_report(&self, report: &ScancodeReport) -> Result<(), TransportError>;

    /// Write reports in order, stopping at the first failure
    async fn send_reports(&self, reports: &[ScancodeReport]) -> Result<(), TransportError> {
        for report in reports {
            self.send_report(report).await?;
        }
        Ok(())
    }

    /// Translate and type `text`, returning the number of dropped characters
    async fn send_text(&self, text: &str) -> AutotypeResult<usize> {
        let translation = self.translator().translate(text)?;
        if translation.lost_characters() {
            warn!("{} characters have no mapping in {}", translation.dropped, self.translator().layout());
        }
        self.send_reports(&translation.reports).await?;
        Ok(translation.dropped)
    }

    async fn send_tabulator(&self) -> Result<(), TransportError> {
        self.send_keystroke(KeyStroke::new(usage::TAB, 0)).await
    }

    async fn send_return(&self) -> Result<(), TransportError> {
        self.send_keystroke(KeyStroke::new(usage::ENTER, 0)).await
    }

    /// Press and release one key
    async fn send_keystroke(&self, stroke: KeyStroke) -> Result<(), TransportError> {
        self.send_reports(&[stroke.report(), ScancodeReport::RELEASE]).await
    }
}
