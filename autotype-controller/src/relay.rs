//! FIDO interrupt relay
//!
//! Output reports a host writes in FIDO mode are handed to the transaction
//! layer, and its responses go back on the interrupt channel with the same
//! report id. While no safe is open every request raises a notification and
//! the relay asks the UI to open the default safe, at most once per debounce
//! window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autotype_common::{DeviceAddress, TransportError};
use autotype_transport::HidDeviceProfile;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TimingConfig;
use crate::notify::{Notification, Notifier};

/// Signing collaborator behind the FIDO relay
#[async_trait]
pub trait TransactionLayer: Send + Sync {
    /// Whether a safe is open and requests can be answered
    fn is_ready(&self) -> bool;

    /// Handle one output report, returning the input reports to send back
    async fn handle_report(&self, report: Bytes) -> Vec<Bytes>;

    /// Ask the UI to open the default safe. Returns `false` if it could not.
    fn request_open_default_file(&self) -> bool;
}

/// What the relay did with one interrupt report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Forwarded; this many response reports were written
    Forwarded(usize),
    /// Not ready; the UI was asked to open the safe
    OpenRequested,
    /// Not ready and an open request is still recent
    Debounced,
}

pub struct FidoRelay {
    transaction: Arc<dyn TransactionLayer>,
    profile: Arc<dyn HidDeviceProfile>,
    notifier: Arc<dyn Notifier>,
    debounce: Duration,
    notification_timeout: Duration,
    last_open_request: Option<Instant>,
}

impl FidoRelay {
    pub fn new(
        transaction: Arc<dyn TransactionLayer>,
        profile: Arc<dyn HidDeviceProfile>,
        notifier: Arc<dyn Notifier>,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            transaction,
            profile,
            notifier,
            debounce: timing.open_file_debounce(),
            notification_timeout: timing.action_notification_timeout(),
            last_open_request: None,
        }
    }

    /// Relay one interrupt report from `device`
    pub async fn handle(
        &mut self,
        device: &DeviceAddress,
        report_id: u8,
        data: Bytes,
    ) -> Result<RelayOutcome, TransportError> {
        if self.transaction.is_ready() {
            self.last_open_request = None;
            let responses = self.transaction.handle_report(data).await;
            for response in &responses {
                self.profile.send_report(device, report_id, response).await?;
            }
            debug!("Relayed FIDO report from {}, {} responses", device, responses.len());
            return Ok(RelayOutcome::Forwarded(responses.len()));
        }

        self.notifier.notify(Notification::ActionRequired {
            timeout: self.notification_timeout,
        });

        if let Some(at) = self.last_open_request {
            if at.elapsed() < self.debounce {
                debug!("FIDO request from {} while open request pending", device);
                return Ok(RelayOutcome::Debounced);
            }
        }

        info!("FIDO request from {} with no safe open", device);
        self.last_open_request = Some(Instant::now());
        if !self.transaction.request_open_default_file() {
            warn!("Could not open the default safe");
        }
        Ok(RelayOutcome::OpenRequested)
    }

    /// Run the relay on its own task
    pub fn spawn(self) -> RelayHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        RelayHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RelayRequest>) {
        while let Some(req) = rx.recv().await {
            if let Err(e) = self.handle(&req.device, req.report_id, req.data).await {
                error!("FIDO response to {} failed: {}", req.device, e);
            }
        }
        debug!("FIDO relay stopped");
    }
}

struct RelayRequest {
    device: DeviceAddress,
    report_id: u8,
    data: Bytes,
}

/// Queues interrupt reports for a running [`FidoRelay`]
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayRequest>,
}

impl RelayHandle {
    pub fn relay(&self, device: DeviceAddress, report_id: u8, data: Bytes) {
        if self
            .tx
            .send(RelayRequest {
                device,
                report_id,
                data,
            })
            .is_err()
        {
            warn!("FIDO relay is gone, dropping report");
        }
    }
}
