//! User-facing notifications
//!
//! Failures raised from platform callbacks have no caller to return to, so
//! they surface as notifications. Delivery is fire-and-forget.

use std::time::Duration;

use autotype_common::DeviceAddress;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{info, warn};

/// A notification for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Profile registration was declined or timed out
    RegistrationUnclean,
    /// A keyboard dispatch never saw its host connect
    BluetoothUnclean { device: DeviceAddress },
    /// A FIDO request arrived while no safe is open
    ActionRequired { timeout: Duration },
    /// Some characters could not be typed in the host layout
    LostCharacters { dropped: usize },
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Notification::RegistrationUnclean => "Bluetooth unclean state",
            Notification::BluetoothUnclean { .. } => "Bluetooth unclean state",
            Notification::ActionRequired { .. } => "Action required",
            Notification::LostCharacters { .. } => "Characters lost",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::RegistrationUnclean => {
                "Bluetooth HID profile registration failed; toggle Bluetooth and retry".to_string()
            }
            Notification::BluetoothUnclean { device } => {
                format!("{} did not connect; toggle Bluetooth and retry", device)
            }
            Notification::ActionRequired { .. } => {
                "Open your password safe to answer the security key request".to_string()
            }
            Notification::LostCharacters { dropped } => {
                format!("Lost {} characters in output due to missing mapping", dropped)
            }
        }
    }

    /// Whether this notification reports a failure
    pub fn is_warning(&self) -> bool {
        !matches!(self, Notification::ActionRequired { .. })
    }
}

/// Receives notifications for display
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications to a UI thread over a bounded channel
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, Receiver<Notification>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => warn!("Notification queue full, dropping {:?}", n),
            Err(TrySendError::Disconnected(n)) => warn!("Notification receiver gone, dropping {:?}", n),
        }
    }
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        if notification.is_warning() {
            warn!("{}: {}", notification.title(), notification.body());
        } else {
            info!("{}: {}", notification.title(), notification.body());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_drops_when_full() {
        let (notifier, rx) = ChannelNotifier::new(1);
        notifier.notify(Notification::RegistrationUnclean);
        notifier.notify(Notification::LostCharacters { dropped: 2 });

        assert_eq!(rx.try_recv(), Ok(Notification::RegistrationUnclean));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_body_mentions_device() {
        let n = Notification::BluetoothUnclean {
            device: DeviceAddress::new("00:11:22:33:44:55"),
        };
        assert!(n.body().contains("00:11:22:33:44:55"));
        assert!(n.is_warning());
    }
}
