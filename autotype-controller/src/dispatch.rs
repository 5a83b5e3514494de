//! Credential dispatch
//!
//! Turns a credential into keyboard reports and delivers them over USB or
//! Bluetooth. Everything is translated before the first write, so a
//! credential that cannot be typed fails without touching the host.

use std::sync::Arc;

use autotype_common::{
    ControllerError, Credential, Delimiter, DeviceAddress, DispatchError, DispatchOptions,
    OutputChannel, TranslationError, TransportError,
};
use autotype_input::{Translation, Translator};
use autotype_transport::{OutputTransport, RootShellTransport, TransportConfig, UsbGadgetTransport};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::controller::{ControllerHandle, DispatchTicket};
use crate::notify::{Notification, Notifier};

/// Outcome of a completed dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub channel: OutputChannel,
    pub keystrokes: usize,
    /// Characters skipped for lack of a mapping
    pub lost_characters: usize,
}

/// Translate the parts of `credential` selected by `options`.
///
/// The OTP token in the username or password is replaced with the current
/// code. A token that cannot be replaced fails the whole composition.
pub fn compose(
    translator: &Translator,
    credential: &Credential,
    options: &DispatchOptions,
) -> Result<Translation, TranslationError> {
    let mut out = Translation::default();
    let code = credential.otp.as_deref();

    if options.otp_only {
        match code {
            Some(code) => out.extend(translator.translate(code)?),
            None => warn!("No OTP code to type"),
        }
        return Ok(out);
    }

    if options.send_username {
        if let Some(username) = &credential.username {
            out.extend(translator.translate(&fill_otp(translator, username, code))?);
        }
    }

    if options.send_username && options.send_password {
        match options.delimiter {
            Delimiter::Tab => out.extend(translator.translate_key("tab")?),
            Delimiter::Return => out.extend(translator.translate_key("return")?),
            Delimiter::None => {}
        }
    }

    if options.send_password {
        if let Some(password) = &credential.password {
            out.extend(translator.translate(&fill_otp(translator, password, code))?);
            if options.return_suffix {
                out.extend(translator.translate_key("return")?);
            }
        }
    }

    Ok(out)
}

fn fill_otp(translator: &Translator, text: &str, code: Option<&str>) -> String {
    match code {
        Some(code) if translator.contains_otp(text) => translator.substitute_otp(text, code),
        _ => text.to_string(),
    }
}

/// Open the USB gadget, natively or through a root shell
pub async fn open_usb(
    config: &TransportConfig,
    translator: Translator,
) -> Result<Arc<dyn OutputTransport>, DispatchError> {
    if config.use_root {
        let transport = RootShellTransport::new(config, translator).await?;
        Ok(Arc::new(transport))
    } else {
        let transport = UsbGadgetTransport::open(config, translator).await?;
        Ok(Arc::new(transport))
    }
}

/// Routes credentials to the USB gadget or the Bluetooth controller
pub struct Dispatcher {
    translator: Translator,
    usb: Option<Arc<dyn OutputTransport>>,
    /// Serializes USB write sequences
    usb_lock: tokio::sync::Mutex<()>,
    /// Token of the newest USB dispatch
    usb_session: Mutex<Option<CancelToken>>,
    controller: Option<ControllerHandle>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(translator: Translator, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            translator,
            usb: None,
            usb_lock: tokio::sync::Mutex::new(()),
            usb_session: Mutex::new(None),
            controller: None,
            notifier,
        }
    }

    pub fn with_usb(mut self, transport: Arc<dyn OutputTransport>) -> Self {
        self.usb = Some(transport);
        self
    }

    pub fn with_controller(mut self, controller: ControllerHandle) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    fn report(&self, channel: OutputChannel, translation: &Translation) -> DispatchReport {
        if translation.lost_characters() {
            warn!(
                "{} characters lost in output due to missing mapping in {}",
                translation.dropped,
                self.translator.layout()
            );
            self.notifier.notify(Notification::LostCharacters {
                dropped: translation.dropped,
            });
        }
        DispatchReport {
            channel,
            keystrokes: translation.keystrokes(),
            lost_characters: translation.dropped,
        }
    }

    /// Type a credential to the USB gadget.
    ///
    /// A newer USB dispatch supersedes this one while it waits for the
    /// channel.
    pub async fn type_over_usb(
        &self,
        credential: &Credential,
        options: &DispatchOptions,
    ) -> Result<DispatchReport, DispatchError> {
        let translation = compose(&self.translator, credential, options)?;
        let transport = self
            .usb
            .as_ref()
            .ok_or(DispatchError::Transport(TransportError::NotConnected))?;

        let cancel = CancelToken::new();
        if let Some(previous) = self.usb_session.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let _guard = self.usb_lock.lock().await;
        if cancel.is_cancelled() {
            debug!("USB dispatch superseded before writing");
            return Err(DispatchError::Superseded);
        }

        info!("Typing {} keystrokes over USB", translation.keystrokes());
        transport.send_reports(&translation.reports).await?;
        Ok(self.report(OutputChannel::Usb, &translation))
    }

    /// Type only the password, refusing one that embeds the OTP token
    pub async fn quick_type_over_usb(&self, password: &str) -> Result<DispatchReport, DispatchError> {
        if self.translator.contains_otp(password) {
            warn!("Password quick auto-type refused, password contains an OTP");
            return Err(TranslationError::OtpPlaceholder.into());
        }
        let credential = Credential {
            password: Some(password.to_string()),
            ..Default::default()
        };
        self.type_over_usb(&credential, &DispatchOptions::password_only()).await
    }

    /// Queue a credential for `device` without waiting for delivery
    pub fn start_bluetooth(
        &self,
        device: DeviceAddress,
        credential: &Credential,
        options: &DispatchOptions,
    ) -> Result<(DispatchTicket, DispatchReport), DispatchError> {
        let translation = compose(&self.translator, credential, options)?;
        let controller = self.controller.as_ref().ok_or(ControllerError::Stopped)?;

        let report = self.report(OutputChannel::Bluetooth, &translation);
        let ticket = controller.dispatch_keyboard(device, translation.reports)?;
        debug!("Bluetooth dispatch {} queued", ticket.session);
        Ok((ticket, report))
    }

    /// Type a credential to `device` over Bluetooth and wait for delivery
    pub async fn type_over_bluetooth(
        &self,
        device: DeviceAddress,
        credential: &Credential,
        options: &DispatchOptions,
    ) -> Result<DispatchReport, DispatchError> {
        let (ticket, report) = self.start_bluetooth(device, credential, options)?;
        ticket.wait().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use autotype_common::ScancodeReport;
    use autotype_input::LayoutId;
    use autotype_transport::RecordingTransport;

    fn translator() -> Translator {
        Translator::new(LayoutId::EnUs)
    }

    #[test]
    fn test_compose_with_delimiter_and_suffix() {
        let options = DispatchOptions {
            delimiter: Delimiter::Return,
            return_suffix: true,
            ..Default::default()
        };
        let t = compose(&translator(), &Credential::new("a", "b"), &options).unwrap();

        let downs: Vec<u8> = t.reports.iter().step_by(2).map(|r| r.keys[0]).collect();
        assert_eq!(downs, vec![0x04, 0x28, 0x05, 0x28]);
        assert!(t.reports.iter().skip(1).step_by(2).all(|r| r.is_release()));
    }

    #[test]
    fn test_compose_substitutes_otp() {
        let credential = Credential::new("user{OTP}", "pw{TAB}x").with_otp("12");
        let options = DispatchOptions {
            delimiter: Delimiter::None,
            ..Default::default()
        };
        let t = compose(&translator(), &credential, &options).unwrap();
        // u s e r 1 2 p w TAB x
        assert_eq!(t.keystrokes(), 10);
        assert_eq!(t.reports[16], ScancodeReport::key(0x2B, 0));
    }

    #[test]
    fn test_compose_otp_only() {
        let credential = Credential::new("user", "pw").with_otp("123456");
        let options = DispatchOptions {
            otp_only: true,
            ..Default::default()
        };
        assert_eq!(compose(&translator(), &credential, &options).unwrap().keystrokes(), 6);

        let no_code = Credential::new("user", "pw");
        assert!(compose(&translator(), &no_code, &options).unwrap().is_empty());
    }

    #[test]
    fn test_compose_without_code_rejects_token() {
        let credential = Credential::new("user", "{OTP}");
        assert_eq!(
            compose(&translator(), &credential, &DispatchOptions::default()),
            Err(TranslationError::OtpPlaceholder)
        );
    }

    #[tokio::test]
    async fn test_lost_characters_notified() {
        let usb = Arc::new(RecordingTransport::new(OutputChannel::Usb, translator()));
        let (notifier, rx) = ChannelNotifier::new(4);
        let dispatcher = Dispatcher::new(translator(), Arc::new(notifier)).with_usb(usb.clone());

        let report = dispatcher
            .type_over_usb(&Credential::new("ü", "ok"), &DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.lost_characters, 1);
        assert_eq!(report.keystrokes, 3);
        assert_eq!(usb.reports().len(), 6);
        assert_eq!(rx.try_recv(), Ok(Notification::LostCharacters { dropped: 1 }));
    }

    #[tokio::test]
    async fn test_permission_denied_is_root_required() {
        let usb = Arc::new(RecordingTransport::new(OutputChannel::Usb, translator()));
        usb.fail_with(TransportError::PermissionDenied("su: denied".into()));
        let (notifier, _rx) = ChannelNotifier::new(4);
        let dispatcher = Dispatcher::new(translator(), Arc::new(notifier)).with_usb(usb);

        let result = dispatcher.quick_type_over_usb("secret").await;
        assert_eq!(result, Err(DispatchError::RootRequired("su: denied".into())));
    }
}
