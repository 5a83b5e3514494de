//! HID device controller task
//!
//! The controller owns the profile state and is the only writer of it. All
//! requests, platform callbacks and timer expiries are queued to it as
//! [`Command`]s and applied one at a time with [`step`]; the resulting
//! effects are carried out before the next command is taken. Delays never
//! run on the controller task: timers and payload sends are spawned and post
//! their outcome back as events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use autotype_common::{
    ControllerError, DeviceAddress, DispatchError, HidAppDescriptor, HidMode, ScancodeReport,
    SessionId,
};
use autotype_input::Translator;
use autotype_transport::{
    BluetoothKeyboardTransport, EventSink, HidDeviceProfile, OutputTransport, ProfileEvent,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{ControllerConfig, TimingConfig};
use crate::directory::DeviceDirectory;
use crate::notify::Notifier;
use crate::relay::RelayHandle;
use crate::state::{step, ControllerState, Effect, Event, Timer};

/// Message to the controller task
enum Command {
    Event {
        event: Event,
        reply: Option<oneshot::Sender<Result<(), ControllerError>>>,
    },
    Dispatch {
        session: SessionId,
        device: DeviceAddress,
        reports: Vec<ScancodeReport>,
        cancel: CancelToken,
        reply: oneshot::Sender<Result<(), DispatchError>>,
    },
    Snapshot(oneshot::Sender<ControllerState>),
}

/// Reports of a keyboard dispatch and its waiter
struct Payload {
    reports: Arc<Vec<ScancodeReport>>,
    cancel: CancelToken,
    reply: oneshot::Sender<Result<(), DispatchError>>,
    /// Dropped with the payload, ending its cancel watcher
    _watch: oneshot::Sender<()>,
}

/// Builder for the controller task
pub struct HidDeviceController {
    profile: Arc<dyn HidDeviceProfile>,
    directory: Arc<dyn DeviceDirectory>,
    notifier: Arc<dyn Notifier>,
    translator: Translator,
    config: ControllerConfig,
    relay: Option<RelayHandle>,
}

impl HidDeviceController {
    pub fn new(
        profile: Arc<dyn HidDeviceProfile>,
        directory: Arc<dyn DeviceDirectory>,
        notifier: Arc<dyn Notifier>,
        translator: Translator,
        config: ControllerConfig,
    ) -> Self {
        Self {
            profile,
            directory,
            notifier,
            translator,
            config,
            relay: None,
        }
    }

    /// Forward FIDO interrupt reports to `relay`
    pub fn with_relay(mut self, relay: RelayHandle) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Start the controller task
    pub fn spawn(self) -> ControllerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let keyboard = Arc::new(BluetoothKeyboardTransport::new(
            self.profile.clone(),
            self.translator,
        ));

        let task = ControllerTask {
            state: ControllerState::default(),
            config: self.config,
            profile: self.profile,
            keyboard,
            directory: self.directory,
            notifier: self.notifier,
            relay: self.relay,
            payloads: HashMap::new(),
            channel_lock: Arc::new(Mutex::new(())),
            tx: tx.clone(),
        };
        tokio::spawn(task.run(rx));

        ControllerHandle {
            tx,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }
}

struct ControllerTask {
    state: ControllerState,
    config: ControllerConfig,
    profile: Arc<dyn HidDeviceProfile>,
    keyboard: Arc<BluetoothKeyboardTransport>,
    directory: Arc<dyn DeviceDirectory>,
    notifier: Arc<dyn Notifier>,
    relay: Option<RelayHandle>,
    payloads: HashMap<SessionId, Payload>,
    /// Serializes report writes on the Bluetooth channel
    channel_lock: Arc<Mutex<()>>,
    tx: mpsc::UnboundedSender<Command>,
}

impl ControllerTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("HID device controller started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Event { event, reply } => {
                    let result = self.handle(event).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Command::Dispatch {
                    session,
                    device,
                    reports,
                    cancel,
                    reply,
                } => {
                    debug!("Dispatch {} to {}: {} reports", session, device, reports.len());
                    let watch = self.watch_cancel(session, cancel.clone());
                    self.payloads.insert(
                        session,
                        Payload {
                            reports: Arc::new(reports),
                            cancel,
                            reply,
                            _watch: watch,
                        },
                    );
                    if let Err(e) = self.handle(Event::BeginDispatch { session, device }).await {
                        if let Some(payload) = self.payloads.remove(&session) {
                            let _ = payload.reply.send(Err(e.into()));
                        }
                    }
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
            }

            if self.state.stopped {
                break;
            }
        }

        info!("HID device controller stopped");
    }

    async fn handle(&mut self, event: Event) -> Result<(), ControllerError> {
        let effects = step(&mut self.state, event, self.directory.as_ref(), &self.config)?;
        for effect in effects {
            self.execute(effect).await;
        }
        Ok(())
    }

    fn post(&self, event: Event) {
        let _ = self.tx.send(Command::Event { event, reply: None });
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::RegisterApp(mode) => {
                let app = HidAppDescriptor::for_mode(mode);
                if let Err(e) = self.profile.register_app(mode, &app).await {
                    error!("Failed to register {} profile: {}", mode, e);
                    self.post(Event::Profile(ProfileEvent::AppStatusChanged { registered: false }));
                }
            }
            Effect::UnregisterApp => {
                if let Err(e) = self.profile.unregister_app().await {
                    warn!("Failed to unregister profile: {}", e);
                }
            }
            Effect::Connect(device) => {
                if let Err(e) = self.profile.connect(&device).await {
                    warn!("Connect to {} failed: {}", device, e);
                }
            }
            Effect::Disconnect(device) => {
                if let Err(e) = self.profile.disconnect(&device).await {
                    warn!("Disconnect from {} failed: {}", device, e);
                }
            }
            Effect::StartTimer(timer) => self.start_timer(timer),
            Effect::SendPayload { session, device } => self.send_payload(session, device),
            Effect::CompleteDispatch { session, result } => {
                if let Some(payload) = self.payloads.remove(&session) {
                    if result.is_err() {
                        payload.cancel.cancel();
                    }
                    let _ = payload.reply.send(result);
                }
            }
            Effect::SetKeyboardHost(host) => self.keyboard.set_host(host),
            Effect::RememberHost {
                device,
                role,
                make_default,
            } => {
                debug!("Remembering {} as {:?}", device, role);
                self.directory.cache_role(&device, role);
                if make_default && !self.directory.cache_default(&device) {
                    warn!("{} is not bonded, not made default", device);
                }
            }
            Effect::RelayInterrupt {
                device,
                report_id,
                data,
            } => match &self.relay {
                Some(relay) => relay.relay(device, report_id, data),
                None => debug!("No FIDO relay, dropping report from {}", device),
            },
            Effect::Notify(notification) => self.notifier.notify(notification),
            Effect::Stopped => {
                self.keyboard.set_host(None);
                for (_, payload) in self.payloads.drain() {
                    payload.cancel.cancel();
                    let _ = payload.reply.send(Err(ControllerError::Stopped.into()));
                }
            }
        }
    }

    /// Turn a cancelled ticket token into `CancelDispatch` for `session`
    fn watch_cancel(&self, session: SessionId, cancel: CancelToken) -> oneshot::Sender<()> {
        let (watch, finished) = oneshot::channel();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Dispatch {} cancelled by its caller", session);
                    let _ = tx.send(Command::Event {
                        event: Event::CancelDispatch(session),
                        reply: None,
                    });
                }
                _ = finished => {}
            }
        });
        watch
    }

    fn start_timer(&self, timer: Timer) {
        let timing = &self.config.timing;
        let (delay, event) = match timer {
            Timer::Registration(attempt) => {
                (timing.registration_timeout(), Event::RegistrationTimedOut(attempt))
            }
            Timer::Settle(attempt) => (timing.mode_switch_settle(), Event::SettleElapsed(attempt)),
            Timer::Connect(session) => (timing.connect_timeout(), Event::ConnectTimedOut(session)),
        };

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::Event { event, reply: None });
        });
    }

    fn send_payload(&self, session: SessionId, device: DeviceAddress) {
        let Some(payload) = self.payloads.get(&session) else {
            warn!("No reports for dispatch {}", session);
            self.post(Event::PayloadDelivered {
                session,
                result: Err(DispatchError::Cancelled),
            });
            return;
        };

        let keyboard = self.keyboard.clone();
        let lock = self.channel_lock.clone();
        let reports = payload.reports.clone();
        let cancel = payload.cancel.clone();
        let timing = self.config.timing.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            info!("Typing {} keystrokes to {}", reports.len() / 2, device);
            let result = write_reports(keyboard.as_ref(), &lock, &reports, &cancel, &timing).await;
            if let Err(e) = &result {
                warn!("Dispatch {} to {} failed: {}", session, device, e);
            }
            let _ = tx.send(Command::Event {
                event: Event::PayloadDelivered { session, result },
                reply: None,
            });
        });
    }
}

/// Settle, write every report, settle again.
///
/// A cancelled write sequence ends with a key-up so no key stays pressed.
async fn write_reports(
    keyboard: &dyn OutputTransport,
    lock: &Mutex<()>,
    reports: &[ScancodeReport],
    cancel: &CancelToken,
    timing: &TimingConfig,
) -> Result<(), DispatchError> {
    let _guard = lock.lock().await;

    tokio::select! {
        _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
        _ = tokio::time::sleep(timing.connect_settle()) => {}
    }

    for report in reports {
        if cancel.is_cancelled() {
            let _ = keyboard.send_report(&ScancodeReport::RELEASE).await;
            return Err(DispatchError::Cancelled);
        }
        keyboard.send_report(report).await?;
    }

    tokio::time::sleep(timing.post_send_settle()).await;
    Ok(())
}

/// A keyboard dispatch queued on the controller
pub struct DispatchTicket {
    pub session: SessionId,
    cancel: CancelToken,
    reply: oneshot::Receiver<Result<(), DispatchError>>,
}

impl DispatchTicket {
    /// Token that aborts this dispatch when cancelled
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Wait until the reports were written or the dispatch was aborted
    pub async fn wait(self) -> Result<(), DispatchError> {
        self.reply
            .await
            .unwrap_or(Err(DispatchError::Controller(ControllerError::Stopped)))
    }
}

/// Handle to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Command>,
    next_session: Arc<AtomicU64>,
}

impl ControllerHandle {
    async fn command(&self, event: Event) -> Result<(), ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Event {
                event,
                reply: Some(reply),
            })
            .map_err(|_| ControllerError::Stopped)?;
        rx.await.unwrap_or(Err(ControllerError::Stopped))
    }

    pub async fn register(&self, mode: HidMode) -> Result<(), ControllerError> {
        self.command(Event::Register(mode)).await
    }

    pub async fn unregister(&self) -> Result<(), ControllerError> {
        self.command(Event::Unregister).await
    }

    pub async fn require_keyboard_mode(&self) -> Result<(), ControllerError> {
        self.command(Event::RequireMode {
            mode: HidMode::Keyboard,
            enforce: false,
        })
        .await
    }

    pub async fn require_fido_mode(&self, enforce: bool) -> Result<(), ControllerError> {
        self.command(Event::RequireMode {
            mode: HidMode::Fido,
            enforce,
        })
        .await
    }

    /// Connect `device`, or remember it until a mode is registered
    pub async fn connect(&self, device: DeviceAddress) -> Result<(), ControllerError> {
        self.command(Event::Connect(device)).await
    }

    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.command(Event::Disconnect).await
    }

    /// Connect `device` in keyboard mode and remember it as a keyboard host
    pub async fn pair_as_keyboard(&self, device: DeviceAddress) -> Result<(), ControllerError> {
        self.command(Event::PairAs {
            device,
            mode: HidMode::Keyboard,
        })
        .await
    }

    /// Connect `device` in FIDO mode and make it the default host
    pub async fn pair_as_fido(&self, device: DeviceAddress) -> Result<(), ControllerError> {
        self.command(Event::PairAs {
            device,
            mode: HidMode::Fido,
        })
        .await
    }

    pub async fn stop(&self) -> Result<(), ControllerError> {
        self.command(Event::Stop).await
    }

    /// Queue a platform callback. Safe to call from any thread.
    pub fn platform_event(&self, event: ProfileEvent) {
        if self
            .tx
            .send(Command::Event {
                event: Event::Profile(event),
                reply: None,
            })
            .is_err()
        {
            debug!("Controller stopped, platform event dropped");
        }
    }

    /// Sink that routes platform callbacks to this controller
    pub fn event_sink(&self) -> EventSink {
        let handle = self.clone();
        Arc::new(move |event| handle.platform_event(event))
    }

    /// Type `reports` to `device` in keyboard mode.
    ///
    /// Supersedes any dispatch still waiting on the Bluetooth channel.
    pub fn dispatch_keyboard(
        &self,
        device: DeviceAddress,
        reports: Vec<ScancodeReport>,
    ) -> Result<DispatchTicket, ControllerError> {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let cancel = CancelToken::new();
        let (reply, rx) = oneshot::channel();

        self.tx
            .send(Command::Dispatch {
                session,
                device,
                reports,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| ControllerError::Stopped)?;

        Ok(DispatchTicket {
            session,
            cancel,
            reply: rx,
        })
    }

    /// Abort a dispatch; its waiter receives `Cancelled`
    pub fn cancel(&self, session: SessionId) {
        let _ = self.tx.send(Command::Event {
            event: Event::CancelDispatch(session),
            reply: None,
        });
    }

    pub async fn snapshot(&self) -> Result<ControllerState, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .map_err(|_| ControllerError::Stopped)?;
        rx.await.map_err(|_| ControllerError::Stopped)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}
