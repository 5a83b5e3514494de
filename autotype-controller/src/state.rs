//! HID profile state machine
//!
//! [`step`] is the only place the controller state changes. It takes one
//! [`Event`] and returns the [`Effect`]s the controller task must carry out:
//! profile requests, timers, payload sends and notifications. Nothing here
//! blocks or touches the platform, so every transition can be tested
//! directly.
//!
//! Registration lifecycle:
//!
//! ```text
//! Unregistered -> Registering(mode) -> Registered(mode) -> Unregistering
//!       ^                                                      |
//!       +--------------------- Settling <----------------------+
//! ```
//!
//! `Settling` is only entered when another mode is queued; the register for
//! it is issued once the settle timer fires.

use autotype_common::{
    ConnectionState, ControllerError, DeviceAddress, DispatchError, DispatchPhase, HidMode,
    HostRole, ProfileRegistrationError, SessionId,
};
use autotype_transport::ProfileEvent;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::config::ControllerConfig;
use crate::directory::DeviceDirectory;
use crate::notify::Notification;

/// Profile registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Unregistered,
    Registering { mode: HidMode, attempt: u64 },
    Registered(HidMode),
    Unregistering { attempt: u64 },
    /// Unregister confirmed, waiting before registering the next mode
    Settling { attempt: u64 },
}

impl Registration {
    pub fn mode(&self) -> Option<HidMode> {
        match self {
            Registration::Registered(mode) => Some(*mode),
            _ => None,
        }
    }

    pub fn in_flight(&self) -> bool {
        !matches!(self, Registration::Unregistered | Registration::Registered(_))
    }
}

/// Host being paired for a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub device: DeviceAddress,
    pub mode: HidMode,
}

/// Keyboard payload waiting for its host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayload {
    pub session: SessionId,
    pub device: DeviceAddress,
    pub phase: DispatchPhase,
}

/// Everything the controller knows about the profile and its hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerState {
    pub registration: Registration,
    /// Mode to register once the current registration work settles
    pub next_mode: Option<HidMode>,
    pub connected: Option<DeviceAddress>,
    /// Connect target, postponed while no mode is registered
    pub waiting_for: Option<DeviceAddress>,
    pub pairing: Option<Pairing>,
    pub pending: Option<PendingPayload>,
    /// Generation counter for registration and settle timers
    pub attempt: u64,
    pub stopped: bool,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            registration: Registration::Unregistered,
            next_mode: None,
            connected: None,
            waiting_for: None,
            pairing: None,
            pending: None,
            attempt: 0,
            stopped: false,
        }
    }
}

/// Input to [`step`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Register(HidMode),
    Unregister,
    /// Make sure `mode` is registered, cycling the registration if `enforce`
    RequireMode { mode: HidMode, enforce: bool },
    Connect(DeviceAddress),
    Disconnect,
    PairAs { device: DeviceAddress, mode: HidMode },
    BeginDispatch { session: SessionId, device: DeviceAddress },
    CancelDispatch(SessionId),
    Stop,
    Profile(ProfileEvent),
    RegistrationTimedOut(u64),
    SettleElapsed(u64),
    ConnectTimedOut(SessionId),
    PayloadDelivered {
        session: SessionId,
        result: Result<(), DispatchError>,
    },
}

/// Timer the controller task must start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    Registration(u64),
    Settle(u64),
    Connect(SessionId),
}

/// Work requested by [`step`]
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RegisterApp(HidMode),
    UnregisterApp,
    Connect(DeviceAddress),
    Disconnect(DeviceAddress),
    StartTimer(Timer),
    /// Write the session's reports to the keyboard host
    SendPayload { session: SessionId, device: DeviceAddress },
    /// Answer the dispatch waiter and drop the session
    CompleteDispatch {
        session: SessionId,
        result: Result<(), DispatchError>,
    },
    SetKeyboardHost(Option<DeviceAddress>),
    RememberHost {
        device: DeviceAddress,
        role: HostRole,
        make_default: bool,
    },
    RelayInterrupt {
        device: DeviceAddress,
        report_id: u8,
        data: Bytes,
    },
    Notify(Notification),
    Stopped,
}

/// Apply `event` to `state`.
///
/// Commands that are not valid in the current state fail and leave `state`
/// untouched. Platform and timer events never fail; stale ones are ignored.
pub fn step(
    state: &mut ControllerState,
    event: Event,
    directory: &dyn DeviceDirectory,
    config: &ControllerConfig,
) -> Result<Vec<Effect>, ControllerError> {
    let mut next = state.clone();
    let mut machine = Machine {
        state: &mut next,
        directory,
        config,
        effects: Vec::new(),
    };
    machine.apply(event)?;
    let effects = machine.effects;
    *state = next;
    Ok(effects)
}

struct Machine<'a> {
    state: &'a mut ControllerState,
    directory: &'a dyn DeviceDirectory,
    config: &'a ControllerConfig,
    effects: Vec<Effect>,
}

impl Machine<'_> {
    fn apply(&mut self, event: Event) -> Result<(), ControllerError> {
        if self.state.stopped {
            return match event {
                Event::Register(_)
                | Event::Unregister
                | Event::RequireMode { .. }
                | Event::Connect(_)
                | Event::Disconnect
                | Event::PairAs { .. }
                | Event::BeginDispatch { .. } => Err(ControllerError::Stopped),
                _ => Ok(()),
            };
        }

        match event {
            Event::Register(mode) => {
                if self.state.registration != Registration::Unregistered {
                    return Err(ControllerError::RegistrationInFlight);
                }
                self.check_mode(mode)?;
                self.register(mode);
            }
            Event::Unregister => match self.state.registration {
                Registration::Registered(_) => {
                    self.state.next_mode = None;
                    self.unregister();
                }
                Registration::Unregistered => return Err(ControllerError::NotRegistered),
                _ => return Err(ControllerError::RegistrationInFlight),
            },
            Event::RequireMode { mode, enforce } => {
                self.check_mode(mode)?;
                self.require(mode, enforce);
            }
            Event::Connect(device) => self.connect(device),
            Event::Disconnect => {
                self.state.waiting_for = None;
                self.disconnect();
            }
            Event::PairAs { device, mode } => {
                self.check_mode(mode)?;
                info!("Pairing {} as {} host", device, mode);
                self.state.pairing = Some(Pairing {
                    device: device.clone(),
                    mode,
                });
                self.disconnect();
                self.require(mode, mode == HidMode::Fido);
                self.connect(device);
            }
            Event::BeginDispatch { session, device } => self.begin_dispatch(session, device),
            Event::CancelDispatch(session) => {
                if self.pending_is(session) {
                    self.finish_dispatch(Err(DispatchError::Cancelled));
                    self.revert_to_idle();
                }
            }
            Event::Stop => self.stop(),
            Event::Profile(event) => self.profile_event(event),
            Event::RegistrationTimedOut(attempt) => self.registration_timed_out(attempt),
            Event::SettleElapsed(attempt) => {
                if self.state.registration != (Registration::Settling { attempt }) {
                    trace!("Stale settle timer {}", attempt);
                    return Ok(());
                }
                match self.state.next_mode.take() {
                    Some(mode) => self.register(mode),
                    None => self.state.registration = Registration::Unregistered,
                }
            }
            Event::ConnectTimedOut(session) => self.connect_timed_out(session),
            Event::PayloadDelivered { session, result } => {
                if !self.pending_is(session) {
                    debug!("Delivery of stale session {} ignored", session);
                    return Ok(());
                }
                if let (Ok(()), Some(pending)) = (&result, &self.state.pending) {
                    self.effects.push(Effect::RememberHost {
                        device: pending.device.clone(),
                        role: HostRole::KeyboardHost,
                        make_default: false,
                    });
                }
                self.finish_dispatch(result);
                self.revert_to_idle();
            }
        }
        Ok(())
    }

    fn check_mode(&self, mode: HidMode) -> Result<(), ControllerError> {
        if mode == HidMode::Fido && !self.config.fido_enabled {
            return Err(ControllerError::FidoDisabled);
        }
        Ok(())
    }

    fn next_attempt(&mut self) -> u64 {
        self.state.attempt += 1;
        self.state.attempt
    }

    fn register(&mut self, mode: HidMode) {
        let attempt = self.next_attempt();
        debug!("Registering {} profile (attempt {})", mode, attempt);
        self.state.registration = Registration::Registering { mode, attempt };
        self.effects.push(Effect::RegisterApp(mode));
        self.effects.push(Effect::StartTimer(Timer::Registration(attempt)));
    }

    fn unregister(&mut self) {
        self.disconnect_current();
        let attempt = self.next_attempt();
        debug!("Unregistering profile (attempt {})", attempt);
        self.state.registration = Registration::Unregistering { attempt };
        self.effects.push(Effect::UnregisterApp);
        self.effects.push(Effect::StartTimer(Timer::Registration(attempt)));
    }

    fn require(&mut self, mode: HidMode, enforce: bool) {
        match self.state.registration {
            Registration::Registered(current) if current == mode && !enforce => {
                trace!("{} mode already registered", mode);
                self.state.next_mode = None;
            }
            Registration::Registered(current) => {
                info!("Switching profile from {} to {} mode", current, mode);
                self.state.next_mode = Some(mode);
                self.unregister();
            }
            Registration::Unregistered => self.register(mode),
            Registration::Registering { mode: current, .. } if current == mode && !enforce => {
                self.state.next_mode = None;
            }
            _ => {
                debug!("Registration in flight, queueing {} mode", mode);
                self.state.next_mode = Some(mode);
            }
        }
    }

    fn connect(&mut self, device: DeviceAddress) {
        self.state.waiting_for = Some(device.clone());
        if self.state.registration.mode().is_none() {
            debug!("Connect to {} postponed until registered", device);
            return;
        }
        if self.state.connected.as_ref() == Some(&device) {
            trace!("{} already connected", device);
            return;
        }
        self.disconnect_current();
        self.effects.push(Effect::Connect(device));
    }

    fn disconnect(&mut self) {
        self.disconnect_current();
    }

    fn disconnect_current(&mut self) {
        if let Some(device) = self.state.connected.take() {
            if self.state.registration == Registration::Registered(HidMode::Keyboard) {
                self.effects.push(Effect::SetKeyboardHost(None));
            }
            self.effects.push(Effect::Disconnect(device));
        }
    }

    fn begin_dispatch(&mut self, session: SessionId, device: DeviceAddress) {
        if let Some(old) = self.state.pending.take() {
            info!("Dispatch {} superseded by {}", old.session, session);
            self.effects.push(Effect::CompleteDispatch {
                session: old.session,
                result: Err(DispatchError::Superseded),
            });
        }

        self.effects.push(Effect::StartTimer(Timer::Connect(session)));
        self.disconnect();
        self.require(HidMode::Keyboard, false);

        let phase = if self.state.registration == Registration::Registered(HidMode::Keyboard) {
            DispatchPhase::Connecting
        } else {
            DispatchPhase::SwitchingMode
        };
        self.state.pending = Some(PendingPayload {
            session,
            device: device.clone(),
            phase,
        });
        self.connect(device);
    }

    fn pending_is(&self, session: SessionId) -> bool {
        self.state.pending.as_ref().map(|p| p.session) == Some(session)
    }

    fn finish_dispatch(&mut self, result: Result<(), DispatchError>) {
        if let Some(pending) = self.state.pending.take() {
            self.effects.push(Effect::CompleteDispatch {
                session: pending.session,
                result,
            });
        }
    }

    fn revert_to_idle(&mut self) {
        match self.config.idle_mode.mode() {
            Some(HidMode::Fido) if !self.config.fido_enabled => {}
            Some(mode) => self.require(mode, false),
            None => {}
        }
    }

    fn stop(&mut self) {
        info!("Stopping HID device controller");
        self.finish_dispatch(Err(DispatchError::Controller(ControllerError::Stopped)));
        self.disconnect_current();
        match self.state.registration {
            Registration::Registered(_) | Registration::Registering { .. } => {
                self.effects.push(Effect::UnregisterApp);
            }
            _ => {}
        }
        self.state.registration = Registration::Unregistered;
        self.state.next_mode = None;
        self.state.waiting_for = None;
        self.state.pairing = None;
        self.state.stopped = true;
        self.effects.push(Effect::Stopped);
    }

    fn registration_timed_out(&mut self, attempt: u64) {
        match self.state.registration {
            Registration::Registering { mode, attempt: a } if a == attempt => {
                warn!("{} registration timed out", mode);
                self.state.registration = Registration::Unregistered;
                self.state.next_mode = None;
                self.effects.push(Effect::UnregisterApp);
                self.effects.push(Effect::Notify(Notification::RegistrationUnclean));
                self.finish_dispatch(Err(DispatchError::Controller(
                    ProfileRegistrationError::TimedOut(mode).into(),
                )));
            }
            Registration::Unregistering { attempt: a } if a == attempt => {
                warn!("Unregister not confirmed in time, continuing");
                self.unregistered();
            }
            _ => trace!("Stale registration timer {}", attempt),
        }
    }

    fn connect_timed_out(&mut self, session: SessionId) {
        let device = match &self.state.pending {
            Some(p) if p.session == session && p.phase != DispatchPhase::Sending => p.device.clone(),
            _ => return,
        };
        warn!("{} did not connect for dispatch {}", device, session);
        if self.state.waiting_for.as_ref() == Some(&device) {
            self.state.waiting_for = None;
        }
        self.finish_dispatch(Err(DispatchError::ConnectTimeout(device.to_string())));
        self.effects.push(Effect::Notify(Notification::BluetoothUnclean { device }));
        self.revert_to_idle();
    }

    /// Unregister confirmed
    fn unregistered(&mut self) {
        if self.state.next_mode.is_some() {
            let attempt = self.next_attempt();
            self.state.registration = Registration::Settling { attempt };
            self.effects.push(Effect::StartTimer(Timer::Settle(attempt)));
        } else {
            self.state.registration = Registration::Unregistered;
        }
    }

    fn profile_event(&mut self, event: ProfileEvent) {
        match event {
            ProfileEvent::AppStatusChanged { registered: true } => self.app_registered(),
            ProfileEvent::AppStatusChanged { registered: false } => self.app_unregistered(),
            ProfileEvent::ConnectionStateChanged {
                device,
                state,
                bonded,
            } => match state {
                ConnectionState::Connected => self.host_connected(device, bonded),
                ConnectionState::Disconnected => self.host_disconnected(device),
                _ => trace!("{} is {:?}", device, state),
            },
            ProfileEvent::InterruptData {
                device,
                report_id,
                data,
            } => {
                if self.state.registration != Registration::Registered(HidMode::Fido) {
                    trace!("Interrupt data from {} outside FIDO mode ignored", device);
                    return;
                }
                match data {
                    Some(data) if !data.is_empty() => self.effects.push(Effect::RelayInterrupt {
                        device,
                        report_id,
                        data,
                    }),
                    _ => trace!("Empty interrupt data from {} ignored", device),
                }
            }
            ProfileEvent::AdapterStateChanged { enabled: false } => {
                info!("Bluetooth adapter turned off");
                self.stop();
            }
            ProfileEvent::AdapterStateChanged { enabled: true } => {
                debug!("Bluetooth adapter turned on");
            }
        }
    }

    fn app_registered(&mut self) {
        let mode = match self.state.registration {
            Registration::Registering { mode, .. } => mode,
            other => {
                debug!("Registration callback in {:?} ignored", other);
                return;
            }
        };
        info!("{} profile registered", mode);
        self.state.registration = Registration::Registered(mode);

        if let Some(next) = self.state.next_mode {
            debug!("Cycling registration to {} mode", next);
            self.unregister();
            return;
        }

        let target = match self.state.waiting_for.clone() {
            Some(device) => Some(device),
            None if self.state.pairing.is_none() => self.directory.default_host_for(mode),
            None => None,
        };
        if let Some(device) = target {
            if let Some(pending) = self.state.pending.as_mut() {
                if pending.device == device && pending.phase == DispatchPhase::SwitchingMode {
                    pending.phase = DispatchPhase::Connecting;
                }
            }
            self.connect(device);
        }
    }

    fn app_unregistered(&mut self) {
        match self.state.registration {
            Registration::Registering { mode, .. } => {
                warn!("Platform declined {} registration", mode);
                self.state.registration = Registration::Unregistered;
                self.state.next_mode = None;
                self.state.pairing = None;
                self.effects.push(Effect::Notify(Notification::RegistrationUnclean));
                self.finish_dispatch(Err(DispatchError::Controller(
                    ProfileRegistrationError::Declined(mode).into(),
                )));
            }
            Registration::Registered(mode) => {
                warn!("{} profile registration lost", mode);
                self.disconnect_current();
                self.state.registration = Registration::Unregistered;
                self.finish_dispatch(Err(DispatchError::Controller(ControllerError::NotRegistered)));
            }
            Registration::Unregistering { .. } => {
                debug!("Profile unregistered");
                self.unregistered();
            }
            other => debug!("Unregister callback in {:?} ignored", other),
        }
    }

    fn host_connected(&mut self, device: DeviceAddress, bonded: bool) {
        info!("{} connected", device);
        self.state.connected = Some(device.clone());
        self.state.waiting_for = Some(device.clone());

        if let Some(pairing) = self.state.pairing.clone().filter(|_| bonded) {
            if pairing.device == device {
                self.state.pairing = None;
                self.effects.push(Effect::RememberHost {
                    device,
                    role: pairing.mode.host_role(),
                    make_default: pairing.mode == HidMode::Fido,
                });
                if self.config.fido_enabled {
                    self.require(HidMode::Fido, false);
                }
                return;
            }
        }

        match self.state.registration {
            Registration::Registered(HidMode::Keyboard) => {
                self.effects.push(Effect::SetKeyboardHost(Some(device.clone())));
                if !bonded {
                    debug!("{} not bonded, no keyboard payload", device);
                    return;
                }
                if let Some(pairing) = &self.state.pairing {
                    debug!("Pairing {} in progress, no keyboard payload", pairing.device);
                    return;
                }
                if let Some(pending) = self.state.pending.as_mut() {
                    if pending.device == device && pending.phase != DispatchPhase::Sending {
                        pending.phase = DispatchPhase::Sending;
                        self.effects.push(Effect::SendPayload {
                            session: pending.session,
                            device,
                        });
                    }
                }
            }
            Registration::Registered(HidMode::Fido) => {
                if bonded && self.directory.role_of(&device) == HostRole::Unknown {
                    self.effects.push(Effect::RememberHost {
                        device,
                        role: HostRole::FidoHost,
                        make_default: false,
                    });
                }
            }
            _ => {}
        }
    }

    fn host_disconnected(&mut self, device: DeviceAddress) {
        info!("{} disconnected", device);
        if self.state.connected.as_ref() == Some(&device) {
            self.state.connected = None;
            if self.state.registration == Registration::Registered(HidMode::Keyboard) {
                self.effects.push(Effect::SetKeyboardHost(None));
            }
        }
        // Only a connect that was actually issued can have failed
        if self.state.registration.mode().is_some() && self.state.waiting_for.as_ref() == Some(&device) {
            self.state.waiting_for = None;
        }
    }
}
