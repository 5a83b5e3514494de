//! Integration tests for the controller and dispatcher
//!
//! These tests run the controller task against the loopback profile, so every
//! profile request and callback goes through the same paths a platform stack
//! would use.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autotype_common::{
    ConnectionState, ControllerError, Credential, DeviceAddress, DispatchError, DispatchOptions,
    HidMode, HostRole, OutputChannel, PairedDeviceRecord, TranslationError,
};
use autotype_controller::{
    ChannelNotifier, ControllerConfig, ControllerHandle, DeviceDirectory, Dispatcher, FidoRelay,
    HidDeviceController, MemoryDirectory, Notification, Registration, TransactionLayer,
};
use autotype_input::{LayoutId, Translator};
use autotype_transport::{
    LoopbackBehavior, LoopbackProfile, ProfileCall, ProfileEvent, RecordingTransport,
};
use bytes::Bytes;
use crossbeam_channel::Receiver;

const HOST: &str = "AA:BB:CC:DD:EE:01";

#[derive(Default)]
struct StubTransactions {
    ready: AtomicBool,
    open_requests: AtomicUsize,
}

#[async_trait]
impl TransactionLayer for StubTransactions {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn handle_report(&self, report: Bytes) -> Vec<Bytes> {
        vec![report]
    }

    fn request_open_default_file(&self) -> bool {
        self.open_requests.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct Rig {
    profile: Arc<LoopbackProfile>,
    directory: Arc<MemoryDirectory>,
    notes: Receiver<Notification>,
    transactions: Arc<StubTransactions>,
    controller: ControllerHandle,
    dispatcher: Dispatcher,
}

fn rig(behavior: LoopbackBehavior) -> Rig {
    let profile = Arc::new(LoopbackProfile::with_behavior(behavior));
    let directory = Arc::new(MemoryDirectory::new());
    let (notifier, notes) = ChannelNotifier::new(16);
    let notifier = Arc::new(notifier);
    let transactions = Arc::new(StubTransactions::default());
    let config = ControllerConfig::immediate();
    let translator = Translator::new(LayoutId::EnUs);

    let relay = FidoRelay::new(
        transactions.clone(),
        profile.clone(),
        notifier.clone(),
        &config.timing,
    )
    .spawn();
    let controller = HidDeviceController::new(
        profile.clone(),
        directory.clone(),
        notifier.clone(),
        translator.clone(),
        config,
    )
    .with_relay(relay)
    .spawn();
    profile.attach(controller.event_sink());

    let dispatcher = Dispatcher::new(translator, notifier).with_controller(controller.clone());

    Rig {
        profile,
        directory,
        notes,
        transactions,
        controller,
        dispatcher,
    }
}

/// Let the controller work through everything queued
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn host() -> DeviceAddress {
    DeviceAddress::new(HOST)
}

/// A Bluetooth dispatch switches to keyboard mode, types, then returns to FIDO
#[tokio::test(start_paused = true)]
async fn test_bluetooth_dispatch_round_trip() {
    let rig = rig(LoopbackBehavior::RESPONSIVE);
    rig.controller.require_fido_mode(false).await.unwrap();
    settle().await;

    let report = rig
        .dispatcher
        .type_over_bluetooth(host(), &Credential::new("ab", "c"), &DispatchOptions::default())
        .await
        .unwrap();
    settle().await;

    assert_eq!(report.channel, OutputChannel::Bluetooth);
    assert_eq!(report.keystrokes, 4);
    assert_eq!(
        rig.profile.sent_reports(),
        vec![
            vec![0, 0, 0x04, 0, 0, 0, 0, 0],
            vec![0; 8],
            vec![0, 0, 0x05, 0, 0, 0, 0, 0],
            vec![0; 8],
            vec![0, 0, 0x2B, 0, 0, 0, 0, 0],
            vec![0; 8],
            vec![0, 0, 0x06, 0, 0, 0, 0, 0],
            vec![0; 8],
        ]
    );
    assert!(rig.directory.is_keyboard_host(&host()));

    let snapshot = rig.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.registration, Registration::Registered(HidMode::Fido));
    assert!(snapshot.pending.is_none());
}

/// During a mode switch the unregister is issued before the next register
#[tokio::test(start_paused = true)]
async fn test_mode_switch_unregisters_first() {
    let rig = rig(LoopbackBehavior::RESPONSIVE);
    rig.controller.require_fido_mode(false).await.unwrap();
    settle().await;
    rig.controller.require_keyboard_mode().await.unwrap();
    settle().await;

    let registrations: Vec<_> = rig
        .profile
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ProfileCall::RegisterApp(_) | ProfileCall::UnregisterApp))
        .collect();
    assert_eq!(
        registrations,
        vec![
            ProfileCall::RegisterApp(HidMode::Fido),
            ProfileCall::UnregisterApp,
            ProfileCall::RegisterApp(HidMode::Keyboard),
        ]
    );
}

/// A host that never connects times the dispatch out without typing
#[tokio::test(start_paused = true)]
async fn test_connect_timeout_sends_nothing() {
    let rig = rig(LoopbackBehavior {
        connect_succeeds: false,
        ..LoopbackBehavior::RESPONSIVE
    });

    let (ticket, _) = rig
        .dispatcher
        .start_bluetooth(host(), &Credential::new("user", "pw"), &DispatchOptions::default())
        .unwrap();
    let result = ticket.wait().await;

    assert_eq!(result, Err(DispatchError::ConnectTimeout(HOST.to_string())));
    assert_eq!(
        rig.notes.try_recv(),
        Ok(Notification::BluetoothUnclean { device: host() })
    );

    rig.profile.emit(ProfileEvent::ConnectionStateChanged {
        device: host(),
        state: ConnectionState::Connected,
        bonded: true,
    });
    settle().await;
    assert!(rig.profile.sent_reports().is_empty());
}

/// Cancelling the ticket token aborts a dispatch still waiting for its host
#[tokio::test(start_paused = true)]
async fn test_ticket_token_cancels_waiting_dispatch() {
    let rig = rig(LoopbackBehavior {
        connect_succeeds: false,
        ..LoopbackBehavior::RESPONSIVE
    });

    let (ticket, _) = rig
        .dispatcher
        .start_bluetooth(host(), &Credential::new("user", "pw"), &DispatchOptions::default())
        .unwrap();
    let started = tokio::time::Instant::now();
    ticket.cancel_token().cancel();

    assert_eq!(ticket.wait().await, Err(DispatchError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));

    // the connect timer expires later without reporting anything
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(rig.notes.try_recv().is_err());
    let snapshot = rig.controller.snapshot().await.unwrap();
    assert!(snapshot.pending.is_none());
    assert!(rig.profile.sent_reports().is_empty());
}

/// A second dispatch supersedes one still waiting for its host
#[tokio::test(start_paused = true)]
async fn test_second_dispatch_supersedes_first() {
    let rig = rig(LoopbackBehavior {
        connect_succeeds: false,
        ..LoopbackBehavior::RESPONSIVE
    });
    let credential = Credential::new("user", "pw");

    let (first, _) = rig
        .dispatcher
        .start_bluetooth(host(), &credential, &DispatchOptions::default())
        .unwrap();
    let (second, _) = rig
        .dispatcher
        .start_bluetooth(host(), &credential, &DispatchOptions::default())
        .unwrap();

    assert_ne!(first.session, second.session);
    assert_eq!(first.wait().await, Err(DispatchError::Superseded));

    rig.controller.cancel(second.session);
    assert_eq!(second.wait().await, Err(DispatchError::Cancelled));
}

/// Register while a registration is in flight is rejected
#[tokio::test(start_paused = true)]
async fn test_register_rejected_while_in_flight() {
    let rig = rig(LoopbackBehavior::SILENT);

    rig.controller.register(HidMode::Keyboard).await.unwrap();
    assert_eq!(
        rig.controller.register(HidMode::Fido).await,
        Err(ControllerError::RegistrationInFlight)
    );
}

/// An unanswered registration is cleaned up and reported
#[tokio::test(start_paused = true)]
async fn test_registration_timeout_notifies() {
    let rig = rig(LoopbackBehavior::SILENT);

    rig.controller.register(HidMode::Keyboard).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(rig.notes.try_recv(), Ok(Notification::RegistrationUnclean));
    assert_eq!(rig.profile.calls().last(), Some(&ProfileCall::UnregisterApp));
    let snapshot = rig.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.registration, Registration::Unregistered);
}

/// A declined registration is reported and leaves the profile unregistered
#[tokio::test(start_paused = true)]
async fn test_declined_registration_notifies() {
    let rig = rig(LoopbackBehavior {
        decline_registration: true,
        ..LoopbackBehavior::RESPONSIVE
    });

    rig.controller.register(HidMode::Fido).await.unwrap();
    settle().await;

    assert_eq!(rig.notes.try_recv(), Ok(Notification::RegistrationUnclean));
    let snapshot = rig.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.registration, Registration::Unregistered);
}

/// A registration the platform refuses outright is handled like a decline
#[tokio::test(start_paused = true)]
async fn test_failed_registration_notifies() {
    let rig = rig(LoopbackBehavior {
        fail_registration: true,
        ..LoopbackBehavior::RESPONSIVE
    });

    rig.controller.register(HidMode::Keyboard).await.unwrap();
    settle().await;

    assert_eq!(rig.notes.try_recv(), Ok(Notification::RegistrationUnclean));
    let snapshot = rig.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.registration, Registration::Unregistered);
}

/// Registration in FIDO mode reconnects the default FIDO host exactly once
#[tokio::test(start_paused = true)]
async fn test_default_fido_host_connected_once() {
    let rig = rig(LoopbackBehavior::RESPONSIVE);
    rig.directory
        .upsert(PairedDeviceRecord::new(HOST, "laptop", HostRole::FidoHost));
    assert!(rig.directory.cache_default(&host()));

    rig.controller.register(HidMode::Fido).await.unwrap();
    settle().await;

    assert_eq!(rig.profile.connect_count(&host()), 1);
}

/// Pairing as FIDO host remembers the role and makes the host default
#[tokio::test(start_paused = true)]
async fn test_pair_as_fido_sets_default() {
    let rig = rig(LoopbackBehavior::RESPONSIVE);

    rig.controller.pair_as_fido(host()).await.unwrap();
    settle().await;

    let default = rig.directory.default_host().unwrap();
    assert_eq!(default.address, host());
    assert_eq!(default.role, HostRole::FidoHost);
}

/// Interrupt reports reach the transaction layer only when a safe is open;
/// until then every request reminds the user but opens the safe once
#[tokio::test(start_paused = true)]
async fn test_fido_relay_debounces_open_requests() {
    let rig = rig(LoopbackBehavior::RESPONSIVE);
    rig.controller.register(HidMode::Fido).await.unwrap();
    settle().await;

    let interrupt = |data: &'static [u8]| ProfileEvent::InterruptData {
        device: host(),
        report_id: 0,
        data: Some(Bytes::from_static(data)),
    };

    rig.profile.emit(interrupt(b"\x01"));
    rig.profile.emit(interrupt(b"\x02"));
    settle().await;
    assert_eq!(rig.transactions.open_requests.load(Ordering::SeqCst), 1);
    assert!(rig.profile.sent_reports().is_empty());
    let reminders = rig
        .notes
        .try_iter()
        .filter(|n| matches!(n, Notification::ActionRequired { .. }))
        .count();
    assert_eq!(reminders, 2);

    rig.transactions.ready.store(true, Ordering::SeqCst);
    rig.profile.emit(interrupt(b"\x03"));
    settle().await;
    assert_eq!(rig.profile.sent_reports(), vec![vec![0x03]]);
}

/// Turning the adapter off stops the controller
#[tokio::test(start_paused = true)]
async fn test_adapter_off_stops_controller() {
    let rig = rig(LoopbackBehavior::RESPONSIVE);
    rig.controller.register(HidMode::Keyboard).await.unwrap();
    settle().await;

    rig.profile
        .emit(ProfileEvent::AdapterStateChanged { enabled: false });
    settle().await;

    assert!(!rig.controller.is_running());
    assert_eq!(
        rig.controller.register(HidMode::Keyboard).await,
        Err(ControllerError::Stopped)
    );
}

/// The USB path refuses an unreplaced OTP token before writing anything
#[tokio::test]
async fn test_usb_rejects_otp_in_password() {
    let translator = Translator::new(LayoutId::EnUs);
    let usb = Arc::new(RecordingTransport::new(OutputChannel::Usb, translator.clone()));
    let (notifier, _notes) = ChannelNotifier::new(4);
    let dispatcher = Dispatcher::new(translator, Arc::new(notifier)).with_usb(usb.clone());

    let quick = dispatcher.quick_type_over_usb("pw{OTP}").await;
    assert_eq!(
        quick,
        Err(DispatchError::Translation(TranslationError::OtpPlaceholder))
    );

    let full = dispatcher
        .type_over_usb(&Credential::new("user", "pw{OTP}"), &DispatchOptions::default())
        .await;
    assert_eq!(
        full,
        Err(DispatchError::Translation(TranslationError::OtpPlaceholder))
    );
    assert_eq!(usb.write_count(), 0);

    let report = dispatcher
        .type_over_usb(
            &Credential::new("user", "pw{OTP}").with_otp("42"),
            &DispatchOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.keystrokes, 9);
}
