//! Autotype - HID credential delivery tool
//!
//! Front-end for the delivery pipeline:
//! - Lists keyboard layouts and dumps the reports a text translates to
//! - Types a credential to the USB HID gadget, natively or through `su`
//! - Runs the Bluetooth controller against the loopback profile

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use autotype_common::{
    to_hex, Credential, Delimiter, DeviceAddress, DispatchOptions, FIDO_REPORT_SIZE,
};
use autotype_controller::{
    open_usb, ControllerConfig, Dispatcher, FidoRelay, HidDeviceController, LogNotifier,
    MemoryDirectory, Notifier, TransactionLayer,
};
use autotype_input::{modifiers_to_string, usage_to_string, Layout, LayoutId};
use autotype_transport::{LoopbackBehavior, LoopbackProfile, ProfileCall, ProfileEvent};
use bytes::Bytes;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::AutotypeConfig;

#[derive(Parser, Debug)]
#[command(name = "autotype")]
#[command(about = "Types stored credentials through a USB or Bluetooth HID keyboard", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host keyboard layout, overrides the configuration file
    #[arg(short, long)]
    layout: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the supported keyboard layouts
    Layouts,

    /// Print the reports a text translates to
    Translate {
        /// Text to translate; Tab/Return tokens are honored
        text: String,
    },

    /// Type a credential to the USB HID gadget
    Usb {
        #[command(flatten)]
        credential: CredentialArgs,

        /// Write the gadget node through a root shell
        #[arg(long)]
        root: bool,

        /// Type only the password, refusing one with an OTP token
        #[arg(long)]
        quick: bool,
    },

    /// Run a Bluetooth dispatch against the loopback profile
    Simulate {
        /// Host address
        #[arg(long, default_value = "00:11:22:33:44:55")]
        host: String,

        #[command(flatten)]
        credential: CredentialArgs,

        /// Also deliver a FIDO request while no safe is open
        #[arg(long)]
        fido_request: bool,
    },

    /// Print the default configuration file
    Config,
}

#[derive(ClapArgs, Debug)]
struct CredentialArgs {
    #[arg(short, long)]
    username: Option<String>,

    #[arg(short, long)]
    password: Option<String>,

    /// Current one-time code for the OTP token
    #[arg(long)]
    otp: Option<String>,

    /// Type only the one-time code
    #[arg(long)]
    otp_only: bool,

    /// Separator between username and password
    #[arg(long, default_value = "tab", value_parser = parse_delimiter)]
    delimiter: Delimiter,

    /// Press Return after the password
    #[arg(long)]
    return_suffix: bool,
}

impl CredentialArgs {
    fn credential(&self) -> Credential {
        Credential {
            username: self.username.clone(),
            password: self.password.clone(),
            otp: self.otp.clone(),
        }
    }

    fn options(&self) -> DispatchOptions {
        DispatchOptions {
            send_username: self.username.is_some(),
            send_password: self.password.is_some(),
            otp_only: self.otp_only,
            delimiter: self.delimiter,
            return_suffix: self.return_suffix,
        }
    }
}

fn parse_delimiter(s: &str) -> Result<Delimiter, String> {
    match s.to_ascii_lowercase().as_str() {
        "tab" => Ok(Delimiter::Tab),
        "return" | "enter" => Ok(Delimiter::Return),
        "none" => Ok(Delimiter::None),
        other => Err(format!("unknown delimiter '{}', expected tab, return or none", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => AutotypeConfig::load(path)?,
        None => AutotypeConfig::default(),
    };
    if let Some(layout) = &args.layout {
        config.layout = layout.clone();
    }

    match args.command {
        Command::Layouts => list_layouts(),
        Command::Translate { text } => translate(&config, &text)?,
        Command::Usb {
            credential,
            root,
            quick,
        } => {
            config.transport.use_root |= root;
            type_over_usb(&config, &credential, quick).await?;
        }
        Command::Simulate {
            host,
            credential,
            fido_request,
        } => simulate(&config, DeviceAddress::new(host), &credential, fido_request).await?,
        Command::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

fn list_layouts() {
    for id in LayoutId::ALL {
        println!("{:<16} {} characters", id.name(), Layout::get(id).len());
    }
}

fn translate(config: &AutotypeConfig, text: &str) -> Result<()> {
    let translator = config.translator();
    let translation = translator.translate(text)?;

    for report in translation.reports.iter().step_by(2) {
        println!(
            "{}  {:<10} {}",
            to_hex(&report.to_bytes()),
            usage_to_string(report.keys[0]),
            modifiers_to_string(report.modifier)
        );
    }
    info!(
        "{} keystrokes in {}, {} characters dropped",
        translation.keystrokes(),
        translator.layout(),
        translation.dropped
    );
    Ok(())
}

async fn type_over_usb(config: &AutotypeConfig, args: &CredentialArgs, quick: bool) -> Result<()> {
    let translator = config.translator();
    let usb = open_usb(&config.transport, translator.clone())
        .await
        .with_context(|| format!("Failed to open {}", config.transport.gadget_path))?;
    let dispatcher = Dispatcher::new(translator, Arc::new(LogNotifier)).with_usb(usb);

    let report = if quick {
        let password = args.password.as_deref().context("--quick needs --password")?;
        dispatcher.quick_type_over_usb(password).await?
    } else {
        dispatcher.type_over_usb(&args.credential(), &args.options()).await?
    };

    info!("Typed {} keystrokes over USB", report.keystrokes);
    if report.lost_characters > 0 {
        warn!("{} characters could not be typed", report.lost_characters);
    }
    Ok(())
}

/// Transaction layer with no safe open
struct NoSafeOpen;

#[async_trait]
impl TransactionLayer for NoSafeOpen {
    fn is_ready(&self) -> bool {
        false
    }

    async fn handle_report(&self, _report: Bytes) -> Vec<Bytes> {
        Vec::new()
    }

    fn request_open_default_file(&self) -> bool {
        info!("Request to open the default safe");
        false
    }
}

async fn simulate(
    config: &AutotypeConfig,
    host: DeviceAddress,
    args: &CredentialArgs,
    fido_request: bool,
) -> Result<()> {
    let profile = Arc::new(LoopbackProfile::with_behavior(LoopbackBehavior::RESPONSIVE));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let controller_config: ControllerConfig = config.controller.clone();
    let translator = config.translator();

    let relay = FidoRelay::new(
        Arc::new(NoSafeOpen),
        profile.clone(),
        notifier.clone(),
        &controller_config.timing,
    )
    .spawn();
    let controller = HidDeviceController::new(
        profile.clone(),
        Arc::new(MemoryDirectory::new()),
        notifier.clone(),
        translator.clone(),
        controller_config,
    )
    .with_relay(relay)
    .spawn();
    profile.attach(controller.event_sink());

    let dispatcher = Dispatcher::new(translator, notifier).with_controller(controller.clone());

    if fido_request {
        controller.require_fido_mode(false).await?;
        controller.connect(host.clone()).await?;
        profile.emit(ProfileEvent::InterruptData {
            device: host.clone(),
            report_id: 0,
            data: Some(Bytes::from(vec![0xFF; FIDO_REPORT_SIZE])),
        });
    }

    // Set up signal handlers for graceful shutdown
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to set up SIGTERM handler")?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("Failed to set up SIGINT handler")?;

    let credential = args.credential();
    let options = args.options();
    tokio::select! {
        result = dispatcher.type_over_bluetooth(host.clone(), &credential, &options) => {
            match result {
                Ok(report) => info!("Typed {} keystrokes to {}", report.keystrokes, host),
                Err(e) => error!("Dispatch to {} failed: {}", host, e),
            }
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    for call in profile.calls() {
        match call {
            ProfileCall::SendReport { device, report_id, data } => {
                println!("send_report {} id={} {}", device, report_id, to_hex(&data))
            }
            other => println!("{:?}", other),
        }
    }

    controller.stop().await?;
    info!("Simulation complete");
    Ok(())
}
