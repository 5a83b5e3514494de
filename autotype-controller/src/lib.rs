//! Autotype Controller - Bluetooth HID profile control and credential dispatch
//!
//! This crate drives the delivery side of the pipeline:
//! - HID profile state machine (keyboard/FIDO mode switching, host connects)
//! - Controller task owning that state
//! - Credential dispatch over USB or Bluetooth
//! - FIDO interrupt relay

pub mod cancel;
pub mod config;
pub mod controller;
pub mod directory;
pub mod dispatch;
pub mod notify;
pub mod relay;
pub mod state;

pub use cancel::CancelToken;
pub use config::*;
pub use controller::*;
pub use directory::*;
pub use dispatch::*;
pub use notify::*;
pub use relay::*;
pub use state::{step, ControllerState, Effect, Event, Pairing, PendingPayload, Registration, Timer};
