//! Autotype Common - Shared types and wire definitions
//!
//! This crate contains the types shared across the Autotype pipeline:
//! - HID keyboard report format, descriptors and SDP/QoS settings
//! - Mode, host and credential types
//! - Common error types

pub mod protocol;
pub mod types;
pub mod error;

pub use protocol::*;
pub use types::*;
pub use error::*;
