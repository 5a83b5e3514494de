//! HID wire format definitions
//!
//! Two report formats cross the wire:
//! - the 8-byte boot-protocol keyboard report (USB gadget and Bluetooth)
//! - 64-byte FIDO/U2F HID reports (Bluetooth only, relayed opaquely)

use serde::{Deserialize, Serialize};

/// Size of a boot-protocol keyboard report
pub const KEYBOARD_REPORT_SIZE: usize = 8;

/// Size of a FIDO HID report in either direction
pub const FIDO_REPORT_SIZE: usize = 64;

/// Report id of the keyboard collection in the Bluetooth descriptor
pub const KEYBOARD_REPORT_ID: u8 = 1;

/// Default USB HID gadget node
pub const DEFAULT_GADGET_PATH: &str = "/dev/hidg0";

// ============================================================================
// Keyboard Report
// ============================================================================

/// Modifier bits of byte 0
pub mod modifier {
    pub const NONE: u8 = 0x00;
    pub const LEFT_CTRL: u8 = 0x01;
    pub const LEFT_SHIFT: u8 = 0x02;
    pub const LEFT_ALT: u8 = 0x04;
    pub const LEFT_GUI: u8 = 0x08;
    pub const RIGHT_CTRL: u8 = 0x10;
    pub const RIGHT_SHIFT: u8 = 0x20;
    /// AltGr on ISO layouts
    pub const RIGHT_ALT: u8 = 0x40;
    pub const RIGHT_GUI: u8 = 0x80;
}

/// Keyboard page usage ids (HID Usage Tables, page 0x07)
pub mod usage {
    pub const A: u8 = 0x04;
    pub const ONE: u8 = 0x1E;
    pub const ZERO: u8 = 0x27;
    pub const ENTER: u8 = 0x28;
    pub const ESCAPE: u8 = 0x29;
    pub const BACKSPACE: u8 = 0x2A;
    pub const TAB: u8 = 0x2B;
    pub const SPACE: u8 = 0x2C;
    pub const MINUS: u8 = 0x2D;
    pub const EQUAL: u8 = 0x2E;
    pub const LEFT_BRACKET: u8 = 0x2F;
    pub const RIGHT_BRACKET: u8 = 0x30;
    pub const BACKSLASH: u8 = 0x31;
    /// `#~` key on ISO keyboards
    pub const NON_US_HASH: u8 = 0x32;
    pub const SEMICOLON: u8 = 0x33;
    pub const APOSTROPHE: u8 = 0x34;
    pub const GRAVE: u8 = 0x35;
    pub const COMMA: u8 = 0x36;
    pub const PERIOD: u8 = 0x37;
    pub const SLASH: u8 = 0x38;
    /// `<>` key on ISO keyboards
    pub const NON_US_BACKSLASH: u8 = 0x64;
    /// Highest usage declared by the keyboard report descriptor
    pub const MAX: u8 = 0x65;
}

/// One boot-protocol keyboard report: `{modifier, reserved, keys[6]}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScancodeReport {
    /// Modifier bitmask
    pub modifier: u8,
    /// Always zero
    pub reserved: u8,
    /// Pressed key usages, unused slots zero
    pub keys: [u8; 6],
}

impl ScancodeReport {
    /// All keys released
    pub const RELEASE: Self = Self {
        modifier: 0,
        reserved: 0,
        keys: [0; 6],
    };

    /// Single key press with modifiers
    pub const fn key(usage: u8, modifier: u8) -> Self {
        Self {
            modifier,
            reserved: 0,
            keys: [usage, 0, 0, 0, 0, 0],
        }
    }

    pub fn is_release(&self) -> bool {
        *self == Self::RELEASE
    }

    /// Serialize to the byte-exact wire layout
    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_SIZE] {
        let mut out = [0u8; KEYBOARD_REPORT_SIZE];
        out[0] = self.modifier;
        out[1] = self.reserved;
        out[2..].copy_from_slice(&self.keys);
        out
    }

    /// Parse a report, returning `None` unless exactly 8 bytes are given
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != KEYBOARD_REPORT_SIZE {
            return None;
        }
        let mut keys = [0u8; 6];
        keys.copy_from_slice(&data[2..]);
        Some(Self {
            modifier: data[0],
            reserved: data[1],
            keys,
        })
    }
}

impl std::fmt::Display for ScancodeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&to_hex(&self.to_bytes()))
    }
}

/// Concatenate reports into one contiguous buffer
pub fn reports_to_bytes(reports: &[ScancodeReport]) -> Vec<u8> {
    reports.iter().flat_map(|r| r.to_bytes()).collect()
}

/// Lowercase hex without separators, for logs
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Report Descriptors
// ============================================================================

/// Keyboard report descriptor advertised over Bluetooth (report id 1)
pub const KEYBOARD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, KEYBOARD_REPORT_ID, // Report ID
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute) modifier byte
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x01, //   Input (Constant) reserved byte
    0x75, 0x08, //   Report Size (8)
    0x95, 0x06, //   Report Count (6)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, usage::MAX, // Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, usage::MAX, // Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array) key arrays
    0xC0, // End Collection
];

/// FIDO U2F HID report descriptor (usage page 0xF1D0)
pub const FIDO_REPORT_DESCRIPTOR: &[u8] = &[
    0x06, 0xD0, 0xF1, // Usage Page (FIDO Alliance)
    0x09, 0x01, // Usage (U2F Authenticator Device)
    0xA1, 0x01, // Collection (Application)
    0x09, 0x20, //   Usage (Input Report Data)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, FIDO_REPORT_SIZE as u8, // Report Count (64)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x09, 0x21, //   Usage (Output Report Data)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, FIDO_REPORT_SIZE as u8, // Report Count (64)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0xC0, // End Collection
];

// ============================================================================
// SDP / QoS
// ============================================================================

/// L2CAP quality-of-service parameters requested at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosSettings {
    pub token_rate: u32,
    pub token_bucket_size: u32,
    pub peak_bandwidth: u32,
    /// Microseconds
    pub latency: u32,
}

/// Everything the platform needs to register the HID Device app for a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidAppDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub provider: &'static str,
    /// HID subclass byte announced in SDP
    pub subclass: u8,
    pub report_descriptor: &'static [u8],
    pub qos_out: QosSettings,
}

impl HidAppDescriptor {
    pub const KEYBOARD: Self = Self {
        name: "Authorizer Keyboard",
        description: "Authorizer Keyboard",
        provider: "Authorizer",
        subclass: 0x40, // keyboard
        report_descriptor: KEYBOARD_REPORT_DESCRIPTOR,
        qos_out: QosSettings {
            token_rate: 800,
            token_bucket_size: 9,
            peak_bandwidth: 0,
            latency: 11250,
        },
    };

    pub const FIDO: Self = Self {
        name: "Authorizer Security Key",
        description: "Authorizer Security Key",
        provider: "Authorizer",
        subclass: 0x00,
        report_descriptor: FIDO_REPORT_DESCRIPTOR,
        qos_out: QosSettings {
            token_rate: 1000,
            token_bucket_size: 65,
            peak_bandwidth: 2000,
            latency: 5000,
        },
    };

    pub const fn for_mode(mode: crate::HidMode) -> Self {
        match mode {
            crate::HidMode::Keyboard => Self::KEYBOARD,
            crate::HidMode::Fido => Self::FIDO,
        }
    }
}
