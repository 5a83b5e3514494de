//! Autotype Input - Scancode translation
//!
//! Turns credential text into HID boot-protocol keyboard reports:
//! - Per-layout character tables (en_US, de_DE, AppleMac_de_DE, fr_FR)
//! - Tab/Return substitution tokens and the OTP placeholder

pub mod layout;
pub mod translate;

pub use layout::*;
pub use translate::*;

/// Convert a keyboard-page usage id to a string representation (for debugging)
pub fn usage_to_string(usage: u8) -> &'static str {
    match usage {
        0x00 => "None",
        0x04 => "A",
        0x05 => "B",
        0x06 => "C",
        0x07 => "D",
        0x08 => "E",
        0x09 => "F",
        0x0A => "G",
        0x0B => "H",
        0x0C => "I",
        0x0D => "J",
        0x0E => "K",
        0x0F => "L",
        0x10 => "M",
        0x11 => "N",
        0x12 => "O",
        0x13 => "P",
        0x14 => "Q",
        0x15 => "R",
        0x16 => "S",
        0x17 => "T",
        0x18 => "U",
        0x19 => "V",
        0x1A => "W",
        0x1B => "X",
        0x1C => "Y",
        0x1D => "Z",
        0x1E => "1",
        0x1F => "2",
        0x20 => "3",
        0x21 => "4",
        0x22 => "5",
        0x23 => "6",
        0x24 => "7",
        0x25 => "8",
        0x26 => "9",
        0x27 => "0",
        0x28 => "Return",
        0x29 => "Escape",
        0x2A => "Backspace",
        0x2B => "Tab",
        0x2C => "Space",
        0x2D => "-",
        0x2E => "=",
        0x2F => "[",
        0x30 => "]",
        0x31 => "\\",
        0x32 => "NonUsHash",
        0x33 => ";",
        0x34 => "'",
        0x35 => "`",
        0x36 => ",",
        0x37 => ".",
        0x38 => "/",
        0x64 => "NonUsBackslash",
        _ => "Unknown",
    }
}

/// Describe a modifier mask, e.g. `"Shift+AltGr"` (for debugging)
pub fn modifiers_to_string(mask: u8) -> String {
    use autotype_common::modifier::*;

    const NAMES: [(u8, &str); 8] = [
        (LEFT_CTRL, "Ctrl"),
        (LEFT_SHIFT, "Shift"),
        (LEFT_ALT, "Alt"),
        (LEFT_GUI, "Gui"),
        (RIGHT_CTRL, "RightCtrl"),
        (RIGHT_SHIFT, "RightShift"),
        (RIGHT_ALT, "AltGr"),
        (RIGHT_GUI, "RightGui"),
    ];

    NAMES
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join("+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_names() {
        assert_eq!(usage_to_string(0x04), "A");
        assert_eq!(usage_to_string(0x2B), "Tab");
        assert_eq!(usage_to_string(0xFF), "Unknown");
    }

    #[test]
    fn test_modifiers_to_string() {
        assert_eq!(modifiers_to_string(0x00), "");
        assert_eq!(modifiers_to_string(0x02), "Shift");
        assert_eq!(modifiers_to_string(0x42), "Shift+AltGr");
    }
}
