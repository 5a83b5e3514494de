//! Common types used across Autotype components

use serde::{Deserialize, Serialize};

/// Bluetooth HID Device profile mode.
///
/// Exactly one mode is registered at a time; switching requires an
/// unregister followed by a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HidMode {
    /// Emulate a boot-protocol keyboard
    Keyboard,
    /// Relay FIDO/U2F authenticator traffic
    Fido,
}

impl HidMode {
    /// Identifier used when registering the profile app
    pub const fn id(&self) -> u8 {
        match self {
            HidMode::Keyboard => 1,
            HidMode::Fido => 2,
        }
    }

    /// Host role served by this mode
    pub const fn host_role(&self) -> HostRole {
        match self {
            HidMode::Keyboard => HostRole::KeyboardHost,
            HidMode::Fido => HostRole::FidoHost,
        }
    }
}

impl std::fmt::Display for HidMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HidMode::Keyboard => write!(f, "keyboard"),
            HidMode::Fido => write!(f, "FIDO"),
        }
    }
}

/// Bluetooth device address (`AA:BB:CC:DD:EE:FF`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Role a paired host has been used in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostRole {
    KeyboardHost,
    FidoHost,
    Unknown,
}

impl HostRole {
    /// Whether a host in this role can be served in `mode`
    pub fn serves(&self, mode: HidMode) -> bool {
        *self == mode.host_role()
    }
}

/// A host remembered by the device listing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedDeviceRecord {
    /// Bluetooth address
    pub address: DeviceAddress,
    /// Display name
    pub name: String,
    /// Role the host was last used in
    pub role: HostRole,
    /// Whether this host is reconnected after registration
    pub is_default: bool,
    /// Whether the platform still reports a bond
    pub bonded: bool,
}

impl PairedDeviceRecord {
    pub fn new(address: impl Into<DeviceAddress>, name: impl Into<String>, role: HostRole) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            role,
            is_default: false,
            bonded: true,
        }
    }
}

/// Connection state of a remote host as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Physical output channel for keystrokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    Usb,
    Bluetooth,
}

/// Separator typed between username and password
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    None,
    #[default]
    Tab,
    Return,
}

/// A username/password pair handed over for a single dispatch.
///
/// Never persisted; `Debug` redacts the secrets.
#[derive(Clone, Default)]
pub struct Credential {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Current one-time code, substituted for the OTP token
    pub otp: Option<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            otp: None,
        }
    }

    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.otp = Some(otp.into());
        self
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Which parts of a credential to type, and how to join them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOptions {
    pub send_username: bool,
    pub send_password: bool,
    /// Type only the OTP code, ignoring username and password
    pub otp_only: bool,
    pub delimiter: Delimiter,
    /// Press Return after the password
    pub return_suffix: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            send_username: true,
            send_password: true,
            otp_only: false,
            delimiter: Delimiter::Tab,
            return_suffix: false,
        }
    }
}

impl DispatchOptions {
    /// Password only, as used by the quick USB auto-type action
    pub fn password_only() -> Self {
        Self {
            send_username: false,
            delimiter: Delimiter::None,
            ..Default::default()
        }
    }
}

/// Generation counter identifying one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Phase of an in-flight dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Waiting for the profile to come up in keyboard mode
    SwitchingMode,
    /// Connect requested, waiting for the host
    Connecting,
    /// Writing reports
    Sending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_ids() {
        assert_eq!(HidMode::Keyboard.id(), 1);
        assert_eq!(HidMode::Fido.id(), 2);
        assert!(HostRole::FidoHost.serves(HidMode::Fido));
        assert!(!HostRole::Unknown.serves(HidMode::Keyboard));
    }

    #[test]
    fn test_address_normalized() {
        assert_eq!(DeviceAddress::new("aa:bb:cc:00:11:22").as_str(), "AA:BB:CC:00:11:22");
    }

    #[test]
    fn test_credential_debug_redacts() {
        let cred = Credential::new("alice", "hunter2").with_otp("123456");
        let dbg = format!("{:?}", cred);
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains("alice"));
        assert!(!dbg.contains("123456"));
    }
}
