//! Error types for Autotype

use thiserror::Error;

use crate::HidMode;

/// Main error type for Autotype operations
#[derive(Error, Debug)]
pub enum AutotypeError {
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Profile registration error: {0}")]
    Registration(#[from] ProfileRegistrationError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for AutotypeError {
    fn from(e: bincode::Error) -> Self {
        AutotypeError::Serialization(e.to_string())
    }
}

/// Result type alias for Autotype operations
pub type AutotypeResult<T> = Result<T, AutotypeError>;

/// Translation errors.
///
/// Characters without a mapping are not errors; they are counted in the
/// translation result so the caller can warn about lost characters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Password quick auto-type not possible as it contains an OTP")]
    OtpPlaceholder,

    #[error("Unknown keyboard layout: {0}")]
    UnknownLayout(String),

    #[error("Unknown key name: {0}")]
    UnknownKey(String),
}

/// Output transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Elevated access was refused. Reported once, never retried.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("HID device not found: {0}")]
    DeviceNotFound(String),

    /// Transient failure; the user may retry the dispatch.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("No host connected")]
    NotConnected,

    #[error("Timeout")]
    Timeout,
}

impl TransportError {
    /// Classify an I/O error raised while opening or writing `path`
    pub fn from_io(err: &std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                TransportError::PermissionDenied(format!("{}: {}", path, err))
            }
            std::io::ErrorKind::NotFound => TransportError::DeviceNotFound(path.to_string()),
            _ => TransportError::WriteFailed(format!("{}: {}", path, err)),
        }
    }

    /// Whether the user may retry the same operation
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransportError::WriteFailed(_) | TransportError::Timeout | TransportError::NotConnected)
    }
}

/// Bluetooth HID profile registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileRegistrationError {
    #[error("Platform declined {0} registration")]
    Declined(HidMode),

    #[error("{0} registration timed out")]
    TimedOut(HidMode),

    #[error("Platform error: {0}")]
    Platform(String),
}

/// HID device controller errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Profile registration already in flight")]
    RegistrationInFlight,

    #[error("Profile not registered")]
    NotRegistered,

    #[error("FIDO mode is disabled")]
    FidoDisabled,

    #[error("Registration failed: {0}")]
    Registration(#[from] ProfileRegistrationError),

    #[error("Controller stopped")]
    Stopped,
}

/// Credential dispatch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("USB auto-type requires root access: {0}")]
    RootRequired(String),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("Host {0} did not connect in time")]
    ConnectTimeout(String),

    #[error("Superseded by a newer dispatch")]
    Superseded,

    #[error("Dispatch cancelled")]
    Cancelled,
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::PermissionDenied(msg) => DispatchError::RootRequired(msg),
            other => DispatchError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            TransportError::from_io(&denied, "/dev/hidg0"),
            TransportError::PermissionDenied(_)
        ));

        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            TransportError::from_io(&missing, "/dev/hidg0"),
            TransportError::DeviceNotFound("/dev/hidg0".into())
        );

        let broken = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(TransportError::from_io(&broken, "/dev/hidg0").is_retriable());
    }

    #[test]
    fn test_permission_denied_becomes_root_required() {
        let err: DispatchError = TransportError::PermissionDenied("su".into()).into();
        assert_eq!(err, DispatchError::RootRequired("su".into()));

        let err: DispatchError = TransportError::NotConnected.into();
        assert_eq!(err, DispatchError::Transport(TransportError::NotConnected));
    }
}
