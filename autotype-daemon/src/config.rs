//! Daemon configuration file

use std::fs;
use std::path::Path;

use autotype_common::{AutotypeError, AutotypeResult};
use autotype_controller::ControllerConfig;
use autotype_input::{LayoutId, Substitutions, Translator};
use autotype_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything the `autotype` binary can be configured with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutotypeConfig {
    /// Keyboard layout of the target host
    pub layout: String,
    /// Tokens replaced in stored credentials
    pub substitutions: Substitutions,
    pub transport: TransportConfig,
    pub controller: ControllerConfig,
}

impl Default for AutotypeConfig {
    fn default() -> Self {
        Self {
            layout: LayoutId::default().name().to_string(),
            substitutions: Substitutions::default(),
            transport: TransportConfig::default(),
            controller: ControllerConfig::new(),
        }
    }
}

impl AutotypeConfig {
    pub fn load(path: &Path) -> AutotypeResult<Self> {
        info!("Loading configuration from: {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            AutotypeError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> AutotypeResult<Self> {
        toml::from_str(content)
            .map_err(|e| AutotypeError::Config(format!("Failed to parse config file: {e}")))
    }

    pub fn to_toml(&self) -> AutotypeResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AutotypeError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Translator for the configured layout and tokens
    pub fn translator(&self) -> Translator {
        Translator::new(LayoutId::parse_or_default(&self.layout))
            .with_substitutions(self.substitutions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotype_controller::IdleMode;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AutotypeConfig::parse(
            r#"
            layout = "de_DE"

            [controller]
            idle_mode = "keyboard"

            [controller.timing]
            connect_timeout_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.translator().layout(), LayoutId::DeDe);
        assert_eq!(config.controller.idle_mode, IdleMode::Keyboard);
        assert_eq!(config.controller.timing.connect_timeout_ms, 5000);
        assert_eq!(config.controller.timing.post_send_settle_ms, 500);
        assert_eq!(config.transport.gadget_path, "/dev/hidg0");
        assert_eq!(config.substitutions.otp, "{OTP}");
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let text = AutotypeConfig::default().to_toml().unwrap();
        let config = AutotypeConfig::parse(&text).unwrap();
        assert!(config.controller.fido_enabled);
        assert_eq!(config.layout, "en_US");
    }

    #[test]
    fn test_bad_file_is_config_error() {
        assert!(matches!(
            AutotypeConfig::parse("layout = 3"),
            Err(AutotypeError::Config(_))
        ));
    }
}
