//! Application configuration management.
//!
//! Handles loading and validating bandwatch configuration including:
//! - The wearable's address and authentication key
//! - The device profile (characteristic UUIDs and command bytes)
//! - Session timing (reconnect delay, watchdog, grace period)
//! - Wear-state and alert thresholds
//! - Storage, notifier, report and status-server settings
//!
//! Sources are layered with the `config` crate: an optional TOML file, then
//! environment variables such as `BANDWATCH__ALERTS__BRADY_LIMIT=45`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cipher::BLOCK_LEN;

/// Environment variable that overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "BANDWATCH_CONFIG";

/// Prefix for environment overrides (`BANDWATCH__SECTION__KEY`).
pub const ENV_PREFIX: &str = "BANDWATCH";

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address pattern is valid")
});

static AUTH_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{32}$").expect("auth key pattern is valid"));

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found at: {}", .0.display())]
    NotFound(PathBuf),

    /// The sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The wearable to monitor.
    pub device: DeviceConfig,
    /// Characteristic identifiers and command bytes for the device family.
    pub profile: DeviceProfile,
    /// Session timing.
    pub session: SessionConfig,
    /// Wear-state classifier tuning.
    pub wear: WearConfig,
    /// Anomaly detector tuning.
    pub alerts: AlertConfig,
    /// History storage.
    pub storage: StorageConfig,
    /// Outbound alert delivery.
    pub notifier: NotifierConfig,
    /// Daily report job.
    pub report: ReportConfig,
    /// Read-only status API.
    pub server: ServerConfig,
}

/// The wearable to monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bluetooth MAC address, `AA:BB:CC:DD:EE:FF`.
    pub address: String,

    /// 16-byte shared authentication key as 32 hex characters.
    #[serde(skip_serializing)]
    pub auth_key: String,

    /// BlueZ adapter name (e.g. `hci0`). Default adapter when unset.
    pub adapter: Option<String>,
}

impl DeviceConfig {
    /// Decode the authentication key.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the key is not 32 hex characters.
    pub fn auth_key_bytes(&self) -> ConfigResult<[u8; BLOCK_LEN]> {
        if !is_valid_auth_key(&self.auth_key) {
            return Err(ConfigError::invalid(
                "device.auth_key",
                "must be exactly 32 hexadecimal characters",
            ));
        }
        let mut key = [0u8; BLOCK_LEN];
        for (i, byte) in key.iter_mut().enumerate() {
            let pair = &self.auth_key[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|e| ConfigError::invalid("device.auth_key", e.to_string()))?;
        }
        Ok(key)
    }
}

/// Characteristic identifiers and command bytes for one device family.
///
/// Defaults target the Mi Band 4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Authentication characteristic.
    pub auth_characteristic: Uuid,
    /// Heart-rate control point.
    pub heart_rate_control: Uuid,
    /// Heart-rate measurement (notifications).
    pub heart_rate_measurement: Uuid,
    /// Battery characteristic.
    pub battery_characteristic: Uuid,
    /// Byte offset of the level inside the battery payload.
    pub battery_level_index: usize,
    /// "Request challenge" command.
    pub request_challenge: Vec<u8>,
    /// "Submit response" command prefix.
    pub submit_response: Vec<u8>,
    /// Marker that prefixes a challenge notification.
    pub challenge_marker: Vec<u8>,
    /// Command that starts continuous heart-rate reporting.
    pub start_heart_rate: Vec<u8>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            auth_characteristic: Uuid::from_u128(0x0000_0009_0000_3512_2118_0009_af10_0700),
            heart_rate_control: Uuid::from_u128(0x0000_2a39_0000_1000_8000_0080_5f9b_34fb),
            heart_rate_measurement: Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb),
            battery_characteristic: Uuid::from_u128(0x0000_0006_0000_3512_2118_0009_af10_0700),
            battery_level_index: 1,
            request_challenge: vec![0x02, 0x00],
            submit_response: vec![0x03, 0x00],
            challenge_marker: vec![0x10, 0x02, 0x01],
            start_heart_rate: vec![0x15, 0x01, 0x01],
        }
    }
}

/// Session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pause between a session ending and the next connection attempt.
    pub reconnect_delay_secs: u64,
    /// Pause after connecting before authenticating.
    pub settle_delay_secs: u64,
    /// Bounded wait for the authentication challenge.
    pub auth_timeout_ms: u64,
    /// Battery polling interval.
    pub battery_poll_secs: u64,
    /// Watchdog evaluation interval.
    pub watchdog_poll_secs: u64,
    /// Heart-rate silence that kills the session.
    pub watchdog_timeout_secs: u64,
    /// Time after connecting during which the watchdog stays quiet.
    pub startup_grace_secs: u64,
    /// Upper bound on a single notifier call.
    pub notify_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 10,
            settle_delay_secs: 2,
            auth_timeout_ms: 4000,
            battery_poll_secs: 60,
            watchdog_poll_secs: 10,
            watchdog_timeout_secs: 120,
            startup_grace_secs: 40,
            notify_timeout_secs: 5,
        }
    }
}

impl SessionConfig {
    /// Reconnect delay.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Settle delay after connecting.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Authentication challenge timeout.
    #[must_use]
    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Battery polling interval.
    #[must_use]
    pub const fn battery_poll_interval(&self) -> Duration {
        Duration::from_secs(self.battery_poll_secs)
    }

    /// Watchdog polling interval.
    #[must_use]
    pub const fn watchdog_poll_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_poll_secs)
    }

    /// Heart-rate silence limit.
    #[must_use]
    pub fn watchdog_timeout(&self) -> TimeDelta {
        secs(self.watchdog_timeout_secs)
    }

    /// Startup grace period.
    #[must_use]
    pub fn startup_grace(&self) -> TimeDelta {
        secs(self.startup_grace_secs)
    }

    /// Notifier timeout.
    #[must_use]
    pub const fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

/// Wear-state classifier tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WearConfig {
    /// A heart-rate sample younger than this counts as fresh.
    pub heart_rate_fresh_secs: u64,
    /// Number of battery readings examined for startup charging detection.
    pub startup_samples: usize,
    /// How long the battery must keep rising before we call it charging.
    pub battery_rise_secs: u64,
}

impl Default for WearConfig {
    fn default() -> Self {
        Self {
            heart_rate_fresh_secs: 30,
            startup_samples: 3,
            battery_rise_secs: 180,
        }
    }
}

impl WearConfig {
    /// Freshness window.
    #[must_use]
    pub fn heart_rate_fresh(&self) -> TimeDelta {
        secs(self.heart_rate_fresh_secs)
    }

    /// Sustained-rise duration.
    #[must_use]
    pub fn battery_rise(&self) -> TimeDelta {
        secs(self.battery_rise_secs)
    }
}

/// When the anomaly detector fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    /// Fire on a single sample past a limit.
    #[default]
    Immediate,
    /// Fire only when the last `consecutive_samples` samples are all past the limit.
    Consecutive,
}

/// Which alerts share a cooldown window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// One window across every category.
    #[default]
    Shared,
    /// An independent window per category.
    PerCategory,
}

/// Anomaly detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Alert at or below this rate.
    pub brady_limit: u8,
    /// Alert at or above this rate.
    pub tachy_limit: u8,
    /// Minimum time between alerts.
    pub cooldown_secs: u64,
    /// Single-sample or smoothed detection.
    pub mode: AlertMode,
    /// Window length for [`AlertMode::Consecutive`].
    pub consecutive_samples: usize,
    /// Shared or per-category cooldown.
    pub cooldown_scope: CooldownScope,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            brady_limit: 50,
            tachy_limit: 110,
            cooldown_secs: 600,
            mode: AlertMode::Immediate,
            consecutive_samples: 2,
            cooldown_scope: CooldownScope::Shared,
        }
    }
}

impl AlertConfig {
    /// Cooldown window.
    #[must_use]
    pub fn cooldown(&self) -> TimeDelta {
        secs(self.cooldown_secs)
    }
}

/// History storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("health.db"),
        }
    }
}

/// Outbound alert delivery via ntfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// ntfy server base URL.
    pub server: String,
    /// Topic to publish to. Alerts are only logged when unset.
    pub topic: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            server: "https://ntfy.sh".to_string(),
            topic: None,
        }
    }
}

/// Daily report job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Timezone whose calendar day the report covers.
    #[serde(with = "timezone_serde")]
    pub timezone: Tz,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
        }
    }
}

/// Read-only status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Whether to serve the API at all.
    pub enabled: bool,
    /// Listen address.
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl Config {
    /// Load configuration from the default location plus environment overrides.
    ///
    /// A missing file at the default location is not an error; a missing file
    /// named by `BANDWATCH_CONFIG` is.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or fail validation.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                Self::load_from(&path)
            }
            None => Self::load_from(&config_path()),
        }
    }

    /// Load from an explicit file (optional) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be parsed or fail validation.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or fails validation.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.device.address.is_empty() {
            errors.push(ConfigError::invalid("device.address", "is required"));
        } else if !is_valid_mac_address(&self.device.address) {
            errors.push(ConfigError::invalid(
                "device.address",
                format!("'{}' is not a MAC address", self.device.address),
            ));
        }
        if let Err(e) = self.device.auth_key_bytes() {
            errors.push(e);
        }

        if self.profile.challenge_marker.is_empty() {
            errors.push(ConfigError::invalid("profile.challenge_marker", "must not be empty"));
        }
        if self.profile.request_challenge.is_empty() {
            errors.push(ConfigError::invalid("profile.request_challenge", "must not be empty"));
        }

        if self.alerts.brady_limit >= self.alerts.tachy_limit {
            errors.push(ConfigError::invalid(
                "alerts.brady_limit",
                format!(
                    "must be below alerts.tachy_limit ({} >= {})",
                    self.alerts.brady_limit, self.alerts.tachy_limit
                ),
            ));
        }
        if self.alerts.brady_limit == 0 {
            errors.push(ConfigError::invalid(
                "alerts.brady_limit",
                "must be above 0 (0 is the off-body sentinel)",
            ));
        }
        if self.alerts.mode == AlertMode::Consecutive && self.alerts.consecutive_samples == 0 {
            errors.push(ConfigError::invalid(
                "alerts.consecutive_samples",
                "must be at least 1",
            ));
        }

        for (field, value) in [
            ("session.auth_timeout_ms", self.session.auth_timeout_ms),
            ("session.battery_poll_secs", self.session.battery_poll_secs),
            ("session.watchdog_poll_secs", self.session.watchdog_poll_secs),
            ("session.watchdog_timeout_secs", self.session.watchdog_timeout_secs),
            ("session.notify_timeout_secs", self.session.notify_timeout_secs),
            ("wear.heart_rate_fresh_secs", self.wear.heart_rate_fresh_secs),
        ] {
            if value == 0 {
                errors.push(ConfigError::invalid(field, "must be greater than 0"));
            }
        }

        if let Some(topic) = &self.notifier.topic {
            if topic.trim().is_empty() {
                errors.push(ConfigError::invalid("notifier.topic", "must not be blank"));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Returns `true` for `AA:BB:CC:DD:EE:FF` style addresses.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Returns `true` for a 16-byte key written as 32 hex characters.
#[must_use]
pub fn is_valid_auth_key(key: &str) -> bool {
    AUTH_KEY_RE.is_match(key)
}

/// Default configuration file path.
///
/// On Linux: `/etc/bandwatch/config.toml`.
/// Elsewhere: the platform config directory.
#[must_use]
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/bandwatch/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bandwatch").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

/// Default data directory.
///
/// On Linux: `/var/lib/bandwatch`.
/// Elsewhere: the platform data directory.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/bandwatch")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bandwatch")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

fn secs(value: u64) -> TimeDelta {
    i64::try_from(value)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

mod timezone_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [device]
        address = "E1:2C:9F:0B:F1:44"
        auth_key = "000102030405060708090a0b0c0d0e0f"
    "#;

    #[test]
    fn test_minimal_config_uses_reference_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.session.reconnect_delay_secs, 10);
        assert_eq!(config.session.auth_timeout(), Duration::from_secs(4));
        assert_eq!(config.session.watchdog_timeout(), TimeDelta::minutes(2));
        assert_eq!(config.session.startup_grace(), TimeDelta::seconds(40));
        assert_eq!(config.wear.battery_rise(), TimeDelta::minutes(3));
        assert_eq!(config.wear.startup_samples, 3);
        assert_eq!(config.alerts.brady_limit, 50);
        assert_eq!(config.alerts.tachy_limit, 110);
        assert_eq!(config.alerts.cooldown(), TimeDelta::minutes(10));
        assert_eq!(config.alerts.cooldown_scope, CooldownScope::Shared);
        assert_eq!(config.profile, DeviceProfile::default());
        assert_eq!(config.report.timezone, chrono_tz::UTC);
    }

    #[test]
    fn test_auth_key_decoding() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        let key = config.device.auth_key_bytes().unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[10], 0x0a);
        assert_eq!(key[15], 0x0f);
    }

    #[test]
    fn test_sections_override_defaults() {
        let text = format!(
            "{MINIMAL}
            [alerts]
            brady_limit = 45
            tachy_limit = 120
            mode = \"consecutive\"
            cooldown_scope = \"per_category\"

            [report]
            timezone = \"America/Sao_Paulo\"
            "
        );
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(config.alerts.brady_limit, 45);
        assert_eq!(config.alerts.tachy_limit, 120);
        assert_eq!(config.alerts.mode, AlertMode::Consecutive);
        assert_eq!(config.alerts.cooldown_scope, CooldownScope::PerCategory);
        assert_eq!(config.report.timezone, chrono_tz::America::Sao_Paulo);
    }

    #[test]
    fn test_missing_device_is_rejected() {
        let err = Config::from_toml_str("").unwrap_err();
        match err {
            ConfigError::MultipleValidationErrors(errors) => {
                let text: Vec<String> = errors.iter().map(ToString::to_string).collect();
                assert!(text.iter().any(|e| e.starts_with("device.address")));
                assert!(text.iter().any(|e| e.starts_with("device.auth_key")));
            }
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_inverted_thresholds_are_rejected() {
        let text = format!("{MINIMAL}\n[alerts]\nbrady_limit = 120\ntachy_limit = 110\n");
        let err = Config::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("alerts.brady_limit"));
    }

    #[test]
    fn test_invalid_timezone_is_parse_error() {
        let text = format!("{MINIMAL}\n[report]\ntimezone = \"Mars/Olympus\"\n");
        assert!(matches!(
            Config::from_toml_str(&text),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.device.address, "E1:2C:9F:0B:F1:44");
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("E1:2C:9F:0B:F1:44"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("E1-2C-9F-0B-F1-44"));
        assert!(!is_valid_mac_address("E1:2C:9F:0B:F1"));
        assert!(!is_valid_mac_address(""));
    }

    #[test]
    fn test_auth_key_validation() {
        assert!(is_valid_auth_key("9EF7899BBEF1B557158E7C8C27E1B062"));
        assert!(!is_valid_auth_key("9ef7"));
        assert!(!is_valid_auth_key("zz0102030405060708090a0b0c0d0e0f"));
    }

    #[test]
    fn test_auth_key_is_not_serialized() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("000102030405060708090a0b0c0d0e0f"));
    }
}
