//! Configuration schema
//!
//! The configuration is read once at startup from a TOML file, validated,
//! and never mutated afterwards. The target registry and access policy are
//! derived from it at load time.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::security::HostMatcher;
use crate::targets::MacAddr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Web control panel settings
    pub web: WebConfig,
    /// Magic packet listener settings
    pub wol: WolConfig,
    /// Managed targets
    #[serde(rename = "target")]
    pub targets: Vec<TargetConfig>,
    /// Press and cooldown timings
    pub timings: TimingsConfig,
    /// Health pinger settings
    pub pinger: PingerConfig,
    /// Supervised unit settings
    pub threads: ThreadsConfig,
    /// Access control and privilege drop settings
    pub security: SecurityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            web: WebConfig::default(),
            wol: WolConfig::default(),
            targets: Vec::new(),
            timings: TimingsConfig::default(),
            pinger: PingerConfig::default(),
            threads: ThreadsConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level (error, warn, info, debug, trace); the CLI overrides this
    pub log_level: String,
    /// When set, every pulse uses this duration regardless of action kind.
    /// This is the dedicated reset-line variant where short/long presses
    /// make no difference to the hardware.
    pub reset_pulse_duration_secs: Option<f64>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            reset_pulse_duration_secs: None,
        }
    }
}

/// Web control panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub port: u16,
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// Magic packet listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WolConfig {
    pub enabled: bool,
    /// Conventionally port 9 (discard), which requires elevated rights to bind
    pub port: u16,
    pub bind_address: String,
}

impl Default for WolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

/// One managed target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Stable identity used in URLs and logs
    pub id: String,
    /// Display name
    pub name: String,
    /// GPIO character device the reset line lives on
    pub gpio_chip: String,
    /// Line offset on the chip
    pub gpio_line: u32,
    /// MAC address matched against incoming magic packets
    pub mac: String,
    pub enabled: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            gpio_chip: "/dev/gpiochip0".to_string(),
            gpio_line: 0,
            mac: String::new(),
            enabled: true,
        }
    }
}

/// Press and cooldown timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub short_press_secs: f64,
    /// Must exceed 4 seconds: a shorter hold will not force a power-off
    /// on ATX-style hardware
    pub long_press_secs: f64,
    /// Minimum quiet period between actions on the same target
    pub min_interval_secs: f64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            short_press_secs: 0.5,
            long_press_secs: 5.0,
            min_interval_secs: 2.0,
        }
    }
}

/// Health pinger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingerConfig {
    pub enabled: bool,
    /// Hostnames or addresses to probe
    pub hosts: Vec<String>,
    pub interval_secs: f64,
    /// Per-probe timeout
    pub timeout_secs: f64,
}

impl Default for PingerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: Vec::new(),
            interval_secs: 10.0,
            timeout_secs: 1.0,
        }
    }
}

/// Supervised unit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadsConfig {
    /// Restart network units that terminate unexpectedly
    pub restart: bool,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self { restart: false }
    }
}

/// Access control and privilege drop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Addresses always allowed; overrides the deny list
    pub allow: Vec<String>,
    /// Addresses denied; a single "*" denies everything not allowed
    pub deny: Vec<String>,
    /// Drop root privileges after the listener sockets are bound
    pub drop_privs: bool,
    /// Identity to drop to
    pub user: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            drop_privs: false,
            user: "nobody".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Validate the loaded configuration
    ///
    /// Everything checked here is fatal: the process refuses to start on a
    /// config that could pulse the wrong line or hang a press forever.
    pub fn validate(&self) -> Result<()> {
        // NaN fails every comparison below, so each duration is checked as
        // "finite and in range" rather than "not out of range"
        let t = &self.timings;
        if !(t.short_press_secs.is_finite() && t.short_press_secs > 0.0) {
            return Err(AppError::Config(
                "timings.short_press_secs must be positive".to_string(),
            ));
        }
        if !(t.long_press_secs.is_finite() && t.long_press_secs > 4.0) {
            return Err(AppError::Config(format!(
                "timings.long_press_secs must exceed 4 seconds, got {}",
                t.long_press_secs
            )));
        }
        if !(t.min_interval_secs.is_finite() && t.min_interval_secs >= 0.0) {
            return Err(AppError::Config(
                "timings.min_interval_secs must not be negative".to_string(),
            ));
        }
        if let Some(d) = self.general.reset_pulse_duration_secs {
            if !(d.is_finite() && d > 0.0) {
                return Err(AppError::Config(
                    "general.reset_pulse_duration_secs must be positive".to_string(),
                ));
            }
        }
        if !(self.pinger.interval_secs.is_finite() && self.pinger.interval_secs > 0.0) {
            return Err(AppError::Config(
                "pinger.interval_secs must be positive".to_string(),
            ));
        }
        if !(self.pinger.timeout_secs.is_finite() && self.pinger.timeout_secs > 0.0) {
            return Err(AppError::Config(
                "pinger.timeout_secs must be positive".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut lines = HashSet::new();
        for target in &self.targets {
            if target.id.is_empty() {
                return Err(AppError::Config("target id must not be empty".to_string()));
            }
            if !ids.insert(target.id.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate target id: {}",
                    target.id
                )));
            }
            MacAddr::parse(&target.mac).map_err(|e| {
                AppError::Config(format!("target {}: {}", target.id, e))
            })?;
            if target.enabled && !lines.insert((target.gpio_chip.as_str(), target.gpio_line)) {
                return Err(AppError::Config(format!(
                    "GPIO line {}:{} is wired to more than one enabled target",
                    target.gpio_chip, target.gpio_line
                )));
            }
        }

        for entry in self.security.allow.iter().chain(&self.security.deny) {
            HostMatcher::parse(entry)?;
        }

        self.web_bind_addr()?;
        self.wol_bind_addr()?;

        Ok(())
    }

    /// Web listener socket address
    pub fn web_bind_addr(&self) -> Result<std::net::SocketAddr> {
        parse_bind_addr(&self.web.bind_address, self.web.port)
    }

    /// Magic packet listener socket address
    pub fn wol_bind_addr(&self) -> Result<std::net::SocketAddr> {
        parse_bind_addr(&self.wol.bind_address, self.wol.port)
    }

    pub fn short_press(&self) -> Duration {
        Duration::from_secs_f64(self.timings.short_press_secs)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_secs_f64(self.timings.long_press_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(self.timings.min_interval_secs)
    }

    /// Fixed pulse duration override, when configured
    pub fn fixed_pulse(&self) -> Option<Duration> {
        self.general
            .reset_pulse_duration_secs
            .map(Duration::from_secs_f64)
    }
}

fn parse_bind_addr(address: &str, port: u16) -> Result<std::net::SocketAddr> {
    let ip: std::net::IpAddr = address
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid bind address: {}", address)))?;
    Ok(std::net::SocketAddr::new(ip, port))
}

/// Commented default configuration, written by `--write-default-config`
pub const DEFAULT_CONFIG_TOML: &str = r#"[general]
log_level = "info"
# Uncomment for a dedicated reset line where press kind makes no difference:
# reset_pulse_duration_secs = 0.5

[web]
enabled = true
port = 8080
bind_address = "0.0.0.0"

[wol]
enabled = true
port = 9
bind_address = "0.0.0.0"

[timings]
short_press_secs = 0.5
long_press_secs = 5.0
min_interval_secs = 2.0

[pinger]
enabled = false
hosts = []
interval_secs = 10.0
timeout_secs = 1.0

[threads]
restart = false

[security]
allow = []
deny = []
drop_privs = false
user = "nobody"

[[target]]
id = "board1"
name = "Jetson-Orin-1"
gpio_chip = "/dev/gpiochip0"
gpio_line = 18
mac = "00:00:00:00:00:01"
enabled = true

[[target]]
id = "board2"
name = "Jetson-Orin-2"
gpio_chip = "/dev/gpiochip0"
gpio_line = 19
mac = "00:00:00:00:00:02"
enabled = true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.targets = vec![TargetConfig {
            id: "board1".to_string(),
            name: "Jetson-Orin-1".to_string(),
            gpio_line: 18,
            mac: "00:00:00:00:00:01".to_string(),
            ..Default::default()
        }];
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.web.enabled);
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.wol.port, 9);
        assert!(!config.security.drop_privs);
        assert_eq!(config.security.user, "nobody");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_toml_parses_and_validates() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].gpio_line, 18);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEFAULT_CONFIG_TOML.as_bytes()).unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.targets[1].id, "board2");
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/fleetwake.toml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_short_long_press() {
        let mut config = valid_config();
        config.timings.long_press_secs = 4.0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        config.timings.long_press_secs = 4.1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_finite_timings() {
        let mut config = valid_config();
        config.timings.short_press_secs = f64::NAN;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = valid_config();
        config.timings.long_press_secs = f64::INFINITY;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = valid_config();
        config.timings.min_interval_secs = f64::NAN;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = valid_config();
        config.general.reset_pulse_duration_secs = Some(f64::NAN);
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_pinger_timings() {
        let mut config = valid_config();
        config.pinger.interval_secs = -1.0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = valid_config();
        config.pinger.interval_secs = 0.0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = valid_config();
        config.pinger.timeout_secs = f64::NAN;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_duplicate_gpio_line() {
        let mut config = valid_config();
        let mut second = config.targets[0].clone();
        second.id = "board2".to_string();
        second.mac = "00:00:00:00:00:02".to_string();
        config.targets.push(second);
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_disabled_targets_may_share_a_line() {
        let mut config = valid_config();
        let mut second = config.targets[0].clone();
        second.id = "board2".to_string();
        second.mac = "00:00:00:00:00:02".to_string();
        second.enabled = false;
        config.targets.push(second);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_mac() {
        let mut config = valid_config();
        config.targets[0].mac = "not-a-mac".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_security_entry() {
        let mut config = valid_config();
        config.security.deny = vec!["256.0.0.1".to_string()];
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_wildcard_deny_is_valid() {
        let mut config = valid_config();
        config.security.deny = vec!["*".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fixed_pulse_override() {
        let mut config = valid_config();
        assert!(config.fixed_pulse().is_none());
        config.general.reset_pulse_duration_secs = Some(0.5);
        assert_eq!(config.fixed_pulse(), Some(Duration::from_millis(500)));
    }
}
