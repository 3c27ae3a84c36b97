//! Configuration handling for the inverter client.
//!
//! Settings come from a YAML file, then environment variables, then the
//! command line (applied in `main`).

use anyhow::{Context, Result};
use inverter_device::SerialSettings;
use inverter_wire::ProtocolConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default serial port path
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default response timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Inverter client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterConfig {
    /// Serial device settings
    pub device: DeviceConfig,
    /// Protocol settings
    pub protocol: ProtocolConfig,
    /// How long to wait for each response
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
}

/// Serial device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Port path, e.g. /dev/ttyUSB0 or COM3
    pub port: String,
    /// Line settings
    #[serde(flatten)]
    pub settings: SerialSettings,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            settings: SerialSettings::default(),
        }
    }
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            protocol: ProtocolConfig::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl InverterConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_yaml(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config file {:?}", path))
            }
        };

        config.apply_environment_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        info!(
            "Final inverter configuration: port={}, baud_rate={}, timeout={}, digest={}, verify_digest={}",
            config.device.port,
            config.device.settings.baud_rate,
            humantime::format_duration(config.timeout),
            config.protocol.digest_algorithm,
            config.protocol.verify_digest
        );

        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check the protocol section
    pub fn validate(&self) -> Result<()> {
        self.protocol
            .validate()
            .context("invalid protocol configuration")
    }

    /// Apply overrides from `lookup`, normally the process environment
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("INVERTER_PORT") {
            info!("Port overridden by environment: {}", port);
            self.device.port = port;
        }

        if let Some(baud_rate) = lookup("INVERTER_BAUD_RATE") {
            match baud_rate.parse::<u32>() {
                Ok(rate) => {
                    self.device.settings.baud_rate = rate;
                    info!("Baud rate overridden by environment: {}", rate);
                }
                Err(_) => warn!("Ignoring invalid INVERTER_BAUD_RATE: {}", baud_rate),
            }
        }

        if let Some(timeout) = lookup("INVERTER_TIMEOUT") {
            match humantime::parse_duration(&timeout) {
                Ok(duration) => {
                    self.timeout = duration;
                    info!("Timeout overridden by environment: {}", timeout);
                }
                Err(_) => warn!("Ignoring invalid INVERTER_TIMEOUT: {}", timeout),
            }
        }

        if let Some(verify) = lookup("INVERTER_VERIFY_DIGEST") {
            match verify.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.protocol.verify_digest = true,
                "false" | "0" | "no" => self.protocol.verify_digest = false,
                _ => warn!("Ignoring invalid INVERTER_VERIFY_DIGEST: {}", verify),
            }
        }
    }
}

/// Durations written the human way ("2s", "1500ms")
mod humantime_duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(de::Error::custom)
    }
}
