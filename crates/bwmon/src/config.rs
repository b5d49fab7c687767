//! Configuration file support for bwmon
//!
//! Loads and validates bwmon configuration from TOML files. Every value has
//! a default, so a missing file or a missing section is fine.

use crate::error::{BwmonError, Result};
use crate::monitor::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// SNMP agent connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Agent host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Agent UDP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// SNMPv2c community
    #[serde(default = "default_community")]
    pub community: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Sampling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Tick period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Ticks a busy direction may have queued
    #[serde(default = "default_tick_queue_depth")]
    pub tick_queue_depth: usize,

    /// Unmatched rx/tx halves kept while waiting for a partner
    #[serde(default = "default_max_pending_ticks")]
    pub max_pending_ticks: usize,

    /// Measurements buffered ahead of the printer
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
}

/// Measurement output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One human readable line per direction
    #[default]
    Text,
    /// One JSON object per measurement
    Json,
}

/// Output settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Complete bwmon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BwmonConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub output: OutputConfig,
}

// Default functions
fn default_host() -> String {
    "127.0.0.7".to_string()
}

fn default_port() -> u16 {
    161
}

fn default_community() -> String {
    "public".to_string()
}

fn default_timeout() -> u64 {
    5
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_tick_queue_depth() -> usize {
    2
}

fn default_max_pending_ticks() -> usize {
    8
}

fn default_output_buffer() -> usize {
    16
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            community: default_community(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            tick_queue_depth: default_tick_queue_depth(),
            max_pending_ticks: default_max_pending_ticks(),
            output_buffer: default_output_buffer(),
        }
    }
}

impl DeviceConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl MonitorSection {
    /// Get tick period as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl BwmonConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                BwmonError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(BwmonError::Io(e)),
        }
    }

    /// Engine tuning derived from the `[monitor]` section
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: self.monitor.interval(),
            tick_queue_depth: self.monitor.tick_queue_depth,
            max_pending: self.monitor.max_pending_ticks,
            output_buffer: self.monitor.output_buffer,
            max_ticks: None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.device.host.is_empty() {
            return Err(BwmonError::Config("host must not be empty".to_string()));
        }

        if self.device.port == 0 {
            return Err(BwmonError::Config("port must be > 0".to_string()));
        }

        if self.device.timeout_secs == 0 {
            return Err(BwmonError::Config("timeout_secs must be > 0".to_string()));
        }

        self.monitor_config().validate()
    }
}

/// Parses a sample interval such as `1s`, `500ms`, `2m` or `1m30s`.
///
/// A bare number is taken as seconds. The engine counts in whole
/// milliseconds, so zero and anything finer than 1ms are rejected.
pub fn parse_interval(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty interval".to_string());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return positive(Duration::from_secs(secs), input);
    }
    if let Ok(secs) = input.parse::<f64>() {
        return positive(whole_millis(secs, 1_000, input)?, input);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in interval '{}'", input))?;
        if split == 0 {
            return Err(format!("invalid interval '{}'", input));
        }
        let (number, tail) = rest.split_at(split);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let millis_per_unit: u64 = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            _ => return Err(format!("unknown unit '{}' in interval '{}'", unit, input)),
        };

        // Whole numbers stay exact; fractions go through f64
        let part = match number.parse::<u64>() {
            Ok(whole) => whole
                .checked_mul(millis_per_unit)
                .map(Duration::from_millis)
                .ok_or_else(|| format!("interval '{}' out of range", input))?,
            Err(_) => {
                let value: f64 = number
                    .parse()
                    .map_err(|_| format!("invalid number '{}' in interval '{}'", number, input))?;
                whole_millis(value, millis_per_unit, input)?
            }
        };
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("interval '{}' out of range", input))?;
        rest = tail;
    }
    positive(total, input)
}

fn whole_millis(value: f64, millis_per_unit: u64, input: &str) -> std::result::Result<Duration, String> {
    let millis = value * millis_per_unit as f64;
    if !millis.is_finite() || millis < 0.0 || millis >= u64::MAX as f64 {
        return Err(format!("interval '{}' out of range", input));
    }
    let rounded = millis.round();
    // Tolerates binary rounding noise such as 1.1 * 1000
    if (millis - rounded).abs() > 1e-6 {
        return Err(format!("interval '{}' is finer than one millisecond", input));
    }
    Ok(Duration::from_millis(rounded as u64))
}

fn positive(duration: Duration, input: &str) -> std::result::Result<Duration, String> {
    if duration.is_zero() {
        return Err(format!("interval '{}' must be positive", input));
    }
    if u64::try_from(duration.as_millis()).is_err() {
        return Err(format!("interval '{}' out of range", input));
    }
    Ok(duration)
}
