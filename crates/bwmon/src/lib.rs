//! Interface Bandwidth Monitor
//!
//! Polls cumulative rx/tx byte counters of one network interface at a fixed
//! interval and streams the resulting rates. Counters come from any
//! [`CounterSource`]; the bundled source speaks SNMPv2c to a device.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use futures::StreamExt;
//! use sonic_bwmon::{monitor_bandwidth, DeviceConfig, SnmpDevice};
//!
//! # async fn run() -> sonic_bwmon::Result<()> {
//! let device = Arc::new(SnmpDevice::connect(&DeviceConfig::default()));
//! let ether1 = device.find_interface("ether1").await?;
//! let mut stream = monitor_bandwidth(device, ether1, Duration::from_secs(1))?;
//! while let Some(measurement) = stream.next().await {
//!     if let Some(rx) = measurement.rx.delta() {
//!         println!("{}", rx);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod delta;
pub mod error;
pub mod monitor;
pub mod output;
pub mod snmp;
pub mod source;
pub mod types;

pub use config::{parse_interval, BwmonConfig, DeviceConfig, MonitorSection, OutputConfig, OutputFormat};
pub use delta::{delta, format_bps, try_delta};
pub use error::*;
pub use monitor::{
    monitor_bandwidth, monitor_bandwidth_with, Measurement, MeasurementStream, MonitorConfig,
    MonitorStats, RateReading, StatsSnapshot,
};
pub use snmp::{SnmpDevice, SnmpTransport, SnmpValue, UdpTransport};
pub use source::{sample, sample_bandwidth, CounterReading, CounterSource, ReplayCounterSource, ReplayStep};
pub use types::{Delta, Direction, InterfaceId, Sample};
