//! Core data model: directions, interface identity, samples and deltas.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Traffic direction of an interface counter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Bytes received
    Rx,
    /// Bytes transmitted
    Tx,
}

impl Direction {
    /// Both directions, receive first.
    pub const ALL: [Direction; 2] = [Direction::Rx, Direction::Tx];

    /// Short name used in output lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one interface on one device
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceId {
    /// Device system name (e.g., "RB450G")
    pub device: String,
    /// Interface index (ifIndex)
    pub index: u32,
    /// Interface name (e.g., "ether1")
    pub name: String,
    /// Raw identifier the interface was discovered under
    pub oid: String,
}

impl InterfaceId {
    /// Create a new interface identity
    pub fn new(
        device: impl Into<String>,
        index: u32,
        name: impl Into<String>,
        oid: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            index,
            name: name.into(),
            oid: oid.into(),
        }
    }

    /// Device + interface name, for display only
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.device, self.name)
    }

    /// Row for the interface listing: index, raw identifier, name
    pub fn table_row(&self) -> String {
        format!("{:>5} {:<23} {}", format!(".{}", self.index), self.oid, self.name)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.device, self.name)
    }
}

/// A single counter reading for one interface direction
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub interface: InterfaceId,
    pub direction: Direction,
    /// When the counter was read
    pub taken_at: Instant,
    /// Cumulative byte counter
    pub bytes: u64,
}

impl Sample {
    pub fn new(interface: InterfaceId, direction: Direction, taken_at: Instant, bytes: u64) -> Self {
        Self {
            interface,
            direction,
            taken_at,
            bytes,
        }
    }

    /// Returns true if `other` was taken on the same interface and direction.
    pub fn is_comparable(&self, other: &Sample) -> bool {
        self.interface == other.interface && self.direction == other.direction
    }
}

/// Throughput between two samples of the same interface and direction
#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
    pub interface: InterfaceId,
    pub direction: Direction,
    /// Time elapsed between the two samples
    pub duration: Duration,
    /// `new.bytes - old.bytes`; negative after a counter reset or wrap
    pub byte_delta: i64,
    /// `byte_delta * 8`
    pub bits: i64,
}

impl Delta {
    /// Zero-valued delta carrying only identity.
    pub fn zero(interface: InterfaceId, direction: Direction) -> Self {
        Self {
            interface,
            direction,
            duration: Duration::ZERO,
            byte_delta: 0,
            bits: 0,
        }
    }

    /// Returns true if nothing was computed.
    pub fn is_zero(&self) -> bool {
        self.duration.is_zero() && self.byte_delta == 0 && self.bits == 0
    }

    /// Bits per second over the sample window.
    ///
    /// `None` when the window is empty.
    pub fn bits_per_second(&self) -> Option<f64> {
        if self.duration.is_zero() {
            return None;
        }
        Some(self.bits as f64 / self.duration.as_secs_f64())
    }

    /// Humanized rate, i.e. "123.4 Mbps"
    pub fn bits_string(&self) -> String {
        match self.bits_per_second() {
            Some(bps) => crate::delta::format_bps(bps),
            None => "n/a".to_string(),
        }
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} {}",
            self.interface.full_name(),
            self.direction,
            self.bits_string()
        )
    }
}
