//! SNMP counter source
//!
//! Reads interface tables and 64-bit octet counters from a device over
//! SNMPv2c. The wire protocol lives in the `snmp` crate; this module only
//! knows which OIDs to ask for and how to interpret the answers.
//!
//! - [`SnmpTransport`]: get/walk seam, implemented over UDP by [`UdpTransport`]
//! - [`SnmpDevice`]: system info, interface discovery, cached lookups, and the
//!   [`crate::CounterSource`] implementation

mod device;
mod transport;

pub use device::SnmpDevice;
pub use transport::UdpTransport;

use async_trait::async_trait;

use crate::error::{BwmonError, Result};

/// Well-known OIDs
pub mod oids {
    /// sysDescr.0
    pub const SYS_DESCR: &str = ".1.3.6.1.2.1.1.1.0";
    /// sysUpTime.0 (timeticks, 1/100 s)
    pub const SYS_UPTIME: &str = ".1.3.6.1.2.1.1.3.0";
    /// sysName.0
    pub const SYS_NAME: &str = ".1.3.6.1.2.1.1.5.0";
    /// ifDescr column of ifTable
    pub const IF_DESCR: &str = ".1.3.6.1.2.1.2.2.1.2";
    /// ifHCInOctets column of ifXTable
    pub const IF_HC_IN_OCTETS: &str = ".1.3.6.1.2.1.31.1.1.1.6";
    /// ifHCOutOctets column of ifXTable
    pub const IF_HC_OUT_OCTETS: &str = ".1.3.6.1.2.1.31.1.1.1.10";
}

/// Owned copy of a varbind value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Counter32(u32),
    Counter64(u64),
    Unsigned32(u32),
    Timeticks(u32),
    /// Any other type, not interpreted
    Other,
}

impl SnmpValue {
    /// Name of the value type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            SnmpValue::Integer(_) => "Integer",
            SnmpValue::OctetString(_) => "OctetString",
            SnmpValue::Counter32(_) => "Counter32",
            SnmpValue::Counter64(_) => "Counter64",
            SnmpValue::Unsigned32(_) => "Unsigned32",
            SnmpValue::Timeticks(_) => "Timeticks",
            SnmpValue::Other => "Other",
        }
    }
}

/// A single OID/value pair returned by a walk
pub type Varbind = (Vec<u32>, SnmpValue);

/// Request/response seam to an SNMP agent
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    /// Fetches a single OID.
    async fn get(&self, oid: &[u32]) -> Result<SnmpValue>;

    /// Fetches every OID below `base`, in lexicographic order.
    async fn walk(&self, base: &[u32]) -> Result<Vec<Varbind>>;
}

/// Parses a dotted OID (leading dot optional).
pub fn parse_oid(oid: &str) -> Result<Vec<u32>> {
    oid.trim_start_matches('.')
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| BwmonError::Config(format!("Invalid OID component '{}' in {}", part, oid)))
        })
        .collect()
}

/// Formats an OID with a leading dot.
pub fn format_oid(oid: &[u32]) -> String {
    oid.iter().map(|part| format!(".{}", part)).collect()
}

/// Appends an interface index to a column OID.
pub fn oid_for_interface(column: &str, index: u32) -> Result<Vec<u32>> {
    let mut oid = parse_oid(column)?;
    oid.push(index);
    Ok(oid)
}
