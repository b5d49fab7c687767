//! Rendering of measurements and interface listings.

use std::io::{self, Write};

use serde::Serialize;

use crate::config::OutputFormat;
use crate::monitor::{Measurement, RateReading};
use crate::snmp::{format_oid, SnmpValue, Varbind};
use crate::types::{Direction, InterfaceId};

/// Header matching [`InterfaceId::table_row`]
pub fn table_header() -> String {
    format!("{:>5} {:<23} {}", "idx", "Full Oid", "Name")
}

/// Writes the interface listing.
pub fn write_interface_table<W: Write>(out: &mut W, interfaces: &[InterfaceId]) -> io::Result<()> {
    writeln!(out, "{}", table_header())?;
    for interface in interfaces {
        writeln!(out, "{}", interface.table_row())?;
    }
    Ok(())
}

/// Text line for one direction, `None` while only a baseline exists
pub fn text_line(interface: &InterfaceId, direction: Direction, reading: &RateReading) -> Option<String> {
    match reading {
        RateReading::Baseline => None,
        RateReading::Rate(delta) => Some(delta.to_string()),
        RateReading::Failed(err) => Some(format!(
            "{}-{} poll failed: {}",
            interface.full_name(),
            direction,
            err
        )),
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ReadingRecord {
    Baseline,
    Rate {
        bytes: i64,
        bits: i64,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        bps: Option<f64>,
        rate: String,
    },
    Failed {
        error: String,
    },
}

impl From<&RateReading> for ReadingRecord {
    fn from(reading: &RateReading) -> Self {
        match reading {
            RateReading::Baseline => ReadingRecord::Baseline,
            RateReading::Rate(delta) => ReadingRecord::Rate {
                bytes: delta.byte_delta,
                bits: delta.bits,
                duration_ms: delta.duration.as_millis() as u64,
                bps: delta.bits_per_second(),
                rate: delta.bits_string(),
            },
            RateReading::Failed(err) => ReadingRecord::Failed {
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct MeasurementRecord<'a> {
    seq: u64,
    device: &'a str,
    interface: &'a str,
    rx: ReadingRecord,
    tx: ReadingRecord,
}

/// JSON object for one measurement
pub fn json_line(interface: &InterfaceId, measurement: &Measurement) -> serde_json::Result<String> {
    serde_json::to_string(&MeasurementRecord {
        seq: measurement.seq,
        device: &interface.device,
        interface: &interface.name,
        rx: (&measurement.rx).into(),
        tx: (&measurement.tx).into(),
    })
}

/// Writes one measurement in the requested format.
pub fn write_measurement<W: Write>(
    out: &mut W,
    format: OutputFormat,
    interface: &InterfaceId,
    measurement: &Measurement,
) -> io::Result<()> {
    match format {
        OutputFormat::Text => {
            for direction in Direction::ALL {
                if let Some(line) = text_line(interface, direction, measurement.reading(direction)) {
                    writeln!(out, "{}", line)?;
                }
            }
        }
        OutputFormat::Json => {
            let line = json_line(interface, measurement).map_err(io::Error::other)?;
            writeln!(out, "{}", line)?;
        }
    }
    out.flush()
}

/// One line of an OID dump, i.e. `.1.3.6.1.2.1.1.5.0 = OctetString: RB450G`
pub fn dump_line(oid: &[u32], value: &SnmpValue) -> String {
    let rendered = match value {
        SnmpValue::Integer(v) => v.to_string(),
        SnmpValue::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        SnmpValue::Counter32(v) | SnmpValue::Unsigned32(v) | SnmpValue::Timeticks(v) => v.to_string(),
        SnmpValue::Counter64(v) => v.to_string(),
        SnmpValue::Other => return format!("{} = {}", format_oid(oid), value.type_name()),
    };
    format!("{} = {}: {}", format_oid(oid), value.type_name(), rendered)
}

/// Writes the rows of a get or walk, numbered from zero.
pub fn write_oid_dump<W: Write>(out: &mut W, rows: &[Varbind]) -> io::Result<()> {
    for (i, (oid, value)) in rows.iter().enumerate() {
        writeln!(out, "[{}] {}", i, dump_line(oid, value))?;
    }
    out.flush()
}
