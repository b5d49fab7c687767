//! Delta calculation between two counter samples and rate humanizing.

use crate::error::{BwmonError, Result};
use crate::types::{Delta, Sample};

const GIGA: f64 = 1_000_000_000.0;
const MEGA: f64 = 1_000_000.0;
const KILO: f64 = 1_000.0;

/// Computes the delta between two samples, `old` taken before `new`.
///
/// Samples of different interfaces or directions cannot be compared; the
/// result is then a zero-valued delta tagged with the older sample's
/// identity. Use [`try_delta`] to get an error instead.
pub fn delta(old: &Sample, new: &Sample) -> Delta {
    try_delta(old, new).unwrap_or_else(|_| Delta::zero(old.interface.clone(), old.direction))
}

/// Computes the delta between two samples, failing when they are not comparable.
pub fn try_delta(old: &Sample, new: &Sample) -> Result<Delta> {
    if !old.is_comparable(new) {
        return Err(BwmonError::IncomparableSamples {
            old: format!("{}-{}", old.interface.full_name(), old.direction),
            new: format!("{}-{}", new.interface.full_name(), new.direction),
        });
    }

    // Wrapping subtraction reinterpreted as signed: a counter reset shows up
    // as a negative delta and is passed through as-is.
    let byte_delta = new.bytes.wrapping_sub(old.bytes) as i64;

    Ok(Delta {
        interface: old.interface.clone(),
        direction: old.direction,
        duration: new.taken_at.saturating_duration_since(old.taken_at),
        byte_delta,
        bits: byte_delta.saturating_mul(8),
    })
}

/// Formats a bits-per-second value with one decimal place and a
/// power-of-1000 unit. Rates under 1000 bps carry no unit.
pub fn format_bps(bps: f64) -> String {
    if bps >= GIGA {
        format!("{:.1} Gbps", bps / GIGA)
    } else if bps >= MEGA {
        format!("{:.1} Mbps", bps / MEGA)
    } else if bps >= KILO {
        format!("{:.1} Kbps", bps / KILO)
    } else {
        format!("{:.1}", bps)
    }
}
