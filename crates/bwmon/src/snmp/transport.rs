//! SNMPv2c transport over UDP using the `snmp` crate.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use snmp::{SnmpPdu, SyncSession, Value};
use tracing::{debug, instrument, warn};

use super::{format_oid, SnmpTransport, SnmpValue, Varbind};
use crate::error::{BwmonError, Result};

/// Maximum number of OID components the `snmp` crate decodes
const MAX_OID_LEN: usize = 128;

/// Upper bound on rows fetched by a single walk
const MAX_WALK_ROWS: usize = 65_536;

/// Blocking SNMP session wrapped for async use
///
/// Each request opens a fresh session on a blocking worker thread, the
/// same way a one-shot `snmpget` would.
#[derive(Debug)]
pub struct UdpTransport {
    target: String,
    community: Vec<u8>,
    timeout: Duration,
    next_req_id: AtomicI32,
}

impl UdpTransport {
    /// Create a transport for `host:port`
    pub fn new(host: &str, port: u16, community: &str, timeout: Duration) -> Self {
        Self {
            target: format!("{}:{}", host, port),
            community: community.as_bytes().to_vec(),
            timeout,
            next_req_id: AtomicI32::new(1),
        }
    }

    /// Agent address this transport talks to
    pub fn target(&self) -> &str {
        &self.target
    }

    async fn blocking<F, R>(&self, operation: &'static str, f: F) -> Result<R>
    where
        F: FnOnce(SyncSession) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let target = self.target.clone();
        let community = self.community.clone();
        let timeout = self.timeout;
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);

        // Address resolution and the request itself both block
        tokio::task::spawn_blocking(move || {
            let session = SyncSession::new(target.as_str(), &community, Some(timeout), req_id)
                .map_err(|e| BwmonError::transport("connect", format!("{}: {}", target, e)))?;
            f(session)
        })
        .await
        .map_err(|e| BwmonError::transport(operation, e.to_string()))?
    }
}

fn owned_value(value: Value<'_>) -> SnmpValue {
    match value {
        Value::Integer(v) => SnmpValue::Integer(v),
        Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
        Value::Counter32(v) => SnmpValue::Counter32(v),
        Value::Counter64(v) => SnmpValue::Counter64(v),
        Value::Unsigned32(v) => SnmpValue::Unsigned32(v),
        Value::Timeticks(v) => SnmpValue::Timeticks(v),
        _ => SnmpValue::Other,
    }
}

fn snmp_error(operation: &str, oid: &[u32], err: snmp::SnmpError) -> BwmonError {
    BwmonError::transport(operation, format!("{}: {:?}", format_oid(oid), err))
}

/// Reads the row a getnext from `current` returned, or `None` once the walk
/// has left `base`.
///
/// The `snmp` crate does not decode the SNMPv2 exceptions (noSuchObject,
/// noSuchInstance, endOfMibView); they arrive as a response without a
/// readable varbind.
fn next_row(base: &[u32], current: &[u32], response: &mut SnmpPdu<'_>) -> Result<Option<Varbind>> {
    let Some((name, value)) = response.varbinds.next() else {
        return Ok(None);
    };
    let mut name_buf = [0u32; MAX_OID_LEN];
    let name = name
        .read_name(&mut name_buf)
        .map_err(|e| snmp_error("walk", current, e))?;

    // Left the subtree, or the agent went backwards
    if !name.starts_with(base) || name <= current {
        return Ok(None);
    }
    Ok(Some((name.to_vec(), owned_value(value))))
}

/// Walks from `base` with `getnext` until it runs dry or `limit` rows are
/// collected. The flag is set when the limit ended the walk.
fn walk_rows<F>(base: &[u32], limit: usize, mut getnext: F) -> Result<(Vec<Varbind>, bool)>
where
    F: FnMut(&[u32]) -> Result<Option<Varbind>>,
{
    let mut rows: Vec<Varbind> = Vec::new();
    let mut current = base.to_vec();
    while let Some((name, value)) = getnext(&current)? {
        current.clone_from(&name);
        rows.push((name, value));
        if rows.len() >= limit {
            return Ok((rows, true));
        }
    }
    Ok((rows, false))
}

#[async_trait]
impl SnmpTransport for UdpTransport {
    #[instrument(skip_all, fields(oid = %format_oid(oid)))]
    async fn get(&self, oid: &[u32]) -> Result<SnmpValue> {
        let oid = oid.to_vec();
        self.blocking("get", move |mut session| {
            let mut response = session
                .get(&oid)
                .map_err(|e| snmp_error("get", &oid, e))?;
            if response.error_status != 0 {
                return Err(BwmonError::transport(
                    "get",
                    format!("{}: error status {}", format_oid(&oid), response.error_status),
                ));
            }
            match response.varbinds.next() {
                Some((_, value)) => Ok(owned_value(value)),
                None => Err(BwmonError::transport(
                    "get",
                    format!("{}: empty response", format_oid(&oid)),
                )),
            }
        })
        .await
    }

    #[instrument(skip_all, fields(base = %format_oid(base)))]
    async fn walk(&self, base: &[u32]) -> Result<Vec<Varbind>> {
        let base = base.to_vec();
        let (rows, truncated) = self
            .blocking("walk", move |mut session| {
                walk_rows(&base, MAX_WALK_ROWS, |current| {
                    let mut response = session
                        .getnext(current)
                        .map_err(|e| snmp_error("walk", current, e))?;
                    next_row(&base, current, &mut response)
                })
            })
            .await?;

        if truncated {
            warn!(limit = MAX_WALK_ROWS, "walk stopped at the row limit, table may be incomplete");
        }
        debug!(rows = rows.len(), "walk complete");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_format() {
        let transport = UdpTransport::new("10.0.1.250", 161, "public", Duration::from_secs(5));
        assert_eq!(transport.target(), "10.0.1.250:161");
    }

    #[test]
    fn test_owned_value_conversion() {
        assert_eq!(owned_value(Value::Counter64(9)), SnmpValue::Counter64(9));
        assert_eq!(owned_value(Value::Counter32(3)), SnmpValue::Counter32(3));
        assert_eq!(
            owned_value(Value::OctetString(b"ether1")),
            SnmpValue::OctetString(b"ether1".to_vec())
        );
        assert_eq!(owned_value(Value::Null), SnmpValue::Other);
    }

    fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
        assert!(body.len() < 128);
        let mut out = vec![tag, body.len() as u8];
        out.extend_from_slice(body);
        out
    }

    /// Encodes a GetResponse carrying one varbind
    fn response_bytes(oid: &[u8], value: &[u8]) -> Vec<u8> {
        let varbind = tlv(0x30, &[tlv(0x06, oid), value.to_vec()].concat());
        let pdu = tlv(
            0xa2,
            &[
                tlv(0x02, &[7]),
                tlv(0x02, &[0]),
                tlv(0x02, &[0]),
                tlv(0x30, &varbind),
            ]
            .concat(),
        );
        tlv(0x30, &[tlv(0x02, &[1]), tlv(0x04, b"public"), pdu].concat())
    }

    // .1.3.6.1.2.1.2.2.1.2 and its row 7
    const IF_DESCR: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
    const IF_DESCR_7_BER: [u8; 10] = [0x2b, 6, 1, 2, 1, 2, 2, 1, 2, 7];

    #[test]
    fn test_next_row_reads_row_below_base() {
        let bytes = response_bytes(&IF_DESCR_7_BER, &tlv(0x04, b"ether7"));
        let mut response = SnmpPdu::from_bytes(&bytes).unwrap();

        let (name, value) = next_row(&IF_DESCR, &IF_DESCR, &mut response).unwrap().unwrap();
        assert_eq!(format_oid(&name), ".1.3.6.1.2.1.2.2.1.2.7");
        assert_eq!(value, SnmpValue::OctetString(b"ether7".to_vec()));
    }

    #[test]
    fn test_next_row_ends_walk_on_end_of_mib_view() {
        // endOfMibView is [CONTEXT 2] with an empty body
        let bytes = response_bytes(&IF_DESCR_7_BER, &[0x82, 0x00]);
        let mut response = SnmpPdu::from_bytes(&bytes).unwrap();

        assert_eq!(next_row(&IF_DESCR, &IF_DESCR, &mut response).unwrap(), None);
    }

    #[test]
    fn test_next_row_ends_walk_outside_base() {
        // ifType.7 follows the last ifDescr row
        let bytes = response_bytes(&[0x2b, 6, 1, 2, 1, 2, 2, 1, 3, 7], &tlv(0x02, &[6]));
        let mut response = SnmpPdu::from_bytes(&bytes).unwrap();

        assert_eq!(next_row(&IF_DESCR, &IF_DESCR, &mut response).unwrap(), None);
    }

    fn table(rows: u32) -> Vec<Varbind> {
        (1..=rows)
            .map(|i| ([IF_DESCR.as_slice(), &[i]].concat(), SnmpValue::Integer(i64::from(i))))
            .collect()
    }

    fn getnext_over(rows: &[Varbind]) -> impl FnMut(&[u32]) -> Result<Option<Varbind>> + '_ {
        move |current: &[u32]| Ok(rows.iter().find(|(name, _)| name.as_slice() > current).cloned())
    }

    #[test]
    fn test_walk_rows_collects_whole_table() {
        let rows = table(5);
        let (walked, truncated) = walk_rows(&IF_DESCR, 16, getnext_over(&rows)).unwrap();
        assert_eq!(walked, rows);
        assert!(!truncated);
    }

    #[test]
    fn test_walk_rows_flags_row_limit() {
        let rows = table(5);
        let (walked, truncated) = walk_rows(&IF_DESCR, 3, getnext_over(&rows)).unwrap();
        assert_eq!(walked, rows[..3].to_vec());
        assert!(truncated);
    }

    #[test]
    fn test_walk_rows_propagates_errors() {
        let err = walk_rows(&IF_DESCR, 16, |_| Err(BwmonError::transport("walk", "timeout")))
            .unwrap_err();
        assert!(err.is_transient());
    }
}
