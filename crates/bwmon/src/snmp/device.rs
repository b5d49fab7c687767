//! SNMP-managed device: system info, interface discovery and counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{format_oid, oid_for_interface, oids, parse_oid, SnmpTransport, SnmpValue, UdpTransport};
use crate::config::DeviceConfig;
use crate::error::{BwmonError, Result};
use crate::source::{CounterReading, CounterSource};
use crate::types::{Direction, InterfaceId};

/// Lookups that never change while a device is up
#[derive(Debug, Default)]
struct DeviceCache {
    interfaces: Option<Arc<[InterfaceId]>>,
    strings: HashMap<String, String>,
}

/// A device reachable over SNMP
///
/// The interface table and string lookups are cached after the first fetch.
/// Both caches sit behind one lock: readers see either the old table or the
/// fully populated new one. [`flush_caches`](Self::flush_caches) may be
/// called while monitoring is active; counter polls address interfaces by the
/// index captured in [`InterfaceId`] and never consult the cache.
pub struct SnmpDevice<T = UdpTransport> {
    transport: T,
    cache: RwLock<DeviceCache>,
}

impl SnmpDevice<UdpTransport> {
    /// Create a device handle from configuration. No traffic is sent yet.
    pub fn connect(config: &DeviceConfig) -> Self {
        info!(host = %config.host, port = config.port, "using SNMP agent");
        Self::new(UdpTransport::new(
            &config.host,
            config.port,
            &config.community,
            config.timeout(),
        ))
    }
}

impl<T: SnmpTransport> SnmpDevice<T> {
    /// Wrap a transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            cache: RwLock::new(DeviceCache::default()),
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Removes any cached information
    pub fn flush_caches(&self) {
        let mut cache = self.cache.write();
        cache.interfaces = None;
        cache.strings.clear();
        debug!("device caches flushed");
    }

    /// Looks up a string-valued OID, caching the result
    pub async fn string_value_cached(&self, oid: &str) -> Result<String> {
        let cached = self.cache.read().strings.get(oid).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }

        let value = match self.transport.get(&parse_oid(oid)?).await? {
            SnmpValue::OctetString(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(BwmonError::unexpected_value(oid, "OctetString", other.type_name())),
        };

        self.cache
            .write()
            .strings
            .insert(oid.to_string(), value.clone());
        Ok(value)
    }

    /// Returns the system name
    pub async fn system_name(&self) -> Result<String> {
        self.string_value_cached(oids::SYS_NAME).await
    }

    /// Returns the system description, i.e. RouterOS RB450G
    pub async fn system_description(&self) -> Result<String> {
        self.string_value_cached(oids::SYS_DESCR).await
    }

    /// Returns how long the device has been running
    pub async fn system_uptime(&self) -> Result<Duration> {
        let ticks = match self.transport.get(&parse_oid(oids::SYS_UPTIME)?).await? {
            SnmpValue::Timeticks(ticks) => u64::from(ticks),
            SnmpValue::Integer(ticks) if ticks >= 0 => ticks as u64,
            other => {
                return Err(BwmonError::unexpected_value(
                    oids::SYS_UPTIME,
                    "Timeticks",
                    other.type_name(),
                ))
            }
        };
        Ok(Duration::from_secs(ticks / 100))
    }

    /// Returns name, description, and uptime in one line
    #[instrument(skip(self))]
    pub async fn system_banner(&self) -> Result<String> {
        let name = self.system_name().await?;
        let descr = self.system_description().await?;
        let uptime = self.system_uptime().await?;
        Ok(format_banner(&name, &descr, uptime))
    }

    /// Returns the interfaces known to the device
    #[instrument(skip(self))]
    pub async fn interfaces(&self) -> Result<Arc<[InterfaceId]>> {
        let cached = self.cache.read().interfaces.clone();
        if let Some(interfaces) = cached {
            return Ok(interfaces);
        }

        let device = self.system_name().await?;
        let rows = self.transport.walk(&parse_oid(oids::IF_DESCR)?).await?;

        let mut interfaces = Vec::with_capacity(rows.len());
        for (oid, value) in rows {
            let oid_str = format_oid(&oid);
            let index = *oid
                .last()
                .ok_or_else(|| BwmonError::unexpected_value(oid_str.clone(), "ifIndex suffix", "empty OID"))?;
            let name = match value {
                SnmpValue::OctetString(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                other => {
                    return Err(BwmonError::unexpected_value(oid_str, "OctetString", other.type_name()))
                }
            };
            interfaces.push(InterfaceId::new(device.clone(), index, name, oid_str));
        }
        debug!(count = interfaces.len(), "discovered interfaces");

        let interfaces: Arc<[InterfaceId]> = interfaces.into();
        if !interfaces.is_empty() {
            self.cache.write().interfaces = Some(interfaces.clone());
        }
        Ok(interfaces)
    }

    /// Returns the interface with the given name (exact match)
    pub async fn find_interface(&self, name: &str) -> Result<InterfaceId> {
        self.interfaces()
            .await?
            .iter()
            .find(|iface| iface.name == name)
            .cloned()
            .ok_or_else(|| BwmonError::InterfaceNotFound(name.to_string()))
    }
}

/// Counter column for a direction
fn counter_column(direction: Direction) -> &'static str {
    match direction {
        Direction::Rx => oids::IF_HC_IN_OCTETS,
        Direction::Tx => oids::IF_HC_OUT_OCTETS,
    }
}

/// Formats the connect banner, i.e.
/// `RB450G RouterOS RB450G (Uptime ~3 days: 74h8m20s)`
pub fn format_banner(name: &str, descr: &str, uptime: Duration) -> String {
    let hours = uptime.as_secs_f64() / 3600.0;
    let days = if hours >= 24.0 {
        (hours / 24.0 + 0.5) as u64
    } else {
        0
    };
    format!(
        "{} {} (Uptime ~{} days: {})",
        name,
        descr,
        days,
        format_uptime(uptime)
    )
}

/// Formats an uptime as hours, minutes and seconds, i.e. `74h8m20s`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[async_trait]
impl<T: SnmpTransport> CounterSource for SnmpDevice<T> {
    async fn byte_count(
        &self,
        interface: &InterfaceId,
        direction: Direction,
    ) -> Result<CounterReading> {
        let oid = oid_for_interface(counter_column(direction), interface.index)?;
        let value = self.transport.get(&oid).await?;
        // Capture the time as close as possible to the response
        let taken_at = Instant::now();

        let bytes = match value {
            SnmpValue::Counter64(bytes) => bytes,
            SnmpValue::Counter32(bytes) => u64::from(bytes),
            other => {
                return Err(BwmonError::unexpected_value(
                    format_oid(&oid),
                    "Counter64",
                    other.type_name(),
                ))
            }
        };
        Ok(CounterReading { bytes, taken_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::Varbind;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory agent keyed by OID
    #[derive(Default)]
    struct FakeAgent {
        values: parking_lot::Mutex<BTreeMap<Vec<u32>, SnmpValue>>,
        gets: AtomicUsize,
        walks: AtomicUsize,
    }

    impl FakeAgent {
        fn set(&self, oid: &str, value: SnmpValue) {
            self.values.lock().insert(parse_oid(oid).unwrap(), value);
        }
    }

    #[async_trait]
    impl SnmpTransport for FakeAgent {
        async fn get(&self, oid: &[u32]) -> Result<SnmpValue> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.values
                .lock()
                .get(oid)
                .cloned()
                .ok_or_else(|| BwmonError::transport("get", format!("{}: timeout", format_oid(oid))))
        }

        async fn walk(&self, base: &[u32]) -> Result<Vec<Varbind>> {
            self.walks.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .values
                .lock()
                .iter()
                .filter(|(oid, _)| oid.starts_with(base) && oid.len() > base.len())
                .map(|(oid, value)| (oid.clone(), value.clone()))
                .collect())
        }
    }

    fn routerboard() -> SnmpDevice<FakeAgent> {
        let agent = FakeAgent::default();
        agent.set(oids::SYS_NAME, SnmpValue::OctetString(b"RB450G".to_vec()));
        agent.set(oids::SYS_DESCR, SnmpValue::OctetString(b"RouterOS RB450G".to_vec()));
        agent.set(oids::SYS_UPTIME, SnmpValue::Timeticks(26_690_000));
        agent.set(".1.3.6.1.2.1.2.2.1.2.1", SnmpValue::OctetString(b"ether1".to_vec()));
        agent.set(".1.3.6.1.2.1.2.2.1.2.2", SnmpValue::OctetString(b"ether2".to_vec()));
        agent.set(".1.3.6.1.2.1.31.1.1.1.6.1", SnmpValue::Counter64(1000));
        agent.set(".1.3.6.1.2.1.31.1.1.1.10.1", SnmpValue::Counter32(500));
        agent.set(".1.3.6.1.2.1.31.1.1.1.6.2", SnmpValue::OctetString(b"bogus".to_vec()));
        SnmpDevice::new(agent)
    }

    #[tokio::test]
    async fn test_system_banner() {
        let device = routerboard();
        let banner = device.system_banner().await.unwrap();
        // 266900 s = 74h8m20s, ~3 days
        assert_eq!(banner, "RB450G RouterOS RB450G (Uptime ~3 days: 74h8m20s)");
    }

    #[tokio::test]
    async fn test_string_values_are_cached() {
        let device = routerboard();
        device.system_name().await.unwrap();
        device.system_name().await.unwrap();
        assert_eq!(device.transport().gets.load(Ordering::SeqCst), 1);

        device.flush_caches();
        device.system_name().await.unwrap();
        assert_eq!(device.transport().gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_interfaces_discovered_and_cached() {
        let device = routerboard();
        let ifaces = device.interfaces().await.unwrap();
        assert_eq!(ifaces.len(), 2);
        assert_eq!(ifaces[0], InterfaceId::new("RB450G", 1, "ether1", ".1.3.6.1.2.1.2.2.1.2.1"));
        assert_eq!(ifaces[1].index, 2);

        device.interfaces().await.unwrap();
        assert_eq!(device.transport().walks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_find_interface() {
        let device = routerboard();
        let iface = device.find_interface("ether2").await.unwrap();
        assert_eq!(iface.full_name(), "RB450G-ether2");

        let err = device.find_interface("wlan1").await.unwrap_err();
        assert!(matches!(err, BwmonError::InterfaceNotFound(name) if name == "wlan1"));
    }

    #[tokio::test]
    async fn test_byte_count_counter64_and_counter32() {
        let device = routerboard();
        let ether1 = device.find_interface("ether1").await.unwrap();
        assert_eq!(device.byte_count(&ether1, Direction::Rx).await.unwrap().bytes, 1000);
        assert_eq!(device.byte_count(&ether1, Direction::Tx).await.unwrap().bytes, 500);
    }

    #[tokio::test]
    async fn test_byte_count_wrong_type_and_missing() {
        let device = routerboard();
        let ether2 = device.find_interface("ether2").await.unwrap();

        let err = device.byte_count(&ether2, Direction::Rx).await.unwrap_err();
        assert!(matches!(
            err,
            BwmonError::UnexpectedValue { expected: "Counter64", got: "OctetString", .. }
        ));
        assert_eq!(
            err.to_string(),
            "Unexpected value for .1.3.6.1.2.1.31.1.1.1.6.2: expected Counter64, got OctetString"
        );

        let err = device.byte_count(&ether2, Direction::Tx).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_flush_does_not_disturb_counter_polls() {
        let device = routerboard();
        let ether1 = device.find_interface("ether1").await.unwrap();
        device.flush_caches();
        assert_eq!(device.byte_count(&ether1, Direction::Rx).await.unwrap().bytes, 1000);
    }

    #[tokio::test]
    async fn test_uptime_wrong_type_names_returned_type() {
        let device = routerboard();
        device
            .transport()
            .set(oids::SYS_UPTIME, SnmpValue::OctetString(b"3 days".to_vec()));

        let err = device.system_uptime().await.unwrap_err();
        assert!(matches!(
            err,
            BwmonError::UnexpectedValue { expected: "Timeticks", got: "OctetString", .. }
        ));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(61)), "1m1s");
        assert_eq!(format_uptime(Duration::from_secs(3600)), "1h0m0s");
    }

    #[test]
    fn test_format_banner_under_a_day() {
        assert_eq!(
            format_banner("gw", "RouterOS", Duration::from_secs(7200)),
            "gw RouterOS (Uptime ~0 days: 2h0m0s)"
        );
    }
}
