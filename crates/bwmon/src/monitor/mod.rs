//! Continuous bandwidth monitoring
//!
//! One clock drives two direction monitors (rx and tx) over bounded tick
//! queues. Each monitor reports once per tick it handled; the pair
//! aggregator joins the two reports of the same tick into a [`Measurement`].
//!
//! ```text
//!   clock ──try_send──► rx monitor ──┐
//!         └─try_send──► tx monitor ──┴─► aggregator ──► MeasurementStream
//! ```
//!
//! A monitor that is still polling when the next tick fires misses that
//! tick; the other direction keeps its pace. Dropping the
//! [`MeasurementStream`] cancels every task.

mod aggregator;
mod clock;
mod direction;

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::error::{BwmonError, Result};
use crate::source::CounterSource;
use crate::types::{Delta, Direction, InterfaceId};

use aggregator::PairAggregator;
use direction::DirectionMonitor;

/// Largest accepted queue or pending-set size
pub const MAX_QUEUE_LEN: usize = 4096;

/// Monitor tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Tick period
    pub interval: Duration,
    /// Ticks a direction monitor may have queued before new ones are dropped
    pub tick_queue_depth: usize,
    /// Unmatched halves kept per direction by the aggregator
    pub max_pending: usize,
    /// Measurements buffered for a slow consumer
    pub output_buffer: usize,
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
}

impl MonitorConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(BwmonError::Config("sample interval must be positive".to_string()));
        }
        check_queue_len("tick queue depth", self.tick_queue_depth)?;
        check_queue_len("max pending ticks", self.max_pending)?;
        check_queue_len("output buffer", self.output_buffer)?;
        if self.max_ticks == Some(0) {
            return Err(BwmonError::Config("tick count must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn check_queue_len(name: &str, len: usize) -> Result<()> {
    if !(1..=MAX_QUEUE_LEN).contains(&len) {
        return Err(BwmonError::Config(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_QUEUE_LEN, len
        )));
    }
    Ok(())
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            tick_queue_depth: 2,
            max_pending: 8,
            output_buffer: 16,
            max_ticks: None,
        }
    }
}

/// One clock tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tick {
    pub seq: u64,
    pub at: Instant,
}

/// What a direction monitor produced for one tick
#[derive(Debug)]
pub enum RateReading {
    /// First good sample stored; no rate yet
    Baseline,
    /// Rate since the previous good sample
    Rate(Delta),
    /// The poll for this tick failed
    Failed(BwmonError),
}

impl RateReading {
    pub fn delta(&self) -> Option<&Delta> {
        match self {
            RateReading::Rate(delta) => Some(delta),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&BwmonError> {
        match self {
            RateReading::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_baseline(&self) -> bool {
        matches!(self, RateReading::Baseline)
    }
}

/// One direction's report for one tick
#[derive(Debug)]
pub(crate) struct DirectionReport {
    pub seq: u64,
    pub direction: Direction,
    pub reading: RateReading,
}

/// Paired rx/tx readings of one tick
#[derive(Debug)]
pub struct Measurement {
    /// Tick sequence number, starting at 1
    pub seq: u64,
    pub rx: RateReading,
    pub tx: RateReading,
}

impl Measurement {
    pub fn reading(&self, direction: Direction) -> &RateReading {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }
}

/// Counters shared by the monitor tasks
#[derive(Debug, Default)]
pub struct MonitorStats {
    ticks: AtomicU64,
    coalesced_rx: AtomicU64,
    coalesced_tx: AtomicU64,
    polls: AtomicU64,
    failed_polls: AtomicU64,
    orphaned_reports: AtomicU64,
    measurements: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub coalesced_rx: u64,
    pub coalesced_tx: u64,
    pub polls: u64,
    pub failed_polls: u64,
    pub orphaned_reports: u64,
    pub measurements: u64,
}

impl MonitorStats {
    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self, direction: Direction) {
        let counter = match direction {
            Direction::Rx => &self.coalesced_rx,
            Direction::Tx => &self.coalesced_tx,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll(&self, ok: bool) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_orphans(&self, count: u64) {
        if count > 0 {
            self.orphaned_reports.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_measurement(&self) {
        self.measurements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            coalesced_rx: self.coalesced_rx.load(Ordering::Relaxed),
            coalesced_tx: self.coalesced_tx.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            failed_polls: self.failed_polls.load(Ordering::Relaxed),
            orphaned_reports: self.orphaned_reports.load(Ordering::Relaxed),
            measurements: self.measurements.load(Ordering::Relaxed),
        }
    }
}

/// Live measurements of one interface
///
/// Ends when the tick limit is reached or after [`MeasurementStream::cancel`].
/// Dropping the stream stops all monitor tasks.
pub struct MeasurementStream {
    inner: ReceiverStream<Measurement>,
    interface: InterfaceId,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: Arc<MonitorStats>,
}

impl MeasurementStream {
    pub fn interface(&self) -> &InterfaceId {
        &self.interface
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Token that stops the monitor when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the clock and both monitors; in-flight polls are abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels and waits until every monitor task has exited.
    pub async fn shutdown(self) -> StatsSnapshot {
        self.cancel.cancel();
        self.tracker.wait().await;
        self.stats.snapshot()
    }
}

impl Stream for MeasurementStream {
    type Item = Measurement;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Measurement>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for MeasurementStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts monitoring `interface` with default tuning and the given period.
///
/// Must be called from within a tokio runtime.
pub fn monitor_bandwidth(
    source: Arc<dyn CounterSource>,
    interface: InterfaceId,
    interval: Duration,
) -> Result<MeasurementStream> {
    monitor_bandwidth_with(source, interface, MonitorConfig::new(interval))
}

/// Starts monitoring `interface` with explicit tuning.
pub fn monitor_bandwidth_with(
    source: Arc<dyn CounterSource>,
    interface: InterfaceId,
    config: MonitorConfig,
) -> Result<MeasurementStream> {
    config.validate()?;

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let stats = Arc::new(MonitorStats::default());

    let report_capacity = config
        .tick_queue_depth
        .checked_mul(Direction::ALL.len())
        .and_then(|len| len.checked_add(2))
        .ok_or_else(|| BwmonError::Config("tick queue depth is too large".to_string()))?;
    let (report_tx, report_rx) = mpsc::channel(report_capacity);
    let (output_tx, output_rx) = mpsc::channel(config.output_buffer);

    let mut subscribers = Vec::with_capacity(Direction::ALL.len());
    for direction in Direction::ALL {
        let (tick_tx, tick_rx) = mpsc::channel(config.tick_queue_depth);
        subscribers.push((direction, tick_tx));

        let monitor = DirectionMonitor::new(interface.clone(), direction, source.clone(), stats.clone());
        tracker.spawn(monitor.run(tick_rx, report_tx.clone(), cancel.clone()));
    }
    drop(report_tx);

    let aggregator = PairAggregator::new(config.max_pending, stats.clone());
    tracker.spawn(aggregator.run(report_rx, output_tx, cancel.clone()));
    tracker.spawn(clock::run(
        config.interval,
        config.max_ticks,
        subscribers,
        stats.clone(),
        cancel.clone(),
    ));
    tracker.close();

    info!(
        interface = %interface,
        interval_ms = config.interval.as_millis() as u64,
        max_ticks = ?config.max_ticks,
        "Monitoring started"
    );

    Ok(MeasurementStream {
        inner: ReceiverStream::new(output_rx),
        interface,
        cancel,
        tracker,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReplayCounterSource;
    use futures::StreamExt;

    fn ether1() -> InterfaceId {
        InterfaceId::new("RB450G", 1, "ether1", ".1.3.6.1.2.1.2.2.1.2.1")
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = MonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.tick_queue_depth, 2);
        assert!(config.validate().is_ok());

        assert!(MonitorConfig::new(Duration::ZERO).validate().is_err());
        let config = MonitorConfig {
            tick_queue_depth: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(MonitorConfig::default().with_max_ticks(0).validate().is_err());
    }

    #[test]
    fn test_oversized_queues_are_rejected() {
        let at_limit = MonitorConfig {
            tick_queue_depth: MAX_QUEUE_LEN,
            max_pending: MAX_QUEUE_LEN,
            output_buffer: MAX_QUEUE_LEN,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        let config = MonitorConfig {
            output_buffer: usize::MAX,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("output buffer must be between 1 and 4096"));

        let config = MonitorConfig {
            tick_queue_depth: usize::MAX / 2 + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_oversized_output_buffer_fails_to_start() {
        let source = Arc::new(ReplayCounterSource::new([0u64], [0u64]));
        let config = MonitorConfig {
            output_buffer: usize::MAX,
            ..Default::default()
        };
        assert!(matches!(
            monitor_bandwidth_with(source, ether1(), config),
            Err(BwmonError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let source = Arc::new(ReplayCounterSource::new([0u64], [0u64]));
        assert!(monitor_bandwidth(source, ether1(), Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_after_tick_limit() {
        let source = Arc::new(ReplayCounterSource::new([0u64, 100, 200], [0u64, 10, 20]));
        let config = MonitorConfig::new(Duration::from_secs(1)).with_max_ticks(3);
        let stream = monitor_bandwidth_with(source, ether1(), config).unwrap();

        let measurements: Vec<Measurement> = stream.collect().await;
        let seqs: Vec<u64> = measurements.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_stats() {
        let source = Arc::new(ReplayCounterSource::new([0u64, 100, 200], [0u64, 10, 20]));
        let mut stream = monitor_bandwidth(source, ether1(), Duration::from_secs(1)).unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.seq, 2);
        assert_eq!(stream.interface(), &ether1());

        let stats = stream.shutdown().await;
        assert_eq!(stats.measurements, 1);
        assert_eq!(stats.polls, 4);
        assert_eq!(stats.failed_polls, 0);
    }

    #[test]
    fn test_measurement_reading_by_direction() {
        let m = Measurement {
            seq: 1,
            rx: RateReading::Baseline,
            tx: RateReading::Failed(BwmonError::Cancelled),
        };
        assert!(m.reading(Direction::Rx).is_baseline());
        assert!(m.reading(Direction::Tx).error().is_some());
    }
}
