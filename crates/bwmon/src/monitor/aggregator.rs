//! Pair aggregator: joins rx and tx reports of the same tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{DirectionReport, Measurement, MonitorStats, RateReading};
use crate::types::Direction;

type Halves = BTreeMap<u64, RateReading>;

/// Halves waiting for their partner, keyed by tick sequence
#[derive(Default)]
struct Pending {
    rx: Halves,
    tx: Halves,
}

impl Pending {
    /// (own side, partner side)
    fn sides(&mut self, direction: Direction) -> (&mut Halves, &mut Halves) {
        match direction {
            Direction::Rx => (&mut self.rx, &mut self.tx),
            Direction::Tx => (&mut self.tx, &mut self.rx),
        }
    }
}

pub(crate) struct PairAggregator {
    pending: Pending,
    max_pending: usize,
    stats: Arc<MonitorStats>,
}

impl PairAggregator {
    pub(crate) fn new(max_pending: usize, stats: Arc<MonitorStats>) -> Self {
        Self {
            pending: Pending::default(),
            max_pending: max_pending.max(1),
            stats,
        }
    }

    /// Feeds one report in and returns a measurement once both halves of a
    /// tick are known.
    ///
    /// Reports of one direction arrive in tick order, so once a direction
    /// reports tick `n`, the partner's waiting halves older than `n` can never
    /// be completed and are dropped. Ticks where both directions only stored
    /// a baseline produce nothing.
    pub(crate) fn accept(&mut self, report: DirectionReport) -> Option<Measurement> {
        let DirectionReport {
            seq,
            direction,
            reading,
        } = report;
        let (own, partner) = self.pending.sides(direction);

        let keep = partner.split_off(&seq);
        let stale = std::mem::replace(partner, keep);
        for old in stale.keys() {
            trace!(seq = old, partner_of = %direction, "dropping unmatched half");
        }
        self.stats.record_orphans(stale.len() as u64);

        if let Some(other) = partner.remove(&seq) {
            let (rx, tx) = match direction {
                Direction::Rx => (reading, other),
                Direction::Tx => (other, reading),
            };
            if rx.is_baseline() && tx.is_baseline() {
                return None;
            }
            return Some(Measurement { seq, rx, tx });
        }

        own.insert(seq, reading);
        while own.len() > self.max_pending {
            if let Some((old, _)) = own.pop_first() {
                trace!(seq = old, %direction, "pending limit reached, dropping half");
                self.stats.record_orphans(1);
            }
        }
        None
    }

    /// Joins reports until every direction monitor is gone or the token is
    /// cancelled.
    pub(crate) async fn run(
        mut self,
        mut reports: mpsc::Receiver<DirectionReport>,
        output: mpsc::Sender<Measurement>,
        cancel: CancellationToken,
    ) {
        loop {
            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                report = reports.recv() => match report {
                    Some(report) => report,
                    None => break,
                },
            };

            let Some(measurement) = self.accept(report) else {
                continue;
            };
            self.stats.record_measurement();

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = output.send(measurement) => sent,
            };
            if sent.is_err() {
                debug!("measurement consumer gone");
                break;
            }
        }
        debug!(
            rx_waiting = self.pending.rx.len(),
            tx_waiting = self.pending.tx.len(),
            "pair aggregator stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BwmonError;
    use crate::types::{Delta, InterfaceId};
    use std::time::Duration;

    fn rate(direction: Direction, bits: i64) -> RateReading {
        RateReading::Rate(Delta {
            interface: InterfaceId::new("RB450G", 1, "ether1", ".1.3.6.1.2.1.2.2.1.2.1"),
            direction,
            duration: Duration::from_secs(1),
            byte_delta: bits / 8,
            bits,
        })
    }

    fn report(seq: u64, direction: Direction, reading: RateReading) -> DirectionReport {
        DirectionReport {
            seq,
            direction,
            reading,
        }
    }

    fn aggregator() -> (PairAggregator, Arc<MonitorStats>) {
        let stats = Arc::new(MonitorStats::default());
        (PairAggregator::new(4, stats.clone()), stats)
    }

    #[test]
    fn test_joins_same_tick_in_either_order() {
        let (mut agg, _) = aggregator();

        assert!(agg.accept(report(2, Direction::Tx, rate(Direction::Tx, 800))).is_none());
        let m = agg
            .accept(report(2, Direction::Rx, rate(Direction::Rx, 1600)))
            .unwrap();
        assert_eq!(m.seq, 2);
        assert_eq!(m.rx.delta().unwrap().direction, Direction::Rx);
        assert_eq!(m.tx.delta().unwrap().direction, Direction::Tx);
        assert_eq!(m.rx.delta().unwrap().bits, 1600);
    }

    #[test]
    fn test_both_baselines_are_not_emitted() {
        let (mut agg, stats) = aggregator();
        assert!(agg.accept(report(1, Direction::Rx, RateReading::Baseline)).is_none());
        assert!(agg.accept(report(1, Direction::Tx, RateReading::Baseline)).is_none());
        assert_eq!(stats.snapshot().orphaned_reports, 0);
    }

    #[test]
    fn test_one_sided_baseline_is_emitted() {
        let (mut agg, _) = aggregator();
        agg.accept(report(2, Direction::Rx, RateReading::Baseline));
        let m = agg
            .accept(report(2, Direction::Tx, rate(Direction::Tx, 8)))
            .unwrap();
        assert!(m.rx.is_baseline());
        assert!(m.tx.delta().is_some());
    }

    #[test]
    fn test_failure_is_carried_through() {
        let (mut agg, _) = aggregator();
        agg.accept(report(
            3,
            Direction::Rx,
            RateReading::Failed(BwmonError::transport("get", "timeout")),
        ));
        let m = agg
            .accept(report(3, Direction::Tx, rate(Direction::Tx, 8)))
            .unwrap();
        assert!(m.rx.error().is_some());
    }

    #[test]
    fn test_skipped_tick_drops_partner_half() {
        let (mut agg, stats) = aggregator();
        // tx saw ticks 3 and 4, rx skipped 3
        agg.accept(report(3, Direction::Tx, rate(Direction::Tx, 8)));
        agg.accept(report(4, Direction::Tx, rate(Direction::Tx, 16)));
        let m = agg
            .accept(report(4, Direction::Rx, rate(Direction::Rx, 24)))
            .unwrap();
        assert_eq!(m.seq, 4);
        assert_eq!(m.tx.delta().unwrap().bits, 16);
        assert_eq!(stats.snapshot().orphaned_reports, 1);
        assert!(agg.pending.tx.is_empty());
    }

    #[test]
    fn test_pending_is_bounded() {
        let (mut agg, stats) = aggregator();
        for seq in 1..=6 {
            agg.accept(report(seq, Direction::Tx, rate(Direction::Tx, 8)));
        }
        assert_eq!(agg.pending.tx.len(), 4);
        assert_eq!(agg.pending.tx.keys().next(), Some(&3));
        assert_eq!(stats.snapshot().orphaned_reports, 2);
    }

    #[tokio::test]
    async fn test_run_forwards_and_stops_when_inputs_close() {
        let (agg, stats) = aggregator();
        let (report_tx, report_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        report_tx.send(report(1, Direction::Rx, RateReading::Baseline)).await.unwrap();
        report_tx.send(report(1, Direction::Tx, RateReading::Baseline)).await.unwrap();
        report_tx.send(report(2, Direction::Rx, rate(Direction::Rx, 8))).await.unwrap();
        report_tx.send(report(2, Direction::Tx, rate(Direction::Tx, 8))).await.unwrap();
        drop(report_tx);

        agg.run(report_rx, out_tx, CancellationToken::new()).await;

        let m = out_rx.recv().await.unwrap();
        assert_eq!(m.seq, 2);
        assert!(out_rx.recv().await.is_none());
        assert_eq!(stats.snapshot().measurements, 1);
    }
}
