//! Direction monitor: samples one direction of one interface per tick.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{DirectionReport, MonitorStats, RateReading, Tick};
use crate::delta::try_delta;
use crate::error::Result;
use crate::source::{sample, CounterSource};
use crate::types::{Direction, InterfaceId, Sample};

/// How far a direction monitor is in establishing its baseline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MonitorPhase {
    /// No sample stored yet
    AwaitingFirstSample,
    /// One sample stored, no delta possible yet
    AwaitingSecondSample,
    /// Every tick yields a delta
    Streaming,
}

/// Per-direction sampling state
///
/// Keeps the two most recent good samples in a rolling two-slot buffer.
/// A failed poll is reported but not stored, so the previous sample stays
/// the baseline for the next delta.
pub(crate) struct DirectionMonitor {
    interface: InterfaceId,
    direction: Direction,
    source: Arc<dyn CounterSource>,
    slots: [Option<Sample>; 2],
    stored: u64,
    stats: Arc<MonitorStats>,
}

impl DirectionMonitor {
    pub(crate) fn new(
        interface: InterfaceId,
        direction: Direction,
        source: Arc<dyn CounterSource>,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            interface,
            direction,
            source,
            slots: [None, None],
            stored: 0,
            stats,
        }
    }

    pub(crate) fn phase(&self) -> MonitorPhase {
        match self.stored {
            0 => MonitorPhase::AwaitingFirstSample,
            1 => MonitorPhase::AwaitingSecondSample,
            _ => MonitorPhase::Streaming,
        }
    }

    /// Folds one poll result into the buffer and returns what to report.
    pub(crate) fn record(&mut self, polled: Result<Sample>) -> RateReading {
        let sample = match polled {
            Ok(sample) => sample,
            Err(err) => return RateReading::Failed(err),
        };

        let this = (self.stored % 2) as usize;
        let last = 1 - this;
        self.slots[this] = Some(sample);
        self.stored += 1;

        match (&self.slots[last], &self.slots[this]) {
            (Some(previous), Some(current)) if self.stored >= 2 => {
                match try_delta(previous, current) {
                    Ok(delta) => RateReading::Rate(delta),
                    Err(err) => RateReading::Failed(err),
                }
            }
            _ => RateReading::Baseline,
        }
    }

    /// Samples once per received tick until the tick queue closes or the
    /// token is cancelled. Cancellation also abandons an in-flight poll.
    pub(crate) async fn run(
        mut self,
        mut ticks: mpsc::Receiver<Tick>,
        reports: mpsc::Sender<DirectionReport>,
        cancel: CancellationToken,
    ) {
        debug!(interface = %self.interface, direction = %self.direction, "direction monitor started");

        loop {
            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                tick = ticks.recv() => match tick {
                    Some(tick) => tick,
                    None => break,
                },
            };
            trace!(
                direction = %self.direction,
                seq = tick.seq,
                lag_ms = tick.at.elapsed().as_millis() as u64,
                "tick received"
            );

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = sample(self.source.as_ref(), &self.interface, self.direction) => polled,
            };
            self.stats.record_poll(polled.is_ok());
            if let Err(err) = &polled {
                warn!(
                    interface = %self.interface,
                    direction = %self.direction,
                    seq = tick.seq,
                    error = %err,
                    "counter poll failed"
                );
            }

            let report = DirectionReport {
                seq: tick.seq,
                direction: self.direction,
                reading: self.record(polled),
            };
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = reports.send(report) => sent,
            };
            if sent.is_err() {
                break;
            }
        }

        debug!(
            interface = %self.interface,
            direction = %self.direction,
            phase = ?self.phase(),
            "direction monitor stopped"
        );
    }
}
