//! Clock fan-out: one periodic timer feeding every direction monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{MonitorStats, Tick};
use crate::types::Direction;

/// Runs the shared timer until cancelled, until `max_ticks` ticks were
/// issued, or until every subscriber has gone away.
///
/// Each tick is offered to every subscriber without waiting. A subscriber
/// whose queue is full misses that tick; the other subscribers are not
/// affected. Dropping the senders on exit closes the tick queues.
pub(crate) async fn run(
    period: Duration,
    max_ticks: Option<u64>,
    subscribers: Vec<(Direction, mpsc::Sender<Tick>)>,
    stats: Arc<MonitorStats>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq = 0u64;

    loop {
        let at = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            at = ticker.tick() => at,
        };
        seq += 1;
        stats.record_tick();
        let tick = Tick { seq, at };

        let mut open = 0;
        for (direction, queue) in &subscribers {
            match queue.try_send(tick) {
                Ok(()) => open += 1,
                Err(TrySendError::Full(_)) => {
                    stats.record_coalesced(*direction);
                    debug!(seq, %direction, "monitor busy, tick coalesced");
                    open += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(seq, %direction, "tick queue closed");
                }
            }
        }

        if open == 0 {
            debug!("no tick subscribers left");
            break;
        }
        if max_ticks.is_some_and(|max| seq >= max) {
            debug!(seq, "tick limit reached");
            break;
        }
    }
}
