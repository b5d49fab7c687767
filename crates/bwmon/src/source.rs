//! Counter source contract
//!
//! A [`CounterSource`] returns the current cumulative byte count for one
//! direction of one interface. The monitor never retries a failed read.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::delta::try_delta;
use crate::error::{BwmonError, Result};
use crate::types::{Delta, Direction, InterfaceId, Sample};

/// Raw counter value and the moment it was read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterReading {
    pub bytes: u64,
    pub taken_at: Instant,
}

/// Something that can be polled for interface byte counters
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Reads the cumulative byte counter for `direction` of `interface`.
    async fn byte_count(&self, interface: &InterfaceId, direction: Direction)
        -> Result<CounterReading>;
}

/// Polls `source` once and wraps the reading into a [`Sample`].
pub async fn sample<S>(source: &S, interface: &InterfaceId, direction: Direction) -> Result<Sample>
where
    S: CounterSource + ?Sized,
{
    let reading = source.byte_count(interface, direction).await?;
    Ok(Sample::new(
        interface.clone(),
        direction,
        reading.taken_at,
        reading.bytes,
    ))
}

/// Takes two samples `window` apart and returns the delta between them.
pub async fn sample_bandwidth<S>(
    source: &S,
    interface: &InterfaceId,
    direction: Direction,
    window: Duration,
) -> Result<Delta>
where
    S: CounterSource + ?Sized,
{
    let first = sample(source, interface, direction).await?;
    tokio::time::sleep(window).await;
    let second = sample(source, interface, direction).await?;
    try_delta(&first, &second)
}

/// One recorded step of a replayed counter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayStep {
    /// Counter value returned by the poll
    Bytes(u64),
    /// Poll fails with a transport error carrying this message
    Fail(String),
}

impl From<u64> for ReplayStep {
    fn from(bytes: u64) -> Self {
        ReplayStep::Bytes(bytes)
    }
}

#[derive(Debug, Default)]
struct ReplayChannel {
    steps: VecDeque<ReplayStep>,
    last: Option<u64>,
    latency: Duration,
    polls: u64,
}

/// Counter source that replays recorded counter sequences
///
/// Each direction has its own sequence. Once a sequence is used up the last
/// value is repeated, so a finished recording reads as an idle link.
#[derive(Debug, Default)]
pub struct ReplayCounterSource {
    rx: Mutex<ReplayChannel>,
    tx: Mutex<ReplayChannel>,
}

impl ReplayCounterSource {
    /// Create a replay source from per-direction steps
    pub fn new<R, T>(rx: R, tx: T) -> Self
    where
        R: IntoIterator,
        R::Item: Into<ReplayStep>,
        T: IntoIterator,
        T::Item: Into<ReplayStep>,
    {
        Self {
            rx: Mutex::new(ReplayChannel {
                steps: rx.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
            tx: Mutex::new(ReplayChannel {
                steps: tx.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
        }
    }

    /// Delays every read of `direction` by `latency`
    pub fn with_latency(self, direction: Direction, latency: Duration) -> Self {
        self.channel(direction).lock().latency = latency;
        self
    }

    /// Number of reads issued for `direction` so far
    pub fn polls(&self, direction: Direction) -> u64 {
        self.channel(direction).lock().polls
    }

    fn channel(&self, direction: Direction) -> &Mutex<ReplayChannel> {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }
}

#[async_trait]
impl CounterSource for ReplayCounterSource {
    async fn byte_count(
        &self,
        interface: &InterfaceId,
        direction: Direction,
    ) -> Result<CounterReading> {
        let (step, latency) = {
            let mut channel = self.channel(direction).lock();
            channel.polls += 1;
            let step = match channel.steps.pop_front() {
                Some(ReplayStep::Bytes(bytes)) => {
                    channel.last = Some(bytes);
                    Ok(bytes)
                }
                Some(ReplayStep::Fail(message)) => Err(message),
                None => channel
                    .last
                    .ok_or_else(|| "no recorded counter values".to_string()),
            };
            (step, channel.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match step {
            Ok(bytes) => {
                debug!(interface = %interface, %direction, bytes, "replayed counter");
                Ok(CounterReading {
                    bytes,
                    taken_at: Instant::now(),
                })
            }
            Err(message) => Err(BwmonError::transport("replay", message)),
        }
    }
}
