//! Historical replay tick source.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;

use crate::models::{Bar, Tick};

use super::TickSource;

/// Tick source that replays stored events at a deterministic cadence.
///
/// Used by backtests and tests. Ticks are yielded in insertion order, one per
/// `next_tick` call; the consumer's own pacing is the cadence, which keeps
/// replays fully deterministic.
#[derive(Debug, Default)]
pub struct ReplayTickSource {
    ticks: VecDeque<Tick>,
    next_seq: HashMap<String, u64>,
}

impl ReplayTickSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a pre-materialized tick sequence as-is.
    #[must_use]
    pub fn from_ticks(ticks: Vec<Tick>) -> Self {
        Self {
            ticks: ticks.into(),
            next_seq: HashMap::new(),
        }
    }

    /// Append one bar as a synthetic tick at the bar close, assigning the
    /// next dense sequence number for the instrument.
    pub fn push_bar(&mut self, instrument_id: &str, bar: &Bar) {
        let seq = self
            .next_seq
            .entry(instrument_id.to_string())
            .or_insert(0);
        *seq += 1;
        self.ticks.push_back(Tick::new(
            instrument_id,
            bar.close,
            bar.timestamp,
            *seq,
        ));
    }

    /// Build a source replaying one instrument's bars as synthetic ticks.
    #[must_use]
    pub fn from_bars(instrument_id: &str, bars: &[Bar]) -> Self {
        let mut source = Self::new();
        for bar in bars {
            source.push_bar(instrument_id, bar);
        }
        source
    }

    /// Number of ticks remaining.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Whether the source is exhausted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

#[async_trait]
impl TickSource for ReplayTickSource {
    async fn next_tick(&mut self) -> Option<Tick> {
        self.ticks.pop_front()
    }
}
