//! The tick-source contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::Tick;

/// A lazy, ordered sequence of market-data events.
///
/// Both the live broker subscription and the backtest replay satisfy this one
/// contract; the dispatcher and strategy engine are unaware of the
/// substitution. Implementations assign per-instrument sequence numbers that
/// are dense and monotonically non-decreasing within one session.
#[async_trait]
pub trait TickSource: Send {
    /// Produce the next tick, or `None` when the source is exhausted.
    async fn next_tick(&mut self) -> Option<Tick>;
}

/// Tick source backed by an async channel.
///
/// This is the live-shaped source: a broker's websocket task pushes ticks
/// into the sender half while the dispatcher consumes the receiver half.
#[derive(Debug)]
pub struct ChannelTickSource {
    rx: mpsc::Receiver<Tick>,
}

impl ChannelTickSource {
    /// Wrap an existing receiver.
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<Tick>) -> Self {
        Self { rx }
    }

    /// Create a connected sender/source pair with the given channel capacity.
    #[must_use]
    pub fn pair(capacity: usize) -> (mpsc::Sender<Tick>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl TickSource for ChannelTickSource {
    async fn next_tick(&mut self) -> Option<Tick> {
        self.rx.recv().await
    }
}
