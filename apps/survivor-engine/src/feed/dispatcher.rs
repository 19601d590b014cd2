//! Market data dispatcher.
//!
//! Single point of ingestion for market data: consumes one [`TickSource`],
//! demultiplexes events by instrument, and delivers them to the registered
//! consumer with per-instrument ordering guarantees.
//!
//! # Delivery contract
//!
//! For a given instrument, ticks are delivered in strictly increasing
//! sequence order. Duplicates (sequence already seen) are dropped; ticks that
//! arrive ahead of a sequence gap are held in a bounded reorder window and
//! released in order; ticks older than the staleness window are dropped and
//! logged as data-quality events, never errors.
//!
//! # Backpressure
//!
//! Delivery buffers are bounded per instrument. On overflow the OLDEST
//! buffered tick for that instrument is dropped (never the newest),
//! preserving most-recent-price-wins semantics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::DispatcherConfig;
use crate::models::Tick;

use super::TickSource;

/// Errors from dispatcher operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The instrument is already subscribed in this session.
    #[error("Instrument already subscribed: {0}")]
    AlreadySubscribed(String),
}

/// Handle returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    /// Instruments covered by this subscription.
    pub instruments: Vec<String>,
}

/// Per-instrument sequencing state.
#[derive(Debug, Default)]
struct InstrumentState {
    /// Highest sequence handed to the delivery buffer.
    delivered_seq: Option<u64>,
    /// Out-of-order ticks held for reordering, keyed by sequence.
    pending: BTreeMap<u64, Tick>,
    /// Ingests survived since the oldest pending tick was buffered.
    pending_age: usize,
    /// Newest event timestamp seen (staleness reference).
    newest_ts: Option<DateTime<Utc>>,
    /// Ticks of this instrument currently in the delivery buffer.
    queued: usize,
}

#[derive(Debug, Default)]
struct Inner {
    instruments: HashMap<String, InstrumentState>,
    /// Delivery buffer in arrival order across instruments.
    ready: VecDeque<Tick>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    config: DispatcherConfig,
    inner: Mutex<Inner>,
    notify: Notify,
    ingested: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn staleness(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.config.staleness_window_ms).unwrap_or(i64::MAX))
    }

    /// Ingest one tick from the source.
    fn ingest(&self, tick: Tick) {
        self.ingested.fetch_add(1, Ordering::Relaxed);

        let mut released = Vec::new();
        {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };

            let Some(state) = inner.instruments.get_mut(&tick.instrument_id) else {
                trace!(instrument = %tick.instrument_id, seq = tick.sequence, "Tick for unsubscribed instrument dropped");
                return;
            };

            // Staleness check against the newest event seen for the instrument.
            if let Some(newest) = state.newest_ts
                && newest - tick.timestamp > self.staleness()
            {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    instrument = %tick.instrument_id,
                    seq = tick.sequence,
                    tick_ts = %tick.timestamp,
                    newest_ts = %newest,
                    "Stale tick dropped (data-quality)"
                );
                return;
            }
            state.newest_ts = Some(state.newest_ts.map_or(tick.timestamp, |newest| {
                newest.max(tick.timestamp)
            }));

            // Duplicate / already-delivered detection via sequence number.
            if let Some(delivered) = state.delivered_seq
                && tick.sequence <= delivered
            {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    instrument = %tick.instrument_id,
                    seq = tick.sequence,
                    delivered = delivered,
                    "Duplicate or late tick dropped"
                );
                return;
            }
            if state.pending.contains_key(&tick.sequence) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    instrument = %tick.instrument_id,
                    seq = tick.sequence,
                    "Duplicate buffered tick dropped"
                );
                return;
            }

            state.pending.insert(tick.sequence, tick);
            Self::drain_in_order(state, &mut released);

            // Bounded lateness: accept the gap once the reorder window is
            // exhausted, releasing the oldest held tick.
            if state.pending.is_empty() {
                state.pending_age = 0;
            } else {
                state.pending_age += 1;
                if state.pending_age > self.config.reorder_window
                    || state.pending.len() > self.config.reorder_window
                {
                    if let Some((seq, held)) = state.pending.pop_first() {
                        warn!(
                            instrument = %held.instrument_id,
                            seq = seq,
                            expected = state.delivered_seq.map_or(0, |d| d + 1),
                            "Sequence gap accepted after reorder window (data-quality)"
                        );
                        state.delivered_seq = Some(seq);
                        released.push(held);
                        Self::drain_in_order(state, &mut released);
                    }
                    state.pending_age = 0;
                }
            }

            for tick in released {
                self.enqueue(&mut inner, tick);
            }
        }

        self.notify.notify_waiters();
    }

    /// Move in-order pending ticks into the released list.
    fn drain_in_order(state: &mut InstrumentState, released: &mut Vec<Tick>) {
        while let Some(entry) = state.pending.first_entry() {
            let seq = *entry.key();
            let in_order = state.delivered_seq.is_none_or(|delivered| seq == delivered + 1);
            if !in_order {
                break;
            }
            state.delivered_seq = Some(seq);
            released.push(entry.remove());
        }
    }

    /// Append to the delivery buffer, evicting the instrument's oldest tick
    /// on overflow.
    fn enqueue(&self, inner: &mut Inner, tick: Tick) {
        let instrument_id = tick.instrument_id.clone();
        let at_capacity = inner
            .instruments
            .get(&instrument_id)
            .is_some_and(|s| s.queued >= self.config.buffer_capacity);

        if at_capacity {
            if let Some(pos) = inner
                .ready
                .iter()
                .position(|t| t.instrument_id == instrument_id)
            {
                let evicted = inner.ready.remove(pos);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    instrument = %instrument_id,
                    evicted_seq = evicted.map_or(0, |t| t.sequence),
                    "Delivery buffer overflow, oldest tick dropped"
                );
                if let Some(state) = inner.instruments.get_mut(&instrument_id) {
                    state.queued = state.queued.saturating_sub(1);
                }
            }
        }

        if let Some(state) = inner.instruments.get_mut(&instrument_id) {
            state.queued += 1;
        }
        inner.ready.push_back(tick);
    }

    /// Flush any still-held pending ticks (in order) and mark the stream
    /// closed.
    fn close(&self) {
        {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };

            let mut flushed = Vec::new();
            for state in inner.instruments.values_mut() {
                while let Some((seq, tick)) = state.pending.pop_first() {
                    state.delivered_seq = Some(seq);
                    flushed.push(tick);
                }
            }
            for tick in flushed {
                self.enqueue(&mut inner, tick);
            }
            inner.closed = true;
        }
        self.notify.notify_waiters();

        info!(
            ingested = self.ingested.load(Ordering::Relaxed),
            dropped = self.dropped.load(Ordering::Relaxed),
            "Dispatcher stream closed"
        );
    }
}

/// Market data dispatcher.
///
/// Cheap to clone; all clones share the same subscription set and delivery
/// buffer.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a dispatcher and the single consumer handle it delivers to.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> (Self, TickReceiver) {
        let shared = Arc::new(Shared {
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            ingested: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            TickReceiver { shared },
        )
    }

    /// Register interest in a set of instruments.
    ///
    /// # Errors
    ///
    /// Fails with [`DispatchError::AlreadySubscribed`] if any instrument in
    /// the set is already subscribed this session; no partial registration
    /// happens.
    pub fn subscribe(&self, instrument_ids: &[String]) -> Result<SubscriptionHandle, DispatchError> {
        let mut inner = match self.shared.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for id in instrument_ids {
            if inner.instruments.contains_key(id) {
                return Err(DispatchError::AlreadySubscribed(id.clone()));
            }
        }
        for id in instrument_ids {
            inner
                .instruments
                .insert(id.clone(), InstrumentState::default());
        }

        info!(instruments = ?instrument_ids, "Instruments subscribed");
        Ok(SubscriptionHandle {
            instruments: instrument_ids.to_vec(),
        })
    }

    /// Instruments currently subscribed.
    #[must_use]
    pub fn subscribed_instruments(&self) -> Vec<String> {
        self.shared
            .inner
            .lock()
            .map(|inner| inner.instruments.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Begin consuming the tick source as a background task.
    ///
    /// The task runs until the source is exhausted or the shutdown signal
    /// flips to `true`; either way remaining reorder buffers are flushed in
    /// order and the consumer sees end-of-stream.
    pub fn start<S>(&self, mut source: S, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        S: TickSource + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            info!("Dispatcher started");
            let mut shutdown_live = true;
            loop {
                if shutdown_live {
                    tokio::select! {
                        tick = source.next_tick() => match tick {
                            Some(tick) => shared.ingest(tick),
                            None => break,
                        },
                        changed = shutdown.changed() => match changed {
                            Ok(()) => {
                                if *shutdown.borrow() {
                                    break;
                                }
                            }
                            // Sender dropped; keep draining the source.
                            Err(_) => shutdown_live = false,
                        },
                    }
                } else {
                    match source.next_tick().await {
                        Some(tick) => shared.ingest(tick),
                        None => break,
                    }
                }
            }
            shared.close();
        })
    }
}

/// Consumer handle delivering dispatched ticks.
#[derive(Debug)]
pub struct TickReceiver {
    shared: Arc<Shared>,
}

impl TickReceiver {
    /// Receive the next tick, or `None` once the stream is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<Tick> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut inner = match self.shared.inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(tick) = inner.ready.pop_front() {
                    if let Some(state) = inner.instruments.get_mut(&tick.instrument_id) {
                        state.queued = state.queued.saturating_sub(1);
                    }
                    return Some(tick);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ReplayTickSource;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const NIFTY: &str = "NIFTY 50";

    fn tick(seq: u64) -> Tick {
        Tick::new(NIFTY, dec!(24500) + Decimal::from(seq), Utc::now(), seq)
    }

    async fn run_through(config: DispatcherConfig, ticks: Vec<Tick>) -> Vec<Tick> {
        let (dispatcher, mut rx) = Dispatcher::new(config);
        dispatcher
            .subscribe(&[NIFTY.to_string()])
            .expect("subscribe");

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = dispatcher.start(ReplayTickSource::from_ticks(ticks), shutdown_rx);

        let mut out = Vec::new();
        while let Some(tick) = rx.recv().await {
            out.push(tick);
        }
        handle.await.expect("dispatcher task");
        out
    }

    #[tokio::test]
    async fn test_in_order_delivery_is_immediate() {
        let out = run_through(
            DispatcherConfig::default(),
            vec![tick(1), tick(2), tick(3)],
        )
        .await;
        let seqs: Vec<u64> = out.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let out = run_through(
            DispatcherConfig::default(),
            vec![tick(1), tick(1), tick(2), tick(2), tick(3)],
        )
        .await;
        let seqs: Vec<u64> = out.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_out_of_order_ticks_are_reordered() {
        let out = run_through(
            DispatcherConfig::default(),
            vec![tick(1), tick(3), tick(2), tick(4)],
        )
        .await;
        let seqs: Vec<u64> = out.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_gap_is_accepted_after_reorder_window() {
        let config = DispatcherConfig {
            reorder_window: 2,
            ..Default::default()
        };
        // Sequence 2 never arrives; 3 must still get through.
        let out = run_through(config, vec![tick(1), tick(3), tick(4), tick(5), tick(6)]).await;
        let seqs: Vec<u64> = out.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_stale_tick_dropped() {
        let now = Utc::now();
        let fresh = Tick::new(NIFTY, dec!(24500), now, 1);
        let stale = Tick::new(
            NIFTY,
            dec!(24400),
            now - TimeDelta::seconds(60),
            2,
        );
        let out = run_through(DispatcherConfig::default(), vec![fresh, stale, tick(3)]).await;
        let seqs: Vec<u64> = out.iter().map(|t| t.sequence).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_double_subscribe_fails() {
        let (dispatcher, _rx) = Dispatcher::new(DispatcherConfig::default());
        dispatcher
            .subscribe(&[NIFTY.to_string()])
            .expect("first subscribe");
        let err = dispatcher
            .subscribe(&[NIFTY.to_string()])
            .expect_err("second subscribe must fail");
        assert_eq!(err, DispatchError::AlreadySubscribed(NIFTY.to_string()));
        // The failed registration must not have been applied partially.
        assert_eq!(dispatcher.subscribed_instruments(), vec![NIFTY.to_string()]);
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_not_newest() {
        let config = DispatcherConfig {
            buffer_capacity: 2,
            ..Default::default()
        };
        let (dispatcher, mut rx) = Dispatcher::new(config);
        dispatcher
            .subscribe(&[NIFTY.to_string()])
            .expect("subscribe");

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        // Consumer does not read until the source is exhausted, forcing
        // the buffer over capacity.
        let handle = dispatcher.start(
            ReplayTickSource::from_ticks(vec![tick(1), tick(2), tick(3), tick(4)]),
            shutdown_rx,
        );
        handle.await.expect("dispatcher task");

        let mut seqs = Vec::new();
        while let Some(t) = rx.recv().await {
            seqs.push(t.sequence);
        }
        // Capacity 2: oldest (1, 2) evicted, newest retained.
        assert_eq!(seqs, vec![3, 4]);
    }

    proptest! {
        /// Delivered sequences are strictly increasing per instrument, for
        /// arbitrary interleavings of duplicates and reorderings.
        #[test]
        fn prop_no_sequence_regression(raw in proptest::collection::vec(1u64..200, 1..120)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let delivered = runtime.block_on(run_through(
                DispatcherConfig {
                    // Large enough that nothing is dropped for backpressure.
                    buffer_capacity: 4096,
                    ..Default::default()
                },
                raw.into_iter().map(tick).collect(),
            ));
            for window in delivered.windows(2) {
                prop_assert!(window[0].sequence < window[1].sequence);
            }
        }
    }
}
