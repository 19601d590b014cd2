//! Market data ingestion.
//!
//! This module owns the tick-source contract shared by live and backtest
//! feeds, and the dispatcher that fans ticks out to the strategy engine
//! with per-instrument ordering guarantees.

mod dispatcher;
mod replay;
mod source;

pub use dispatcher::{Dispatcher, DispatchError, SubscriptionHandle, TickReceiver};
pub use replay::ReplayTickSource;
pub use source::{ChannelTickSource, TickSource};
