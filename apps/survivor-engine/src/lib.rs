// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Survivor Engine - Rust Core Library
//!
//! Single-underlying options-selling automation: sell out-of-the-money call
//! and put legs at configured strike offsets, track their lifecycle against
//! market ticks, and exit or expire them by price-decay rules.
//!
//! # Architecture
//!
//! Three tightly-coupled cores, wired leaves-first:
//!
//! - `feed`: the tick-source contract (live subscription or historical
//!   replay behind one interface) and the dispatcher that delivers ticks
//!   per instrument in non-decreasing sequence order with bounded buffering.
//! - `strategy`: the Survivor state machine
//!   (`Idle → AwaitingEntry → LegsActive → Exit* → Closed`) with
//!   independent per-leg projections and leg-level failure isolation.
//! - `tracker`: the single source of truth for order state, persisting
//!   every record before the broker call and reconciling against the broker
//!   on startup.
//!
//! `broker` defines the capability interface the cores consume; `backtest`
//! replays stored bars through the identical dispatcher contract.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Backtesting over stored historical bars.
pub mod backtest;

/// Broker capability interface and the paper implementation.
pub mod broker;

/// Configuration loading and validation.
pub mod config;

/// Engine-level error taxonomy.
pub mod error;

/// Tick sources and the market data dispatcher.
pub mod feed;

/// Core data model.
pub mod models;

/// The Survivor strategy state machine.
pub mod strategy;

/// Tracing setup.
pub mod telemetry;

/// Order tracking, persistence, and reconciliation.
pub mod tracker;

pub use error::EngineError;
