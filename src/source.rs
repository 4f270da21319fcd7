//! Source adapter abstractions
//!
//! Two seams: `StreamSource` for the websocket tiers, driven by the failover
//! controller's stream loop, and `SnapshotSource` for the batched polling
//! tier, which also feeds the 24h baseline.

use crate::{
    error::SourceError,
    types::{SourceTick, SourceTier, Symbol},
};
use async_trait::async_trait;

/// A persistent-stream price source.
///
/// The adapter owns parsing and symbol resolution; the controller owns the
/// connect/read/reconnect lifecycle, so demoting a tier reliably stops its
/// reconnect loop.
#[async_trait]
pub trait StreamSource: Send {
    /// Which tier this source occupies
    fn tier(&self) -> SourceTier;

    /// Opens the connection and subscribes to the ticker channel for every
    /// mapped symbol
    async fn connect(&mut self) -> Result<(), SourceError>;

    /// Waits for the next batch of normalized ticks.
    ///
    /// Unrecognized and malformed messages are dropped inside the adapter
    /// (logged, state unaffected); only connection-level failures surface.
    async fn next_ticks(&mut self) -> Result<Vec<SourceTick>, SourceError>;

    /// Closes the connection, if open
    async fn disconnect(&mut self);
}

/// A request/response price source returning one batched snapshot
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Which tier this source occupies
    fn tier(&self) -> SourceTier;

    /// Fetches current market data for the given symbols.
    ///
    /// Returns `SourceError::Cooldown` when invoked again before the
    /// minimum inter-request spacing has elapsed.
    async fn fetch_snapshot(&self, symbols: &[Symbol]) -> Result<Vec<SourceTick>, SourceError>;
}
