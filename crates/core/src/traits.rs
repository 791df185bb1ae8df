use crate::models::*;
use async_trait::async_trait;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Broker errors
// ---------------------------------------------------------------------------

/// Errors reported by a broker API client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Broker error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Market Data Provider Traits
// ---------------------------------------------------------------------------

/// Errors that can occur during data operations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The broker returned data for a contract that was never requested.
    #[error("Received tick for unrequested contract: {0}")]
    UnmatchedTick(String),
    #[error("Not supported: {0}")]
    Unsupported(String),
}

/// Fetches prices for instruments on demand.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Load the provider's default window of historical bars for an instrument.
    async fn fetch_historical_data(&self, instrument: &Instrument) -> Result<Vec<Bar>, DataError>;

    /// Fetch current quotes for a batch of instruments.
    ///
    /// Each quote is paired with the instrument it belongs to. Ordering
    /// follows whatever order the source answers in.
    async fn fetch_quotes(
        &self,
        instruments: &[Instrument],
    ) -> Result<Vec<(Instrument, Quote)>, DataError>;
}

/// A provider that can also push quote updates as they happen.
#[async_trait]
pub trait StreamingMarketDataProvider: MarketDataProvider {
    /// Subscribe to live quotes. Dropping the receiver ends the subscription.
    async fn subscribe_to_quotes(
        &self,
        instruments: &[Instrument],
    ) -> Result<mpsc::Receiver<(Instrument, Quote)>, DataError>;
}
