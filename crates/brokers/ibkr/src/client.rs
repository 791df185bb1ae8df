use async_trait::async_trait;
use quoteline_core::BrokerError;

use crate::contract::{BarData, Contract, HistoricalDataRequest, MarketDataType, Ticker};

/// The slice of the IB API that market data fetching needs.
///
/// Connection lifecycle, pacing and timeouts belong to the implementation.
#[async_trait]
pub trait IbClient: Send + Sync {
    /// Resolve contracts in place, filling `con_id` and venue details.
    async fn qualify_contracts(&self, contracts: &mut [Contract]) -> Result<(), BrokerError>;

    /// Request historical bars for a single contract.
    async fn req_historical_data(
        &self,
        contract: &Contract,
        request: &HistoricalDataRequest,
    ) -> Result<Vec<BarData>, BrokerError>;

    /// Snapshot tickers for a batch of contracts. Resolves once every ticker is in.
    async fn req_tickers(&self, contracts: &[Contract]) -> Result<Vec<Ticker>, BrokerError>;

    /// Switch the market data mode for subsequent requests.
    async fn req_market_data_type(&self, data_type: MarketDataType) -> Result<(), BrokerError>;
}
