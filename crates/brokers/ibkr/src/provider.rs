use async_trait::async_trait;
use quoteline_core::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::IbClient;
use crate::contract::{BarData, Contract, HistoricalDataRequest, MarketDataType};
use crate::mapper::contract_for;
use crate::quote::quote_from_ticker;

/// Instruments paired with their contracts by position.
///
/// Contracts cannot be hashed, so lookups in either direction are linear.
/// Batches are small enough for that not to matter.
#[derive(Debug, Clone, Default)]
pub struct ContractTable {
    instruments: Vec<Instrument>,
    contracts: Vec<Contract>,
}

impl ContractTable {
    /// Map each distinct instrument to its contract, keeping first-seen order.
    pub fn build(instruments: &[Instrument]) -> Self {
        let mut table = Self::default();
        for instrument in instruments {
            if table.instruments.contains(instrument) {
                debug!(%instrument, "Skipping duplicate instrument");
                continue;
            }
            table.instruments.push(instrument.clone());
            table.contracts.push(contract_for(instrument));
        }
        table
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Instrument, &Contract)> {
        self.instruments.iter().zip(self.contracts.iter())
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn contract_for(&self, instrument: &Instrument) -> Option<&Contract> {
        self.iter()
            .find(|(candidate, _)| *candidate == instrument)
            .map(|(_, contract)| contract)
    }

    pub fn instrument_for(&self, contract: &Contract) -> Option<&Instrument> {
        self.iter()
            .find(|(_, candidate)| candidate.same_contract(contract))
            .map(|(instrument, _)| instrument)
    }
}

/// Market data from Interactive Brokers through an [`IbClient`].
pub struct IbkrDataProvider<C> {
    client: C,
}

impl<C: IbClient> IbkrDataProvider<C> {
    /// Wrap a connected client, optionally switching its market data type first.
    pub async fn new(client: C, data_type: Option<MarketDataType>) -> Result<Self, DataError> {
        if let Some(data_type) = data_type {
            info!(%data_type, "Setting market data type");
            client.req_market_data_type(data_type).await?;
        }
        Ok(Self { client })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    /// Map instruments to contracts and qualify them in one batch.
    pub async fn qualify_contracts(
        &self,
        instruments: &[Instrument],
    ) -> Result<ContractTable, DataError> {
        let mut table = ContractTable::build(instruments);
        if table.is_empty() {
            return Ok(table);
        }

        self.client.qualify_contracts(&mut table.contracts).await?;

        let unresolved = table.contracts.iter().filter(|c| !c.is_qualified()).count();
        if unresolved > 0 {
            warn!(unresolved, total = table.len(), "Some contracts were not qualified");
        }
        debug!(contracts = table.len(), "Qualified contracts");
        Ok(table)
    }

    /// Fetch historical bars for one instrument with explicit request parameters.
    pub async fn fetch_bars(
        &self,
        instrument: &Instrument,
        request: &HistoricalDataRequest,
    ) -> Result<Vec<Bar>, DataError> {
        let table = self.qualify_contracts(std::slice::from_ref(instrument)).await?;
        let contract = table
            .contract_for(instrument)
            .ok_or_else(|| DataError::NotFound(instrument.to_string()))?;

        info!(
            %contract,
            duration = %request.duration,
            bar_size = %request.bar_size,
            what_to_show = %request.what_to_show,
            "Requesting historical data"
        );
        let rows = self.client.req_historical_data(contract, request).await?;
        debug!(rows = rows.len(), "Received historical data");

        rows.iter().map(BarData::to_bar).collect()
    }

    /// Fetch quotes, optionally switching the market data type for this and
    /// later requests.
    ///
    /// Fails with [`DataError::UnmatchedTick`] if the client answers for a
    /// contract that was not requested.
    pub async fn fetch_quotes_with_type(
        &self,
        instruments: &[Instrument],
        data_type: Option<MarketDataType>,
    ) -> Result<Vec<(Instrument, Quote)>, DataError> {
        if let Some(data_type) = data_type {
            info!(%data_type, "Setting market data type");
            self.client.req_market_data_type(data_type).await?;
        }

        let table = self.qualify_contracts(instruments).await?;
        if table.is_empty() {
            return Ok(Vec::new());
        }

        let tickers = self.client.req_tickers(table.contracts()).await?;
        debug!(requested = table.len(), received = tickers.len(), "Received tickers");

        tickers
            .iter()
            .map(|ticker| {
                let instrument = table
                    .instrument_for(&ticker.contract)
                    .ok_or_else(|| DataError::UnmatchedTick(ticker.contract.to_string()))?;
                Ok((instrument.clone(), quote_from_ticker(ticker, instrument)))
            })
            .collect()
    }
}

#[async_trait]
impl<C: IbClient> MarketDataProvider for IbkrDataProvider<C> {
    /// Ten years of daily trade bars, regular trading hours only.
    async fn fetch_historical_data(&self, instrument: &Instrument) -> Result<Vec<Bar>, DataError> {
        self.fetch_bars(instrument, &HistoricalDataRequest::default())
            .await
    }

    async fn fetch_quotes(
        &self,
        instruments: &[Instrument],
    ) -> Result<Vec<(Instrument, Quote)>, DataError> {
        self.fetch_quotes_with_type(instruments, None).await
    }
}

#[async_trait]
impl<C: IbClient> StreamingMarketDataProvider for IbkrDataProvider<C> {
    async fn subscribe_to_quotes(
        &self,
        _instruments: &[Instrument],
    ) -> Result<mpsc::Receiver<(Instrument, Quote)>, DataError> {
        Err(DataError::Unsupported(
            "streaming quote subscriptions".to_string(),
        ))
    }
}
