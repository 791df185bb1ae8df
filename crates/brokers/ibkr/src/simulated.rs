use async_trait::async_trait;
use quoteline_core::{BrokerError, DataError, Instrument};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::client::IbClient;
use crate::contract::{BarData, Contract, HistoricalDataRequest, MarketDataType, Ticker};
use crate::mapper::contract_for;

/// Configuration for the simulated client.
#[derive(Debug, Clone)]
pub struct SimulatedClientConfig {
    /// `con_id` handed to the first listed contract; later listings count up.
    pub first_con_id: i64,
    /// Answer ticker requests in reverse order, as a live gateway may.
    pub reverse_tickers: bool,
}

impl Default for SimulatedClientConfig {
    fn default() -> Self {
        Self {
            first_con_id: 1000,
            reverse_tickers: false,
        }
    }
}

/// Canned prices for one listing. Missing values become NaN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickSnapshot {
    pub bid: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask: Option<f64>,
    pub ask_size: Option<f64>,
    pub last: Option<f64>,
    pub last_size: Option<f64>,
    pub close: Option<f64>,
}

impl TickSnapshot {
    pub fn ticker(&self, contract: Contract) -> Ticker {
        let or_nan = |v: Option<f64>| v.unwrap_or(f64::NAN);
        Ticker {
            bid: or_nan(self.bid),
            bid_size: or_nan(self.bid_size),
            ask: or_nan(self.ask),
            ask_size: or_nan(self.ask_size),
            last: or_nan(self.last),
            last_size: or_nan(self.last_size),
            close: or_nan(self.close),
            ..Ticker::empty(contract)
        }
    }
}

/// JSON fixture describing what the simulated client knows about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub reverse_tickers: bool,
    pub listings: Vec<FixtureListing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureListing {
    pub instrument: serde_json::Value,
    #[serde(default)]
    pub quote: Option<TickSnapshot>,
    #[serde(default)]
    pub bars: Vec<BarData>,
}

#[derive(Debug, Clone)]
struct Listing {
    /// Unqualified contract as the mapper produces it.
    contract: Contract,
    con_id: i64,
    snapshot: Option<TickSnapshot>,
    bars: Vec<BarData>,
}

#[derive(Debug, Default)]
struct SimulatedState {
    market_data_type: Option<MarketDataType>,
    historical_requests: Vec<HistoricalDataRequest>,
    ticker_requests: usize,
}

/// An in-process [`IbClient`] serving canned tickers and bars.
///
/// Contracts are resolved against the listings by their terms, so anything
/// produced by the mapper for a listed instrument qualifies.
pub struct SimulatedClient {
    config: SimulatedClientConfig,
    listings: Vec<Listing>,
    /// Tickers appended to every response, for contracts nobody asked for.
    stray_tickers: Vec<Ticker>,
    state: Mutex<SimulatedState>,
}

impl SimulatedClient {
    pub fn new(config: SimulatedClientConfig) -> Self {
        Self {
            config,
            listings: Vec::new(),
            stray_tickers: Vec::new(),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    /// Build a client from a JSON fixture file.
    pub fn from_fixture(path: &Path) -> Result<Self, DataError> {
        let text = std::fs::read_to_string(path)?;
        let fixture: Fixture = serde_json::from_str(&text)
            .map_err(|e| DataError::ParseError(format!("Bad fixture {}: {}", path.display(), e)))?;

        let mut client = Self::new(SimulatedClientConfig {
            reverse_tickers: fixture.reverse_tickers,
            ..Default::default()
        });
        for listing in fixture.listings {
            let instrument = Instrument::from_value(listing.instrument)?;
            client = client.with_listing(&instrument, listing.quote, listing.bars);
        }
        debug!(listings = client.listings.len(), "Loaded simulated fixture");
        Ok(client)
    }

    /// List an instrument with optional prices and historical bars.
    pub fn with_listing(
        mut self,
        instrument: &Instrument,
        snapshot: Option<TickSnapshot>,
        bars: Vec<BarData>,
    ) -> Self {
        let con_id = self.config.first_con_id + self.listings.len() as i64;
        self.listings.push(Listing {
            contract: contract_for(instrument),
            con_id,
            snapshot,
            bars,
        });
        self
    }

    pub fn with_quote(self, instrument: &Instrument, snapshot: TickSnapshot) -> Self {
        self.with_listing(instrument, Some(snapshot), Vec::new())
    }

    pub fn with_bars(self, instrument: &Instrument, bars: Vec<BarData>) -> Self {
        self.with_listing(instrument, None, bars)
    }

    pub fn with_stray_ticker(mut self, ticker: Ticker) -> Self {
        self.stray_tickers.push(ticker);
        self
    }

    /// The market data type most recently requested.
    pub fn market_data_type(&self) -> Option<MarketDataType> {
        self.state().market_data_type
    }

    pub fn historical_requests(&self) -> Vec<HistoricalDataRequest> {
        self.state().historical_requests.clone()
    }

    pub fn ticker_requests(&self) -> usize {
        self.state().ticker_requests
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listing(&self, contract: &Contract) -> Option<&Listing> {
        self.listings
            .iter()
            .find(|listing| listing.contract.same_terms(contract))
    }
}

#[async_trait]
impl IbClient for SimulatedClient {
    async fn qualify_contracts(&self, contracts: &mut [Contract]) -> Result<(), BrokerError> {
        for contract in contracts.iter_mut() {
            match self.listing(contract) {
                Some(listing) => contract.con_id = listing.con_id,
                None => warn!(%contract, "Unknown contract"),
            }
        }
        Ok(())
    }

    async fn req_historical_data(
        &self,
        contract: &Contract,
        request: &HistoricalDataRequest,
    ) -> Result<Vec<BarData>, BrokerError> {
        self.state().historical_requests.push(request.clone());
        self.listing(contract)
            .map(|listing| listing.bars.clone())
            .ok_or_else(|| {
                BrokerError::Rejected(format!(
                    "No security definition has been found for {}",
                    contract
                ))
            })
    }

    async fn req_tickers(&self, contracts: &[Contract]) -> Result<Vec<Ticker>, BrokerError> {
        self.state().ticker_requests += 1;

        let mut tickers: Vec<Ticker> = contracts
            .iter()
            .map(|contract| {
                match self.listing(contract).and_then(|l| l.snapshot.as_ref()) {
                    Some(snapshot) => snapshot.ticker(contract.clone()),
                    None => Ticker::empty(contract.clone()),
                }
            })
            .collect();
        tickers.extend(self.stray_tickers.iter().cloned());

        if self.config.reverse_tickers {
            tickers.reverse();
        }
        Ok(tickers)
    }

    async fn req_market_data_type(&self, data_type: MarketDataType) -> Result<(), BrokerError> {
        self.state().market_data_type = Some(data_type);
        Ok(())
    }
}
