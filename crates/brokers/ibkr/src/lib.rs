//! Interactive Brokers market data.
//!
//! Instruments are translated into IB contracts by [`mapper`], qualified and
//! priced through an [`IbClient`], and the resulting tickers normalized into
//! [`Quote`](quoteline_core::Quote)s by [`quote`].

pub mod bridge;
pub mod client;
pub mod config;
pub mod contract;
pub mod mapper;
pub mod provider;
pub mod quote;
pub mod simulated;

pub use bridge::BridgeClient;
pub use client::IbClient;
pub use config::{BridgeConfig, IbkrConfig, MarketDataConfig};
pub use contract::{BarData, Contract, HistoricalDataRequest, MarketDataType, SecType, Ticker};
pub use mapper::contract_for;
pub use provider::{ContractTable, IbkrDataProvider};
pub use quote::quote_from_ticker;
pub use simulated::{SimulatedClient, SimulatedClientConfig};
