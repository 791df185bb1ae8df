//! Wire-level types of the IB API surface this crate consumes.

use chrono::{DateTime, Utc};
use quoteline_core::{Bar, DataError};
use quoteline_data::parse_timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// IB security type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecType {
    #[serde(rename = "STK")]
    Stock,
    #[serde(rename = "BOND")]
    Bond,
    #[serde(rename = "OPT")]
    Option,
    #[serde(rename = "FOP")]
    FuturesOption,
    #[serde(rename = "FUT")]
    Future,
    #[serde(rename = "CASH")]
    Forex,
}

impl SecType {
    pub fn code(&self) -> &'static str {
        match self {
            SecType::Stock => "STK",
            SecType::Bond => "BOND",
            SecType::Option => "OPT",
            SecType::FuturesOption => "FOP",
            SecType::Future => "FUT",
            SecType::Forex => "CASH",
        }
    }
}

/// Broker contract descriptor.
///
/// `strike` is a float, so contracts are only `PartialEq` and must never be
/// used as map keys. Pair them with instruments by position instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub sec_type: SecType,
    /// Broker-assigned identifier; 0 until qualified.
    #[serde(default)]
    pub con_id: i64,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub local_symbol: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub primary_exchange: String,
    #[serde(default)]
    pub currency: String,
    /// `YYYYMMDD` for dated contracts.
    #[serde(default)]
    pub last_trade_date_or_contract_month: String,
    #[serde(default)]
    pub right: String,
    #[serde(default)]
    pub strike: f64,
    #[serde(default)]
    pub multiplier: String,
}

impl Contract {
    /// An empty contract of the given type.
    pub fn new(sec_type: SecType) -> Self {
        Self {
            sec_type,
            con_id: 0,
            symbol: String::new(),
            local_symbol: String::new(),
            exchange: String::new(),
            primary_exchange: String::new(),
            currency: String::new(),
            last_trade_date_or_contract_month: String::new(),
            right: String::new(),
            strike: 0.0,
            multiplier: String::new(),
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.con_id != 0
    }

    /// Whether two contracts describe the same security.
    ///
    /// Qualified contracts compare by `con_id`; otherwise every field must match.
    pub fn same_contract(&self, other: &Contract) -> bool {
        if self.is_qualified() && other.is_qualified() {
            self.con_id == other.con_id
        } else {
            self == other
        }
    }

    /// Field equality ignoring `con_id`.
    pub fn same_terms(&self, other: &Contract) -> bool {
        Contract {
            con_id: 0,
            ..self.clone()
        } == Contract {
            con_id: 0,
            ..other.clone()
        }
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.local_symbol.is_empty() {
            &self.symbol
        } else {
            &self.local_symbol
        };
        write!(f, "{} {}", self.sec_type.code(), symbol)?;
        if !self.exchange.is_empty() {
            write!(f, " @{}", self.exchange)?;
        }
        if !self.currency.is_empty() {
            write!(f, " {}", self.currency)?;
        }
        if self.is_qualified() {
            write!(f, " (conId {})", self.con_id)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Market data type
// ---------------------------------------------------------------------------

/// Market data mode requested from TWS.
///
/// See <https://interactivebrokers.github.io/tws-api/market_data_type.html>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketDataType {
    Live = 1,
    Frozen = 2,
    Delayed = 3,
    DelayedFrozen = 4,
}

impl MarketDataType {
    /// Numeric code used by the API.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(MarketDataType::Live),
            2 => Some(MarketDataType::Frozen),
            3 => Some(MarketDataType::Delayed),
            4 => Some(MarketDataType::DelayedFrozen),
            _ => None,
        }
    }
}

impl fmt::Display for MarketDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MarketDataType::Live => "live",
            MarketDataType::Frozen => "frozen",
            MarketDataType::Delayed => "delayed",
            MarketDataType::DelayedFrozen => "delayed-frozen",
        })
    }
}

impl FromStr for MarketDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "live" | "1" => Ok(MarketDataType::Live),
            "frozen" | "2" => Ok(MarketDataType::Frozen),
            "delayed" | "3" => Ok(MarketDataType::Delayed),
            "delayed-frozen" | "4" => Ok(MarketDataType::DelayedFrozen),
            other => Err(format!(
                "unknown market data type '{}' (expected live, frozen, delayed or delayed-frozen)",
                other
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Non-finite floats travel as JSON `null` and come back as NaN.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

fn nan() -> f64 {
    f64::NAN
}

/// Snapshot of current prices and sizes for a contract.
///
/// Missing values are NaN, as TWS reports them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub contract: Contract,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default = "nan", with = "nan_as_null")]
    pub bid: f64,
    #[serde(default = "nan", with = "nan_as_null")]
    pub bid_size: f64,
    #[serde(default = "nan", with = "nan_as_null")]
    pub ask: f64,
    #[serde(default = "nan", with = "nan_as_null")]
    pub ask_size: f64,
    #[serde(default = "nan", with = "nan_as_null")]
    pub last: f64,
    #[serde(default = "nan", with = "nan_as_null")]
    pub last_size: f64,
    #[serde(default = "nan", with = "nan_as_null")]
    pub close: f64,
}

impl Ticker {
    /// A ticker with no data, as returned for contracts without market data.
    pub fn empty(contract: Contract) -> Self {
        Self {
            contract,
            time: None,
            bid: f64::NAN,
            bid_size: f64::NAN,
            ask: f64::NAN,
            ask_size: f64::NAN,
            last: f64::NAN,
            last_size: f64::NAN,
            close: f64::NAN,
        }
    }
}

// ---------------------------------------------------------------------------
// Historical data
// ---------------------------------------------------------------------------

/// Parameters of a `reqHistoricalData` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalDataRequest {
    /// Empty means "now".
    pub end_date_time: String,
    pub duration: String,
    pub bar_size: String,
    pub what_to_show: String,
    pub use_rth: bool,
    pub format_date: u8,
}

impl Default for HistoricalDataRequest {
    /// Ten years of daily trade bars, regular trading hours only.
    fn default() -> Self {
        Self {
            end_date_time: String::new(),
            duration: "10 Y".to_string(),
            bar_size: "1 day".to_string(),
            what_to_show: "TRADES".to_string(),
            use_rth: true,
            format_date: 1,
        }
    }
}

/// A historical bar as the API reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarData {
    /// `yyyyMMdd` for daily bars, `yyyyMMdd  HH:mm:ss` for intraday.
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub average: f64,
    #[serde(default)]
    pub bar_count: i64,
}

impl BarData {
    pub fn to_bar(&self) -> Result<Bar, DataError> {
        Ok(Bar {
            timestamp: parse_timestamp(&self.date)?,
            open: to_decimal(self.open, "open")?,
            high: to_decimal(self.high, "high")?,
            low: to_decimal(self.low, "low")?,
            close: to_decimal(self.close, "close")?,
            // Volume is -1 where the API has none (e.g. FX midpoint bars).
            volume: if self.volume < 0.0 {
                Decimal::ZERO
            } else {
                to_decimal(self.volume, "volume")?
            },
            average: Decimal::try_from(self.average)
                .ok()
                .filter(|avg| *avg > Decimal::ZERO),
            bar_count: u64::try_from(self.bar_count).ok().filter(|n| *n > 0),
        })
    }
}

fn to_decimal(value: f64, field: &str) -> Result<Decimal, DataError> {
    Decimal::try_from(value)
        .map_err(|e| DataError::ParseError(format!("Bad {} value {}: {}", field, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use rust_decimal_macros::dec;

    fn stock(symbol: &str) -> Contract {
        Contract {
            symbol: symbol.to_string(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            ..Contract::new(SecType::Stock)
        }
    }

    #[test]
    fn test_same_contract_prefers_con_id() {
        let mut a = stock("AAPL");
        let mut b = stock("AAPL");
        b.primary_exchange = "NASDAQ".to_string();
        assert!(!a.same_contract(&b));

        a.con_id = 265598;
        b.con_id = 265598;
        assert!(a.same_contract(&b));

        b.con_id = 1;
        assert!(!a.same_contract(&b));
    }

    #[test]
    fn test_same_terms_ignores_con_id() {
        let a = stock("MSFT");
        let b = Contract {
            con_id: 272093,
            ..stock("MSFT")
        };
        assert!(a.same_terms(&b));
        assert!(!a.same_terms(&stock("IBM")));
    }

    #[test]
    fn test_market_data_type_parse() {
        assert_eq!("delayed_frozen".parse::<MarketDataType>(), Ok(MarketDataType::DelayedFrozen));
        assert_eq!("LIVE".parse::<MarketDataType>(), Ok(MarketDataType::Live));
        assert_eq!("3".parse::<MarketDataType>(), Ok(MarketDataType::Delayed));
        assert!("realtime".parse::<MarketDataType>().is_err());
        assert_eq!(MarketDataType::Frozen.code(), 2);
        assert_eq!(MarketDataType::from_code(4), Some(MarketDataType::DelayedFrozen));
    }

    #[test]
    fn test_ticker_nan_fields_serialize_as_null() {
        let mut ticker = Ticker::empty(stock("AAPL"));
        ticker.bid = 189.5;

        let json = serde_json::to_value(&ticker).unwrap();
        assert_eq!(json["bid"], serde_json::json!(189.5));
        assert!(json["ask"].is_null());

        let back: Ticker = serde_json::from_value(json).unwrap();
        assert_eq!(back.bid, 189.5);
        assert!(back.ask.is_nan());
    }

    #[test]
    fn test_ticker_missing_fields_are_nan() {
        let ticker: Ticker = serde_json::from_str(r#"{"contract":{"sec_type":"STK","symbol":"X"},"close":12.5}"#).unwrap();
        assert!(ticker.bid.is_nan());
        assert!(ticker.last_size.is_nan());
        assert_eq!(ticker.close, 12.5);
    }

    #[test]
    fn test_bar_data_to_bar() {
        let data = BarData {
            date: "20240621".to_string(),
            open: 101.5,
            high: 103.0,
            low: 100.25,
            close: 102.0,
            volume: 1200.0,
            average: 101.9,
            bar_count: 340,
        };
        let bar = data.to_bar().unwrap();
        assert_eq!(bar.timestamp.year(), 2024);
        assert_eq!(bar.low, dec!(100.25));
        assert_eq!(bar.average, Some(dec!(101.9)));
        assert_eq!(bar.bar_count, Some(340));

        let fx = BarData {
            volume: -1.0,
            average: -1.0,
            bar_count: -1,
            ..data
        };
        let bar = fx.to_bar().unwrap();
        assert_eq!(bar.volume, Decimal::ZERO);
        assert_eq!(bar.average, None);
        assert_eq!(bar.bar_count, None);
    }
}
