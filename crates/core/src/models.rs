use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Mul, Neg};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

/// Errors raised while constructing or combining domain values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid instrument: {0}")]
    InvalidInstrument(String),
    #[error("Unexpected type of instrument: {0}")]
    UnrecognizedInstrument(String),
    #[error("Currency mismatch: {0} vs {1}")]
    CurrencyMismatch(Currency, Currency),
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

// ---------------------------------------------------------------------------
// Currency & Cash
// ---------------------------------------------------------------------------

/// Currencies an instrument can be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Gbp,
    Eur,
    Jpy,
    Aud,
    Cad,
    Chf,
    Cnh,
    Dkk,
    Hkd,
    Nok,
    Nzd,
    Sek,
    Sgd,
    Zar,
}

impl Currency {
    pub const ALL: [Currency; 15] = [
        Currency::Usd,
        Currency::Gbp,
        Currency::Eur,
        Currency::Jpy,
        Currency::Aud,
        Currency::Cad,
        Currency::Chf,
        Currency::Cnh,
        Currency::Dkk,
        Currency::Hkd,
        Currency::Nok,
        Currency::Nzd,
        Currency::Sek,
        Currency::Sgd,
        Currency::Zar,
    ];

    /// ISO code, as sent to brokers.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
            Currency::Jpy => "JPY",
            Currency::Aud => "AUD",
            Currency::Cad => "CAD",
            Currency::Chf => "CHF",
            Currency::Cnh => "CNH",
            Currency::Dkk => "DKK",
            Currency::Hkd => "HKD",
            Currency::Nok => "NOK",
            Currency::Nzd => "NZD",
            Currency::Sek => "SEK",
            Currency::Sgd => "SGD",
            Currency::Zar => "ZAR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Currency::ALL
            .iter()
            .find(|c| c.code().eq_ignore_ascii_case(code))
            .copied()
            .ok_or_else(|| ModelError::UnknownCurrency(s.to_string()))
    }
}

/// A monetary amount in a specific currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cash {
    pub currency: Currency,
    pub quantity: Decimal,
}

impl Cash {
    /// Decimal places kept for cash quantities.
    pub const PRECISION: u32 = 4;

    pub fn new(currency: Currency, quantity: Decimal) -> Self {
        Self {
            currency,
            quantity: Self::quantize(quantity),
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(currency, Decimal::ZERO)
    }

    /// Round a quantity to cash precision (banker's rounding).
    pub fn quantize(quantity: Decimal) -> Decimal {
        quantity.round_dp(Self::PRECISION)
    }

    pub fn checked_add(&self, other: &Cash) -> Result<Cash, ModelError> {
        self.require_same_currency(other)?;
        Ok(Cash::new(self.currency, self.quantity + other.quantity))
    }

    pub fn checked_sub(&self, other: &Cash) -> Result<Cash, ModelError> {
        self.require_same_currency(other)?;
        Ok(Cash::new(self.currency, self.quantity - other.quantity))
    }

    fn require_same_currency(&self, other: &Cash) -> Result<(), ModelError> {
        if self.currency != other.currency {
            return Err(ModelError::CurrencyMismatch(self.currency, other.currency));
        }
        Ok(())
    }
}

impl Neg for Cash {
    type Output = Cash;

    fn neg(self) -> Cash {
        Cash::new(self.currency, -self.quantity)
    }
}

impl Mul<Decimal> for Cash {
    type Output = Cash;

    fn mul(self, rhs: Decimal) -> Cash {
        Cash::new(self.currency, self.quantity * rhs)
    }
}

impl fmt::Display for Cash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.quantity)
    }
}

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// Put or call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Put,
    Call,
}

impl OptionType {
    /// Single-letter right code.
    pub fn code(&self) -> &'static str {
        match self {
            OptionType::Put => "P",
            OptionType::Call => "C",
        }
    }
}

fn default_option_multiplier() -> Decimal {
    Decimal::ONE_HUNDRED
}

/// Terms shared by equity options and options on futures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionInstrument {
    /// Contract symbol. Equity options default to OCC symbology when empty.
    #[serde(default)]
    pub symbol: String,
    pub underlying: String,
    pub option_type: OptionType,
    pub expiration: NaiveDate,
    pub strike: Decimal,
    pub currency: Currency,
    #[serde(default = "default_option_multiplier")]
    pub multiplier: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
}

impl OptionInstrument {
    pub fn new(
        underlying: impl Into<String>,
        option_type: OptionType,
        expiration: NaiveDate,
        strike: Decimal,
        currency: Currency,
    ) -> Self {
        Self {
            symbol: String::new(),
            underlying: underlying.into(),
            option_type,
            expiration,
            strike,
            currency,
            multiplier: default_option_multiplier(),
            exchange: None,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// OCC option symbol, e.g. `AAPL  240621C00150000`.
    pub fn occ_symbol(&self) -> String {
        let strike = (self.strike * Decimal::ONE_THOUSAND)
            .trunc()
            .to_u64()
            .unwrap_or_default();
        format!(
            "{:<6}{}{}{:08}",
            self.underlying,
            self.expiration.format("%y%m%d"),
            self.option_type.code(),
            strike
        )
    }

    fn quantized(mut self) -> Self {
        self.strike = self.strike.round_dp(Instrument::STRIKE_PRECISION);
        self.multiplier = self.multiplier.round_dp(Instrument::MULTIPLIER_PRECISION);
        self.exchange = venue(self.exchange);
        self
    }

    fn validate(&self) -> Result<(), ModelError> {
        require_symbol("symbol", &self.symbol)?;
        require_symbol("underlying", &self.underlying)?;
        require_positive("strike", self.strike)?;
        require_positive("multiplier", self.multiplier)
    }
}

/// A tradeable instrument.
///
/// The variant set is closed: anything a broker adapter must translate is
/// listed here, and adapters match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instrument {
    Stock {
        symbol: String,
        currency: Currency,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange: Option<String>,
    },
    Bond {
        symbol: String,
        currency: Currency,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange: Option<String>,
    },
    Option(OptionInstrument),
    FutureOption(OptionInstrument),
    Future {
        symbol: String,
        currency: Currency,
        multiplier: Decimal,
        expiration: NaiveDate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange: Option<String>,
    },
    Forex {
        base: Currency,
        quote: Currency,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange: Option<String>,
    },
}

impl Instrument {
    /// Serialized `kind` tags, one per variant.
    pub const KINDS: [&'static str; 6] = [
        "stock",
        "bond",
        "option",
        "future_option",
        "future",
        "forex",
    ];

    pub const STRIKE_PRECISION: u32 = 4;
    pub const MULTIPLIER_PRECISION: u32 = 1;

    pub fn stock(
        symbol: impl Into<String>,
        currency: Currency,
        exchange: Option<String>,
    ) -> Result<Self, ModelError> {
        Self::checked(Instrument::Stock {
            symbol: symbol.into(),
            currency,
            exchange,
        })
    }

    pub fn bond(
        symbol: impl Into<String>,
        currency: Currency,
        exchange: Option<String>,
    ) -> Result<Self, ModelError> {
        Self::checked(Instrument::Bond {
            symbol: symbol.into(),
            currency,
            exchange,
        })
    }

    /// An equity option. Without an explicit symbol, the OCC symbol is used.
    pub fn option(terms: OptionInstrument) -> Result<Self, ModelError> {
        Self::checked(Instrument::Option(terms))
    }

    /// An option on a future. The symbol is mandatory.
    pub fn future_option(terms: OptionInstrument) -> Result<Self, ModelError> {
        Self::checked(Instrument::FutureOption(terms))
    }

    pub fn future(
        symbol: impl Into<String>,
        currency: Currency,
        multiplier: Decimal,
        expiration: NaiveDate,
        exchange: Option<String>,
    ) -> Result<Self, ModelError> {
        Self::checked(Instrument::Future {
            symbol: symbol.into(),
            currency,
            multiplier,
            expiration,
            exchange,
        })
    }

    pub fn forex(
        base: Currency,
        quote: Currency,
        exchange: Option<String>,
    ) -> Result<Self, ModelError> {
        Self::checked(Instrument::Forex {
            base,
            quote,
            exchange,
        })
    }

    /// Parse a single instrument from JSON tagged by `kind`.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ModelError::InvalidInstrument(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse either a JSON array of instruments or a single instrument.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>, ModelError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ModelError::InvalidInstrument(e.to_string()))?;
        match value {
            serde_json::Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            other => Ok(vec![Self::from_value(other)?]),
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ModelError> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .map(str::to_owned)
            .ok_or_else(|| ModelError::UnrecognizedInstrument(value.to_string()))?;
        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(ModelError::UnrecognizedInstrument(kind));
        }

        let instrument: Instrument = serde_json::from_value(value)
            .map_err(|e| ModelError::InvalidInstrument(format!("{}: {}", kind, e)))?;
        Self::checked(instrument)
    }

    /// Serialized `kind` tag of this instrument.
    pub fn kind(&self) -> &'static str {
        match self {
            Instrument::Stock { .. } => "stock",
            Instrument::Bond { .. } => "bond",
            Instrument::Option(_) => "option",
            Instrument::FutureOption(_) => "future_option",
            Instrument::Future { .. } => "future",
            Instrument::Forex { .. } => "forex",
        }
    }

    pub fn symbol(&self) -> String {
        match self {
            Instrument::Stock { symbol, .. }
            | Instrument::Bond { symbol, .. }
            | Instrument::Future { symbol, .. } => symbol.clone(),
            Instrument::Option(terms) | Instrument::FutureOption(terms) => terms.symbol.clone(),
            Instrument::Forex { base, quote, .. } => format!("{}{}", base, quote),
        }
    }

    /// Currency prices are quoted in. For forex pairs, the quote currency.
    pub fn currency(&self) -> Currency {
        match self {
            Instrument::Stock { currency, .. }
            | Instrument::Bond { currency, .. }
            | Instrument::Future { currency, .. } => *currency,
            Instrument::Option(terms) | Instrument::FutureOption(terms) => terms.currency,
            Instrument::Forex { quote, .. } => *quote,
        }
    }

    pub fn exchange(&self) -> Option<&str> {
        match self {
            Instrument::Stock { exchange, .. }
            | Instrument::Bond { exchange, .. }
            | Instrument::Future { exchange, .. }
            | Instrument::Forex { exchange, .. } => exchange.as_deref(),
            Instrument::Option(terms) | Instrument::FutureOption(terms) => terms.exchange.as_deref(),
        }
    }

    pub fn multiplier(&self) -> Decimal {
        match self {
            Instrument::Option(terms) | Instrument::FutureOption(terms) => terms.multiplier,
            Instrument::Future { multiplier, .. } => *multiplier,
            _ => Decimal::ONE,
        }
    }

    pub fn expiration(&self) -> Option<NaiveDate> {
        match self {
            Instrument::Option(terms) | Instrument::FutureOption(terms) => Some(terms.expiration),
            Instrument::Future { expiration, .. } => Some(*expiration),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Instrument::Stock { symbol, .. } | Instrument::Bond { symbol, .. } => {
                require_symbol("symbol", symbol)
            }
            Instrument::Option(terms) | Instrument::FutureOption(terms) => terms.validate(),
            Instrument::Future {
                symbol, multiplier, ..
            } => {
                require_symbol("symbol", symbol)?;
                require_positive("multiplier", *multiplier)
            }
            Instrument::Forex { base, quote, .. } => {
                if base == quote {
                    return Err(ModelError::InvalidInstrument(format!(
                        "forex pair needs two distinct currencies, got {}{}",
                        base, quote
                    )));
                }
                Ok(())
            }
        }
    }

    fn checked(instrument: Instrument) -> Result<Self, ModelError> {
        let instrument = instrument.normalized();
        instrument.validate()?;
        Ok(instrument)
    }

    fn normalized(self) -> Self {
        match self {
            Instrument::Stock {
                symbol,
                currency,
                exchange,
            } => Instrument::Stock {
                symbol,
                currency,
                exchange: venue(exchange),
            },
            Instrument::Bond {
                symbol,
                currency,
                exchange,
            } => Instrument::Bond {
                symbol,
                currency,
                exchange: venue(exchange),
            },
            Instrument::Option(terms) => {
                let mut terms = terms.quantized();
                if terms.symbol.trim().is_empty() {
                    terms.symbol = terms.occ_symbol();
                }
                Instrument::Option(terms)
            }
            Instrument::FutureOption(terms) => Instrument::FutureOption(terms.quantized()),
            Instrument::Future {
                symbol,
                currency,
                multiplier,
                expiration,
                exchange,
            } => Instrument::Future {
                symbol,
                currency,
                multiplier: multiplier.round_dp(Self::MULTIPLIER_PRECISION),
                expiration,
                exchange: venue(exchange),
            },
            Instrument::Forex {
                base,
                quote,
                exchange,
            } => Instrument::Forex {
                base,
                quote,
                exchange: venue(exchange),
            },
        }
    }
}

/// Blank exchanges mean "unset".
fn venue(exchange: Option<String>) -> Option<String> {
    exchange.filter(|ex| !ex.trim().is_empty())
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.symbol())
    }
}

fn require_symbol(field: &str, value: &str) -> Result<(), ModelError> {
    if value.trim().is_empty() {
        return Err(ModelError::InvalidInstrument(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn require_positive(field: &str, value: Decimal) -> Result<(), ModelError> {
    if value <= Decimal::ZERO {
        return Err(ModelError::InvalidInstrument(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// Best-known prices for an instrument. Any side may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Option<Cash>,
    pub ask: Option<Cash>,
    pub last: Option<Cash>,
    pub close: Option<Cash>,
}

impl Quote {
    pub fn is_empty(&self) -> bool {
        self.bid.is_none() && self.ask.is_none() && self.last.is_none() && self.close.is_none()
    }

    /// Average of bid and ask, when both are present in the same currency.
    pub fn midpoint(&self) -> Option<Cash> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid.currency == ask.currency => Some(Cash::new(
                bid.currency,
                (bid.quantity + ask.quantity) / Decimal::TWO,
            )),
            _ => None,
        }
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Volume-weighted average price, when the source reports one.
    #[serde(default)]
    pub average: Option<Decimal>,
    #[serde(default)]
    pub bar_count: Option<u64>,
}
