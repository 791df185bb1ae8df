//! Instrument → contract translation.

use chrono::NaiveDate;
use quoteline_core::{Currency, Instrument, OptionInstrument};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::contract::{Contract, SecType};

/// Smart-routing venue marker.
pub const SMART: &str = "SMART";
/// IB's FX venue.
pub const IDEALPRO: &str = "IDEALPRO";

/// Build the contract for an instrument. Pure; touches no network.
pub fn contract_for(instrument: &Instrument) -> Contract {
    match instrument {
        Instrument::Stock {
            symbol,
            currency,
            exchange,
        } => stock_contract(symbol, *currency, exchange.as_deref()),
        Instrument::Bond {
            symbol,
            currency,
            exchange,
        } => Contract {
            symbol: symbol.clone(),
            exchange: venue_or(exchange.as_deref(), SMART),
            currency: currency.code().to_string(),
            ..Contract::new(SecType::Bond)
        },
        Instrument::Option(terms) => option_contract(terms, SecType::Option),
        Instrument::FutureOption(terms) => option_contract(terms, SecType::FuturesOption),
        Instrument::Future {
            symbol,
            currency,
            multiplier,
            expiration,
            exchange,
        } => Contract {
            symbol: symbol.clone(),
            // Futures need an explicit venue; no smart routing.
            exchange: venue_or(exchange.as_deref(), ""),
            currency: currency.code().to_string(),
            multiplier: multiplier_string(*multiplier),
            last_trade_date_or_contract_month: last_trade_date(*expiration),
            ..Contract::new(SecType::Future)
        },
        Instrument::Forex {
            base,
            quote,
            exchange,
        } => forex_contract(*base, *quote, exchange.as_deref()),
    }
}

fn stock_contract(symbol: &str, currency: Currency, exchange: Option<&str>) -> Contract {
    let exchange = match exchange {
        Some(venue) if !venue.is_empty() => format!("{}:{}", SMART, venue),
        _ => SMART.to_string(),
    };
    Contract {
        symbol: symbol.to_string(),
        exchange,
        currency: currency.code().to_string(),
        ..Contract::new(SecType::Stock)
    }
}

fn option_contract(terms: &OptionInstrument, sec_type: SecType) -> Contract {
    let default_exchange = match sec_type {
        SecType::FuturesOption => "",
        _ => SMART,
    };
    Contract {
        local_symbol: terms.symbol.clone(),
        exchange: venue_or(terms.exchange.as_deref(), default_exchange),
        currency: terms.currency.code().to_string(),
        last_trade_date_or_contract_month: last_trade_date(terms.expiration),
        right: terms.option_type.code().to_string(),
        strike: terms.strike.to_f64().unwrap_or_default(),
        multiplier: multiplier_string(terms.multiplier),
        ..Contract::new(sec_type)
    }
}

fn forex_contract(base: Currency, quote: Currency, exchange: Option<&str>) -> Contract {
    Contract {
        symbol: base.code().to_string(),
        exchange: venue_or(exchange, IDEALPRO),
        currency: quote.code().to_string(),
        ..Contract::new(SecType::Forex)
    }
}

/// The given venue, or `default` when it is unset or blank.
fn venue_or(exchange: Option<&str>, default: &str) -> String {
    exchange
        .filter(|venue| !venue.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// `YYYYMMDD`
pub fn last_trade_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Canonical multiplier text: `100`, `0.1`, `12.5`.
pub fn multiplier_string(multiplier: Decimal) -> String {
    multiplier.normalize().to_string()
}
