//! Ticker → quote normalization.

use quoteline_core::{Cash, Currency, Instrument, Quote};
use rust_decimal::Decimal;

use crate::contract::Ticker;

/// LSE tickers are quoted in pence (GBX) while everything else is in pounds.
const GBX_PER_GBP: Decimal = Decimal::ONE_HUNDRED;

/// Convert a ticker into a quote in the instrument's currency.
///
/// Bid, ask and last need a non-zero size; close does not. Non-finite or zero
/// prices are dropped rather than reported as zero.
pub fn quote_from_ticker(ticker: &Ticker, instrument: &Instrument) -> Quote {
    let currency = instrument.currency();
    Quote {
        bid: sized_price(ticker.bid, ticker.bid_size, currency),
        ask: sized_price(ticker.ask, ticker.ask_size, currency),
        last: sized_price(ticker.last, ticker.last_size, currency),
        close: price(ticker.close, currency),
    }
}

fn sized_price(value: f64, size: f64, currency: Currency) -> Option<Cash> {
    // NaN sizes are unknown, not empty.
    if size == 0.0 {
        return None;
    }
    price(value, currency)
}

fn price(value: f64, currency: Currency) -> Option<Cash> {
    if !value.is_finite() || value == 0.0 {
        return None;
    }
    let mut quantity = Decimal::try_from(value).ok()?;
    if currency == Currency::Gbp {
        quantity /= GBX_PER_GBP;
    }
    Some(Cash::new(currency, quantity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::contract_for;
    use rust_decimal_macros::dec;

    fn ticker_for(instrument: &Instrument) -> Ticker {
        Ticker::empty(contract_for(instrument))
    }

    fn stock(currency: Currency) -> Instrument {
        Instrument::stock("TEST", currency, None).unwrap()
    }

    #[test]
    fn test_gbp_prices_are_scaled_from_pence() {
        let vod = stock(Currency::Gbp);
        let mut ticker = ticker_for(&vod);
        ticker.bid = 150.0;
        ticker.bid_size = 10.0;
        ticker.ask = 151.0;
        ticker.ask_size = 5.0;
        ticker.last = 150.5;
        ticker.last_size = 100.0;
        ticker.close = 149.0;

        let quote = quote_from_ticker(&ticker, &vod);
        assert_eq!(quote.bid, Some(Cash::new(Currency::Gbp, dec!(1.50))));
        assert_eq!(quote.ask, Some(Cash::new(Currency::Gbp, dec!(1.51))));
        assert_eq!(quote.last, Some(Cash::new(Currency::Gbp, dec!(1.505))));
        assert_eq!(quote.close, Some(Cash::new(Currency::Gbp, dec!(1.49))));
    }

    #[test]
    fn test_other_currencies_are_not_scaled() {
        for currency in [Currency::Usd, Currency::Eur, Currency::Jpy] {
            let instrument = stock(currency);
            let mut ticker = ticker_for(&instrument);
            ticker.bid = 150.0;
            ticker.bid_size = 10.0;

            let quote = quote_from_ticker(&ticker, &instrument);
            assert_eq!(quote.bid, Some(Cash::new(currency, dec!(150.00))));
        }
    }

    #[test]
    fn test_missing_or_unsized_bid_is_absent() {
        for currency in [Currency::Usd, Currency::Gbp] {
            let instrument = stock(currency);

            let mut nan_bid = ticker_for(&instrument);
            nan_bid.bid_size = 10.0;
            assert_eq!(quote_from_ticker(&nan_bid, &instrument).bid, None);

            let mut zero_size = ticker_for(&instrument);
            zero_size.bid = 150.0;
            zero_size.bid_size = 0.0;
            assert_eq!(quote_from_ticker(&zero_size, &instrument).bid, None);

            let mut infinite = ticker_for(&instrument);
            infinite.ask = f64::INFINITY;
            infinite.ask_size = 1.0;
            assert_eq!(quote_from_ticker(&infinite, &instrument).ask, None);
        }
    }

    #[test]
    fn test_unknown_size_does_not_gate() {
        let instrument = stock(Currency::Usd);
        let mut ticker = ticker_for(&instrument);
        ticker.last = 42.0;

        assert!(ticker.last_size.is_nan());
        assert_eq!(
            quote_from_ticker(&ticker, &instrument).last,
            Some(Cash::new(Currency::Usd, dec!(42)))
        );
    }

    #[test]
    fn test_zero_price_is_absent() {
        let instrument = stock(Currency::Usd);
        let mut ticker = ticker_for(&instrument);
        ticker.bid = 0.0;
        ticker.bid_size = 10.0;
        ticker.close = 0.0;

        let quote = quote_from_ticker(&ticker, &instrument);
        assert_eq!(quote.bid, None);
        assert_eq!(quote.close, None);
    }

    #[test]
    fn test_close_is_never_size_gated() {
        let instrument = stock(Currency::Usd);
        let mut ticker = ticker_for(&instrument);
        ticker.close = 100.0;
        ticker.bid_size = 0.0;
        ticker.ask_size = 0.0;
        ticker.last_size = 0.0;

        let quote = quote_from_ticker(&ticker, &instrument);
        assert_eq!(quote.close, Some(Cash::new(Currency::Usd, dec!(100.00))));
        assert_eq!(quote.bid, None);
        assert_eq!(quote.last, None);
    }

    #[test]
    fn test_empty_ticker_gives_empty_quote() {
        let instrument = stock(Currency::Usd);
        assert!(quote_from_ticker(&ticker_for(&instrument), &instrument).is_empty());
    }
}
