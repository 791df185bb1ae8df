use quoteline_core::{Bar, DataError};
use rust_decimal::Decimal;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::timestamp::parse_timestamp;

/// Load OHLCV bars from a CSV file.
///
/// Expected columns (case-insensitive, flexible ordering):
/// `timestamp` (or `date`, `datetime`), `open`, `high`, `low`, `close`, and
/// optionally `volume`, `average`, `bar_count`.
pub fn load_bars_from_csv(path: &Path) -> Result<Vec<Bar>, DataError> {
    let file = std::fs::File::open(path)?;
    let bars = read_bars(file)?;
    debug!(path = %path.display(), bars = bars.len(), "Loaded bars from CSV");
    Ok(bars)
}

/// Read bars from any CSV source, sorted by timestamp.
pub fn read_bars<R: Read>(source: R) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let col_map = resolve_bar_columns(&headers)?;

    let mut bars = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;

        let field = |idx: usize, name: &'static str| column(&record, idx, name);

        let volume = match col_map.volume {
            Some(idx) => parse_decimal(field(idx, "volume")?, "volume")?,
            None => Decimal::ZERO,
        };
        let average = match col_map.average {
            Some(idx) => match field(idx, "average")? {
                "" => None,
                text => Some(parse_decimal(text, "average")?),
            },
            None => None,
        };
        let bar_count = match col_map.bar_count {
            Some(idx) => match field(idx, "bar_count")? {
                "" => None,
                text => Some(text.parse::<u64>().map_err(|e| {
                    DataError::ParseError(format!("Failed to parse bar_count '{}': {}", text, e))
                })?),
            },
            None => None,
        };

        bars.push(Bar {
            timestamp: parse_timestamp(field(col_map.timestamp, "timestamp")?)?,
            open: parse_decimal(field(col_map.open, "open")?, "open")?,
            high: parse_decimal(field(col_map.high, "high")?, "high")?,
            low: parse_decimal(field(col_map.low, "low")?, "low")?,
            close: parse_decimal(field(col_map.close, "close")?, "close")?,
            volume,
            average,
            bar_count,
        });
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Write bars to a CSV file, replacing it if it exists.
pub fn write_bars_to_csv(path: &Path, bars: &[Bar]) -> Result<(), DataError> {
    let file = std::fs::File::create(path)?;
    write_bars(file, bars)?;
    debug!(path = %path.display(), bars = bars.len(), "Wrote bars to CSV");
    Ok(())
}

/// Write bars as CSV with the header
/// `timestamp,open,high,low,close,volume,average,bar_count`.
pub fn write_bars<W: Write>(sink: W, bars: &[Bar]) -> Result<(), DataError> {
    let mut writer = csv::Writer::from_writer(sink);
    for bar in bars {
        writer.serialize(bar).map_err(std::io::Error::from)?;
    }
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct BarColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
    average: Option<usize>,
    bar_count: Option<usize>,
}

fn resolve_bar_columns(headers: &csv::StringRecord) -> Result<BarColumnMap, DataError> {
    let ts = find_column(headers, &["timestamp", "date", "datetime", "time"])
        .ok_or_else(|| DataError::ParseError("No timestamp column found".into()))?;
    let open = find_column(headers, &["open", "o"])
        .ok_or_else(|| DataError::ParseError("No open column found".into()))?;
    let high = find_column(headers, &["high", "h"])
        .ok_or_else(|| DataError::ParseError("No high column found".into()))?;
    let low = find_column(headers, &["low", "l"])
        .ok_or_else(|| DataError::ParseError("No low column found".into()))?;
    let close = find_column(headers, &["close", "c"])
        .ok_or_else(|| DataError::ParseError("No close column found".into()))?;

    Ok(BarColumnMap {
        timestamp: ts,
        open,
        high,
        low,
        close,
        volume: find_column(headers, &["volume", "vol", "v"]),
        average: find_column(headers, &["average", "wap", "vwap"]),
        bar_count: find_column(headers, &["bar_count", "barcount", "count"]),
    })
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|header| names.contains(&header.trim().to_lowercase().as_str()))
}

/// A field of a row, which may be shorter than the header.
fn column<'r>(record: &'r csv::StringRecord, idx: usize, name: &str) -> Result<&'r str, DataError> {
    record.get(idx).ok_or_else(|| {
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        DataError::ParseError(format!("Row {} has no {} column", line, name))
    })
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, DataError> {
    Decimal::from_str(s.trim())
        .map_err(|e| DataError::ParseError(format!("Failed to parse {} '{}': {}", field, s, e)))
}
