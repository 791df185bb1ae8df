//! Tabular bar I/O for historical price series.

pub mod bar_csv;
pub mod timestamp;

pub use bar_csv::{load_bars_from_csv, read_bars, write_bars, write_bars_to_csv};
pub use timestamp::parse_timestamp;
