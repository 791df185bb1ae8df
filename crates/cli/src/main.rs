use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quoteline_brokers_ibkr::{
    contract_for, BridgeClient, IbClient, IbkrConfig, IbkrDataProvider, MarketDataType,
    SimulatedClient,
};
use quoteline_core::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "quoteline")]
#[command(about = "Map instruments to Interactive Brokers contracts and fetch quotes and history")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// TOML config file
    #[arg(short, long, env = "QUOTELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Serve data from a JSON fixture instead of connecting to the bridge
    #[arg(long)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the IB contracts for a file of instruments
    Contract {
        /// JSON file holding an instrument or an array of instruments
        file: PathBuf,
    },

    /// Fetch current quotes
    Quotes {
        /// JSON file holding an instrument or an array of instruments
        file: PathBuf,

        /// Market data type (live, frozen, delayed, delayed-frozen)
        #[arg(short, long)]
        data_type: Option<MarketDataType>,
    },

    /// Fetch ten years of daily bars for the first instrument in the file
    History {
        /// JSON file holding an instrument or an array of instruments
        file: PathBuf,

        /// Write CSV here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => IbkrConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => IbkrConfig::default(),
    };

    if let Commands::Contract { file } = &cli.command {
        return print_contracts(file);
    }

    match &cli.fixture {
        Some(path) => {
            let client = SimulatedClient::from_fixture(path)
                .with_context(|| format!("Failed to load fixture {}", path.display()))?;
            run(client, &config, cli.command).await
        }
        None => {
            let mut client = BridgeClient::new(config.bridge.clone());
            client.connect().await.context("Failed to connect to IB bridge")?;
            run(client, &config, cli.command).await
        }
    }
}

fn load_instruments(path: &Path) -> Result<Vec<Instrument>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let instruments = Instrument::list_from_json(&text)
        .with_context(|| format!("Invalid instruments in {}", path.display()))?;
    tracing::info!(count = instruments.len(), file = %path.display(), "Loaded instruments");
    Ok(instruments)
}

fn print_contracts(path: &Path) -> Result<()> {
    let contracts: Vec<_> = load_instruments(path)?.iter().map(contract_for).collect();
    println!("{}", serde_json::to_string_pretty(&contracts)?);
    Ok(())
}

async fn run<C: IbClient>(client: C, config: &IbkrConfig, command: Commands) -> Result<()> {
    let provider = IbkrDataProvider::new(client, config.market_data.initial_type()).await?;

    match command {
        Commands::Contract { file } => print_contracts(&file)?,
        Commands::Quotes { file, data_type } => {
            let instruments = load_instruments(&file)?;
            let quotes = provider.fetch_quotes_with_type(&instruments, data_type).await?;
            print_quotes(&quotes);
        }
        Commands::History { file, out } => {
            let instruments = load_instruments(&file)?;
            let instrument = instruments
                .first()
                .context("Instrument file is empty")?;
            let bars = provider.fetch_historical_data(instrument).await?;
            tracing::info!(%instrument, bars = bars.len(), "Fetched historical data");

            match out {
                Some(path) => {
                    quoteline_data::write_bars_to_csv(&path, &bars)?;
                    println!("Wrote {} bars to {}", bars.len(), path.display());
                }
                None => quoteline_data::write_bars(std::io::stdout().lock(), &bars)?,
            }
        }
    }

    Ok(())
}

fn print_quotes(quotes: &[(Instrument, Quote)]) {
    let cell = |price: &Option<Cash>| match price {
        Some(cash) => cash.quantity.to_string(),
        None => "-".to_string(),
    };

    println!(
        "{:<28} {:>4} {:>12} {:>12} {:>12} {:>12}",
        "INSTRUMENT", "CCY", "BID", "ASK", "LAST", "CLOSE"
    );
    for (instrument, quote) in quotes {
        println!(
            "{:<28} {:>4} {:>12} {:>12} {:>12} {:>12}",
            instrument.to_string(),
            instrument.currency().code(),
            cell(&quote.bid),
            cell(&quote.ask),
            cell(&quote.last),
            cell(&quote.close),
        );
    }
}
