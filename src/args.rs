use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, FetchPolicy, DEFAULT_SHARE_THRESHOLD, DEFAULT_TOP_N};

#[derive(Parser, Debug)]
#[command(
    name = "vacancy-stats",
    about = "Normalize vacancy salaries into one currency and compute labor-market statistics",
    version,
    long_about = None
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Number of worker threads
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a monthly rate table from saved quote documents
    Rates(RatesArgs),
    /// Normalize raw vacancies into the reference currency
    Convert(ConvertArgs),
    /// Compute salary and vacancy statistics
    Stats(StatsArgs),
}

#[derive(ClapArgs, Debug)]
pub struct RatesArgs {
    /// Directory holding one YYYY-MM.xml quote document per month
    #[arg(short, long)]
    pub quotes: PathBuf,

    /// First month, YYYY-MM
    #[arg(long)]
    pub from: String,

    /// Last month, YYYY-MM (the table always runs through December of this year)
    #[arg(long)]
    pub to: String,

    /// Output SQLite database
    #[arg(long, default_value = "currencies.sqlite")]
    pub db: PathBuf,

    /// Pause between quote requests in milliseconds
    #[arg(long, default_value_t = 50)]
    pub delay_ms: u64,

    /// Per-request budget in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Retries for a failed month before recording it as unknown
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Delay before the first retry in milliseconds, doubled per retry
    #[arg(long, default_value_t = 500)]
    pub backoff_ms: u64,
}

#[derive(ClapArgs, Debug)]
pub struct ConvertArgs {
    /// Raw vacancies CSV
    #[arg(long)]
    pub vacancies: PathBuf,

    /// Rate table database built by `rates`
    #[arg(long)]
    pub rates: PathBuf,

    /// Output SQLite database for normalized vacancies
    #[arg(short, long, default_value = "vacancies.sqlite")]
    pub out: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct StatsArgs {
    /// Normalized vacancy database, or a raw CSV when --rates is given
    #[arg(long)]
    pub vacancies: PathBuf,

    /// Profession keyword (case-sensitive substring of the vacancy name)
    #[arg(short, long)]
    pub profession: String,

    /// Rate table database; normalizes a raw CSV in memory
    #[arg(long)]
    pub rates: Option<PathBuf>,

    /// Number of top areas to display
    #[arg(short, long, default_value_t = DEFAULT_TOP_N)]
    pub top: usize,

    /// Minimum share of all vacancies an area needs to be ranked
    #[arg(long, default_value_t = DEFAULT_SHARE_THRESHOLD)]
    pub threshold: f64,

    /// Print the statistics as JSON
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Run configuration with command-line overrides applied.
    pub fn config(&self) -> Config {
        let mut config = Config {
            workers: self.workers,
            ..Config::default()
        };

        match &self.command {
            Command::Rates(rates) => {
                config.fetch = FetchPolicy {
                    min_interval: Duration::from_millis(rates.delay_ms),
                    timeout: Duration::from_millis(rates.timeout_ms),
                    max_retries: rates.retries,
                    backoff: Duration::from_millis(rates.backoff_ms),
                };
            }
            Command::Stats(stats) => {
                config.top_n = stats.top;
                config.share_threshold = stats.threshold;
            }
            Command::Convert(_) => {}
        }
        config
    }
}
