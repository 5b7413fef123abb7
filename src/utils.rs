use anyhow::Result;
use time::macros::format_description;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Command};
use crate::rates::YearMonth;

pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let timer = LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(timer)
        .with_writer(std::io::stderr)
        .init();
}

pub fn format_number(num: i64) -> String {
    let grouped = num
        .unsigned_abs()
        .to_string()
        .as_bytes()
        .rchunks(3)
        .rev()
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(",");
    if num < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

pub fn parse_month_arg(flag: &str, value: &str) -> Result<YearMonth> {
    YearMonth::parse(value)
        .ok_or_else(|| anyhow::anyhow!("{} must look like YYYY-MM, got {:?}", flag, value))
}

pub fn validate_args(args: &Args) -> Result<()> {
    if let Some(workers) = args.workers {
        if workers == 0 {
            anyhow::bail!("--workers must be greater than 0");
        }
    }

    match &args.command {
        Command::Rates(rates) => {
            let from = parse_month_arg("--from", &rates.from)?;
            let to = parse_month_arg("--to", &rates.to)?;
            if to.year < from.year {
                anyhow::bail!("--to must not be in an earlier year than --from");
            }
        }
        Command::Stats(stats) => {
            if stats.top == 0 {
                anyhow::bail!("--top must be greater than 0");
            }
            if !(0.0..=1.0).contains(&stats.threshold) {
                anyhow::bail!("--threshold must be between 0 and 1");
            }
            if stats.profession.trim().is_empty() {
                anyhow::bail!("--profession must not be empty");
            }
        }
        Command::Convert(_) => {}
    }

    Ok(())
}
