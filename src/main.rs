use anyhow::Result;
use clap::Parser;
use tracing::error;
use vacancy_stats::{analysis, utils, Args};

fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(args.verbose);

    utils::validate_args(&args)?;

    if let Err(e) = analysis::run(&args) {
        error!(action = "error", component = "main", error = %e, "Run failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
