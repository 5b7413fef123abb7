use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::args::{Args, Command, ConvertArgs, RatesArgs, StatsArgs};
use crate::builder::{BuildSummary, RateTableBuilder};
use crate::config::Config;
use crate::ingest::{read_vacancies_csv, IngestSummary, NormalizedVacancyRecord, VacancyIngester};
use crate::normalizer::CurrencyNormalizer;
use crate::source::{DirectoryRateSource, ThreadPacer};
use crate::stats::{AggregateResult, StatisticsAggregator};
use crate::utils::{format_number, parse_month_arg};
use crate::{sqlite, RateTable};

pub fn run(args: &Args) -> Result<()> {
    let config = args.config();
    match &args.command {
        Command::Rates(rates) => {
            let summary = build_rates(rates, &config)?;
            println!(
                "Stored rates for {} months ({} without quotes) in {:?}",
                format_number(summary.months as i64),
                format_number(summary.failed_months as i64),
                rates.db
            );
        }
        Command::Convert(convert) => {
            let summary = convert_vacancies(convert, &config)?;
            println!(
                "Normalized {} of {} vacancies into {:?}",
                format_number(summary.normalized as i64),
                format_number(summary.total as i64),
                convert.out
            );
        }
        Command::Stats(stats) => {
            let result = compute_statistics(stats, &config)?;
            if stats.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_statistics(&result);
            }
        }
    }
    Ok(())
}

pub fn build_rates(args: &RatesArgs, config: &Config) -> Result<BuildSummary> {
    let start = parse_month_arg("--from", &args.from)?;
    let end = parse_month_arg("--to", &args.to)?;

    let source = Arc::new(DirectoryRateSource::new(&args.quotes, &config.supported_currencies)?);
    let builder = RateTableBuilder::new(source, &ThreadPacer, config);
    let (table, summary) = builder.build_with_summary(start, end);

    let mut conn = sqlite::open_database(&args.db)?;
    sqlite::save_rate_table(&mut conn, &table)
        .with_context(|| format!("Failed to store rate table in {:?}", args.db))?;
    Ok(summary)
}

fn load_normalizer(rates_db: &std::path::Path, config: &Config) -> Result<CurrencyNormalizer> {
    let conn = sqlite::open_database(rates_db)?;
    let table: RateTable = sqlite::load_rate_table(&conn)
        .with_context(|| format!("Failed to load rate table from {:?}", rates_db))?;
    Ok(CurrencyNormalizer::new(table, config.clone()))
}

pub fn convert_vacancies(args: &ConvertArgs, config: &Config) -> Result<IngestSummary> {
    let normalizer = load_normalizer(&args.rates, config)?;
    let file = read_vacancies_csv(&args.vacancies)?;
    let (records, summary) = VacancyIngester::new(&normalizer).ingest_with_summary(&file.records);

    let mut conn = sqlite::open_database(&args.out)?;
    sqlite::save_vacancies(&mut conn, &records)
        .with_context(|| format!("Failed to store vacancies in {:?}", args.out))?;
    Ok(summary)
}

fn load_records(args: &StatsArgs, config: &Config) -> Result<Vec<NormalizedVacancyRecord>> {
    match &args.rates {
        Some(rates_db) => {
            let normalizer = load_normalizer(rates_db, config)?;
            let file = read_vacancies_csv(&args.vacancies)?;
            Ok(VacancyIngester::new(&normalizer).ingest(&file.records))
        }
        None => sqlite::load_stored_vacancies(&args.vacancies),
    }
}

pub fn compute_statistics(args: &StatsArgs, config: &Config) -> Result<AggregateResult> {
    let total_start_time = Instant::now();
    info!(action = "start", component = "statistics", profession = %args.profession, "Starting statistics run");

    let records = load_records(args, config)?;
    let aggregator = StatisticsAggregator::new(config.clone())?;
    let result = aggregator.aggregate(&records, &args.profession);

    info!(
        action = "complete",
        component = "statistics",
        duration_ms = total_start_time.elapsed().as_millis(),
        "Statistics run completed"
    );
    Ok(result)
}

pub fn print_statistics(result: &AggregateResult) {
    if result.is_empty() {
        println!("No data");
        return;
    }

    println!(
        "\n--- Vacancy statistics: {} ({} vacancies) ---",
        result.profession,
        format_number(result.total_records as i64)
    );

    println!("\nSalary level by year:");
    for (year, salary) in &result.yearly_salary_mean {
        println!("- {}: {}", year, format_number(*salary));
    }

    println!("\nVacancies by year:");
    for (year, count) in &result.yearly_count {
        println!("- {}: {}", year, format_number(*count as i64));
    }

    println!("\nSalary level by year for {}:", result.profession);
    if result.profession_salary_mean.is_empty() {
        println!("- none");
    }
    for (year, salary) in &result.profession_salary_mean {
        println!("- {}: {}", year, format_number(*salary));
    }

    println!("\nVacancies by year for {}:", result.profession);
    if result.profession_count.is_empty() {
        println!("- none");
    }
    for (year, count) in &result.profession_count {
        println!("- {}: {}", year, format_number(*count as i64));
    }

    println!("\nTop {} areas by salary level:", result.area_salary_mean.len());
    for entry in &result.area_salary_mean {
        println!("- {}: {}", entry.area, format_number(entry.value));
    }

    println!("\nTop {} areas by vacancy share:", result.area_share.len());
    for entry in &result.area_share {
        println!("- {}: {:.2}%", entry.area, entry.value * 100.0);
    }
}
