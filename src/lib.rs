pub mod analysis;
pub mod args;
pub mod builder;
pub mod config;
pub mod error;
pub mod ingest;
pub mod normalizer;
pub mod rates;
pub mod source;
pub mod sqlite;
pub mod stats;
pub mod utils;

pub use args::Args;
pub use builder::RateTableBuilder;
pub use config::{Config, FetchPolicy};
pub use ingest::{NormalizedVacancyRecord, RawVacancyRecord, VacancyIngester};
pub use normalizer::CurrencyNormalizer;
pub use rates::{RateTable, YearMonth};
pub use source::{DirectoryRateSource, Pacer, RateSource, StaticRateSource, ThreadPacer};
pub use stats::{AggregateResult, StatisticsAggregator};
