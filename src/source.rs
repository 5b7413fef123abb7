use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::RateSourceError;
use crate::rates::YearMonth;

/// Per-unit rates quoted for one month, keyed by currency code.
pub type MonthlyQuotes = HashMap<String, f64>;

/// Anything that can answer "what were the rates in this month".
///
/// Codes missing from a successful answer are treated as unquoted. Calls may
/// run on a worker thread, hence `Send + Sync`.
pub trait RateSource: Send + Sync {
    fn fetch(&self, at: YearMonth) -> std::result::Result<MonthlyQuotes, RateSourceError>;
}

/// Blocks the fetch loop between calls. Injected so tests never sleep.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

/// Real pacing via `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Fixed quotes held in memory. Months without an entry are unavailable.
#[derive(Debug, Default, Clone)]
pub struct StaticRateSource {
    quotes: BTreeMap<YearMonth, MonthlyQuotes>,
}

impl StaticRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_month(mut self, at: YearMonth, quotes: &[(&str, f64)]) -> Self {
        self.quotes.insert(
            at,
            quotes
                .iter()
                .map(|(code, rate)| (code.to_string(), *rate))
                .collect(),
        );
        self
    }
}

impl RateSource for StaticRateSource {
    fn fetch(&self, at: YearMonth) -> std::result::Result<MonthlyQuotes, RateSourceError> {
        self.quotes
            .get(&at)
            .cloned()
            .ok_or_else(|| RateSourceError::Unavailable {
                year: at.year,
                month: at.month,
                reason: "no fixture for month".to_string(),
            })
    }
}

/// Reads saved central-bank daily quote documents, one `YYYY-MM.xml` per month.
///
/// Each document is the `ValCurs` answer for the first day of the month:
/// `Valute` elements carrying `CharCode`, `Nominal` and a decimal-comma
/// `Value`. Only the configured codes are kept.
#[derive(Debug)]
pub struct DirectoryRateSource {
    dir: PathBuf,
    codes: Vec<String>,
    root: Regex,
    valute: Regex,
    char_code: Regex,
    nominal: Regex,
    value: Regex,
}

impl DirectoryRateSource {
    pub fn new(dir: &Path, codes: &[String]) -> Result<Self> {
        let field = |name: &str| {
            Regex::new(&format!(r"<{name}>\s*([^<]*?)\s*</{name}>"))
                .with_context(|| format!("Failed to compile {name} pattern"))
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            codes: codes.to_vec(),
            root: Regex::new(r"<ValCurs\b").context("Failed to compile root pattern")?,
            valute: Regex::new(r"(?s)<Valute\b[^>]*>(.*?)</Valute>")
                .context("Failed to compile Valute pattern")?,
            char_code: field("CharCode")?,
            nominal: field("Nominal")?,
            value: field("Value")?,
        })
    }

    pub fn path_for(&self, at: YearMonth) -> PathBuf {
        self.dir.join(format!("{at}.xml"))
    }

    /// Extracts per-unit rates from one quote document.
    pub fn parse_document(
        &self,
        document: &str,
        at: YearMonth,
    ) -> std::result::Result<MonthlyQuotes, RateSourceError> {
        let malformed = |reason: String| RateSourceError::Malformed {
            year: at.year,
            month: at.month,
            reason,
        };

        if !self.root.is_match(document) {
            return Err(malformed("missing ValCurs root".to_string()));
        }

        let mut quotes = MonthlyQuotes::new();
        for block in self.valute.captures_iter(document) {
            let body = &block[1];
            let Some(code) = self.char_code.captures(body).map(|c| c[1].to_string()) else {
                continue;
            };
            if !self.codes.contains(&code) {
                continue;
            }

            let number = |re: &Regex, field: &str| -> std::result::Result<f64, RateSourceError> {
                let raw = re
                    .captures(body)
                    .map(|c| c[1].replace(',', "."))
                    .ok_or_else(|| malformed(format!("{code} has no {field}")))?;
                raw.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite() && *n > 0.0)
                    .ok_or_else(|| malformed(format!("{code} has invalid {field} {raw:?}")))
            };

            let nominal = number(&self.nominal, "Nominal")?;
            let value = number(&self.value, "Value")?;
            quotes.insert(code, round_rate(value / nominal));
        }

        Ok(quotes)
    }
}

impl RateSource for DirectoryRateSource {
    fn fetch(&self, at: YearMonth) -> std::result::Result<MonthlyQuotes, RateSourceError> {
        let path = self.path_for(at);
        debug!(action = "read", component = "quote_directory", path = ?path, "Reading quote document");

        let bytes = fs::read(&path).map_err(|e| RateSourceError::Unavailable {
            year: at.year,
            month: at.month,
            reason: if e.kind() == ErrorKind::NotFound {
                format!("{} not found", path.display())
            } else {
                e.to_string()
            },
        })?;

        // Documents are windows-1251; every field read here is ASCII.
        let document = String::from_utf8_lossy(&bytes);
        self.parse_document(&document, at)
    }
}

/// Rounds a per-unit rate to 8 decimal places.
pub fn round_rate(rate: f64) -> f64 {
    (rate * 1e8).round() / 1e8
}
