use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::RecordError;
use crate::normalizer::CurrencyNormalizer;

pub const PUBLISHED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// A vacancy as read from the source file, before any conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVacancyRecord {
    pub name: String,
    pub salary_from: Option<f64>,
    pub salary_to: Option<f64>,
    pub currency: Option<String>,
    pub area: String,
    pub published_at: DateTime<FixedOffset>,
}

impl RawVacancyRecord {
    /// Single salary figure in the quoted currency.
    ///
    /// Mean of both bounds, or whichever bound is present. `None` when there
    /// is no bound or no currency.
    pub fn salary(&self) -> Option<f64> {
        self.currency.as_ref()?;
        match (self.salary_from, self.salary_to) {
            (Some(from), Some(to)) => Some((from + to) / 2.0),
            (Some(bound), None) | (None, Some(bound)) => Some(bound),
            (None, None) => None,
        }
    }
}

/// A vacancy with its salary expressed in the reference currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedVacancyRecord {
    pub name: String,
    pub salary_rub: Option<i64>,
    pub area: String,
    pub year: i32,
}

/// One CSV row exactly as written; every cell is text.
#[derive(Debug, Deserialize)]
struct CsvRow {
    name: Option<String>,
    salary_from: Option<String>,
    salary_to: Option<String>,
    salary_currency: Option<String>,
    area_name: Option<String>,
    published_at: Option<String>,
}

impl CsvRow {
    fn into_record(self) -> std::result::Result<RawVacancyRecord, RecordError> {
        let published_raw = non_empty(self.published_at).ok_or(RecordError::MissingField("published_at"))?;
        let published_at = DateTime::parse_from_str(&published_raw, PUBLISHED_AT_FORMAT)
            .map_err(|_| RecordError::InvalidDate(published_raw.clone()))?;

        Ok(RawVacancyRecord {
            name: non_empty(self.name).unwrap_or_default(),
            salary_from: parse_amount("salary_from", self.salary_from)?,
            salary_to: parse_amount("salary_to", self.salary_to)?,
            currency: non_empty(self.salary_currency),
            area: non_empty(self.area_name).unwrap_or_default(),
            published_at,
        })
    }
}

fn non_empty(cell: Option<String>) -> Option<String> {
    cell.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_amount(field: &'static str, cell: Option<String>) -> std::result::Result<Option<f64>, RecordError> {
    let Some(raw) = non_empty(cell) else {
        return Ok(None);
    };
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(Some)
        .ok_or(RecordError::InvalidNumber { field, value: raw })
}

/// Raw records read from a file plus the number of rows that could not be parsed.
#[derive(Debug, Default)]
pub struct VacancyFile {
    pub records: Vec<RawVacancyRecord>,
    pub malformed: usize,
}

/// Reads raw vacancies from a header-led CSV file.
///
/// A completely empty file yields no records. Rows with malformed fields are
/// dropped and counted.
pub fn read_vacancies_csv(path: &Path) -> Result<VacancyFile> {
    let file = File::open(path).with_context(|| format!("Failed to open vacancies file {:?}", path))?;
    read_vacancies(file).with_context(|| format!("Failed to read vacancies from {:?}", path))
}

pub fn read_vacancies<R: Read>(reader: R) -> Result<VacancyFile> {
    let start_time = Instant::now();
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let mut out = VacancyFile::default();
    if rdr.headers()?.is_empty() {
        info!(action = "complete", component = "vacancy_reader", "Vacancy file is empty");
        return Ok(out);
    }

    for (line, row) in rdr.deserialize::<CsvRow>().enumerate() {
        let parsed = row
            .map_err(|e| e.to_string())
            .and_then(|row| row.into_record().map_err(|e| e.to_string()));
        match parsed {
            Ok(record) => out.records.push(record),
            Err(error) => {
                debug!(action = "drop", component = "vacancy_reader", row = line + 2, error = %error, "Dropping malformed row");
                out.malformed += 1;
            }
        }
    }

    info!(
        action = "complete",
        component = "vacancy_reader",
        records = out.records.len(),
        malformed = out.malformed,
        duration_ms = start_time.elapsed().as_millis(),
        "Vacancy file read"
    );
    Ok(out)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub total: usize,
    pub normalized: usize,
    /// No salary bound or no currency.
    pub no_salary: usize,
    /// Unsupported currency or no known rate for the month.
    pub unresolved_currency: usize,
}

/// Turns raw vacancies into normalized ones, dropping any without a resolvable salary.
pub struct VacancyIngester<'a> {
    normalizer: &'a CurrencyNormalizer,
}

impl<'a> VacancyIngester<'a> {
    pub fn new(normalizer: &'a CurrencyNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalize(&self, record: &RawVacancyRecord) -> Option<NormalizedVacancyRecord> {
        let salary = record.salary()?;
        let currency = record.currency.as_deref()?;
        let published = record.published_at;
        let salary_rub = self
            .normalizer
            .convert(salary, currency, published.year(), published.month())?;

        Some(NormalizedVacancyRecord {
            name: record.name.clone(),
            salary_rub: Some(salary_rub),
            area: record.area.clone(),
            year: published.year(),
        })
    }

    pub fn ingest(&self, records: &[RawVacancyRecord]) -> Vec<NormalizedVacancyRecord> {
        self.ingest_with_summary(records).0
    }

    pub fn ingest_with_summary(
        &self,
        records: &[RawVacancyRecord],
    ) -> (Vec<NormalizedVacancyRecord>, IngestSummary) {
        let start_time = Instant::now();
        let mut summary = IngestSummary {
            total: records.len(),
            ..IngestSummary::default()
        };

        let mut normalized = Vec::with_capacity(records.len());
        for record in records {
            if record.salary().is_none() {
                summary.no_salary += 1;
                continue;
            }
            match self.normalize(record) {
                Some(n) => normalized.push(n),
                None => {
                    debug!(
                        action = "drop",
                        component = "vacancy_ingest",
                        currency = record.currency.as_deref().unwrap_or_default(),
                        published_at = %record.published_at,
                        "No conversion for salary"
                    );
                    summary.unresolved_currency += 1;
                }
            }
        }
        summary.normalized = normalized.len();

        info!(
            action = "complete",
            component = "vacancy_ingest",
            total = summary.total,
            normalized = summary.normalized,
            no_salary = summary.no_salary,
            unresolved_currency = summary.unresolved_currency,
            duration_ms = start_time.elapsed().as_millis(),
            "Vacancies normalized"
        );
        (normalized, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rates::{RateTable, YearMonth};

    fn normalizer() -> CurrencyNormalizer {
        let mut table = RateTable::new();
        table.insert(YearMonth::new(2021, 6).unwrap(), "USD", Some(75.0));
        CurrencyNormalizer::new(table, Config::default())
    }

    fn raw(from: Option<f64>, to: Option<f64>, currency: Option<&str>, published: &str) -> RawVacancyRecord {
        RawVacancyRecord {
            name: "Программист".to_string(),
            salary_from: from,
            salary_to: to,
            currency: currency.map(str::to_string),
            area: "Москва".to_string(),
            published_at: DateTime::parse_from_str(published, PUBLISHED_AT_FORMAT).unwrap(),
        }
    }

    #[test]
    fn test_midpoint_converted() {
        let n = normalizer();
        let ingester = VacancyIngester::new(&n);
        let out = ingester.ingest(&[raw(Some(100.0), Some(200.0), Some("USD"), "2021-06-15T10:00:00+0300")]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].salary_rub, Some(11250));
        assert_eq!(out[0].year, 2021);
        assert_eq!(out[0].area, "Москва");
    }

    #[test]
    fn test_single_bound_used() {
        let n = normalizer();
        let ingester = VacancyIngester::new(&n);
        let out = ingester.ingest(&[
            raw(Some(100.0), None, Some("RUR"), "2019-01-01T00:00:00+0300"),
            raw(None, Some(250.5), Some("RUR"), "2019-01-01T00:00:00+0300"),
        ]);

        let salaries: Vec<_> = out.iter().map(|r| r.salary_rub).collect();
        assert_eq!(salaries, vec![Some(100), Some(250)]);
    }

    #[test]
    fn test_unresolvable_records_dropped() {
        let n = normalizer();
        let ingester = VacancyIngester::new(&n);
        let records = [
            raw(Some(100.0), Some(200.0), Some("XYZ"), "2021-06-15T10:00:00+0300"),
            raw(None, None, Some("RUR"), "2021-06-15T10:00:00+0300"),
            raw(Some(100.0), Some(200.0), None, "2021-06-15T10:00:00+0300"),
            raw(Some(100.0), None, Some("USD"), "2021-07-01T10:00:00+0300"),
            raw(Some(100.0), None, Some("RUR"), "2021-07-01T10:00:00+0300"),
        ];

        let (out, summary) = ingester.ingest_with_summary(&records);

        assert_eq!(out.len(), 1);
        assert_eq!(
            summary,
            IngestSummary {
                total: 5,
                normalized: 1,
                no_salary: 2,
                unresolved_currency: 2,
            }
        );
    }

    #[test]
    fn test_month_taken_from_local_timestamp() {
        let n = normalizer();
        let ingester = VacancyIngester::new(&n);
        // The second timestamp is still June in UTC but July locally.
        let june_local = raw(Some(10.0), None, Some("USD"), "2021-06-30T23:30:00+0300");
        let june_utc_july_local = raw(Some(10.0), None, Some("USD"), "2021-07-01T00:30:00+0500");

        assert_eq!(ingester.normalize(&june_local).unwrap().salary_rub, Some(750));
        assert!(ingester.normalize(&june_utc_july_local).is_none());
    }

    #[test]
    fn test_read_csv_drops_malformed_rows() {
        let data = "\
name,salary_from,salary_to,salary_currency,area_name,published_at
Программист,100,200,USD,Москва,2021-06-15T10:00:00+0300
Аналитик,,,,Казань,2021-06-16T10:00:00+0300
Тестировщик,abc,200,RUR,Пермь,2021-06-16T10:00:00+0300
Дизайнер,100,200,RUR,Пермь,16.06.2021
Менеджер,50000,,RUR,Пермь,2022-01-10T09:00:00+0300
";
        let file = read_vacancies(data.as_bytes()).unwrap();

        assert_eq!(file.records.len(), 3);
        assert_eq!(file.malformed, 2);
        assert_eq!(file.records[1].salary_from, None);
        assert_eq!(file.records[1].currency, None);
        assert_eq!(file.records[2].salary_from, Some(50000.0));
        assert_eq!(file.records[2].salary_to, None);
    }

    #[test]
    fn test_read_empty_csv() {
        let file = read_vacancies("".as_bytes()).unwrap();
        assert!(file.records.is_empty());
        assert_eq!(file.malformed, 0);
    }

    #[test]
    fn test_record_errors() {
        let row = CsvRow {
            name: Some("Инженер".to_string()),
            salary_from: Some("1e400".to_string()),
            salary_to: None,
            salary_currency: Some("RUR".to_string()),
            area_name: Some("Москва".to_string()),
            published_at: Some("2021-06-15T10:00:00+0300".to_string()),
        };
        assert_eq!(
            row.into_record().unwrap_err(),
            RecordError::InvalidNumber {
                field: "salary_from",
                value: "1e400".to_string()
            }
        );

        let row = CsvRow {
            name: Some("Инженер".to_string()),
            salary_from: None,
            salary_to: None,
            salary_currency: None,
            area_name: Some("Москва".to_string()),
            published_at: Some("  ".to_string()),
        };
        assert_eq!(
            row.into_record().unwrap_err(),
            RecordError::MissingField("published_at")
        );
    }

    #[test]
    fn test_blank_name_and_area_kept() {
        let data = "\
name,salary_from,salary_to,salary_currency,area_name,published_at
,100,200,USD,Москва,2021-06-15T10:00:00+0300
Аналитик,90000,,RUR,,2021-06-16T10:00:00+0300
Тестировщик,80000,,RUR,Пермь,2021-06-17T10:00:00+0300
";
        let file = read_vacancies(data.as_bytes()).unwrap();

        assert_eq!(file.records.len(), 3);
        assert_eq!(file.malformed, 0);
        assert_eq!(file.records[0].name, "");
        assert_eq!(file.records[1].area, "");
    }

    #[test]
    fn test_salaried_row_without_area_counted() {
        let data = "\
name,salary_from,salary_to,salary_currency,area_name,published_at
Аналитик,90000,,RUR,,2021-06-16T10:00:00+0300
Аналитик,70000,,RUR,Казань,2021-06-17T10:00:00+0300
";
        let file = read_vacancies(data.as_bytes()).unwrap();
        let normalizer = normalizer();
        let records = VacancyIngester::new(&normalizer).ingest(&file.records);
        assert_eq!(records.len(), 2);

        let aggregator = crate::stats::StatisticsAggregator::new(Config::default()).unwrap();
        let result = aggregator.aggregate(&records, "Аналитик");

        assert_eq!(result.yearly_count.get(&2021), Some(&2));
        assert_eq!(result.yearly_salary_mean.get(&2021), Some(&80000));
    }
}
