use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, FetchPolicy};
use crate::error::RateSourceError;
use crate::rates::{RateTable, YearMonth};
use crate::source::{MonthlyQuotes, Pacer, RateSource};

/// Assembles a [`RateTable`] by querying a rate source once per month.
///
/// Calls are strictly sequential and separated by `FetchPolicy::min_interval`.
/// A month whose query fails (after any configured retries) is recorded as
/// unknown for every currency; the build itself never fails.
///
/// Each call runs on its own thread and is abandoned once it outlives
/// `FetchPolicy::timeout`.
pub struct RateTableBuilder<'a> {
    source: Arc<dyn RateSource>,
    pacer: &'a dyn Pacer,
    policy: FetchPolicy,
    codes: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub months: usize,
    pub failed_months: usize,
    pub calls: usize,
}

impl<'a> RateTableBuilder<'a> {
    pub fn new(source: Arc<dyn RateSource>, pacer: &'a dyn Pacer, config: &Config) -> Self {
        let codes = config
            .supported_currencies
            .iter()
            .filter(|c| !config.is_reference(c))
            .cloned()
            .collect();

        Self {
            source,
            pacer,
            policy: config.fetch.clone(),
            codes,
        }
    }

    /// Months visited for a requested range.
    ///
    /// Walks from `start` through December of `end.year`; the end month only
    /// selects the year. An end year before the start year yields nothing.
    pub fn months_in_range(start: YearMonth, end: YearMonth) -> Vec<YearMonth> {
        let mut months = Vec::new();
        let mut at = start;
        while at.year <= end.year {
            months.push(at);
            at = at.next();
        }
        months
    }

    pub fn build(&self, start: YearMonth, end: YearMonth) -> RateTable {
        self.build_with_summary(start, end).0
    }

    pub fn build_with_summary(&self, start: YearMonth, end: YearMonth) -> (RateTable, BuildSummary) {
        let start_time = Instant::now();
        let months = Self::months_in_range(start, end);
        info!(
            action = "start",
            component = "rate_table_build",
            first = %start,
            last_requested = %end,
            month_count = months.len(),
            "Building rate table"
        );

        let mut table = RateTable::new();
        let mut summary = BuildSummary::default();

        for (index, at) in months.iter().copied().enumerate() {
            if index > 0 {
                self.pacer.pause(self.policy.min_interval);
            }

            match self.fetch_month(at, &mut summary.calls) {
                Ok(quotes) => {
                    for code in &self.codes {
                        table.insert(at, code, quotes.get(code).copied());
                    }
                }
                Err(e) => {
                    warn!(action = "fetch", component = "rate_table_build", month = %at, error = %e, "Recording month as unknown");
                    summary.failed_months += 1;
                    table.insert_unknown_month(at, self.codes.iter().map(String::as_str));
                }
            }
            summary.months += 1;
        }

        info!(
            action = "complete",
            component = "rate_table_build",
            months = summary.months,
            failed_months = summary.failed_months,
            calls = summary.calls,
            known_rates = table.known_count(),
            duration_ms = start_time.elapsed().as_millis(),
            "Rate table built"
        );

        (table, summary)
    }

    fn fetch_month(&self, at: YearMonth, calls: &mut usize) -> Result<MonthlyQuotes, RateSourceError> {
        let mut retry = 0;
        loop {
            *calls += 1;
            let result = self.timed_fetch(at);
            match result {
                Ok(quotes) => return Ok(quotes),
                Err(e) if retry < self.policy.max_retries => {
                    let delay = self.policy.backoff_for(retry);
                    debug!(action = "retry", component = "rate_table_build", month = %at, attempt = retry + 1, delay_ms = delay.as_millis(), error = %e, "Retrying month");
                    self.pacer.pause(delay);
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // A call that misses the deadline keeps running detached; its answer is dropped.
    fn timed_fetch(&self, at: YearMonth) -> Result<MonthlyQuotes, RateSourceError> {
        let (tx, rx) = mpsc::channel();
        let source = Arc::clone(&self.source);
        thread::Builder::new()
            .name(format!("rate-fetch-{at}"))
            .spawn(move || {
                let _ = tx.send(source.fetch(at));
            })
            .map_err(|e| RateSourceError::Unavailable {
                year: at.year,
                month: at.month,
                reason: format!("failed to start request: {e}"),
            })?;

        match rx.recv_timeout(self.policy.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(RateSourceError::Timeout {
                year: at.year,
                month: at.month,
                timeout_ms: self.policy.timeout.as_millis(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(RateSourceError::Unavailable {
                year: at.year,
                month: at.month,
                reason: "request ended without an answer".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticRateSource;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    #[derive(Default)]
    struct RecordingPacer {
        pauses: RefCell<Vec<Duration>>,
    }

    impl Pacer for RecordingPacer {
        fn pause(&self, duration: Duration) {
            self.pauses.borrow_mut().push(duration);
        }
    }

    /// Fails the first `failures` calls, then answers with a fixed quote.
    struct FlakySource {
        failures: AtomicU32,
        calls: Mutex<Vec<YearMonth>>,
    }

    impl FlakySource {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<YearMonth> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RateSource for FlakySource {
        fn fetch(&self, at: YearMonth) -> Result<MonthlyQuotes, RateSourceError> {
            self.calls.lock().unwrap().push(at);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(RateSourceError::Malformed {
                    year: at.year,
                    month: at.month,
                    reason: "truncated body".to_string(),
                });
            }
            Ok(MonthlyQuotes::from([("USD".to_string(), 70.0)]))
        }
    }

    #[test]
    fn test_range_runs_through_december_of_end_year() {
        let months = RateTableBuilder::months_in_range(ym(2020, 11), ym(2021, 2));
        assert_eq!(months.len(), 14);
        assert_eq!(months.first(), Some(&ym(2020, 11)));
        assert_eq!(months.last(), Some(&ym(2021, 12)));

        assert!(RateTableBuilder::months_in_range(ym(2021, 1), ym(2020, 1)).is_empty());
    }

    #[test]
    fn test_each_month_queried_once_with_pacing() {
        let source = FlakySource::new(0);
        let pacer = RecordingPacer::default();
        let config = Config::default();
        let builder = RateTableBuilder::new(source.clone(), &pacer, &config);

        let (table, summary) = builder.build_with_summary(ym(2022, 1), ym(2022, 1));

        assert_eq!(source.calls().len(), 12);
        assert_eq!(summary.calls, 12);
        assert_eq!(table.month_count(), 12);
        assert_eq!(table.rate(2022, 5, "USD"), Some(70.0));
        assert_eq!(table.rate(2022, 5, "EUR"), None);
        assert!(table.entries().all(|(_, code, _)| code != "RUR"));

        let pauses = pacer.pauses.borrow();
        assert_eq!(pauses.len(), 11);
        assert!(pauses.iter().all(|d| *d == config.fetch.min_interval));
    }

    #[test]
    fn test_failed_month_recorded_unknown() {
        let source = Arc::new(
            StaticRateSource::new()
                .with_month(ym(2021, 11), &[("USD", 74.0), ("EUR", 84.0)])
                .with_month(ym(2021, 12), &[("USD", 73.0)]),
        );
        let pacer = RecordingPacer::default();
        let config = Config::default();
        let builder = RateTableBuilder::new(source.clone(), &pacer, &config);

        let (table, summary) = builder.build_with_summary(ym(2021, 10), ym(2021, 12));

        assert_eq!(summary.months, 3);
        assert_eq!(summary.failed_months, 1);
        assert!(table.contains_month(ym(2021, 10)));
        assert_eq!(table.rate(2021, 10, "USD"), None);
        assert_eq!(table.rate(2021, 11, "EUR"), Some(84.0));
        assert_eq!(table.rate(2021, 12, "EUR"), None);
        assert_eq!(table.entries().filter(|(at, _, _)| *at == ym(2021, 10)).count(), 8);
    }

    #[test]
    fn test_no_retry_by_default() {
        let source = FlakySource::new(1);
        let pacer = RecordingPacer::default();
        let config = Config::default();
        let builder = RateTableBuilder::new(source.clone(), &pacer, &config);

        let table = builder.build(ym(2020, 12), ym(2020, 12));

        assert_eq!(source.calls().len(), 1);
        assert_eq!(table.rate(2020, 12, "USD"), None);
    }

    #[test]
    fn test_bounded_retry_with_backoff() {
        let source = FlakySource::new(2);
        let pacer = RecordingPacer::default();
        let mut config = Config::default();
        config.fetch.max_retries = 3;
        config.fetch.backoff = Duration::from_millis(10);
        let builder = RateTableBuilder::new(source.clone(), &pacer, &config);

        let table = builder.build(ym(2020, 12), ym(2020, 12));

        assert_eq!(source.calls(), vec![ym(2020, 12); 3]);
        assert_eq!(table.rate(2020, 12, "USD"), Some(70.0));
        assert_eq!(
            pacer.pauses.borrow().as_slice(),
            &[Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn test_hanging_source_is_cut_off_at_timeout() {
        struct HangingSource;
        impl RateSource for HangingSource {
            fn fetch(&self, _at: YearMonth) -> Result<MonthlyQuotes, RateSourceError> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(MonthlyQuotes::from([("USD".to_string(), 70.0)]))
            }
        }

        let pacer = RecordingPacer::default();
        let mut config = Config::default();
        config.fetch.timeout = Duration::from_millis(10);
        let builder = RateTableBuilder::new(Arc::new(HangingSource), &pacer, &config);

        let started = Instant::now();
        let (table, summary) = builder.build_with_summary(ym(2021, 1), ym(2021, 1));
        let elapsed = started.elapsed();

        assert_eq!(summary.months, 12);
        assert_eq!(summary.failed_months, 12);
        assert_eq!(table.rate(2021, 6, "USD"), None);
        // Twelve full calls would take 3.6s.
        assert!(elapsed < Duration::from_millis(1500), "build took {elapsed:?}");
    }

    #[test]
    fn test_panicking_source_is_unresolved() {
        struct PanickingSource;
        impl RateSource for PanickingSource {
            fn fetch(&self, _at: YearMonth) -> Result<MonthlyQuotes, RateSourceError> {
                panic!("connection reset");
            }
        }

        let pacer = RecordingPacer::default();
        let config = Config::default();
        let builder = RateTableBuilder::new(Arc::new(PanickingSource), &pacer, &config);

        let (_, summary) = builder.build_with_summary(ym(2020, 12), ym(2020, 12));
        assert_eq!(summary.failed_months, 1);
    }
}
