use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::info;

use crate::config::Config;
use crate::ingest::NormalizedVacancyRecord;

/// One ranked area entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaValue<T> {
    pub area: String,
    pub value: T,
}

/// The six statistics views of one aggregation pass.
///
/// Year maps are ascending by year; area lists are ordered by descending value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    pub profession: String,
    pub total_records: usize,
    pub yearly_salary_mean: BTreeMap<i32, i64>,
    pub yearly_count: BTreeMap<i32, usize>,
    pub profession_salary_mean: BTreeMap<i32, i64>,
    pub profession_count: BTreeMap<i32, usize>,
    pub area_salary_mean: Vec<AreaValue<i64>>,
    pub area_share: Vec<AreaValue<f64>>,
}

impl AggregateResult {
    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }
}

/// Exact running totals for one group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    count: usize,
    salaried: usize,
    salary_sum: i128,
}

impl Tally {
    fn add(&mut self, salary: Option<i64>) {
        self.count += 1;
        if let Some(salary) = salary {
            self.salaried += 1;
            self.salary_sum += i128::from(salary);
        }
    }

    fn merge(&mut self, other: &Tally) {
        self.count += other.count;
        self.salaried += other.salaried;
        self.salary_sum += other.salary_sum;
    }

    /// Truncated mean over salaried records.
    fn mean(&self) -> Option<i64> {
        (self.salaried > 0).then(|| (self.salary_sum / self.salaried as i128) as i64)
    }
}

/// Totals for a contiguous slice of records. Areas keep first-seen order.
#[derive(Debug, Default)]
struct PartialStats {
    total: usize,
    years: BTreeMap<i32, Tally>,
    profession_years: BTreeMap<i32, Tally>,
    areas: Vec<(String, Tally)>,
    area_index: HashMap<String, usize>,
}

impl PartialStats {
    fn push(mut self, record: &NormalizedVacancyRecord, keyword: &str) -> Self {
        self.total += 1;
        self.years.entry(record.year).or_default().add(record.salary_rub);
        if record.name.contains(keyword) {
            self.profession_years
                .entry(record.year)
                .or_default()
                .add(record.salary_rub);
        }
        self.area_tally(&record.area).add(record.salary_rub);
        self
    }

    fn area_tally(&mut self, area: &str) -> &mut Tally {
        let index = match self.area_index.get(area) {
            Some(index) => *index,
            None => {
                self.areas.push((area.to_string(), Tally::default()));
                self.area_index.insert(area.to_string(), self.areas.len() - 1);
                self.areas.len() - 1
            }
        };
        &mut self.areas[index].1
    }

    // `other` covers records after `self`, so its new areas go last.
    fn merge(mut self, other: PartialStats) -> Self {
        self.total += other.total;
        for (year, tally) in &other.years {
            self.years.entry(*year).or_default().merge(tally);
        }
        for (year, tally) in &other.profession_years {
            self.profession_years.entry(*year).or_default().merge(tally);
        }
        for (area, tally) in &other.areas {
            self.area_tally(area).merge(tally);
        }
        self
    }
}

/// Computes year, profession and area statistics over normalized vacancies.
pub struct StatisticsAggregator {
    config: Config,
    pool: rayon::ThreadPool,
}

impl StatisticsAggregator {
    pub fn new(config: Config) -> Result<Self> {
        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("Failed to build aggregation thread pool")?;
        info!(action = "configure", component = "aggregation", worker_count = workers, "Using workers for aggregation");
        Ok(Self { config, pool })
    }

    pub fn aggregate(&self, records: &[NormalizedVacancyRecord], keyword: &str) -> AggregateResult {
        let start_time = Instant::now();
        info!(
            action = "start",
            component = "aggregation",
            record_count = records.len(),
            profession = keyword,
            "Starting aggregation"
        );

        let partial = self.pool.install(|| {
            records
                .par_iter()
                .fold(PartialStats::default, |acc, record| acc.push(record, keyword))
                .reduce(PartialStats::default, PartialStats::merge)
        });

        let result = self.finish(partial, keyword);
        info!(
            action = "complete",
            component = "aggregation",
            years = result.yearly_count.len(),
            profession_years = result.profession_count.len(),
            ranked_areas = result.area_share.len(),
            duration_ms = start_time.elapsed().as_millis(),
            "Aggregation completed"
        );
        result
    }

    fn finish(&self, partial: PartialStats, keyword: &str) -> AggregateResult {
        let mut result = AggregateResult {
            profession: keyword.to_string(),
            total_records: partial.total,
            yearly_salary_mean: means(&partial.years),
            yearly_count: counts(&partial.years),
            profession_salary_mean: means(&partial.profession_years),
            profession_count: counts(&partial.profession_years),
            ..AggregateResult::default()
        };

        if partial.total == 0 {
            return result;
        }

        let total = partial.total as f64;
        let eligible: Vec<&(String, Tally)> = partial
            .areas
            .iter()
            .filter(|(_, tally)| tally.count as f64 / total >= self.config.share_threshold)
            .collect();

        let mut shares: Vec<AreaValue<f64>> = eligible
            .iter()
            .map(|(area, tally)| AreaValue {
                area: area.clone(),
                value: tally.count as f64 / total,
            })
            .collect();
        shares.sort_by(|a, b| b.value.total_cmp(&a.value));
        shares.truncate(self.config.top_n);

        let mut salaries: Vec<AreaValue<i64>> = eligible
            .iter()
            .filter_map(|(area, tally)| {
                tally.mean().map(|mean| AreaValue {
                    area: area.clone(),
                    value: mean,
                })
            })
            .collect();
        salaries.sort_by(|a, b| b.value.cmp(&a.value));
        salaries.truncate(self.config.top_n);

        result.area_share = shares;
        result.area_salary_mean = salaries;
        result
    }
}

fn means(groups: &BTreeMap<i32, Tally>) -> BTreeMap<i32, i64> {
    groups
        .iter()
        .filter_map(|(year, tally)| tally.mean().map(|mean| (*year, mean)))
        .collect()
}

fn counts(groups: &BTreeMap<i32, Tally>) -> BTreeMap<i32, usize> {
    groups.iter().map(|(year, tally)| (*year, tally.count)).collect()
}
