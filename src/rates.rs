use std::collections::BTreeMap;
use std::fmt;

/// Calendar month used as the first level of the rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Parses `YYYY-MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let (year, month) = s.trim().split_once('-')?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return None;
        }
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Monthly conversion factors into the reference currency.
///
/// Two-level map: month -> currency code -> rate. A `None` rate means the
/// currency had no quote that month. The reference currency is never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    months: BTreeMap<YearMonth, BTreeMap<String, Option<f64>>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one rate. Non-positive or non-finite rates are stored as unknown.
    pub fn insert(&mut self, at: YearMonth, code: &str, rate: Option<f64>) {
        let rate = rate.filter(|r| r.is_finite() && *r > 0.0);
        self.months
            .entry(at)
            .or_default()
            .insert(code.to_string(), rate);
    }

    /// Marks every listed code as unquoted for `at`.
    pub fn insert_unknown_month<'a>(
        &mut self,
        at: YearMonth,
        codes: impl IntoIterator<Item = &'a str>,
    ) {
        let entry = self.months.entry(at).or_default();
        for code in codes {
            entry.insert(code.to_string(), None);
        }
    }

    /// The known rate for `(year, month, code)`, or `None` when absent or unquoted.
    pub fn rate(&self, year: i32, month: u32, code: &str) -> Option<f64> {
        self.months
            .get(&YearMonth { year, month })?
            .get(code)
            .copied()
            .flatten()
    }

    pub fn contains_month(&self, at: YearMonth) -> bool {
        self.months.contains_key(&at)
    }

    /// Every stored entry, ordered by month then code.
    pub fn entries(&self) -> impl Iterator<Item = (YearMonth, &str, Option<f64>)> + '_ {
        self.months.iter().flat_map(|(at, codes)| {
            codes
                .iter()
                .map(move |(code, rate)| (*at, code.as_str(), *rate))
        })
    }

    pub fn month_count(&self) -> usize {
        self.months.len()
    }

    /// Number of entries holding an actual rate.
    pub fn known_count(&self) -> usize {
        self.entries().filter(|(_, _, rate)| rate.is_some()).count()
    }
}
