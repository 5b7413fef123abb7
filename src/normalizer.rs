use crate::config::Config;
use crate::rates::RateTable;

/// Converts amounts into the reference currency using a built [`RateTable`].
///
/// Pure: every answer depends only on the table and configuration it owns.
#[derive(Debug, Clone)]
pub struct CurrencyNormalizer {
    table: RateTable,
    config: Config,
}

impl CurrencyNormalizer {
    pub fn new(table: RateTable, config: Config) -> Self {
        Self { table, config }
    }

    /// Amount in the reference currency, truncated toward zero.
    ///
    /// `None` when the code is unsupported or the month has no known rate for it.
    pub fn convert(&self, amount: f64, code: &str, year: i32, month: u32) -> Option<i64> {
        if self.config.is_reference(code) {
            return truncate(amount);
        }
        if !self.config.is_supported(code) {
            return None;
        }
        let rate = self.table.rate(year, month, code)?;
        truncate(amount * rate)
    }
}

fn truncate(value: f64) -> Option<i64> {
    value.is_finite().then(|| value.trunc() as i64)
}
