use std::time::Duration;

pub const DEFAULT_REFERENCE_CURRENCY: &str = "RUR";
pub const DEFAULT_SUPPORTED_CURRENCIES: [&str; 8] =
    ["BYR", "USD", "EUR", "KZT", "UAH", "AZN", "KGS", "UZS"];
pub const DEFAULT_SHARE_THRESHOLD: f64 = 0.01;
pub const DEFAULT_TOP_N: usize = 10;

/// How the rate table builder paces and retries calls to a rate source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    /// Minimum pause between two consecutive source calls.
    pub min_interval: Duration,
    /// Per-call budget; a slower answer counts as an unresolved month.
    pub timeout: Duration,
    /// Extra attempts after a failed call. Zero means a failure is final.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every further one.
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(10),
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

impl FetchPolicy {
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << retry.min(16))
    }
}

/// Settings shared by every stage of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub reference_currency: String,
    /// Convertible codes other than the reference currency.
    pub supported_currencies: Vec<String>,
    pub share_threshold: f64,
    pub top_n: usize,
    pub fetch: FetchPolicy,
    /// Aggregation threads; `None` picks `min(num_cpus, 8)`.
    pub workers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_currency: DEFAULT_REFERENCE_CURRENCY.to_string(),
            supported_currencies: DEFAULT_SUPPORTED_CURRENCIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            share_threshold: DEFAULT_SHARE_THRESHOLD,
            top_n: DEFAULT_TOP_N,
            fetch: FetchPolicy::default(),
            workers: None,
        }
    }
}

impl Config {
    pub fn is_reference(&self, code: &str) -> bool {
        code == self.reference_currency
    }

    /// True for the reference currency and every convertible code.
    pub fn is_supported(&self, code: &str) -> bool {
        self.is_reference(code) || self.supported_currencies.iter().any(|c| c == code)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| std::cmp::min(num_cpus::get(), 8))
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_currency_is_supported() {
        let config = Config::default();
        assert!(config.is_supported("RUR"));
        assert!(config.is_supported("USD"));
        assert!(!config.is_supported("XYZ"));
        assert!(!config.supported_currencies.contains(&"RUR".to_string()));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = FetchPolicy {
            backoff: Duration::from_millis(100),
            ..FetchPolicy::default()
        };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_worker_count_never_zero() {
        let config = Config {
            workers: Some(0),
            ..Config::default()
        };
        assert_eq!(config.worker_count(), 1);
    }
}
