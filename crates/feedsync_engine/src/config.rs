//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use feedsync_types::{CountryCode, CountrySet};
use std::time::Duration;

/// Largest accepted `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;
/// Largest accepted base retry delay.
pub const MAX_BASE_DELAY: Duration = Duration::from_secs(60);
/// Largest accepted upload concurrency.
pub const MAX_UPLOAD_CONCURRENCY: usize = 10;

/// Configuration for sync runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Retry behaviour for every collaborator call.
    pub retry: RetryPolicy,
    /// Feed uploads running at the same time.
    pub max_concurrent_uploads: usize,
    /// When false, smart mode ignores mapping changes and picks INCREMENTAL
    /// whenever a baseline exists.
    pub smart_mapping_enabled: bool,
    /// Countries feeds are published for. `None` publishes every mapped
    /// country; otherwise other countries are dropped from the mapping
    /// before it is compared or routed.
    pub target_countries: Option<CountrySet>,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrent_uploads: 3,
            smart_mapping_enabled: true,
            target_countries: None,
        }
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the upload concurrency.
    pub fn with_max_concurrent_uploads(mut self, uploads: usize) -> Self {
        self.max_concurrent_uploads = uploads;
        self
    }

    /// Enables or disables mapping-aware strategy selection.
    pub fn with_smart_mapping(mut self, enabled: bool) -> Self {
        self.smart_mapping_enabled = enabled;
        self
    }

    /// Restricts publishing to `countries`.
    pub fn with_target_countries(mut self, countries: impl IntoIterator<Item = CountryCode>) -> Self {
        self.target_countries = Some(countries.into_iter().collect());
        self
    }

    /// Checks every value against its accepted range.
    ///
    /// All problems are reported at once.
    pub fn validate(&self) -> SyncResult<()> {
        let mut problems = Vec::new();

        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            problems.push(format!(
                "max retries must be between 0 and {MAX_RETRIES_LIMIT}, got {}",
                self.retry.max_retries
            ));
        }
        if self.retry.base_delay.is_zero() || self.retry.base_delay > MAX_BASE_DELAY {
            problems.push(format!(
                "base retry delay must be in (0s, {}s], got {:?}",
                MAX_BASE_DELAY.as_secs(),
                self.retry.base_delay
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            problems.push(format!(
                "max retry delay {:?} is below the base delay {:?}",
                self.retry.max_delay, self.retry.base_delay
            ));
        }
        if !(1..=MAX_UPLOAD_CONCURRENCY).contains(&self.max_concurrent_uploads) {
            problems.push(format!(
                "concurrent uploads must be between 1 and {MAX_UPLOAD_CONCURRENCY}, got {}",
                self.max_concurrent_uploads
            ));
        }

        if self.target_countries.as_ref().is_some_and(CountrySet::is_empty) {
            problems.push("target countries must name at least one country".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SyncError::InvalidConfig(problems))
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
