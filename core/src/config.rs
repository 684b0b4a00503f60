use std::time::Duration;

use crate::quantize::DEFAULT_MAX_SERVINGS;

/// Tunables for the sync layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long an indexed search answer stays fresh.
    pub freshness_window: Duration,
    /// Budget for a single remote call; exceeding it fails with status 408.
    pub remote_timeout: Duration,
    /// Upper bound on the servings count a quantized ingredient may use.
    pub max_servings: u32,
    /// Locale used when a caller does not pass one.
    pub default_locale: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(24 * 60 * 60),
            remote_timeout: Duration::from_secs(10),
            max_servings: DEFAULT_MAX_SERVINGS,
            default_locale: "en".to_string(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }
}
