use crate::{
    error::SettingsError,
    options::{DEFAULT_RETRIES, DEFAULT_SINGLE_MAX_ROWS, DEFAULT_WORKERS, FetchOptions},
};
use model::plan::{Strategy, Thresholds};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Fetch settings as stored in a JSON settings file.
///
/// Every field is optional in the file; missing fields take their defaults.
/// Command line flags are applied on top of the loaded values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSettings {
    pub small_threshold: u64,
    pub large_threshold: u64,
    /// `auto`, `single`, `sequential` or `parallel`.
    pub strategy: String,
    pub page_size: Option<u64>,
    pub workers: usize,
    pub retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub page_timeout_secs: u64,
    pub estimate_timeout_secs: u64,
    pub timeout_secs: Option<u64>,
    pub single_max_rows: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            small_threshold: Thresholds::DEFAULT_SMALL,
            large_threshold: Thresholds::DEFAULT_LARGE,
            strategy: "auto".to_string(),
            page_size: None,
            workers: DEFAULT_WORKERS,
            retries: DEFAULT_RETRIES,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            page_timeout_secs: 300,
            estimate_timeout_secs: 60,
            timeout_secs: None,
            single_max_rows: DEFAULT_SINGLE_MAX_ROWS,
        }
    }
}

impl FetchSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&text)?;
        info!(path = %path.display(), "Loaded fetch settings");
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Forced strategy, `None` for `auto`.
    pub fn strategy_override(&self) -> Result<Option<Strategy>, SettingsError> {
        let value = self.strategy.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            return Ok(None);
        }
        value
            .parse::<Strategy>()
            .map(Some)
            .map_err(|_| SettingsError::UnknownStrategy(value.to_string()))
    }

    /// Validates the settings and converts them into runtime options.
    pub fn into_options(self, cancel: CancellationToken) -> Result<FetchOptions, SettingsError> {
        let strategy = self.strategy_override()?;

        let options = FetchOptions {
            thresholds: Thresholds {
                small: self.small_threshold,
                large: self.large_threshold,
            },
            strategy,
            page_size: self.page_size,
            workers: self.workers,
            max_retries: self.retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            page_timeout: Duration::from_secs(self.page_timeout_secs),
            estimate_timeout: Duration::from_secs(self.estimate_timeout_secs),
            overall_timeout: self.timeout_secs.map(Duration::from_secs),
            single_max_rows: self.single_max_rows,
            cancel,
        };

        options.validate()?;
        Ok(options)
    }
}
