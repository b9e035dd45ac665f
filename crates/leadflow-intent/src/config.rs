//! Engine configuration.
//!
//! Loaded from a TOML file (conventionally `config/leadflow.toml`).  Every
//! section and key is optional; a missing file means all defaults.
//!
//! ```toml
//! [engine]
//! dispatch_timeout_ms = 30000
//! classify_timeout_ms = 10000
//! confidence_threshold = 0.55
//! history_limit = 20
//! task_retention_secs = 300
//!
//! [health]
//! interval_secs = 30
//! ping_timeout_ms = 5000
//!
//! [search]
//! per_provider_timeout_ms = 30000
//! overall_timeout_ms = 60000
//! result_limit = 50
//!
//! [scoring]
//! industry = 0.4
//! company_share = 0.5
//!
//! [store]
//! database_path = "data/leadflow.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use leadflow_kernel::dispatcher::DEFAULT_DISPATCH_TIMEOUT;
use leadflow_kernel::health::{DEFAULT_CHECK_INTERVAL, DEFAULT_PING_TIMEOUT};
use leadflow_prospect::aggregator::{DEFAULT_OVERALL_TIMEOUT, DEFAULT_PER_PROVIDER_TIMEOUT};
use leadflow_prospect::{AggregatorConfig, DEFAULT_RESULT_LIMIT, ScoringWeights};
use leadflow_store::DEFAULT_HISTORY_LIMIT;

use crate::error::{IntentError, Result};
use crate::workflow::{DEFAULT_CLASSIFY_TIMEOUT, DEFAULT_CONFIDENCE_THRESHOLD};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/leadflow.toml";

/// How long finished tasks stay queryable by default.
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(300);

/// Default location of the conversation database.
pub const DEFAULT_DATABASE_PATH: &str = "data/leadflow.db";

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Turn handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnSection {
    pub dispatch_timeout_ms: u64,
    pub classify_timeout_ms: u64,
    pub confidence_threshold: f64,
    pub history_limit: usize,
    /// Finished tasks older than this are forgotten after each turn.  Zero
    /// keeps only tasks still in flight.
    pub task_retention_secs: u64,
}

impl Default for TurnSection {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: millis(DEFAULT_DISPATCH_TIMEOUT),
            classify_timeout_ms: millis(DEFAULT_CLASSIFY_TIMEOUT),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            history_limit: DEFAULT_HISTORY_LIMIT,
            task_retention_secs: DEFAULT_TASK_RETENTION.as_secs(),
        }
    }
}

/// Provider health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub interval_secs: u64,
    pub ping_timeout_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_CHECK_INTERVAL.as_secs(),
            ping_timeout_ms: millis(DEFAULT_PING_TIMEOUT),
        }
    }
}

/// Multi-source search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub per_provider_timeout_ms: u64,
    pub overall_timeout_ms: u64,
    pub result_limit: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            per_provider_timeout_ms: millis(DEFAULT_PER_PROVIDER_TIMEOUT),
            overall_timeout_ms: millis(DEFAULT_OVERALL_TIMEOUT),
            result_limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

/// Conversation persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub database_path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

/// Everything tunable about the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: TurnSection,
    pub health: HealthSection,
    pub search: SearchSection,
    pub scoring: ScoringWeights,
    pub store: StoreSection,
}

impl EngineConfig {
    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| IntentError::InvalidConfig {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "configuration file does not exist, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| IntentError::InvalidConfig {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(IntentError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if !(0.0..=1.0).contains(&self.engine.confidence_threshold) {
            return invalid("engine.confidence_threshold must be within [0, 1]");
        }
        if self.engine.history_limit == 0 {
            return invalid("engine.history_limit must be at least 1");
        }
        if self.search.result_limit == 0 {
            return invalid("search.result_limit must be at least 1");
        }
        let timeouts = [
            self.engine.dispatch_timeout_ms,
            self.engine.classify_timeout_ms,
            self.health.interval_secs,
            self.health.ping_timeout_ms,
            self.search.per_provider_timeout_ms,
            self.search.overall_timeout_ms,
        ];
        if timeouts.contains(&0) {
            return invalid("timeouts and intervals must be positive");
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.dispatch_timeout_ms)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.classify_timeout_ms)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.engine.task_retention_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.health.ping_timeout_ms)
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            per_provider_timeout: Duration::from_millis(self.search.per_provider_timeout_ms),
            overall_timeout: Duration::from_millis(self.search.overall_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.engine.confidence_threshold, 0.55);
        assert_eq!(config.engine.history_limit, 20);
        assert_eq!(config.search.result_limit, 50);
        assert_eq!(config.aggregator().overall_timeout, Duration::from_secs(60));
        assert_eq!(config.health_interval(), Duration::from_secs(30));
        assert_eq!(config.task_retention(), DEFAULT_TASK_RETENTION);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml(
            "[search]\nresult_limit = 10\n\n[scoring]\nindustry = 0.9\n",
        )
        .unwrap();
        assert_eq!(config.search.result_limit, 10);
        assert_eq!(config.search.overall_timeout_ms, 60_000);
        assert_eq!(config.scoring.industry, 0.9);
        assert_eq!(config.scoring.role, ScoringWeights::default().role);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml("[engine]\nconfidence_threshold = 1.5\n").is_err());
        assert!(EngineConfig::from_toml("[search]\nresult_limit = 0\n").is_err());
        assert!(EngineConfig::from_toml("[health]\nping_timeout_ms = 0\n").is_err());
        assert!(EngineConfig::from_toml("[engine\n").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());

        let path = dir.path().join("leadflow.toml");
        std::fs::write(&path, "[engine]\nhistory_limit = 5\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().engine.history_limit, 5);

        std::fs::write(&path, "[engine]\ntask_retention_secs = 0\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.task_retention(), Duration::ZERO);
    }
}
