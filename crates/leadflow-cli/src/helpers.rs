//! Shared helper functions used across CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadflow_intent::EngineConfig;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load `.env` (if any) and then the engine configuration.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    match dotenvy::dotenv() {
        Ok(env_path) => info!(path = %env_path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to read .env"),
    }

    EngineConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Human-readable step name, e.g. `"profile creation"`.
pub fn step_label(state: leadflow_store::WorkflowState) -> String {
    state.as_str().replace('_', " ")
}

/// Pretty-print a serializable value, falling back to debug output.
pub fn print_json<T: serde::Serialize + std::fmt::Debug>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_store::WorkflowState;

    #[test]
    fn step_labels_are_spaced() {
        assert_eq!(step_label(WorkflowState::ProfileCreation), "profile creation");
        assert_eq!(step_label(WorkflowState::Greeting), "greeting");
    }

    #[test]
    fn missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
