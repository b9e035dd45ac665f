//! Wiring of the engine: registry, providers, health monitor, store and
//! orchestrator, built from an [`EngineConfig`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use leadflow_intent::{
    CapabilityOracle, ClassificationOracle, EngineConfig, KeywordOracle, Orchestrator,
};
use leadflow_kernel::{CapabilityRegistry, Dispatcher, HealthMonitor, IpcBus};
use leadflow_prospect::{
    Candidate, CandidateScorer, CompanyInfo, ProfileBuilder, SearchAggregator,
    SearchAggregatorProvider, StaticSource,
};
use leadflow_store::{
    CacheConfig, ConversationStore, InMemoryConversationStore, SqliteConversationStore,
};

/// Default location of the demo source definitions.
pub const DEFAULT_SOURCES_PATH: &str = "demos/sources.json";

const BUS_CAPACITY: usize = 256;

/// One static candidate source as written in the sources file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub failing: bool,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl SourceSpec {
    fn into_provider(self) -> StaticSource {
        let mut source = StaticSource::new(self.id, self.candidates)
            .with_latency(Duration::from_millis(self.latency_ms));
        if let Some(name) = self.name {
            source = source.with_name(name);
        }
        if self.failing {
            source = source.failing();
        }
        source
    }
}

/// Load source definitions from `path`, or a small built-in set when the
/// file does not exist.
pub fn load_sources(path: &Path) -> Result<Vec<SourceSpec>> {
    if !path.exists() {
        warn!(path = %path.display(), "sources file does not exist, using built-in demo sources");
        return Ok(builtin_sources());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let sources: Vec<SourceSpec> = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse sources in {}", path.display()))?;
    info!(path = %path.display(), count = sources.len(), "sources loaded");
    Ok(sources)
}

fn person(name: &str, title: &str, company: &str, industry: &str, employees: u32) -> Candidate {
    let mut info = CompanyInfo::named(company);
    info.industry = Some(industry.to_string());
    info.employee_count = Some(employees);
    Candidate::new(name, title, info)
}

fn builtin_sources() -> Vec<SourceSpec> {
    vec![SourceSpec {
        id: "demo-directory".into(),
        name: Some("Demo directory".into()),
        latency_ms: 0,
        failing: false,
        candidates: vec![
            person("Dana Whitfield", "CTO", "Ledgerly", "Fintech", 120),
            person("Omar Haddad", "VP Sales", "Carewell", "Healthcare", 800),
            person("Priya Natarajan", "Head of Growth", "Shipwise", "Logistics", 45),
        ],
    }]
}

/// A fully wired engine.
pub struct Engine {
    pub registry: CapabilityRegistry,
    pub dispatcher: Dispatcher,
    pub orchestrator: Orchestrator,
    pub monitor: HealthMonitor,
}

impl Engine {
    /// Register the built-in providers and open the conversation store.
    ///
    /// With `ephemeral` set, conversations live only in memory.
    pub async fn build(
        config: &EngineConfig,
        sources: Vec<SourceSpec>,
        ephemeral: bool,
    ) -> Result<Self> {
        let bus = IpcBus::new(BUS_CAPACITY);
        let registry = CapabilityRegistry::with_bus(bus.clone());
        let dispatcher =
            Dispatcher::with_default_timeout(registry.clone(), bus, config.dispatch_timeout());

        registry
            .register(Arc::new(ProfileBuilder::new()))
            .context("failed to register profile builder")?;
        for spec in sources {
            let id = spec.id.clone();
            registry
                .register(Arc::new(spec.into_provider()))
                .with_context(|| format!("failed to register source {id}"))?;
        }
        let aggregator = SearchAggregator::new(
            dispatcher.clone(),
            CandidateScorer::rule_based(config.scoring),
            config.aggregator(),
        );
        registry
            .register(Arc::new(SearchAggregatorProvider::new(aggregator)))
            .context("failed to register search aggregator")?;
        info!(providers = registry.count(), "providers registered");

        let store = open_store(config, ephemeral).await?;

        let capability_oracle = CapabilityOracle::new(dispatcher.clone());
        let oracle: Arc<dyn ClassificationOracle> = if capability_oracle.is_available() {
            info!("classifying through the classify_intent capability");
            Arc::new(capability_oracle)
        } else {
            Arc::new(KeywordOracle::new().context("failed to build keyword oracle")?)
        };

        let orchestrator = Orchestrator::from_config(dispatcher.clone(), store, oracle, config);
        let monitor = HealthMonitor::with_timing(
            registry.clone(),
            config.health_interval(),
            config.ping_timeout(),
        );

        Ok(Self {
            registry,
            dispatcher,
            orchestrator,
            monitor,
        })
    }
}

async fn open_store(config: &EngineConfig, ephemeral: bool) -> Result<Arc<dyn ConversationStore>> {
    if ephemeral {
        info!("using in-memory conversation store");
        return Ok(Arc::new(InMemoryConversationStore::new()));
    }

    let path = config.store.database_path.clone();
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let store = SqliteConversationStore::open(path.clone(), CacheConfig::default())
        .await
        .context("failed to open conversation database")?;
    info!(path = %path.display(), "conversation store initialized");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_kernel::DiscoveryFilter;

    #[test]
    fn sources_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(
            &path,
            r#"[{"id": "crm", "latency_ms": 10, "candidates": [
                {"name": "Ann Lee", "title": "CTO", "company": {"name": "Ledgerly"}}
            ]}]"#,
        )
        .unwrap();

        let sources = load_sources(&path).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "crm");
        assert_eq!(sources[0].candidates[0].company.name, "Ledgerly");
    }

    #[test]
    fn missing_sources_file_uses_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let sources = load_sources(&dir.path().join("absent.json")).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].candidates.len(), 3);
    }

    #[tokio::test]
    async fn ephemeral_engine_registers_every_provider() {
        let engine = Engine::build(&EngineConfig::default(), builtin_sources(), true)
            .await
            .unwrap();

        assert_eq!(engine.registry.count(), 3);
        let search = engine
            .registry
            .discover(&DiscoveryFilter::capability("search_prospects"));
        assert_eq!(search.len(), 1);

        let response = engine
            .orchestrator
            .handle_message("cli-test", "find prospects", &[])
            .await
            .unwrap();
        assert!(!response.degraded);
    }
}
