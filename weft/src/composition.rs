//! Composition root.
//!
//! Builds the full local adapter set and hands it to the core once at
//! startup. Nothing here is a global: callers own the [`Engine`] they get
//! back, and every port is passed explicitly.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{ExecutionContext, TenancyMode};
use crate::decision::{DecisionConfig, DecisionPipeline};
use crate::engine::Engine;
use crate::error::CoreError;
use crate::events::{InMemoryEventLog, SqliteEventLog};
use crate::intent::{IntentClusterer, IntentExtractor, IntentSteward, StewardConfig};
use crate::llm::{MockLlm, OpenAiCompatClient, ProviderMux};
use crate::playbook::{PlaybookLibrary, PlaybookLoader};
use crate::ports::{
    ArtifactStorePort, EmbeddingPort, EventLogPort, IdentityPort, LlmClient, LocalTool,
    VectorStorePort,
};
use crate::router::{CapabilityRouter, RouterConfig};
use crate::runtime::{ExecutorService, RuntimeDefaults};
use crate::sandbox::{LocalArtifactStore, SandboxLayout};
use crate::store::StoreSet;
use crate::tools::{ClockTool, RemoteToolClient, SandboxFilesTool, ToolDispatcher};
use crate::vector::{InMemoryVectorStore, SqliteVecStore};

/// Remote tool cluster credentials.
#[derive(Clone, Debug)]
pub struct RemoteToolsConfig {
    pub base_url: String,
    pub api_token: String,
}

/// Everything the local adapter set needs to come up.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Sqlite file; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Base directory for project sandboxes.
    pub sandbox_base: PathBuf,
    /// Directory tree of system playbook templates, scanned at startup.
    pub playbooks_dir: Option<PathBuf>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub remote_tools: Option<RemoteToolsConfig>,
    pub defaults: RuntimeDefaults,
}

impl CoreConfig {
    /// In-memory configuration for tests and ephemeral runs.
    pub fn ephemeral(sandbox_base: impl Into<PathBuf>) -> Self {
        Self {
            db_path: None,
            sandbox_base: sandbox_base.into(),
            playbooks_dir: None,
            openai_api_key: None,
            anthropic_api_key: None,
            remote_tools: None,
            defaults: RuntimeDefaults::default(),
        }
    }
}

/// Local single-user identity: every token resolves to the local actor.
pub struct LocalIdentity;

#[async_trait]
impl IdentityPort for LocalIdentity {
    async fn resolve(
        &self,
        _token: &str,
        workspace_id: &str,
    ) -> Result<ExecutionContext, CoreError> {
        Ok(ExecutionContext::new("local", workspace_id, TenancyMode::Local))
    }
}

/// Builds the engine over the local adapter set.
///
/// The mock LLM provider is always registered; the router only routes to it
/// first, so configured real providers win for profiles that list them ahead
/// of it. With no keys at all, everything stays offline.
pub fn build_engine(config: CoreConfig) -> Result<Engine, CoreError> {
    build_engine_with(config, None, None)
}

/// Variant that lets callers swap the LLM client and embedder (tests script
/// the mock; serve passes `None` for the stock wiring).
pub fn build_engine_with(
    config: CoreConfig,
    llm_override: Option<Arc<dyn LlmClient>>,
    embedder_override: Option<Arc<dyn EmbeddingPort>>,
) -> Result<Engine, CoreError> {
    let stores = match &config.db_path {
        Some(path) => StoreSet::sqlite(path.clone())?,
        None => StoreSet::in_memory(),
    };
    let log: Arc<dyn EventLogPort> = match &config.db_path {
        Some(path) => Arc::new(SqliteEventLog::open(path.clone())?),
        None => Arc::new(InMemoryEventLog::new()),
    };

    let embedder: Arc<dyn EmbeddingPort> = match embedder_override {
        Some(e) => e,
        None => match &config.openai_api_key {
            Some(key) => Arc::new(crate::embedding::OpenAiEmbedder::new(key.clone())),
            None => Arc::new(crate::embedding::HashEmbedder::default()),
        },
    };
    let vectors: Arc<dyn VectorStorePort> = match &config.db_path {
        Some(path) => Arc::new(SqliteVecStore::open(path.clone(), embedder.dimension())?),
        None => Arc::new(InMemoryVectorStore::new()),
    };

    let llm: Arc<dyn LlmClient> = match llm_override {
        Some(llm) => llm,
        None => {
            let mut mux = ProviderMux::new().with_mock(Arc::new(MockLlm::new()));
            if let Some(key) = &config.openai_api_key {
                mux = mux.with_openai(Arc::new(OpenAiCompatClient::openai(key.clone())));
            }
            if let Some(key) = &config.anthropic_api_key {
                mux = mux.with_anthropic(Arc::new(OpenAiCompatClient::anthropic(key.clone())));
            }
            Arc::new(mux)
        }
    };
    // Real providers route ahead of the mock only when configured; the mock
    // keeps offline runs and tests resolvable.
    let mut configured = vec![crate::router::ProviderKind::Mock];
    if config.openai_api_key.is_some() {
        configured.insert(0, crate::router::ProviderKind::OpenAi);
    }
    if config.anthropic_api_key.is_some() {
        configured.insert(0, crate::router::ProviderKind::Anthropic);
    }
    let mut router_config = RouterConfig::local_default();
    if config.openai_api_key.is_some() || config.anthropic_api_key.is_some() {
        // Push the mock to the back of every fallback chain when a real
        // provider exists.
        for spec in router_config.profiles.values_mut() {
            spec.fallback.retain(|name| name != "mock");
            spec.fallback.push("mock".to_string());
        }
    }
    let router = Arc::new(CapabilityRouter::new(router_config, configured));

    let mut library = PlaybookLibrary::new();
    if let Some(dir) = &config.playbooks_dir {
        library.scan_dir(dir);
    }
    let loader = Arc::new(PlaybookLoader::new(library));

    let layout = SandboxLayout::new(config.sandbox_base.clone());
    let locals: Vec<Arc<dyn LocalTool>> = vec![
        Arc::new(ClockTool),
        Arc::new(SandboxFilesTool::new(layout.clone())),
    ];
    let remote = config
        .remote_tools
        .as_ref()
        .map(|r| Arc::new(RemoteToolClient::new(r.base_url.clone(), r.api_token.clone())));
    let dispatcher = Arc::new(ToolDispatcher::new(locals, remote));

    let artifacts: Arc<dyn ArtifactStorePort> =
        Arc::new(LocalArtifactStore::new(layout, stores.artifacts.clone()));

    let executor = ExecutorService::new(
        stores.clone(),
        log.clone(),
        llm.clone(),
        router.clone(),
        dispatcher,
        artifacts,
        loader.clone(),
        config.defaults.clone(),
    );

    let extractor = IntentExtractor::new(llm.clone(), router.clone(), log.clone());
    let steward = IntentSteward::new(
        llm.clone(),
        router.clone(),
        embedder.clone(),
        vectors,
        stores.clone(),
        log.clone(),
        StewardConfig::default(),
    );
    let decision = DecisionPipeline::new(
        llm.clone(),
        router.clone(),
        loader,
        stores.clone(),
        DecisionConfig::default(),
    );
    let clusterer = IntentClusterer::new(
        llm.clone(),
        router.clone(),
        embedder,
        stores.clone(),
        log.clone(),
    );

    Ok(Engine::new(
        stores, log, llm, router, extractor, steward, decision, executor, clusterer,
    ))
}
