use std::sync::Arc;

use crate::agent::AgenticLoop;
use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::history::HistoryStore;
use crate::llm::{build_provider, EmbeddingGateway, LlmProvider};
use crate::memory::{MemoryService, MemoryStore};
use crate::rag::{PlainTextExtractor, RagEngine, RagStore, SqliteRagStore};
use crate::service::StudyService;
use crate::tools::ToolExecutor;

pub mod error;

use error::InitializationError;

/// Application state, built once at startup and shared by handle.
///
/// Contains:
/// - Configuration and paths
/// - The LLM provider and the shared chunk index
/// - The study service wiring RAG, agent, memory and history together
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<Settings>,
    pub provider: Arc<dyn LlmProvider>,
    pub rag_store: Arc<dyn RagStore>,
    pub service: Arc<StudyService>,
}

impl AppState {
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        Self::initialize_with(Arc::new(AppPaths::new())).await
    }

    /// Initializes the application state under the given paths.
    ///
    /// 1. Load and validate configuration
    /// 2. Build the configured LLM provider
    /// 3. Open the RAG, memory and history databases
    /// 4. Wire the engine, tools, agent loop and service
    pub async fn initialize_with(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = Arc::new(
            config
                .load_settings()
                .map_err(|e| InitializationError::Config(e.into()))?,
        );

        let provider =
            build_provider(&settings.llm).map_err(|e| InitializationError::Llm(e.into()))?;
        let embeddings = EmbeddingGateway::new(
            provider.clone(),
            settings.llm.embedding_model.clone(),
            settings.embedding.batch_size,
        );

        let rag_store: Arc<dyn RagStore> = Arc::new(
            SqliteRagStore::new(paths.as_ref())
                .await
                .map_err(|e| InitializationError::Rag(e.into()))?,
        );
        let rag = Arc::new(
            RagEngine::new(
                &settings.rag,
                embeddings.clone(),
                rag_store.clone(),
                Arc::new(PlainTextExtractor::default()),
                paths.scratch_dir.clone(),
            )
            .map_err(|e| InitializationError::Rag(e.into()))?,
        );

        let memory_store = MemoryStore::new(paths.memory_db_path.clone())
            .await
            .map_err(|e| InitializationError::Memory(e.into()))?;
        let memory = MemoryService::new(memory_store, embeddings, settings.memory.enabled);

        let history = HistoryStore::new(paths.db_path.clone())
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let agent = AgenticLoop::new(
            provider.clone(),
            ToolExecutor::new(rag.clone()),
            rag.clone(),
            settings.clone(),
        );
        let service = Arc::new(StudyService::new(
            settings.clone(),
            rag,
            agent,
            memory,
            history,
        ));

        tracing::info!(
            "Initialized with provider {} (chat model {}, embedding model {})",
            provider.name(),
            settings.llm.chat_model,
            settings.llm.embedding_model
        );

        Ok(Arc::new(AppState {
            paths,
            config,
            settings,
            provider,
            rag_store,
            service,
        }))
    }
}
