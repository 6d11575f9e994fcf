mod config;
mod error;
mod metrics;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use extract::{
    ChatModel, EntityRelationshipExtractor, ExtractionConfig, OllamaClient,
};
use index::{
    CacheStats, CachedChatModel, CachedEmbedder, Embedder, EmbeddingClient,
    EntityRelationshipDescriptionSummarizer, GraphMerger, IndexStats, IndexerArtifacts,
    IndexingPipeline, IndexingReport, SummarizationConfig,
};
use query::{
    ContextSelectionResult, ContextSelector, EmbeddingSimilarityScorer, EntityScorer,
    KeywordOverlapScorer, LocalSearch, LocalSearchResult, SelectionError,
};

use crate::config::{AppConfig, LogFormat};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

/// Model and embedding backends, optionally behind response caches.
struct Backends {
    /// Used for extraction; asked to answer in JSON.
    extraction_model: Arc<dyn ChatModel>,
    /// Used for summaries and answers.
    chat_model: Arc<dyn ChatModel>,
    embedder: Option<Arc<dyn Embedder>>,
    llm_caches: Vec<Arc<CachedChatModel>>,
    embedding_cache: Option<Arc<CachedEmbedder>>,
}

impl Backends {
    fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.llm.request_timeout_secs);
        let ollama = OllamaClient::new(config.llm.base_url.clone(), config.llm.model.clone())
            .with_retry(config.retry.policy())
            .with_timeout(timeout)?;
        let extraction_model: Arc<dyn ChatModel> = Arc::new(ollama.clone().with_json_mode(true));
        let chat_model: Arc<dyn ChatModel> = Arc::new(ollama);

        let embedder: Option<Arc<dyn Embedder>> = config.embeddings.enabled.then(|| {
            Arc::new(
                EmbeddingClient::new(
                    config.embeddings.base_url.clone(),
                    config.embeddings.model.clone(),
                )
                .with_retry(config.retry.policy()),
            ) as Arc<dyn Embedder>
        });

        let mut backends = Self {
            extraction_model,
            chat_model,
            embedder,
            llm_caches: Vec::new(),
            embedding_cache: None,
        };
        if config.cache.enabled && config.cache.max_entries > 0 {
            backends = backends.cached(config.cache.max_entries);
        }
        Ok(backends)
    }

    fn cached(self, max_entries: usize) -> Self {
        let extraction = Arc::new(CachedChatModel::new(self.extraction_model, max_entries));
        let chat = Arc::new(CachedChatModel::new(self.chat_model, max_entries));
        let embedding_cache = self
            .embedder
            .map(|embedder| Arc::new(CachedEmbedder::new(embedder, max_entries)));

        Self {
            extraction_model: extraction.clone(),
            chat_model: chat.clone(),
            embedder: embedding_cache.clone().map(|cache| cache as Arc<dyn Embedder>),
            llm_caches: vec![extraction, chat],
            embedding_cache,
        }
    }

    fn cache_stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embedding_cache.as_ref().map_or(0, |c| c.cached()),
            llm_responses_cached: self.llm_caches.iter().map(|c| c.cached()).sum(),
        }
    }
}

struct AppState {
    config: AppConfig,
    backends: Backends,
    pipeline: IndexingPipeline,
    search: LocalSearch,
    /// Queries clone the `Arc`; indexing swaps in a new one when done.
    artifacts: RwLock<Option<Arc<IndexerArtifacts>>>,
    index_lock: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl AppState {
    fn new(config: AppConfig, backends: Backends) -> anyhow::Result<Self> {
        let extractor = EntityRelationshipExtractor::build_default(
            backends.extraction_model.clone(),
            ExtractionConfig {
                concurrency: config.concurrency.max_concurrent_extractions,
                failure_policy: config.indexing.extraction_failure_policy,
            },
        );
        let summarizer = EntityRelationshipDescriptionSummarizer::build_default(
            backends.chat_model.clone(),
            SummarizationConfig {
                concurrency: config.concurrency.max_concurrent_summaries,
                failure_policy: config.indexing.summarization_failure_policy,
            },
        );
        let mut pipeline = IndexingPipeline::from_parts(
            extractor,
            GraphMerger::new(config.indexing.graph_kind),
            summarizer,
            config.concurrency.max_concurrent_embeddings,
        );

        let scorer: Arc<dyn EntityScorer> = match &backends.embedder {
            Some(embedder) => {
                pipeline = pipeline.with_embedder(embedder.clone());
                Arc::new(
                    EmbeddingSimilarityScorer::new(embedder.clone())
                        .with_concurrency(config.concurrency.max_concurrent_embeddings),
                )
            }
            None => Arc::new(KeywordOverlapScorer),
        };
        let selector = ContextSelector::from_config(scorer, &config.search)
            .context("Invalid search settings")?;
        let search = LocalSearch::build_default(selector, backends.chat_model.clone());

        Ok(Self {
            config,
            backends,
            pipeline,
            search,
            artifacts: RwLock::new(None),
            index_lock: Mutex::new(()),
            metrics: Metrics::new(),
        })
    }

    /// Load previously saved artifacts, if any.
    async fn restore_artifacts(&self) {
        let dir = &self.config.server.artifacts_dir;
        if !dir.exists() {
            return;
        }
        match IndexerArtifacts::load(dir).await {
            Ok(artifacts) => {
                info!(entities = artifacts.entities.len(), "Restored artifacts");
                *self.artifacts.write().await = Some(Arc::new(artifacts));
            }
            Err(e) => warn!(error = %format!("{e:#}"), "Could not restore artifacts"),
        }
    }

    async fn current_artifacts(&self) -> ApiResult<Arc<IndexerArtifacts>> {
        self.artifacts.read().await.clone().ok_or(ApiError::NotIndexed)
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/index", post(index_documents))
        .route("/query", post(local_search))
        .route("/context", post(select_context))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().await?;
    init_tracing(config.logging.format);

    let backends = Backends::from_config(&config)?;
    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(AppState::new(config, backends)?);
    state.restore_artifacts().await;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    info!(addr = %bind_addr, mode = ?state.config.mode, "Server listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    llm: String,
    indexed: bool,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let url = format!("{}/api/tags", state.config.llm.base_url);
    let llm = match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {}", e),
    };

    Json(HealthResponse {
        status: "ok",
        llm,
        indexed: state.artifacts.read().await.is_some(),
    })
}

#[derive(Deserialize)]
struct IndexRequest {
    path: String,
}

#[derive(Serialize)]
struct IndexResponse {
    report: IndexingReport,
    stats: IndexStats,
}

async fn index_documents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IndexRequest>,
) -> ApiResult<Json<IndexResponse>> {
    let result = run_indexing(&state, req).await;
    state.metrics.record_request(result.is_ok());
    result.map(Json)
}

async fn run_indexing(state: &AppState, req: IndexRequest) -> ApiResult<IndexResponse> {
    let path = PathBuf::from(&req.path);
    if !path.exists() {
        return Err(ApiError::NotFound(format!("{} does not exist", req.path)));
    }

    // One indexing run at a time; queries keep using the previous snapshot.
    let _guard = state.index_lock.lock().await;
    let timer = TimedOperation::start();

    let splitter = ingest::SplitterConfig {
        max_tokens: state.config.indexing.max_tokens_per_unit,
        overlap_tokens: state.config.indexing.overlap_tokens,
    };
    let text_units = ingest::ingest_path(&path, splitter).await?;
    if text_units.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "no .txt or .md content found at {}",
            req.path
        )));
    }

    let output = state.pipeline.run(&text_units).await?;
    output
        .artifacts
        .save(&state.config.server.artifacts_dir)
        .await?;

    let stats = IndexStats::of(&output.artifacts);
    *state.artifacts.write().await = Some(Arc::new(output.artifacts));
    state.metrics.record_index(timer.elapsed(), &output.report);

    Ok(IndexResponse {
        report: output.report,
        stats,
    })
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

impl QueryRequest {
    fn validated(self) -> ApiResult<String> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".to_string()));
        }
        Ok(query.to_string())
    }
}

async fn local_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<LocalSearchResult>> {
    let result = run_search(&state, req).await;
    finish_query(&state, result)
}

async fn run_search(state: &AppState, req: QueryRequest) -> ApiResult<LocalSearchResult> {
    let query = req.validated()?;
    let artifacts = state.current_artifacts().await?;

    let timer = TimedOperation::start();
    let result = state.search.search(&query, &artifacts).await;
    state.metrics.record_query(timer.elapsed());

    Ok(result?)
}

async fn select_context(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<ContextSelectionResult>> {
    let result = run_selection(&state, req).await;
    finish_query(&state, result)
}

async fn run_selection(
    state: &AppState,
    req: QueryRequest,
) -> ApiResult<ContextSelectionResult> {
    let query = req.validated()?;
    let artifacts = state.current_artifacts().await?;
    Ok(state.search.selector().run(&query, &artifacts).await?)
}

fn finish_query<T>(state: &AppState, result: ApiResult<T>) -> ApiResult<Json<T>> {
    if matches!(result, Err(ApiError::Selection(SelectionError::EmptySelection))) {
        state.metrics.record_empty_selection();
    }
    state.metrics.record_request(result.is_ok());
    result.map(Json)
}

#[derive(Serialize)]
struct StatsResponse {
    index: Option<IndexStats>,
    cache: CacheStats,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let index = state.artifacts.read().await.as_deref().map(IndexStats::of);
    Json(StatsResponse {
        index,
        cache: state.backends.cache_stats(),
    })
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
