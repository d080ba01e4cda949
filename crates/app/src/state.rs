use crate::config::{Config, EmbeddingBackend, IndexBackend};
use anyhow::Context;
use grounded_qa_core::{
    ensure_index, BootstrapOutcome, ChatCompletionsModel, EmbeddingProvider, HashingEmbedder,
    IndexSource, LanguageModel, LocalIndex, OllamaEmbedder, QdrantIndex, QueryPipeline,
    VectorIndex, HASHING_EMBEDDER_MODEL,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub type SharedEmbedder = Arc<dyn EmbeddingProvider>;
pub type SharedIndex = Arc<dyn VectorIndex>;
pub type SharedModel = Arc<dyn LanguageModel>;
pub type AppPipeline = QueryPipeline<SharedEmbedder, SharedIndex, SharedModel>;

/// Process-wide, read-only context built once before serving.
pub struct AppState {
    pub pipeline: AppPipeline,
    pub request_timeout: Duration,
}

impl AppState {
    pub async fn initialize(config: &Config) -> anyhow::Result<Arc<Self>> {
        let embedding_model = match config.embedding_provider {
            EmbeddingBackend::Ollama => config.embedding_model.as_str(),
            EmbeddingBackend::Hashing => HASHING_EMBEDDER_MODEL,
        };
        let index = load_index(config, embedding_model).await?;

        let embedder: SharedEmbedder = match config.embedding_provider {
            EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(
                &config.embedding_url,
                config.embedding_model.clone(),
                config.provider_timeout(),
            )?),
            EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(index.dimension())),
        };

        let model: SharedModel = Arc::new(ChatCompletionsModel::new(
            &config.llm_url,
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            config.provider_timeout(),
        )?);

        let pipeline = QueryPipeline::new(embedder, index, model, config.pipeline_config())?;
        info!(
            top_k = pipeline.top_k(),
            llm_model = %config.llm_model,
            embedding_model = embedding_model,
            "pipeline ready"
        );

        Ok(Arc::new(Self {
            pipeline,
            request_timeout: config.request_timeout(),
        }))
    }
}

async fn load_index(config: &Config, embedding_model: &str) -> anyhow::Result<SharedIndex> {
    match config.index_backend {
        IndexBackend::Local => {
            let source = IndexSource {
                archive_url: config.index_archive_url.clone(),
                sha256: config.index_archive_sha256.clone(),
            };
            let outcome = ensure_index(&config.index_dir, &source)
                .await
                .with_context(|| format!("provisioning index at {}", config.index_dir.display()))?;
            if let BootstrapOutcome::Downloaded { bytes, entries } = outcome {
                info!(bytes, entries, "index archive downloaded");
            }

            let index = LocalIndex::load(&config.index_dir)
                .await
                .with_context(|| format!("loading index from {}", config.index_dir.display()))?;
            index.check_embedding_model(embedding_model)?;
            Ok(Arc::new(index))
        }
        IndexBackend::Qdrant => {
            let dimension = config
                .embedding_dimension
                .context("QA_EMBEDDING_DIMENSION is required for the qdrant backend")?;
            let index = QdrantIndex::new(
                &config.qdrant_url,
                &config.qdrant_collection,
                dimension,
                config.provider_timeout(),
            )?;
            index
                .verify()
                .await
                .with_context(|| {
                    format!("checking qdrant collection {}", config.qdrant_collection)
                })?;
            Ok(Arc::new(index))
        }
    }
}
