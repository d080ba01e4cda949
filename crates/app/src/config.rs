use clap::{Parser, ValueEnum};
use grounded_qa_core::{
    CompressionOrder, CompressorConfig, PipelineConfig, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL,
    DEFAULT_OLLAMA_MODEL, DEFAULT_TOP_K,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexBackend {
    /// `index.json` in the index directory, loaded into memory.
    Local,
    /// A remote Qdrant collection.
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingBackend {
    Ollama,
    /// Offline trigram hashing; only for indexes built with it.
    Hashing,
}

/// Every option can also be given through its environment variable.
#[derive(Parser)]
#[command(name = "grounded-qa", version, about = "Answer questions from a prebuilt document index")]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "QA_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Vector index backend
    #[arg(long, env = "QA_INDEX_BACKEND", value_enum, default_value = "local")]
    pub index_backend: IndexBackend,

    /// Directory holding the unpacked local index
    #[arg(long, env = "QA_INDEX_DIR", default_value = "vector_db")]
    pub index_dir: PathBuf,

    /// Zip archive fetched when the index directory is missing
    #[arg(long, env = "QA_INDEX_ARCHIVE_URL")]
    pub index_archive_url: Option<String>,

    /// Expected sha256 of the index archive
    #[arg(long, env = "QA_INDEX_ARCHIVE_SHA256")]
    pub index_archive_sha256: Option<String>,

    /// Qdrant base URL
    #[arg(long, env = "QA_QDRANT_URL", default_value = "http://localhost:6333")]
    pub qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QA_QDRANT_COLLECTION", default_value = "documents")]
    pub qdrant_collection: String,

    /// Vector dimension of the remote collection
    #[arg(long, env = "QA_EMBEDDING_DIMENSION")]
    pub embedding_dimension: Option<usize>,

    /// Embedding provider
    #[arg(long, env = "QA_EMBEDDING_PROVIDER", value_enum, default_value = "ollama")]
    pub embedding_provider: EmbeddingBackend,

    /// Ollama base URL
    #[arg(long, env = "QA_EMBEDDING_URL", default_value = "http://localhost:11434")]
    pub embedding_url: String,

    /// Embedding model; must be the one the index was built with
    #[arg(long, env = "QA_EMBEDDING_MODEL", default_value = DEFAULT_OLLAMA_MODEL)]
    pub embedding_model: String,

    /// OpenAI-compatible chat completions base URL
    #[arg(long, env = "QA_LLM_URL", default_value = DEFAULT_CHAT_BASE_URL)]
    pub llm_url: String,

    /// Chat model used for relevance judging and answering
    #[arg(long, env = "QA_LLM_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub llm_model: String,

    /// API key for the chat completions endpoint
    #[arg(long, env = "QA_LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: String,

    /// Number of candidates retrieved per question
    #[arg(long, env = "QA_TOP_K", default_value_t = DEFAULT_TOP_K, value_parser = parse_top_k)]
    pub top_k: usize,

    /// `retrieval` keeps index order, `judged-relevance` sorts by judge score
    #[arg(long, env = "QA_COMPRESSION_ORDER", default_value = "retrieval")]
    pub compression_order: CompressionOrder,

    /// Judge calls in flight per question
    #[arg(long, env = "QA_JUDGE_CONCURRENCY", default_value_t = 4)]
    pub judge_concurrency: usize,

    /// Timeout for each embedding or language model call
    #[arg(long, env = "QA_PROVIDER_TIMEOUT_SECS", default_value_t = 60)]
    pub provider_timeout_secs: u64,

    /// Deadline for a whole /ask request
    #[arg(long, env = "QA_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Replacement for the grounded answer prompt; needs {context} and {question}
    #[arg(long, env = "QA_ANSWER_TEMPLATE")]
    pub answer_template: Option<String>,
}

fn parse_top_k(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("top_k must be at least 1".to_string()),
        Ok(k) => Ok(k),
        Err(error) => Err(error.to_string()),
    }
}

impl Config {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            top_k: self.top_k,
            compressor: CompressorConfig {
                order: self.compression_order,
                concurrency: self.judge_concurrency.max(1),
                judge_timeout: Some(self.provider_timeout()),
                ..CompressorConfig::default()
            },
            answer_template: self.answer_template.clone(),
        }
    }
}
