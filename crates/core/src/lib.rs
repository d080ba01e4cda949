pub mod bootstrap;
pub mod compressor;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod stores;
pub mod synthesizer;
pub mod traits;

pub use bootstrap::{ensure_index, BootstrapOutcome, IndexSource};
pub use compressor::{CompressorConfig, RelevanceCompressor, DEFAULT_JUDGE_TEMPLATE, NO_OUTPUT};
pub use embeddings::{
    HashingEmbedder, OllamaEmbedder, DEFAULT_OLLAMA_MODEL, DEFAULT_PROVIDER_TIMEOUT,
    HASHING_EMBEDDER_MODEL,
};
pub use error::{BootstrapError, ErrorKind, ModelError, PipelineError, Stage};
pub use llm::{ChatCompletionsModel, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL};
pub use models::{
    Answer, Candidate, CompressedCandidate, CompressionOrder, Document, Metadata, MetadataValue,
    SupportingDocument,
};
pub use pipeline::{PipelineConfig, QueryPipeline, DEFAULT_TOP_K};
pub use prompt::PromptTemplate;
pub use stores::{LocalIndex, QdrantIndex};
pub use synthesizer::{AnswerSynthesizer, DEFAULT_ANSWER_TEMPLATE};
pub use traits::{EmbeddingProvider, LanguageModel, VectorIndex};
