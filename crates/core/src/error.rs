use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single call to a remote model (embedding or generation).
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(reqwest::Error),

    #[error("{provider} timed out after {elapsed:?}")]
    Timeout { provider: String, elapsed: Duration },

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {provider}: {details}")]
    Malformed { provider: String, details: String },
}

impl ModelError {
    pub fn malformed(provider: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Malformed {
            provider: provider.into(),
            details: details.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status: 429, .. })
    }

    pub(crate) fn from_reqwest(provider: &str, timeout: Duration, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                provider: provider.to_string(),
                elapsed: timeout,
            }
        } else if error.is_decode() {
            Self::malformed(provider, error.to_string())
        } else {
            Self::Http(error)
        }
    }
}

/// Error taxonomy shared by logs and the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmbeddingUnavailable,
    ProviderMismatch,
    JudgePartialFailure,
    CompressionUnavailable,
    GenerationUnavailable,
    IndexUnavailable,
    InvalidQuestion,
    InvalidConfig,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddingUnavailable => "embedding_unavailable",
            Self::ProviderMismatch => "provider_mismatch",
            Self::JudgePartialFailure => "judge_partial_failure",
            Self::CompressionUnavailable => "compression_unavailable",
            Self::GenerationUnavailable => "generation_unavailable",
            Self::IndexUnavailable => "index_unavailable",
            Self::InvalidQuestion => "invalid_question",
            Self::InvalidConfig => "invalid_config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Request,
    Embedding,
    Retrieval,
    Compression,
    Synthesis,
    Bootstrap,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Embedding => "embedding",
            Self::Retrieval => "retrieval",
            Self::Compression => "compression",
            Self::Synthesis => "synthesis",
            Self::Bootstrap => "bootstrap",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("embedding stage failed: {0}")]
    EmbeddingUnavailable(#[source] ModelError),

    #[error("{stage} stage failed: embedding dimension {actual} does not match index dimension {expected}")]
    ProviderMismatch {
        stage: Stage,
        expected: usize,
        actual: usize,
    },

    #[error("compression stage failed: all {failed} judge calls failed, last error: {last_error}")]
    CompressionUnavailable { failed: usize, last_error: String },

    #[error("synthesis stage failed: {0}")]
    GenerationUnavailable(#[source] ModelError),

    #[error("retrieval stage failed: {0}")]
    IndexUnavailable(String),

    #[error("request rejected: {0}")]
    InvalidQuestion(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmbeddingUnavailable(_) => ErrorKind::EmbeddingUnavailable,
            Self::ProviderMismatch { .. } => ErrorKind::ProviderMismatch,
            Self::CompressionUnavailable { .. } => ErrorKind::CompressionUnavailable,
            Self::GenerationUnavailable(_) => ErrorKind::GenerationUnavailable,
            Self::IndexUnavailable(_) => ErrorKind::IndexUnavailable,
            Self::InvalidQuestion(_) => ErrorKind::InvalidQuestion,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::EmbeddingUnavailable(_) => Stage::Embedding,
            Self::ProviderMismatch { stage, .. } => *stage,
            Self::CompressionUnavailable { .. } => Stage::Compression,
            Self::GenerationUnavailable(_) => Stage::Synthesis,
            Self::IndexUnavailable(_) => Stage::Retrieval,
            Self::InvalidQuestion(_) | Self::InvalidConfig(_) => Stage::Request,
        }
    }
}

/// Failures while provisioning or loading the index before serving.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive download from {url} returned status {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),

    #[error("archive checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("index file {path} is corrupt: {details}")]
    CorruptIndex { path: String, details: String },

    #[error("embedding model {configured} does not match index model {indexed}")]
    ProviderMismatch { configured: String, indexed: String },
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderMismatch { .. } => ErrorKind::ProviderMismatch,
            _ => ErrorKind::IndexUnavailable,
        }
    }
}
