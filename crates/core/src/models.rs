use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Placeholder used in the HTTP response when a document lacks page or source metadata.
pub const MISSING_METADATA: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A stored unit of the index. Read-only at query time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn metadata_text(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(ToString::to_string)
    }
}

/// A document returned by one retrieval call, with its position and similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub document: Document,
    /// Zero-based position in the retrieval order.
    pub rank: usize,
    pub score: f32,
}

/// A candidate kept by the compressor; `text` holds the extracted excerpt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressedCandidate {
    pub document_id: String,
    pub rank: usize,
    pub score: f32,
    pub text: String,
    pub metadata: Metadata,
    /// Judge score, only present when the compressor was asked to rate relevance.
    pub relevance: Option<f32>,
}

impl CompressedCandidate {
    pub fn from_candidate(candidate: &Candidate, excerpt: String, relevance: Option<f32>) -> Self {
        Self {
            document_id: candidate.document.id.clone(),
            rank: candidate.rank,
            score: candidate.score,
            text: excerpt,
            metadata: candidate.document.metadata.clone(),
            relevance,
        }
    }

    fn metadata_or_missing(&self, key: &str) -> String {
        self.metadata
            .get(key)
            .map(ToString::to_string)
            .unwrap_or_else(|| MISSING_METADATA.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub evidence: Vec<CompressedCandidate>,
}

impl Answer {
    pub fn supporting_documents(&self) -> Vec<SupportingDocument> {
        self.evidence.iter().map(SupportingDocument::from).collect()
    }
}

/// Caller-facing view of one piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingDocument {
    pub page: String,
    pub link: String,
    pub snippet: String,
}

impl From<&CompressedCandidate> for SupportingDocument {
    fn from(candidate: &CompressedCandidate) -> Self {
        Self {
            page: candidate.metadata_or_missing("page"),
            link: candidate.metadata_or_missing("source"),
            snippet: candidate.text.clone(),
        }
    }
}

/// How the compressor orders the candidates it keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionOrder {
    #[default]
    Retrieval,
    JudgedRelevance,
}

impl FromStr for CompressionOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "retrieval" => Ok(Self::Retrieval),
            "judged-relevance" | "judged_relevance" | "relevance" => Ok(Self::JudgedRelevance),
            other => Err(format!(
                "unknown compression order `{other}` (expected `retrieval` or `judged-relevance`)"
            )),
        }
    }
}
