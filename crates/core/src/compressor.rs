//! LLM-driven relevance filtering of retrieved candidates.
//!
//! Every candidate is shown to a judge model together with the question. The
//! judge answers with the verbatim excerpt that helps answer the question, or
//! with [`NO_OUTPUT`] when nothing in the passage is relevant.

use crate::prompt::PromptTemplate;
use crate::traits::LanguageModel;
use crate::{
    Candidate, CompressedCandidate, CompressionOrder, ErrorKind, ModelError, PipelineError,
};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker the judge returns when a passage holds nothing relevant.
pub const NO_OUTPUT: &str = "NO_OUTPUT";

pub const DEFAULT_JUDGE_TEMPLATE: &str = "Given the following question and context, extract any part of the context *AS IS* that is relevant to answer the question. If none of the context is relevant return NO_OUTPUT.\n\nRemember, *DO NOT* edit the extracted parts of the context.\n\n> Question: {question}\n> Context:\n>>>\n{context}\n>>>\nExtracted relevant parts:";

const SCORE_INSTRUCTION: &str = "Start your reply with a single line `SCORE: <0-10>` rating how relevant the context is to the question, then write your answer on the following lines.";

pub const DEFAULT_JUDGE_CONCURRENCY: usize = 4;

const PROVIDER: &str = "judge";

#[derive(Debug, Clone)]
pub struct CompressorConfig {
    pub template: PromptTemplate,
    pub order: CompressionOrder,
    /// Upper bound on judge calls in flight for one request.
    pub concurrency: usize,
    pub judge_timeout: Option<Duration>,
}

impl CompressorConfig {
    pub fn with_template(template: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            template: PromptTemplate::new(template, &["question", "context"])?,
            ..Self::default()
        })
    }
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            template: PromptTemplate::from_static(DEFAULT_JUDGE_TEMPLATE, &["question", "context"]),
            order: CompressionOrder::default(),
            concurrency: DEFAULT_JUDGE_CONCURRENCY,
            judge_timeout: None,
        }
    }
}

/// Parsed judge reply for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Judgement {
    Irrelevant,
    Relevant {
        excerpt: String,
        relevance: Option<f32>,
    },
}

fn score_line() -> &'static Regex {
    static SCORE: OnceLock<Regex> = OnceLock::new();
    SCORE.get_or_init(|| {
        Regex::new(r"(?i)^\s*score\s*:\s*(.*?)\s*$").expect("score regex is valid")
    })
}

/// Strict reading of a judge reply. `expect_score` enables the optional
/// leading `SCORE:` line; a reply without one keeps `relevance` unset.
///
/// A blank reply, or a score line followed by nothing, means nothing was
/// extracted, the same as [`NO_OUTPUT`].
pub fn parse_judgement(response: &str, expect_score: bool) -> Result<Judgement, ModelError> {
    let mut body = response.trim();
    let mut relevance = None;

    if expect_score {
        let (first, rest) = body.split_once('\n').unwrap_or((body, ""));
        if let Some(captures) = score_line().captures(first) {
            let raw = &captures[1];
            let score: f32 = raw
                .parse()
                .ok()
                .filter(|score: &f32| score.is_finite())
                .ok_or_else(|| {
                    ModelError::malformed(PROVIDER, format!("unreadable score `{raw}`"))
                })?;
            relevance = Some(score);
            body = rest.trim();
        }
    }

    if body.is_empty() || body.eq_ignore_ascii_case(NO_OUTPUT) {
        return Ok(Judgement::Irrelevant);
    }

    Ok(Judgement::Relevant {
        excerpt: body.to_string(),
        relevance,
    })
}

pub struct RelevanceCompressor<M> {
    model: M,
    config: CompressorConfig,
}

impl<M> RelevanceCompressor<M>
where
    M: LanguageModel,
{
    pub fn new(model: M, config: CompressorConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    fn build_prompt(&self, question: &str, candidate: &Candidate) -> String {
        let prompt = self.config.template.render(&[
            ("question", question),
            ("context", candidate.document.text.as_str()),
        ]);
        match self.config.order {
            CompressionOrder::Retrieval => prompt,
            CompressionOrder::JudgedRelevance => format!("{SCORE_INSTRUCTION}\n\n{prompt}"),
        }
    }

    async fn judge(&self, question: &str, candidate: &Candidate) -> Result<Judgement, ModelError> {
        let prompt = self.build_prompt(question, candidate);
        let response = match self.config.judge_timeout {
            Some(limit) => tokio::time::timeout(limit, self.model.generate(&prompt))
                .await
                .map_err(|_| ModelError::Timeout {
                    provider: PROVIDER.to_string(),
                    elapsed: limit,
                })??,
            None => self.model.generate(&prompt).await?,
        };
        parse_judgement(
            &response,
            self.config.order == CompressionOrder::JudgedRelevance,
        )
    }

    /// Keeps the candidates the judge finds relevant, each trimmed to its excerpt.
    ///
    /// Output is in input order unless [`CompressionOrder::JudgedRelevance`] is
    /// configured, in which case kept candidates are sorted by descending judge
    /// score with ties broken by retrieval rank. A failed judge call drops that
    /// candidate; only when every call fails is the request aborted.
    pub async fn compress(
        &self,
        question: &str,
        candidates: &[Candidate],
    ) -> Result<Vec<CompressedCandidate>, PipelineError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let judgements: Vec<_> = stream::iter(0..candidates.len())
            .map(|index| {
                let candidate = &candidates[index];
                async move { (candidate, self.judge(question, candidate).await) }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut kept = Vec::new();
        let mut failed = 0usize;
        let mut last_error = None;

        for (candidate, judgement) in judgements {
            match judgement {
                Ok(Judgement::Relevant { excerpt, relevance }) => {
                    kept.push(CompressedCandidate::from_candidate(candidate, excerpt, relevance));
                }
                Ok(Judgement::Irrelevant) => {
                    debug!(
                        document_id = %candidate.document.id,
                        rank = candidate.rank,
                        "judge dropped candidate"
                    );
                }
                Err(error) => {
                    warn!(
                        kind = %ErrorKind::JudgePartialFailure,
                        document_id = %candidate.document.id,
                        rank = candidate.rank,
                        error = %error,
                        "judge call failed, dropping candidate"
                    );
                    failed += 1;
                    last_error = Some(error);
                }
            }
        }

        if failed == candidates.len() {
            return Err(PipelineError::CompressionUnavailable {
                failed,
                last_error: last_error.map(|error| error.to_string()).unwrap_or_default(),
            });
        }

        if self.config.order == CompressionOrder::JudgedRelevance {
            kept.sort_by(|left, right| {
                let left_score = left.relevance.unwrap_or(f32::NEG_INFINITY);
                let right_score = right.relevance.unwrap_or(f32::NEG_INFINITY);
                right_score
                    .total_cmp(&left_score)
                    .then_with(|| left.rank.cmp(&right.rank))
            });
        }

        info!(
            candidates = candidates.len(),
            kept = kept.len(),
            failed,
            "compressed candidates"
        );
        Ok(kept)
    }
}
