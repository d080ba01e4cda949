use crate::compressor::{CompressorConfig, RelevanceCompressor};
use crate::synthesizer::AnswerSynthesizer;
use crate::traits::{EmbeddingProvider, LanguageModel, VectorIndex};
use crate::{Answer, PipelineError, Stage};
use tracing::{debug, error, info};

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Retrieval fan-out.
    pub top_k: usize,
    pub compressor: CompressorConfig,
    /// Overrides the default grounded answer prompt.
    pub answer_template: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            compressor: CompressorConfig::default(),
            answer_template: None,
        }
    }
}

/// embed → retrieve → compress → synthesize, for one question at a time.
///
/// Holds no per-request state, so one instance serves concurrent questions.
pub struct QueryPipeline<E, V, M> {
    embedder: E,
    index: V,
    compressor: RelevanceCompressor<M>,
    synthesizer: AnswerSynthesizer<M>,
    top_k: usize,
}

impl<E, V, M> QueryPipeline<E, V, M>
where
    E: EmbeddingProvider,
    V: VectorIndex,
    M: LanguageModel + Clone,
{
    /// The same model judges relevance and writes the answer.
    pub fn new(
        embedder: E,
        index: V,
        model: M,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        if config.top_k == 0 {
            return Err(PipelineError::InvalidConfig(
                "top_k must be at least 1".to_string(),
            ));
        }

        let synthesizer = match config.answer_template.as_deref() {
            Some(template) => AnswerSynthesizer::with_template(model.clone(), template)?,
            None => AnswerSynthesizer::new(model.clone()),
        };

        Ok(Self {
            embedder,
            index,
            compressor: RelevanceCompressor::new(model, config.compressor),
            synthesizer,
            top_k: config.top_k,
        })
    }
}

impl<E, V, M> QueryPipeline<E, V, M>
where
    E: EmbeddingProvider,
    V: VectorIndex,
    M: LanguageModel,
{
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidQuestion(
                "question is empty".to_string(),
            ));
        }

        let result = self.run(question).await;
        if let Err(failure) = &result {
            error!(
                stage = %failure.stage(),
                kind = %failure.kind(),
                error = %failure,
                "question failed"
            );
        }
        result
    }

    async fn run(&self, question: &str) -> Result<Answer, PipelineError> {
        let vector = self
            .embedder
            .embed(question)
            .await
            .map_err(PipelineError::EmbeddingUnavailable)?;

        let expected = self.index.dimension();
        if vector.len() != expected {
            return Err(PipelineError::ProviderMismatch {
                stage: Stage::Embedding,
                expected,
                actual: vector.len(),
            });
        }
        debug!(model = self.embedder.model(), dimension = vector.len(), "embedded question");

        let candidates = self.index.query(&vector, self.top_k).await?;
        info!(candidates = candidates.len(), top_k = self.top_k, "retrieved candidates");

        let compressed = self.compressor.compress(question, &candidates).await?;

        self.synthesizer.synthesize(question, compressed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::stores::{IndexFile, LocalIndex, StoredDocument};
    use crate::{Candidate, Metadata, MetadataValue, ModelError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const DIMENSIONS: usize = 64;

    /// Judges a passage relevant when it mentions the last word of the
    /// question; answers by echoing the context it was given.
    #[derive(Clone, Default)]
    struct EchoModel;

    fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
        text.split_once(start)
            .and_then(|(_, rest)| rest.split_once(end))
            .map(|(inner, _)| inner)
            .unwrap_or_default()
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn model(&self) -> &str {
            "echo"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
            if prompt.starts_with("Given the following question and context") {
                let question = between(prompt, "> Question: ", "\n> Context:");
                let context = between(prompt, ">>>\n", "\n>>>");
                let keyword = question
                    .split_whitespace()
                    .last()
                    .unwrap_or_default()
                    .trim_end_matches('?')
                    .to_lowercase();
                tokio::time::sleep(Duration::from_millis((context.len() % 7) as u64)).await;
                return Ok(if context.to_lowercase().contains(&keyword) {
                    context.to_string()
                } else {
                    "NO_OUTPUT".to_string()
                });
            }

            let context = between(prompt, "context:\n", "\nQuestion: ");
            Ok(if context.trim().is_empty() {
                "I don't know; the context does not contain the answer.".to_string()
            } else {
                format!("According to the context: {context}")
            })
        }
    }

    struct TimedOutEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TimedOutEmbedder {
        fn model(&self) -> &str {
            "slow"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            Err(ModelError::Timeout {
                provider: "slow".to_string(),
                elapsed: Duration::from_secs(60),
            })
        }
    }

    struct CountingIndex {
        inner: LocalIndex,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for CountingIndex {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>, PipelineError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.query(vector, k).await
        }
    }

    fn document(id: &str, text: &str, page: u64) -> StoredDocument {
        let mut metadata = Metadata::new();
        metadata.insert("page".to_string(), MetadataValue::from(page));
        metadata.insert("source".to_string(), MetadataValue::from("doc.pdf"));
        StoredDocument {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
            embedding: HashingEmbedder::new(DIMENSIONS).embed_text(text),
        }
    }

    fn counting_index() -> CountingIndex {
        let inner = LocalIndex::from_file(IndexFile {
            dimension: DIMENSIONS,
            embedding_model: None,
            documents: vec![
                document("fr", "Paris is the capital of France.", 1),
                document("de", "Berlin is the capital of Germany.", 2),
                document("it", "Rome is the capital of Italy.", 3),
            ],
        })
        .unwrap();
        CountingIndex {
            inner,
            queries: AtomicUsize::new(0),
        }
    }

    fn pipeline() -> QueryPipeline<HashingEmbedder, CountingIndex, EchoModel> {
        QueryPipeline::new(
            HashingEmbedder::new(DIMENSIONS),
            counting_index(),
            EchoModel,
            PipelineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn answers_from_the_relevant_document() {
        let answer = pipeline()
            .answer("What is the capital of France?")
            .await
            .expect("pipeline should answer");

        assert!(answer.text.contains("Paris"));
        assert_eq!(answer.evidence.len(), 1);
        assert_eq!(answer.evidence[0].document_id, "fr");
        assert!(answer.evidence[0].text.contains("Paris"));

        let documents = answer.supporting_documents();
        assert_eq!(documents[0].page, "1");
        assert_eq!(documents[0].link, "doc.pdf");
    }

    #[tokio::test]
    async fn unrelated_question_yields_no_evidence() {
        let answer = pipeline()
            .answer("Who painted the Mona Lisa?")
            .await
            .expect("an empty context is not an error");

        assert!(answer.evidence.is_empty());
        assert!(answer.text.contains("don't know"));
    }

    #[tokio::test]
    async fn embedding_timeout_never_reaches_the_index() {
        let pipeline = QueryPipeline::new(
            TimedOutEmbedder,
            counting_index(),
            EchoModel,
            PipelineConfig::default(),
        )
        .unwrap();

        let error = pipeline.answer("What is the capital of France?").await.unwrap_err();
        assert_eq!(error.stage(), Stage::Embedding);
        assert!(matches!(error, PipelineError::EmbeddingUnavailable(_)));
        assert_eq!(pipeline.index().queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_before_retrieval() {
        let pipeline = QueryPipeline::new(
            HashingEmbedder::new(DIMENSIONS * 2),
            counting_index(),
            EchoModel,
            PipelineConfig::default(),
        )
        .unwrap();

        let error = pipeline.answer("What is the capital of France?").await.unwrap_err();
        assert!(matches!(error, PipelineError::ProviderMismatch { .. }));
        assert_eq!(pipeline.index().queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let pipeline = pipeline();
        let error = pipeline.answer("   ").await.unwrap_err();
        assert!(matches!(error, PipelineError::InvalidQuestion(_)));
        assert_eq!(pipeline.index().queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_questions_give_identical_answers() {
        let pipeline = pipeline();
        let first = pipeline.answer("What is the capital of Italy?").await.unwrap();
        let second = pipeline.answer("What is the capital of Italy?").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_questions_keep_their_own_evidence() {
        let pipeline = Arc::new(pipeline());
        let questions = [
            ("What is the capital of France?", "Paris"),
            ("What is the capital of Germany?", "Berlin"),
            ("What is the capital of Italy?", "Rome"),
        ];

        let handles: Vec<_> = questions
            .iter()
            .cycle()
            .take(12)
            .map(|&(question, city)| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { (pipeline.answer(question).await, city) })
            })
            .collect();

        for handle in handles {
            let (answer, city) = handle.await.unwrap();
            let answer = answer.unwrap();
            assert_eq!(answer.evidence.len(), 1);
            assert!(answer.evidence[0].text.contains(city));
            assert!(answer.text.contains(city));
        }
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let config = PipelineConfig {
            top_k: 0,
            ..PipelineConfig::default()
        };
        let result =
            QueryPipeline::new(HashingEmbedder::default(), counting_index(), EchoModel, config);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}
