use crate::prompt::PromptTemplate;
use crate::traits::LanguageModel;
use crate::{Answer, CompressedCandidate, ModelError, PipelineError};
use tracing::info;

pub const DEFAULT_ANSWER_TEMPLATE: &str =
    "Answer the question based ONLY on the following context:\n{context}\nQuestion: {question}\n";

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Builds the grounded prompt and asks the model for the final answer.
pub struct AnswerSynthesizer<M> {
    model: M,
    template: PromptTemplate,
}

impl<M> AnswerSynthesizer<M>
where
    M: LanguageModel,
{
    pub fn new(model: M) -> Self {
        Self {
            model,
            template: PromptTemplate::from_static(
                DEFAULT_ANSWER_TEMPLATE,
                &["context", "question"],
            ),
        }
    }

    /// Replaces the default template; it must contain `{context}` and `{question}`.
    pub fn with_template(model: M, template: &str) -> Result<Self, PipelineError> {
        Ok(Self {
            model,
            template: PromptTemplate::new(template, &["context", "question"])?,
        })
    }

    pub fn template(&self) -> &str {
        self.template.as_str()
    }

    pub fn build_prompt(&self, question: &str, compressed: &[CompressedCandidate]) -> String {
        let context = compressed
            .iter()
            .map(|candidate| candidate.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        self.template
            .render(&[("context", context.as_str()), ("question", question)])
    }

    /// Generation runs even with no evidence; the template then constrains the
    /// model to an empty context.
    pub async fn synthesize(
        &self,
        question: &str,
        compressed: Vec<CompressedCandidate>,
    ) -> Result<Answer, PipelineError> {
        let prompt = self.build_prompt(question, &compressed);
        let text = self
            .model
            .generate(&prompt)
            .await
            .map_err(PipelineError::GenerationUnavailable)?;

        if text.trim().is_empty() {
            return Err(PipelineError::GenerationUnavailable(ModelError::malformed(
                self.model.model(),
                "empty answer",
            )));
        }

        info!(evidence = compressed.len(), answer_chars = text.len(), "synthesized answer");
        Ok(Answer {
            question: question.to_string(),
            text,
            evidence: compressed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metadata;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        fn model(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .ok_or_else(|| ModelError::malformed("recording", "no reply configured"))
        }
    }

    fn compressed(text: &str, rank: usize) -> CompressedCandidate {
        CompressedCandidate {
            document_id: format!("doc-{rank}"),
            rank,
            score: 0.5,
            text: text.to_string(),
            metadata: Metadata::new(),
            relevance: None,
        }
    }

    #[test]
    fn default_template_validates() {
        assert!(PromptTemplate::new(DEFAULT_ANSWER_TEMPLATE, &["context", "question"]).is_ok());
    }

    #[tokio::test]
    async fn prompt_joins_context_with_blank_lines() {
        let model = RecordingModel {
            reply: Some("Paris".to_string()),
            ..Default::default()
        };
        let synthesizer = AnswerSynthesizer::new(model);
        let answer = synthesizer
            .synthesize(
                "What is the capital of France?",
                vec![compressed("Paris is the capital.", 0), compressed("France is in Europe.", 1)],
            )
            .await
            .unwrap();

        let prompts = synthesizer.model.prompts.lock().unwrap();
        assert_eq!(
            prompts[0],
            "Answer the question based ONLY on the following context:\nParis is the capital.\n\nFrance is in Europe.\nQuestion: What is the capital of France?\n"
        );
        assert_eq!(answer.text, "Paris");
        assert_eq!(answer.evidence.len(), 2);
    }

    #[tokio::test]
    async fn empty_evidence_still_generates() {
        let model = RecordingModel {
            reply: Some("I don't know based on the context.".to_string()),
            ..Default::default()
        };
        let synthesizer = AnswerSynthesizer::new(model);
        let answer = synthesizer.synthesize("Who won?", Vec::new()).await.unwrap();

        assert!(answer.evidence.is_empty());
        let prompts = synthesizer.model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("context:\n\nQuestion: Who won?"));
    }

    #[tokio::test]
    async fn model_failure_is_generation_unavailable() {
        let synthesizer = AnswerSynthesizer::new(RecordingModel::default());
        let error = synthesizer.synthesize("q", Vec::new()).await.unwrap_err();
        assert!(matches!(error, PipelineError::GenerationUnavailable(_)));
    }

    #[tokio::test]
    async fn blank_answer_is_generation_unavailable() {
        let model = RecordingModel {
            reply: Some("  \n".to_string()),
            ..Default::default()
        };
        let error = AnswerSynthesizer::new(model)
            .synthesize("q", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::GenerationUnavailable(_)));
    }

    #[test]
    fn custom_template_is_used_and_validated() {
        assert!(
            AnswerSynthesizer::with_template(RecordingModel::default(), "no placeholders").is_err()
        );

        let synthesizer =
            AnswerSynthesizer::with_template(RecordingModel::default(), "Q={question} C={context}")
                .unwrap();
        assert_eq!(
            synthesizer.build_prompt("why", &[compressed("because", 0)]),
            "Q=why C=because"
        );
    }
}
