use crate::PipelineError;

/// A prompt with `{name}` placeholders, checked once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    placeholders: Vec<&'static str>,
}

impl PromptTemplate {
    pub fn new(
        template: impl Into<String>,
        placeholders: &[&'static str],
    ) -> Result<Self, PipelineError> {
        let template = template.into();
        let missing: Vec<_> = placeholders
            .iter()
            .filter(|name| !template.contains(&format!("{{{name}}}")))
            .map(|name| format!("{{{name}}}"))
            .collect();

        if !missing.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "prompt template is missing {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            template,
            placeholders: placeholders.to_vec(),
        })
    }

    /// For compiled-in templates whose placeholders are covered by tests.
    pub(crate) fn from_static(template: &'static str, placeholders: &[&'static str]) -> Self {
        Self {
            template: template.to_string(),
            placeholders: placeholders.to_vec(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitutes placeholders in one pass; substituted values are never re-expanded.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut output = String::with_capacity(
            self.template.len() + values.iter().map(|(_, value)| value.len()).sum::<usize>(),
        );
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            output.push_str(&rest[..open]);
            let tail = &rest[open..];

            let matched = self.placeholders.iter().find_map(|name| {
                let token_len = name.len() + 2;
                let is_token = tail.len() >= token_len
                    && tail[1..].starts_with(name)
                    && tail[1 + name.len()..].starts_with('}');
                is_token.then(|| {
                    let value = values
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| *value)
                        .unwrap_or_default();
                    (token_len, value)
                })
            });

            match matched {
                Some((token_len, value)) => {
                    output.push_str(value);
                    rest = &tail[token_len..];
                }
                None => {
                    output.push('{');
                    rest = &tail[1..];
                }
            }
        }

        output.push_str(rest);
        output
    }
}
