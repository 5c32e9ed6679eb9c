//! Question-answering prompt assembly.

/// Default "stuff" template: every retrieved passage goes into one prompt.
pub const DEFAULT_QA_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.

{context}

Question: {question}
Helpful Answer:";

/// A template with `{context}` and `{question}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_QA_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Returns `None` unless both placeholders are present.
    pub fn new(template: impl Into<String>) -> Option<Self> {
        let template = template.into();
        (template.contains("{context}") && template.contains("{question}"))
            .then_some(Self { template })
    }

    /// Fill the template. Passages appear in the given order, separated by blank lines.
    pub fn render<S: AsRef<str>>(&self, passages: &[S], question: &str) -> String {
        let context = passages
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n\n");
        // Placeholders are only recognised in the template itself, never in
        // substituted passage or question text.
        self.template
            .split("{context}")
            .map(|part| part.replace("{question}", question))
            .collect::<Vec<_>>()
            .join(&context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default_template() {
        let prompt = PromptTemplate::default().render(&["alpha", "beta"], "Why?");
        assert_eq!(
            prompt,
            "Use the following pieces of context to answer the question at the end. \
             If you don't know the answer, just say that you don't know, don't try to make up an answer.\
             \n\nalpha\n\nbeta\n\nQuestion: Why?\nHelpful Answer:"
        );
    }

    #[test]
    fn test_passage_order_preserved() {
        let prompt = PromptTemplate::default().render(&["second", "first"], "q");
        let second = prompt.find("second").unwrap();
        let first = prompt.find("first").unwrap();
        assert!(second < first);
    }

    #[test]
    fn test_placeholders_in_passages_are_literal() {
        let prompt = PromptTemplate::new("{context} | {question}")
            .unwrap()
            .render(&["see {question} here"], "real?");
        assert_eq!(prompt, "see {question} here | real?");
    }

    #[test]
    fn test_custom_template_requires_placeholders() {
        assert!(PromptTemplate::new("no placeholders").is_none());
        assert!(PromptTemplate::new("{context} only").is_none());
        let custom = PromptTemplate::new("Q={question} C={context}").unwrap();
        assert_eq!(custom.render(&["x"], "y"), "Q=y C=x");
    }
}
