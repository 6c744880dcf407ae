//! Question answering over the content index: retrieve the top-k chunks,
//! render them into a prompt, and hand the prompt to an [`Llm`].

pub mod openai;

use std::future::Future;

use crate::config::{AskConfig, LlmKind};
use crate::error::{PkbError, Result};
use crate::index::{ContentIndex, IndexedDocument};

pub use openai::OpenAiLlm;

/// Text generation backend
pub trait Llm {
    /// Answer a fully rendered prompt
    fn invoke(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Echoes the prompt back. Used in tests and offline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeLlm;

impl Llm for FakeLlm {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        Ok(format!("Generated answer for prompt: {}", prompt))
    }
}

/// LLM chosen by `[ask] llm` in the configuration
pub enum ConfiguredLlm {
    Fake(FakeLlm),
    OpenAi(OpenAiLlm),
}

impl ConfiguredLlm {
    pub fn from_config(config: &AskConfig) -> Result<Self> {
        match config.llm {
            LlmKind::Fake => Ok(Self::Fake(FakeLlm)),
            LlmKind::OpenAi => Ok(Self::OpenAi(OpenAiLlm::from_config(config)?)),
        }
    }
}

impl Llm for ConfiguredLlm {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        match self {
            Self::Fake(llm) => llm.invoke(prompt).await,
            Self::OpenAi(llm) => llm.invoke(prompt).await,
        }
    }
}

/// Prompt template
pub struct Prompt;

impl Prompt {
    const SEPARATOR: &'static str = "\n\n----------\n\n";

    pub fn render(question: &str, context: &[IndexedDocument]) -> String {
        let context = context
            .iter()
            .map(|doc| doc.text.as_str())
            .collect::<Vec<_>>()
            .join(Self::SEPARATOR);
        format!(
            "Q: {}\n\nContext: {}\n\nGenerate a concise answer based on the question and context.",
            question, context
        )
    }
}

/// Generated answer plus the files its context came from
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    /// Distinct source paths in retrieval order
    pub sources: Vec<String>,
}

/// Retrieve up to `k` chunks relevant to `question` and generate an answer.
pub async fn ask_question<L: Llm>(
    index: &dyn ContentIndex,
    llm: &L,
    question: &str,
    k: usize,
) -> Result<Answer> {
    if question.trim().is_empty() {
        return Err(PkbError::InvalidInput("question must not be empty".to_string()));
    }

    let context = index.similarity_search(question, k)?;
    log::info!("Retrieved {} chunk(s) for question", context.len());
    if context.is_empty() {
        log::warn!("No indexed content matched the question; answering without context");
    }

    let mut sources: Vec<String> = Vec::new();
    for doc in &context {
        if let Some(source) = doc.source() {
            if !sources.iter().any(|s| s == source) {
                sources.push(source.to_string());
            }
        }
    }

    let prompt = Prompt::render(question, &context);
    log::debug!("Prompt:\n{}", prompt);
    let answer = llm.invoke(&prompt).await?;

    Ok(Answer { answer, sources })
}
