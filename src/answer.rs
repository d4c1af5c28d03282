//! Answer generation behind an async trait, with an OpenAI-compatible
//! chat-completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::KbError;

/// Suggestions served when the model fails to produce usable ones.
pub const DEFAULT_SUGGESTIONS: [&str; 3] = [
    "What can you tell me about this website?",
    "What are the main topics covered here?",
    "How can I get in touch?",
];

/// Maximum follow-up suggestions returned per answer.
pub const MAX_SUGGESTIONS: usize = 3;

/// Produces grounded answers and follow-up suggestions.
#[async_trait]
pub trait Answerer: Send + Sync {
    /// Answers `question` using only the supplied context passages.
    async fn answer(&self, question: &str, context: &[String]) -> Result<String, KbError>;

    /// Proposes follow-up questions for a finished exchange. Failures
    /// should be rare but are recoverable; callers fall back to
    /// [`DEFAULT_SUGGESTIONS`].
    async fn suggest(&self, question: &str, answer: &str) -> Result<Vec<String>, KbError>;
}

/// Strips list markers from model-produced suggestion lines and keeps at
/// most [`MAX_SUGGESTIONS`] non-empty ones.
pub fn clean_suggestions(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_SUGGESTIONS)
        .collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Answerer speaking the OpenAI-compatible `/chat/completions` wire shape.
pub struct HttpAnswerer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpAnswerer {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, KbError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: 0.2,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KbError::Answer(format!("provider returned {status}: {body}")));
        }
        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(KbError::Answer("provider returned an empty answer".to_string()));
        }
        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }
}

#[async_trait]
impl Answerer for HttpAnswerer {
    async fn answer(&self, question: &str, context: &[String]) -> Result<String, KbError> {
        let system = "You answer questions about a website using only the provided context \
                      passages. Each passage starts with a SOURCE line naming where it came \
                      from. If the context does not cover the question, say so.";
        let user = format!("Context:\n{}\n\nQuestion: {question}", context.join("\n\n"));
        self.complete(system, user).await
    }

    async fn suggest(&self, question: &str, answer: &str) -> Result<Vec<String>, KbError> {
        let system = "Given a question and its answer, propose three short follow-up \
                      questions a visitor might ask next. One per line, no numbering.";
        let user = format!("Question: {question}\nAnswer: {answer}");
        let raw = self.complete(system, user).await?;
        Ok(clean_suggestions(&raw))
    }
}
