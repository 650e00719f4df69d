//! AI summarization path.
//!
//! A [`Summarizer`] turns a query into free text that may contain markdown
//! links and a trailing `SOURCES:` block. [`OpenAiSummarizer`] talks to any
//! OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::citations::{clean_ai_tags, parse_citations, strip_urls};
use crate::fetcher_http::default_client;
use crate::{AiSummary, Result, SearchError};

/// Default model for the OpenAI-compatible summarizer.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Request timeout used unless [`OpenAiSummarizer::with_timeout`] overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Raw model output: the answer and, for reasoning models, the reasoning
/// trace (which can carry tool-call URLs).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryDraft {
    pub content: String,
    pub reasoning: String,
}

impl SummaryDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: String::new(),
        }
    }

    /// Splits the draft into summary text and citations.
    ///
    /// Citations are taken from both the answer and the reasoning trace; the
    /// summary text comes from the answer only, with reasoning tags, links,
    /// and the sources section removed.
    pub fn into_summary(self) -> AiSummary {
        let source = if self.reasoning.is_empty() {
            self.content.clone()
        } else {
            format!("{}\n{}", self.content, self.reasoning)
        };
        let citations = parse_citations(&source);
        let text = strip_urls(&clean_ai_tags(&self.content));
        AiSummary { text, citations }
    }
}

/// Produces a summary for a search query.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Identifier recorded in diagnostics.
    fn name(&self) -> &str;

    async fn summarize(&self, query: &str) -> Result<SummaryDraft>;
}

/// Prompt sent to the model. The answer must avoid inline URLs and end with
/// a `SOURCES:` block of at most 30 URLs.
pub fn build_prompt(query: &str) -> String {
    format!(
        "You are a research search assistant. Search the web, cross-check what you find, \
         and give a detailed, accurate answer without inventing facts.\n\
         Output rules:\n\
         1) Body: plain prose. Do not output any URL or link (nothing starting with http, \
         https or www) and no \"Sources\"/\"References\" heading.\n\
         2) Finish with a SOURCES section: a line containing only 'SOURCES:', followed by \
         one source URL per line that you consulted (at most 30).\n\
         Question: {query}"
    )
}

/// Summarizer backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiSummarizer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiSummarizer {
    /// Creates a summarizer for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: default_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default, alias = "delta")]
    message: Option<Message>,
}

#[derive(Deserialize, Default)]
struct Message {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn summarize(&self, query: &str) -> Result<SummaryDraft> {
        let prompt = build_prompt(query);
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            stream: false,
        };

        debug!(model = %self.model, "requesting summary");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("accept", "application/json, text/event-stream")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(SearchError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::HttpStatus {
                status: status.as_u16(),
                url: self.endpoint(),
            });
        }

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let body = response.text().await.map_err(SearchError::from_transport)?;

        if is_sse {
            Ok(parse_event_stream(&body))
        } else {
            parse_json_reply(&body)
        }
    }
}

fn parse_json_reply(body: &str) -> Result<SummaryDraft> {
    let reply: ChatResponse = serde_json::from_str(body)
        .map_err(|e| SearchError::Parse(format!("chat completion response: {e}")))?;
    let message = reply
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| SearchError::Parse("chat completion without choices".to_string()))?;

    Ok(SummaryDraft {
        content: message.content.unwrap_or_default(),
        reasoning: message.reasoning_content.unwrap_or_default(),
    })
}

/// Concatenates the deltas of a server-sent event stream. Servers that
/// ignore `stream: false` answer this way.
fn parse_event_stream(body: &str) -> SummaryDraft {
    let mut draft = SummaryDraft::default();
    for line in body.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            break;
        }
        let Ok(chunk) = serde_json::from_str::<ChatResponse>(data) else {
            continue;
        };
        for message in chunk.choices.into_iter().filter_map(|c| c.message) {
            if let Some(content) = message.content {
                draft.content.push_str(&content);
            }
            if let Some(reasoning) = message.reasoning_content {
                draft.reasoning.push_str(&reasoning);
            }
        }
    }
    draft
}
