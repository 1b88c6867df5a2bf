use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use stream::{ChatMessage, GenerationOptions};
use tracing::debug;

use crate::error::QueryError;

pub type TokenStream = BoxStream<'static, Result<String, QueryError>>;

/// Streaming text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream, QueryError>;
}

#[derive(Clone)]
pub struct QueryLLM {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

enum Line {
    Skip,
    Token(String),
    Done,
    Failed(String),
}

fn parse_line(line: &[u8]) -> Line {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Line::Skip;
    }
    match serde_json::from_slice::<OllamaChatChunk>(trimmed) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return Line::Failed(error);
            }
            match chunk.message {
                Some(m) if !m.content.is_empty() => Line::Token(m.content),
                _ if chunk.done => Line::Done,
                _ => Line::Skip,
            }
        }
        Err(e) => {
            debug!(error = %e, "Skipping unparseable generation line");
            Line::Skip
        }
    }
}

impl QueryLLM {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new("http://localhost:11434".to_string())
    }
}

#[async_trait]
impl Generator for QueryLLM {
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream, QueryError> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaChatRequest {
            model,
            messages,
            stream: true,
            options: (options.temperature.is_some() || options.max_tokens.is_some()).then(|| OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            }),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| QueryError::Generation(format!("Failed to send request to Ollama: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Configuration(format!("Ollama rejected model {}: {}", model, body)));
        }
        if !status.is_success() {
            return Err(QueryError::Generation(format!("Ollama request failed: {}", status)));
        }

        let bytes = response.bytes_stream().boxed();
        let tokens = futures::stream::unfold((bytes, Vec::<u8>::new(), false), |(mut bytes, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_line(&line) {
                        Line::Skip => continue,
                        Line::Token(token) => return Some((Ok(token), (bytes, buffer, false))),
                        Line::Done => return None,
                        Line::Failed(message) => {
                            return Some((Err(QueryError::Generation(message)), (bytes, buffer, true)));
                        }
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        let err = QueryError::Generation(format!("Generation stream broke: {}", e));
                        return Some((Err(err), (bytes, buffer, true)));
                    }
                    None => {
                        let tail = std::mem::take(&mut buffer);
                        return match parse_line(&tail) {
                            Line::Token(token) => Some((Ok(token), (bytes, buffer, true))),
                            Line::Failed(message) => {
                                Some((Err(QueryError::Generation(message)), (bytes, buffer, true)))
                            }
                            Line::Skip | Line::Done => None,
                        };
                    }
                }
            }
        });

        Ok(tokens.boxed())
    }
}
