// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (C) 2025 Jonathan D.A. Jewell

//! Chat Service - the boundary to a chat-completion model
//!
//! Every language-model call in the game goes through [`ChatService`]:
//! a request carries a model name, ordered role/content messages and
//! generation options, and the reply comes back as a single string made of
//! the streamed fragments concatenated in arrival order. Partial replies are
//! never exposed to callers.
//!
//! [`OllamaClient`] speaks the Ollama `/api/chat` wire format, which streams
//! newline-delimited JSON objects. [`FragmentDecoder`] turns that byte stream
//! back into text fragments.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

// ============ Messages ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Generation options. `num_predict` caps the reply length in tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

impl ChatOptions {
    pub fn new(temperature: f32, num_predict: u32) -> Self {
        Self {
            temperature,
            num_predict,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: ChatOptions,
    pub stream: bool,
}

impl ChatRequest {
    /// A system-role message followed by one user prompt, streamed
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
        options: ChatOptions,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            options,
            stream: true,
        }
    }

    /// Builder: toggle streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Content of the last user message
    pub fn prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Content of the first system message
    pub fn system(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

// ============ Errors ============

/// Transport and service failures. None of these are absorbed by callers.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat service timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("chat service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat service error: {0}")]
    Service(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    /// Whether asking the player to try again makes sense
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Timeout | ChatError::Transport(_) => true,
            ChatError::Status { status, .. } => *status == 429 || *status >= 500,
            ChatError::Service(_) | ChatError::Protocol(_) => false,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Transport(e.to_string())
        }
    }
}

// ============ Service Trait ============

/// A chat-completion endpoint
pub trait ChatService {
    /// Model identifier placed in every request
    fn model(&self) -> &str;

    /// Send a request and return the complete reply text
    fn chat(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<String, ChatError>> + Send;
}

impl<T: ChatService + Sync + ?Sized> ChatService for &T {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn chat(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<String, ChatError>> + Send {
        (**self).chat(request)
    }
}

impl<T: ChatService + Send + Sync> ChatService for Arc<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn chat(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<String, ChatError>> + Send {
        (**self).chat(request)
    }
}

// ============ Stream Decoding ============

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental decoder for newline-delimited JSON chat replies.
///
/// Chunks may split lines (and multi-byte characters) anywhere; bytes are
/// held until a full line is available. A non-streamed reply is a single
/// unterminated object, which [`FragmentDecoder::finish`] picks up.
#[derive(Debug, Default)]
pub struct FragmentDecoder {
    pending: Vec<u8>,
}

impl FragmentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the fragments of every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ChatError> {
        self.pending.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(fragment) = decode_line(&line[..pos])? {
                fragments.push(fragment);
            }
        }
        Ok(fragments)
    }

    /// Decode whatever is left after the last newline
    pub fn finish(&mut self) -> Result<Option<String>, ChatError> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest)
    }

    /// Decode a complete body in one go
    pub fn decode_all(body: &[u8]) -> Result<String, ChatError> {
        let mut decoder = Self::new();
        let mut reply = decoder.push(body)?.concat();
        if let Some(last) = decoder.finish()? {
            reply.push_str(&last);
        }
        Ok(reply)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<String>, ChatError> {
    let text = std::str::from_utf8(line)
        .map_err(|e| ChatError::Protocol(format!("stream line is not UTF-8: {}", e)))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }

    let parsed: StreamLine = serde_json::from_str(text)
        .map_err(|e| ChatError::Protocol(format!("undecodable stream line: {}", e)))?;

    if let Some(error) = parsed.error {
        return Err(ChatError::Service(error));
    }
    if parsed.done {
        debug!("chat stream finished");
    }

    Ok(parsed
        .message
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty()))
}

// ============ Ollama Client ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the Ollama server
    pub host: String,
    pub model: String,
    /// Whole-exchange timeout, connection through last byte
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "mistral".to_string(),
            timeout_secs: 60,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host.trim_end_matches('/'))
    }
}

/// HTTP client for an Ollama-compatible `/api/chat` endpoint
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl OllamaClient {
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl ChatService for OllamaClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let url = self.config.chat_url();
        info!(model = %request.model, %url, stream = request.stream, "sending chat request");

        let mut response = self.http.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let mut decoder = FragmentDecoder::new();
        let mut reply = String::new();
        while let Some(chunk) = response.chunk().await? {
            for fragment in decoder.push(&chunk)? {
                reply.push_str(&fragment);
            }
        }
        if let Some(fragment) = decoder.finish()? {
            reply.push_str(&fragment);
        }

        debug!(bytes = reply.len(), "chat reply complete");
        Ok(reply)
    }
}

// ============ Tests ============
