use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::deadline::with_deadline;
use crate::models::ReferenceImage;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("image generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("no image was generated, the prompt may have been blocked")]
    NoImageProduced,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("HTTP error: {0}")]
    Transport(String),
}

/// Lazily delivered text increments of one streamed reply.
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Returns the generated image as a `data:` URL.
    async fn generate_image(
        &self,
        prompt: &str,
        reference_images: &[ReferenceImage],
    ) -> Result<String, GenerationError>;

    async fn generate_structured(&self, prompt: &str, schema: &Value) -> Result<Value, GenerationError>;

    fn open_chat(&self, system_instruction: &str) -> Box<dyn ChatSession>;
}

/// One multi-turn conversation. Each send carries the earlier turns as context.
#[async_trait]
pub trait ChatSession: Send {
    async fn send_streamed(&mut self, text: &str) -> Result<TextStream, GenerationError>;
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(body: &Value) -> String {
    let mut copy = body.clone();
    truncate_base64_in_json(&mut copy);
    copy.to_string()
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    image_model: String,
    text_model: String,
    image_limit: Duration,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.api_base.clone(),
            image_model: config.image_model.clone(),
            text_model: config.text_model.clone(),
            image_limit: config.image_limit,
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn perform_api_call(&self, url: &str, body: &Value) -> Result<GeminiResponse, GenerationError> {
        info!("🔗 Making request to: {}", url);
        info!("📤 Request body: {}", loggable(body));

        let response = self.client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", error_body);
            return Err(GenerationError::Transport(format!("status={} body={}", status, error_body)));
        }

        let response_text = response.text().await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let parsed: Value = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::MalformedResponse(format!("parse error: {}", e)))?;
        info!("📥 Raw Gemini API response: {}", loggable(&parsed));

        serde_json::from_value(parsed)
            .map_err(|e| GenerationError::MalformedResponse(format!("unexpected response shape: {}", e)))
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate_image(
        &self,
        prompt: &str,
        reference_images: &[ReferenceImage],
    ) -> Result<String, GenerationError> {
        info!("🎨 Generating image with {} reference image(s)...", reference_images.len());

        let mut parts: Vec<Value> = reference_images
            .iter()
            .map(|image| json!({"inlineData": {"mimeType": image.mime_type, "data": image.to_base64()}}))
            .collect();
        parts.push(json!({"text": prompt}));

        let request_body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE"] }
        });

        let url = self.endpoint(&self.image_model, "generateContent");
        let parsed = with_deadline(self.image_limit, self.perform_api_call(&url, &request_body)).await?;

        match extract_first_image(&parsed) {
            Some(image) => {
                info!("🖼️ Extracted {} image ({} bytes)", image.mime_type, image.data.len());
                Ok(image.to_data_url())
            }
            None => {
                warn!("⚠️ No image data found in API response");
                Err(GenerationError::NoImageProduced)
            }
        }
    }

    async fn generate_structured(&self, prompt: &str, schema: &Value) -> Result<Value, GenerationError> {
        info!("Generating structured output with Gemini API...");

        let request_body = json!({
            "contents": [{ "parts": [{"text": prompt}] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema
            }
        });

        let url = self.endpoint(&self.text_model, "generateContent");
        let parsed = self.perform_api_call(&url, &request_body).await?;
        let text = collect_text(&parsed)
            .ok_or_else(|| GenerationError::MalformedResponse("no text content found in response".into()))?;

        serde_json::from_str(&text)
            .map_err(|e| GenerationError::MalformedResponse(format!("structured output is not valid JSON: {}", e)))
    }

    fn open_chat(&self, system_instruction: &str) -> Box<dyn ChatSession> {
        info!("💬 Opening chat session on {}", self.text_model);
        Box::new(GeminiChatSession {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            url: format!("{}?alt=sse", self.endpoint(&self.text_model, "streamGenerateContent")),
            system_instruction: system_instruction.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

struct GeminiChatSession {
    client: Client,
    api_key: String,
    url: String,
    system_instruction: String,
    /// Committed turns, shared with the reply stream that appends to it on completion.
    history: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ChatSession for GeminiChatSession {
    async fn send_streamed(&mut self, text: &str) -> Result<TextStream, GenerationError> {
        let user_turn = json!({"role": "user", "parts": [{"text": text}]});
        let mut contents = self.history.lock().clone();
        contents.push(user_turn.clone());

        let request_body = json!({
            "systemInstruction": { "parts": [{"text": self.system_instruction}] },
            "contents": contents
        });

        info!("💬 Sending chat turn #{} ({} chars)", contents.len(), text.len());

        let response = self.client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ Chat stream rejected: status={} body={}", status, error_body);
            return Err(GenerationError::Transport(format!("status={} body={}", status, error_body)));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GenerationError::Transport(e.to_string())));

        Ok(commit_on_completion(
            sse_increments(bytes).boxed(),
            Arc::clone(&self.history),
            user_turn,
        ))
    }
}

struct SseState {
    bytes: BoxStream<'static, Result<Bytes, GenerationError>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, GenerationError>>,
    done: bool,
}

/// Splits an SSE byte stream into the text increments carried by its `data:` lines.
fn sse_increments<S>(bytes: S) -> impl Stream<Item = Result<String, GenerationError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, GenerationError>> + Send + 'static,
{
    let state = SseState { bytes: bytes.boxed(), buffer: Vec::new(), pending: VecDeque::new(), done: false };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    while let Some(line_end) = state.buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = state.buffer.drain(..=line_end).collect();
                        state.push_line(&line);
                    }
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e));
                    state.done = true;
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.push_line(&rest);
                    state.done = true;
                }
            }
        }
    })
}

impl SseState {
    fn push_line(&mut self, line: &[u8]) {
        if self.done {
            return;
        }
        match parse_sse_line(String::from_utf8_lossy(line).trim()) {
            Ok(Some(text)) => self.pending.push_back(Ok(text)),
            Ok(None) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
    }
}

fn parse_sse_line(line: &str) -> Result<Option<String>, GenerationError> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }
    let chunk: GeminiResponse = serde_json::from_str(payload)
        .map_err(|e| GenerationError::MalformedResponse(format!("bad stream chunk: {}", e)))?;
    Ok(collect_text(&chunk).filter(|text| !text.is_empty()))
}

struct CommitState {
    inner: TextStream,
    reply: String,
    history: Arc<Mutex<Vec<Value>>>,
    user_turn: Option<Value>,
    finished: bool,
}

/// Forwards increments and, once the stream ends cleanly, records the user turn
/// and the full reply in the session history. A failed stream records nothing.
fn commit_on_completion(inner: TextStream, history: Arc<Mutex<Vec<Value>>>, user_turn: Value) -> TextStream {
    let state = CommitState { inner, reply: String::new(), history, user_turn: Some(user_turn), finished: false };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        match state.inner.next().await {
            Some(Ok(text)) => {
                state.reply.push_str(&text);
                Some((Ok(text), state))
            }
            Some(Err(e)) => {
                warn!("⚠️ Chat stream failed: {}", e);
                state.finished = true;
                Some((Err(e), state))
            }
            None => {
                if let Some(user_turn) = state.user_turn.take() {
                    let mut history = state.history.lock();
                    history.push(user_turn);
                    history.push(json!({"role": "model", "parts": [{"text": state.reply}]}));
                    info!("✅ Chat turn committed ({} turns in history)", history.len());
                }
                None
            }
        }
    })
    .boxed()
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    #[allow(dead_code)]
    Other(Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

fn extract_first_image(resp: &GeminiResponse) -> Option<ReferenceImage> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                let url = format!("data:{};base64,{}", inline_data.mime_type, inline_data.data);
                return ReferenceImage::from_data_url(&url);
            }
        }
    }
    None
}

fn collect_text(resp: &GeminiResponse) -> Option<String> {
    let candidate = resp.candidates.first()?;
    let texts: Vec<&str> = candidate
        .content
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if texts.is_empty() { None } else { Some(texts.concat()) }
}
