//! Scripted `GenerationClient` used by the unit and router tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;

use crate::gemini::{ChatSession, GenerationClient, GenerationError, TextStream};
use crate::models::ReferenceImage;

#[derive(Debug, Clone)]
pub enum ImageBehavior {
    Succeed,
    SucceedAfter(Duration),
    Fail(GenerationError),
    Stall,
}

#[derive(Debug, Clone)]
pub enum ChatScript {
    Reply(Vec<Result<String, GenerationError>>),
    Refuse(GenerationError),
}

#[derive(Default)]
pub struct FakeClient {
    /// First rule whose needle occurs in the prompt decides the behaviour.
    image_rules: Mutex<Vec<(String, ImageBehavior)>>,
    structured: Mutex<Option<Result<Value, GenerationError>>>,
    chat_scripts: Arc<Mutex<VecDeque<ChatScript>>>,
    pub sent_chat_texts: Arc<Mutex<Vec<String>>>,
    pub image_calls: AtomicUsize,
    pub structured_calls: AtomicUsize,
    pub chats_opened: AtomicUsize,
    pub completed: Mutex<Vec<(String, tokio::time::Instant)>>,
    pub seen_reference_images: Mutex<Vec<usize>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_prompt(&self, needle: &str, behavior: ImageBehavior) {
        self.image_rules.lock().push((needle.to_string(), behavior));
    }

    pub fn structured_response(&self, response: Result<Value, GenerationError>) {
        *self.structured.lock() = Some(response);
    }

    pub fn script_chat(&self, script: ChatScript) {
        self.chat_scripts.lock().push_back(script);
    }

    pub fn image_url_for(prompt: &str) -> String {
        let image = ReferenceImage::new(prompt.len().to_le_bytes().to_vec(), "image/png");
        image.to_data_url()
    }
}

#[async_trait]
impl GenerationClient for FakeClient {
    async fn generate_image(
        &self,
        prompt: &str,
        reference_images: &[ReferenceImage],
    ) -> Result<String, GenerationError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_reference_images.lock().push(reference_images.len());
        let behavior = self
            .image_rules
            .lock()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, behavior)| behavior.clone())
            .unwrap_or(ImageBehavior::Succeed);

        let result = match behavior {
            ImageBehavior::Succeed => Ok(Self::image_url_for(prompt)),
            ImageBehavior::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Self::image_url_for(prompt))
            }
            ImageBehavior::Fail(e) => Err(e),
            ImageBehavior::Stall => std::future::pending().await,
        };
        self.completed.lock().push((prompt.to_string(), tokio::time::Instant::now()));
        result
    }

    async fn generate_structured(&self, _prompt: &str, _schema: &Value) -> Result<Value, GenerationError> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        self.structured
            .lock()
            .clone()
            .unwrap_or_else(|| Err(GenerationError::MalformedResponse("no scripted response".into())))
    }

    fn open_chat(&self, _system_instruction: &str) -> Box<dyn ChatSession> {
        self.chats_opened.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeChat {
            scripts: Arc::clone(&self.chat_scripts),
            sent: Arc::clone(&self.sent_chat_texts),
        })
    }
}

struct FakeChat {
    scripts: Arc<Mutex<VecDeque<ChatScript>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChatSession for FakeChat {
    async fn send_streamed(&mut self, text: &str) -> Result<TextStream, GenerationError> {
        self.sent.lock().push(text.to_string());
        let script = self.scripts.lock().pop_front().unwrap_or(ChatScript::Reply(Vec::new()));
        match script {
            ChatScript::Reply(items) => Ok(stream::iter(items).boxed()),
            ChatScript::Refuse(e) => Err(e),
        }
    }
}
