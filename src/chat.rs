use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gemini::{ChatSession, GenerationClient, GenerationError};
use crate::models::{ChatMessage, ChatView, Role};

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful and friendly chatbot.";
pub const APOLOGY: &str = "Sorry, I encountered an error.";

#[derive(Debug, Error, PartialEq)]
pub enum ChatError {
    #[error("Message text must not be empty.")]
    EmptyMessage,
}

/// Index of the model message currently receiving streamed text.
#[derive(Debug, Clone, Copy)]
struct ReplyHandle(usize);

/// Owns one conversation handle for its whole lifetime; the handle is never
/// recreated between sends, so earlier turns stay in context.
pub struct ChatController {
    id: Uuid,
    session: Box<dyn ChatSession>,
    messages: Vec<ChatMessage>,
    last_active: DateTime<Utc>,
}

impl ChatController {
    pub fn open(id: Uuid, client: &dyn GenerationClient) -> Self {
        Self { id, session: client.open_chat(SYSTEM_INSTRUCTION), messages: Vec::new(), last_active: Utc::now() }
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn view(&self) -> ChatView {
        ChatView { id: self.id, messages: self.messages().to_vec() }
    }

    /// Sends one user turn and streams the reply into a single model message.
    /// A transport failure replaces any partial reply with a fixed apology.
    pub async fn send(&mut self, text: &str) -> Result<&ChatMessage, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.last_active = Utc::now();
        self.messages.push(ChatMessage::new(Role::User, text));

        if let Err(e) = self.stream_reply(text).await {
            warn!("⚠️ Chat {} turn failed: {}", self.id, e);
            self.messages.push(ChatMessage::new(Role::Model, APOLOGY));
        }

        let last = self.messages.len() - 1;
        Ok(&self.messages[last])
    }

    async fn stream_reply(&mut self, text: &str) -> Result<(), GenerationError> {
        let mut increments = self.session.send_streamed(text).await?;
        let reply = self.begin_reply();

        while let Some(increment) = increments.next().await {
            match increment {
                Ok(delta) => self.append(reply, &delta),
                Err(e) => {
                    self.messages.truncate(reply.0);
                    return Err(e);
                }
            }
        }

        info!("💬 Chat {} reply complete ({} chars)", self.id, self.messages[reply.0].text.len());
        Ok(())
    }

    fn begin_reply(&mut self) -> ReplyHandle {
        self.messages.push(ChatMessage::new(Role::Model, ""));
        ReplyHandle(self.messages.len() - 1)
    }

    fn append(&mut self, reply: ReplyHandle, delta: &str) {
        self.messages[reply.0].text.push_str(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{ChatScript, FakeClient};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn transcript(controller: &ChatController) -> Vec<(Role, String)> {
        controller.messages().iter().map(|m| (m.role, m.text.clone())).collect()
    }

    fn ok(parts: &[&str]) -> ChatScript {
        ChatScript::Reply(parts.iter().map(|p| Ok(p.to_string())).collect())
    }

    #[tokio::test]
    async fn streamed_increments_build_one_reply() {
        let fake = FakeClient::new();
        fake.script_chat(ok(&["Hi", " there", "!"]));
        let mut chat = ChatController::open(Uuid::new_v4(), &*fake);

        let reply = chat.send("hello").await.unwrap();
        assert_eq!(reply.text, "Hi there!");

        assert_eq!(
            transcript(&chat),
            vec![(Role::User, "hello".to_string()), (Role::Model, "Hi there!".to_string())]
        );
    }

    #[tokio::test]
    async fn session_handle_is_reused_across_turns() {
        let fake = FakeClient::new();
        fake.script_chat(ok(&["One"]));
        fake.script_chat(ok(&["Two"]));
        let mut chat = ChatController::open(Uuid::new_v4(), &*fake);

        chat.send("first").await.unwrap();
        chat.send("second").await.unwrap();

        assert_eq!(fake.chats_opened.load(Ordering::SeqCst), 1);
        assert_eq!(fake.sent_chat_texts.lock().as_slice(), &["first".to_string(), "second".to_string()]);
        assert_eq!(chat.messages().len(), 4);
    }

    #[tokio::test]
    async fn mid_stream_failure_replaces_partial_reply_with_apology() {
        let fake = FakeClient::new();
        fake.script_chat(ok(&["Fine"]));
        fake.script_chat(ChatScript::Reply(vec![
            Ok("Half an ans".to_string()),
            Err(GenerationError::Transport("connection reset".into())),
        ]));
        let mut chat = ChatController::open(Uuid::new_v4(), &*fake);

        chat.send("how are you").await.unwrap();
        let reply = chat.send("tell me more").await.unwrap();
        assert_eq!(reply.text, APOLOGY);

        assert_eq!(
            transcript(&chat),
            vec![
                (Role::User, "how are you".to_string()),
                (Role::Model, "Fine".to_string()),
                (Role::User, "tell me more".to_string()),
                (Role::Model, APOLOGY.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn refused_stream_appends_apology() {
        let fake = FakeClient::new();
        fake.script_chat(ChatScript::Refuse(GenerationError::Transport("status=500".into())));
        let mut chat = ChatController::open(Uuid::new_v4(), &*fake);

        chat.send("hello").await.unwrap();

        assert_eq!(
            transcript(&chat),
            vec![(Role::User, "hello".to_string()), (Role::Model, APOLOGY.to_string())]
        );
    }

    #[tokio::test]
    async fn blank_message_is_not_sent() {
        let fake = FakeClient::new();
        let mut chat = ChatController::open(Uuid::new_v4(), &*fake);

        assert_eq!(chat.send("  ").await.unwrap_err(), ChatError::EmptyMessage);
        assert!(chat.messages().is_empty());
        assert!(fake.sent_chat_texts.lock().is_empty());
    }
}
