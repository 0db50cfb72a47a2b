//! Conversation client for an Ollama-compatible chat endpoint.
//!
//! The history is bounded and single-owner: the chat worker holds the only
//! reference, so no locking discipline is needed. The system prompt is
//! pinned at index 0 and never evicted; everything after it is trimmed to
//! the configured number of user/assistant pairs.

pub mod api;

pub use api::{ChatMessage, Role};

use std::time::Duration;

use tracing::debug;

use crate::error::{Result, VoxaError};
use api::{ChatRequest, ChatResponse, GenerationOptions};

/// Ceiling for a single completion request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle connections kept warm toward the (local) endpoint, so repeated
/// turns skip connection setup.
const IDLE_POOL_SIZE: usize = 10;
const IDLE_POOL_TIMEOUT: Duration = Duration::from_secs(90);

/// Reply token cap: long answers read badly aloud.
const REPLY_TOKEN_CAP: u32 = 150;

/// Context window requested from the model.
const CONTEXT_WINDOW: u32 = 1024;

/// Bounded-history conversation client.
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_history: usize,
    history: Vec<ChatMessage>,
}

impl ChatClient {
    /// Create a client whose history is seeded with one system turn.
    ///
    /// `max_history` counts user/assistant pairs; 0 falls back to 10.
    pub fn new(
        endpoint: &str,
        model: &str,
        system_prompt: &str,
        max_history: usize,
        temperature: f32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(IDLE_POOL_SIZE)
            .pool_idle_timeout(IDLE_POOL_TIMEOUT)
            .build()
            .map_err(|e| VoxaError::Conversation(e.to_string()))?;

        let max_history = if max_history == 0 { 10 } else { max_history };

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            max_history,
            history: vec![ChatMessage::system(system_prompt)],
        })
    }

    /// Verify the endpoint is reachable. Called once at startup.
    pub async fn health_check(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/", self.endpoint))
            .send()
            .await
            .map_err(|e| VoxaError::Conversation(format!("cannot reach {}: {e}", self.endpoint)))?;

        if !response.status().is_success() {
            return Err(VoxaError::Conversation(format!(
                "endpoint {} answered {}",
                self.endpoint,
                response.status()
            )));
        }
        Ok(())
    }

    /// Send one user turn and return the assistant's reply.
    ///
    /// The user turn is appended before the request goes out; the
    /// assistant turn only on success. A failed request therefore leaves
    /// the question in history with no answer, and the caller decides
    /// what the user hears instead.
    pub async fn chat(&mut self, user_text: &str) -> Result<String> {
        self.history.push(ChatMessage::user(user_text));

        let pending = {
            let request = ChatRequest {
                model: &self.model,
                messages: &self.history,
                stream: false,
                options: GenerationOptions {
                    temperature: self.temperature,
                    num_predict: REPLY_TOKEN_CAP,
                    num_ctx: CONTEXT_WINDOW,
                },
            };
            // `json` serialises eagerly, so the borrow of history ends
            // with this block and the reply can be committed below.
            self.http
                .post(format!("{}/api/chat", self.endpoint))
                .json(&request)
                .send()
        };

        let response = pending
            .await
            .map_err(|e| VoxaError::Conversation(format!("chat request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VoxaError::Conversation(format!(
                "chat endpoint answered {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoxaError::Conversation(format!("malformed chat response: {e}")))?;

        let reply = body.message.content.trim().to_string();
        debug!(turns = self.history.len(), "assistant reply received");

        self.history.push(ChatMessage::assistant(reply.clone()));
        self.trim_history();
        Ok(reply)
    }

    /// Drop everything but the system turn.
    pub fn clear_history(&mut self) {
        self.history.truncate(1);
    }

    /// Current conversation, system turn first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Keep at most `1 + 2·max_history` turns, evicting the oldest pair
    /// while the system turn stays at index 0.
    fn trim_history(&mut self) {
        let cap = 1 + 2 * self.max_history;
        while self.history.len() > cap {
            self.history.remove(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(max_history: usize) -> ChatClient {
        ChatClient::new(
            "http://localhost:11434",
            "test-model",
            "be brief",
            max_history,
            0.7,
        )
        .expect("client builds")
    }

    /// Replays the successful-chat history mutations without a server.
    fn complete_turn(client: &mut ChatClient, user: &str, assistant: &str) {
        client.history.push(ChatMessage::user(user));
        client.history.push(ChatMessage::assistant(assistant));
        client.trim_history();
    }

    #[test]
    fn history_starts_with_the_system_turn() {
        let client = client(10);
        assert_eq!(client.history().len(), 1);
        assert_eq!(client.history()[0].role, Role::System);
        assert_eq!(client.history()[0].content, "be brief");
    }

    #[test]
    fn history_grows_by_pairs_and_respects_the_cap() {
        let mut client = client(3);
        for i in 0..10 {
            complete_turn(&mut client, &format!("question {i}"), &format!("answer {i}"));
            let expected = (1 + 2 * (i + 1)).min(1 + 2 * 3);
            assert_eq!(client.history().len(), expected);
            assert_eq!(client.history()[0].role, Role::System);
        }

        // Oldest pairs were evicted; the newest survived intact.
        let history = client.history();
        assert_eq!(history[1].content, "question 7");
        assert_eq!(history[2].content, "answer 7");
        assert_eq!(history[5].content, "question 9");
        assert_eq!(history[6].content, "answer 9");
    }

    #[test]
    fn clear_history_keeps_only_the_system_turn() {
        let mut client = client(5);
        complete_turn(&mut client, "hi", "hello");
        complete_turn(&mut client, "bye", "goodbye");
        client.clear_history();

        assert_eq!(client.history().len(), 1);
        assert_eq!(client.history()[0].role, Role::System);

        // Usable again after the reset.
        complete_turn(&mut client, "again", "sure");
        assert_eq!(client.history().len(), 3);
    }

    #[test]
    fn zero_max_history_falls_back_to_default() {
        let mut client = client(0);
        for i in 0..15 {
            complete_turn(&mut client, &format!("q{i}"), &format!("a{i}"));
        }
        assert_eq!(client.history().len(), 1 + 2 * 10);
    }

    #[tokio::test]
    async fn failed_chat_keeps_the_user_turn_without_a_reply() {
        // Nothing listens on the discard port, so the request fails fast.
        let mut client = ChatClient::new("http://127.0.0.1:9", "m", "be brief", 3, 0.7).unwrap();

        let result = client.chat("what time is it").await;
        assert!(matches!(result, Err(VoxaError::Conversation(_))));

        // The question made it into history; no assistant turn did.
        let history = client.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[1].content, "what time is it");

        // A later successful turn carries on from the unanswered one.
        complete_turn(&mut client, "hello again", "hello");
        assert_eq!(client.history().len(), 4);
    }

    #[test]
    fn endpoint_trailing_slash_is_normalized() {
        let client = ChatClient::new("http://localhost:11434/", "m", "p", 1, 0.5).unwrap();
        assert_eq!(client.endpoint, "http://localhost:11434");
    }
}
