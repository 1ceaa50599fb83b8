//! Conversational agent backing the voice channel

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::AgentConfig;
use crate::http;
use crate::{Error, Result};

/// Identity of the conversation a turn belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Unique key for history lookup
    pub key: String,
    /// Channel the message arrived on
    pub channel: String,
    /// Chat within the channel
    pub chat_id: String,
}

impl SessionKey {
    /// The single local voice session
    #[must_use]
    pub fn local_voice() -> Self {
        Self {
            key: "voice:local".to_string(),
            channel: "voice".to_string(),
            chat_id: "local".to_string(),
        }
    }
}

/// Something that answers a user's utterance
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a reply to `text`, or `None` when there is nothing to say
    ///
    /// # Errors
    ///
    /// Returns error if the agent backend fails
    async fn respond(&self, text: &str, session: &SessionKey) -> Result<Option<String>>;
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Bounded per-session conversation history
#[derive(Debug, Default)]
pub struct History {
    sessions: HashMap<String, VecDeque<ChatMessage>>,
    max_messages: usize,
}

impl History {
    /// Keep at most `max_messages` per session
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_messages,
        }
    }

    /// Messages recorded for `session`, oldest first
    #[must_use]
    pub fn get(&self, session: &str) -> Vec<ChatMessage> {
        self.sessions
            .get(session)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a completed exchange, evicting the oldest messages beyond the bound
    pub fn record(&mut self, session: &str, user: &str, assistant: &str) {
        if self.max_messages == 0 {
            return;
        }
        let messages = self.sessions.entry(session.to_string()).or_default();
        messages.push_back(ChatMessage::new("user", user));
        messages.push_back(ChatMessage::new("assistant", assistant));
        while messages.len() > self.max_messages {
            messages.pop_front();
        }
    }
}

/// Agent backed by an OpenAI-compatible chat completions endpoint
pub struct ChatAgent {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    history: Mutex<History>,
}

impl ChatAgent {
    /// Create an agent from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String, config: &AgentConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for agent".to_string()));
        }

        Ok(Self {
            client: http::client()?,
            api_key,
            api_base: config.api_base.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            history: Mutex::new(History::new(config.max_history)),
        })
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Option<String>> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(http::endpoint(&self.api_base, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let response = http::check_status(response)
            .await
            .map_err(|msg| Error::Agent(format!("chat API error {msg}")))?;

        let body: CompletionResponse = response.json().await?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()))
    }
}

#[async_trait]
impl Agent for ChatAgent {
    async fn respond(&self, text: &str, session: &SessionKey) -> Result<Option<String>> {
        let mut messages = vec![ChatMessage::new("system", self.system_prompt.clone())];
        messages.extend(self.history.lock().await.get(&session.key));
        messages.push(ChatMessage::new("user", text));

        tracing::debug!(
            session = %session.key,
            channel = %session.channel,
            history = messages.len() - 2,
            "sending turn to agent"
        );

        let reply = self.complete(&messages).await?;
        if let Some(reply) = &reply {
            self.history.lock().await.record(&session.key, text, reply);
        }
        Ok(reply)
    }
}
