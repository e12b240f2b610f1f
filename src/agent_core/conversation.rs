//! ConversationManager: wraps one orchestration run with conversation memory.
//!
//! Responsibilities:
//! - Recall prior exchanges relevant to the new input
//! - Build the system prompt (base prompt + capability summary + recall)
//! - Build the `Vec<ChatMessage>` for the orchestrator
//! - Store the finished exchange once the run reaches `done`

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::errors::AgentError;
use super::orchestrator::{AgentStream, Orchestrator};
use super::results::truncate_preview;
use crate::inference::{ChatMessage, MediaRef};
use crate::protocol::{AgentStatus, StreamChunk};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Prompt used when the configuration does not provide one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Lumen, a helpful assistant. \
Use the available tools when they help answer the user's request, and answer \
directly when they do not. Be concise.";

/// Longest excerpt of either side of a recalled exchange in the prompt.
const RECALL_EXCERPT_CHARS: usize = 300;

/// Keywords shorter than this carry too little signal to match on.
const MIN_KEYWORD_CHARS: usize = 3;

// ─── Memory ─────────────────────────────────────────────────────────────────

/// One finished user ↔ assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            timestamp: Utc::now(),
        }
    }

    /// Short two-line digest for the system prompt.
    pub fn summary(&self) -> String {
        format!(
            "User: {}\n  Assistant: {}",
            truncate_preview(self.user.trim(), RECALL_EXCERPT_CHARS),
            truncate_preview(self.assistant.trim(), RECALL_EXCERPT_CHARS)
        )
    }
}

/// Long-term memory consulted when building a request.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Up to `limit` prior exchanges relevant to `query`, most relevant first.
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<Exchange>, AgentError>;

    async fn store(&self, exchange: Exchange) -> Result<(), AgentError>;
}

/// Bounded in-process memory with keyword-overlap recall.
///
/// Oldest exchanges are evicted once `capacity` is reached. Recall ranks by
/// the number of distinct query keywords an exchange contains; ties go to the
/// more recent exchange, and exchanges sharing no keyword are never returned.
#[derive(Debug)]
pub struct KeywordMemory {
    capacity: usize,
    exchanges: RwLock<VecDeque<Exchange>>,
}

impl KeywordMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            exchanges: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.exchanges.read().await.len()
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl ConversationMemory for KeywordMemory {
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<Exchange>, AgentError> {
        let query_words = keywords(query);
        if query_words.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let exchanges = self.exchanges.read().await;
        let mut scored: Vec<(usize, usize, &Exchange)> = exchanges
            .iter()
            .enumerate()
            .filter_map(|(position, exchange)| {
                let words = keywords(&format!("{} {}", exchange.user, exchange.assistant));
                let score = query_words.intersection(&words).count();
                (score > 0).then_some((score, position, exchange))
            })
            .collect();

        // Highest score first, then most recent.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, _, exchange)| exchange.clone())
            .collect())
    }

    async fn store(&self, exchange: Exchange) -> Result<(), AgentError> {
        let mut exchanges = self.exchanges.write().await;
        while exchanges.len() >= self.capacity {
            exchanges.pop_front();
        }
        exchanges.push_back(exchange);
        Ok(())
    }
}

// ─── Input ──────────────────────────────────────────────────────────────────

/// One user turn as received from a transport.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub text: String,
    pub attachments: Vec<MediaRef>,
    pub task_hint: Option<String>,
    pub model_override: Option<String>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

// ─── Prompt building ────────────────────────────────────────────────────────

/// Assemble the system prompt.
pub fn build_system_prompt(base: &str, capabilities: &str, recalled: &[Exchange]) -> String {
    let mut prompt = format!("{}\n\n{capabilities}", base.trim());

    if !recalled.is_empty() {
        prompt.push_str("\n\nRelevant earlier exchanges:");
        for exchange in recalled {
            prompt.push_str("\n- ");
            prompt.push_str(&exchange.summary());
        }
    }

    prompt
}

// ─── ConversationManager ────────────────────────────────────────────────────

/// Runs the orchestrator for one user input with memory around it.
#[derive(Clone)]
pub struct ConversationManager {
    orchestrator: Orchestrator,
    memory: Arc<dyn ConversationMemory>,
    system_prompt: String,
    recall_limit: usize,
}

impl ConversationManager {
    pub fn new(
        orchestrator: Orchestrator,
        memory: Arc<dyn ConversationMemory>,
        system_prompt: Option<String>,
        recall_limit: usize,
    ) -> Self {
        Self {
            orchestrator,
            memory,
            system_prompt: system_prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            recall_limit,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Build `[system, user]` for `input`.
    ///
    /// A failing recall is logged and treated as "nothing recalled".
    pub async fn build_messages(&self, input: &UserInput) -> Vec<ChatMessage> {
        let recalled = match self.memory.recall(&input.text, self.recall_limit).await {
            Ok(recalled) => recalled,
            Err(e) => {
                tracing::warn!(error = %e, "memory recall failed, continuing without it");
                Vec::new()
            }
        };
        tracing::debug!(recalled = recalled.len(), "memory recall");

        let system = build_system_prompt(
            &self.system_prompt,
            &self.orchestrator.registry().capability_summary(),
            &recalled,
        );

        vec![
            ChatMessage::system(system),
            ChatMessage::user(input.text.clone()).with_attachments(input.attachments.clone()),
        ]
    }

    /// Respond to one user input.
    ///
    /// Every orchestrator chunk is forwarded unchanged. When the run reaches
    /// `done`, the exchange is stored before the `done` chunk is delivered.
    pub fn respond(&self, input: UserInput) -> AgentStream {
        let this = self.clone();

        Box::pin(stream! {
            let messages = this.build_messages(&input).await;
            let context = this
                .orchestrator
                .context(messages)
                .with_task_hint(input.task_hint.clone())
                .with_model_override(input.model_override.clone());

            let mut run = this.orchestrator.execute(context);
            let mut answer = String::new();
            // Where the current model turn's text starts in `answer`.
            let mut turn_start = 0;

            while let Some(chunk) = run.next().await {
                match &chunk {
                    Ok(StreamChunk::Content { content }) => answer.push_str(content),
                    Ok(StreamChunk::Status { status: AgentStatus::Thinking, .. }) => {
                        turn_start = answer.len();
                    }
                    Ok(c) if c.is_retry() => answer.truncate(turn_start),
                    Ok(StreamChunk::Done { .. }) => {
                        let exchange = Exchange::new(input.text.clone(), answer.clone());
                        if let Err(e) = this.memory.store(exchange).await {
                            tracing::warn!(error = %e, "failed to store exchange");
                        }
                    }
                    _ => {}
                }
                yield chunk;
            }
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::registry::ToolRegistry;
    use crate::inference::config::OrchestratorConfig;
    use crate::inference::{ChunkStream, GatewayRequest, ModelGateway, Role};
    use futures::stream;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_recall_ranks_by_overlap_then_recency() {
        let memory = KeywordMemory::new(10);
        memory
            .store(Exchange::new("weather in Paris", "Sunny"))
            .await
            .unwrap();
        memory
            .store(Exchange::new("Paris museum hours", "9 to 5"))
            .await
            .unwrap();
        memory
            .store(Exchange::new("compile rust code", "cargo build"))
            .await
            .unwrap();

        let recalled = memory.recall("paris weather tomorrow", 5).await.unwrap();
        assert_eq!(recalled.len(), 2);
        assert_eq!(recalled[0].user, "weather in Paris");

        let recalled = memory.recall("paris", 5).await.unwrap();
        assert_eq!(recalled[0].user, "Paris museum hours");
    }

    #[tokio::test]
    async fn test_recall_respects_limit_and_ignores_short_words() {
        let memory = KeywordMemory::new(10);
        for i in 0..5 {
            memory
                .store(Exchange::new(format!("note number {i}"), "ok"))
                .await
                .unwrap();
        }
        assert_eq!(memory.recall("note", 2).await.unwrap().len(), 2);
        assert!(memory.recall("a of", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_is_bounded() {
        let memory = KeywordMemory::new(2);
        memory.store(Exchange::new("first topic", "a")).await.unwrap();
        memory.store(Exchange::new("second topic", "b")).await.unwrap();
        memory.store(Exchange::new("third topic", "c")).await.unwrap();
        assert_eq!(memory.len().await, 2);
        assert!(memory.recall("first", 3).await.unwrap().is_empty());
    }

    #[test]
    fn test_system_prompt_includes_capabilities_and_recall() {
        let recalled = vec![Exchange::new("what is 2+2", "4")];
        let prompt = build_system_prompt("Base.", "Available tools:\n- calculator: math", &recalled);
        assert!(prompt.starts_with("Base.\n\nAvailable tools:"));
        assert!(prompt.contains("Relevant earlier exchanges:\n- User: what is 2+2\n  Assistant: 4"));

        let bare = build_system_prompt("Base.", "No tools.", &[]);
        assert!(!bare.contains("Relevant earlier exchanges"));
    }

    struct EchoGateway {
        seen: Mutex<Vec<GatewayRequest>>,
    }

    impl ModelGateway for EchoGateway {
        fn stream(&self, request: GatewayRequest, _override_model: Option<String>) -> ChunkStream {
            self.seen.lock().unwrap().push(request);
            stream::iter(vec![
                Ok(StreamChunk::content("Four")),
                Ok(StreamChunk::Done {
                    model: Some("m".into()),
                }),
            ])
            .boxed()
        }
    }

    fn manager(gateway: Arc<EchoGateway>, memory: Arc<KeywordMemory>) -> ConversationManager {
        let orchestrator = Orchestrator::new(
            gateway,
            Arc::new(ToolRegistry::new()),
            OrchestratorConfig {
                max_iterations: 10,
                result_preview_chars: 200,
            },
        );
        ConversationManager::new(orchestrator, memory, None, 3)
    }

    #[tokio::test]
    async fn test_respond_stores_exchange_and_recalls_it_next_time() {
        let gateway = Arc::new(EchoGateway {
            seen: Mutex::new(Vec::new()),
        });
        let memory = Arc::new(KeywordMemory::new(10));
        let manager = manager(Arc::clone(&gateway), Arc::clone(&memory));

        let chunks: Vec<_> = manager.respond(UserInput::text("what is two plus two")).collect().await;
        assert!(matches!(chunks.last(), Some(Ok(StreamChunk::Done { .. }))));
        assert_eq!(memory.len().await, 1);

        let _: Vec<_> = manager.respond(UserInput::text("two again")).collect().await;
        let seen = gateway.seen.lock().unwrap();
        let system = &seen[1].messages[0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.starts_with("You are Lumen"));
        assert!(system.content.contains("User: what is two plus two"));
        assert!(system.content.contains("Assistant: Four"));
        assert_eq!(seen[1].messages[1].content, "two again");
    }

    #[tokio::test]
    async fn test_attachments_ride_on_user_message() {
        let gateway = Arc::new(EchoGateway {
            seen: Mutex::new(Vec::new()),
        });
        let manager = manager(gateway, Arc::new(KeywordMemory::new(10)));
        let input = UserInput {
            text: "what is this".into(),
            attachments: vec![MediaRef::Url {
                url: "https://example.com/cat.png".into(),
            }],
            ..UserInput::default()
        };
        let messages = manager.build_messages(&input).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].attachments.len(), 1);
    }
}
