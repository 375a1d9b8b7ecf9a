//! The chat engine: prompt assembly, streaming, accumulation, persistence.
//!
//! A turn splits into a synchronous pre-flight (conversation resolution,
//! authorization, prompt assembly, user-message persistence, provider
//! construction; any failure here surfaces as an ordinary error before a
//! single stream byte exists) and a relay task that forwards provider
//! chunks downstream while accumulating them. The assistant message is
//! persisted only when the provider terminates normally; failure, timeout,
//! and client disconnect all leave the user message in place and nothing
//! else.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use confab_core::config::{LlmConfig, LlmProviderKind};
use confab_core::types::Principal;
use confab_core::{ApiError, Result};
use confab_llm::{build_provider, ChatRequest, GenerationStats, LlmError, LlmProvider, Role, StreamEvent};
use confab_store::DocumentStore;
use confab_users::settings::SettingsService;

use crate::conversations::{ConversationService, CONVERSATIONS};
use crate::messages::{to_chat_messages, MessageRepo};
use crate::types::{LlmContext, Message, MessageRole};

/// How many historical messages ride along as context.
pub const HISTORY_WINDOW: u64 = 20;
/// Upper bound on a single user message.
pub const MAX_MESSAGE_CHARS: usize = 50_000;

const SYSTEM_PREAMBLE: &str = "You are a helpful AI assistant.";

/// Events relayed to the HTTP boundary. `Chunk` maps to a data frame,
/// `Done` to the `[DONE]` terminal, `Error` to the error terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Chunk(String),
    Done,
    Error(String),
}

/// Indirection over provider construction so the engine can be exercised
/// with scripted providers. One adapter instance serves exactly one stream;
/// `build` is called per turn.
pub trait ProviderFactory: Send + Sync {
    fn build(&self) -> std::result::Result<Arc<dyn LlmProvider>, LlmError>;

    /// Whole-stream deadline for a turn.
    fn stream_timeout(&self) -> Duration;
}

pub struct ConfigProviderFactory {
    config: LlmConfig,
}

impl ConfigProviderFactory {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl ProviderFactory for ConfigProviderFactory {
    fn build(&self) -> std::result::Result<Arc<dyn LlmProvider>, LlmError> {
        build_provider(&self.config)
    }

    fn stream_timeout(&self) -> Duration {
        let secs = match self.config.provider {
            LlmProviderKind::Openai => self.config.openai.as_ref().map(|c| c.timeout_secs),
            LlmProviderKind::Claude => self.config.claude.as_ref().map(|c| c.timeout_secs),
            LlmProviderKind::Gemini => self.config.gemini.as_ref().map(|c| c.timeout_secs),
            LlmProviderKind::Databricks => {
                self.config.databricks.as_ref().map(|c| c.timeout_secs)
            }
            LlmProviderKind::Openrouter => {
                self.config.openrouter.as_ref().map(|c| c.timeout_secs)
            }
            LlmProviderKind::Ollama => {
                Some(self.config.ollama.clone().unwrap_or_default().timeout_secs)
            }
        };
        // Local engines default to the long bound, cloud to the short one.
        Duration::from_secs(secs.unwrap_or(match self.config.provider {
            LlmProviderKind::Ollama => 300,
            _ => 60,
        }))
    }
}

pub struct ChatEngine {
    store: Arc<dyn DocumentStore>,
    conversations: ConversationService,
    messages: MessageRepo,
    settings: SettingsService,
    factory: Arc<dyn ProviderFactory>,
}

impl ChatEngine {
    pub fn new(store: Arc<dyn DocumentStore>, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            conversations: ConversationService::new(store.clone()),
            messages: MessageRepo::new(store.clone()),
            settings: SettingsService::new(store.clone()),
            store,
            factory,
        }
    }

    /// Run one chat turn. Everything up to the provider call happens before
    /// this returns, so callers can still answer with a plain HTTP status;
    /// the returned channel only ever carries stream-phase events.
    ///
    /// `cancel` is the client-disconnect signal: cancelling it stops
    /// provider iteration and discards partial output. The user message
    /// persisted below stays regardless.
    pub async fn stream(
        &self,
        message: &str,
        conversation_id: &str,
        principal: &Principal,
        inline_prompt_customization: Option<String>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ChatEvent>> {
        // Pre-flight: resolution + authorization before anything else.
        self.conversations
            .get_checked(principal, conversation_id)
            .await?;
        if message.trim().is_empty() {
            return Err(ApiError::BadRequest("message must not be empty".to_string()));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ApiError::BadRequest(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        // Inline customization wins over the stored setting; empty string
        // means no customization either way.
        let stored = self.settings.get(&principal.id).await?;
        let customization = inline_prompt_customization
            .filter(|c| !c.is_empty())
            .unwrap_or(stored.prompt_customization);
        let system = build_system_prompt(&customization);

        let history = self.messages.recent(conversation_id, HISTORY_WINDOW).await?;
        let mut context = to_chat_messages(&history);

        // The full context record is written on the user turn so an audit
        // of what the model saw never depends on the assistant turn.
        let llm_context = LlmContext {
            system: system.clone(),
            context: context.clone(),
            current_message: message.to_string(),
        };
        let user_message = Message {
            id: String::new(),
            conversation_id: conversation_id.to_string(),
            role: MessageRole::User,
            content: message.to_string(),
            created_at: Utc::now(),
            llm_full_prompt: Some(llm_context.clone()),
            llm_raw_response: None,
            llm_stats: None,
        };
        let saved = self.messages.insert(&user_message).await?;
        debug!(message_id = %saved.id, "user message persisted");

        context.push(confab_llm::ChatMessage {
            role: Role::User,
            content: message.to_string(),
        });

        let provider = self.factory.build()?;
        let request = ChatRequest {
            messages: context,
            system_prompt: Some(system),
            temperature: None,
            max_tokens: None,
        };

        // Capacity 1 on both hops: the provider blocks until the relay took
        // the previous chunk, the relay blocks until the client read it.
        let (provider_tx, provider_rx) = mpsc::channel::<StreamEvent>(1);
        let (out_tx, out_rx) = mpsc::channel::<ChatEvent>(1);

        let error_tx = provider_tx.clone();
        let provider_name = provider.provider_name().to_string();
        let provider_task = tokio::spawn(async move {
            if let Err(e) = provider.stream_chat(&request, provider_tx).await {
                warn!(provider = %provider_name, error = %e, "provider stream failed");
                let _ = error_tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        });

        let relay = RelayTask {
            store: self.store.clone(),
            conversation_id: conversation_id.to_string(),
            llm_context,
            timeout: self.factory.stream_timeout(),
        };
        tokio::spawn(relay.run(provider_rx, out_tx, cancel, provider_task));

        Ok(out_rx)
    }
}

struct RelayTask {
    store: Arc<dyn DocumentStore>,
    conversation_id: String,
    llm_context: LlmContext,
    timeout: Duration,
}

impl RelayTask {
    async fn run(
        self,
        mut provider_rx: mpsc::Receiver<StreamEvent>,
        out_tx: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
        provider_task: tokio::task::JoinHandle<()>,
    ) {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut accumulated = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(
                        conversation_id = %self.conversation_id,
                        partial_len = accumulated.len(),
                        "client disconnected; partial output discarded"
                    );
                    provider_task.abort();
                    return;
                }
                event = tokio::time::timeout_at(deadline, provider_rx.recv()) => {
                    match event {
                        Err(_) => {
                            warn!(conversation_id = %self.conversation_id, "LLM stream timed out");
                            provider_task.abort();
                            let _ = out_tx
                                .send(ChatEvent::Error(format!(
                                    "stream timed out after {}s",
                                    self.timeout.as_secs()
                                )))
                                .await;
                            return;
                        }
                        Ok(None) => {
                            warn!(conversation_id = %self.conversation_id, "provider closed without terminal event");
                            let _ = out_tx
                                .send(ChatEvent::Error("stream ended unexpectedly".to_string()))
                                .await;
                            return;
                        }
                        Ok(Some(StreamEvent::Delta { text })) => {
                            accumulated.push_str(&text);
                            if out_tx.send(ChatEvent::Chunk(text)).await.is_err() {
                                // Client side dropped the stream.
                                provider_task.abort();
                                return;
                            }
                        }
                        Ok(Some(StreamEvent::Done { stats })) => {
                            match self.finalize(accumulated, stats).await {
                                Ok(()) => {
                                    let _ = out_tx.send(ChatEvent::Done).await;
                                }
                                Err(e) => {
                                    warn!(conversation_id = %self.conversation_id, error = %e, "finalize failed");
                                    let _ = out_tx.send(ChatEvent::Error(e.to_string())).await;
                                }
                            }
                            return;
                        }
                        Ok(Some(StreamEvent::Error { message })) => {
                            // No assistant message, no conversation refresh.
                            warn!(conversation_id = %self.conversation_id, error = %message, "mid-stream failure");
                            let _ = out_tx.send(ChatEvent::Error(message)).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Persist the assistant turn and refresh the conversation metadata.
    async fn finalize(&self, accumulated: String, stats: GenerationStats) -> Result<()> {
        let messages = MessageRepo::new(self.store.clone());
        let assistant = Message {
            id: String::new(),
            conversation_id: self.conversation_id.clone(),
            role: MessageRole::Assistant,
            content: accumulated.clone(),
            created_at: Utc::now(),
            llm_full_prompt: Some(self.llm_context.clone()),
            llm_raw_response: Some(accumulated),
            llm_stats: Some(stats.clone()),
        };
        let saved = messages.insert(&assistant).await?;

        let count = messages.count(&self.conversation_id).await?;
        self.store
            .update(
                CONVERSATIONS,
                &self.conversation_id,
                serde_json::json!({"updated_at": Utc::now(), "message_count": count}),
            )
            .await?;
        info!(
            message_id = %saved.id,
            conversation_id = %self.conversation_id,
            completion_tokens = stats.completion_tokens,
            tokens_per_second = stats.tokens_per_second,
            "assistant turn persisted"
        );
        Ok(())
    }
}

fn build_system_prompt(customization: &str) -> String {
    if customization.is_empty() {
        SYSTEM_PREAMBLE.to_string()
    } else {
        format!("{}\n\nUser preferences: {}", SYSTEM_PREAMBLE, customization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{CreateConversationRequest, CONVERSATIONS};
    use crate::groups::CONVERSATION_GROUPS;
    use crate::messages::MESSAGES;
    use async_trait::async_trait;
    use confab_core::types::UserRole;
    use confab_store::{Filter, MemoryStore, Page, SortKey};
    use confab_users::settings::{SettingsService, USER_SETTINGS};
    use confab_users::types::SettingsPatch;

    struct StubProvider {
        script: Vec<StreamEvent>,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn provider_name(&self) -> &str {
            "stub"
        }
        fn model_name(&self) -> &str {
            "stub-model"
        }
        fn validate_config(&self) -> std::result::Result<(), LlmError> {
            Ok(())
        }
        async fn stream_chat(
            &self,
            _req: &ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> std::result::Result<(), LlmError> {
            for event in self.script.clone() {
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Ok(())
        }
        fn last_stats(&self) -> Option<GenerationStats> {
            None
        }
    }

    struct StubFactory {
        script: Vec<StreamEvent>,
        timeout: Duration,
    }

    impl ProviderFactory for StubFactory {
        fn build(&self) -> std::result::Result<Arc<dyn LlmProvider>, LlmError> {
            Ok(Arc::new(StubProvider {
                script: self.script.clone(),
            }))
        }
        fn stream_timeout(&self) -> Duration {
            self.timeout
        }
    }

    fn stats() -> GenerationStats {
        GenerationStats::from_counts(10, 2, 0.5, "stub-model")
    }

    async fn setup(script: Vec<StreamEvent>) -> (ChatEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for c in [CONVERSATIONS, CONVERSATION_GROUPS, MESSAGES, USER_SETTINGS] {
            store.create_collection(c).await.unwrap();
        }
        let factory = Arc::new(StubFactory {
            script,
            timeout: Duration::from_secs(5),
        });
        (ChatEngine::new(store.clone(), factory), store)
    }

    fn owner() -> Principal {
        Principal::new("u1", UserRole::User, vec![])
    }

    /// Seed a conversation with a [user "Hi", assistant "Hello"] history.
    async fn seed_conversation(engine: &ChatEngine, store: &Arc<MemoryStore>) -> String {
        let conversation = engine
            .conversations
            .create(
                &owner(),
                CreateConversationRequest {
                    title: "t".to_string(),
                    group_id: None,
                },
            )
            .await
            .unwrap();
        let base = Utc::now() - chrono::Duration::seconds(60);
        for (i, (role, content)) in [(MessageRole::User, "Hi"), (MessageRole::Assistant, "Hello")]
            .into_iter()
            .enumerate()
        {
            let msg = Message {
                id: String::new(),
                conversation_id: conversation.id.clone(),
                role,
                content: content.to_string(),
                created_at: base + chrono::Duration::seconds(i as i64),
                llm_full_prompt: None,
                llm_raw_response: None,
                llm_stats: None,
            };
            store
                .create(MESSAGES, serde_json::to_value(&msg).unwrap())
                .await
                .unwrap();
        }
        conversation.id
    }

    async fn collect(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    async fn messages_of(store: &Arc<MemoryStore>, conversation_id: &str) -> Vec<Message> {
        store
            .query(
                MESSAGES,
                &[Filter::eq("conversation_id", conversation_id)],
                Page::new(0, 100),
                &[SortKey::asc("created_at")],
            )
            .await
            .unwrap()
            .into_iter()
            .map(|doc| serde_json::from_value(doc).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn successful_turn_streams_and_persists() {
        let (engine, store) = setup(vec![
            StreamEvent::Delta {
                text: "OK".to_string(),
            },
            StreamEvent::Delta {
                text: " done".to_string(),
            },
            StreamEvent::Done { stats: stats() },
        ])
        .await;
        let conversation_id = seed_conversation(&engine, &store).await;
        SettingsService::new(store.clone())
            .update(
                "u1",
                SettingsPatch {
                    prompt_customization: Some("Be concise".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let rx = engine
            .stream("Next", &conversation_id, &owner(), None, CancellationToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Chunk("OK".to_string()),
                ChatEvent::Chunk(" done".to_string()),
                ChatEvent::Done,
            ]
        );

        let messages = messages_of(&store, &conversation_id).await;
        assert_eq!(messages.len(), 4);

        let user_turn = &messages[2];
        assert_eq!(user_turn.role, MessageRole::User);
        assert_eq!(user_turn.content, "Next");
        let prompt = user_turn.llm_full_prompt.as_ref().unwrap();
        assert!(prompt.system.contains("Be concise"));
        assert_eq!(prompt.context.len(), 2);
        assert_eq!(prompt.current_message, "Next");

        let assistant_turn = &messages[3];
        assert_eq!(assistant_turn.role, MessageRole::Assistant);
        assert_eq!(assistant_turn.content, "OK done");
        assert_eq!(assistant_turn.llm_raw_response.as_deref(), Some("OK done"));
        assert!(assistant_turn.llm_stats.is_some());
        assert_eq!(assistant_turn.llm_full_prompt, user_turn.llm_full_prompt);

        let conversation = engine
            .conversations
            .get(&conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.message_count, 4);
    }

    #[tokio::test]
    async fn preflight_forbidden_writes_nothing() {
        let (engine, store) = setup(vec![StreamEvent::Done { stats: stats() }]).await;
        let conversation_id = seed_conversation(&engine, &store).await;

        let intruder = Principal::new("u2", UserRole::User, vec!["g9".to_string()]);
        let err = engine
            .stream("x", &conversation_id, &intruder, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(messages_of(&store, &conversation_id).await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let (engine, _) = setup(vec![]).await;
        let err = engine
            .stream("x", "missing", &owner(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_user_turn_only() {
        let (engine, store) = setup(vec![
            StreamEvent::Delta {
                text: "partial".to_string(),
            },
            StreamEvent::Error {
                message: "rate limit exceeded".to_string(),
            },
        ])
        .await;
        let conversation_id = seed_conversation(&engine, &store).await;
        let before = engine
            .conversations
            .get(&conversation_id)
            .await
            .unwrap()
            .unwrap();

        let rx = engine
            .stream("Next", &conversation_id, &owner(), None, CancellationToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ChatEvent::Chunk("partial".to_string()));
        assert!(matches!(&events[1], ChatEvent::Error(m) if m.contains("rate limit")));

        let messages = messages_of(&store, &conversation_id).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, MessageRole::User);

        // Not refreshed on failure.
        let after = engine
            .conversations
            .get(&conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.message_count, before.message_count);
    }

    #[tokio::test]
    async fn client_cancel_discards_partial_output() {
        let (engine, store) = setup(vec![
            StreamEvent::Delta {
                text: "partial".to_string(),
            },
            StreamEvent::Delta {
                text: " more".to_string(),
            },
            StreamEvent::Done { stats: stats() },
        ])
        .await;
        let conversation_id = seed_conversation(&engine, &store).await;

        let cancel = CancellationToken::new();
        let mut rx = engine
            .stream("Next", &conversation_id, &owner(), None, cancel.clone())
            .await
            .unwrap();

        // Take one chunk, then walk away like a closed browser tab.
        let first = rx.recv().await.unwrap();
        assert_eq!(first, ChatEvent::Chunk("partial".to_string()));
        cancel.cancel();
        drop(rx);

        // Give the relay a beat to unwind.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = messages_of(&store, &conversation_id).await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, MessageRole::User);
    }

    #[tokio::test]
    async fn inline_customization_wins_over_stored() {
        let (engine, store) = setup(vec![StreamEvent::Done { stats: stats() }]).await;
        let conversation_id = seed_conversation(&engine, &store).await;
        SettingsService::new(store.clone())
            .update(
                "u1",
                SettingsPatch {
                    prompt_customization: Some("stored".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let rx = engine
            .stream(
                "Next",
                &conversation_id,
                &owner(),
                Some("inline".to_string()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        collect(rx).await;

        let messages = messages_of(&store, &conversation_id).await;
        let prompt = messages[2].llm_full_prompt.as_ref().unwrap();
        assert!(prompt.system.contains("inline"));
        assert!(!prompt.system.contains("stored"));
    }

    #[tokio::test]
    async fn empty_customization_leaves_bare_preamble() {
        let (engine, store) = setup(vec![StreamEvent::Done { stats: stats() }]).await;
        let conversation_id = seed_conversation(&engine, &store).await;

        let rx = engine
            .stream(
                "Next",
                &conversation_id,
                &owner(),
                Some(String::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        collect(rx).await;

        let messages = messages_of(&store, &conversation_id).await;
        let prompt = messages[2].llm_full_prompt.as_ref().unwrap();
        assert_eq!(prompt.system, SYSTEM_PREAMBLE);
    }

    #[tokio::test]
    async fn provider_ending_without_terminal_event_is_an_error() {
        // A script that ends without Done: the channel closes, which the
        // relay reports as an unexpected end rather than hanging.
        let (engine, store) = setup(vec![]).await;
        let conversation_id = seed_conversation(&engine, &store).await;
        let rx = engine
            .stream("Next", &conversation_id, &owner(), None, CancellationToken::new())
            .await
            .unwrap();
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Error(_)));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (engine, store) = setup(vec![]).await;
        let conversation_id = seed_conversation(&engine, &store).await;
        let err = engine
            .stream("   ", &conversation_id, &owner(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
