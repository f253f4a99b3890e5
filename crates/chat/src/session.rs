use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use localchat_llm::{ChatRequest, InferenceClient, Usage};
use localchat_storage::{
    ConversationRecord, ConversationStore, DEFAULT_CONVERSATION_TITLE, MessageId, MessageRecord,
    MessageRole, MessageStore, NewConversation, NewMessage, Storage, StorageResult,
};
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};

use super::error::{
    ChatError, ChatResult, ErrorNotice, IncompleteStreamSnafu, StorageSnafu, StoreTaskSnafu,
};
use super::events::{ChatEvent, TurnEventStream, make_event_stream};
use super::prompt::{ResponseMode, build_chat_messages, validate_system_prompt};
use super::title::TitleTask;

/// Assistant line shown in place of a reply when a turn fails. Never persisted.
pub const FAILED_REPLY_TEXT: &str = "Sorry, I encountered an error. Please try again.";

pub type TurnWorker = Pin<Box<dyn Future<Output = TurnOutcome> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    /// `None` starts a new conversation.
    pub conversation: Option<ConversationRecord>,
    pub history: Vec<MessageRecord>,
    pub user_message: String,
    pub model: String,
    /// Replaces the conversation's stored prompt for this turn.
    pub system_prompt: Option<String>,
    pub response_mode: ResponseMode,
    pub stream: bool,
}

impl TurnRequest {
    pub fn new(model: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            conversation: None,
            history: Vec::new(),
            user_message: user_message.into(),
            model: model.into(),
            system_prompt: None,
            response_mode: ResponseMode::default(),
            stream: true,
        }
    }

    pub fn with_conversation(
        mut self,
        conversation: ConversationRecord,
        history: Vec<MessageRecord>,
    ) -> Self {
        self.conversation = Some(conversation);
        self.history = history;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    ServiceUnreachable,
    TurnFailed,
}

/// One visible line of the conversation after a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: MessageRole,
    pub content: String,
    /// `None` for the synthetic failure line.
    pub message_id: Option<MessageId>,
}

impl TranscriptEntry {
    fn synthetic(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            message_id: None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.message_id.is_some()
    }
}

impl From<&MessageRecord> for TranscriptEntry {
    fn from(record: &MessageRecord) -> Self {
        Self {
            role: record.role,
            content: record.content.clone(),
            message_id: Some(record.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub conversation: Option<ConversationRecord>,
    pub transcript: Vec<TranscriptEntry>,
    pub usage: Option<Usage>,
    pub notice: Option<ErrorNotice>,
    /// Malformed stream lines dropped by the decoder.
    pub skipped_lines: u64,
}

pub struct TurnHandle {
    pub events: TurnEventStream,
    /// Drives the turn; must be awaited or spawned for anything to happen.
    pub worker: TurnWorker,
}

/// Starts chat turns against one inference client and one store.
#[derive(Clone)]
pub struct ChatSession {
    client: InferenceClient,
    store: Arc<dyn Storage>,
}

impl ChatSession {
    pub fn new(client: InferenceClient, store: Arc<dyn Storage>) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub fn start(&self, request: TurnRequest) -> TurnHandle {
        let (event_tx, events, cancel_rx) = make_event_stream();
        let turn = Turn::new(
            self.client.clone(),
            Arc::clone(&self.store),
            event_tx,
            &request.history,
            request.conversation.clone(),
        );
        let worker: TurnWorker = Box::pin(turn.run(request, cancel_rx));

        TurnHandle { events, worker }
    }
}

/// Runs a sync store call on the blocking pool.
pub(crate) async fn with_store<T, F>(
    store: &Arc<dyn Storage>,
    stage: &'static str,
    call: F,
) -> ChatResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Storage) -> StorageResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .context(StoreTaskSnafu { stage })?
        .context(StorageSnafu { stage })
}

struct Reply {
    content: String,
    usage: Option<Usage>,
}

struct Turn {
    client: InferenceClient,
    store: Arc<dyn Storage>,
    event_tx: mpsc::UnboundedSender<ChatEvent>,
    conversation: Option<ConversationRecord>,
    transcript: Vec<TranscriptEntry>,
    user_persisted: bool,
    usage: Option<Usage>,
    skipped_lines: u64,
}

impl Turn {
    fn new(
        client: InferenceClient,
        store: Arc<dyn Storage>,
        event_tx: mpsc::UnboundedSender<ChatEvent>,
        history: &[MessageRecord],
        conversation: Option<ConversationRecord>,
    ) -> Self {
        let transcript = history
            .iter()
            .filter(|message| message.role != MessageRole::System)
            .map(TranscriptEntry::from)
            .collect();

        Self {
            client,
            store,
            event_tx,
            conversation,
            transcript,
            user_persisted: false,
            usage: None,
            skipped_lines: 0,
        }
    }

    async fn run(
        mut self,
        request: TurnRequest,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> TurnOutcome {
        let (status, notice) = match self.drive(request, &mut cancel_rx).await {
            Ok(true) => (TurnStatus::Completed, None),
            Ok(false) => {
                tracing::debug!(conversation_id = ?self.conversation_id(), "chat turn cancelled");
                (TurnStatus::Cancelled, None)
            }
            Err(error) => {
                let status = self.fail(&error);
                (status, Some(ErrorNotice::from(&error)))
            }
        };

        TurnOutcome {
            status,
            conversation: self.conversation,
            transcript: self.transcript,
            usage: self.usage,
            notice,
            skipped_lines: self.skipped_lines,
        }
    }

    /// Returns `Ok(false)` when the turn was cancelled.
    async fn drive(
        &mut self,
        request: TurnRequest,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> ChatResult<bool> {
        let TurnRequest {
            conversation,
            history,
            user_message,
            model,
            system_prompt,
            response_mode,
            stream,
        } = request;

        let system_override = system_prompt
            .as_deref()
            .map(validate_system_prompt)
            .transpose()?;

        let conversation = match conversation {
            Some(conversation) => conversation,
            None => {
                self.create_conversation(&model, system_override.clone(), &user_message)
                    .await?
            }
        };
        self.conversation = Some(conversation.clone());

        let conversation_id = conversation.id;
        let content = user_message.clone();
        let user_record = with_store(&self.store, "persist-user-message", move |store| {
            store.add_message(conversation_id, NewMessage::user(content))
        })
        .await?;
        self.user_persisted = true;
        self.transcript.push(TranscriptEntry::from(&user_record));

        let system_prompt = system_override.unwrap_or(conversation.system_prompt);
        let messages = build_chat_messages(&system_prompt, response_mode, &history, &user_message);
        let chat_request = ChatRequest::new(model, messages);

        let reply = if stream {
            self.stream_reply(chat_request, cancel_rx).await?
        } else {
            self.single_reply(chat_request, cancel_rx).await?
        };
        let Some(reply) = reply else {
            return Ok(false);
        };

        let Reply { content, usage } = reply;
        let assistant_record = with_store(&self.store, "persist-assistant-message", move |store| {
            store.add_message(conversation_id, NewMessage::assistant(content))
        })
        .await?;

        self.usage = usage;
        self.transcript.push(TranscriptEntry::from(&assistant_record));
        self.emit(ChatEvent::TurnComplete {
            message: assistant_record,
            usage,
        });

        Ok(true)
    }

    async fn create_conversation(
        &self,
        model: &str,
        system_prompt: Option<String>,
        user_message: &str,
    ) -> ChatResult<ConversationRecord> {
        let mut input = NewConversation::new(DEFAULT_CONVERSATION_TITLE, model);
        if let Some(system_prompt) = system_prompt {
            input = input.with_system_prompt(system_prompt);
        }

        let conversation = with_store(&self.store, "create-conversation", move |store| {
            store.create_conversation(input)
        })
        .await?;
        tracing::debug!(conversation_id = %conversation.id, model = %model, "created conversation");
        self.emit(ChatEvent::ConversationCreated(conversation.clone()));

        TitleTask {
            client: self.client.clone(),
            store: Arc::clone(&self.store),
            conversation_id: conversation.id,
            model: model.to_string(),
            user_message: user_message.to_string(),
            event_tx: self.event_tx.clone(),
        }
        .spawn();

        Ok(conversation)
    }

    async fn single_reply(
        &self,
        request: ChatRequest,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> ChatResult<Option<Reply>> {
        let response = tokio::select! {
            _ = &mut *cancel_rx => return Ok(None),
            response = self.client.chat(request) => response,
        };
        let response = response.map_err(|source| self.llm_failure("chat-request", source))?;

        Ok(Some(Reply {
            usage: response.usage(),
            content: response
                .message
                .map(|message| message.content)
                .unwrap_or_default(),
        }))
    }

    async fn stream_reply(
        &mut self,
        request: ChatRequest,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> ChatResult<Option<Reply>> {
        let opened = tokio::select! {
            _ = &mut *cancel_rx => return Ok(None),
            opened = self.client.chat_stream(request) => opened,
        };
        let mut chunks = opened.map_err(|source| self.llm_failure("open-chat-stream", source))?;

        let mut accumulated = String::new();
        let result = loop {
            tokio::select! {
                _ = &mut *cancel_rx => break Ok(None),
                next = chunks.next_chunk() => match next {
                    Some(Ok(chunk)) => {
                        if let Some(fragment) = chunk.content() {
                            accumulated.push_str(fragment);
                            self.emit(ChatEvent::PartialContent(accumulated.clone()));
                        }
                        if chunk.done {
                            break Ok(Some(Reply {
                                content: std::mem::take(&mut accumulated),
                                usage: chunk.usage(),
                            }));
                        }
                    }
                    Some(Err(source)) => break Err(self.llm_failure("read-chat-stream", source)),
                    None => break IncompleteStreamSnafu { stage: "read-chat-stream" }.fail(),
                },
            }
        };

        // Dropping the body here closes the connection, also on cancel.
        let summary = chunks.finish();
        self.skipped_lines = summary.skipped_lines;
        tracing::debug!(
            conversation_id = ?self.conversation_id(),
            decoded_records = summary.decoded_records,
            skipped_lines = summary.skipped_lines,
            discarded_trailing_bytes = summary.discarded_trailing_bytes,
            "chat stream closed"
        );

        result
    }

    fn fail(&mut self, error: &ChatError) -> TurnStatus {
        tracing::error!(
            conversation_id = ?self.conversation_id(),
            error = %error,
            "chat turn failed"
        );
        self.emit(ChatEvent::Error(ErrorNotice::from(error)));

        if self.user_persisted {
            self.transcript.push(TranscriptEntry::synthetic(FAILED_REPLY_TEXT));
        }

        if error.is_service_unreachable() {
            TurnStatus::ServiceUnreachable
        } else {
            TurnStatus::TurnFailed
        }
    }

    fn llm_failure(&self, stage: &'static str, source: localchat_llm::LlmError) -> ChatError {
        ChatError::from_llm(stage, self.client.endpoint(), source)
    }

    fn conversation_id(&self) -> Option<String> {
        self.conversation
            .as_ref()
            .map(|conversation| conversation.id.to_string())
    }

    fn emit(&self, event: ChatEvent) {
        // A closed receiver means the consumer went away; the cancel signal follows.
        let _ = self.event_tx.send(event);
    }
}
