pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ConversationId, MessageId};
pub use sqlite::SqliteStorage;
pub use types::{
    ConversationRecord, DEFAULT_CONVERSATION_TITLE, DEFAULT_SYSTEM_PROMPT, MessageRecord,
    MessageRole, NewConversation, NewMessage,
};

pub trait ConversationStore: Send + Sync {
    fn create_conversation(&self, input: NewConversation) -> StorageResult<ConversationRecord>;
    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StorageResult<Option<ConversationRecord>>;
    fn list_conversations(&self) -> StorageResult<Vec<ConversationRecord>>;
    fn update_title(
        &self,
        conversation_id: ConversationId,
        title: String,
    ) -> StorageResult<ConversationRecord>;
    fn update_system_prompt(
        &self,
        conversation_id: ConversationId,
        system_prompt: String,
    ) -> StorageResult<ConversationRecord>;
    /// Removes the conversation together with its messages. Unknown ids are a no-op.
    fn delete_conversation(&self, conversation_id: ConversationId) -> StorageResult<()>;
}

pub trait MessageStore: Send + Sync {
    fn add_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord>;
    fn list_messages(&self, conversation_id: ConversationId) -> StorageResult<Vec<MessageRecord>>;
}

pub trait Storage: ConversationStore + MessageStore {}

impl<T> Storage for T where T: ConversationStore + MessageStore {}
