//! Chat turn orchestration: streaming a reply, publishing events and
//! persisting the transcript.

pub mod error;
pub mod events;
pub mod prompt;
pub mod reasoning;
pub mod session;
pub mod title;

#[cfg(test)]
mod test_support;

pub use error::{ChatError, ChatResult, ErrorNotice};
pub use events::{ChatEvent, TurnEventStream};
pub use prompt::{
    MAX_SYSTEM_PROMPT_CHARS, ResponseMode, build_chat_messages, compose_system_message,
    validate_system_prompt,
};
pub use reasoning::{ReasoningSplit, split_reasoning};
pub use session::{
    ChatSession, FAILED_REPLY_TEXT, TranscriptEntry, TurnHandle, TurnOutcome, TurnRequest,
    TurnStatus, TurnWorker,
};
pub use title::{TITLE_INSTRUCTION, clean_title};
