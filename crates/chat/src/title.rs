use std::sync::Arc;

use localchat_llm::{ChatRequest, InferenceClient, WireMessage};
use localchat_storage::{ConversationId, ConversationRecord, ConversationStore, Storage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::{ChatError, ChatResult};
use super::events::ChatEvent;
use super::reasoning::split_reasoning;
use super::session::with_store;

pub const TITLE_INSTRUCTION: &str = "Write a short title of at most six words for a conversation that starts with the following message. Reply with the title only.";

const MAX_TITLE_CHARS: usize = 60;
const TITLE_LABEL: &str = "title:";

/// Reduces a model reply to a single-line title, or `None` if nothing usable is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let answer = split_reasoning(raw).answer;
    let line = answer.lines().map(str::trim).find(|line| !line.is_empty())?;

    let line = match line.get(..TITLE_LABEL.len()) {
        Some(label) if label.eq_ignore_ascii_case(TITLE_LABEL) => &line[TITLE_LABEL.len()..],
        _ => line,
    };

    let title = line
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '*' | '#' | '`'))
        .trim_end_matches(['.', '!'])
        .trim_end();
    if title.is_empty() {
        return None;
    }

    if title.chars().count() <= MAX_TITLE_CHARS {
        return Some(title.to_string());
    }
    let truncated = title.chars().take(MAX_TITLE_CHARS).collect::<String>();
    Some(truncated.trim_end().to_string())
}

/// Names a freshly created conversation from its first user message.
pub(crate) struct TitleTask {
    pub client: InferenceClient,
    pub store: Arc<dyn Storage>,
    pub conversation_id: ConversationId,
    pub model: String,
    pub user_message: String,
    pub event_tx: mpsc::UnboundedSender<ChatEvent>,
}

impl TitleTask {
    /// Detached: failures are logged and the placeholder title stays.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let conversation_id = self.conversation_id;
            let event_tx = self.event_tx.clone();

            match self.run().await {
                Ok(Some(updated)) => {
                    tracing::debug!(conversation_id = %conversation_id, title = %updated.title, "stored generated title");
                    let _ = event_tx.send(ChatEvent::ConversationUpdated(updated));
                }
                Ok(None) => {
                    tracing::warn!(conversation_id = %conversation_id, "generated title was empty");
                }
                Err(error) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %error,
                        "failed to generate conversation title"
                    );
                }
            }
        })
    }

    async fn run(self) -> ChatResult<Option<ConversationRecord>> {
        let request = ChatRequest::new(
            self.model,
            vec![
                WireMessage::system(TITLE_INSTRUCTION),
                WireMessage::user(self.user_message),
            ],
        );

        let response = self
            .client
            .chat(request)
            .await
            .map_err(|source| {
                ChatError::from_llm("generate-title", self.client.endpoint(), source)
            })?;

        let Some(title) = response
            .message
            .as_ref()
            .and_then(|message| clean_title(&message.content))
        else {
            return Ok(None);
        };

        let conversation_id = self.conversation_id;
        let updated = with_store(&self.store, "store-generated-title", move |store| {
            store.update_title(conversation_id, title)
        })
        .await?;

        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_title_strips_reasoning_and_decoration() {
        assert_eq!(
            clean_title("<think>short greeting</think>\n\n\"Friendly Greeting.\"\nextra"),
            Some("Friendly Greeting".to_string())
        );
        assert_eq!(
            clean_title("Title: **Rust Lifetimes**"),
            Some("Rust Lifetimes".to_string())
        );
    }

    #[test]
    fn clean_title_rejects_empty_replies() {
        assert_eq!(clean_title(""), None);
        assert_eq!(clean_title("<think>hmm</think>  \n \"\""), None);
        assert_eq!(clean_title("<think>never closed"), None);
    }

    #[test]
    fn clean_title_truncates_on_char_boundaries() {
        let title = clean_title(&"ü".repeat(80)).expect("title");
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
    }
}
