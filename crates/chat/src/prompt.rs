use std::fmt;
use std::str::FromStr;

use localchat_llm::WireMessage;
use localchat_storage::{MessageRecord, MessageRole};
use serde::{Deserialize, Serialize};
use snafu::ensure;

use super::error::{ChatResult, InvalidSystemPromptSnafu};

pub const MAX_SYSTEM_PROMPT_CHARS: usize = 2000;

/// Answer style requested from the model, sent as a directive after the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Concise,
    #[default]
    Normal,
    Longform,
}

impl ResponseMode {
    pub const ALL: [Self; 3] = [Self::Concise, Self::Normal, Self::Longform];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Normal => "normal",
            Self::Longform => "longform",
        }
    }

    pub fn directive(&self) -> &'static str {
        match self {
            Self::Concise => "Keep answers brief and direct, focusing on the key points.",
            Self::Normal => {
                "Give balanced answers with short explanations and examples where they help."
            }
            Self::Longform => "Give detailed answers with comprehensive context and analysis.",
        }
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                format!("unknown response mode `{raw}`, expected concise, normal or longform")
            })
    }
}

/// Trims `raw` and checks it against the length cap.
pub fn validate_system_prompt(raw: &str) -> ChatResult<String> {
    let prompt = raw.trim();
    ensure!(
        !prompt.is_empty(),
        InvalidSystemPromptSnafu {
            stage: "validate-system-prompt",
            reason: "prompt is empty".to_string(),
        }
    );

    let length = prompt.chars().count();
    ensure!(
        length <= MAX_SYSTEM_PROMPT_CHARS,
        InvalidSystemPromptSnafu {
            stage: "validate-system-prompt",
            reason: format!(
                "prompt has {length} characters, the limit is {MAX_SYSTEM_PROMPT_CHARS}"
            ),
        }
    );

    Ok(prompt.to_string())
}

pub fn compose_system_message(system_prompt: &str, mode: ResponseMode) -> String {
    format!("{}\n\n{}", system_prompt.trim_end(), mode.directive())
}

/// Builds the outgoing message list for one turn.
///
/// Stored `system` rows are dropped because the directive is re-sent at the head
/// of every request.
pub fn build_chat_messages(
    system_prompt: &str,
    mode: ResponseMode,
    history: &[MessageRecord],
    user_message: &str,
) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(WireMessage::system(compose_system_message(system_prompt, mode)));

    for message in history {
        match message.role {
            MessageRole::System => continue,
            MessageRole::User => messages.push(WireMessage::user(message.content.clone())),
            MessageRole::Assistant => {
                messages.push(WireMessage::assistant(message.content.clone()))
            }
        }
    }

    messages.push(WireMessage::user(user_message));
    messages
}

#[cfg(test)]
mod tests {
    use localchat_llm::Role;
    use localchat_storage::{ConversationId, MessageId};

    use super::*;

    fn record(role: MessageRole, content: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            conversation_id: ConversationId::new_v7(),
            role,
            content: content.to_string(),
            created_at: Default::default(),
        }
    }

    #[test]
    fn response_mode_parses_case_insensitively() {
        assert_eq!("Concise".parse::<ResponseMode>(), Ok(ResponseMode::Concise));
        assert_eq!(" longform ".parse::<ResponseMode>(), Ok(ResponseMode::Longform));
        assert!("verbose".parse::<ResponseMode>().is_err());
        assert_eq!(ResponseMode::default(), ResponseMode::Normal);
    }

    #[test]
    fn system_prompt_is_trimmed_and_capped() {
        assert_eq!(
            validate_system_prompt("  Be terse.\n").expect("valid prompt"),
            "Be terse."
        );
        assert!(validate_system_prompt(" \n\t").is_err());

        let at_limit = "a".repeat(MAX_SYSTEM_PROMPT_CHARS);
        assert!(validate_system_prompt(&at_limit).is_ok());

        let over_limit = "é".repeat(MAX_SYSTEM_PROMPT_CHARS + 1);
        assert!(matches!(
            validate_system_prompt(&over_limit),
            Err(crate::ChatError::InvalidSystemPrompt { .. })
        ));
    }

    #[test]
    fn chat_messages_skip_stored_system_rows() {
        let history = vec![
            record(MessageRole::System, "old directive"),
            record(MessageRole::User, "Hi"),
            record(MessageRole::Assistant, "Hello"),
        ];

        let messages =
            build_chat_messages("Be terse.", ResponseMode::Concise, &history, "How are you?");

        let roles = messages.iter().map(|message| message.role).collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(
            messages[0].content,
            format!("Be terse.\n\n{}", ResponseMode::Concise.directive())
        );
        assert_eq!(messages[3].content, "How are you?");
    }
}
