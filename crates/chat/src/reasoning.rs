const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Assistant content with a leading `<think>` segment separated out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningSplit<'a> {
    /// `Some` while or after the model reasons; an unclosed segment runs to the end.
    pub reasoning: Option<&'a str>,
    pub answer: &'a str,
}

pub fn split_reasoning(content: &str) -> ReasoningSplit<'_> {
    let Some(after_open) = content.trim_start().strip_prefix(OPEN_TAG) else {
        return ReasoningSplit {
            reasoning: None,
            answer: content,
        };
    };

    match after_open.find(CLOSE_TAG) {
        Some(close) => ReasoningSplit {
            reasoning: Some(after_open[..close].trim()),
            answer: after_open[close + CLOSE_TAG.len()..].trim_start(),
        },
        None => ReasoningSplit {
            reasoning: Some(after_open.trim()),
            answer: "",
        },
    }
}
