use std::io::{self, Write};

use localchat_chat::{ChatEvent, split_reasoning};
use localchat_llm::Usage;

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const THINK_OPEN: &str = "<think>";

/// Writes turn events to a terminal. The answer goes to `out`, everything else to `err`.
pub struct TerminalRenderer<O, E> {
    out: O,
    err: E,
    show_reasoning: bool,
    reasoning_printed: usize,
    answer_printed: usize,
}

impl TerminalRenderer<io::Stdout, io::Stderr> {
    pub fn stdio(show_reasoning: bool) -> Self {
        Self::new(io::stdout(), io::stderr(), show_reasoning)
    }
}

impl<O: Write, E: Write> TerminalRenderer<O, E> {
    pub fn new(out: O, err: E, show_reasoning: bool) -> Self {
        Self {
            out,
            err,
            show_reasoning,
            reasoning_printed: 0,
            answer_printed: 0,
        }
    }

    pub fn render(&mut self, event: &ChatEvent) -> io::Result<()> {
        match event {
            ChatEvent::ConversationCreated(conversation) => {
                writeln!(self.err, "{DIM}conversation {}{RESET}", conversation.id)?;
            }
            ChatEvent::ConversationUpdated(conversation) => {
                writeln!(self.err, "{DIM}titled \"{}\"{RESET}", conversation.title)?;
            }
            ChatEvent::PartialContent(text) => self.write_content(text, false)?,
            ChatEvent::TurnComplete { message, usage } => {
                self.write_content(&message.content, true)?;
                writeln!(self.out)?;
                if let Some(usage) = usage {
                    writeln!(self.err, "{DIM}{}{RESET}", describe_usage(usage))?;
                }
            }
            ChatEvent::Error(notice) => {
                if self.answer_printed > 0 {
                    writeln!(self.out)?;
                }
                writeln!(self.err, "{}\n{}", notice.message, notice.details)?;
            }
        }

        self.out.flush()?;
        self.err.flush()
    }

    /// Prints whatever part of the cumulative `content` has not been printed yet.
    /// Partial text that may still turn into a `<think>` tag is held back.
    fn write_content(&mut self, content: &str, complete: bool) -> io::Result<()> {
        let split = split_reasoning(content);
        if !complete && split.reasoning.is_none() && self.answer_printed == 0 {
            let opening = content.trim_start();
            let maybe_tag = opening.len() < THINK_OPEN.len() && THINK_OPEN.starts_with(opening);
            if !opening.is_empty() && maybe_tag {
                return Ok(());
            }
        }

        if let Some(reasoning) = split.reasoning
            && self.show_reasoning
            && let Some(fresh) = reasoning.get(self.reasoning_printed..)
            && !fresh.is_empty()
        {
            write!(self.err, "{DIM}{fresh}{RESET}")?;
            self.reasoning_printed = reasoning.len();
        }

        if let Some(fresh) = split.answer.get(self.answer_printed..)
            && !fresh.is_empty()
        {
            if self.answer_printed == 0 && self.reasoning_printed > 0 {
                writeln!(self.err)?;
            }
            write!(self.out, "{fresh}")?;
            self.answer_printed = split.answer.len();
        }

        Ok(())
    }
}

pub fn describe_usage(usage: &Usage) -> String {
    let mut parts = Vec::new();
    if let Some(prompt) = usage.prompt_eval_count {
        parts.push(format!("{prompt} prompt tokens"));
    }
    if let Some(eval) = usage.eval_count {
        parts.push(format!("{eval} reply tokens"));
    }
    if let Some(speed) = usage.tokens_per_second() {
        parts.push(format!("{speed:.1} tokens/s"));
    }
    if let Some(total) = usage.total_duration {
        parts.push(format!("{:.2}s total", total as f64 / 1_000_000_000.0));
    }
    parts.join(", ")
}
