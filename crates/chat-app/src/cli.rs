use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use localchat_chat::ResponseMode;
use localchat_storage::ConversationId;

#[derive(Debug, Parser)]
#[command(name = "localchat", version)]
#[command(about = "Chat with a local Ollama server and keep the history in SQLite")]
pub struct Cli {
    /// Settings file (defaults to <config_dir>/localchat/settings.json)
    #[arg(long, global = true, env = "LOCALCHAT_SETTINGS_FILE")]
    pub settings: Option<PathBuf>,

    /// SQLite database file, overriding the configured one
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Log at debug level instead of warn
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a message, starting a new conversation unless --conversation is given
    Chat(ChatArgs),
    /// List conversations, newest first
    List,
    /// Print a conversation transcript
    Show { id: ConversationId },
    /// Rename a conversation
    Rename { id: ConversationId, title: String },
    /// Print or replace a conversation's system prompt
    System {
        id: ConversationId,
        prompt: Option<String>,
    },
    /// Delete a conversation and its messages
    Delete { id: ConversationId },
    /// Print or change persisted settings
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Continue this conversation
    #[arg(long, short = 'c')]
    pub conversation: Option<ConversationId>,

    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// System prompt for this turn; stored when a new conversation is started
    #[arg(long)]
    pub system: Option<String>,

    /// concise, normal or longform
    #[arg(long)]
    pub mode: Option<ResponseMode>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Print <think> reasoning to stderr
    #[arg(long)]
    pub show_reasoning: bool,

    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,
}

impl ChatArgs {
    pub fn message_text(&self) -> String {
        self.message.join(" ").trim().to_string()
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub mode: Option<ResponseMode>,

    #[arg(long, value_name = "BOOL")]
    pub stream: Option<bool>,

    #[arg(long, value_name = "PATH")]
    pub database_path: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS")]
    pub request_timeout: Option<u64>,
}

impl ConfigArgs {
    pub fn has_changes(&self) -> bool {
        self.base_url.is_some()
            || self.model.is_some()
            || self.mode.is_some()
            || self.stream.is_some()
            || self.database_path.is_some()
            || self.request_timeout.is_some()
    }
}
