use std::process::ExitCode;
use std::sync::Arc;

use localchat_chat::{
    ChatError, ChatSession, TurnHandle, TurnRequest, TurnStatus, split_reasoning,
    validate_system_prompt,
};
use localchat_llm::{InferenceClient, TransportError};
use localchat_storage::{
    ConversationId, ConversationRecord, ConversationStore, MessageRole, MessageStore,
    SqliteStorage, Storage, StorageError,
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::cli::{ChatArgs, Cli, Command, ConfigArgs};
use crate::render::TerminalRenderer;
use crate::settings::{AppSettings, SettingsError, SettingsStore};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("settings failed on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to build inference client: {source}"))]
    BuildClient {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("{source}"))]
    Chat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("conversation {id} does not exist"))]
    ConversationNotFound {
        stage: &'static str,
        id: ConversationId,
    },
    #[snafu(display("{details}"))]
    InvalidInput { stage: &'static str, details: String },
    #[snafu(display("chat worker stopped unexpectedly: {source}"))]
    Worker {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
    #[snafu(display("failed to write to the terminal: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub async fn run(cli: Cli) -> AppResult<ExitCode> {
    let settings_store = match cli.settings {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let mut settings_store = settings_store.context(SettingsSnafu {
        stage: "load-settings",
    })?;

    if let Command::Config(args) = &cli.command {
        configure(&mut settings_store, args)?;
        return Ok(ExitCode::SUCCESS);
    }

    let settings = settings_store.settings().clone();
    let database_path = cli.database.unwrap_or_else(|| settings.database_path());
    tracing::debug!(database = ?database_path, base_url = %settings.base_url, "starting");
    let store: Arc<dyn Storage> = Arc::new(
        SqliteStorage::open(&database_path.to_string_lossy())
            .await
            .context(StorageSnafu {
                stage: "open-database",
            })?,
    );

    match cli.command {
        Command::Chat(args) => chat(&settings, store, args).await,
        Command::List => list(store.as_ref()).map(|_| ExitCode::SUCCESS),
        Command::Show { id } => show(store.as_ref(), id).map(|_| ExitCode::SUCCESS),
        Command::Rename { id, title } => {
            rename(store.as_ref(), id, &title).map(|_| ExitCode::SUCCESS)
        }
        Command::System { id, prompt } => {
            system_prompt(store.as_ref(), id, prompt.as_deref()).map(|_| ExitCode::SUCCESS)
        }
        Command::Delete { id } => delete(store.as_ref(), id).map(|_| ExitCode::SUCCESS),
        Command::Config(_) => Ok(ExitCode::SUCCESS),
    }
}

async fn chat(
    settings: &AppSettings,
    store: Arc<dyn Storage>,
    args: ChatArgs,
) -> AppResult<ExitCode> {
    let message = args.message_text();
    ensure!(
        !message.is_empty(),
        InvalidInputSnafu {
            stage: "chat-message",
            details: "message is empty".to_string(),
        }
    );

    let existing = match args.conversation {
        Some(id) => {
            let conversation = find_conversation(store.as_ref(), id)?;
            let history = store.list_messages(conversation.id).context(StorageSnafu {
                stage: "load-history",
            })?;
            Some((conversation, history))
        }
        None => None,
    };

    let model = args
        .model
        .clone()
        .or_else(|| existing.as_ref().map(|(conversation, _)| conversation.model_name.clone()))
        .unwrap_or_else(|| settings.default_model.clone());

    let client = InferenceClient::http(settings.transport_config()).context(BuildClientSnafu {
        stage: "build-inference-client",
    })?;
    let session = ChatSession::new(client, store);

    let mut request = TurnRequest::new(model, message)
        .with_response_mode(args.mode.unwrap_or(settings.response_mode))
        .with_stream(settings.stream && !args.no_stream);
    if let Some((conversation, history)) = existing {
        request = request.with_conversation(conversation, history);
    }
    if let Some(system) = args.system {
        request = request.with_system_prompt(system);
    }

    let TurnHandle { mut events, worker } = session.start(request);
    let worker = tokio::spawn(worker);
    let mut renderer = TerminalRenderer::stdio(args.show_reasoning);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => renderer.render(&event).context(TerminalSnafu {
                    stage: "render-event",
                })?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("interrupt received, cancelling turn");
                events.cancel();
                break;
            }
        }
    }

    let outcome = worker.await.context(WorkerSnafu {
        stage: "join-chat-worker",
    })?;
    if outcome.skipped_lines > 0 {
        tracing::warn!(
            skipped_lines = outcome.skipped_lines,
            "ignored malformed lines in the reply stream"
        );
    }

    Ok(match outcome.status {
        TurnStatus::Completed => ExitCode::SUCCESS,
        TurnStatus::Cancelled => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
        TurnStatus::ServiceUnreachable | TurnStatus::TurnFailed => ExitCode::FAILURE,
    })
}

fn list(store: &dyn Storage) -> AppResult<()> {
    let conversations = store.list_conversations().context(StorageSnafu {
        stage: "list-conversations",
    })?;

    if conversations.is_empty() {
        println!("no conversations yet");
        return Ok(());
    }

    for conversation in conversations {
        println!(
            "{}  {}  {:<16}  {}",
            conversation.id,
            conversation.created_at.format("%Y-%m-%d %H:%M"),
            conversation.model_name,
            conversation.title
        );
    }
    Ok(())
}

fn show(store: &dyn Storage, id: ConversationId) -> AppResult<()> {
    let conversation = find_conversation(store, id)?;
    let messages = store.list_messages(conversation.id).context(StorageSnafu {
        stage: "list-messages",
    })?;

    println!("{} ({})", conversation.title, conversation.model_name);
    println!("system: {}", conversation.system_prompt);
    for message in messages {
        let content = match message.role {
            MessageRole::Assistant => split_reasoning(&message.content).answer,
            MessageRole::User | MessageRole::System => message.content.as_str(),
        };
        println!("\n{}: {}", message.role.as_str(), content);
    }
    Ok(())
}

fn rename(store: &dyn Storage, id: ConversationId, title: &str) -> AppResult<()> {
    let title = title.trim();
    ensure!(
        !title.is_empty(),
        InvalidInputSnafu {
            stage: "rename-title",
            details: "title is empty".to_string(),
        }
    );

    let updated = store
        .update_title(id, title.to_string())
        .map_err(|error| not_found_or_storage(error, id, "update-title"))?;
    println!("renamed {} to \"{}\"", updated.id, updated.title);
    Ok(())
}

fn system_prompt(store: &dyn Storage, id: ConversationId, prompt: Option<&str>) -> AppResult<()> {
    let Some(prompt) = prompt else {
        let conversation = find_conversation(store, id)?;
        println!("{}", conversation.system_prompt);
        return Ok(());
    };

    let prompt = validate_system_prompt(prompt).context(ChatSnafu {
        stage: "validate-system-prompt",
    })?;
    let updated = store
        .update_system_prompt(id, prompt)
        .map_err(|error| not_found_or_storage(error, id, "update-system-prompt"))?;
    println!("updated system prompt of {}", updated.id);
    Ok(())
}

fn delete(store: &dyn Storage, id: ConversationId) -> AppResult<()> {
    store.delete_conversation(id).context(StorageSnafu {
        stage: "delete-conversation",
    })?;
    println!("deleted {id}");
    Ok(())
}

fn configure(settings_store: &mut SettingsStore, args: &ConfigArgs) -> AppResult<()> {
    if args.has_changes() {
        settings_store
            .update(|settings| {
                if let Some(base_url) = &args.base_url {
                    settings.base_url = base_url.clone();
                }
                if let Some(model) = &args.model {
                    settings.default_model = model.clone();
                }
                if let Some(mode) = args.mode {
                    settings.response_mode = mode;
                }
                if let Some(stream) = args.stream {
                    settings.stream = stream;
                }
                if let Some(path) = &args.database_path {
                    settings.database_path = Some(path.clone());
                }
                if let Some(timeout) = args.request_timeout {
                    settings.request_timeout_secs = timeout;
                }
            })
            .context(SettingsSnafu {
                stage: "update-settings",
            })?;
    }

    let settings = settings_store.settings();
    println!("# {}", settings_store.config_path().display());
    println!("base_url = {}", settings.base_url);
    println!("default_model = {}", settings.default_model);
    println!("database_path = {}", settings.database_path().display());
    println!("request_timeout_secs = {}", settings.request_timeout_secs);
    println!("connect_timeout_secs = {}", settings.connect_timeout_secs);
    println!("response_mode = {}", settings.response_mode);
    println!("stream = {}", settings.stream);
    Ok(())
}

fn find_conversation(store: &dyn Storage, id: ConversationId) -> AppResult<ConversationRecord> {
    store
        .get_conversation(id)
        .context(StorageSnafu {
            stage: "get-conversation",
        })?
        .context(ConversationNotFoundSnafu {
            stage: "get-conversation",
            id,
        })
}

fn not_found_or_storage(
    error: StorageError,
    id: ConversationId,
    stage: &'static str,
) -> AppError {
    if error.is_not_found() {
        AppError::ConversationNotFound { stage, id }
    } else {
        AppError::Storage {
            stage,
            source: error,
        }
    }
}
