use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection, SqlitePool};

use super::error::{
    ConstraintViolationSnafu, CreateSqliteDirectorySnafu, InvalidTimestampSnafu,
    InvariantViolationSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu,
    SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu,
    SqliteThreadSpawnSnafu, StorageError, StorageResult,
};
use super::ids::{ConversationId, MessageId};
use super::types::{
    ConversationRecord, DEFAULT_CONVERSATION_TITLE, DEFAULT_SYSTEM_PROMPT, MessageRecord,
    MessageRole, NewConversation, NewMessage,
};
use super::{ConversationStore, MessageStore};

/// SQLite `datetime('now')` layout with millisecond precision appended.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SELECT_CONVERSATION_COLUMNS: &str = "SELECT id, title, model_name, system_prompt, CAST(created_at AS TEXT) AS created_at FROM conversations";
const SELECT_MESSAGE_COLUMNS: &str = "SELECT id, conversation_id, role, content, CAST(created_at AS TEXT) AS created_at FROM messages";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        if database_location.trim() == ":memory:" || database_location.contains("mode=memory") {
            // Every store call opens its own connection, so a private in-memory db would vanish.
            return InvariantViolationSnafu {
                stage: "sqlite-open-reject-memory",
                details: "in-memory sqlite databases are not supported".to_string(),
            }
            .fail();
        }

        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "opened sqlite conversation store");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl ConversationStore for SqliteStorage {
    fn create_conversation(&self, input: NewConversation) -> StorageResult<ConversationRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("conversation-create", async move {
            let mut connection =
                connect_store_connection(&database_url, "conversation-create-connect").await?;

            let title = if input.title.trim().is_empty() {
                DEFAULT_CONVERSATION_TITLE.to_string()
            } else {
                input.title
            };
            let system_prompt = input
                .system_prompt
                .filter(|prompt| !prompt.trim().is_empty());
            let conversation_id = ConversationId::new_v7();
            let created_at = now_millis();

            sqlx::query(
                "INSERT INTO conversations (id, title, model_name, system_prompt, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(conversation_id.to_string())
            .bind(title.clone())
            .bind(input.model_name.clone())
            .bind(system_prompt.clone())
            .bind(timestamp_to_sql(created_at))
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-create-insert",
            })?;

            Ok(ConversationRecord {
                id: conversation_id,
                title,
                model_name: input.model_name,
                system_prompt: resolve_system_prompt(system_prompt),
                created_at,
            })
        })
    }

    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StorageResult<Option<ConversationRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("conversation-get", async move {
            let mut connection =
                connect_store_connection(&database_url, "conversation-get-connect").await?;
            load_conversation(&mut connection, conversation_id, "conversation-get-query").await
        })
    }

    fn list_conversations(&self) -> StorageResult<Vec<ConversationRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("conversation-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "conversation-list-connect").await?;
            let rows = sqlx::query_as::<_, ConversationRow>(&format!(
                "{SELECT_CONVERSATION_COLUMNS} ORDER BY created_at DESC, rowid DESC"
            ))
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-list-query",
            })?;

            rows.into_iter().map(conversation_row_to_record).collect()
        })
    }

    fn update_title(
        &self,
        conversation_id: ConversationId,
        title: String,
    ) -> StorageResult<ConversationRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("conversation-update-title", async move {
            let mut connection =
                connect_store_connection(&database_url, "conversation-update-title-connect")
                    .await?;
            let update_result = sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
                .bind(title)
                .bind(conversation_id.to_string())
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "conversation-update-title-apply",
                })?;

            if update_result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "conversation-update-title-missing",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                }
                .fail();
            }

            load_conversation(
                &mut connection,
                conversation_id,
                "conversation-update-title-load",
            )
            .await?
            .context(NotFoundSnafu {
                stage: "conversation-update-title-load-missing",
                entity: "conversation",
                id: conversation_id.to_string(),
            })
        })
    }

    fn update_system_prompt(
        &self,
        conversation_id: ConversationId,
        system_prompt: String,
    ) -> StorageResult<ConversationRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("conversation-update-system-prompt", async move {
            let mut connection = connect_store_connection(
                &database_url,
                "conversation-update-system-prompt-connect",
            )
            .await?;
            let stored_prompt = Some(system_prompt).filter(|prompt| !prompt.trim().is_empty());
            let update_result =
                sqlx::query("UPDATE conversations SET system_prompt = ? WHERE id = ?")
                    .bind(stored_prompt)
                    .bind(conversation_id.to_string())
                    .execute(&mut connection)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "conversation-update-system-prompt-apply",
                    })?;

            if update_result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "conversation-update-system-prompt-missing",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                }
                .fail();
            }

            load_conversation(
                &mut connection,
                conversation_id,
                "conversation-update-system-prompt-load",
            )
            .await?
            .context(NotFoundSnafu {
                stage: "conversation-update-system-prompt-load-missing",
                entity: "conversation",
                id: conversation_id.to_string(),
            })
        })
    }

    fn delete_conversation(&self, conversation_id: ConversationId) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        self.run_db_call("conversation-delete", async move {
            let mut connection =
                connect_store_connection(&database_url, "conversation-delete-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "conversation-delete-begin",
            })?;

            // The FK cascade covers this too; deleting explicitly keeps databases opened
            // without foreign key enforcement consistent.
            let removed_messages = sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
                .bind(conversation_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "conversation-delete-messages",
                })?
                .rows_affected();

            let removed_conversations = sqlx::query("DELETE FROM conversations WHERE id = ?")
                .bind(conversation_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "conversation-delete-conversation",
                })?
                .rows_affected();

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "conversation-delete-commit",
            })?;

            tracing::debug!(
                conversation_id = %conversation_id,
                removed_conversations,
                removed_messages,
                "deleted conversation"
            );
            Ok(())
        })
    }
}

impl MessageStore for SqliteStorage {
    fn add_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> StorageResult<MessageRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-add", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-add-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-add-begin",
            })?;

            if !conversation_exists(&mut tx, conversation_id).await? {
                return ConstraintViolationSnafu {
                    stage: "message-add-missing-conversation",
                    entity: "message",
                    details: format!("conversation '{conversation_id}' does not exist"),
                }
                .fail();
            }

            // Clamp to the newest stored timestamp so a clock step backwards cannot
            // reorder the transcript.
            let latest = sqlx::query_scalar::<_, Option<String>>(
                "SELECT MAX(CAST(created_at AS TEXT)) FROM messages WHERE conversation_id = ?",
            )
            .bind(conversation_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-add-latest-created-at",
            })?;

            let now = now_millis();
            let created_at = match latest {
                Some(raw) => {
                    let latest = timestamp_from_sql(&raw, "message-add-latest-parse")?;
                    now.max(latest)
                }
                None => now,
            };
            let message_id = MessageId::new_v7();

            sqlx::query(
                "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(conversation_id.to_string())
            .bind(input.role.as_str())
            .bind(input.content.clone())
            .bind(timestamp_to_sql(created_at))
            .execute(&mut *tx)
            .await
            .map_err(|source| map_message_insert_error(source, conversation_id))?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-add-commit",
            })?;

            Ok(MessageRecord {
                id: message_id,
                conversation_id,
                role: input.role,
                content: input.content,
                created_at,
            })
        })
    }

    fn list_messages(&self, conversation_id: ConversationId) -> StorageResult<Vec<MessageRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-list-connect").await?;
            let rows = sqlx::query_as::<_, MessageRow>(&format!(
                "{SELECT_MESSAGE_COLUMNS} WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC"
            ))
            .bind(conversation_id.to_string())
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    model_name: String,
    system_prompt: Option<String>,
    created_at: String,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    created_at: String,
}

fn conversation_row_to_record(row: ConversationRow) -> StorageResult<ConversationRecord> {
    Ok(ConversationRecord {
        id: ConversationId::parse(&row.id)?,
        title: row.title,
        model_name: row.model_name,
        system_prompt: resolve_system_prompt(row.system_prompt),
        created_at: timestamp_from_sql(&row.created_at, "conversation-row-created-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        conversation_id: ConversationId::parse(&row.conversation_id)?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        created_at: timestamp_from_sql(&row.created_at, "message-row-created-at")?,
    })
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-foreign-keys",
            pragma: "foreign_keys",
        })?;
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

async fn load_conversation(
    connection: &mut SqliteConnection,
    conversation_id: ConversationId,
    stage: &'static str,
) -> StorageResult<Option<ConversationRecord>> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "{SELECT_CONVERSATION_COLUMNS} WHERE id = ?"
    ))
    .bind(conversation_id.to_string())
    .fetch_optional(&mut *connection)
    .await
    .context(SqliteQuerySnafu { stage })?;

    row.map(conversation_row_to_record).transpose()
}

async fn conversation_exists(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    conversation_id: ConversationId,
) -> StorageResult<bool> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM conversations WHERE id = ? LIMIT 1")
        .bind(conversation_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "conversation-exists-query",
        })?;

    Ok(existing.is_some())
}

fn map_message_insert_error(source: sqlx::Error, conversation_id: ConversationId) -> StorageError {
    if let sqlx::Error::Database(database_error) = &source
        && database_error.is_foreign_key_violation()
    {
        return StorageError::ConstraintViolation {
            stage: "message-add-insert-foreign-key",
            entity: "message",
            details: format!("conversation '{conversation_id}' does not exist"),
        };
    }

    StorageError::SqliteQuery {
        stage: "message-add-insert",
        source,
    }
}

fn resolve_system_prompt(stored: Option<String>) -> String {
    stored
        .filter(|prompt| !prompt.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "system" => Ok(MessageRole::System),
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn timestamp_to_sql(timestamp: DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn timestamp_from_sql(raw: &str, stage: &'static str) -> StorageResult<DateTime<Utc>> {
    // `%.f` also accepts the fraction-less `datetime('now')` values of older rows.
    match NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f") {
        Ok(naive) => Ok(naive.and_utc()),
        Err(naive_error) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| naive_error)
            .context(InvalidTimestampSnafu {
                stage,
                raw: raw.to_string(),
            }),
    }
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp_store() -> (tempfile::TempDir, SqliteStorage) {
        let directory = tempfile::tempdir().expect("create temp dir");
        let database_path = directory.path().join("nested").join("chat-history.db");
        let store = SqliteStorage::open(database_path.to_str().expect("utf-8 temp path"))
            .await
            .expect("open sqlite store");
        (directory, store)
    }

    #[tokio::test]
    async fn create_and_list_conversations_newest_first() {
        let (_directory, store) = open_temp_store().await;

        let first = store
            .create_conversation(NewConversation::new("First", "modelA"))
            .expect("create first");
        let second = store
            .create_conversation(
                NewConversation::new("Second", "modelB").with_system_prompt("Be terse"),
            )
            .expect("create second");

        let listed = store.list_conversations().expect("list conversations");
        assert_eq!(listed, vec![second.clone(), first.clone()]);
        assert_eq!(first.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(second.system_prompt, "Be terse");
        assert_eq!(
            store.get_conversation(first.id).expect("get first"),
            Some(first)
        );
    }

    #[tokio::test]
    async fn blank_title_falls_back_to_placeholder() {
        let (_directory, store) = open_temp_store().await;

        let created = store
            .create_conversation(NewConversation::new("   ", "modelA"))
            .expect("create conversation");
        assert_eq!(created.title, DEFAULT_CONVERSATION_TITLE);
    }

    #[tokio::test]
    async fn partial_updates_return_updated_rows() {
        let (_directory, store) = open_temp_store().await;
        let created = store
            .create_conversation(NewConversation::new("New Chat", "modelA"))
            .expect("create conversation");

        let renamed = store
            .update_title(created.id, "Rust lifetimes".to_string())
            .expect("update title");
        assert_eq!(renamed.title, "Rust lifetimes");
        assert_eq!(renamed.created_at, created.created_at);

        let prompted = store
            .update_system_prompt(created.id, "Answer in French".to_string())
            .expect("update system prompt");
        assert_eq!(prompted.system_prompt, "Answer in French");
        assert_eq!(prompted.title, "Rust lifetimes");

        let cleared = store
            .update_system_prompt(created.id, "  ".to_string())
            .expect("clear system prompt");
        assert_eq!(cleared.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn updates_on_unknown_conversation_are_not_found() {
        let (_directory, store) = open_temp_store().await;
        let missing = ConversationId::new_v7();

        let title_error = store
            .update_title(missing, "Nope".to_string())
            .expect_err("missing conversation");
        assert!(title_error.is_not_found());

        let prompt_error = store
            .update_system_prompt(missing, "Nope".to_string())
            .expect_err("missing conversation");
        assert!(prompt_error.is_not_found());
    }

    #[tokio::test]
    async fn messages_list_in_creation_order() {
        let (_directory, store) = open_temp_store().await;
        let conversation = store
            .create_conversation(NewConversation::new("New Chat", "modelA"))
            .expect("create conversation");

        let contents = ["Hi", "Hello! How can I help?", "Tell me a joke", "No."];
        for (index, content) in contents.iter().enumerate() {
            let input = if index % 2 == 0 {
                NewMessage::user(*content)
            } else {
                NewMessage::assistant(*content)
            };
            store
                .add_message(conversation.id, input)
                .expect("add message");
        }

        let listed = store
            .list_messages(conversation.id)
            .expect("list messages");
        let listed_contents = listed
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(listed_contents, contents);
        assert!(
            listed
                .windows(2)
                .all(|pair| pair[0].created_at <= pair[1].created_at)
        );
        assert_eq!(listed[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn orphan_message_is_a_constraint_violation() {
        let (_directory, store) = open_temp_store().await;
        let missing = ConversationId::new_v7();

        let error = store
            .add_message(missing, NewMessage::user("Hi"))
            .expect_err("orphan message must fail");
        assert!(error.is_constraint_violation());
        assert!(store.list_messages(missing).expect("list").is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_and_is_idempotent() {
        let (_directory, store) = open_temp_store().await;
        let kept = store
            .create_conversation(NewConversation::new("Kept", "modelA"))
            .expect("create kept");
        let doomed = store
            .create_conversation(NewConversation::new("Doomed", "modelA"))
            .expect("create doomed");
        store
            .add_message(doomed.id, NewMessage::user("Hi"))
            .expect("add doomed message");
        store
            .add_message(kept.id, NewMessage::user("Still here"))
            .expect("add kept message");

        store.delete_conversation(doomed.id).expect("first delete");
        assert!(store.list_messages(doomed.id).expect("list").is_empty());
        assert_eq!(store.get_conversation(doomed.id).expect("get"), None);

        store.delete_conversation(doomed.id).expect("second delete");
        assert_eq!(store.list_messages(kept.id).expect("list kept").len(), 1);
    }

    #[tokio::test]
    async fn rows_from_earlier_schema_are_readable() {
        let (_directory, store) = open_temp_store().await;
        let legacy_id = "8a6f4d7e-2f1b-4c3d-9e8f-0a1b2c3d4e5f";

        sqlx::query(
            "INSERT INTO conversations (id, title, model_name, created_at) VALUES (?, 'Old chat', 'llama3.1:8b', '2024-03-01 09:15:00')",
        )
        .bind(legacy_id)
        .execute(store.pool())
        .await
        .expect("insert legacy row");

        let newer = store
            .create_conversation(NewConversation::new("Fresh", "modelA"))
            .expect("create newer");
        let listed = store.list_conversations().expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id.to_string(), legacy_id);
        assert_eq!(listed[1].system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(
            listed[1].created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-03-01 09:15:00"
        );
    }

    #[tokio::test]
    async fn in_memory_location_is_rejected() {
        let error = SqliteStorage::open(":memory:")
            .await
            .expect_err("in-memory store must be rejected");
        assert!(matches!(error, StorageError::InvariantViolation { .. }));
    }
}
