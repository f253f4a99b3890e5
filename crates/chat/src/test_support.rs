use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use localchat_llm::{
    BoxFuture, ByteStream, InferenceClient, TransportAdapter, TransportError, TransportResult,
};
use localchat_storage::{SqliteStorage, Storage};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::title::TITLE_INSTRUCTION;

pub const ENDPOINT: &str = "http://127.0.0.1:11434/api";

/// In-memory inference server replaying canned replies.
#[derive(Default)]
pub struct FakeServer {
    pub refuse: bool,
    pub fragments: Vec<&'static str>,
    /// Keep the body open after the last fragment.
    pub hang: bool,
    pub chat_reply: Option<Value>,
    pub title_reply: Option<Value>,
    pub requests: Mutex<Vec<Value>>,
    /// Set once a streamed body has been dropped by its reader.
    pub body_dropped: Arc<AtomicBool>,
    pub(crate) title_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeServer {
    pub fn streaming(fragments: Vec<&'static str>) -> Self {
        Self {
            fragments,
            title_reply: Some(reply("Friendly Greeting")),
            ..Self::default()
        }
    }

    /// Holds the title reply back until the returned sender fires or is dropped.
    pub fn hold_title(&self) -> oneshot::Sender<()> {
        let (release_tx, release_rx) = oneshot::channel();
        *self.title_gate.lock().expect("title gate lock") = Some(release_rx);
        release_tx
    }

    pub fn body_dropped(&self) -> bool {
        self.body_dropped.load(Ordering::SeqCst)
    }

    pub fn client(self: &Arc<Self>) -> InferenceClient {
        InferenceClient::new(Arc::clone(self) as Arc<dyn TransportAdapter>)
    }

    /// Bodies of every request except title generation.
    pub fn chat_requests(&self) -> Vec<Value> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|body| !is_title_request(body))
            .cloned()
            .collect()
    }

    pub fn title_requests(&self) -> usize {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|body| is_title_request(body))
            .count()
    }

    fn record(&self, body: &Value) -> TransportResult<()> {
        self.requests.lock().expect("requests lock").push(body.clone());
        if self.refuse {
            return Err(TransportError::ConnectionRefused {
                stage: "fake-server",
                endpoint: ENDPOINT.to_string(),
                details: "Connection refused (os error 111)".to_string(),
            });
        }
        Ok(())
    }
}

pub fn reply(content: &str) -> Value {
    serde_json::json!({
        "model": "modelA",
        "message": {"role": "assistant", "content": content},
        "done": true,
        "prompt_eval_count": 10,
        "eval_count": 4
    })
}

fn is_title_request(body: &Value) -> bool {
    body["messages"][0]["content"] == TITLE_INSTRUCTION
}

impl TransportAdapter for FakeServer {
    fn endpoint(&self) -> &str {
        ENDPOINT
    }

    fn request_json<'a>(
        &'a self,
        _path: &'a str,
        body: Value,
    ) -> BoxFuture<'a, TransportResult<Value>> {
        Box::pin(async move {
            self.record(&body)?;
            let reply = if is_title_request(&body) {
                let gate = self.title_gate.lock().expect("title gate lock").take();
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                &self.title_reply
            } else {
                &self.chat_reply
            };
            Ok(reply.clone().unwrap_or_else(|| serde_json::json!({"done": true})))
        })
    }

    fn open_stream<'a>(
        &'a self,
        _path: &'a str,
        body: Value,
    ) -> BoxFuture<'a, TransportResult<ByteStream>> {
        Box::pin(async move {
            self.record(&body)?;
            let fragments = self
                .fragments
                .iter()
                .map(|fragment| Ok(Bytes::from_static(fragment.as_bytes())))
                .collect::<Vec<TransportResult<Bytes>>>();
            let body = futures::stream::iter(fragments);
            let body: ByteStream = if self.hang {
                Box::pin(body.chain(futures::stream::pending()))
            } else {
                Box::pin(body)
            };
            Ok(Box::pin(TrackedBody {
                inner: body,
                dropped: Arc::clone(&self.body_dropped),
            }) as ByteStream)
        })
    }
}

struct TrackedBody {
    inner: ByteStream,
    dropped: Arc<AtomicBool>,
}

impl Stream for TrackedBody {
    type Item = TransportResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

pub async fn open_store() -> (tempfile::TempDir, Arc<dyn Storage>) {
    let directory = tempfile::tempdir().expect("create temp dir");
    let database_path = directory.path().join("chat-history.db");
    let store = SqliteStorage::open(database_path.to_str().expect("utf-8 temp path"))
        .await
        .expect("open sqlite store");
    (directory, Arc::new(store))
}
