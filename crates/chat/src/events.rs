use localchat_llm::Usage;
use localchat_storage::{ConversationRecord, MessageRecord};
use tokio::sync::{mpsc, oneshot};

use super::error::ErrorNotice;

/// Everything a consumer observes while a turn runs, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    ConversationCreated(ConversationRecord),
    /// Sent after the generated title has been stored.
    ConversationUpdated(ConversationRecord),
    /// Full assistant text received so far, not the latest fragment.
    PartialContent(String),
    TurnComplete {
        message: MessageRecord,
        usage: Option<Usage>,
    },
    Error(ErrorNotice),
}

/// Receiving end of one turn. Dropping it cancels the turn.
pub struct TurnEventStream {
    events: mpsc::UnboundedReceiver<ChatEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl TurnEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<ChatEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Waits for the next event; `None` once the turn and its title task are finished.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        self.events.try_recv().ok()
    }

    /// Asks the worker to stop and closes the stream: unread events are discarded and
    /// nothing sent afterwards, including a late title update, is delivered.
    /// Returns `false` if already cancelled or finished.
    pub fn cancel(&mut self) -> bool {
        let signalled = self
            .cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false);
        self.events.close();
        while self.events.try_recv().is_ok() {}
        signalled
    }
}

impl Drop for TurnEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub(crate) fn make_event_stream() -> (
    mpsc::UnboundedSender<ChatEvent>,
    TurnEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        TurnEventStream::new(event_rx, cancel_tx),
        cancel_rx,
    )
}
