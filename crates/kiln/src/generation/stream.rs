use super::worker::GenerationWorker;
use super::{ChatEvent, ChatOutput};
use crate::error::{KilnError, Result};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

/// # ChatStream
///
/// An asynchronous stream of [`ChatEvent`]s for one chat.
///
/// Every generated token produces a [`ChatEvent::Token`] carrying the decoded
/// history so far. A successful chat ends with a single [`ChatEvent::Done`];
/// a failed chat ends with a single `Err`. The stream then returns `None`.
///
/// ## Cancellation
///
/// Dropping the stream stops the background generation task before its next
/// call into the compiled module. A call already in flight runs to completion.
pub struct ChatStream {
    id: Uuid,

    /// The underlying channel receiver
    receiver: mpsc::UnboundedReceiver<Result<ChatEvent>>,

    // Dropped together with the receiver to stop generation.
    _worker: GenerationWorker,
}

impl ChatStream {
    pub(crate) fn new(
        id: Uuid,
        receiver: mpsc::UnboundedReceiver<Result<ChatEvent>>,
        worker: GenerationWorker,
    ) -> Self {
        Self {
            id,
            receiver,
            _worker: worker,
        }
    }

    /// Identifier of this chat, as recorded in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Consume the stream, discarding intermediate steps, and return the final output.
    pub async fn finish(mut self) -> Result<ChatOutput> {
        while let Some(event) = self.next().await {
            if let ChatEvent::Done(output) = event? {
                return Ok(output);
            }
        }
        Err(KilnError::Protocol(format!("chat {} ended without output", self.id)))
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_recv(cx)
    }
}
