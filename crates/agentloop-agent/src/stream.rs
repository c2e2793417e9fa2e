//! EventStream: the caller's side of a Run
//!
//! A bounded channel sits between the Run task and the consumer. When the
//! buffer is full the Run waits at its next emit; nothing is dropped. The
//! stream ends right after the terminal event (`FinalAnswer` or `Error`) and
//! stays ended: polling a finished stream yields `None` every time.
//!
//! Dropping the stream before the terminal event cancels the Run.

use agentloop_core::{Event, RunError};
use futures::stream::{FusedStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub struct EventStream {
    rx: Option<mpsc::Receiver<Event>>,
    guard: Option<DropGuard>,
}

impl EventStream {
    /// Connected sink/stream pair. Dropping the stream cancels `cancel`.
    pub(crate) fn channel(capacity: usize, cancel: CancellationToken) -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stream = EventStream {
            rx: Some(rx),
            guard: Some(cancel.drop_guard()),
        };
        (EventSink { tx: Some(tx) }, stream)
    }

    /// A stream that is already over.
    pub fn finished() -> Self {
        Self {
            rx: None,
            guard: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.rx.is_none()
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        self.next().await
    }

    /// Drain the rest of the stream and return the Run's outcome.
    pub async fn outcome(mut self) -> Result<String, RunError> {
        let mut outcome = Err(RunError::internal("event stream ended without a terminal event"));
        while let Some(event) = self.next().await {
            match event {
                Event::FinalAnswer { text } => outcome = Ok(text),
                Event::Error { error } => outcome = Err(error),
                _ => {}
            }
        }
        outcome
    }

    fn close(&mut self) {
        self.rx = None;
        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        let this = self.get_mut();
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.close();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.close();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for EventStream {
    fn is_terminated(&self) -> bool {
        self.rx.is_none()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Producer side, owned by the Run task.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<Event>>,
}

impl EventSink {
    /// Sink that discards everything, for runs nobody streams.
    pub(crate) fn detached() -> Self {
        Self { tx: None }
    }

    /// Waits while the buffer is full. Fails once the consumer is gone.
    pub(crate) async fn emit(&self, event: Event) -> Result<(), RunError> {
        match &self.tx {
            Some(tx) => tx.send(event).await.map_err(|_| RunError::Cancelled),
            None => Ok(()),
        }
    }
}
