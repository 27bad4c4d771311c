//! The response stream handed to callers.

use futures::Stream;
use live_wire::LiveServerMessage;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::LiveSessionError;

type ResponseItem = Result<LiveServerMessage, LiveSessionError>;

/// Producer side of a [`ResponseStream`]
///
/// Publishing stops for good after the first `finish`.
#[derive(Debug)]
pub(crate) struct ResponseSink {
    tx: Mutex<Option<mpsc::UnboundedSender<ResponseItem>>>,
}

impl ResponseSink {
    pub(crate) fn new() -> (Self, ResponseStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            ResponseStream {
                rx,
                terminated: false,
            },
        )
    }

    pub(crate) fn publish(&self, message: LiveServerMessage) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Ok(message)).is_ok(),
            None => false,
        }
    }

    /// Terminate the stream, with an error or cleanly; only the first call counts
    pub(crate) fn finish(&self, error: Option<LiveSessionError>) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            return false;
        };
        if let Some(error) = error {
            let _ = tx.send(Err(error));
        }
        true
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Decoded server messages, in arrival order
///
/// Terminates exactly once: it completes after the caller closes the
/// session, or yields a single error and then completes.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::UnboundedReceiver<ResponseItem>,
    terminated: bool,
}

impl ResponseStream {
    /// Whether the stream has terminated
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Stream for ResponseStream {
    type Item = ResponseItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        let next = self.rx.poll_recv(cx);
        if matches!(next, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.terminated = true;
        }
        next
    }
}
