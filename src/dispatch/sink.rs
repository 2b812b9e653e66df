//! Event Sink
//!
//! The write side of one client stream. Exactly one request handler owns a
//! sink; clones handed to the assignment callback write into the same
//! channel, so event order on the wire is send order.
//!
//! Writes after the client disconnects are swallowed, not surfaced: the
//! first failed send trips the `closed` flag and every later `emit` becomes
//! a cheap no-op while in-flight tasks run to completion.

use super::events::StreamEvent;
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Frames and writes one event. Returns false once the client is gone.
    pub fn emit(&self, event: &StreamEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Event did not serialize: {}", e);
                return false;
            }
        };

        let frame = Bytes::from(format!("data: {}\n\n", json));
        if self.tx.send(frame).is_err() {
            self.closed.store(true, Ordering::SeqCst);
            tracing::debug!("Client disconnected; dropping further events");
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Wraps the receive side into a chunked `text/event-stream` response. The
/// stream ends when every sink clone has been dropped.
pub fn stream_response(rx: mpsc::UnboundedReceiver<Bytes>) -> Response {
    let body = Body::from_stream(UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
