//! Stream Emitter
//!
//! Single-producer, ordered event channel for one session. The emitter is
//! owned by the session coordinator; every event, including concurrent
//! sub-question completions, passes through `emit` in order.

use chrono::Utc;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::research::events::{EventEnvelope, ResearchStreamEvent};

#[derive(Debug, Clone)]
pub enum StreamMessage {
    Event(EventEnvelope),
    /// End-of-stream sentinel; nothing follows it.
    End,
}

pub struct StreamEmitter {
    session_id: String,
    tx: mpsc::UnboundedSender<StreamMessage>,
    cancel: CancellationToken,
    seq: u64,
    terminal_sent: bool,
    closed: bool,
}

/// Create an emitter and the receiving half for the transport. Dropping the
/// receiver cancels `cancel` on the next emit.
pub fn channel(
    session_id: &str,
    cancel: CancellationToken,
) -> (StreamEmitter, mpsc::UnboundedReceiver<StreamMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let emitter = StreamEmitter {
        session_id: session_id.to_string(),
        tx,
        cancel,
        seq: 0,
        terminal_sent: false,
        closed: false,
    };
    (emitter, rx)
}

impl StreamEmitter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent
    }

    /// Append one event. Returns `false` if the event was not delivered
    /// (stream already terminated, closed, or the receiver is gone).
    pub fn emit(&mut self, event: ResearchStreamEvent) -> bool {
        if self.closed || self.terminal_sent {
            debug!(
                session_id = %self.session_id,
                event = event.event_type(),
                "Dropping event after stream termination"
            );
            return false;
        }

        self.seq += 1;
        let terminal = event.is_terminal();
        let event_type = event.event_type();
        let envelope = EventEnvelope {
            seq: self.seq,
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            event,
        };

        if self.tx.send(StreamMessage::Event(envelope)).is_err() {
            warn!(session_id = %self.session_id, "Stream receiver dropped, cancelling session");
            self.cancel.cancel();
            self.closed = true;
            return false;
        }

        debug!(session_id = %self.session_id, seq = self.seq, event = event_type, "Event emitted");
        if terminal {
            self.terminal_sent = true;
        }
        true
    }

    /// Send the end sentinel. Idempotent; guarantees a terminal event first.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if !self.terminal_sent {
            self.emit(ResearchStreamEvent::error(
                "internal",
                "research session ended without a result",
            ));
        }
        if !self.closed {
            let _ = self.tx.send(StreamMessage::End);
            self.closed = true;
        }
    }
}

impl Drop for StreamEmitter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Adapt the receiver into a `Stream` that finishes after the sentinel.
pub fn into_stream(
    rx: mpsc::UnboundedReceiver<StreamMessage>,
) -> impl Stream<Item = StreamMessage> + Send {
    futures::stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        let message = rx.recv().await?;
        let finished = matches!(message, StreamMessage::End);
        Some((message, (rx, finished)))
    })
}
