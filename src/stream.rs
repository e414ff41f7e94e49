//! Fragment streaming between a running turn and its caller
//!
//! The turn task owns a `FragmentEmitter`; the caller owns the matching
//! `TurnStream`. Dropping the stream only stops delivery, the turn itself
//! keeps running to its next stable checkpoint.

use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Sending half, used by the turn.
pub struct FragmentEmitter {
    tx: mpsc::Sender<String>,
    closed: bool,
    emitted: usize,
}

impl FragmentEmitter {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                closed: false,
                emitted: 0,
            },
            rx,
        )
    }

    /// Forward one fragment. Empty fragments are skipped, and after the
    /// caller goes away every call is a no-op.
    pub async fn emit(&mut self, fragment: &str) {
        if self.closed || fragment.is_empty() {
            return;
        }

        if self.tx.send(fragment.to_string()).await.is_err() {
            debug!("Caller disconnected; discarding remaining output");
            self.closed = true;
            return;
        }

        self.emitted += 1;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Summary of a finished turn.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TurnReport {
    pub session_id: String,
    pub round_trips: u32,
    pub tool_calls: usize,
    pub checkpoint_writes: u32,
    /// Fragments delivered to the caller.
    pub fragments: usize,
    /// Checkpoint version after the last successful write.
    pub version: u64,
    pub completed: bool,
    pub error: Option<String>,
}

/// Receiving half handed to the caller.
pub struct TurnStream {
    fragments: ReceiverStream<String>,
    outcome: JoinHandle<TurnReport>,
}

impl TurnStream {
    pub fn new(rx: mpsc::Receiver<String>, outcome: JoinHandle<TurnReport>) -> Self {
        Self {
            fragments: ReceiverStream::new(rx),
            outcome,
        }
    }

    /// Stop receiving and wait for the turn to finish.
    pub async fn finish(self) -> TurnReport {
        drop(self.fragments);

        match self.outcome.await {
            Ok(report) => report,
            Err(e) => TurnReport {
                error: Some(format!("turn task failed: {}", e)),
                ..TurnReport::default()
            },
        }
    }

    /// Drain every fragment, then return the concatenated text and the report.
    pub async fn collect_text(mut self) -> (String, TurnReport) {
        use futures::StreamExt;

        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment);
        }
        let report = self.finish().await;
        (text, report)
    }
}

impl Stream for TurnStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        Pin::new(&mut self.fragments).poll_next(cx)
    }
}
