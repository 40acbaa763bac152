//! Incremental SSE envelope unwrapping.
//!
//! The internal backend streams frames of the form
//!
//! ```text
//! data: {"response":{"candidates":[...]}}
//!
//! data: {"response":{"candidates":[...]}}
//! ```
//!
//! [`SseRelay`] rewrites each `data:` line to carry the unwrapped payload
//! and forwards everything else verbatim. It buffers only up to line
//! boundaries — each upstream chunk is released downstream as soon as its
//! complete lines are processed, so time-to-first-token is preserved. A
//! partial line held at end of stream is flushed as-is.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use pin_project_lite::pin_project;
use serde_json::Value;
use tracing::debug;

use crate::transform::response::unwrap_envelope_value;

pin_project! {
    /// Byte stream adapter that unwraps `data:` envelopes line by line.
    pub struct SseRelay<S> {
        #[pin]
        upstream: S,
        buffer: String,
        pending: VecDeque<Bytes>,
        done: bool,
    }
}

impl<S> SseRelay<S>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>>,
{
    pub fn new(upstream: S) -> Self {
        Self {
            upstream,
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S> Stream for SseRelay<S>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>>,
{
    type Item = std::result::Result<Bytes, reqwest::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(chunk) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.upstream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(newline) = this.buffer.find('\n') {
                        let line: String = this.buffer.drain(..=newline).collect();
                        this.pending.push_back(relay_line(line.trim_end_matches(['\n', '\r'])));
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    *this.done = true;
                    // Trailing partial line: flush untouched rather than
                    // drop bytes the peer actually sent.
                    if !this.buffer.is_empty() {
                        let rest = std::mem::take(this.buffer);
                        debug!(len = rest.len(), "Flushing trailing partial SSE line");
                        this.pending.push_back(Bytes::from(rest));
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Rewrite one complete SSE line, newline restored.
fn relay_line(line: &str) -> Bytes {
    if let Some(payload) = line.strip_prefix("data:") {
        let payload = payload.trim_start();
        if let Ok(value) = serde_json::from_str::<Value>(payload) {
            if let Some(inner) = unwrap_envelope_value(value) {
                if let Ok(json) = serde_json::to_string(&inner) {
                    return Bytes::from(format!("data: {}\n", json));
                }
            }
        }
        // [DONE] markers and payloads without an envelope pass verbatim.
    }
    Bytes::from(format!("{}\n", line))
}
