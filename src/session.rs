#![forbid(unsafe_code)]

//! One download, from request to last byte.
//!
//! A [`StreamSession`] is created per request, exclusively owns the upstream
//! [`ByteSource`] once one is opened, and is consumed by [`StreamSession::relay`],
//! so the upstream is released no later than the end of the response.

use std::io;

use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{error::ProxyError, extractor::ByteSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Pending,
    HeadersCommitted,
    Streaming,
    Completed,
    Aborted,
    Rejected,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Rejected)
    }

    fn can_advance_to(self, next: StreamState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::HeadersCommitted)
                | (Self::Pending, Self::Rejected)
                | (Self::HeadersCommitted, Self::Streaming)
                | (Self::Streaming, Self::Completed)
                | (Self::Streaming, Self::Aborted)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal stream transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: StreamState,
    pub to: StreamState,
}

/// How a relay ended.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed { bytes: u64 },
    UpstreamFailed { bytes: u64, reason: String },
    ClientDisconnected { bytes: u64 },
}

pub struct StreamSession {
    request_id: String,
    state: StreamState,
    bytes_transferred: u64,
    upstream: Option<ByteSource>,
}

impl StreamSession {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: StreamState::Pending,
            bytes_transferred: 0,
            upstream: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn advance(&mut self, next: StreamState) -> Result<(), IllegalTransition> {
        if !self.state.can_advance_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Moves to a terminal state from inside the relay, where an illegal
    /// transition can only be logged.
    fn settle(&mut self, next: StreamState) {
        if let Err(err) = self.advance(next) {
            tracing::error!(request_id = %self.request_id, error = %err, "relay transition failed");
        }
    }

    /// Ends a session that never committed headers.
    pub fn reject(mut self, reason: &str) -> StreamState {
        match self.advance(StreamState::Rejected) {
            Ok(()) => tracing::info!(request_id = %self.request_id, %reason, "download rejected"),
            Err(err) => {
                tracing::error!(request_id = %self.request_id, error = %err, "reject failed")
            }
        }
        self.state
    }

    /// Binds the opened upstream and fixes the response headers.
    pub fn commit(&mut self, upstream: ByteSource) -> Result<(), IllegalTransition> {
        self.advance(StreamState::HeadersCommitted)?;
        self.upstream = Some(upstream);
        Ok(())
    }

    /// Pumps `first` and then every upstream chunk into `tx`, in order.
    ///
    /// `tx.send` waits for queue capacity, so a slow client pauses upstream
    /// reads. An upstream error is forwarded as the final item, which makes
    /// the response body fail and the connection abort. If the receiving
    /// body goes away, the upstream is dropped without being drained.
    pub async fn relay(
        mut self,
        first: Bytes,
        tx: mpsc::Sender<io::Result<Bytes>>,
    ) -> RelayOutcome {
        if let Err(err) = self.advance(StreamState::Streaming) {
            tracing::error!(
                request_id = %self.request_id,
                error = %err,
                "relay started out of order"
            );
            return RelayOutcome::UpstreamFailed {
                bytes: 0,
                reason: err.to_string(),
            };
        }
        let Some(mut upstream) = self.upstream.take() else {
            self.settle(StreamState::Aborted);
            return RelayOutcome::UpstreamFailed {
                bytes: 0,
                reason: "no upstream attached".to_string(),
            };
        };

        let first_len = first.len() as u64;
        if tx.send(Ok(first)).await.is_err() {
            return self.finish_disconnected();
        }
        self.bytes_transferred += first_len;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => return self.finish_disconnected(),
                next = upstream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    let len = chunk.len() as u64;
                    if tx.send(Ok(chunk)).await.is_err() {
                        return self.finish_disconnected();
                    }
                    self.bytes_transferred += len;
                }
                Some(Err(err)) => {
                    let reason = err.to_string();
                    self.settle(StreamState::Aborted);
                    tracing::warn!(
                        request_id = %self.request_id,
                        bytes = self.bytes_transferred,
                        error = %reason,
                        "upstream failed mid-stream, aborting response"
                    );
                    // The receiver may already be gone; nothing else to tell it.
                    let failure = ProxyError::MidStream(reason.clone());
                    let _ = tx.send(Err(io::Error::other(failure))).await;
                    return RelayOutcome::UpstreamFailed {
                        bytes: self.bytes_transferred,
                        reason,
                    };
                }
                None => {
                    self.settle(StreamState::Completed);
                    tracing::info!(
                        request_id = %self.request_id,
                        bytes = self.bytes_transferred,
                        "download completed"
                    );
                    return RelayOutcome::Completed {
                        bytes: self.bytes_transferred,
                    };
                }
            }
        }
    }

    fn finish_disconnected(&mut self) -> RelayOutcome {
        self.settle(StreamState::Aborted);
        tracing::info!(
            request_id = %self.request_id,
            bytes = self.bytes_transferred,
            "client disconnected, releasing upstream"
        );
        RelayOutcome::ClientDisconnected {
            bytes: self.bytes_transferred,
        }
    }
}
