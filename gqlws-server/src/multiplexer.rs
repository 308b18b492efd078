//! Output multiplexer.
//!
//! Every producer task of a connection, plus the connection's reader, holds a
//! clone of the same [`Multiplexer`]. They all feed one bounded queue that the
//! transport's writer drains through [`OutboundQueue::recv`]. A single
//! producer sends its messages in order, so per-operation ordering is the
//! queue's FIFO order; there is no ordering across operations.
//!
//! What happens when the queue is full depends on the [`OverflowPolicy`]:
//! with `Close` the send fails immediately and the overflow signal is raised
//! for the reader to close the connection, with `Backpressure` the sender
//! waits for space.
//!
//! A close frame never goes through the bounded queue. It is published on a
//! side channel and handed to the writer once every frame queued before it
//! has been drained.

use std::sync::Arc;

use gqlws_protocol::ServerMessage;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TryRecvError, error::TrySendError},
    watch,
};

use crate::config::OverflowPolicy;

// ════════════════════════════════════════════════════════════════════
// Frames & errors
// ════════════════════════════════════════════════════════════════════

/// Close code and reason of a server-initiated close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// A frame for the transport writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close(CloseFrame),
}

#[derive(Debug, Error)]
pub enum MuxError {
    /// The writer is gone or the connection is closing
    #[error("outbound channel closed")]
    Closed,

    /// The outbound buffer is full under [`OverflowPolicy::Close`]
    #[error("outbound buffer full")]
    Overflow,

    #[error("failed to encode `{kind}` message: {reason}")]
    Encode { kind: &'static str, reason: String },
}

// ════════════════════════════════════════════════════════════════════
// Multiplexer (sending side)
// ════════════════════════════════════════════════════════════════════

struct Signals {
    overflow: watch::Sender<bool>,
    close: watch::Sender<Option<CloseFrame>>,
}

/// Sending half of a connection's outbound queue. Cheap to clone.
#[derive(Clone)]
pub struct Multiplexer {
    tx: mpsc::Sender<OutboundFrame>,
    policy: OverflowPolicy,
    signals: Arc<Signals>,
}

/// Receiving half, owned by the transport writer.
pub struct OutboundQueue {
    rx: mpsc::Receiver<OutboundFrame>,
    close: watch::Receiver<Option<CloseFrame>>,
    done: bool,
}

/// Create a multiplexer whose queue holds at most `capacity` frames.
pub fn channel(capacity: usize, policy: OverflowPolicy) -> (Multiplexer, OutboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (overflow, _) = watch::channel(false);
    let (close, close_rx) = watch::channel(None);

    let mux = Multiplexer {
        tx,
        policy,
        signals: Arc::new(Signals { overflow, close }),
    };
    let queue = OutboundQueue {
        rx,
        close: close_rx,
        done: false,
    };
    (mux, queue)
}

impl Multiplexer {
    /// Encode `message` and queue it according to the overflow policy.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), MuxError> {
        let text = message.encode().map_err(|e| MuxError::Encode {
            kind: message.kind(),
            reason: e.reason,
        })?;
        self.send_frame(OutboundFrame::Text(text)).await
    }

    async fn send_frame(&self, frame: OutboundFrame) -> Result<(), MuxError> {
        if self.is_closing() {
            return Err(MuxError::Closed);
        }

        match self.policy {
            OverflowPolicy::Close => match self.tx.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.signals.overflow.send_replace(true);
                    Err(MuxError::Overflow)
                }
                Err(TrySendError::Closed(_)) => Err(MuxError::Closed),
            },
            OverflowPolicy::Backpressure => {
                self.tx.send(frame).await.map_err(|_| MuxError::Closed)
            }
        }
    }

    /// Request a close frame after the frames already queued.
    ///
    /// Only the first request wins. Later sends fail with
    /// [`MuxError::Closed`].
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let reason = reason.into();
        self.signals.close.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(CloseFrame { code, reason });
            true
        });
    }

    pub fn is_closing(&self) -> bool {
        self.signals.close.borrow().is_some()
    }

    pub fn has_overflowed(&self) -> bool {
        *self.signals.overflow.borrow()
    }

    /// Resolves once a send has failed with [`MuxError::Overflow`].
    pub async fn overflowed(&self) {
        let mut rx = self.signals.overflow.subscribe();
        // The sender lives in `self`, so the wait only ends on overflow.
        let _ = rx.wait_for(|overflowed| *overflowed).await;
    }

    /// Resolves once the writer has dropped its [`OutboundQueue`].
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

// ════════════════════════════════════════════════════════════════════
// OutboundQueue (writer side)
// ════════════════════════════════════════════════════════════════════

impl OutboundQueue {
    /// Next frame to write.
    ///
    /// Returns queued text frames first, then the close frame if one was
    /// requested. After the close frame, or once every [`Multiplexer`] is
    /// dropped and the queue is empty, returns `None`.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        loop {
            if self.done {
                return None;
            }

            match self.rx.try_recv() {
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Disconnected) => return self.take_close(),
                Err(TryRecvError::Empty) => {}
            }

            if let Some(frame) = self.take_close() {
                return Some(frame);
            }

            tokio::select! {
                frame = self.rx.recv() => match frame {
                    Some(frame) => return Some(frame),
                    None => return self.take_close(),
                },
                changed = self.close.changed() => {
                    if changed.is_err() {
                        // Every multiplexer is gone; drain what is left.
                        return match self.rx.recv().await {
                            Some(frame) => Some(frame),
                            None => self.take_close(),
                        };
                    }
                }
            }
        }
    }

    fn take_close(&mut self) -> Option<OutboundFrame> {
        if self.done {
            return None;
        }
        let frame = self.close.borrow_and_update().clone();
        frame.map(|frame| {
            self.done = true;
            OutboundFrame::Close(frame)
        })
    }
}

// ════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn complete(id: &str) -> ServerMessage {
        ServerMessage::Complete { id: id.to_string() }
    }

    fn text(frame: Option<OutboundFrame>) -> String {
        match frame {
            Some(OutboundFrame::Text(text)) => text,
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn frames_keep_send_order() {
        let (mux, mut queue) = channel(8, OverflowPolicy::Close);
        mux.send(&complete("a")).await.unwrap();
        mux.send(&complete("b")).await.unwrap();

        assert_eq!(text(queue.recv().await), r#"{"type":"complete","id":"a"}"#);
        assert_eq!(text(queue.recv().await), r#"{"type":"complete","id":"b"}"#);
    }

    #[tokio::test]
    async fn full_buffer_overflows_under_close_policy() {
        let (mux, _queue) = channel(1, OverflowPolicy::Close);
        assert!(!mux.has_overflowed());
        mux.send(&complete("a")).await.unwrap();

        let err = mux.send(&complete("b")).await.unwrap_err();
        assert!(matches!(err, MuxError::Overflow));
        assert!(mux.has_overflowed());

        tokio::time::timeout(Duration::from_secs(1), mux.overflowed())
            .await
            .expect("overflow signal is raised");
    }

    #[tokio::test]
    async fn backpressure_waits_for_space() {
        let (mux, mut queue) = channel(1, OverflowPolicy::Backpressure);
        mux.send(&complete("a")).await.unwrap();

        let producer = mux.clone();
        let blocked = tokio::spawn(async move { producer.send(&complete("b")).await });

        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        assert_eq!(text(queue.recv().await), r#"{"type":"complete","id":"a"}"#);
        blocked.await.unwrap().unwrap();
        assert_eq!(text(queue.recv().await), r#"{"type":"complete","id":"b"}"#);
        assert!(!mux.has_overflowed());
    }

    #[tokio::test]
    async fn close_frame_follows_queued_frames() {
        let (mux, mut queue) = channel(8, OverflowPolicy::Close);
        mux.send(&complete("a")).await.unwrap();
        mux.close(4409, "Subscriber for a already exists");
        mux.close(4500, "ignored");

        assert!(mux.is_closing());
        assert!(matches!(
            mux.send(&complete("late")).await,
            Err(MuxError::Closed)
        ));

        assert_eq!(text(queue.recv().await), r#"{"type":"complete","id":"a"}"#);
        assert_eq!(
            queue.recv().await,
            Some(OutboundFrame::Close(CloseFrame {
                code: 4409,
                reason: "Subscriber for a already exists".to_string(),
            }))
        );
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn close_wakes_idle_writer() {
        let (mux, mut queue) = channel(8, OverflowPolicy::Close);
        let writer = tokio::spawn(async move { queue.recv().await });

        tokio::task::yield_now().await;
        mux.close(4408, "Connection initialisation timeout");

        let frame = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Some(OutboundFrame::Close(f)) if f.code == 4408));
    }

    #[tokio::test]
    async fn queue_ends_when_every_sender_is_dropped() {
        let (mux, mut queue) = channel(8, OverflowPolicy::Close);
        mux.send(&complete("a")).await.unwrap();
        drop(mux);

        assert_eq!(text(queue.recv().await), r#"{"type":"complete","id":"a"}"#);
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn closed_resolves_when_writer_drops() {
        let (mux, queue) = channel(8, OverflowPolicy::Close);
        drop(queue);
        tokio::time::timeout(Duration::from_secs(1), mux.closed())
            .await
            .expect("writer is gone");
        assert!(matches!(
            mux.send(&complete("a")).await,
            Err(MuxError::Closed)
        ));
    }
}
