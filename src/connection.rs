//! The connection collaborator contract (spec §6.2): a framed, back-pressured
//! channel to one client. A real deployment backs this with a TCP socket and
//! wire codec; tests use [`ChannelConnection`], a bounded `mpsc`-backed fake.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::model::{Entry, MessageId};

/// Frames a client sends inward, toward the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Publish { producer_id: u64, sequence_id: u64, checksum: u32, payload: Vec<u8> },
    Ack { message_id: MessageId, cumulative: bool },
    Flow { permits: u32 },
    Redeliver { message_ids: Vec<MessageId> },
    Unsubscribe,
}

/// Frames the broker sends outward, toward a client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Message { message_id: MessageId, entry: Entry },
    SendReceipt { sequence_id: u64, message_id: MessageId },
    SendError { sequence_id: u64, reason: String },
    Success,
    Error { reason: String },
    ReachedEndOfTopic,
}

/// A back-pressured, full-duplex channel to one client.
///
/// `write` enqueues a frame without necessarily flushing it; callers that
/// need the frame actually on the wire before proceeding call `flush`
/// afterward. `is_writable` lets a dispatcher's read loop check for
/// available channel capacity before pulling more entries off the cursor,
/// rather than buffering unboundedly.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn write(&self, frame: OutboundFrame) -> Result<(), ConnectionError>;
    async fn flush(&self) -> Result<(), ConnectionError>;
    fn is_writable(&self) -> bool;
    fn close(&self);
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
}

/// In-memory [`Connection`] backed by a bounded channel, for tests and the
/// demo binary.
pub struct ChannelConnection {
    sender: mpsc::Sender<OutboundFrame>,
    closed: std::sync::atomic::AtomicBool,
}

impl ChannelConnection {
    /// `capacity` doubles as the back-pressure threshold `is_writable`
    /// reports against: once the channel is full, the dispatcher should
    /// stop pulling more entries until capacity frees up.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, closed: std::sync::atomic::AtomicBool::new(false) }, receiver)
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn write(&self, frame: OutboundFrame) -> Result<(), ConnectionError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.sender.send(frame).await.map_err(|_| ConnectionError::Closed)
    }

    async fn flush(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn is_writable(&self) -> bool {
        !self.closed.load(std::sync::atomic::Ordering::SeqCst) && self.sender.capacity() > 0
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Position;

    #[tokio::test]
    async fn write_then_receive_round_trips_a_frame() {
        let (conn, mut rx) = ChannelConnection::new(4);
        conn.write(OutboundFrame::Success).await.unwrap();
        assert_eq!(rx.recv().await, Some(OutboundFrame::Success));
    }

    #[tokio::test]
    async fn closed_connection_rejects_further_writes() {
        let (conn, _rx) = ChannelConnection::new(4);
        conn.close();
        assert!(!conn.is_writable());
        assert!(matches!(conn.write(OutboundFrame::Success).await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn full_channel_is_not_writable() {
        let (conn, _rx) = ChannelConnection::new(1);
        conn.write(OutboundFrame::SendReceipt { sequence_id: 1, message_id: MessageId::Single(Position::new(0, 0)) })
            .await
            .unwrap();
        assert!(!conn.is_writable());
    }
}
