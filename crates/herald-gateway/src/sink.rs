use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Disconnected,

    #[error("write timed out after {millis}ms")]
    Timeout { millis: u128 },
}

/// Byte-level destination of one connection's stream.
///
/// Each call must either hand the whole frame to the transport or fail;
/// partial frames are never left behind. Calls are serialized by the owning
/// [`Connection`](crate::connection::Connection).
#[async_trait]
pub trait EventSink: Send {
    async fn write_frame(&mut self, frame: String) -> Result<(), SinkError>;
}

/// Sink feeding an HTTP response body through a bounded channel.
///
/// A full channel means the client is not draining; the write then waits up
/// to `timeout` before giving up so one stuck client cannot stall a broadcast.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
    timeout: Duration,
}

impl ChannelSink {
    pub fn pair(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write_frame(&mut self, frame: String) -> Result<(), SinkError> {
        match tokio::time::timeout(self.timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SinkError::Disconnected),
            Err(_) => Err(SinkError::Timeout {
                millis: self.timeout.as_millis(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_frames_in_order() {
        let (mut sink, mut rx) = ChannelSink::pair(4, Duration::from_millis(50));
        sink.write_frame("a".into()).await.unwrap();
        sink.write_frame("b".into()).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn dropped_receiver_is_a_disconnect() {
        let (mut sink, rx) = ChannelSink::pair(4, Duration::from_millis(50));
        drop(rx);
        assert!(matches!(
            sink.write_frame("x".into()).await,
            Err(SinkError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn stalled_reader_times_out() {
        let (mut sink, _rx) = ChannelSink::pair(1, Duration::from_millis(20));
        sink.write_frame("fills the buffer".into()).await.unwrap();
        assert!(matches!(
            sink.write_frame("blocked".into()).await,
            Err(SinkError::Timeout { .. })
        ));
    }
}
