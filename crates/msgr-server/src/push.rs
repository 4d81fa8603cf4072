//! Push delivery: how the server gets a [`PushEvent`] to a connected client.
//!
//! [`TcpPushSink`] dials the client's advertised listener, writes one frame
//! and closes. The router only sees [`PushSink`], so a different transport
//! can replace the back-connection without touching the control channel.

use msgr_core::codec::write_frame;
use msgr_core::{MsgrError, MsgrResult, PushEvent};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

/// Delivers one event to one push address.
pub trait PushSink: Send + Sync {
    fn deliver<'a>(
        &'a self,
        addr: SocketAddr,
        event: &'a PushEvent,
    ) -> Pin<Box<dyn Future<Output = MsgrResult<()>> + Send + 'a>>;
}

/// Back-connection push: one short-lived TCP connection per event.
///
/// Requires the client to be reachable from the server at the address it
/// connected from.
#[derive(Debug, Clone)]
pub struct TcpPushSink {
    timeout: Duration,
}

impl TcpPushSink {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn dial_and_write(&self, addr: SocketAddr, frame: &[u8]) -> MsgrResult<()> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MsgrError::Transport(format!("push connect to {addr} failed: {e}")))?;
        write_frame(&mut stream, frame).await?;
        // The frame is already flushed; a failed FIN changes nothing for the peer.
        let _ = stream.shutdown().await;
        Ok(())
    }
}

impl PushSink for TcpPushSink {
    fn deliver<'a>(
        &'a self,
        addr: SocketAddr,
        event: &'a PushEvent,
    ) -> Pin<Box<dyn Future<Output = MsgrResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let frame = event.encode()?;
            time::timeout(self.timeout, self.dial_and_write(addr, &frame)).await??;
            debug!(push = %addr, tag = event.tag(), "push delivered");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn delivers_one_frame_then_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let event = PushEvent::read_from(&mut reader).await.unwrap();
            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).await.unwrap();
            (event, rest)
        });

        let sink = TcpPushSink::new(Duration::from_secs(2));
        let event = PushEvent::Ack { id: 9 };
        sink.deliver(addr, &event).await.unwrap();

        let (received, rest) = reader.await.unwrap();
        assert_eq!(received, Some(event));
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn unreachable_address_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = TcpPushSink::new(Duration::from_secs(2));
        let err = sink.deliver(addr, &PushEvent::Ack { id: 1 }).await.unwrap_err();
        assert!(err.is_transport(), "got {err:?}");
    }
}
