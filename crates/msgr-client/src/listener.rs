//! Push listener: the local TCP socket the server dials to deliver messages.
//!
//! Bound before CONNECT so its port can be advertised. Each accepted
//! connection carries one push frame and is handled on its own task, so
//! one malformed or stalled delivery never blocks the next.
//!
//! The accept loop runs until [`PushListener::close`] is called or the
//! listener is dropped; either drops the cancel channel sender.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use msgr_core::{MsgrError, MsgrResult, PushEvent};

use crate::ui::UiSink;

/// How long one push connection may take to deliver its frame.
const PUSH_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PushListener {
    local_addr: SocketAddr,
    /// Dropping this ends the accept loop.
    cancel_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PushListener {
    /// Bind `addr` (port 0 picks a free port) and start accepting pushes.
    pub async fn bind(addr: SocketAddr, ui: Arc<dyn UiSink>) -> MsgrResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MsgrError::Transport(format!("push listener bind {addr} failed: {e}")))?;
        let local_addr = listener.local_addr()?;
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>(1);

        info!(addr = %local_addr, "push listener started");
        let handle = tokio::spawn(async move {
            accept_loop(listener, cancel_rx, ui).await;
            debug!(addr = %local_addr, "push accept loop ended");
        });

        Ok(Self {
            local_addr,
            cancel_tx,
            handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop accepting and wait for the accept loop to release the socket.
    pub async fn close(self) {
        let PushListener {
            local_addr,
            cancel_tx,
            handle,
        } = self;
        let _ = cancel_tx.send(()).await;
        drop(cancel_tx);
        if let Err(e) = handle.await {
            warn!(addr = %local_addr, error = %e, "push accept loop panicked");
        }
        info!(addr = %local_addr, "push listener closed");
    }
}

async fn accept_loop(listener: TcpListener, mut cancel_rx: mpsc::Receiver<()>, ui: Arc<dyn UiSink>) {
    loop {
        tokio::select! {
            _ = cancel_rx.recv() => {
                debug!("push accept loop cancelled");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let ui = ui.clone();
                        tokio::spawn(async move {
                            if let Err(e) = receive_push(stream, ui.as_ref()).await {
                                warn!(peer = %peer, error = %e, "push connection dropped");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "push accept failed");
                    }
                }
            }
        }
    }
}

/// Read one push frame and render it as a status line.
async fn receive_push(stream: TcpStream, ui: &dyn UiSink) -> MsgrResult<()> {
    let mut reader = BufReader::new(stream);
    match time::timeout(PUSH_READ_TIMEOUT, PushEvent::read_from(&mut reader)).await?? {
        Some(event) => {
            debug!(tag = event.tag(), "push received");
            ui.print(&event.to_string());
        }
        None => debug!("unknown push tag ignored"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::MemorySink;
    use tokio::io::AsyncWriteExt;

    async fn start() -> (PushListener, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let listener = PushListener::bind("127.0.0.1:0".parse().unwrap(), sink.clone())
            .await
            .unwrap();
        (listener, sink)
    }

    async fn push(addr: SocketAddr, bytes: &[u8]) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn renders_message_and_ack_lines() {
        let (listener, sink) = start().await;
        let addr = listener.local_addr();

        push(addr, b"SEND_MESSAGE\0alice\x007\0hi bob\0").await;
        assert!(sink.wait_for("message 7 from alice: hi bob", Duration::from_secs(2)).await);

        push(addr, b"SEND_MESS_ACK\x007\0").await;
        assert!(sink.wait_for("send 7 acknowledged", Duration::from_secs(2)).await);

        listener.close().await;
    }

    #[tokio::test]
    async fn bad_connections_do_not_stop_the_listener() {
        let (listener, sink) = start().await;
        let addr = listener.local_addr();

        push(addr, b"SEND_MESSAGE\0alice\0").await;
        push(addr, b"BROADCAST\0everyone\0").await;
        push(addr, b"SEND_MESS_ACK\x00notanumber\0").await;
        push(addr, b"SEND_MESS_ACK\x003\0").await;

        assert!(sink.wait_for("send 3 acknowledged", Duration::from_secs(2)).await);
        assert_eq!(sink.lines(), vec!["send 3 acknowledged".to_string()]);
        assert!(listener.is_running());
        listener.close().await;
    }

    #[tokio::test]
    async fn close_returns_promptly_and_frees_the_port() {
        let (listener, _sink) = start().await;
        let addr = listener.local_addr();

        time::timeout(Duration::from_secs(1), listener.close())
            .await
            .expect("close should not hang on a pending accept");
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
