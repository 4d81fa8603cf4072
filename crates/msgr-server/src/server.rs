//! Core server: accepts control connections and dispatches requests.
//!
//! Every accepted connection carries one request and gets one response,
//! handled on its own task. Follow-up pushes (sender acks, queue flushes)
//! run after the response is written so the requester is never kept
//! waiting on another client's listener.

use crate::config::ServerConfig;
use crate::directory::Directory;
use crate::push::PushSink;
use crate::router::{Router, SendOutcome};
use msgr_core::codec::{read_string, write_frame, write_status};
use msgr_core::{
    Command, ControlRequest, FrameBuilder, Identity, Message, MsgrError, MsgrResult, Refusal,
    STATUS_OK,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

/// Work left to do once the response has been sent.
#[derive(Debug)]
enum FollowUp {
    Acknowledge(Message),
    FlushPending(String),
}

/// One response frame plus optional follow-up.
struct Reply {
    frame: Vec<u8>,
    follow_up: Option<FollowUp>,
}

impl Reply {
    fn status(code: u8) -> Self {
        Self {
            frame: vec![code],
            follow_up: None,
        }
    }

    fn from_result(command: Command, result: Result<(), Refusal>) -> Self {
        match result {
            Ok(()) => Self::status(STATUS_OK),
            Err(refusal) => {
                debug!(%command, reason = %refusal, "request refused");
                Self::status(refusal.status_code(command))
            }
        }
    }

    fn then(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }
}

/// The msgr server instance.
pub struct MessageServer<D: Directory> {
    config: ServerConfig,
    router: Router<D>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl<D: Directory> MessageServer<D> {
    pub fn new(config: ServerConfig, directory: Arc<D>, push: Arc<dyn PushSink>) -> Self {
        Self {
            config,
            router: Router::new(directory, push),
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    pub fn router(&self) -> &Router<D> {
        &self.router
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> MsgrResult<()> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MsgrError::Transport(format!("bind {addr} failed: {e}")))?;
        info!(addr = %addr, "control listener started");
        Arc::new(self).serve(listener).await
    }

    /// Serve on an already-bound listener until [`shutdown`](Self::shutdown).
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> MsgrResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("control listener stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer).await {
                                    warn!(peer = %peer, error = %e, "control connection failed");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }

    /// Stop accepting new control connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> MsgrResult<()> {
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);

        let name = time::timeout(self.config.read_timeout, read_string(&mut reader)).await??;
        let Some(command) = Command::from_wire(&name) else {
            warn!(peer = %peer, command = %name, "unknown command");
            write_status(&mut write_half, 2).await?;
            return Ok(());
        };
        debug!(peer = %peer, %command, "control request");

        let request = match time::timeout(
            self.config.read_timeout,
            ControlRequest::read_body(command, &mut reader),
        )
        .await
        {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                write_status(&mut write_half, command.failure_code()).await?;
                return Err(e);
            }
            Err(elapsed) => {
                write_status(&mut write_half, command.failure_code()).await?;
                return Err(elapsed.into());
            }
        };

        let reply = self.dispatch(request, peer).await;
        write_frame(&mut write_half, &reply.frame).await?;
        let _ = write_half.shutdown().await;
        drop(reader);

        match reply.follow_up {
            Some(FollowUp::Acknowledge(message)) => self.router.acknowledge(&message).await,
            Some(FollowUp::FlushPending(alias)) => {
                self.router.flush_pending(&alias).await;
            }
            None => {}
        }
        Ok(())
    }

    async fn dispatch(&self, request: ControlRequest, peer: SocketAddr) -> Reply {
        let command = request.command();
        let directory = self.router.directory();

        match request {
            ControlRequest::Register {
                username,
                alias,
                date_of_birth,
            } => match Identity::new(username, alias, date_of_birth) {
                Ok(identity) => Reply::from_result(command, directory.register(identity).await),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "invalid identity");
                    Reply::status(command.failure_code())
                }
            },

            ControlRequest::Unregister { alias } => {
                Reply::from_result(command, directory.unregister(&alias).await)
            }

            ControlRequest::Connect { alias, push_port } => {
                let push_addr = SocketAddr::new(peer.ip(), push_port);
                match directory.set_push_address(&alias, push_addr).await {
                    Ok(()) => Reply::status(STATUS_OK).then(FollowUp::FlushPending(alias)),
                    Err(refusal) => Reply::from_result(command, Err(refusal)),
                }
            }

            ControlRequest::Disconnect { alias } => {
                Reply::from_result(command, directory.clear_push_address(&alias).await)
            }

            ControlRequest::Send {
                sender,
                recipient,
                body,
            } => match self.router.send(&sender, &recipient, &body).await {
                Ok(routed) => {
                    let frame = FrameBuilder::new()
                        .status(STATUS_OK)
                        .number(routed.message.id)
                        .into_bytes();
                    let follow_up = match routed.outcome {
                        SendOutcome::Delivered => Some(FollowUp::Acknowledge(routed.message)),
                        // Behind a backlog or offline; flushing is a no-op when offline.
                        SendOutcome::Queued => Some(FollowUp::FlushPending(routed.message.recipient)),
                    };
                    Reply { frame, follow_up }
                }
                Err(refusal) => Reply::from_result(command, Err(refusal)),
            },

            ControlRequest::ConnectedUsers { alias } => {
                if let Err(refusal) = directory.state(&alias).await.permits(command) {
                    return Reply::from_result(command, Err(refusal));
                }
                let connected = directory.list_connected().await;
                match roster_frame(&connected) {
                    Ok(frame) => {
                        debug!(requester = %alias, count = connected.len(), "roster sent");
                        Reply {
                            frame,
                            follow_up: None,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "roster encoding failed");
                        Reply::status(command.failure_code())
                    }
                }
            }
        }
    }
}

fn roster_frame(aliases: &[String]) -> MsgrResult<Vec<u8>> {
    let mut frame = FrameBuilder::new()
        .status(STATUS_OK)
        .number(aliases.len() as u64);
    for alias in aliases {
        frame = frame.string(alias)?;
    }
    Ok(frame.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::push::TcpPushSink;
    use msgr_core::codec::{read_number, read_status};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    async fn start() -> (SocketAddr, Arc<MessageServer<MemoryDirectory>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(MessageServer::new(
            ServerConfig::default(),
            Arc::new(MemoryDirectory::default()),
            Arc::new(TcpPushSink::new(Duration::from_secs(1))),
        ));
        tokio::spawn(server.clone().serve(listener));
        (addr, server)
    }

    async fn exchange(addr: SocketAddr, frame: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(frame).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn register_then_register_again() {
        let (addr, _server) = start().await;
        let frame = b"REGISTER\0Bob\0bob\x0001/01/2000\0";
        assert_eq!(exchange(addr, frame).await, vec![0]);
        assert_eq!(exchange(addr, frame).await, vec![1]);
    }

    #[tokio::test]
    async fn unknown_command_gets_generic_failure() {
        let (addr, _server) = start().await;
        assert_eq!(exchange(addr, b"SHOUT\0everyone\0").await, vec![2]);
    }

    #[tokio::test]
    async fn sendattach_is_refused_without_reading_file() {
        let (addr, _server) = start().await;
        assert_eq!(
            exchange(addr, b"SENDATTACH\0bob\0hi\0/etc/passwd\0").await,
            vec![2]
        );
    }

    #[tokio::test]
    async fn connect_codes() {
        let (addr, _server) = start().await;
        assert_eq!(exchange(addr, b"CONNECT\0bob\x0040000\0").await, vec![1]);
        exchange(addr, b"REGISTER\0Bob\0bob\x0001/01/2000\0").await;
        assert_eq!(exchange(addr, b"CONNECT\0bob\x0040000\0").await, vec![0]);
        assert_eq!(exchange(addr, b"CONNECT\0bob\x0040000\0").await, vec![2]);
        assert_eq!(exchange(addr, b"DISCONNECT\0bob\0").await, vec![0]);
        assert_eq!(exchange(addr, b"DISCONNECT\0bob\0").await, vec![2]);
        assert_eq!(exchange(addr, b"DISCONNECT\0nobody\0").await, vec![1]);
    }

    #[tokio::test]
    async fn truncated_request_gets_failure_code() {
        let (addr, _server) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"CONNECT\0bob").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, vec![3]);
    }

    #[tokio::test]
    async fn connected_users_payload() {
        let (addr, server) = start().await;
        for alias in ["bob", "alice"] {
            let frame = ControlRequest::Register {
                username: alias.into(),
                alias: alias.into(),
                date_of_birth: "01/01/2000".into(),
            }
            .encode()
            .unwrap();
            exchange(addr, &frame).await;
        }
        assert_eq!(exchange(addr, b"CONNECTEDUSERS\0bob\0").await, vec![1]);
        assert_eq!(exchange(addr, b"CONNECTEDUSERS\0ghost\0").await, vec![2]);

        let directory = server.router().directory();
        directory
            .set_push_address("bob", "127.0.0.1:1".parse().unwrap())
            .await
            .unwrap();
        directory
            .set_push_address("alice", "127.0.0.1:2".parse().unwrap())
            .await
            .unwrap();

        let response = exchange(addr, b"CONNECTEDUSERS\0bob\0").await;
        let mut reader: &[u8] = &response;
        assert_eq!(read_status(&mut reader).await.unwrap(), 0);
        assert_eq!(read_number(&mut reader).await.unwrap(), 2);
        assert_eq!(read_string(&mut reader).await.unwrap(), "alice");
        assert_eq!(read_string(&mut reader).await.unwrap(), "bob");
        assert!(reader.is_empty());
    }
}
