//! The msgr client engine.
//!
//! `MessengerClient` turns each user action into one short-lived control
//! exchange with the server and reports every outcome as a single line on
//! its [`UiSink`]. Per-user state lives in a [`ClientSession`] the caller
//! owns and passes in.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time;

use msgr_core::codec::{read_number, read_status, read_string, write_frame};
use msgr_core::{
    Command, ControlRequest, DomainError, Identity, MsgrError, MsgrResult, StatusOutcome,
};

use crate::error::{RequestError, RequestResult};
use crate::listener::PushListener;
use crate::normalize::{truncate_body, TextNormalizer, WhitespaceNormalizer};
use crate::session::ClientSession;
use crate::ui::UiSink;

/// Where the server is and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server control address, `host:port`.
    pub server: String,
    /// Bound on each whole control exchange.
    pub request_timeout: Duration,
    /// Local address the push listener binds (port is always ephemeral).
    pub push_bind: IpAddr,
}

impl ClientConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "localhost:8888".to_string(),
            request_timeout: Duration::from_secs(10),
            push_bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// A control exchange that completed: the success payload, or the status
/// the server answered with instead.
type Exchange<T> = MsgrResult<Result<T, StatusOutcome>>;

pub struct MessengerClient {
    config: ClientConfig,
    ui: Arc<dyn UiSink>,
    normalizer: Arc<dyn TextNormalizer>,
}

impl MessengerClient {
    pub fn new(config: ClientConfig, ui: Arc<dyn UiSink>) -> Self {
        Self {
            config,
            ui,
            normalizer: Arc::new(WhitespaceNormalizer),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn TextNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Register `identity` with the server.
    ///
    /// The session adopts the identity whatever the outcome, so a user who
    /// is already registered from an earlier run can go on to CONNECT.
    pub async fn register(
        &self,
        session: &mut ClientSession,
        identity: Identity,
    ) -> RequestResult<()> {
        let request = ControlRequest::Register {
            username: identity.username.clone(),
            alias: identity.alias.clone(),
            date_of_birth: identity.date_of_birth.clone(),
        };
        session.set_identity(identity);

        let result = settle(Command::Register, self.status_only(&request).await);
        self.report(match result {
            Ok(()) => "REGISTER OK",
            Err(RequestError::Rejected(DomainError::AliasInUse)) => "USERNAME IN USE",
            Err(_) => "REGISTER FAIL",
        });
        result
    }

    pub async fn unregister(&self, session: &mut ClientSession) -> RequestResult<()> {
        let Some(alias) = self.require_alias(session, Command::Unregister) else {
            return Err(RequestError::Failed);
        };
        let request = ControlRequest::Unregister { alias };

        let result = settle(Command::Unregister, self.status_only(&request).await);
        self.report(match result {
            Ok(()) => "UNREGISTER OK",
            Err(RequestError::Rejected(DomainError::AliasNotFound)) => "USER DOES NOT EXIST",
            Err(_) => "UNREGISTER FAIL",
        });
        result
    }

    /// Start a push listener and ask the server to deliver to it.
    ///
    /// The listener is kept only if the server accepts the CONNECT.
    pub async fn connect(&self, session: &mut ClientSession) -> RequestResult<()> {
        let Some(alias) = self.require_alias(session, Command::Connect) else {
            return Err(RequestError::Failed);
        };

        let bind = SocketAddr::new(self.config.push_bind, 0);
        let listener = match PushListener::bind(bind, self.ui.clone()).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("cannot start push listener: {}", e);
                self.report("CONNECT FAIL");
                return Err(RequestError::Failed);
            }
        };

        let request = ControlRequest::Connect {
            alias,
            push_port: listener.port(),
        };
        let result = settle(Command::Connect, self.status_only(&request).await);

        match result {
            Ok(()) => {
                if let Some(stale) = session.attach_listener(listener) {
                    stale.close().await;
                }
                self.report("CONNECT OK");
            }
            Err(err) => {
                listener.close().await;
                self.report(match err {
                    RequestError::Rejected(DomainError::AliasNotFound) => {
                        "CONNECT FAIL, USER DOES NOT EXIST"
                    }
                    RequestError::Rejected(DomainError::AlreadyConnected) => {
                        "USER ALREADY CONNECTED"
                    }
                    _ => "CONNECT FAIL",
                });
            }
        }
        result
    }

    /// Ask the server to stop pushing, then close the local listener.
    ///
    /// The listener is also closed when the server says the alias is gone
    /// or not connected; only a failed exchange keeps it.
    pub async fn disconnect(&self, session: &mut ClientSession) -> RequestResult<()> {
        let Some(alias) = self.require_alias(session, Command::Disconnect) else {
            return Err(RequestError::Failed);
        };
        let request = ControlRequest::Disconnect { alias };

        let result = settle(Command::Disconnect, self.status_only(&request).await);
        if !matches!(result, Err(RequestError::Failed)) {
            if let Some(listener) = session.detach_listener() {
                listener.close().await;
            }
        }

        self.report(match result {
            Ok(()) => "DISCONNECT OK",
            Err(RequestError::Rejected(DomainError::AliasNotFound)) => {
                "DISCONNECT FAIL / USER DOES NOT EXIST"
            }
            Err(RequestError::Rejected(DomainError::NotConnected)) => {
                "DISCONNECT FAIL / USER NOT CONNECTED"
            }
            Err(_) => "DISCONNECT FAIL",
        });
        result
    }

    /// Normalize `text` and send it to `recipient`. Returns the message id.
    pub async fn send(
        &self,
        session: &ClientSession,
        recipient: &str,
        text: &str,
    ) -> RequestResult<u64> {
        let Some(sender) = self.require_alias(session, Command::Send) else {
            return Err(RequestError::Failed);
        };

        let body = match self.normalizer.normalize(text).await {
            Ok(normalized) => truncate_body(&normalized).to_string(),
            Err(e) => {
                tracing::warn!("text normalization failed: {}", e);
                self.report("SEND FAIL");
                return Err(RequestError::Failed);
            }
        };

        let request = ControlRequest::Send {
            sender,
            recipient: recipient.to_string(),
            body,
        };
        let exchanged = self.bounded(self.send_exchange(&request)).await;

        let result = settle(Command::Send, exchanged);
        match result {
            Ok(id) => self.report(format!("SEND OK - MESSAGE {id}")),
            Err(RequestError::Rejected(DomainError::AliasNotFound)) => {
                self.report("SEND FAIL / USER DOES NOT EXIST")
            }
            Err(_) => self.report("SEND FAIL"),
        }
        result
    }

    /// Attachments are not supported. Nothing is sent and `file` is never opened.
    pub async fn send_attach(
        &self,
        session: &ClientSession,
        recipient: &str,
        _text: &str,
        file: &Path,
    ) -> RequestResult<()> {
        let Some(sender) = self.require_alias(session, Command::SendAttach) else {
            return Err(RequestError::Failed);
        };
        tracing::debug!(
            "SENDATTACH from {} to {} ({}) refused locally",
            sender,
            recipient,
            file.display()
        );
        self.report("SENDATTACH FAIL / NOT IMPLEMENTED");
        Err(RequestError::Unimplemented)
    }

    /// List the aliases that are currently connected.
    pub async fn connected_users(&self, session: &ClientSession) -> RequestResult<Vec<String>> {
        let Some(alias) = self.require_alias(session, Command::ConnectedUsers) else {
            return Err(RequestError::Failed);
        };
        let request = ControlRequest::ConnectedUsers { alias };

        let exchanged = self.bounded(self.roster_exchange(&request)).await;

        let result = settle(Command::ConnectedUsers, exchanged);
        match &result {
            Ok(users) => self.report(format!(
                "CONNECTED USERS ({} users connected) OK - {}",
                users.len(),
                users.join(", ")
            )),
            Err(RequestError::Rejected(DomainError::NotConnected)) => {
                self.report("CONNECTED USERS FAIL / USER IS NOT CONNECTED")
            }
            Err(_) => self.report("CONNECTED USERS FAIL"),
        }
        result
    }

    fn report(&self, line: impl AsRef<str>) {
        self.ui.print(line.as_ref());
    }

    fn require_alias(&self, session: &ClientSession, command: Command) -> Option<String> {
        let alias = session.alias().map(str::to_string);
        if alias.is_none() {
            self.report(format!("{command} FAIL / NOT REGISTERED"));
        }
        alias
    }

    async fn bounded<T>(
        &self,
        exchange: impl std::future::Future<Output = MsgrResult<T>>,
    ) -> MsgrResult<T> {
        time::timeout(self.config.request_timeout, exchange).await?
    }

    /// Dial the server and write `request`; the response is read by the caller.
    async fn open(&self, request: &ControlRequest) -> MsgrResult<BufReader<TcpStream>> {
        let frame = request.encode()?;
        let mut stream = TcpStream::connect(&self.config.server)
            .await
            .map_err(|e| {
                MsgrError::Transport(format!("connect to {} failed: {e}", self.config.server))
            })?;
        write_frame(&mut stream, &frame).await?;
        Ok(BufReader::new(stream))
    }

    async fn status_only(&self, request: &ControlRequest) -> Exchange<()> {
        self.bounded(self.status_exchange(request)).await
    }

    async fn status_exchange(&self, request: &ControlRequest) -> Exchange<()> {
        let mut conn = self.open(request).await?;
        match request.command().decode_status(read_status(&mut conn).await?) {
            StatusOutcome::Ok => Ok(Ok(())),
            other => Ok(Err(other)),
        }
    }

    /// SEND replies with the assigned message id after an OK status.
    async fn send_exchange(&self, request: &ControlRequest) -> Exchange<u64> {
        let mut conn = self.open(request).await?;
        match Command::Send.decode_status(read_status(&mut conn).await?) {
            StatusOutcome::Ok => Ok(Ok(read_number(&mut conn).await?)),
            other => Ok(Err(other)),
        }
    }

    /// CONNECTEDUSERS replies with a count followed by that many aliases.
    async fn roster_exchange(&self, request: &ControlRequest) -> Exchange<Vec<String>> {
        let mut conn = self.open(request).await?;
        match Command::ConnectedUsers.decode_status(read_status(&mut conn).await?) {
            StatusOutcome::Ok => {
                let count = read_number(&mut conn).await?;
                let mut users = Vec::new();
                for _ in 0..count {
                    users.push(read_string(&mut conn).await?);
                }
                Ok(Ok(users))
            }
            other => Ok(Err(other)),
        }
    }
}

/// Collapse an exchange into the caller-facing result, logging failures.
fn settle<T>(command: Command, exchanged: Exchange<T>) -> RequestResult<T> {
    match exchanged {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(StatusOutcome::Rejected(reason))) => {
            tracing::debug!("{} rejected: {}", command, reason);
            Err(RequestError::Rejected(reason))
        }
        Ok(Err(StatusOutcome::Failed(code))) => {
            tracing::warn!("{} failed with status {}", command, code);
            Err(RequestError::Failed)
        }
        Ok(Err(StatusOutcome::Ok)) => Err(RequestError::Failed),
        Err(e) => {
            tracing::warn!("{} failed: {}", command, e);
            Err(RequestError::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::MemorySink;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A one-shot fake server: accepts one connection, captures a request
    /// of `fields` NUL-terminated fields, answers with `response`.
    async fn fake_server(fields: usize, response: Vec<u8>) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut request = Vec::new();
            for _ in 0..fields {
                stream.read_until(0, &mut request).await.unwrap();
            }
            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });
        (addr, handle)
    }

    fn client(server: String, sink: Arc<MemorySink>) -> MessengerClient {
        let config = ClientConfig {
            server,
            request_timeout: Duration::from_secs(2),
            push_bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        MessengerClient::new(config, sink)
    }

    fn bob() -> Identity {
        Identity::new("Bob Smith", "bob", "01/01/2000").unwrap()
    }

    #[tokio::test]
    async fn register_sends_fields_in_order() {
        let expected = b"REGISTER\0Bob Smith\0bob\x0001/01/2000\0";
        let (addr, server) = fake_server(4, vec![0]).await;
        let sink = Arc::new(MemorySink::new());
        let mut session = ClientSession::new();

        client(addr, sink.clone())
            .register(&mut session, bob())
            .await
            .unwrap();

        assert_eq!(server.await.unwrap(), expected.to_vec());
        assert_eq!(session.alias(), Some("bob"));
        assert_eq!(sink.lines(), vec!["REGISTER OK".to_string()]);
    }

    #[tokio::test]
    async fn register_alias_in_use() {
        let (addr, _server) = fake_server(4, vec![1]).await;
        let sink = Arc::new(MemorySink::new());
        let mut session = ClientSession::new();

        let err = client(addr, sink.clone())
            .register(&mut session, bob())
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Rejected(DomainError::AliasInUse));
        assert_eq!(sink.last().as_deref(), Some("USERNAME IN USE"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_single_failure_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let sink = Arc::new(MemorySink::new());
        let mut session = ClientSession::with_identity(bob());
        let err = client(addr, sink.clone())
            .unregister(&mut session)
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Failed);
        assert_eq!(sink.lines(), vec!["UNREGISTER FAIL".to_string()]);
    }

    #[tokio::test]
    async fn send_collapses_whitespace_and_returns_id() {
        let expected = b"SEND\0alice\0bob\0hi bob\0";
        let (addr, server) = fake_server(4, b"\x0042\0".to_vec()).await;
        let sink = Arc::new(MemorySink::new());
        let session =
            ClientSession::with_identity(Identity::new("Alice", "alice", "02/02/2002").unwrap());

        let id = client(addr, sink.clone())
            .send(&session, "bob", "  hi   bob  ")
            .await
            .unwrap();
        assert_eq!(id, 42);
        assert_eq!(server.await.unwrap(), expected.to_vec());
        assert_eq!(sink.lines(), vec!["SEND OK - MESSAGE 42".to_string()]);
    }

    #[tokio::test]
    async fn send_to_unknown_recipient() {
        let (addr, _server) = fake_server(4, vec![1]).await;
        let sink = Arc::new(MemorySink::new());
        let session =
            ClientSession::with_identity(Identity::new("Alice", "alice", "02/02/2002").unwrap());

        let err = client(addr, sink.clone())
            .send(&session, "ghost", "hi")
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Rejected(DomainError::AliasNotFound));
        assert_eq!(sink.last().as_deref(), Some("SEND FAIL / USER DOES NOT EXIST"));
    }

    #[tokio::test]
    async fn connected_users_lists_roster() {
        let expected = b"CONNECTEDUSERS\0bob\0";
        let (addr, _server) =
            fake_server(2, b"\x002\0alice\0bob\0".to_vec()).await;
        let sink = Arc::new(MemorySink::new());
        let session = ClientSession::with_identity(bob());

        let users = client(addr, sink.clone())
            .connected_users(&session)
            .await
            .unwrap();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(
            sink.last().as_deref(),
            Some("CONNECTED USERS (2 users connected) OK - alice, bob")
        );
    }

    #[tokio::test]
    async fn truncated_roster_is_failure() {
        let expected = b"CONNECTEDUSERS\0bob\0";
        let (addr, _server) = fake_server(2, b"\x003\0alice\0".to_vec()).await;
        let sink = Arc::new(MemorySink::new());
        let session = ClientSession::with_identity(bob());

        let err = client(addr, sink.clone())
            .connected_users(&session)
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Failed);
        assert_eq!(sink.lines(), vec!["CONNECTED USERS FAIL".to_string()]);
    }

    #[tokio::test]
    async fn rejected_connect_releases_listener() {
        let (addr, server) = fake_server(3, vec![2]).await;
        let sink = Arc::new(MemorySink::new());
        let mut session = ClientSession::with_identity(bob());

        let err = client(addr, sink.clone())
            .connect(&mut session)
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Rejected(DomainError::AlreadyConnected));
        assert!(!session.is_connected());
        assert_eq!(sink.last().as_deref(), Some("USER ALREADY CONNECTED"));

        // The request carried the listener's port; it must now be closed.
        let request = server.await.unwrap();
        assert!(request.starts_with(b"CONNECT\0bob\0"));
    }

    #[tokio::test]
    async fn send_attach_never_dials() {
        let sink = Arc::new(MemorySink::new());
        let session = ClientSession::with_identity(bob());
        // Nothing listens here; any dial would fail with a transport error.
        let err = client("127.0.0.1:1".into(), sink.clone())
            .send_attach(&session, "alice", "see file", Path::new("/etc/hostname"))
            .await
            .unwrap_err();
        assert_eq!(err, RequestError::Unimplemented);
        assert_eq!(sink.lines(), vec!["SENDATTACH FAIL / NOT IMPLEMENTED".to_string()]);
    }

    #[tokio::test]
    async fn commands_without_identity_fail_locally() {
        let sink = Arc::new(MemorySink::new());
        let mut session = ClientSession::new();
        let client = client("127.0.0.1:1".into(), sink.clone());

        assert_eq!(client.connect(&mut session).await, Err(RequestError::Failed));
        assert_eq!(
            client
                .send_attach(&session, "alice", "see file", Path::new("/etc/hostname"))
                .await,
            Err(RequestError::Failed)
        );
        assert_eq!(
            sink.lines(),
            vec![
                "CONNECT FAIL / NOT REGISTERED".to_string(),
                "SENDATTACH FAIL / NOT REGISTERED".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn silent_server_times_out_with_one_fail_line() {
        // Accepts and holds the connection without ever answering.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = release_rx.await;
            drop(stream);
        });

        let sink = Arc::new(MemorySink::new());
        let config = ClientConfig {
            server: addr,
            request_timeout: Duration::from_millis(200),
            push_bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        let client = MessengerClient::new(config, sink.clone());
        let mut session = ClientSession::new();

        let started = std::time::Instant::now();
        let result = client.register(&mut session, bob()).await;
        assert_eq!(result, Err(RequestError::Failed));
        assert!(started.elapsed() < Duration::from_secs(2), "timeout not applied");
        assert_eq!(sink.lines(), vec!["REGISTER FAIL".to_string()]);

        let _ = release_tx.send(());
        server.await.unwrap();
    }
}
