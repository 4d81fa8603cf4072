//! Alias directory: registration, session state, push addresses, pending queues.
//!
//! The server only talks to a [`Directory`]; [`MemoryDirectory`] is the
//! in-process implementation. Every future is `Send` so an implementation
//! backed by a database or a remote service can be dropped in.

pub mod memory;

pub use memory::MemoryDirectory;

use msgr_core::{Identity, Message, Refusal, SessionState};
use std::future::Future;
use std::net::SocketAddr;

/// Routing source of truth for the server.
///
/// Mutations on one alias must be serialized so the transitions of
/// [`SessionState`] hold; operations on different aliases should not contend.
pub trait Directory: Send + Sync + 'static {
    /// `Unregistered -> Registered`. `AliasInUse` if the alias exists.
    fn register(&self, identity: Identity) -> impl Future<Output = Result<(), Refusal>> + Send;

    /// `Registered -> Unregistered`, discarding queued messages.
    fn unregister(&self, alias: &str) -> impl Future<Output = Result<(), Refusal>> + Send;

    /// `Registered -> Connected`, remembering where to push.
    fn set_push_address(
        &self,
        alias: &str,
        addr: SocketAddr,
    ) -> impl Future<Output = Result<(), Refusal>> + Send;

    /// `Connected -> Registered`.
    fn clear_push_address(&self, alias: &str) -> impl Future<Output = Result<(), Refusal>> + Send;

    fn lookup_push_address(&self, alias: &str) -> impl Future<Output = Option<SocketAddr>> + Send;

    /// Current state; `Unregistered` for unknown aliases.
    fn state(&self, alias: &str) -> impl Future<Output = SessionState> + Send;

    fn is_registered(&self, alias: &str) -> impl Future<Output = bool> + Send {
        async move { self.state(alias).await.is_registered() }
    }

    /// Connected aliases, sorted, each once.
    fn list_connected(&self) -> impl Future<Output = Vec<String>> + Send;

    /// Next message id. Strictly increasing for the life of the directory.
    fn next_message_id(&self) -> impl Future<Output = u64> + Send;

    /// Accept a message for `message.recipient`.
    ///
    /// Decided under the recipient's lock: a connected recipient with no
    /// backlog and no flush in progress gets [`Enqueued::Deliver`] and the
    /// message is not stored; otherwise it is appended to the queue.
    fn enqueue(&self, message: Message) -> impl Future<Output = Result<Enqueued, Refusal>> + Send;

    /// Claim the pending queue of a connected alias for delivery.
    ///
    /// `None` if the alias is not connected, has nothing queued, or another
    /// flush holds the claim. While claimed, new messages are queued behind.
    fn take_pending(&self, alias: &str) -> impl Future<Output = Option<PendingBatch>> + Send;

    /// Release a claim taken by [`Directory::take_pending`].
    ///
    /// `undelivered` goes back to the head of the queue in order and, with
    /// `disconnect`, the alias drops to `Registered`. Returns true when the
    /// alias is still connected with messages waiting, so the caller should
    /// claim again.
    fn finish_flush(
        &self,
        alias: &str,
        undelivered: Vec<Message>,
        disconnect: bool,
    ) -> impl Future<Output = bool> + Send;
}

/// Where [`Directory::enqueue`] put a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Push it now; nothing is ahead of it.
    Deliver(SocketAddr),
    /// Held in the recipient's queue.
    Queued,
}

/// A claimed queue: where to push and what, oldest first.
#[derive(Debug)]
pub struct PendingBatch {
    pub push_address: SocketAddr,
    pub messages: Vec<Message>,
}
