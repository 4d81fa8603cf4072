//! In-memory directory.
//!
//! The alias map sits behind an `RwLock` that is write-locked only by
//! register/unregister. Each user entry has its own `Mutex`, so connect,
//! disconnect and queue operations on different aliases proceed in parallel
//! while operations on one alias are serialized. Lock order is always map
//! then entry.

use super::{Directory, Enqueued, PendingBatch};
use msgr_core::{DomainError, Identity, Message, Refusal, SessionState, Transition};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A registered user and its live session.
#[derive(Debug)]
struct UserEntry {
    identity: Identity,
    state: SessionState,
    push_address: Option<SocketAddr>,
    pending: VecDeque<Message>,
    /// A flush owns the queue; new messages wait behind it.
    flushing: bool,
}

pub struct MemoryDirectory {
    users: RwLock<HashMap<String, Arc<Mutex<UserEntry>>>>,
    /// Next id handed out by `next_message_id`.
    next_message_id: AtomicU64,
    max_pending: usize,
}

impl MemoryDirectory {
    pub fn new(max_pending: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_message_id: AtomicU64::new(1),
            max_pending,
        }
    }

    async fn entry(&self, alias: &str) -> Option<Arc<Mutex<UserEntry>>> {
        self.users.read().await.get(alias).cloned()
    }

    /// Apply a transition to an existing entry.
    ///
    /// A stale handle whose entry was unregistered meanwhile reads as
    /// `Unregistered`, so the caller gets `AliasNotFound`.
    async fn transition(
        &self,
        alias: &str,
        transition: Transition,
        push_address: Option<SocketAddr>,
    ) -> Result<(), Refusal> {
        let entry = self
            .entry(alias)
            .await
            .ok_or(Refusal::Domain(DomainError::AliasNotFound))?;
        let mut user = entry.lock().await;
        user.state = user.state.apply(transition)?;
        user.push_address = push_address;
        Ok(())
    }

    /// Number of registered aliases.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    pub async fn pending_count(&self, alias: &str) -> usize {
        match self.entry(alias).await {
            Some(entry) => entry.lock().await.pending.len(),
            None => 0,
        }
    }

}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Directory for MemoryDirectory {
    async fn register(&self, identity: Identity) -> Result<(), Refusal> {
        let mut users = self.users.write().await;
        let current = if users.contains_key(&identity.alias) {
            SessionState::Registered
        } else {
            SessionState::Unregistered
        };
        let state = current.apply(Transition::Register)?;

        let alias = identity.alias.clone();
        users.insert(
            alias.clone(),
            Arc::new(Mutex::new(UserEntry {
                identity,
                state,
                push_address: None,
                pending: VecDeque::new(),
                flushing: false,
            })),
        );
        info!(alias = %alias, total = users.len(), "user registered");
        Ok(())
    }

    async fn unregister(&self, alias: &str) -> Result<(), Refusal> {
        let mut users = self.users.write().await;
        let entry = users
            .get(alias)
            .cloned()
            .ok_or(Refusal::Domain(DomainError::AliasNotFound))?;

        let mut user = entry.lock().await;
        user.state = user.state.apply(Transition::Unregister)?;
        let dropped = user.pending.len();
        user.pending.clear();
        let username = user.identity.username.clone();
        drop(user);

        users.remove(alias);
        if dropped > 0 {
            warn!(alias = %alias, dropped, "discarded pending messages on unregister");
        }
        info!(alias = %alias, username = %username, "user unregistered");
        Ok(())
    }

    async fn set_push_address(&self, alias: &str, addr: SocketAddr) -> Result<(), Refusal> {
        self.transition(alias, Transition::Connect, Some(addr)).await?;
        info!(alias = %alias, push = %addr, "user connected");
        Ok(())
    }

    async fn clear_push_address(&self, alias: &str) -> Result<(), Refusal> {
        self.transition(alias, Transition::Disconnect, None).await?;
        info!(alias = %alias, "user disconnected");
        Ok(())
    }

    async fn lookup_push_address(&self, alias: &str) -> Option<SocketAddr> {
        let entry = self.entry(alias).await?;
        let user = entry.lock().await;
        user.push_address.filter(|_| user.state.is_connected())
    }

    async fn state(&self, alias: &str) -> SessionState {
        match self.entry(alias).await {
            Some(entry) => entry.lock().await.state,
            None => SessionState::Unregistered,
        }
    }

    async fn list_connected(&self) -> Vec<String> {
        let users = self.users.read().await;
        let mut connected = Vec::new();
        for (alias, entry) in users.iter() {
            if entry.lock().await.state.is_connected() {
                connected.push(alias.clone());
            }
        }
        connected.sort();
        connected
    }

    async fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn enqueue(&self, message: Message) -> Result<Enqueued, Refusal> {
        let entry = self
            .entry(&message.recipient)
            .await
            .ok_or(Refusal::Domain(DomainError::AliasNotFound))?;
        let mut user = entry.lock().await;
        if !user.state.is_registered() {
            return Err(DomainError::AliasNotFound.into());
        }
        if user.state.is_connected() && user.pending.is_empty() && !user.flushing {
            if let Some(addr) = user.push_address {
                return Ok(Enqueued::Deliver(addr));
            }
        }
        if user.pending.len() >= self.max_pending {
            warn!(alias = %message.recipient, max = self.max_pending, "pending queue full");
            return Err(Refusal::Invalid("pending queue full"));
        }
        debug!(
            alias = %message.recipient,
            id = message.id,
            queued = user.pending.len() + 1,
            flushing = user.flushing,
            "message queued"
        );
        user.pending.push_back(message);
        Ok(Enqueued::Queued)
    }

    async fn take_pending(&self, alias: &str) -> Option<PendingBatch> {
        let entry = self.entry(alias).await?;
        let mut user = entry.lock().await;
        if user.flushing || user.pending.is_empty() || !user.state.is_connected() {
            return None;
        }
        let push_address = user.push_address?;
        user.flushing = true;
        let messages: Vec<Message> = user.pending.drain(..).collect();
        debug!(alias = %alias, count = messages.len(), "pending queue claimed");
        Some(PendingBatch {
            push_address,
            messages,
        })
    }

    async fn finish_flush(&self, alias: &str, undelivered: Vec<Message>, disconnect: bool) -> bool {
        let Some(entry) = self.entry(alias).await else {
            if !undelivered.is_empty() {
                warn!(alias = %alias, count = undelivered.len(), "undelivered messages for unknown alias dropped");
            }
            return false;
        };
        let mut user = entry.lock().await;
        user.flushing = false;
        if !user.state.is_registered() {
            // Unregistered while the flush ran; the queue went with it.
            return false;
        }
        for message in undelivered.into_iter().rev() {
            user.pending.push_front(message);
        }
        if disconnect {
            if let Ok(state) = user.state.apply(Transition::Disconnect) {
                user.state = state;
                user.push_address = None;
                info!(alias = %alias, queued = user.pending.len(), "user disconnected after failed push");
            }
        }
        user.state.is_connected() && !user.pending.is_empty()
    }
}
