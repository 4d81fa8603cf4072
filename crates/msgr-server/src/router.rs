//! Message router: delivers SEND requests now or queues them, acknowledges
//! senders, and flushes queues when a recipient connects.

use crate::directory::{Directory, Enqueued};
use crate::push::PushSink;
use msgr_core::{Command, DomainError, Message, PushEvent, Refusal};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to an accepted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the recipient's push channel.
    Delivered,
    /// Recipient not reachable; held until it connects.
    Queued,
}

/// Result of routing one SEND.
#[derive(Debug, Clone)]
pub struct Routed {
    pub message: Message,
    pub outcome: SendOutcome,
}

pub struct Router<D: Directory> {
    directory: Arc<D>,
    push: Arc<dyn PushSink>,
}

impl<D: Directory> Router<D> {
    pub fn new(directory: Arc<D>, push: Arc<dyn PushSink>) -> Self {
        Self { directory, push }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Route one message from `sender` to `recipient`.
    ///
    /// The sender must be connected and the recipient registered. A
    /// recipient whose push address refuses the dial is marked disconnected
    /// and the message is queued instead. A `Queued` message for a connected
    /// recipient is waiting behind a backlog; [`Router::flush_pending`]
    /// delivers it.
    pub async fn send(&self, sender: &str, recipient: &str, body: &str) -> Result<Routed, Refusal> {
        self.directory.state(sender).await.permits(Command::Send)?;
        if !self.directory.is_registered(recipient).await {
            warn!(sender = %sender, recipient = %recipient, "send to unknown alias");
            return Err(DomainError::AliasNotFound.into());
        }

        let message = Message {
            id: self.directory.next_message_id().await,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body: body.to_string(),
        };

        loop {
            let addr = match self.directory.enqueue(message.clone()).await? {
                Enqueued::Deliver(addr) => addr,
                Enqueued::Queued => {
                    info!(id = message.id, sender = %sender, recipient = %recipient, "message queued");
                    return Ok(Routed {
                        message,
                        outcome: SendOutcome::Queued,
                    });
                }
            };
            match self.push.deliver(addr, &message_event(&message)).await {
                Ok(()) => {
                    info!(id = message.id, sender = %sender, recipient = %recipient, "message delivered");
                    return Ok(Routed {
                        message,
                        outcome: SendOutcome::Delivered,
                    });
                }
                Err(e) => {
                    warn!(
                        recipient = %recipient,
                        push = %addr,
                        error = %e,
                        "push failed, marking recipient disconnected"
                    );
                    // Next round queues it, unless the recipient reconnected meanwhile.
                    let _ = self.directory.clear_push_address(recipient).await;
                }
            }
        }
    }

    /// Tell the sender its message reached the recipient. Best effort.
    pub async fn acknowledge(&self, message: &Message) {
        let Some(addr) = self.directory.lookup_push_address(&message.sender).await else {
            debug!(id = message.id, sender = %message.sender, "sender offline, ack skipped");
            return;
        };
        let ack = PushEvent::Ack { id: message.id };
        if let Err(e) = self.push.deliver(addr, &ack).await {
            warn!(id = message.id, sender = %message.sender, error = %e, "ack delivery failed");
        }
    }

    /// Deliver everything queued for `alias` to its current push address.
    ///
    /// Keeps going while messages arrive behind the flush. Stops at the first
    /// failed delivery: the rest goes back to the head of the queue and the
    /// alias is disconnected. A no-op while another flush for `alias` runs.
    /// Returns how many were delivered.
    pub async fn flush_pending(&self, alias: &str) -> usize {
        let mut delivered = 0;
        while let Some(batch) = self.directory.take_pending(alias).await {
            let addr = batch.push_address;
            let mut pending: VecDeque<Message> = batch.messages.into();
            while let Some(message) = pending.pop_front() {
                if let Err(e) = self.push.deliver(addr, &message_event(&message)).await {
                    warn!(alias = %alias, id = message.id, error = %e, "flush interrupted");
                    pending.push_front(message);
                    let remaining = pending.len();
                    self.directory.finish_flush(alias, pending.into(), true).await;
                    info!(alias = %alias, delivered, remaining, "pending flush incomplete");
                    return delivered;
                }
                delivered += 1;
                self.acknowledge(&message).await;
            }
            if !self.directory.finish_flush(alias, Vec::new(), false).await {
                break;
            }
        }

        if delivered > 0 {
            info!(alias = %alias, delivered, "pending messages flushed");
        }
        delivered
    }
}

fn message_event(message: &Message) -> PushEvent {
    PushEvent::Message {
        source: message.sender.clone(),
        id: message.id,
        body: message.body.clone(),
    }
}
