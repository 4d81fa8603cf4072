//! Per-user client state, passed explicitly to every engine operation.

use msgr_core::Identity;

use crate::listener::PushListener;

/// Who this client is and whether it has a live push listener.
///
/// Owned by the caller; [`MessengerClient`](crate::MessengerClient) borrows
/// it for each request and updates it from the outcome.
#[derive(Default)]
pub struct ClientSession {
    identity: Option<Identity>,
    push: Option<PushListener>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            push: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn alias(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.alias.as_str())
    }

    /// True while a push listener is held for an accepted CONNECT.
    pub fn is_connected(&self) -> bool {
        self.push.is_some()
    }

    pub fn push_port(&self) -> Option<u16> {
        self.push.as_ref().map(PushListener::port)
    }

    pub(crate) fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub(crate) fn attach_listener(&mut self, listener: PushListener) -> Option<PushListener> {
        self.push.replace(listener)
    }

    pub(crate) fn detach_listener(&mut self) -> Option<PushListener> {
        self.push.take()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("identity", &self.identity)
            .field("push_port", &self.push_port())
            .finish()
    }
}
