//! Per-alias session state machine.
//!
//! ```text
//! Unregistered --REGISTER--> Registered --CONNECT--> Connected
//!      ^                        |  ^                     |
//!      +-------UNREGISTER-------+  +-----DISCONNECT------+
//! ```
//!
//! The server applies every lifecycle request through [`SessionState::apply`]
//! so the directory never holds a state the protocol cannot reach.

use crate::error::DomainError;
use crate::messages::Command;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Unregistered,
    Registered,
    Connected,
}

/// Lifecycle requests that move an alias between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Register,
    Unregister,
    Connect,
    Disconnect,
}

/// Why a request was refused in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Reported to the client through the command's domain status code.
    Domain(DomainError),
    /// No domain code exists; the client sees a generic failure.
    Invalid(&'static str),
}

impl From<DomainError> for Refusal {
    fn from(e: DomainError) -> Self {
        Refusal::Domain(e)
    }
}

impl Refusal {
    /// Status byte for this refusal of `command`.
    pub fn status_code(self, command: Command) -> u8 {
        match self {
            Refusal::Domain(d) => command.encode_rejection(d),
            Refusal::Invalid(_) => command.failure_code(),
        }
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Domain(d) => write!(f, "{d}"),
            Refusal::Invalid(reason) => f.write_str(reason),
        }
    }
}

impl SessionState {
    pub fn is_registered(self) -> bool {
        self != SessionState::Unregistered
    }

    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }

    /// The state after `transition`, or why it is refused.
    pub fn apply(self, transition: Transition) -> Result<SessionState, Refusal> {
        use SessionState::*;

        match (self, transition) {
            (Unregistered, Transition::Register) => Ok(Registered),
            (_, Transition::Register) => Err(DomainError::AliasInUse.into()),

            (Unregistered, _) => Err(DomainError::AliasNotFound.into()),

            (Registered, Transition::Unregister) => Ok(Unregistered),
            (Connected, Transition::Unregister) => {
                Err(Refusal::Invalid("cannot unregister a connected alias"))
            }

            (Registered, Transition::Connect) => Ok(Connected),
            (Connected, Transition::Connect) => Err(DomainError::AlreadyConnected.into()),

            (Connected, Transition::Disconnect) => Ok(Registered),
            (Registered, Transition::Disconnect) => Err(DomainError::NotConnected.into()),
        }
    }

    /// Whether an alias in this state may act as the requester of SEND or
    /// CONNECTEDUSERS.
    pub fn permits(self, command: Command) -> Result<(), Refusal> {
        match (self, command) {
            (SessionState::Connected, Command::Send | Command::ConnectedUsers) => Ok(()),
            (SessionState::Registered, Command::ConnectedUsers) => {
                Err(DomainError::NotConnected.into())
            }
            (SessionState::Registered, Command::Send) => {
                Err(Refusal::Invalid("sender is not connected"))
            }
            (SessionState::Unregistered, Command::Send | Command::ConnectedUsers) => {
                Err(Refusal::Invalid("requester is not registered"))
            }
            _ => Err(Refusal::Invalid("not a requester command")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let s = SessionState::Unregistered;
        let s = s.apply(Transition::Register).unwrap();
        assert_eq!(s, SessionState::Registered);
        let s = s.apply(Transition::Connect).unwrap();
        assert!(s.is_connected());
        let s = s.apply(Transition::Disconnect).unwrap();
        assert_eq!(s, SessionState::Registered);
        let s = s.apply(Transition::Unregister).unwrap();
        assert!(!s.is_registered());
    }

    #[test]
    fn double_register_is_alias_in_use() {
        for s in [SessionState::Registered, SessionState::Connected] {
            assert_eq!(
                s.apply(Transition::Register),
                Err(Refusal::Domain(DomainError::AliasInUse))
            );
        }
    }

    #[test]
    fn unregistered_alias_is_not_found() {
        for t in [Transition::Unregister, Transition::Connect, Transition::Disconnect] {
            assert_eq!(
                SessionState::Unregistered.apply(t),
                Err(Refusal::Domain(DomainError::AliasNotFound))
            );
        }
    }

    #[test]
    fn connect_and_disconnect_guards() {
        assert_eq!(
            SessionState::Connected.apply(Transition::Connect),
            Err(Refusal::Domain(DomainError::AlreadyConnected))
        );
        assert_eq!(
            SessionState::Registered.apply(Transition::Disconnect),
            Err(Refusal::Domain(DomainError::NotConnected))
        );
    }

    #[test]
    fn unregister_while_connected_is_generic_failure() {
        let refusal = SessionState::Connected
            .apply(Transition::Unregister)
            .unwrap_err();
        assert!(matches!(refusal, Refusal::Invalid(_)));
        assert_eq!(refusal.status_code(Command::Unregister), 2);
    }

    #[test]
    fn requester_permissions() {
        assert!(SessionState::Connected.permits(Command::Send).is_ok());
        assert_eq!(
            SessionState::Registered
                .permits(Command::ConnectedUsers)
                .unwrap_err()
                .status_code(Command::ConnectedUsers),
            1
        );
        assert_eq!(
            SessionState::Unregistered
                .permits(Command::ConnectedUsers)
                .unwrap_err()
                .status_code(Command::ConnectedUsers),
            2
        );
        assert!(matches!(
            SessionState::Registered.permits(Command::Send),
            Err(Refusal::Invalid(_))
        ));
    }
}
