//! msgr-core: Shared protocol library for the msgr messaging service.
//!
//! Provides the null-terminated wire codec, control-channel requests and
//! status mapping, push-channel frames, and the per-alias session state
//! machine used by both the client engine and the server.

pub mod codec;
pub mod error;
pub mod identity;
pub mod messages;
pub mod state;

// Re-export commonly used items at crate root.
pub use codec::{FrameBuilder, MAX_FIELD_LEN};
pub use error::{DomainError, MsgrError, MsgrResult};
pub use identity::{Identity, Message};
pub use messages::{Command, ControlRequest, PushEvent, StatusOutcome, STATUS_OK};
pub use state::{Refusal, SessionState, Transition};
