//! msgr-server: control-channel server for the msgr messaging service.
//!
//! Accepts one request per TCP connection, tracks aliases in a
//! [`Directory`], and pushes messages back to connected clients through a
//! [`PushSink`].

pub mod config;
pub mod directory;
pub mod push;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use directory::{Directory, Enqueued, MemoryDirectory, PendingBatch};
pub use push::{PushSink, TcpPushSink};
pub use router::{Routed, Router, SendOutcome};
pub use server::MessageServer;
