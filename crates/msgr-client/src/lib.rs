//! msgr-client: Rust client library for the msgr messaging service.
//!
//! Drives the control channel (register, connect, send, ...), runs the push
//! listener that receives messages and acks, and normalizes outgoing text.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use msgr_client::{ClientConfig, ClientSession, MemorySink, MessengerClient};
//! use msgr_core::Identity;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ui = Arc::new(MemorySink::new());
//! let client = MessengerClient::new(ClientConfig::new("localhost:8888"), ui);
//! let mut session = ClientSession::new();
//!
//! client.register(&mut session, Identity::new("Alice", "alice", "02/02/2002")?).await?;
//! client.connect(&mut session).await?;
//! let id = client.send(&session, "bob", "hello   bob").await?;
//! println!("sent message {id}");
//! client.disconnect(&mut session).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod listener;
pub mod normalize;
pub mod session;
pub mod ui;

// Re-export primary public types.
pub use client::{ClientConfig, MessengerClient};
pub use error::{RequestError, RequestResult};
pub use listener::PushListener;
pub use normalize::{SoapNormalizer, TextNormalizer, WhitespaceNormalizer};
pub use session::ClientSession;
pub use ui::{MemorySink, UiSink};
