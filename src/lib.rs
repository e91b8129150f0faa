//! Parley - resilient chat backend core
//!
//! Parley forwards chat prompts to an AI backend and keeps the resulting
//! conversations in a session store that tolerates malformed input.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: canonical entities, the normalizer and the session store
//! - `resilience`: retry-with-backoff and circuit breaker policies
//! - `backend`: the streaming and direct adapters behind one trait
//! - `chat`: the send pipeline tying sessions and backends together
//! - `storage`: JSON document persistence
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`, `commands`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use parley::{ChatService, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let service = ChatService::from_config(&config)?;
//!     let session = service.create_session("").await;
//!     let outcome = service.send(&session.id, "hello", false).await?;
//!     println!("{:?}", outcome.reply);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod resilience;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use backend::{AdapterKind, BackendAdapter, BackendReply, BackendRequest, Backends};
pub use chat::{ChatService, SendOutcome};
pub use config::Config;
pub use error::{ParleyError, Result};
pub use resilience::{CircuitBreaker, CircuitState, ResiliencePolicy, RetryPolicy};
pub use session::{Message, Role, Session, SessionStore};
pub use storage::JsonFileStorage;

#[cfg(test)]
pub mod test_utils;
