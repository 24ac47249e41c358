//! convsync - conversation persistence and sync
//!
//! This library keeps per-owner conversations consistent between a local
//! read cache and a store that cannot be trusted to enforce uniqueness.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `storage`: record types, the `ConversationStore` trait and its backends
//! - `sync`: freshness-bounded cache, resilient reader, conflict-aware writer
//!   and the `ConversationService` facade
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface definition and handlers
//!
//! # Example
//!
//! ```no_run
//! use convsync::storage::{MemoryStore, Message};
//! use convsync::sync::{CallerContext, ConversationService};
//! use convsync::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let service = ConversationService::new(Arc::new(MemoryStore::new()), &config);
//!     let ctx = CallerContext::new("player-1");
//!     let receipt = service
//!         .create(&ctx, "run-1", "First run", Some(Message::user("Where do I start?")))
//!         .await?;
//!     assert_eq!(receipt.version, 1);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConvsyncError, Result, StoreError, SyncError};
pub use storage::{ConversationRecord, ConversationStore};
pub use sync::{CallerContext, ConversationService};

#[cfg(test)]
pub mod test_utils;
