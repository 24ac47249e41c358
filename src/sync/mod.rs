//! Sync core: cache, reader, writer and the service facade
//!
//! Data flows store -> [`ResilientReader`] -> [`ConversationCache`] -> caller
//! on reads, and caller -> [`ConflictAwareWriter`] -> store, then cache, on
//! writes. Every operation takes an explicit [`CallerContext`].

pub mod cache;
pub mod checksum;
pub mod context;
pub mod metrics;
pub mod reader;
pub mod retry;
pub mod service;
pub mod validate;
pub mod writer;

pub use cache::{ConversationCache, RequestTicket};
pub use checksum::{compute_checksum, record_checksum, verify_checksum};
pub use context::CallerContext;
pub use reader::{ReadStrategy, ResilientReader, StrategyOutcome};
pub use retry::RetryPolicy;
pub use service::ConversationService;
pub use writer::{ConflictAwareWriter, WriteOptions, WriteReceipt};
