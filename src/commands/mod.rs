//! Command handlers for the CLI
//!
//! Handlers open the configured store, build a
//! [`crate::sync::ConversationService`] for the calling owner and render
//! results to the terminal.

pub mod conversations;
