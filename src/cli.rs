//! Command-line interface definition for convsync
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to list, inspect and edit an owner's conversations.

use crate::storage::MessageRole;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// convsync - conversation persistence and sync
///
/// Reads and writes conversations in a local store using versioned,
/// conflict-checked writes.
#[derive(Parser, Debug, Clone)]
#[command(name = "convsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the SQLite database path
    #[arg(long, env = "CONVSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Owner whose conversations are read and written
    #[arg(short, long, env = "CONVSYNC_OWNER")]
    pub owner: String,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for convsync
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List live conversations, pinned first
    List,

    /// Show a conversation and its messages
    Show {
        /// Conversation id
        id: String,
    },

    /// Create a new conversation
    Create {
        /// Conversation id
        id: String,

        /// Conversation title
        #[arg(short, long)]
        title: String,

        /// Optional first user message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Append a message to a conversation
    Send {
        /// Conversation id
        id: String,

        /// Message text
        #[arg(short, long)]
        message: String,

        /// Message role (user, assistant, system)
        #[arg(short, long, default_value = "user")]
        role: MessageRole,
    },

    /// Pin or unpin a conversation
    Pin {
        /// Conversation id
        id: String,

        /// Unpin instead of pin
        #[arg(long)]
        off: bool,
    },

    /// Change a conversation's title
    Rename {
        /// Conversation id
        id: String,

        /// New title
        #[arg(short, long)]
        title: String,
    },

    /// Soft-delete a conversation
    Delete {
        /// Conversation id
        id: String,
    },

    /// Save a full conversation record from a JSON file
    Import {
        /// Path to the JSON record
        file: PathBuf,

        /// Overwrite even if the stored version is newer
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
