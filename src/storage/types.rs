use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Auxiliary session state attached to a conversation (game id, progress markers)
pub type ConversationContext = Map<String, Value>;

/// Author of a message entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message typed by the player
    User,
    /// Reply produced by the assistant
    Assistant,
    /// Instruction or notice injected by the application
    System,
}

impl MessageRole {
    /// Lowercase wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// A single entry in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message
    pub role: MessageRole,
    /// Message text
    pub text: String,
    /// Attached image references (URLs or data URIs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// When the message was produced
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with the given role, stamped now
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            images: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    /// Attach an image reference
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }
}

/// Derived annotation attached to a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Insight identifier
    pub id: String,
    /// Free-form category (e.g. "strategy", "lore")
    pub kind: String,
    /// Insight body
    pub content: String,
    /// When the insight was derived
    pub created_at: DateTime<Utc>,
}

impl Insight {
    /// Create an insight with a random id, stamped now
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// The unit of persistence: one conversation owned by one principal
///
/// `id` is chosen by the client and is only unique per owner. When a record
/// is handed to the writer as a candidate, `version` carries the version
/// the caller last observed (0 for a new conversation); the writer assigns
/// the persisted version, checksum and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Client-chosen identifier, unique per owner
    pub id: String,
    /// Owning principal
    pub owner_id: String,
    /// Short display title
    pub title: String,
    /// Ordered message entries
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Ordered derived annotations
    #[serde(default)]
    pub insights: Vec<Insight>,
    /// Auxiliary session state
    #[serde(default)]
    pub context: ConversationContext,
    /// User-controlled priority flag
    #[serde(default)]
    pub is_pinned: bool,
    /// Persisted version, strictly increasing per key
    #[serde(default)]
    pub version: u64,
    /// Digest over messages, insights and context
    #[serde(default)]
    pub checksum: String,
    /// Authoritative ordering timestamp
    pub last_modified: DateTime<Utc>,
    /// Creation timestamp of the current lineage
    pub created_at: DateTime<Utc>,
    /// Tombstone; set when the conversation is logically deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ConversationRecord {
    /// Start a new, never-persisted conversation
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            messages: Vec::new(),
            insights: Vec::new(),
            context: ConversationContext::new(),
            is_pinned: false,
            version: 0,
            checksum: String::new(),
            last_modified: now,
            created_at: now,
            deleted_at: None,
        }
    }

    /// Whether the record carries a tombstone
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Summary row used by list views
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            is_pinned: self.is_pinned,
            version: self.version,
            message_count: self.messages.len(),
            last_modified: self.last_modified,
        }
    }
}

/// Metadata for a stored conversation, as shown in list views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id
    pub id: String,
    /// User-friendly title
    pub title: String,
    /// Whether the conversation is pinned
    pub is_pinned: bool,
    /// Current persisted version
    pub version: u64,
    /// Number of messages in the conversation
    pub message_count: usize,
    /// When the conversation was last written
    pub last_modified: DateTime<Utc>,
}
