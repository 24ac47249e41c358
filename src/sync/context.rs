//! Explicit caller identity and capabilities
//!
//! Every core operation receives a [`CallerContext`] instead of consulting
//! ambient state. The owner id scopes all reads and writes; capability
//! flags gate operations that would otherwise be unconditionally allowed.

use crate::error::{SyncError, SyncResult};

/// Authenticated principal plus what it may do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    owner_id: String,
    can_write: bool,
    can_force_overwrite: bool,
}

impl CallerContext {
    /// Context for a regular owner: may write, may not force overwrites
    ///
    /// # Examples
    ///
    /// ```
    /// use convsync::sync::CallerContext;
    ///
    /// let ctx = CallerContext::new("player-42");
    /// assert_eq!(ctx.owner_id(), "player-42");
    /// assert!(ctx.can_write());
    /// assert!(!ctx.can_force_overwrite());
    /// ```
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            can_write: true,
            can_force_overwrite: false,
        }
    }

    /// Context that may only read
    pub fn read_only(owner_id: impl Into<String>) -> Self {
        Self {
            can_write: false,
            ..Self::new(owner_id)
        }
    }

    /// Grant or revoke the force-overwrite capability
    pub fn with_force_overwrite(mut self, allowed: bool) -> Self {
        self.can_force_overwrite = allowed;
        self
    }

    /// Owner every operation is scoped to
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Whether writes are permitted
    pub fn can_write(&self) -> bool {
        self.can_write
    }

    /// Whether `force_overwrite` writes are permitted
    pub fn can_force_overwrite(&self) -> bool {
        self.can_force_overwrite
    }

    /// Reject contexts without a usable owner id
    pub(crate) fn ensure_owner(&self) -> SyncResult<()> {
        if self.owner_id.trim().is_empty() {
            return Err(SyncError::InvalidInput(
                "caller owner id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
