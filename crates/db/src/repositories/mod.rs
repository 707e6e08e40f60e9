use async_trait::async_trait;
use thiserror::Error;

use skillflow_core::domain::conversation::ConversationContext;

pub mod context;
pub mod memory;

pub use context::SqlContextStore;
pub use memory::InMemoryContextStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

/// Persists conversation contexts keyed by session id.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn find(&self, session_id: &str) -> Result<Option<ConversationContext>, RepositoryError>;
    async fn save(&self, context: &ConversationContext) -> Result<(), RepositoryError>;
    /// Returns whether a context existed for `session_id`.
    async fn delete(&self, session_id: &str) -> Result<bool, RepositoryError>;
}
