pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_config, connect_with_settings, DbPool};
pub use repositories::{ContextStore, InMemoryContextStore, RepositoryError, SqlContextStore};
