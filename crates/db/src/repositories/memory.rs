use std::collections::HashMap;

use tokio::sync::RwLock;

use skillflow_core::domain::conversation::ConversationContext;

use super::{ContextStore, RepositoryError};

#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: RwLock<HashMap<String, ConversationContext>>,
}

impl InMemoryContextStore {
    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ContextStore for InMemoryContextStore {
    async fn find(&self, session_id: &str) -> Result<Option<ConversationContext>, RepositoryError> {
        let contexts = self.contexts.read().await;
        Ok(contexts.get(session_id).cloned())
    }

    async fn save(&self, context: &ConversationContext) -> Result<(), RepositoryError> {
        let mut contexts = self.contexts.write().await;
        contexts.insert(context.session_id.clone(), context.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, RepositoryError> {
        let mut contexts = self.contexts.write().await;
        Ok(contexts.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use skillflow_core::domain::conversation::ConversationContext;
    use skillflow_core::domain::event::Intent;
    use skillflow_core::domain::skill::{ParameterDefinition, SkillDefinition};

    use crate::repositories::{ContextStore, InMemoryContextStore};

    fn context(session_id: &str) -> ConversationContext {
        let skill = SkillDefinition::new("order_pizza")
            .with_required("size", ParameterDefinition::new().with_message(json!({ "text": "Size?" })));
        let mut context = ConversationContext::new(session_id, skill, Intent::new("order_pizza"));
        context.confirmed.insert("size".to_owned(), json!("large"));
        context
    }

    #[tokio::test]
    async fn in_memory_context_store_round_trip() {
        let store = InMemoryContextStore::default();
        let context = context("U1");

        store.save(&context).await.expect("save context");
        let found = store.find("U1").await.expect("find context");

        assert_eq!(found, Some(context));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_reports_whether_session_existed() {
        let store = InMemoryContextStore::default();
        store.save(&context("U1")).await.expect("save context");

        assert!(store.delete("U1").await.expect("delete existing"));
        assert!(!store.delete("U1").await.expect("delete missing"));
        assert!(store.is_empty().await);
    }
}
