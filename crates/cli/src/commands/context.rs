use serde_json::json;
use skillflow_db::{ContextStore, SqlContextStore};

use crate::commands::{with_pool, CommandResult};

pub fn show(session_id: &str) -> CommandResult {
    let found = with_pool("context show", |pool| async move {
        let store = SqlContextStore::new(pool);
        store.find(session_id).await.map_err(|error| ("context_store", error.to_string(), 5u8))
    });

    match found {
        Ok(Some(context)) => {
            let data = match serde_json::to_value(&context) {
                Ok(data) => data,
                Err(error) => {
                    return CommandResult::failure("context show", "serialization", error.to_string(), 5)
                }
            };
            CommandResult::success_with_data(
                "context show",
                format!(
                    "session `{session_id}` is in skill `{}` ({} confirmed, {} queued)",
                    context.skill.name,
                    context.confirmed.len(),
                    context.to_confirm.len()
                ),
                data,
            )
        }
        Ok(None) => CommandResult::failure(
            "context show",
            "not_found",
            format!("no context stored for session `{session_id}`"),
            6,
        ),
        Err(result) => result,
    }
}

pub fn list(limit: u32) -> CommandResult {
    let sessions = with_pool("context list", |pool| async move {
        let store = SqlContextStore::new(pool);
        store.list_sessions(limit).await.map_err(|error| ("context_store", error.to_string(), 5u8))
    });

    match sessions {
        Ok(sessions) => CommandResult::success_with_data(
            "context list",
            format!("{} session(s)", sessions.len()),
            json!({ "sessions": sessions }),
        ),
        Err(result) => result,
    }
}
