use skillflow_db::migrations;
use tracing::info;

use crate::commands::{with_pool, CommandResult};

pub fn run() -> CommandResult {
    let applied = with_pool("migrate", |pool| async move {
        migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))
    });

    match applied {
        Ok(()) => {
            info!(event_name = "cli.migrate.completed", "migrations applied");
            CommandResult::success("migrate", "applied pending migrations")
        }
        Err(result) => result,
    }
}
