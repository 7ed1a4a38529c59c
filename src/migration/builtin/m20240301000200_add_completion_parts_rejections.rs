//! Keeps the parts a completion could not consume next to the completion,
//! so a replayed finalize can report them again.

use crate::executor::StoreError;
use crate::migration::{Migration, SchemaManager};

pub struct AddCompletionPartsRejections;

impl Migration for AddCompletionPartsRejections {
    fn name(&self) -> &str {
        "add_completion_parts_rejections"
    }

    fn version(&self) -> i64 {
        20240301000200
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.execute(
            r#"
            ALTER TABLE schedule_completions
                ADD COLUMN IF NOT EXISTS parts_rejections JSONB NOT NULL DEFAULT '{}'::jsonb
            "#,
        )
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), StoreError> {
        manager.drop_column("schedule_completions", "parts_rejections")
    }
}
