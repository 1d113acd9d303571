use crate::schema::WarehouseType::{Bool, Int64, String as Text, Timestamp};
use crate::schema::{ColumnSchema, EntityDescriptor, WarehouseType};

fn id() -> ColumnSchema {
    ColumnSchema::required("id", Int64)
}

fn col(name: &str, warehouse_type: WarehouseType) -> ColumnSchema {
    ColumnSchema::nullable(name, warehouse_type)
}

fn updatable(name: &str, columns: Vec<ColumnSchema>) -> EntityDescriptor {
    EntityDescriptor::new(name, columns).with_primary_key(["id"])
}

/// Entities of the learning platform mirrored into the warehouse.
///
/// `chat_history` and `task_completions` are event logs and only ever appended to.
pub fn builtin_entities() -> Vec<EntityDescriptor> {
    vec![
        updatable(
            "org_api_keys",
            vec![id(), col("org_id", Int64), col("hashed_key", Text), col("created_at", Timestamp)],
        ),
        updatable(
            "courses",
            vec![id(), col("org_id", Int64), col("name", Text), col("created_at", Timestamp)],
        ),
        updatable(
            "milestones",
            vec![id(), col("org_id", Int64), col("name", Text), col("color", Text)],
        ),
        updatable(
            "course_tasks",
            vec![
                id(),
                col("task_id", Int64),
                col("course_id", Int64),
                col("ordering", Int64),
                col("created_at", Timestamp),
                col("milestone_id", Int64),
            ],
        ),
        updatable(
            "course_milestones",
            vec![
                id(),
                col("course_id", Int64),
                col("milestone_id", Int64),
                col("ordering", Int64),
                col("created_at", Timestamp),
            ],
        ),
        updatable(
            "organizations",
            vec![
                id(),
                col("slug", Text),
                col("name", Text),
                col("default_logo_color", Text),
                col("created_at", Timestamp),
            ],
        ),
        updatable(
            "scorecards",
            vec![
                id(),
                col("org_id", Int64),
                col("title", Text),
                col("criteria", Text),
                col("created_at", Timestamp),
                col("status", Text),
            ],
        ),
        updatable(
            "question_scorecards",
            vec![
                id(),
                col("question_id", Int64),
                col("scorecard_id", Int64),
                col("created_at", Timestamp),
            ],
        ),
        EntityDescriptor::new(
            "task_completions",
            vec![
                id(),
                col("user_id", Int64),
                col("task_id", Int64),
                col("question_id", Int64),
                col("created_at", Timestamp),
            ],
        ),
        EntityDescriptor::new(
            "chat_history",
            vec![
                id(),
                col("user_id", Int64),
                col("question_id", Int64),
                col("role", Text),
                col("content", Text),
                col("response_type", Text),
                col("created_at", Timestamp),
            ],
        ),
        updatable(
            "users",
            vec![
                id(),
                col("email", Text),
                col("first_name", Text),
                col("middle_name", Text),
                col("last_name", Text),
                col("default_dp_color", Text),
                col("created_at", Timestamp),
            ],
        ),
        updatable(
            "tasks",
            vec![
                id(),
                col("org_id", Int64),
                col("type", Text),
                col("blocks", Text),
                col("title", Text),
                col("status", Text),
                col("created_at", Timestamp),
                col("deleted_at", Timestamp),
                col("scheduled_publish_at", Timestamp),
            ],
        ),
        updatable(
            "questions",
            vec![
                id(),
                col("task_id", Int64),
                col("type", Text),
                col("blocks", Text),
                col("answer", Text),
                col("input_type", Text),
                col("coding_language", Text),
                col("generation_model", Text),
                col("response_type", Text),
                col("position", Int64),
                col("created_at", Timestamp),
                col("deleted_at", Timestamp),
                col("max_attempts", Int64),
                col("is_feedback_shown", Bool),
                col("context", Text),
                col("title", Text),
            ],
        ),
    ]
}
