//! Task domain types: tasks, roles, subtask items, and the view models
//! the REST layer serves.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::error::{ApiError, ApiResult};
use crate::identity::UserPublic;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    InProgress,
    Review,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(TaskStatus::New),
            "in_progress" => Some(TaskStatus::InProgress),
            "review" => Some(TaskStatus::Review),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role a user holds on a task. Every task has exactly one assigner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Assigner,
    CoExecutor,
    Observer,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Assigner => "assigner",
            RoleKind::CoExecutor => "co_executor",
            RoleKind::Observer => "observer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assigner" => Some(RoleKind::Assigner),
            "co_executor" => Some(RoleKind::CoExecutor),
            "observer" => Some(RoleKind::Observer),
            _ => None,
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a subtask item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Todo,
    InProgress,
    Completed,
    Blocked,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Todo => "todo",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(ItemStatus::Todo),
            "in_progress" => Some(ItemStatus::InProgress),
            "completed" => Some(ItemStatus::Completed),
            "blocked" => Some(ItemStatus::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub description: String,
    /// JSON array of URLs, stored serialized.
    pub source_links: String,
    pub result_link: Option<String>,
    pub status: String,
    pub planned_start_date: Option<String>,
    pub actual_start_date: Option<String>,
    pub planned_end_date: Option<String>,
    pub actual_end_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    /// Deserialized `source_links`; a corrupt column reads as an empty list.
    pub fn source_links_json(&self) -> Value {
        serde_json::from_str(&self.source_links).unwrap_or_else(|_| Value::Array(Vec::new()))
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskRoleRow {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub role: String,
    pub assigned_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskItemRow {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub executor_id: Option<String>,
    pub status: String,
    pub planned_hours: f64,
    #[sqlx(rename = "ord")]
    pub order: i64,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// List/summary view of a task with derived stats.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub task: TaskRow,
    pub assigner: Option<UserPublic>,
    pub task_items_count: i64,
    pub completed_items_count: i64,
    pub progress_percentage: f64,
    pub total_planned_hours: f64,
    pub total_spent_hours: f64,
}

#[derive(Debug, Clone)]
pub struct RoleView {
    pub role: TaskRoleRow,
    pub user: Option<UserPublic>,
}

#[derive(Debug, Clone)]
pub struct ItemView {
    pub item: TaskItemRow,
    pub executor: Option<UserPublic>,
    pub spent_hours: f64,
}

/// Detail view: summary stats plus nested roles and items.
#[derive(Debug, Clone)]
pub struct TaskDetail {
    pub summary: TaskSummary,
    pub roles: Vec<RoleView>,
    pub items: Vec<ItemView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTaskItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub executor_id: Option<String>,
    #[serde(default)]
    pub planned_hours: f64,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_links: Vec<String>,
    #[serde(default)]
    pub result_link: Option<String>,
    #[serde(default)]
    pub planned_start_date: Option<String>,
    #[serde(default)]
    pub planned_end_date: Option<String>,
    #[serde(default)]
    pub co_executors: Vec<String>,
    #[serde(default)]
    pub observers: Vec<String>,
    #[serde(default)]
    pub task_items: Vec<NewTaskItem>,
}

/// Field updates parsed from a PATCH body. `None` means the field was
/// absent; `Some(None)` means it was explicitly set to null.
#[derive(Debug, Clone, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub source_links: Option<Vec<String>>,
    pub result_link: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub planned_start_date: Option<Option<String>>,
    pub actual_start_date: Option<Option<String>>,
    pub planned_end_date: Option<Option<String>>,
    pub actual_end_date: Option<Option<String>>,
}

impl TaskChanges {
    pub fn from_json(body: &Value) -> ApiResult<Self> {
        let map = body
            .as_object()
            .ok_or_else(|| ApiError::validation("request body must be a JSON object"))?;
        Ok(TaskChanges {
            title: required_string(map, "title")?,
            description: required_string(map, "description")?,
            source_links: string_list(map, "source_links")?,
            result_link: nullable_string(map, "result_link")?,
            status: status_field(map, "status", TaskStatus::parse)?,
            planned_start_date: nullable_string(map, "planned_start_date")?,
            actual_start_date: nullable_string(map, "actual_start_date")?,
            planned_end_date: nullable_string(map, "planned_end_date")?,
            actual_end_date: nullable_string(map, "actual_end_date")?,
        })
    }
}

/// Field updates for a task item, with the same absent/null distinction
/// as [`TaskChanges`].
#[derive(Debug, Clone, Default)]
pub struct ItemChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub executor_id: Option<Option<String>>,
    pub status: Option<ItemStatus>,
    pub planned_hours: Option<f64>,
    pub order: Option<i64>,
}

impl ItemChanges {
    pub fn from_json(body: &Value) -> ApiResult<Self> {
        let map = body
            .as_object()
            .ok_or_else(|| ApiError::validation("request body must be a JSON object"))?;
        let planned_hours = match map.get("planned_hours") {
            None => None,
            Some(v) => Some(
                v.as_f64()
                    .ok_or_else(|| ApiError::validation("planned_hours must be a number"))?,
            ),
        };
        let order = match map.get("order") {
            None => None,
            Some(v) => Some(
                v.as_i64()
                    .ok_or_else(|| ApiError::validation("order must be an integer"))?,
            ),
        };
        Ok(ItemChanges {
            title: required_string(map, "title")?,
            description: required_string(map, "description")?,
            executor_id: nullable_string(map, "executor_id")?,
            status: status_field(map, "status", ItemStatus::parse)?,
            planned_hours,
            order,
        })
    }
}

/// Keys present in a PATCH body, used for field-level permission checks.
pub fn body_fields(body: &Value) -> Vec<String> {
    body.as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

fn required_string(
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> ApiResult<Option<String>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ApiError::validation(format!("{key} must be a string"))),
    }
}

fn nullable_string(
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> ApiResult<Option<Option<String>>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => Ok(Some(Some(s.clone()))),
        Some(_) => Err(ApiError::validation(format!(
            "{key} must be a string or null"
        ))),
    }
}

fn string_list(
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> ApiResult<Option<Vec<String>>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    _ => {
                        return Err(ApiError::validation(format!(
                            "{key} must be a list of strings"
                        )))
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(ApiError::validation(format!(
            "{key} must be a list of strings"
        ))),
    }
}

fn status_field<T>(
    map: &serde_json::Map<String, Value>,
    key: &str,
    parse: fn(&str) -> Option<T>,
) -> ApiResult<Option<T>> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => {
            parse(s).map(Some).ok_or_else(|| {
                ApiError::validation(format!("invalid {key}: {s}"))
            })
        }
        Some(_) => Err(ApiError::validation(format!("{key} must be a string"))),
    }
}

/// Rounds to two decimal places, the precision all derived hour and
/// percentage figures are reported with.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Share of completed items, as a percentage. Zero items means zero
/// progress.
pub fn progress_percentage(completed: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(completed as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statuses_round_trip_through_strings() {
        for status in [
            TaskStatus::New,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        for status in [
            ItemStatus::Todo,
            ItemStatus::InProgress,
            ItemStatus::Completed,
            ItemStatus::Blocked,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        for role in [RoleKind::Assigner, RoleKind::CoExecutor, RoleKind::Observer] {
            assert_eq!(RoleKind::parse(role.as_str()), Some(role));
        }
        assert_eq!(TaskStatus::parse("archived"), None);
    }

    #[test]
    fn progress_is_rounded_to_two_places() {
        assert_eq!(progress_percentage(0, 0), 0.0);
        assert_eq!(progress_percentage(0, 4), 0.0);
        assert_eq!(progress_percentage(2, 3), 66.67);
        assert_eq!(progress_percentage(1, 3), 33.33);
        assert_eq!(progress_percentage(3, 3), 100.0);
        assert_eq!(round2(1.005), 1.0);
        assert_eq!(round2(2.675), 2.68);
    }

    #[test]
    fn task_changes_distinguish_null_from_absent() {
        let changes = TaskChanges::from_json(&json!({
            "title": "renamed",
            "result_link": null,
        }))
        .unwrap();
        assert_eq!(changes.title.as_deref(), Some("renamed"));
        assert_eq!(changes.result_link, Some(None));
        assert_eq!(changes.description, None);
        assert_eq!(changes.planned_end_date, None);
    }

    #[test]
    fn task_changes_reject_unknown_status() {
        let err = TaskChanges::from_json(&json!({"status": "archived"})).unwrap_err();
        assert!(err.to_string().contains("invalid status"));
    }

    #[test]
    fn item_changes_reject_wrong_types() {
        assert!(ItemChanges::from_json(&json!({"planned_hours": "two"})).is_err());
        assert!(ItemChanges::from_json(&json!({"title": 7})).is_err());
        assert!(ItemChanges::from_json(&json!([1, 2])).is_err());
        let changes = ItemChanges::from_json(&json!({"executor_id": null})).unwrap();
        assert_eq!(changes.executor_id, Some(None));
    }

    #[test]
    fn body_fields_lists_patch_keys() {
        let fields = body_fields(&json!({"status": "completed", "title": "x"}));
        assert_eq!(fields.len(), 2);
        assert!(fields.iter().any(|f| f == "status"));
        assert!(body_fields(&json!("not an object")).is_empty());
    }

    #[test]
    fn create_request_defaults_optional_fields() {
        let req: CreateTaskRequest =
            serde_json::from_value(json!({"title": "Ship it"})).unwrap();
        assert_eq!(req.title, "Ship it");
        assert!(req.description.is_empty());
        assert!(req.source_links.is_empty());
        assert!(req.co_executors.is_empty());
        assert!(req.task_items.is_empty());
    }
}
