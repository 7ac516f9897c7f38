//! Work-hour logging against tasks and task items.
//!
//! Every log belongs to the user who wrote it. Non-staff callers only
//! ever see their own logs; aggregation over logs lives in the task
//! store. The whole feature sits behind the `[time_tracking]` config
//! switch: disabled, writes are rejected and reads come back empty.

use anyhow::anyhow;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::identity::UserRow;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimeLogRow {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub task_item_id: Option<String>,
    #[sqlx(rename = "work_date")]
    pub date: String,
    pub hours: f64,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTimeLogRequest {
    pub task_id: String,
    #[serde(default)]
    pub task_item_id: Option<String>,
    pub date: String,
    pub hours: f64,
    #[serde(default)]
    pub description: String,
}

/// Partial update parsed from a PATCH body. `None` means the field was
/// absent; for `task_item_id`, `Some(None)` detaches the log from its
/// item.
#[derive(Debug, Clone, Default)]
pub struct TimeLogChanges {
    pub date: Option<String>,
    pub hours: Option<f64>,
    pub description: Option<String>,
    pub task_item_id: Option<Option<String>>,
}

impl TimeLogChanges {
    pub fn from_json(body: &Value) -> ApiResult<Self> {
        let map = body
            .as_object()
            .ok_or_else(|| ApiError::validation("request body must be a JSON object"))?;
        let date = match map.get("date") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ApiError::validation("date must be a string")),
        };
        let hours = match map.get("hours") {
            None => None,
            Some(v) => Some(
                v.as_f64()
                    .ok_or_else(|| ApiError::validation("hours must be a number"))?,
            ),
        };
        let description = match map.get("description") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(ApiError::validation("description must be a string")),
        };
        let task_item_id = match map.get("task_item_id") {
            None => None,
            Some(Value::Null) => Some(None),
            Some(Value::String(s)) => Some(Some(s.clone())),
            Some(_) => {
                return Err(ApiError::validation("task_item_id must be a string or null"))
            }
        };
        Ok(TimeLogChanges {
            date,
            hours,
            description,
            task_item_id,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeLogListParams {
    pub task: Option<String>,
    pub task_item: Option<String>,
    pub user: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Clone)]
pub struct TimeLogStore {
    pool: SqlitePool,
    enabled: bool,
}

impl TimeLogStore {
    pub fn new(pool: SqlitePool, enabled: bool) -> Self {
        Self { pool, enabled }
    }

    /// Records hours worked by `user`. The referenced item, when given,
    /// must belong to the referenced task.
    pub async fn create(&self, user: &UserRow, req: &CreateTimeLogRequest) -> ApiResult<TimeLogRow> {
        self.ensure_enabled()?;
        validate_hours(req.hours)?;
        validate_date(&req.date)?;
        if let Some(item_id) = &req.task_item_id {
            self.ensure_item_in_task(item_id, &req.task_id).await?;
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO time_logs (id, user_id, task_id, task_item_id, work_date, hours,
                                    description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&user.id)
        .bind(&req.task_id)
        .bind(&req.task_item_id)
        .bind(&req.date)
        .bind(req.hours)
        .bind(&req.description)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            if is_foreign_key_violation(&err) {
                return Err(ApiError::validation("unknown task id"));
            }
            return Err(err.into());
        }

        sqlx::query_as::<_, TimeLogRow>("SELECT * FROM time_logs WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::Internal(anyhow!("time log {id} not found after insert")))
    }

    /// The viewer's log by id. Staff can read anyone's; everyone else
    /// gets `NotFound` for logs that are not theirs.
    pub async fn get_visible(&self, viewer: &UserRow, id: &str) -> ApiResult<TimeLogRow> {
        if !self.enabled {
            return Err(ApiError::NotFound);
        }
        let row = sqlx::query_as::<_, TimeLogRow>("SELECT * FROM time_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ApiError::NotFound)?;
        if row.user_id != viewer.id && !viewer.is_staff {
            return Err(ApiError::NotFound);
        }
        Ok(row)
    }

    /// Logs visible to the viewer, newest work first. Disabled time
    /// tracking reads as no logs at all.
    pub async fn list(
        &self,
        viewer: &UserRow,
        params: &TimeLogListParams,
    ) -> ApiResult<Vec<TimeLogRow>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let mut rows: Vec<TimeLogRow> = if viewer.is_staff {
            sqlx::query_as("SELECT * FROM time_logs ORDER BY work_date DESC, created_at DESC")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM time_logs WHERE user_id = ?
                 ORDER BY work_date DESC, created_at DESC",
            )
            .bind(&viewer.id)
            .fetch_all(&self.pool)
            .await?
        };

        if let Some(task_id) = &params.task {
            rows.retain(|l| &l.task_id == task_id);
        }
        if let Some(item_id) = &params.task_item {
            rows.retain(|l| l.task_item_id.as_deref() == Some(item_id.as_str()));
        }
        if let Some(user_id) = &params.user {
            rows.retain(|l| &l.user_id == user_id);
        }
        if let Some(from) = &params.date_from {
            rows.retain(|l| l.date.as_str() >= from.as_str());
        }
        if let Some(to) = &params.date_to {
            rows.retain(|l| l.date.as_str() <= to.as_str());
        }

        let offset = params.offset.unwrap_or(0) as usize;
        let limit = params.limit.unwrap_or(200).min(500) as usize;
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    pub async fn update(
        &self,
        viewer: &UserRow,
        id: &str,
        changes: &TimeLogChanges,
    ) -> ApiResult<TimeLogRow> {
        let existing = self.get_visible(viewer, id).await?;
        if let Some(hours) = changes.hours {
            validate_hours(hours)?;
        }
        if let Some(date) = &changes.date {
            validate_date(date)?;
        }
        if let Some(Some(item_id)) = &changes.task_item_id {
            self.ensure_item_in_task(item_id, &existing.task_id).await?;
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE time_logs SET
                work_date = COALESCE(?, work_date),
                hours = COALESCE(?, hours),
                description = COALESCE(?, description),
                task_item_id = CASE WHEN ? THEN ? ELSE task_item_id END,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(&changes.date)
        .bind(changes.hours)
        .bind(&changes.description)
        .bind(changes.task_item_id.is_some())
        .bind(changes.task_item_id.clone().flatten())
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }

        self.get_visible(viewer, id).await
    }

    pub async fn delete(&self, viewer: &UserRow, id: &str) -> ApiResult<()> {
        let existing = self.get_visible(viewer, id).await?;
        sqlx::query("DELETE FROM time_logs WHERE id = ?")
            .bind(&existing.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn ensure_enabled(&self) -> ApiResult<()> {
        if !self.enabled {
            return Err(ApiError::validation("time tracking is disabled"));
        }
        Ok(())
    }

    async fn ensure_item_in_task(&self, item_id: &str, task_id: &str) -> ApiResult<()> {
        let parent: Option<(String,)> =
            sqlx::query_as("SELECT task_id FROM task_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
        match parent {
            None => Err(ApiError::validation("unknown task item id")),
            Some((parent_id,)) if parent_id != task_id => Err(ApiError::validation(
                "task item does not belong to the task",
            )),
            Some(_) => Ok(()),
        }
    }
}

fn validate_hours(hours: f64) -> ApiResult<()> {
    if !(hours > 0.0) {
        return Err(ApiError::validation("hours must be greater than 0"));
    }
    Ok(())
}

fn validate_date(date: &str) -> ApiResult<()> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date must be in YYYY-MM-DD format"))?;
    Ok(())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("FOREIGN KEY constraint failed"))
}
