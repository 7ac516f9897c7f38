//! SQLite-backed task store: tasks, roles, subtask items, and the
//! derived views served over REST.

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::identity::{UserPublic, UserRow};

use super::model::{
    progress_percentage, round2, CreateTaskRequest, ItemChanges, ItemStatus, ItemView,
    NewTaskItem, RoleKind, RoleView, TaskChanges, TaskDetail, TaskItemRow, TaskRoleRow, TaskRow,
    TaskStatus, TaskSummary,
};
use super::policy::{ItemAccess, TaskAccess};

/// Filters for task listing. Dates are `YYYY-MM-DD` strings; `created_*`
/// bounds compare against the date part of `created_at`, inclusive.
#[derive(Debug, Clone, Default)]
pub struct TaskListParams {
    pub status: Option<TaskStatus>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub planned_end_after: Option<String>,
    pub planned_end_before: Option<String>,
    pub assigner: Option<String>,
    pub executor: Option<String>,
    /// When true, keeps only tasks past their planned end date and not
    /// yet completed or cancelled. False is a no-op, not an inversion.
    pub is_overdue: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ItemListParams {
    pub task: Option<String>,
    pub executor: Option<String>,
    pub status: Option<ItemStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
    time_tracking: bool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool, time_tracking: bool) -> Self {
        Self {
            pool,
            time_tracking,
        }
    }

    // ── Access resolution ──

    /// True when the user holds any role on the task or executes one of
    /// its items.
    pub async fn is_participant(&self, task_id: &str, user_id: &str) -> ApiResult<bool> {
        let (found,): (i64,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM task_roles WHERE task_id = ? AND user_id = ?
                 UNION
                 SELECT 1 FROM task_items WHERE task_id = ? AND executor_id = ?
             )",
        )
        .bind(task_id)
        .bind(user_id)
        .bind(task_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    pub async fn holds_role(
        &self,
        task_id: &str,
        user_id: &str,
        role: RoleKind,
    ) -> ApiResult<bool> {
        let (found,): (i64,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM task_roles WHERE task_id = ? AND user_id = ? AND role = ?
             )",
        )
        .bind(task_id)
        .bind(user_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    pub async fn task_access(&self, user: &UserRow, task_id: &str) -> ApiResult<TaskAccess> {
        if user.is_staff {
            return Ok(TaskAccess::Staff);
        }
        if self.holds_role(task_id, &user.id, RoleKind::Assigner).await? {
            return Ok(TaskAccess::Assigner);
        }
        if self.is_participant(task_id, &user.id).await? {
            return Ok(TaskAccess::Participant);
        }
        Ok(TaskAccess::Invisible)
    }

    pub async fn item_access(&self, user: &UserRow, item: &TaskItemRow) -> ApiResult<ItemAccess> {
        if user.is_staff {
            return Ok(ItemAccess::Staff);
        }
        if self
            .holds_role(&item.task_id, &user.id, RoleKind::Assigner)
            .await?
        {
            return Ok(ItemAccess::Assigner);
        }
        if item.executor_id.as_deref() == Some(user.id.as_str()) {
            return Ok(ItemAccess::Executor);
        }
        if self.is_participant(&item.task_id, &user.id).await? {
            return Ok(ItemAccess::Participant);
        }
        Ok(ItemAccess::Invisible)
    }

    // ── Tasks ──

    /// Creates a task with its roles and initial items in one transaction.
    /// The creator becomes the assigner. Any bad reference (unknown user,
    /// duplicate role) aborts the whole batch.
    pub async fn create_task(
        &self,
        assigner: &UserRow,
        req: &CreateTaskRequest,
    ) -> ApiResult<TaskRow> {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(ApiError::validation("title must not be empty"));
        }
        let source_links = serde_json::to_string(&req.source_links)
            .map_err(|e| ApiError::Internal(e.into()))?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO tasks (id, title, description, source_links, result_link, status,
                                planned_start_date, planned_end_date, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'new', ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(title)
        .bind(&req.description)
        .bind(&source_links)
        .bind(&req.result_link)
        .bind(&req.planned_start_date)
        .bind(&req.planned_end_date)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        insert_role(&mut tx, &id, &assigner.id, RoleKind::Assigner).await?;
        for user_id in &req.co_executors {
            insert_role(&mut tx, &id, user_id, RoleKind::CoExecutor).await?;
        }
        for user_id in &req.observers {
            insert_role(&mut tx, &id, user_id, RoleKind::Observer).await?;
        }
        for (position, item) in req.task_items.iter().enumerate() {
            insert_item(&mut tx, &id, item, position as i64).await?;
        }
        tx.commit().await?;

        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::Internal(anyhow!("task {id} not found after insert")))
    }

    pub async fn get_task(&self, task_id: &str) -> ApiResult<TaskRow> {
        sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ApiError::NotFound)
    }

    /// Applies a partial update. Setting status to `completed` is gated on
    /// every item being completed; the count check runs in the same
    /// transaction as the write.
    pub async fn update_task(&self, task_id: &str, changes: &TaskChanges) -> ApiResult<TaskRow> {
        let source_links = match &changes.source_links {
            Some(links) => {
                Some(serde_json::to_string(links).map_err(|e| ApiError::Internal(e.into()))?)
            }
            None => None,
        };
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        if changes.status == Some(TaskStatus::Completed) {
            let (open,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM task_items WHERE task_id = ? AND status != 'completed'",
            )
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;
            if open > 0 {
                return Err(ApiError::validation(format!(
                    "cannot complete task: {open} item(s) are not completed"
                )));
            }
        }
        let result = sqlx::query(
            "UPDATE tasks SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                source_links = COALESCE(?, source_links),
                status = COALESCE(?, status),
                result_link = CASE WHEN ? THEN ? ELSE result_link END,
                planned_start_date = CASE WHEN ? THEN ? ELSE planned_start_date END,
                actual_start_date = CASE WHEN ? THEN ? ELSE actual_start_date END,
                planned_end_date = CASE WHEN ? THEN ? ELSE planned_end_date END,
                actual_end_date = CASE WHEN ? THEN ? ELSE actual_end_date END,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(&source_links)
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.result_link.is_some())
        .bind(changes.result_link.clone().flatten())
        .bind(changes.planned_start_date.is_some())
        .bind(changes.planned_start_date.clone().flatten())
        .bind(changes.actual_start_date.is_some())
        .bind(changes.actual_start_date.clone().flatten())
        .bind(changes.planned_end_date.is_some())
        .bind(changes.planned_end_date.clone().flatten())
        .bind(changes.actual_end_date.is_some())
        .bind(changes.actual_end_date.clone().flatten())
        .bind(&now)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }
        tx.commit().await?;

        self.get_task(task_id).await
    }

    /// Deletes a task; roles, items, and time logs go with it.
    pub async fn delete_task(&self, task_id: &str) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    // ── Roles ──

    pub async fn add_role(
        &self,
        task_id: &str,
        user_id: &str,
        role: RoleKind,
    ) -> ApiResult<TaskRoleRow> {
        let mut tx = self.pool.begin().await?;
        let id = insert_role(&mut tx, task_id, user_id, role).await?;
        tx.commit().await?;

        sqlx::query_as::<_, TaskRoleRow>("SELECT * FROM task_roles WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::Internal(anyhow!("role {id} not found after insert")))
    }

    pub async fn get_role(&self, task_id: &str, role_id: &str) -> ApiResult<TaskRoleRow> {
        sqlx::query_as::<_, TaskRoleRow>(
            "SELECT * FROM task_roles WHERE id = ? AND task_id = ?",
        )
        .bind(role_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ApiError::NotFound)
    }

    /// Removes a co-executor or observer role. The assigner role is
    /// permanent for the lifetime of the task.
    pub async fn remove_role(&self, task_id: &str, role_id: &str) -> ApiResult<()> {
        let role = self.get_role(task_id, role_id).await?;
        if role.role == RoleKind::Assigner.as_str() {
            return Err(ApiError::validation("the assigner role cannot be removed"));
        }
        sqlx::query("DELETE FROM task_roles WHERE id = ?")
            .bind(&role.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Items ──

    /// Adds an item to an existing task. Without an explicit order it
    /// goes after the task's current last item.
    pub async fn add_item(&self, task_id: &str, item: &NewTaskItem) -> ApiResult<TaskItemRow> {
        self.get_task(task_id).await?;
        let mut tx = self.pool.begin().await?;
        let (next_order,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(ord) + 1, 0) FROM task_items WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
        let id = insert_item(&mut tx, task_id, item, next_order).await?;
        tx.commit().await?;

        sqlx::query_as::<_, TaskItemRow>("SELECT * FROM task_items WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::Internal(anyhow!("task item {id} not found after insert")))
    }

    pub async fn get_item(&self, item_id: &str) -> ApiResult<TaskItemRow> {
        sqlx::query_as::<_, TaskItemRow>("SELECT * FROM task_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ApiError::NotFound)
    }

    /// Applies a partial update to an item. `completed_at` tracks the
    /// status: stamped when the item first reaches `completed`, kept
    /// while it stays there, cleared when it leaves.
    pub async fn update_item(&self, item_id: &str, changes: &ItemChanges) -> ApiResult<TaskItemRow> {
        if let Some(hours) = changes.planned_hours {
            if hours < 0.0 {
                return Err(ApiError::validation("planned_hours must not be negative"));
            }
        }
        if let Some(title) = &changes.title {
            if title.trim().is_empty() {
                return Err(ApiError::validation("title must not be empty"));
            }
        }
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE task_items SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                status = COALESCE(?, status),
                planned_hours = COALESCE(?, planned_hours),
                ord = COALESCE(?, ord),
                executor_id = CASE WHEN ? THEN ? ELSE executor_id END,
                completed_at = CASE WHEN COALESCE(?, status) = 'completed'
                                    THEN COALESCE(completed_at, ?)
                                    ELSE NULL END,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(changes.status.map(|s| s.as_str()))
        .bind(changes.planned_hours)
        .bind(changes.order)
        .bind(changes.executor_id.is_some())
        .bind(changes.executor_id.clone().flatten())
        .bind(changes.status.map(|s| s.as_str()))
        .bind(&now)
        .bind(&now)
        .bind(item_id)
        .execute(&self.pool)
        .await;
        let result = match result {
            Ok(r) => r,
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(ApiError::validation("unknown executor id"));
            }
            Err(err) => return Err(err.into()),
        };
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }
        self.get_item(item_id).await
    }

    pub async fn delete_item(&self, item_id: &str) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM task_items WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    // ── Listing ──

    /// Tasks visible to the viewer, filtered and paginated. Staff see
    /// every task; everyone else sees tasks they participate in.
    pub async fn list_tasks(
        &self,
        viewer: &UserRow,
        params: &TaskListParams,
    ) -> ApiResult<Vec<TaskSummary>> {
        let mut rows: Vec<TaskRow> = if viewer.is_staff {
            sqlx::query_as("SELECT * FROM tasks ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as(
                "SELECT DISTINCT t.* FROM tasks t
                 LEFT JOIN task_roles r ON r.task_id = t.id AND r.user_id = ?
                 LEFT JOIN task_items i ON i.task_id = t.id AND i.executor_id = ?
                 WHERE r.id IS NOT NULL OR i.id IS NOT NULL
                 ORDER BY t.created_at DESC",
            )
            .bind(&viewer.id)
            .bind(&viewer.id)
            .fetch_all(&self.pool)
            .await?
        };

        if let Some(status) = params.status {
            rows.retain(|t| t.status == status.as_str());
        }
        if let Some(after) = &params.created_after {
            rows.retain(|t| date_part(&t.created_at) >= after.as_str());
        }
        if let Some(before) = &params.created_before {
            rows.retain(|t| date_part(&t.created_at) <= before.as_str());
        }
        if let Some(after) = &params.planned_end_after {
            rows.retain(|t| t.planned_end_date.as_deref().is_some_and(|d| d >= after.as_str()));
        }
        if let Some(before) = &params.planned_end_before {
            rows.retain(|t| t.planned_end_date.as_deref().is_some_and(|d| d <= before.as_str()));
        }
        if params.is_overdue {
            let today = Utc::now().format("%Y-%m-%d").to_string();
            rows.retain(|t| {
                t.status != "completed"
                    && t.status != "cancelled"
                    && t.planned_end_date.as_deref().is_some_and(|d| d < today.as_str())
            });
        }
        if let Some(assigner_id) = &params.assigner {
            let ids = self
                .task_ids_with_role(assigner_id, RoleKind::Assigner)
                .await?;
            rows.retain(|t| ids.contains(&t.id));
        }
        if let Some(executor_id) = &params.executor {
            let ids = self.task_ids_with_executor(executor_id).await?;
            rows.retain(|t| ids.contains(&t.id));
        }

        let offset = params.offset.unwrap_or(0) as usize;
        let limit = params.limit.unwrap_or(200).min(500) as usize;
        let page: Vec<TaskRow> = rows.into_iter().skip(offset).take(limit).collect();

        let mut out = Vec::with_capacity(page.len());
        for row in page {
            out.push(self.summary(row).await?);
        }
        Ok(out)
    }

    /// Items visible to the viewer, filtered and paginated. Staff see
    /// every item; everyone else sees items of tasks they participate in
    /// plus items they execute.
    pub async fn list_items(
        &self,
        viewer: &UserRow,
        params: &ItemListParams,
    ) -> ApiResult<Vec<ItemView>> {
        let mut rows: Vec<TaskItemRow> = if viewer.is_staff {
            sqlx::query_as("SELECT * FROM task_items ORDER BY ord, created_at")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as(
                "SELECT DISTINCT i.* FROM task_items i
                 LEFT JOIN task_roles r ON r.task_id = i.task_id AND r.user_id = ?
                 WHERE r.id IS NOT NULL OR i.executor_id = ?
                 ORDER BY i.ord, i.created_at",
            )
            .bind(&viewer.id)
            .bind(&viewer.id)
            .fetch_all(&self.pool)
            .await?
        };

        if let Some(task_id) = &params.task {
            rows.retain(|i| &i.task_id == task_id);
        }
        if let Some(executor_id) = &params.executor {
            rows.retain(|i| i.executor_id.as_deref() == Some(executor_id.as_str()));
        }
        if let Some(status) = params.status {
            rows.retain(|i| i.status == status.as_str());
        }

        let offset = params.offset.unwrap_or(0) as usize;
        let limit = params.limit.unwrap_or(200).min(500) as usize;
        let page: Vec<TaskItemRow> = rows.into_iter().skip(offset).take(limit).collect();
        self.item_views(page).await
    }

    /// Tasks where the user participates in any capacity.
    pub async fn my_tasks(&self, user_id: &str) -> ApiResult<Vec<TaskSummary>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT DISTINCT t.* FROM tasks t
             LEFT JOIN task_roles r ON r.task_id = t.id AND r.user_id = ?
             LEFT JOIN task_items i ON i.task_id = t.id AND i.executor_id = ?
             WHERE r.id IS NOT NULL OR i.id IS NOT NULL
             ORDER BY t.created_at DESC",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.summary(row).await?);
        }
        Ok(out)
    }

    /// Items the user executes.
    pub async fn my_items(&self, user_id: &str) -> ApiResult<Vec<ItemView>> {
        let rows: Vec<TaskItemRow> = sqlx::query_as(
            "SELECT * FROM task_items WHERE executor_id = ? ORDER BY ord, created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.item_views(rows).await
    }

    /// Tasks where the user holds the assigner role.
    pub async fn assigned_by_me(&self, user_id: &str) -> ApiResult<Vec<TaskSummary>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT t.* FROM tasks t
             JOIN task_roles r ON r.task_id = t.id
             WHERE r.user_id = ? AND r.role = 'assigner'
             ORDER BY t.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.summary(row).await?);
        }
        Ok(out)
    }

    // ── Derived views ──

    pub async fn summary(&self, task: TaskRow) -> ApiResult<TaskSummary> {
        let (total, completed, planned) = self.item_aggregates(&task.id).await?;
        let spent = self.spent_hours_for_task(&task.id).await?;
        let assigner = self.assigner_of(&task.id).await?;
        Ok(TaskSummary {
            progress_percentage: progress_percentage(completed, total),
            task_items_count: total,
            completed_items_count: completed,
            total_planned_hours: round2(planned),
            total_spent_hours: spent,
            assigner,
            task,
        })
    }

    pub async fn detail(&self, task: TaskRow) -> ApiResult<TaskDetail> {
        let summary = self.summary(task).await?;
        let task_id = summary.task.id.clone();

        let roles: Vec<TaskRoleRow> = sqlx::query_as(
            "SELECT * FROM task_roles WHERE task_id = ? ORDER BY assigned_at, id",
        )
        .bind(&task_id)
        .fetch_all(&self.pool)
        .await?;
        let items: Vec<TaskItemRow> = sqlx::query_as(
            "SELECT * FROM task_items WHERE task_id = ? ORDER BY ord, created_at",
        )
        .bind(&task_id)
        .fetch_all(&self.pool)
        .await?;

        let mut user_ids: HashSet<String> = roles.iter().map(|r| r.user_id.clone()).collect();
        user_ids.extend(items.iter().filter_map(|i| i.executor_id.clone()));
        let users = self.users_by_id(&user_ids).await?;
        let spent = self.spent_by_item(&task_id).await?;

        let roles = roles
            .into_iter()
            .map(|role| {
                let user = users.get(&role.user_id).cloned();
                RoleView { role, user }
            })
            .collect();
        let items = items
            .into_iter()
            .map(|item| {
                let executor = item.executor_id.as_ref().and_then(|id| users.get(id).cloned());
                let spent_hours = spent.get(&item.id).copied().unwrap_or(0.0);
                ItemView {
                    item,
                    executor,
                    spent_hours,
                }
            })
            .collect();

        Ok(TaskDetail {
            summary,
            roles,
            items,
        })
    }

    /// Hours logged against the task. Reads as zero while time tracking
    /// is disabled.
    pub async fn spent_hours_for_task(&self, task_id: &str) -> ApiResult<f64> {
        if !self.time_tracking {
            return Ok(0.0);
        }
        let (sum,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(hours), 0.0) FROM time_logs WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(round2(sum))
    }

    pub async fn spent_hours_for_item(&self, item_id: &str) -> ApiResult<f64> {
        if !self.time_tracking {
            return Ok(0.0);
        }
        let (sum,): (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(hours), 0.0) FROM time_logs WHERE task_item_id = ?",
        )
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(round2(sum))
    }

    async fn item_aggregates(&self, task_id: &str) -> ApiResult<(i64, i64, f64)> {
        let row: (i64, i64, f64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(planned_hours), 0.0)
             FROM task_items WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn assigner_of(&self, task_id: &str) -> ApiResult<Option<UserPublic>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT u.* FROM users u
             JOIN task_roles r ON r.user_id = u.id
             WHERE r.task_id = ? AND r.role = 'assigner'",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(UserPublic::from))
    }

    async fn users_by_id(&self, ids: &HashSet<String>) -> ApiResult<HashMap<String, UserPublic>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM users WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|u| (u.id.clone(), UserPublic::from(u)))
            .collect())
    }

    async fn spent_by_item(&self, task_id: &str) -> ApiResult<HashMap<String, f64>> {
        if !self.time_tracking {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT task_item_id, COALESCE(SUM(hours), 0.0) FROM time_logs
             WHERE task_id = ? AND task_item_id IS NOT NULL
             GROUP BY task_item_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, hours)| (id, round2(hours)))
            .collect())
    }

    /// Single-item view with executor profile and logged hours.
    pub async fn item_view(&self, item: TaskItemRow) -> ApiResult<ItemView> {
        let mut views = self.item_views(vec![item]).await?;
        views
            .pop()
            .ok_or_else(|| ApiError::Internal(anyhow!("item view vanished")))
    }

    async fn item_views(&self, rows: Vec<TaskItemRow>) -> ApiResult<Vec<ItemView>> {
        let ids: HashSet<String> = rows.iter().filter_map(|i| i.executor_id.clone()).collect();
        let users = self.users_by_id(&ids).await?;
        let mut out = Vec::with_capacity(rows.len());
        for item in rows {
            let spent_hours = self.spent_hours_for_item(&item.id).await?;
            let executor = item.executor_id.as_ref().and_then(|id| users.get(id).cloned());
            out.push(ItemView {
                item,
                executor,
                spent_hours,
            });
        }
        Ok(out)
    }

    async fn task_ids_with_role(&self, user_id: &str, role: RoleKind) -> ApiResult<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT task_id FROM task_roles WHERE user_id = ? AND role = ?",
        )
        .bind(user_id)
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn task_ids_with_executor(&self, user_id: &str) -> ApiResult<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT task_id FROM task_items WHERE executor_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

async fn insert_role(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &str,
    user_id: &str,
    role: RoleKind,
) -> ApiResult<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        "INSERT INTO task_roles (id, task_id, user_id, role, assigned_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(task_id)
    .bind(user_id)
    .bind(role.as_str())
    .bind(&now)
    .execute(&mut **tx)
    .await;
    match result {
        Ok(_) => Ok(id),
        Err(err) => Err(map_role_insert_error(err, role)),
    }
}

async fn insert_item(
    tx: &mut Transaction<'_, Sqlite>,
    task_id: &str,
    item: &NewTaskItem,
    position: i64,
) -> ApiResult<String> {
    let title = item.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("item title must not be empty"));
    }
    if item.planned_hours < 0.0 {
        return Err(ApiError::validation("planned_hours must not be negative"));
    }
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let status = item.status.unwrap_or(ItemStatus::Todo);
    let completed_at = (status == ItemStatus::Completed).then(|| now.clone());
    let order = item.order.unwrap_or(position);
    let result = sqlx::query(
        "INSERT INTO task_items (id, task_id, title, description, executor_id, status,
                                 planned_hours, ord, completed_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(task_id)
    .bind(title)
    .bind(&item.description)
    .bind(&item.executor_id)
    .bind(status.as_str())
    .bind(item.planned_hours)
    .bind(order)
    .bind(&completed_at)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await;
    match result {
        Ok(_) => Ok(id),
        Err(err) if is_foreign_key_violation(&err) => {
            Err(ApiError::validation("unknown executor id"))
        }
        Err(err) => Err(err.into()),
    }
}

fn map_role_insert_error(err: sqlx::Error, role: RoleKind) -> ApiError {
    if let sqlx::Error::Database(db) = &err {
        let msg = db.message();
        if msg.contains("idx_task_roles_one_assigner") {
            return ApiError::validation("task already has an assigner");
        }
        if msg.contains("UNIQUE constraint failed") {
            return ApiError::validation(format!(
                "user already holds the {role} role on this task"
            ));
        }
        if msg.contains("FOREIGN KEY constraint failed") {
            return ApiError::validation("unknown user id");
        }
    }
    err.into()
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("FOREIGN KEY constraint failed"))
}

fn date_part(timestamp: &str) -> &str {
    if timestamp.len() >= 10 {
        &timestamp[..10]
    } else {
        timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{RegisterRequest, UserStore};

    async fn test_stores() -> (TaskStore, UserStore) {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .expect("enable foreign keys");
        let schema = include_str!("../storage/migrations/0001_init.sql");
        for stmt in schema.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&pool).await.expect("create schema");
            }
        }
        (TaskStore::new(pool.clone(), true), UserStore::new(pool))
    }

    async fn register_user(users: &UserStore, email: &str) -> UserRow {
        users
            .register(&RegisterRequest {
                email: email.to_string(),
                password: "correct-horse".to_string(),
                first_name: "Dana".to_string(),
                last_name: "Ivanova".to_string(),
                position: String::new(),
                department: String::new(),
            })
            .await
            .expect("register user")
    }

    fn basic_request(title: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            title: title.to_string(),
            description: String::new(),
            source_links: Vec::new(),
            result_link: None,
            planned_start_date: None,
            planned_end_date: None,
            co_executors: Vec::new(),
            observers: Vec::new(),
            task_items: Vec::new(),
        }
    }

    fn item(title: &str, executor: Option<&str>) -> NewTaskItem {
        NewTaskItem {
            title: title.to_string(),
            description: String::new(),
            executor_id: executor.map(|s| s.to_string()),
            planned_hours: 2.0,
            status: None,
            order: None,
        }
    }

    #[tokio::test]
    async fn create_task_wires_roles_and_items() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;
        let dev = register_user(&users, "dev@example.com").await;

        let mut req = basic_request("Quarterly report");
        req.co_executors.push(dev.id.clone());
        req.task_items.push(item("Collect figures", Some(&dev.id)));
        req.task_items.push(item("Write summary", None));

        let task = tasks.create_task(&boss, &req).await.unwrap();
        assert_eq!(task.status, "new");

        assert!(tasks.holds_role(&task.id, &boss.id, RoleKind::Assigner).await.unwrap());
        assert!(tasks.holds_role(&task.id, &dev.id, RoleKind::CoExecutor).await.unwrap());
        assert!(tasks.is_participant(&task.id, &dev.id).await.unwrap());

        let detail = tasks.detail(task).await.unwrap();
        assert_eq!(detail.items.len(), 2);
        assert_eq!(detail.items[0].item.order, 0);
        assert_eq!(detail.items[1].item.order, 1);
        assert_eq!(detail.summary.task_items_count, 2);
        assert_eq!(detail.summary.progress_percentage, 0.0);
        let assigner = detail.summary.assigner.expect("assigner present");
        assert_eq!(assigner.id, detail
            .roles
            .iter()
            .find(|r| r.role.role == "assigner")
            .map(|r| r.role.user_id.clone())
            .unwrap());
    }

    #[tokio::test]
    async fn creation_produces_one_role_row_per_grant() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;
        let a = register_user(&users, "a@example.com").await;
        let b = register_user(&users, "b@example.com").await;
        let c = register_user(&users, "c@example.com").await;

        let mut req = basic_request("Staffed");
        req.co_executors = vec![a.id.clone(), b.id.clone()];
        req.observers = vec![c.id.clone()];
        req.task_items.push(item("One", None));
        req.task_items.push(item("Two", None));

        let task = tasks.create_task(&boss, &req).await.unwrap();
        let detail = tasks.detail(task).await.unwrap();

        // three granted roles plus the implicit assigner
        assert_eq!(detail.roles.len(), 4);
        let granted = detail
            .roles
            .iter()
            .filter(|r| r.role.role != "assigner")
            .count();
        assert_eq!(granted, 3);
        assert_eq!(detail.items.len(), 2);
        assert_eq!(detail.items[0].item.order, 0);
        assert_eq!(detail.items[1].item.order, 1);
    }

    #[tokio::test]
    async fn unknown_co_executor_rolls_back_the_whole_task() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;

        let mut req = basic_request("Doomed");
        req.co_executors.push("no-such-user".to_string());
        let err = tasks.create_task(&boss, &req).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let listed = tasks.my_tasks(&boss.id).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn second_assigner_is_rejected() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;
        let rival = register_user(&users, "rival@example.com").await;

        let task = tasks.create_task(&boss, &basic_request("Guarded")).await.unwrap();
        let err = tasks
            .add_role(&task.id, &rival.id, RoleKind::Assigner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already has an assigner"));

        // same user, same role twice
        tasks.add_role(&task.id, &rival.id, RoleKind::Observer).await.unwrap();
        let err = tasks
            .add_role(&task.id, &rival.id, RoleKind::Observer)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already holds"));
    }

    #[tokio::test]
    async fn assigner_role_cannot_be_removed() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;
        let obs = register_user(&users, "obs@example.com").await;

        let task = tasks.create_task(&boss, &basic_request("Sticky")).await.unwrap();
        let detail = tasks.detail(task.clone()).await.unwrap();
        let assigner_role = &detail.roles[0].role;
        let err = tasks.remove_role(&task.id, &assigner_role.id).await.unwrap_err();
        assert!(err.to_string().contains("cannot be removed"));

        let role = tasks.add_role(&task.id, &obs.id, RoleKind::Observer).await.unwrap();
        tasks.remove_role(&task.id, &role.id).await.unwrap();
        assert!(matches!(
            tasks.remove_role(&task.id, &role.id).await.unwrap_err(),
            ApiError::NotFound
        ));
    }

    #[tokio::test]
    async fn completing_a_task_requires_completed_items() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;

        let mut req = basic_request("Gated");
        req.task_items.push(item("Step one", None));
        req.task_items.push(item("Step two", None));
        let task = tasks.create_task(&boss, &req).await.unwrap();

        let complete = TaskChanges {
            status: Some(TaskStatus::Completed),
            ..Default::default()
        };
        let err = tasks.update_task(&task.id, &complete).await.unwrap_err();
        assert!(err.to_string().contains("2 item(s) are not completed"));

        let detail = tasks.detail(task.clone()).await.unwrap();
        for view in &detail.items {
            let done = ItemChanges {
                status: Some(ItemStatus::Completed),
                ..Default::default()
            };
            tasks.update_item(&view.item.id, &done).await.unwrap();
        }
        let updated = tasks.update_task(&task.id, &complete).await.unwrap();
        assert_eq!(updated.status, "completed");

        let summary = tasks.summary(updated).await.unwrap();
        assert_eq!(summary.progress_percentage, 100.0);
    }

    #[tokio::test]
    async fn completed_at_follows_item_status() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;

        let mut req = basic_request("Stamps");
        req.task_items.push(item("Only step", None));
        let task = tasks.create_task(&boss, &req).await.unwrap();
        let item_id = tasks.detail(task).await.unwrap().items[0].item.id.clone();

        let done = ItemChanges {
            status: Some(ItemStatus::Completed),
            ..Default::default()
        };
        let row = tasks.update_item(&item_id, &done).await.unwrap();
        let stamp = row.completed_at.clone().expect("stamped on completion");

        // unrelated update keeps the original stamp
        let retitle = ItemChanges {
            title: Some("Renamed step".to_string()),
            ..Default::default()
        };
        let row = tasks.update_item(&item_id, &retitle).await.unwrap();
        assert_eq!(row.completed_at.as_deref(), Some(stamp.as_str()));

        let reopen = ItemChanges {
            status: Some(ItemStatus::InProgress),
            ..Default::default()
        };
        let row = tasks.update_item(&item_id, &reopen).await.unwrap();
        assert!(row.completed_at.is_none());
    }

    #[tokio::test]
    async fn update_task_distinguishes_null_from_absent() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;

        let mut req = basic_request("Links");
        req.result_link = Some("https://example.com/doc".to_string());
        let task = tasks.create_task(&boss, &req).await.unwrap();

        let keep = TaskChanges {
            title: Some("Links v2".to_string()),
            ..Default::default()
        };
        let row = tasks.update_task(&task.id, &keep).await.unwrap();
        assert_eq!(row.result_link.as_deref(), Some("https://example.com/doc"));

        let clear = TaskChanges {
            result_link: Some(None),
            ..Default::default()
        };
        let row = tasks.update_task(&task.id, &clear).await.unwrap();
        assert!(row.result_link.is_none());
    }

    #[tokio::test]
    async fn delete_task_cascades() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;

        let mut req = basic_request("Short lived");
        req.task_items.push(item("Step", None));
        let task = tasks.create_task(&boss, &req).await.unwrap();
        let item_id = tasks.detail(task.clone()).await.unwrap().items[0].item.id.clone();

        tasks.delete_task(&task.id).await.unwrap();
        assert!(matches!(tasks.get_task(&task.id).await.unwrap_err(), ApiError::NotFound));
        assert!(matches!(tasks.get_item(&item_id).await.unwrap_err(), ApiError::NotFound));
        assert!(matches!(
            tasks.delete_task(&task.id).await.unwrap_err(),
            ApiError::NotFound
        ));
    }

    #[tokio::test]
    async fn list_tasks_hides_other_peoples_tasks() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;
        let outsider = register_user(&users, "outsider@example.com").await;

        tasks.create_task(&boss, &basic_request("Private")).await.unwrap();

        let seen = tasks
            .list_tasks(&boss, &TaskListParams::default())
            .await
            .unwrap();
        assert_eq!(seen.len(), 1);
        let seen = tasks
            .list_tasks(&outsider, &TaskListParams::default())
            .await
            .unwrap();
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status_and_overdue() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;

        let mut overdue = basic_request("Late");
        overdue.planned_end_date = Some("2000-01-01".to_string());
        tasks.create_task(&boss, &overdue).await.unwrap();
        let fresh = tasks.create_task(&boss, &basic_request("Fresh")).await.unwrap();
        let started = TaskChanges {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        tasks.update_task(&fresh.id, &started).await.unwrap();

        let params = TaskListParams {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        let rows = tasks.list_tasks(&boss, &params).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task.title, "Fresh");

        let params = TaskListParams {
            is_overdue: true,
            ..Default::default()
        };
        let rows = tasks.list_tasks(&boss, &params).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task.title, "Late");

        // false must not invert the filter
        let rows = tasks
            .list_tasks(&boss, &TaskListParams::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn my_items_and_assigned_by_me_are_scoped() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;
        let dev = register_user(&users, "dev@example.com").await;

        let mut req = basic_request("Split work");
        req.task_items.push(item("Dev part", Some(&dev.id)));
        req.task_items.push(item("Boss part", Some(&boss.id)));
        tasks.create_task(&boss, &req).await.unwrap();

        let mine = tasks.my_items(&dev.id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].item.title, "Dev part");

        assert_eq!(tasks.assigned_by_me(&boss.id).await.unwrap().len(), 1);
        assert!(tasks.assigned_by_me(&dev.id).await.unwrap().is_empty());

        // dev executes an item, so the task shows up among dev's tasks
        assert_eq!(tasks.my_tasks(&dev.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_item_appends_after_existing_order() {
        let (tasks, users) = test_stores().await;
        let boss = register_user(&users, "boss@example.com").await;

        let mut req = basic_request("Ordered");
        req.task_items.push(item("First", None));
        let task = tasks.create_task(&boss, &req).await.unwrap();

        let appended = tasks.add_item(&task.id, &item("Second", None)).await.unwrap();
        assert_eq!(appended.order, 1);

        let err = tasks
            .add_item(&task.id, &item("", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = tasks
            .add_item("missing-task", &item("Nowhere", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }
}
