//! Access checks for tasks and task items.
//!
//! The store resolves a caller to an access level (see
//! [`TaskStore::task_access`](super::storage::TaskStore::task_access));
//! the functions here turn that level into an allow/deny decision.
//! Callers outside a task get `404`, participants without the required
//! role get `403`.

use crate::error::{ApiError, ApiResult};

/// Fields a plain executor may touch when updating their own item.
pub const EXECUTOR_ALLOWED_FIELDS: &[&str] = &["status"];

/// What a caller is to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAccess {
    Staff,
    Assigner,
    Participant,
    Invisible,
}

/// What a caller is to a task item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAccess {
    Staff,
    Assigner,
    Executor,
    Participant,
    Invisible,
}

/// True when every patched field is in the allowed set.
pub fn fields_within(fields: &[String], allowed: &[&str]) -> bool {
    fields.iter().all(|f| allowed.contains(&f.as_str()))
}

pub fn check_task_view(access: TaskAccess) -> ApiResult<()> {
    match access {
        TaskAccess::Invisible => Err(ApiError::NotFound),
        _ => Ok(()),
    }
}

/// Task mutations (update, delete, role and item management) are
/// reserved for the assigner.
pub fn check_task_manage(access: TaskAccess) -> ApiResult<()> {
    match access {
        TaskAccess::Staff | TaskAccess::Assigner => Ok(()),
        TaskAccess::Participant => Err(ApiError::Forbidden),
        TaskAccess::Invisible => Err(ApiError::NotFound),
    }
}

pub fn check_item_view(access: ItemAccess) -> ApiResult<()> {
    match access {
        ItemAccess::Invisible => Err(ApiError::NotFound),
        _ => Ok(()),
    }
}

/// The executor may update their own item, but only its status; any
/// other field set is the assigner's call. A request mixing `status`
/// with other fields is rejected whole.
pub fn check_item_update(access: ItemAccess, fields: &[String]) -> ApiResult<()> {
    match access {
        ItemAccess::Staff | ItemAccess::Assigner => Ok(()),
        ItemAccess::Executor => {
            if fields_within(fields, EXECUTOR_ALLOWED_FIELDS) {
                Ok(())
            } else {
                Err(ApiError::Forbidden)
            }
        }
        ItemAccess::Participant => Err(ApiError::Forbidden),
        ItemAccess::Invisible => Err(ApiError::NotFound),
    }
}

/// Deleting an item is assigner-only; executors cannot remove their
/// own items.
pub fn check_item_delete(access: ItemAccess) -> ApiResult<()> {
    match access {
        ItemAccess::Staff | ItemAccess::Assigner => Ok(()),
        ItemAccess::Executor | ItemAccess::Participant => Err(ApiError::Forbidden),
        ItemAccess::Invisible => Err(ApiError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn outsiders_get_not_found_not_forbidden() {
        assert!(matches!(
            check_task_view(TaskAccess::Invisible),
            Err(ApiError::NotFound)
        ));
        assert!(matches!(
            check_task_manage(TaskAccess::Invisible),
            Err(ApiError::NotFound)
        ));
        assert!(matches!(
            check_item_update(ItemAccess::Invisible, &fields(&["status"])),
            Err(ApiError::NotFound)
        ));
    }

    #[test]
    fn participants_can_view_but_not_manage() {
        assert!(check_task_view(TaskAccess::Participant).is_ok());
        assert!(matches!(
            check_task_manage(TaskAccess::Participant),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn assigner_and_staff_manage_tasks() {
        assert!(check_task_manage(TaskAccess::Assigner).is_ok());
        assert!(check_task_manage(TaskAccess::Staff).is_ok());
    }

    #[test]
    fn executor_may_only_patch_status() {
        assert!(check_item_update(ItemAccess::Executor, &fields(&["status"])).is_ok());
        assert!(check_item_update(ItemAccess::Executor, &fields(&[])).is_ok());
        assert!(matches!(
            check_item_update(ItemAccess::Executor, &fields(&["status", "title"])),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            check_item_update(ItemAccess::Executor, &fields(&["planned_hours"])),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn assigner_may_patch_any_item_field() {
        assert!(check_item_update(
            ItemAccess::Assigner,
            &fields(&["title", "planned_hours", "executor_id"])
        )
        .is_ok());
    }

    #[test]
    fn executor_cannot_delete_their_item() {
        assert!(matches!(
            check_item_delete(ItemAccess::Executor),
            Err(ApiError::Forbidden)
        ));
        assert!(check_item_delete(ItemAccess::Assigner).is_ok());
        assert!(matches!(
            check_item_delete(ItemAccess::Participant),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn fields_within_is_a_subset_check() {
        assert!(fields_within(&fields(&["status"]), EXECUTOR_ALLOWED_FIELDS));
        assert!(fields_within(&fields(&[]), EXECUTOR_ALLOWED_FIELDS));
        assert!(!fields_within(
            &fields(&["status", "order"]),
            EXECUTOR_ALLOWED_FIELDS
        ));
    }
}
