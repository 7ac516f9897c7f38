pub mod model;
pub mod policy;
pub mod storage;

pub use model::{
    CreateTaskRequest, ItemChanges, ItemStatus, NewTaskItem, RoleKind, TaskChanges, TaskStatus,
};
pub use storage::{ItemListParams, TaskListParams, TaskStore};
