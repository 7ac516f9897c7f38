pub mod config;
pub mod error;
pub mod identity;
pub mod observability;
pub mod rest;
pub mod storage;
pub mod tasks;
pub mod timelogs;

use std::sync::Arc;

use config::ServerConfig;
use identity::UserStore;
use storage::Storage;
use tasks::TaskStore;
use timelogs::TimeLogStore;

/// Shared application state passed to every request handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub storage: Arc<Storage>,
    pub users: UserStore,
    pub tasks: TaskStore,
    pub time_logs: TimeLogStore,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(config: ServerConfig, storage: Storage) -> Self {
        let pool = storage.pool();
        let time_tracking = config.time_tracking.enabled;
        Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            users: UserStore::new(pool.clone()),
            tasks: TaskStore::new(pool.clone(), time_tracking),
            time_logs: TimeLogStore::new(pool, time_tracking),
            started_at: std::time::Instant::now(),
        }
    }
}
