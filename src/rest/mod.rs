// rest/mod.rs — Public REST API server.
//
// Axum HTTP server, JSON in/out. Registration, token issuance, and the
// health probe are open; everything else requires a bearer token.
//
// Endpoints (all under /api/v1):
//   POST   /auth/register
//   POST   /auth/token
//   GET    /health
//   GET    /users                GET/PATCH /users/me
//   GET    /tasks  POST /tasks  GET/PUT/PATCH/DELETE /tasks/{id}
//   GET    /tasks/my            /tasks/my-items        /tasks/assigned-by-me
//   POST   /tasks/{id}/roles    DELETE /tasks/{id}/roles/{role_id}
//   POST   /tasks/{id}/items
//   GET    /task-items          GET/PUT/PATCH/DELETE /task-items/{id}
//   GET    /time-logs  POST /time-logs  GET/PUT/PATCH/DELETE /time-logs/{id}

pub mod auth;
pub mod routes;

use anyhow::Result;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let public = Router::new()
        .route("/api/v1/health", get(routes::health::health))
        .route("/api/v1/auth/register", post(routes::users::register))
        .route("/api/v1/auth/token", post(routes::users::token));

    let authed = Router::new()
        .route("/api/v1/users", get(routes::users::list_users))
        .route(
            "/api/v1/users/me",
            get(routes::users::me).patch(routes::users::update_me),
        )
        .route(
            "/api/v1/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route("/api/v1/tasks/my", get(routes::tasks::my_tasks))
        .route("/api/v1/tasks/my-items", get(routes::tasks::my_items))
        .route(
            "/api/v1/tasks/assigned-by-me",
            get(routes::tasks::assigned_by_me),
        )
        .route(
            "/api/v1/tasks/{id}",
            get(routes::tasks::get_task)
                .put(routes::tasks::update_task)
                .patch(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .route("/api/v1/tasks/{id}/roles", post(routes::tasks::add_role))
        .route(
            "/api/v1/tasks/{id}/roles/{role_id}",
            delete(routes::tasks::remove_role),
        )
        .route("/api/v1/tasks/{id}/items", post(routes::tasks::add_item))
        .route("/api/v1/task-items", get(routes::items::list_items))
        .route(
            "/api/v1/task-items/{id}",
            get(routes::items::get_item)
                .put(routes::items::update_item)
                .patch(routes::items::update_item)
                .delete(routes::items::delete_item),
        )
        .route(
            "/api/v1/time-logs",
            get(routes::timelogs::list_logs).post(routes::timelogs::create_log),
        )
        .route(
            "/api/v1/time-logs/{id}",
            get(routes::timelogs::get_log)
                .put(routes::timelogs::update_log)
                .patch(routes::timelogs::update_log)
                .delete(routes::timelogs::delete_log),
        )
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::require_api_auth,
        ));

    public
        .merge(authed)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
