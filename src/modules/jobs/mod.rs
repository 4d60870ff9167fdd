use axum::Router;
use axum::routing::{get, patch, post};
use crate::state::AppState;
use axum::middleware;

pub mod dto;
pub mod error;
pub mod events;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;
pub mod video_url;

pub fn router(state: AppState) -> axum::Router<AppState> {
    let public_routes = Router::new()
        .route("/public/jobs/{id}", get(handler::get_public_job));

    let protected_routes = Router::new()
        .route("/jobs", post(handler::create_job).get(handler::list_jobs))
        .route("/jobs/{id}", get(handler::get_job).patch(handler::update_job_content))
        .route("/jobs/{id}/retry", post(handler::retry_job))
        .route("/jobs/{id}/publish", patch(handler::toggle_public))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware
        ));

    public_routes.merge(protected_routes)
}
