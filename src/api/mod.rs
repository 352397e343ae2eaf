// =============================================================================
// api/mod.rs — THE FRONT COUNTER
// =============================================================================
//
// The REST surface. Handlers are thin: pull the caller and the payload out of
// the request, hand them to the pipeline, shape the answer. Every pipeline
// error converts into an `ApiError` with the right status code.
// =============================================================================

pub mod auth;
pub mod error;
mod handlers;

use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::classifier::ClassificationBoundary;
use crate::intake::IntakeOrchestrator;
use crate::metrics::IntakeMetrics;
use crate::store::Store;
use crate::votes::VoteService;

/// Everything the handlers need, built once at startup.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub intake: IntakeOrchestrator,
    pub votes: VoteService,
    pub boundary: Arc<ClassificationBoundary>,
    pub metrics: Arc<IntakeMetrics>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        boundary: Arc<ClassificationBoundary>,
        metrics: Arc<IntakeMetrics>,
        cell_precision: usize,
    ) -> Self {
        Self {
            intake: IntakeOrchestrator::new(store.clone(), boundary.clone(), metrics.clone(), cell_precision),
            votes: VoteService::new(store.clone()),
            store,
            boundary,
            metrics,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/api/issues", post(handlers::submit_issue))
        .route("/api/issues/:id", get(handlers::get_issue))
        .route("/api/issues/:id/status", patch(handlers::update_status))
        .route("/api/heatmap", get(handlers::heatmap))
        .route("/api/vote/:issue_id", post(handlers::vote).delete(handlers::unvote))
        .route("/api/vote/issue/:issue_id/count", get(handlers::vote_count))
        .route("/api/notifications", get(handlers::list_notifications))
        .route("/api/notifications/mark-read", put(handlers::mark_read))
        .route("/api/notifications/mark-all-read", put(handlers::mark_all_read))
        .route("/api/notifications/:id", delete(handlers::delete_notification))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
