//! # reviewq-api
//!
//! HTTP and SSE surface for the reviewq task queue.
//!
//! Every `/api/v1` route reads the caller from `x-user-id` plus either
//! `Authorization: Bearer <key>` or `x-api-key`. The key only ever exists here
//! long enough to be hashed into a [`reviewq_core::CredentialHash`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod push;
pub mod state;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method, Request},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};

pub use config::ApiConfig;
pub use error::ApiError;
pub use identity::Caller;
pub use state::AppState;

use handlers::{events, qa, reviews, tasks};

/// Routes without middleware; tests drive this directly.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/spaces", post(reviews::create_space))
        .route("/api/v1/spaces/:id", get(reviews::get_space))
        .route(
            "/api/v1/spaces/:id/checklist-items",
            post(reviews::append_checklist_items),
        )
        .route(
            "/api/v1/spaces/:id/review-targets",
            post(reviews::create_target),
        )
        .route("/api/v1/review-targets/:id", get(reviews::get_target))
        .route("/api/v1/review-targets/:id/retry", post(reviews::retry_target))
        .route("/api/v1/tasks", post(tasks::create_task))
        .route(
            "/api/v1/tasks/:id",
            get(tasks::get_task).delete(tasks::cancel_task),
        )
        .route("/api/v1/queue/stats", get(tasks::queue_stats))
        .route("/api/v1/qa", post(qa::start_qa))
        .route("/api/v1/events", get(events::user_events))
        .route(
            "/api/v1/channels/:channel/events",
            get(events::channel_events),
        )
        .with_state(state)
}

/// Time-ordered UUIDv7 request correlation ids.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = reviewq_core::new_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Full application: routes plus tracing, request ids, CORS and body limits.
pub fn router(state: AppState, config: &ApiConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(config.allowed_origins.clone()))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(identity::USER_ID_HEADER),
            HeaderName::from_static(identity::API_KEY_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
}
