use axum::{extract::State, http::StatusCode, Json};

use reviewq_jobs::{QaRequest, QaSession};

use crate::{ApiError, AppState, Caller};

/// Start a streaming answer over a target's cached review evidence.
///
/// Clients that want every delta listen on `/api/v1/channels/qa:<id>/events`
/// first and pass that `session_id`; otherwise one is allocated and returned.
pub async fn start_qa(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<QaRequest>,
) -> Result<(StatusCode, Json<QaSession>), ApiError> {
    let session = state.qa.start(request).await?;
    tracing::info!(
        subsystem = "api",
        user_id = %caller.user_id,
        channel = %session.channel,
        "Q&A session started"
    );
    Ok((StatusCode::ACCEPTED, Json(session)))
}
