//! Server-Sent Events endpoints backed by the event broker.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};

use reviewq_core::PushFrame;

use crate::{push, AppState, Caller};

fn to_sse(frame: PushFrame) -> Result<Event, Infallible> {
    Ok(Event::default()
        .event(frame.frame_type())
        .data(frame.to_json_string()))
}

fn keep_alive(state: &AppState) -> KeepAlive {
    KeepAlive::new().interval(state.keepalive).text("keepalive")
}

/// Per-user stream of task and review events.
pub async fn user_events(
    State(state): State<AppState>,
    caller: Caller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = push::user_stream(state.broker.clone(), &caller.user_id);
    Sse::new(frames.map(to_sse)).keep_alive(keep_alive(&state))
}

/// Stream of everything broadcast on one channel, such as `qa:<session_id>`.
pub async fn channel_events(
    State(state): State<AppState>,
    _caller: Caller,
    Path(channel): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = push::channel_stream(state.broker.clone(), &channel);
    Sse::new(frames.map(to_sse)).keep_alive(keep_alive(&state))
}
