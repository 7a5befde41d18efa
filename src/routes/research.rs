use axum::{
    extract::{Path, State},
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use tracing::info;

use crate::middleware::rate_limiter::rate_limiter_middleware;
use crate::models::{AppState, ResearchRequest};
use crate::research::stream::{into_stream, StreamMessage};
use crate::session_store::SessionRecord;
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    let stream_route = Router::new()
        .route("/api/research/stream", post(stream_research))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limiter_middleware));

    Router::new()
        .merge(stream_route)
        .route("/api/research/{session_id}", get(get_session))
        .with_state(state)
}

/// Start a session and stream its events as SSE. Each event is named after
/// its type and carries the full envelope; the stream ends with `[DONE]`.
async fn stream_research(
    State(state): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    info!(query_len = request.query.len(), "Received research request");

    let session = state.pipeline.start(request).await?;
    // Dropping the response stream (client disconnect) cancels the session.
    let guard = session.cancel.drop_guard();

    let events = into_stream(session.events).map(move |message| {
        let _guard = &guard;
        match message {
            StreamMessage::Event(envelope) => Event::default()
                .event(envelope.event.event_type())
                .json_data(&envelope),
            StreamMessage::End => Ok(Event::default().data("[DONE]")),
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<SessionRecord>> {
    state
        .pipeline
        .store()
        .get(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
}
