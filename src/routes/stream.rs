//! Board stream routes: server-sent events and the presence snapshot.
//!
//! Authorization runs before a `Connection` exists, so a rejected request
//! never subscribes or shows up in presence.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::Json;
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::AuthUser;
use crate::services::presence::PresenceEntry;
use crate::services::stream::Connection;
use crate::services::task;
use crate::state::AppState;

/// `GET /api/boards/:id/stream`: open the board's event stream.
pub async fn board_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    task::authorize_board(&state, board_id, &auth.identity).await?;

    let conn = Connection::open(
        &state.bus,
        board_id,
        &auth.identity,
        state.config.heartbeat_interval,
        state.config.stream_buffer,
    );
    let client_id = conn.client_id();
    let events = conn.into_stream().filter_map(move |frame| {
        let event = match frame.to_sse() {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(error = %e, %client_id, "stream: dropping unserializable frame");
                None
            }
        };
        futures::future::ready(event)
    });
    Ok(Sse::new(events))
}

/// `GET /api/boards/:id/presence`: users with an open stream on the board.
pub async fn board_presence(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Vec<PresenceEntry>>, ApiError> {
    task::authorize_board(&state, board_id, &auth.identity).await?;
    Ok(Json(state.bus.connected_users(board_id)))
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
