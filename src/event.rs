//! Board events and the server-sent-events wire format.
//!
//! ARCHITECTURE
//! ============
//! Every change a client sees is a `BoardEvent`. Events are built once by
//! the service that made the change, handed to the event bus, and fanned
//! out to each streaming connection on that board. Nothing holds onto an
//! event after delivery.
//!
//! WIRE FORMAT
//! ===========
//! - event:     `data: <json>\n\n`, where the JSON is `{"type": "...", ...}`
//! - keepalive: `: heartbeat\n\n` (an SSE comment, ignored by `EventSource`)

use serde::Serialize;
use uuid::Uuid;

use crate::services::presence::PresenceEntry;
use crate::storage::{Comment, Task};

/// SSE comment text used for keep-alive frames.
pub const HEARTBEAT_COMMENT: &str = "heartbeat";

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum BoardEvent {
    /// First frame on a new stream.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected { client_id: Uuid, user_id: Uuid },
    /// Presence snapshot sent right after `connected`.
    #[serde(rename = "init", rename_all = "camelCase")]
    Init { connected_users: Vec<PresenceEntry> },
    /// Someone opened or closed a stream on the board.
    #[serde(rename = "presence", rename_all = "camelCase")]
    Presence { connected_users: Vec<PresenceEntry> },
    #[serde(rename = "task:created", rename_all = "camelCase")]
    TaskCreated { task: Task, actor_id: Uuid },
    #[serde(rename = "task:updated", rename_all = "camelCase")]
    TaskUpdated { task: Task, actor_id: Uuid },
    #[serde(rename = "task:moved", rename_all = "camelCase")]
    TaskMoved { task_id: Uuid, from_group_id: Uuid, target_group_id: Uuid, target_position: i32, actor_id: Uuid },
    #[serde(rename = "task:deleted", rename_all = "camelCase")]
    TaskDeleted { task_id: Uuid, group_id: Uuid, actor_id: Uuid },
    #[serde(rename = "comment:added", rename_all = "camelCase")]
    CommentAdded { comment: Comment, actor_id: Uuid },
    #[serde(rename = "dependency:added", rename_all = "camelCase")]
    DependencyAdded { task_id: Uuid, blocked_by: Uuid, actor_id: Uuid },
    #[serde(rename = "dependency:removed", rename_all = "camelCase")]
    DependencyRemoved { task_id: Uuid, blocked_by: Uuid, actor_id: Uuid },
}

impl BoardEvent {
    /// The `type` tag as it appears on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Init { .. } => "init",
            Self::Presence { .. } => "presence",
            Self::TaskCreated { .. } => "task:created",
            Self::TaskUpdated { .. } => "task:updated",
            Self::TaskMoved { .. } => "task:moved",
            Self::TaskDeleted { .. } => "task:deleted",
            Self::CommentAdded { .. } => "comment:added",
            Self::DependencyAdded { .. } => "dependency:added",
            Self::DependencyRemoved { .. } => "dependency:removed",
        }
    }
}

// =============================================================================
// STREAM FRAMES
// =============================================================================

/// One unit pushed down a streaming connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(BoardEvent),
    Heartbeat,
}

impl StreamFrame {
    /// Convert into an axum SSE event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event payload fails to serialize.
    pub fn to_sse(&self) -> Result<axum::response::sse::Event, serde_json::Error> {
        use axum::response::sse::Event;
        match self {
            Self::Event(event) => Ok(Event::default().data(serde_json::to_string(event)?)),
            Self::Heartbeat => Ok(Event::default().comment(HEARTBEAT_COMMENT)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::convert::Infallible;

    use axum::response::IntoResponse;
    use axum::response::sse::Sse;
    use http_body_util::BodyExt;

    use super::StreamFrame;

    /// Bytes an SSE response writes for a single frame.
    pub async fn wire(frame: &StreamFrame) -> String {
        let event = frame.to_sse().unwrap();
        let sse = Sse::new(futures::stream::iter([Ok::<_, Infallible>(event)]));
        let body = sse.into_response().into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
