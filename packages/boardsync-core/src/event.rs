/// Push-channel wire envelope and the typed events decoded from it.
///
/// Every frame is a JSON object `{ "type": ..., "data": {...}, "timestamp": ... }`.
/// The server may also put `board_id` on the envelope itself; it is copied into
/// payloads that omit it. The timestamp is informational only and is never
/// used for ordering.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::types::{BoardId, CommentId, TaskId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<BoardId>,
}

impl PushEnvelope {
    /// Build an outbound frame stamped with the current UTC time.
    pub fn outbound(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            timestamp: Some(Value::String(chrono::Utc::now().to_rfc3339())),
            board_id: None,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Event names handlers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskMoved,
    CommentCreated,
    UserJoinedBoard,
    UserLeftBoard,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Error,
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::TaskDeleted,
        EventKind::TaskMoved,
        EventKind::CommentCreated,
        EventKind::UserJoinedBoard,
        EventKind::UserLeftBoard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
            EventKind::TaskCreated => "task_created",
            EventKind::TaskUpdated => "task_updated",
            EventKind::TaskDeleted => "task_deleted",
            EventKind::TaskMoved => "task_moved",
            EventKind::CommentCreated => "comment_created",
            EventKind::UserJoinedBoard => "user_joined_board",
            EventKind::UserLeftBoard => "user_left_board",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| EventDecodeError::UnknownType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotice {
    pub id: TaskId,
    #[serde(default)]
    pub board_id: Option<BoardId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub column_id: Option<i64>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default, alias = "created_by", alias = "updated_by", alias = "moved_by")]
    pub actor: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDeletedNotice {
    pub id: TaskId,
    #[serde(default)]
    pub board_id: Option<BoardId>,
    #[serde(default)]
    pub deleted_by: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNotice {
    pub id: CommentId,
    pub content: String,
    pub task_id: TaskId,
    pub author_id: UserId,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub board_id: Option<BoardId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceNotice {
    pub user_id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub board_id: Option<BoardId>,
}

/// Everything published through the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Connected { board_id: BoardId },
    Disconnected { board_id: BoardId, reason: Option<String> },
    TransportError { message: String },
    TaskCreated(TaskNotice),
    TaskUpdated(TaskNotice),
    TaskMoved(TaskNotice),
    TaskDeleted(TaskDeletedNotice),
    CommentCreated(CommentNotice),
    UserJoinedBoard(PresenceNotice),
    UserLeftBoard(PresenceNotice),
}

impl BoardEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BoardEvent::Connected { .. } => EventKind::Connected,
            BoardEvent::Disconnected { .. } => EventKind::Disconnected,
            BoardEvent::TransportError { .. } => EventKind::Error,
            BoardEvent::TaskCreated(_) => EventKind::TaskCreated,
            BoardEvent::TaskUpdated(_) => EventKind::TaskUpdated,
            BoardEvent::TaskMoved(_) => EventKind::TaskMoved,
            BoardEvent::TaskDeleted(_) => EventKind::TaskDeleted,
            BoardEvent::CommentCreated(_) => EventKind::CommentCreated,
            BoardEvent::UserJoinedBoard(_) => EventKind::UserJoinedBoard,
            BoardEvent::UserLeftBoard(_) => EventKind::UserLeftBoard,
        }
    }

    /// Board the event refers to, when known.
    pub fn board_id(&self) -> Option<BoardId> {
        match self {
            BoardEvent::Connected { board_id } | BoardEvent::Disconnected { board_id, .. } => {
                Some(*board_id)
            }
            BoardEvent::TransportError { .. } => None,
            BoardEvent::TaskCreated(n) | BoardEvent::TaskUpdated(n) | BoardEvent::TaskMoved(n) => {
                n.board_id
            }
            BoardEvent::TaskDeleted(n) => n.board_id,
            BoardEvent::CommentCreated(n) => n.board_id,
            BoardEvent::UserJoinedBoard(n) | BoardEvent::UserLeftBoard(n) => n.board_id,
        }
    }

    fn fill_board_id(&mut self, envelope_board: Option<BoardId>) {
        let Some(board) = envelope_board else {
            return;
        };
        let slot = match self {
            BoardEvent::TaskCreated(n) | BoardEvent::TaskUpdated(n) | BoardEvent::TaskMoved(n) => {
                &mut n.board_id
            }
            BoardEvent::TaskDeleted(n) => &mut n.board_id,
            BoardEvent::CommentCreated(n) => &mut n.board_id,
            BoardEvent::UserJoinedBoard(n) | BoardEvent::UserLeftBoard(n) => &mut n.board_id,
            _ => return,
        };
        slot.get_or_insert(board);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event type: {0}")]
    UnknownType(String),

    #[error("Event type {kind} is raised locally and cannot arrive over the wire")]
    LocalOnly { kind: EventKind },

    #[error("Invalid {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

impl EventDecodeError {
    /// Well-formed frames of a type this client does not consume (pong, cursor_move, ...).
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, EventDecodeError::UnknownType(_))
    }
}

fn payload<T: DeserializeOwned>(kind: EventKind, data: Value) -> Result<T, EventDecodeError> {
    serde_json::from_value(data).map_err(|source| EventDecodeError::Payload { kind, source })
}

/// Decode an already-parsed envelope into a typed event.
pub fn decode_envelope(envelope: PushEnvelope) -> Result<BoardEvent, EventDecodeError> {
    let kind: EventKind = envelope.kind.parse()?;
    let data = envelope.data;
    let mut event = match kind {
        EventKind::TaskCreated => BoardEvent::TaskCreated(payload(kind, data)?),
        EventKind::TaskUpdated => BoardEvent::TaskUpdated(payload(kind, data)?),
        EventKind::TaskMoved => BoardEvent::TaskMoved(payload(kind, data)?),
        EventKind::TaskDeleted => BoardEvent::TaskDeleted(payload(kind, data)?),
        EventKind::CommentCreated => BoardEvent::CommentCreated(payload(kind, data)?),
        EventKind::UserJoinedBoard => BoardEvent::UserJoinedBoard(payload(kind, data)?),
        EventKind::UserLeftBoard => BoardEvent::UserLeftBoard(payload(kind, data)?),
        EventKind::Connected | EventKind::Disconnected | EventKind::Error => {
            return Err(EventDecodeError::LocalOnly { kind })
        }
    };
    event.fill_board_id(envelope.board_id);
    Ok(event)
}

/// Decode a raw text frame.
pub fn decode(text: &str) -> Result<BoardEvent, EventDecodeError> {
    let envelope: PushEnvelope = serde_json::from_str(text)?;
    decode_envelope(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_task_created_inherits_envelope_board() {
        let frame = json!({
            "type": "task_created",
            "timestamp": 12345.678,
            "board_id": 4,
            "data": {"id": 9, "title": "New", "column_id": 2, "position": 3, "created_by": "ana"}
        })
        .to_string();
        let event = decode(&frame).unwrap();
        assert_eq!(event.kind(), EventKind::TaskCreated);
        assert_eq!(event.board_id(), Some(4));
        match event {
            BoardEvent::TaskCreated(n) => {
                assert_eq!(n.id, 9);
                assert_eq!(n.actor, Some(json!("ana")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_payload_board_id_is_not_overridden() {
        let frame = json!({
            "type": "user_joined_board",
            "board_id": 4,
            "data": {"user_id": 1, "username": "bo", "board_id": 5}
        })
        .to_string();
        assert_eq!(decode(&frame).unwrap().board_id(), Some(5));
    }

    #[test]
    fn test_decode_comment() {
        let frame = json!({
            "type": "comment_created",
            "data": {"id": 1, "content": "hi", "task_id": 3, "author_id": 2, "author_name": "bo"}
        })
        .to_string();
        match decode(&frame).unwrap() {
            BoardEvent::CommentCreated(c) => {
                assert_eq!(c.task_id, 3);
                assert_eq!(c.author_name.as_deref(), Some("bo"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(decode("not json"), Err(EventDecodeError::Malformed(_))));
        assert!(decode(r#"{"type":"pong"}"#).unwrap_err().is_unknown_type());
        assert!(matches!(
            decode(r#"{"type":"task_deleted","data":{"title":"no id"}}"#),
            Err(EventDecodeError::Payload { kind: EventKind::TaskDeleted, .. })
        ));
        assert!(matches!(
            decode(r#"{"type":"connected","data":{}}"#),
            Err(EventDecodeError::LocalOnly { .. })
        ));
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_outbound_envelope_shape() {
        let env = PushEnvelope::outbound("cursor_move", json!({"x": 1}));
        let value: Value = serde_json::from_str(&env.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "cursor_move");
        assert_eq!(value["data"]["x"], 1);
        assert!(value["timestamp"].is_string());
        assert!(value.get("board_id").is_none());
    }
}
