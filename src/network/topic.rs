use crate::error::SyncError;
use crate::model::{Activity, ContentItem, GuessRecord, LeaderboardEntry, Participant, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named channels multiplexed over the session's transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// A new activity was pushed.
    Activity,
    /// Session status changed.
    Status,
    /// Full participant score snapshot.
    Leaderboard,
    /// The current content unit advanced.
    Content,
    /// Participant roster changed.
    Participants,
    /// Per-team guess broadcast (team challenge).
    Guess { team_id: String },
}

impl TopicKind {
    /// The wire destination for this topic within a session.
    pub fn path(&self, access_code: &str) -> String {
        match self {
            TopicKind::Activity => format!("/topic/session/{access_code}/activity"),
            TopicKind::Status => format!("/topic/session/{access_code}/status"),
            TopicKind::Leaderboard => format!("/topic/session/{access_code}/leaderboard"),
            TopicKind::Content => format!("/topic/session/{access_code}/content"),
            TopicKind::Participants => format!("/topic/session/{access_code}/participants"),
            TopicKind::Guess { team_id } => {
                format!("/topic/session/{access_code}/teamchallenge/guess/{team_id}")
            }
        }
    }
}

/// Frames the client sends over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Authenticate {
        access_code: String,
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume: Option<String>,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
}

/// Frames the server pushes: a topic identifier plus an entity body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub topic: String,
    pub body: Value,
}

/// Body of a `content` topic frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAdvance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_item: Option<ContentItem>,
}

/// Marker the server sets on content frames that carry an advancement.
pub const CONTENT_ADVANCED_MARKER: &str = "advanced_content";

/// A typed topic event, decoded once at the channel boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicEvent {
    Activity(Activity),
    Status(SessionStatus),
    Leaderboard(Vec<LeaderboardEntry>),
    Content(ContentAdvance),
    Participants(Vec<Participant>),
    Guess(GuessRecord),
    /// Synthetic event delivered to every subscriber when reconnect
    /// attempts are exhausted.
    SessionLost,
}

/// Decode a frame body for the given topic. `Ok(None)` means the frame is
/// well-formed but carries nothing for downstream consumers (e.g. a
/// content frame without the advancement marker).
pub fn decode_event(kind: &TopicKind, body: Value) -> Result<Option<TopicEvent>, SyncError> {
    let invalid = |e: serde_json::Error| SyncError::InvalidFrame {
        reason: e.to_string(),
    };

    let event = match kind {
        TopicKind::Activity => TopicEvent::Activity(serde_json::from_value(body).map_err(invalid)?),
        TopicKind::Status => TopicEvent::Status(serde_json::from_value(body).map_err(invalid)?),
        TopicKind::Leaderboard => {
            TopicEvent::Leaderboard(serde_json::from_value(body).map_err(invalid)?)
        }
        TopicKind::Participants => {
            TopicEvent::Participants(serde_json::from_value(body).map_err(invalid)?)
        }
        TopicKind::Guess { .. } => TopicEvent::Guess(serde_json::from_value(body).map_err(invalid)?),
        TopicKind::Content => {
            let advance: ContentAdvance = serde_json::from_value(body).map_err(invalid)?;
            match advance.status.as_deref() {
                Some(CONTENT_ADVANCED_MARKER) | None => TopicEvent::Content(advance),
                Some(_) => return Ok(None),
            }
        }
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frame_wire_shape() {
        let frame = ClientFrame::Subscribe {
            topic: TopicKind::Status.path("ABC123"),
        };
        let serialized = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            serialized,
            r#"{"type":"subscribe","topic":"/topic/session/ABC123/status"}"#
        );
    }

    #[test]
    fn guess_topic_is_per_team() {
        let kind = TopicKind::Guess {
            team_id: "t9".to_string(),
        };
        assert_eq!(
            kind.path("ABC123"),
            "/topic/session/ABC123/teamchallenge/guess/t9"
        );
    }

    #[test]
    fn status_body_is_a_bare_string() {
        let event = decode_event(&TopicKind::Status, json!("COMPLETED")).unwrap();
        assert_eq!(event, Some(TopicEvent::Status(SessionStatus::Completed)));
    }

    #[test]
    fn content_frame_without_marker_is_dropped() {
        let body = json!({"status": "something_else", "currentIndex": 3});
        assert_eq!(decode_event(&TopicKind::Content, body).unwrap(), None);

        let body = json!({"status": "advanced_content", "currentIndex": 3});
        match decode_event(&TopicKind::Content, body).unwrap() {
            Some(TopicEvent::Content(advance)) => assert_eq!(advance.current_index, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn malformed_body_is_an_invalid_frame() {
        let err = decode_event(&TopicKind::Leaderboard, json!({"not": "a list"})).unwrap_err();
        assert!(matches!(err, SyncError::InvalidFrame { .. }));
    }
}
