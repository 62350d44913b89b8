use crate::model::activity::Activity;
use crate::model::team::UserId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a hosted session, as pushed on the `status` topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Lobby,
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }
}

/// One participant of a session. Server-owned; the client holds a
/// read-only cached copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<i64>,
}

fn default_active() -> bool {
    true
}

/// A full participant-score snapshot, as pushed on the `leaderboard` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub score: i64,
}

/// Read-only cached copy of the server-owned session object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_code: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Reference to an activity within the session's ordered plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRef {
    pub activity_id: String,
}

/// The authoritative current-session/content snapshot returned by the REST
/// collaborator. Applied wholesale, never field-merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_activity: Option<Activity>,
    #[serde(default)]
    pub current_activity_index: usize,
    #[serde(default)]
    pub current_content_index: usize,
    #[serde(default)]
    pub activities: Vec<ActivityRef>,
}

/// Payload for submitting an answer to the current content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub activity_id: String,
    /// `"legacy"` when the activity carries its content directly instead
    /// of through content items.
    pub content_id: String,
    pub content_index: usize,
    pub answer: Value,
}

/// Server verdict on a submitted answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_earned: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmissionResult {
    /// A submission rejected before grading (e.g. out-of-sequence index).
    pub fn is_rejected(&self) -> bool {
        self.valid == Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_form_is_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Completed).unwrap(),
            r#""COMPLETED""#
        );
        let parsed: SessionStatus = serde_json::from_str(r#""LOBBY""#).unwrap();
        assert_eq!(parsed, SessionStatus::Lobby);
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let snapshot: GameSnapshot = serde_json::from_str(r#"{"title":"Quiz Night"}"#).unwrap();
        assert_eq!(snapshot.title.as_deref(), Some("Quiz Night"));
        assert!(snapshot.current_activity.is_none());
        assert_eq!(snapshot.current_content_index, 0);
    }

    #[test]
    fn leaderboard_entry_parses_numeric_user_id() {
        let entry: LeaderboardEntry =
            serde_json::from_str(r#"{"userId":42,"displayName":"Ada","score":10}"#).unwrap();
        assert_eq!(entry.user_id.as_str(), "42");
    }
}
