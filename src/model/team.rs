use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque participant identifier, normalized to a string.
///
/// The collaborators are not consistent about whether ids travel as JSON
/// strings or numbers; both deserialize to the same normalized form so
/// role derivation can compare them directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, JsonSchema)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id.to_string())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(UserId(s)),
            Value::Number(n) => Ok(UserId(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number user id, got {other}"
            ))),
        }
    }
}

/// The two roles of the team-challenge activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Drawer,
    Guesser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Authoritative team snapshot. Server-owned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_drawer_id: Option<UserId>,
    #[serde(default)]
    pub score: i64,
}

impl Team {
    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.iter().any(|m| &m.user_id == user)
    }

    pub fn role_of(&self, user: &UserId) -> TeamRole {
        if self.current_drawer_id.as_ref() == Some(user) {
            TeamRole::Drawer
        } else {
            TeamRole::Guesser
        }
    }
}

/// Challenge round lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeState {
    #[default]
    Waiting,
    Active,
    Completed,
}

/// One guess, as broadcast on the per-team guess topic and accumulated in
/// the round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuessRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    pub guess: String,
    #[serde(default)]
    pub correct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRound {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub guesses: Vec<GuessRecord>,
    /// Reference to the drawer's current drawing artifact, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_drawing: Option<String>,
}

/// Snapshot of the whole team challenge, polled and reconciled against
/// pushes. Replaced wholesale on change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeStatus {
    #[serde(default)]
    pub status: ChallengeState,
    #[serde(default)]
    pub current_prompt_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<ChallengeRound>,
    /// Authoritative team snapshots embedded in the status.
    #[serde(default)]
    pub team_info: Vec<Team>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u64>,
}

/// The team-list endpoint answers either a bare array or a wrapped
/// `{"teams": [...]}` object; normalize here, once.
pub fn parse_team_list(value: Value) -> Vec<Team> {
    let raw = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove("teams") {
            Some(teams) => teams,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    serde_json::from_value(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_id_tolerates_numeric_wire_form() {
        let from_number: UserId = serde_json::from_value(json!(42)).unwrap();
        let from_string: UserId = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number, UserId::from(42u64));
    }

    #[test]
    fn drawer_role_uses_normalized_ids() {
        let team: Team = serde_json::from_value(json!({
            "id": "t1",
            "teamName": "Red",
            "members": [{"userId": 42, "displayName": "Ada"}, {"userId": "7"}],
            "currentDrawerId": "42"
        }))
        .unwrap();

        let me = UserId::from(42u64);
        assert!(team.has_member(&me));
        assert_eq!(team.role_of(&me), TeamRole::Drawer);
        assert_eq!(team.role_of(&UserId::from("7")), TeamRole::Guesser);
    }

    #[test]
    fn team_list_accepts_both_wire_shapes() {
        let wrapped = parse_team_list(json!({"teams": [{"id": "t1"}]}));
        assert_eq!(wrapped.len(), 1);

        let bare = parse_team_list(json!([{"id": "t1"}, {"id": "t2"}]));
        assert_eq!(bare.len(), 2);

        assert!(parse_team_list(json!("bogus")).is_empty());
    }

    #[test]
    fn challenge_status_defaults_to_waiting() {
        let status: ChallengeStatus = serde_json::from_value(json!({})).unwrap();
        assert_eq!(status.status, ChallengeState::Waiting);
        assert!(status.team_info.is_empty());
    }
}
