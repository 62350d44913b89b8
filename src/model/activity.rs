use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Seconds a content unit runs when neither the item nor the activity
/// declares a duration.
pub const DEFAULT_UNIT_DURATION_SECS: u64 = 60;

/// The interaction kind of an activity. Determines the shape of its
/// content payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    MultipleChoice,
    TrueFalse,
    OpenEnded,
    FillInBlank,
    Sorting,
    Matching,
    MathProblem,
    TeamChallenge,
    #[serde(other)]
    Unknown,
}

/// Content payload, decoded once at the channel/gateway boundary into a
/// tagged variant instead of being shape-sniffed by every consumer.
///
/// The wire shapes tolerated are the ones the server actually emits: a
/// bare question array, a single question object, a `{"prompts": [...]}`
/// word list for the team challenge, and anything else as an opaque value.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPayload {
    Questions(Vec<Value>),
    Question(Value),
    Prompts(Vec<String>),
    Raw(Value),
}

impl ContentPayload {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => ContentPayload::Questions(items),
            Value::Object(map) => {
                if let Some(Value::Array(prompts)) = map.get("prompts") {
                    if prompts.iter().all(Value::is_string) {
                        let words = prompts
                            .iter()
                            .filter_map(|p| p.as_str().map(str::to_owned))
                            .collect();
                        return ContentPayload::Prompts(words);
                    }
                }
                ContentPayload::Question(Value::Object(map))
            }
            other => ContentPayload::Raw(other),
        }
    }

    /// The questions carried by this payload, regardless of wire shape.
    pub fn questions(&self) -> Vec<&Value> {
        match self {
            ContentPayload::Questions(items) => items.iter().collect(),
            ContentPayload::Question(value) => match value.get("questions") {
                Some(Value::Array(items)) => items.iter().collect(),
                _ => vec![value],
            },
            _ => Vec::new(),
        }
    }

    /// The drawing prompt at `index`, for team-challenge payloads. Falls
    /// back to the legacy `prompts[i].prompt` object shape.
    pub fn prompt_at(&self, index: usize) -> Option<&str> {
        match self {
            ContentPayload::Prompts(words) => words.get(index).map(String::as_str),
            ContentPayload::Question(value) | ContentPayload::Raw(value) => value
                .get("prompts")
                .and_then(|p| p.get(index))
                .and_then(|p| p.get("prompt"))
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

impl Serialize for ContentPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ContentPayload::Questions(items) => items.serialize(serializer),
            ContentPayload::Question(value) | ContentPayload::Raw(value) => {
                value.serialize(serializer)
            }
            ContentPayload::Prompts(words) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("prompts", words)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ContentPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(ContentPayload::from_value(value))
    }
}

impl JsonSchema for ContentPayload {
    fn schema_name() -> String {
        "ContentPayload".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        Value::json_schema(gen)
    }
}

/// One sub-question/unit within a multi-part activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub content_id: String,
    pub data: ContentPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// One quiz/game unit of a particular interaction kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// May be empty, in which case the activity itself is the content unit
    /// and `content` carries its payload directly.
    #[serde(default)]
    pub content_items: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u64>,
}

impl Activity {
    pub fn has_content_items(&self) -> bool {
        !self.content_items.is_empty()
    }

    pub fn content_item(&self, index: usize) -> Option<&ContentItem> {
        self.content_items.get(index)
    }

    /// Countdown length in seconds for the content unit at `index`:
    /// item override, then activity duration, then time limit, then the
    /// default.
    pub fn unit_duration(&self, index: usize) -> u64 {
        self.content_item(index)
            .and_then(|item| item.duration)
            .or(self.duration)
            .or(self.time_limit)
            .unwrap_or(DEFAULT_UNIT_DURATION_SECS)
    }

    /// The payload to present for the unit at `index`: the content item's
    /// data, or the activity's own content when it has no items.
    pub fn unit_payload(&self, index: usize) -> Option<&ContentPayload> {
        self.content_item(index)
            .map(|item| &item.data)
            .or(self.content.as_ref())
    }
}

/// Identity of the current content unit. Ordering within one activity
/// instance is by `index`; the index is monotonically non-decreasing until
/// the activity itself changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub activity_id: String,
    pub index: usize,
}

impl ContentKey {
    pub fn new(activity_id: impl Into<String>, index: usize) -> Self {
        Self {
            activity_id: activity_id.into(),
            index,
        }
    }
}

/// Convenience for tests and fixtures. Unrecognized kind strings map to
/// [`ActivityKind::Unknown`], matching the wire behavior.
pub fn parse_kind(raw: &str) -> ActivityKind {
    serde_json::from_value(Value::String(raw.to_string())).unwrap_or(ActivityKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(value: Value) -> Activity {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn kind_wire_strings() {
        assert_eq!(parse_kind("MULTIPLE_CHOICE"), ActivityKind::MultipleChoice);
        assert_eq!(parse_kind("TEAM_CHALLENGE"), ActivityKind::TeamChallenge);
        assert_eq!(parse_kind("SOMETHING_NEW"), ActivityKind::Unknown);
    }

    #[test]
    fn payload_classification_happens_once() {
        let questions = ContentPayload::from_value(json!([{"q": "1+1?"}]));
        assert!(matches!(questions, ContentPayload::Questions(_)));
        assert_eq!(questions.questions().len(), 1);

        let single = ContentPayload::from_value(json!({"q": "1+1?"}));
        assert!(matches!(single, ContentPayload::Question(_)));
        assert_eq!(single.questions().len(), 1);

        let wrapped = ContentPayload::from_value(json!({"questions": [{}, {}]}));
        assert_eq!(wrapped.questions().len(), 2);

        let prompts = ContentPayload::from_value(json!({"prompts": ["cat", "boat"]}));
        assert_eq!(prompts.prompt_at(1), Some("boat"));
    }

    #[test]
    fn legacy_prompt_shape_still_resolves() {
        let legacy = ContentPayload::from_value(json!({
            "prompts": [{"prompt": "house"}, {"prompt": "tree"}]
        }));
        assert_eq!(legacy.prompt_at(0), Some("house"));
    }

    #[test]
    fn unit_duration_fallback_chain() {
        let with_items = activity(json!({
            "id": "a1",
            "type": "MULTIPLE_CHOICE",
            "duration": 30,
            "contentItems": [
                {"contentId": "c0", "data": [], "duration": 15},
                {"contentId": "c1", "data": []}
            ]
        }));
        assert_eq!(with_items.unit_duration(0), 15);
        assert_eq!(with_items.unit_duration(1), 30);

        let bare = activity(json!({"id": "a2", "type": "TRUE_FALSE"}));
        assert_eq!(bare.unit_duration(0), DEFAULT_UNIT_DURATION_SECS);

        let time_limit = activity(json!({"id": "a3", "type": "SORTING", "timeLimit": 45}));
        assert_eq!(time_limit.unit_duration(0), 45);
    }

    #[test]
    fn activity_without_items_is_its_own_unit() {
        let act = activity(json!({
            "id": "a4",
            "type": "OPEN_ENDED",
            "content": {"question": "Why?"}
        }));
        assert!(!act.has_content_items());
        assert!(act.unit_payload(0).is_some());
    }
}
