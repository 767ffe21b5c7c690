use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Author of a message in the conversation log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text typed by the person using the assistant.
    User,
    /// Text produced by the assistant, grown incrementally while streaming.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Classified purpose of a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Monthly sales report.
    Sales,
    /// User growth report.
    UserGrowth,
    /// Income and expense overview.
    Finance,
    /// No recognized keyword; answered with the demo narrative.
    Demo,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Sales => "sales",
            Intent::UserGrowth => "user_growth",
            Intent::Finance => "finance",
            Intent::Demo => "demo",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Smallest piece of text delivered per streaming tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitGranularity {
    /// One Unicode scalar value per tick.
    #[default]
    Char,
    /// One extended grapheme cluster per tick (keeps combining marks and emoji sequences whole).
    Grapheme,
}

impl std::str::FromStr for UnitGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "char" => Ok(UnitGranularity::Char),
            "grapheme" => Ok(UnitGranularity::Grapheme),
            other => Err(format!("unknown granularity '{}' (expected char or grapheme)", other)),
        }
    }
}

/// What happens to a streaming cycle's messages when it is cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Remove the cycle's user message and placeholder; the log returns to its
    /// pre-submission state.
    #[default]
    Discard,
    /// Freeze the placeholder with whatever text had been delivered.
    KeepPartial,
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Identifier of one streaming cycle, allocated in increasing order by the
/// conversation store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId(pub u64);

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unix timestamp in seconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }
}

// =============================================================================
// Conversation
// =============================================================================

/// One entry of the conversation log.
///
/// The log is append-only and its index is the entry's position; `id` is only
/// a stable key for renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Immutable snapshot of the conversation handed to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub is_streaming: bool,
    /// The cycle currently growing the last message, if any.
    pub active_cycle: Option<CycleId>,
}

impl ConversationState {
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

// =============================================================================
// Reports
// =============================================================================

/// One point of a report series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Structured data driving the side-panel chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub title: String,
    pub series: Vec<SeriesPoint>,
    /// Short findings shown under the chart.
    #[serde(default)]
    pub insights: Vec<String>,
}

impl ReportPayload {
    /// Largest absolute value in the series; `0.0` when it is empty.
    pub fn max_magnitude(&self) -> f64 {
        self.series
            .iter()
            .map(|p| p.value.abs())
            .fold(0.0_f64, f64::max)
    }
}

/// Outcome of classifying a query: the text to stream and an optional report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub response_text: String,
    pub report: Option<ReportPayload>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");

        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!("char".parse::<UnitGranularity>(), Ok(UnitGranularity::Char));
        assert_eq!(
            " Grapheme ".parse::<UnitGranularity>(),
            Ok(UnitGranularity::Grapheme)
        );
        assert!("word".parse::<UnitGranularity>().is_err());
    }

    #[test]
    fn test_cancel_policy_default_is_discard() {
        assert_eq!(CancelPolicy::default(), CancelPolicy::Discard);
        let json = serde_json::to_string(&CancelPolicy::KeepPartial).unwrap();
        assert_eq!(json, "\"keep_partial\"");
    }

    #[test]
    fn test_cycle_id_display_and_order() {
        assert_eq!(CycleId(7).to_string(), "#7");
        assert!(CycleId(1) < CycleId(2));
    }

    #[test]
    fn test_message_constructors() {
        let m = Message::user("hi");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hi");
        assert!(!m.id.is_nil());

        let a = Message::assistant("");
        assert_eq!(a.role, Role::Assistant);
        assert!(a.content.is_empty());
        assert_ne!(m.id, a.id);
    }

    #[test]
    fn test_conversation_state_default() {
        let state = ConversationState::default();
        assert!(state.messages.is_empty());
        assert!(!state.is_streaming);
        assert!(state.active_cycle.is_none());
        assert!(state.last_message().is_none());
    }

    #[test]
    fn test_report_max_magnitude() {
        let report = ReportPayload {
            title: "t".into(),
            series: vec![
                SeriesPoint::new("a", 2.0),
                SeriesPoint::new("b", -9.5),
                SeriesPoint::new("c", 4.0),
            ],
            insights: vec![],
        };
        assert_eq!(report.max_magnitude(), 9.5);

        let empty = ReportPayload {
            title: "t".into(),
            series: vec![],
            insights: vec![],
        };
        assert_eq!(empty.max_magnitude(), 0.0);
    }

    #[test]
    fn test_report_insights_default_on_deserialize() {
        let json = r#"{"title":"x","series":[{"label":"1月","value":4000.0}]}"#;
        let report: ReportPayload = serde_json::from_str(json).unwrap();
        assert_eq!(report.series[0].label, "1月");
        assert!(report.insights.is_empty());
    }
}
