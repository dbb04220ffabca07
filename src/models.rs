use serde::{Deserialize, Serialize};

/// One clarifying question produced by the backend's research phase.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Question {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub required: bool,
    pub options: Option<Vec<String>>,
}

/// A wizard answer. The backend accepts free text, a selection of options
/// or a yes/no flag depending on the question.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Text(String),
    Multi(Vec<String>),
}

impl AnswerValue {
    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().is_empty(),
            AnswerValue::Multi(v) => v.is_empty(),
            AnswerValue::Flag(_) => false,
        }
    }
}

/// Knowledge-base fact sheet consumed as context during generation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Card {
    pub id: String,
    pub card_type: String,
    pub title: String,
    #[serde(default)]
    pub content: serde_json::Value,
    pub created_at: Option<String>,
}

/// Payload for creating or updating a card.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewCard {
    pub card_type: String,
    pub title: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Named generation configuration attached to a pack.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Brief {
    pub id: String,
    pub pack_id: Option<String>,
    pub name: String,
    pub objective: Option<String>,
    pub audience: Option<String>,
    pub tone: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Reusable multi-agent pipeline definition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Pack {
    pub id: String,
    pub name: String,
    pub content_type: Option<String>,
    #[serde(default)]
    pub agents: Vec<PackAgent>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PackAgent {
    pub name: String,
    pub role: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// A persisted generation output with its review metadata.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ArchiveItem {
    pub id: String,
    pub brief_id: Option<String>,
    pub topic: Option<String>,
    #[serde(default)]
    pub status: String,
    pub content: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Approved,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReviewRequest {
    pub status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_reference: Option<bool>,
}
