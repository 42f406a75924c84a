//! Core data models.
//!
//! These types represent the documents, search results, chat payloads, and
//! guided-process structures that flow through the retrieval and guidance
//! pipelines. Wire-facing types serialize in camelCase to match the JSON
//! consumed by the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user assigned to a document, with their scoped role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub email: String,
    pub role: String,
}

/// A stored process document, or one chunk of an oversized document.
///
/// A document is either a standalone embeddable unit, a parent whose
/// content lives in child chunks (`chunk_count` set, no embedding), or a
/// chunk (`is_chunk` with `parent_id`/`chunk_index`). Every document
/// belongs to exactly one tenant.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub assigned_to: Vec<Assignee>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub is_chunk: bool,
    pub parent_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub chunk_count: Option<i64>,
}

/// Input for indexing a document. With an `id` the existing document is
/// updated in place; without one a fresh id is assigned.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    #[serde(default)]
    pub id: Option<String>,
    pub tenant_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assigned_to: Vec<Assignee>,
}

/// Which retrieval strategy produced a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTier {
    ExactTitle,
    TagMatch,
    Vector,
}

/// A ranked search result. Transient, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub relevance_score: f64,
    #[serde(rename = "searchTier")]
    pub tier: SearchTier,
    pub created_at: DateTime<Utc>,
}

/// A source citation attached to a generated answer: the document id,
/// title, a short content preview, tags, and the retrieval score.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub relevance_score: f64,
}

/// One prior conversation turn supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTurn {
    pub is_user: bool,
    pub message: String,
}

/// Incoming chat request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    #[serde(default = "default_true")]
    pub use_guided_mode: bool,
    #[serde(default)]
    pub use_streaming: bool,
}

fn default_role() -> String {
    "viewer".to_string()
}

fn default_true() -> bool {
    true
}

/// Outgoing chat response, covering both plain answers and guided replies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<Source>,
    pub guided_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<ProcessStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_title: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub step_completed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub completed: bool,
}

impl ChatResponse {
    /// A plain (non-guided) answer with sources.
    pub fn answer(text: String, sources: Vec<Source>) -> Self {
        ChatResponse {
            response: text,
            sources,
            guided_mode: false,
            progress: None,
            current_step: None,
            process_title: None,
            step_completed: false,
            completed: false,
        }
    }

    /// A guided-mode reply carrying progress and the step in focus.
    pub fn guided(text: String, progress: Progress, current_step: ProcessStep) -> Self {
        ChatResponse {
            response: text,
            sources: Vec::new(),
            guided_mode: true,
            progress: Some(progress),
            current_step: Some(current_step),
            process_title: None,
            step_completed: false,
            completed: false,
        }
    }
}

/// Progress snapshot for a guided session. `current_step` is 1-based.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_step: usize,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub progress_percentage: u32,
}

/// One atomic step of a decomposed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStep {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub checkpoints: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tips: Option<String>,
}

/// A document decomposed into an ordered, guidable process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDefinition {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    pub steps: Vec<ProcessStep>,
}

/// Whether a persisted chat turn came from the user or the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    User,
    Ai,
}

impl TurnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnKind::User => "user",
            TurnKind::Ai => "ai",
        }
    }
}

/// A chat turn to persist alongside the conversation.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub tenant_id: String,
    pub user_id: String,
    pub kind: TurnKind,
    pub message: String,
    pub sources: Vec<Source>,
    pub guided_mode: bool,
}

/// Optional filters for the advanced-search entry point.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedSearchOptions {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub include_chunks: bool,
    #[serde(default = "default_advanced_limit")]
    pub limit: usize,
}

impl Default for AdvancedSearchOptions {
    fn default() -> Self {
        AdvancedSearchOptions {
            tags: Vec::new(),
            date_range: None,
            content_type: None,
            min_score: default_min_score(),
            include_chunks: false,
            limit: default_advanced_limit(),
        }
    }
}

fn default_min_score() -> f64 {
    0.7
}

fn default_advanced_limit() -> usize {
    10
}

/// Inclusive creation-date window for advanced search.
#[derive(Debug, Clone, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
