//! Core domain types for PageLens tasks and their results.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

/// Extracted fields for one page, in the order they were produced.
pub type ExtractedData = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for task identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new time-sortable task identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// `true` once the orchestrator has finished with the task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Scheduling linkage. Owned by the external scheduler; the pipeline only carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLink {
    pub is_scheduled: bool,
    /// `once`, `daily` or `weekly`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<String>,
}

/// One scraping + analysis request spanning one or more URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// Target URLs. Order is significant and used as a stable index.
    pub urls: Vec<String>,
    pub instruction: String,
    /// Domain template key (e.g. `ecommerce`).
    pub domain: String,
    pub enable_comparison: bool,
    pub status: TaskStatus,
    #[serde(default)]
    pub results: Vec<PerUrlResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Dominant content language across successful pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub schedule: ScheduleLink,
    /// Store-managed write counter, bumped on every update.
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// Results whose pipeline succeeded, in URL order.
    pub fn successful_results(&self) -> impl Iterator<Item = SuccessfulPage<'_>> {
        self.results.iter().filter_map(PerUrlResult::as_success)
    }

    pub fn success_count(&self) -> usize {
        self.successful_results().count()
    }
}

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub urls: Vec<String>,
    pub instruction: String,
    pub domain: String,
    pub enable_comparison: bool,
    pub tags: BTreeSet<String>,
    pub schedule: ScheduleLink,
}

// ---------------------------------------------------------------------------
// PerUrlResult
// ---------------------------------------------------------------------------

/// Outcome of the pipeline for a single URL. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerUrlResult {
    pub url: String,
    #[serde(flatten)]
    pub outcome: UrlOutcome,
}

/// Success or failure payload of a [`PerUrlResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UrlOutcome {
    Success {
        extracted_data: ExtractedData,
        /// Absent when analysis generation failed; never fabricated.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analysis: Option<Analysis>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analysis_error: Option<String>,
        language: String,
    },
    Error {
        kind: FailureKind,
        error: String,
    },
}

/// Borrowed view of a successful result.
#[derive(Debug, Clone, Copy)]
pub struct SuccessfulPage<'a> {
    pub url: &'a str,
    pub extracted_data: &'a ExtractedData,
    pub analysis: Option<&'a Analysis>,
    pub language: &'a str,
}

impl PerUrlResult {
    pub fn success(
        url: impl Into<String>,
        extracted_data: ExtractedData,
        analysis: Option<Analysis>,
        analysis_error: Option<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            outcome: UrlOutcome::Success {
                extracted_data,
                analysis,
                analysis_error,
                language: language.into(),
            },
        }
    }

    pub fn failure(url: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outcome: UrlOutcome::Error {
                kind,
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UrlOutcome::Success { .. })
    }

    pub fn as_success(&self) -> Option<SuccessfulPage<'_>> {
        match &self.outcome {
            UrlOutcome::Success {
                extracted_data,
                analysis,
                language,
                ..
            } => Some(SuccessfulPage {
                url: &self.url,
                extracted_data,
                analysis: analysis.as_ref(),
                language,
            }),
            UrlOutcome::Error { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis / Comparison
// ---------------------------------------------------------------------------

/// Narrative analysis of a single page's extracted data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opportunities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    pub user_request_answer: String,
}

/// One metric row of the comparison table. `values` is keyed by URL in task order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub metric: String,
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Per-site assessment inside a comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteAssessment {
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub notable_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_for: Option<String>,
}

/// Which fields the compared sites share and which are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecommendations {
    #[serde(default)]
    pub common_fields: Vec<String>,
    #[serde(default)]
    pub unique_fields: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub best_practices: Vec<String>,
}

/// Cross-site synthesis. When generation failed only `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub similarities: Vec<String>,
    #[serde(default)]
    pub differences: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub user_request_answer: String,
    #[serde(default)]
    pub comparison_table: Vec<ComparisonRow>,
    /// Quick 0-10 score per URL.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub websites: BTreeMap<String, SiteAssessment>,
    #[serde(default)]
    pub extraction_recommendations: ExtractionRecommendations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Comparison {
    /// A comparison that records only a generation failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Pipeline stage reported in progress snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Fetching,
    Cleaning,
    Extracting,
    Analyzing,
    Comparing,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Cleaning => "cleaning",
            Self::Extracting => "extracting",
            Self::Analyzing => "analyzing",
            Self::Comparing => "comparing",
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pollable progress snapshot for a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// 1-based index of the furthest URL started.
    pub current: usize,
    pub total: usize,
    pub stage: ProgressStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<u64>,
}

// ---------------------------------------------------------------------------
// QnA
// ---------------------------------------------------------------------------

/// Confidence label attached to a grounded answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
    #[default]
    #[serde(rename = "n/a")]
    NotAvailable,
}

impl Confidence {
    /// Lenient parse of a model-provided label.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" | "med" => Self::Medium,
            "high" => Self::High,
            _ => Self::NotAvailable,
        }
    }
}

/// A grounded answer to a follow-up question. Not persisted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QnaAnswer {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub supporting_points: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrip() {
        let id = TaskId::new();
        let s = id.to_string();
        let parsed: TaskId = s.parse().expect("parse TaskId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn per_url_result_serializes_with_status_tag() {
        let mut data = ExtractedData::new();
        data.insert("title".into(), "Widget".into());
        let ok = PerUrlResult::success("https://a.example", data, None, None, "en");
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["url"], "https://a.example");
        assert_eq!(json["extracted_data"]["title"], "Widget");

        let err = PerUrlResult::failure("https://b.example", FailureKind::FetchTimeout, "timed out");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "fetch_timeout");

        let parsed: PerUrlResult = serde_json::from_value(json).unwrap();
        assert!(!parsed.is_success());
    }

    #[test]
    fn extracted_data_keeps_insertion_order() {
        let mut data = ExtractedData::new();
        data.insert("zeta".into(), 1.into());
        data.insert("alpha".into(), 2.into());
        let keys: Vec<&String> = data.keys().collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    #[test]
    fn confidence_labels() {
        assert_eq!(Confidence::from_label("HIGH"), Confidence::High);
        assert_eq!(Confidence::from_label("unsure"), Confidence::NotAvailable);
        assert_eq!(serde_json::to_string(&Confidence::NotAvailable).unwrap(), r#""n/a""#);
    }

    #[test]
    fn failed_comparison_only_has_error() {
        let c = Comparison::failed("model unavailable");
        assert_eq!(c.error.as_deref(), Some("model unavailable"));
        assert!(c.comparison_table.is_empty());
    }

    #[test]
    fn status_parse_and_terminal() {
        assert_eq!("completed".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
