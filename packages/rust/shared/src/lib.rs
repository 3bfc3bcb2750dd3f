//! Shared types, error model, and configuration for PageLens.
//!
//! This crate is the foundation depended on by all other PageLens crates.
//! It provides:
//! - [`PageLensError`] and the per-stage error enums
//! - Domain types ([`Task`], [`PerUrlResult`], [`Analysis`], [`Comparison`], [`Progress`])
//! - The domain template registry ([`domains`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod domains;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, OpenRouterConfig, PipelineConfig, RunConfig,
    config_dir, config_file_path, expand_home, init_config, load_config, load_config_from,
    validate_api_key,
};
pub use domains::DomainTemplate;
pub use error::{
    AnalysisError, ComparisonError, ExtractionError, FailureKind, FetchError, PageLensError,
    QnaError, Result,
};
pub use types::{
    Analysis, Comparison, ComparisonRow, Confidence, ExtractedData, ExtractionRecommendations,
    NewTask, PerUrlResult, Progress, ProgressStage, QnaAnswer, ScheduleLink, SiteAssessment,
    SuccessfulPage, Task, TaskId, TaskStatus, UrlOutcome,
};
