//! Core pipeline and domain logic for PageLens.
//!
//! This crate ties fetching, normalization and the model-backed stages
//! (extraction, analysis, comparison, QnA) into the task orchestrator, and
//! provides progress tracking and result export.

pub mod analysis;
pub mod comparison;
pub mod export;
pub mod extraction;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod qna;
pub mod reply;

pub use export::{ExportFormat, export};
pub use model::{CompletionModel, CompletionRequest, ModelError, OpenRouterClient, Purpose};
pub use orchestrator::{Orchestrator, RerunOverrides};
pub use progress::ProgressTracker;
