//! Task Orchestrator: drives a task from `pending` to a terminal status.
//!
//! Within a task, each URL runs fetch → normalize → extract → analyze under a
//! per-URL deadline, with at most `url_concurrency` URLs in flight. A URL
//! failure becomes an error result and never stops its siblings. Across
//! tasks, [`Orchestrator::dispatch`] queues work on a global pool of
//! `task_concurrency` workers.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, error, info, instrument, warn};

use pagelens_fetcher::{PageSource, normalize_target};
use pagelens_normalize::{NormalizeOptions, normalize};
use pagelens_shared::{
    AnalysisError, Comparison, DomainTemplate, ExtractionError, FailureKind, FetchError, NewTask,
    PageLensError, PerUrlResult, ProgressStage, QnaAnswer, Result, RunConfig, SuccessfulPage,
    Task, TaskId, TaskStatus, domains,
};
use pagelens_storage::{Storage, TaskUpdate};

use crate::analysis::analyze;
use crate::comparison::compare;
use crate::extraction::extract;
use crate::model::CompletionModel;
use crate::progress::ProgressTracker;
use crate::qna;

/// Fields a re-run may change before the task starts over.
#[derive(Debug, Clone, Default)]
pub struct RerunOverrides {
    pub urls: Option<Vec<String>>,
    pub instruction: Option<String>,
    pub domain: Option<String>,
    pub name: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub enable_comparison: Option<bool>,
}

impl RerunOverrides {
    fn into_update(self) -> Result<TaskUpdate> {
        let urls = match self.urls {
            Some(urls) => Some(validate_urls(urls)?),
            None => None,
        };
        Ok(TaskUpdate {
            urls,
            instruction: self.instruction,
            domain: self.domain.map(|d| domains::resolve_key(&d)),
            name: self.name,
            tags: self.tags,
            enable_comparison: self.enable_comparison,
            ..Default::default()
        })
    }
}

/// Runs tasks against a store, a page source and a completion model.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<Storage>,
    source: Arc<dyn PageSource>,
    model: Arc<dyn CompletionModel>,
    progress: ProgressTracker,
    config: RunConfig,
    workers: Arc<Semaphore>,
    running: StdMutex<HashSet<TaskId>>,
}

/// Marks a task as owned by this process until dropped.
struct RunClaim {
    inner: Arc<Inner>,
    task_id: TaskId,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.inner
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.task_id);
        self.inner.progress.finish(&self.task_id);
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<Storage>,
        source: Arc<dyn PageSource>,
        model: Arc<dyn CompletionModel>,
        config: RunConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.task_concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                progress: ProgressTracker::new(store.clone()),
                store,
                source,
                model,
                config,
                workers,
                running: StdMutex::new(HashSet::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<Storage> {
        &self.inner.store
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.inner.progress
    }

    /// Validate and insert a new `pending` task.
    pub async fn create_task(&self, mut new: NewTask) -> Result<Task> {
        new.urls = validate_urls(new.urls)?;
        new.domain = domains::resolve_key(&new.domain);
        if new.name.trim().is_empty() {
            new.name = default_name(&new.urls);
        }
        self.inner.store.create_task(new).await
    }

    /// Process a task to completion. This is the scheduler's entry point.
    ///
    /// A task that already ran (or was left `processing` by a crashed
    /// process) is reset in one write first, so its old output is never
    /// visible next to the new run's.
    pub async fn run(&self, task_id: &TaskId) -> Result<Task> {
        let claim = self.claim(task_id)?;
        let task = self.inner.store.require_task(task_id).await?;
        if task.status != TaskStatus::Pending {
            self.inner
                .store
                .reset_for_rerun(task_id, TaskUpdate::default())
                .await?;
            info!(task_id = %task_id, previous = task.status.as_str(), "task reset for scheduled run");
        }
        self.execute(claim).await
    }

    /// Reset results, progress and comparison in one write, apply
    /// `overrides`, then run the task again.
    pub async fn rerun(&self, task_id: &TaskId, overrides: RerunOverrides) -> Result<Task> {
        let update = overrides.into_update()?;
        let claim = self.claim(task_id)?;
        self.inner.store.reset_for_rerun(task_id, update).await?;
        info!(task_id = %task_id, "task reset for re-run");
        self.execute(claim).await
    }

    /// Queue a run on the global worker pool.
    pub fn dispatch(&self, task_id: &TaskId) -> JoinHandle<Result<Task>> {
        let this = self.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            let _permit = this
                .inner
                .workers
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PageLensError::validation("worker pool is closed"))?;
            let outcome = this.run(&task_id).await;
            if let Err(e) = &outcome {
                error!(task_id = %task_id, error = %e, "dispatched task failed");
            }
            outcome
        })
    }

    /// Answer a follow-up question from a task's stored results.
    pub async fn ask(&self, task_id: &TaskId, question: &str) -> Result<QnaAnswer> {
        let task = self.inner.store.require_task(task_id).await?;
        Ok(qna::ask(self.inner.model.as_ref(), &task, question).await?)
    }

    fn claim(&self, task_id: &TaskId) -> Result<RunClaim> {
        let mut running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if !running.insert(task_id.clone()) {
            return Err(PageLensError::validation(format!(
                "task {task_id} is already running"
            )));
        }
        Ok(RunClaim {
            inner: self.inner.clone(),
            task_id: task_id.clone(),
        })
    }

    #[instrument(skip_all, fields(task_id = %claim.task_id))]
    async fn execute(&self, claim: RunClaim) -> Result<Task> {
        let task_id = claim.task_id.clone();
        let outcome = self.drive(&task_id).await;
        if let Err(e) = &outcome {
            error!(error = %e, "task aborted");
            self.abandon(&task_id).await;
        }
        drop(claim);
        outcome?;
        self.inner.store.require_task(&task_id).await
    }

    async fn drive(&self, task_id: &TaskId) -> Result<()> {
        let inner = &self.inner;
        let started = Instant::now();

        let task = inner.store.require_task(task_id).await?;
        let template = domains::lookup(&task.domain);
        info!(urls = task.urls.len(), domain = template.key, "task started");

        inner
            .store
            .update_task(task_id, TaskUpdate::status(TaskStatus::Processing))
            .await?;

        let results = self.process_urls(&task, template).await;
        inner
            .store
            .update_task(
                task_id,
                TaskUpdate {
                    results: Some(results.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let pages: Vec<SuccessfulPage<'_>> =
            results.iter().filter_map(PerUrlResult::as_success).collect();
        let comparison = if task.enable_comparison && pages.len() >= 2 {
            Some(self.run_comparison(&task, &pages, template).await)
        } else {
            None
        };

        let status = if pages.is_empty() {
            TaskStatus::Error
        } else {
            TaskStatus::Completed
        };
        let language = primary_language(&results);

        inner
            .store
            .update_task(
                task_id,
                TaskUpdate {
                    status: Some(status),
                    comparison: Some(comparison),
                    progress: Some(None),
                    language: Some(language),
                    completed_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            status = status.as_str(),
            succeeded = pages.len(),
            failed = results.len() - pages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "task finished"
        );
        Ok(())
    }

    /// Best-effort final write for a run that hit an infrastructure error,
    /// so the task does not stay `processing` with a stale snapshot.
    async fn abandon(&self, task_id: &TaskId) {
        let update = TaskUpdate {
            status: Some(TaskStatus::Error),
            progress: Some(None),
            completed_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        if let Err(e) = self.inner.store.update_task(task_id, update).await {
            warn!(error = %e, "could not mark aborted task as failed");
        }
    }

    async fn run_comparison(
        &self,
        task: &Task,
        pages: &[SuccessfulPage<'_>],
        template: &DomainTemplate,
    ) -> Comparison {
        let total = task.urls.len();
        self.inner
            .progress
            .advance(&task.id, ProgressStage::Comparing, None, total, total)
            .await;

        match compare(self.inner.model.as_ref(), pages, &task.instruction, template).await {
            Ok(comparison) => comparison,
            Err(e) => {
                warn!(error = %e, "comparison failed, keeping per-URL results");
                Comparison::failed(e.to_string())
            }
        }
    }

    /// Run every URL pipeline and return results in URL order.
    async fn process_urls(&self, task: &Task, template: &'static DomainTemplate) -> Vec<PerUrlResult> {
        let limit = Arc::new(Semaphore::new(self.inner.config.url_concurrency.max(1)));
        let instruction: Arc<str> = Arc::from(task.instruction.as_str());
        let total = task.urls.len();

        let handles: Vec<(String, JoinHandle<PerUrlResult>)> = task
            .urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let inner = self.inner.clone();
                let limit = limit.clone();
                let instruction = instruction.clone();
                let task_id = task.id.clone();
                let job_url = url.clone();
                let handle = tokio::spawn(async move {
                    let _permit = limit.acquire_owned().await.ok();
                    let job = UrlJob {
                        task_id: &task_id,
                        url: &job_url,
                        index: i + 1,
                        total,
                        instruction: &instruction,
                        template,
                    };
                    inner.process_url(&job).await
                });
                (url.clone(), handle)
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        for (url, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(url = %url, error = %e, "url pipeline aborted");
                    results.push(PerUrlResult::failure(
                        url,
                        FailureKind::FetchUnreachable,
                        format!("page unreachable: pipeline aborted ({e})"),
                    ));
                }
            }
        }
        results
    }
}

/// One URL's slot in a running task.
struct UrlJob<'a> {
    task_id: &'a TaskId,
    url: &'a str,
    /// 1-based position in the task's URL list.
    index: usize,
    total: usize,
    instruction: &'a str,
    template: &'a DomainTemplate,
}

impl Inner {
    /// One URL under its deadline. Always yields a terminal result.
    async fn process_url(&self, job: &UrlJob<'_>) -> PerUrlResult {
        let deadline = tokio::time::Instant::now() + self.config.url_timeout;
        let result = self.url_pipeline(job, deadline).await;
        self.progress.url_finished(job.task_id).await;
        result
    }

    async fn advance(&self, job: &UrlJob<'_>, stage: ProgressStage) {
        self.progress
            .advance(job.task_id, stage, Some(job.url), job.index, job.total)
            .await;
    }

    /// Every awaited stage shares the URL's deadline; running out of time
    /// is reported against the stage that was in flight.
    async fn url_pipeline(&self, job: &UrlJob<'_>, deadline: tokio::time::Instant) -> PerUrlResult {
        let url = job.url;
        let budget_secs = self.config.url_timeout.as_secs();

        self.advance(job, ProgressStage::Fetching).await;
        let raw = match timeout_at(deadline, self.source.fetch(url, self.config.fetch_timeout)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(url = %url, kind = %e.kind(), error = %e, "fetch failed");
                return PerUrlResult::failure(url, e.kind(), e.to_string());
            }
            Err(_) => {
                let err = FetchError::Timeout(format!(
                    "{url} did not respond within the {budget_secs}s page deadline"
                ));
                warn!(url = %url, error = %err, "page deadline hit while fetching");
                return PerUrlResult::failure(url, err.kind(), err.to_string());
            }
        };

        self.advance(job, ProgressStage::Cleaning).await;
        let options = NormalizeOptions {
            max_chars: self.config.max_content_chars,
            ..Default::default()
        };
        let page = match normalize(&raw, &options) {
            Ok(page) => page,
            Err(e) => {
                let err = ExtractionError::Empty(format!("could not read {url}: {e}"));
                warn!(url = %url, error = %err, "normalization failed");
                return PerUrlResult::failure(url, err.kind(), err.to_string());
            }
        };

        self.advance(job, ProgressStage::Extracting).await;
        let extraction = extract(self.model.as_ref(), &page, job.instruction, job.template, url);
        let data = match timeout_at(deadline, extraction).await {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                warn!(url = %url, kind = %e.kind(), error = %e, "extraction failed");
                return PerUrlResult::failure(url, e.kind(), e.to_string());
            }
            Err(_) => {
                let err = ExtractionError::ServiceUnavailable(format!(
                    "extraction for {url} did not finish within the {budget_secs}s page deadline"
                ));
                warn!(url = %url, error = %err, "page deadline hit while extracting");
                return PerUrlResult::failure(url, err.kind(), err.to_string());
            }
        };

        self.advance(job, ProgressStage::Analyzing).await;
        let analysis = analyze(self.model.as_ref(), &data, job.instruction, job.template, &page.language);
        let outcome = match timeout_at(deadline, analysis).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AnalysisError::ServiceUnavailable(format!(
                "analysis did not finish within the {budget_secs}s page deadline"
            ))),
        };
        let (analysis, analysis_error) = match outcome {
            Ok(analysis) => (Some(analysis), None),
            Err(e) => {
                warn!(url = %url, error = %e, "analysis unavailable");
                (None, Some(e.to_string()))
            }
        };

        PerUrlResult::success(url, data, analysis, analysis_error, page.language)
    }
}

/// Trim, drop blanks and repeats, and check that every URL is fetchable.
///
/// Results and comparison columns are keyed by URL, so two entries that
/// resolve to the same target keep only the first.
fn validate_urls(urls: Vec<String>) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(urls.len());
    for url in urls {
        let url = url.trim();
        if url.is_empty() {
            continue;
        }
        let target = normalize_target(url)
            .map_err(|e| PageLensError::validation(format!("invalid URL {url:?}: {e}")))?;
        if seen.insert(target.to_string()) {
            kept.push(url.to_string());
        } else {
            debug!(url, "dropping repeated URL");
        }
    }
    if kept.is_empty() {
        return Err(PageLensError::validation("at least one URL is required"));
    }
    Ok(kept)
}

fn default_name(urls: &[String]) -> String {
    let first = urls
        .first()
        .and_then(|u| normalize_target(u).ok())
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "task".into());
    match urls.len() {
        1 => first,
        n => format!("{first} +{}", n - 1),
    }
}

/// Most frequent language among successful results; ties go to the first seen.
fn primary_language(results: &[PerUrlResult]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for page in results.iter().filter_map(PerUrlResult::as_success) {
        match counts.iter_mut().find(|(lang, _)| *lang == page.language) {
            Some((_, n)) => *n += 1,
            None => counts.push((page.language, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (lang, n) in counts {
        if best.is_none_or(|(_, top)| n > top) {
            best = Some((lang, n));
        }
    }
    best.map(|(lang, _)| lang.to_string())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::model::{CompletionRequest, ModelError};
    use pagelens_fetcher::RawPage;
    use pagelens_shared::{ExtractedData, Progress, ScheduleLink};

    struct Offline;

    #[async_trait]
    impl PageSource for Offline {
        async fn fetch(
            &self,
            url: &str,
            _timeout: std::time::Duration,
        ) -> std::result::Result<RawPage, FetchError> {
            Err(FetchError::Unreachable(url.to_string()))
        }
    }

    #[async_trait]
    impl CompletionModel for Offline {
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<String, ModelError> {
            Err(ModelError::Transport("offline".into()))
        }
    }

    async fn offline_orchestrator() -> Orchestrator {
        let tmp = std::env::temp_dir().join(format!("pagelens_orch_{}.db", Uuid::now_v7()));
        let store = Arc::new(Storage::open(&tmp).await.unwrap());
        Orchestrator::new(store, Arc::new(Offline), Arc::new(Offline), RunConfig::default())
    }

    fn ok(url: &str, lang: &str) -> PerUrlResult {
        PerUrlResult::success(url, ExtractedData::new(), None, None, lang)
    }

    #[test]
    fn primary_language_is_most_frequent() {
        let results = [
            ok("https://a.example", "de"),
            ok("https://b.example", "en"),
            PerUrlResult::failure("https://c.example", FailureKind::FetchBlocked, "403"),
            ok("https://d.example", "en"),
        ];
        assert_eq!(primary_language(&results).as_deref(), Some("en"));
    }

    #[test]
    fn primary_language_tie_keeps_first_and_none_without_successes() {
        let results = [ok("https://a.example", "fr"), ok("https://b.example", "es")];
        assert_eq!(primary_language(&results).as_deref(), Some("fr"));

        let failed = [PerUrlResult::failure(
            "https://a.example",
            FailureKind::FetchTimeout,
            "slow",
        )];
        assert_eq!(primary_language(&failed), None);
    }

    #[test]
    fn validate_urls_trims_and_rejects() {
        let urls = validate_urls(vec![
            "  https://a.example/x ".into(),
            "".into(),
            "b.example".into(),
        ])
        .unwrap();
        assert_eq!(urls, ["https://a.example/x", "b.example"]);

        assert!(validate_urls(vec!["   ".into()]).is_err());
        assert!(validate_urls(vec!["http://".into()]).is_err());
    }

    #[test]
    fn validate_urls_drops_repeats() {
        let urls = validate_urls(vec![
            "https://a.example/x".into(),
            "b.example".into(),
            " https://a.example/x".into(),
            "https://b.example".into(),
        ])
        .unwrap();
        assert_eq!(urls, ["https://a.example/x", "b.example"]);
    }

    #[test]
    fn default_names() {
        assert_eq!(default_name(&["https://shop.example/a".into()]), "shop.example");
        assert_eq!(
            default_name(&["shop.example".into(), "https://b.example".into()]),
            "shop.example +1"
        );
    }

    #[test]
    fn rerun_overrides_resolve_domain() {
        let update = RerunOverrides {
            domain: Some("Unknown-Domain".into()),
            instruction: Some("new".into()),
            ..Default::default()
        }
        .into_update()
        .unwrap();
        assert_eq!(update.domain.as_deref(), Some("general"));
        assert_eq!(update.instruction.as_deref(), Some("new"));
        assert!(update.results.is_none());

        let err = RerunOverrides {
            urls: Some(vec![]),
            ..Default::default()
        }
        .into_update()
        .unwrap_err();
        assert!(err.to_string().contains("at least one URL"));
    }

    #[tokio::test]
    async fn abandon_marks_task_failed_and_clears_progress() {
        let orch = offline_orchestrator().await;
        let task = orch
            .create_task(NewTask {
                name: String::new(),
                urls: vec!["https://a.example".into()],
                instruction: "price".into(),
                domain: "ecommerce".into(),
                enable_comparison: false,
                tags: BTreeSet::new(),
                schedule: ScheduleLink::default(),
            })
            .await
            .unwrap();
        orch.store()
            .update_task(
                &task.id,
                TaskUpdate {
                    status: Some(TaskStatus::Processing),
                    progress: Some(Some(Progress {
                        current: 1,
                        total: 1,
                        stage: ProgressStage::Extracting,
                        message: "Extracting data from https://a.example...".into(),
                        current_url: Some("https://a.example".into()),
                        estimated_seconds_remaining: None,
                    })),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        orch.abandon(&task.id).await;

        let stored = orch.store().require_task(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Error);
        assert!(stored.progress.is_none());
        assert!(stored.completed_at.is_some());
    }
}
