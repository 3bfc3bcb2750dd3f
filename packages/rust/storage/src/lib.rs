//! libSQL storage layer for PageLens tasks (offline mode).
//!
//! The [`Storage`] struct wraps a local libSQL database holding one row per
//! task. Writes are column-scoped ([`TaskUpdate`]) and serialized per task id,
//! so a progress write and a finalization write for the same task can never
//! interleave or overwrite each other. Every write bumps the row's `version`.
//!
//! **Access rules:**
//! - Orchestrator and CLI: read-write via [`Storage::open`]
//! - Inspection tools: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Value, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use pagelens_shared::{
    Comparison, NewTask, PageLensError, PerUrlResult, Progress, Result, ScheduleLink, Task, TaskId,
    TaskStatus,
};

/// Column list shared by every task SELECT, in [`row_to_task`] order.
const TASK_COLUMNS: &str = "id, name, urls_json, instruction, domain, enable_comparison, status, \
     results_json, comparison_json, progress_json, tags_json, starred, archived, language, \
     created_at, completed_at, version, schedule_json";

// ---------------------------------------------------------------------------
// TaskUpdate
// ---------------------------------------------------------------------------

/// A partial, column-scoped update. `None` leaves the column untouched; for
/// nullable columns `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub urls: Option<Vec<String>>,
    pub instruction: Option<String>,
    pub domain: Option<String>,
    pub enable_comparison: Option<bool>,
    pub status: Option<TaskStatus>,
    pub results: Option<Vec<PerUrlResult>>,
    pub comparison: Option<Option<Comparison>>,
    pub progress: Option<Option<Progress>>,
    pub tags: Option<BTreeSet<String>>,
    pub starred: Option<bool>,
    pub archived: Option<bool>,
    pub language: Option<Option<String>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: Option<Progress>) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// `(column, value)` pairs for every field that is set.
    fn assignments(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut out: Vec<(&'static str, Value)> = Vec::new();

        if let Some(name) = &self.name {
            out.push(("name", Value::Text(name.clone())));
        }
        if let Some(urls) = &self.urls {
            out.push(("urls_json", Value::Text(to_json(urls)?)));
        }
        if let Some(instruction) = &self.instruction {
            out.push(("instruction", Value::Text(instruction.clone())));
        }
        if let Some(domain) = &self.domain {
            out.push(("domain", Value::Text(domain.clone())));
        }
        if let Some(flag) = self.enable_comparison {
            out.push(("enable_comparison", Value::Integer(flag as i64)));
        }
        if let Some(status) = self.status {
            out.push(("status", Value::Text(status.as_str().to_string())));
        }
        if let Some(results) = &self.results {
            out.push(("results_json", Value::Text(to_json(results)?)));
        }
        if let Some(comparison) = &self.comparison {
            out.push(("comparison_json", optional_json(comparison.as_ref())?));
        }
        if let Some(progress) = &self.progress {
            out.push(("progress_json", optional_json(progress.as_ref())?));
        }
        if let Some(tags) = &self.tags {
            out.push(("tags_json", Value::Text(to_json(tags)?)));
        }
        if let Some(flag) = self.starred {
            out.push(("starred", Value::Integer(flag as i64)));
        }
        if let Some(flag) = self.archived {
            out.push(("archived", Value::Integer(flag as i64)));
        }
        if let Some(language) = &self.language {
            out.push((
                "language",
                language.clone().map(Value::Text).unwrap_or(Value::Null),
            ));
        }
        if let Some(completed_at) = &self.completed_at {
            out.push((
                "completed_at",
                completed_at
                    .map(|ts| Value::Text(ts.to_rfc3339()))
                    .unwrap_or(Value::Null),
            ));
        }

        Ok(out)
    }
}

/// Listing filter. Archived tasks are hidden unless asked for.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub include_archived: bool,
    pub starred_only: bool,
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// One async lock per task id; every write for that id goes through it.
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PageLensError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            locks: StdMutex::new(HashMap::new()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PageLensError::Storage(format!(
                "no task database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            locks: StdMutex::new(HashMap::new()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PageLensError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PageLensError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    fn task_lock(&self, id: &TaskId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(id.to_string()).or_default().clone()
    }

    // -----------------------------------------------------------------------
    // Task operations
    // -----------------------------------------------------------------------

    /// Insert a new task in `pending` state.
    pub async fn create_task(&self, new: NewTask) -> Result<Task> {
        self.check_writable()?;

        let task = Task {
            id: TaskId::new(),
            name: new.name,
            urls: new.urls,
            instruction: new.instruction,
            domain: new.domain,
            enable_comparison: new.enable_comparison,
            status: TaskStatus::Pending,
            results: Vec::new(),
            comparison: None,
            progress: None,
            tags: new.tags,
            starred: false,
            archived: false,
            created_at: Utc::now(),
            completed_at: None,
            language: None,
            schedule: new.schedule,
            version: 0,
        };

        self.conn
            .execute(
                "INSERT INTO tasks (id, name, urls_json, instruction, domain, enable_comparison,
                                    status, tags_json, created_at, schedule_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    task.id.to_string(),
                    task.name.as_str(),
                    to_json(&task.urls)?,
                    task.instruction.as_str(),
                    task.domain.as_str(),
                    task.enable_comparison as i64,
                    task.status.as_str(),
                    to_json(&task.tags)?,
                    task.created_at.to_rfc3339(),
                    to_json(&task.schedule)?,
                ],
            )
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        debug!(task_id = %task.id, urls = task.urls.len(), "task created");
        Ok(task)
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(PageLensError::Storage(e.to_string())),
        }
    }

    /// Like [`Storage::get_task`], but a missing task is an error.
    pub async fn require_task(&self, id: &TaskId) -> Result<Task> {
        self.get_task(id)
            .await?
            .ok_or_else(|| PageLensError::TaskNotFound(id.to_string()))
    }

    /// List tasks, newest first.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1");
        if !filter.include_archived {
            sql.push_str(" AND archived = 0");
        }
        if filter.starred_only {
            sql.push_str(" AND starred = 1");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    /// Apply a partial update and bump `version`. Returns the new version.
    pub async fn update_task(&self, id: &TaskId, update: TaskUpdate) -> Result<u64> {
        self.check_writable()?;
        let lock = self.task_lock(id);
        let _guard = lock.lock().await;
        self.apply_update(id, &update).await
    }

    /// Reset a task for a re-run in a single statement: clear results,
    /// progress, comparison, language and completion time, set `pending`,
    /// and apply any `overrides` alongside.
    pub async fn reset_for_rerun(&self, id: &TaskId, overrides: TaskUpdate) -> Result<u64> {
        self.check_writable()?;
        let update = TaskUpdate {
            status: Some(TaskStatus::Pending),
            results: Some(Vec::new()),
            comparison: Some(None),
            progress: Some(None),
            language: Some(None),
            completed_at: Some(None),
            ..overrides
        };

        let lock = self.task_lock(id);
        let _guard = lock.lock().await;
        self.apply_update(id, &update).await
    }

    /// Replace a task's tags.
    pub async fn set_tags(&self, id: &TaskId, tags: BTreeSet<String>) -> Result<u64> {
        self.update_task(
            id,
            TaskUpdate {
                tags: Some(tags),
                ..Default::default()
            },
        )
        .await
    }

    /// Flip the starred flag. Returns the new value.
    pub async fn toggle_star(&self, id: &TaskId) -> Result<bool> {
        self.toggle_flag(id, "starred").await
    }

    /// Flip the archived flag. Returns the new value.
    pub async fn toggle_archive(&self, id: &TaskId) -> Result<bool> {
        self.toggle_flag(id, "archived").await
    }

    async fn toggle_flag(&self, id: &TaskId, column: &'static str) -> Result<bool> {
        self.check_writable()?;
        let lock = self.task_lock(id);
        let _guard = lock.lock().await;

        let mut rows = self
            .conn
            .query(
                &format!(
                    "UPDATE tasks SET {column} = 1 - {column}, version = version + 1
                     WHERE id = ?1 RETURNING {column}"
                ),
                params![id.to_string()],
            )
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| PageLensError::Storage(e.to_string()))?
                != 0),
            Ok(None) => Err(PageLensError::TaskNotFound(id.to_string())),
            Err(e) => Err(PageLensError::Storage(e.to_string())),
        }
    }

    /// Delete a task. Returns whether a row was removed.
    pub async fn delete_task(&self, id: &TaskId) -> Result<bool> {
        self.check_writable()?;
        let lock = self.task_lock(id);
        let _guard = lock.lock().await;

        let affected = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id.to_string());

        Ok(affected > 0)
    }

    /// Build and run one `UPDATE ... RETURNING version`. Caller holds the task lock.
    async fn apply_update(&self, id: &TaskId, update: &TaskUpdate) -> Result<u64> {
        let assignments = update.assignments()?;

        let mut set_clauses: Vec<String> = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect();
        set_clauses.push("version = version + 1".into());

        let sql = format!(
            "UPDATE tasks SET {} WHERE id = ?{} RETURNING version",
            set_clauses.join(", "),
            assignments.len() + 1
        );

        let mut values: Vec<Value> = assignments.into_iter().map(|(_, v)| v).collect();
        values.push(Value::Text(id.to_string()));

        let mut rows = self
            .conn
            .query(&sql, values)
            .await
            .map_err(|e| PageLensError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let version = row
                    .get::<i64>(0)
                    .map_err(|e| PageLensError::Storage(e.to_string()))?;
                Ok(version as u64)
            }
            Ok(None) => Err(PageLensError::TaskNotFound(id.to_string())),
            Err(e) => Err(PageLensError::Storage(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PageLensError::Storage(format!("encode: {e}")))
}

fn optional_json<T: Serialize>(value: Option<&T>) -> Result<Value> {
    Ok(match value {
        Some(v) => Value::Text(to_json(v)?),
        None => Value::Null,
    })
}

fn from_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| PageLensError::Storage(format!("invalid {column} column: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PageLensError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Task`].
fn row_to_task(row: &libsql::Row) -> Result<Task> {
    let text = |idx: i32| -> Result<String> {
        row.get::<String>(idx)
            .map_err(|e| PageLensError::Storage(e.to_string()))
    };
    let flag = |idx: i32| -> Result<bool> {
        row.get::<i64>(idx)
            .map(|v| v != 0)
            .map_err(|e| PageLensError::Storage(e.to_string()))
    };

    let id: TaskId = text(0)?
        .parse()
        .map_err(|e| PageLensError::Storage(format!("invalid task id: {e}")))?;
    let status: TaskStatus = text(6)?.parse().map_err(PageLensError::Storage)?;

    let comparison = match row.get::<String>(8).ok() {
        Some(raw) => Some(from_json::<Comparison>("comparison_json", &raw)?),
        None => None,
    };
    let progress = match row.get::<String>(9).ok() {
        Some(raw) => Some(from_json::<Progress>("progress_json", &raw)?),
        None => None,
    };
    let completed_at = match row.get::<String>(15).ok() {
        Some(raw) => Some(parse_timestamp(&raw)?),
        None => None,
    };
    let schedule = match row.get::<String>(17).ok() {
        Some(raw) => from_json::<ScheduleLink>("schedule_json", &raw)?,
        None => ScheduleLink::default(),
    };

    Ok(Task {
        id,
        name: text(1)?,
        urls: from_json("urls_json", &text(2)?)?,
        instruction: text(3)?,
        domain: text(4)?,
        enable_comparison: flag(5)?,
        status,
        results: from_json("results_json", &text(7)?)?,
        comparison,
        progress,
        tags: from_json("tags_json", &text(10)?)?,
        starred: flag(11)?,
        archived: flag(12)?,
        language: row.get::<String>(13).ok(),
        created_at: parse_timestamp(&text(14)?)?,
        completed_at,
        version: row
            .get::<i64>(16)
            .map_err(|e| PageLensError::Storage(e.to_string()))? as u64,
        schedule,
    })
}
