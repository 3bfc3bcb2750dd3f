//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use pagelens_core::{ExportFormat, OpenRouterClient, Orchestrator, RerunOverrides, export};
use pagelens_fetcher::Fetcher;
use pagelens_shared::{
    AppConfig, NewTask, Progress, RunConfig, ScheduleLink, Task, TaskId, UrlOutcome, domains,
    expand_home, init_config, load_config, load_config_from,
};
use pagelens_storage::{Storage, TaskFilter};
use tokio::task::JoinHandle;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PageLens: scrape, extract, analyze and compare web pages.
#[derive(Parser)]
#[command(
    name = "pagelens",
    version,
    about = "Scrape web pages into structured data, AI analysis and side-by-side comparisons.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of the default location.
    #[arg(long, env = "PAGELENS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// OpenRouter model id, overriding the configured one.
    #[arg(long, env = "PAGELENS_MODEL", global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create a task and run it to completion.
    Submit {
        /// Target URLs, processed in the given order.
        #[arg(required = true)]
        urls: Vec<String>,

        /// What to extract and analyze.
        #[arg(short, long)]
        instruction: String,

        /// Domain template key (defaults to the configured domain).
        #[arg(short, long)]
        domain: Option<String>,

        /// Compare the successful pages once all URLs finish.
        #[arg(long)]
        compare: bool,

        /// Task name (defaults to the first URL's host).
        #[arg(short, long)]
        name: Option<String>,

        /// Tag to attach (repeatable).
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },

    /// Run an existing pending task.
    Run {
        /// Task ID.
        id: String,
    },

    /// Clear a task's results and run it again.
    Rerun {
        /// Task ID.
        id: String,

        /// Replace the URL list.
        #[arg(long = "url")]
        urls: Vec<String>,

        /// Replace the instruction.
        #[arg(short, long)]
        instruction: Option<String>,

        /// Replace the domain template key.
        #[arg(short, long)]
        domain: Option<String>,

        /// Replace the task name.
        #[arg(short, long)]
        name: Option<String>,

        /// Turn comparison on or off.
        #[arg(long)]
        compare: Option<bool>,
    },

    /// Show a task's status and per-URL outcomes.
    Show {
        /// Task ID.
        id: String,

        /// Print the full task as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the latest progress snapshot of a task.
    Progress {
        /// Task ID.
        id: String,
    },

    /// List tasks, newest first.
    List {
        /// Include archived tasks.
        #[arg(long)]
        all: bool,

        /// Only starred tasks.
        #[arg(long)]
        starred: bool,

        /// Maximum number of tasks to print.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Ask a follow-up question about a task's results.
    Ask {
        /// Task ID.
        id: String,

        /// The question.
        question: String,
    },

    /// Export a task's results.
    Export {
        /// Task ID.
        id: String,

        /// Output format: json, csv or txt.
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the available domain templates.
    Domains,

    /// Toggle a task's starred flag.
    Star {
        /// Task ID.
        id: String,
    },

    /// Toggle a task's archived flag.
    Archive {
        /// Task ID.
        id: String,
    },

    /// Replace a task's tags.
    Tag {
        /// Task ID.
        id: String,

        /// New tags (none clears them).
        tags: Vec<String>,
    },

    /// Delete one or more tasks.
    Delete {
        /// Task IDs.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` takes precedence.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pagelens=info",
        1 => "pagelens=debug",
        _ => "pagelens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let model = cli.model.as_deref();

    match cli.command {
        Command::Submit {
            urls,
            instruction,
            domain,
            compare,
            name,
            tags,
        } => {
            let new = NewTask {
                name: name.unwrap_or_default(),
                urls,
                domain: domain.unwrap_or_else(|| config.defaults.domain.clone()),
                instruction,
                enable_comparison: compare,
                tags: tags.into_iter().collect(),
                schedule: ScheduleLink::default(),
            };
            cmd_submit(&config, model, new).await
        }
        Command::Run { id } => cmd_run(&config, model, &parse_id(&id)?).await,
        Command::Rerun {
            id,
            urls,
            instruction,
            domain,
            name,
            compare,
        } => {
            let overrides = RerunOverrides {
                urls: (!urls.is_empty()).then_some(urls),
                instruction,
                domain,
                name,
                tags: None,
                enable_comparison: compare,
            };
            cmd_rerun(&config, model, &parse_id(&id)?, overrides).await
        }
        Command::Show { id, json } => cmd_show(&config, &parse_id(&id)?, json).await,
        Command::Progress { id } => cmd_progress(&config, &parse_id(&id)?).await,
        Command::List {
            all,
            starred,
            limit,
        } => {
            let filter = TaskFilter {
                include_archived: all,
                starred_only: starred,
                limit,
            };
            cmd_list(&config, &filter).await
        }
        Command::Ask { id, question } => {
            cmd_ask(&config, model, &parse_id(&id)?, &question).await
        }
        Command::Export { id, format, out } => {
            cmd_export(&config, &parse_id(&id)?, &format, out).await
        }
        Command::Domains => cmd_domains(),
        Command::Star { id } => cmd_star(&config, &parse_id(&id)?).await,
        Command::Archive { id } => cmd_archive(&config, &parse_id(&id)?).await,
        Command::Tag { id, tags } => cmd_tag(&config, &parse_id(&id)?, tags).await,
        Command::Delete { ids } => {
            let ids = ids.iter().map(|id| parse_id(id)).collect::<Result<Vec<_>>>()?;
            cmd_delete(&config, &ids).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn parse_id(raw: &str) -> Result<TaskId> {
    raw.trim()
        .parse()
        .map_err(|e| eyre!("invalid task id '{raw}': {e}"))
}

async fn open_store(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_home(&config.defaults.db_path);
    info!(path = %path.display(), "opening task store");
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Open the task store for commands that only read it.
async fn open_store_readonly(config: &AppConfig) -> Result<Storage> {
    let path = expand_home(&config.defaults.db_path);
    info!(path = %path.display(), "opening task store read-only");
    Ok(Storage::open_readonly(&path).await?)
}

/// Wire the store, the HTTP/browser fetcher and the OpenRouter model together.
async fn build_orchestrator(config: &AppConfig, model: Option<&str>) -> Result<Orchestrator> {
    let mut client = OpenRouterClient::from_config(config)?;
    if let Some(model) = model {
        client = client.with_model(model);
    }
    info!(model = client.model(), "using completion model");
    let fetcher = Fetcher::new(&config.fetch)?;
    let store = open_store(config).await?;
    Ok(Orchestrator::new(
        store,
        Arc::new(fetcher),
        Arc::new(client),
        RunConfig::from(config),
    ))
}

// ---------------------------------------------------------------------------
// Running tasks
// ---------------------------------------------------------------------------

async fn cmd_submit(config: &AppConfig, model: Option<&str>, new: NewTask) -> Result<()> {
    let orchestrator = build_orchestrator(config, model).await?;
    let task = orchestrator.create_task(new).await?;
    info!(task_id = %task.id, urls = task.urls.len(), domain = %task.domain, "task created");
    println!("Task {} created ({} URLs)", task.id, task.urls.len());

    let handle = orchestrator.dispatch(&task.id);
    let task = watch(&orchestrator, &task.id, handle).await?;
    print_summary(&task);
    Ok(())
}

async fn cmd_run(config: &AppConfig, model: Option<&str>, id: &TaskId) -> Result<()> {
    let orchestrator = build_orchestrator(config, model).await?;
    let handle = orchestrator.dispatch(id);
    let task = watch(&orchestrator, id, handle).await?;
    print_summary(&task);
    Ok(())
}

async fn cmd_rerun(
    config: &AppConfig,
    model: Option<&str>,
    id: &TaskId,
    overrides: RerunOverrides,
) -> Result<()> {
    let orchestrator = build_orchestrator(config, model).await?;
    let handle = {
        let orchestrator = orchestrator.clone();
        let id = id.clone();
        tokio::spawn(async move { orchestrator.rerun(&id, overrides).await })
    };
    let task = watch(&orchestrator, id, handle).await?;
    print_summary(&task);
    Ok(())
}

/// Poll the task's progress into a spinner until the run finishes.
async fn watch(
    orchestrator: &Orchestrator,
    id: &TaskId,
    mut handle: JoinHandle<pagelens_shared::Result<Task>>,
) -> Result<Task> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid progress template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Queued");

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            joined = &mut handle => {
                spinner.finish_and_clear();
                let task = joined.map_err(|e| eyre!("task worker stopped: {e}"))??;
                return Ok(task);
            }
            _ = poll.tick() => {
                if let Some(progress) = orchestrator.progress().read(id).await {
                    spinner.set_message(render_progress(&progress));
                }
            }
        }
    }
}

fn render_progress(progress: &Progress) -> String {
    let mut line = format!(
        "[{}/{}] {}",
        progress.current, progress.total, progress.message
    );
    if let Some(secs) = progress.estimated_seconds_remaining {
        line.push_str(&format!(" (~{secs}s left)"));
    }
    line
}

fn print_summary(task: &Task) {
    println!();
    println!("  Task:     {}", task.id);
    println!("  Name:     {}", task.name);
    println!("  Status:   {}", task.status);
    println!("  Domain:   {}", task.domain);
    if let Some(lang) = &task.language {
        println!("  Language: {lang}");
    }
    println!(
        "  Results:  {}/{} succeeded",
        task.success_count(),
        task.results.len()
    );
    for result in &task.results {
        match &result.outcome {
            UrlOutcome::Success { analysis, .. } => {
                let summary = analysis.as_ref().map(|a| a.summary.as_str()).unwrap_or("-");
                println!("    ok    {}  {summary}", result.url);
            }
            UrlOutcome::Error { kind, error } => {
                println!("    fail  {}  {kind}: {error}", result.url);
            }
        }
    }
    if let Some(comparison) = &task.comparison {
        match &comparison.error {
            Some(err) => println!("  Comparison unavailable: {err}"),
            None => {
                println!("  Comparison: {}", comparison.summary);
                for (url, score) in &comparison.scores {
                    println!("    {score:>4.1}/10  {url}");
                }
                if !comparison.recommendation.is_empty() {
                    println!("  Recommendation: {}", comparison.recommendation);
                }
            }
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Reading tasks
// ---------------------------------------------------------------------------

async fn cmd_show(config: &AppConfig, id: &TaskId, json: bool) -> Result<()> {
    let store = open_store_readonly(config).await?;
    let task = store.require_task(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_summary(&task);
    }
    Ok(())
}

async fn cmd_progress(config: &AppConfig, id: &TaskId) -> Result<()> {
    let store = open_store_readonly(config).await?;
    let task = store.require_task(id).await?;
    println!("{}", progress_line(&task));
    Ok(())
}

fn progress_line(task: &Task) -> String {
    match &task.progress {
        _ if task.status.is_terminal() => format!("Task {} finished ({})", task.id, task.status),
        Some(progress) => render_progress(progress),
        None => format!("Task {} is {} (no run in progress)", task.id, task.status),
    }
}

async fn cmd_list(config: &AppConfig, filter: &TaskFilter) -> Result<()> {
    let store = open_store_readonly(config).await?;
    let tasks = store.list_tasks(filter).await?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for task in &tasks {
        let star = if task.starred { "*" } else { " " };
        let tags = if task.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", task.tags.iter().cloned().collect::<Vec<_>>().join(", "))
        };
        println!(
            "{}  {star} {:<10}  {}  ({} URLs){tags}",
            task.id,
            task.status.as_str(),
            task.name,
            task.urls.len()
        );
    }
    Ok(())
}

async fn cmd_ask(
    config: &AppConfig,
    model: Option<&str>,
    id: &TaskId,
    question: &str,
) -> Result<()> {
    let orchestrator = build_orchestrator(config, model).await?;
    let answer = orchestrator.ask(id, question).await?;
    println!("{}", answer.answer);
    if !answer.supporting_points.is_empty() {
        println!();
        for point in &answer.supporting_points {
            println!("  - {point}");
        }
    }
    println!();
    println!("Confidence: {}", confidence_label(&answer));
    Ok(())
}

fn confidence_label(answer: &pagelens_shared::QnaAnswer) -> String {
    serde_json::to_value(answer.confidence)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "n/a".into())
}

async fn cmd_export(
    config: &AppConfig,
    id: &TaskId,
    format: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let store = open_store_readonly(config).await?;
    let task = store.require_task(id).await?;
    let body = export(&task, format)?;

    match out {
        Some(path) => {
            std::fs::write(&path, body)
                .map_err(|e| eyre!("failed to write {}: {e}", path.display()))?;
            println!("Exported {} to {}", task.id, path.display());
        }
        None => print!("{body}"),
    }
    Ok(())
}

fn cmd_domains() -> Result<()> {
    for template in domains::all() {
        println!("{:<14} {}", template.key, template.name);
        println!("{:<14} fields: {}", "", template.field_list());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Organizing tasks
// ---------------------------------------------------------------------------

async fn cmd_star(config: &AppConfig, id: &TaskId) -> Result<()> {
    let store = open_store(config).await?;
    let starred = store.toggle_star(id).await?;
    println!("Task {id} {}", if starred { "starred" } else { "unstarred" });
    Ok(())
}

async fn cmd_archive(config: &AppConfig, id: &TaskId) -> Result<()> {
    let store = open_store(config).await?;
    let archived = store.toggle_archive(id).await?;
    println!("Task {id} {}", if archived { "archived" } else { "restored" });
    Ok(())
}

async fn cmd_tag(config: &AppConfig, id: &TaskId, tags: Vec<String>) -> Result<()> {
    let tags = clean_tags(tags);
    let store = open_store(config).await?;
    store.set_tags(id, tags.clone()).await?;
    if tags.is_empty() {
        println!("Task {id}: tags cleared");
    } else {
        let joined: Vec<String> = tags.into_iter().collect();
        println!("Task {id}: tags = {}", joined.join(", "));
    }
    Ok(())
}

fn clean_tags(tags: Vec<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

async fn cmd_delete(config: &AppConfig, ids: &[TaskId]) -> Result<()> {
    let store = open_store(config).await?;
    let mut missing = Vec::new();
    for id in ids {
        if store.delete_task(id).await? {
            println!("Task {id} deleted");
        } else {
            println!("Task {id} not found");
            missing.push(id.to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(eyre!("{} of {} tasks not found: {}", missing.len(), ids.len(), missing.join(", ")))
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pagelens_shared::{ProgressStage, TaskStatus};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn submit_parses_repeated_flags() {
        let cli = Cli::try_parse_from([
            "pagelens",
            "submit",
            "https://a.example",
            "https://b.example",
            "-i",
            "prices",
            "--compare",
            "-t",
            "shop",
            "-t",
            "q3",
        ])
        .unwrap();
        match cli.command {
            Command::Submit {
                urls,
                compare,
                tags,
                domain,
                ..
            } => {
                assert_eq!(urls.len(), 2);
                assert!(compare);
                assert_eq!(tags, ["shop", "q3"]);
                assert!(domain.is_none());
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn bad_task_id_is_rejected() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = TaskId::new();
        assert_eq!(parse_id(&format!(" {id} ")).unwrap(), id);
    }

    #[test]
    fn progress_line_includes_estimate() {
        let progress = Progress {
            current: 2,
            total: 3,
            stage: ProgressStage::Analyzing,
            message: "Analyzing https://b.example...".into(),
            current_url: Some("https://b.example".into()),
            estimated_seconds_remaining: Some(12),
        };
        assert_eq!(
            render_progress(&progress),
            "[2/3] Analyzing https://b.example... (~12s left)"
        );
    }

    #[test]
    fn delete_takes_several_ids() {
        let a = TaskId::new();
        let b = TaskId::new();
        let cli = Cli::try_parse_from(["pagelens", "delete", &a.to_string(), &b.to_string()])
            .unwrap();
        match cli.command {
            Command::Delete { ids } => assert_eq!(ids, [a.to_string(), b.to_string()]),
            _ => panic!("expected delete"),
        }
        assert!(Cli::try_parse_from(["pagelens", "delete"]).is_err());
    }

    #[test]
    fn model_flag_is_global() {
        let cli = Cli::try_parse_from(["pagelens", "list", "--model", "openai/gpt-4o-mini"]).unwrap();
        assert_eq!(cli.model.as_deref(), Some("openai/gpt-4o-mini"));
    }

    #[test]
    fn finished_task_progress_reports_status() {
        let mut task: Task = serde_json::from_value(serde_json::json!({
            "id": TaskId::new(),
            "name": "t",
            "urls": ["https://a.example"],
            "instruction": "title",
            "domain": "general",
            "enable_comparison": false,
            "status": "processing",
            "created_at": "2026-10-18T09:00:00Z"
        }))
        .unwrap();
        task.progress = Some(Progress {
            current: 1,
            total: 1,
            stage: ProgressStage::Analyzing,
            message: "Analyzing https://a.example...".into(),
            current_url: Some("https://a.example".into()),
            estimated_seconds_remaining: Some(0),
        });
        assert!(progress_line(&task).starts_with("[1/1] Analyzing"));

        task.status = TaskStatus::Completed;
        assert_eq!(progress_line(&task), format!("Task {} finished (completed)", task.id));
    }

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = clean_tags(vec![" a ".into(), "".into(), "a".into(), "b".into()]);
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), ["a", "b"]);
    }
}
