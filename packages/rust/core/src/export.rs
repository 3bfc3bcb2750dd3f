//! Task result export: JSON, CSV and plain-text report.

use std::fmt::Write as _;
use std::str::FromStr;

use serde_json::{Value, json};

use pagelens_shared::{PageLensError, PerUrlResult, Result, Task, UrlOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Txt,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Txt => "txt",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = PageLensError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "txt" | "text" => Ok(Self::Txt),
            other => Err(PageLensError::validation(format!(
                "unknown export format {other:?} (expected json, csv or txt)"
            ))),
        }
    }
}

/// Render a task in the requested format.
pub fn export(task: &Task, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => to_json(task),
        ExportFormat::Csv => Ok(to_csv(task)),
        ExportFormat::Txt => Ok(to_txt(task)),
    }
}

fn to_json(task: &Task) -> Result<String> {
    let doc = json!({
        "task_id": task.id,
        "name": task.name,
        "instruction": task.instruction,
        "domain": task.domain,
        "status": task.status.as_str(),
        "language": task.language,
        "created_at": task.created_at,
        "completed_at": task.completed_at,
        "results": task.results,
        "comparison": task.comparison,
    });
    serde_json::to_string_pretty(&doc)
        .map_err(|e| PageLensError::Conversion(format!("JSON export failed: {e}")))
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// One row per leaf value: `url,status,field,value`. Nested data is flattened
/// to dotted paths with `[i]` list indices.
fn to_csv(task: &Task) -> String {
    let mut out = String::from("url,status,field,value\r\n");
    for result in &task.results {
        let mut rows: Vec<(String, String)> = Vec::new();
        match &result.outcome {
            UrlOutcome::Success {
                extracted_data,
                analysis,
                analysis_error,
                ..
            } => {
                for (key, value) in extracted_data {
                    flatten(key, value, &mut rows);
                }
                if let Some(analysis) = analysis {
                    if let Ok(value) = serde_json::to_value(analysis) {
                        flatten("analysis", &value, &mut rows);
                    }
                }
                if let Some(err) = analysis_error {
                    rows.push(("analysis_error".into(), err.clone()));
                }
            }
            UrlOutcome::Error { kind, error } => {
                rows.push(("error_kind".into(), kind.to_string()));
                rows.push(("error".into(), error.clone()));
            }
        }

        let status = status_label(result);
        for (field, value) in rows {
            let _ = write!(
                out,
                "{},{},{},{}\r\n",
                csv_field(&result.url),
                status,
                csv_field(&field),
                csv_field(&value)
            );
        }
    }
    out
}

fn flatten(path: &str, value: &Value, rows: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&format!("{path}.{key}"), child, rows);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten(&format!("{path}[{i}]"), child, rows);
            }
        }
        Value::Null => rows.push((path.to_string(), String::new())),
        Value::String(s) => rows.push((path.to_string(), s.clone())),
        other => rows.push((path.to_string(), other.to_string())),
    }
}

/// Quote per RFC 4180 when the field contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn status_label(result: &PerUrlResult) -> &'static str {
    if result.is_success() { "success" } else { "error" }
}

// ---------------------------------------------------------------------------
// TXT
// ---------------------------------------------------------------------------

fn to_txt(task: &Task) -> String {
    let mut out = String::new();
    let rule = "=".repeat(72);

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "PageLens report: {}", task.name);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Task:        {}", task.id);
    let _ = writeln!(out, "Status:      {}", task.status);
    let _ = writeln!(out, "Domain:      {}", task.domain);
    let _ = writeln!(out, "Instruction: {}", task.instruction);
    if let Some(lang) = &task.language {
        let _ = writeln!(out, "Language:    {lang}");
    }
    let _ = writeln!(out, "Created:     {}", task.created_at.to_rfc3339());
    if let Some(done) = task.completed_at {
        let _ = writeln!(out, "Completed:   {}", done.to_rfc3339());
    }

    for (i, result) in task.results.iter().enumerate() {
        let _ = writeln!(out, "\n[{}] {} ({})", i + 1, result.url, status_label(result));
        match &result.outcome {
            UrlOutcome::Success {
                extracted_data,
                analysis,
                analysis_error,
                ..
            } => {
                if let Some(a) = analysis {
                    let _ = writeln!(out, "Summary: {}", a.summary);
                    let _ = writeln!(out, "Answer:  {}", a.user_request_answer);
                    write_list(&mut out, "Key points", &a.key_points);
                    write_list(&mut out, "Insights", &a.insights);
                    write_list(&mut out, "Opportunities", &a.opportunities);
                    write_list(&mut out, "Risks", &a.risks);
                    write_list(&mut out, "Next steps", &a.next_steps);
                }
                if let Some(err) = analysis_error {
                    let _ = writeln!(out, "Analysis unavailable: {err}");
                }
                let data = serde_json::to_string_pretty(extracted_data).unwrap_or_default();
                let _ = writeln!(out, "Extracted data:\n{data}");
            }
            UrlOutcome::Error { kind, error } => {
                let _ = writeln!(out, "Error ({kind}): {error}");
            }
        }
    }

    if let Some(c) = &task.comparison {
        let _ = writeln!(out, "\n{rule}\nComparison\n{rule}");
        match &c.error {
            Some(err) => {
                let _ = writeln!(out, "Comparison unavailable: {err}");
            }
            None => {
                let _ = writeln!(out, "Summary: {}", c.summary);
                let _ = writeln!(out, "Answer:  {}", c.user_request_answer);
                write_list(&mut out, "Similarities", &c.similarities);
                write_list(&mut out, "Differences", &c.differences);
                if !c.comparison_table.is_empty() {
                    let _ = writeln!(out, "Table:");
                    for row in &c.comparison_table {
                        let cells: Vec<String> = row
                            .values
                            .iter()
                            .map(|(url, v)| match v {
                                Value::String(s) => format!("{url}: {s}"),
                                other => format!("{url}: {other}"),
                            })
                            .collect();
                        let _ = writeln!(out, "  {}: {}", row.metric, cells.join(" | "));
                    }
                }
                for (url, score) in &c.scores {
                    let _ = writeln!(out, "Score {url}: {score:.1}/10");
                }
                let _ = writeln!(out, "Recommendation: {}", c.recommendation);
            }
        }
    }
    out
}

fn write_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title}:");
    for item in items {
        let _ = writeln!(out, "  - {item}");
    }
}
