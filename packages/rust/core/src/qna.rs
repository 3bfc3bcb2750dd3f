//! QnA Engine: grounded answers over a task's stored results.
//!
//! Only persisted extracted data, analysis and comparison are sent to the
//! model; source pages are never re-fetched. Exchanges are not stored.

use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use pagelens_shared::{
    Confidence, DomainTemplate, QnaAnswer, QnaError, SuccessfulPage, Task, domains,
};

use crate::comparison::host_of;
use crate::model::{CompletionModel, CompletionRequest, ModelError, Purpose};
use crate::reply::{bounded_data, parse_json_object, string_field, string_list};

/// Total serialized context budget, split evenly across sites.
const CONTEXT_BUDGET_CHARS: usize = 8_000;

/// Answer `question` using only the task's stored results.
#[instrument(skip_all, fields(task_id = %task.id))]
pub async fn ask(
    model: &dyn CompletionModel,
    task: &Task,
    question: &str,
) -> Result<QnaAnswer, QnaError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(QnaError::EmptyQuestion);
    }

    let pages: Vec<SuccessfulPage<'_>> = task.successful_results().collect();
    if pages.is_empty() {
        return Err(QnaError::NoData);
    }

    let template = domains::lookup(&task.domain);
    let prompt = build_prompt(task, &pages, question, template);
    let request = CompletionRequest::new(Purpose::Qna, prompt).with_temperature(0.3);

    let reply = model.complete(&request).await.map_err(|e| {
        warn!(error = %e, "qna call failed");
        match e {
            ModelError::EmptyResponse => QnaError::MalformedResponse(e.to_string()),
            e => QnaError::ServiceUnavailable(e.to_string()),
        }
    })?;

    let map = parse_json_object(&reply).map_err(QnaError::MalformedResponse)?;
    let answer = string_field(&map, "answer");
    if answer.is_empty() {
        return Err(QnaError::MalformedResponse(
            "reply has no answer".into(),
        ));
    }

    let sources: Vec<&str> = pages.iter().map(|p| p.url).collect();
    let supporting_points = string_list(&map, "supporting_points")
        .into_iter()
        .map(|point| link_sources(&point, &sources))
        .collect();
    let confidence = Confidence::from_label(&string_field(&map, "confidence"));

    debug!(confidence = ?confidence, "question answered");
    Ok(QnaAnswer {
        question: question.to_string(),
        answer,
        supporting_points,
        confidence,
    })
}

fn build_prompt(
    task: &Task,
    pages: &[SuccessfulPage<'_>],
    question: &str,
    template: &DomainTemplate,
) -> String {
    let per_site = CONTEXT_BUDGET_CHARS / pages.len().max(1);

    let websites: Vec<Value> = pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let mut site = json!({
                "website_number": i + 1,
                "website_name": host_of(page.url).unwrap_or_else(|| page.url.to_string()),
                "url": page.url,
                "extracted_data": bounded_data(page.extracted_data, per_site),
            });
            if let Some(analysis) = page.analysis {
                site["analysis"] = json!({
                    "summary": analysis.summary,
                    "key_points": analysis.key_points,
                    "insights": analysis.insights,
                    "user_request_answer": analysis.user_request_answer,
                });
            }
            site
        })
        .collect();

    let mut context = json!({
        "domain": template.name,
        "user_instruction": task.instruction,
        "total_websites": pages.len(),
        "websites": websites,
    });
    if let Some(comparison) = task.comparison.as_ref().filter(|c| c.error.is_none()) {
        context["comparison"] = json!({
            "summary": comparison.summary,
            "recommendation": comparison.recommendation,
            "user_request_answer": comparison.user_request_answer,
        });
    }
    let context = serde_json::to_string_pretty(&context).unwrap_or_else(|_| "{}".into());

    format!(
        "You are answering a question about previously scraped {name} websites.\n\n\
         Use only the context below. Include every website only when the question asks \
         for a comparison (which, better, more, versus, compare); otherwise focus on the \
         websites the question is about. Say which website each fact comes from.\n\n\
         Context (JSON):\n{context}\n\n\
         Question:\n{question}\n\n\
         Guidance: {style}\n\n\
         Reply with a JSON object:\n\
         {{\"answer\": \"focused answer\", \
         \"supporting_points\": [\"evidence from https://full.url/path\"], \
         \"confidence\": \"high | medium | low\"}}\n\
         Cite sources with their full URL, not just the domain name.",
        name = template.name,
        style = template.qna_style,
    )
}

/// Replace bare host mentions (`(example.com)`, `[example.com]` or
/// `example.com`) with the full source URL.
pub fn link_sources(point: &str, sources: &[&str]) -> String {
    let mut text = point.to_string();
    for url in sources {
        let Some(host) = host_of(url) else {
            continue;
        };
        let pattern = format!(
            r"(^|[\s(\[]){}{}($|[\s)\].,;:!?])",
            r"(?:www\.)?",
            regex::escape(&host)
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let replacement = format!("${{1}}{}${{2}}", url.replace('$', "$$"));
        // Adjacent mentions share a delimiter, so repeat until stable.
        loop {
            let next = re.replace_all(&text, replacement.as_str()).into_owned();
            if next == text {
                break;
            }
            text = next;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use pagelens_shared::{
        Analysis, Comparison, FailureKind, PerUrlResult, ScheduleLink, TaskId, TaskStatus,
    };

    const A: &str = "https://www.britannica.example/money/NVIDIA";
    const B: &str = "https://amd.example/about";

    struct Capture {
        reply: Result<String, ModelError>,
        prompt: Mutex<Option<String>>,
    }

    impl Capture {
        fn new(reply: Result<String, ModelError>) -> Self {
            Self {
                reply,
                prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CompletionModel for Capture {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            *self.prompt.lock().unwrap() = Some(request.prompt.clone());
            self.reply.clone()
        }
    }

    fn task(results: Vec<PerUrlResult>, comparison: Option<Comparison>) -> Task {
        Task {
            id: TaskId::new(),
            name: "chips".into(),
            urls: vec![A.into(), B.into()],
            instruction: "company overview".into(),
            domain: "business".into(),
            enable_comparison: true,
            status: TaskStatus::Completed,
            results,
            comparison,
            progress: None,
            tags: BTreeSet::new(),
            starred: false,
            archived: false,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            language: Some("en".into()),
            schedule: ScheduleLink::default(),
            version: 3,
        }
    }

    fn success(url: &str, name: &str) -> PerUrlResult {
        PerUrlResult::success(
            url,
            json!({"company_name": name}).as_object().cloned().unwrap(),
            Some(Analysis {
                summary: format!("{name} makes chips"),
                user_request_answer: format!("{name} is a chip maker"),
                ..Default::default()
            }),
            None,
            "en",
        )
    }

    #[tokio::test]
    async fn grounded_answer_with_linked_sources() {
        let model = Capture::new(Ok(json!({
            "answer": "NVIDIA leads in GPUs.",
            "supporting_points": [
                "GPU revenue grew (britannica.example)",
                "AMD competes [amd.example]",
                "See amd.example, britannica.example for details"
            ],
            "confidence": "High"
        })
        .to_string()));
        let t = task(
            vec![success(A, "NVIDIA"), success(B, "AMD")],
            Some(Comparison {
                summary: "Both design chips".into(),
                ..Default::default()
            }),
        );

        let answer = ask(&model, &t, "  Who leads in GPUs?  ").await.unwrap();
        assert_eq!(answer.question, "Who leads in GPUs?");
        assert_eq!(answer.answer, "NVIDIA leads in GPUs.");
        assert_eq!(answer.confidence, Confidence::High);
        assert_eq!(
            answer.supporting_points,
            [
                format!("GPU revenue grew ({A})"),
                format!("AMD competes [{B}]"),
                format!("See {B}, {A} for details"),
            ]
        );

        let prompt = model.prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("NVIDIA makes chips"));
        assert!(prompt.contains("Both design chips"));
        assert!(prompt.contains("\"website_name\": \"britannica.example\""));
    }

    #[tokio::test]
    async fn defaults_when_optional_fields_missing() {
        let model = Capture::new(Ok(r#"{"answer": "Yes."}"#.into()));
        let t = task(vec![success(A, "NVIDIA")], None);

        let answer = ask(&model, &t, "Is it a chip maker?").await.unwrap();
        assert!(answer.supporting_points.is_empty());
        assert_eq!(answer.confidence, Confidence::NotAvailable);
    }

    #[tokio::test]
    async fn no_successes_is_no_data() {
        let model = Capture::new(Ok(r#"{"answer": "made up"}"#.into()));
        let t = task(
            vec![PerUrlResult::failure(A, FailureKind::FetchTimeout, "timed out")],
            None,
        );

        assert_eq!(ask(&model, &t, "Anything?").await.unwrap_err(), QnaError::NoData);
        assert!(model.prompt.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_empty_question_and_bad_replies() {
        let t = task(vec![success(A, "NVIDIA")], None);

        let model = Capture::new(Ok(r#"{"answer": "x"}"#.into()));
        assert_eq!(ask(&model, &t, "   ").await.unwrap_err(), QnaError::EmptyQuestion);

        let model = Capture::new(Ok(r#"{"supporting_points": []}"#.into()));
        assert!(matches!(
            ask(&model, &t, "Why?").await.unwrap_err(),
            QnaError::MalformedResponse(_)
        ));

        let model = Capture::new(Err(ModelError::RateLimited("429".into())));
        assert!(matches!(
            ask(&model, &t, "Why?").await.unwrap_err(),
            QnaError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn link_sources_leaves_full_urls_alone() {
        let point = format!("Already linked {A} and www.britannica.example");
        assert_eq!(
            link_sources(&point, &[A]),
            format!("Already linked {A} and {A}")
        );
    }

    #[test]
    fn context_budget_is_split_across_sites() {
        let big = "x".repeat(6_000);
        let mut results = Vec::new();
        for url in [A, B] {
            results.push(PerUrlResult::success(
                url,
                json!({"name": "n", "blob": big}).as_object().cloned().unwrap(),
                None,
                None,
                "en",
            ));
        }
        let t = task(results, None);
        let pages: Vec<SuccessfulPage<'_>> = t.successful_results().collect();
        let prompt = build_prompt(&t, &pages, "q", domains::lookup("business"));

        assert!(!prompt.contains(&big));
        assert_eq!(prompt.matches("\"_truncated\": true").count(), 2);
    }
}
