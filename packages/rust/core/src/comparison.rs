//! Comparison Engine: cross-site synthesis of successful pages.
//!
//! One aggregate request carries every page's analysis highlights and a
//! bounded view of its extracted data. The reply's comparison table is
//! normalized so that every metric row has exactly one cell per compared URL,
//! in task order; cells the model left out read [`NOT_AVAILABLE`].

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use pagelens_shared::{
    Comparison, ComparisonError, ComparisonRow, DomainTemplate, ExtractionRecommendations,
    SiteAssessment, SuccessfulPage,
};

use crate::model::{CompletionModel, CompletionRequest, ModelError, Purpose};
use crate::reply::{bounded_data, parse_json_object, string_field, string_list};

/// Marker for a table cell the model did not fill.
pub const NOT_AVAILABLE: &str = "not available";

/// Per-page extracted data budget in serialized chars.
const MAX_DATA_CHARS_PER_PAGE: usize = 3_000;
const MAX_KEY_POINTS: usize = 5;

/// Compare two or more successful pages. The orchestrator enforces the
/// two-page minimum.
#[instrument(skip_all, fields(pages = pages.len(), domain = template.key))]
pub async fn compare(
    model: &dyn CompletionModel,
    pages: &[SuccessfulPage<'_>],
    instruction: &str,
    template: &DomainTemplate,
) -> Result<Comparison, ComparisonError> {
    let request = CompletionRequest::new(
        Purpose::Comparison,
        build_prompt(pages, instruction, template),
    )
    .with_temperature(0.3);

    let reply = model.complete(&request).await.map_err(|e| {
        warn!(error = %e, "comparison call failed");
        match e {
            ModelError::EmptyResponse => ComparisonError::MalformedResponse(e.to_string()),
            e => ComparisonError::ServiceUnavailable(e.to_string()),
        }
    })?;

    let map = parse_json_object(&reply).map_err(ComparisonError::MalformedResponse)?;
    let urls: Vec<&str> = pages.iter().map(|p| p.url).collect();
    let comparison = parse_comparison(&map, &urls);

    if comparison.summary.is_empty() && comparison.comparison_table.is_empty() {
        return Err(ComparisonError::MalformedResponse(
            "reply has neither a summary nor a comparison table".into(),
        ));
    }

    debug!(
        rows = comparison.comparison_table.len(),
        scored = comparison.scores.len(),
        "comparison parsed"
    );
    Ok(comparison)
}

fn build_prompt(pages: &[SuccessfulPage<'_>], instruction: &str, template: &DomainTemplate) -> String {
    let payload: Vec<Value> = pages
        .iter()
        .map(|page| {
            let (summary, key_points, answer) = match page.analysis {
                Some(a) => (
                    a.summary.as_str(),
                    a.key_points.iter().take(MAX_KEY_POINTS).cloned().collect(),
                    a.user_request_answer.as_str(),
                ),
                None => ("", Vec::<String>::new(), ""),
            };
            json!({
                "url": page.url,
                "summary": summary,
                "key_points": key_points,
                "user_request_answer": answer,
                "extracted_data": bounded_data(page.extracted_data, MAX_DATA_CHARS_PER_PAGE),
            })
        })
        .collect();
    let payload = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "[]".into());

    let instruction = if instruction.trim().is_empty() {
        "Extract and analyze relevant information from these websites."
    } else {
        instruction.trim()
    };
    let urls = pages.iter().map(|p| p.url).collect::<Vec<_>>().join(", ");

    format!(
        "You are comparing {count} {name} websites.\n\n\
         User's original request: {instruction}\n\n\
         Comparison data (JSON):\n{payload}\n\n\
         Compare the websites and answer the request across all of them. Identify \
         common data, data unique to one site and the key insights the comparison \
         reveals. Use these exact URLs as keys: {urls}\n\n\
         Reply with a JSON object:\n\
         {{\n  \
           \"summary\": \"2-3 sentence overall comparison\",\n  \
           \"user_request_answer\": \"cross-website answer to the request\",\n  \
           \"similarities\": [\"shared trait\"],\n  \
           \"differences\": [\"difference\"],\n  \
           \"websites\": {{\"<url>\": {{\"pros\": [], \"cons\": [], \"notable_features\": [], \"best_for\": \"\", \"score\": 0}}}},\n  \
           \"comparison_table\": {{\"metrics\": [\"metric\"], \"rows\": [{{\"metric\": \"metric\", \"values\": {{\"<url>\": \"value\"}}}}]}},\n  \
           \"extraction_recommendations\": {{\"common_fields\": [], \"unique_fields\": {{\"<url>\": []}}, \"best_practices\": []}},\n  \
           \"recommendation\": \"which site suits which scenario\"\n\
         }}\n\
         Scores range from 0 to 10.",
        count = pages.len(),
        name = template.name,
    )
}

// ---------------------------------------------------------------------------
// Reply normalization
// ---------------------------------------------------------------------------

fn parse_comparison(map: &Map<String, Value>, urls: &[&str]) -> Comparison {
    let mut websites = BTreeMap::new();
    let mut scores = BTreeMap::new();

    if let Some(Value::Object(sites)) = map.get("websites") {
        for (key, site) in sites {
            let (Some(url), Value::Object(site)) = (resolve_site_key(key, urls), site) else {
                continue;
            };
            if let Some(score) = site.get("score").and_then(as_score) {
                scores.insert(url.to_string(), score);
            }
            let best_for = string_field(site, "best_for");
            websites.insert(
                url.to_string(),
                SiteAssessment {
                    pros: string_list(site, "pros"),
                    cons: string_list(site, "cons"),
                    notable_features: string_list(site, "notable_features"),
                    best_for: (!best_for.is_empty()).then_some(best_for),
                },
            );
        }
    }

    if let Some(Value::Object(top)) = map.get("scores") {
        for (key, value) in top {
            if let (Some(url), Some(score)) = (resolve_site_key(key, urls), as_score(value)) {
                scores.entry(url.to_string()).or_insert(score);
            }
        }
    }

    Comparison {
        summary: string_field(map, "summary"),
        similarities: string_list(map, "similarities"),
        differences: string_list(map, "differences"),
        recommendation: string_field(map, "recommendation"),
        user_request_answer: string_field(map, "user_request_answer"),
        comparison_table: map
            .get("comparison_table")
            .map(|t| normalize_table(t, urls))
            .unwrap_or_default(),
        scores,
        websites,
        extraction_recommendations: map
            .get("extraction_recommendations")
            .and_then(Value::as_object)
            .map(|r| parse_recommendations(r, urls))
            .unwrap_or_default(),
        error: None,
    }
}

/// Build a rectangular table from either accepted shape:
///
/// - `{"metrics": [..], "rows": [{"metric": m, "values": {url: v}}]}`
/// - `{metric: {url: v}}`
///
/// A bare list of rows is accepted too. Metrics listed without a row get a
/// row of [`NOT_AVAILABLE`] cells.
pub fn normalize_table(table: &Value, urls: &[&str]) -> Vec<ComparisonRow> {
    let mut raw_rows: Vec<(String, Option<&Map<String, Value>>)> = Vec::new();

    match table {
        Value::Object(obj)
            if obj.get("rows").is_some_and(Value::is_array)
                || obj.get("metrics").is_some_and(Value::is_array) =>
        {
            if let Some(Value::Array(rows)) = obj.get("rows") {
                collect_rows(rows, &mut raw_rows);
            }
            if let Some(Value::Array(metrics)) = obj.get("metrics") {
                for metric in metrics.iter().filter_map(Value::as_str) {
                    let metric = metric.trim();
                    if !metric.is_empty() && !raw_rows.iter().any(|(m, _)| m == metric) {
                        raw_rows.push((metric.to_string(), None));
                    }
                }
            }
        }
        Value::Object(obj) => {
            for (metric, values) in obj {
                raw_rows.push((metric.clone(), values.as_object()));
            }
        }
        Value::Array(rows) => collect_rows(rows, &mut raw_rows),
        _ => {}
    }

    raw_rows
        .into_iter()
        .map(|(metric, values)| ComparisonRow {
            metric,
            values: urls
                .iter()
                .map(|url| {
                    let cell = values
                        .and_then(|v| lookup_cell(v, url, urls))
                        .unwrap_or_else(|| Value::String(NOT_AVAILABLE.into()));
                    (url.to_string(), cell)
                })
                .collect(),
        })
        .collect()
}

fn collect_rows<'a>(rows: &'a [Value], out: &mut Vec<(String, Option<&'a Map<String, Value>>)>) {
    for row in rows.iter().filter_map(Value::as_object) {
        let metric = string_field(row, "metric");
        if metric.is_empty() {
            continue;
        }
        out.push((metric, row.get("values").and_then(Value::as_object)));
    }
}

/// Find the cell for `url` among the model's keys, which may be the full URL,
/// the bare host or a positional `url_N` label.
fn lookup_cell(values: &Map<String, Value>, url: &str, urls: &[&str]) -> Option<Value> {
    values
        .iter()
        .find(|(key, _)| resolve_site_key(key, urls) == Some(url))
        .map(|(_, value)| value.clone())
        .filter(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

fn resolve_site_key<'a>(key: &str, urls: &[&'a str]) -> Option<&'a str> {
    let key = key.trim();
    if let Some(url) = urls.iter().find(|u| **u == key) {
        return Some(url);
    }
    let trimmed = key.trim_end_matches('/');
    if let Some(url) = urls.iter().find(|u| u.trim_end_matches('/') == trimmed) {
        return Some(url);
    }
    let bare_key = key.trim_start_matches("www.");
    if let Some(url) = urls.iter().find(|u| host_of(u).as_deref() == Some(bare_key)) {
        return Some(url);
    }
    key.strip_prefix("url_")
        .or_else(|| key.strip_prefix("website_"))
        .and_then(|n| n.parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| urls.get(i).copied())
}

/// Host of a URL without a leading `www.`.
pub(crate) fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}

fn as_score(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches("/10").trim().parse().ok(),
        _ => None,
    }?;
    score.is_finite().then(|| score.clamp(0.0, 10.0))
}

fn parse_recommendations(map: &Map<String, Value>, urls: &[&str]) -> ExtractionRecommendations {
    let mut unique_fields = BTreeMap::new();
    if let Some(Value::Object(unique)) = map.get("unique_fields") {
        for (key, _) in unique {
            if let Some(url) = resolve_site_key(key, urls) {
                unique_fields.insert(url.to_string(), string_list(unique, key));
            }
        }
    }
    ExtractionRecommendations {
        common_fields: string_list(map, "common_fields"),
        unique_fields,
        best_practices: string_list(map, "best_practices"),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use pagelens_shared::{Analysis, ExtractedData, domains};

    const A: &str = "https://shop-a.example/widget";
    const B: &str = "https://www.shop-b.example/item";

    struct Fixed(Result<String, ModelError>);

    #[async_trait]
    impl CompletionModel for Fixed {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            assert_eq!(request.purpose, Purpose::Comparison);
            self.0.clone()
        }
    }

    fn fixtures() -> (ExtractedData, Analysis) {
        (
            json!({"price": "$9"}).as_object().cloned().unwrap(),
            Analysis {
                summary: "Cheap".into(),
                key_points: (1..=8).map(|i| format!("point {i}")).collect(),
                user_request_answer: "$9".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn rows_shape_is_filled_rectangular() {
        let table = json!({
            "metrics": ["Price", "Rating", "Shipping"],
            "rows": [
                {"metric": "Price", "values": {A: "$9", B: "$12"}},
                {"metric": "Rating", "values": {"url_2": 4.5}}
            ]
        });
        let rows = normalize_table(&table, &[A, B]);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].values[A], "$9");
        assert_eq!(rows[0].values[B], "$12");
        assert_eq!(rows[1].values[A], NOT_AVAILABLE);
        assert_eq!(rows[1].values[B], 4.5);
        assert_eq!(rows[2].metric, "Shipping");
        assert!(rows.iter().all(|r| r.values.len() == 2));
        let columns: Vec<&str> = rows[0].values.keys().map(String::as_str).collect();
        assert_eq!(columns, [A, B]);
    }

    #[test]
    fn metric_map_shape_with_host_keys() {
        let table = json!({
            "Price": {"shop-a.example": "$9", "shop-b.example": ""},
            "Warranty": {"www.shop-b.example": "2 years"}
        });
        let rows = normalize_table(&table, &[A, B]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values[A], "$9");
        assert_eq!(rows[0].values[B], NOT_AVAILABLE);
        assert_eq!(rows[1].values[A], NOT_AVAILABLE);
        assert_eq!(rows[1].values[B], "2 years");
    }

    #[test]
    fn metric_named_metrics_is_a_row() {
        let table = json!({
            "metrics": {A: "12 tracked", B: "9 tracked"},
            "Price": {A: "$9"}
        });
        let rows = normalize_table(&table, &[A, B]);

        assert_eq!(rows.len(), 2);
        let names: Vec<&str> = rows.iter().map(|r| r.metric.as_str()).collect();
        assert!(names.contains(&"metrics"));
        assert!(names.contains(&"Price"));
        let price = rows.iter().find(|r| r.metric == "Price").unwrap();
        assert_eq!(price.values[A], "$9");
        assert_eq!(price.values[B], NOT_AVAILABLE);
    }

    #[test]
    fn scores_and_sites_resolve_to_urls() {
        let map = json!({
            "summary": "A is cheaper",
            "websites": {
                A: {"pros": ["cheap"], "score": 8, "best_for": "budget buyers"},
                "shop-b.example": {"cons": ["pricey"], "score": "6/10"},
                "unknown.example": {"score": 1}
            },
            "extraction_recommendations": {
                "common_fields": ["price"],
                "unique_fields": {"url_2": ["warranty"]}
            }
        });
        let comparison = parse_comparison(map.as_object().unwrap(), &[A, B]);

        assert_eq!(comparison.scores[A], 8.0);
        assert_eq!(comparison.scores[B], 6.0);
        assert_eq!(comparison.scores.len(), 2);
        assert_eq!(comparison.websites[A].best_for.as_deref(), Some("budget buyers"));
        assert_eq!(comparison.websites[B].cons, ["pricey"]);
        assert_eq!(
            comparison.extraction_recommendations.unique_fields[B],
            ["warranty"]
        );
    }

    #[tokio::test]
    async fn compare_parses_full_reply() {
        let (data, analysis) = fixtures();
        let pages = [
            SuccessfulPage {
                url: A,
                extracted_data: &data,
                analysis: Some(&analysis),
                language: "en",
            },
            SuccessfulPage {
                url: B,
                extracted_data: &data,
                analysis: None,
                language: "en",
            },
        ];
        let reply = json!({
            "summary": "Both sell widgets.",
            "similarities": ["widgets"],
            "differences": ["price"],
            "comparison_table": {"Price": {A: "$9", B: "$9"}},
            "recommendation": "Either",
            "user_request_answer": "Both cost $9."
        });

        let comparison = compare(
            &Fixed(Ok(reply.to_string())),
            &pages,
            "compare prices",
            domains::lookup("ecommerce"),
        )
        .await
        .unwrap();

        assert_eq!(comparison.summary, "Both sell widgets.");
        assert_eq!(comparison.comparison_table.len(), 1);
        assert!(comparison.error.is_none());
    }

    #[tokio::test]
    async fn compare_errors() {
        let (data, _) = fixtures();
        let pages = [
            SuccessfulPage {
                url: A,
                extracted_data: &data,
                analysis: None,
                language: "en",
            },
            SuccessfulPage {
                url: B,
                extracted_data: &data,
                analysis: None,
                language: "en",
            },
        ];
        let template = domains::lookup("general");

        let err = compare(&Fixed(Ok("no json".into())), &pages, "", template)
            .await
            .unwrap_err();
        assert!(matches!(err, ComparisonError::MalformedResponse(_)));

        let err = compare(&Fixed(Ok("{}".into())), &pages, "", template)
            .await
            .unwrap_err();
        assert!(matches!(err, ComparisonError::MalformedResponse(_)));

        let err = compare(
            &Fixed(Err(ModelError::Auth("bad key".into()))),
            &pages,
            "",
            template,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ComparisonError::ServiceUnavailable(_)));
    }

    #[test]
    fn prompt_limits_key_points() {
        let (data, analysis) = fixtures();
        let pages = [SuccessfulPage {
            url: A,
            extracted_data: &data,
            analysis: Some(&analysis),
            language: "en",
        }];
        let prompt = build_prompt(&pages, "", domains::lookup("ecommerce"));
        assert!(prompt.contains("point 5"));
        assert!(!prompt.contains("point 6"));
        assert!(prompt.contains(A));
    }
}
