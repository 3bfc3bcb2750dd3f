//! Extraction Engine: cleaned page text → structured data.
//!
//! The model is asked for a JSON object guided by the user's instruction and
//! the domain template's field list. Attempts run from an explicit ordered
//! list; the second, stricter attempt is the only retry anywhere in the
//! pipeline. Embedded page metadata is merged over the model's answer.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use pagelens_normalize::NormalizedPage;
use pagelens_shared::{DomainTemplate, ExtractedData, ExtractionError};

use crate::model::{CompletionModel, CompletionRequest, ModelError, Purpose};
use crate::reply::parse_json_object;

/// Attempts in order. The strict prompt is used only if the first fails.
const ATTEMPTS: [Purpose; 2] = [Purpose::Extraction, Purpose::ExtractionStrict];

/// Extract structured data from a normalized page.
#[instrument(skip_all, fields(url = %url, domain = template.key))]
pub async fn extract(
    model: &dyn CompletionModel,
    page: &NormalizedPage,
    instruction: &str,
    template: &DomainTemplate,
    url: &str,
) -> Result<ExtractedData, ExtractionError> {
    if page.cleaned_text.trim().is_empty() {
        return Err(ExtractionError::Empty(format!(
            "{url} yielded no readable text"
        )));
    }

    let mut last_error = None;
    for purpose in ATTEMPTS {
        let request = CompletionRequest::new(
            purpose,
            build_prompt(purpose, page, instruction, template, url),
        )
        .with_temperature(if purpose == Purpose::Extraction { 0.2 } else { 0.0 });

        let reply = match model.complete(&request).await {
            Ok(reply) => reply,
            Err(e @ ModelError::EmptyResponse) => {
                warn!(attempt = purpose.as_str(), "extraction reply was empty");
                last_error = Some(ExtractionError::MalformedResponse(e.to_string()));
                continue;
            }
            Err(e) => {
                warn!(attempt = purpose.as_str(), error = %e, "extraction call failed");
                last_error = Some(ExtractionError::ServiceUnavailable(e.to_string()));
                continue;
            }
        };

        match parse_json_object(&reply) {
            Ok(data) => {
                log_missing_fields(&data, template);
                return Ok(merge_metadata(data, &page.embedded_metadata));
            }
            Err(reason) => {
                warn!(attempt = purpose.as_str(), "extraction reply was not a JSON object");
                last_error = Some(ExtractionError::MalformedResponse(reason));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ExtractionError::MalformedResponse("no extraction attempt was made".into())
    }))
}

/// Merge embedded metadata over the model's output. Metadata always wins;
/// fields only the model found are kept in their original order.
pub fn merge_metadata(mut extracted: ExtractedData, metadata: &ExtractedData) -> ExtractedData {
    for (key, meta_value) in metadata {
        if let Some(model_value) = extracted.get(key) {
            if shape(model_value) != shape(meta_value) {
                warn!(
                    field = %key,
                    metadata_shape = shape(meta_value),
                    model_shape = shape(model_value),
                    "metadata and model disagree on field shape, keeping metadata"
                );
            }
        }
        extracted.insert(key.clone(), meta_value.clone());
    }
    extracted
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn log_missing_fields(data: &ExtractedData, template: &DomainTemplate) {
    let missing: Vec<&str> = template
        .fields
        .iter()
        .copied()
        .filter(|f| !data.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        debug!(missing = ?missing, "template fields absent from extraction");
    }
}

fn build_prompt(
    purpose: Purpose,
    page: &NormalizedPage,
    instruction: &str,
    template: &DomainTemplate,
    url: &str,
) -> String {
    let instruction = if instruction.trim().is_empty() {
        "Extract all relevant information."
    } else {
        instruction.trim()
    };

    let language_note = if page.language != "en" {
        format!(
            "\nThe page is written in language '{}'. Keep extracted values in the original \
             language unless the user asks for a translation.\n",
            page.language
        )
    } else {
        String::new()
    };

    let mut prompt = format!(
        "You are an expert data extractor for {name} websites.\n\
         Extract the user's requested information plus important {name} signals.\n\
         {language_note}\n\
         URL: {url}\n\
         User request: {instruction}\n\
         Key fields to look for: {fields}\n\n\
         Return a JSON object with clear snake_case field names. Use arrays where \
         several values exist and nested objects for repeated records such as \
         products, articles or jobs. Keep prices with their currency symbol.\n\n\
         Page content:\n{content}\n",
        name = template.name,
        fields = template.field_list(),
        content = page.cleaned_text,
    );

    if purpose == Purpose::ExtractionStrict {
        prompt.push_str(
            "\nIMPORTANT: your previous reply could not be parsed. Return ONLY one valid \
             JSON object with double-quoted keys. No Markdown fences, no commentary.",
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::model::ModelError;
    use pagelens_shared::domains;

    /// Replays canned replies and records the purposes it was called with.
    struct Replay {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        calls: Mutex<Vec<Purpose>>,
    }

    impl Replay {
        fn new(replies: Vec<Result<String, ModelError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Purpose> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionModel for Replay {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            self.calls.lock().unwrap().push(request.purpose);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelError::EmptyResponse))
        }
    }

    fn page(text: &str, metadata: serde_json::Value) -> NormalizedPage {
        NormalizedPage {
            cleaned_text: text.into(),
            embedded_metadata: metadata.as_object().cloned().unwrap_or_default(),
            language: "en".into(),
            title: None,
            truncated: false,
        }
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let model = Replay::new(vec![Ok(r#"{"product_name": "Widget", "price": "$9"}"#.into())]);
        let data = extract(
            &model,
            &page("# Widget\n$9", json!({})),
            "title and price",
            domains::lookup("ecommerce"),
            "https://a.example",
        )
        .await
        .unwrap();

        assert_eq!(data["product_name"], "Widget");
        assert_eq!(model.calls(), [Purpose::Extraction]);
    }

    #[tokio::test]
    async fn malformed_then_strict_success() {
        let model = Replay::new(vec![
            Ok("Sorry, I cannot".into()),
            Ok("```json\n{\"price\": \"$9\"}\n```".into()),
        ]);
        let data = extract(
            &model,
            &page("text", json!({})),
            "",
            domains::lookup("general"),
            "https://a.example",
        )
        .await
        .unwrap();

        assert_eq!(data["price"], "$9");
        assert_eq!(
            model.calls(),
            [Purpose::Extraction, Purpose::ExtractionStrict]
        );
    }

    #[tokio::test]
    async fn malformed_twice_fails() {
        let model = Replay::new(vec![Ok("nope".into()), Ok("still nope".into())]);
        let err = extract(
            &model,
            &page("text", json!({})),
            "",
            domains::lookup("general"),
            "https://a.example",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractionError::MalformedResponse(_)));
        assert_eq!(model.calls().len(), 2);
    }

    #[tokio::test]
    async fn service_failure_consumes_retry() {
        let model = Replay::new(vec![
            Err(ModelError::RateLimited("slow down".into())),
            Err(ModelError::Transport("connection reset".into())),
        ]);
        let err = extract(
            &model,
            &page("text", json!({})),
            "",
            domains::lookup("general"),
            "https://a.example",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractionError::ServiceUnavailable(_)));
        assert_eq!(model.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_replies_are_malformed() {
        let model = Replay::new(vec![
            Err(ModelError::EmptyResponse),
            Err(ModelError::EmptyResponse),
        ]);
        let err = extract(
            &model,
            &page("text", json!({})),
            "",
            domains::lookup("general"),
            "https://a.example",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractionError::MalformedResponse(_)));
        assert_eq!(model.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_page_skips_model() {
        let model = Replay::new(vec![]);
        let err = extract(
            &model,
            &page("   \n ", json!({})),
            "",
            domains::lookup("general"),
            "https://a.example",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractionError::Empty(_)));
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn metadata_overrides_model_fields() {
        let model = Replay::new(vec![Ok(
            r#"{"name": "Model Widget", "price": {"amount": 9}, "color": "red"}"#.into(),
        )]);
        let data = extract(
            &model,
            &page("text", json!({"name": "Widget Pro", "price": "19.99", "sku": "W-1"})),
            "",
            domains::lookup("ecommerce"),
            "https://a.example",
        )
        .await
        .unwrap();

        assert_eq!(data["name"], "Widget Pro");
        // Shape disagreement: metadata is still authoritative.
        assert_eq!(data["price"], "19.99");
        assert_eq!(data["color"], "red");
        assert_eq!(data["sku"], "W-1");
    }

    #[test]
    fn merge_keeps_model_order_for_model_only_fields() {
        let extracted = json!({"b": 1, "a": 2}).as_object().cloned().unwrap();
        let metadata = json!({"a": 3, "c": 4}).as_object().cloned().unwrap();
        let merged = merge_metadata(extracted, &metadata);

        let keys: Vec<&str> = merged.keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a", "c"]);
        assert_eq!(merged["a"], 3);
    }

    #[test]
    fn strict_prompt_adds_instruction() {
        let p = page("Body", json!({}));
        let template = domains::lookup("news");
        let standard = build_prompt(Purpose::Extraction, &p, "headline", template, "https://n.example");
        let strict =
            build_prompt(Purpose::ExtractionStrict, &p, "headline", template, "https://n.example");

        assert!(standard.contains("News & Media"));
        assert!(standard.contains("headline, author"));
        assert!(!standard.contains("Return ONLY"));
        assert!(strict.contains("Return ONLY one valid JSON object"));
    }
}
