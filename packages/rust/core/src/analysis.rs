//! Analysis Generator: extracted data → narrative analysis for one page.

use tracing::{instrument, warn};

use pagelens_shared::{Analysis, AnalysisError, DomainTemplate, ExtractedData};

use crate::model::{CompletionModel, CompletionRequest, ModelError, Purpose};
use crate::reply::{parse_json_object, string_field, string_list};

/// Serialized extracted data sent to the model is capped at this many chars.
const MAX_DATA_CHARS: usize = 4_000;

/// Generate an [`Analysis`] with a single model call.
///
/// An empty `summary` or `user_request_answer` is [`AnalysisError::Incomplete`];
/// the caller records the page as a success without analysis.
#[instrument(skip_all, fields(domain = template.key, language = %language))]
pub async fn analyze(
    model: &dyn CompletionModel,
    data: &ExtractedData,
    instruction: &str,
    template: &DomainTemplate,
    language: &str,
) -> Result<Analysis, AnalysisError> {
    let request = CompletionRequest::new(
        Purpose::Analysis,
        build_prompt(data, instruction, template, language),
    )
    .with_temperature(0.3);

    let reply = model.complete(&request).await.map_err(|e| {
        warn!(error = %e, "analysis call failed");
        match e {
            ModelError::EmptyResponse => AnalysisError::Incomplete(e.to_string()),
            e => AnalysisError::ServiceUnavailable(e.to_string()),
        }
    })?;

    let map = parse_json_object(&reply).map_err(AnalysisError::Incomplete)?;

    let analysis = Analysis {
        summary: string_field(&map, "summary"),
        key_points: string_list(&map, "key_points"),
        insights: string_list(&map, "insights"),
        opportunities: string_list(&map, "opportunities"),
        risks: string_list(&map, "risks"),
        next_steps: string_list(&map, "next_steps"),
        user_request_answer: string_field(&map, "user_request_answer"),
    };

    if analysis.summary.is_empty() {
        return Err(AnalysisError::Incomplete("summary is empty".into()));
    }
    if analysis.user_request_answer.is_empty() {
        return Err(AnalysisError::Incomplete(
            "user_request_answer is empty".into(),
        ));
    }
    Ok(analysis)
}

fn build_prompt(
    data: &ExtractedData,
    instruction: &str,
    template: &DomainTemplate,
    language: &str,
) -> String {
    let serialized = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".into());
    let serialized: String = serialized.chars().take(MAX_DATA_CHARS).collect();

    let instruction = if instruction.trim().is_empty() {
        "Summarize the extracted findings."
    } else {
        instruction.trim()
    };

    let mut prompt = format!(
        "You are an expert analyst reviewing data from a {name} website.\n\
         Summarize findings tailored to this domain and the user's instruction.\n\n\
         Extracted data (JSON):\n{serialized}\n\n\
         User instruction:\n{instruction}\n\n\
         Domain-focused considerations:\n{focus}\n\n\
         Reply with a JSON object:\n\
         {{\n  \
           \"summary\": \"2-3 sentence overview\",\n  \
           \"key_points\": [\"point\"],\n  \
           \"insights\": [\"deeper insight\"],\n  \
           \"user_request_answer\": \"direct answer to the instruction\",\n  \
           \"opportunities\": [\"optional\"],\n  \
           \"risks\": [\"optional\"],\n  \
           \"next_steps\": [\"optional\"]\n\
         }}\n\
         Base every statement on the extracted data only.",
        name = template.name,
        focus = template.focus_bullets(),
    );

    if language != "en" {
        prompt.push_str(&format!(
            "\nThe data may be in language '{language}'. Write the analysis in that language \
             unless the instruction asks otherwise."
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use pagelens_shared::domains;

    struct Fixed(Result<String, ModelError>);

    #[async_trait]
    impl CompletionModel for Fixed {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ModelError> {
            self.0.clone()
        }
    }

    fn data() -> ExtractedData {
        json!({"product_name": "Widget", "price": "$9"})
            .as_object()
            .cloned()
            .unwrap()
    }

    async fn run(reply: Result<String, ModelError>) -> Result<Analysis, AnalysisError> {
        analyze(
            &Fixed(reply),
            &data(),
            "What does it cost?",
            domains::lookup("ecommerce"),
            "en",
        )
        .await
    }

    #[tokio::test]
    async fn complete_analysis() {
        let analysis = run(Ok(json!({
            "summary": "A cheap widget.",
            "key_points": ["Costs $9", "In stock"],
            "insights": ["Priced below rivals"],
            "user_request_answer": "It costs $9.",
            "risks": []
        })
        .to_string()))
        .await
        .unwrap();

        assert_eq!(analysis.summary, "A cheap widget.");
        assert_eq!(analysis.key_points, ["Costs $9", "In stock"]);
        assert!(analysis.risks.is_empty());
        assert_eq!(analysis.user_request_answer, "It costs $9.");
    }

    #[tokio::test]
    async fn empty_answer_is_incomplete() {
        let err = run(Ok(
            json!({"summary": "A widget.", "user_request_answer": "  "}).to_string()
        ))
        .await
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Incomplete(_)));
    }

    #[tokio::test]
    async fn missing_summary_is_incomplete() {
        let err = run(Ok(json!({"user_request_answer": "$9"}).to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::Incomplete("summary is empty".into()));
    }

    #[tokio::test]
    async fn unparseable_is_incomplete() {
        let err = run(Ok("I think it is cheap".into())).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Incomplete(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_service_unavailable() {
        let err = run(Err(ModelError::Timeout("60s".into()))).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ServiceUnavailable(_)));
    }

    #[test]
    fn prompt_mentions_focus_and_language() {
        let prompt = build_prompt(&data(), "", domains::lookup("ecommerce"), "de");
        assert!(prompt.contains("- pricing signals"));
        assert!(prompt.contains("Summarize the extracted findings."));
        assert!(prompt.contains("language 'de'"));
    }
}
