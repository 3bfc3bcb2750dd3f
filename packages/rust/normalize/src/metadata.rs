//! Embedded structured metadata (JSON-LD).
//!
//! Every `<script type="application/ld+json">` block is parsed, arrays and
//! `@graph` containers are flattened, and the resulting objects are merged
//! into a single map. Earlier objects win on key collisions.

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

use pagelens_shared::ExtractedData;

/// Collect and merge all JSON-LD objects in the document.
pub fn extract_embedded_metadata(doc: &Html) -> ExtractedData {
    let selector =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector");

    let mut merged = ExtractedData::new();
    for script in doc.select(&selector) {
        let raw: String = script.text().collect();
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping unparseable JSON-LD block");
                continue;
            }
        };

        let mut objects = Vec::new();
        flatten_blocks(value, &mut objects);
        for object in objects {
            for (key, value) in clean_object(object) {
                merged.entry(key).or_insert(value);
            }
        }
    }

    merged
}

/// Expand arrays and `@graph` containers into a flat list of objects.
fn flatten_blocks(value: Value, out: &mut Vec<Map<String, Value>>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_blocks(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_blocks(graph, out);
            }
            if map.keys().any(|k| k != "@context") {
                out.push(map);
            }
        }
        _ => {}
    }
}

/// Drop `@context`/`@id` and rename `@type` to `schema_type`, recursively.
fn clean_object(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(key, _)| key != "@context" && key != "@id")
        .map(|(key, value)| {
            let key = if key == "@type" {
                "schema_type".to_string()
            } else {
                key
            };
            (key, clean_value(value))
        })
        .collect()
}

fn clean_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(clean_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(clean_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(scripts: &[&str]) -> Html {
        let body: String = scripts
            .iter()
            .map(|s| format!(r#"<script type="application/ld+json">{s}</script>"#))
            .collect();
        Html::parse_document(&format!("<html><head>{body}</head><body></body></html>"))
    }

    #[test]
    fn single_product_block() {
        let html = doc(&[r##"{
            "@context": "https://schema.org",
            "@type": "Product",
            "@id": "#product",
            "name": "Widget",
            "offers": {"@type": "Offer", "price": "19.99", "priceCurrency": "USD"}
        }"##]);
        let meta = extract_embedded_metadata(&html);

        assert_eq!(meta["schema_type"], "Product");
        assert_eq!(meta["name"], "Widget");
        assert_eq!(meta["offers"]["schema_type"], "Offer");
        assert_eq!(meta["offers"]["price"], "19.99");
        assert!(!meta.contains_key("@context"));
        assert!(!meta.contains_key("@id"));
    }

    #[test]
    fn graph_and_arrays_are_flattened() {
        let html = doc(&[r#"{
            "@context": "https://schema.org",
            "@graph": [
                {"@type": "BreadcrumbList", "itemListElement": []},
                {"@type": "Article", "headline": "Launch", "author": "Ana"}
            ]
        }"#]);
        let meta = extract_embedded_metadata(&html);

        assert_eq!(meta["schema_type"], "BreadcrumbList");
        assert_eq!(meta["headline"], "Launch");
        assert_eq!(meta["author"], "Ana");
    }

    #[test]
    fn first_block_wins_on_collision() {
        let html = doc(&[
            r#"{"@type": "Product", "name": "First", "sku": "A1"}"#,
            r#"[{"@type": "Organization", "name": "Second", "url": "https://acme.example"}]"#,
        ]);
        let meta = extract_embedded_metadata(&html);

        assert_eq!(meta["name"], "First");
        assert_eq!(meta["schema_type"], "Product");
        assert_eq!(meta["sku"], "A1");
        assert_eq!(meta["url"], "https://acme.example");
    }

    #[test]
    fn invalid_blocks_are_skipped() {
        let html = doc(&["{ not json", r#"{"@type": "Event", "name": "Expo"}"#, "  "]);
        let meta = extract_embedded_metadata(&html);
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["name"], json!("Expo"));
    }

    #[test]
    fn no_blocks_yields_empty_map() {
        let html = Html::parse_document("<html><body><p>plain</p></body></html>");
        assert!(extract_embedded_metadata(&html).is_empty());
    }
}
