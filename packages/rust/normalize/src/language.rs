//! Content language detection.
//!
//! Statistical detection over the cleaned text with `lingua`, restricted to
//! the languages the prompts are tuned for. Falls back to the document's
//! declared language and then to a configured default.

use std::sync::LazyLock;

use lingua::{Language, LanguageDetector, LanguageDetectorBuilder};
use scraper::{Html, Selector};

/// Languages considered by the detector.
const SUPPORTED: [Language; 12] = [
    Language::English,
    Language::Spanish,
    Language::French,
    Language::German,
    Language::Italian,
    Language::Portuguese,
    Language::Russian,
    Language::Chinese,
    Language::Japanese,
    Language::Korean,
    Language::Arabic,
    Language::Hindi,
];

/// Shorter samples are too noisy to classify.
const MIN_SAMPLE_CHARS: usize = 20;

/// Detection cost grows with input; a few thousand chars is plenty.
const MAX_SAMPLE_CHARS: usize = 4_000;

static DETECTOR: LazyLock<LanguageDetector> =
    LazyLock::new(|| LanguageDetectorBuilder::from_languages(&SUPPORTED).build());

/// Detect the ISO 639-1 code of `text`, falling back to `declared` then `default`.
pub fn detect_language(text: &str, declared: Option<&str>, default: &str) -> String {
    detect_from_text(text)
        .or_else(|| declared.and_then(parse_lang_tag))
        .unwrap_or_else(|| default.to_string())
}

fn detect_from_text(text: &str) -> Option<String> {
    let sample: String = text
        .chars()
        .filter(|c| !c.is_ascii_punctuation() && !c.is_ascii_digit())
        .take(MAX_SAMPLE_CHARS)
        .collect();
    if sample.split_whitespace().map(|w| w.chars().count()).sum::<usize>() < MIN_SAMPLE_CHARS {
        return None;
    }

    DETECTOR
        .detect_language_of(sample)
        .map(|lang| lang.iso_code_639_1().to_string().to_lowercase())
}

/// The declared document language from `<html lang>` or a `Content-Language` meta tag.
pub fn declared_language(doc: &Html) -> Option<String> {
    let html_sel = Selector::parse("html[lang]").expect("valid selector");
    if let Some(lang) = doc
        .select(&html_sel)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .and_then(parse_lang_tag)
    {
        return Some(lang);
    }

    let meta_sel = Selector::parse("meta[http-equiv]").expect("valid selector");
    doc.select(&meta_sel)
        .filter(|el| {
            el.value()
                .attr("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("content-language"))
        })
        .find_map(|el| el.value().attr("content").and_then(parse_lang_tag))
}

/// `en-US` → `en`. Rejects anything that is not a plausible language subtag.
fn parse_lang_tag(tag: &str) -> Option<String> {
    let primary = tag.trim().split(['-', '_']).next()?.to_ascii_lowercase();
    let plausible =
        (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_alphabetic());
    plausible.then_some(primary)
}
