//! Heuristics for deciding whether a fetched document has real content or is
//! a client-rendered shell that needs a browser.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

/// Empty SPA mount points: `<div id="root"></div>`, `<div id="__next"></div>`, ...
static EMPTY_MOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<div[^>]*\bid\s*=\s*["'](root|app|__next|__nuxt|svelte)["'][^>]*>\s*</div>"#)
        .expect("valid regex")
});

static NG_APP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bng-app\b|\bng-version\s*="#).expect("valid regex"));

static ENABLE_JS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<noscript[^>]*>.*?(enable|turn on)\s+javascript.*?</noscript>")
        .expect("valid regex")
});

/// Verdict for one fetched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substance {
    Substantial,
    /// Not enough to work with. `text_chars` is the visible text yield.
    Thin { reason: &'static str, text_chars: usize },
}

impl Substance {
    pub fn is_substantial(&self) -> bool {
        matches!(self, Self::Substantial)
    }
}

/// Assess a document against the minimum visible-text threshold.
pub fn assess(html: &str, min_text_chars: usize) -> Substance {
    let doc = Html::parse_document(html);
    let text_chars = visible_text_len(&doc);

    if text_chars < min_text_chars {
        return Substance::Thin {
            reason: "low text yield",
            text_chars,
        };
    }

    // A shell with a little boilerplate text still counts as a shell.
    let looks_like_shell = EMPTY_MOUNT_RE.is_match(html)
        || ENABLE_JS_RE.is_match(html)
        || NG_APP_RE.is_match(html);
    if looks_like_shell && text_chars < min_text_chars * 2 {
        return Substance::Thin {
            reason: "client-rendered shell",
            text_chars,
        };
    }

    Substance::Substantial
}

/// Count visible characters outside script/style/noscript/template elements.
pub fn visible_text_len(doc: &Html) -> usize {
    doc.tree
        .nodes()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            let parent = parent.value().as_element()?;
            if matches!(
                parent.name(),
                "script" | "style" | "noscript" | "template" | "head" | "title"
            ) {
                return None;
            }
            Some(text.split_whitespace().map(|w| w.chars().count() + 1).sum::<usize>())
        })
        .sum()
}
