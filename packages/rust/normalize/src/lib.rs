//! Content normalization: HTML in, model-ready text out.
//!
//! Strips page chrome, converts the main content to Markdown with `htmd`,
//! runs a series of cleanup passes, and alongside that pulls out embedded
//! JSON-LD metadata, the page title and the content language.

mod cleanup;
pub mod language;
pub mod metadata;
pub mod truncate;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use pagelens_fetcher::RawPage;
use pagelens_shared::{ExtractedData, PageLensError, Result};

pub use language::{declared_language, detect_language};
pub use metadata::extract_embedded_metadata;
pub use truncate::{TRUNCATION_MARKER, truncate_middle};

/// Elements removed before conversion.
const CHROME_SELECTOR: &str = "script, style, noscript, svg, iframe, template, nav, aside, \
     header, footer, [role=\"navigation\"], [role=\"banner\"], [role=\"contentinfo\"]";

/// Main-content containers in priority order.
const CONTENT_SELECTORS: &[&str] = &[
    "[itemprop=\"articleBody\"]",
    "article",
    "main",
    "[role=\"main\"]",
    "#content",
    ".content",
    "#main",
];

/// A container must hold at least this share of the body text to be used.
const MIN_CONTENT_SHARE_PERCENT: usize = 30;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for normalization.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Character budget for `cleaned_text`.
    pub max_chars: usize,
    /// Language reported when neither detection nor the document says otherwise.
    pub default_language: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_chars: 12_000,
            default_language: "en".into(),
        }
    }
}

/// Normalized view of one fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPage {
    /// Markdown text of the main content, possibly truncated.
    pub cleaned_text: String,
    /// Merged JSON-LD objects. Empty when the page has none.
    pub embedded_metadata: ExtractedData,
    /// ISO 639-1 code.
    pub language: String,
    pub title: Option<String>,
    /// Whether `cleaned_text` was cut to fit `max_chars`.
    pub truncated: bool,
}

impl NormalizedPage {
    pub fn is_empty(&self) -> bool {
        self.cleaned_text.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Normalize a fetched page.
///
/// 1. Reads JSON-LD, the declared language and the title from the full document
/// 2. Removes chrome (scripts, navigation, site header/footer, asides)
/// 3. Picks the main content container
/// 4. Pre-processes HTML tables into Markdown tables
/// 5. Converts HTML → Markdown via `htmd` and runs the cleanup pipeline
/// 6. Detects the language and truncates to the character budget
///
/// Deterministic: the same page and options always give the same output.
#[instrument(skip_all, fields(url = %page.final_url))]
pub fn normalize(page: &RawPage, opts: &NormalizeOptions) -> Result<NormalizedPage> {
    let mut doc = Html::parse_document(&page.html);

    let embedded_metadata = extract_embedded_metadata(&doc);
    let declared = declared_language(&doc);
    let document_title = extract_document_title(&doc);

    strip_chrome(&mut doc);
    let content_html = extract_content_html(&doc);
    let (content_html, tables) = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg", "button"])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| PageLensError::Conversion(format!("htmd conversion failed: {e}")))?;

    let raw_markdown = restore_tables(raw_markdown, &tables);

    debug!(raw_len = raw_markdown.len(), tables = tables.len(), "htmd conversion complete");

    let base_url = Url::parse(&page.final_url).ok();
    let cleaned = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());

    let language = detect_language(&cleaned, declared.as_deref(), &opts.default_language);
    let title = document_title.or_else(|| extract_title_from_markdown(&cleaned));
    let (cleaned_text, truncated) = truncate_middle(&cleaned, opts.max_chars);

    debug!(
        chars = cleaned_text.chars().count(),
        truncated,
        %language,
        metadata_keys = embedded_metadata.len(),
        "normalization complete"
    );

    Ok(NormalizedPage {
        cleaned_text,
        embedded_metadata,
        language,
        title,
        truncated,
    })
}

// ---------------------------------------------------------------------------
// Chrome removal / content selection
// ---------------------------------------------------------------------------

/// Detach chrome elements from the tree.
///
/// `<header>`/`<footer>` inside an article or main element belong to the
/// content and are kept.
fn strip_chrome(doc: &mut Html) {
    let selector = Selector::parse(CHROME_SELECTOR).expect("valid selector");
    let ids: Vec<_> = doc
        .select(&selector)
        .filter(|el| !is_content_landmark(el))
        .map(|el| el.id())
        .collect();

    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn is_content_landmark(el: &ElementRef) -> bool {
    matches!(el.value().name(), "header" | "footer")
        && el.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "article" | "main"))
        })
}

/// Extract the main content HTML, falling back to `<body>`.
fn extract_content_html(doc: &Html) -> String {
    let body_sel = Selector::parse("body").expect("valid selector");
    let body = doc.select(&body_sel).next();
    let body_len = body.as_ref().map(text_len).unwrap_or(0);

    for sel_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            if text_len(&el) * 100 >= body_len * MIN_CONTENT_SHARE_PERCENT {
                debug!(selector = sel_str, "using content container");
                return el.inner_html();
            }
        }
    }

    match body {
        Some(body) => body.inner_html(),
        None => doc.root_element().inner_html(),
    }
}

fn text_len(el: &ElementRef) -> usize {
    el.text().map(|t| t.trim().len()).sum()
}

/// Title from `<title>`, then `og:title`.
fn extract_document_title(doc: &Html) -> Option<String> {
    let title_sel = Selector::parse("head > title").expect("valid selector");
    let og_sel = Selector::parse(r#"meta[property="og:title"]"#).expect("valid selector");

    doc.select(&title_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| {
            doc.select(&og_sel)
                .next()
                .and_then(|el| el.value().attr("content"))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        })
}

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

/// Swap HTML `<table>` elements for placeholders and render them as Markdown.
///
/// `htmd` 0.1 doesn't support table conversion, so we handle it manually. The
/// placeholder keeps htmd from collapsing the rendered rows onto one line.
fn preprocess_tables(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(html);
    let table_sel = Selector::parse("table").expect("valid selector");

    if doc.select(&table_sel).next().is_none() {
        return (html.to_string(), Vec::new());
    }

    let mut result = html.to_string();
    let mut tables = Vec::new();
    for table_el in doc.select(&table_sel) {
        // Nested tables are rendered as part of their outer table.
        if table_el
            .ancestors()
            .any(|a| a.value().as_element().is_some_and(|e| e.name() == "table"))
        {
            continue;
        }
        let placeholder = format!("<p>{}</p>", table_placeholder(tables.len()));
        let replaced = result.replacen(&table_el.html(), &placeholder, 1);
        if replaced != result {
            result = replaced;
            tables.push(html_table_to_markdown(&table_el));
        }
    }

    (result, tables)
}

fn table_placeholder(index: usize) -> String {
    format!("PAGELENSTABLE{index}X")
}

/// Put rendered Markdown tables back in place of their placeholders.
fn restore_tables(mut markdown: String, tables: &[String]) -> String {
    for (i, table) in tables.iter().enumerate() {
        markdown = markdown.replacen(&table_placeholder(i), table, 1);
    }
    markdown
}

/// Convert a single HTML table element to a markdown table string.
fn html_table_to_markdown(table: &ElementRef) -> String {
    let tr_sel = Selector::parse("tr").expect("valid selector");
    let cell_sel = Selector::parse("th, td").expect("valid selector");

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for (i, tr) in table.select(&tr_sel).enumerate() {
        let cells: Vec<ElementRef> = tr.select(&cell_sel).collect();
        if cells.is_empty() {
            continue;
        }
        if i == 0 && cells.iter().all(|c| c.value().name() == "th") {
            has_header = true;
        }
        rows.push(
            cells
                .iter()
                .map(|cell| {
                    cell.text()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace('|', "/")
                })
                .collect(),
        );
    }

    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    // Normalize all rows to have the same number of columns
    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    // Without a header row, emit an empty one so the table stays valid Markdown.
    let header = if has_header {
        rows.remove(0)
    } else {
        vec![String::new(); col_count]
    };

    let mut md = String::from("\n\n");
    md.push_str(&format!("| {} |\n", header.join(" | ")));
    md.push_str(&format!("| {} |\n", vec!["---"; col_count].join(" | ")));
    for row in &rows {
        md.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
