//! Post-conversion cleanup pipeline for page text.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The pipeline normalizes headings, drops markup noise, resolves links and
//! squeezes whitespace so the model sees compact, readable Markdown.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = md.to_string();

    result = normalize_headings(&result);
    result = strip_leftover_html(&result);
    result = drop_inline_images(&result);
    result = drop_empty_links(&result);
    result = resolve_links(&result, base_url);
    result = collapse_inline_whitespace(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize heading levels
// ---------------------------------------------------------------------------

/// Ensure there's at most one H1.
fn normalize_headings(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

    let mut h1_count = 0;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        if let Some(caps) = H_RE.captures(line) {
            if &caps[1] == "#" {
                h1_count += 1;
                if h1_count > 1 {
                    // Demote duplicate H1s to H2
                    lines.push(format!("## {}", &caps[2]));
                    continue;
                }
            }
        }
        lines.push(line.to_string());
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove stray layout tags that survived the conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|picture|source|label|form|input|button)(?:\s[^>]*)?/?>",
        )
        .expect("valid regex")
    });

    HTML_TAG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Drop inline data-URI images
// ---------------------------------------------------------------------------

/// Replace `![alt](data:...)` with its alt text; base64 blobs are pure noise.
fn drop_inline_images(md: &str) -> String {
    static DATA_IMG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(data:[^)]*\)").expect("valid regex"));

    DATA_IMG_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Drop empty links
// ---------------------------------------------------------------------------

/// Remove links with no anchor text (icon links, tracking pixels).
fn drop_empty_links(md: &str) -> String {
    static EMPTY_LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?:^|[^!])\[\s*\]\([^)]*\)").expect("valid regex"));

    EMPTY_LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            // Keep the leading char consumed by the non-image guard.
            let m = &caps[0];
            if m.starts_with('[') {
                String::new()
            } else {
                m.chars().next().map(String::from).unwrap_or_default()
            }
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Resolve relative links
// ---------------------------------------------------------------------------

/// Resolve relative URLs in Markdown links and images against a base URL.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)([^)]*)\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let bang = &caps[1];
            let text = &caps[2];
            let href = &caps[3];
            let rest = &caps[4];

            // Skip absolute URLs and anchors
            if href.starts_with("http://")
                || href.starts_with("https://")
                || href.starts_with('#')
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                return caps[0].to_string();
            }

            match base.join(href) {
                Ok(resolved) => format!("{bang}[{text}]({resolved}{rest})"),
                Err(_) => caps[0].to_string(),
            }
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Collapse inline whitespace
// ---------------------------------------------------------------------------

/// Squeeze runs of spaces/tabs inside a line, keeping leading indentation.
fn collapse_inline_whitespace(md: &str) -> String {
    static INLINE_WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\S)[ \t\u{a0}]{2,}").expect("valid regex"));

    INLINE_WS_RE.replace_all(md, "$1 ").to_string()
}

// ---------------------------------------------------------------------------
// Pass 7: Normalize whitespace
// ---------------------------------------------------------------------------

/// Strip trailing whitespace and lines that are only whitespace.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 8: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 2+ blank lines into exactly 1.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_headings_demotes_duplicate_h1() {
        let input = "# Title\n\nSome text\n\n# Another Title\n\nMore text";
        let result = normalize_headings(input);
        assert_eq!(result, "# Title\n\nSome text\n\n## Another Title\n\nMore text");
    }

    #[test]
    fn normalize_headings_keeps_single_h1() {
        let input = "# Only One\n\n## Sub\n\n### Deep";
        assert_eq!(normalize_headings(input), input);
    }

    #[test]
    fn strip_leftover_html_keeps_text() {
        let input = "<div class=\"price\">$19.99</div> <span>in stock</span>";
        assert_eq!(strip_leftover_html(input), "$19.99 in stock");
    }

    #[test]
    fn data_uri_images_become_alt_text() {
        let input = "Logo ![Acme](data:image/png;base64,AAAA) here";
        assert_eq!(drop_inline_images(input), "Logo Acme here");
    }

    #[test]
    fn empty_links_are_removed() {
        assert_eq!(drop_empty_links("Share [](/share) now"), "Share  now");
        assert_eq!(drop_empty_links("[ ](/icon)"), "");
        // Images with empty alt text are kept.
        assert_eq!(drop_empty_links("![](/a.png)"), "![](/a.png)");
    }

    #[test]
    fn resolve_links_relative() {
        let base = Url::parse("https://shop.example.com/products/widget").unwrap();
        let input = "[Reviews](reviews) and ![Photo](/img/w.jpg)";
        let result = resolve_links(input, Some(&base));
        assert_eq!(
            result,
            "[Reviews](https://shop.example.com/products/reviews) and ![Photo](https://shop.example.com/img/w.jpg)"
        );
    }

    #[test]
    fn resolve_links_keeps_absolute_and_anchors() {
        let base = Url::parse("https://shop.example.com/").unwrap();
        let input = "[Ext](https://other.example.org/x) [Top](#top) [Mail](mailto:a@b.c)";
        assert_eq!(resolve_links(input, Some(&base)), input);
    }

    #[test]
    fn resolve_links_keeps_titles() {
        let base = Url::parse("https://shop.example.com/").unwrap();
        let input = r#"[Cart](/cart "Your cart")"#;
        assert_eq!(
            resolve_links(input, Some(&base)),
            r#"[Cart](https://shop.example.com/cart "Your cart")"#
        );
    }

    #[test]
    fn collapse_inline_whitespace_keeps_indent() {
        let input = "    - item   one\tand\t\ttwo";
        assert_eq!(collapse_inline_whitespace(input), "    - item one\tand two");
    }

    #[test]
    fn clean_blank_lines_collapses_excess() {
        assert_eq!(clean_blank_lines("Line 1\n\n\n\n\nLine 2"), "Line 1\n\nLine 2");
        assert_eq!(clean_blank_lines("Line 1\n\nLine 2"), "Line 1\n\nLine 2");
    }

    #[test]
    fn full_pipeline() {
        let base = Url::parse("https://news.example.com/story").unwrap();
        let input = "# Headline\n\n\n\n<div>Body   text</div>   \n\n# Second\n[](/x)[More](/more)\n";
        let result = run_pipeline(input, Some(&base));
        assert_eq!(
            result,
            "# Headline\n\nBody text\n\n## Second\n[More](https://news.example.com/more)"
        );
    }
}
