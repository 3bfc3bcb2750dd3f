//! Head-and-tail truncation for oversized page text.

/// Inserted where the middle of the text was cut.
pub const TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]\n\n";

/// Share of the budget given to the head of the text.
const HEAD_SHARE_PERCENT: usize = 70;

/// Truncate `text` to at most `max_chars` characters, keeping the head and the
/// tail and cutting the middle. Returns the text and whether it was cut.
pub fn truncate_middle(text: &str, max_chars: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= max_chars {
        return (text.to_string(), false);
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_len {
        return (text.chars().take(max_chars).collect(), true);
    }

    let budget = max_chars - marker_len;
    let head_len = budget * HEAD_SHARE_PERCENT / 100;
    let tail_len = budget - head_len;

    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();

    (format!("{head}{TRUNCATION_MARKER}{tail}"), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        let (out, cut) = truncate_middle("hello", 10);
        assert_eq!(out, "hello");
        assert!(!cut);
    }

    #[test]
    fn keeps_head_and_tail() {
        let text = format!("{}{}{}", "H".repeat(500), "M".repeat(1000), "T".repeat(500));
        let (out, cut) = truncate_middle(&text, 400);

        assert!(cut);
        assert_eq!(out.chars().count(), 400);
        assert!(out.starts_with('H'));
        assert!(out.ends_with('T'));
        assert!(out.contains(TRUNCATION_MARKER));
        assert!(!out.contains('M'));

        let head = out.split(TRUNCATION_MARKER).next().unwrap();
        let budget = 400 - TRUNCATION_MARKER.chars().count();
        assert_eq!(head.chars().count(), budget * 70 / 100);
    }

    #[test]
    fn respects_char_boundaries() {
        let text = "é".repeat(300);
        let (out, cut) = truncate_middle(&text, 100);
        assert!(cut);
        assert_eq!(out.chars().count(), 100);
    }

    #[test]
    fn tiny_budget_takes_prefix() {
        let (out, cut) = truncate_middle("abcdefghij", 4);
        assert_eq!(out, "abcd");
        assert!(cut);
    }

    #[test]
    fn deterministic() {
        let text = "word ".repeat(1000);
        assert_eq!(truncate_middle(&text, 300), truncate_middle(&text, 300));
    }
}
