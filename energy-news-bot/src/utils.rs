/// Hard cap on post length, in Unicode scalar values.
pub const MAX_POST_CHARS: usize = 280;

const TRUNCATION_MARKER: &str = "...";

/// Trim surrounding whitespace and cut anything over the cap down to
/// 277 characters followed by `...`.
pub fn enforce_post_length(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_POST_CHARS {
        return trimmed.to_string();
    }

    let keep = MAX_POST_CHARS - TRUNCATION_MARKER.chars().count();
    let mut out: String = trimmed.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Shorten free text for a log line or an error column.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_only_trimmed() {
        assert_eq!(enforce_post_length("  Grid news \n"), "Grid news");
        let exact = "x".repeat(280);
        assert_eq!(enforce_post_length(&exact), exact);
    }

    #[test]
    fn long_text_is_cut_to_277_plus_marker() {
        let long = "a".repeat(310);
        let out = enforce_post_length(&long);
        assert_eq!(out.chars().count(), 280);
        assert_eq!(&out[..277], &long[..277]);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn counts_characters_not_bytes() {
        // multi-byte scalar values
        let emoji = "⚡".repeat(281);
        let out = enforce_post_length(&emoji);
        assert_eq!(out.chars().count(), 280);
        assert!(out.starts_with(&"⚡".repeat(277)));

        let fits = "é".repeat(280);
        assert_eq!(enforce_post_length(&fits), fits);
    }

    #[test]
    fn line_breaks_count() {
        let text = format!("{}\n{}", "a".repeat(140), "b".repeat(140));
        let out = enforce_post_length(&text);
        assert_eq!(out.chars().count(), 280);
        assert!(out.ends_with("b..."));
    }

    #[test]
    fn preview_marks_cuts() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij", 4), "abcd…");
    }
}
