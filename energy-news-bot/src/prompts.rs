use thiserror::Error;

use crate::types::Article;

/// Substituted for `{summary}` when the feed gave us none.
pub const SUMMARY_FALLBACK: &str = "No summary available";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("unclosed placeholder starting at byte {0}")]
    Unclosed(usize),

    #[error("unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),
}

/// Render a template with `{name}` placeholders. `{{` and `}}` produce
/// literal braces. Every placeholder must be present in `vars`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }

                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, ch)) => name.push(ch),
                        None => return Err(TemplateError::Unclosed(pos)),
                    }
                }

                let value = vars
                    .iter()
                    .find(|(key, _)| *key == name.trim())
                    .map(|(_, value)| *value)
                    .ok_or_else(|| TemplateError::UnknownPlaceholder(name.clone()))?;
                out.push_str(value);
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(TemplateError::UnmatchedClose(pos));
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

fn summary_or_fallback(summary: &Option<String>) -> &str {
    match summary.as_deref() {
        Some(text) if !text.trim().is_empty() => text,
        _ => SUMMARY_FALLBACK,
    }
}

/// Classification prompt: `{title}` and `{summary}`.
pub fn filter_prompt(template: &str, article: &Article) -> Result<String, TemplateError> {
    render(
        template,
        &[
            ("title", article.title.as_str()),
            ("summary", summary_or_fallback(&article.summary)),
        ],
    )
}

/// Generation prompt: `{title}`, `{summary}` and `{url}`.
pub fn tweet_prompt(template: &str, article: &Article) -> Result<String, TemplateError> {
    render(
        template,
        &[
            ("title", article.title.as_str()),
            ("summary", summary_or_fallback(&article.summary)),
            ("url", article.url.as_str()),
        ],
    )
}

/// Check that both templates only use the placeholders their stage provides.
pub fn validate_templates(filter_template: &str, tweet_template: &str) -> Result<(), TemplateError> {
    render(filter_template, &[("title", ""), ("summary", "")])?;
    render(tweet_template, &[("title", ""), ("summary", ""), ("url", "")])?;
    Ok(())
}
