//! Block and annotation transformers for Markdown and MDX output.
//!
//! - `markdown` - CommonMark/GFM rendering of every supported block type
//! - `mdx` - the Markdown set with JSX component overrides

pub mod markdown;
pub mod mdx;

use notemark_core::{BlockContext, RenderError, RichText};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output dialect a transformer renders for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    /// Plain Markdown.
    #[default]
    Markdown,
    /// MDX: plain text braces are escaped so they are not read as expressions.
    Mdx,
}

impl Flavor {
    /// Escapes plain text that bypasses the annotation cascade.
    pub(crate) fn escape(self, text: &str) -> String {
        match self {
            Flavor::Markdown => text.to_string(),
            Flavor::Mdx => escape_braces(text),
        }
    }
}

/// Options shared by the Markdown and MDX transformer sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarkdownOptions {
    /// Spaces used to indent nested list children; widened to fit longer markers.
    pub list_indent: usize,
    /// Marker for bulleted list items.
    pub bullet: String,
    /// Levels added to every heading, capped at `######`.
    pub heading_offset: usize,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            list_indent: 2,
            bullet: "-".to_string(),
            heading_offset: 0,
        }
    }
}

/// Renders `spans` through the annotation cascade, escaping plain text for `flavor`.
pub(crate) async fn render_spans(
    ctx: &BlockContext<'_>,
    spans: Vec<RichText>,
    flavor: Flavor,
) -> Result<String, RenderError> {
    let spans = match flavor {
        Flavor::Markdown => spans,
        Flavor::Mdx => spans
            .into_iter()
            .map(|mut span| {
                if !span.annotations.code {
                    span.plain_text = escape_braces(&span.plain_text);
                }
                span
            })
            .collect(),
    };
    ctx.process_rich_text(&spans).await
}

/// Renders the current block's `rich_text`.
pub(crate) async fn block_text(ctx: &BlockContext<'_>, flavor: Flavor) -> Result<String, RenderError> {
    render_spans(ctx, ctx.block().rich_text(), flavor).await
}

/// Renders the current block's children, or returns `None` when it has none.
pub(crate) async fn children(ctx: &BlockContext<'_>) -> Result<Option<String>, RenderError> {
    let block = ctx.block();
    if block.children.is_empty() {
        return Ok(None);
    }
    let rendered = ctx.process_children(&block.children).await?;
    Ok(Some(rendered).filter(|text| !text.is_empty()))
}

/// Escapes `{` and `}` so MDX does not parse them as expressions.
pub(crate) fn escape_braces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            _ => out.push(c),
        }
    }
    out
}

/// Wraps the non-whitespace core of `text`, keeping surrounding whitespace outside.
///
/// Emphasis delimiters next to whitespace do not parse, so `"bold "` becomes
/// `"**bold** "` rather than `"**bold **"`.
pub(crate) fn wrap_trimmed(text: &str, open: &str, close: &str) -> String {
    let core = text.trim();
    if core.is_empty() {
        return text.to_string();
    }
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len();
    format!("{}{open}{core}{close}{}", &text[..start], &text[end..])
}

/// Prefixes every non-empty line of `text` with `prefix`.
pub(crate) fn prefix_lines(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indents every non-empty line of `text` by `width` spaces.
pub(crate) fn indent(text: &str, width: usize) -> String {
    prefix_lines(text, &" ".repeat(width))
}

/// Concatenated plain text of `spans`, ignoring annotations.
pub(crate) fn plain_text(spans: &[RichText]) -> String {
    spans.iter().map(|span| span.plain_text.as_str()).collect()
}

/// Url of a file object (`{"type": "external", "external": {"url": ...}}`).
pub(crate) fn file_url(payload: &Value) -> Option<&str> {
    let kind = payload.get("type").and_then(Value::as_str)?;
    payload.get(kind)?.get("url")?.as_str()
}

/// Joins top-level block outputs with blank lines, keeping adjacent list items tight.
pub(crate) fn join_blocks(fragments: &[String]) -> String {
    let mut out = String::new();
    let mut previous_is_item = false;
    for fragment in fragments.iter().filter(|fragment| !fragment.is_empty()) {
        let is_item = is_list_item(fragment);
        if !out.is_empty() {
            out.push_str(if previous_is_item && is_item { "\n" } else { "\n\n" });
        }
        out.push_str(fragment);
        previous_is_item = is_item;
    }
    out
}

fn is_list_item(fragment: &str) -> bool {
    if ["- ", "* ", "+ "].iter().any(|marker| fragment.starts_with(marker)) {
        return true;
    }
    let digits = fragment.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && fragment[digits..].starts_with(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_keeps_whitespace_outside() {
        assert_eq!(wrap_trimmed("bold ", "**", "**"), "**bold** ");
        assert_eq!(wrap_trimmed("  two words", "_", "_"), "  _two words_");
        assert_eq!(wrap_trimmed("   ", "**", "**"), "   ");
    }

    #[test]
    fn braces_are_escaped() {
        assert_eq!(escape_braces("a {b} c"), "a \\{b\\} c");
    }

    #[test]
    fn indent_skips_blank_lines() {
        assert_eq!(indent("a\n\nb", 2), "  a\n\n  b");
        assert_eq!(prefix_lines("x\ny", "> "), "> x\n> y");
    }

    #[test]
    fn list_items_stay_tight() {
        let fragments: Vec<String> = ["# Title", "- a", "- b", "1. c", "para", ""]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(join_blocks(&fragments), "# Title\n\n- a\n- b\n1. c\n\npara");
    }

    #[test]
    fn file_url_follows_type_tag() {
        let payload = serde_json::json!({ "type": "file", "file": { "url": "https://s3/x.png" } });
        assert_eq!(file_url(&payload), Some("https://s3/x.png"));
        assert_eq!(file_url(&serde_json::json!({})), None);
    }
}
