//! Markdown rendering for Notion blocks and annotations.

use std::sync::Arc;

use async_trait::async_trait;
use notemark_core::{
    Annotation, AnnotationInput, AnnotationTransformer, BlockContext, BlockTransformer, BoxError,
    RichText,
};
use serde_json::Value;

use super::{
    Flavor, MarkdownOptions, block_text, children, file_url, indent, plain_text, render_spans,
    wrap_trimmed,
};

const MAX_HEADING_LEVEL: usize = 6;

fn delimiters(annotation: Annotation) -> Option<(&'static str, &'static str)> {
    match annotation {
        Annotation::Bold => Some(("**", "**")),
        Annotation::Italic => Some(("_", "_")),
        Annotation::Strikethrough => Some(("~~", "~~")),
        Annotation::Underline => Some(("<u>", "</u>")),
        Annotation::Code | Annotation::Color => None,
    }
}

/// Bold, italic, strikethrough, or underline markup.
///
/// Defers to [`CodeSpan`] on code spans, since markup inside backticks is literal.
pub struct Emphasis(Annotation);

#[async_trait]
impl AnnotationTransformer for Emphasis {
    async fn transform(&self, input: AnnotationInput<'_>) -> Result<String, BoxError> {
        if input.annotations.code {
            return Ok(input.text.to_string());
        }
        match delimiters(self.0) {
            Some((open, close)) => Ok(wrap_trimmed(input.text, open, close)),
            None => Ok(input.text.to_string()),
        }
    }
}

/// Inline code, with the span's other emphasis applied outside the backticks.
pub struct CodeSpan;

#[async_trait]
impl AnnotationTransformer for CodeSpan {
    async fn transform(&self, input: AnnotationInput<'_>) -> Result<String, BoxError> {
        let run = longest_backtick_run(input.text);
        let fence = "`".repeat(run + 1);
        let pad = if run > 0 { " " } else { "" };
        let mut text = format!("{fence}{pad}{}{pad}{fence}", input.text);
        for annotation in input.annotations.active() {
            if let Some((open, close)) = delimiters(annotation) {
                text = format!("{open}{text}{close}");
            }
        }
        Ok(text)
    }
}

/// `[text](url)`.
pub struct Link;

#[async_trait]
impl AnnotationTransformer for Link {
    async fn transform(&self, input: AnnotationInput<'_>) -> Result<String, BoxError> {
        let url = input.link.unwrap_or_default();
        if input.text.is_empty() {
            return Ok(format!("<{url}>"));
        }
        Ok(format!("[{}]({url})", input.text))
    }
}

/// Annotation transformers for Markdown and MDX; `color` is left unmapped.
pub fn annotation_transformers() -> Vec<(&'static str, Arc<dyn AnnotationTransformer>)> {
    let mut transformers: Vec<(&'static str, Arc<dyn AnnotationTransformer>)> = [
        Annotation::Bold,
        Annotation::Italic,
        Annotation::Strikethrough,
        Annotation::Underline,
    ]
    .into_iter()
    .map(|annotation| {
        let transformer: Arc<dyn AnnotationTransformer> = Arc::new(Emphasis(annotation));
        (annotation.name(), transformer)
    })
    .collect();
    transformers.push((Annotation::Code.name(), Arc::new(CodeSpan)));
    transformers.push((notemark_core::LINK, Arc::new(Link)));
    transformers
}

/// Paragraph text, followed by indented children.
pub struct Paragraph {
    flavor: Flavor,
    indent: usize,
}

#[async_trait]
impl BlockTransformer for Paragraph {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let text = block_text(ctx, self.flavor).await?;
        Ok(match children(ctx).await? {
            Some(nested) => format!("{text}\n\n{}", indent(&nested, self.indent)),
            None => text,
        })
    }
}

/// `#` to `######` headings; toggleable headings render their children below.
pub struct Heading {
    level: usize,
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for Heading {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let text = block_text(ctx, self.flavor).await?;
        let heading = format!("{} {text}", "#".repeat(self.level));
        Ok(match children(ctx).await? {
            Some(nested) => format!("{heading}\n\n{nested}"),
            None => heading,
        })
    }
}

enum Marker {
    Bullet(String),
    Numbered,
    ToDo,
}

impl Marker {
    /// Column where the item's content starts; children must be indented at least this far.
    fn width(&self) -> usize {
        match self {
            Marker::Bullet(bullet) => bullet.chars().count() + 1,
            Marker::Numbered => "1. ".len(),
            Marker::ToDo => "- ".len(),
        }
    }
}

/// Bulleted, numbered, and to-do list items with nested children indented.
pub struct ListItem {
    marker: Marker,
    flavor: Flavor,
    indent: usize,
}

#[async_trait]
impl BlockTransformer for ListItem {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let marker = match &self.marker {
            Marker::Bullet(bullet) => format!("{bullet} "),
            Marker::Numbered => "1. ".to_string(),
            Marker::ToDo => {
                let checked = ctx.block().bool_field("checked");
                format!("- [{}] ", if checked { "x" } else { " " })
            }
        };
        let text = block_text(ctx, self.flavor).await?;
        let item = format!("{marker}{text}");
        let width = self.indent.max(self.marker.width());
        Ok(match children(ctx).await? {
            Some(nested) => format!("{item}\n{}", indent(&nested, width)),
            None => item,
        })
    }
}

/// Block quote; children are quoted as well.
pub struct Quote {
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for Quote {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let mut body = block_text(ctx, self.flavor).await?;
        if let Some(nested) = children(ctx).await? {
            body = format!("{body}\n\n{nested}");
        }
        Ok(quote(&body))
    }
}

fn quote(body: &str) -> String {
    body.lines()
        .map(|line| if line.is_empty() { ">".to_string() } else { format!("> {line}") })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Emoji icon of a callout, if it has one.
pub(crate) fn callout_icon(ctx: &BlockContext<'_>) -> Option<String> {
    let icon = ctx.block().field("icon")?;
    match icon.get("type").and_then(Value::as_str)? {
        "emoji" => icon.get("emoji").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Callout as a block quote starting with its icon.
pub struct Callout {
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for Callout {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let text = block_text(ctx, self.flavor).await?;
        let mut body = match callout_icon(ctx) {
            Some(icon) => format!("{icon} {text}"),
            None => text,
        };
        if let Some(nested) = children(ctx).await? {
            body = format!("{body}\n\n{nested}");
        }
        Ok(quote(&body))
    }
}

/// Fenced code block. Notion's `plain text` language maps to no info string.
pub struct Code;

#[async_trait]
impl BlockTransformer for Code {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let block = ctx.block();
        let source = plain_text(&block.rich_text());
        let language = match block.str_field("language") {
            Some("plain text") | None => "",
            Some(language) => language,
        };
        let fence = "`".repeat(longest_backtick_run(&source).max(2) + 1);
        Ok(format!("{fence}{language}\n{source}\n{fence}"))
    }
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Thematic break.
pub struct Divider;

#[async_trait]
impl BlockTransformer for Divider {
    async fn transform(&self, _ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        Ok("---".to_string())
    }
}

/// Display math between `$$` fences.
pub struct Equation {
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for Equation {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let expression = ctx.block().str_field("expression").unwrap_or_default();
        Ok(format!("$$\n{}\n$$", self.flavor.escape(expression)))
    }
}

/// Caption of a media or bookmark block as plain text.
pub(crate) fn caption(ctx: &BlockContext<'_>) -> String {
    plain_text(&ctx.block().rich_text_field("caption"))
}

/// Images as `![caption](url)`; video, file, and pdf blocks as links.
pub struct Media {
    inline: bool,
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for Media {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let block = ctx.block();
        let Some(url) = block.data().and_then(file_url) else {
            return Err(format!("{} block has no url", block.block_type).into());
        };
        let caption = caption(ctx);
        if self.inline {
            return Ok(format!("![{}]({url})", self.flavor.escape(&caption)));
        }
        let label = if caption.is_empty() {
            block.str_field("name").unwrap_or(url)
        } else {
            caption.as_str()
        };
        Ok(format!("[{}]({url})", self.flavor.escape(label)))
    }
}

/// Bookmark, embed, and link preview blocks as a link to their url.
pub struct Bookmark {
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for Bookmark {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let Some(url) = ctx.block().str_field("url") else {
            return Ok(String::new());
        };
        let caption = caption(ctx);
        let label = if caption.is_empty() { url } else { caption.as_str() };
        Ok(format!("[{}]({url})", self.flavor.escape(label)))
    }
}

/// Toggle as an HTML `<details>` element.
pub struct Toggle {
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for Toggle {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let summary = block_text(ctx, self.flavor).await?;
        let mut out = format!("<details>\n<summary>{summary}</summary>\n");
        if let Some(nested) = children(ctx).await? {
            out.push('\n');
            out.push_str(&nested);
            out.push('\n');
        }
        out.push_str("</details>");
        Ok(out)
    }
}

/// Pipe table; the first row is the header.
pub struct Table;

#[async_trait]
impl BlockTransformer for Table {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let Some(rows) = children(ctx).await? else {
            return Ok(String::new());
        };
        let width = ctx
            .block()
            .field("table_width")
            .and_then(Value::as_u64)
            .map(|width| width as usize)
            .unwrap_or_else(|| rows.lines().next().map_or(0, |row| row.matches(" | ").count() + 1));
        let separator = format!("|{}", " --- |".repeat(width.max(1)));

        let mut lines = rows.lines();
        let mut out = Vec::new();
        if let Some(header) = lines.next() {
            out.push(header.to_string());
            out.push(separator);
        }
        out.extend(lines.map(str::to_string));
        Ok(out.join("\n"))
    }
}

/// One table row: `| a | b |`.
pub struct TableRow {
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for TableRow {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let cells = match ctx.block().field("cells") {
            Some(cells) => serde_json::from_value::<Vec<Vec<RichText>>>(cells.clone())?,
            None => Vec::new(),
        };
        let mut rendered = Vec::with_capacity(cells.len());
        for cell in cells {
            let text = render_spans(ctx, cell, self.flavor).await?;
            rendered.push(text.replace('|', "\\|").replace('\n', "<br>"));
        }
        Ok(format!("| {} |", rendered.join(" | ")))
    }
}

/// Child page reference as its title.
pub struct ChildPage {
    flavor: Flavor,
}

#[async_trait]
impl BlockTransformer for ChildPage {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let title = ctx.block().str_field("title").unwrap_or_default();
        Ok(self.flavor.escape(title))
    }
}

/// Markdown block transformers, keyed by Notion block type.
pub fn block_transformers(options: &MarkdownOptions) -> Vec<(&'static str, Arc<dyn BlockTransformer>)> {
    flavored(Flavor::Markdown, options)
}

pub(crate) fn entry<T>(block_type: &'static str, transformer: T) -> (&'static str, Arc<dyn BlockTransformer>)
where
    T: BlockTransformer + 'static,
{
    (block_type, Arc::new(transformer))
}

pub(crate) fn flavored(
    flavor: Flavor,
    options: &MarkdownOptions,
) -> Vec<(&'static str, Arc<dyn BlockTransformer>)> {
    let heading = |level: usize| Heading {
        level: (level + options.heading_offset).min(MAX_HEADING_LEVEL),
        flavor,
    };
    let list = |marker: Marker| ListItem {
        marker,
        flavor,
        indent: options.list_indent,
    };

    vec![
        entry(
            "paragraph",
            Paragraph {
                flavor,
                indent: options.list_indent,
            },
        ),
        entry("heading_1", heading(1)),
        entry("heading_2", heading(2)),
        entry("heading_3", heading(3)),
        entry("bulleted_list_item", list(Marker::Bullet(options.bullet.clone()))),
        entry("numbered_list_item", list(Marker::Numbered)),
        entry("to_do", list(Marker::ToDo)),
        entry("quote", Quote { flavor }),
        entry("callout", Callout { flavor }),
        entry("code", Code),
        entry("divider", Divider),
        entry("equation", Equation { flavor }),
        entry("image", Media { inline: true, flavor }),
        entry("video", Media { inline: false, flavor }),
        entry("file", Media { inline: false, flavor }),
        entry("pdf", Media { inline: false, flavor }),
        entry("bookmark", Bookmark { flavor }),
        entry("embed", Bookmark { flavor }),
        entry("link_preview", Bookmark { flavor }),
        entry("toggle", Toggle { flavor }),
        entry("table", Table),
        entry("table_row", TableRow { flavor }),
        entry("child_page", ChildPage { flavor }),
    ]
}
