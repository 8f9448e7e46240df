//! MDX rendering: the Markdown set with JSX components for callouts, toggles, and images.

use std::sync::Arc;

use async_trait::async_trait;
use html_escape::encode_double_quoted_attribute;
use notemark_core::{BlockContext, BlockTransformer, BoxError};
use serde::{Deserialize, Serialize};

use super::markdown::{callout_icon, caption, entry, flavored};
use super::{Flavor, MarkdownOptions, block_text, children, file_url, plain_text};

/// Options for the MDX transformer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MdxOptions {
    /// Module the `Callout`, `Toggle`, and `Image` components are imported from.
    pub component_module: String,
    /// Options shared with the Markdown transformers.
    pub markdown: MarkdownOptions,
}

impl Default for MdxOptions {
    fn default() -> Self {
        Self {
            component_module: "@/components".to_string(),
            markdown: MarkdownOptions::default(),
        }
    }
}

impl MdxOptions {
    /// Import line for `component`.
    pub fn import_for(&self, component: &str) -> String {
        format!("import {{ {component} }} from \"{}\";", self.component_module)
    }
}

fn attribute(value: &str) -> String {
    encode_double_quoted_attribute(value).into_owned()
}

/// Wraps `body` in a component, leaving blank lines so MDX parses it as Markdown.
fn component(open: String, name: &str, body: &str) -> String {
    if body.is_empty() {
        return format!("{open}</{name}>");
    }
    format!("{open}\n\n{body}\n\n</{name}>")
}

/// `<Callout icon="…">…</Callout>`.
pub struct Callout {
    imports: Vec<String>,
}

#[async_trait]
impl BlockTransformer for Callout {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let mut body = block_text(ctx, Flavor::Mdx).await?;
        if let Some(nested) = children(ctx).await? {
            body = format!("{body}\n\n{nested}");
        }
        let open = match callout_icon(ctx) {
            Some(icon) => format!("<Callout icon=\"{}\">", attribute(&icon)),
            None => "<Callout>".to_string(),
        };
        Ok(component(open, "Callout", &body))
    }

    fn imports(&self) -> &[String] {
        &self.imports
    }
}

/// `<Toggle summary="…">…</Toggle>`; the summary is the toggle's plain text.
pub struct Toggle {
    imports: Vec<String>,
}

#[async_trait]
impl BlockTransformer for Toggle {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let summary = plain_text(&ctx.block().rich_text());
        let body = children(ctx).await?.unwrap_or_default();
        let open = format!("<Toggle summary=\"{}\">", attribute(&summary));
        Ok(component(open, "Toggle", &body))
    }

    fn imports(&self) -> &[String] {
        &self.imports
    }
}

/// `<Image src="…" alt="…" />`.
pub struct Image {
    imports: Vec<String>,
}

#[async_trait]
impl BlockTransformer for Image {
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        let Some(src) = ctx.block().data().and_then(file_url) else {
            return Err("image block has no url".into());
        };
        Ok(format!(
            "<Image src=\"{}\" alt=\"{}\" />",
            attribute(src),
            attribute(&caption(ctx))
        ))
    }

    fn imports(&self) -> &[String] {
        &self.imports
    }
}

/// MDX block transformers, keyed by Notion block type.
pub fn block_transformers(options: &MdxOptions) -> Vec<(&'static str, Arc<dyn BlockTransformer>)> {
    let mut transformers = flavored(Flavor::Mdx, &options.markdown);
    let overrides = [
        entry(
            "callout",
            Callout {
                imports: vec![options.import_for("Callout")],
            },
        ),
        entry(
            "toggle",
            Toggle {
                imports: vec![options.import_for("Toggle")],
            },
        ),
        entry(
            "image",
            Image {
                imports: vec![options.import_for("Image")],
            },
        ),
    ];
    for (block_type, transformer) in overrides {
        match transformers.iter_mut().find(|slot| slot.0 == block_type) {
            Some(slot) => slot.1 = transformer,
            None => transformers.push((block_type, transformer)),
        }
    }
    transformers
}
