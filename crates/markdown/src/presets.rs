//! Ready-made renderer configurations.

use async_trait::async_trait;
use notemark_core::{BoxError, CONTENT, IMPORTS, RendererBuilder, ResolveContext, VariableResolver};

use crate::transformers::mdx::{self, MdxOptions};
use crate::transformers::{MarkdownOptions, join_blocks, markdown};

/// Template used by [`markdown_renderer`].
pub const MARKDOWN_TEMPLATE: &str = "{{{imports}}}\n{{{content}}}";
/// Template used by [`mdx_renderer`].
pub const MDX_TEMPLATE: &str = "{{{imports}}}\n\n{{{content}}}";

/// Joins top-level blocks with blank lines, keeping list items tight.
pub struct BlockJoiner;

#[async_trait]
impl VariableResolver for BlockJoiner {
    async fn resolve(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<String, BoxError> {
        Ok(join_blocks(ctx.fragments(name)))
    }
}

/// Joins import lines; blank when there are none.
pub struct ImportLines;

#[async_trait]
impl VariableResolver for ImportLines {
    async fn resolve(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<String, BoxError> {
        Ok(ctx.fragments(name).join("\n").trim().to_string())
    }
}

/// Markdown renderer with default options.
pub fn markdown_renderer() -> RendererBuilder {
    markdown_renderer_with(&MarkdownOptions::default())
}

/// Markdown renderer with the given options.
pub fn markdown_renderer_with(options: &MarkdownOptions) -> RendererBuilder {
    RendererBuilder::default()
        .name("markdown")
        .template(MARKDOWN_TEMPLATE)
        .block_transformers(markdown::block_transformers(options))
        .annotation_transformers(markdown::annotation_transformers())
        .resolver(CONTENT, BlockJoiner)
}

/// MDX renderer importing its components from `options.component_module`.
pub fn mdx_renderer(options: MdxOptions) -> RendererBuilder {
    RendererBuilder::default()
        .name("mdx")
        .template(MDX_TEMPLATE)
        .block_transformers(mdx::block_transformers(&options))
        .annotation_transformers(markdown::annotation_transformers())
        .resolver(CONTENT, BlockJoiner)
        .resolver(IMPORTS, ImportLines)
}
