#![deny(missing_docs)]
//! Notemark collaborators: Markdown and MDX transformer sets, property
//! extraction, frontmatter, and renderer presets.

/// Frontmatter formatting and the frontmatter chain stage.
pub mod frontmatter;
/// Preconfigured Markdown and MDX renderers.
pub mod presets;
/// Notion property extraction.
pub mod property;
/// Block and annotation transformers.
pub mod transformers;

pub use frontmatter::{FrontmatterStage, format_value};
pub use presets::{MARKDOWN_TEMPLATE, MDX_TEMPLATE, markdown_renderer, markdown_renderer_with, mdx_renderer};
pub use property::{PropertyValue, extract_properties, extract_property};
pub use transformers::mdx::MdxOptions;
pub use transformers::{Flavor, MarkdownOptions};
