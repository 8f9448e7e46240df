#![deny(missing_docs)]
//! Notemark core: renders Notion-style block trees to text through
//! pluggable transformers, variable collectors, and `{{{name}}}` templates.

/// Blocks, rich text spans, and the page record.
pub mod block;
/// Chain stages.
pub mod chain;
/// Page context and the per-block transformer context.
pub mod context;
/// Core error types.
pub mod error;
/// Template-driven renderer and its builder.
pub mod renderer;
/// Transformer traits and the registry.
pub mod transformer;
/// Variable collectors, resolvers, and templates.
pub mod variables;

pub use block::{
    Annotation, Annotations, Block, BlockTree, DEFAULT_COLOR, Metadata, PageData, Properties,
    RichText,
};
pub use chain::{Chain, forward};
pub use context::{BlockContext, EngineContext};
pub use error::{BoxError, ConfigError, RenderError};
pub use renderer::{Renderer, RendererBuilder};
pub use transformer::{
    AnnotationInput, AnnotationTransformer, BlockTransformer, FnAnnotationTransformer,
    FnBlockTransformer, LINK, TransformerRegistry, annotation_fn, block_fn,
};
pub use variables::{
    CONTENT, Collectors, FnResolver, IMPORTS, ResolveContext, Template, VariableRegistry,
    VariableResolver, resolver_fn,
};
