//! Transformer capabilities and the registry that dispatches on type tags.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::block::{Annotations, Metadata};
use crate::context::BlockContext;
use crate::error::BoxError;

/// Reserved annotation name applied last to every linked span.
pub const LINK: &str = "link";

/// Converts one block into text.
///
/// Transformers are registered per block type and receive a [`BlockContext`]
/// through which they can render rich text and nested children.
#[async_trait]
pub trait BlockTransformer: Send + Sync {
    /// Renders the context's current block.
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError>;

    /// Import lines this transformer needs, merged into the `imports` variable.
    fn imports(&self) -> &[String] {
        &[]
    }

    /// Variable receiving the output; `content` when `None`.
    fn target_variable(&self) -> Option<&str> {
        None
    }
}

/// Input handed to an annotation transformer.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationInput<'a> {
    /// Text produced by the previous step of the cascade.
    pub text: &'a str,
    /// All annotations of the span being composed.
    pub annotations: &'a Annotations,
    /// Link target of the span, if any.
    pub link: Option<&'a str>,
    /// Metadata of the enclosing block.
    pub metadata: &'a Metadata,
}

/// Wraps annotated text, e.g. `bold` turning `t` into `**t**`.
#[async_trait]
pub trait AnnotationTransformer: Send + Sync {
    /// Applies the annotation to `input.text`.
    async fn transform(&self, input: AnnotationInput<'_>) -> Result<String, BoxError>;
}

/// Block transformer backed by a synchronous closure.
///
/// Suited to leaf blocks that do not need rich text or children rendering.
pub struct FnBlockTransformer<F> {
    f: F,
    imports: Vec<String>,
    target: Option<String>,
}

/// Wraps a closure as a [`BlockTransformer`].
pub fn block_fn<F>(f: F) -> FnBlockTransformer<F>
where
    F: Fn(&BlockContext<'_>) -> Result<String, BoxError> + Send + Sync,
{
    FnBlockTransformer {
        f,
        imports: Vec::new(),
        target: None,
    }
}

impl<F> FnBlockTransformer<F> {
    /// Declares import lines for this transformer.
    pub fn with_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imports = imports.into_iter().map(Into::into).collect();
        self
    }

    /// Routes output to `variable` instead of `content`.
    pub fn into_variable(mut self, variable: impl Into<String>) -> Self {
        self.target = Some(variable.into());
        self
    }
}

#[async_trait]
impl<F> BlockTransformer for FnBlockTransformer<F>
where
    F: Fn(&BlockContext<'_>) -> Result<String, BoxError> + Send + Sync,
{
    async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
        (self.f)(ctx)
    }

    fn imports(&self) -> &[String] {
        &self.imports
    }

    fn target_variable(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

/// Annotation transformer backed by a synchronous closure.
pub struct FnAnnotationTransformer<F>(F);

/// Wraps a closure as an [`AnnotationTransformer`].
pub fn annotation_fn<F>(f: F) -> FnAnnotationTransformer<F>
where
    F: Fn(AnnotationInput<'_>) -> Result<String, BoxError> + Send + Sync,
{
    FnAnnotationTransformer(f)
}

#[async_trait]
impl<F> AnnotationTransformer for FnAnnotationTransformer<F>
where
    F: Fn(AnnotationInput<'_>) -> Result<String, BoxError> + Send + Sync,
{
    async fn transform(&self, input: AnnotationInput<'_>) -> Result<String, BoxError> {
        (self.0)(input)
    }
}

/// Open mapping from type tags to transformers.
///
/// Registration overwrites silently (last write wins); a missing mapping is
/// never an error.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    blocks: HashMap<String, Arc<dyn BlockTransformer>>,
    annotations: HashMap<String, Arc<dyn AnnotationTransformer>>,
}

impl TransformerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transformer` for `block_type`, replacing any previous one.
    pub fn insert_block(
        &mut self,
        block_type: impl Into<String>,
        transformer: Arc<dyn BlockTransformer>,
    ) {
        self.blocks.insert(block_type.into(), transformer);
    }

    /// Registers `transformer` for annotation `name`, replacing any previous one.
    pub fn insert_annotation(
        &mut self,
        name: impl Into<String>,
        transformer: Arc<dyn AnnotationTransformer>,
    ) {
        self.annotations.insert(name.into(), transformer);
    }

    /// Registers many block transformers at once.
    pub fn extend_blocks<I, S>(&mut self, transformers: I)
    where
        I: IntoIterator<Item = (S, Arc<dyn BlockTransformer>)>,
        S: Into<String>,
    {
        for (block_type, transformer) in transformers {
            self.insert_block(block_type, transformer);
        }
    }

    /// Registers many annotation transformers at once.
    pub fn extend_annotations<I, S>(&mut self, transformers: I)
    where
        I: IntoIterator<Item = (S, Arc<dyn AnnotationTransformer>)>,
        S: Into<String>,
    {
        for (name, transformer) in transformers {
            self.insert_annotation(name, transformer);
        }
    }

    /// Looks up the transformer for `block_type`.
    pub fn block(&self, block_type: &str) -> Option<&Arc<dyn BlockTransformer>> {
        self.blocks.get(block_type)
    }

    /// Looks up the annotation transformer registered as `name`.
    pub fn annotation(&self, name: &str) -> Option<&Arc<dyn AnnotationTransformer>> {
        self.annotations.get(name)
    }

    /// Returns true when a transformer exists for `block_type`.
    pub fn has_block(&self, block_type: &str) -> bool {
        self.blocks.contains_key(block_type)
    }

    /// Returns true when an annotation transformer exists for `name`.
    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.contains_key(name)
    }

    /// Registered block types, sorted.
    pub fn block_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.blocks.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Registered annotation names, sorted.
    pub fn annotation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.annotations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerRegistry")
            .field("blocks", &self.block_types())
            .field("annotations", &self.annotation_names())
            .finish()
    }
}
