//! Per-invocation rendering state and the context handed to block transformers.

use std::borrow::Cow;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use log::trace;

use crate::block::{Block, Metadata, PageData, Properties, RichText};
use crate::error::RenderError;
use crate::transformer::{AnnotationInput, BlockTransformer, LINK, TransformerRegistry};
use crate::variables::{CONTENT, Collectors};

/// Snapshot of the page being rendered.
///
/// Rebuilt from the incoming [`PageData`] at the start of every cycle.
/// Metadata accumulates: incoming keys overwrite same-named keys and other
/// keys from earlier cycles are kept.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    page_id: String,
    properties: Properties,
    metadata: Metadata,
    blocks: Vec<Block>,
}

impl EngineContext {
    /// Creates a context seeded with `metadata`.
    pub fn with_metadata(metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub(crate) fn refresh(&mut self, data: &PageData) {
        self.page_id.clone_from(&data.page_id);
        self.properties.clone_from(&data.block_tree.properties);
        self.blocks.clone_from(&data.block_tree.blocks);
        for (key, value) in &data.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }

    /// Identifier of the current page.
    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// Properties of the current page.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Merged metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Top-level blocks of the current page.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

/// Returns `base` with `overlay` merged over it; overlay wins on key collision.
pub(crate) fn merge_metadata<'m>(base: &'m Metadata, overlay: Option<&Metadata>) -> Cow<'m, Metadata> {
    match overlay {
        Some(overlay) if !overlay.is_empty() => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Cow::Owned(merged)
        }
        _ => Cow::Borrowed(base),
    }
}

/// A transformer's result waiting to be recorded into the collectors.
struct Dispatched<'a> {
    output: String,
    transformer: &'a dyn BlockTransformer,
}

/// State of one processing cycle: the page snapshot, the registry, and the
/// collectors being filled.
pub(crate) struct Session<'a> {
    context: &'a EngineContext,
    transformers: &'a TransformerRegistry,
    collectors: Mutex<Collectors>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        context: &'a EngineContext,
        transformers: &'a TransformerRegistry,
        collectors: Collectors,
    ) -> Self {
        Self {
            context,
            transformers,
            collectors: Mutex::new(collectors),
        }
    }

    pub(crate) fn into_collectors(self) -> Collectors {
        self.collectors
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn collectors(&self) -> MutexGuard<'_, Collectors> {
        self.collectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Renders one block and records its output.
    pub(crate) async fn process_block(
        &self,
        block: &Block,
        metadata: Option<&Metadata>,
        depth: usize,
    ) -> Result<String, RenderError> {
        let metadata = merge_metadata(self.context.metadata(), metadata);
        match self.dispatch(block, &metadata, depth).await? {
            Some(dispatched) => Ok(self.record(dispatched, depth)),
            None => Ok(String::new()),
        }
    }

    /// Renders sibling blocks concurrently and records them in input order.
    ///
    /// Returns the non-empty outputs joined with `\n`.
    pub(crate) async fn process_children(
        &self,
        blocks: &[Block],
        base: &Metadata,
        metadata: Option<&Metadata>,
        depth: usize,
    ) -> Result<String, RenderError> {
        let metadata = merge_metadata(base, metadata);
        let dispatched = try_join_all(
            blocks
                .iter()
                .map(|block| self.dispatch(block, &metadata, depth)),
        )
        .await?;

        let outputs: Vec<String> = dispatched
            .into_iter()
            .flatten()
            .map(|dispatched| self.record(dispatched, depth))
            .filter(|output| !output.is_empty())
            .collect();
        Ok(outputs.join("\n"))
    }

    /// Composes spans concurrently and concatenates them in input order.
    pub(crate) async fn process_rich_text(
        &self,
        spans: &[RichText],
        metadata: &Metadata,
    ) -> Result<String, RenderError> {
        let rendered = try_join_all(spans.iter().map(|span| self.compose_span(span, metadata)))
            .await?;
        Ok(rendered.concat())
    }

    async fn dispatch(
        &self,
        block: &Block,
        metadata: &Metadata,
        depth: usize,
    ) -> Result<Option<Dispatched<'a>>, RenderError> {
        let transformers: &'a TransformerRegistry = self.transformers;
        let Some(transformer) = transformers.block(&block.block_type) else {
            trace!("no transformer for block type `{}`, skipping", block.block_type);
            return Ok(None);
        };

        trace!("transforming `{}` block {} at depth {}", block.block_type, block.id, depth);
        let ctx = BlockContext {
            session: self,
            block,
            metadata: metadata.clone(),
            depth,
        };
        let output = transformer
            .transform(&ctx)
            .await
            .map_err(|source| RenderError::Block {
                block_type: block.block_type.clone(),
                source,
            })?;

        Ok(Some(Dispatched {
            output,
            transformer: transformer.as_ref(),
        }))
    }

    /// Merges imports and appends output to the target variable.
    ///
    /// Nested `content` output is only returned to the parent transformer,
    /// which embeds it in its own output.
    fn record(&self, dispatched: Dispatched<'a>, depth: usize) -> String {
        let Dispatched {
            output,
            transformer,
        } = dispatched;
        let target = transformer.target_variable().unwrap_or(CONTENT);

        let mut collectors = self.collectors();
        collectors.add_imports(transformer.imports().iter().cloned());
        if depth == 0 || target != CONTENT {
            collectors.push(target, output.clone());
        } else {
            collectors.ensure(target);
        }
        output
    }

    async fn compose_span(&self, span: &RichText, metadata: &Metadata) -> Result<String, RenderError> {
        let link = span.href.as_deref();
        let mut text = span.plain_text.clone();

        for annotation in span.annotations.active() {
            let Some(transformer) = self.transformers.annotation(annotation.name()) else {
                continue;
            };
            let next = transformer
                .transform(AnnotationInput {
                    text: &text,
                    annotations: &span.annotations,
                    link,
                    metadata,
                })
                .await
                .map_err(|source| RenderError::Annotation {
                    annotation: annotation.name().to_string(),
                    text: span.plain_text.clone(),
                    source,
                })?;
            text = next;
        }

        if let Some(url) = link {
            let transformer =
                self.transformers
                    .annotation(LINK)
                    .ok_or_else(|| RenderError::MissingLinkTransformer {
                        text: span.plain_text.clone(),
                    })?;
            return transformer
                .transform(AnnotationInput {
                    text: &text,
                    annotations: &span.annotations,
                    link: Some(url),
                    metadata,
                })
                .await
                .map_err(|source| RenderError::Annotation {
                    annotation: LINK.to_string(),
                    text: span.plain_text.clone(),
                    source,
                });
        }

        Ok(text)
    }
}

/// Everything a block transformer can see while rendering one block.
///
/// Built fresh for every block: the page snapshot, the block itself, and the
/// engine metadata with caller-supplied metadata merged over it.
pub struct BlockContext<'a> {
    session: &'a Session<'a>,
    block: &'a Block,
    metadata: Metadata,
    depth: usize,
}

impl<'a> BlockContext<'a> {
    /// Identifier of the page being rendered.
    pub fn page_id(&self) -> &str {
        self.session.context.page_id()
    }

    /// Page properties.
    pub fn properties(&self) -> &Properties {
        self.session.context.properties()
    }

    /// Metadata visible to this block.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Top-level blocks of the page.
    pub fn blocks(&self) -> &[Block] {
        self.session.context.blocks()
    }

    /// The block being transformed.
    pub fn block(&self) -> &'a Block {
        self.block
    }

    /// Nesting depth; `0` for top-level blocks.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Registered transformers.
    pub fn transformers(&self) -> &TransformerRegistry {
        self.session.transformers
    }

    /// Composes `spans` through the registered annotation transformers.
    pub async fn process_rich_text(&self, spans: &[RichText]) -> Result<String, RenderError> {
        self.session.process_rich_text(spans, &self.metadata).await
    }

    /// Like [`process_rich_text`](Self::process_rich_text) with extra metadata merged in.
    pub async fn process_rich_text_with(
        &self,
        spans: &[RichText],
        metadata: &Metadata,
    ) -> Result<String, RenderError> {
        let metadata = merge_metadata(&self.metadata, Some(metadata));
        self.session.process_rich_text(spans, &metadata).await
    }

    /// Renders nested blocks; non-empty outputs are joined with `\n`.
    pub async fn process_children(&self, blocks: &[Block]) -> Result<String, RenderError> {
        self.session
            .process_children(blocks, &self.metadata, None, self.depth + 1)
            .await
    }

    /// Like [`process_children`](Self::process_children) with extra metadata merged in.
    pub async fn process_children_with(
        &self,
        blocks: &[Block],
        metadata: &Metadata,
    ) -> Result<String, RenderError> {
        self.session
            .process_children(blocks, &self.metadata, Some(metadata), self.depth + 1)
            .await
    }
}

impl std::fmt::Debug for BlockContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockContext")
            .field("page_id", &self.page_id())
            .field("block_type", &self.block.block_type)
            .field("depth", &self.depth)
            .finish()
    }
}
