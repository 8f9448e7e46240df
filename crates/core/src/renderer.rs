//! The rendering engine: a chain stage that turns a page's block tree into text.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::block::{Block, Metadata, PageData, RichText};
use crate::chain::{Chain, forward};
use crate::context::{EngineContext, Session, merge_metadata};
use crate::error::{ConfigError, RenderError};
use crate::transformer::{AnnotationTransformer, BlockTransformer, TransformerRegistry};
use crate::variables::{Collectors, Template, VariableRegistry, VariableResolver};

const DEFAULT_NAME: &str = "renderer";

/// Template-driven renderer.
///
/// Registries and collectors live as long as the renderer. Every call to
/// [`Chain::process`] refreshes the page context, clears all collectors except
/// `imports`, renders the block tree, substitutes the template, and forwards
/// the record to the next stage if one is set.
pub struct Renderer {
    name: String,
    transformers: TransformerRegistry,
    variables: VariableRegistry,
    context: EngineContext,
    next: Option<Box<dyn Chain>>,
}

impl Renderer {
    /// Creates a renderer for `template` with empty registries.
    pub fn new(template: &str) -> Result<Self, ConfigError> {
        Ok(Self::from_template(Template::parse(template)?))
    }

    /// Creates a renderer for an already validated template.
    pub fn from_template(template: Template) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            transformers: TransformerRegistry::new(),
            variables: VariableRegistry::new(template),
            context: EngineContext::default(),
            next: None,
        }
    }

    /// Starts a [`RendererBuilder`].
    pub fn builder() -> RendererBuilder {
        RendererBuilder::default()
    }

    /// Registers a block transformer, replacing any previous one for `block_type`.
    pub fn create_block_transformer<T>(&mut self, block_type: &str, transformer: T) -> &mut Self
    where
        T: BlockTransformer + 'static,
    {
        self.transformers.insert_block(block_type, Arc::new(transformer));
        self
    }

    /// Registers many block transformers at once.
    pub fn create_block_transformers<I, S>(&mut self, transformers: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, Arc<dyn BlockTransformer>)>,
        S: Into<String>,
    {
        self.transformers.extend_blocks(transformers);
        self
    }

    /// Registers an annotation transformer, replacing any previous one for `name`.
    pub fn create_annotation_transformer<T>(&mut self, name: &str, transformer: T) -> &mut Self
    where
        T: AnnotationTransformer + 'static,
    {
        self.transformers.insert_annotation(name, Arc::new(transformer));
        self
    }

    /// Registers many annotation transformers at once.
    pub fn create_annotation_transformers<I, S>(&mut self, transformers: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, Arc<dyn AnnotationTransformer>)>,
        S: Into<String>,
    {
        self.transformers.extend_annotations(transformers);
        self
    }

    /// Creates an empty collector for `name` if absent.
    pub fn add_variable(&mut self, name: &str) -> &mut Self {
        self.variables.add_variable(name);
        self
    }

    /// Registers `name` with a custom resolver, replacing any previous one.
    pub fn set_resolver<R>(&mut self, name: &str, resolver: R) -> &mut Self
    where
        R: VariableResolver + 'static,
    {
        self.variables.set_resolver(name, Arc::new(resolver));
        self
    }

    /// Validates and installs a new template.
    pub fn set_template(&mut self, template: &str) -> Result<&mut Self, ConfigError> {
        self.variables.set_template(template)?;
        Ok(self)
    }

    /// Adds import lines, skipping ones already collected.
    pub fn add_imports<I, S>(&mut self, imports: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables.add_imports(imports);
        self
    }

    /// Sets the stage receiving the rendered record.
    pub fn set_next<C>(&mut self, next: C) -> &mut Self
    where
        C: Chain + 'static,
    {
        self.next = Some(Box::new(next));
        self
    }

    /// Renames the stage; the name prefixes errors.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Registered transformers.
    pub fn transformers(&self) -> &TransformerRegistry {
        &self.transformers
    }

    /// Variables, resolvers, and the active template.
    pub fn variables(&self) -> &VariableRegistry {
        &self.variables
    }

    /// Current collectors.
    pub fn collectors(&self) -> &Collectors {
        self.variables.collectors()
    }

    /// Context of the most recent cycle.
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Renders one block against the current context.
    ///
    /// Unmapped block types yield an empty string and touch no collector.
    pub async fn process_block(
        &mut self,
        block: &Block,
        metadata: Option<&Metadata>,
    ) -> Result<String, RenderError> {
        let session = Session::new(
            &self.context,
            &self.transformers,
            self.variables.take_collectors(),
        );
        let result = session.process_block(block, metadata, 0).await;
        self.variables.restore_collectors(session.into_collectors());
        result
    }

    /// Renders sibling blocks against the current context.
    pub async fn process_children(
        &mut self,
        blocks: &[Block],
        metadata: Option<&Metadata>,
    ) -> Result<String, RenderError> {
        let session = Session::new(
            &self.context,
            &self.transformers,
            self.variables.take_collectors(),
        );
        let result = session
            .process_children(blocks, self.context.metadata(), metadata, 0)
            .await;
        self.variables.restore_collectors(session.into_collectors());
        result
    }

    /// Composes rich text spans against the current context.
    pub async fn process_rich_text(
        &self,
        spans: &[RichText],
        metadata: Option<&Metadata>,
    ) -> Result<String, RenderError> {
        let metadata = merge_metadata(self.context.metadata(), metadata);
        let session = Session::new(&self.context, &self.transformers, Collectors::new());
        session.process_rich_text(spans, &metadata).await
    }

    /// Resolves every variable and substitutes the template.
    pub async fn render_template(&self) -> Result<String, RenderError> {
        self.variables.render_template(&self.context).await
    }

    async fn render(&mut self, data: &PageData) -> Result<String, RenderError> {
        self.context.refresh(data);
        self.variables.reset();
        debug!(
            "{}: rendering page {} ({} top-level blocks)",
            self.name,
            data.page_id,
            data.block_tree.blocks.len()
        );

        let session = Session::new(
            &self.context,
            &self.transformers,
            self.variables.take_collectors(),
        );
        let traversal = session
            .process_children(self.context.blocks(), self.context.metadata(), None, 0)
            .await;
        self.variables.restore_collectors(session.into_collectors());
        traversal?;

        let rendered = self.render_template().await?;
        debug!("{}: rendered page {} ({} bytes)", self.name, data.page_id, rendered.len());
        Ok(rendered)
    }
}

#[async_trait]
impl Chain for Renderer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&mut self, mut data: PageData) -> Result<PageData, RenderError> {
        let content = self
            .render(&data)
            .await
            .map_err(|err| RenderError::stage(self.name.clone(), err))?;
        data.content = Some(content);
        forward(self.next.as_mut(), data).await
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("name", &self.name)
            .field("transformers", &self.transformers)
            .field("variables", &self.variables)
            .field("next", &self.next.as_ref().map(|next| next.name()))
            .finish()
    }
}

/// Collects renderer configuration and validates it on [`build`](Self::build).
#[derive(Default)]
pub struct RendererBuilder {
    name: Option<String>,
    template: Option<String>,
    transformers: TransformerRegistry,
    variables: Vec<String>,
    resolvers: Vec<(String, Arc<dyn VariableResolver>)>,
    imports: Vec<String>,
    metadata: Metadata,
    next: Option<Box<dyn Chain>>,
}

impl RendererBuilder {
    /// Sets the stage name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the output template.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Registers a block transformer.
    pub fn block_transformer<T>(mut self, block_type: &str, transformer: T) -> Self
    where
        T: BlockTransformer + 'static,
    {
        self.transformers.insert_block(block_type, Arc::new(transformer));
        self
    }

    /// Registers many block transformers.
    pub fn block_transformers<I, S>(mut self, transformers: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn BlockTransformer>)>,
        S: Into<String>,
    {
        self.transformers.extend_blocks(transformers);
        self
    }

    /// Registers an annotation transformer.
    pub fn annotation_transformer<T>(mut self, name: &str, transformer: T) -> Self
    where
        T: AnnotationTransformer + 'static,
    {
        self.transformers.insert_annotation(name, Arc::new(transformer));
        self
    }

    /// Registers many annotation transformers.
    pub fn annotation_transformers<I, S>(mut self, transformers: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn AnnotationTransformer>)>,
        S: Into<String>,
    {
        self.transformers.extend_annotations(transformers);
        self
    }

    /// Declares an extra variable.
    pub fn variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }

    /// Declares a variable with a custom resolver.
    pub fn resolver<R>(mut self, name: impl Into<String>, resolver: R) -> Self
    where
        R: VariableResolver + 'static,
    {
        self.resolvers.push((name.into(), Arc::new(resolver)));
        self
    }

    /// Seeds the `imports` collector.
    pub fn imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imports.extend(imports.into_iter().map(Into::into));
        self
    }

    /// Seeds the engine metadata; page metadata is merged over it.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the stage receiving the rendered record.
    pub fn next<C>(mut self, next: C) -> Self
    where
        C: Chain + 'static,
    {
        self.next = Some(Box::new(next));
        self
    }

    /// Validates the template and assembles the renderer.
    pub fn build(self) -> Result<Renderer, ConfigError> {
        let template = self.template.ok_or(ConfigError::MissingTemplate)?;
        let mut variables = VariableRegistry::new(Template::parse(template)?);
        for name in &self.variables {
            variables.add_variable(name);
        }
        for (name, resolver) in self.resolvers {
            variables.set_resolver(&name, resolver);
        }
        variables.add_imports(self.imports);

        Ok(Renderer {
            name: self.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            transformers: self.transformers,
            variables,
            context: EngineContext::with_metadata(self.metadata),
            next: self.next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RichText;
    use crate::context::BlockContext;
    use crate::error::BoxError;
    use crate::transformer::{AnnotationInput, annotation_fn, block_fn};
    use crate::variables::{CONTENT, IMPORTS, resolver_fn};
    use serde_json::json;
    use std::sync::Mutex;

    /// Renders the block's rich text unchanged.
    struct Passthrough;

    #[async_trait]
    impl BlockTransformer for Passthrough {
        async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
            Ok(ctx.process_rich_text(&ctx.block().rich_text()).await?)
        }
    }

    /// Renders rich text, then the children indented under it.
    struct WithChildren;

    #[async_trait]
    impl BlockTransformer for WithChildren {
        async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
            let text = ctx.process_rich_text(&ctx.block().rich_text()).await?;
            let children = ctx.process_children(&ctx.block().children).await?;
            if children.is_empty() {
                return Ok(text);
            }
            let indented: Vec<String> = children.lines().map(|line| format!("  {line}")).collect();
            Ok(format!("{text}\n{}", indented.join("\n")))
        }
    }

    /// Yields to the executor `delay` times before returning, so siblings
    /// finish in a different order than they started.
    struct Delayed;

    #[async_trait]
    impl BlockTransformer for Delayed {
        async fn transform(&self, ctx: &BlockContext<'_>) -> Result<String, BoxError> {
            let delay = ctx.block().field("delay").and_then(|v| v.as_u64()).unwrap_or(0);
            for _ in 0..delay {
                tokio::task::yield_now().await;
            }
            Ok(ctx.block().str_field("label").unwrap_or_default().to_string())
        }
    }

    /// Records the stage input and returns it unchanged.
    struct Recorder {
        seen: Arc<Mutex<Vec<PageData>>>,
    }

    #[async_trait]
    impl Chain for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn process(&mut self, data: PageData) -> Result<PageData, RenderError> {
            self.seen.lock().unwrap().push(data.clone());
            Ok(data)
        }
    }

    fn paragraph(text: &str) -> Block {
        Block::text("paragraph", &[RichText::plain(text)])
    }

    fn markdown_annotations(builder: RendererBuilder) -> RendererBuilder {
        builder
            .annotation_transformer("bold", annotation_fn(|input| Ok(format!("**{}**", input.text))))
            .annotation_transformer("italic", annotation_fn(|input| Ok(format!("_{}_", input.text))))
            .annotation_transformer(
                "link",
                annotation_fn(|input: AnnotationInput<'_>| {
                    Ok(format!("[{}]({})", input.text, input.link.unwrap_or_default()))
                }),
            )
    }

    #[test]
    fn builder_requires_template() {
        let err = Renderer::builder().build().unwrap_err();
        assert_eq!(err, ConfigError::MissingTemplate);
    }

    #[test]
    fn builder_rejects_template_before_processing() {
        let err = Renderer::builder()
            .template("{{{content}}}")
            .block_transformer("paragraph", Passthrough)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingPlaceholder("{{{imports}}}"));
    }

    #[test]
    fn set_template_rejects_missing_content() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}").unwrap();
        let err = renderer.set_template("{{{imports}}}").unwrap_err();
        assert_eq!(err, ConfigError::MissingPlaceholder("{{{content}}}"));
    }

    #[tokio::test]
    async fn bold_paragraph_renders_under_empty_imports() {
        let mut renderer = markdown_annotations(Renderer::builder())
            .template("{{{imports}}}\n{{{content}}}")
            .block_transformer("paragraph", Passthrough)
            .build()
            .unwrap();

        let block = Block::text("paragraph", &[RichText::plain("Hello").bold()]);
        let output = renderer
            .process(PageData::new("page-1", vec![block]))
            .await
            .unwrap();

        assert_eq!(output.content.as_deref(), Some("\n**Hello**"));
        assert_eq!(output.page_id, "page-1");
    }

    #[tokio::test]
    async fn sibling_imports_are_deduplicated() {
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}\n{{{content}}}")
            .block_transformer("paragraph", Passthrough)
            .block_transformer(
                "image",
                block_fn(|ctx| Ok(format!("<Image src=\"{}\" />", ctx.block().str_field("url").unwrap_or_default())))
                    .with_imports(["ImageComponent"]),
            )
            .build()
            .unwrap();

        let blocks = vec![
            paragraph("Intro"),
            Block::new("image", json!({ "url": "a.png" })),
            Block::new("image", json!({ "url": "b.png" })),
        ];
        renderer
            .process(PageData::new("page-1", blocks))
            .await
            .unwrap();

        assert_eq!(renderer.collectors().fragments(IMPORTS), ["ImageComponent"]);
        assert_eq!(
            renderer.collectors().fragments(CONTENT),
            ["Intro", "<Image src=\"a.png\" />", "<Image src=\"b.png\" />"]
        );
    }

    #[tokio::test]
    async fn repeated_process_resets_content_and_keeps_imports() {
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}\n{{{content}}}")
            .block_transformer(
                "callout",
                block_fn(|ctx| {
                    let lang = ctx.metadata().get("lang").and_then(|v| v.as_str()).unwrap_or("?");
                    let site = ctx.metadata().get("site").and_then(|v| v.as_str()).unwrap_or("?");
                    Ok(format!("{}:{lang}:{site}", ctx.page_id()))
                })
                .with_imports(["import Callout from './Callout'"]),
            )
            .block_transformer("paragraph", Passthrough)
            .build()
            .unwrap();

        let first = PageData::new("one", vec![Block::new("callout", json!({}))])
            .with_metadata("lang", "en")
            .with_metadata("site", "docs");
        let first = renderer.process(first).await.unwrap();
        assert_eq!(
            first.content.as_deref(),
            Some("import Callout from './Callout'\none:en:docs")
        );

        let second = PageData::new("two", vec![paragraph("plain")]).with_metadata("lang", "fr");
        let second = renderer.process(second).await.unwrap();
        assert_eq!(
            second.content.as_deref(),
            Some("import Callout from './Callout'\nplain")
        );
        assert_eq!(renderer.context().page_id(), "two");
        assert_eq!(renderer.context().metadata()["lang"], "fr");
        assert_eq!(renderer.context().metadata()["site"], "docs");
        assert_eq!(renderer.collectors().fragments(CONTENT), ["plain"]);
    }

    #[tokio::test]
    async fn metadata_merge_is_visible_to_second_cycle() {
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}{{{content}}}")
            .block_transformer(
                "meta",
                block_fn(|ctx| {
                    let mut keys: Vec<String> = ctx
                        .metadata()
                        .iter()
                        .map(|(key, value)| format!("{key}={}", value.as_str().unwrap_or_default()))
                        .collect();
                    keys.sort();
                    Ok(keys.join(","))
                }),
            )
            .build()
            .unwrap();

        let block = || Block::new("meta", json!({}));
        renderer
            .process(PageData::new("a", vec![block()]).with_metadata("x", "1").with_metadata("y", "1"))
            .await
            .unwrap();
        let output = renderer
            .process(PageData::new("b", vec![block()]).with_metadata("y", "2"))
            .await
            .unwrap();
        assert_eq!(output.content.as_deref(), Some("x=1,y=2"));
    }

    #[tokio::test]
    async fn failing_transformer_aborts_process() {
        let mut renderer = Renderer::builder()
            .name("markdown")
            .template("{{{imports}}}{{{content}}}")
            .block_transformer("paragraph", Passthrough)
            .block_transformer("table", block_fn(|_| Err("column count mismatch".into())))
            .build()
            .unwrap();

        let data = PageData::new("page", vec![paragraph("ok"), Block::new("table", json!({}))]);
        let err = renderer.process(data).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("column count mismatch"), "{message}");
        assert!(message.contains("table"), "{message}");
        assert!(message.starts_with("[markdown]"), "{message}");
        assert!(matches!(err.root(), RenderError::Block { block_type, .. } if block_type == "table"));
    }

    #[tokio::test]
    async fn failure_is_not_forwarded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}{{{content}}}")
            .block_transformer("broken", block_fn(|_| Err("nope".into())))
            .next(Recorder { seen: Arc::clone(&seen) })
            .build()
            .unwrap();

        let result = renderer
            .process(PageData::new("p", vec![Block::new("broken", json!({}))]))
            .await;
        assert!(result.is_err());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmapped_block_is_skipped_without_side_effects() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}").unwrap();
        renderer.create_block_transformer("paragraph", Passthrough);

        let before = renderer.collectors().clone();
        let output = renderer
            .process_block(&Block::new("synced_block", json!({})), None)
            .await
            .unwrap();

        assert_eq!(output, "");
        assert_eq!(renderer.collectors(), &before);
    }

    #[tokio::test]
    async fn process_block_appends_to_declared_variable() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}\n{{{footnotes}}}").unwrap();
        renderer.create_block_transformer(
            "footnote",
            block_fn(|ctx| Ok(format!("[^{}]", ctx.block().id))).into_variable("footnotes"),
        );
        renderer.create_block_transformer(
            "aside",
            block_fn(|_| Ok("aside".into())).into_variable("sidebar"),
        );

        let output = renderer
            .process_block(&Block::new("footnote", json!({})).with_id("n1"), None)
            .await
            .unwrap();
        renderer
            .process_block(&Block::new("aside", json!({})), None)
            .await
            .unwrap();

        assert_eq!(output, "[^n1]");
        assert_eq!(renderer.collectors().fragments("footnotes"), ["[^n1]"]);
        assert!(renderer.collectors().fragments(CONTENT).is_empty());
        assert_eq!(renderer.collectors().fragments("sidebar"), ["aside"]);
    }

    #[tokio::test]
    async fn link_is_applied_after_every_flag() {
        let mut renderer = markdown_annotations(Renderer::builder())
            .template("{{{imports}}}{{{content}}}")
            .build()
            .unwrap();

        let span = RichText::plain("Hello").italic().bold().link("https://example.com");
        let output = renderer.process_rich_text(&[span], None).await.unwrap();
        assert_eq!(output, "[_**Hello**_](https://example.com)");
    }

    #[tokio::test]
    async fn link_without_transformer_is_fatal() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}").unwrap();
        renderer.create_block_transformer("paragraph", Passthrough);

        let block = Block::text("paragraph", &[RichText::plain("docs").link("/docs")]);
        let err = renderer
            .process(PageData::new("p", vec![block]))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("`link`"), "{err}");
    }

    #[tokio::test]
    async fn unmapped_annotation_is_skipped() {
        let mut renderer = markdown_annotations(Renderer::builder())
            .template("{{{imports}}}{{{content}}}")
            .build()
            .unwrap();

        let spans = [
            RichText::plain("red ").color("red").bold(),
            RichText::plain("code").code(),
        ];
        let output = renderer.process_rich_text(&spans, None).await.unwrap();
        assert_eq!(output, "**red **code");
    }

    #[tokio::test]
    async fn annotation_failure_names_annotation_and_text() {
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}{{{content}}}")
            .annotation_transformer("code", annotation_fn(|_| Err("unsupported".into())))
            .build()
            .unwrap();

        let err = renderer
            .process_rich_text(&[RichText::plain("x = 1").code()], None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to apply annotation `code` to \"x = 1\": unsupported"
        );
    }

    #[tokio::test]
    async fn siblings_keep_input_order_when_finishing_out_of_order() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}").unwrap();
        renderer.create_block_transformer("delayed", Delayed);

        let blocks: Vec<Block> = [(3, "first"), (0, "second"), (1, "third")]
            .into_iter()
            .map(|(delay, label)| Block::new("delayed", json!({ "delay": delay, "label": label })))
            .collect();

        let joined = renderer.process_children(&blocks, None).await.unwrap();
        assert_eq!(joined, "first\nsecond\nthird");
        assert_eq!(
            renderer.collectors().fragments(CONTENT),
            ["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn process_children_drops_empty_results() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}").unwrap();
        renderer.create_block_transformer("paragraph", Passthrough);

        let blocks = vec![
            paragraph("a"),
            Block::new("unsupported", json!({})),
            paragraph(""),
            paragraph("b"),
        ];
        let joined = renderer.process_children(&blocks, None).await.unwrap();
        assert_eq!(joined, "a\nb");
    }

    #[tokio::test]
    async fn nested_children_are_embedded_once() {
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}\n{{{content}}}")
            .block_transformer("bulleted_list_item", WithChildren)
            .block_transformer(
                "image",
                block_fn(|_| Ok("<Image />".into())).with_imports(["import Image"]),
            )
            .build()
            .unwrap();

        let item = Block::text("bulleted_list_item", &[RichText::plain("parent")]).with_children(vec![
            Block::text("bulleted_list_item", &[RichText::plain("child")]),
            Block::new("image", json!({})),
        ]);
        let output = renderer
            .process(PageData::new("p", vec![item]))
            .await
            .unwrap();

        assert_eq!(output.content.as_deref(), Some("import Image\nparent\n  child\n  <Image />"));
        assert_eq!(renderer.collectors().fragments(CONTENT).len(), 1);
    }

    #[tokio::test]
    async fn nested_blocks_still_feed_custom_variables() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}\n{{{footnotes}}}").unwrap();
        renderer.create_block_transformer("toggle", WithChildren);
        renderer.create_block_transformer(
            "footnote",
            block_fn(|ctx| Ok(format!("[^{}]: note", ctx.block().id))).into_variable("footnotes"),
        );

        let toggle = Block::text("toggle", &[RichText::plain("More")])
            .with_children(vec![Block::new("footnote", json!({})).with_id("1")]);
        let output = renderer
            .process(PageData::new("p", vec![toggle]))
            .await
            .unwrap();

        assert_eq!(output.content.as_deref(), Some("More\n  [^1]: note\n[^1]: note"));
    }

    #[tokio::test]
    async fn nested_failure_names_both_blocks() {
        let mut renderer = Renderer::new("{{{imports}}}{{{content}}}").unwrap();
        renderer.create_block_transformer("toggle", WithChildren);
        renderer.create_block_transformer("equation", block_fn(|_| Err("bad tex".into())));

        let toggle = Block::text("toggle", &[RichText::plain("x")])
            .with_children(vec![Block::new("equation", json!({}))]);
        let err = renderer
            .process(PageData::new("p", vec![toggle]))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[renderer] failed to transform block `toggle`: failed to transform block `equation`: bad tex"
        );
    }

    #[tokio::test]
    async fn caller_metadata_wins_for_block() {
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}{{{content}}}")
            .metadata("heading_offset", 0)
            .block_transformer(
                "heading_1",
                block_fn(|ctx| Ok(ctx.metadata()["heading_offset"].to_string())),
            )
            .build()
            .unwrap();

        let mut overlay = Metadata::new();
        overlay.insert("heading_offset".to_string(), json!(2));
        let block = Block::new("heading_1", json!({}));

        let with_overlay = renderer.process_block(&block, Some(&overlay)).await.unwrap();
        let without = renderer.process_block(&block, None).await.unwrap();
        assert_eq!(with_overlay, "2");
        assert_eq!(without, "0");
    }

    #[tokio::test]
    async fn result_is_forwarded_to_next_stage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}{{{content}}}")
            .block_transformer("paragraph", Passthrough)
            .next(Recorder { seen: Arc::clone(&seen) })
            .build()
            .unwrap();

        let output = renderer
            .process(PageData::new("p", vec![paragraph("hi")]))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content.as_deref(), Some("hi"));
        assert_eq!(output, seen[0]);
    }

    #[tokio::test]
    async fn chained_renderer_runs_on_spawned_task() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}{{{content}}}")
            .block_transformer("paragraph", Passthrough)
            .next(Recorder { seen: Arc::clone(&seen) })
            .build()
            .unwrap();

        let output = tokio::spawn(async move {
            renderer
                .process(PageData::new("p", vec![paragraph("spawned")]))
                .await
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(output.content.as_deref(), Some("spawned"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolvers_see_page_context() {
        let mut renderer = Renderer::builder()
            .template("{{{title}}}\n{{{imports}}}{{{content}}}")
            .resolver(
                "title",
                resolver_fn(|_, ctx| Ok(format!("# {} ({} blocks)", ctx.page_id(), ctx.blocks().len()))),
            )
            .block_transformer("paragraph", Passthrough)
            .build()
            .unwrap();

        let output = renderer
            .process(PageData::new("guide", vec![paragraph("a"), paragraph("b")]))
            .await
            .unwrap();
        insta::assert_snapshot!(output.content.unwrap(), @r"
        # guide (2 blocks)
        a
        b
        ");
    }

    #[tokio::test]
    async fn seeded_imports_survive_cycles() {
        let mut renderer = Renderer::builder()
            .template("{{{imports}}}|{{{content}}}")
            .imports(["import Layout"])
            .build()
            .unwrap();
        renderer.add_imports(["import Layout", "import Nav"]);

        let output = renderer.process(PageData::new("p", vec![])).await.unwrap();
        assert_eq!(output.content.as_deref(), Some("import Layout\nimport Nav|"));
    }
}
