//! Variable collectors, resolvers, and `{{{name}}}` template substitution.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::block::{Block, Metadata, Properties};
use crate::context::EngineContext;
use crate::error::{BoxError, ConfigError, RenderError};

/// Default variable receiving block output.
pub const CONTENT: &str = "content";
/// Variable collecting deduplicated import lines; survives resets.
pub const IMPORTS: &str = "imports";

const CONTENT_PLACEHOLDER: &str = "{{{content}}}";
const IMPORTS_PLACEHOLDER: &str = "{{{imports}}}";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\{(\w+)\}\}\}").expect("placeholder pattern is valid"));

/// A validated output template.
///
/// Always contains `{{{content}}}` and `{{{imports}}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    placeholders: Vec<String>,
}

impl Template {
    /// Validates `source` and records its placeholder names.
    pub fn parse(source: impl Into<String>) -> Result<Self, ConfigError> {
        let source = source.into();
        if !source.contains(CONTENT_PLACEHOLDER) {
            return Err(ConfigError::MissingPlaceholder(CONTENT_PLACEHOLDER));
        }
        if !source.contains(IMPORTS_PLACEHOLDER) {
            return Err(ConfigError::MissingPlaceholder(IMPORTS_PLACEHOLDER));
        }

        let mut placeholders: Vec<String> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(&source) {
            let name = &caps[1];
            if !placeholders.iter().any(|existing| existing == name) {
                placeholders.push(name.to_string());
            }
        }

        Ok(Self {
            source,
            placeholders,
        })
    }

    /// Raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in first-occurrence order.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitutes every placeholder in one pass; names without a value become empty.
    pub fn render(&self, values: &HashMap<String, String>) -> String {
        PLACEHOLDER
            .replace_all(&self.source, |caps: &Captures<'_>| {
                values.get(&caps[1]).map_or("", String::as_str).to_string()
            })
            .into_owned()
    }
}

impl FromStr for Template {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Ordered text fragments accumulated per variable during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collectors {
    slots: BTreeMap<String, Vec<String>>,
}

impl Default for Collectors {
    fn default() -> Self {
        Self::new()
    }
}

impl Collectors {
    /// Creates collectors holding the mandatory `content` and `imports` slots.
    pub fn new() -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(CONTENT.to_string(), Vec::new());
        slots.insert(IMPORTS.to_string(), Vec::new());
        Self { slots }
    }

    /// Creates an empty slot for `name` unless one exists.
    pub fn ensure(&mut self, name: &str) {
        if !self.slots.contains_key(name) {
            self.slots.insert(name.to_string(), Vec::new());
        }
    }

    /// Appends a fragment to `name`, creating the slot if needed.
    pub fn push(&mut self, name: &str, fragment: impl Into<String>) {
        match self.slots.get_mut(name) {
            Some(slot) => slot.push(fragment.into()),
            None => {
                self.slots.insert(name.to_string(), vec![fragment.into()]);
            }
        }
    }

    /// Appends import lines not already present (exact string equality).
    pub fn add_imports<I, S>(&mut self, imports: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slot = self.slots.entry(IMPORTS.to_string()).or_default();
        for import in imports {
            let import = import.into();
            if !slot.contains(&import) {
                slot.push(import);
            }
        }
    }

    /// Fragments of `name` in append order; empty for unknown names.
    pub fn fragments(&self, name: &str) -> &[String] {
        self.slots.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns true when a slot exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Registered variable names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Clears every slot except `imports`.
    pub fn reset(&mut self) {
        for (name, slot) in &mut self.slots {
            if name != IMPORTS {
                slot.clear();
            }
        }
    }
}

/// Read access handed to variable resolvers.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    context: &'a EngineContext,
    collectors: &'a Collectors,
}

impl<'a> ResolveContext<'a> {
    /// Identifier of the page being rendered.
    pub fn page_id(&self) -> &'a str {
        self.context.page_id()
    }

    /// Page properties.
    pub fn properties(&self) -> &'a Properties {
        self.context.properties()
    }

    /// Merged engine metadata.
    pub fn metadata(&self) -> &'a Metadata {
        self.context.metadata()
    }

    /// Top-level blocks of the page.
    pub fn blocks(&self) -> &'a [Block] {
        self.context.blocks()
    }

    /// Fragments collected for `name`.
    pub fn fragments(&self, name: &str) -> &'a [String] {
        self.collectors.fragments(name)
    }
}

/// Computes the final value of a variable from its collector.
#[async_trait]
pub trait VariableResolver: Send + Sync {
    /// Resolves variable `name`.
    async fn resolve(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<String, BoxError>;
}

/// Resolver backed by a synchronous closure.
pub struct FnResolver<F>(F);

/// Wraps a closure as a [`VariableResolver`].
pub fn resolver_fn<F>(f: F) -> FnResolver<F>
where
    F: Fn(&str, &ResolveContext<'_>) -> Result<String, BoxError> + Send + Sync,
{
    FnResolver(f)
}

#[async_trait]
impl<F> VariableResolver for FnResolver<F>
where
    F: Fn(&str, &ResolveContext<'_>) -> Result<String, BoxError> + Send + Sync,
{
    async fn resolve(&self, name: &str, ctx: &ResolveContext<'_>) -> Result<String, BoxError> {
        (self.0)(name, ctx)
    }
}

/// Named collectors, their resolvers, and the active template.
pub struct VariableRegistry {
    template: Template,
    resolvers: HashMap<String, Arc<dyn VariableResolver>>,
    collectors: Collectors,
}

impl VariableRegistry {
    /// Creates a registry for `template`, registering its placeholders.
    pub fn new(template: Template) -> Self {
        let mut registry = Self {
            template,
            resolvers: HashMap::new(),
            collectors: Collectors::new(),
        };
        registry.register_placeholders();
        registry
    }

    /// Creates an empty collector for `name` if absent.
    pub fn add_variable(&mut self, name: &str) {
        self.collectors.ensure(name);
    }

    /// Registers `name` with a custom resolver, replacing any previous resolver.
    pub fn set_resolver(&mut self, name: &str, resolver: Arc<dyn VariableResolver>) {
        self.collectors.ensure(name);
        self.resolvers.insert(name.to_string(), resolver);
    }

    /// Validates and installs a new template, registering its placeholders.
    pub fn set_template(&mut self, source: &str) -> Result<(), ConfigError> {
        self.template = Template::parse(source)?;
        self.register_placeholders();
        Ok(())
    }

    /// The active template.
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Appends import lines, skipping duplicates.
    pub fn add_imports<I, S>(&mut self, imports: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collectors.add_imports(imports);
    }

    /// Current collectors.
    pub fn collectors(&self) -> &Collectors {
        &self.collectors
    }

    /// Returns true when `name` has a custom resolver.
    pub fn has_resolver(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }

    /// Clears every collector except `imports`.
    pub fn reset(&mut self) {
        self.collectors.reset();
    }

    pub(crate) fn take_collectors(&mut self) -> Collectors {
        std::mem::take(&mut self.collectors)
    }

    pub(crate) fn restore_collectors(&mut self, collectors: Collectors) {
        self.collectors = collectors;
    }

    /// Resolves every variable and substitutes the template.
    pub async fn render_template(&self, context: &EngineContext) -> Result<String, RenderError> {
        let scope = ResolveContext {
            context,
            collectors: &self.collectors,
        };

        let mut values = HashMap::new();
        for name in self.collectors.names() {
            let value = match self.resolvers.get(name) {
                Some(resolver) => resolver.resolve(name, &scope).await.map_err(|source| {
                    RenderError::Resolver {
                        variable: name.to_string(),
                        source,
                    }
                })?,
                None => self.collectors.fragments(name).join("\n"),
            };
            values.insert(name.to_string(), value);
        }

        Ok(self.template.render(&values))
    }

    fn register_placeholders(&mut self) {
        for name in self.template.placeholders() {
            self.collectors.ensure(name);
        }
    }
}

impl std::fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut resolvers: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        resolvers.sort_unstable();
        f.debug_struct("VariableRegistry")
            .field("template", &self.template.source())
            .field("resolvers", &resolvers)
            .field("collectors", &self.collectors)
            .finish()
    }
}
