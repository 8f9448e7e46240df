use thiserror::Error;

/// Error type returned by collaborator transformers and resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while configuring a renderer, before any block is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The template lacks one of the mandatory placeholders.
    #[error("template is missing the mandatory `{0}` placeholder")]
    MissingPlaceholder(&'static str),
    /// The builder was finished without a template.
    #[error("no template was provided")]
    MissingTemplate,
}

/// Errors that abort a processing cycle.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Invalid renderer configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// A block transformer failed.
    #[error("failed to transform block `{block_type}`: {source}")]
    Block {
        /// Type tag of the failing block.
        block_type: String,
        /// Error raised by the transformer.
        #[source]
        source: BoxError,
    },
    /// An annotation transformer failed.
    #[error("failed to apply annotation `{annotation}` to \"{text}\": {source}")]
    Annotation {
        /// Name of the failing annotation transformer.
        annotation: String,
        /// Plain text of the span being composed.
        text: String,
        /// Error raised by the transformer.
        #[source]
        source: BoxError,
    },
    /// A span carries a link but no `link` annotation transformer exists.
    #[error("text \"{text}\" carries a link but no `link` annotation transformer is registered")]
    MissingLinkTransformer {
        /// Plain text of the linked span.
        text: String,
    },
    /// A custom variable resolver failed.
    #[error("failed to resolve variable `{variable}`: {source}")]
    Resolver {
        /// Variable being resolved.
        variable: String,
        /// Error raised by the resolver.
        #[source]
        source: BoxError,
    },
    /// A failure inside a chain stage, prefixed with the stage name.
    #[error("[{stage}] {source}")]
    Stage {
        /// Name of the stage that failed.
        stage: String,
        /// The underlying failure.
        #[source]
        source: Box<RenderError>,
    },
}

impl RenderError {
    /// Wraps an error with the name of the chain stage it happened in.
    pub fn stage(stage: impl Into<String>, source: RenderError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Returns the innermost engine error, unwrapping stage prefixes and
    /// failures of nested blocks.
    pub fn root(&self) -> &RenderError {
        match self {
            RenderError::Stage { source, .. } => source.root(),
            RenderError::Block { source, .. } => match source.downcast_ref::<RenderError>() {
                Some(inner) => inner.root(),
                None => self,
            },
            other => other,
        }
    }

    /// Returns true when the failure comes from configuration rather than content.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            RenderError::Configuration(_) | RenderError::MissingLinkTransformer { .. }
        )
    }
}
