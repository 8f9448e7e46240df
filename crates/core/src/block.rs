//! Document model: blocks, rich text spans, and the page record passed through a chain.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Page properties keyed by property name, in Notion API shape.
pub type Properties = Map<String, Value>;

/// Arbitrary metadata travelling with a page.
pub type Metadata = Map<String, Value>;

/// A typed node of the document tree.
///
/// Mirrors the Notion API shape: the `type` tag names the variant and the
/// variant payload lives under a key equal to the tag, e.g.
/// `{"type": "paragraph", "paragraph": {"rich_text": [...]}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block identifier.
    #[serde(default)]
    pub id: String,
    /// Type tag used for transformer dispatch.
    #[serde(rename = "type")]
    pub block_type: String,
    /// Whether the source reported nested children.
    #[serde(default)]
    pub has_children: bool,
    /// Nested child blocks, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
    /// Remaining fields, including the variant payload.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Block {
    /// Creates a block of `block_type` with the given variant payload.
    pub fn new(block_type: impl Into<String>, data: Value) -> Self {
        let block_type = block_type.into();
        let mut fields = Map::new();
        fields.insert(block_type.clone(), data);
        Self {
            id: String::new(),
            block_type,
            has_children: false,
            children: Vec::new(),
            fields,
        }
    }

    /// Creates a block whose payload holds only `rich_text`.
    pub fn text(block_type: impl Into<String>, spans: &[RichText]) -> Self {
        let spans = serde_json::to_value(spans).unwrap_or(Value::Array(Vec::new()));
        let mut data = Map::new();
        data.insert("rich_text".to_string(), spans);
        Self::new(block_type, Value::Object(data))
    }

    /// Sets the block identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attaches nested children.
    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.has_children = !children.is_empty();
        self.children = children;
        self
    }

    /// Returns the variant payload stored under the block's type tag.
    pub fn data(&self) -> Option<&Value> {
        self.fields.get(&self.block_type)
    }

    /// Returns a field of the variant payload.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data().and_then(|data| data.get(key))
    }

    /// Returns a string field of the variant payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Returns a boolean field of the variant payload, `false` when absent.
    pub fn bool_field(&self, key: &str) -> bool {
        self.field(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Returns the `rich_text` spans of the payload.
    pub fn rich_text(&self) -> Vec<RichText> {
        self.rich_text_field("rich_text")
    }

    /// Returns the spans stored under `key` (e.g. `caption`).
    ///
    /// Malformed or missing spans yield an empty list; the engine does not
    /// validate document semantics.
    pub fn rich_text_field(&self, key: &str) -> Vec<RichText> {
        self.field(key)
            .and_then(|value| Vec::<RichText>::deserialize(value).ok())
            .unwrap_or_default()
    }
}

/// A run of text with uniform annotations and an optional link.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RichText {
    /// Text content without formatting.
    #[serde(default)]
    pub plain_text: String,
    /// Link target, if the span is linked.
    #[serde(default)]
    pub href: Option<String>,
    /// Active formatting flags.
    #[serde(default)]
    pub annotations: Annotations,
}

impl RichText {
    /// Creates an unformatted span.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            plain_text: text.into(),
            ..Self::default()
        }
    }

    /// Marks the span bold.
    pub fn bold(mut self) -> Self {
        self.annotations.bold = true;
        self
    }

    /// Marks the span italic.
    pub fn italic(mut self) -> Self {
        self.annotations.italic = true;
        self
    }

    /// Marks the span struck through.
    pub fn strikethrough(mut self) -> Self {
        self.annotations.strikethrough = true;
        self
    }

    /// Marks the span underlined.
    pub fn underline(mut self) -> Self {
        self.annotations.underline = true;
        self
    }

    /// Marks the span as inline code.
    pub fn code(mut self) -> Self {
        self.annotations.code = true;
        self
    }

    /// Sets the span color.
    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.annotations.color = color.into();
        self
    }

    /// Links the span to `url`.
    pub fn link(mut self, url: impl Into<String>) -> Self {
        self.href = Some(url.into());
        self
    }
}

/// Name of the color every span has when it is not colored.
pub const DEFAULT_COLOR: &str = "default";

/// Formatting flags of a rich text span, in Notion API shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotations {
    /// Bold text.
    pub bold: bool,
    /// Italic text.
    pub italic: bool,
    /// Struck-through text.
    pub strikethrough: bool,
    /// Underlined text.
    pub underline: bool,
    /// Inline code.
    pub code: bool,
    /// Text or background color; `default` means uncolored.
    pub color: String,
}

impl Default for Annotations {
    fn default() -> Self {
        Self {
            bold: false,
            italic: false,
            strikethrough: false,
            underline: false,
            code: false,
            color: DEFAULT_COLOR.to_string(),
        }
    }
}

impl Annotations {
    /// Returns true when `annotation` is set on this span.
    pub fn is_active(&self, annotation: Annotation) -> bool {
        match annotation {
            Annotation::Bold => self.bold,
            Annotation::Italic => self.italic,
            Annotation::Strikethrough => self.strikethrough,
            Annotation::Underline => self.underline,
            Annotation::Code => self.code,
            Annotation::Color => !self.color.is_empty() && self.color != DEFAULT_COLOR,
        }
    }

    /// Active annotations in [`Annotation::CANONICAL_ORDER`].
    pub fn active(&self) -> impl Iterator<Item = Annotation> + '_ {
        Annotation::CANONICAL_ORDER
            .into_iter()
            .filter(move |annotation| self.is_active(*annotation))
    }
}

/// Annotation flags that drive the rich text cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Annotation {
    /// `bold`
    Bold,
    /// `italic`
    Italic,
    /// `strikethrough`
    Strikethrough,
    /// `underline`
    Underline,
    /// `code`
    Code,
    /// `color`, active for any non-default color.
    Color,
}

impl Annotation {
    /// Cascade order: the innermost transform comes first.
    ///
    /// Follows the field order of Notion's annotation object, so inline code
    /// wraps outside bold and italic.
    pub const CANONICAL_ORDER: [Annotation; 6] = [
        Annotation::Bold,
        Annotation::Italic,
        Annotation::Strikethrough,
        Annotation::Underline,
        Annotation::Code,
        Annotation::Color,
    ];

    /// Registry name of the annotation transformer handling this flag.
    pub fn name(self) -> &'static str {
        match self {
            Annotation::Bold => "bold",
            Annotation::Italic => "italic",
            Annotation::Strikethrough => "strikethrough",
            Annotation::Underline => "underline",
            Annotation::Code => "code",
            Annotation::Color => "color",
        }
    }
}

impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered blocks and page properties of one page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockTree {
    /// Top-level blocks in document order.
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Page properties keyed by name.
    #[serde(default)]
    pub properties: Properties,
}

/// Record passed from stage to stage through a chain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    /// Page identifier.
    pub page_id: String,
    /// Blocks and properties to render.
    #[serde(default)]
    pub block_tree: BlockTree,
    /// Caller metadata merged into the engine context.
    #[serde(default)]
    pub metadata: Metadata,
    /// Rendered output, set by a renderer stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl PageData {
    /// Creates a record for `page_id` with the given top-level blocks.
    pub fn new(page_id: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            page_id: page_id.into(),
            block_tree: BlockTree {
                blocks,
                properties: Properties::new(),
            },
            metadata: Metadata::new(),
            content: None,
        }
    }

    /// Replaces the page properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.block_tree.properties = properties;
        self
    }

    /// Sets one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
