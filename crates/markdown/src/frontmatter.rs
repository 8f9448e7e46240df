//! YAML frontmatter built from page properties.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use notemark_core::{Chain, PageData, RenderError, forward};

use crate::property::{PropertyValue, extract_properties};

const FENCE: &str = "---";

/// Formats a property value as a YAML scalar or flow sequence.
pub fn format_value(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Null => String::new(),
        PropertyValue::Bool(flag) => flag.to_string(),
        PropertyValue::Number(number) => number.to_string(),
        PropertyValue::String(text) => quote(text),
        PropertyValue::Array(items) => {
            let items: Vec<String> = items.iter().map(|item| quote(&item_text(item))).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn item_text(value: &PropertyValue) -> String {
    match value {
        PropertyValue::String(text) => text.clone(),
        PropertyValue::Array(_) => format_value(value),
        PropertyValue::Null => String::new(),
        PropertyValue::Bool(flag) => flag.to_string(),
        PropertyValue::Number(number) => number.to_string(),
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_key(key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain { key.to_string() } else { quote(key) }
}

/// Chain stage that prepends a `---` frontmatter block to the rendered content.
///
/// Properties are flattened with [`extract_properties`] and emitted in key
/// order. Nothing is prepended when no property is selected.
#[derive(Default)]
pub struct FrontmatterStage {
    keys: Option<Vec<String>>,
    renames: HashMap<String, String>,
    next: Option<Box<dyn Chain>>,
}

impl FrontmatterStage {
    /// Creates a stage emitting every property.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts output to the named properties.
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Emits property `from` under key `to`.
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Sets the stage receiving the updated record.
    pub fn with_next<C>(mut self, next: C) -> Self
    where
        C: Chain + 'static,
    {
        self.next = Some(Box::new(next));
        self
    }

    /// Renders the frontmatter block for `data`, or `None` when empty.
    pub fn render(&self, data: &PageData) -> Option<String> {
        let properties = extract_properties(&data.block_tree.properties);
        let mut lines: Vec<(String, String)> = properties
            .iter()
            .filter(|(name, _)| {
                self.keys
                    .as_ref()
                    .is_none_or(|keys| keys.iter().any(|key| key == *name))
            })
            .map(|(name, value)| {
                let key = self.renames.get(name).unwrap_or(name);
                (format_key(key), format_value(value))
            })
            .collect();
        if lines.is_empty() {
            return None;
        }
        lines.sort();

        let mut block = String::from(FENCE);
        block.push('\n');
        for (key, value) in lines {
            block.push_str(&key);
            block.push(':');
            if !value.is_empty() {
                block.push(' ');
                block.push_str(&value);
            }
            block.push('\n');
        }
        block.push_str(FENCE);
        block.push('\n');
        Some(block)
    }
}

#[async_trait]
impl Chain for FrontmatterStage {
    fn name(&self) -> &str {
        "frontmatter"
    }

    async fn process(&mut self, mut data: PageData) -> Result<PageData, RenderError> {
        if let Some(block) = self.render(&data) {
            debug!("frontmatter: prepending {} bytes to page {}", block.len(), data.page_id);
            let content = data.content.take().unwrap_or_default();
            data.content = Some(format!("{block}{content}"));
        }
        forward(self.next.as_mut(), data).await
    }
}
