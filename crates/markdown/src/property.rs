//! Flattening of Notion page properties into plain values.

use std::collections::BTreeMap;

use log::warn;
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// A page property reduced to a scalar or a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Absent or empty value.
    Null,
    /// Checkbox or boolean formula.
    Bool(bool),
    /// Number, rollup sum, or numeric formula.
    Number(Number),
    /// Text, option name, date, or url.
    String(String),
    /// Multi-valued property.
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Returns true for [`PropertyValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    fn string_or_null(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some(text) => PropertyValue::String(text.to_string()),
            None => PropertyValue::Null,
        }
    }

    fn number_or_null(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(number)) => PropertyValue::Number(number.clone()),
            _ => PropertyValue::Null,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

/// Extracts every property of a page, keyed by property name.
pub fn extract_properties(properties: &Map<String, Value>) -> BTreeMap<String, PropertyValue> {
    properties
        .iter()
        .map(|(name, property)| (name.clone(), extract_property(property)))
        .collect()
}

/// Reduces one property object (`{"type": ..., <type>: ...}`) to a value.
pub fn extract_property(property: &Value) -> PropertyValue {
    let Some(kind) = property.get("type").and_then(Value::as_str) else {
        warn!("property without a `type` tag: {property}");
        return PropertyValue::Null;
    };
    let payload = property.get(kind);

    match kind {
        "title" | "rich_text" => PropertyValue::String(plain_text(payload)),
        "select" | "status" => PropertyValue::string_or_null(payload.and_then(|v| v.get("name"))),
        "multi_select" => collect(payload, |option| {
            PropertyValue::string_or_null(option.get("name"))
        }),
        "date" => date(payload),
        "number" => PropertyValue::number_or_null(payload),
        "checkbox" => PropertyValue::Bool(payload.and_then(Value::as_bool).unwrap_or(false)),
        "url" | "email" | "phone_number" | "created_time" | "last_edited_time" => {
            PropertyValue::string_or_null(payload)
        }
        "created_by" | "last_edited_by" => payload.map_or(PropertyValue::Null, person),
        "formula" => formula(payload),
        "rollup" => rollup(payload),
        "files" => collect(payload, file_url),
        "people" => collect(payload, person),
        "relation" => collect(payload, |page| PropertyValue::string_or_null(page.get("id"))),
        "unique_id" => unique_id(payload),
        other => {
            warn!("unsupported property type `{other}`");
            PropertyValue::Null
        }
    }
}

fn plain_text(spans: Option<&Value>) -> String {
    spans
        .and_then(Value::as_array)
        .map(|spans| {
            spans
                .iter()
                .filter_map(|span| span.get("plain_text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

fn collect(items: Option<&Value>, extract: impl Fn(&Value) -> PropertyValue) -> PropertyValue {
    let items = items
        .and_then(Value::as_array)
        .map(|items| items.iter().map(extract).collect())
        .unwrap_or_default();
    PropertyValue::Array(items)
}

fn date(payload: Option<&Value>) -> PropertyValue {
    let Some(date) = payload.filter(|date| !date.is_null()) else {
        return PropertyValue::Null;
    };
    let start = PropertyValue::string_or_null(date.get("start"));
    match date.get("end").and_then(Value::as_str) {
        Some(end) => PropertyValue::Array(vec![start, end.into()]),
        None => start,
    }
}

fn person(user: &Value) -> PropertyValue {
    user.get("name")
        .and_then(Value::as_str)
        .or_else(|| user.get("id").and_then(Value::as_str))
        .map_or(PropertyValue::Null, PropertyValue::from)
}

fn file_url(file: &Value) -> PropertyValue {
    let url = ["external", "file"]
        .into_iter()
        .find_map(|kind| file.get(kind).and_then(|f| f.get("url")));
    PropertyValue::string_or_null(url)
}

fn formula(payload: Option<&Value>) -> PropertyValue {
    let Some(formula) = payload else {
        return PropertyValue::Null;
    };
    match formula.get("type").and_then(Value::as_str) {
        Some("string") => PropertyValue::string_or_null(formula.get("string")),
        Some("number") => PropertyValue::number_or_null(formula.get("number")),
        Some("boolean") => formula
            .get("boolean")
            .and_then(Value::as_bool)
            .map_or(PropertyValue::Null, PropertyValue::Bool),
        Some("date") => PropertyValue::string_or_null(formula.get("date").and_then(|d| d.get("start"))),
        _ => PropertyValue::Null,
    }
}

fn rollup(payload: Option<&Value>) -> PropertyValue {
    let Some(rollup) = payload else {
        return PropertyValue::Null;
    };
    match rollup.get("type").and_then(Value::as_str) {
        Some("number") => PropertyValue::number_or_null(rollup.get("number")),
        Some("date") => PropertyValue::string_or_null(rollup.get("date").and_then(|d| d.get("start"))),
        Some("array") => collect(rollup.get("array"), extract_property),
        _ => PropertyValue::Null,
    }
}

fn unique_id(payload: Option<&Value>) -> PropertyValue {
    let Some(id) = payload else {
        return PropertyValue::Null;
    };
    let Some(number) = id.get("number").filter(|n| n.is_number()) else {
        return PropertyValue::Null;
    };
    match id.get("prefix").and_then(Value::as_str) {
        Some(prefix) => PropertyValue::String(format!("{prefix}-{number}")),
        None => PropertyValue::String(number.to_string()),
    }
}
