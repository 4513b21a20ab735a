//! Decoded body values.

use crate::descriptor::ContentDescriptor;
use bytes::Bytes;
use http::HeaderMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A form tree keyed by field name.
pub type FormMap = BTreeMap<String, FormNode>;

/// The value a body decodes to.
///
/// Built-in decoding produces `Text`, `Binary`, `Json` and `Multipart`,
/// the form decoders turn text and parts into `Form`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Binary(#[serde(serialize_with = "serialize_bytes")] Bytes),
    Json(serde_json::Value),
    Multipart(Vec<Entity>),
    Form(FormMap),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_parts(&self) -> Option<&[Entity]> {
        match self {
            Value::Multipart(parts) => Some(parts),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormMap> {
        match self {
            Value::Form(form) => Some(form),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_owned())
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Binary(bytes)
    }
}

/// A decoded body together with the descriptor and headers it was decoded
/// with. Requests and multipart parts are both entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub content: ContentDescriptor,
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
    pub body: Value,
}

impl Entity {
    pub fn new(content: ContentDescriptor, headers: HeaderMap, body: Value) -> Self {
        Self { content, headers, body }
    }
}

/// A node of a form tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormNode {
    /// A plain field value.
    Field(Value),
    /// A multipart part carrying a filename, kept whole.
    File(Box<Entity>),
    List(Vec<FormNode>),
    Map(FormMap),
}

impl FormNode {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormNode::Field(value) => value.as_text(),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&Entity> {
        match self {
            FormNode::File(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FormNode]> {
        match self {
            FormNode::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FormMap> {
        match self {
            FormNode::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Looks up a child by key (maps) or index (lists).
    pub fn get(&self, key: &str) -> Option<&FormNode> {
        match self {
            FormNode::Map(map) => map.get(key),
            FormNode::List(list) => key.parse::<usize>().ok().and_then(|index| list.get(index)),
            _ => None,
        }
    }
}

impl From<&str> for FormNode {
    fn from(text: &str) -> Self {
        FormNode::Field(Value::from(text))
    }
}

impl From<String> for FormNode {
    fn from(text: String) -> Self {
        FormNode::Field(Value::Text(text))
    }
}

fn serialize_bytes<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(bytes.iter())
}

fn serialize_headers<S: Serializer>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error> {
    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        grouped.entry(name.as_str()).or_default().push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    serializer.collect_map(grouped.into_iter().map(|(name, mut values)| {
        let value = if values.len() == 1 { serde_json::Value::from(values.remove(0)) } else { serde_json::Value::from(values) };
        (name, value)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_lookup() {
        let mut form = FormMap::new();
        form.insert("a".into(), FormNode::List(vec!["x".into(), "y".into()]));

        let root = FormNode::Map(form);
        assert_eq!(root.get("a").and_then(|a| a.get("1")).and_then(FormNode::as_text), Some("y"));
        assert!(root.get("a").and_then(|a| a.get("2")).is_none());
        assert!(root.get("b").is_none());
    }

    #[test]
    fn serializes_untagged() {
        let mut form = FormMap::new();
        form.insert("input1".into(), FormNode::List(vec!["Rếver".into(), "Bob".into()]));
        form.insert("input2".into(), "mélanger".into());

        let json = serde_json::to_value(Value::Form(form)).unwrap();
        assert_eq!(json, serde_json::json!({"input1": ["Rếver", "Bob"], "input2": "mélanger"}));

        let json = serde_json::to_value(Value::Binary(Bytes::from_static(&[1, 2]))).unwrap();
        assert_eq!(json, serde_json::json!([1, 2]));
    }
}
