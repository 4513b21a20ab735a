//! Form trees and the built-in form decoders.
//!
//! Field names address a path in the tree: `a[b][0]` is `a` → `b` → `0`.
//! A numeric (or empty) segment creates a list, anything else a map. A name
//! seen twice turns its value into a list of both.

use crate::ContentError;
use crate::descriptor::{ContentDescriptor, Datatype};
use crate::value::{FormMap, FormNode, Value};
use encoding_rs::Encoding;
use http::HeaderMap;
use std::collections::btree_map::Entry;
use tracing::{debug, warn};

/// The field carrying the charset of the other fields.
pub const CHARSET_FIELD: &str = "_charset_";

/// Builds a form tree from name/value pairs, in order.
pub fn build<I>(pairs: I) -> FormMap
where
    I: IntoIterator<Item = (String, FormNode)>,
{
    let mut form = FormMap::new();
    for (name, value) in pairs {
        insert(&mut form, &name, value);
    }
    form
}

/// Inserts one field into a form tree.
///
/// A field whose path runs through an existing plain value, or indexes a
/// list with a non numeric key, is dropped.
pub fn insert(form: &mut FormMap, name: &str, value: FormNode) {
    let keys = split_name(name);
    if !set(Slot::Map(form), &keys, value) {
        warn!(name = name, "drop form field conflicting with an earlier one");
    }
}

/// `a[b][]` → `["a", "b", ""]`
fn split_name(name: &str) -> Vec<&str> {
    let mut segments = name.split('[');
    let first = segments.next().unwrap_or_default();
    std::iter::once(first).chain(segments.map(|segment| segment.strip_suffix(']').unwrap_or(segment))).collect()
}

enum Slot<'a> {
    Map(&'a mut FormMap),
    List(&'a mut Vec<FormNode>),
}

impl<'a> Slot<'a> {
    fn of(node: &'a mut FormNode) -> Option<Self> {
        match node {
            FormNode::Map(map) => Some(Slot::Map(map)),
            FormNode::List(list) => Some(Slot::List(list)),
            FormNode::Field(_) | FormNode::File(_) => None,
        }
    }
}

fn set(slot: Slot<'_>, keys: &[&str], value: FormNode) -> bool {
    let Some((key, rest)) = keys.split_first() else {
        return false;
    };

    match rest.first() {
        Some(next) => match child(slot, key, next) {
            Some(child) => set(child, rest, value),
            None => false,
        },
        None if key.is_empty() => {
            match slot {
                Slot::List(list) => list.push(value),
                Slot::Map(map) => assign(map, key, value),
            }
            true
        }
        None => match slot {
            Slot::Map(map) => {
                assign(map, key, value);
                true
            }
            Slot::List(list) => match index(key) {
                Some(i) if i < list.len() => {
                    coalesce(&mut list[i], value);
                    true
                }
                // no sparse lists, a gap is closed by appending
                Some(_) => {
                    list.push(value);
                    true
                }
                None => false,
            },
        },
    }
}

/// Finds or creates the container at `key`, of the kind `next` asks for.
fn child<'a>(slot: Slot<'a>, key: &str, next: &str) -> Option<Slot<'a>> {
    let node = match slot {
        Slot::Map(map) => map.entry(key.to_owned()).or_insert_with(|| container(next)),
        Slot::List(list) => match key {
            "" => append(list, container(next)),
            _ => match index(key)? {
                i if i < list.len() => &mut list[i],
                _ => append(list, container(next)),
            },
        },
    };
    Slot::of(node)
}

fn container(next: &str) -> FormNode {
    if next.bytes().all(|b| b.is_ascii_digit()) { FormNode::List(Vec::new()) } else { FormNode::Map(FormMap::new()) }
}

fn append(list: &mut Vec<FormNode>, node: FormNode) -> &mut FormNode {
    list.push(node);
    let last = list.len() - 1;
    &mut list[last]
}

fn index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

fn assign(map: &mut FormMap, key: &str, value: FormNode) {
    match map.entry(key.to_owned()) {
        Entry::Vacant(entry) => {
            entry.insert(value);
        }
        Entry::Occupied(entry) => coalesce(entry.into_mut(), value),
    }
}

fn coalesce(existing: &mut FormNode, value: FormNode) {
    match existing {
        FormNode::List(list) => list.push(value),
        other => {
            let old = std::mem::replace(other, FormNode::List(Vec::with_capacity(2)));
            *other = FormNode::List(vec![old, value]);
        }
    }
}

/// Turns name/value pairs into a form body.
///
/// A `_charset_` field is removed; unless it names UTF-8, every field name
/// and every text or binary value is decoded again with that charset. Text
/// is decoded from its UTF-8 bytes, binary bodies become text. File
/// metadata is left alone.
pub fn decode_pairs(content: &mut ContentDescriptor, mut pairs: Vec<(String, FormNode)>) -> Result<Value, ContentError> {
    content.set_datatype(Datatype::Form);

    let charset = pairs.iter().position(|(name, _)| name == CHARSET_FIELD).map(|i| pairs.remove(i).1);
    if let Some(label) = charset.as_ref().and_then(FormNode::as_text) {
        let encoding = Encoding::for_label_no_replacement(label.trim().as_bytes())
            .ok_or_else(|| ContentError::unsupported_charset(label))?;

        if encoding != encoding_rs::UTF_8 {
            debug!(charset = encoding.name(), "decode form fields");
            for (name, value) in &mut pairs {
                *name = redecode(encoding, name);
                redecode_node(encoding, value);
            }
        }
    }

    Ok(Value::Form(build(pairs)))
}

fn redecode(encoding: &'static Encoding, text: &str) -> String {
    encoding.decode_without_bom_handling(text.as_bytes()).0.into_owned()
}

fn redecode_node(encoding: &'static Encoding, node: &mut FormNode) {
    let value = match node {
        FormNode::Field(value) => value,
        FormNode::File(entity) => &mut entity.body,
        FormNode::List(_) | FormNode::Map(_) => return,
    };
    match value {
        Value::Text(text) => *text = redecode(encoding, text),
        Value::Binary(bytes) => {
            let text = encoding.decode_without_bom_handling(bytes).0.into_owned();
            *value = Value::Text(text);
        }
        Value::Json(_) | Value::Multipart(_) | Value::Form(_) => (),
    }
}

/// Decodes an HTML5 `text/plain` form submission.
///
/// Each CRLF line is `name=value`; a line without `=` continues the previous
/// value, joined by CRLF. A trailing CRLF is such a line: it ends up on the
/// last value.
pub fn decode_plain(content: &mut ContentDescriptor, _headers: &HeaderMap, value: Value) -> Result<Value, ContentError> {
    let Value::Text(text) = value else {
        return Err(ContentError::decode("plain form body is not text"));
    };

    let mut pairs: Vec<(String, FormNode)> = Vec::new();
    for line in text.split("\r\n") {
        match line.split_once('=') {
            Some((name, value)) => pairs.push((name.to_owned(), value.into())),
            None => match pairs.last_mut() {
                Some((_, FormNode::Field(Value::Text(last)))) => {
                    last.push_str("\r\n");
                    last.push_str(line);
                }
                _ => debug!(line = line, "skip plain form line without field"),
            },
        }
    }

    decode_pairs(content, pairs)
}

/// Decodes `multipart/form-data` parts into a form.
///
/// A part with a filename is kept whole as a file, any other part
/// contributes its body. Parts without a name are skipped.
pub fn decode_form_data(content: &mut ContentDescriptor, _headers: &HeaderMap, value: Value) -> Result<Value, ContentError> {
    let Value::Multipart(parts) = value else {
        return Err(ContentError::decode("form data body is not multipart"));
    };

    let pairs = parts
        .into_iter()
        .filter_map(|part| {
            let Some(name) = part.content.name().map(str::to_owned) else {
                debug!("skip form part without name");
                return None;
            };
            let node = if part.content.filename().is_some() { FormNode::File(Box::new(part)) } else { FormNode::Field(part.body) };
            Some((name, node))
        })
        .collect();

    decode_pairs(content, pairs)
}

/// Parses a URL query into a flat form, repeated names become lists.
pub fn parse_query(query: &str) -> Result<FormMap, ContentError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query).map_err(|e| ContentError::invalid_header(format!("invalid query: {e}")))?;

    let mut form = FormMap::new();
    for (name, value) in pairs {
        assign(&mut form, &name, value.into());
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Entity;
    use bytes::Bytes;
    use serde_json::json;

    fn form(pairs: &[(&str, &str)]) -> serde_json::Value {
        let form = build(pairs.iter().map(|(name, value)| ((*name).to_owned(), FormNode::from(*value))));
        serde_json::to_value(form).unwrap()
    }

    #[test]
    fn indexed_and_repeated() {
        assert_eq!(form(&[("a[0]", "x"), ("a[1]", "y"), ("b", "z"), ("b", "w")]), json!({"a": ["x", "y"], "b": ["z", "w"]}));
    }

    #[test]
    fn nested_maps_and_appends() {
        assert_eq!(
            form(&[("user[name]", "aj"), ("user[tags][]", "a"), ("user[tags][]", "b"), ("files[]", "1")]),
            json!({"user": {"name": "aj", "tags": ["a", "b"]}, "files": ["1"]})
        );
    }

    #[test]
    fn lists_of_maps() {
        assert_eq!(
            form(&[("rows[0][id]", "1"), ("rows[0][v]", "a"), ("rows[1][id]", "2")]),
            json!({"rows": [{"id": "1", "v": "a"}, {"id": "2"}]})
        );
    }

    #[test]
    fn gaps_append() {
        assert_eq!(form(&[("a[5]", "x"), ("a[9]", "y")]), json!({"a": ["x", "y"]}));
    }

    #[test]
    fn conflicts_are_dropped() {
        assert_eq!(form(&[("a", "x"), ("a[b]", "y")]), json!({"a": "x"}));
        assert_eq!(form(&[("a[]", "x"), ("a[b]", "y")]), json!({"a": ["x"]}));
    }

    #[test]
    fn empty_names() {
        assert_eq!(form(&[("", "x"), ("", "y")]), json!({"": ["x", "y"]}));
    }

    #[test]
    fn plain_form() {
        let mut content = ContentDescriptor::default();
        let value =
            decode_plain(&mut content, &HeaderMap::new(), Value::from("input1=Rếver\r\ninput1=Bob\r\ninput2=mélanger")).unwrap();

        assert_eq!(content.datatype(), Some(Datatype::Form));
        assert_eq!(serde_json::to_value(value).unwrap(), json!({"input1": ["Rếver", "Bob"], "input2": "mélanger"}));
    }

    #[test]
    fn plain_form_continuation_lines() {
        let mut content = ContentDescriptor::default();
        let value = decode_plain(&mut content, &HeaderMap::new(), Value::from("orphan\r\nnote=one\r\ntwo\r\nx=1")).unwrap();
        assert_eq!(serde_json::to_value(value).unwrap(), json!({"note": "one\r\ntwo", "x": "1"}));
    }

    #[test]
    fn plain_form_trailing_crlf_stays_on_the_last_value() {
        let mut content = ContentDescriptor::default();
        let value = decode_plain(&mut content, &HeaderMap::new(), Value::from("a=1\r\nb=2\r\n")).unwrap();
        assert_eq!(serde_json::to_value(value).unwrap(), json!({"a": "1", "b": "2\r\n"}));
    }

    #[test]
    fn charset_field() {
        let mut content = ContentDescriptor::default();
        let pairs = vec![(CHARSET_FIELD.to_owned(), FormNode::from("iso-8859-1")), ("name".to_owned(), FormNode::from("é"))];
        let value = decode_pairs(&mut content, pairs).unwrap();

        // the two UTF-8 bytes of é read as windows-1252
        assert_eq!(serde_json::to_value(value).unwrap(), json!({"name": "Ã©"}));

        let pairs = vec![(CHARSET_FIELD.to_owned(), FormNode::from("utf-8")), ("name".to_owned(), FormNode::from("é"))];
        assert_eq!(serde_json::to_value(decode_pairs(&mut content, pairs).unwrap()).unwrap(), json!({"name": "é"}));

        let pairs = vec![(CHARSET_FIELD.to_owned(), FormNode::from("x-klingon"))];
        assert_eq!(decode_pairs(&mut content, pairs).unwrap_err(), ContentError::unsupported_charset("x-klingon"));
    }

    #[test]
    fn charset_field_decodes_binary_bodies() {
        let file = Entity::new(
            ContentDescriptor::for_part(Some("application/octet-stream"), Some("form-data; name=\"doc\"; filename=\"é.bin\"")).unwrap(),
            HeaderMap::new(),
            Value::Binary(Bytes::from_static(b"m\xe9l")),
        );
        let pairs = vec![
            (CHARSET_FIELD.to_owned(), FormNode::from("iso-8859-1")),
            ("raw".to_owned(), FormNode::Field(Value::Binary(Bytes::from_static(b"\xe9t\xe9")))),
            ("doc".to_owned(), FormNode::File(Box::new(file))),
        ];

        let value = decode_pairs(&mut ContentDescriptor::default(), pairs).unwrap();
        let form = value.as_form().unwrap();

        assert_eq!(form["raw"].as_text(), Some("été"));
        let doc = form["doc"].as_file().unwrap();
        assert_eq!(doc.body, Value::from("mél"));
        assert_eq!(doc.content.filename(), Some("é.bin"));
    }

    #[test]
    fn form_data_parts() {
        let field = Entity::new(
            ContentDescriptor::for_part(None, Some("form-data; name=\"email\"")).unwrap(),
            HeaderMap::new(),
            Value::from("coolaj86@gmail.com"),
        );
        let file = Entity::new(
            ContentDescriptor::for_part(Some("text/plain"), Some("form-data; name=\"attachments[]\"; filename=\"file1.txt\"")).unwrap(),
            HeaderMap::new(),
            Value::from("This is file 1"),
        );
        let anonymous = Entity::new(ContentDescriptor::default(), HeaderMap::new(), Value::from("lost"));

        let mut content = ContentDescriptor::default();
        let value = decode_form_data(&mut content, &HeaderMap::new(), Value::Multipart(vec![field, file, anonymous])).unwrap();
        let form = value.as_form().unwrap();

        assert_eq!(form.len(), 2);
        assert_eq!(form["email"].as_text(), Some("coolaj86@gmail.com"));
        let attachments = form["attachments"].as_list().unwrap();
        assert_eq!(attachments[0].as_file().unwrap().content.filename(), Some("file1.txt"));
    }

    #[test]
    fn query_is_flat() {
        let form = parse_query("input1=R%E1%BA%BFver&input1=Bob&input2=m%C3%A9langer&a[b]=c").unwrap();
        assert_eq!(
            serde_json::to_value(form).unwrap(),
            json!({"input1": ["Rếver", "Bob"], "input2": "mélanger", "a[b]": "c"})
        );
    }
}
