//! XML document to JSON conversion.
//!
//! Mapping rules:
//! - the root element becomes the single top-level key
//! - attributes become `@name` entries
//! - elements holding only text become strings, empty elements `null`
//! - text next to attributes or children goes under `#text`
//! - repeated sibling names collapse into an array in document order
//!
//! Namespace prefixes are kept as part of the name (`ns:Tag`).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::BodyError;

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(element: &BytesStart<'_>) -> Result<Self, BodyError> {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let mut children = Map::new();

        for attribute in element.attributes() {
            let attribute = attribute.map_err(|e| BodyError::Parse(e.to_string()))?;
            let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
            let value = attribute
                .unescape_value()
                .map_err(|e| BodyError::Parse(e.to_string()))?;
            children.insert(key, Value::String(value.into_owned()));
        }

        Ok(Self {
            name,
            children,
            text: String::new(),
        })
    }

    fn into_value(self) -> (String, Value) {
        let value = match (self.children.is_empty(), self.text.is_empty()) {
            (true, true) => Value::Null,
            (true, false) => Value::String(self.text),
            (false, _) => {
                let mut children = self.children;
                if !self.text.is_empty() {
                    children.insert("#text".to_string(), Value::String(self.text));
                }
                Value::Object(children)
            }
        };
        (self.name, value)
    }
}

/// Insert `value` under `name`, turning repeated names into arrays.
fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

/// Parse an XML document into a JSON object keyed by its root element.
pub fn parse_document(xml: &str) -> Result<Map<String, Value>, BodyError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut document = Map::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if stack.is_empty() && !document.is_empty() {
                    return Err(BodyError::Parse(
                        "junk after document element".to_string(),
                    ));
                }
                stack.push(Frame::open(e)?);
            }
            Ok(Event::Empty(ref e)) => {
                if stack.is_empty() && !document.is_empty() {
                    return Err(BodyError::Parse(
                        "junk after document element".to_string(),
                    ));
                }
                let (name, value) = Frame::open(e)?.into_value();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => insert_child(&mut document, name, value),
                }
            }
            Ok(Event::End(_)) => {
                let frame = stack.pop().ok_or_else(|| {
                    BodyError::Parse("closing tag without opening tag".to_string())
                })?;
                let (name, value) = frame.into_value();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => insert_child(&mut document, name, value),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|e| BodyError::Parse(e.to_string()))?;
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(BodyError::Parse(
                            "text outside of document element".to_string(),
                        ))
                    }
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                match stack.last_mut() {
                    Some(frame) => frame.text.push_str(&text),
                    None => {
                        return Err(BodyError::Parse(
                            "CDATA outside of document element".to_string(),
                        ))
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BodyError::Parse(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            // Declarations, comments, processing instructions, doctype
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(BodyError::Parse("unclosed element at end of input".to_string()));
    }
    if document.is_empty() {
        return Err(BodyError::Parse("no element found".to_string()));
    }

    Ok(document)
}
