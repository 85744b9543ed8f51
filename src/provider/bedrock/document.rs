use aws_smithy_types::{Document, Number};
use serde_json::Value;

/// Convert a `serde_json::Value` to an AWS `Document`
pub(crate) fn value_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(unsigned) = n.as_u64() {
                Document::Number(Number::PosInt(unsigned))
            } else if let Some(signed) = n.as_i64() {
                Document::Number(Number::NegInt(signed))
            } else {
                n.as_f64()
                    .map_or(Document::Null, |float| Document::Number(Number::Float(float)))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(value_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), value_to_document(value)))
                .collect(),
        ),
    }
}

/// Convert an AWS `Document` to a `serde_json::Value`
pub(crate) fn document_to_value(doc: &Document) -> Value {
    match doc {
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), document_to_value(value)))
                .collect(),
        ),
        Document::Array(items) => Value::Array(items.iter().map(document_to_value).collect()),
        Document::Number(Number::PosInt(unsigned)) => Value::from(*unsigned),
        Document::Number(Number::NegInt(signed)) => Value::from(*signed),
        Document::Number(Number::Float(float)) => {
            serde_json::Number::from_f64(*float).map_or(Value::Null, Value::Number)
        }
        Document::String(s) => Value::String(s.clone()),
        Document::Bool(b) => Value::Bool(*b),
        Document::Null => Value::Null,
    }
}
