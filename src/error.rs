use serde_json::Value;
use thiserror::Error;

/// Malformed usage of a graph node: the input does not have the shape the
/// node needs.
///
/// This is a programming error, not a data condition. Fetching with a
/// malformed input panics with this error's message; [`Node::check_input`]
/// and the [`QueryEngine`] entry points return it instead.
///
/// [`Node::check_input`]: crate::Node::check_input
/// [`QueryEngine`]: crate::QueryEngine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("product input must be an object keyed by child name, got {found}")]
    NotAnObject { found: &'static str },
    #[error("product input is missing the `{0}` key")]
    MissingKey(String),
    #[error("list input must be an array, got {found}")]
    NotAnArray { found: &'static str },
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Looks up a product child's sub-input.
pub(crate) fn field<'a>(input: &'a Value, key: &str) -> Result<&'a Value, ShapeError> {
    match input {
        Value::Object(fields) => fields
            .get(key)
            .ok_or_else(|| ShapeError::MissingKey(key.to_string())),
        other => Err(ShapeError::NotAnObject { found: kind(other) }),
    }
}

/// Borrows the elements of a list input.
pub(crate) fn items(input: &Value) -> Result<&[Value], ShapeError> {
    match input {
        Value::Array(items) => Ok(items),
        other => Err(ShapeError::NotAnArray { found: kind(other) }),
    }
}
