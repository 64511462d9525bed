//! Script values as they cross from the engine into the host.
//!
//! The engine does the language-specific part of serialization (number
//! formatting, JSON encoding of objects, catching cyclic structures); this
//! module owns the textual rendering policy applied to the result.

use serde::Serialize;

/// Text substituted for a value the engine could not serialize.
pub const UNSERIALIZABLE_PLACEHOLDER: &str = "[Unserializable]";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ScriptValue {
    Null,
    Undefined,
    /// A primitive in its natural string form.
    Text(String),
    /// A non-primitive value, already passed through the engine's JSON encoder.
    Structured(serde_json::Value),
    /// Serialization failed; carries the reason.
    Unserializable(String),
}

impl ScriptValue {
    pub fn text(value: impl Into<String>) -> Self {
        ScriptValue::Text(value.into())
    }

    pub fn render(&self) -> String {
        match self {
            ScriptValue::Null => "null".to_string(),
            ScriptValue::Undefined => "undefined".to_string(),
            ScriptValue::Text(text) => text.clone(),
            ScriptValue::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            ScriptValue::Unserializable(reason) => {
                log::debug!("Rendering placeholder for unserializable value: {}", reason);
                UNSERIALIZABLE_PLACEHOLDER.to_string()
            }
        }
    }
}

/// Render every argument of one logging call and join them with a single space.
pub fn render_args(args: &[ScriptValue]) -> String {
    args.iter()
        .map(ScriptValue::render)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitive_rendering() {
        assert_eq!(ScriptValue::Null.render(), "null");
        assert_eq!(ScriptValue::Undefined.render(), "undefined");
        assert_eq!(ScriptValue::text("2").render(), "2");
    }

    #[test]
    fn test_structured_rendering_is_indented_and_ordered() {
        let value = ScriptValue::Structured(json!({ "b": 1, "a": [true, null] }));
        assert_eq!(
            value.render(),
            "{\n  \"b\": 1,\n  \"a\": [\n    true,\n    null\n  ]\n}"
        );
    }

    #[test]
    fn test_unserializable_renders_placeholder() {
        let value = ScriptValue::Unserializable("TypeError: cyclic object value".to_string());
        assert_eq!(value.render(), UNSERIALIZABLE_PLACEHOLDER);
    }

    #[test]
    fn test_args_joined_with_single_space() {
        let args = vec![
            ScriptValue::text("sum:"),
            ScriptValue::text("3"),
            ScriptValue::Undefined,
        ];
        assert_eq!(render_args(&args), "sum: 3 undefined");
        assert_eq!(render_args(&[]), "");
    }
}
