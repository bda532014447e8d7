//! JSON Schema to GBNF grammar compilation
//!
//! This crate converts JSON Schema documents into GBNF grammars whose
//! language is exactly the set of JSON texts conforming to the schema. The
//! emitted grammar is meant to drive constrained generation, so a sampler
//! restricted by it can only ever produce schema-valid JSON.
//!
//! The supported keyword subset covers `$ref` (local and `https://` remote),
//! `oneOf`/`anyOf`/`allOf`, `const`, `enum`, typed objects with
//! `required`/`additionalProperties`, arrays with `items`/`prefixItems` and
//! item-count bounds, string `pattern` (anchored ECMA subset), `format` and
//! length bounds. Numeric bounds, `not` and conditional keywords are not
//! supported.

mod builtins;
mod converter;
mod error;
mod pattern;
pub mod text;

pub use converter::{Fetcher, SchemaConverter};
pub use error::{ConversionError, FetchError, SchemaError};

use serde_json::Value;

/// Trait for types that can be handed to [`json_schema_to_grammar`] as a
/// schema.
pub trait IntoJsonSchema {
    fn into_schema(self) -> Result<Value, ConversionError>;
}

impl IntoJsonSchema for &str {
    fn into_schema(self) -> Result<Value, ConversionError> {
        Ok(serde_json::from_str(self)?)
    }
}

impl IntoJsonSchema for String {
    fn into_schema(self) -> Result<Value, ConversionError> {
        Ok(serde_json::from_str(&self)?)
    }
}

impl IntoJsonSchema for Value {
    fn into_schema(self) -> Result<Value, ConversionError> {
        Ok(self)
    }
}

impl IntoJsonSchema for &Value {
    fn into_schema(self) -> Result<Value, ConversionError> {
        Ok(self.clone())
    }
}

/// Compile a JSON Schema into a GBNF grammar rooted at the `root` rule.
///
/// Accepts `&str`, `String`, `Value`, or `&Value`. Remote `$ref`s resolve to
/// empty documents; construct a [`SchemaConverter`] directly to supply a real
/// fetch callback or to enable dot-all pattern matching.
///
/// # Example
///
/// ```
/// use schema2gbnf::json_schema_to_grammar;
///
/// let grammar = json_schema_to_grammar(r#"{"type": "boolean"}"#).unwrap();
/// assert!(grammar.contains(r#"root ::= ("true" | "false") space"#));
///
/// let value = serde_json::json!({"type": "integer"});
/// let grammar = json_schema_to_grammar(&value).unwrap();
/// assert!(grammar.contains("root ::="));
/// ```
pub fn json_schema_to_grammar(schema: impl IntoJsonSchema) -> Result<String, ConversionError> {
    let mut schema = schema.into_schema()?;
    let mut converter = SchemaConverter::new(
        |_: &str| -> Result<Value, FetchError> { Ok(Value::Object(serde_json::Map::new())) },
        false,
    );
    converter.resolve_refs(&mut schema, "input")?;
    converter.visit(&schema, "");
    converter.check_errors()?;
    Ok(converter.format_grammar())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_strings_and_values() {
        let from_str = json_schema_to_grammar(r#"{"type": "string"}"#).unwrap();
        let from_value = json_schema_to_grammar(serde_json::json!({"type": "string"})).unwrap();
        assert_eq!(from_str, from_value);
        // at the root, the string primitive's production is installed as `root`
        assert!(from_str.contains(r#"root ::= "\"" char* "\"" space"#));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = json_schema_to_grammar("{not json").unwrap_err();
        assert!(matches!(err, ConversionError::Json(_)));
    }

    #[test]
    fn default_fetcher_returns_empty_documents() {
        // the remote doc is {}, so the fragment pointer cannot resolve
        let err = json_schema_to_grammar(
            r##"{"$ref": "https://example.com/schema.json#/$defs/Thing"}"##,
        )
        .unwrap_err();
        assert!(err.to_string().contains("$defs not in {}"));
    }
}
