//! Error types for schema conversion.

/// Error returned by a [`crate::SchemaConverter`] fetch callback.
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// A single problem found while converting a schema.
///
/// These are accumulated during conversion rather than returned eagerly, so
/// one run can report as many problems as possible. The full batch is
/// surfaced by [`crate::SchemaConverter::check_errors`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Pattern must start with '^' and end with '$'")]
    PatternNotAnchored,

    #[error("Unbalanced parentheses")]
    UnbalancedParens,

    #[error("Unbalanced square brackets")]
    UnbalancedBrackets,

    #[error("Unbalanced curly brackets")]
    UnbalancedBraces,

    #[error("Wrong number of values in curly brackets")]
    BadRepetitionCount,

    #[error("Invalid number in curly brackets")]
    InvalidRepetitionNumber,

    /// A `$ref` that is neither remote (`https://`) nor local (`#/`).
    #[error("Unsupported ref: {0}")]
    UnsupportedRef(String),

    /// A JSON pointer token that does not exist in the referenced document.
    #[error("Error resolving ref {reference}: {selector} not in {target}")]
    UnresolvedRef {
        reference: String,
        selector: String,
        target: String,
    },

    /// A `$ref` URI that never made it into the reference index.
    #[error("Unresolved ref: {0}")]
    UnknownRef(String),

    /// A built-in rule dependency missing from both catalogs.
    #[error("Rule {0} not known")]
    UnknownPrimitive(String),

    #[error("Unrecognized schema: {0}")]
    UnrecognizedSchema(String),
}

/// Failure of a whole conversion run.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Every [`SchemaError`] accumulated during the run, raised as one batch.
    #[error("JSON schema conversion failed:\n{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Schema(Vec<SchemaError>),

    /// The fetch callback failed while retrieving a remote schema. Unlike
    /// [`SchemaError`]s this aborts resolution immediately.
    #[error("Failed fetching remote schema {uri}: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_aggregate_one_per_line() {
        let err = ConversionError::Schema(vec![
            SchemaError::PatternNotAnchored,
            SchemaError::UnsupportedRef("file:///etc/passwd".to_string()),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("JSON schema conversion failed:\n"));
        assert!(msg.contains("Pattern must start with '^' and end with '$'"));
        assert!(msg.contains("Unsupported ref: file:///etc/passwd"));
    }

    #[test]
    fn unresolved_ref_names_the_missing_selector() {
        let err = SchemaError::UnresolvedRef {
            reference: "input#/$defs/Missing".to_string(),
            selector: "Missing".to_string(),
            target: "{}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Error resolving ref input#/$defs/Missing: Missing not in {}"
        );
    }
}
