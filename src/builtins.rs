//! Fixed productions for JSON primitives and string formats.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;

use crate::text::build_repetition;

/// The whitespace rule every primitive terminates with.
pub(crate) const SPACE_RULE: &str = "\" \"?";

/// A catalog production together with the rules its right-hand side refers to.
pub(crate) struct BuiltinRule {
    pub content: String,
    pub deps: &'static [&'static str],
}

impl BuiltinRule {
    fn new(content: impl Into<String>, deps: &'static [&'static str]) -> Self {
        Self {
            content: content.into(),
            deps,
        }
    }
}

lazy_static! {
    pub(crate) static ref PRIMITIVE_RULES: HashMap<&'static str, BuiltinRule> = {
        // One digit followed by at most 15 more, so emitted numbers stay
        // within the exactly-representable range of an f64 consumer.
        let up_to_15_digits = build_repetition("[0-9]", 0, Some(15), "", false);
        let hex = "[0-9a-fA-F]";

        let mut rules = HashMap::new();
        rules.insert(
            "boolean",
            BuiltinRule::new(r#"("true" | "false") space"#, &[]),
        );
        rules.insert(
            "decimal-part",
            BuiltinRule::new(format!("[0-9] {up_to_15_digits}"), &[]),
        );
        rules.insert(
            "integral-part",
            BuiltinRule::new(format!("[0-9] | [1-9] {up_to_15_digits}"), &[]),
        );
        rules.insert(
            "number",
            BuiltinRule::new(
                r#"("-"? integral-part) ("." decimal-part)? ([eE] [-+]? integral-part)? space"#,
                &["integral-part", "decimal-part"],
            ),
        );
        rules.insert(
            "integer",
            BuiltinRule::new(r#"("-"? integral-part) space"#, &["integral-part"]),
        );
        rules.insert(
            "value",
            BuiltinRule::new(
                "object | array | string | number | boolean | null",
                &["object", "array", "string", "number", "boolean", "null"],
            ),
        );
        rules.insert(
            "object",
            BuiltinRule::new(
                r#""{" space ( string ":" space value ("," space string ":" space value)* )? "}" space"#,
                &["string", "value"],
            ),
        );
        rules.insert(
            "array",
            BuiltinRule::new(
                r#""[" space ( value ("," space value)* )? "]" space"#,
                &["value"],
            ),
        );
        rules.insert(
            "uuid",
            BuiltinRule::new(
                format!(
                    r#""\"" {} "-" {} "-" {} "-" {} "-" {} "\"" space"#,
                    hex.repeat(8),
                    hex.repeat(4),
                    hex.repeat(4),
                    hex.repeat(4),
                    hex.repeat(12),
                ),
                &[],
            ),
        );
        rules.insert(
            "char",
            BuiltinRule::new(
                r#"[^"\\] | "\\" (["\\/bfnrt] | "u" [0-9a-fA-F] [0-9a-fA-F] [0-9a-fA-F] [0-9a-fA-F])"#,
                &[],
            ),
        );
        rules.insert(
            "string",
            BuiltinRule::new(r#""\"" char* "\"" space"#, &["char"]),
        );
        rules.insert("null", BuiltinRule::new(r#""null" space"#, &[]));
        rules
    };

    pub(crate) static ref STRING_FORMAT_RULES: HashMap<&'static str, BuiltinRule> = {
        let mut rules = HashMap::new();
        rules.insert(
            "date",
            BuiltinRule::new(
                r#"[0-9] [0-9] [0-9] [0-9] "-" ( "0" [1-9] | "1" [0-2] ) "-" ( "0" [1-9] | [1-2] [0-9] | "3" [0-1] )"#,
                &[],
            ),
        );
        rules.insert(
            "time",
            BuiltinRule::new(
                r#"([01] [0-9] | "2" [0-3]) ":" [0-5] [0-9] ":" [0-5] [0-9] ( "." [0-9] [0-9] [0-9] )? ( "Z" | ( "+" | "-" ) ( [01] [0-9] | "2" [0-3] ) ":" [0-5] [0-9] )"#,
                &[],
            ),
        );
        rules.insert(
            "date-time",
            BuiltinRule::new(r#"date "T" time"#, &["date", "time"]),
        );
        rules.insert(
            "date-string",
            BuiltinRule::new(r#""\"" date "\"" space"#, &["date"]),
        );
        rules.insert(
            "time-string",
            BuiltinRule::new(r#""\"" time "\"" space"#, &["time"]),
        );
        rules.insert(
            "date-time-string",
            BuiltinRule::new(r#""\"" date-time "\"" space"#, &["date-time"]),
        );
        rules
    };

    static ref RESERVED_NAMES: HashSet<&'static str> = {
        let mut names = HashSet::new();
        names.insert("root");
        names.extend(PRIMITIVE_RULES.keys());
        names.extend(STRING_FORMAT_RULES.keys());
        names
    };
}

/// User-supplied names colliding with catalog rules get renamed by the
/// visitor, keeping catalog names bound to their fixed productions.
pub(crate) fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dependency_is_a_catalog_rule() {
        for rule in PRIMITIVE_RULES.values().chain(STRING_FORMAT_RULES.values()) {
            for dep in rule.deps {
                assert!(
                    PRIMITIVE_RULES.contains_key(dep) || STRING_FORMAT_RULES.contains_key(dep),
                    "dependency {dep} missing from both catalogs"
                );
            }
        }
    }

    #[test]
    fn integral_part_caps_at_16_digits() {
        let content = &PRIMITIVE_RULES["integral-part"].content;
        assert_eq!(content.matches("[0-9]").count(), 16);
        assert!(content.starts_with("[0-9] | [1-9] "));
    }

    #[test]
    fn uuid_groups_are_8_4_4_4_12() {
        let content = &PRIMITIVE_RULES["uuid"].content;
        assert_eq!(content.matches("[0-9a-fA-F]").count(), 32);
        assert_eq!(content.matches("\"-\"").count(), 4);
    }

    #[test]
    fn reserved_names_cover_root_and_both_catalogs() {
        assert!(is_reserved_name("root"));
        assert!(is_reserved_name("value"));
        assert!(is_reserved_name("date-time-string"));
        assert!(!is_reserved_name("person"));
    }
}
