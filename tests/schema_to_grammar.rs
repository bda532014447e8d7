use std::cell::Cell;
use std::rc::Rc;

use serde_json::{json, Value};

use schema2gbnf::{json_schema_to_grammar, ConversionError, SchemaConverter};

/// Split a grammar into (name, rhs) pairs.
fn rules_of(grammar: &str) -> Vec<(String, String)> {
    grammar
        .lines()
        .map(|line| {
            let (name, rhs) = line.split_once(" ::= ").expect("malformed rule line");
            (name.to_string(), rhs.to_string())
        })
        .collect()
}

/// Rule names referenced by a right-hand side, skipping string terminals and
/// character classes.
fn referenced_rules(rhs: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut in_class = false;
    let mut chars = rhs.chars();
    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
        } else if in_class {
            match c {
                '\\' => {
                    chars.next();
                }
                ']' => in_class = false,
                _ => {}
            }
        } else if c == '"' {
            flush(&mut current, &mut names);
            in_string = true;
        } else if c == '[' {
            flush(&mut current, &mut names);
            in_class = true;
        } else if c.is_ascii_alphanumeric() || c == '-' {
            current.push(c);
        } else {
            flush(&mut current, &mut names);
        }
    }
    flush(&mut current, &mut names);
    names
}

fn flush(current: &mut String, names: &mut Vec<String>) {
    if !current.is_empty() {
        names.push(std::mem::take(current));
    }
}

fn assert_well_formed(grammar: &str) {
    let rules = rules_of(grammar);
    assert_eq!(
        rules.iter().filter(|(name, _)| name == "root").count(),
        1,
        "root must be defined exactly once:\n{grammar}"
    );
    for (name, rhs) in &rules {
        assert!(
            name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "invalid rule name {name:?}"
        );
        assert!(!rhs.is_empty(), "rule {name} has an empty right-hand side");
        for referenced in referenced_rules(rhs) {
            assert!(
                rules.iter().any(|(defined, _)| *defined == referenced),
                "rule {name} references undefined rule {referenced}:\n{grammar}"
            );
        }
    }
}

#[test]
fn grammars_are_closed_over_their_rule_names() {
    let schemas = vec![
        json!({}),
        json!({"type": "boolean"}),
        json!({"type": "string", "minLength": 1, "maxLength": 10}),
        json!({"type": "string", "format": "date-time"}),
        json!({"type": "string", "pattern": "^[a-f0-9]{8}(-[a-f0-9]{4}){3}$"}),
        json!({"enum": ["a", "b", 3]}),
        json!({"type": ["integer", "null"]}),
        json!({"type": "array", "items": {"type": "number"}, "minItems": 2, "maxItems": 5}),
        json!({"type": "array", "prefixItems": [{"type": "integer"}, {"type": "string"}]}),
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer"},
                "name": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "meta": {"type": "object", "additionalProperties": {"type": "string"}}
            },
            "required": ["id"]
        }),
        json!({
            "$ref": "#/$defs/Node",
            "$defs": {
                "Node": {
                    "type": "object",
                    "properties": {
                        "value": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/$defs/Node"}}
                    },
                    "required": ["value"]
                }
            }
        }),
    ];
    for schema in schemas {
        let grammar = json_schema_to_grammar(&schema)
            .unwrap_or_else(|e| panic!("failed to convert {schema}: {e}"));
        assert_well_formed(&grammar);
    }
}

#[test]
fn conversion_is_reproducible() {
    let schema = json!({
        "type": "object",
        "properties": {
            "kind": {"const": "event"},
            "at": {"type": "string", "format": "date-time"},
            "payload": {"anyOf": [{"type": "object"}, {"type": "null"}]}
        },
        "required": ["kind", "at"]
    });
    let first = json_schema_to_grammar(&schema).unwrap();
    let second = json_schema_to_grammar(&schema).unwrap();
    assert_eq!(first, second);
}

#[test]
fn recursive_schema_references_itself() {
    let grammar = json_schema_to_grammar(json!({
        "$ref": "#/$defs/Node",
        "$defs": {
            "Node": {
                "type": "object",
                "properties": {
                    "value": {"type": "string"},
                    "children": {"type": "array", "items": {"$ref": "#/$defs/Node"}}
                },
                "required": ["value"]
            }
        }
    }))
    .unwrap();
    assert!(grammar.contains("Node-children-item ::= Node\n"));
    assert!(grammar.contains("root ::= Node\n"));
    assert_well_formed(&grammar);
}

#[test]
fn pydantic_style_model_with_local_refs() {
    let grammar = json_schema_to_grammar(json!({
        "$defs": {
            "FooBar": {
                "properties": {
                    "count": {"title": "Count", "type": "integer"},
                    "size": {
                        "anyOf": [{"type": "number"}, {"type": "null"}],
                        "title": "Size"
                    }
                },
                "required": ["count"],
                "title": "FooBar",
                "type": "object"
            },
            "Gender": {
                "enum": ["male", "female", "other", "not_given"],
                "title": "Gender",
                "type": "string"
            }
        },
        "properties": {
            "foo_bar": {"$ref": "#/$defs/FooBar"},
            "gender": {
                "anyOf": [{"$ref": "#/$defs/Gender"}, {"type": "null"}]
            },
            "snap": {"type": "integer"}
        },
        "required": ["foo_bar"],
        "title": "Main",
        "type": "object"
    }))
    .unwrap();

    assert!(grammar.contains("FooBar ::= \"{\" space FooBar-count-kv"));
    assert!(grammar.contains("FooBar-size ::= number | null"));
    // underscores in property names sanitize to dashes in rule names
    assert!(grammar.contains("foo-bar ::= FooBar"));
    assert!(grammar.contains("foo-bar-kv ::= \"\\\"foo_bar\\\"\" space \":\" space foo-bar"));
    assert!(grammar.contains("gender-0 ::= Gender"));
    assert!(grammar.contains("\"\\\"male\\\"\""));
    assert!(grammar.contains("\"\\\"not_given\\\"\""));
    assert_well_formed(&grammar);
}

#[test]
fn remote_documents_are_fetched_once_per_base_uri() {
    let calls = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&calls);
    let mut converter = SchemaConverter::new(
        move |uri: &str| {
            seen.set(seen.get() + 1);
            assert!(uri.starts_with("https://example.com/person.json#"));
            Ok(json!({
                "$defs": {
                    "Person": {
                        "type": "object",
                        "properties": {"name": {"type": "string"}},
                        "required": ["name"]
                    }
                }
            }))
        },
        false,
    );

    let mut schema = json!({
        "type": "object",
        "properties": {
            "owner": {"$ref": "https://example.com/person.json#/$defs/Person"},
            "backup": {"$ref": "https://example.com/person.json#/$defs/Person"}
        },
        "required": ["owner", "backup"]
    });
    converter.resolve_refs(&mut schema, "input").unwrap();
    converter.visit(&schema, "");
    converter.check_errors().unwrap();
    let grammar = converter.format_grammar();

    assert_eq!(calls.get(), 1);
    assert!(grammar.contains("owner ::= Person\n"));
    assert!(grammar.contains("backup ::= Person\n"));
    assert!(grammar.contains("Person-name-kv ::= \"\\\"name\\\"\" space \":\" space string"));
    assert_well_formed(&grammar);
}

#[test]
fn fetch_failures_abort_resolution() {
    let mut converter = SchemaConverter::new(
        |_: &str| Err("network unreachable".into()),
        false,
    );
    let mut schema = json!({"$ref": "https://example.com/schema.json#/$defs/X"});
    let err = converter.resolve_refs(&mut schema, "input").unwrap_err();
    match err {
        ConversionError::Fetch { uri, source } => {
            assert_eq!(uri, "https://example.com/schema.json#/$defs/X");
            assert_eq!(source.to_string(), "network unreachable");
        }
        other => panic!("expected fetch error, got {other:?}"),
    }
}

#[test]
fn unsupported_pattern_syntax_is_a_warning_not_an_error() {
    let mut converter = SchemaConverter::new(
        |_: &str| -> Result<Value, schema2gbnf::FetchError> { Ok(json!({})) },
        false,
    );
    converter.visit(&json!({"type": "string", "pattern": "^(?i)yes$"}), "");
    assert!(converter
        .warnings()
        .iter()
        .any(|w| w == "Unsupported pattern syntax"));
    converter.check_errors().unwrap();
    assert!(converter.format_grammar().contains("root ::="));
}
