//! The stateful schema-to-grammar converter.
//!
//! A [`SchemaConverter`] is single-use: construct it, resolve references,
//! visit the root schema, then check for accumulated errors and serialize
//! the rule table. [`crate::json_schema_to_grammar`] wraps that sequence.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::builtins::{
    is_reserved_name, BuiltinRule, PRIMITIVE_RULES, SPACE_RULE, STRING_FORMAT_RULES,
};
use crate::error::{ConversionError, FetchError, SchemaError};
use crate::text::{build_repetition, format_literal};

lazy_static! {
    static ref INVALID_RULE_CHARS_RE: Regex = Regex::new("[^a-zA-Z0-9-]+").unwrap();
    static ref UUID_FORMAT_RE: Regex = Regex::new("^uuid[1-5]?$").unwrap();
}

/// Callback used to retrieve remote `$ref` documents. Called at most once
/// per distinct base URI; errors abort reference resolution.
pub type Fetcher = Box<dyn FnMut(&str) -> Result<Value, FetchError>>;

/// Compiles a JSON schema into a table of named GBNF productions.
pub struct SchemaConverter {
    fetch: Fetcher,
    dotall: bool,
    rules: IndexMap<String, String>,
    refs: HashMap<String, Value>,
    refs_being_resolved: HashSet<String>,
    errors: Vec<SchemaError>,
    warnings: Vec<String>,
}

fn sub_name(name: &str, suffix: &str) -> String {
    if name.is_empty() {
        suffix.to_string()
    } else {
        format!("{name}-{suffix}")
    }
}

fn is_empty_schema(schema: &Value) -> bool {
    match schema {
        Value::Null => true,
        Value::Object(members) => members.is_empty(),
        _ => false,
    }
}

impl SchemaConverter {
    /// Create a converter with a fetch callback for remote references.
    /// `dotall` controls whether `.` in patterns matches newlines.
    pub fn new<F>(fetch: F, dotall: bool) -> Self
    where
        F: FnMut(&str) -> Result<Value, FetchError> + 'static,
    {
        let mut rules = IndexMap::new();
        rules.insert("space".to_string(), SPACE_RULE.to_string());
        Self {
            fetch: Box::new(fetch),
            dotall,
            rules,
            refs: HashMap::new(),
            refs_being_resolved: HashSet::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn dotall(&self) -> bool {
        self.dotall
    }

    pub(crate) fn push_error(&mut self, error: SchemaError) {
        self.errors.push(error);
    }

    pub(crate) fn push_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    /// Install `rule` under a sanitized version of `name` and return the
    /// name actually used. Re-adding an identical right-hand side under the
    /// same name is a no-op; a different right-hand side gets the smallest
    /// free integer suffix instead of overwriting.
    pub(crate) fn add_rule(&mut self, name: &str, rule: &str) -> String {
        let esc_name = INVALID_RULE_CHARS_RE.replace_all(name, "-").into_owned();
        match self.rules.get(&esc_name) {
            Some(existing) if existing != rule => {
                let mut i = 0;
                loop {
                    let key = format!("{esc_name}{i}");
                    match self.rules.get(&key) {
                        Some(existing) if existing != rule => i += 1,
                        _ => {
                            self.rules.insert(key.clone(), rule.to_string());
                            return key;
                        }
                    }
                }
            }
            _ => {
                self.rules.insert(esc_name.clone(), rule.to_string());
                esc_name
            }
        }
    }

    /// Install a catalog rule and, transitively, every catalog rule its
    /// right-hand side depends on.
    fn add_primitive(&mut self, name: &str, rule: &BuiltinRule) -> String {
        let installed = self.add_rule(name, &rule.content);
        for dep in rule.deps {
            match PRIMITIVE_RULES.get(dep).or_else(|| STRING_FORMAT_RULES.get(dep)) {
                Some(dep_rule) => {
                    if !self.rules.contains_key(*dep) {
                        self.add_primitive(dep, dep_rule);
                    }
                }
                None => self.push_error(SchemaError::UnknownPrimitive((*dep).to_string())),
            }
        }
        installed
    }

    /// Rewrite every reachable local `$ref` in `schema` to absolute
    /// `url#/...` form, fetch and resolve remote documents, and index the
    /// referenced sub-schemas so [`Self::visit`] can look them up by URI.
    ///
    /// Local pointers are walked only after the whole tree has been
    /// rewritten, so indexed sub-schemas carry absolute refs themselves and
    /// cyclic references resolve to the in-progress rule name.
    pub fn resolve_refs(
        &mut self,
        schema: &mut Value,
        url: &str,
    ) -> Result<(), ConversionError> {
        let mut local_refs = Vec::new();
        self.rewrite_refs(schema, url, &mut local_refs)?;
        for reference in local_refs {
            if self.refs.contains_key(&reference) {
                continue;
            }
            let fragment = match reference.find('#') {
                Some(idx) => &reference[idx + 1..],
                None => "",
            };
            match walk_pointer(schema, &reference, fragment) {
                Ok(target) => {
                    self.refs.insert(reference, target);
                }
                Err(error) => self.push_error(error),
            }
        }
        Ok(())
    }

    fn rewrite_refs(
        &mut self,
        node: &mut Value,
        url: &str,
        local_refs: &mut Vec<String>,
    ) -> Result<(), ConversionError> {
        match node {
            Value::Array(items) => {
                for item in items {
                    self.rewrite_refs(item, url, local_refs)?;
                }
            }
            Value::Object(members) => {
                let reference = members.get("$ref").map(|r| match r.as_str() {
                    Some(s) => s.to_string(),
                    None => r.to_string(),
                });
                if let Some(reference) = reference {
                    if reference.starts_with("https://") {
                        self.resolve_remote_ref(&reference)?;
                    } else if reference.starts_with("#/") {
                        let absolute = format!("{url}{reference}");
                        members.insert("$ref".to_string(), Value::String(absolute.clone()));
                        if !local_refs.contains(&absolute) {
                            local_refs.push(absolute);
                        }
                    } else {
                        self.push_error(SchemaError::UnsupportedRef(reference));
                    }
                }
                // Walk the remaining values too: a document whose root is a
                // $ref still needs the refs inside its $defs rewritten
                // before any pointer is resolved against it.
                for (_, value) in members.iter_mut() {
                    self.rewrite_refs(value, url, local_refs)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn resolve_remote_ref(&mut self, reference: &str) -> Result<(), ConversionError> {
        if self.refs.contains_key(reference) {
            return Ok(());
        }
        let base_url = reference.split('#').next().unwrap_or(reference).to_string();
        if !self.refs.contains_key(&base_url) {
            debug!(uri = reference, "fetching remote schema");
            let mut referenced =
                (self.fetch)(reference).map_err(|source| ConversionError::Fetch {
                    uri: reference.to_string(),
                    source,
                })?;
            self.resolve_refs(&mut referenced, &base_url)?;
            self.refs.insert(base_url.clone(), referenced);
        }
        let fragment = match reference.find('#') {
            Some(idx) => &reference[idx + 1..],
            None => return Ok(()),
        };
        if fragment.is_empty() {
            return Ok(());
        }
        if let Some(root) = self.refs.get(&base_url).cloned() {
            match walk_pointer(&root, reference, fragment) {
                Ok(target) => {
                    self.refs.insert(reference.to_string(), target);
                }
                Err(error) => self.push_error(error),
            }
        }
        Ok(())
    }

    /// Resolve an already-indexed `$ref` URI to a rule name, visiting the
    /// referenced sub-schema the first time it is seen. A URI that is
    /// already on the resolution stack only yields its name, which is how
    /// cyclic schemas end up as self-referential rules.
    fn resolve_ref(&mut self, reference: &str) -> String {
        let mut ref_name = reference
            .rsplit('/')
            .next()
            .unwrap_or(reference)
            .to_string();
        if !self.rules.contains_key(&ref_name) && !self.refs_being_resolved.contains(reference) {
            self.refs_being_resolved.insert(reference.to_string());
            match self.refs.get(reference).cloned() {
                Some(resolved) => {
                    ref_name = self.visit(&resolved, &ref_name);
                }
                None => self.push_error(SchemaError::UnknownRef(reference.to_string())),
            }
            self.refs_being_resolved.remove(reference);
        }
        ref_name
    }

    fn generate_union_rule(&mut self, name: &str, alt_schemas: &[Value]) -> String {
        alt_schemas
            .iter()
            .enumerate()
            .map(|(i, alt_schema)| {
                let alt_name = if name.is_empty() {
                    format!("alternative-{i}")
                } else {
                    format!("{name}-{i}")
                };
                self.visit(alt_schema, &alt_name)
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn constant_rule(value: &Value) -> String {
        format_literal(&value.to_string())
    }

    /// Produce rules for `schema`, registering them under `name` (or `root`
    /// when `name` is empty), and return the name of the top rule.
    pub fn visit(&mut self, schema: &Value, name: &str) -> String {
        let schema_type = schema.get("type");
        let type_str = schema_type.and_then(Value::as_str);
        let schema_format = schema.get("format").and_then(Value::as_str).unwrap_or("");
        let rule_name = if is_reserved_name(name) {
            format!("{name}-")
        } else if name.is_empty() {
            "root".to_string()
        } else {
            name.to_string()
        };

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            let resolved_name = self.resolve_ref(reference);
            self.add_rule(&rule_name, &resolved_name)
        } else if let Some(alt_schemas) = schema
            .get("oneOf")
            .or_else(|| schema.get("anyOf"))
            .and_then(Value::as_array)
        {
            let rule = self.generate_union_rule(name, alt_schemas);
            self.add_rule(&rule_name, &rule)
        } else if let Some(types) = schema_type.and_then(Value::as_array) {
            let alt_schemas: Vec<Value> = types.iter().map(|t| json!({ "type": t })).collect();
            let rule = self.generate_union_rule(name, &alt_schemas);
            self.add_rule(&rule_name, &rule)
        } else if let Some(value) = schema.get("const") {
            let rule = Self::constant_rule(value);
            self.add_rule(&rule_name, &rule)
        } else if let Some(values) = schema.get("enum").and_then(Value::as_array) {
            let rule = values
                .iter()
                .map(Self::constant_rule)
                .collect::<Vec<_>>()
                .join(" | ");
            self.add_rule(&rule_name, &rule)
        } else if (schema_type.is_none() || type_str == Some("object"))
            && (schema.get("properties").is_some()
                || schema
                    .get("additionalProperties")
                    .is_some_and(|ap| *ap != Value::Bool(true)))
        {
            let required = required_set(schema);
            let properties = property_list(schema.get("properties"));
            let rule = self.build_object_rule(
                &properties,
                &required,
                name,
                schema.get("additionalProperties"),
            );
            self.add_rule(&rule_name, &rule)
        } else if (schema_type.is_none() || type_str == Some("object"))
            && schema.get("allOf").is_some()
        {
            let mut required = HashSet::new();
            let mut properties = Vec::new();
            if let Some(members) = schema.get("allOf").and_then(Value::as_array) {
                for member in members {
                    match member.get("anyOf").and_then(Value::as_array) {
                        Some(optional_members) => {
                            for sub in optional_members {
                                collect_component(&self.refs, sub, false, &mut properties, &mut required);
                            }
                        }
                        None => {
                            collect_component(&self.refs, member, true, &mut properties, &mut required);
                        }
                    }
                }
            }
            let rule = self.build_object_rule(&properties, &required, name, None);
            self.add_rule(&rule_name, &rule)
        } else if (schema_type.is_none() || type_str == Some("array"))
            && (schema.get("items").is_some() || schema.get("prefixItems").is_some())
        {
            let items = schema
                .get("items")
                .or_else(|| schema.get("prefixItems"))
                .unwrap();
            if let Some(tuple_items) = items.as_array() {
                let mut rule = String::from("\"[\" space ");
                for (i, item) in tuple_items.iter().enumerate() {
                    if i > 0 {
                        rule.push_str(" \",\" space ");
                    }
                    let item_name = sub_name(name, &format!("tuple-{i}"));
                    rule.push_str(&self.visit(item, &item_name));
                }
                rule.push_str(" \"]\" space");
                self.add_rule(&rule_name, &rule)
            } else {
                let item_rule_name = self.visit(items, &sub_name(name, "item"));
                let min_items = schema.get("minItems").and_then(Value::as_u64).unwrap_or(0);
                let max_items = schema.get("maxItems").and_then(Value::as_u64);
                let rule = format!(
                    "\"[\" space {} \"]\" space",
                    build_repetition(&item_rule_name, min_items, max_items, "\",\" space", false)
                );
                self.add_rule(&rule_name, &rule)
            }
        } else if let Some(pattern) = schema
            .get("pattern")
            .and_then(Value::as_str)
            .filter(|_| schema_type.is_none() || type_str == Some("string"))
        {
            self.visit_pattern(pattern, &rule_name)
        } else if (schema_type.is_none() || type_str == Some("string"))
            && UUID_FORMAT_RE.is_match(schema_format)
        {
            let primitive_name = if rule_name == "root" { "root" } else { schema_format };
            self.add_primitive(primitive_name, &PRIMITIVE_RULES["uuid"])
        } else if (schema_type.is_none() || type_str == Some("string"))
            && STRING_FORMAT_RULES.contains_key(format!("{schema_format}-string").as_str())
        {
            let primitive_name = format!("{schema_format}-string");
            let installed =
                self.add_primitive(&primitive_name, &STRING_FORMAT_RULES[primitive_name.as_str()]);
            self.add_rule(&rule_name, &installed)
        } else if type_str == Some("string")
            && (schema.get("minLength").is_some() || schema.get("maxLength").is_some())
        {
            let char_rule = self.add_primitive("char", &PRIMITIVE_RULES["char"]);
            let min_length = schema.get("minLength").and_then(Value::as_u64).unwrap_or(0);
            let max_length = schema.get("maxLength").and_then(Value::as_u64);
            let rule = format!(
                "\"\\\"\" {} \"\\\"\" space",
                build_repetition(&char_rule, min_length, max_length, "", false)
            );
            self.add_rule(&rule_name, &rule)
        } else if is_empty_schema(schema) || type_str == Some("object") {
            let installed = self.add_primitive("object", &PRIMITIVE_RULES["object"]);
            self.add_rule(&rule_name, &installed)
        } else {
            match type_str {
                Some(type_str) if PRIMITIVE_RULES.contains_key(type_str) => {
                    let primitive_name = if rule_name == "root" { "root" } else { type_str };
                    self.add_primitive(primitive_name, &PRIMITIVE_RULES[type_str])
                }
                _ => {
                    self.push_error(SchemaError::UnrecognizedSchema(schema.to_string()));
                    String::new()
                }
            }
        }
    }

    /// Emit the production for a JSON object. Required properties appear in
    /// schema order; optional properties are factored into per-starting-index
    /// alternatives with left-nested optional tails, which keeps the rule
    /// count quadratic in the number of optional keys.
    fn build_object_rule(
        &mut self,
        properties: &[(String, Value)],
        required: &HashSet<String>,
        name: &str,
        additional_properties: Option<&Value>,
    ) -> String {
        let mut required_props = Vec::new();
        let mut optional_props = Vec::new();
        let mut prop_kv_rule_names: HashMap<String, String> = HashMap::new();

        for (prop_name, prop_schema) in properties {
            let prop_rule_name = self.visit(prop_schema, &sub_name(name, prop_name));
            let kv_rule = format!(
                "{} space \":\" space {}",
                format_literal(&Value::String(prop_name.clone()).to_string()),
                prop_rule_name
            );
            let kv_name = self.add_rule(&format!("{}-kv", sub_name(name, prop_name)), &kv_rule);
            prop_kv_rule_names.insert(prop_name.clone(), kv_name);
            if required.contains(prop_name) {
                required_props.push(prop_name.clone());
            } else {
                optional_props.push(prop_name.clone());
            }
        }

        let additional_enabled = additional_properties
            .is_some_and(|ap| ap.is_object() || *ap == Value::Bool(true));
        if additional_enabled {
            let additional_name = sub_name(name, "additional");
            let value_schema = match additional_properties {
                Some(ap) if ap.is_object() => ap.clone(),
                _ => json!({}),
            };
            let value_rule = self.visit(&value_schema, &format!("{additional_name}-value"));
            let string_rule = self.add_primitive("string", &PRIMITIVE_RULES["string"]);
            let kv_rule = self.add_rule(
                &format!("{additional_name}-kv"),
                &format!("{string_rule} \":\" space {value_rule}"),
            );
            prop_kv_rule_names.insert("*".to_string(), kv_rule);
            optional_props.push("*".to_string());
        }

        let mut rule = String::from("\"{\" space ");
        for (i, prop_name) in required_props.iter().enumerate() {
            if i > 0 {
                rule.push_str(" \",\" space ");
            }
            rule.push_str(&prop_kv_rule_names[prop_name]);
        }

        if !optional_props.is_empty() {
            rule.push_str(" (");
            if !required_props.is_empty() {
                rule.push_str(" \",\" space ( ");
            }
            for i in 0..optional_props.len() {
                if i > 0 {
                    rule.push_str(" | ");
                }
                let alternative =
                    self.optional_chain(&optional_props[i..], false, name, &prop_kv_rule_names);
                rule.push_str(&alternative);
            }
            if !required_props.is_empty() {
                rule.push_str(" )");
            }
            rule.push_str(" )?");
        }

        rule.push_str(" \"}\" space");
        rule
    }

    // One alternative of the optional-property factoring: the head key
    // followed by a named "-rest" rule holding the remaining tail.
    fn optional_chain(
        &mut self,
        keys: &[String],
        first_is_optional: bool,
        name: &str,
        prop_kv_rule_names: &HashMap<String, String>,
    ) -> String {
        let Some(key) = keys.first() else {
            return String::new();
        };
        let kv_rule_name = prop_kv_rule_names[key].clone();
        let mut result = if key == "*" {
            self.add_rule(
                &sub_name(name, "additional-kvs"),
                &format!("{kv_rule_name} ( \",\" space {kv_rule_name} )*"),
            )
        } else if first_is_optional {
            format!("( \",\" space {kv_rule_name} )?")
        } else {
            kv_rule_name
        };
        if keys.len() > 1 {
            let tail = self.optional_chain(&keys[1..], true, name, prop_kv_rule_names);
            let tail_name = self.add_rule(&format!("{}-rest", sub_name(name, key)), &tail);
            result.push(' ');
            result.push_str(&tail_name);
        }
        result
    }

    /// Raise every accumulated error as one aggregated failure, then log
    /// accumulated warnings. Call after visiting the root schema.
    pub fn check_errors(&mut self) -> Result<(), ConversionError> {
        if !self.errors.is_empty() {
            return Err(ConversionError::Schema(std::mem::take(&mut self.errors)));
        }
        if !self.warnings.is_empty() {
            warn!(
                "JSON schema conversion was incomplete: {}",
                self.warnings.join("; ")
            );
        }
        Ok(())
    }

    /// Warnings accumulated so far, e.g. for unsupported pattern syntax.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Serialize the rule table, one `name ::= rhs` line per rule, in
    /// insertion order.
    pub fn format_grammar(&self) -> String {
        let mut out = String::new();
        for (name, rule) in &self.rules {
            out.push_str(name);
            out.push_str(" ::= ");
            out.push_str(rule);
            out.push('\n');
        }
        out
    }
}

fn required_set(schema: &Value) -> HashSet<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|required| {
            required
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn property_list(properties: Option<&Value>) -> Vec<(String, Value)> {
    properties
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| (name.clone(), schema.clone()))
                .collect()
        })
        .unwrap_or_default()
}

// Flatten one allOf member into the merged property list, chasing `$ref`
// members through the reference index.
fn collect_component(
    refs: &HashMap<String, Value>,
    component: &Value,
    is_required: bool,
    properties: &mut Vec<(String, Value)>,
    required: &mut HashSet<String>,
) {
    if let Some(reference) = component.get("$ref").and_then(Value::as_str) {
        if let Some(resolved) = refs.get(reference) {
            collect_component(refs, resolved, is_required, properties, required);
        }
    } else if let Some(props) = component.get("properties").and_then(Value::as_object) {
        for (prop_name, prop_schema) in props {
            properties.push((prop_name.clone(), prop_schema.clone()));
            if is_required {
                required.insert(prop_name.clone());
            }
        }
    }
}

// Walk `fragment` as a /-separated JSON pointer into `root`.
fn walk_pointer(root: &Value, reference: &str, fragment: &str) -> Result<Value, SchemaError> {
    let mut target = root;
    for selector in fragment.split('/').skip(1) {
        target = target.get(selector).ok_or_else(|| SchemaError::UnresolvedRef {
            reference: reference.to_string(),
            selector: selector.to_string(),
            target: target.to_string(),
        })?;
    }
    Ok(target.clone())
}
