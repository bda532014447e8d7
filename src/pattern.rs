//! Compiles anchored ECMA-style regular expressions into grammar fragments.
//!
//! Only the CFG-expressible subset is supported: literals, `.`, groups,
//! character classes, alternation and quantifiers. Lookaround,
//! backreferences and `(?...)` extensions cannot be expressed in GBNF;
//! those produce a warning and best-effort output rather than an error.

use std::collections::HashMap;

use crate::converter::SchemaConverter;
use crate::error::SchemaError;
use crate::text::build_repetition;

const NON_LITERAL_CHARS: &[char] = &['|', '.', '(', ')', '[', ']', '{', '}', '*', '+', '?'];

// Characters that need a backslash in a regex but not in a grammar literal,
// so their escapes collapse to the bare character.
const ESCAPED_IN_REGEXPS_BUT_NOT_IN_LITERALS: &[char] =
    &['[', ']', '(', ')', '|', '{', '}', '*', '+', '?'];

fn is_non_literal(c: char) -> bool {
    NON_LITERAL_CHARS.contains(&c)
}

/// A parsed pattern element: raw literal text (quoted on emission, merged
/// with adjacent literals) or an opaque grammar fragment.
#[derive(Debug, Clone)]
enum PatternItem {
    Literal(String),
    Fragment(String),
}

impl PatternItem {
    fn to_rule(&self) -> String {
        match self {
            PatternItem::Literal(text) => format!("\"{text}\""),
            PatternItem::Fragment(fragment) => fragment.clone(),
        }
    }
}

struct PatternCompiler<'c> {
    converter: &'c mut SchemaConverter,
    chars: Vec<char>,
    pos: usize,
    rule_name: String,
    // fragment text -> allocated sub-rule, so `(ab){2}(ab){3}` reuses one rule
    sub_rule_ids: HashMap<String, String>,
}

impl SchemaConverter {
    /// Compile the `pattern` keyword `pattern` into a rule named `name`
    /// matching the pattern inside a JSON string. Returns the installed rule
    /// name, or an empty string when the pattern is not `^...$` anchored.
    pub(crate) fn visit_pattern(&mut self, pattern: &str, name: &str) -> String {
        if !(pattern.starts_with('^') && pattern.ends_with('$')) {
            self.push_error(SchemaError::PatternNotAnchored);
            return String::new();
        }
        let body: Vec<char> = pattern[1..pattern.len() - 1].chars().collect();
        let mut compiler = PatternCompiler {
            converter: self,
            chars: body,
            pos: 0,
            rule_name: name.to_string(),
            sub_rule_ids: HashMap::new(),
        };
        let compiled = compiler.transform().to_rule();
        self.add_rule(name, &format!("\"\\\"\" {compiled} \"\\\"\" space"))
    }
}

impl PatternCompiler<'_> {
    /// Parse items until the end of input or a closing parenthesis, and
    /// return them as one fragment with consecutive literals merged.
    fn transform(&mut self) -> PatternItem {
        let start = self.pos;
        let mut seq: Vec<PatternItem> = Vec::new();

        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match c {
                '.' => {
                    let dot = self.dot_rule();
                    seq.push(PatternItem::Fragment(dot));
                    self.pos += 1;
                }
                '(' => {
                    self.pos += 1;
                    if self.chars.get(self.pos) == Some(&'?') {
                        self.converter.push_warning("Unsupported pattern syntax");
                    }
                    let inner = self.transform().to_rule();
                    seq.push(PatternItem::Fragment(format!("({inner})")));
                }
                ')' => {
                    self.pos += 1;
                    if start > 0 && self.chars[start - 1] != '(' {
                        self.converter.push_error(SchemaError::UnbalancedParens);
                    }
                    return join_seq(&seq);
                }
                '[' => {
                    let mut class = String::from('[');
                    self.pos += 1;
                    while self.pos < self.chars.len() && self.chars[self.pos] != ']' {
                        if self.chars[self.pos] == '\\' {
                            class.push('\\');
                            if let Some(&escaped) = self.chars.get(self.pos + 1) {
                                class.push(escaped);
                            }
                            self.pos += 2;
                        } else {
                            class.push(self.chars[self.pos]);
                            self.pos += 1;
                        }
                    }
                    if self.pos >= self.chars.len() {
                        self.converter.push_error(SchemaError::UnbalancedBrackets);
                    }
                    class.push(']');
                    self.pos += 1;
                    seq.push(PatternItem::Fragment(class));
                }
                '|' => {
                    seq.push(PatternItem::Fragment("|".to_string()));
                    self.pos += 1;
                }
                '*' | '+' | '?' => {
                    self.pos += 1;
                    match seq.pop() {
                        Some(target) => {
                            seq.push(PatternItem::Fragment(format!("{}{c}", target.to_rule())));
                        }
                        None => self.converter.push_warning("Unsupported pattern syntax"),
                    }
                }
                '{' => {
                    let mut counts = String::new();
                    self.pos += 1;
                    while self.pos < self.chars.len() && self.chars[self.pos] != '}' {
                        counts.push(self.chars[self.pos]);
                        self.pos += 1;
                    }
                    if self.pos >= self.chars.len() {
                        self.converter.push_error(SchemaError::UnbalancedBraces);
                    }
                    self.pos += 1;
                    let Some((min_times, max_times)) = self.parse_counts(&counts) else {
                        return PatternItem::Fragment(String::new());
                    };
                    match seq.pop() {
                        Some(target) => {
                            let repeated = self.quantify(target, min_times, max_times);
                            seq.push(repeated);
                        }
                        None => self.converter.push_warning("Unsupported pattern syntax"),
                    }
                }
                _ => {
                    let literal = self.take_literal_run();
                    if literal.is_empty() {
                        // stray "}" or "]", which ECMA treats as a literal
                        seq.push(PatternItem::Literal(c.to_string()));
                        self.pos += 1;
                    } else {
                        seq.push(PatternItem::Literal(literal));
                    }
                }
            }
        }
        join_seq(&seq)
    }

    fn dot_rule(&mut self) -> String {
        let rule = if self.converter.dotall() {
            r"[\U00000000-\U0010FFFF]"
        } else {
            r"[^\x0A\x0D]"
        };
        self.converter.add_rule("dot", rule)
    }

    // Parse the inside of a {...} quantifier. `None` aborts the pattern.
    fn parse_counts(&mut self, counts: &str) -> Option<(u64, Option<u64>)> {
        let nums: Vec<&str> = counts.split(',').collect();
        match nums.as_slice() {
            [exact] => match exact.parse::<u64>() {
                Ok(n) => Some((n, Some(n))),
                Err(_) => {
                    self.converter
                        .push_error(SchemaError::InvalidRepetitionNumber);
                    None
                }
            },
            [min, max] => {
                let min_times = if min.is_empty() {
                    0
                } else {
                    match min.parse::<u64>() {
                        Ok(n) => n,
                        Err(_) => {
                            self.converter
                                .push_error(SchemaError::InvalidRepetitionNumber);
                            return None;
                        }
                    }
                };
                let max_times = if max.is_empty() {
                    None
                } else {
                    match max.parse::<u64>() {
                        Ok(n) => Some(n),
                        Err(_) => {
                            self.converter
                                .push_error(SchemaError::InvalidRepetitionNumber);
                            return None;
                        }
                    }
                };
                Some((min_times, max_times))
            }
            _ => {
                self.converter.push_error(SchemaError::BadRepetitionCount);
                Some((0, None))
            }
        }
    }

    // Apply a counted repetition to `target`. Non-literal bodies get hoisted
    // into a named sub-rule so the repetition refers to a single token.
    fn quantify(&mut self, target: PatternItem, min_times: u64, max_times: Option<u64>) -> PatternItem {
        match target {
            PatternItem::Literal(text) => PatternItem::Fragment(build_repetition(
                &format!("\"{text}\""),
                min_times,
                max_times,
                "",
                true,
            )),
            PatternItem::Fragment(fragment) => {
                let sub_id = match self.sub_rule_ids.get(&fragment) {
                    Some(existing) => existing.clone(),
                    None => {
                        let sub_rule_name =
                            format!("{}-{}", self.rule_name, self.sub_rule_ids.len() + 1);
                        let id = self.converter.add_rule(&sub_rule_name, &fragment);
                        self.sub_rule_ids.insert(fragment, id.clone());
                        id
                    }
                };
                PatternItem::Fragment(build_repetition(&sub_id, min_times, max_times, "", false))
            }
        }
    }

    fn take_literal_run(&mut self) -> String {
        let mut literal = String::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c == '\\' && self.pos + 1 < self.chars.len() {
                let next = self.chars[self.pos + 1];
                if ESCAPED_IN_REGEXPS_BUT_NOT_IN_LITERALS.contains(&next) {
                    literal.push(next);
                } else {
                    literal.push('\\');
                    literal.push(next);
                }
                self.pos += 2;
            } else if c == '"' {
                literal.push_str("\\\"");
                self.pos += 1;
            } else if !is_non_literal(c)
                && (self.pos == self.chars.len() - 1
                    || literal.is_empty()
                    || self.chars[self.pos + 1] == '.'
                    || !is_non_literal(self.chars[self.pos + 1]))
            {
                literal.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        literal
    }
}

// Merge consecutive literals, then join everything into one fragment.
fn join_seq(seq: &[PatternItem]) -> PatternItem {
    let mut merged: Vec<PatternItem> = Vec::new();
    let mut literal = String::new();
    for item in seq {
        match item {
            PatternItem::Literal(text) => literal.push_str(text),
            fragment => {
                if !literal.is_empty() {
                    merged.push(PatternItem::Literal(std::mem::take(&mut literal)));
                }
                merged.push(fragment.clone());
            }
        }
    }
    if !literal.is_empty() {
        merged.push(PatternItem::Literal(literal));
    }
    PatternItem::Fragment(
        merged
            .iter()
            .map(PatternItem::to_rule)
            .collect::<Vec<_>>()
            .join(" "),
    )
}
