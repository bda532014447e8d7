//! Pure string utilities for assembling GBNF grammar fragments.
//!
//! Everything in this module is side-effect free: callers hand in rule names
//! or literal text and get back a well-formed GBNF fragment.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref GRAMMAR_LITERAL_ESCAPE_RE: Regex = Regex::new("[\r\n\"]").unwrap();
    static ref GRAMMAR_RANGE_LITERAL_ESCAPE_RE: Regex = Regex::new("[\r\n\"\\]\\-\\\\]").unwrap();
}

fn escape_char(c: char) -> &'static str {
    match c {
        '\r' => "\\r",
        '\n' => "\\n",
        '"' => "\\\"",
        '-' => "\\-",
        ']' => "\\]",
        '\\' => "\\\\",
        _ => unreachable!("escape sets only match the characters above"),
    }
}

fn escape_with(re: &Regex, s: &str) -> String {
    re.replace_all(s, |caps: &Captures| {
        escape_char(caps[0].chars().next().unwrap())
    })
    .into_owned()
}

/// Quote `literal` as a GBNF string terminal, escaping `\r`, `\n` and `"`.
pub fn format_literal(literal: &str) -> String {
    format!("\"{}\"", escape_with(&GRAMMAR_LITERAL_ESCAPE_RE, literal))
}

/// Escape `literal` for use inside a `[...]` character class, where `-`,
/// `]` and `\` need escaping on top of the string-terminal set.
pub fn escape_range_literal(literal: &str) -> String {
    escape_with(&GRAMMAR_RANGE_LITERAL_ESCAPE_RE, literal)
}

/// Build a GBNF fragment matching between `min_items` and `max_items`
/// repetitions of `item_rule`, optionally separated by `separator_rule`.
/// `max_items` of `None` means unbounded.
///
/// Bounded tails are emitted as nested optional groups, e.g. three to five
/// `x` become `x x x (x (x)?)?`, so the result stays a plain CFG fragment
/// with no counted repetition operator.
///
/// When `item_rule_is_literal` is set and there is no separator, `item_rule`
/// must be a quoted terminal; the minimum repetitions are then concatenated
/// inside a single terminal instead of being repeated as separate tokens.
pub fn build_repetition(
    item_rule: &str,
    min_items: u64,
    max_items: Option<u64>,
    separator_rule: &str,
    item_rule_is_literal: bool,
) -> String {
    if separator_rule.is_empty() {
        if min_items == 0 && max_items == Some(1) {
            return format!("{item_rule}?");
        }
        if min_items == 1 && max_items.is_none() {
            return format!("{item_rule}+");
        }
    }

    let mut result = String::new();
    if min_items > 0 {
        if item_rule_is_literal && separator_rule.is_empty() {
            let unquoted = &item_rule[1..item_rule.len() - 1];
            result = format!("\"{}\"", unquoted.repeat(min_items as usize));
        } else {
            let joiner = if separator_rule.is_empty() {
                " ".to_string()
            } else {
                format!(" {separator_rule} ")
            };
            result = vec![item_rule; min_items as usize].join(&joiner);
        }
    }

    // Up to `up_to_n` further repetitions as a chain of nested optionals.
    fn opt_repetitions(
        item_rule: &str,
        separator_rule: &str,
        up_to_n: u64,
        prefix_with_sep: bool,
    ) -> String {
        let content = if prefix_with_sep && !separator_rule.is_empty() {
            format!("{separator_rule} {item_rule}")
        } else {
            item_rule.to_string()
        };
        if up_to_n == 0 {
            String::new()
        } else if up_to_n == 1 {
            format!("({content})?")
        } else if !separator_rule.is_empty() && !prefix_with_sep {
            let tail = opt_repetitions(item_rule, separator_rule, up_to_n - 1, true);
            format!("({content} {tail})?")
        } else {
            let mut nested = format!("({content} ").repeat(up_to_n as usize);
            nested.pop();
            nested + &")?".repeat(up_to_n as usize)
        }
    }

    if min_items > 0 && max_items != Some(min_items) {
        result.push(' ');
    }

    match max_items {
        Some(max_items) => {
            result
                + &opt_repetitions(
                    item_rule,
                    separator_rule,
                    max_items.saturating_sub(min_items),
                    min_items > 0,
                )
        }
        None => {
            let item_operator = if separator_rule.is_empty() {
                format!("({item_rule})")
            } else {
                format!("({separator_rule} {item_rule})")
            };
            if min_items == 0 && !separator_rule.is_empty() {
                format!("({item_rule} {item_operator}*)?")
            } else {
                result + &format!("{item_operator}*")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_escaping() {
        assert_eq!(format_literal("hello"), "\"hello\"");
        assert_eq!(format_literal("a\"b"), "\"a\\\"b\"");
        assert_eq!(format_literal("line\nbreak\r"), "\"line\\nbreak\\r\"");
    }

    #[test]
    fn range_escaping_covers_class_metacharacters() {
        assert_eq!(escape_range_literal("a-z"), "a\\-z");
        assert_eq!(escape_range_literal("]\\"), "\\]\\\\");
    }

    #[test]
    fn zero_or_one_is_question_mark() {
        assert_eq!(build_repetition("item", 0, Some(1), "", false), "item?");
    }

    #[test]
    fn one_or_more_is_plus() {
        assert_eq!(build_repetition("item", 1, None, "", false), "item+");
    }

    #[test]
    fn zero_or_more_without_separator() {
        assert_eq!(build_repetition("item", 0, None, "", false), "(item)*");
    }

    #[test]
    fn exact_count_joins_with_spaces() {
        assert_eq!(build_repetition("item", 3, Some(3), "", false), "item item item");
    }

    #[test]
    fn bounded_range_nests_optionals() {
        assert_eq!(
            build_repetition("item", 2, Some(4), "", false),
            "item item (item (item)?)?"
        );
    }

    #[test]
    fn separated_list_prefixes_tail_with_separator() {
        assert_eq!(
            build_repetition("item", 1, Some(3), "\",\" space", false),
            "item (\",\" space item (\",\" space item)?)?"
        );
    }

    #[test]
    fn separated_unbounded_list_wraps_in_optional() {
        assert_eq!(
            build_repetition("item", 0, None, "\",\" space", false),
            "(item (\",\" space item)*)?"
        );
    }

    #[test]
    fn separated_list_with_minimum() {
        assert_eq!(
            build_repetition("item", 2, None, "\",\" space", false),
            "item \",\" space item (\",\" space item)*"
        );
    }

    #[test]
    fn literal_minimum_concatenates_inside_one_terminal() {
        assert_eq!(build_repetition("\"ab\"", 2, Some(2), "", true), "\"abab\"");
        assert_eq!(
            build_repetition("\"a\"", 2, Some(3), "", true),
            "\"aa\" (\"a\")?"
        );
    }
}
