//! Rule pattern compilation.
//!
//! Rule patterns are written without namespace prefixes, relative to any
//! element in the record:
//!
//! ```text
//! descriptiveMetadata/objectClassificationWrap/classificationWrap/classification/term[@pref="preferred"]
//! ```
//!
//! [`compile`] rewrites such a pattern into a query that runs against the
//! namespaced document: every element and attribute name is qualified with
//! the rule namespace and the path is anchored on the `descendant::` axis.
//! The rewrite walks the pattern token by token, so string literals,
//! function calls, axis names, operators and names that already carry a
//! prefix (notably `xml:lang`) are left untouched.

use std::borrow::Cow;

/// Placeholder substituted with the configured classification language.
pub const LANGUAGE_PLACEHOLDER: &str = "{language}";

/// Compile `pattern` into an executable query for namespace prefix `namespace`.
///
/// `{language}` is substituted before qualification. Without a language the
/// placeholder is left in place.
pub fn compile(pattern: &str, namespace: &str, language: Option<&str>) -> String {
    let pattern = match language {
        Some(lang) => Cow::Owned(pattern.replace(LANGUAGE_PLACEHOLDER, lang)),
        None => Cow::Borrowed(pattern),
    };
    let mut out = String::with_capacity(pattern.len() * 2 + 12);
    out.push_str("descendant::");
    qualify(&pattern, namespace, &mut out);
    out
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

const OPERATOR_KEYWORDS: [&str; 4] = ["and", "or", "div", "mod"];

fn qualify(pattern: &str, namespace: &str, out: &mut String) {
    let chars: Vec<char> = pattern.chars().collect();
    let at = |i: usize| chars.get(i).copied();
    // Whether the last significant token ends an operand; a keyword after
    // one is an operator, not a name test.
    let mut after_operand = false;
    let mut i = 0;

    while let Some(c) = at(i) {
        if c == '"' || c == '\'' {
            let start = i;
            i += 1;
            while at(i).is_some_and(|ch| ch != c) {
                i += 1;
            }
            i = (i + 1).min(chars.len());
            out.extend(&chars[start..i]);
            after_operand = true;
            continue;
        }

        if c.is_ascii_digit() {
            while at(i).is_some_and(|ch| ch.is_ascii_digit() || ch == '.') {
                out.push(chars[i]);
                i += 1;
            }
            after_operand = true;
            continue;
        }

        if !is_name_start(c) {
            out.push(c);
            i += 1;
            if !c.is_whitespace() {
                after_operand = matches!(c, ')' | ']' | '.' | '*');
            }
            continue;
        }

        let start = i;
        while at(i).is_some_and(is_name_char) {
            i += 1;
        }
        let name: String = chars[start..i].iter().collect();

        // Axis specifier: copied, the step's name test follows.
        if at(i) == Some(':') && at(i + 1) == Some(':') {
            out.push_str(&name);
            out.push_str("::");
            i += 2;
            after_operand = false;
            continue;
        }

        // Already prefixed: `p:local` or `p:*`.
        if at(i) == Some(':') && at(i + 1).is_some_and(|ch| is_name_start(ch) || ch == '*') {
            out.push_str(&name);
            out.push(':');
            i += 1;
            if at(i) == Some('*') {
                out.push('*');
                i += 1;
            } else {
                while at(i).is_some_and(is_name_char) {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            after_operand = true;
            continue;
        }

        let mut next = i;
        while at(next).is_some_and(char::is_whitespace) {
            next += 1;
        }
        let is_call = at(next) == Some('(');
        let is_operator = after_operand && OPERATOR_KEYWORDS.contains(&name.as_str());

        if !is_call && !is_operator {
            out.push_str(namespace);
            out.push(':');
        }
        out.push_str(&name);
        after_operand = !is_call && !is_operator;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_elements_and_attributes() {
        assert_eq!(
            compile("object/type[@role]", "lido", None),
            "descendant::lido:object/lido:type[@lido:role]"
        );
    }

    #[test]
    fn qualifies_predicate_paths_but_not_literals() {
        assert_eq!(
            compile(
                r#"event[eventType/term="production/manufacture"]/eventActor"#,
                "lido",
                None
            ),
            r#"descendant::lido:event[lido:eventType/lido:term="production/manufacture"]/lido:eventActor"#
        );
    }

    #[test]
    fn xml_attributes_keep_their_prefix() {
        assert_eq!(
            compile("term[@xml:lang='{language}']", "lido", Some("en")),
            "descendant::lido:term[@xml:lang='en']"
        );
    }

    #[test]
    fn language_is_substituted_everywhere() {
        assert_eq!(
            compile("a[@xml:lang='{language}']/b[@xml:lang='{language}']", "x", Some("nl")),
            "descendant::x:a[@xml:lang='nl']/x:b[@xml:lang='nl']"
        );
    }

    #[test]
    fn missing_language_leaves_placeholder() {
        let query = compile("term[@xml:lang='{language}']", "lido", None);
        assert!(query.contains(LANGUAGE_PLACEHOLDER));
    }

    #[test]
    fn functions_operators_and_axes_are_untouched() {
        assert_eq!(
            compile(
                "term[@pref='preferred' and not(contains(., 'n/a'))]",
                "lido",
                None
            ),
            "descendant::lido:term[@lido:pref='preferred' and not(contains(., 'n/a'))]"
        );
        assert_eq!(
            compile("event/parent::eventWrap/text()", "lido", None),
            "descendant::lido:event/parent::lido:eventWrap/text()"
        );
        assert_eq!(
            compile("term[2]", "lido", None),
            "descendant::lido:term[2]"
        );
    }

    #[test]
    fn element_named_like_a_keyword_is_qualified() {
        assert_eq!(compile("and/or", "ns", None), "descendant::ns:and/ns:or");
    }

    #[test]
    fn absolute_patterns_compile_to_an_invalid_query() {
        // `descendant::/a` is not a valid query; the classifier rejects it
        // when the rule table is loaded.
        assert_eq!(compile("/a", "ns", None), "descendant::/ns:a");
        assert!(crate::xml::query::Query::parse(&compile("/a", "ns", None)).is_err());
    }
}
