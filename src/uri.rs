//! URI helpers for form targets
//!
//! Forms carry their target as an opaque `href` string. The consumer needs
//! three things from it: the scheme (to pick a protocol client), the
//! authority (to match unlink forms against the form used to open a
//! subscription), and [RFC 6570] template expansion for affordances declaring
//! `uriVariables`.
//!
//! The expansion covers the template operators Thing Descriptions actually
//! use: simple (`{var}`), reserved (`{+var}`), query (`{?a,b}`) and query
//! continuation (`{&a}`).
//!
//! [RFC 6570]: https://www.rfc-editor.org/rfc/rfc6570

use std::collections::HashMap;

use serde_json::Value;

/// Extracts the scheme of an URI, lowercased.
///
/// Returns `None` when the string does not start with a `scheme:` part.
pub fn scheme(href: &str) -> Option<String> {
    let (scheme, _) = href.split_once(':')?;

    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }

    Some(scheme.to_ascii_lowercase())
}

/// Extracts the authority (host and optional port) of an URI.
pub fn authority(href: &str) -> Option<&str> {
    let (_, rest) = href.split_once("://")?;
    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());

    Some(&rest[..end])
}

/// Expands an RFC 6570 URI template with the given variables.
///
/// Unset variables expand to nothing; an href without template expressions is
/// returned unchanged. The template itself is never mutated, the result is a
/// fresh string.
pub fn expand(template: &str, variables: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            // Unterminated expression, keep it verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        expand_expression(&after[..end], variables, &mut out);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand_expression(expr: &str, variables: &HashMap<String, Value>, out: &mut String) {
    let (operator, names) = match expr.chars().next() {
        Some(op @ ('+' | '?' | '&')) => (Some(op), &expr[1..]),
        _ => (None, expr),
    };

    let mut first = true;
    for name in names.split(',') {
        let Some(value) = variables.get(name) else {
            continue;
        };
        let value = value_to_string(value);

        match operator {
            Some('?') | Some('&') => {
                let sep = if first && operator == Some('?') {
                    '?'
                } else {
                    '&'
                };
                out.push(sep);
                out.push_str(name);
                out.push('=');
                percent_encode(&value, false, out);
            }
            Some('+') => {
                if !first {
                    out.push(',');
                }
                percent_encode(&value, true, out);
            }
            _ => {
                if !first {
                    out.push(',');
                }
                percent_encode(&value, false, out);
            }
        }

        first = false;
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn percent_encode(value: &str, allow_reserved: bool, out: &mut String) {
    const RESERVED: &[u8] = b":/?#[]@!$&'()*+,;=";

    for byte in value.bytes() {
        let literal = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'.' | b'_' | b'~')
            || (allow_reserved && RESERVED.contains(&byte));

        if literal {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn scheme_extraction() {
        assert_eq!(scheme("http://example.com/x").as_deref(), Some("http"));
        assert_eq!(scheme("CoAP://example.com").as_deref(), Some("coap"));
        assert_eq!(scheme("urn:dev:ops:1234").as_deref(), Some("urn"));
        assert_eq!(scheme("/relative/path"), None);
        assert_eq!(scheme("no-colon-here"), None);
    }

    #[test]
    fn authority_extraction() {
        assert_eq!(
            authority("http://example.com:8080/x/y"),
            Some("example.com:8080")
        );
        assert_eq!(authority("http://example.com"), Some("example.com"));
        assert_eq!(authority("urn:dev:ops:1234"), None);
    }

    #[test]
    fn simple_expansion() {
        let template = "http://host/props/{id}";
        let expanded = expand(template, &vars(&[("id", json!("temp"))]));
        assert_eq!(expanded, "http://host/props/temp");
        // The template string is left untouched.
        assert_eq!(template, "http://host/props/{id}");
    }

    #[test]
    fn query_expansion() {
        let expanded = expand(
            "http://host/act{?step,unit}",
            &vars(&[("step", json!(3)), ("unit", json!("mm"))]),
        );
        assert_eq!(expanded, "http://host/act?step=3&unit=mm");

        let expanded = expand("http://host/act?lang=it{&step}", &vars(&[("step", json!(3))]));
        assert_eq!(expanded, "http://host/act?lang=it&step=3");
    }

    #[test]
    fn reserved_expansion() {
        let expanded = expand("http://host{+path}", &vars(&[("path", json!("/a/b"))]));
        assert_eq!(expanded, "http://host/a/b");

        // The simple operator percent-encodes reserved characters instead.
        let expanded = expand("http://host/{path}", &vars(&[("path", json!("a/b"))]));
        assert_eq!(expanded, "http://host/a%2Fb");
    }

    #[test]
    fn missing_variables_expand_to_nothing() {
        let expanded = expand("http://host/props/{id}", &HashMap::new());
        assert_eq!(expanded, "http://host/props/");
    }

    #[test]
    fn no_expressions() {
        let expanded = expand("http://host/plain", &vars(&[("id", json!("x"))]));
        assert_eq!(expanded, "http://host/plain");
    }
}
