//! Text-protocol literal codecs shared by the store and the provider
//!
//! - array literals: `{a,b,"c d",NULL}`
//! - hstore literals: `"a"=>"b", "1"=>NULL`
//!
//! Elements that need it are double-quoted with `"` and `\` escaped by a
//! backslash, so any string survives a format/parse cycle.

use crate::error::{Error, Result};

/// Parse a one-dimensional array literal into its elements
///
/// Unquoted `NULL` (any case) is a NULL element; quoted `"NULL"` is text.
pub fn parse_array(text: &str) -> Result<Vec<Option<String>>> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.first() != Some(&'{') || chars.last() != Some(&'}') {
        return Err(Error::parse(format!("malformed array literal: {}", text)));
    }
    let body = &chars[1..chars.len() - 1];
    let mut out = Vec::new();
    if body.iter().all(|c| c.is_whitespace()) {
        return Ok(out);
    }
    let mut i = 0;
    loop {
        while i < body.len() && body[i].is_whitespace() {
            i += 1;
        }
        if i < body.len() && body[i] == '{' {
            return Err(Error::parse("multi-dimensional arrays are not supported"));
        }
        if i < body.len() && body[i] == '"' {
            let (s, next) = read_quoted(body, i)?;
            out.push(Some(s));
            i = next;
        } else {
            let start = i;
            while i < body.len() && body[i] != ',' {
                if body[i] == '"' || body[i] == '{' || body[i] == '}' {
                    return Err(Error::parse(format!("malformed array literal: {}", text)));
                }
                i += 1;
            }
            let raw: String = body[start..i].iter().collect::<String>().trim().to_string();
            if raw.is_empty() {
                return Err(Error::parse(format!("malformed array literal: {}", text)));
            }
            if raw.eq_ignore_ascii_case("NULL") {
                out.push(None);
            } else {
                out.push(Some(raw));
            }
        }
        while i < body.len() && body[i].is_whitespace() {
            i += 1;
        }
        if i >= body.len() {
            break;
        }
        if body[i] != ',' {
            return Err(Error::parse(format!("malformed array literal: {}", text)));
        }
        i += 1;
    }
    Ok(out)
}

/// Format elements as an array literal
pub fn format_array<S: AsRef<str>>(elements: &[Option<S>]) -> String {
    let mut out = String::from("{");
    for (i, e) in elements.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match e {
            None => out.push_str("NULL"),
            Some(s) => {
                let s = s.as_ref();
                if needs_array_quotes(s) {
                    push_quoted(&mut out, s);
                } else {
                    out.push_str(s);
                }
            }
        }
    }
    out.push('}');
    out
}

fn needs_array_quotes(s: &str) -> bool {
    s.is_empty()
        || s.eq_ignore_ascii_case("NULL")
        || s
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace())
}

/// Parse an hstore literal into key/value pairs in literal order
pub fn parse_hstore(text: &str) -> Result<Vec<(String, Option<String>)>> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let skip_ws = |i: &mut usize| {
        while *i < chars.len() && chars[*i].is_whitespace() {
            *i += 1;
        }
    };
    skip_ws(&mut i);
    if i >= chars.len() {
        return Ok(out);
    }
    loop {
        skip_ws(&mut i);
        let (key, quoted_key, next) = read_hstore_token(&chars, i)?;
        i = next;
        if !quoted_key && key.is_empty() {
            return Err(Error::parse(format!("malformed hstore literal: {}", text)));
        }
        skip_ws(&mut i);
        if !(i + 1 < chars.len() && chars[i] == '=' && chars[i + 1] == '>') {
            return Err(Error::parse(format!("expected '=>' in hstore literal: {}", text)));
        }
        i += 2;
        skip_ws(&mut i);
        let (value, quoted_value, next) = read_hstore_token(&chars, i)?;
        i = next;
        let value = if !quoted_value && value.eq_ignore_ascii_case("NULL") {
            None
        } else {
            Some(value)
        };
        out.push((key, value));
        skip_ws(&mut i);
        if i >= chars.len() {
            break;
        }
        if chars[i] != ',' {
            return Err(Error::parse(format!("malformed hstore literal: {}", text)));
        }
        i += 1;
    }
    Ok(out)
}

fn read_hstore_token(chars: &[char], i: usize) -> Result<(String, bool, usize)> {
    if i < chars.len() && chars[i] == '"' {
        let (s, next) = read_quoted(chars, i)?;
        return Ok((s, true, next));
    }
    let mut j = i;
    while j < chars.len()
        && !chars[j].is_whitespace()
        && chars[j] != ','
        && !(chars[j] == '=' && chars.get(j + 1) == Some(&'>'))
    {
        j += 1;
    }
    Ok((chars[i..j].iter().collect(), false, j))
}

/// Format key/value pairs as an hstore literal
pub fn format_hstore<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, Option<V>)]) -> String {
    let mut out = String::new();
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_quoted(&mut out, k.as_ref());
        out.push_str("=>");
        match v {
            Some(v) => push_quoted(&mut out, v.as_ref()),
            None => out.push_str("NULL"),
        }
    }
    out
}

fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut s = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                s.push(chars[i + 1]);
                i += 2;
            }
            '"' => return Ok((s, i + 1)),
            c => {
                s.push(c);
                i += 1;
            }
        }
    }
    Err(Error::parse("unterminated quoted element"))
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_array() {
        assert_eq!(
            parse_array("{a,b,c}").unwrap(),
            vec![Some("a".into()), Some("b".into()), Some("c".into())]
        );
        assert_eq!(
            parse_array("{\"c d\",NULL,\"NULL\"}").unwrap(),
            vec![Some("c d".into()), None, Some("NULL".into())]
        );
        assert_eq!(parse_array("{}").unwrap(), Vec::<Option<String>>::new());
        assert_eq!(
            parse_array("{1.1,2,-5.12345}").unwrap(),
            vec![Some("1.1".into()), Some("2".into()), Some("-5.12345".into())]
        );
    }

    #[test]
    fn test_parse_array_errors() {
        assert!(parse_array("a,b").is_err());
        assert!(parse_array("{a,,b}").is_err());
        assert!(parse_array("{{1},{2}}").is_err());
        assert!(parse_array("{\"open}").is_err());
    }

    #[test]
    fn test_format_array_escapes() {
        let elements = vec![
            Some("simple"),
            Some("\"doubleQuote\""),
            Some("'quote'"),
            Some("back\\slash"),
            None,
        ];
        let text = format_array(&elements);
        assert_eq!(
            text,
            "{simple,\"\\\"doubleQuote\\\"\",'quote',\"back\\\\slash\",NULL}"
        );
        let back = parse_array(&text).unwrap();
        assert_eq!(back[1].as_deref(), Some("\"doubleQuote\""));
        assert_eq!(back[3].as_deref(), Some("back\\slash"));
        assert_eq!(back[4], None);
    }

    #[test]
    fn test_hstore() {
        let pairs = parse_hstore("\"a\"=>\"b\", \"1\"=>\"2\"").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), Some("b".to_string())),
                ("1".to_string(), Some("2".to_string()))
            ]
        );
        assert_eq!(parse_hstore("").unwrap(), vec![]);
        assert_eq!(
            parse_hstore("k => NULL").unwrap(),
            vec![("k".to_string(), None)]
        );
        assert!(parse_hstore("\"a\" \"b\"").is_err());
    }

    #[test]
    fn test_hstore_escapes() {
        let pairs = vec![
            ("doubleQuote", Some("\"y\"")),
            ("quote", Some("'q'")),
            ("backslash", Some("\\")),
        ];
        let text = format_hstore(&pairs);
        let back = parse_hstore(&text).unwrap();
        assert_eq!(back[0].1.as_deref(), Some("\"y\""));
        assert_eq!(back[1].1.as_deref(), Some("'q'"));
        assert_eq!(back[2].1.as_deref(), Some("\\"));
    }

    proptest! {
        #[test]
        fn array_literal_survives_any_text(items in proptest::collection::vec(proptest::option::of(".*"), 0..6)) {
            let text = format_array(&items);
            prop_assert_eq!(parse_array(&text).unwrap(), items);
        }

        #[test]
        fn hstore_literal_survives_any_text(pairs in proptest::collection::vec((".*", proptest::option::of(".*")), 0..6)) {
            let text = format_hstore(&pairs);
            prop_assert_eq!(parse_hstore(&text).unwrap(), pairs);
        }
    }
}
