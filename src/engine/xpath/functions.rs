//! XPath 1.0 core function library
//!
//! Arguments are evaluated eagerly; optional arguments default to the
//! context node per the usual XPath rules.

use super::eval::{eval, EvalContext, Frame};
use super::parser::Expr;
use super::value::{str_to_number, Value};
use crate::engine::layout::{node, tag, XML_NS};
use crate::engine::tree;

pub(super) fn call(
    ctx: &EvalContext,
    frame: Frame,
    name: &str,
    args: &[Expr],
) -> Result<Value, String> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(ctx, frame, arg)?);
    }

    match name {
        "position" => {
            expect_arity(&values, 0)?;
            Ok(Value::Number(frame.position as f64))
        }
        "last" => {
            expect_arity(&values, 0)?;
            Ok(Value::Number(frame.size as f64))
        }
        "count" => {
            expect_arity(&values, 1)?;
            let Value::NodeSet(set) = &values[0] else {
                return Err("Invalid type".to_string());
            };
            Ok(Value::Number(set.len() as f64))
        }
        "local-name" => {
            let target = subject_node(ctx, frame, &values)?;
            let name = target
                .and_then(|n| tree::name_bytes(ctx.mem, n))
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            Ok(Value::String(name))
        }
        "name" => {
            let target = subject_node(ctx, frame, &values)?;
            let name = target
                .map(|n| tree::qualified_name(ctx.mem, n))
                .unwrap_or_default();
            Ok(Value::String(name))
        }
        "namespace-uri" => {
            let target = subject_node(ctx, frame, &values)?;
            let href = target
                .map(|n| tree::get(ctx.mem, n, node::NS))
                .filter(|&ns| ns != 0)
                .and_then(|ns| tree::ns_href_bytes(ctx.mem, ns))
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            Ok(Value::String(href))
        }
        "string" => {
            expect_arity_range(&values, 0, 1)?;
            match values.first() {
                Some(v) => Ok(Value::String(v.to_string_value(ctx.mem))),
                None => Ok(Value::String(tree::string_value(ctx.mem, frame.node))),
            }
        }
        "concat" => {
            if values.len() < 2 {
                return Err("Invalid number of args".to_string());
            }
            let mut out = String::new();
            for v in &values {
                out.push_str(&v.to_string_value(ctx.mem));
            }
            Ok(Value::String(out))
        }
        "starts-with" => {
            expect_arity(&values, 2)?;
            let haystack = values[0].to_string_value(ctx.mem);
            let prefix = values[1].to_string_value(ctx.mem);
            Ok(Value::Boolean(haystack.starts_with(&prefix)))
        }
        "contains" => {
            expect_arity(&values, 2)?;
            let haystack = values[0].to_string_value(ctx.mem);
            let needle = values[1].to_string_value(ctx.mem);
            Ok(Value::Boolean(haystack.contains(&needle)))
        }
        "substring-before" => {
            expect_arity(&values, 2)?;
            let haystack = values[0].to_string_value(ctx.mem);
            let needle = values[1].to_string_value(ctx.mem);
            let out = match haystack.find(&needle) {
                Some(at) => haystack[..at].to_string(),
                None => String::new(),
            };
            Ok(Value::String(out))
        }
        "substring-after" => {
            expect_arity(&values, 2)?;
            let haystack = values[0].to_string_value(ctx.mem);
            let needle = values[1].to_string_value(ctx.mem);
            let out = match haystack.find(&needle) {
                Some(at) => haystack[at + needle.len()..].to_string(),
                None => String::new(),
            };
            Ok(Value::String(out))
        }
        "substring" => {
            expect_arity_range(&values, 2, 3)?;
            let s = values[0].to_string_value(ctx.mem);
            let start = xpath_round(values[1].to_number(ctx.mem));
            let len = values.get(2).map(|v| xpath_round(v.to_number(ctx.mem)));
            let out: String = s
                .chars()
                .enumerate()
                .filter(|(i, _)| {
                    let pos = (i + 1) as f64;
                    pos >= start && len.map_or(true, |l| pos < start + l)
                })
                .map(|(_, c)| c)
                .collect();
            Ok(Value::String(out))
        }
        "string-length" => {
            expect_arity_range(&values, 0, 1)?;
            let s = match values.first() {
                Some(v) => v.to_string_value(ctx.mem),
                None => tree::string_value(ctx.mem, frame.node),
            };
            Ok(Value::Number(s.chars().count() as f64))
        }
        "normalize-space" => {
            expect_arity_range(&values, 0, 1)?;
            let s = match values.first() {
                Some(v) => v.to_string_value(ctx.mem),
                None => tree::string_value(ctx.mem, frame.node),
            };
            let out = s.split_ascii_whitespace().collect::<Vec<_>>().join(" ");
            Ok(Value::String(out))
        }
        "translate" => {
            expect_arity(&values, 3)?;
            let s = values[0].to_string_value(ctx.mem);
            let from: Vec<char> = values[1].to_string_value(ctx.mem).chars().collect();
            let to: Vec<char> = values[2].to_string_value(ctx.mem).chars().collect();
            let out: String = s
                .chars()
                .filter_map(|c| match from.iter().position(|&f| f == c) {
                    Some(i) => to.get(i).copied(),
                    None => Some(c),
                })
                .collect();
            Ok(Value::String(out))
        }
        "boolean" => {
            expect_arity(&values, 1)?;
            Ok(Value::Boolean(values[0].to_boolean()))
        }
        "not" => {
            expect_arity(&values, 1)?;
            Ok(Value::Boolean(!values[0].to_boolean()))
        }
        "true" => {
            expect_arity(&values, 0)?;
            Ok(Value::Boolean(true))
        }
        "false" => {
            expect_arity(&values, 0)?;
            Ok(Value::Boolean(false))
        }
        "lang" => {
            expect_arity(&values, 1)?;
            let want = values[0].to_string_value(ctx.mem).to_ascii_lowercase();
            Ok(Value::Boolean(lang_matches(ctx, frame.node, &want)))
        }
        "number" => {
            expect_arity_range(&values, 0, 1)?;
            match values.first() {
                Some(v) => Ok(Value::Number(v.to_number(ctx.mem))),
                None => Ok(Value::Number(str_to_number(&tree::string_value(
                    ctx.mem, frame.node,
                )))),
            }
        }
        "sum" => {
            expect_arity(&values, 1)?;
            let Value::NodeSet(set) = &values[0] else {
                return Err("Invalid type".to_string());
            };
            let total = set
                .iter()
                .map(|&n| str_to_number(&tree::string_value(ctx.mem, n)))
                .sum();
            Ok(Value::Number(total))
        }
        "floor" => {
            expect_arity(&values, 1)?;
            Ok(Value::Number(values[0].to_number(ctx.mem).floor()))
        }
        "ceiling" => {
            expect_arity(&values, 1)?;
            Ok(Value::Number(values[0].to_number(ctx.mem).ceil()))
        }
        "round" => {
            expect_arity(&values, 1)?;
            Ok(Value::Number(xpath_round(values[0].to_number(ctx.mem))))
        }
        _ => Err("Unregistered function".to_string()),
    }
}

fn expect_arity(values: &[Value], expected: usize) -> Result<(), String> {
    if values.len() == expected {
        Ok(())
    } else {
        Err("Invalid number of args".to_string())
    }
}

fn expect_arity_range(values: &[Value], min: usize, max: usize) -> Result<(), String> {
    if (min..=max).contains(&values.len()) {
        Ok(())
    } else {
        Err("Invalid number of args".to_string())
    }
}

/// The node the name functions describe: the context node, or the first
/// node of an explicit node-set argument (None when that set is empty).
fn subject_node(
    ctx: &EvalContext,
    frame: Frame,
    values: &[Value],
) -> Result<Option<u32>, String> {
    match values {
        [] => Ok(Some(frame.node)),
        [Value::NodeSet(set)] => {
            let mut nodes = set.clone();
            super::eval::dedup_document_order(ctx.mem, &mut nodes);
            Ok(nodes.first().copied())
        }
        [_] => Err("Invalid type".to_string()),
        _ => Err("Invalid number of args".to_string()),
    }
}

/// `round()` rounds half towards positive infinity, unlike `f64::round`.
fn xpath_round(n: f64) -> f64 {
    if n.is_nan() {
        n
    } else {
        (n + 0.5).floor()
    }
}

/// `xml:lang` lookup on the nearest ancestor-or-self element, matching the
/// language itself or any sublanguage of it.
fn lang_matches(ctx: &EvalContext, start: u32, want: &str) -> bool {
    let mut n = start;
    while n != 0 {
        if tree::node_type(ctx.mem, n) == tag::ELEMENT {
            let attr = tree::find_attr(ctx.mem, n, b"lang", Some(XML_NS.as_bytes()));
            if attr != 0 {
                let have = tree::string_value(ctx.mem, attr).to_ascii_lowercase();
                return have == want || (have.len() > want.len() && have.starts_with(want) && have.as_bytes()[want.len()] == b'-');
            }
        }
        n = tree::get(ctx.mem, n, node::PARENT);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::layout::ParseFlags;
    use crate::engine::mem::Arena;
    use crate::engine::parser;
    use crate::engine::xpath::eval::evaluate;
    use crate::engine::xpath::parser::parse;
    use std::collections::HashMap;

    fn run(xml: &str, query: &str) -> Value {
        let mut mem = Arena::new();
        let (doc, diags) = parser::parse(&mut mem, xml.as_bytes(), None, ParseFlags::default());
        assert!(doc != 0, "parse failed: {diags:?}");
        let namespaces = HashMap::new();
        let ctx = EvalContext {
            mem: &mem,
            doc,
            node: doc,
            namespaces: &namespaces,
        };
        let expr = parse(query).expect("compile");
        evaluate(&ctx, &expr).expect("evaluate")
    }

    #[test]
    fn test_string_functions() {
        let doc = "<a/>";
        assert_eq!(
            run(doc, "concat('a', 'b', 'c')"),
            Value::String("abc".to_string())
        );
        assert_eq!(run(doc, "starts-with('abc', 'ab')"), Value::Boolean(true));
        assert_eq!(run(doc, "contains('abc', 'z')"), Value::Boolean(false));
        assert_eq!(
            run(doc, "substring-before('1999/04/01', '/')"),
            Value::String("1999".to_string())
        );
        assert_eq!(
            run(doc, "substring-after('1999/04/01', '/')"),
            Value::String("04/01".to_string())
        );
        assert_eq!(
            run(doc, "normalize-space('  a  b ')"),
            Value::String("a b".to_string())
        );
        assert_eq!(
            run(doc, "translate('bar', 'abc', 'ABC')"),
            Value::String("BAr".to_string())
        );
        assert_eq!(
            run(doc, "translate('--aaa--', 'abc-', 'ABC')"),
            Value::String("AAA".to_string())
        );
        assert_eq!(run(doc, "string-length('héllo')"), Value::Number(5.0));
    }

    #[test]
    fn test_substring_rounding() {
        let doc = "<a/>";
        assert_eq!(
            run(doc, "substring('12345', 2, 3)"),
            Value::String("234".to_string())
        );
        assert_eq!(
            run(doc, "substring('12345', 1.5, 2.6)"),
            Value::String("234".to_string())
        );
        assert_eq!(
            run(doc, "substring('12345', 0, 3)"),
            Value::String("12".to_string())
        );
        assert_eq!(
            run(doc, "substring('12345', 2)"),
            Value::String("2345".to_string())
        );
    }

    #[test]
    fn test_numeric_functions() {
        let doc = "<a><n>1</n><n>2.5</n></a>";
        assert_eq!(run(doc, "sum(/a/n)"), Value::Number(3.5));
        assert_eq!(run(doc, "count(/a/n)"), Value::Number(2.0));
        assert_eq!(run(doc, "floor(2.6)"), Value::Number(2.0));
        assert_eq!(run(doc, "ceiling(2.1)"), Value::Number(3.0));
        assert_eq!(run(doc, "round(2.5)"), Value::Number(3.0));
        assert_eq!(run(doc, "round(-2.5)"), Value::Number(-2.0));
        assert_eq!(run(doc, "number('12')"), Value::Number(12.0));
    }

    #[test]
    fn test_name_functions() {
        let xml = r#"<a xmlns:p="urn:x"><p:b/></a>"#;
        assert_eq!(
            run(xml, "local-name(/a/*)"),
            Value::String("b".to_string())
        );
        assert_eq!(run(xml, "name(/a/*)"), Value::String("p:b".to_string()));
        assert_eq!(
            run(xml, "namespace-uri(/a/*)"),
            Value::String("urn:x".to_string())
        );
        assert_eq!(run(xml, "local-name(/nope)"), Value::String(String::new()));
    }

    #[test]
    fn test_lang() {
        let xml = r#"<a xml:lang="en-US"><b/></a>"#;
        assert_eq!(run(xml, "lang('en')"), Value::Boolean(false));
        let v = run(xml, "count(//b[lang('en')])");
        assert_eq!(v, Value::Number(1.0));
        let v = run(xml, "count(//b[lang('en-us')])");
        assert_eq!(v, Value::Number(1.0));
        let v = run(xml, "count(//b[lang('de')])");
        assert_eq!(v, Value::Number(0.0));
    }

    #[test]
    fn test_errors() {
        let mut mem = Arena::new();
        let (doc, _) = parser::parse(&mut mem, b"<a/>", None, ParseFlags::default());
        let namespaces = HashMap::new();
        let ctx = EvalContext {
            mem: &mem,
            doc,
            node: doc,
            namespaces: &namespaces,
        };
        let expr = parse("nonesuch(1)").expect("compile");
        assert_eq!(
            evaluate(&ctx, &expr),
            Err("Unregistered function".to_string())
        );
        let expr = parse("count(1, 2)").expect("compile");
        assert_eq!(
            evaluate(&ctx, &expr),
            Err("Invalid number of args".to_string())
        );
        let expr = parse("sum('x')").expect("compile");
        assert_eq!(evaluate(&ctx, &expr), Err("Invalid type".to_string()));
    }
}
