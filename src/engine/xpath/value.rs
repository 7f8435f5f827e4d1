//! XPath value types
//!
//! XPath 1.0 has four data types: node-set, boolean, number, and string.
//! Node-sets hold arena pointers in document order; conversions that need
//! a node's text take the arena.

use crate::engine::mem::Arena;
use crate::engine::tree;

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Value {
    /// Nodes in document order, no duplicates
    NodeSet(Vec<u32>),
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn empty_nodeset() -> Self {
        Value::NodeSet(Vec::new())
    }

    /// boolean() conversion.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    /// number() conversion.
    pub fn to_number(&self, mem: &Arena) -> f64 {
        match self {
            Value::NodeSet(_) => str_to_number(&self.to_string_value(mem)),
            Value::Boolean(true) => 1.0,
            Value::Boolean(false) => 0.0,
            Value::Number(n) => *n,
            Value::String(s) => str_to_number(s),
        }
    }

    /// string() conversion. A node-set converts to the string-value of its
    /// first node in document order, or "" when empty.
    pub fn to_string_value(&self, mem: &Arena) -> String {
        match self {
            Value::NodeSet(nodes) => nodes
                .first()
                .map(|&n| tree::string_value(mem, n))
                .unwrap_or_default(),
            Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
        }
    }

    pub fn is_nodeset(&self) -> bool {
        matches!(self, Value::NodeSet(_))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u32>> for Value {
    fn from(nodes: Vec<u32>) -> Self {
        Value::NodeSet(nodes)
    }
}

/// Numeric conversion of a string: optional minus, digits, optional
/// fraction. Anything else, including exponents, is NaN.
pub fn str_to_number(s: &str) -> f64 {
    let t = s.trim();
    let body = t.strip_prefix('-').unwrap_or(t);
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return f64::NAN;
    }
    t.parse().unwrap_or(f64::NAN)
}

/// Number-to-string: integral values print without a fraction, NaN and the
/// infinities use their XPath names.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::layout::tag;

    #[test]
    fn test_boolean_conversion() {
        assert!(Value::NodeSet(vec![8]).to_boolean());
        assert!(!Value::NodeSet(vec![]).to_boolean());
        assert!(Value::Boolean(true).to_boolean());
        assert!(!Value::Number(0.0).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(Value::String("x".to_string()).to_boolean());
        assert!(!Value::String(String::new()).to_boolean());
    }

    #[test]
    fn test_number_conversion() {
        let mem = Arena::new();
        assert_eq!(Value::Boolean(true).to_number(&mem), 1.0);
        assert_eq!(Value::String("42".to_string()).to_number(&mem), 42.0);
        assert_eq!(Value::String(" 1.5 ".to_string()).to_number(&mem), 1.5);
        assert!(Value::String("abc".to_string()).to_number(&mem).is_nan());
        assert!(Value::String("1e3".to_string()).to_number(&mem).is_nan());
        assert!(Value::empty_nodeset().to_number(&mem).is_nan());
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(3.25), "3.25");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_nodeset_string_value_reads_the_arena() {
        let mut mem = Arena::new();
        let doc = tree::new_doc(&mut mem, None);
        let el = tree::new_node(&mut mem, tag::ELEMENT, doc);
        tree::append_child(&mut mem, doc, el);
        let text = tree::new_node(&mut mem, tag::TEXT, doc);
        tree::set_content(&mut mem, text, "payload");
        tree::append_child(&mut mem, el, text);

        assert_eq!(Value::NodeSet(vec![el]).to_string_value(&mem), "payload");
        assert_eq!(Value::empty_nodeset().to_string_value(&mem), "");
    }
}
