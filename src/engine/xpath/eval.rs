//! XPath evaluation
//!
//! Walks the parsed expression against the arena tree:
//!
//! - axes produce candidates in axis order (reverse axes run away from the
//!   document start), so predicate positions count the way XPath 1.0 says
//! - each step's output is sorted into document order and deduplicated
//! - comparisons follow the XPath 1.0 existential rules for node-sets
//!
//! The namespace axis is not populated and processing-instruction tests
//! never match; neither node kind is materialized by the parser.

use std::collections::HashMap;

use super::parser::{Axis, BinaryOp, Expr, NodeTest, Step};
use super::value::Value;
use crate::engine::layout::{node, tag};
use crate::engine::mem::Arena;
use crate::engine::tree;

/// Everything an evaluation reads: the arena, the owning document, the
/// context node, and the prefix registrations in force.
pub struct EvalContext<'a> {
    pub mem: &'a Arena,
    pub doc: u32,
    pub node: u32,
    pub namespaces: &'a HashMap<String, String>,
}

/// Per-expression context node with its predicate position and size.
#[derive(Clone, Copy)]
pub struct Frame {
    pub node: u32,
    pub position: usize,
    pub size: usize,
}

/// Evaluate a compiled expression against the context node.
pub fn evaluate(ctx: &EvalContext, expr: &Expr) -> Result<Value, String> {
    let frame = Frame {
        node: ctx.node,
        position: 1,
        size: 1,
    };
    eval(ctx, frame, expr)
}

pub(super) fn eval(ctx: &EvalContext, frame: Frame, expr: &Expr) -> Result<Value, String> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Literal(s) => Ok(Value::String(s.clone())),
        Expr::Variable(_) => Err("Undefined variable".to_string()),
        Expr::Call(name, args) => super::functions::call(ctx, frame, name, args),
        Expr::Negate(inner) => {
            let v = eval(ctx, frame, inner)?;
            Ok(Value::Number(-v.to_number(ctx.mem)))
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(ctx, frame, *op, lhs, rhs),
        Expr::Path(path) => {
            let mut nodes = if path.absolute {
                vec![ctx.doc]
            } else {
                vec![frame.node]
            };
            for step in &path.steps {
                nodes = apply_step(ctx, &nodes, step)?;
            }
            Ok(Value::NodeSet(nodes))
        }
        Expr::Filter {
            base,
            predicates,
            steps,
        } => {
            let Value::NodeSet(mut nodes) = eval(ctx, frame, base)? else {
                return Err("Invalid type".to_string());
            };
            dedup_document_order(ctx.mem, &mut nodes);
            let mut nodes = apply_predicates(ctx, nodes, predicates)?;
            for step in steps {
                nodes = apply_step(ctx, &nodes, step)?;
            }
            Ok(Value::NodeSet(nodes))
        }
    }
}

// ----------------------------------------------------------------------
// Binary operators
// ----------------------------------------------------------------------

fn eval_binary(
    ctx: &EvalContext,
    frame: Frame,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
) -> Result<Value, String> {
    // Short-circuit forms first.
    match op {
        BinaryOp::Or => {
            if eval(ctx, frame, lhs)?.to_boolean() {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(eval(ctx, frame, rhs)?.to_boolean()));
        }
        BinaryOp::And => {
            if !eval(ctx, frame, lhs)?.to_boolean() {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(eval(ctx, frame, rhs)?.to_boolean()));
        }
        _ => {}
    }

    let left = eval(ctx, frame, lhs)?;
    let right = eval(ctx, frame, rhs)?;
    match op {
        BinaryOp::Union => {
            let (Value::NodeSet(mut a), Value::NodeSet(b)) = (left, right) else {
                return Err("Invalid type".to_string());
            };
            a.extend(b);
            dedup_document_order(ctx.mem, &mut a);
            Ok(Value::NodeSet(a))
        }
        BinaryOp::Eq => Ok(Value::Boolean(compare_equality(ctx, &left, &right, false))),
        BinaryOp::NotEq => Ok(Value::Boolean(compare_equality(ctx, &left, &right, true))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            Ok(Value::Boolean(compare_relational(ctx, op, &left, &right)))
        }
        BinaryOp::Add => Ok(arith(ctx, &left, &right, |a, b| a + b)),
        BinaryOp::Sub => Ok(arith(ctx, &left, &right, |a, b| a - b)),
        BinaryOp::Mul => Ok(arith(ctx, &left, &right, |a, b| a * b)),
        BinaryOp::Div => Ok(arith(ctx, &left, &right, |a, b| a / b)),
        BinaryOp::Mod => Ok(arith(ctx, &left, &right, |a, b| a % b)),
        BinaryOp::Or | BinaryOp::And => unreachable!("handled above"),
    }
}

fn arith(ctx: &EvalContext, left: &Value, right: &Value, f: fn(f64, f64) -> f64) -> Value {
    Value::Number(f(left.to_number(ctx.mem), right.to_number(ctx.mem)))
}

fn nodeset_strings(ctx: &EvalContext, set: &[u32]) -> Vec<String> {
    set.iter().map(|&n| tree::string_value(ctx.mem, n)).collect()
}

/// `=` and `!=` with the existential node-set rules. `negate` selects `!=`,
/// which is itself existential rather than the complement of `=`.
fn compare_equality(ctx: &EvalContext, left: &Value, right: &Value, negate: bool) -> bool {
    match (left, right) {
        (Value::NodeSet(a), Value::NodeSet(b)) => {
            let left_strings = nodeset_strings(ctx, a);
            let right_strings = nodeset_strings(ctx, b);
            left_strings
                .iter()
                .any(|ls| right_strings.iter().any(|rs| (ls == rs) != negate))
        }
        (Value::NodeSet(set), Value::Number(n)) | (Value::Number(n), Value::NodeSet(set)) => set
            .iter()
            .any(|&node| (super::value::str_to_number(&tree::string_value(ctx.mem, node)) == *n) != negate),
        (Value::NodeSet(set), Value::String(s)) | (Value::String(s), Value::NodeSet(set)) => set
            .iter()
            .any(|&node| (tree::string_value(ctx.mem, node) == *s) != negate),
        (Value::NodeSet(_), Value::Boolean(b)) | (Value::Boolean(b), Value::NodeSet(_)) => {
            let set_truth = if matches!(left, Value::NodeSet(_)) {
                left.to_boolean()
            } else {
                right.to_boolean()
            };
            (set_truth == *b) != negate
        }
        (Value::Boolean(_), _) | (_, Value::Boolean(_)) => {
            (left.to_boolean() == right.to_boolean()) != negate
        }
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            (left.to_number(ctx.mem) == right.to_number(ctx.mem)) != negate
        }
        (Value::String(a), Value::String(b)) => (a == b) != negate,
    }
}

/// `<`, `<=`, `>`, `>=` convert to numbers; node-sets compare existentially.
fn compare_relational(ctx: &EvalContext, op: BinaryOp, left: &Value, right: &Value) -> bool {
    let cmp = |a: f64, b: f64| match op {
        BinaryOp::Lt => a < b,
        BinaryOp::LtEq => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::GtEq => a >= b,
        _ => false,
    };
    let numbers = |set: &[u32]| -> Vec<f64> {
        set.iter()
            .map(|&n| super::value::str_to_number(&tree::string_value(ctx.mem, n)))
            .collect()
    };
    match (left, right) {
        (Value::NodeSet(a), Value::NodeSet(b)) => {
            let left_nums = numbers(a);
            let right_nums = numbers(b);
            left_nums
                .iter()
                .any(|&la| right_nums.iter().any(|&rb| cmp(la, rb)))
        }
        (Value::NodeSet(set), other) => {
            let rhs = other.to_number(ctx.mem);
            numbers(set).into_iter().any(|la| cmp(la, rhs))
        }
        (other, Value::NodeSet(set)) => {
            let lhs = other.to_number(ctx.mem);
            numbers(set).into_iter().any(|rb| cmp(lhs, rb))
        }
        _ => cmp(left.to_number(ctx.mem), right.to_number(ctx.mem)),
    }
}

// ----------------------------------------------------------------------
// Steps
// ----------------------------------------------------------------------

fn apply_step(ctx: &EvalContext, input: &[u32], step: &Step) -> Result<Vec<u32>, String> {
    // Resolve the test's prefix once per step, not once per node.
    let resolved_href = match &step.test {
        NodeTest::QName(prefix, _) | NodeTest::NsWildcard(prefix) => Some(
            ctx.namespaces
                .get(prefix)
                .ok_or_else(|| "Undefined namespace prefix".to_string())?
                .clone(),
        ),
        _ => None,
    };

    let mut out = Vec::new();
    for &node in input {
        if node == 0 {
            continue;
        }
        let mut candidates = axis_nodes(ctx.mem, node, step.axis);
        candidates.retain(|&c| test_matches(ctx.mem, step, resolved_href.as_deref(), c));
        let kept = apply_predicates(ctx, candidates, &step.predicates)?;
        out.extend(kept);
    }
    dedup_document_order(ctx.mem, &mut out);
    Ok(out)
}

fn apply_predicates(
    ctx: &EvalContext,
    candidates: Vec<u32>,
    predicates: &[Expr],
) -> Result<Vec<u32>, String> {
    let mut current = candidates;
    for predicate in predicates {
        let size = current.len();
        let mut kept = Vec::with_capacity(size);
        for (i, &node) in current.iter().enumerate() {
            let frame = Frame {
                node,
                position: i + 1,
                size,
            };
            let value = eval(ctx, frame, predicate)?;
            let keep = match value {
                Value::Number(n) => (i + 1) as f64 == n,
                other => other.to_boolean(),
            };
            if keep {
                kept.push(node);
            }
        }
        current = kept;
    }
    Ok(current)
}

fn test_matches(mem: &Arena, step: &Step, resolved_href: Option<&str>, n: u32) -> bool {
    let ty = tree::node_type(mem, n);
    let principal = if step.axis == Axis::Attribute {
        tag::ATTRIBUTE
    } else {
        tag::ELEMENT
    };
    match &step.test {
        NodeTest::Node => true,
        NodeTest::Text => ty == tag::TEXT || ty == tag::CDATA,
        NodeTest::Comment => ty == tag::COMMENT,
        NodeTest::Pi(_) => false,
        NodeTest::Any => ty == principal,
        NodeTest::Name(name) => {
            ty == principal
                && tree::get(mem, n, node::NS) == 0
                && tree::name_bytes(mem, n) == Some(name.as_bytes())
        }
        NodeTest::QName(_, local) => {
            ty == principal
                && ns_href_matches(mem, n, resolved_href)
                && tree::name_bytes(mem, n) == Some(local.as_bytes())
        }
        NodeTest::NsWildcard(_) => ty == principal && ns_href_matches(mem, n, resolved_href),
    }
}

fn ns_href_matches(mem: &Arena, n: u32, resolved_href: Option<&str>) -> bool {
    let ns = tree::get(mem, n, node::NS);
    if ns == 0 {
        return false;
    }
    let Some(expected) = resolved_href else {
        return false;
    };
    tree::ns_href_bytes(mem, ns) == Some(expected.as_bytes())
}

// ----------------------------------------------------------------------
// Axes
// ----------------------------------------------------------------------

/// Candidates for one axis, in axis order.
fn axis_nodes(mem: &Arena, n: u32, axis: Axis) -> Vec<u32> {
    let mut out = Vec::new();
    match axis {
        Axis::SelfAxis => out.push(n),
        Axis::Child => {
            let mut c = tree::get(mem, n, node::CHILDREN);
            while c != 0 {
                out.push(c);
                c = tree::get(mem, c, node::NEXT);
            }
        }
        Axis::Descendant => push_descendants(mem, n, &mut out),
        Axis::DescendantOrSelf => {
            out.push(n);
            push_descendants(mem, n, &mut out);
        }
        Axis::Parent => {
            let p = tree::get(mem, n, node::PARENT);
            if p != 0 {
                out.push(p);
            }
        }
        Axis::Ancestor => {
            let mut p = tree::get(mem, n, node::PARENT);
            while p != 0 {
                out.push(p);
                p = tree::get(mem, p, node::PARENT);
            }
        }
        Axis::AncestorOrSelf => {
            out.push(n);
            let mut p = tree::get(mem, n, node::PARENT);
            while p != 0 {
                out.push(p);
                p = tree::get(mem, p, node::PARENT);
            }
        }
        Axis::FollowingSibling => {
            let mut s = tree::get(mem, n, node::NEXT);
            while s != 0 {
                out.push(s);
                s = tree::get(mem, s, node::NEXT);
            }
        }
        Axis::PrecedingSibling => {
            let mut s = tree::get(mem, n, node::PREV);
            while s != 0 {
                out.push(s);
                s = tree::get(mem, s, node::PREV);
            }
        }
        Axis::Following => {
            // Attributes share their element's following nodes.
            let start = if tree::node_type(mem, n) == tag::ATTRIBUTE {
                tree::get(mem, n, node::PARENT)
            } else {
                n
            };
            let mut anchor = start;
            while anchor != 0 {
                let mut s = tree::get(mem, anchor, node::NEXT);
                while s != 0 {
                    out.push(s);
                    push_descendants(mem, s, &mut out);
                    s = tree::get(mem, s, node::NEXT);
                }
                anchor = tree::get(mem, anchor, node::PARENT);
            }
        }
        Axis::Preceding => {
            let start = if tree::node_type(mem, n) == tag::ATTRIBUTE {
                tree::get(mem, n, node::PARENT)
            } else {
                n
            };
            let mut anchor = start;
            while anchor != 0 {
                let mut s = tree::get(mem, anchor, node::PREV);
                while s != 0 {
                    let from = out.len();
                    out.push(s);
                    push_descendants(mem, s, &mut out);
                    out[from..].reverse();
                    s = tree::get(mem, s, node::PREV);
                }
                anchor = tree::get(mem, anchor, node::PARENT);
            }
        }
        Axis::Attribute => {
            if tree::node_type(mem, n) == tag::ELEMENT {
                let mut a = tree::get(mem, n, node::PROPERTIES);
                while a != 0 {
                    out.push(a);
                    a = tree::get(mem, a, node::NEXT);
                }
            }
        }
        Axis::Namespace => {}
    }
    out
}

/// Every node strictly below `n`, in document order.
fn push_descendants(mem: &Arena, n: u32, out: &mut Vec<u32>) {
    let mut stack = Vec::new();
    let mut c = tree::get(mem, n, node::LAST);
    while c != 0 {
        stack.push(c);
        c = tree::get(mem, c, node::PREV);
    }
    while let Some(current) = stack.pop() {
        out.push(current);
        let mut c = tree::get(mem, current, node::LAST);
        while c != 0 {
            stack.push(c);
            c = tree::get(mem, c, node::PREV);
        }
    }
}

// ----------------------------------------------------------------------
// Document order
// ----------------------------------------------------------------------

/// Sort into document order and drop duplicates.
pub fn dedup_document_order(mem: &Arena, nodes: &mut Vec<u32>) {
    nodes.sort_by_cached_key(|&n| order_key(mem, n));
    nodes.dedup();
}

/// Path of (kind, sibling-index) pairs from the root down to `n`. Attributes
/// sort after their element but before its children.
fn order_key(mem: &Arena, start: u32) -> Vec<u32> {
    let mut key = Vec::new();
    let mut n = start;
    loop {
        let parent = tree::get(mem, n, node::PARENT);
        if parent == 0 {
            break;
        }
        if tree::node_type(mem, n) == tag::ATTRIBUTE {
            let mut idx = 0u32;
            let mut a = tree::get(mem, parent, node::PROPERTIES);
            while a != 0 && a != n {
                idx += 1;
                a = tree::get(mem, a, node::NEXT);
            }
            key.push(idx);
            key.push(1);
        } else {
            let mut idx = 0u32;
            let mut s = tree::get(mem, n, node::PREV);
            while s != 0 {
                idx += 1;
                s = tree::get(mem, s, node::PREV);
            }
            key.push(idx);
            key.push(2);
        }
        n = parent;
    }
    key.reverse();
    key
}
