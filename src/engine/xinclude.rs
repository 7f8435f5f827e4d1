//! XInclude substitution
//!
//! Runs over the finished tree after parsing. No external resource is ever
//! fetched: an include either takes its inline `fallback` content or is
//! reported as a load failure and left in place.

use super::layout::{level, node, tag, XINCLUDE_NS};
use super::mem::Arena;
use super::parser::Diag;
use super::tree;

/// Apply substitutions below `start`, usually the document node.
///
/// Returns the number of substitutions performed, or -1 when any include
/// failed to resolve. Diagnostics describe the failures.
pub fn process(mem: &mut Arena, start: u32) -> (i32, Vec<Diag>) {
    let mut diags = Vec::new();
    let includes = collect_includes(mem, start);
    let mut substituted = 0i32;
    let mut failed = false;
    // Deepest first, so an include nested in a fallback is resolved before
    // the fallback content moves or its wrapper is freed.
    for include in includes.into_iter().rev() {
        if resolve(mem, include, &mut diags) {
            substituted += 1;
        } else {
            failed = true;
        }
    }
    if failed {
        (-1, diags)
    } else {
        (substituted, diags)
    }
}

/// Document-order list of include elements in the subtree.
fn collect_includes(mem: &Arena, start: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        if in_xinclude_ns(mem, n, b"include") {
            out.push(n);
        }
        let mut child = tree::get(mem, n, node::LAST);
        while child != 0 {
            stack.push(child);
            child = tree::get(mem, child, node::PREV);
        }
    }
    out
}

fn in_xinclude_ns(mem: &Arena, n: u32, local: &[u8]) -> bool {
    if tree::node_type(mem, n) != tag::ELEMENT {
        return false;
    }
    if tree::name_bytes(mem, n) != Some(local) {
        return false;
    }
    let ns = tree::get(mem, n, node::NS);
    ns != 0 && tree::ns_href_bytes(mem, ns) == Some(XINCLUDE_NS.as_bytes())
}

/// Substitute one include element. True on success.
fn resolve(mem: &mut Arena, include: u32, diags: &mut Vec<Diag>) -> bool {
    let line = tree::get(mem, include, node::LINE);
    let Some(href) = tree::attr_value(mem, include, b"href") else {
        diags.push(error(line, "no href was specified".to_string()));
        return false;
    };
    let fallback = find_fallback(mem, include);
    if fallback == 0 {
        let msg = format!("could not load {href}, and no fallback was found");
        diags.push(error(line, msg));
        return false;
    }
    tracing::debug!(include, href = %href, "substituting inline fallback");
    let mut child = tree::get(mem, fallback, node::CHILDREN);
    while child != 0 {
        let next = tree::get(mem, child, node::NEXT);
        tree::unlink(mem, child);
        tree::insert_before(mem, include, child);
        child = next;
    }
    tree::unlink(mem, include);
    tree::free_subtree(mem, include);
    true
}

fn find_fallback(mem: &Arena, include: u32) -> u32 {
    let mut child = tree::get(mem, include, node::CHILDREN);
    while child != 0 {
        if in_xinclude_ns(mem, child, b"fallback") {
            return child;
        }
        child = tree::get(mem, child, node::NEXT);
    }
    0
}

fn error(line: u32, message: String) -> Diag {
    Diag {
        message,
        line,
        col: 0,
        level: level::ERROR,
    }
}
