//! XPath pipeline
//!
//! Compiled expressions own an engine handle and can be reused across nodes
//! and documents. Evaluation builds a transient context per call, registers
//! namespaces, binds the context node, runs the compiled expression, and
//! marshals node-set results back into wrappers. The result object is freed
//! before returning, whatever the outcome; a non-node-set result marshals to
//! nothing.

use crate::engine;
use crate::engine::layout::{node_set, object_type, xpath_object};
use crate::error::{op_guard, CollectorScope, XmlError};
use crate::node::{make_node, Namespaces, XmlElement, XmlNode};
use crate::raw;
use crate::resource::ResourceHandle;

/// A query compiled once, with optional namespace bindings stored for
/// evaluations that do not carry their own.
#[derive(Debug)]
pub struct XmlXPath {
    res: ResourceHandle,
    source: String,
    namespaces: Option<Namespaces>,
}

impl XmlXPath {
    /// Compile `query` without binding it to any document. A query that does
    /// not parse is a construction error carrying the collected diagnostics.
    pub fn compile(query: &str, namespaces: Option<&Namespaces>) -> Result<XmlXPath, XmlError> {
        let _op = op_guard();
        compile_locked(query, namespaces)
    }

    /// The query text this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Release the engine handle now instead of at drop.
    pub fn dispose(mut self) {
        self.res.release();
    }
}

/// What to evaluate: a borrowed precompiled expression, or query text
/// compiled for this one call and disposed before returning.
pub enum Query<'q> {
    Compiled(&'q XmlXPath),
    Text(&'q str),
}

impl<'q> From<&'q XmlXPath> for Query<'q> {
    fn from(compiled: &'q XmlXPath) -> Self {
        Query::Compiled(compiled)
    }
}

impl<'q> From<&'q str> for Query<'q> {
    fn from(text: &'q str) -> Self {
        Query::Text(text)
    }
}

impl<'d> XmlElement<'d> {
    /// First match in document order, or `None`.
    pub fn xpath_get<'q>(
        &self,
        query: impl Into<Query<'q>>,
        namespaces: Option<&Namespaces>,
    ) -> Result<Option<XmlNode<'d>>, XmlError> {
        Ok(evaluate(self, query.into(), namespaces)?.into_iter().next())
    }

    /// Every match in document order.
    pub fn xpath_find<'q>(
        &self,
        query: impl Into<Query<'q>>,
        namespaces: Option<&Namespaces>,
    ) -> Result<Vec<XmlNode<'d>>, XmlError> {
        evaluate(self, query.into(), namespaces)
    }
}

/// Compile under an already-held operation lock.
fn compile_locked(query: &str, namespaces: Option<&Namespaces>) -> Result<XmlXPath, XmlError> {
    let scope = CollectorScope::begin();
    let ctxt = engine::xpath_new_context(0);
    let comp = engine::xpath_ctxt_compile(ctxt, query);
    engine::xpath_free_context(ctxt);
    if comp == 0 {
        return Err(XmlError::parse_failure(
            "could not compile XPath expression",
            scope.diagnostics(),
        ));
    }
    drop(scope);
    tracing::debug!(query, comp, "compiled XPath expression");
    Ok(XmlXPath {
        res: ResourceHandle::acquire(comp, engine::xpath_free_comp_expr),
        source: query.to_string(),
        namespaces: namespaces.cloned(),
    })
}

/// Run `query` with `target` as the context node.
///
/// Namespace bindings are chosen by precedence: the explicit argument, then
/// the map the node inherited, then the map stored on the compiled
/// expression.
pub(crate) fn evaluate<'d>(
    target: &XmlElement<'d>,
    query: Query<'_>,
    namespaces: Option<&Namespaces>,
) -> Result<Vec<XmlNode<'d>>, XmlError> {
    let node_ptr = target.require_ptr()?;
    let _op = op_guard();

    let throwaway;
    let compiled = match query {
        Query::Compiled(expr) => expr,
        Query::Text(text) => {
            throwaway = compile_locked(text, None)?;
            &throwaway
        }
    };

    let chosen = namespaces
        .or_else(|| target.namespaces())
        .or(compiled.namespaces.as_ref());

    let scope = CollectorScope::begin();
    let ctxt = engine::xpath_new_context(target.doc_ptr());
    if let Some(map) = chosen {
        for (prefix, href) in map {
            engine::xpath_register_ns(ctxt, prefix, href);
        }
    }
    engine::xpath_set_context_node(ctxt, node_ptr);
    let obj = engine::xpath_compiled_eval(compiled.res.pointer(), ctxt);
    if obj == 0 {
        tracing::debug!(query = %compiled.source, "query evaluation produced no result");
    }
    let nodes = marshal_node_set(obj, target.doc_ptr(), chosen);
    engine::xpath_free_object(obj);
    engine::xpath_free_context(ctxt);
    drop(scope);
    nodes
}

/// Decode a result object into wrappers. Anything but a node set, including
/// a failed evaluation, marshals to an empty list.
fn marshal_node_set<'d>(
    obj: u32,
    doc: u32,
    namespaces: Option<&Namespaces>,
) -> Result<Vec<XmlNode<'d>>, XmlError> {
    if obj == 0 {
        return Ok(Vec::new());
    }
    if raw::read_u32(obj, xpath_object::TYPE, "xpath type")? != object_type::NODESET {
        return Ok(Vec::new());
    }
    let set = raw::read_u32(obj, xpath_object::NODESET, "node set")?;
    if set == 0 {
        return Ok(Vec::new());
    }
    let count = raw::read_u32(set, node_set::COUNT, "count")?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let tab = raw::read_u32(set, node_set::TAB, "tab")?;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let ptr = raw::read_u32(tab, i * 4, "node set entry")?;
        if let Some(wrapped) = make_node(ptr, doc, namespaces)? {
            out.push(wrapped);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ParseOptions, XmlDocument};
    use std::collections::HashMap;

    fn parse(data: &str) -> XmlDocument {
        XmlDocument::parse(data, &ParseOptions::default()).unwrap()
    }

    fn map(pairs: &[(&str, &str)]) -> Namespaces {
        pairs
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect::<HashMap<_, _>>()
    }

    #[test]
    fn test_get_by_position_and_missing() {
        let _serial = crate::testutil::serial();
        let doc = parse("<a><b>1</b><b>2</b></a>");
        let root = doc.root().unwrap();
        let second = root.xpath_get("/a/b[2]", None).unwrap().unwrap();
        assert_eq!(second.content().unwrap(), "2");
        assert!(root.xpath_get("/a/c", None).unwrap().is_none());
    }

    #[test]
    fn test_adhoc_matches_compiled() {
        let _serial = crate::testutil::serial();
        let doc = parse("<a><b>1</b><b>2</b></a>");
        let root = doc.root().unwrap();
        let compiled = XmlXPath::compile("//b", None).unwrap();
        assert_eq!(compiled.source(), "//b");

        let from_text = root.xpath_find("//b", None).unwrap();
        let from_compiled = root.xpath_find(&compiled, None).unwrap();
        assert_eq!(from_text.len(), 2);
        assert_eq!(from_compiled.len(), 2);
        for (a, b) in from_text.iter().zip(&from_compiled) {
            assert_eq!(a.content().unwrap(), b.content().unwrap());
        }
        compiled.dispose();
    }

    #[test]
    fn test_compiled_reuse_across_documents() {
        let _serial = crate::testutil::serial();
        let compiled = XmlXPath::compile("/r/v", None).unwrap();
        let first = parse("<r><v>alpha</v></r>");
        let second = parse("<r><v>beta</v><v>gamma</v></r>");

        let hits = first.root().unwrap().xpath_find(&compiled, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content().unwrap(), "alpha");

        let hits = second.root().unwrap().xpath_find(&compiled, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content().unwrap(), "beta");
    }

    #[test]
    fn test_scalar_results_marshal_to_nothing() {
        let _serial = crate::testutil::serial();
        let doc = parse("<a><b>1</b><b>2</b></a>");
        let root = doc.root().unwrap();
        assert!(root.xpath_get("count(/a/b)", None).unwrap().is_none());
        assert!(root.xpath_find("string(/a)", None).unwrap().is_empty());
        assert!(root.xpath_find("true()", None).unwrap().is_empty());
    }

    #[test]
    fn test_attribute_results() {
        let _serial = crate::testutil::serial();
        let doc = parse("<a><b id=\"one\"/><b id=\"two\"/></a>");
        let root = doc.root().unwrap();
        let hits = root.xpath_find("//@id", None).unwrap();
        assert_eq!(hits.len(), 2);
        let XmlNode::Attribute(attr) = &hits[0] else {
            panic!("expected an attribute result");
        };
        assert_eq!(attr.name().unwrap(), "id");
        assert_eq!(attr.value().unwrap(), "one");
    }

    #[test]
    fn test_relative_query_from_context_node() {
        let _serial = crate::testutil::serial();
        let doc = parse("<a><b><c>x</c></b></a>");
        let root = doc.root().unwrap();
        let b = root.get("b").unwrap().unwrap();
        let hit = b.xpath_get("c", None).unwrap().unwrap();
        assert_eq!(hit.content().unwrap(), "x");
    }

    #[test]
    fn test_namespace_precedence() {
        let _serial = crate::testutil::serial();
        let doc = parse(
            "<r><c xmlns=\"urn:1\">one</c><c xmlns=\"urn:2\">two</c></r>",
        );
        let root = doc.root().unwrap();
        let compiled = XmlXPath::compile("//q:c", Some(&map(&[("q", "urn:1")]))).unwrap();

        // stored bindings apply when nothing closer is given
        let hits = root.xpath_find(&compiled, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content().unwrap(), "one");

        // an explicit map wins over the stored one
        let explicit = map(&[("q", "urn:2")]);
        let hits = root.xpath_find(&compiled, Some(&explicit)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content().unwrap(), "two");

        // nodes remember the map they were found with
        let carrier = hits[0].as_element().unwrap();
        let again = carrier.xpath_get("//q:c", None).unwrap().unwrap();
        assert_eq!(again.content().unwrap(), "two");
    }

    #[test]
    fn test_unresolved_prefix_evaluates_to_nothing() {
        let _serial = crate::testutil::serial();
        let doc = parse("<a><b>1</b></a>");
        let root = doc.root().unwrap();
        // compiles fine, fails at evaluation, never crashes
        assert!(root.xpath_find("/p:a", None).unwrap().is_empty());
        assert!(root.xpath_get("//p:b", None).unwrap().is_none());
    }

    #[test]
    fn test_compile_failure_carries_diagnostics() {
        let _serial = crate::testutil::serial();
        let err = XmlXPath::compile("/a[", None).unwrap_err();
        let XmlError::Parse { message, details } = err else {
            panic!("expected a parse error");
        };
        assert!(message.starts_with("could not compile XPath expression"));
        assert!(!details.is_empty());
    }

    #[test]
    fn test_evaluation_leaves_no_allocations() {
        let _serial = crate::testutil::serial();
        let before = crate::engine::live_allocation_count();
        {
            let doc = parse("<a><b>1</b><b>2</b></a>");
            let root = doc.root().unwrap();
            let compiled = XmlXPath::compile("//b", None).unwrap();
            let hits = root.xpath_find(&compiled, None).unwrap();
            assert_eq!(hits.len(), 2);
            let _ = root.xpath_find("count(//b)", None).unwrap();
            compiled.dispose();
            doc.dispose();
        }
        assert_eq!(crate::engine::live_allocation_count(), before);
    }
}
