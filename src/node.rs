//! Node model
//!
//! Five node kinds, dispatched on the engine's runtime type tag and wrapped
//! as non-owning references into a document's arena tree:
//!
//! - `Element`, `Attribute`, `Text`, `CData`, `Comment`
//! - anything else the engine hands back is rejected as unsupported
//!
//! Wrappers borrow the document for `'d`, so they cannot outlive a dispose.
//! Each carries the owning document pointer and an optional namespace prefix
//! map inherited from wherever it was constructed. Removal zeroes the
//! wrapper's pointer so stale aliases fail with an access error instead of
//! reading freed memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::document::XmlDocument;
use crate::engine;
use crate::engine::layout::{node, ns, tag};
use crate::error::XmlError;
use crate::raw;

/// Prefix to URI bindings carried into XPath evaluation.
pub type Namespaces = HashMap<String, String>;

/// Shared core of every wrapper: pointer, owning document, inherited map.
#[derive(Debug, Clone)]
pub(crate) struct NodeRef<'d> {
    ptr: u32,
    doc: u32,
    namespaces: Option<Namespaces>,
    marker: PhantomData<&'d XmlDocument>,
}

impl<'d> NodeRef<'d> {
    fn new(ptr: u32, doc: u32, namespaces: Option<&Namespaces>) -> Self {
        NodeRef {
            ptr,
            doc,
            namespaces: namespaces.cloned(),
            marker: PhantomData,
        }
    }

    fn require(&self) -> Result<u32, XmlError> {
        if self.ptr == 0 {
            return Err(XmlError::NullAccess { field: "node" });
        }
        Ok(self.ptr)
    }

    /// Parent element, absent when the raw pointer is null or when it is the
    /// document container itself.
    fn parent(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        let ptr = self.require()?;
        let parent = raw::read_u32(ptr, node::PARENT, "parent")?;
        if parent == 0 || parent == self.doc {
            return Ok(None);
        }
        make_node(parent, self.doc, self.namespaces.as_ref())
    }

    fn next(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        let ptr = self.require()?;
        let sibling = raw::read_u32(ptr, node::NEXT, "next")?;
        make_node(sibling, self.doc, self.namespaces.as_ref())
    }

    fn prev(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        let ptr = self.require()?;
        let sibling = raw::read_u32(ptr, node::PREV, "prev")?;
        make_node(sibling, self.doc, self.namespaces.as_ref())
    }

    /// String value of the node through the engine's content entry point.
    /// The transfer buffer is freed here after decoding.
    fn content(&self) -> Result<String, XmlError> {
        let ptr = self.require()?;
        let buf = engine::node_get_content(ptr);
        let text = engine::read_cstring(buf);
        engine::free(buf);
        Ok(text)
    }

    fn line(&self) -> Result<u32, XmlError> {
        let ptr = self.require()?;
        raw::read_u32(ptr, node::LINE, "line")
    }

    /// Unlink from the tree, free the subtree, zero the wrapper.
    fn remove(&mut self) -> Result<(), XmlError> {
        let ptr = self.require()?;
        engine::unlink_node(ptr);
        engine::free_node(ptr);
        self.ptr = 0;
        Ok(())
    }
}

/// Local name plus prefix when the node carries a namespace.
fn qualified_name(ptr: u32) -> Result<String, XmlError> {
    let local = raw::read_string(ptr, node::NAME, "name")?;
    let ns_ptr = raw::read_u32(ptr, node::NS, "ns")?;
    if ns_ptr != 0 {
        if let Some(prefix) = raw::read_opt_string(ns_ptr, ns::PREFIX, "prefix")? {
            return Ok(format!("{prefix}:{local}"));
        }
    }
    Ok(local)
}

/// Wrap `ptr` as its runtime node kind. Null maps to `None`; a type tag
/// outside the supported set is an error.
pub(crate) fn make_node<'d>(
    ptr: u32,
    doc: u32,
    namespaces: Option<&Namespaces>,
) -> Result<Option<XmlNode<'d>>, XmlError> {
    if ptr == 0 {
        return Ok(None);
    }
    let kind = raw::read_u32(ptr, node::TYPE, "type")?;
    let base = NodeRef::new(ptr, doc, namespaces);
    let wrapped = match kind {
        tag::ELEMENT => XmlNode::Element(XmlElement::from_base(base)),
        tag::ATTRIBUTE => XmlNode::Attribute(XmlAttribute { base }),
        tag::TEXT => XmlNode::Text(XmlText { base }),
        tag::CDATA => XmlNode::CData(XmlCData { base }),
        tag::COMMENT => XmlNode::Comment(XmlComment { base }),
        other => return Err(XmlError::UnsupportedNodeType(other)),
    };
    Ok(Some(wrapped))
}

/// The closed set of node kinds this crate exposes.
#[derive(Debug, Clone)]
pub enum XmlNode<'d> {
    Element(XmlElement<'d>),
    Attribute(XmlAttribute<'d>),
    Text(XmlText<'d>),
    CData(XmlCData<'d>),
    Comment(XmlComment<'d>),
}

impl<'d> XmlNode<'d> {
    pub fn as_element(&self) -> Option<&XmlElement<'d>> {
        match self {
            XmlNode::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn into_element(self) -> Option<XmlElement<'d>> {
        match self {
            XmlNode::Element(element) => Some(element),
            _ => None,
        }
    }

    /// String value of whichever kind this is.
    pub fn content(&self) -> Result<String, XmlError> {
        self.base().content()
    }

    pub fn line(&self) -> Result<u32, XmlError> {
        self.base().line()
    }

    fn base(&self) -> &NodeRef<'d> {
        match self {
            XmlNode::Element(n) => &n.base,
            XmlNode::Attribute(n) => &n.base,
            XmlNode::Text(n) => &n.base,
            XmlNode::CData(n) => &n.base,
            XmlNode::Comment(n) => &n.base,
        }
    }
}

// ============================================================================
// Element
// ============================================================================

/// An element node with lazy child lookup by name.
#[derive(Debug, Clone)]
pub struct XmlElement<'d> {
    base: NodeRef<'d>,
    /// Name index over element children, built on first `find`. It does not
    /// see tree mutations made after it was built.
    index: RefCell<Option<HashMap<String, Vec<u32>>>>,
}

impl<'d> XmlElement<'d> {
    fn from_base(base: NodeRef<'d>) -> Self {
        XmlElement {
            base,
            index: RefCell::new(None),
        }
    }

    pub(crate) fn from_parts(ptr: u32, doc: u32, namespaces: Option<&Namespaces>) -> Self {
        XmlElement::from_base(NodeRef::new(ptr, doc, namespaces))
    }

    pub(crate) fn require_ptr(&self) -> Result<u32, XmlError> {
        self.base.require()
    }

    pub(crate) fn doc_ptr(&self) -> u32 {
        self.base.doc
    }

    pub(crate) fn namespaces(&self) -> Option<&Namespaces> {
        self.base.namespaces.as_ref()
    }

    /// Qualified name, `prefix:local` when a namespace with a prefix applies.
    pub fn name(&self) -> Result<String, XmlError> {
        qualified_name(self.base.require()?)
    }

    pub fn local_name(&self) -> Result<String, XmlError> {
        raw::read_string(self.base.require()?, node::NAME, "name")
    }

    pub fn prefix(&self) -> Result<Option<String>, XmlError> {
        let ns_ptr = raw::read_u32(self.base.require()?, node::NS, "ns")?;
        if ns_ptr == 0 {
            return Ok(None);
        }
        raw::read_opt_string(ns_ptr, ns::PREFIX, "prefix")
    }

    pub fn namespace_uri(&self) -> Result<Option<String>, XmlError> {
        let ns_ptr = raw::read_u32(self.base.require()?, node::NS, "ns")?;
        if ns_ptr == 0 {
            return Ok(None);
        }
        raw::read_opt_string(ns_ptr, ns::HREF, "href")
    }

    /// Concatenated text of the subtree.
    pub fn content(&self) -> Result<String, XmlError> {
        self.base.content()
    }

    pub fn line(&self) -> Result<u32, XmlError> {
        self.base.line()
    }

    pub fn parent(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.parent()
    }

    pub fn next(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.next()
    }

    pub fn prev(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.prev()
    }

    pub fn first_child(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        let ptr = self.base.require()?;
        let child = raw::read_u32(ptr, node::CHILDREN, "children")?;
        make_node(child, self.base.doc, self.base.namespaces.as_ref())
    }

    /// Every child in document order, whatever its kind.
    pub fn children(&self) -> Result<Vec<XmlNode<'d>>, XmlError> {
        let ptr = self.base.require()?;
        let mut out = Vec::new();
        let mut child = raw::read_u32(ptr, node::CHILDREN, "children")?;
        while child != 0 {
            if let Some(wrapped) = make_node(child, self.base.doc, self.base.namespaces.as_ref())? {
                out.push(wrapped);
            }
            child = raw::read_u32(child, node::NEXT, "next")?;
        }
        Ok(out)
    }

    /// Element children only, in document order.
    pub fn element_children(&self) -> Result<Vec<XmlElement<'d>>, XmlError> {
        let ptr = self.base.require()?;
        let mut out = Vec::new();
        let mut child = raw::read_u32(ptr, node::CHILDREN, "children")?;
        while child != 0 {
            if raw::read_u32(child, node::TYPE, "type")? == tag::ELEMENT {
                out.push(XmlElement::from_parts(
                    child,
                    self.base.doc,
                    self.base.namespaces.as_ref(),
                ));
            }
            child = raw::read_u32(child, node::NEXT, "next")?;
        }
        Ok(out)
    }

    /// All attributes in declaration order.
    pub fn attrs(&self) -> Result<Vec<XmlAttribute<'d>>, XmlError> {
        let ptr = self.base.require()?;
        let mut out = Vec::new();
        let mut attr = raw::read_u32(ptr, node::PROPERTIES, "properties")?;
        while attr != 0 {
            out.push(XmlAttribute {
                base: NodeRef::new(attr, self.base.doc, self.base.namespaces.as_ref()),
            });
            attr = raw::read_u32(attr, node::NEXT, "next")?;
        }
        Ok(out)
    }

    /// All element children whose qualified name is `name`, via the lazy
    /// name index.
    pub fn find(&self, name: &str) -> Result<Vec<XmlElement<'d>>, XmlError> {
        self.ensure_index()?;
        let borrow = self.index.borrow();
        let Some(index) = borrow.as_ref() else {
            return Ok(Vec::new());
        };
        let ptrs = index.get(name).cloned().unwrap_or_default();
        Ok(ptrs
            .into_iter()
            .map(|ptr| XmlElement::from_parts(ptr, self.base.doc, self.base.namespaces.as_ref()))
            .collect())
    }

    /// First element child named `name`.
    pub fn get(&self, name: &str) -> Result<Option<XmlElement<'d>>, XmlError> {
        Ok(self.find(name)?.into_iter().next())
    }

    fn ensure_index(&self) -> Result<(), XmlError> {
        if self.index.borrow().is_some() {
            return Ok(());
        }
        let mut built: HashMap<String, Vec<u32>> = HashMap::new();
        let ptr = self.base.require()?;
        let mut child = raw::read_u32(ptr, node::CHILDREN, "children")?;
        while child != 0 {
            if raw::read_u32(child, node::TYPE, "type")? == tag::ELEMENT {
                built.entry(qualified_name(child)?).or_default().push(child);
            }
            child = raw::read_u32(child, node::NEXT, "next")?;
        }
        tracing::trace!(entries = built.len(), "built child name index");
        self.index.replace(Some(built));
        Ok(())
    }

    /// Attribute lookup by local name. A prefix is resolved against the
    /// declarations in scope on this element; with no prefix only attributes
    /// outside any namespace match.
    pub fn attr(
        &self,
        name: &str,
        prefix: Option<&str>,
    ) -> Result<Option<XmlAttribute<'d>>, XmlError> {
        let ptr = self.base.require()?;
        let href = match prefix {
            Some(p) => {
                let ns_ptr = engine::search_ns(self.base.doc, ptr, Some(p));
                if ns_ptr == 0 {
                    return Ok(None);
                }
                raw::read_opt_string(ns_ptr, ns::HREF, "href")?
            }
            None => None,
        };
        let mut attr = raw::read_u32(ptr, node::PROPERTIES, "properties")?;
        while attr != 0 {
            if raw::read_string(attr, node::NAME, "name")? == name {
                let attr_ns = raw::read_u32(attr, node::NS, "ns")?;
                let attr_href = if attr_ns == 0 {
                    None
                } else {
                    raw::read_opt_string(attr_ns, ns::HREF, "href")?
                };
                if attr_href == href {
                    return Ok(Some(XmlAttribute {
                        base: NodeRef::new(attr, self.base.doc, self.base.namespaces.as_ref()),
                    }));
                }
            }
            attr = raw::read_u32(attr, node::NEXT, "next")?;
        }
        Ok(None)
    }

    /// Unlink this element and free its subtree. The wrapper zeroes; clones
    /// pointing at the freed subtree fail their next access.
    pub fn remove(&mut self) -> Result<(), XmlError> {
        self.index.replace(None);
        self.base.remove()
    }
}

// ============================================================================
// Attribute
// ============================================================================

/// An attribute node. Attributes never report siblings or children.
#[derive(Debug, Clone)]
pub struct XmlAttribute<'d> {
    base: NodeRef<'d>,
}

impl<'d> XmlAttribute<'d> {
    /// Local name.
    pub fn name(&self) -> Result<String, XmlError> {
        raw::read_string(self.base.require()?, node::NAME, "name")
    }

    /// Concatenated value text.
    pub fn value(&self) -> Result<String, XmlError> {
        self.base.content()
    }

    pub fn prefix(&self) -> Result<Option<String>, XmlError> {
        let ns_ptr = raw::read_u32(self.base.require()?, node::NS, "ns")?;
        if ns_ptr == 0 {
            return Ok(None);
        }
        raw::read_opt_string(ns_ptr, ns::PREFIX, "prefix")
    }

    pub fn namespace_uri(&self) -> Result<Option<String>, XmlError> {
        let ns_ptr = raw::read_u32(self.base.require()?, node::NS, "ns")?;
        if ns_ptr == 0 {
            return Ok(None);
        }
        raw::read_opt_string(ns_ptr, ns::HREF, "href")
    }

    pub fn line(&self) -> Result<u32, XmlError> {
        self.base.line()
    }

    /// Owning element.
    pub fn parent(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.parent()
    }

    pub fn next(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.require()?;
        Ok(None)
    }

    pub fn prev(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.require()?;
        Ok(None)
    }

    pub fn first_child(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.require()?;
        Ok(None)
    }

    /// Remove through the engine's attribute entry point, which refuses
    /// pointers that are not attributes.
    pub fn remove(&mut self) -> Result<(), XmlError> {
        let ptr = self.base.require()?;
        if engine::remove_prop(ptr) != 0 {
            let name = raw::read_string(ptr, node::NAME, "name").unwrap_or_default();
            return Err(XmlError::RemoveAttribute { name });
        }
        self.base.ptr = 0;
        Ok(())
    }
}

// ============================================================================
// Text, CData, Comment
// ============================================================================

#[derive(Debug, Clone)]
pub struct XmlText<'d> {
    base: NodeRef<'d>,
}

impl<'d> XmlText<'d> {
    pub fn content(&self) -> Result<String, XmlError> {
        self.base.content()
    }

    pub fn line(&self) -> Result<u32, XmlError> {
        self.base.line()
    }

    pub fn parent(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.parent()
    }

    pub fn next(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.next()
    }

    pub fn prev(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.prev()
    }

    pub fn remove(&mut self) -> Result<(), XmlError> {
        self.base.remove()
    }
}

#[derive(Debug, Clone)]
pub struct XmlCData<'d> {
    base: NodeRef<'d>,
}

impl<'d> XmlCData<'d> {
    pub fn content(&self) -> Result<String, XmlError> {
        self.base.content()
    }

    pub fn line(&self) -> Result<u32, XmlError> {
        self.base.line()
    }

    pub fn parent(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.parent()
    }

    pub fn next(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.next()
    }

    pub fn prev(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.prev()
    }

    pub fn remove(&mut self) -> Result<(), XmlError> {
        self.base.remove()
    }
}

#[derive(Debug, Clone)]
pub struct XmlComment<'d> {
    base: NodeRef<'d>,
}

impl<'d> XmlComment<'d> {
    pub fn content(&self) -> Result<String, XmlError> {
        self.base.content()
    }

    pub fn line(&self) -> Result<u32, XmlError> {
        self.base.line()
    }

    pub fn parent(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.parent()
    }

    pub fn next(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.next()
    }

    pub fn prev(&self) -> Result<Option<XmlNode<'d>>, XmlError> {
        self.base.prev()
    }

    pub fn remove(&mut self) -> Result<(), XmlError> {
        self.base.remove()
    }
}
