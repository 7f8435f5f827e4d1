//! Arena tree operations
//!
//! Every tree structure lives in the arena as the structs described in
//! `layout`; the functions here are the only code that writes those fields.
//! Nodes are linked the classic way: first/last child on the parent plus
//! prev/next on each sibling, with attributes on their own chain off the
//! owning element.

use super::layout::{doc, node, ns, tag, NS_DECL, XML_NS};
use super::mem::Arena;

// ============================================================================
// Field access
// ============================================================================

#[inline]
pub fn get(mem: &Arena, base: u32, field: u32) -> u32 {
    mem.read_u32(base + field)
}

#[inline]
pub fn set(mem: &mut Arena, base: u32, field: u32, value: u32) {
    mem.write_u32(base + field, value)
}

#[inline]
pub fn node_type(mem: &Arena, n: u32) -> u32 {
    get(mem, n, node::TYPE)
}

/// Local name bytes, or None when the node carries no name.
pub fn name_bytes(mem: &Arena, n: u32) -> Option<&[u8]> {
    match get(mem, n, node::NAME) {
        0 => None,
        p => Some(mem.cstr_bytes(p)),
    }
}

pub fn content_bytes(mem: &Arena, n: u32) -> Option<&[u8]> {
    match get(mem, n, node::CONTENT) {
        0 => None,
        p => Some(mem.cstr_bytes(p)),
    }
}

pub fn ns_prefix_bytes(mem: &Arena, ns_ptr: u32) -> Option<&[u8]> {
    match get(mem, ns_ptr, ns::PREFIX) {
        0 => None,
        p => Some(mem.cstr_bytes(p)),
    }
}

pub fn ns_href_bytes(mem: &Arena, ns_ptr: u32) -> Option<&[u8]> {
    match get(mem, ns_ptr, ns::HREF) {
        0 => None,
        p => Some(mem.cstr_bytes(p)),
    }
}

/// Qualified name (`prefix:local` when the node is bound to a prefixed
/// namespace), used by the XPath name() function.
pub fn qualified_name(mem: &Arena, n: u32) -> String {
    let local = name_bytes(mem, n)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    let ns_ptr = get(mem, n, node::NS);
    if ns_ptr != 0 {
        if let Some(prefix) = ns_prefix_bytes(mem, ns_ptr) {
            return format!("{}:{}", String::from_utf8_lossy(prefix), local);
        }
    }
    local
}

// ============================================================================
// Construction
// ============================================================================

/// Allocate a document struct. The reserved `xml` namespace is created along
/// with it and stashed in the private slot for `search_ns`.
pub fn new_doc(mem: &mut Arena, url: Option<&str>) -> u32 {
    let d = mem.malloc_zeroed(doc::SIZE);
    set(mem, d, node::TYPE, tag::DOCUMENT);
    set(mem, d, node::DOC, d);
    if let Some(url) = url {
        let p = mem.alloc_cstr(url);
        set(mem, d, doc::URL, p);
    }
    let xml_ns = new_ns(mem, Some("xml"), XML_NS);
    set(mem, d, node::PRIVATE, xml_ns);
    d
}

pub fn new_node(mem: &mut Arena, node_tag: u32, owner_doc: u32) -> u32 {
    let n = mem.malloc_zeroed(node::SIZE);
    set(mem, n, node::TYPE, node_tag);
    set(mem, n, node::DOC, owner_doc);
    n
}

pub fn new_ns(mem: &mut Arena, prefix: Option<&str>, href: &str) -> u32 {
    let s = mem.malloc_zeroed(ns::SIZE);
    set(mem, s, ns::TYPE, NS_DECL);
    let href_ptr = mem.alloc_cstr(href);
    set(mem, s, ns::HREF, href_ptr);
    if let Some(prefix) = prefix {
        let prefix_ptr = mem.alloc_cstr(prefix);
        set(mem, s, ns::PREFIX, prefix_ptr);
    }
    s
}

pub fn set_name(mem: &mut Arena, n: u32, name: &str) {
    let p = mem.alloc_cstr(name);
    set(mem, n, node::NAME, p);
}

pub fn set_content(mem: &mut Arena, n: u32, content: &str) {
    let p = mem.alloc_cstr(content);
    set(mem, n, node::CONTENT, p);
}

// ============================================================================
// Linking
// ============================================================================

/// Append `child` as the last child of `parent`.
pub fn append_child(mem: &mut Arena, parent: u32, child: u32) {
    set(mem, child, node::PARENT, parent);
    let last = get(mem, parent, node::LAST);
    if last == 0 {
        set(mem, parent, node::CHILDREN, child);
    } else {
        set(mem, last, node::NEXT, child);
        set(mem, child, node::PREV, last);
    }
    set(mem, parent, node::LAST, child);
}

/// Append `attr` to the attribute chain of `element`.
pub fn append_attr(mem: &mut Arena, element: u32, attr: u32) {
    set(mem, attr, node::PARENT, element);
    let head = get(mem, element, node::PROPERTIES);
    if head == 0 {
        set(mem, element, node::PROPERTIES, attr);
    } else {
        let mut cur = head;
        loop {
            let next = get(mem, cur, node::NEXT);
            if next == 0 {
                break;
            }
            cur = next;
        }
        set(mem, cur, node::NEXT, attr);
        set(mem, attr, node::PREV, cur);
    }
}

/// Append a namespace declaration to `element`.
pub fn add_ns_def(mem: &mut Arena, element: u32, ns_ptr: u32) {
    let head = get(mem, element, node::NS_DEF);
    if head == 0 {
        set(mem, element, node::NS_DEF, ns_ptr);
        return;
    }
    let mut cur = head;
    loop {
        let next = get(mem, cur, ns::NEXT);
        if next == 0 {
            break;
        }
        cur = next;
    }
    set(mem, cur, ns::NEXT, ns_ptr);
}

/// Insert `n` into the tree immediately before `anchor`.
pub fn insert_before(mem: &mut Arena, anchor: u32, n: u32) {
    let parent = get(mem, anchor, node::PARENT);
    let prev = get(mem, anchor, node::PREV);
    set(mem, n, node::PARENT, parent);
    set(mem, n, node::DOC, get(mem, anchor, node::DOC));
    set(mem, n, node::PREV, prev);
    set(mem, n, node::NEXT, anchor);
    set(mem, anchor, node::PREV, n);
    if prev == 0 {
        if parent != 0 {
            set(mem, parent, node::CHILDREN, n);
        }
    } else {
        set(mem, prev, node::NEXT, n);
    }
}

/// Detach `n` from its parent and siblings. The node and its subtree stay
/// allocated; freeing is a separate step.
pub fn unlink(mem: &mut Arena, n: u32) {
    let parent = get(mem, n, node::PARENT);
    let prev = get(mem, n, node::PREV);
    let next = get(mem, n, node::NEXT);
    let is_attr = node_type(mem, n) == tag::ATTRIBUTE;

    if prev != 0 {
        set(mem, prev, node::NEXT, next);
    } else if parent != 0 {
        if is_attr {
            set(mem, parent, node::PROPERTIES, next);
        } else {
            set(mem, parent, node::CHILDREN, next);
        }
    }
    if next != 0 {
        set(mem, next, node::PREV, prev);
    } else if parent != 0 && !is_attr {
        set(mem, parent, node::LAST, prev);
    }

    set(mem, n, node::PARENT, 0);
    set(mem, n, node::PREV, 0);
    set(mem, n, node::NEXT, 0);
}

// ============================================================================
// Freeing
// ============================================================================

/// Free `n` and everything it owns: names, contents, namespace declarations,
/// attributes, children, and for documents the URL and the reserved `xml`
/// namespace. Iterative so deep trees cannot overflow the stack.
pub fn free_subtree(mem: &mut Arena, n: u32) {
    let mut stack = vec![n];
    let mut nodes = Vec::new();
    while let Some(cur) = stack.pop() {
        nodes.push(cur);
        let mut child = get(mem, cur, node::CHILDREN);
        while child != 0 {
            stack.push(child);
            child = get(mem, child, node::NEXT);
        }
        let mut attr = get(mem, cur, node::PROPERTIES);
        while attr != 0 {
            stack.push(attr);
            attr = get(mem, attr, node::NEXT);
        }
    }

    tracing::trace!(root = n, count = nodes.len(), "freeing subtree");
    for cur in nodes {
        free_ns_chain(mem, get(mem, cur, node::NS_DEF));
        mem.free(get(mem, cur, node::NAME));
        mem.free(get(mem, cur, node::CONTENT));
        if node_type(mem, cur) == tag::DOCUMENT {
            mem.free(get(mem, cur, doc::URL));
            free_one_ns(mem, get(mem, cur, node::PRIVATE));
        }
        mem.free(cur);
    }
}

fn free_ns_chain(mem: &mut Arena, head: u32) {
    let mut cur = head;
    while cur != 0 {
        let next = get(mem, cur, ns::NEXT);
        free_one_ns(mem, cur);
        cur = next;
    }
}

fn free_one_ns(mem: &mut Arena, ns_ptr: u32) {
    if ns_ptr == 0 {
        return;
    }
    mem.free(get(mem, ns_ptr, ns::HREF));
    mem.free(get(mem, ns_ptr, ns::PREFIX));
    mem.free(ns_ptr);
}

// ============================================================================
// Lookup
// ============================================================================

/// Resolve a namespace prefix against the declarations in scope at `n`,
/// walking the ancestor chain. `None` looks for the default namespace. The
/// reserved `xml` prefix always resolves through the document.
pub fn search_ns(mem: &Arena, owner_doc: u32, n: u32, prefix: Option<&[u8]>) -> u32 {
    if prefix == Some(b"xml") {
        return get(mem, owner_doc, node::PRIVATE);
    }
    let mut cur = n;
    while cur != 0 && node_type(mem, cur) != tag::DOCUMENT {
        if node_type(mem, cur) == tag::ELEMENT {
            let mut d = get(mem, cur, node::NS_DEF);
            while d != 0 {
                if ns_prefix_bytes(mem, d) == prefix {
                    return d;
                }
                d = get(mem, d, ns::NEXT);
            }
        }
        cur = get(mem, cur, node::PARENT);
    }
    0
}

/// Find an attribute of `element` by local name and namespace URI. `None`
/// matches only attributes without a namespace.
pub fn find_attr(mem: &Arena, element: u32, name: &[u8], href: Option<&[u8]>) -> u32 {
    let mut attr = get(mem, element, node::PROPERTIES);
    while attr != 0 {
        if name_bytes(mem, attr) == Some(name) {
            let attr_ns = get(mem, attr, node::NS);
            let attr_href = if attr_ns == 0 {
                None
            } else {
                ns_href_bytes(mem, attr_ns)
            };
            if attr_href == href {
                return attr;
            }
        }
        attr = get(mem, attr, node::NEXT);
    }
    0
}

/// Attribute value by local name, ignoring namespaces. Used by the engine
/// itself (inclusion processing, XPath shortcuts).
pub fn attr_value(mem: &Arena, element: u32, name: &[u8]) -> Option<String> {
    let mut attr = get(mem, element, node::PROPERTIES);
    while attr != 0 {
        if name_bytes(mem, attr) == Some(name) {
            return Some(string_value(mem, attr));
        }
        attr = get(mem, attr, node::NEXT);
    }
    None
}

/// First element child of the document struct.
pub fn doc_root_element(mem: &Arena, d: u32) -> u32 {
    let mut cur = get(mem, d, node::CHILDREN);
    while cur != 0 {
        if node_type(mem, cur) == tag::ELEMENT {
            return cur;
        }
        cur = get(mem, cur, node::NEXT);
    }
    0
}

// ============================================================================
// String value
// ============================================================================

/// XPath string-value of a node: text payload for leaves, concatenated
/// descendant text for elements and documents, value text for attributes.
pub fn string_value(mem: &Arena, n: u32) -> String {
    match node_type(mem, n) {
        tag::TEXT | tag::CDATA | tag::COMMENT => content_bytes(mem, n)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default(),
        tag::ELEMENT | tag::DOCUMENT | tag::ATTRIBUTE => {
            let mut out = String::new();
            collect_text(mem, n, &mut out);
            out
        }
        _ => String::new(),
    }
}

fn collect_text(mem: &Arena, n: u32, out: &mut String) {
    let mut stack = Vec::new();
    let mut child = get(mem, n, node::LAST);
    while child != 0 {
        stack.push(child);
        child = get(mem, child, node::PREV);
    }
    while let Some(cur) = stack.pop() {
        match node_type(mem, cur) {
            tag::TEXT | tag::CDATA => {
                if let Some(b) = content_bytes(mem, cur) {
                    out.push_str(&String::from_utf8_lossy(b));
                }
            }
            tag::ELEMENT => {
                let mut child = get(mem, cur, node::LAST);
                while child != 0 {
                    stack.push(child);
                    child = get(mem, child, node::PREV);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_child(mem: &mut Arena, parent: u32, d: u32, s: &str) -> u32 {
        let t = new_node(mem, tag::TEXT, d);
        set_content(mem, t, s);
        append_child(mem, parent, t);
        t
    }

    #[test]
    fn test_linking_and_unlink() {
        let mut mem = Arena::new();
        let d = new_doc(&mut mem, None);
        let root = new_node(&mut mem, tag::ELEMENT, d);
        set_name(&mut mem, root, "root");
        append_child(&mut mem, d, root);

        let a = new_node(&mut mem, tag::ELEMENT, d);
        let b = new_node(&mut mem, tag::ELEMENT, d);
        let c = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, root, a);
        append_child(&mut mem, root, b);
        append_child(&mut mem, root, c);

        assert_eq!(get(&mem, root, node::CHILDREN), a);
        assert_eq!(get(&mem, root, node::LAST), c);
        assert_eq!(get(&mem, b, node::PREV), a);
        assert_eq!(get(&mem, b, node::NEXT), c);

        unlink(&mut mem, b);
        assert_eq!(get(&mem, a, node::NEXT), c);
        assert_eq!(get(&mem, c, node::PREV), a);
        assert_eq!(get(&mem, b, node::PARENT), 0);

        unlink(&mut mem, a);
        assert_eq!(get(&mem, root, node::CHILDREN), c);
        unlink(&mut mem, c);
        assert_eq!(get(&mem, root, node::CHILDREN), 0);
        assert_eq!(get(&mem, root, node::LAST), 0);
    }

    #[test]
    fn test_insert_before() {
        let mut mem = Arena::new();
        let d = new_doc(&mut mem, None);
        let root = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, d, root);
        let b = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, root, b);

        let a = new_node(&mut mem, tag::ELEMENT, d);
        insert_before(&mut mem, b, a);
        assert_eq!(get(&mem, root, node::CHILDREN), a);
        assert_eq!(get(&mem, a, node::NEXT), b);
        assert_eq!(get(&mem, b, node::PREV), a);
    }

    #[test]
    fn test_string_value_concatenates() {
        let mut mem = Arena::new();
        let d = new_doc(&mut mem, None);
        let root = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, d, root);
        text_child(&mut mem, root, d, "one ");
        let inner = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, root, inner);
        text_child(&mut mem, inner, d, "two");
        let comment = new_node(&mut mem, tag::COMMENT, d);
        set_content(&mut mem, comment, "noise");
        append_child(&mut mem, root, comment);
        text_child(&mut mem, root, d, " three");

        assert_eq!(string_value(&mem, root), "one two three");
        assert_eq!(string_value(&mem, d), "one two three");
    }

    #[test]
    fn test_search_ns() {
        let mut mem = Arena::new();
        let d = new_doc(&mut mem, None);
        let root = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, d, root);
        let decl = new_ns(&mut mem, Some("p"), "urn:one");
        add_ns_def(&mut mem, root, decl);
        let dflt = new_ns(&mut mem, None, "urn:dflt");
        add_ns_def(&mut mem, root, dflt);
        let child = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, root, child);

        assert_eq!(search_ns(&mem, d, child, Some(b"p")), decl);
        assert_eq!(search_ns(&mem, d, child, None), dflt);
        assert_eq!(search_ns(&mem, d, child, Some(b"q")), 0);
        let xml = search_ns(&mem, d, child, Some(b"xml"));
        assert_ne!(xml, 0);
        assert_eq!(ns_href_bytes(&mem, xml), Some(XML_NS.as_bytes()));
    }

    #[test]
    fn test_find_attr_with_namespace() {
        let mut mem = Arena::new();
        let d = new_doc(&mut mem, None);
        let el = new_node(&mut mem, tag::ELEMENT, d);
        append_child(&mut mem, d, el);

        let plain = new_node(&mut mem, tag::ATTRIBUTE, d);
        set_name(&mut mem, plain, "id");
        text_child(&mut mem, plain, d, "1");
        append_attr(&mut mem, el, plain);

        let decl = new_ns(&mut mem, Some("p"), "urn:one");
        add_ns_def(&mut mem, el, decl);
        let prefixed = new_node(&mut mem, tag::ATTRIBUTE, d);
        set_name(&mut mem, prefixed, "id");
        set(&mut mem, prefixed, node::NS, decl);
        text_child(&mut mem, prefixed, d, "2");
        append_attr(&mut mem, el, prefixed);

        assert_eq!(find_attr(&mem, el, b"id", None), plain);
        assert_eq!(find_attr(&mem, el, b"id", Some(b"urn:one")), prefixed);
        assert_eq!(find_attr(&mem, el, b"id", Some(b"urn:other")), 0);
        assert_eq!(attr_value(&mem, el, b"id").as_deref(), Some("1"));
    }

    #[test]
    fn test_free_subtree_releases_everything() {
        let mut mem = Arena::new();
        let d = new_doc(&mut mem, Some("mem://a"));
        let root = new_node(&mut mem, tag::ELEMENT, d);
        set_name(&mut mem, root, "root");
        append_child(&mut mem, d, root);
        let decl = new_ns(&mut mem, Some("p"), "urn:one");
        add_ns_def(&mut mem, root, decl);
        let attr = new_node(&mut mem, tag::ATTRIBUTE, d);
        set_name(&mut mem, attr, "id");
        text_child(&mut mem, attr, d, "1");
        append_attr(&mut mem, root, attr);
        text_child(&mut mem, root, d, "payload");

        free_subtree(&mut mem, d);
        assert_eq!(mem.live_allocations(), 0);
    }
}
