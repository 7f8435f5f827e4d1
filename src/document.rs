//! Document aggregate
//!
//! Parsing and inclusion processing are one operation: the input either
//! becomes a fully substituted tree or an error carrying the collected
//! diagnostics. A failed include frees the half-built document before the
//! error is returned. The document owns its engine pointer through a
//! resource handle; disposal is explicit or at drop.

use std::cell::OnceCell;

use crate::engine;
use crate::engine::layout::{doc as doc_layout, ParseFlags};
use crate::error::{op_guard, CollectorScope, XmlError};
use crate::node::{Namespaces, XmlElement, XmlNode};
use crate::raw;
use crate::resource::ResourceHandle;
use crate::xpath::Query;

/// Parse-time settings.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub flags: ParseFlags,
    /// Base URL recorded on the document.
    pub url: Option<String>,
    /// Declared transport encoding. Anything but UTF-8 or ASCII draws a
    /// warning and the input is read as UTF-8 regardless.
    pub encoding: Option<String>,
}

/// An owned, parsed document.
pub struct XmlDocument {
    res: ResourceHandle,
    root: OnceCell<u32>,
}

impl XmlDocument {
    /// Parse `data`, then run inclusion processing over the tree.
    pub fn parse(data: impl AsRef<[u8]>, options: &ParseOptions) -> Result<XmlDocument, XmlError> {
        let data = data.as_ref();
        let _op = op_guard();

        let doc = {
            let scope = CollectorScope::begin();
            let ctxt = engine::parser_ctxt_new();
            let doc = engine::ctxt_read_memory(
                ctxt,
                data,
                options.url.as_deref(),
                options.encoding.as_deref(),
                options.flags.bits(),
            );
            engine::parser_ctxt_free(ctxt);
            if doc == 0 {
                return Err(XmlError::parse_failure(
                    "could not parse document",
                    scope.diagnostics(),
                ));
            }
            doc
        };
        tracing::debug!(doc, bytes = data.len(), "parsed document");

        {
            let scope = CollectorScope::begin();
            let ictxt = engine::xinclude_new_context(doc);
            let rc = engine::xinclude_process_node(ictxt, doc);
            engine::xinclude_free_context(ictxt);
            if rc < 0 {
                let details = scope.diagnostics();
                engine::free_doc(doc);
                return Err(XmlError::parse_failure(
                    "include substitution failed",
                    details,
                ));
            }
            if rc > 0 {
                tracing::debug!(doc, substituted = rc, "applied include substitutions");
            }
        }

        Ok(XmlDocument {
            res: ResourceHandle::acquire(doc, engine::free_doc),
            root: OnceCell::new(),
        })
    }

    /// Root element, looked up once and cached.
    pub fn root(&self) -> Option<XmlElement<'_>> {
        let ptr = *self
            .root
            .get_or_init(|| engine::doc_get_root_element(self.res.pointer()));
        if ptr == 0 {
            return None;
        }
        Some(XmlElement::from_parts(ptr, self.res.pointer(), None))
    }

    /// The base URL given at parse time.
    pub fn url(&self) -> Result<Option<String>, XmlError> {
        raw::read_opt_string(self.res.pointer(), doc_layout::URL, "url")
    }

    /// First match for `query` against the root element.
    pub fn xpath_get<'d, 'q>(
        &'d self,
        query: impl Into<Query<'q>>,
        namespaces: Option<&Namespaces>,
    ) -> Result<Option<XmlNode<'d>>, XmlError> {
        match self.root() {
            Some(root) => root.xpath_get(query, namespaces),
            None => Ok(None),
        }
    }

    /// Every match for `query` against the root element.
    pub fn xpath_find<'d, 'q>(
        &'d self,
        query: impl Into<Query<'q>>,
        namespaces: Option<&Namespaces>,
    ) -> Result<Vec<XmlNode<'d>>, XmlError> {
        match self.root() {
            Some(root) => root.xpath_find(query, namespaces),
            None => Ok(Vec::new()),
        }
    }

    /// Free the tree now instead of at drop.
    pub fn dispose(mut self) {
        self.res.release();
    }
}

impl std::fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlDocument")
            .field("ptr", &self.res.pointer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XI: &str = "http://www.w3.org/2001/XInclude";

    #[test]
    fn test_parse_and_root() {
        let _serial = crate::testutil::serial();
        let doc = XmlDocument::parse("<a><b>1</b></a>", &ParseOptions::default()).unwrap();
        let root = doc.root().unwrap();
        assert_eq!(root.name().unwrap(), "a");
        assert_eq!(root.content().unwrap(), "1");
    }

    #[test]
    fn test_parse_failure_reports_diagnostics() {
        let _serial = crate::testutil::serial();
        let err = XmlDocument::parse("<a><b></a>", &ParseOptions::default()).unwrap_err();
        let XmlError::Parse { message, details } = err else {
            panic!("expected a parse error");
        };
        assert!(message.starts_with("could not parse document"));
        assert!(message.contains("Opening and ending tag mismatch"));
        assert!(!details.is_empty());
        assert!(details.iter().all(|d| d.line >= 1));
    }

    #[test]
    fn test_parse_failure_leaves_no_allocations() {
        let _serial = crate::testutil::serial();
        let before = crate::engine::live_allocation_count();
        let result = XmlDocument::parse("<a><b></a>", &ParseOptions::default());
        assert!(result.is_err());
        assert_eq!(crate::engine::live_allocation_count(), before);
    }

    #[test]
    fn test_url_recorded() {
        let _serial = crate::testutil::serial();
        let options = ParseOptions {
            url: Some("memory://fixture.xml".to_string()),
            ..ParseOptions::default()
        };
        let doc = XmlDocument::parse("<a/>", &options).unwrap();
        assert_eq!(doc.url().unwrap().as_deref(), Some("memory://fixture.xml"));

        let bare = XmlDocument::parse("<a/>", &ParseOptions::default()).unwrap();
        assert_eq!(bare.url().unwrap(), None);
    }

    #[test]
    fn test_foreign_encoding_warns_but_parses() {
        let _serial = crate::testutil::serial();
        let options = ParseOptions {
            encoding: Some("latin1".to_string()),
            ..ParseOptions::default()
        };
        let doc = XmlDocument::parse("<a>ok</a>", &options).unwrap();
        assert_eq!(doc.root().unwrap().content().unwrap(), "ok");
    }

    #[test]
    fn test_recover_keeps_broken_document() {
        let _serial = crate::testutil::serial();
        let options = ParseOptions {
            flags: ParseFlags::default() | ParseFlags::RECOVER,
            ..ParseOptions::default()
        };
        let doc = XmlDocument::parse("<a><b>1</a>", &options).unwrap();
        let root = doc.root().unwrap();
        assert_eq!(root.name().unwrap(), "a");
        assert_eq!(root.element_children().unwrap().len(), 1);
    }

    #[test]
    fn test_noblanks_drops_formatting_text() {
        let _serial = crate::testutil::serial();
        let pretty = "<a>\n  <b/>\n  <b/>\n</a>";
        let doc = XmlDocument::parse(pretty, &ParseOptions::default()).unwrap();
        assert_eq!(doc.root().unwrap().children().unwrap().len(), 2);

        let verbatim = XmlDocument::parse(
            pretty,
            &ParseOptions {
                flags: ParseFlags::NO_XXE,
                ..ParseOptions::default()
            },
        )
        .unwrap();
        assert_eq!(verbatim.root().unwrap().children().unwrap().len(), 5);
    }

    #[test]
    fn test_nocdata_reads_back_as_text() {
        let _serial = crate::testutil::serial();
        let doc = XmlDocument::parse(
            "<a><![CDATA[raw]]></a>",
            &ParseOptions {
                flags: ParseFlags::default() | ParseFlags::NOCDATA,
                ..ParseOptions::default()
            },
        )
        .unwrap();
        let root = doc.root().unwrap();
        let children = root.children().unwrap();
        assert_eq!(children.len(), 1);
        assert!(matches!(children[0], XmlNode::Text(_)));
        assert_eq!(children[0].content().unwrap(), "raw");
    }

    #[test]
    fn test_include_fallback_substitution() {
        let _serial = crate::testutil::serial();
        let input = format!(
            "<a xmlns:xi=\"{XI}\"><xi:include href=\"missing.xml\">\
             <xi:fallback><b>backup</b></xi:fallback></xi:include></a>"
        );
        let doc = XmlDocument::parse(&input, &ParseOptions::default()).unwrap();
        let root = doc.root().unwrap();
        let b = root.get("b").unwrap().unwrap();
        assert_eq!(b.content().unwrap(), "backup");
        assert!(root.find("xi:include").unwrap().is_empty());
    }

    #[test]
    fn test_include_without_fallback_fails_and_frees() {
        let _serial = crate::testutil::serial();
        let before = crate::engine::live_allocation_count();
        let input = format!(
            "<a xmlns:xi=\"{XI}\"><xi:include href=\"missing.xml\"/></a>"
        );
        let err = XmlDocument::parse(&input, &ParseOptions::default()).unwrap_err();
        let XmlError::Parse { message, details } = err else {
            panic!("expected a parse error");
        };
        assert!(message.starts_with("include substitution failed"));
        assert!(!details.is_empty());
        assert_eq!(crate::engine::live_allocation_count(), before);
    }

    #[test]
    fn test_xpath_forwarding() {
        let _serial = crate::testutil::serial();
        let doc = XmlDocument::parse("<a><b>1</b><b>2</b></a>", &ParseOptions::default()).unwrap();
        let second = doc.xpath_get("/a/b[2]", None).unwrap().unwrap();
        assert_eq!(second.content().unwrap(), "2");
        assert!(doc.xpath_get("/a/c", None).unwrap().is_none());
        assert_eq!(doc.xpath_find("//b", None).unwrap().len(), 2);
    }

    #[test]
    fn test_dispose_releases_the_tree() {
        let _serial = crate::testutil::serial();
        let before = crate::engine::live_allocation_count();
        let doc = XmlDocument::parse("<a><b>1</b></a>", &ParseOptions::default()).unwrap();
        assert!(crate::engine::live_allocation_count() > before);
        doc.dispose();
        assert_eq!(crate::engine::live_allocation_count(), before);
    }

    #[test]
    fn test_drop_releases_the_tree() {
        let _serial = crate::testutil::serial();
        let before = crate::engine::live_allocation_count();
        {
            let _doc = XmlDocument::parse("<a/>", &ParseOptions::default()).unwrap();
        }
        assert_eq!(crate::engine::live_allocation_count(), before);
    }
}
