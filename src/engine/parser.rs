//! Streaming XML parser
//!
//! Builds arena trees from raw bytes in a single forward pass:
//! - explicit element stack, no recursion, so nesting depth is bounded by
//!   the configured limit and not by the thread stack
//! - namespace declarations are resolved while the tree is built
//! - structural errors become diagnostics; strict mode frees the partial
//!   document and reports failure, recovery mode keeps what parsed

use memchr::{memchr, memmem};

use super::entities::{decode, EntityTable};
use super::layout::{level, node, tag, ParseFlags, MAX_DEPTH, MAX_DEPTH_HUGE};
use super::mem::Arena;
use super::scanner::{is_all_whitespace, is_name_start_byte, Scanner};
use super::tree;

/// One parser or inclusion diagnostic, positioned in the source text.
#[derive(Debug, Clone)]
pub struct Diag {
    pub message: String,
    pub line: u32,
    pub col: u32,
    pub level: u32,
}

/// Parse `input` into a new document tree.
///
/// Returns the document pointer and the collected diagnostics. The pointer
/// is 0 when the input is not well formed and recovery was not requested;
/// any partial tree has been freed by then.
pub fn parse(mem: &mut Arena, input: &[u8], url: Option<&str>, opts: ParseFlags) -> (u32, Vec<Diag>) {
    let doc = tree::new_doc(mem, url);
    let mut parser = Parser {
        scan: Scanner::new(input),
        input,
        mem,
        opts,
        doc,
        entities: EntityTable::default(),
        diags: Vec::new(),
        well_formed: true,
    };
    if is_all_whitespace(input) {
        parser.record(0, "Document is empty".to_string(), level::FATAL);
        parser.well_formed = false;
    } else {
        let _ = parser.run();
    }
    let well_formed = parser.well_formed;
    let diags = parser.diags;
    if well_formed || opts.contains(ParseFlags::RECOVER) {
        tracing::debug!(doc, diagnostics = diags.len(), "document parsed");
        (doc, diags)
    } else {
        tree::free_subtree(mem, doc);
        (0, diags)
    }
}

/// Outcome of a start tag: still open, closed by `/>`, or cut off by EOF.
enum TagEnd {
    Open,
    SelfClose,
    Truncated,
}

/// Element stack entry: node pointer, qualified name, opening line.
type OpenTag = (u32, String, u32);

type Step = Result<(), ()>;

struct Parser<'a> {
    scan: Scanner<'a>,
    input: &'a [u8],
    mem: &'a mut Arena,
    opts: ParseFlags,
    doc: u32,
    entities: EntityTable,
    diags: Vec<Diag>,
    well_formed: bool,
}

impl<'a> Parser<'a> {
    fn record(&mut self, pos: usize, message: String, lvl: u32) {
        let (line, col) = self.scan.line_col(pos);
        tracing::trace!(line, col, lvl, "{message}");
        self.diags.push(Diag { message, line, col, level: lvl });
    }

    /// Report a well-formedness violation. In strict mode this aborts the
    /// parse; with RECOVER the caller continues best-effort.
    fn fail(&mut self, pos: usize, message: String) -> Step {
        self.record(pos, message, level::FATAL);
        self.well_formed = false;
        if self.opts.contains(ParseFlags::RECOVER) {
            Ok(())
        } else {
            Err(())
        }
    }

    fn run(&mut self) -> Step {
        self.scan.eat(b"\xEF\xBB\xBF");
        if self.scan.starts_with(b"<?xml")
            && matches!(self.scan.peek_at(5), Some(b' ' | b'\t' | b'\r' | b'\n' | b'?'))
        {
            self.parse_xml_decl()?;
        }
        self.parse_misc(true)?;

        let pos = self.scan.position();
        let at_start_tag = matches!(self.scan.peek(), Some(b'<'))
            && self.scan.peek_at(1).is_some_and(is_name_start_byte);
        if !at_start_tag {
            return self.fail(pos, "Start tag expected, '<' not found".to_string());
        }
        self.parse_tree()?;

        self.parse_misc(false)?;
        if !self.scan.is_eof() {
            let pos = self.scan.position();
            self.fail(pos, "Extra content at the end of the document".to_string())?;
        }
        Ok(())
    }

    // ========================================================================
    // Prolog and misc
    // ========================================================================

    fn parse_xml_decl(&mut self) -> Step {
        let start = self.scan.position();
        self.scan.advance(5);
        let Some(end) = self.scan.find_sub(b"?>") else {
            return self.fail(start, "parsing XML declaration: '?>' expected".to_string());
        };
        let body = self.scan.slice(start, end);
        if memmem::find(body, b"version").is_none() {
            self.fail(start, "Malformed declaration expecting version".to_string())?;
        }
        if !self.opts.contains(ParseFlags::IGNORE_ENC) {
            if let Some(enc) = declared_encoding(body) {
                if !matches!(
                    enc.to_ascii_lowercase().as_str(),
                    "utf-8" | "utf8" | "us-ascii" | "ascii"
                ) {
                    self.record(start, format!("Unsupported encoding {enc}"), level::WARNING);
                }
            }
        }
        let n = end + 2 - self.scan.position();
        self.scan.advance(n);
        Ok(())
    }

    /// Comments, processing instructions and (in the prolog) the DOCTYPE.
    /// Stops at the first construct that is none of those.
    fn parse_misc(&mut self, prolog: bool) -> Step {
        loop {
            self.scan.skip_whitespace();
            if self.scan.eat(b"<!--") {
                self.parse_comment(self.doc)?;
            } else if prolog && self.scan.starts_with(b"<!DOCTYPE") {
                self.parse_doctype()?;
            } else if self.scan.starts_with(b"<?") {
                self.parse_pi()?;
            } else {
                return Ok(());
            }
        }
    }

    fn parse_doctype(&mut self) -> Step {
        let start = self.scan.position();
        self.scan.advance(9);
        if self.scan.skip_whitespace() == 0 {
            self.fail(start, "Space required after 'DOCTYPE'".to_string())?;
        }
        let _name = self.scan.read_name();
        loop {
            self.scan.skip_whitespace();
            match self.scan.peek() {
                None => return self.fail(start, "DOCTYPE improperly terminated".to_string()),
                Some(b'>') => {
                    self.scan.advance(1);
                    return Ok(());
                }
                Some(b'[') => {
                    self.scan.advance(1);
                    self.parse_internal_subset()?;
                }
                Some(q @ (b'"' | b'\'')) => {
                    self.scan.advance(1);
                    let Some(end) = self.scan.find_byte(q) else {
                        return self.fail(start, "DOCTYPE improperly terminated".to_string());
                    };
                    let n = end + 1 - self.scan.position();
                    self.scan.advance(n);
                }
                Some(_) => {
                    // SYSTEM / PUBLIC keywords; external identifiers are
                    // never fetched
                    if self.scan.read_name().is_none() {
                        self.scan.advance(1);
                    }
                }
            }
        }
    }

    fn parse_internal_subset(&mut self) -> Step {
        loop {
            self.scan.skip_whitespace();
            let pos = self.scan.position();
            if self.scan.eat(b"]") {
                return Ok(());
            }
            if self.scan.eat(b"<!ENTITY") {
                self.parse_entity_decl()?;
            } else if self.scan.eat(b"<!--") {
                let Some(end) = self.scan.find_sub(b"-->") else {
                    return self.fail(pos, "Comment not terminated".to_string());
                };
                let n = end + 3 - self.scan.position();
                self.scan.advance(n);
            } else if self.scan.starts_with(b"<!") {
                self.skip_markup_decl(pos)?;
            } else if self.scan.starts_with(b"<?") {
                let Some(end) = self.scan.find_sub(b"?>") else {
                    return self.fail(pos, "DOCTYPE improperly terminated".to_string());
                };
                let n = end + 2 - self.scan.position();
                self.scan.advance(n);
            } else if self.scan.eat(b"%") {
                // parameter entity reference, unsupported
                let Some(end) = self.scan.find_byte(b';') else {
                    return self.fail(pos, "DOCTYPE improperly terminated".to_string());
                };
                let n = end + 1 - self.scan.position();
                self.scan.advance(n);
            } else if self.scan.is_eof() {
                return self.fail(pos, "DOCTYPE improperly terminated".to_string());
            } else {
                self.fail(pos, "internal subset error".to_string())?;
                self.scan.advance(1);
            }
        }
    }

    /// `<!ENTITY name "value">`. Parameter and external entities are skipped
    /// without being defined.
    fn parse_entity_decl(&mut self) -> Step {
        let pos = self.scan.position().saturating_sub(8);
        self.scan.skip_whitespace();
        if matches!(self.scan.peek(), Some(b'%')) {
            return self.skip_markup_decl(pos);
        }
        let Some(name_bytes) = self.scan.read_name() else {
            return self.skip_markup_decl(pos);
        };
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        self.scan.skip_whitespace();
        match self.scan.peek() {
            Some(q @ (b'"' | b'\'')) => {
                self.scan.advance(1);
                let vstart = self.scan.position();
                let Some(vend) = self.scan.find_byte(q) else {
                    return self.fail(pos, "DOCTYPE improperly terminated".to_string());
                };
                let value = String::from_utf8_lossy(self.scan.slice(vstart, vend)).into_owned();
                let n = vend + 1 - vstart;
                self.scan.advance(n);
                if !self.entities.define(&name, value) {
                    self.record(pos, format!("Entity '{name}' already defined"), level::WARNING);
                }
                self.scan.skip_whitespace();
                if !self.scan.eat(b">") {
                    return self.skip_markup_decl(pos);
                }
                Ok(())
            }
            _ => self.skip_markup_decl(pos),
        }
    }

    /// Skip to the end of a markup declaration, honoring quoted sections.
    fn skip_markup_decl(&mut self, pos: usize) -> Step {
        let mut quote: Option<u8> = None;
        while let Some(b) = self.scan.peek() {
            self.scan.advance(1);
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if b == b'>' => return Ok(()),
                None => {}
            }
        }
        self.fail(pos, "DOCTYPE improperly terminated".to_string())
    }

    fn parse_pi(&mut self) -> Step {
        let start = self.scan.position();
        self.scan.advance(2);
        let target = self
            .scan
            .read_name()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        if target.eq_ignore_ascii_case("xml") {
            self.fail(
                start,
                "XML declaration allowed only at the start of the document".to_string(),
            )?;
        }
        match self.scan.find_sub(b"?>") {
            Some(end) => {
                let n = end + 2 - self.scan.position();
                self.scan.advance(n);
            }
            None => {
                self.fail(start, format!("ParsePI: PI {target} never end"))?;
                self.scan.advance(self.input.len());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Element content
    // ========================================================================

    /// Parse one element tree starting at the `<` of its start tag.
    fn parse_tree(&mut self) -> Step {
        let max_depth = if self.opts.contains(ParseFlags::HUGE) {
            MAX_DEPTH_HUGE
        } else {
            MAX_DEPTH
        } as usize;
        let mut stack: Vec<OpenTag> = Vec::new();
        loop {
            let parent = stack.last().map_or(self.doc, |entry| entry.0);
            if !stack.is_empty() {
                self.parse_text(parent)?;
            }
            let pos = self.scan.position();
            if self.scan.is_eof() {
                if let Some((_, name, line)) = stack.last() {
                    let msg = format!("Premature end of data in tag {name} line {line}");
                    self.fail(pos, msg)?;
                }
                return Ok(());
            }
            if self.scan.eat(b"</") {
                self.parse_end_tag(&mut stack)?;
                if stack.is_empty() {
                    return Ok(());
                }
            } else if self.scan.eat(b"<!--") {
                self.parse_comment(parent)?;
            } else if self.scan.eat(b"<![CDATA[") {
                self.parse_cdata(parent)?;
            } else if self.scan.starts_with(b"<?") {
                self.parse_pi()?;
            } else if matches!(self.scan.peek(), Some(b'<'))
                && self.scan.peek_at(1).is_some_and(is_name_start_byte)
            {
                if stack.len() >= max_depth {
                    let msg =
                        format!("Excessive depth in document: {max_depth} use XML_PARSE_HUGE option");
                    return self.fail(pos, msg);
                }
                match self.parse_start_tag(parent)? {
                    Some(entry) => stack.push(entry),
                    None if stack.is_empty() => return Ok(()),
                    None => {}
                }
            } else {
                self.fail(pos, "StartTag: invalid element name".to_string())?;
                self.scan.advance(1);
            }
        }
    }

    /// Character data up to the next markup. References are expanded here;
    /// whitespace-only runs are dropped under NOBLANKS.
    fn parse_text(&mut self, parent: u32) -> Step {
        let start = self.scan.position();
        let end = self.scan.find_byte(b'<').unwrap_or(self.input.len());
        if end == start {
            return Ok(());
        }
        let raw = self.scan.slice(start, end);
        self.scan.advance(end - start);
        if memmem::find(raw, b"]]>").is_some() {
            self.fail(start, "Sequence ']]>' in content is not allowed".to_string())?;
        }
        let decoded = match decode(raw, &self.entities) {
            Ok(s) => s,
            Err(msg) => {
                self.fail(start, msg)?;
                String::from_utf8_lossy(raw).into_owned()
            }
        };
        if decoded.is_empty() {
            return Ok(());
        }
        if self.opts.contains(ParseFlags::NOBLANKS) && is_all_whitespace(decoded.as_bytes()) {
            return Ok(());
        }
        let (line, _) = self.scan.line_col(start);
        self.append_text(parent, &decoded, line);
        Ok(())
    }

    /// Append a text node, merging into an immediately preceding text node.
    fn append_text(&mut self, parent: u32, content: &str, line: u32) {
        let last = tree::get(self.mem, parent, node::LAST);
        if last != 0 && tree::node_type(self.mem, last) == tag::TEXT {
            let mut merged = tree::content_bytes(self.mem, last)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            merged.push_str(content);
            let old = tree::get(self.mem, last, node::CONTENT);
            self.mem.free(old);
            tree::set_content(self.mem, last, &merged);
            return;
        }
        let n = tree::new_node(self.mem, tag::TEXT, self.doc);
        tree::set_content(self.mem, n, content);
        tree::set(self.mem, n, node::LINE, line);
        tree::append_child(self.mem, parent, n);
    }

    fn parse_comment(&mut self, parent: u32) -> Step {
        let start = self.scan.position();
        let Some(end) = self.scan.find_sub(b"-->") else {
            self.fail(start, "Comment not terminated".to_string())?;
            self.scan.advance(self.input.len());
            return Ok(());
        };
        let content = self.scan.slice(start, end);
        if memmem::find(content, b"--").is_some() {
            self.fail(start, "Double hyphen within comment".to_string())?;
        }
        let text = String::from_utf8_lossy(content).into_owned();
        let (line, _) = self.scan.line_col(start);
        let n = end + 3 - self.scan.position();
        self.scan.advance(n);
        let c = tree::new_node(self.mem, tag::COMMENT, self.doc);
        tree::set_content(self.mem, c, &text);
        tree::set(self.mem, c, node::LINE, line);
        tree::append_child(self.mem, parent, c);
        Ok(())
    }

    fn parse_cdata(&mut self, parent: u32) -> Step {
        let start = self.scan.position();
        let Some(end) = self.scan.find_sub(b"]]>") else {
            self.fail(start, "CData section not finished".to_string())?;
            self.scan.advance(self.input.len());
            return Ok(());
        };
        let content = String::from_utf8_lossy(self.scan.slice(start, end)).into_owned();
        let (line, _) = self.scan.line_col(start);
        let n = end + 3 - self.scan.position();
        self.scan.advance(n);
        if self.opts.contains(ParseFlags::NOCDATA) {
            self.append_text(parent, &content, line);
        } else {
            let c = tree::new_node(self.mem, tag::CDATA, self.doc);
            tree::set_content(self.mem, c, &content);
            tree::set(self.mem, c, node::LINE, line);
            tree::append_child(self.mem, parent, c);
        }
        Ok(())
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// Parse a start tag and build its element. Returns the stack entry when
    /// the tag stays open, None when it self-closed or was cut short.
    fn parse_start_tag(&mut self, parent: u32) -> Result<Option<OpenTag>, ()> {
        let lt = self.scan.position();
        let (line, _) = self.scan.line_col(lt);
        self.scan.advance(1);
        let Some(qname_bytes) = self.scan.read_name() else {
            self.fail(lt, "StartTag: invalid element name".to_string())?;
            self.scan.advance(1);
            return Ok(None);
        };
        let qname = String::from_utf8_lossy(qname_bytes).into_owned();
        let mut attrs: Vec<(String, String)> = Vec::new();

        let tag_end = loop {
            let ws = self.scan.skip_whitespace();
            if self.scan.eat(b"/>") {
                break TagEnd::SelfClose;
            }
            if self.scan.eat(b">") {
                break TagEnd::Open;
            }
            let attr_pos = self.scan.position();
            let Some(c) = self.scan.peek() else {
                self.fail(lt, format!("Couldn't find end of Start Tag {qname} line {line}"))?;
                break TagEnd::Truncated;
            };
            if !is_name_start_byte(c) {
                self.fail(attr_pos, "attributes construct error".to_string())?;
                self.scan.advance(1);
                continue;
            }
            if ws == 0 {
                self.fail(attr_pos, "attributes construct error".to_string())?;
            }
            let Some(name_bytes) = self.scan.read_name() else {
                self.scan.advance(1);
                continue;
            };
            let aname = String::from_utf8_lossy(name_bytes).into_owned();
            self.scan.skip_whitespace();
            if !self.scan.eat(b"=") {
                self.fail(attr_pos, format!("Specification mandate value for attribute {aname}"))?;
                self.push_attr(&mut attrs, aname, String::new(), attr_pos)?;
                continue;
            }
            self.scan.skip_whitespace();
            let quote = match self.scan.peek() {
                Some(q @ (b'"' | b'\'')) => q,
                _ => {
                    self.fail(self.scan.position(), "AttValue: \" or ' expected".to_string())?;
                    self.push_attr(&mut attrs, aname, String::new(), attr_pos)?;
                    continue;
                }
            };
            self.scan.advance(1);
            let vstart = self.scan.position();
            let Some(vend) = self.scan.find_byte(quote) else {
                self.fail(lt, format!("Couldn't find end of Start Tag {qname} line {line}"))?;
                self.scan.advance(self.input.len());
                break TagEnd::Truncated;
            };
            let raw = self.scan.slice(vstart, vend);
            let n = vend + 1 - vstart;
            self.scan.advance(n);
            if memchr(b'<', raw).is_some() {
                self.fail(
                    vstart,
                    "Unescaped '<' not allowed in attributes values".to_string(),
                )?;
            }
            let value = self.decode_attr_value(raw, vstart)?;
            self.push_attr(&mut attrs, aname, value, attr_pos)?;
        };

        let element = self.build_element(parent, &qname, &attrs, lt, line);
        match tag_end {
            TagEnd::Open => Ok(Some((element, qname, line))),
            TagEnd::SelfClose | TagEnd::Truncated => Ok(None),
        }
    }

    fn push_attr(
        &mut self,
        attrs: &mut Vec<(String, String)>,
        name: String,
        value: String,
        pos: usize,
    ) -> Step {
        if attrs.iter().any(|(existing, _)| *existing == name) {
            self.fail(pos, format!("Attribute {name} redefined"))?;
            return Ok(());
        }
        attrs.push((name, value));
        Ok(())
    }

    /// Attribute-value normalization then reference expansion. Literal tabs
    /// and newlines become spaces; characters produced by references do not.
    fn decode_attr_value(&mut self, raw: &[u8], pos: usize) -> Result<String, ()> {
        let normalized: Vec<u8> = raw
            .iter()
            .map(|&b| if matches!(b, b'\t' | b'\n' | b'\r') { b' ' } else { b })
            .collect();
        match decode(&normalized, &self.entities) {
            Ok(s) => Ok(s),
            Err(msg) => {
                self.fail(pos, msg)?;
                Ok(String::from_utf8_lossy(raw).into_owned())
            }
        }
    }

    /// Materialize an element: link it, attach namespace declarations,
    /// resolve prefixes, then attach attributes with their value text.
    fn build_element(
        &mut self,
        parent: u32,
        qname: &str,
        attrs: &[(String, String)],
        lt: usize,
        line: u32,
    ) -> u32 {
        let (prefix, local) = split_qname(qname);
        let element = tree::new_node(self.mem, tag::ELEMENT, self.doc);
        tree::set_name(self.mem, element, local);
        tree::set(self.mem, element, node::LINE, line);
        tree::append_child(self.mem, parent, element);

        for (name, value) in attrs {
            if name == "xmlns" {
                let decl = tree::new_ns(self.mem, None, value);
                tree::add_ns_def(self.mem, element, decl);
            } else if let Some(p) = name.strip_prefix("xmlns:") {
                if !p.is_empty() {
                    let decl = tree::new_ns(self.mem, Some(p), value);
                    tree::add_ns_def(self.mem, element, decl);
                }
            }
        }

        if let Some(p) = prefix {
            let ns = tree::search_ns(self.mem, self.doc, element, Some(p.as_bytes()));
            if ns == 0 {
                self.record(
                    lt,
                    format!("Namespace prefix {p} on {local} is not defined"),
                    level::ERROR,
                );
            } else {
                tree::set(self.mem, element, node::NS, ns);
            }
        } else {
            let ns = tree::search_ns(self.mem, self.doc, element, None);
            if ns != 0 && tree::ns_href_bytes(self.mem, ns).is_some_and(|h| !h.is_empty()) {
                tree::set(self.mem, element, node::NS, ns);
            }
        }

        for (name, value) in attrs {
            if name == "xmlns" || name.starts_with("xmlns:") {
                continue;
            }
            let (aprefix, alocal) = split_qname(name);
            let attr = tree::new_node(self.mem, tag::ATTRIBUTE, self.doc);
            tree::set_name(self.mem, attr, alocal);
            tree::set(self.mem, attr, node::LINE, line);
            tree::append_attr(self.mem, element, attr);
            if let Some(p) = aprefix {
                let ns = tree::search_ns(self.mem, self.doc, attr, Some(p.as_bytes()));
                if ns == 0 {
                    self.record(
                        lt,
                        format!("Namespace prefix {p} for {alocal} on {local} is not defined"),
                        level::ERROR,
                    );
                } else {
                    tree::set(self.mem, attr, node::NS, ns);
                }
            }
            let text = tree::new_node(self.mem, tag::TEXT, self.doc);
            tree::set_content(self.mem, text, value);
            tree::append_child(self.mem, attr, text);
        }
        element
    }

    fn parse_end_tag(&mut self, stack: &mut Vec<OpenTag>) -> Step {
        let pos = self.scan.position().saturating_sub(2);
        let Some(name_bytes) = self.scan.read_name() else {
            self.fail(pos, "EndTag: '</' not found".to_string())?;
            self.scan.advance(1);
            return Ok(());
        };
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        self.scan.skip_whitespace();
        if !self.scan.eat(b">") {
            self.fail(self.scan.position(), "expected '>'".to_string())?;
            match self.scan.find_byte(b'>') {
                Some(end) => {
                    let n = end + 1 - self.scan.position();
                    self.scan.advance(n);
                }
                None => self.scan.advance(self.input.len()),
            }
        }
        let top_matches = stack.last().is_some_and(|(_, open, _)| *open == name);
        if top_matches {
            stack.pop();
            return Ok(());
        }
        if let Some((_, open, line)) = stack.last() {
            let msg = format!("Opening and ending tag mismatch: {open} line {line} and {name}");
            self.fail(pos, msg)?;
            stack.pop();
        } else {
            self.fail(pos, "Extra content at the end of the document".to_string())?;
        }
        Ok(())
    }
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.find(':') {
        Some(i) if i > 0 && i + 1 < qname.len() => (Some(&qname[..i]), &qname[i + 1..]),
        _ => (None, qname),
    }
}

/// Pull the declared encoding out of an XML declaration body, if any.
fn declared_encoding(body: &[u8]) -> Option<String> {
    let at = memmem::find(body, b"encoding")?;
    let rest = &body[at + 8..];
    let eq = memchr(b'=', rest)?;
    let rest = &rest[eq + 1..];
    let quote_at = rest.iter().position(|&b| b == b'"' || b == b'\'')?;
    let quote = rest[quote_at];
    let rest = &rest[quote_at + 1..];
    let end = memchr(quote, rest)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> (Arena, u32) {
        parse_with(input, ParseFlags::default())
    }

    fn parse_with(input: &str, opts: ParseFlags) -> (Arena, u32) {
        let mut mem = Arena::new();
        let (doc, diags) = parse(&mut mem, input.as_bytes(), None, opts);
        assert_ne!(
            doc,
            0,
            "parse failed: {:?}",
            diags.iter().map(|d| &d.message).collect::<Vec<_>>()
        );
        (mem, doc)
    }

    fn parse_err(input: &str) -> Vec<Diag> {
        let mut mem = Arena::new();
        let (doc, diags) = parse(&mut mem, input.as_bytes(), None, ParseFlags::default());
        assert_eq!(doc, 0, "expected a parse failure");
        assert!(!diags.is_empty());
        diags
    }

    fn element_children(mem: &Arena, n: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = tree::get(mem, n, node::CHILDREN);
        while cur != 0 {
            if tree::node_type(mem, cur) == tag::ELEMENT {
                out.push(cur);
            }
            cur = tree::get(mem, cur, node::NEXT);
        }
        out
    }

    fn child_count(mem: &Arena, n: u32) -> usize {
        let mut count = 0;
        let mut cur = tree::get(mem, n, node::CHILDREN);
        while cur != 0 {
            count += 1;
            cur = tree::get(mem, cur, node::NEXT);
        }
        count
    }

    fn name(mem: &Arena, n: u32) -> String {
        String::from_utf8_lossy(tree::name_bytes(mem, n).unwrap_or(b"")).into_owned()
    }

    #[test]
    fn test_parses_simple_document() {
        let (mem, doc) = parse_ok("<a><b>1</b><b>2</b></a>");
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(name(&mem, root), "a");
        let kids = element_children(&mem, root);
        assert_eq!(kids.len(), 2);
        assert_eq!(tree::string_value(&mem, kids[0]), "1");
        assert_eq!(tree::string_value(&mem, kids[1]), "2");
    }

    #[test]
    fn test_mismatched_tags_rejected() {
        let diags = parse_err("<a><b></a>");
        assert!(diags
            .iter()
            .any(|d| d.message == "Opening and ending tag mismatch: b line 1 and a"));
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert!(parse_err("").iter().any(|d| d.message == "Document is empty"));
        assert!(parse_err("  \n ").iter().any(|d| d.message == "Document is empty"));
    }

    #[test]
    fn test_unclosed_root_reports_open_line() {
        let diags = parse_err("<a>\n<b>");
        assert!(diags
            .iter()
            .any(|d| d.message == "Premature end of data in tag b line 2"));
    }

    #[test]
    fn test_recovery_keeps_partial_tree() {
        let (mem, doc) = parse_with("<a><b></a>", ParseFlags::default() | ParseFlags::RECOVER);
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(name(&mem, root), "a");
    }

    #[test]
    fn test_attribute_values_decoded() {
        let (mem, doc) = parse_ok(r#"<a id="1" title="a&amp;b"/>"#);
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(tree::attr_value(&mem, root, b"id").as_deref(), Some("1"));
        assert_eq!(tree::attr_value(&mem, root, b"title").as_deref(), Some("a&b"));
    }

    #[test]
    fn test_attribute_value_normalization() {
        let (mem, doc) = parse_ok("<a t=\"x\n\ty\"/>");
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(tree::attr_value(&mem, root, b"t").as_deref(), Some("x  y"));
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let diags = parse_err(r#"<a x="1" x="2"/>"#);
        assert!(diags.iter().any(|d| d.message == "Attribute x redefined"));
    }

    #[test]
    fn test_attribute_without_value_rejected() {
        let diags = parse_err("<a x/>");
        assert!(diags
            .iter()
            .any(|d| d.message == "Specification mandate value for attribute x"));
    }

    #[test]
    fn test_unescaped_angle_in_attribute_rejected() {
        let diags = parse_err(r#"<a x="1<2"/>"#);
        assert!(diags
            .iter()
            .any(|d| d.message == "Unescaped '<' not allowed in attributes values"));
    }

    #[test]
    fn test_namespace_resolution() {
        let (mem, doc) =
            parse_ok(r#"<r xmlns="urn:d" xmlns:p="urn:p"><p:c a="1" p:b="2"/></r>"#);
        let root = tree::doc_root_element(&mem, doc);
        let root_ns = tree::get(&mem, root, node::NS);
        assert_eq!(tree::ns_href_bytes(&mem, root_ns), Some(b"urn:d" as &[u8]));

        let child = element_children(&mem, root)[0];
        assert_eq!(name(&mem, child), "c");
        let child_ns = tree::get(&mem, child, node::NS);
        assert_eq!(tree::ns_href_bytes(&mem, child_ns), Some(b"urn:p" as &[u8]));

        let plain = tree::find_attr(&mem, child, b"a", None);
        assert_ne!(plain, 0);
        assert_eq!(tree::get(&mem, plain, node::NS), 0);
        let prefixed = tree::find_attr(&mem, child, b"b", Some(b"urn:p"));
        assert_ne!(prefixed, 0);
    }

    #[test]
    fn test_undeclared_prefix_is_not_fatal() {
        let mut mem = Arena::new();
        let (doc, diags) = parse(&mut mem, b"<p:a/>", None, ParseFlags::default());
        assert_ne!(doc, 0);
        assert!(diags
            .iter()
            .any(|d| d.message == "Namespace prefix p on a is not defined"));
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(name(&mem, root), "a");
        assert_eq!(tree::get(&mem, root, node::NS), 0);
    }

    #[test]
    fn test_default_namespace_undeclaration() {
        let (mem, doc) = parse_ok(r#"<a xmlns="urn:x"><b xmlns=""/></a>"#);
        let root = tree::doc_root_element(&mem, doc);
        let b = element_children(&mem, root)[0];
        assert_eq!(tree::get(&mem, b, node::NS), 0);
    }

    #[test]
    fn test_internal_entities_expanded() {
        let (mem, doc) =
            parse_ok(r#"<!DOCTYPE a [<!ENTITY t "hi &amp; bye">]><a>&t;</a>"#);
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(tree::string_value(&mem, root), "hi & bye");
    }

    #[test]
    fn test_entity_loop_rejected() {
        let diags =
            parse_err(r#"<!DOCTYPE a [<!ENTITY x "&y;"><!ENTITY y "&x;">]><a>&x;</a>"#);
        assert!(diags
            .iter()
            .any(|d| d.message == "Detected an entity reference loop"));
    }

    #[test]
    fn test_undefined_entity_rejected() {
        let diags = parse_err("<a>&nope;</a>");
        assert!(diags.iter().any(|d| d.message == "Entity 'nope' not defined"));
    }

    #[test]
    fn test_comments_kept_pis_dropped() {
        let (mem, doc) = parse_ok("<?pi data?><a><!--note--><?p2 x?></a>");
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(child_count(&mem, root), 1);
        let c = tree::get(&mem, root, node::CHILDREN);
        assert_eq!(tree::node_type(&mem, c), tag::COMMENT);
        assert_eq!(tree::content_bytes(&mem, c), Some(b"note" as &[u8]));
    }

    #[test]
    fn test_cdata_preserved_verbatim() {
        let (mem, doc) = parse_ok("<a><![CDATA[1<2 &amp;]]></a>");
        let root = tree::doc_root_element(&mem, doc);
        let c = tree::get(&mem, root, node::CHILDREN);
        assert_eq!(tree::node_type(&mem, c), tag::CDATA);
        assert_eq!(tree::content_bytes(&mem, c), Some(b"1<2 &amp;" as &[u8]));
    }

    #[test]
    fn test_nocdata_merges_into_text() {
        let (mem, doc) = parse_with(
            "<a>x<![CDATA[y]]>z</a>",
            ParseFlags::default() | ParseFlags::NOCDATA,
        );
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(child_count(&mem, root), 1);
        let c = tree::get(&mem, root, node::CHILDREN);
        assert_eq!(tree::node_type(&mem, c), tag::TEXT);
        assert_eq!(tree::content_bytes(&mem, c), Some(b"xyz" as &[u8]));
    }

    #[test]
    fn test_noblanks_drops_formatting_runs() {
        let pretty = "<a>\n  <b/>\n</a>";
        let (mem, doc) = parse_ok(pretty);
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(child_count(&mem, root), 1);

        let (mem, doc) = parse_with(pretty, ParseFlags::empty());
        let root = tree::doc_root_element(&mem, doc);
        assert_eq!(child_count(&mem, root), 3);
    }

    #[test]
    fn test_depth_limit_and_huge_escape_hatch() {
        let mut text = String::new();
        for _ in 0..300 {
            text.push_str("<d>");
        }
        for _ in 0..300 {
            text.push_str("</d>");
        }
        let diags = parse_err(&text);
        assert!(diags.iter().any(|d| d.message.contains("Excessive depth")));

        let (_, doc) = parse_with(&text, ParseFlags::default() | ParseFlags::HUGE);
        assert_ne!(doc, 0);
    }

    #[test]
    fn test_line_numbers_recorded() {
        let (mem, doc) = parse_ok("<a>\n  <b/>\n</a>");
        let root = tree::doc_root_element(&mem, doc);
        let b = element_children(&mem, root)[0];
        assert_eq!(tree::get(&mem, b, node::LINE), 2);
    }

    #[test]
    fn test_extra_root_rejected() {
        let diags = parse_err("<a/><b/>");
        assert!(diags
            .iter()
            .any(|d| d.message == "Extra content at the end of the document"));
    }

    #[test]
    fn test_byte_order_mark_skipped() {
        let mut mem = Arena::new();
        let (doc, _) = parse(&mut mem, b"\xEF\xBB\xBF<a/>", None, ParseFlags::default());
        assert_ne!(doc, 0);
    }

    #[test]
    fn test_xml_declaration_accepted() {
        let mut mem = Arena::new();
        let (doc, diags) = parse(
            &mut mem,
            br#"<?xml version="1.0" encoding="UTF-8"?><a/>"#,
            None,
            ParseFlags::default(),
        );
        assert_ne!(doc, 0);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_strict_failure_frees_partial_tree() {
        let mut mem = Arena::new();
        let (doc, _) = parse(&mut mem, b"<a><b></a>", None, ParseFlags::default());
        assert_eq!(doc, 0);
        assert_eq!(mem.live_allocations(), 0);
    }
}
