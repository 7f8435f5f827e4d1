//! Engine entry points
//!
//! The owning side of the arena. One process-wide engine holds the linear
//! memory plus every handle table; callers reach it only through the flat
//! functions in this module, passing u32 arena offsets and integer handles.
//!
//! Locking protocol: every entry point takes the engine lock for its own
//! body. Diagnostics are delivered to the registered callback with the lock
//! released, so the callback is free to call back into `read_u32` and
//! `read_cstring` while it inspects the error structs.

pub mod layout;

mod entities;
mod mem;
mod parser;
mod scanner;
mod tree;
mod xinclude;
mod xpath;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use layout::{domain, error, level, node_set, tag, xpath_object, ParseFlags};
use mem::Arena;
use parser::Diag;
use xpath::{EvalContext, Expr, QueryCache};

/// Receives one serialized error struct per diagnostic.
pub type ErrorCallback = fn(user_data: u32, error: u32);

#[derive(Clone, Copy)]
struct Handler {
    callback: ErrorCallback,
    user_data: u32,
}

struct XPathCtxt {
    doc: u32,
    node: u32,
    namespaces: HashMap<String, String>,
}

struct Engine {
    mem: Arena,
    parser_ctxts: HashSet<u32>,
    xinclude_ctxts: HashMap<u32, u32>,
    xpath_ctxts: HashMap<u32, XPathCtxt>,
    compiled: HashMap<u32, Arc<Expr>>,
    query_cache: QueryCache,
    next_handle: u32,
    handler: Option<Handler>,
}

impl Engine {
    fn new() -> Self {
        Engine {
            mem: Arena::new(),
            parser_ctxts: HashSet::new(),
            xinclude_ctxts: HashMap::new(),
            xpath_ctxts: HashMap::new(),
            compiled: HashMap::new(),
            query_cache: QueryCache::default(),
            next_handle: 1,
            handler: None,
        }
    }

    fn take_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

static ENGINE: LazyLock<Mutex<Engine>> = LazyLock::new(|| Mutex::new(Engine::new()));

fn engine() -> MutexGuard<'static, Engine> {
    ENGINE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serializes whole operations, from handler registration through error
/// delivery. Individual entry points only hold the engine lock for their
/// own body, so without this a concurrent operation could swap the handler
/// mid-parse.
static OP_LOCK: Mutex<()> = Mutex::new(());

pub fn op_guard() -> MutexGuard<'static, ()> {
    OP_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Memory
// ============================================================================

pub fn malloc(size: u32) -> u32 {
    engine().mem.malloc(size)
}

pub fn free(addr: u32) {
    engine().mem.free(addr);
}

pub fn read_u32(addr: u32) -> u32 {
    engine().mem.read_u32(addr)
}

pub fn read_f64(addr: u32) -> f64 {
    engine().mem.read_f64(addr)
}

/// Read a NUL-terminated string; the null address reads as empty.
pub fn read_cstring(addr: u32) -> String {
    if addr == 0 {
        return String::new();
    }
    engine().mem.read_cstr(addr)
}

/// Allocations currently outstanding, for leak assertions.
pub fn live_allocation_count() -> usize {
    engine().mem.live_allocations()
}

// ============================================================================
// Error delivery
// ============================================================================

pub fn set_structured_error_handler(callback: Option<ErrorCallback>, user_data: u32) {
    engine().handler = callback.map(|callback| Handler {
        callback,
        user_data,
    });
}

/// Push diagnostics through the registered callback.
///
/// Three stages: serialize the error structs while holding the lock, invoke
/// the callback with the lock released, then reacquire it to free them.
fn deliver(diags: Vec<Diag>, url: Option<&str>, opts: ParseFlags, origin: u32) {
    let kept: Vec<Diag> = diags
        .into_iter()
        .filter(|diag| {
            if diag.level == level::WARNING {
                !opts.contains(ParseFlags::NOWARNING)
            } else {
                !opts.contains(ParseFlags::NOERROR)
            }
        })
        .collect();
    if kept.is_empty() {
        return;
    }

    let (handler, ptrs) = {
        let mut guard = engine();
        let eng = &mut *guard;
        let Some(handler) = eng.handler else {
            return;
        };
        let ptrs: Vec<u32> = kept
            .iter()
            .map(|diag| serialize_error(&mut eng.mem, diag, url, origin))
            .collect();
        (handler, ptrs)
    };

    for &ptr in &ptrs {
        (handler.callback)(handler.user_data, ptr);
    }

    let mut guard = engine();
    for &ptr in &ptrs {
        free_error(&mut guard.mem, ptr);
    }
}

fn serialize_error(mem: &mut Arena, diag: &Diag, url: Option<&str>, origin: u32) -> u32 {
    let err = mem.malloc_zeroed(error::SIZE);
    mem.write_u32(err + error::DOMAIN, origin);
    let message = mem.alloc_cstr(&diag.message);
    mem.write_u32(err + error::MESSAGE, message);
    mem.write_u32(err + error::LEVEL, diag.level);
    if let Some(url) = url {
        let file = mem.alloc_cstr(url);
        mem.write_u32(err + error::FILE, file);
    }
    mem.write_u32(err + error::LINE, diag.line);
    mem.write_u32(err + error::COL, diag.col);
    err
}

fn free_error(mem: &mut Arena, err: u32) {
    let message = mem.read_u32(err + error::MESSAGE);
    mem.free(message);
    let file = mem.read_u32(err + error::FILE);
    mem.free(file);
    mem.free(err);
}

// ============================================================================
// Parsing
// ============================================================================

pub fn parser_ctxt_new() -> u32 {
    let mut guard = engine();
    let handle = guard.take_handle();
    guard.parser_ctxts.insert(handle);
    handle
}

pub fn parser_ctxt_free(ctxt: u32) {
    engine().parser_ctxts.remove(&ctxt);
}

/// Parse a buffer into a new document tree.
///
/// Returns the document pointer, or 0 when the input is not well formed and
/// `RECOVER` was not requested. Diagnostics go to the registered callback,
/// filtered by `NOERROR` and `NOWARNING`.
pub fn ctxt_read_memory(
    ctxt: u32,
    input: &[u8],
    url: Option<&str>,
    encoding: Option<&str>,
    options: u32,
) -> u32 {
    let opts = ParseFlags::from_bits_truncate(options);
    let (doc, diags) = {
        let mut guard = engine();
        let eng = &mut *guard;
        if !eng.parser_ctxts.contains(&ctxt) {
            tracing::trace!(ctxt, "read with unknown parser context");
            return 0;
        }
        let (doc, mut diags) = parser::parse(&mut eng.mem, input, url, opts);
        if let Some(enc) = encoding {
            if !opts.contains(ParseFlags::IGNORE_ENC)
                && !matches!(
                    enc.to_ascii_lowercase().as_str(),
                    "utf-8" | "utf8" | "us-ascii" | "ascii"
                )
            {
                diags.insert(
                    0,
                    Diag {
                        message: format!("Unsupported encoding {enc}"),
                        line: 1,
                        col: 1,
                        level: level::WARNING,
                    },
                );
            }
        }
        (doc, diags)
    };
    deliver(diags, url, opts, domain::PARSER);
    doc
}

pub fn free_doc(doc: u32) {
    if doc == 0 {
        return;
    }
    let mut guard = engine();
    tree::free_subtree(&mut guard.mem, doc);
}

pub fn doc_get_root_element(doc: u32) -> u32 {
    if doc == 0 {
        return 0;
    }
    tree::doc_root_element(&engine().mem, doc)
}

// ============================================================================
// Nodes
// ============================================================================

pub fn unlink_node(n: u32) {
    if n == 0 {
        return;
    }
    let mut guard = engine();
    tree::unlink(&mut guard.mem, n);
}

pub fn free_node(n: u32) {
    if n == 0 {
        return;
    }
    let mut guard = engine();
    tree::free_subtree(&mut guard.mem, n);
}

/// Unlink and free an attribute. Returns -1 when the pointer is not an
/// attribute node.
pub fn remove_prop(attr: u32) -> i32 {
    let mut guard = engine();
    let eng = &mut *guard;
    if attr == 0 || tree::node_type(&eng.mem, attr) != tag::ATTRIBUTE {
        return -1;
    }
    tree::unlink(&mut eng.mem, attr);
    tree::free_subtree(&mut eng.mem, attr);
    0
}

/// The string value of a node as a fresh C string; the caller frees it.
pub fn node_get_content(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut guard = engine();
    let eng = &mut *guard;
    let content = tree::string_value(&eng.mem, n);
    eng.mem.alloc_cstr(&content)
}

/// Resolve a namespace prefix in the ancestor chain of `n`.
pub fn search_ns(doc: u32, n: u32, prefix: Option<&str>) -> u32 {
    let guard = engine();
    tree::search_ns(&guard.mem, doc, n, prefix.map(str::as_bytes))
}

// ============================================================================
// Inclusion processing
// ============================================================================

pub fn xinclude_new_context(doc: u32) -> u32 {
    let mut guard = engine();
    let handle = guard.take_handle();
    guard.xinclude_ctxts.insert(handle, doc);
    handle
}

pub fn xinclude_free_context(ctxt: u32) {
    engine().xinclude_ctxts.remove(&ctxt);
}

/// Expand inclusion directives below `n`. Returns the number of
/// substitutions, or -1 when any directive failed.
pub fn xinclude_process_node(ctxt: u32, n: u32) -> i32 {
    let (rc, diags) = {
        let mut guard = engine();
        let eng = &mut *guard;
        if !eng.xinclude_ctxts.contains_key(&ctxt) {
            return -1;
        }
        xinclude::process(&mut eng.mem, n)
    };
    deliver(diags, None, ParseFlags::empty(), domain::XINCLUDE);
    rc
}

// ============================================================================
// XPath
// ============================================================================

pub fn xpath_new_context(doc: u32) -> u32 {
    let mut guard = engine();
    let handle = guard.take_handle();
    guard.xpath_ctxts.insert(
        handle,
        XPathCtxt {
            doc,
            node: doc,
            namespaces: HashMap::new(),
        },
    );
    handle
}

pub fn xpath_free_context(ctxt: u32) {
    engine().xpath_ctxts.remove(&ctxt);
}

pub fn xpath_register_ns(ctxt: u32, prefix: &str, href: &str) -> i32 {
    let mut guard = engine();
    match guard.xpath_ctxts.get_mut(&ctxt) {
        Some(xc) => {
            xc.namespaces.insert(prefix.to_string(), href.to_string());
            0
        }
        None => -1,
    }
}

pub fn xpath_set_context_node(ctxt: u32, n: u32) -> i32 {
    let mut guard = engine();
    match guard.xpath_ctxts.get_mut(&ctxt) {
        Some(xc) => {
            xc.node = n;
            0
        }
        None => -1,
    }
}

/// Compile a query into a reusable expression handle, or 0 on failure.
pub fn xpath_ctxt_compile(ctxt: u32, query: &str) -> u32 {
    let outcome = {
        let mut guard = engine();
        let eng = &mut *guard;
        if !eng.xpath_ctxts.contains_key(&ctxt) {
            return 0;
        }
        match eng.query_cache.compile(query) {
            Ok(expr) => {
                let handle = eng.take_handle();
                eng.compiled.insert(handle, expr);
                Ok(handle)
            }
            Err(message) => Err(message),
        }
    };
    match outcome {
        Ok(handle) => handle,
        Err(message) => {
            deliver_xpath_error(message);
            0
        }
    }
}

pub fn xpath_free_comp_expr(comp: u32) {
    engine().compiled.remove(&comp);
}

/// Evaluate a compiled expression; returns an XPath object pointer, or 0 on
/// failure.
pub fn xpath_compiled_eval(comp: u32, ctxt: u32) -> u32 {
    let outcome = {
        let mut guard = engine();
        let eng = &mut *guard;
        let Some(expr) = eng.compiled.get(&comp).map(Arc::clone) else {
            return 0;
        };
        let Some(xc) = eng.xpath_ctxts.get(&ctxt) else {
            return 0;
        };
        let ectx = EvalContext {
            mem: &eng.mem,
            doc: xc.doc,
            node: xc.node,
            namespaces: &xc.namespaces,
        };
        match xpath::evaluate(&ectx, &expr) {
            Ok(value) => Ok(serialize_object(&mut eng.mem, &value)),
            Err(message) => Err(message),
        }
    };
    match outcome {
        Ok(obj) => obj,
        Err(message) => {
            deliver_xpath_error(message);
            0
        }
    }
}

/// One-shot compile and evaluate, still served from the query cache.
pub fn xpath_eval_expression(ctxt: u32, query: &str) -> u32 {
    let outcome = {
        let mut guard = engine();
        let eng = &mut *guard;
        if !eng.xpath_ctxts.contains_key(&ctxt) {
            return 0;
        }
        match eng.query_cache.compile(query) {
            Ok(expr) => {
                let Some(xc) = eng.xpath_ctxts.get(&ctxt) else {
                    return 0;
                };
                let ectx = EvalContext {
                    mem: &eng.mem,
                    doc: xc.doc,
                    node: xc.node,
                    namespaces: &xc.namespaces,
                };
                match xpath::evaluate(&ectx, &expr) {
                    Ok(value) => Ok(serialize_object(&mut eng.mem, &value)),
                    Err(message) => Err(message),
                }
            }
            Err(message) => Err(message),
        }
    };
    match outcome {
        Ok(obj) => obj,
        Err(message) => {
            deliver_xpath_error(message);
            0
        }
    }
}

pub fn xpath_free_object(obj: u32) {
    if obj == 0 {
        return;
    }
    let mut guard = engine();
    let eng = &mut *guard;
    match eng.mem.read_u32(obj + xpath_object::TYPE) {
        t if t == layout::object_type::NODESET => {
            let set = eng.mem.read_u32(obj + xpath_object::NODESET);
            if set != 0 {
                let tab = eng.mem.read_u32(set + node_set::TAB);
                eng.mem.free(tab);
                eng.mem.free(set);
            }
        }
        t if t == layout::object_type::STRING => {
            let s = eng.mem.read_u32(obj + xpath_object::STRING);
            eng.mem.free(s);
        }
        _ => {}
    }
    eng.mem.free(obj);
}

fn deliver_xpath_error(message: String) {
    deliver(
        vec![Diag {
            message,
            line: 0,
            col: 0,
            level: level::ERROR,
        }],
        None,
        ParseFlags::empty(),
        domain::XPATH,
    );
}

/// Write an evaluation result into arena structs the caller can walk.
fn serialize_object(mem: &mut Arena, value: &xpath::Value) -> u32 {
    let obj = mem.malloc_zeroed(xpath_object::SIZE);
    match value {
        xpath::Value::NodeSet(nodes) => {
            mem.write_u32(obj + xpath_object::TYPE, layout::object_type::NODESET);
            let set = mem.malloc_zeroed(node_set::SIZE);
            mem.write_u32(set + node_set::COUNT, nodes.len() as u32);
            mem.write_u32(set + node_set::MAX, nodes.len() as u32);
            if !nodes.is_empty() {
                let tab = mem.malloc(nodes.len() as u32 * 4);
                for (i, &n) in nodes.iter().enumerate() {
                    mem.write_u32(tab + i as u32 * 4, n);
                }
                mem.write_u32(set + node_set::TAB, tab);
            }
            mem.write_u32(obj + xpath_object::NODESET, set);
        }
        xpath::Value::Boolean(b) => {
            mem.write_u32(obj + xpath_object::TYPE, layout::object_type::BOOLEAN);
            mem.write_u32(obj + xpath_object::BOOL, u32::from(*b));
        }
        xpath::Value::Number(n) => {
            mem.write_u32(obj + xpath_object::TYPE, layout::object_type::NUMBER);
            mem.write_f64(obj + xpath_object::FLOAT, *n);
        }
        xpath::Value::String(s) => {
            mem.write_u32(obj + xpath_object::TYPE, layout::object_type::STRING);
            let ptr = mem.alloc_cstr(s);
            mem.write_u32(obj + xpath_object::STRING, ptr);
        }
    }
    obj
}
