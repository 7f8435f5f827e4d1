//! Error taxonomy and the collector bridge
//!
//! The engine signals diagnostics through a registered callback, never
//! through return values. The collector is a process-wide table of integer
//! handles, each bound to an ordered list of decoded diagnostics; the shared
//! callback receives the handle as its user data and appends to the matching
//! list. A handle lives exactly as long as one engine operation:
//!
//! - `create` / `get` / `delete` are the primitives
//! - [`CollectorScope`] pairs them with handler registration for the span
//!   of one operation, on every exit path

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, MutexGuard};

use thiserror::Error;

use crate::engine;
use crate::engine::layout::error as error_layout;
use crate::raw;

pub(crate) use crate::engine::op_guard;

/// One structured diagnostic decoded from an engine error struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub column: u32,
}

/// Everything this crate can fail with.
#[derive(Debug, Error)]
pub enum XmlError {
    /// Document parsing, inclusion processing, or query compilation failed.
    #[error("{message}")]
    Parse {
        message: String,
        details: Vec<Diagnostic>,
    },
    /// A field was read through a null pointer where null is not a legal
    /// state. This is caller misuse, not bad input.
    #[error("null pointer dereference reading {field}")]
    NullAccess { field: &'static str },
    /// The engine reported a node tag outside the supported set.
    #[error("unsupported node type {0}")]
    UnsupportedNodeType(u32),
    /// The engine reported failure while removing an attribute.
    #[error("could not remove attribute {name}")]
    RemoveAttribute { name: String },
}

impl XmlError {
    /// A Parse error joining the diagnostic messages into one line.
    pub(crate) fn parse_failure(context: &str, details: Vec<Diagnostic>) -> XmlError {
        let joined = details
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let message = if joined.is_empty() {
            context.to_string()
        } else {
            format!("{context}: {joined}")
        };
        XmlError::Parse { message, details }
    }
}

// ============================================================================
// Collector table
// ============================================================================

struct Collectors {
    next: u32,
    table: HashMap<u32, Vec<Diagnostic>>,
}

static COLLECTORS: LazyLock<Mutex<Collectors>> = LazyLock::new(|| {
    Mutex::new(Collectors {
        next: 1,
        table: HashMap::new(),
    })
});

fn collectors() -> MutexGuard<'static, Collectors> {
    COLLECTORS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Allocate a fresh collector handle bound to an empty list.
pub fn create() -> u32 {
    let mut guard = collectors();
    let handle = guard.next;
    guard.next += 1;
    guard.table.insert(handle, Vec::new());
    handle
}

/// The diagnostics accumulated for `handle`, in callback invocation order.
pub fn get(handle: u32) -> Vec<Diagnostic> {
    collectors().table.get(&handle).cloned().unwrap_or_default()
}

/// Remove the table entry for `handle`. Skipping this leaks the entry for
/// the life of the process.
pub fn delete(handle: u32) {
    collectors().table.remove(&handle);
}

/// The callback handed to the engine; `user_data` is a collector handle.
pub(crate) fn collect(user_data: u32, err: u32) {
    let message = raw::read_opt_string(err, error_layout::MESSAGE, "message")
        .ok()
        .flatten()
        .unwrap_or_default();
    let line = raw::read_u32(err, error_layout::LINE, "line").unwrap_or(0);
    let column = raw::read_u32(err, error_layout::COL, "col").unwrap_or(0);
    tracing::warn!(line, column, "{message}");
    if let Some(list) = collectors().table.get_mut(&user_data) {
        list.push(Diagnostic {
            message,
            line,
            column,
        });
    }
}

/// Owns a collector handle for the span of one engine operation.
///
/// Construction creates the handle and registers the shared callback with
/// it; drop unregisters and deletes the handle. The caller must already
/// hold the operation lock so no other operation swaps the handler.
pub(crate) struct CollectorScope {
    handle: u32,
}

impl CollectorScope {
    pub fn begin() -> Self {
        let handle = create();
        engine::set_structured_error_handler(Some(collect), handle);
        CollectorScope { handle }
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        get(self.handle)
    }
}

impl Drop for CollectorScope {
    fn drop(&mut self) {
        engine::set_structured_error_handler(None, 0);
        delete(self.handle);
    }
}
