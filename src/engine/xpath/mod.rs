//! XPath 1.0 over the arena tree
//!
//! `QueryCache::compile` parses a query into a shared syntax tree, memoized
//! in a small LRU keyed by the query text. Evaluation runs in `eval`
//! against a context node plus the registered namespace prefixes.

pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use eval::{evaluate, EvalContext};
pub use parser::Expr;
pub use value::Value;

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

pub const QUERY_CACHE_CAPACITY: usize = 64;

/// Compiled queries kept per engine; repeated queries skip the parser.
pub struct QueryCache {
    entries: LruCache<String, Arc<Expr>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            entries: LruCache::new(capacity),
        }
    }

    /// Parse `query`, or reuse an earlier parse of the same text.
    pub fn compile(&mut self, query: &str) -> Result<Arc<Expr>, String> {
        if let Some(found) = self.entries.get(query) {
            tracing::trace!(query, "query cache hit");
            return Ok(Arc::clone(found));
        }
        let expr = Arc::new(parser::parse(query)?);
        self.entries.put(query.to_string(), Arc::clone(&expr));
        Ok(expr)
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        QueryCache::new(QUERY_CACHE_CAPACITY)
    }
}
