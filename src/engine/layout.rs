//! Engine ABI definitions
//!
//! Single home for everything the engine and the binding layer must agree on:
//! - byte displacements of every struct serialized into arena memory
//! - node category tags
//! - parser option bits
//!
//! Nothing outside this module is allowed to hardcode an offset or a tag
//! value. All structs are little-endian and allocated on 8-byte boundaries;
//! pointer-sized fields are u32 arena offsets with 0 as the null address.

use bitflags::bitflags;

// ============================================================================
// Node category tags
// ============================================================================

/// Values stored in the `type` field of every tree struct.
pub mod tag {
    pub const ELEMENT: u32 = 1;
    pub const ATTRIBUTE: u32 = 2;
    pub const TEXT: u32 = 3;
    pub const CDATA: u32 = 4;
    pub const COMMENT: u32 = 8;
    pub const DOCUMENT: u32 = 9;
}

// ============================================================================
// Struct layouts (byte displacements from the struct base pointer)
// ============================================================================

/// Tree node header, shared by every node category.
///
/// Elements use all fields. Attributes reuse `children`/`last` for their
/// value text and leave `ns_def` empty. Text, CDATA and comment nodes carry
/// their bytes in `content` and leave `name` empty.
pub mod node {
    /// Application slot, unused by the engine except on document nodes.
    pub const PRIVATE: u32 = 0;
    /// Node category tag (see [`super::tag`]).
    pub const TYPE: u32 = 4;
    /// C string: local name for elements/attributes, empty otherwise.
    pub const NAME: u32 = 8;
    /// First child node.
    pub const CHILDREN: u32 = 12;
    /// Last child node.
    pub const LAST: u32 = 16;
    /// Parent node (the document struct for top-level nodes).
    pub const PARENT: u32 = 20;
    /// Next sibling.
    pub const NEXT: u32 = 24;
    /// Previous sibling.
    pub const PREV: u32 = 28;
    /// Owning document struct.
    pub const DOC: u32 = 32;
    /// Namespace binding of this node (a namespace struct), if any.
    pub const NS: u32 = 36;
    /// C string: text payload for text/CDATA/comment nodes.
    pub const CONTENT: u32 = 40;
    /// First attribute (elements only).
    pub const PROPERTIES: u32 = 44;
    /// First namespace declared on this element (elements only).
    pub const NS_DEF: u32 = 48;
    /// 1-based source line the node started on.
    pub const LINE: u32 = 52;
    /// Total struct size in bytes.
    pub const SIZE: u32 = 56;
}

/// Document struct: a node header with `type == tag::DOCUMENT` plus a URL.
pub mod doc {
    /// C string: base URL handed to the parser, or null.
    pub const URL: u32 = 56;
    pub const SIZE: u32 = 64;
}

/// Namespace declaration struct.
pub mod ns {
    /// Next declaration on the same element.
    pub const NEXT: u32 = 0;
    /// Always [`super::NS_DECL`]; readers never branch on it.
    pub const TYPE: u32 = 4;
    /// C string: namespace URI.
    pub const HREF: u32 = 8;
    /// C string: prefix, or null for the default namespace.
    pub const PREFIX: u32 = 12;
    pub const SIZE: u32 = 16;
}

/// Marker stored in the namespace struct `TYPE` field.
pub const NS_DECL: u32 = 18;

/// Structured error record passed to the registered error callback.
pub mod error {
    pub const DOMAIN: u32 = 0;
    pub const CODE: u32 = 4;
    /// C string: human-readable message.
    pub const MESSAGE: u32 = 8;
    /// Severity (see [`super::level`]).
    pub const LEVEL: u32 = 12;
    /// C string: document URL, or null.
    pub const FILE: u32 = 16;
    /// 1-based line.
    pub const LINE: u32 = 20;
    pub const STR1: u32 = 24;
    pub const STR2: u32 = 28;
    pub const STR3: u32 = 32;
    pub const INT1: u32 = 36;
    /// 1-based column.
    pub const COL: u32 = 40;
    pub const SIZE: u32 = 48;
}

/// Error severity values stored in the error struct `LEVEL` field.
pub mod level {
    pub const WARNING: u32 = 1;
    pub const ERROR: u32 = 2;
    pub const FATAL: u32 = 3;
}

/// Error origin values stored in the error struct `DOMAIN` field.
pub mod domain {
    pub const PARSER: u32 = 1;
    pub const XINCLUDE: u32 = 11;
    pub const XPATH: u32 = 12;
}

/// XPath evaluation result object.
pub mod xpath_object {
    /// Result kind (see [`super::object_type`]).
    pub const TYPE: u32 = 0;
    /// Node-set struct, when `TYPE` is `NODESET`.
    pub const NODESET: u32 = 4;
    /// 0 or 1, when `TYPE` is `BOOLEAN`.
    pub const BOOL: u32 = 8;
    /// f64, when `TYPE` is `NUMBER`.
    pub const FLOAT: u32 = 16;
    /// C string, when `TYPE` is `STRING`.
    pub const STRING: u32 = 24;
    pub const SIZE: u32 = 32;
}

/// Values of the XPath object `TYPE` field.
pub mod object_type {
    pub const NODESET: u32 = 1;
    pub const BOOLEAN: u32 = 2;
    pub const NUMBER: u32 = 3;
    pub const STRING: u32 = 4;
}

/// Node-set struct: a counted array of node pointers in document order.
pub mod node_set {
    /// Number of occupied slots.
    pub const COUNT: u32 = 0;
    /// Allocated slots.
    pub const MAX: u32 = 4;
    /// Pointer to the array of u32 node pointers.
    pub const TAB: u32 = 8;
    pub const SIZE: u32 = 16;
}

// ============================================================================
// Parser options
// ============================================================================

bitflags! {
    /// Parser behavior selector passed to the read-memory entry point.
    ///
    /// Bit values are fixed by the engine ABI and must not be renumbered.
    /// Options without an engine behavior behind them are accepted and
    /// recorded so option words from callers round-trip unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParseFlags: u32 {
        /// Keep parsing after recoverable errors and return the partial tree.
        const RECOVER = 1 << 0;
        /// Substitute entities declared in the internal subset.
        const NOENT = 1 << 1;
        /// Load external DTD subsets (no loader exists, so this never fires).
        const DTDLOAD = 1 << 2;
        /// Apply DTD-declared default attribute values.
        const DTDATTR = 1 << 3;
        /// Validate against the DTD.
        const DTDVALID = 1 << 4;
        /// Do not report error-level diagnostics through the callback.
        const NOERROR = 1 << 5;
        /// Do not report warning-level diagnostics through the callback.
        const NOWARNING = 1 << 6;
        /// Pedantic diagnostics.
        const PEDANTIC = 1 << 7;
        /// Drop whitespace-only text nodes.
        const NOBLANKS = 1 << 8;
        /// Legacy SAX1 interface mode.
        const SAX1 = 1 << 9;
        /// Mark the document for inclusion processing.
        const XINCLUDE = 1 << 10;
        /// Forbid network access during parsing.
        const NONET = 1 << 11;
        /// Do not intern strings in a shared dictionary.
        const NODICT = 1 << 12;
        /// Remove redundant namespace declarations.
        const NSCLEAN = 1 << 13;
        /// Merge CDATA sections into adjacent text nodes.
        const NOCDATA = 1 << 14;
        /// Do not emit inclusion start/end markers.
        const NOXINCNODE = 1 << 15;
        /// Compact small text nodes.
        const COMPACT = 1 << 16;
        /// Parse using XML 1.0 before the 5th edition.
        const OLD10 = 1 << 17;
        /// Skip base URI fixup during inclusion processing.
        const NOBASEFIX = 1 << 18;
        /// Lift hard-coded parser limits for very large documents.
        const HUGE = 1 << 19;
        /// Legacy SAX callback compatibility.
        const OLDSAX = 1 << 20;
        /// Ignore encoding declared inside the document.
        const IGNORE_ENC = 1 << 21;
        /// Store line numbers above 65535.
        const BIG_LINES = 1 << 22;
        /// Forbid expansion of external entities even when declared.
        const NO_XXE = 1 << 23;
    }
}

impl Default for ParseFlags {
    /// Strip blank text nodes and block external entity expansion.
    fn default() -> Self {
        ParseFlags::NOBLANKS | ParseFlags::NO_XXE
    }
}

// ============================================================================
// Well-known namespaces
// ============================================================================

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace of inclusion directives.
pub const XINCLUDE_NS: &str = "http://www.w3.org/2001/XInclude";

/// Maximum element nesting depth unless `HUGE` is set.
pub const MAX_DEPTH: usize = 256;

/// Maximum element nesting depth with `HUGE`.
pub const MAX_DEPTH_HUGE: usize = 2048;

/// Maximum entity expansion depth.
pub const MAX_ENTITY_DEPTH: usize = 32;
