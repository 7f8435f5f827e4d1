//! arenaxml - XML document binding over a byte-arena engine
//!
//! Layers, bottom up:
//! - engine: parser, tree, include substitution, and XPath over one
//!   process-wide byte arena, reached only through flat entry points
//! - raw: typed field reads at fixed byte displacements
//! - resource: dispose-once owners of engine pointers
//! - error: diagnostic collection bridged from the engine callback
//! - node / xpath / document: the typed surface callers use

// The layout tables carry every struct field whether or not a reader exists
// for it, and the allocator entry points come as a pair.
#![allow(dead_code)]

mod document;
mod engine;
mod error;
mod node;
mod raw;
mod resource;
#[cfg(test)]
mod testutil;
mod xpath;

pub use document::{ParseOptions, XmlDocument};
pub use engine::layout::ParseFlags;
pub use error::{Diagnostic, XmlError};
pub use node::{Namespaces, XmlAttribute, XmlCData, XmlComment, XmlElement, XmlNode, XmlText};
pub use xpath::{Query, XmlXPath};
