//! Struct accessor layer
//!
//! Typed reads at fixed byte displacements from arena pointers. The
//! displacement tables live in `engine::layout`; this module adds the
//! null-pointer discipline on top:
//!
//! - reading any field through a base pointer of zero is an error, not a
//!   wild read
//! - string fields come in two flavors: one that treats a zero string
//!   offset as an error and one that maps it to `None`
//!
//! The node model is the main caller; nothing above it touches offsets.

use crate::engine;
use crate::error::XmlError;

/// Read a u32 field (numeric or pointer) at `base + field`.
pub fn read_u32(base: u32, field: u32, name: &'static str) -> Result<u32, XmlError> {
    if base == 0 {
        return Err(XmlError::NullAccess { field: name });
    }
    Ok(engine::read_u32(base + field))
}

/// Read an f64 field at `base + field`.
pub fn read_f64(base: u32, field: u32, name: &'static str) -> Result<f64, XmlError> {
    if base == 0 {
        return Err(XmlError::NullAccess { field: name });
    }
    Ok(engine::read_f64(base + field))
}

/// Read the C string a pointer field points at. A null string pointer is an
/// error here; use [`read_opt_string`] where null means "no value".
pub fn read_string(base: u32, field: u32, name: &'static str) -> Result<String, XmlError> {
    let ptr = read_u32(base, field, name)?;
    if ptr == 0 {
        return Err(XmlError::NullAccess { field: name });
    }
    Ok(engine::read_cstring(ptr))
}

/// Like [`read_string`], but a null string pointer decodes to `None`.
pub fn read_opt_string(
    base: u32,
    field: u32,
    name: &'static str,
) -> Result<Option<String>, XmlError> {
    let ptr = read_u32(base, field, name)?;
    if ptr == 0 {
        return Ok(None);
    }
    Ok(Some(engine::read_cstring(ptr)))
}
