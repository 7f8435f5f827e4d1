//! Entity decoding
//!
//! Handles the five predefined entities, decimal/hex character references,
//! and general entities declared in the internal DTD subset. External
//! entities are never loaded; a reference to one is reported as an error by
//! the caller.

use std::collections::HashMap;

use super::layout::MAX_ENTITY_DEPTH;

/// General entities collected from the internal subset.
#[derive(Debug, Default)]
pub struct EntityTable {
    defs: HashMap<String, String>,
}

impl EntityTable {
    /// Record a declaration. The first one for a name wins; returns false on
    /// a redeclaration so the parser can warn about it.
    pub fn define(&mut self, name: &str, value: String) -> bool {
        use std::collections::hash_map::Entry;
        match self.defs.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.defs.get(name).map(String::as_str)
    }
}

/// Expand `&...;` references in `raw` and decode the result as UTF-8.
///
/// Returns the position-independent error message on an undefined entity,
/// a malformed reference, or expansion nesting beyond the engine limit.
pub fn decode(raw: &[u8], entities: &EntityTable) -> Result<String, String> {
    decode_inner(raw, entities, 0)
}

fn decode_inner(raw: &[u8], entities: &EntityTable, depth: usize) -> Result<String, String> {
    if depth > MAX_ENTITY_DEPTH {
        return Err("Detected an entity reference loop".to_string());
    }

    let text = String::from_utf8_lossy(raw);
    if !text.contains('&') {
        return Ok(text.into_owned());
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_ref();

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = match after.find(';') {
            // A reference must be short; a distant ';' means a bare '&'.
            Some(i) if i <= 64 => i,
            _ => return Err("xmlParseEntityRef: expecting ';'".to_string()),
        };
        let name = &after[..semi];
        if name.is_empty() {
            return Err("xmlParseEntityRef: no name".to_string());
        }

        if let Some(digits) = name.strip_prefix('#') {
            out.push(decode_char_ref(digits)?);
        } else {
            match predefined(name) {
                Some(c) => out.push(c),
                None => match entities.get(name) {
                    Some(value) => {
                        let expanded =
                            decode_inner(value.as_bytes(), entities, depth + 1)?;
                        out.push_str(&expanded);
                    }
                    None => return Err(format!("Entity '{name}' not defined")),
                },
            }
        }
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn predefined(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

fn decode_char_ref(digits: &str) -> Result<char, String> {
    let value = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16)
    } else {
        digits.parse::<u32>()
    }
    .map_err(|_| "xmlParseCharRef: invalid value".to_string())?;

    char::from_u32(value)
        .filter(|c| is_xml_char(*c))
        .ok_or_else(|| "xmlParseCharRef: invalid xmlChar value".to_string())
}

/// Char production of XML 1.0.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}
