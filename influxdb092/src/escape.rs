//! Escape handling for serialized series keys.
//!
//! The legacy line-protocol writer escapes the four structural characters
//! `,` `"` ` ` `=` with a backslash before joining measurement and tags
//! into a single bucket name. Parsing goes the other way: each `\X` pair
//! is first replaced with a reserved two-byte token so the key can be
//! split on unescaped `,` and `=`, then the tokens are turned back into
//! either the literal character (tag values) or the original escape
//! sequence (measurement names and tag keys, which stay escaped on the
//! wire).
//!
//! A token is the lead byte `0xC0` followed by the escape's index in
//! `ESCAPABLE`. The lead byte is never part of a valid UTF-8 sequence,
//! so it cannot occur in a key produced by the legacy writer, and the
//! index byte (0..=3) is never a structural character, so a masked key
//! contains no unescaped delimiters at all.

const TOKEN_LEAD: u8 = 0xC0;

/// The characters the legacy format escapes inside series keys.
const ESCAPABLE: [u8; 4] = [b',', b'"', b' ', b'='];

fn escape_index(b: u8) -> Option<u8> {
    ESCAPABLE.iter().position(|&e| e == b).map(|i| i as u8)
}

/// Escapes the structural characters in `raw` with backslashes.
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 4);
    for &b in raw {
        if ESCAPABLE.contains(&b) {
            out.push(b'\\');
        }
        out.push(b);
    }
    out
}

/// Resolves the four `\X` escape pairs back to their literal characters.
///
/// Backslashes that do not introduce one of the four escapes are kept
/// verbatim, matching the legacy parser.
pub fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() && ESCAPABLE.contains(&raw[i + 1]) {
            out.push(raw[i + 1]);
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// Replaces each `\X` escape pair with its reserved token so the result
/// can be split on unescaped delimiters.
pub(crate) fn substitute(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw.get(i + 1).copied().and_then(escape_index) {
            Some(index) if raw[i] == b'\\' => {
                out.push(TOKEN_LEAD);
                out.push(index);
                i += 2;
            }
            _ => {
                out.push(raw[i]);
                i += 1;
            }
        }
    }
    out
}

/// Substitutes tokens back to the literal escaped character.
pub(crate) fn restore_literal(masked: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(masked.len());
    let mut i = 0;
    while i < masked.len() {
        match token_char(masked, i) {
            Some(c) => {
                out.push(c);
                i += 2;
            }
            None => {
                out.push(masked[i]);
                i += 1;
            }
        }
    }
    out
}

/// Substitutes tokens back to the original `\X` escape sequence.
pub(crate) fn restore_escaped(masked: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(masked.len());
    let mut i = 0;
    while i < masked.len() {
        match token_char(masked, i) {
            Some(c) => {
                out.push(b'\\');
                out.push(c);
                i += 2;
            }
            None => {
                out.push(masked[i]);
                i += 1;
            }
        }
    }
    out
}

/// The escaped character of the token starting at `i`, if there is one.
fn token_char(masked: &[u8], i: usize) -> Option<u8> {
    if masked[i] != TOKEN_LEAD {
        return None;
    }
    let index = *masked.get(i + 1)? as usize;
    ESCAPABLE.get(index).copied()
}
