//! UTF-16 code unit helpers.
//!
//! Term text lives in the char arena as UTF-16 code units terminated by
//! [`TERMINATOR`]. Token streams produced outside of Rust may hand us
//! unpaired surrogate halves; those are replaced with
//! [`REPLACEMENT_CHAR`] before hashing so the arena always holds text that
//! decodes cleanly.

/// End-of-term marker in the char arena. Never valid inside a term.
pub const TERMINATOR: u16 = 0xFFFF;

/// Unicode replacement character.
pub const REPLACEMENT_CHAR: u16 = 0xFFFD;

pub const SURROGATE_HIGH_START: u16 = 0xD800;
pub const SURROGATE_HIGH_END: u16 = 0xDBFF;
pub const SURROGATE_LOW_START: u16 = 0xDC00;
pub const SURROGATE_LOW_END: u16 = 0xDFFF;

#[inline]
pub fn is_high_surrogate(unit: u16) -> bool {
    (SURROGATE_HIGH_START..=SURROGATE_HIGH_END).contains(&unit)
}

#[inline]
pub fn is_low_surrogate(unit: u16) -> bool {
    (SURROGATE_LOW_START..=SURROGATE_LOW_END).contains(&unit)
}

/// Hashes `text` in place, replacing unpaired surrogates and the
/// terminator value with [`REPLACEMENT_CHAR`].
///
/// The hash walks the text backwards (`code = code * 31 + unit`), treating
/// a valid surrogate pair as two consecutive units. [`hash_units`] over the
/// sanitized text yields the same value.
pub fn sanitize_and_hash(text: &mut [u16]) -> i32 {
    let mut code: i32 = 0;
    let mut downto = text.len();
    while downto > 0 {
        downto -= 1;
        let mut unit = text[downto];
        if is_low_surrogate(unit) {
            if downto == 0 {
                unit = REPLACEMENT_CHAR;
                text[downto] = unit;
            } else {
                let prev = text[downto - 1];
                if is_high_surrogate(prev) {
                    code = code
                        .wrapping_mul(31)
                        .wrapping_add(unit as i32)
                        .wrapping_mul(31)
                        .wrapping_add(prev as i32);
                    downto -= 1;
                    continue;
                }
                unit = REPLACEMENT_CHAR;
                text[downto] = unit;
            }
        } else if is_high_surrogate(unit) || unit == TERMINATOR {
            // A high surrogate reached here has no low half after it.
            unit = REPLACEMENT_CHAR;
            text[downto] = unit;
        }
        code = code.wrapping_mul(31).wrapping_add(unit as i32);
    }
    code
}

/// Hashes already sanitized text.
pub fn hash_units(text: &[u16]) -> i32 {
    text.iter()
        .rev()
        .fold(0i32, |code, &unit| code.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Decodes sanitized UTF-16 text; unpaired halves cannot occur after
/// [`sanitize_and_hash`]; any left over decode as U+FFFD.
pub fn to_string(text: &[u16]) -> String {
    String::from_utf16_lossy(text)
}
