//! Rolling checksum for stored-record integrity.
//!
//! Provides the signed 32-bit rolling hash (`h = h * 31 + code_unit`) that
//! guards every persisted record and snapshot against corruption. The hash
//! iterates over UTF-16 code units to match the JavaScript
//! `String.charCodeAt()` behavior, so digests written by legacy browser
//! builds of the dashboard remain verifiable after migration.
//!
//! # Cross-language compatibility
//!
//! JavaScript strings are UTF-16 encoded. The legacy checksum loop computes
//! `hash = (hash << 5) - hash + str.charCodeAt(i)` with 32-bit signed
//! overflow (`hash |= 0`) and renders the result in decimal, which may be
//! negative. This Rust implementation converts to UTF-16 and uses wrapping
//! `i32` arithmetic to produce identical digests.
//!
//! # Not a security boundary
//!
//! This is a corruption detector, not a MAC. It is trivially forgeable and
//! must never be used for tamper resistance or authentication.

use serde_json::Value;

/// Shift width of the rolling step; `(h << 5) - h` is `h * 31`.
const ROLL_SHIFT: u32 = 5;

/// Computes the signed 32-bit rolling hash of a string, iterating over
/// UTF-16 code units, and renders it in decimal.
///
/// The decimal rendering (rather than hex) matches what JavaScript's
/// `Number.prototype.toString()` produced for the same loop, including a
/// leading minus sign once the accumulator wraps negative.
///
/// # Examples
///
/// ```
/// use savepoint_core::checksum::rolling_checksum;
///
/// assert_eq!(rolling_checksum("hello"), "99162322");
/// assert_eq!(rolling_checksum(""), "0");
/// ```
#[must_use]
pub fn rolling_checksum(s: &str) -> String {
    let mut hash: i32 = 0;
    for code_unit in s.encode_utf16() {
        hash = hash
            .wrapping_shl(ROLL_SHIFT)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(code_unit));
    }
    hash.to_string()
}

/// Computes the checksum of a JSON value over its compact serialization.
///
/// The compact form (`Value::to_string()`, no whitespace) is the canonical
/// input: `serde_json` maps are key-ordered, so two structurally equal
/// values always serialize identically and carry the same checksum.
#[must_use]
pub fn checksum_of(value: &Value) -> String {
    rolling_checksum(&value.to_string())
}
