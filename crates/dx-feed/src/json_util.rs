//! JSON field extraction helpers.
//!
//! Source responses are read as untyped `serde_json::Value` and the handful of
//! required numbers are pulled out by JSON pointer. A missing or non-numeric
//! field is a [`SourceError::MalformedResponse`] naming the pointer.

use dx_core::error::SourceError;

/// Parse a JSON value (string or number) as `f64`.
///
/// Some sources encode numbers as strings (`"52.1"`); both forms are accepted.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.trim().parse().ok()
    } else {
        v.as_f64()
    }
}

/// Read a required numeric field at `pointer` (RFC 6901, e.g. `/data/x`).
pub fn require_f64(v: &serde_json::Value, pointer: &str) -> Result<f64, SourceError> {
    parse_str_f64(v.pointer(pointer))
        .ok_or_else(|| SourceError::MalformedResponse(format!("missing or non-numeric field `{pointer}`")))
}
