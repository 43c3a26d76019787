//! The dynamically-typed value carried by configuration maps, signal
//! parameters, and property reads: string, integer, boolean, or object.
//!
//! `serde_json::Value` already has exactly this shape, so we reuse it as a
//! thin alias rather than defining a parallel enum, letting rule
//! descriptions produced by a host-side JSON/YAML parser deserialize
//! directly with no translation layer.

pub use serde_json::Value;

/// Convenience accessors used throughout the primitive library, where a
/// signal parameter or config value must be coerced to a specific shape or
/// treated as a `RuntimeWarning` and dropped.
pub trait ValueExt {
    fn as_i64_checked(&self) -> Option<i64>;
    fn as_str_checked(&self) -> Option<&str>;
}

impl ValueExt for Value {
    fn as_i64_checked(&self) -> Option<i64> {
        self.as_i64()
    }

    fn as_str_checked(&self) -> Option<&str> {
        self.as_str()
    }
}
