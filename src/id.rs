//! Stable integer identities for arena-held objects.
//!
//! A naive design links primitives and signal endpoints together with
//! reference cycles (a `SignalSource` knows its targets, a `SignalTarget`
//! knows the sources feeding it, a `Checker` knows its `Checkable` dependee,
//! ...). Rust makes that an ownership headache, so instead we keep every
//! primitive and every signal source in an arena
//! (`crate::arena::PrimitiveArena`) and pass around small `Copy` ids instead
//! of pointers: a cheap, stable, hashable handle minted once and compared by
//! value thereafter.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identifies a single primitive instance inside an `Engine`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PrimitiveId(u64);

impl PrimitiveId {
    pub(crate) fn fresh() -> Self {
        PrimitiveId(next())
    }
}

/// Identifies a `SignalSource` (either an engine-level event dispatcher or
/// a primitive's outbound port) inside an `Engine`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) fn fresh() -> Self {
        SourceId(next())
    }
}

impl std::fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "~{}", self.0)
    }
}
