//! The engine's closed error surface.
//!
//! `add_rules` is the only fallible public entry point that can abort; every
//! other failure mode (macro evaluation at trigger time, an unknown key
//! arriving at a `KeyedCollector`, ...) is a `RuntimeWarning` and is only
//! ever logged, never returned.

use thiserror::Error;

/// Errors that can abort a batch of rules before any of its primitives are
/// wired into the live graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The rule description itself is malformed: an unknown property name,
    /// a macro that does not parse, or similar.
    #[error("parse error: {0}")]
    Parse(String),

    /// The rule description parses but fails structural validation:
    /// duplicate names, a `ConnectTo` target that does not exist, a
    /// self-loop, an unknown primitive type, or an untargeted primitive.
    #[error("validation error: {0}")]
    Validation(String),

    /// Validation passed but the graph could not be compiled: a cycle
    /// remains after topological sort, or a primitive rejected its config
    /// during `setup`.
    #[error("compile error: {0}")]
    Compile(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
