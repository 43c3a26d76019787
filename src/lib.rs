//! A complex event processing engine: rules compile into a shared dataflow
//! graph of stateful primitives connected by typed signals. `DESIGN.md`
//! records where each module is grounded.
//!
//! The typical embedding:
//!
//! ```no_run
//! use cepflow::{Engine, event::testing::{meta_event, TestEvent}};
//! use std::sync::Arc;
//!
//! let engine = Engine::new(meta_event());
//! engine.add_rules(r#"{
//!     "Rules": [{
//!         "RuleName": "ScriptFromNotepad",
//!         "SourceEvents": [{
//!             "EventName": "ScriptExec",
//!             "ConnectTo": { "gen": {} }
//!         }],
//!         "Primitives": [{
//!             "Type": "EventGenerator",
//!             "Name": "gen",
//!             "Parameters": { "NewEventName": "MaliciousScriptExec" }
//!         }]
//!     }]
//! }"#).unwrap();
//!
//! engine.process_event(Arc::new(TestEvent::new("ScriptExec")));
//! ```

mod arena;
mod compiler;
pub mod error;
pub mod event;
mod id;
mod macro_eval;
mod primitives;
mod remover;
pub mod rule;
pub mod signal;
pub mod value;

mod engine;

pub use crate::engine::{ActorFn, Engine, EngineConfig, EngineStats};
pub use crate::error::{EngineError, Result};
pub use crate::event::{Context, EventRef, IEvent};
pub use crate::rule::{EdgeDesc, NodeDesc, PrimitiveDesc, RuleDescription, RulesFile, SourceEventDesc};
