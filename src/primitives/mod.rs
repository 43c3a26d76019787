//! The primitive library: fourteen stateful node kinds, sharing a common
//! construction contract (`setup`/`same_config?`) and a registration table
//! mapping a rule description's `Type` string to a constructor.
//!
//! `Checker` is built separately by `crate::compiler` rather than through
//! this registry, since it needs an already-resolved `Arc<dyn Checkable>`
//! dependee rather than just its raw config.

mod accumulator;
mod checker;
mod collector;
mod counter;
mod event_generator;
mod filter;
mod speed_alarm;
mod timer;

pub use accumulator::Accumulator;
pub use checker::{build as build_checker, Checker};
pub use collector::{Collector, CollectorInOrder, KeyedCollector, KeyedCollectorInOrder};
pub use counter::{BasicCounter, CountdownCounter, RepeatCounter};
pub use event_generator::EventGenerator;
pub use filter::{IntegerFilter, StringFilter};
pub use speed_alarm::SpeedAlarm;
pub use timer::TimerSource;

use std::sync::Arc;

use crate::arena::Checkable;
use crate::event::EventRef;
use crate::id::PrimitiveId;
use crate::signal::{SignalSource, Triggerable};
use crate::value::Value;

/// Everything `crate::compiler` needs to fold a freshly constructed
/// primitive into a `crate::arena::PrimitiveHandle`.
pub struct PrimitiveBuild {
    pub kind: &'static str,
    /// The config normalized into the shape `same_config?` compares
    /// byte-for-byte; stored verbatim rather than re-derived from the live
    /// node, since the node's internal state mutates but its config never
    /// does; it is immutable after setup.
    pub config: Value,
    pub node: Arc<dyn Triggerable>,
    pub primary: Arc<SignalSource>,
    pub negative: Option<Arc<SignalSource>>,
    pub checkable: Option<Arc<dyn Checkable>>,
    pub non_targetable: bool,
}

/// What a constructor needs beyond the raw `Parameters` map: the
/// already-minted id the new primitive will carry, its inbound sources (so
/// primitives that pause/resume their own feed, like `CountdownCounter`, can
/// address them), rule-load-time access to the host event ABI for parsing
/// any macros embedded in config (`EventGenerator.Properties`), and the
/// engine's own re-entrant dispatch callback, which only `EventGenerator`
/// uses to feed a derived event back into `Engine::process_event`.
pub struct SetupContext<'a> {
    pub id: PrimitiveId,
    pub inbound: &'a [Arc<SignalSource>],
    pub meta_event: &'a EventRef,
    pub dispatch: Arc<dyn Fn(Box<dyn crate::event::IEvent>) + Send + Sync>,
}

impl<'a> SetupContext<'a> {
    pub fn resolve_prop(&self, name: &str) -> i64 {
        self.meta_event.property_id(name)
    }
}

pub type Constructor = fn(&Value, &SetupContext) -> Result<PrimitiveBuild, String>;

/// Looks up the constructor for a rule description's `Type` string. Returns
/// `None` for `"Checker"` (built specially by `crate::compiler`) and for any
/// unrecognized type name, both of which the caller reports as a
/// `ValidationError`.
pub fn constructor_for(type_name: &str) -> Option<Constructor> {
    match type_name {
        "BasicCounter" => Some(counter::build_basic_counter),
        "CountdownCounter" => Some(counter::build_countdown_counter),
        "RepeatCounter" => Some(counter::build_repeat_counter),
        "Accumulator" => Some(accumulator::build),
        "SpeedAlarm" => Some(speed_alarm::build),
        "Collector" => Some(collector::build_collector),
        "CollectorInOrder" => Some(collector::build_collector_in_order),
        "KeyedCollector" => Some(collector::build_keyed_collector),
        "KeyedCollectorInOrder" => Some(collector::build_keyed_collector_in_order),
        "StringFilter" => Some(filter::build_string_filter),
        "IntegerFilter" => Some(filter::build_integer_filter),
        "EventGenerator" => Some(event_generator::build),
        "TimerSource" => Some(timer::build),
        _ => None,
    }
}

/// `"Checker"` is not in `constructor_for`'s table; callers use this to
/// decide whether to take the special Checker-construction path in
/// `crate::compiler`.
pub fn is_checker(type_name: &str) -> bool {
    type_name == "Checker"
}

/// Maps a rule description's `Type` string to the `&'static str` stored in
/// `crate::arena::PrimitiveHandle::kind` (every constructor's `kind` field
/// happens to equal its own type name; this just gives the sharing detector
/// a `'static` string without borrowing the rule description's `String`).
pub fn kind_name(type_name: &str) -> &'static str {
    match type_name {
        "BasicCounter" => "BasicCounter",
        "CountdownCounter" => "CountdownCounter",
        "RepeatCounter" => "RepeatCounter",
        "Accumulator" => "Accumulator",
        "SpeedAlarm" => "SpeedAlarm",
        "Collector" => "Collector",
        "CollectorInOrder" => "CollectorInOrder",
        "KeyedCollector" => "KeyedCollector",
        "KeyedCollectorInOrder" => "KeyedCollectorInOrder",
        "StringFilter" => "StringFilter",
        "IntegerFilter" => "IntegerFilter",
        "EventGenerator" => "EventGenerator",
        "TimerSource" => "TimerSource",
        "Checker" => "Checker",
        _ => "Unknown",
    }
}
