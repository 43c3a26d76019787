//! The host-provided event ABI and the `Context` that rides along every
//! signal firing.
//!
//! The real event implementation (parsing, property storage, whatever the
//! host's event object actually is) is explicitly out of scope: the
//! engine only needs a handful of operations. We express that as a trait
//! object so the engine never has to know the concrete event type, keeping
//! a tiny in-crate double rather than
//! depending on a real host event implementation.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// The host's opaque event object.
///
/// Implementations must be safe to share across the dispatch thread and
/// (for `TimerSource`) the platform timer thread.
pub trait IEvent: Send + Sync + fmt::Debug {
    /// The event's name, used to route it through `Engine::dispatcher`.
    fn name(&self) -> &str;

    /// Resolve a property name to a non-negative integer id, or a negative
    /// value if the event type has no such property. Called once per macro
    /// at rule-load time and the result cached; never called per-trigger.
    fn property_id(&self, name: &str) -> i64;

    /// Read the current value of a property by id. `None` if unset.
    fn get(&self, id: i64) -> Option<Value>;

    /// Store a value for a property by id.
    fn set(&mut self, id: i64, value: Value);

    /// Construct a fresh instance bound to `name`, used by `EventGenerator`
    /// and by the engine's own meta-event template. Implementations that
    /// cannot synthesize a given name should return `None`; the caller
    /// silently stops propagation in that case.
    fn new_instance(&self, name: &str) -> Option<Box<dyn IEvent>>;
}

/// A shared, immutable handle to an event, once it has entered the engine:
/// events are immutable from the engine's perspective once produced.
pub type EventRef = Arc<dyn IEvent>;

/// The payload threaded through a signal firing.
///
/// Seeded by the dispatcher as the incoming event (`Context::Event`).
/// Primitives that join multiple inputs (`Collector`, `KeyedCollector`,
/// `Accumulator`, and the in-order variants) emit `Context::List` on
/// output; single-input primitives pass their input context straight
/// through. `EventGenerator` never emits a context.
#[derive(Clone, Debug)]
pub enum Context {
    Event(EventRef),
    List(Vec<Context>),
    /// A bare scalar leaf that is not itself an event, e.g. the running
    /// total `Accumulator` and `SpeedAlarm` prepend to their emitted context
    /// list, whose first element is the running total.
    Value(Value),
}

impl Context {
    pub fn from_event(event: EventRef) -> Self {
        Context::Event(event)
    }

    /// Descends `Contexts[i][j]...` down to a leaf, per the macro grammar.
    pub fn index_path(&self, indices: &[usize]) -> Option<&Context> {
        let mut cur = self;
        for &i in indices {
            match cur {
                Context::List(items) => cur = items.get(i)?,
                Context::Event(_) | Context::Value(_) => return None,
            }
        }
        Some(cur)
    }

    pub fn as_event(&self) -> Option<&EventRef> {
        match self {
            Context::Event(e) => Some(e),
            Context::List(_) | Context::Value(_) => None,
        }
    }
}

/// A minimal in-crate event fixture used by this crate's own test suite so
/// it never has to depend on a real host event implementation.
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A `HashMap`-backed event: property names are resolved to ids the
    /// first time they are seen and remembered for the lifetime of the
    /// process, so that `property_id` is stable across every `TestEvent`
    /// instance (mirroring how a real host resolves ids once against a
    /// schema).
    static PROPERTY_IDS: Mutex<Option<HashMap<String, i64>>> = Mutex::new(None);

    fn intern(name: &str) -> i64 {
        let mut guard = PROPERTY_IDS.lock().unwrap();
        let map = guard.get_or_insert_with(HashMap::new);
        if let Some(id) = map.get(name) {
            return *id;
        }
        let id = map.len() as i64;
        map.insert(name.to_string(), id);
        id
    }

    #[derive(Debug, Clone)]
    pub struct TestEvent {
        name: String,
        props: HashMap<i64, Value>,
    }

    impl TestEvent {
        pub fn new(name: impl Into<String>) -> Self {
            TestEvent { name: name.into(), props: HashMap::new() }
        }

        pub fn with(mut self, prop: &str, value: impl Into<Value>) -> Self {
            self.props.insert(intern(prop), value.into());
            self
        }
    }

    impl IEvent for TestEvent {
        fn name(&self) -> &str {
            &self.name
        }

        fn property_id(&self, name: &str) -> i64 {
            intern(name)
        }

        fn get(&self, id: i64) -> Option<Value> {
            self.props.get(&id).cloned()
        }

        fn set(&mut self, id: i64, value: Value) {
            self.props.insert(id, value);
        }

        fn new_instance(&self, name: &str) -> Option<Box<dyn IEvent>> {
            Some(Box::new(TestEvent::new(name)))
        }
    }

    /// A meta-event template: any `TestEvent` works, since property ids are
    /// process-global in this fixture. Kept as a distinct constructor so
    /// test code reads the same way a host's real meta-event would.
    pub fn meta_event() -> EventRef {
        Arc::new(TestEvent::new("__meta__"))
    }
}
