//! `Engine`: the process-wide (per-instance) state, the event dispatcher
//! map, the actor table, the rule/event-generator registries, and the
//! public embedding API.

use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::arena::PrimitiveArena;
use crate::error::{EngineError, Result};
use crate::event::{EventRef, IEvent};
use crate::id::PrimitiveId;
use crate::rule::{RuleDescription, RulesFile};
use crate::signal::SignalSource;

/// The small set of knobs a host can override at construction time, so
/// multiple independent engines can coexist in one process.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub reserved_all_events_name: String,
    pub reserved_sourceless_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            reserved_all_events_name: "AllEvents".to_string(),
            reserved_sourceless_name: String::new(),
        }
    }
}

/// An actor registration: identity for `unregister_actor` is `Arc::ptr_eq`
/// on the stored callback, since `Fn` closures have no other notion of
/// equality.
pub type ActorFn = Arc<dyn Fn(EventRef) + Send + Sync>;

/// Per-rule bookkeeping kept alongside the live graph: which event this
/// rule's (unique) `EventGenerator` produces, for `rule_to_event` /
/// `event_generators` lookups during deletion.
pub(crate) struct CompiledRule {
    pub derived_event_name: String,
}

#[derive(Default)]
pub(crate) struct BatchState {
    /// Primitives created fresh during this `add_rules` batch, in creation
    /// order, reversed for rollback, removing partially-added primitives.
    pub created_primitive_ids: Vec<PrimitiveId>,
    /// Dispatcher map entries created fresh during this batch (so a
    /// rollback can drop them if they end up with no targets).
    pub created_dispatchers: Vec<String>,
    /// Rule names registered (in `rules`/`rule_to_event`/`event_generators`)
    /// during this batch, for rollback.
    pub registered_rules: Vec<String>,
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) meta_event: EventRef,
    pub(crate) arena: PrimitiveArena,
    pub(crate) dispatcher: RwLock<HashMap<String, Arc<SignalSource>>>,
    pub(crate) all_events_dispatcher: Arc<SignalSource>,
    pub(crate) actors: RwLock<HashMap<String, Vec<ActorFn>>>,
    pub(crate) rule_to_event: RwLock<HashMap<String, String>>,
    pub(crate) event_generators: RwLock<HashMap<String, PrimitiveId>>,
    pub(crate) rules: RwLock<HashMap<String, CompiledRule>>,
    /// `derived_event_name -> rule_name` for rules whose physical removal
    /// was deferred because another rule still consumes the event they
    /// produce.
    pub(crate) pending_deletions: RwLock<HashMap<String, String>>,
    self_weak: Weak<Engine>,
}

impl Engine {
    pub fn new(meta_event: EventRef) -> Arc<Self> {
        Self::with_config(meta_event, EngineConfig::default())
    }

    pub fn with_config(meta_event: EventRef, config: EngineConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Engine {
            config,
            meta_event,
            arena: PrimitiveArena::new(),
            dispatcher: RwLock::new(HashMap::new()),
            all_events_dispatcher: SignalSource::new(),
            actors: RwLock::new(HashMap::new()),
            rule_to_event: RwLock::new(HashMap::new()),
            event_generators: RwLock::new(HashMap::new()),
            rules: RwLock::new(HashMap::new()),
            pending_deletions: RwLock::new(HashMap::new()),
            self_weak: weak.clone(),
        })
    }

    /// The re-entrant callback handed to every `EventGenerator`:
    /// synthesizing a derived event feeds it straight back into
    /// `process_event`. Held as a `Weak` so primitives never keep the
    /// engine itself alive (`self_weak` would otherwise be a reference
    /// cycle through the arena).
    pub(crate) fn dispatch_callback(&self) -> Arc<dyn Fn(Box<dyn IEvent>) + Send + Sync> {
        let weak = self.self_weak.clone();
        Arc::new(move |event: Box<dyn IEvent>| {
            if let Some(engine) = weak.upgrade() {
                let event_ref: EventRef = Arc::from(event);
                engine.process_event(event_ref);
            }
        })
    }

    /// Parses `rules_text` as a `RulesFile` and compiles every rule in
    /// order. All rules in one call share a rollback scope: if any rule
    /// fails, every rule added earlier in the same call is rolled back too.
    pub fn add_rules(&self, rules_text: &str) -> Result<()> {
        let parsed: RulesFile = serde_json::from_str(rules_text)
            .map_err(|e| EngineError::Parse(format!("malformed rules text: {e}")))?;
        self.add_rule_descriptions(parsed.rules)
    }

    /// Same as `add_rules` but takes an already-parsed description, for
    /// hosts that assemble `RuleDescription`s directly rather than through
    /// the (out-of-scope) text parser.
    pub fn add_rule_descriptions(&self, descriptions: Vec<RuleDescription>) -> Result<()> {
        let mut batch = BatchState::default();
        for desc in &descriptions {
            if let Err(e) = crate::compiler::compile_rule(self, desc, &mut batch) {
                tracing::error!(rule = %desc.rule_name, error = %e, "add_rules batch aborted, rolling back");
                crate::compiler::rollback_batch(self, batch);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Idempotent: deleting an unknown or already-pending rule is a no-op.
    pub fn delete_rule(&self, rule_name: &str) {
        crate::remover::delete_rule(self, rule_name);
    }

    /// Routes an incoming event through the dispatcher bound to its name,
    /// the wildcard `AllEvents` dispatcher, and finally registered actors,
    /// in that order. Derived events synthesized by an `EventGenerator`
    /// during step 1 re-enter this same function before it returns
    /// (synchronous reentrancy).
    pub fn process_event(&self, event: EventRef) {
        let name = event.name().to_string();
        tracing::trace!(event = %name, "process_event");

        let source = self.dispatcher.read().get(&name).cloned();
        if let Some(source) = source {
            source.trigger(crate::event::Context::from_event(event.clone()));
        }

        self.all_events_dispatcher.trigger(crate::event::Context::from_event(event.clone()));

        let actors = self.actors.read().get(&name).cloned().unwrap_or_default();
        for actor in actors {
            actor(event.clone());
        }
    }

    /// Prepends when `high_priority`, else appends.
    pub fn register_actor(&self, event_name: &str, actor: ActorFn, high_priority: bool) {
        let mut actors = self.actors.write();
        let list = actors.entry(event_name.to_string()).or_default();
        if high_priority {
            list.insert(0, actor);
        } else {
            list.push(actor);
        }
    }

    /// Removes by identity (`Arc::ptr_eq`); leaves the table unchanged if
    /// the actor was never registered.
    pub fn unregister_actor(&self, event_name: &str, actor: &ActorFn) {
        let mut actors = self.actors.write();
        if let Some(list) = actors.get_mut(event_name) {
            list.retain(|a| !Arc::ptr_eq(a, actor));
            if list.is_empty() {
                actors.remove(event_name);
            }
        }
    }

    /// Read-only introspection for host observability: no new behavior,
    /// purely a diagnostic getter over live primitive/dispatcher/actor
    /// counts.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            primitive_count: self.arena.len(),
            dispatcher_count: self.dispatcher.read().len(),
            actor_count: self.actors.read().values().map(|v| v.len()).sum(),
            rule_count: self.rules.read().len(),
            pending_deletion_count: self.pending_deletions.read().len(),
        }
    }

    pub fn primitive_count(&self) -> usize {
        self.arena.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub primitive_count: usize,
    pub dispatcher_count: usize,
    pub actor_count: usize,
    pub rule_count: usize,
    pub pending_deletion_count: usize,
}
