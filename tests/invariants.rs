//! Cross-cutting invariants and idempotence properties, distinct from the
//! scenario walkthroughs in `tests/scenarios.rs`: these
//! don't exercise a specific primitive's firing semantics, they check that
//! the engine's bookkeeping (stats, sharing, deletion, actor registration)
//! stays internally consistent under repetition and reversal.

use std::sync::{Arc, Mutex};

use cepflow::event::testing::{meta_event, TestEvent};
use cepflow::{ActorFn, Engine, EventRef};

fn simple_pass_rule(rule_name: &str, generator_name: &str, derived_event: &str) -> String {
    format!(
        r#"{{
            "Rules": [{{
                "RuleName": "{rule_name}",
                "SourceEvents": [
                    {{ "EventName": "Ping",
                       "ConnectTo": {{ "gate": {{ "SignalParameter": "#MACRO#Context.Event.code" }} }} }}
                ],
                "Primitives": [
                    {{ "Type": "IntegerFilter", "Name": "gate",
                       "Parameters": {{ "Condition": "Equals", "CompareTo": 1 }},
                       "ConnectTo": {{ "{generator_name}": {{}} }} }},
                    {{ "Type": "EventGenerator", "Name": "{generator_name}",
                       "Parameters": {{ "NewEventName": "{derived_event}" }} }}
                ]
            }}]
        }}"#
    )
}

fn capture(engine: &Arc<Engine>, event_name: &str) -> (Arc<Mutex<Vec<EventRef>>>, ActorFn) {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    let actor: ActorFn = Arc::new(move |e: EventRef| sink.lock().unwrap().push(e));
    engine.register_actor(event_name, actor.clone(), false);
    (captured, actor)
}

/// Adding a rule and then deleting it returns `stats()` to exactly what it
/// was beforehand: no leaked primitives, dispatchers, or pending-deletion
/// entries.
#[test]
fn add_then_delete_returns_to_the_same_stats() {
    let engine = Engine::new(meta_event());
    let before = engine.stats();

    engine.add_rules(&simple_pass_rule("SimplePass", "gen", "Derived")).unwrap();
    let mid = engine.stats();
    assert_eq!(mid.primitive_count, 2, "gate + gen");
    assert_eq!(mid.rule_count, 1);
    assert_eq!(mid.dispatcher_count, 1, "Ping gets a dispatcher entry");

    engine.delete_rule("SimplePass");
    let after = engine.stats();
    assert_eq!(after, before, "stats must round-trip through add then delete");
}

/// `delete_rule` is idempotent: calling it a second time on an already-gone
/// rule name is a silent no-op.
#[test]
fn delete_rule_twice_is_the_same_as_once() {
    let engine = Engine::new(meta_event());
    engine.add_rules(&simple_pass_rule("SimplePass", "gen", "Derived")).unwrap();

    engine.delete_rule("SimplePass");
    let once = engine.stats();
    engine.delete_rule("SimplePass");
    let twice = engine.stats();
    assert_eq!(once, twice);

    engine.delete_rule("NeverExisted");
    assert_eq!(engine.stats(), once, "deleting an unknown rule name is a no-op");
}

/// Two rules whose graphs are structurally identical up to the final
/// `EventGenerator` share every upstream primitive; only the generator
/// itself (whose `NewEventName` config differs) is fresh.
#[test]
fn sharing_is_monotonic_across_structurally_identical_rules() {
    let engine = Engine::new(meta_event());

    engine.add_rules(&simple_pass_rule("RuleOne", "genOne", "DerivedOne")).unwrap();
    let after_one = engine.stats();
    assert_eq!(after_one.primitive_count, 2);

    engine.add_rules(&simple_pass_rule("RuleTwo", "genTwo", "DerivedTwo")).unwrap();
    let after_two = engine.stats();
    assert_eq!(
        after_two.primitive_count,
        after_one.primitive_count + 1,
        "only genTwo should be a new primitive; gate must be shared"
    );
    assert_eq!(after_two.rule_count, 2);
    assert_eq!(after_two.dispatcher_count, 1, "both rules source from the same Ping dispatcher");

    let (captured_one, _) = capture(&engine, "DerivedOne");
    let (captured_two, _) = capture(&engine, "DerivedTwo");
    engine.process_event(Arc::new(TestEvent::new("Ping").with("code", 1i64)));
    assert_eq!(captured_one.lock().unwrap().len(), 1);
    assert_eq!(captured_two.lock().unwrap().len(), 1, "the shared gate must still fan out to both generators");
}

/// `register_actor` followed by `unregister_actor` with the same `Arc`
/// returns `actor_count` to its prior value and silences the actor
/// round-trip.
#[test]
fn register_then_unregister_actor_round_trips() {
    let engine = Engine::new(meta_event());
    let before = engine.stats().actor_count;

    let (captured, actor) = capture(&engine, "Ping");
    assert_eq!(engine.stats().actor_count, before + 1);

    engine.process_event(Arc::new(TestEvent::new("Ping").with("code", 1i64)));
    assert_eq!(captured.lock().unwrap().len(), 1);

    engine.unregister_actor("Ping", &actor);
    assert_eq!(engine.stats().actor_count, before, "actor_count must return to its prior value");

    engine.process_event(Arc::new(TestEvent::new("Ping").with("code", 1i64)));
    assert_eq!(captured.lock().unwrap().len(), 1, "an unregistered actor must not fire again");
}

/// `unregister_actor` on an actor that was never registered, or already
/// removed, leaves the table unchanged (no panic, no accidental removal of
/// other actors on the same event name).
#[test]
fn unregister_actor_is_a_no_op_when_absent() {
    let engine = Engine::new(meta_event());
    let (captured_a, actor_a) = capture(&engine, "Ping");
    let stray: ActorFn = Arc::new(|_e: EventRef| {});

    engine.unregister_actor("Ping", &stray);
    assert_eq!(engine.stats().actor_count, 1, "unregistering an unknown actor must not touch the real one");

    engine.process_event(Arc::new(TestEvent::new("Ping").with("code", 1i64)));
    assert_eq!(captured_a.lock().unwrap().len(), 1);

    engine.unregister_actor("Ping", &actor_a);
    engine.unregister_actor("Ping", &actor_a);
    assert_eq!(engine.stats().actor_count, 0, "unregistering the same actor twice must not underflow or panic");
}

/// Deleting one of two rules that share a primitive leaves the shared
/// primitive's dependers intact for the surviving rule, and the graph stays
/// fully functional for it (the arena-level half of the sharing scenario
/// exercised end-to-end, with `EventGenerator`/`Collector` machinery, in
/// `scenarios.rs`).
#[test]
fn deleting_one_sharer_keeps_the_shared_primitive_alive_for_the_other() {
    let engine = Engine::new(meta_event());
    engine.add_rules(&simple_pass_rule("RuleOne", "genOne", "DerivedOne")).unwrap();
    engine.add_rules(&simple_pass_rule("RuleTwo", "genTwo", "DerivedTwo")).unwrap();
    let shared_count = engine.stats().primitive_count;

    engine.delete_rule("RuleOne");
    assert_eq!(engine.stats().primitive_count, shared_count - 1, "only genOne should be removed");

    let (captured_two, _) = capture(&engine, "DerivedTwo");
    engine.process_event(Arc::new(TestEvent::new("Ping").with("code", 1i64)));
    assert_eq!(captured_two.lock().unwrap().len(), 1, "RuleTwo must still fire through the shared gate");

    engine.delete_rule("RuleTwo");
    assert_eq!(engine.stats().primitive_count, 0, "the shared gate is torn down once its last depender is gone");
}
