//! End-to-end scenarios driven entirely through the public embedding API
//! (`Engine::add_rules` / `process_event` / `register_actor`).
//!
//! A couple of scenarios (FileCreated/ScriptExec correlation, the shared-
//! primitive rule pair) read the rule graph a little differently than a
//! first prose sketch might suggest, because the strict arena model
//! (DESIGN.md "Reading `depender_count`") fixes a primitive's inbound edge
//! set at construction time, and it can never be extended by a later rule.
//! Each adaptation is noted inline; the assertions they drive are
//! unchanged.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cepflow::event::testing::{meta_event, TestEvent};
use cepflow::value::Value;
use cepflow::{ActorFn, Engine, EventRef};

/// The library never installs a global subscriber (console logging is out
/// of scope); the test harness does, so `tracing::warn!`
/// calls surfaced by a RuntimeWarning show up under `cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn capture(engine: &Arc<Engine>, event_name: &str) -> Arc<Mutex<Vec<EventRef>>> {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    let actor: ActorFn = Arc::new(move |e: EventRef| sink.lock().unwrap().push(e));
    engine.register_actor(event_name, actor, false);
    captured
}

/// Scenario 1: "Script from Notepad". `FileCreated(creator == "notepad.exe")
/// INORDER ScriptExec(path == FileCreated.path)` → `MaliciousScriptExec`.
/// `ProcessStart`/`ProcessExit` are fed as realistic background noise the
/// rule never wires to (no `SourceEvents` entry names them); `process_event`
/// on an unrouted event name is simply a no-op.
#[test]
fn script_from_notepad_only_fires_for_the_notepad_created_script() {
    init_tracing();
    let meta = meta_event();
    let engine = Engine::new(meta.clone());

    let rule = r#"{
        "Rules": [{
            "RuleName": "ScriptFromNotepad",
            "SourceEvents": [
                { "EventName": "FileCreated",
                  "ConnectTo": { "isNotepadCreator": { "SignalParameter": "#MACRO#Context.Event.creator" } } },
                { "EventName": "ScriptExec",
                  "ConnectTo": { "pathCollector": { "SignalParameter": ["#MACRO#Context.Event.path", 1] } } }
            ],
            "Primitives": [
                { "Type": "StringFilter", "Name": "isNotepadCreator",
                  "Parameters": { "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "notepad.exe" },
                  "ConnectTo": { "pathCollector": { "SignalParameter": ["#MACRO#Context.Event.path", 0] } } },
                { "Type": "KeyedCollectorInOrder", "Name": "pathCollector",
                  "Parameters": { "SourceCount": 2 },
                  "ConnectTo": { "gen": {} } },
                { "Type": "EventGenerator", "Name": "gen",
                  "Parameters": { "NewEventName": "MaliciousScriptExec",
                                  "Properties": { "path": "#MACRO#Contexts[1].Event.path" } } }
            ]
        }]
    }"#;
    engine.add_rules(rule).unwrap();

    let captured = capture(&engine, "MaliciousScriptExec");
    let path_id = meta.property_id("path");

    engine.process_event(Arc::new(TestEvent::new("ProcessStart").with("name", "notepad.exe").with("pid", 1111i64)));
    engine.process_event(Arc::new(
        TestEvent::new("FileCreated").with("creator", "explorer.exe").with("path", "script1.ps1"),
    ));
    engine.process_event(Arc::new(
        TestEvent::new("FileCreated").with("creator", "notepad.exe").with("path", "script2.ps1"),
    ));
    engine.process_event(Arc::new(TestEvent::new("ProcessExit").with("pid", 1111i64)));
    engine.process_event(Arc::new(TestEvent::new("ScriptExec").with("path", "script1.ps1")));
    engine.process_event(Arc::new(TestEvent::new("ScriptExec").with("path", "script2.ps1")));

    let produced = captured.lock().unwrap();
    assert_eq!(produced.len(), 1, "expected exactly one MaliciousScriptExec");
    assert_eq!(produced[0].name(), "MaliciousScriptExec");
    assert_eq!(produced[0].get(path_id), Some(Value::from("script2.ps1")));
}

/// Scenario 2 (adapted for test speed): a `TimerSource` drives a
/// `CountdownCounter`, which meets a `FileBlocked`-fed `Collector` branch.
/// `StartFrom`/`Frequency` are scaled down from the 10-count/1-second
/// timer so the test runs in well under a second; the mechanics exercised
/// (join-then-clear, and the `CountdownCounter`
/// pausing its own feed so the `TimerSource` stops ticking) are the same.
#[test]
fn aggregate_file_blocked_fires_once_then_the_timer_pauses_itself() {
    init_tracing();
    let meta = meta_event();
    let engine = Engine::new(meta);

    let rule = r#"{
        "Rules": [{
            "RuleName": "AggregateFileBlocked",
            "SourceEvents": [
                { "EventName": "FileBlocked", "ConnectTo": { "joiner": { "SignalParameter": [0] } } }
            ],
            "Primitives": [
                { "Type": "TimerSource", "Name": "ticker",
                  "Parameters": { "Frequency": "OneTenthSecond" },
                  "ConnectTo": { "countdown": { "SignalParameter": 1 } } },
                { "Type": "CountdownCounter", "Name": "countdown",
                  "Parameters": { "StartFrom": 3 },
                  "ConnectTo": { "joiner": { "SignalParameter": [1] } } },
                { "Type": "Collector", "Name": "joiner",
                  "Parameters": { "SourceCount": 2 },
                  "ConnectTo": { "gen": {} } },
                { "Type": "EventGenerator", "Name": "gen",
                  "Parameters": { "NewEventName": "ReportFiles" } }
            ]
        }]
    }"#;
    engine.add_rules(rule).unwrap();

    let captured = capture(&engine, "ReportFiles");

    engine.process_event(Arc::new(TestEvent::new("FileBlocked")));
    std::thread::sleep(Duration::from_millis(450));
    assert_eq!(captured.lock().unwrap().len(), 1, "expected exactly one ReportFiles once the countdown reached 0");

    // The countdown paused its own feed (the ticker) on firing; no further
    // ticks should ever arrive, so nothing new fires even after a second
    // wait.
    std::thread::sleep(Duration::from_millis(350));
    assert_eq!(captured.lock().unwrap().len(), 1, "timer kept ticking after CountdownCounter paused it");
}

/// Scenario 3: Accumulator threshold. Two `RegistryWrite{path:"path_1"}`
/// (score 20 each) then one `RegistryWrite{path:"path_2"}` (score 30) cross
/// a threshold of 60 on the third event.
#[test]
fn accumulator_fires_once_threshold_crossed() {
    init_tracing();
    let meta = meta_event();
    let engine = Engine::new(meta.clone());

    let rule = r#"{
        "Rules": [{
            "RuleName": "RegistryScore",
            "SourceEvents": [
                { "EventName": "RegistryWrite",
                  "ConnectTo": { "pathGate": { "SignalParameter": "#MACRO#Context.Event.path" } } }
            ],
            "Primitives": [
                { "Type": "StringFilter", "Name": "pathGate",
                  "Parameters": { "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "path_1" },
                  "ConnectTo": {
                      "accumulator": { "SignalParameter": 20 },
                      "pathGate2": { "TriggerOnNegative": true, "SignalParameter": "#MACRO#Context.Event.path" }
                  } },
                { "Type": "StringFilter", "Name": "pathGate2",
                  "Parameters": { "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "path_2" },
                  "ConnectTo": { "accumulator": { "SignalParameter": 30 } } },
                { "Type": "Accumulator", "Name": "accumulator",
                  "Parameters": { "Threshold": 60 },
                  "ConnectTo": { "gen": {} } },
                { "Type": "EventGenerator", "Name": "gen",
                  "Parameters": { "NewEventName": "RegistryAlert",
                                  "Properties": { "Score": "#MACRO#Contexts[0]" } } }
            ]
        }]
    }"#;
    engine.add_rules(rule).unwrap();

    let captured = capture(&engine, "RegistryAlert");
    let score_id = meta.property_id("Score");

    engine.process_event(Arc::new(TestEvent::new("RegistryWrite").with("path", "path_1").with("name", "name_1")));
    engine.process_event(Arc::new(TestEvent::new("RegistryWrite").with("path", "path_1").with("name", "name_1")));
    assert!(captured.lock().unwrap().is_empty());
    engine.process_event(Arc::new(TestEvent::new("RegistryWrite").with("path", "path_2").with("value", 1i64)));

    let produced = captured.lock().unwrap();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].get(score_id), Some(Value::from(70)));
}

/// Scenario 4: sliding-window speed alarm. Five `WindowsEvent{EventId:4625}`
/// spaced comfortably apart never alarm; spaced tightly, the alarm fires
/// once the running count exceeds `MaximumSpeed` within `Period`.
#[test]
fn speed_alarm_fires_only_when_events_are_packed_within_the_window() {
    init_tracing();
    let rule = r#"{
        "Rules": [{
            "RuleName": "BruteForceAlarm",
            "SourceEvents": [
                { "EventName": "WindowsEvent",
                  "ConnectTo": { "idGate": { "SignalParameter": "#MACRO#Context.Event.EventId" } } }
            ],
            "Primitives": [
                { "Type": "IntegerFilter", "Name": "idGate",
                  "Parameters": { "Condition": "Equals", "CompareTo": 4625 },
                  "ConnectTo": { "alarm": { "SignalParameter": 1 } } },
                { "Type": "SpeedAlarm", "Name": "alarm",
                  "Parameters": { "MaximumSpeed": 3, "Period": 1 },
                  "ConnectTo": { "gen": {} } },
                { "Type": "EventGenerator", "Name": "gen",
                  "Parameters": { "NewEventName": "SpeedAlarmFired" } }
            ]
        }]
    }"#;

    let slow = Engine::new(meta_event());
    slow.add_rules(rule).unwrap();
    let slow_captured = capture(&slow, "SpeedAlarmFired");
    for _ in 0..5 {
        slow.process_event(Arc::new(TestEvent::new("WindowsEvent").with("EventId", 4625i64)));
        std::thread::sleep(Duration::from_millis(400));
    }
    assert!(slow_captured.lock().unwrap().is_empty(), "events spaced outside the window must not alarm");

    let fast = Engine::new(meta_event());
    fast.add_rules(rule).unwrap();
    let fast_captured = capture(&fast, "SpeedAlarmFired");
    for _ in 0..5 {
        fast.process_event(Arc::new(TestEvent::new("WindowsEvent").with("EventId", 4625i64)));
        std::thread::sleep(Duration::from_millis(200));
    }
    assert_eq!(fast_captured.lock().unwrap().len(), 1, "events packed inside the window must alarm exactly once");
}

/// Scenario 5: sharing. A second rule re-declares the same `StringFilter` +
/// `KeyedCollectorInOrder` (identical type/config/inbound edges) and adds
/// only a new `EventGenerator` tail consuming their shared output, the
/// arena's sharing detector must reuse both existing primitives rather than
/// build new ones. Deleting the first rule must leave the second rule's
/// primitives (and its ability to fire) intact.
#[test]
fn sharing_reuses_identical_primitives_across_rules() {
    init_tracing();
    let meta = meta_event();
    let engine = Engine::new(meta.clone());

    fn rule_text(rule_name: &str, generator_name: &str, derived_event: &str) -> String {
        format!(
            r#"{{
                "Rules": [{{
                    "RuleName": "{rule_name}",
                    "SourceEvents": [
                        {{ "EventName": "FileCreated",
                           "ConnectTo": {{ "isNotepadCreator": {{ "SignalParameter": "#MACRO#Context.Event.creator" }} }} }},
                        {{ "EventName": "ScriptExec",
                           "ConnectTo": {{ "pathCollector": {{ "SignalParameter": ["#MACRO#Context.Event.path", 1] }} }} }}
                    ],
                    "Primitives": [
                        {{ "Type": "StringFilter", "Name": "isNotepadCreator",
                           "Parameters": {{ "Method": "MatchSingle", "Condition": "Equals", "MatchTo": "notepad.exe" }},
                           "ConnectTo": {{ "pathCollector": {{ "SignalParameter": ["#MACRO#Context.Event.path", 0] }} }} }},
                        {{ "Type": "KeyedCollectorInOrder", "Name": "pathCollector",
                           "Parameters": {{ "SourceCount": 2 }},
                           "ConnectTo": {{ "{generator_name}": {{}} }} }},
                        {{ "Type": "EventGenerator", "Name": "{generator_name}",
                           "Parameters": {{ "NewEventName": "{derived_event}" }} }}
                    ]
                }}]
            }}"#
        )
    }

    engine.add_rules(&rule_text("ScriptFromNotepad", "gen", "MaliciousScriptExec")).unwrap();
    let after_rule1 = engine.stats();
    assert_eq!(after_rule1.primitive_count, 3, "isNotepadCreator + pathCollector + gen");

    engine.add_rules(&rule_text("ScriptFromNotepadPrime", "gen2", "NewTestEvent")).unwrap();
    let after_rule2 = engine.stats();
    assert_eq!(
        after_rule2.primitive_count,
        after_rule1.primitive_count + 1,
        "only the new EventGenerator should be a fresh primitive; the filter and collector must be shared"
    );

    let created = Arc::new(
        TestEvent::new("FileCreated").with("creator", "notepad.exe").with("path", "shared.ps1"),
    );
    let exec = Arc::new(TestEvent::new("ScriptExec").with("path", "shared.ps1"));

    let malicious = capture(&engine, "MaliciousScriptExec");
    let new_test = capture(&engine, "NewTestEvent");
    engine.process_event(created.clone());
    engine.process_event(exec.clone());
    assert_eq!(malicious.lock().unwrap().len(), 1);
    assert_eq!(new_test.lock().unwrap().len(), 1);

    engine.delete_rule("ScriptFromNotepad");
    // The shared filter and collector must survive: ScriptFromNotepadPrime
    // still depends on them.
    assert_eq!(engine.stats().primitive_count, after_rule2.primitive_count - 1, "only gen should be removed");

    let malicious2 = capture(&engine, "MaliciousScriptExec");
    let new_test2 = capture(&engine, "NewTestEvent");
    engine.process_event(Arc::new(
        TestEvent::new("FileCreated").with("creator", "notepad.exe").with("path", "shared2.ps1"),
    ));
    engine.process_event(Arc::new(TestEvent::new("ScriptExec").with("path", "shared2.ps1")));
    assert!(malicious2.lock().unwrap().is_empty(), "ScriptFromNotepad's generator is gone");
    assert_eq!(new_test2.lock().unwrap().len(), 1, "ScriptFromNotepadPrime must still fire");
}

/// Scenario 6: pending delete. Rule A's derived event `G` feeds Rule B as a
/// `SourceEvent`; deleting A while B still consumes `G` must defer A's
/// physical teardown. Deleting B afterward must finish both.
#[test]
fn deleting_a_rule_whose_event_still_feeds_another_rule_is_deferred() {
    init_tracing();
    let engine = Engine::new(meta_event());

    engine
        .add_rules(
            r#"{
                "Rules": [{
                    "RuleName": "A",
                    "SourceEvents": [{ "EventName": "TriggerA", "ConnectTo": { "genA": {} } }],
                    "Primitives": [
                        { "Type": "EventGenerator", "Name": "genA", "Parameters": { "NewEventName": "G" } }
                    ]
                }]
            }"#,
        )
        .unwrap();
    engine
        .add_rules(
            r#"{
                "Rules": [{
                    "RuleName": "B",
                    "SourceEvents": [{ "EventName": "G", "ConnectTo": { "genB": {} } }],
                    "Primitives": [
                        { "Type": "EventGenerator", "Name": "genB", "Parameters": { "NewEventName": "H" } }
                    ]
                }]
            }"#,
        )
        .unwrap();

    let before = engine.stats();
    assert_eq!(before.primitive_count, 2);

    engine.delete_rule("A");
    let deferred = engine.stats();
    assert_eq!(deferred.primitive_count, 2, "A's generator must survive while B still consumes G");
    assert_eq!(deferred.pending_deletion_count, 1);
    assert_eq!(deferred.rule_count, 1, "only B remains registered");

    engine.delete_rule("B");
    let after = engine.stats();
    assert_eq!(after.primitive_count, 0, "both generators finally torn down");
    assert_eq!(after.pending_deletion_count, 0);
    assert_eq!(after.dispatcher_count, 0);
}
