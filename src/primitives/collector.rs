//! The `Collector` family: join `SourceCount` independent
//! inbound edges into one outbound context, unordered or pointer-ordered,
//! global or per-key.
//!
//! Signal parameter shape: `Value::Array([index])`,
//! `Value::Array([index, cancel_bool])` for the unkeyed variants, and
//! `Value::Array([key, index])` / `Value::Array([key, index, cancel_bool])`
//! / `Value::Array([key, "RemoveKey"])` for the keyed variants: the JSON
//! tuple encoding of the `(source_index, cancel?)` /
//! `(key, source_index, cancel?)` parameters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{PrimitiveBuild, SetupContext};
use crate::event::Context;
use crate::signal::{SignalSource, Triggerable};
use crate::value::{Value, ValueExt};

fn parse_timeouts(config: &Value, source_count: usize) -> Result<Option<Vec<Duration>>, String> {
    match config.get("Timeouts") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let arr = v.as_array().ok_or("'Timeouts' must be an array of integers (milliseconds)")?;
            if arr.len() != source_count {
                return Err(format!(
                    "'Timeouts' length {} does not match SourceCount {}",
                    arr.len(),
                    source_count
                ));
            }
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                let ms = v.as_i64_checked().ok_or("'Timeouts' entries must be integers")?;
                out.push(Duration::from_millis(ms.max(0) as u64));
            }
            Ok(Some(out))
        }
    }
}

fn source_count(config: &Value) -> Result<usize, String> {
    let n = config
        .get("SourceCount")
        .and_then(ValueExt::as_i64_checked)
        .ok_or("requires integer config 'SourceCount'")?;
    if n <= 0 {
        return Err("'SourceCount' must be positive".into());
    }
    Ok(n as usize)
}

/// `(index, cancel)` decoded from the `Value::Array` signal parameter.
fn parse_index_cancel(parameter: &Value) -> Option<(usize, bool)> {
    let arr = parameter.as_array()?;
    let index = arr.first()?.as_i64_checked()?;
    if index < 0 {
        return None;
    }
    let cancel = arr.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
    Some((index as usize, cancel))
}

/// `(key, index, cancel_or_remove)` decoded from the keyed variants'
/// signal parameter.
enum KeyedOp {
    Slot { key: Value, index: usize, cancel: bool },
    RemoveKey { key: Value },
}

fn parse_keyed(parameter: &Value) -> Option<KeyedOp> {
    let arr = parameter.as_array()?;
    let key = arr.first()?.clone();
    let second = arr.get(1)?;
    if let Some("RemoveKey") = second.as_str() {
        return Some(KeyedOp::RemoveKey { key });
    }
    let index = second.as_i64_checked()?;
    if index < 0 {
        return None;
    }
    let cancel = arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
    Some(KeyedOp::Slot { key, index: index as usize, cancel })
}

struct Slot {
    triggered: bool,
    context: Option<Context>,
    deadline: Option<Instant>,
}

fn empty_slots(n: usize) -> Vec<Slot> {
    (0..n).map(|_| Slot { triggered: false, context: None, deadline: None }).collect()
}

// --- Collector (unordered, unkeyed) -----------------------------------

struct CollectorState {
    slots: Vec<Slot>,
}

pub struct Collector {
    source_count: usize,
    timeouts: Option<Vec<Duration>>,
    state: Mutex<CollectorState>,
    primary: Arc<SignalSource>,
}

impl Triggerable for Collector {
    fn trigger(&self, parameter: Value, context: Context) {
        let Some((index, cancel)) = parse_index_cancel(&parameter) else {
            tracing::warn!(?parameter, "Collector expected (source_index, cancel?)");
            return;
        };
        if index >= self.source_count {
            tracing::warn!(index, "Collector source_index out of range");
            return;
        }

        let mut state = self.state.lock();
        let now = Instant::now();

        if cancel {
            let slot = &mut state.slots[index];
            slot.triggered = false;
            slot.context = None;
            slot.deadline = None;
            return;
        }

        let deadline = self.timeouts.as_ref().map(|t| now + t[index]);
        state.slots[index] = Slot { triggered: true, context: Some(context), deadline };

        for (i, slot) in state.slots.iter_mut().enumerate() {
            if i == index {
                continue;
            }
            if let Some(d) = slot.deadline {
                if d <= now {
                    slot.triggered = false;
                    slot.context = None;
                    slot.deadline = None;
                }
            }
        }

        if state.slots.iter().all(|s| s.triggered) {
            let contexts: Vec<Context> =
                state.slots.iter_mut().map(|s| s.context.take().unwrap()).collect();
            state.slots = empty_slots(self.source_count);
            drop(state);
            self.primary.trigger(Context::List(contexts));
        }
    }
}

pub fn build_collector(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let n = source_count(config).map_err(|e| format!("Collector {e}"))?;
    let timeouts = parse_timeouts(config, n).map_err(|e| format!("Collector {e}"))?;
    let primary = SignalSource::new();
    let node = Arc::new(Collector {
        source_count: n,
        timeouts,
        state: Mutex::new(CollectorState { slots: empty_slots(n) }),
        primary: primary.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "Collector",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}

// --- CollectorInOrder --------------------------------------------------

struct OrderedState {
    slots: Vec<Slot>,
    next_expected: usize,
}

pub struct CollectorInOrder {
    source_count: usize,
    timeouts: Option<Vec<Duration>>,
    state: Mutex<OrderedState>,
    primary: Arc<SignalSource>,
}

impl Triggerable for CollectorInOrder {
    fn trigger(&self, parameter: Value, context: Context) {
        let Some((index, cancel)) = parse_index_cancel(&parameter) else {
            tracing::warn!(?parameter, "CollectorInOrder expected (source_index, cancel?)");
            return;
        };
        if index >= self.source_count {
            tracing::warn!(index, "CollectorInOrder source_index out of range");
            return;
        }

        let mut state = self.state.lock();
        let now = Instant::now();

        if cancel {
            if index <= state.next_expected {
                for slot in state.slots[index..].iter_mut() {
                    slot.triggered = false;
                    slot.context = None;
                    slot.deadline = None;
                }
                state.next_expected = index;
            }
            return;
        }

        if index != state.next_expected {
            tracing::debug!(
                index,
                expected = state.next_expected,
                "CollectorInOrder ignored out-of-order trigger"
            );
            return;
        }

        // Lazily expire any already-satisfied earlier slot; a timeout on slot
        // k rewinds next_expected back to k.
        for i in 0..state.next_expected {
            if let Some(d) = state.slots[i].deadline {
                if d <= now {
                    for slot in state.slots[i..].iter_mut() {
                        slot.triggered = false;
                        slot.context = None;
                        slot.deadline = None;
                    }
                    state.next_expected = i;
                    if index != state.next_expected {
                        return;
                    }
                    break;
                }
            }
        }

        let deadline = self.timeouts.as_ref().map(|t| now + t[index]);
        state.slots[index] = Slot { triggered: true, context: Some(context), deadline };
        state.next_expected += 1;

        if state.next_expected == self.source_count {
            let contexts: Vec<Context> =
                state.slots.iter_mut().map(|s| s.context.take().unwrap()).collect();
            state.slots = empty_slots(self.source_count);
            state.next_expected = 0;
            drop(state);
            self.primary.trigger(Context::List(contexts));
        }
    }
}

pub fn build_collector_in_order(
    config: &Value,
    ctx: &SetupContext,
) -> Result<PrimitiveBuild, String> {
    let n = source_count(config).map_err(|e| format!("CollectorInOrder {e}"))?;
    let timeouts = parse_timeouts(config, n).map_err(|e| format!("CollectorInOrder {e}"))?;
    let primary = SignalSource::new();
    let node = Arc::new(CollectorInOrder {
        source_count: n,
        timeouts,
        state: Mutex::new(OrderedState { slots: empty_slots(n), next_expected: 0 }),
        primary: primary.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "CollectorInOrder",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}

// --- KeyedCollector -----------------------------------------------------

fn value_key(v: &Value) -> String {
    // Values come out of macros or literals and are compared "by value
    // equality"; serializing to a canonical string gives a
    // hashable key without requiring `Value` to implement `Hash`.
    v.to_string()
}

pub struct KeyedCollector {
    source_count: usize,
    timeouts: Option<Vec<Duration>>,
    state: Mutex<HashMap<String, CollectorState>>,
    primary: Arc<SignalSource>,
}

impl Triggerable for KeyedCollector {
    fn trigger(&self, parameter: Value, context: Context) {
        let Some(op) = parse_keyed(&parameter) else {
            tracing::warn!(?parameter, "KeyedCollector expected (key, source_index, cancel?) or (key, \"RemoveKey\")");
            return;
        };
        let mut state = self.state.lock();
        match op {
            KeyedOp::RemoveKey { key } => {
                state.remove(&value_key(&key));
            }
            KeyedOp::Slot { key, index, cancel } => {
                if index >= self.source_count {
                    tracing::warn!(index, "KeyedCollector source_index out of range");
                    return;
                }
                let entry = state
                    .entry(value_key(&key))
                    .or_insert_with(|| CollectorState { slots: empty_slots(self.source_count) });
                let now = Instant::now();

                if cancel {
                    let slot = &mut entry.slots[index];
                    slot.triggered = false;
                    slot.context = None;
                    slot.deadline = None;
                    return;
                }

                let deadline = self.timeouts.as_ref().map(|t| now + t[index]);
                entry.slots[index] = Slot { triggered: true, context: Some(context), deadline };

                for (i, slot) in entry.slots.iter_mut().enumerate() {
                    if i == index {
                        continue;
                    }
                    if let Some(d) = slot.deadline {
                        if d <= now {
                            slot.triggered = false;
                            slot.context = None;
                            slot.deadline = None;
                        }
                    }
                }

                if entry.slots.iter().all(|s| s.triggered) {
                    let contexts: Vec<Context> =
                        entry.slots.iter_mut().map(|s| s.context.take().unwrap()).collect();
                    let key_str = value_key(&key);
                    state.remove(&key_str);
                    drop(state);
                    self.primary.trigger(Context::List(contexts));
                }
            }
        }
    }
}

pub fn build_keyed_collector(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let n = source_count(config).map_err(|e| format!("KeyedCollector {e}"))?;
    let timeouts = parse_timeouts(config, n).map_err(|e| format!("KeyedCollector {e}"))?;
    let primary = SignalSource::new();
    let node = Arc::new(KeyedCollector {
        source_count: n,
        timeouts,
        state: Mutex::new(HashMap::new()),
        primary: primary.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "KeyedCollector",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}

// --- KeyedCollectorInOrder ----------------------------------------------

pub struct KeyedCollectorInOrder {
    source_count: usize,
    timeouts: Option<Vec<Duration>>,
    state: Mutex<HashMap<String, OrderedState>>,
    primary: Arc<SignalSource>,
}

impl Triggerable for KeyedCollectorInOrder {
    fn trigger(&self, parameter: Value, context: Context) {
        let Some(op) = parse_keyed(&parameter) else {
            tracing::warn!(
                ?parameter,
                "KeyedCollectorInOrder expected (key, source_index, cancel?) or (key, \"RemoveKey\")"
            );
            return;
        };
        let mut state = self.state.lock();
        match op {
            KeyedOp::RemoveKey { key } => {
                state.remove(&value_key(&key));
            }
            KeyedOp::Slot { key, index, cancel } => {
                if index >= self.source_count {
                    tracing::warn!(index, "KeyedCollectorInOrder source_index out of range");
                    return;
                }
                let key_str = value_key(&key);
                let entry = state
                    .entry(key_str.clone())
                    .or_insert_with(|| OrderedState { slots: empty_slots(self.source_count), next_expected: 0 });
                let now = Instant::now();

                if cancel {
                    if index <= entry.next_expected {
                        for slot in entry.slots[index..].iter_mut() {
                            slot.triggered = false;
                            slot.context = None;
                            slot.deadline = None;
                        }
                        entry.next_expected = index;
                    }
                    return;
                }

                if index != entry.next_expected {
                    tracing::debug!(
                        index,
                        expected = entry.next_expected,
                        "KeyedCollectorInOrder ignored out-of-order trigger"
                    );
                    return;
                }

                for i in 0..entry.next_expected {
                    if let Some(d) = entry.slots[i].deadline {
                        if d <= now {
                            for slot in entry.slots[i..].iter_mut() {
                                slot.triggered = false;
                                slot.context = None;
                                slot.deadline = None;
                            }
                            entry.next_expected = i;
                            if index != entry.next_expected {
                                return;
                            }
                            break;
                        }
                    }
                }

                let deadline = self.timeouts.as_ref().map(|t| now + t[index]);
                entry.slots[index] = Slot { triggered: true, context: Some(context), deadline };
                entry.next_expected += 1;

                if entry.next_expected == self.source_count {
                    let contexts: Vec<Context> =
                        entry.slots.iter_mut().map(|s| s.context.take().unwrap()).collect();
                    state.remove(&key_str);
                    drop(state);
                    self.primary.trigger(Context::List(contexts));
                }
            }
        }
    }
}

pub fn build_keyed_collector_in_order(
    config: &Value,
    ctx: &SetupContext,
) -> Result<PrimitiveBuild, String> {
    let n = source_count(config).map_err(|e| format!("KeyedCollectorInOrder {e}"))?;
    let timeouts = parse_timeouts(config, n).map_err(|e| format!("KeyedCollectorInOrder {e}"))?;
    let primary = SignalSource::new();
    let node = Arc::new(KeyedCollectorInOrder {
        source_count: n,
        timeouts,
        state: Mutex::new(HashMap::new()),
        primary: primary.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "KeyedCollectorInOrder",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::testing::TestEvent;
    use crate::signal::Triggerable as _;

    struct Capture(Arc<Mutex<Vec<Context>>>);
    impl Triggerable for Capture {
        fn trigger(&self, _parameter: Value, context: Context) {
            self.0.lock().push(context);
        }
    }

    fn ev(name: &str) -> Context {
        Context::Event(Arc::new(TestEvent::new(name)))
    }

    fn tuple(index: i64) -> Value {
        Value::Array(vec![Value::from(index)])
    }

    #[test]
    fn collector_fires_once_all_slots_set() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let primary = SignalSource::new();
        primary.connect(Arc::new(Capture(captured.clone())), None, None);
        let node = Collector {
            source_count: 2,
            timeouts: None,
            state: Mutex::new(CollectorState { slots: empty_slots(2) }),
            primary: primary.clone(),
        };
        node.trigger(tuple(0), ev("a"));
        assert!(captured.lock().is_empty());
        node.trigger(tuple(1), ev("b"));
        assert_eq!(captured.lock().len(), 1);
    }

    #[test]
    fn collector_in_order_rejects_out_of_order() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let primary = SignalSource::new();
        primary.connect(Arc::new(Capture(captured.clone())), None, None);
        let node = CollectorInOrder {
            source_count: 2,
            timeouts: None,
            state: Mutex::new(OrderedState { slots: empty_slots(2), next_expected: 0 }),
            primary: primary.clone(),
        };
        node.trigger(tuple(1), ev("b"));
        assert!(captured.lock().is_empty());
        node.trigger(tuple(0), ev("a"));
        assert!(captured.lock().is_empty());
        node.trigger(tuple(1), ev("b"));
        assert_eq!(captured.lock().len(), 1);
    }

    #[test]
    fn keyed_collector_tracks_independent_keys() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let primary = SignalSource::new();
        primary.connect(Arc::new(Capture(captured.clone())), None, None);
        let node = KeyedCollector {
            source_count: 2,
            timeouts: None,
            state: Mutex::new(HashMap::new()),
            primary: primary.clone(),
        };
        let key_a = Value::from(1111);
        let key_b = Value::from(2222);
        node.trigger(Value::Array(vec![key_a.clone(), Value::from(0)]), ev("a"));
        node.trigger(Value::Array(vec![key_b.clone(), Value::from(0)]), ev("x"));
        assert!(captured.lock().is_empty());
        node.trigger(Value::Array(vec![key_a, Value::from(1)]), ev("b"));
        assert_eq!(captured.lock().len(), 1);
        node.trigger(Value::Array(vec![key_b, Value::from(1)]), ev("y"));
        assert_eq!(captured.lock().len(), 2);
    }

    #[test]
    fn keyed_collector_remove_key_discards_entry() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let primary = SignalSource::new();
        primary.connect(Arc::new(Capture(captured.clone())), None, None);
        let node = KeyedCollector {
            source_count: 2,
            timeouts: None,
            state: Mutex::new(HashMap::new()),
            primary: primary.clone(),
        };
        let key = Value::from(1111);
        node.trigger(Value::Array(vec![key.clone(), Value::from(0)]), ev("a"));
        node.trigger(Value::Array(vec![key.clone(), Value::from("RemoveKey")]), Context::Value(Value::Null));
        assert!(node.state.lock().is_empty());
        node.trigger(Value::Array(vec![key, Value::from(1)]), ev("b"));
        assert!(captured.lock().is_empty());
    }
}
