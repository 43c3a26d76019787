//! `Accumulator`: a running total over a sliding time window,
//! firing once the total crosses a threshold.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{PrimitiveBuild, SetupContext};
use crate::event::Context;
use crate::signal::{SignalSource, Triggerable};
use crate::value::{Value, ValueExt};

struct Entry {
    value: i64,
    context: Context,
    deadline: Option<Instant>,
}

struct State {
    queue: VecDeque<Entry>,
    total: i64,
}

/// The emitted context is built from a snapshot of the queue taken
/// *before* clearing, so the triggering input is always present in the
/// output.
pub struct Accumulator {
    threshold: i64,
    timeout: Option<Duration>,
    state: Mutex<State>,
    primary: Arc<SignalSource>,
}

impl Triggerable for Accumulator {
    fn trigger(&self, parameter: Value, context: Context) {
        if parameter.as_str_checked() == Some("Reset") {
            let mut state = self.state.lock();
            state.queue.clear();
            state.total = 0;
            return;
        }
        let Some(value) = parameter.as_i64_checked() else {
            tracing::warn!(?parameter, "Accumulator expected an integer or \"Reset\"");
            return;
        };

        let mut state = self.state.lock();
        let now = Instant::now();
        if self.timeout.is_some() {
            while let Some(front) = state.queue.front() {
                match front.deadline {
                    Some(d) if d <= now => {
                        state.total -= front.value;
                        state.queue.pop_front();
                    }
                    _ => break,
                }
            }
        }

        let deadline = self.timeout.map(|t| now + t);
        state.queue.push_back(Entry { value, context: context.clone(), deadline });
        state.total += value;

        if state.total >= self.threshold {
            let total = state.total;
            // Snapshot before clearing, so the just-pushed triggering entry
            // is included in the emitted context.
            let contexts: Vec<Context> = state.queue.iter().map(|e| e.context.clone()).collect();
            state.queue.clear();
            state.total = 0;
            drop(state);

            let mut emitted = Vec::with_capacity(contexts.len() + 1);
            emitted.push(Context::Value(Value::from(total)));
            emitted.extend(contexts);
            self.primary.trigger(Context::List(emitted));
        }
    }
}

pub fn build(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let threshold = config
        .get("Threshold")
        .and_then(ValueExt::as_i64_checked)
        .ok_or("Accumulator requires integer config 'Threshold'")?;
    let timeout = match config.get("Timeout") {
        None | Some(Value::Null) => None,
        Some(v) => Some(Duration::from_millis(
            v.as_i64_checked().ok_or("Accumulator 'Timeout' must be an integer (milliseconds)")? as u64,
        )),
    };
    let primary = SignalSource::new();
    let node = Arc::new(Accumulator {
        threshold,
        timeout,
        state: Mutex::new(State { queue: VecDeque::new(), total: 0 }),
        primary: primary.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "Accumulator",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}
