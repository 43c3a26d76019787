//! `SpeedAlarm`: fires once more than `MaximumSpeed` positive
//! inputs land inside any sliding `Period`-second window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{PrimitiveBuild, SetupContext};
use crate::event::Context;
use crate::signal::{SignalSource, Triggerable};
use crate::value::{Value, ValueExt};

struct State {
    queue: VecDeque<(Instant, i64)>,
    total: i64,
}

/// "More than `maximum` within any `Period`": trimmed lazily on every input,
/// not by a background sweeper (same lazy-expiry posture as `Accumulator`
/// and the `Collector` family).
pub struct SpeedAlarm {
    maximum: i64,
    period: Duration,
    state: Mutex<State>,
    primary: Arc<SignalSource>,
}

impl Triggerable for SpeedAlarm {
    fn trigger(&self, parameter: Value, context: Context) {
        let Some(value) = parameter.as_i64_checked() else {
            tracing::warn!(?parameter, "SpeedAlarm expected an integer parameter");
            return;
        };
        if value == 0 {
            let mut state = self.state.lock();
            state.queue.clear();
            state.total = 0;
            return;
        }
        if value < 0 {
            tracing::warn!(?parameter, "SpeedAlarm expected a positive integer parameter");
            return;
        }

        let mut state = self.state.lock();
        let now = Instant::now();
        state.queue.push_back((now, value));
        state.total += value;

        if state.total > self.maximum {
            let cutoff = now.checked_sub(self.period).unwrap_or(now);
            while let Some(&(front, front_value)) = state.queue.front() {
                if front < cutoff {
                    state.queue.pop_front();
                    state.total -= front_value;
                } else {
                    break;
                }
            }
        }

        if state.total > self.maximum {
            state.queue.clear();
            state.total = 0;
            drop(state);
            self.primary.trigger(context);
        }
    }
}

pub fn build(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let maximum = config
        .get("MaximumSpeed")
        .and_then(ValueExt::as_i64_checked)
        .ok_or("SpeedAlarm requires integer config 'MaximumSpeed'")?;
    let period_secs = config
        .get("Period")
        .and_then(ValueExt::as_i64_checked)
        .ok_or("SpeedAlarm requires integer config 'Period' (seconds)")?;
    if period_secs <= 0 {
        return Err("SpeedAlarm 'Period' must be positive".into());
    }
    let primary = SignalSource::new();
    let node = Arc::new(SpeedAlarm {
        maximum,
        period: Duration::from_secs(period_secs as u64),
        state: Mutex::new(State { queue: VecDeque::new(), total: 0 }),
        primary: primary.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "SpeedAlarm",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}
