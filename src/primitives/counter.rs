//! `BasicCounter`, `CountdownCounter`, `RepeatCounter`: single-field state
//! machines, using lock-free atomic compare-and-swap / increment rather
//! than a mutex.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{PrimitiveBuild, SetupContext};
use crate::arena::Checkable;
use crate::event::Context;
use crate::signal::{SignalSource, Triggerable};
use crate::value::{Value, ValueExt};

/// `Checkable`, no outbound signal: `+1`/`-1`/`0` (reset), observed via
/// `check()`.
pub struct BasicCounter {
    value: AtomicI64,
}

impl Triggerable for BasicCounter {
    fn trigger(&self, parameter: Value, _context: Context) {
        match parameter.as_i64_checked() {
            Some(1) => {
                self.value.fetch_add(1, Ordering::SeqCst);
            }
            Some(-1) => {
                self.value.fetch_sub(1, Ordering::SeqCst);
            }
            Some(0) => {
                self.value.store(0, Ordering::SeqCst);
            }
            _ => tracing::warn!(?parameter, "BasicCounter expected +1, -1 or 0"),
        }
    }
}

impl Checkable for BasicCounter {
    fn check(&self, _key: Option<&Value>) -> Value {
        Value::from(self.value.load(Ordering::SeqCst))
    }
}

pub fn build_basic_counter(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    if !config.is_null() && config.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
        return Err("BasicCounter takes no configuration".into());
    }
    let node = Arc::new(BasicCounter { value: AtomicI64::new(0) });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "BasicCounter",
        config: Value::Null,
        node: node.clone(),
        primary: SignalSource::new(),
        negative: None,
        checkable: Some(node),
        non_targetable: false,
    })
}

/// Decrements on any non-zero parameter; fires the primary source exactly
/// once per cycle on the transition to zero, then pauses every inbound
/// source so upstream stops issuing; `0` resets to `StartFrom` and resumes.
pub struct CountdownCounter {
    start_from: i64,
    value: AtomicI64,
    id: crate::id::PrimitiveId,
    primary: Arc<SignalSource>,
    inbound: Vec<Arc<SignalSource>>,
}

impl Triggerable for CountdownCounter {
    fn trigger(&self, parameter: Value, context: Context) {
        match parameter.as_i64_checked() {
            Some(0) => {
                self.value.store(self.start_from, Ordering::SeqCst);
                for src in &self.inbound {
                    src.resume(self.id);
                }
            }
            Some(n) if n != 0 => {
                let mut reached_zero = false;
                loop {
                    let current = self.value.load(Ordering::SeqCst);
                    let next = (current - 1).max(0);
                    if self
                        .value
                        .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        reached_zero = current > 0 && next == 0;
                        break;
                    }
                }
                if reached_zero {
                    self.primary.trigger(context);
                    for src in &self.inbound {
                        src.pause(self.id);
                    }
                }
            }
            _ => tracing::warn!(?parameter, "CountdownCounter expected an integer parameter"),
        }
    }
}

pub fn build_countdown_counter(
    config: &Value,
    ctx: &SetupContext,
) -> Result<PrimitiveBuild, String> {
    let start_from = config
        .get("StartFrom")
        .and_then(ValueExt::as_i64_checked)
        .ok_or("CountdownCounter requires integer config 'StartFrom'")?;
    let primary = SignalSource::new();
    let node = Arc::new(CountdownCounter {
        start_from,
        value: AtomicI64::new(start_from),
        id: ctx.id,
        primary: primary.clone(),
        inbound: ctx.inbound.to_vec(),
    });
    Ok(PrimitiveBuild {
        kind: "CountdownCounter",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}

/// Each non-zero trigger decrements; reaching (what would be) zero fires and
/// resets to `RestartAt` in the same step. `0` forces a silent reset.
pub struct RepeatCounter {
    restart_at: i64,
    value: AtomicI64,
    primary: Arc<SignalSource>,
}

impl Triggerable for RepeatCounter {
    fn trigger(&self, parameter: Value, context: Context) {
        match parameter.as_i64_checked() {
            Some(0) => {
                self.value.store(self.restart_at, Ordering::SeqCst);
            }
            Some(n) if n != 0 => {
                let mut fired = false;
                loop {
                    let current = self.value.load(Ordering::SeqCst);
                    let (next, will_fire) =
                        if current <= 1 { (self.restart_at, true) } else { (current - 1, false) };
                    if self
                        .value
                        .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        fired = will_fire;
                        break;
                    }
                }
                if fired {
                    self.primary.trigger(context);
                }
            }
            _ => tracing::warn!(?parameter, "RepeatCounter expected an integer parameter"),
        }
    }
}

pub fn build_repeat_counter(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let restart_at = config
        .get("RestartAt")
        .and_then(ValueExt::as_i64_checked)
        .ok_or("RepeatCounter requires integer config 'RestartAt'")?;
    if restart_at <= 0 {
        return Err("RepeatCounter 'RestartAt' must be positive".into());
    }
    let primary = SignalSource::new();
    let node =
        Arc::new(RepeatCounter { restart_at, value: AtomicI64::new(restart_at), primary: primary.clone() });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "RepeatCounter",
        config: config.clone(),
        node,
        primary,
        negative: None,
        checkable: None,
        non_targetable: false,
    })
}
