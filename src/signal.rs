//! `SignalSource` / `SignalTarget`: directed-edge endpoints carrying
//! `(parameter, context)`.
//!
//! State lives behind a `parking_lot::Mutex`, with the decision to act
//! taken under the same critical section that updates the state. Here the
//! "state" is the list of connected targets plus their pause flags, and
//! "acting" is the synchronous fan-out call into each target.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::event::Context;
use crate::id::{PrimitiveId, SourceId};
use crate::macro_eval::ParamTemplate;

/// Where a fired signal ends up: either a primitive's inbound port or the
/// engine's own actor-dispatch link. Actor links never pause and carry no
/// template; they reuse this same trigger path so dispatch and
/// `EventGenerator` feedback into `process_event` share one mechanism.
pub trait Triggerable: Send + Sync {
    fn trigger(&self, parameter: Value, context: Context);
}

use crate::value::Value;

struct Edge {
    target: Arc<dyn Triggerable>,
    target_primitive: Option<PrimitiveId>,
    template: Option<ParamTemplate>,
    paused: bool,
}

struct SignalSourceInner {
    edges: Vec<Edge>,
    active_count: usize,
}

/// One outbound port. Holds an ordered list of `(target, per-edge
/// parameter template, paused?)` tuples and fires
/// `first_target_activated` / `all_targets_paused` lifecycle callbacks.
pub struct SignalSource {
    pub id: SourceId,
    inner: Mutex<SignalSourceInner>,
    on_first_activated: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    on_all_paused: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl SignalSource {
    pub fn new() -> Arc<Self> {
        Arc::new(SignalSource {
            id: SourceId::fresh(),
            inner: Mutex::new(SignalSourceInner { edges: Vec::new(), active_count: 0 }),
            on_first_activated: Mutex::new(None),
            on_all_paused: Mutex::new(None),
        })
    }

    /// Registers the `first_target_activated` / `all_targets_paused`
    /// lifecycle hooks. `TimerSource` uses these to start/stop its
    /// background thread.
    pub fn set_lifecycle(
        &self,
        on_first_activated: impl Fn() + Send + Sync + 'static,
        on_all_paused: impl Fn() + Send + Sync + 'static,
    ) {
        *self.on_first_activated.lock() = Some(Box::new(on_first_activated));
        *self.on_all_paused.lock() = Some(Box::new(on_all_paused));
    }

    /// Connects a target with a (possibly absent) per-edge parameter
    /// template. Returns nothing; reciprocal bookkeeping (the target
    /// recording this source for reverse traversal) is the caller's job,
    /// see `crate::arena::PrimitiveArena::connect`.
    pub fn connect(
        &self,
        target: Arc<dyn Triggerable>,
        target_primitive: Option<PrimitiveId>,
        template: Option<ParamTemplate>,
    ) {
        let mut inner = self.inner.lock();
        inner.edges.push(Edge { target, target_primitive, template, paused: false });
        inner.active_count += 1;
        if inner.active_count == 1 {
            drop(inner);
            if let Some(cb) = self.on_first_activated.lock().as_ref() {
                cb();
            }
        }
    }

    /// Target count, live or paused: used by the rule remover to decide
    /// whether a dispatcher's target set became empty.
    pub fn edge_count(&self) -> usize {
        self.inner.lock().edges.len()
    }

    pub fn target_primitive_ids(&self) -> Vec<PrimitiveId> {
        self.inner.lock().edges.iter().filter_map(|e| e.target_primitive).collect()
    }

    /// Disconnects every edge whose target primitive matches `id`. Used by
    /// the rule remover. If this drains the
    /// last active target, fires `all_targets_paused` exactly as a pause
    /// would. `TimerSource` relies on this to stop its background timer
    /// when its sole rule is torn down rather than merely paused.
    pub fn disconnect(&self, id: PrimitiveId) {
        let mut inner = self.inner.lock();
        let active_removed =
            inner.edges.iter().filter(|e| e.target_primitive == Some(id) && !e.paused).count();
        inner.edges.retain(|e| e.target_primitive != Some(id));
        if active_removed > 0 {
            inner.active_count = inner.active_count.saturating_sub(active_removed);
            let now_all_paused = inner.active_count == 0;
            drop(inner);
            if now_all_paused {
                if let Some(cb) = self.on_all_paused.lock().as_ref() {
                    cb();
                }
            }
        }
    }

    /// Pause/resume the edge whose target is `target_id`. A paused target
    /// receives no trigger from this source until resumed.
    pub fn pause(&self, target_id: PrimitiveId) {
        self.set_paused(target_id, true);
    }

    pub fn resume(&self, target_id: PrimitiveId) {
        self.set_paused(target_id, false);
    }

    fn set_paused(&self, target_id: PrimitiveId, paused: bool) {
        let mut inner = self.inner.lock();
        let mut changed = false;
        for edge in inner.edges.iter_mut() {
            if edge.target_primitive == Some(target_id) && edge.paused != paused {
                edge.paused = paused;
                changed = true;
            }
        }
        if !changed {
            return;
        }
        if paused {
            inner.active_count = inner.active_count.saturating_sub(1);
            let now_all_paused = inner.active_count == 0;
            drop(inner);
            if now_all_paused {
                if let Some(cb) = self.on_all_paused.lock().as_ref() {
                    cb();
                }
            }
        } else {
            let was_zero = inner.active_count == 0;
            inner.active_count += 1;
            drop(inner);
            if was_zero {
                if let Some(cb) = self.on_first_activated.lock().as_ref() {
                    cb();
                }
            }
        }
    }

    /// Fans `context` out to every connected, non-paused target, in
    /// insertion order. A macro
    /// evaluation failure is a `RuntimeWarning`: it is logged and only that
    /// target is skipped; fan-out to the remaining targets continues.
    pub fn trigger(&self, context: Context) {
        // Snapshot the edges under the lock, then call out without holding
        // it: a downstream primitive triggering back into this source (an
        // unusual but not forbidden topology for independent primitives)
        // must not deadlock on this source's own lock.
        let snapshot: Vec<(Arc<dyn Triggerable>, Option<ParamTemplate>)> = {
            let inner = self.inner.lock();
            inner
                .edges
                .iter()
                .filter(|e| !e.paused)
                .map(|e| (e.target.clone(), e.template.clone()))
                .collect()
        };

        for (target, template) in snapshot {
            let parameter = match &template {
                None => Value::Null,
                Some(t) => match t.evaluate(&context) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "macro evaluation failed, skipping target");
                        continue;
                    }
                },
            };
            target.trigger(parameter, context.clone());
        }
    }
}

impl std::fmt::Debug for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSource").field("id", &self.id).finish()
    }
}
