//! The primitive arena: id-keyed storage, `depender_count` bookkeeping, and
//! the sharing detector that merges equivalent primitives across rules.
//!
//! A primitive survives as long as `depender_count > 0`. There is no GC
//! sweep: liveness is exact and maintained incrementally by
//! `compiler.rs` and `remover.rs`, never approximated.

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::id::{PrimitiveId, SourceId};
use crate::macro_eval::ParamTemplate;
use crate::signal::{SignalSource, Triggerable};
use crate::value::Value;

/// Capability tag for primitives that expose a synchronous value read.
pub trait Checkable: Send + Sync {
    fn check(&self, key: Option<&Value>) -> Value;
}

/// One arena-held primitive: its identity, its outbound port(s), whatever
/// capability tags it carries, and the bookkeeping needed for sharing and
/// deletion.
///
/// `node` is the actual stateful implementation, type-erased behind
/// `Triggerable` so the arena need not know about the ten concrete primitive
/// structs in `crate::primitives`.
pub struct PrimitiveHandle {
    pub id: PrimitiveId,
    pub kind: &'static str,
    /// The primitive's own configuration, normalized to `Value` so it can be
    /// compared byte-for-byte by the sharing detector's `same_config?` check.
    pub config: Value,
    pub node: Arc<dyn Triggerable>,
    pub primary: Arc<SignalSource>,
    pub negative: Option<Arc<SignalSource>>,
    pub checkable: Option<Arc<dyn Checkable>>,
    /// Capability tag: receives no inbound signals. Set for `TimerSource`
    /// only.
    pub non_targetable: bool,
    /// The edges that feed this primitive, fixed at construction time and
    /// never mutated afterward: a primitive is either reused as-is by the
    /// sharing detector or a new one is built; an existing node's inbound set
    /// is never extended in place: sharing requires an *identical* inbound
    /// set.
    pub inbound: Vec<(SourceId, Option<ParamTemplate>)>,
    /// Set only for `Checker` primitives: the `PrimitiveId` of the
    /// `Checkable` dependee named by `CheckTarget`. This is a value
    /// dependency, not a signal edge, so it lives outside `inbound`; the
    /// rule remover walks it too, and it counts against the target's
    /// `depender_count`.
    pub check_target: Option<PrimitiveId>,
    /// See `DESIGN.md` "Reading `depender_count`": the number of live
    /// downstream consumers connected from this primitive's own outbound
    /// source(s), plus the number of live `Checker`s naming it as
    /// `CheckTarget`.
    depender_count: AtomicUsize,
}

impl PrimitiveHandle {
    /// `depender_count` always starts at zero; callers bump it via
    /// `inc_dependers` as downstream edges are wired, mirroring how the
    /// live graph itself is only ever grown edge-by-edge.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PrimitiveId,
        kind: &'static str,
        config: Value,
        node: Arc<dyn Triggerable>,
        primary: Arc<SignalSource>,
        negative: Option<Arc<SignalSource>>,
        checkable: Option<Arc<dyn Checkable>>,
        non_targetable: bool,
        inbound: Vec<(SourceId, Option<ParamTemplate>)>,
        check_target: Option<PrimitiveId>,
    ) -> Self {
        PrimitiveHandle {
            id,
            kind,
            config,
            node,
            primary,
            negative,
            checkable,
            non_targetable,
            inbound,
            check_target,
            depender_count: AtomicUsize::new(0),
        }
    }

    pub fn depender_count(&self) -> usize {
        self.depender_count.load(Ordering::SeqCst)
    }

    pub fn inc_dependers(&self) {
        self.depender_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the count *after* decrementing.
    pub fn dec_dependers(&self) -> usize {
        self.depender_count.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

impl std::fmt::Debug for PrimitiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("depender_count", &self.depender_count())
            .finish()
    }
}

/// Id-keyed storage for every live primitive, plus a reverse index from a
/// primitive's own outbound `SourceId`s back to the owning `PrimitiveId` (an
/// event dispatcher's `SourceId` has no entry here, only primitive-owned
/// sources do). The reverse index is what lets `remover.rs` walk backward
/// from a primitive to the primitive (if any) that feeds it.
#[derive(Default)]
pub struct PrimitiveArena {
    primitives: RwLock<HashMap<PrimitiveId, Arc<PrimitiveHandle>>>,
    source_owner: RwLock<HashMap<SourceId, PrimitiveId>>,
}

impl PrimitiveArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly built primitive. The caller is responsible for
    /// having already wired `handle.inbound` to the live graph (this only
    /// indexes the handle itself).
    pub fn insert(&self, handle: PrimitiveHandle) -> Arc<PrimitiveHandle> {
        let handle = Arc::new(handle);
        self.source_owner.write().insert(handle.primary.id, handle.id);
        if let Some(neg) = &handle.negative {
            self.source_owner.write().insert(neg.id, handle.id);
        }
        self.primitives.write().insert(handle.id, handle.clone());
        handle
    }

    pub fn get(&self, id: PrimitiveId) -> Option<Arc<PrimitiveHandle>> {
        self.primitives.read().get(&id).cloned()
    }

    /// The primitive, if any, whose outbound source is `source_id`. `None`
    /// means `source_id` belongs to an event-name dispatcher rather than a
    /// primitive.
    pub fn owner_of(&self, source_id: SourceId) -> Option<PrimitiveId> {
        self.source_owner.read().get(&source_id).copied()
    }

    /// Physically removes a primitive from the arena. Disconnecting it from
    /// its inbound sources and decrementing their `depender_count` is the
    /// caller's job (`remover.rs`); this only drops the arena's own
    /// references so the handle (and whatever it owns) can be freed.
    pub fn remove(&self, id: PrimitiveId) -> Option<Arc<PrimitiveHandle>> {
        let handle = self.primitives.write().remove(&id)?;
        self.source_owner.write().remove(&handle.primary.id);
        if let Some(neg) = &handle.negative {
            self.source_owner.write().remove(&neg.id);
        }
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.primitives.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<PrimitiveId> {
        self.primitives.read().keys().copied().collect()
    }

    /// The sharing detector: among the primitives currently
    /// connected downstream of `first_source`, find one whose type, config,
    /// and full inbound edge set (by source identity and per-edge template
    /// equality) match exactly. Called with the new node's would-be inbound
    /// set already assembled, in topological order, so any earlier twin has
    /// already been settled.
    pub fn find_shareable(
        &self,
        first_source: &Arc<SignalSource>,
        kind: &str,
        config: &Value,
        inbound: &[(SourceId, Option<ParamTemplate>)],
    ) -> Option<Arc<PrimitiveHandle>> {
        for candidate_id in first_source.target_primitive_ids() {
            let Some(candidate) = self.get(candidate_id) else { continue };
            if candidate.kind != kind || &candidate.config != config {
                continue;
            }
            if inbound_sets_match(&candidate.inbound, inbound) {
                return Some(candidate);
            }
        }
        None
    }
}

/// Order-insensitive: a rule description's `ConnectTo` is a map, so two
/// structurally identical inbound sets built from separately-deserialized
/// maps are not guaranteed to enumerate in the same order. Sharing cares
/// about the *set* of `(source, template)` pairs, not their enumeration
/// order, so both sides are sorted by `SourceId` before comparing.
fn inbound_sets_match(
    a: &[(SourceId, Option<ParamTemplate>)],
    b: &[(SourceId, Option<ParamTemplate>)],
) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<_> = a.iter().collect();
    let mut b: Vec<_> = b.iter().collect();
    a.sort_by_key(|(id, _)| *id);
    b.sort_by_key(|(id, _)| *id);
    a.iter().zip(b.iter()).all(|((sa, ta), (sb, tb))| {
        sa == sb
            && match (ta, tb) {
                (None, None) => true,
                (Some(x), Some(y)) => x.same_as(y),
                _ => false,
            }
    })
}
