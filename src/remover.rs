//! `DeleteRule`: reverse reachability from a rule's `EventGenerator` back
//! through its inbound edges, an `involve_count` vs. `depender_count`
//! liveness test per primitive, and pending-delete recovery for rules
//! whose derived event still feeds another live rule.

use std::collections::{HashMap as StdHashMap, HashSet, VecDeque};

use crate::arena::PrimitiveArena;
use crate::engine::Engine;
use crate::id::{PrimitiveId, SourceId};

/// Idempotent: the first call removes `rule_name` from `engine.rules`, so
/// a second call finds nothing
/// and returns immediately, whether or not the first call's primitives have
/// finished physically tearing down yet.
pub(crate) fn delete_rule(engine: &Engine, rule_name: &str) {
    let derived_event_name = match engine.rules.write().remove(rule_name) {
        Some(compiled) => compiled.derived_event_name,
        None => return,
    };
    engine.rule_to_event.write().remove(rule_name);
    // Step 1: unconditionally drop actors registered for the event this
    // rule produces, pending or not.
    engine.actors.write().remove(&derived_event_name);

    try_finish(engine, &derived_event_name, rule_name);
    resolve_pending(engine);
}

/// Attempts to physically tear down the rule rooted at `derived_event_name`.
/// Returns `true` if it is fully gone (either just now or already earlier),
/// `false` if deferred because something still consumes the event.
fn try_finish(engine: &Engine, derived_event_name: &str, rule_name: &str) -> bool {
    let Some(generator_id) = engine.event_generators.read().get(derived_event_name).copied() else {
        // Already finished by an earlier call.
        return true;
    };

    // Step 4: a rule's derived event may itself be a SourceEvent consumed by
    // another live rule (e.g. Rule-A's derived event feeds Rule-B).
    // As long as something is still wired to that dispatcher, or a host
    // actor is still registered for it, the EventGenerator producing it,
    // and anything only it depends on, must stay alive.
    let consumed = engine
        .dispatcher
        .read()
        .get(derived_event_name)
        .map(|s| s.edge_count() > 0)
        .unwrap_or(false);
    let has_actors =
        engine.actors.read().get(derived_event_name).map(|v| !v.is_empty()).unwrap_or(false);
    if consumed || has_actors {
        engine
            .pending_deletions
            .write()
            .insert(derived_event_name.to_string(), rule_name.to_string());
        tracing::debug!(
            rule = %rule_name,
            event = %derived_event_name,
            "rule deletion deferred: derived event still consumed"
        );
        return false;
    }

    engine.pending_deletions.write().remove(derived_event_name);
    physically_delete(engine, generator_id);
    engine.event_generators.write().remove(derived_event_name);
    tracing::debug!(rule = %rule_name, event = %derived_event_name, "rule fully deleted");
    true
}

/// Step 6: deleting primitives can drain some other event's dispatcher to
/// zero targets, which may be exactly what an earlier pending-delete was
/// waiting on. Repeats until a full pass makes no further progress.
fn resolve_pending(engine: &Engine) {
    loop {
        let snapshot: Vec<(String, String)> =
            engine.pending_deletions.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut progressed = false;
        for (event_name, rule_name) in snapshot {
            let still_pending = engine
                .pending_deletions
                .read()
                .get(&event_name)
                .map(|r| r == &rule_name)
                .unwrap_or(false);
            if still_pending && try_finish(engine, &event_name, &rule_name) {
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}

/// Compute the candidate set and
/// `involve_count` by BFS from `generator_id` backward, mark and propagate
/// non-deletable primitives, then disconnect and remove whatever remains.
fn physically_delete(engine: &Engine, generator_id: PrimitiveId) {
    let (candidates, involve_count) = backward_reach(&engine.arena, generator_id);

    let mut non_deletable: HashSet<PrimitiveId> = HashSet::new();
    for &id in &candidates {
        if let Some(handle) = engine.arena.get(id) {
            let reached = involve_count.get(&id).copied().unwrap_or(0);
            if reached < handle.depender_count() {
                non_deletable.insert(id);
            }
        }
    }
    propagate_non_deletable(&engine.arena, &candidates, &mut non_deletable);

    for &id in &candidates {
        if non_deletable.contains(&id) {
            continue;
        }
        let Some(handle) = engine.arena.get(id) else { continue };
        for (source_id, _) in &handle.inbound {
            disconnect_from_source(engine, *source_id, id);
        }
        if let Some(target_id) = handle.check_target {
            if let Some(target_handle) = engine.arena.get(target_id) {
                target_handle.dec_dependers();
            }
        }
        engine.arena.remove(id);
    }
}

/// BFS backward from `start` along inbound signal edges and `Checker`
/// `CheckTarget` dependencies, accumulating `involve_count`: "how many
/// paths from the start reached it through this rule". A primitive
/// reachable by `N` distinct paths gets `involve_count == N`, even if
/// visited more than once; the graph is acyclic at the primitive level so
/// this always terminates.
fn backward_reach(
    arena: &PrimitiveArena,
    start: PrimitiveId,
) -> (Vec<PrimitiveId>, StdHashMap<PrimitiveId, usize>) {
    let mut involve_count: StdHashMap<PrimitiveId, usize> = StdHashMap::new();
    let mut order: Vec<PrimitiveId> = Vec::new();
    let mut seen: HashSet<PrimitiveId> = HashSet::new();
    let mut queue: VecDeque<(PrimitiveId, usize)> = VecDeque::new();
    queue.push_back((start, 1));

    while let Some((id, contrib)) = queue.pop_front() {
        if seen.insert(id) {
            order.push(id);
        }
        *involve_count.entry(id).or_insert(0) += contrib;

        if let Some(handle) = arena.get(id) {
            for (source_id, _) in &handle.inbound {
                if let Some(pred) = arena.owner_of(*source_id) {
                    queue.push_back((pred, contrib));
                }
            }
            if let Some(check_target) = handle.check_target {
                queue.push_back((check_target, contrib));
            }
        }
    }

    (order, involve_count)
}

/// Propagate non-deletable backward through its own dependees: a
/// retained primitive's own upstream feeds must be
/// retained too, since the retained primitive continues to need them.
fn propagate_non_deletable(
    arena: &PrimitiveArena,
    candidates: &[PrimitiveId],
    non_deletable: &mut HashSet<PrimitiveId>,
) {
    let candidate_set: HashSet<PrimitiveId> = candidates.iter().copied().collect();
    let mut changed = true;
    while changed {
        changed = false;
        let snapshot: Vec<PrimitiveId> = non_deletable.iter().copied().collect();
        for id in snapshot {
            let Some(handle) = arena.get(id) else { continue };
            for (source_id, _) in &handle.inbound {
                if let Some(pred) = arena.owner_of(*source_id) {
                    if candidate_set.contains(&pred) && non_deletable.insert(pred) {
                        changed = true;
                    }
                }
            }
            if let Some(target) = handle.check_target {
                if candidate_set.contains(&target) && non_deletable.insert(target) {
                    changed = true;
                }
            }
        }
    }
}

/// Disconnects `target`'s inbound edge from whichever `SignalSource` owns
/// `source_id`: a sibling primitive (decrementing its `depender_count`) or
/// an engine-level event dispatcher (no depender bookkeeping there; the
/// dispatcher entry itself is dropped if this was its last target and it
/// was owned exclusively).
fn disconnect_from_source(engine: &Engine, source_id: SourceId, target: PrimitiveId) {
    if let Some(owner_id) = engine.arena.owner_of(source_id) {
        if let Some(owner) = engine.arena.get(owner_id) {
            owner.primary.disconnect(target);
            if let Some(neg) = &owner.negative {
                neg.disconnect(target);
            }
            owner.dec_dependers();
        }
        return;
    }

    if engine.all_events_dispatcher.id == source_id {
        engine.all_events_dispatcher.disconnect(target);
        return;
    }

    let mut emptied_name: Option<String> = None;
    {
        let map = engine.dispatcher.read();
        for (name, source) in map.iter() {
            if source.id == source_id {
                source.disconnect(target);
                if source.edge_count() == 0 {
                    emptied_name = Some(name.clone());
                }
                break;
            }
        }
    }
    if let Some(name) = emptied_name {
        engine.dispatcher.write().remove(&name);
    }
}
