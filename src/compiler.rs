//! `AddRule`: validates a `RuleDescription`,
//! builds its node graph, topologically sorts it, and folds each node into
//! the already-live graph, sharing physically identical primitives,
//! creating new ones otherwise.

use std::collections::{HashMap as StdHashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::arena::PrimitiveHandle;
use crate::engine::{BatchState, CompiledRule, Engine};
use crate::error::{EngineError, Result};
use crate::id::PrimitiveId;
use crate::macro_eval::ParamTemplate;
use crate::primitives::{self, SetupContext};
use crate::rule::{EdgeDesc, NodeDesc, RuleDescription};
use crate::signal::SignalSource;
use crate::value::Value;

/// Key used for the synthetic sourceless node wiring every `NonTargetable`
/// primitive without an explicit inbound edge. Chosen so it can never
/// collide with a user-supplied local name,
/// which must come from a JSON object key a rule author actually typed.
const SOURCELESS_LOCAL_NAME: &str = "\0##sourceless##";

enum BuiltNode {
    SourceEvent { primary: Arc<SignalSource> },
    Primitive { id: PrimitiveId, primary: Arc<SignalSource>, negative: Option<Arc<SignalSource>> },
}

impl BuiltNode {
    fn source_for(&self, negative: bool) -> Option<Arc<SignalSource>> {
        match self {
            BuiltNode::SourceEvent { primary } => {
                if negative {
                    None
                } else {
                    Some(primary.clone())
                }
            }
            BuiltNode::Primitive { primary, negative: neg, .. } => {
                if negative {
                    neg.clone()
                } else {
                    Some(primary.clone())
                }
            }
        }
    }

    fn primitive_id(&self) -> Option<PrimitiveId> {
        match self {
            BuiltNode::SourceEvent { .. } => None,
            BuiltNode::Primitive { id, .. } => Some(*id),
        }
    }
}

/// One inbound edge into a node, as discovered by scanning every other
/// node's `ConnectTo` map: edges are declared at the *source* node and
/// addressed by the target's local name.
#[derive(Clone)]
struct InboundEdge {
    from: String,
    edge: EdgeDesc,
}

pub(crate) fn compile_rule(engine: &Engine, desc: &RuleDescription, batch: &mut BatchState) -> Result<()> {
    if engine.rules.read().contains_key(&desc.rule_name) {
        return Err(EngineError::Validation(format!("rule '{}' already exists", desc.rule_name)));
    }

    let nodes: Vec<NodeDesc> = desc.nodes().collect();
    let mut by_name: StdHashMap<String, NodeDesc> = StdHashMap::new();
    for node in &nodes {
        if by_name.insert(node.local_name().to_string(), node.clone()).is_some() {
            return Err(EngineError::Validation(format!(
                "duplicate local name '{}' in rule '{}'",
                node.local_name(),
                desc.rule_name
            )));
        }
    }

    for node in &nodes {
        if let NodeDesc::SourceEvent(s) = node {
            if s.event_name == engine.config.reserved_sourceless_name {
                return Err(EngineError::Validation(
                    "rule descriptions must not use the reserved sourceless event name".into(),
                ));
            }
        }
        if let NodeDesc::Primitive(p) = node {
            if !primitives::is_checker(&p.type_name) && primitives::constructor_for(&p.type_name).is_none()
            {
                return Err(EngineError::Validation(format!("unknown primitive type '{}'", p.type_name)));
            }
        }
        for (target, _edge) in node.connect_to() {
            if target == node.local_name() {
                return Err(EngineError::Validation(format!(
                    "self-loop: '{}' connects to itself",
                    node.local_name()
                )));
            }
            if !by_name.contains_key(target) {
                return Err(EngineError::Validation(format!(
                    "'{}' ConnectTo references undefined name '{}'",
                    node.local_name(),
                    target
                )));
            }
        }
    }

    let mut inbound: StdHashMap<String, Vec<InboundEdge>> = StdHashMap::new();
    for node in &nodes {
        for (target, edge) in node.connect_to() {
            inbound.entry(target.clone()).or_default().push(InboundEdge {
                from: node.local_name().to_string(),
                edge: edge.clone(),
            });
        }
    }

    // Step 2: synthesize a sourceless `SourceEvent` feeding every
    // `NonTargetable` primitive left without an inbound edge.
    let mut needs_sourceless = false;
    for node in &nodes {
        if let NodeDesc::Primitive(p) = node {
            if p.type_name == "TimerSource" && !inbound.contains_key(&p.name) {
                inbound.entry(p.name.clone()).or_default().push(InboundEdge {
                    from: SOURCELESS_LOCAL_NAME.to_string(),
                    edge: EdgeDesc::default(),
                });
                needs_sourceless = true;
            }
        }
    }

    for node in &nodes {
        if let NodeDesc::Primitive(p) = node {
            if p.type_name != "TimerSource"
                && inbound.get(&p.name).map(|v| v.is_empty()).unwrap_or(true)
            {
                return Err(EngineError::Validation(format!(
                    "primitive '{}' has no inbound connection",
                    p.name
                )));
            }
        }
    }

    // Step 3: extra topo-only edge from each Checker's CheckTarget to the
    // Checker, plus resolve CheckTarget existence up front.
    let mut checker_targets: StdHashMap<String, String> = StdHashMap::new();
    for node in &nodes {
        if let NodeDesc::Primitive(p) = node {
            if primitives::is_checker(&p.type_name) {
                let target = p
                    .parameters
                    .get("CheckTarget")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        EngineError::Validation(format!(
                            "Checker '{}' requires string config 'CheckTarget'",
                            p.name
                        ))
                    })?
                    .to_string();
                if !by_name.contains_key(&target) {
                    return Err(EngineError::Validation(format!(
                        "Checker '{}' CheckTarget '{}' is not defined in this rule",
                        p.name, target
                    )));
                }
                checker_targets.insert(p.name.clone(), target);
            }
        }
    }

    // Kahn's algorithm over: real ConnectTo edges + synthetic sourceless
    // edges (already folded into `inbound`) + virtual CheckTarget edges.
    let mut topo_names: Vec<String> = by_name.keys().cloned().collect();
    if needs_sourceless {
        topo_names.push(SOURCELESS_LOCAL_NAME.to_string());
    }
    let mut indegree: StdHashMap<String, usize> = topo_names.iter().map(|n| (n.clone(), 0)).collect();
    let mut adjacency: StdHashMap<String, Vec<String>> =
        topo_names.iter().map(|n| (n.clone(), Vec::new())).collect();

    for (target, edges) in &inbound {
        for e in edges {
            adjacency.entry(e.from.clone()).or_default().push(target.clone());
            *indegree.entry(target.clone()).or_insert(0) += 1;
        }
    }
    for (checker, target) in &checker_targets {
        adjacency.entry(target.clone()).or_default().push(checker.clone());
        *indegree.entry(checker.clone()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<String> =
        topo_names.iter().filter(|n| indegree[*n] == 0).cloned().collect();
    let mut order = Vec::with_capacity(topo_names.len());
    while let Some(name) = queue.pop_front() {
        order.push(name.clone());
        if let Some(targets) = adjacency.get(&name) {
            for t in targets {
                let d = indegree.get_mut(t).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push_back(t.clone());
                }
            }
        }
    }
    if order.len() != topo_names.len() {
        return Err(EngineError::Compile(format!("cycle detected in rule '{}'", desc.rule_name)));
    }

    // Walk in topological order, building/sharing each node.
    let mut built: StdHashMap<String, BuiltNode> = StdHashMap::new();
    let mut derived_event_name: Option<String> = None;

    for name in &order {
        if name == SOURCELESS_LOCAL_NAME {
            let source = resolve_dispatcher(engine, &engine.config.reserved_sourceless_name, batch);
            built.insert(name.clone(), BuiltNode::SourceEvent { primary: source });
            continue;
        }

        let node = by_name.get(name).expect("topo-sorted name must be a real node");
        match node {
            NodeDesc::SourceEvent(s) => {
                let source = if s.event_name == engine.config.reserved_all_events_name {
                    engine.all_events_dispatcher.clone()
                } else {
                    resolve_dispatcher(engine, &s.event_name, batch)
                };
                built.insert(name.clone(), BuiltNode::SourceEvent { primary: source });
            }
            NodeDesc::Primitive(p) => {
                let edges = inbound.get(name).cloned().unwrap_or_default();
                let mut inbound_sources: Vec<Arc<SignalSource>> = Vec::with_capacity(edges.len());
                let mut inbound_pairs = Vec::with_capacity(edges.len());
                for e in &edges {
                    let upstream = built.get(&e.from).ok_or_else(|| {
                        EngineError::Compile(format!(
                            "internal: upstream node '{}' not yet built",
                            e.from
                        ))
                    })?;
                    let Some(source) = upstream.source_for(e.edge.trigger_on_negative) else {
                        return Err(EngineError::Validation(format!(
                            "'{}' connects to '{}' on_negative but that node has no negative port",
                            e.from, name
                        )));
                    };
                    let template = match &e.edge.signal_parameter {
                        None => None,
                        Some(raw) => Some(
                            ParamTemplate::parse(raw, &|prop| engine.meta_event.property_id(prop))
                                .map_err(EngineError::Parse)?,
                        ),
                    };
                    inbound_sources.push(source.clone());
                    inbound_pairs.push((source.id, template));
                }

                if primitives::is_checker(&p.type_name) {
                    let target_name = checker_targets.get(&p.name).expect("validated above");
                    let target_built = built.get(target_name).ok_or_else(|| {
                        EngineError::Compile(format!(
                            "internal: CheckTarget '{}' not yet built",
                            target_name
                        ))
                    })?;
                    let target_id = target_built.primitive_id().ok_or_else(|| {
                        EngineError::Validation(format!(
                            "Checker '{}' CheckTarget '{}' is a SourceEvent, not a primitive",
                            p.name, target_name
                        ))
                    })?;
                    let target_handle = engine.arena.get(target_id).ok_or_else(|| {
                        EngineError::Compile(format!("internal: CheckTarget '{target_name}' vanished"))
                    })?;
                    let checkable = target_handle.checkable.clone().ok_or_else(|| {
                        EngineError::Validation(format!(
                            "Checker '{}' CheckTarget '{}' is not Checkable",
                            p.name, target_name
                        ))
                    })?;

                    if let Some(shared) = engine.arena.find_shareable(
                        &inbound_sources[0].clone(),
                        "Checker",
                        &p.parameters,
                        &inbound_pairs,
                    ) {
                        tracing::debug!(name = %p.name, id = %shared.id, "Checker shared with existing primitive");
                        built.insert(
                            name.clone(),
                            BuiltNode::Primitive {
                                id: shared.id,
                                primary: shared.primary.clone(),
                                negative: shared.negative.clone(),
                            },
                        );
                        continue;
                    }

                    let id = PrimitiveId::fresh();
                    let (node_impl, primary, negative) =
                        primitives::build_checker(&p.parameters, checkable)
                            .map_err(EngineError::Compile)?;
                    wire_inbound(
                        &inbound_sources,
                        &inbound_pairs,
                        node_impl.clone() as Arc<dyn crate::signal::Triggerable>,
                        id,
                        &engine.arena,
                    );
                    target_handle.inc_dependers();
                    let handle = crate::arena::PrimitiveHandle::new(
                        id,
                        "Checker",
                        p.parameters.clone(),
                        node_impl,
                        primary.clone(),
                        Some(negative.clone()),
                        None,
                        false,
                        inbound_pairs,
                        Some(target_id),
                    );
                    engine.arena.insert(handle);
                    batch.created_primitive_ids.push(id);
                    tracing::debug!(name = %p.name, id = %id, "Checker created");
                    built.insert(name.clone(), BuiltNode::Primitive { id, primary, negative: Some(negative) });
                    continue;
                }

                let shareable = if p.type_name == "EventGenerator" {
                    None
                } else {
                    engine.arena.find_shareable(
                        &inbound_sources[0].clone(),
                        primitives::kind_name(&p.type_name),
                        &p.parameters,
                        &inbound_pairs,
                    )
                };
                if let Some(shared) = shareable {
                    tracing::debug!(name = %p.name, kind = %p.type_name, id = %shared.id, "primitive shared with existing node");
                    built.insert(
                        name.clone(),
                        BuiltNode::Primitive {
                            id: shared.id,
                            primary: shared.primary.clone(),
                            negative: shared.negative.clone(),
                        },
                    );
                    continue;
                }

                let id = PrimitiveId::fresh();
                let ctx = SetupContext {
                    id,
                    inbound: &inbound_sources,
                    meta_event: &engine.meta_event,
                    dispatch: engine.dispatch_callback(),
                };
                let constructor = primitives::constructor_for(&p.type_name).ok_or_else(|| {
                    EngineError::Validation(format!("unknown primitive type '{}'", p.type_name))
                })?;
                let build = constructor(&p.parameters, &ctx)
                    .map_err(|e| EngineError::Compile(format!("{}: {e}", p.name)))?;

                wire_inbound(&inbound_sources, &inbound_pairs, build.node.clone(), id, &engine.arena);

                if let Some(derived) = p
                    .parameters
                    .get("NewEventName")
                    .and_then(|v| v.as_str())
                    .filter(|_| p.type_name == "EventGenerator")
                {
                    derived_event_name = Some(derived.to_string());
                }

                let handle = crate::arena::PrimitiveHandle::new(
                    id,
                    primitives::kind_name(&p.type_name),
                    build.config,
                    build.node,
                    build.primary.clone(),
                    build.negative.clone(),
                    build.checkable,
                    build.non_targetable,
                    inbound_pairs,
                    None,
                );
                engine.arena.insert(handle);
                batch.created_primitive_ids.push(id);
                tracing::debug!(name = %p.name, kind = %p.type_name, id = %id, "primitive created");
                built.insert(
                    name.clone(),
                    BuiltNode::Primitive { id, primary: build.primary, negative: build.negative },
                );
            }
        }
    }

    let event_generator_count =
        desc.primitives.iter().filter(|p| p.type_name == "EventGenerator").count();
    if event_generator_count != 1 {
        return Err(EngineError::Validation(format!(
            "rule '{}' must contain exactly one EventGenerator, found {}",
            desc.rule_name, event_generator_count
        )));
    }
    let derived_event_name = derived_event_name
        .ok_or_else(|| EngineError::Compile("EventGenerator produced no derived event name".into()))?;

    let generator_primitive = desc
        .primitives
        .iter()
        .find(|p| p.type_name == "EventGenerator")
        .and_then(|p| built.get(&p.name))
        .and_then(BuiltNode::primitive_id)
        .ok_or_else(|| EngineError::Compile("internal: EventGenerator not registered".into()))?;

    engine.event_generators.write().insert(derived_event_name.clone(), generator_primitive);
    engine.rule_to_event.write().insert(desc.rule_name.clone(), derived_event_name.clone());
    engine.rules.write().insert(desc.rule_name.clone(), CompiledRule { derived_event_name });
    batch.registered_rules.push(desc.rule_name.clone());

    Ok(())
}

fn resolve_dispatcher(engine: &Engine, event_name: &str, batch: &mut BatchState) -> Arc<SignalSource> {
    let existing = engine.dispatcher.read().get(event_name).cloned();
    if let Some(source) = existing {
        return source;
    }
    let mut map = engine.dispatcher.write();
    map.entry(event_name.to_string())
        .or_insert_with(|| {
            batch.created_dispatchers.push(event_name.to_string());
            SignalSource::new()
        })
        .clone()
}

/// Connects each already-resolved inbound source to the freshly built node,
/// reusing the `(SourceId, ParamTemplate)` pairs assembled for the sharing
/// comparison so the template is parsed exactly once per edge. Also bumps
/// the upstream primitive's `depender_count`, if the source belongs to one.
fn wire_inbound(
    sources: &[Arc<SignalSource>],
    pairs: &[(crate::id::SourceId, Option<ParamTemplate>)],
    target_node: Arc<dyn crate::signal::Triggerable>,
    target_id: PrimitiveId,
    arena: &crate::arena::PrimitiveArena,
) {
    for (source, (_, template)) in sources.iter().zip(pairs.iter()) {
        source.connect(target_node.clone(), Some(target_id), template.clone());
        if let Some(owner_id) = arena.owner_of(source.id) {
            if let Some(owner) = arena.get(owner_id) {
                owner.inc_dependers();
            }
        }
    }
}

/// Removes every primitive and dispatcher created during a failed batch,
/// and the rule registrations made so far, using the same algorithm as
/// rule deletion. Since nothing outside this batch can
/// reference brand-new primitives yet, a straightforward reverse teardown
/// is sufficient: no reachability analysis is needed.
pub(crate) fn rollback_batch(engine: &Engine, batch: BatchState) {
    for rule_name in &batch.registered_rules {
        if let Some(compiled) = engine.rules.write().remove(rule_name) {
            engine.rule_to_event.write().remove(rule_name);
            engine.event_generators.write().remove(&compiled.derived_event_name);
        }
    }
    for id in batch.created_primitive_ids.into_iter().rev() {
        if let Some(handle) = engine.arena.get(id) {
            for (source_id, _) in &handle.inbound {
                if let Some(owner_id) = engine.arena.owner_of(*source_id) {
                    if let Some(owner) = engine.arena.get(owner_id) {
                        owner.dec_dependers();
                    }
                }
                disconnect_source_by_id(engine, *source_id, id);
            }
        }
        engine.arena.remove(id);
    }
    for name in &batch.created_dispatchers {
        let should_remove = engine
            .dispatcher
            .read()
            .get(name)
            .map(|s| s.edge_count() == 0)
            .unwrap_or(false);
        if should_remove {
            engine.dispatcher.write().remove(name);
        }
    }
}

fn disconnect_source_by_id(engine: &Engine, source_id: crate::id::SourceId, target: PrimitiveId) {
    if let Some(owner_id) = engine.arena.owner_of(source_id) {
        if let Some(owner) = engine.arena.get(owner_id) {
            owner.primary.disconnect(target);
            if let Some(neg) = &owner.negative {
                neg.disconnect(target);
            }
        }
        return;
    }
    for source in engine.dispatcher.read().values() {
        if source.id == source_id {
            source.disconnect(target);
        }
    }
    if engine.all_events_dispatcher.id == source_id {
        engine.all_events_dispatcher.disconnect(target);
    }
}
