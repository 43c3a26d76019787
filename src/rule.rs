//! The in-memory rule description: what the (out-of-scope) rule-file
//! parser produces and `crate::compiler::add_rule` consumes.
//!
//! Deserializes directly from the host's JSON/YAML-shaped rule text via
//! `serde`, the same "parallel union, not a bespoke enum" choice made in
//! `crate::value` for config values.

use serde::Deserialize;
use std::collections::HashMap;

use crate::value::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct RulesFile {
    #[serde(rename = "Rules")]
    pub rules: Vec<RuleDescription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDescription {
    #[serde(rename = "RuleName")]
    pub rule_name: String,
    #[serde(rename = "SourceEvents", default)]
    pub source_events: Vec<SourceEventDesc>,
    #[serde(rename = "Primitives", default)]
    pub primitives: Vec<PrimitiveDesc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEventDesc {
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "ConnectTo", default)]
    pub connect_to: HashMap<String, EdgeDesc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrimitiveDesc {
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Parameters", default)]
    pub parameters: Value,
    #[serde(rename = "ConnectTo", default)]
    pub connect_to: HashMap<String, EdgeDesc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdgeDesc {
    #[serde(rename = "SignalParameter", default)]
    pub signal_parameter: Option<Value>,
    #[serde(rename = "TriggerOnNegative", default)]
    pub trigger_on_negative: bool,
}

/// A node in a rule's graph: either a `SourceEvent` or a *primitive*.
#[derive(Debug, Clone)]
pub enum NodeDesc {
    SourceEvent(SourceEventDesc),
    Primitive(PrimitiveDesc),
}

impl NodeDesc {
    pub fn local_name(&self) -> &str {
        match self {
            NodeDesc::SourceEvent(s) => &s.event_name,
            NodeDesc::Primitive(p) => &p.name,
        }
    }

    pub fn connect_to(&self) -> &HashMap<String, EdgeDesc> {
        match self {
            NodeDesc::SourceEvent(s) => &s.connect_to,
            NodeDesc::Primitive(p) => &p.connect_to,
        }
    }
}

impl RuleDescription {
    /// All nodes, `SourceEvents` first then `Primitives`, in declaration
    /// order, the order `crate::compiler` uses before topological sorting.
    pub fn nodes(&self) -> impl Iterator<Item = NodeDesc> + '_ {
        self.source_events
            .iter()
            .cloned()
            .map(NodeDesc::SourceEvent)
            .chain(self.primitives.iter().cloned().map(NodeDesc::Primitive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_minimal_rule() {
        let json = serde_json::json!({
            "Rules": [{
                "RuleName": "ScriptFromNotepad",
                "SourceEvents": [{
                    "EventName": "FileCreated",
                    "ConnectTo": { "collector": { "SignalParameter": 0 } }
                }],
                "Primitives": [{
                    "Type": "EventGenerator",
                    "Name": "gen",
                    "Parameters": { "NewEventName": "MaliciousScriptExec" }
                }]
            }]
        });
        let file: RulesFile = serde_json::from_value(json).unwrap();
        assert_eq!(file.rules.len(), 1);
        assert_eq!(file.rules[0].rule_name, "ScriptFromNotepad");
        assert_eq!(file.rules[0].primitives[0].type_name, "EventGenerator");
    }
}
