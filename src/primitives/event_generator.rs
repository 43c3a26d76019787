//! `EventGenerator`: the only primitive kind that is never shared and that
//! produces no outbound signal. Instead it synthesizes a derived event
//! and hands it back to the engine's dispatcher, reentrantly.

use std::sync::Arc;

use super::{PrimitiveBuild, SetupContext};
use crate::event::{Context, EventRef, IEvent};
use crate::macro_eval::ParamTemplate;
use crate::signal::{SignalSource, Triggerable};
use crate::value::Value;

struct Property {
    id: i64,
    template: ParamTemplate,
}

pub struct EventGenerator {
    new_event_name: String,
    properties: Vec<Property>,
    meta_event: EventRef,
    dispatch: Arc<dyn Fn(Box<dyn IEvent>) + Send + Sync>,
}

impl Triggerable for EventGenerator {
    fn trigger(&self, _parameter: Value, context: Context) {
        let Some(mut event) = self.meta_event.new_instance(&self.new_event_name) else {
            // Factory returning null silently stops propagation.
            tracing::warn!(
                event_name = %self.new_event_name,
                "EventGenerator's event factory returned no instance"
            );
            return;
        };
        for prop in &self.properties {
            match prop.template.evaluate(&context) {
                Ok(value) => event.set(prop.id, value),
                Err(e) => {
                    tracing::warn!(error = %e, "EventGenerator property macro failed, leaving property unset")
                }
            }
        }
        (self.dispatch)(event);
    }
}

pub fn build(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let new_event_name = config
        .get("NewEventName")
        .and_then(|v| v.as_str())
        .ok_or("EventGenerator requires string config 'NewEventName'")?
        .to_string();

    let mut properties = Vec::new();
    if let Some(props) = config.get("Properties") {
        let map = props.as_object().ok_or("EventGenerator 'Properties' must be an object")?;
        for (name, raw) in map {
            let id = ctx.resolve_prop(name);
            if id < 0 {
                return Err(format!("EventGenerator Properties: unknown property '{name}'"));
            }
            let resolve = |n: &str| ctx.resolve_prop(n);
            let template = ParamTemplate::parse(raw, &resolve)
                .map_err(|e| format!("EventGenerator Properties['{name}']: {e}"))?;
            properties.push(Property { id, template });
        }
    }

    // EventGenerator has no outbound signal; it still needs a
    // `SignalSource` handle so `crate::arena::PrimitiveHandle` has something
    // to store, but nothing is ever connected to it.
    let primary = SignalSource::new();
    let node = Arc::new(EventGenerator {
        new_event_name,
        properties,
        meta_event: ctx.meta_event.clone(),
        dispatch: ctx.dispatch.clone(),
    });
    Ok(PrimitiveBuild {
        kind: "EventGenerator",
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
    use crate::id::PrimitiveId;
    use parking_lot::Mutex;

    #[test]
    fn synthesizes_event_with_macro_resolved_properties() {
        let meta: EventRef = Arc::new(TestEvent::new("__meta__"));
        let produced = Arc::new(Mutex::new(Vec::new()));
        let capture = produced.clone();
        let dispatch: Arc<dyn Fn(Box<dyn IEvent>) + Send + Sync> =
            Arc::new(move |ev: Box<dyn IEvent>| capture.lock().push(ev));

        let path_id = meta.property_id("path");
        let ctx = SetupContext {
            id: PrimitiveId::fresh(),
            inbound: &[],
            meta_event: &meta,
            dispatch,
        };
        let config = serde_json::json!({
            "NewEventName": "MaliciousScriptExec",
            "Properties": { "path": "#MACRO#Context.Event.path" }
        });
        let build = build(&config, &ctx).unwrap();

        let source_event: EventRef = Arc::new(TestEvent::new("ScriptExec").with("path", "script2.ps1"));
        build.node.trigger(Value::Null, Context::Event(source_event));

        let produced = produced.lock();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].name(), "MaliciousScriptExec");
        assert_eq!(produced[0].get(path_id), Some(Value::from("script2.ps1")));
    }
}
