//! `Checker`: the one primitive type built outside the
//! `constructor_for` registry, since it needs an already-resolved
//! `Arc<dyn Checkable>` dependee rather than just its raw config
//! (`crate::compiler` resolves `CheckTarget` to a live primitive before
//! calling `Checker::build`).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::arena::Checkable;
use crate::event::Context;
use crate::signal::{SignalSource, Triggerable};
use crate::value::{Value, ValueExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    LessThan,
    Equals,
    GreaterThan,
}

impl Condition {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "LessThan" => Ok(Condition::LessThan),
            "Equals" => Ok(Condition::Equals),
            "GreaterThan" => Ok(Condition::GreaterThan),
            other => Err(format!("unknown Checker Condition '{other}'")),
        }
    }
}

/// On trigger, synchronously reads `target.check(None)` and compares it
/// against an effective threshold that, when `AutoRollOver` is set, only
/// ever grows on a positive firing: it monotonically increases until
/// the primitive itself is destroyed (see `DESIGN.md`).
pub struct Checker {
    target: Arc<dyn Checkable>,
    condition: Condition,
    compare_to: i64,
    auto_roll_over: bool,
    effective_compare_to: AtomicI64,
    primary: Arc<SignalSource>,
    negative: Arc<SignalSource>,
}

impl Triggerable for Checker {
    fn trigger(&self, _parameter: Value, context: Context) {
        let observed = match self.target.check(None).as_i64_checked() {
            Some(v) => v,
            None => {
                tracing::warn!("Checker's CheckTarget did not produce an integer value");
                return;
            }
        };
        let threshold = self.effective_compare_to.load(Ordering::SeqCst);
        let matched = match self.condition {
            Condition::LessThan => observed < threshold,
            Condition::Equals => observed == threshold,
            Condition::GreaterThan => observed > threshold,
        };
        if matched {
            if self.auto_roll_over {
                self.effective_compare_to.fetch_add(self.compare_to, Ordering::SeqCst);
            }
            self.primary.trigger(context);
        } else {
            self.negative.trigger(context);
        }
    }
}

pub fn build(
    config: &Value,
    target: Arc<dyn Checkable>,
) -> Result<(Arc<Checker>, Arc<SignalSource>, Arc<SignalSource>), String> {
    let condition = Condition::parse(
        config.get("Condition").and_then(ValueExt::as_str_checked).ok_or(
            "Checker requires string config 'Condition' (LessThan, Equals, or GreaterThan)",
        )?,
    )?;
    let compare_to = config
        .get("CompareTo")
        .and_then(ValueExt::as_i64_checked)
        .ok_or("Checker requires integer config 'CompareTo'")?;
    let auto_roll_over =
        config.get("AutoRollOver").and_then(Value::as_bool).unwrap_or(false);

    let primary = SignalSource::new();
    let negative = SignalSource::new();
    let node = Arc::new(Checker {
        target,
        condition,
        compare_to,
        auto_roll_over,
        effective_compare_to: AtomicI64::new(compare_to),
        primary: primary.clone(),
        negative: negative.clone(),
    });
    Ok((node, primary, negative))
}
