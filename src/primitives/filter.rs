//! `StringFilter` and `IntegerFilter`: stateless predicates
//! with a primary (match) and negative (no-match) outbound port.

use std::collections::HashSet;
use std::sync::Arc;

use super::{PrimitiveBuild, SetupContext};
use crate::event::Context;
use crate::signal::{SignalSource, Triggerable};
use crate::value::{Value, ValueExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StringCondition {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

enum Matcher {
    MatchSingle { condition: StringCondition, target: String, regex: Option<regex::Regex> },
    MatchList { condition: StringCondition, targets: Vec<String>, regexes: Vec<regex::Regex> },
    DictionarySearch { targets: HashSet<String> },
}

/// Config is immutable after `setup`; `SubstringPos` trims the
/// input before matching, `Method`/`Condition` select the comparison.
pub struct StringFilter {
    substring_pos: Option<usize>,
    matcher: Matcher,
    primary: Arc<SignalSource>,
    negative: Arc<SignalSource>,
}

fn trim_substring(input: &str, pos: Option<usize>) -> Option<String> {
    match pos {
        None => Some(input.to_string()),
        Some(p) => input.get(p..).map(|s| s.to_string()),
    }
}

impl Triggerable for StringFilter {
    fn trigger(&self, parameter: Value, context: Context) {
        let Some(raw) = parameter.as_str_checked() else {
            tracing::warn!(?parameter, "StringFilter expected a string parameter");
            return;
        };
        let matched = match trim_substring(raw, self.substring_pos) {
            None => false,
            Some(trimmed) => match &self.matcher {
                Matcher::MatchSingle { condition, target, regex } => {
                    match_single(condition, &trimmed, target, regex.as_ref())
                }
                Matcher::MatchList { condition, targets, regexes } => targets
                    .iter()
                    .zip(regexes.iter().map(Some).chain(std::iter::repeat(None)))
                    .any(|(t, r)| match_single(condition, &trimmed, t, r)),
                Matcher::DictionarySearch { targets } => targets.contains(&trimmed.to_lowercase()),
            },
        };
        if matched {
            self.primary.trigger(context);
        } else {
            self.negative.trigger(context);
        }
    }
}

fn match_single(
    condition: &StringCondition,
    input: &str,
    target: &str,
    regex: Option<&regex::Regex>,
) -> bool {
    match condition {
        StringCondition::Equals => input.eq_ignore_ascii_case(target),
        StringCondition::Contains => input.to_lowercase().contains(&target.to_lowercase()),
        StringCondition::StartsWith => input.to_lowercase().starts_with(&target.to_lowercase()),
        StringCondition::EndsWith => input.to_lowercase().ends_with(&target.to_lowercase()),
        StringCondition::Regex => regex.map(|r| r.is_match(input)).unwrap_or(false),
    }
}

fn parse_condition(s: &str) -> Result<StringCondition, String> {
    match s {
        "Equals" => Ok(StringCondition::Equals),
        "Contains" => Ok(StringCondition::Contains),
        "StartsWith" => Ok(StringCondition::StartsWith),
        "EndsWith" => Ok(StringCondition::EndsWith),
        "Regex" => Ok(StringCondition::Regex),
        other => Err(format!("unknown StringFilter Condition '{other}'")),
    }
}

pub fn build_string_filter(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let method = config.get("Method").and_then(ValueExt::as_str_checked).ok_or(
        "StringFilter requires string config 'Method' (MatchSingle, MatchList, or DictionarySearch)",
    )?;
    let substring_pos =
        config.get("SubstringPos").and_then(ValueExt::as_i64_checked).map(|n| n.max(0) as usize);

    let matcher = match method {
        "MatchSingle" => {
            let condition = parse_condition(
                config.get("Condition").and_then(ValueExt::as_str_checked).ok_or(
                    "StringFilter MatchSingle requires string config 'Condition'",
                )?,
            )?;
            let target = config
                .get("MatchTo")
                .and_then(ValueExt::as_str_checked)
                .ok_or("StringFilter MatchSingle requires string config 'MatchTo'")?
                .to_string();
            let regex = if condition == StringCondition::Regex {
                Some(regex::Regex::new(&target).map_err(|e| format!("invalid regex '{target}': {e}"))?)
            } else {
                None
            };
            Matcher::MatchSingle { condition, target, regex }
        }
        "MatchList" => {
            let condition = parse_condition(
                config
                    .get("Condition")
                    .and_then(ValueExt::as_str_checked)
                    .ok_or("StringFilter MatchList requires string config 'Condition'")?,
            )?;
            let targets: Vec<String> = config
                .get("MatchTo")
                .and_then(Value::as_array)
                .ok_or("StringFilter MatchList requires array config 'MatchTo'")?
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| "StringFilter MatchList 'MatchTo' entries must be strings".to_string())
                })
                .collect::<Result<_, _>>()?;
            let regexes = if condition == StringCondition::Regex {
                targets
                    .iter()
                    .map(|t| regex::Regex::new(t).map_err(|e| format!("invalid regex '{t}': {e}")))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                Vec::new()
            };
            Matcher::MatchList { condition, targets, regexes }
        }
        "DictionarySearch" => {
            let targets: HashSet<String> = config
                .get("MatchTo")
                .and_then(Value::as_array)
                .ok_or("StringFilter DictionarySearch requires array config 'MatchTo'")?
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(|s| s.to_lowercase())
                        .ok_or_else(|| "StringFilter DictionarySearch 'MatchTo' entries must be strings".to_string())
                })
                .collect::<Result<_, _>>()?;
            Matcher::DictionarySearch { targets }
        }
        other => return Err(format!("unknown StringFilter Method '{other}'")),
    };

    let primary = SignalSource::new();
    let negative = SignalSource::new();
    let node = Arc::new(StringFilter {
        substring_pos,
        matcher,
        primary: primary.clone(),
        negative: negative.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "StringFilter",
        config: config.clone(),
        node,
        primary,
        negative: Some(negative),
        checkable: None,
        non_targetable: false,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IntCondition {
    LessThan,
    Equals,
    GreaterThan,
    OneOf,
}

pub struct IntegerFilter {
    condition: IntCondition,
    single: Option<i64>,
    set: Option<HashSet<i64>>,
    primary: Arc<SignalSource>,
    negative: Arc<SignalSource>,
}

impl Triggerable for IntegerFilter {
    fn trigger(&self, parameter: Value, context: Context) {
        let Some(value) = parameter.as_i64_checked() else {
            tracing::warn!(?parameter, "IntegerFilter expected an integer parameter");
            return;
        };
        let matched = match self.condition {
            IntCondition::LessThan => value < self.single.unwrap(),
            IntCondition::Equals => value == self.single.unwrap(),
            IntCondition::GreaterThan => value > self.single.unwrap(),
            IntCondition::OneOf => self.set.as_ref().unwrap().contains(&value),
        };
        if matched {
            self.primary.trigger(context);
        } else {
            self.negative.trigger(context);
        }
    }
}

pub fn build_integer_filter(config: &Value, ctx: &SetupContext) -> Result<PrimitiveBuild, String> {
    let condition_str = config
        .get("Condition")
        .and_then(ValueExt::as_str_checked)
        .ok_or("IntegerFilter requires string config 'Condition'")?;
    let (condition, single, set) = match condition_str {
        "LessThan" => (
            IntCondition::LessThan,
            Some(
                config
                    .get("CompareTo")
                    .and_then(ValueExt::as_i64_checked)
                    .ok_or("IntegerFilter LessThan requires integer config 'CompareTo'")?,
            ),
            None,
        ),
        "Equals" => (
            IntCondition::Equals,
            Some(
                config
                    .get("CompareTo")
                    .and_then(ValueExt::as_i64_checked)
                    .ok_or("IntegerFilter Equals requires integer config 'CompareTo'")?,
            ),
            None,
        ),
        "GreaterThan" => (
            IntCondition::GreaterThan,
            Some(
                config
                    .get("CompareTo")
                    .and_then(ValueExt::as_i64_checked)
                    .ok_or("IntegerFilter GreaterThan requires integer config 'CompareTo'")?,
            ),
            None,
        ),
        "OneOf" => {
            let values: HashSet<i64> = config
                .get("CompareTo")
                .and_then(Value::as_array)
                .ok_or("IntegerFilter OneOf requires array config 'CompareTo'")?
                .iter()
                .map(|v| {
                    v.as_i64().ok_or_else(|| "IntegerFilter OneOf 'CompareTo' entries must be integers".to_string())
                })
                .collect::<Result<_, _>>()?;
            (IntCondition::OneOf, None, Some(values))
        }
        other => return Err(format!("unknown IntegerFilter Condition '{other}'")),
    };

    let primary = SignalSource::new();
    let negative = SignalSource::new();
    let node = Arc::new(IntegerFilter {
        condition,
        single,
        set,
        primary: primary.clone(),
        negative: negative.clone(),
    });
    let _ = ctx;
    Ok(PrimitiveBuild {
        kind: "IntegerFilter",
        config: config.clone(),
        node,
        primary,
        negative: Some(negative),
        checkable: None,
        non_targetable: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Triggerable as _;
    use parking_lot::Mutex;

    #[test]
    fn string_filter_contains_is_case_insensitive() {
        let primary_hits = Arc::new(Mutex::new(0usize));
        let negative_hits = Arc::new(Mutex::new(0usize));

        struct Counter(Arc<Mutex<usize>>);
        impl Triggerable for Counter {
            fn trigger(&self, _parameter: Value, _context: Context) {
                *self.0.lock() += 1;
            }
        }

        let primary = SignalSource::new();
        let negative = SignalSource::new();
        primary.connect(Arc::new(Counter(primary_hits.clone())), None, None);
        negative.connect(Arc::new(Counter(negative_hits.clone())), None, None);

        let node = StringFilter {
            substring_pos: None,
            matcher: Matcher::MatchSingle {
                condition: StringCondition::Contains,
                target: "NOTEPAD.exe".into(),
                regex: None,
            },
            primary: primary.clone(),
            negative: negative.clone(),
        };
        node.trigger(Value::from("c:\\temp\\notepad.exe"), Context::Value(Value::Null));
        assert_eq!(*primary_hits.lock(), 1);
        assert_eq!(*negative_hits.lock(), 0);
        node.trigger(Value::from("calc.exe"), Context::Value(Value::Null));
        assert_eq!(*negative_hits.lock(), 1);
    }

    #[test]
    fn integer_filter_one_of() {
        let primary_hits = Arc::new(Mutex::new(0usize));
        struct Counter(Arc<Mutex<usize>>);
        impl Triggerable for Counter {
            fn trigger(&self, _parameter: Value, _context: Context) {
                *self.0.lock() += 1;
            }
        }
        let primary = SignalSource::new();
        let negative = SignalSource::new();
        primary.connect(Arc::new(Counter(primary_hits.clone())), None, None);
        let mut set = HashSet::new();
        set.insert(1);
        set.insert(2);
        let node = IntegerFilter {
            condition: IntCondition::OneOf,
            single: None,
            set: Some(set),
            primary: primary.clone(),
            negative: negative.clone(),
        };
        node.trigger(Value::from(2), Context::Value(Value::Null));
        assert_eq!(*primary_hits.lock(), 1);
    }
}
