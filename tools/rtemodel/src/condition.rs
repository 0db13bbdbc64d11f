//! Condition evaluation.
//!
//! Conditions form trees: expressions may reference further conditions by
//! name within the same pack. Evaluation walks the tree depth-first with a
//! memo per condition and an in-progress marker, so recursive conditions
//! degrade to [`ConditionResult::Error`] instead of looping.

use crate::model::{RteModel, SelectedComponent, TargetAttributes};
use crate::pack::{Condition, Expression, ExpressionKind};
use crate::registry::wildcard_match;
use crate::version::{parse_lenient, VersionRange};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// The ordered result lattice of a condition evaluation.
///
/// The order is total; a context is buildable when every selected
/// component's result is at least [`ConditionResult::Fulfilled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConditionResult {
    /// Evaluation failed: missing or recursive condition.
    Error,
    /// A required component is not installed.
    Missing,
    /// A required API is not installed.
    MissingApi,
    /// A required component is installed but filtered out by the target.
    Unavailable,
    /// A target attribute predicate failed or a denied predicate matched.
    Incompatible,
    /// Mutually exclusive selections collide.
    Conflict,
    /// A matching component is installed but not selectable as-is.
    Installed,
    /// A matching component is installed and could be selected.
    Selectable,
    /// The requirement is satisfied by the current selection.
    Fulfilled,
    /// The condition does not apply to this evaluation.
    Ignored,
}

/// What an evaluation run predicates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Target filtering: device/board/toolchain attributes decide;
    /// component expressions are ignored.
    Filter,
    /// Dependency solving: component expressions decide; target
    /// attributes were already filtered and are ignored.
    Dependency,
}

type ConditionKey = (usize, String);

pub struct ConditionEvaluator<'a> {
    model: &'a RteModel,
    target: &'a TargetAttributes,
    selection: &'a [SelectedComponent],
    mode: EvalMode,
    memo: RefCell<HashMap<ConditionKey, ConditionResult>>,
    in_progress: RefCell<HashSet<ConditionKey>>,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn filter(model: &'a RteModel, target: &'a TargetAttributes) -> Self {
        Self {
            model,
            target,
            selection: &[],
            mode: EvalMode::Filter,
            memo: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    pub fn dependency(
        model: &'a RteModel,
        target: &'a TargetAttributes,
        selection: &'a [SelectedComponent],
    ) -> Self {
        Self {
            model,
            target,
            selection,
            mode: EvalMode::Dependency,
            memo: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    /// Evaluate the named condition of the given pack.
    pub fn evaluate(&self, pack_index: usize, condition_id: &str) -> ConditionResult {
        let key = (pack_index, condition_id.to_string());
        if let Some(result) = self.memo.borrow().get(&key) {
            return *result;
        }
        if !self.in_progress.borrow_mut().insert(key.clone()) {
            return ConditionResult::Error;
        }
        let result = match self
            .model
            .packs()
            .get(pack_index)
            .and_then(|p| p.condition(condition_id))
        {
            Some(condition) => self.evaluate_condition(pack_index, condition),
            None => ConditionResult::Error,
        };
        self.in_progress.borrow_mut().remove(&key);
        self.memo.borrow_mut().insert(key, result);
        result
    }

    fn evaluate_condition(&self, pack_index: usize, condition: &Condition) -> ConditionResult {
        let mut require_result = ConditionResult::Ignored;
        let mut accept_result: Option<ConditionResult> = None;
        for expression in &condition.expressions {
            let result = self.evaluate_expression(pack_index, expression);
            match expression.kind {
                ExpressionKind::Accept => {
                    accept_result =
                        Some(accept_result.map_or(result, |prev| prev.max(result)));
                }
                ExpressionKind::Require | ExpressionKind::Deny => {
                    require_result = require_result.min(result);
                }
            }
        }
        match accept_result {
            Some(accepted) => require_result.min(accepted),
            None => require_result,
        }
    }

    fn evaluate_expression(&self, pack_index: usize, expression: &Expression) -> ConditionResult {
        let result = match expression.condition_ref() {
            Some(nested) => self.evaluate(pack_index, nested),
            None => match self.mode {
                EvalMode::Filter => {
                    if expression.is_component_expression() {
                        ConditionResult::Ignored
                    } else {
                        self.match_target(expression)
                    }
                }
                EvalMode::Dependency => {
                    if expression.is_component_expression() {
                        self.match_components(expression)
                    } else {
                        ConditionResult::Ignored
                    }
                }
            },
        };
        if expression.kind == ExpressionKind::Deny {
            // Denial inverts success; everything below fulfilled passes.
            if result >= ConditionResult::Fulfilled {
                ConditionResult::Incompatible
            } else {
                ConditionResult::Fulfilled
            }
        } else {
            result
        }
    }

    fn match_target(&self, expression: &Expression) -> ConditionResult {
        for (key, pattern) in &expression.attributes {
            if key == "condition" {
                continue;
            }
            match self.target.get(key) {
                Some(value) => {
                    if !match_pattern_list(pattern, value) {
                        return ConditionResult::Incompatible;
                    }
                }
                None => return ConditionResult::Incompatible,
            }
        }
        ConditionResult::Fulfilled
    }

    fn match_components(&self, expression: &Expression) -> ConditionResult {
        let is_api = expression.attributes.contains_key("Capiversion");
        if self
            .selection
            .iter()
            .any(|s| component_matches(expression, &s.attributes()))
        {
            return ConditionResult::Fulfilled;
        }
        let installed = self.model.components_matching(expression).next().is_some();
        if installed {
            ConditionResult::Selectable
        } else if is_api {
            ConditionResult::MissingApi
        } else {
            ConditionResult::Missing
        }
    }
}

/// Whether a component attribute map satisfies a component expression.
pub(crate) fn component_matches(
    expression: &Expression,
    attributes: &std::collections::BTreeMap<String, String>,
) -> bool {
    for (key, pattern) in &expression.attributes {
        if key == "condition" {
            continue;
        }
        if !key.starts_with('C') {
            continue;
        }
        let value = attributes.get(key).map(String::as_str).unwrap_or("");
        let matched = if key == "Cversion" || key == "Capiversion" {
            version_in_range(pattern, value)
        } else {
            match_pattern_list(pattern, value)
        };
        if !matched {
            return false;
        }
    }
    true
}

/// A predicate value is a space-separated list of alternatives, each of
/// which may hold `*`/`?` wildcards.
pub(crate) fn match_pattern_list(pattern: &str, value: &str) -> bool {
    pattern
        .split_ascii_whitespace()
        .any(|alternative| wildcard_match(alternative, value))
}

fn version_in_range(range: &str, value: &str) -> bool {
    match (VersionRange::parse(range), parse_lenient(value)) {
        (Ok(range), Ok(version)) => range.contains(&version),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lattice_is_totally_ordered() {
        use ConditionResult::*;
        let order = [
            Error,
            Missing,
            MissingApi,
            Unavailable,
            Incompatible,
            Conflict,
            Installed,
            Selectable,
            Fulfilled,
            Ignored,
        ];
        for window in order.windows(2) {
            assert!(window[0] < window[1], "{:?} < {:?}", window[0], window[1]);
        }
        assert!(Fulfilled >= Fulfilled);
        assert!(Selectable < Fulfilled);
    }

    #[test]
    fn pattern_lists() {
        assert!(match_pattern_list("AC6 GCC", "GCC"));
        assert!(match_pattern_list("Cortex-M*", "Cortex-M55"));
        assert!(!match_pattern_list("AC6 GCC", "IAR"));
    }

    #[test]
    fn version_ranges_in_expressions() {
        assert!(version_in_range("1.0.0", "1.2.0"));
        assert!(version_in_range("1.0.0:1.9.9", "1.2.0"));
        assert!(!version_in_range("2.0.0", "1.2.0"));
        assert!(!version_in_range("1.0.0", "not-a-version"));
    }
}
