//! The global model aggregated over all loaded packs.
//!
//! The model is built once from the packs the registry loaded and is
//! read-only afterwards. Lookups hand out references into pack data;
//! callers that need per-context mutability clone into
//! [`SelectedComponent`] instances.

use crate::condition::{component_matches, ConditionEvaluator, ConditionResult};
use crate::pack::{Api, Board, Component, Device, Expression, ExpressionKind, Pack, PackId};
use crate::version::{compare_versions, parse_lenient};
use log::debug;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// The attribute set describing one build target: device, board and
/// toolchain attributes as understood by condition expressions
/// (`Dname`, `Dcore`, `Tcompiler`, `Bname`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetAttributes(BTreeMap<String, String>);

impl TargetAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.0.insert(key.into(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Restricts lookups to an allowed set of packs; an empty filter allows
/// every loaded pack.
#[derive(Debug, Clone, Default)]
pub struct PackFilter {
    allowed: Option<BTreeSet<String>>,
}

impl PackFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn restricted<I: IntoIterator<Item = String>>(ids: I) -> Self {
        Self {
            allowed: Some(ids.into_iter().collect()),
        }
    }

    pub fn allows(&self, id: &PackId) -> bool {
        match &self.allowed {
            None => true,
            Some(ids) => ids.contains(&id.to_string()) || ids.contains(&id.common_id()),
        }
    }
}

/// A component reference into a loaded pack.
#[derive(Debug, Clone, Copy)]
pub struct ComponentRef<'a> {
    pub pack_index: usize,
    pub pack: &'a Pack,
    pub component: &'a Component,
}

/// An API reference into a loaded pack.
#[derive(Debug, Clone, Copy)]
pub struct ApiRef<'a> {
    pub pack_index: usize,
    pub pack: &'a Pack,
    pub api: &'a Api,
}

/// A device reference into a loaded pack.
#[derive(Debug, Clone, Copy)]
pub struct DeviceRef<'a> {
    pub pack_index: usize,
    pub pack: &'a Pack,
    pub device: &'a Device,
}

/// A board reference into a loaded pack.
#[derive(Debug, Clone, Copy)]
pub struct BoardRef<'a> {
    pub pack_index: usize,
    pub pack: &'a Pack,
    pub board: &'a Board,
}

/// A component selected into a context. Owns a clone of the component so
/// one context's selection cannot alias another's.
#[derive(Debug, Clone)]
pub struct SelectedComponent {
    pub pack_id: PackId,
    pub pack_index: usize,
    pub component: Component,
    /// The input expression that caused the selection.
    pub selected_by: String,
    pub instances: u32,
}

impl SelectedComponent {
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.component.attributes()
    }
}

/// Outcome of dependency solving for one selected component.
#[derive(Debug, Clone)]
pub struct DependencyResult {
    pub component_id: String,
    pub result: ConditionResult,
    /// Candidate component ids that could satisfy unmet requirements.
    pub aggregates: Vec<String>,
    /// Human-readable forms of the unmet expressions.
    pub expressions: Vec<String>,
}

/// The read-only global model.
#[derive(Debug, Default)]
pub struct RteModel {
    packs: Vec<Pack>,
}

impl RteModel {
    pub fn new(packs: Vec<Pack>) -> Self {
        debug!("Model built from {} packs", packs.len());
        Self { packs }
    }

    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    pub fn find_pack(&self, common_id: &str) -> Option<&Pack> {
        self.packs
            .iter()
            .filter(|p| p.id.common_id() == common_id)
            .max_by(|a, b| compare_versions(&a.id.version, &b.id.version))
    }

    pub fn find_pack_by_id(&self, id: &str) -> Option<&Pack> {
        self.packs.iter().find(|p| p.id.to_string() == id)
    }

    /// Components that survive the pack filter and whose conditions hold
    /// for the target, keyed by full id.
    pub fn filtered_components(
        &self,
        target: &TargetAttributes,
        filter: &PackFilter,
    ) -> BTreeMap<String, ComponentRef<'_>> {
        let evaluator = ConditionEvaluator::filter(self, target);
        let mut map = BTreeMap::new();
        for (pack_index, pack) in self.packs.iter().enumerate() {
            if !filter.allows(&pack.id) {
                continue;
            }
            for component in &pack.components {
                let result = match &component.condition {
                    Some(condition) => evaluator.evaluate(pack_index, condition),
                    None => ConditionResult::Ignored,
                };
                if result < ConditionResult::Fulfilled {
                    continue;
                }
                map.insert(
                    component.full_id(),
                    ComponentRef {
                        pack_index,
                        pack,
                        component,
                    },
                );
            }
        }
        map
    }

    /// APIs that survive the pack filter and the target condition.
    pub fn filtered_apis(
        &self,
        target: &TargetAttributes,
        filter: &PackFilter,
    ) -> Vec<ApiRef<'_>> {
        let evaluator = ConditionEvaluator::filter(self, target);
        let mut apis = Vec::new();
        for (pack_index, pack) in self.packs.iter().enumerate() {
            if !filter.allows(&pack.id) {
                continue;
            }
            for api in &pack.apis {
                let result = match &api.condition {
                    Some(condition) => evaluator.evaluate(pack_index, condition),
                    None => ConditionResult::Ignored,
                };
                if result < ConditionResult::Fulfilled {
                    continue;
                }
                apis.push(ApiRef {
                    pack_index,
                    pack,
                    api,
                });
            }
        }
        apis
    }

    /// All devices, in pack order.
    pub fn devices(&self) -> impl Iterator<Item = DeviceRef<'_>> {
        self.packs.iter().enumerate().flat_map(|(pack_index, pack)| {
            pack.devices.iter().map(move |device| DeviceRef {
                pack_index,
                pack,
                device,
            })
        })
    }

    /// Devices matching a name (and optionally a vendor), ordered so the
    /// entry from the highest pack version comes first.
    pub fn find_devices(&self, name: &str, vendor: &str) -> Vec<DeviceRef<'_>> {
        let mut found: Vec<DeviceRef> = self
            .devices()
            .filter(|d| d.device.name == name)
            .filter(|d| vendor.is_empty() || d.device.vendor == vendor)
            .collect();
        found.sort_by(|a, b| match compare_versions(&b.pack.id.version, &a.pack.id.version) {
            Ordering::Equal => a.pack_index.cmp(&b.pack_index),
            other => other,
        });
        found
    }

    /// All boards, in pack order.
    pub fn boards(&self) -> impl Iterator<Item = BoardRef<'_>> {
        self.packs.iter().enumerate().flat_map(|(pack_index, pack)| {
            pack.boards.iter().map(move |board| BoardRef {
                pack_index,
                pack,
                board,
            })
        })
    }

    /// Boards matching a name (and optionally vendor/revision).
    pub fn find_boards(&self, name: &str, vendor: &str, revision: &str) -> Vec<BoardRef<'_>> {
        self.boards()
            .filter(|b| b.board.name == name)
            .filter(|b| vendor.is_empty() || b.board.vendor == vendor)
            .filter(|b| revision.is_empty() || b.board.revision == revision)
            .collect()
    }

    /// Installed components matching a component expression, regardless of
    /// selection.
    pub(crate) fn components_matching<'m>(
        &'m self,
        expression: &'m Expression,
    ) -> impl Iterator<Item = ComponentRef<'m>> + 'm {
        self.packs.iter().enumerate().flat_map(move |(pack_index, pack)| {
            pack.components
                .iter()
                .filter(move |c| component_matches(expression, &c.attributes()))
                .map(move |component| ComponentRef {
                    pack_index,
                    pack,
                    component,
                })
        })
    }

    /// Solve dependencies for a selection of components.
    ///
    /// Every selected component contributes one result; the context is
    /// valid when all results are at least [`ConditionResult::Fulfilled`].
    pub fn dependency_solve(
        &self,
        target: &TargetAttributes,
        selection: &[SelectedComponent],
    ) -> Vec<DependencyResult> {
        let evaluator = ConditionEvaluator::dependency(self, target, selection);
        let mut results = Vec::new();
        for selected in selection {
            let mut result = match &selected.component.condition {
                Some(condition) => evaluator.evaluate(selected.pack_index, condition),
                None => ConditionResult::Ignored,
            };
            let mut aggregates = Vec::new();
            let mut expressions = Vec::new();
            if result < ConditionResult::Fulfilled {
                self.collect_unmet(
                    selected.pack_index,
                    selected.component.condition.as_deref(),
                    selection,
                    &mut aggregates,
                    &mut expressions,
                    &mut BTreeSet::new(),
                );
            }

            // An api-typed component requires exactly one selected
            // implementation of its contract.
            if !selected.component.api_version.is_empty() {
                let api_result = self.check_api(selected, selection, target);
                result = result.min(api_result);
            }

            aggregates.sort();
            aggregates.dedup();
            results.push(DependencyResult {
                component_id: selected.component.full_id(),
                result,
                aggregates,
                expressions,
            });
        }
        results
    }

    fn check_api(
        &self,
        selected: &SelectedComponent,
        selection: &[SelectedComponent],
        target: &TargetAttributes,
    ) -> ConditionResult {
        let apis = self.filtered_apis(target, &PackFilter::all());
        let api = apis
            .iter()
            .find(|a| a.api.implemented_by(&selected.component));
        match api {
            None => ConditionResult::MissingApi,
            Some(api) => {
                let implementors = selection
                    .iter()
                    .filter(|s| api.api.implemented_by(&s.component))
                    .count();
                if api.api.exclusive && implementors > 1 {
                    ConditionResult::Conflict
                } else {
                    ConditionResult::Fulfilled
                }
            }
        }
    }

    /// Walk a condition tree collecting unmet component expressions along
    /// with candidate component ids.
    fn collect_unmet(
        &self,
        pack_index: usize,
        condition_id: Option<&str>,
        selection: &[SelectedComponent],
        aggregates: &mut Vec<String>,
        expressions: &mut Vec<String>,
        visited: &mut BTreeSet<(usize, String)>,
    ) {
        let Some(condition_id) = condition_id else {
            return;
        };
        if !visited.insert((pack_index, condition_id.to_string())) {
            return;
        }
        let Some(condition) = self
            .packs
            .get(pack_index)
            .and_then(|p| p.condition(condition_id))
        else {
            return;
        };
        for expression in &condition.expressions {
            if let Some(nested) = expression.condition_ref() {
                self.collect_unmet(
                    pack_index,
                    Some(nested),
                    selection,
                    aggregates,
                    expressions,
                    visited,
                );
                continue;
            }
            if !expression.is_component_expression()
                || expression.kind == ExpressionKind::Deny
            {
                continue;
            }
            let satisfied = selection
                .iter()
                .any(|s| component_matches(expression, &s.attributes()));
            if satisfied {
                continue;
            }
            expressions.push(describe_expression(expression));
            for candidate in self.components_matching(expression) {
                aggregates.push(candidate.component.full_id());
            }
        }
    }
}

fn describe_expression(expression: &Expression) -> String {
    let kind = match expression.kind {
        ExpressionKind::Require => "require",
        ExpressionKind::Accept => "accept",
        ExpressionKind::Deny => "deny",
    };
    let attrs: Vec<String> = expression
        .attributes
        .iter()
        .filter(|(k, _)| k.as_str() != "condition")
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{kind} {}", attrs.join(" "))
}

/// Pick the highest version among components sharing an aggregate id.
pub fn highest_component_version<'a, I: IntoIterator<Item = ComponentRef<'a>>>(
    candidates: I,
) -> Option<ComponentRef<'a>> {
    candidates.into_iter().max_by(|a, b| {
        match (
            parse_lenient(&a.component.version),
            parse_lenient(&b.component.version),
        ) {
            (Ok(va), Ok(vb)) => compare_versions(&va, &vb),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => Ordering::Equal,
        }
    })
}
