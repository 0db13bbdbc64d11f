//! Layer discovery and connection solving.
//!
//! Candidate layers come from packs and from an optional filesystem
//! search. Their `connections:` form columns (one per layer type);
//! cross-producting the columns enumerates combinations, and each
//! combination is validated over its active connection set: conflicts,
//! numeric overflows, unsatisfied consumes and unconsumed layers.

use crate::context::{wildcard_match, Context};
use crate::diagnostics::Diagnostics;
use crate::parser::{ClayerItem, ConnectNode, Parser};
use anyhow::{bail, Result};
use log::debug;
use rtemodel::RteModel;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use walkdir::WalkDir;

/// One connection with flattened endpoints.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Connect {
    pub description: String,
    pub set: String,
    pub provides: Vec<(String, String)>,
    pub consumes: Vec<(String, String)>,
}

impl Connect {
    pub fn from_node(node: &ConnectNode) -> Self {
        Self {
            description: node.connect.clone(),
            set: node.set.clone().unwrap_or_default(),
            provides: node.provides_flat(),
            consumes: node.consumes_flat(),
        }
    }

    /// The `config-id`: the part of the `set` selector before the first
    /// dot.
    pub fn config_id(&self) -> String {
        match self.set.split_once('.') {
            Some((id, _)) => id.to_string(),
            None => self.set.clone(),
        }
    }
}

/// The connections contributed by one file under one chosen set
/// selection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionsCollection {
    pub filename: String,
    pub layer_type: String,
    pub from_project: bool,
    pub connects: Vec<Connect>,
}

/// Validation outcome over one combination.
#[derive(Debug, Clone, Default)]
pub struct ConnectionsValidationResult {
    pub valid: bool,
    pub conflicts: Vec<String>,
    pub overflows: Vec<(String, String)>,
    pub incompatibles: Vec<(String, String)>,
    /// Collections whose provides nobody consumes.
    pub missed_collections: Vec<String>,
}

/// Compute the set-selection alternatives of one layer file: connects
/// grouped by config id, one set value chosen per group, untagged
/// connects always included.
pub fn select_combinations(connects: &[Connect]) -> Vec<Vec<Connect>> {
    let always: Vec<Connect> = connects.iter().filter(|c| c.set.is_empty()).cloned().collect();
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for connect in connects.iter().filter(|c| !c.set.is_empty()) {
        let values = groups.entry(connect.config_id()).or_default();
        if !values.contains(&connect.set) {
            values.push(connect.set.clone());
        }
    }
    let mut combinations = vec![always];
    for (config_id, set_values) in &groups {
        let mut next = Vec::new();
        for combination in &combinations {
            for set_value in set_values {
                let mut extended = combination.clone();
                extended.extend(
                    connects
                        .iter()
                        .filter(|c| c.config_id() == *config_id && c.set == *set_value)
                        .cloned(),
                );
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}

/// Compute the active subset of a combination's connections.
///
/// Active are: connections of the project file, connections without
/// provides, and connections with at least one provided key consumed by
/// another active connection; propagated to fixpoint.
fn active_connects(collections: &[ConnectionsCollection]) -> Vec<(usize, Connect)> {
    let mut all: Vec<(usize, Connect, bool)> = Vec::new();
    for (index, collection) in collections.iter().enumerate() {
        for connect in &collection.connects {
            let seed = collection.from_project || connect.provides.is_empty();
            all.push((index, connect.clone(), seed));
        }
    }
    loop {
        let consumed: BTreeSet<String> = all
            .iter()
            .filter(|(_, _, active)| *active)
            .flat_map(|(_, c, _)| c.consumes.iter().map(|(k, _)| k.clone()))
            .collect();
        let mut changed = false;
        for entry in all.iter_mut() {
            if entry.2 {
                continue;
            }
            if entry.1.provides.iter().any(|(k, _)| consumed.contains(k)) {
                entry.2 = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    all.into_iter()
        .filter(|(_, _, active)| *active)
        .map(|(index, connect, _)| (index, connect))
        .collect()
}

/// Validate one combination of collections.
pub fn validate_connections(
    collections: &[ConnectionsCollection],
) -> ConnectionsValidationResult {
    let active = active_connects(collections);
    let mut result = ConnectionsValidationResult {
        valid: true,
        ..Default::default()
    };

    // Conflicts: a key provided by more than one active connection.
    let mut providers: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, connect) in &active {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for (key, _) in &connect.provides {
            // A key listed twice inside one connection counts once.
            if seen.insert(key) {
                *providers.entry(key).or_default() += 1;
            }
        }
    }
    for (key, count) in &providers {
        if *count > 1 {
            result.conflicts.push(key.to_string());
        }
    }

    let provided: BTreeMap<&str, &str> = active
        .iter()
        .flat_map(|(_, c)| c.provides.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .collect();

    // Overflows and incompatibilities over the consumed side.
    let mut added: BTreeMap<&str, i64> = BTreeMap::new();
    for (_, connect) in &active {
        for (key, value) in &connect.consumes {
            let Some(provided_value) = provided.get(key.as_str()) else {
                result
                    .incompatibles
                    .push((key.clone(), value.clone()));
                continue;
            };
            if let Some(addend) = value.strip_prefix('+') {
                let addend: i64 = addend.trim().parse().unwrap_or(0);
                *added.entry(key.as_str()).or_default() += addend;
            } else if !value.is_empty() && value != provided_value {
                result.incompatibles.push((key.clone(), value.clone()));
            }
        }
    }
    for (key, total) in &added {
        let capacity: i64 = provided
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if *total > capacity {
            result
                .overflows
                .push((key.to_string(), format!("{total} > {capacity}")));
        }
    }

    // Layers providing something nobody consumes are missed; the project
    // file itself may provide unconsumed endpoints.
    let consumed: BTreeSet<&str> = active
        .iter()
        .flat_map(|(_, c)| c.consumes.iter().map(|(k, _)| k.as_str()))
        .collect();
    for (index, collection) in collections.iter().enumerate() {
        if collection.from_project || collection.connects.is_empty() {
            continue;
        }
        let provides: BTreeSet<&str> = collection
            .connects
            .iter()
            .flat_map(|c| c.provides.iter().map(|(k, _)| k.as_str()))
            .collect();
        if provides.is_empty() {
            continue;
        }
        let active_here = active.iter().any(|(i, _)| *i == index);
        if !active_here || provides.iter().all(|k| !consumed.contains(k)) {
            result.missed_collections.push(collection.filename.clone());
        }
    }

    result.valid = result.conflicts.is_empty()
        && result.overflows.is_empty()
        && result.incompatibles.is_empty()
        && result.missed_collections.is_empty();
    result
}

/// Drop combinations whose collection set is a subset of another valid
/// combination.
pub fn remove_redundant_subsets(
    combinations: &mut Vec<Vec<ConnectionsCollection>>,
) {
    let sets: Vec<BTreeSet<ConnectionsCollection>> = combinations
        .iter()
        .map(|combination| combination.iter().cloned().collect())
        .collect();
    let mut keep = vec![true; combinations.len()];
    for (a, set_a) in sets.iter().enumerate() {
        for (b, set_b) in sets.iter().enumerate() {
            if a == b || !keep[a] {
                continue;
            }
            if set_a != set_b && set_a.is_subset(set_b) {
                keep[a] = false;
            }
        }
    }
    let mut index = 0;
    combinations.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

/// A candidate layer for one required type.
#[derive(Debug, Clone)]
pub struct LayerCandidate {
    pub path: String,
    pub layer_type: String,
    pub item: ClayerItem,
}

/// Soft match of a layer's `for-board` / `for-device` filter against the
/// resolved target.
pub fn layer_matches_target(context: &Context, item: &ClayerItem) -> bool {
    if let Some(for_board) = &item.layer.for_board {
        if !for_board.is_empty() {
            let spec = crate::context::BoardSpec::parse(for_board);
            let matched = (spec.vendor.is_empty()
                || wildcard_match(&spec.vendor, &context.board_item.vendor))
                && (spec.name.is_empty()
                    || wildcard_match(&spec.name, &context.board_item.name))
                && (spec.revision.is_empty()
                    || wildcard_match(&spec.revision, &context.board_item.revision));
            if !matched {
                return false;
            }
        }
    }
    if let Some(for_device) = &item.layer.for_device {
        if !for_device.is_empty() {
            let spec = crate::context::DeviceSpec::parse(for_device);
            let matched = (spec.vendor.is_empty()
                || wildcard_match(&spec.vendor, &context.device_item.vendor))
                && (spec.name.is_empty()
                    || wildcard_match(&spec.name, &context.device_item.name))
                && (spec.pname.is_empty()
                    || wildcard_match(&spec.pname, &context.device_item.pname));
            if !matched {
                return false;
            }
        }
    }
    true
}

/// Collect candidate layer files from loaded packs.
fn candidates_from_packs(model: &RteModel) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for pack in model.packs() {
        for clayer in &pack.clayers {
            let path = pack.path.join(&clayer.file);
            out.push((
                path.to_string_lossy().to_string(),
                clayer.layer_type.clone(),
            ));
        }
    }
    out
}

/// Collect candidate layer files below a search path.
fn candidates_from_search_path(search_path: &Path) -> Vec<String> {
    WalkDir::new(search_path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_string_lossy().to_string())
        .filter(|p| p.ends_with(".clayer.yml") || p.ends_with(".clayer.yaml"))
        .collect()
}

/// Discover layers compatible with the context and record every valid
/// combination.
///
/// Returns an error when a required layer type has no valid combination.
pub fn discover_layers(
    context: &mut Context,
    parser: &mut Parser,
    model: &RteModel,
    search_path: Option<&Path>,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    // Required types: layer entries without an explicit path.
    let mut required: Vec<(String, bool)> = Vec::new();
    for entry in &context.cproject.project.layers {
        if !entry.layer.is_empty() {
            continue;
        }
        if !crate::context::context_filters_allow(
            &entry.for_context,
            &entry.not_for_context,
            &context.type_pair,
        ) {
            continue;
        }
        required.push((entry.layer_type.clone(), entry.optional));
    }
    if required.is_empty() {
        return Ok(());
    }

    // Candidate files per required type.
    let mut pack_candidates = candidates_from_packs(model);
    if let Some(search_path) = search_path {
        for path in candidates_from_search_path(search_path) {
            pack_candidates.push((path, String::new()));
        }
    }
    let mut candidates: BTreeMap<String, Vec<LayerCandidate>> = BTreeMap::new();
    for (path, declared_type) in pack_candidates {
        let key = match parser.parse_generic_clayer(Path::new(&path)) {
            Ok(key) => key,
            Err(e) => {
                debug!("Skipping layer candidate '{path}': {e}");
                continue;
            }
        };
        let item = parser.generic_clayers[&key].clone();
        let layer_type = if item.layer.layer_type.is_empty() {
            declared_type
        } else {
            item.layer.layer_type.clone()
        };
        if !required.iter().any(|(t, _)| *t == layer_type) {
            continue;
        }
        if !layer_matches_target(context, &item) {
            continue;
        }
        candidates.entry(layer_type.clone()).or_default().push(LayerCandidate {
            path: key,
            layer_type,
            item,
        });
    }

    let missed: Vec<&str> = required
        .iter()
        .filter(|(layer_type, optional)| {
            !optional && !candidates.contains_key(layer_type)
        })
        .map(|(layer_type, _)| layer_type.as_str())
        .collect();
    if !missed.is_empty() {
        bail!(
            "No matching layer was found for the required types: {}",
            missed.join(", ")
        );
    }

    // Build columns: the project connections first, then one column per
    // required type. Optional types contribute an empty alternative.
    let project_connects: Vec<Connect> = context
        .cproject
        .project
        .connections
        .iter()
        .map(Connect::from_node)
        .collect();
    let project_collection = ConnectionsCollection {
        filename: context.cproject.path.to_string_lossy().to_string(),
        layer_type: String::new(),
        from_project: true,
        connects: project_connects,
    };

    let mut columns: Vec<Vec<Vec<ConnectionsCollection>>> = Vec::new();
    for (layer_type, optional) in &required {
        let mut alternatives: Vec<Vec<ConnectionsCollection>> = Vec::new();
        if let Some(layer_candidates) = candidates.get(layer_type) {
            for candidate in layer_candidates {
                let connects: Vec<Connect> = candidate
                    .item
                    .layer
                    .connections
                    .iter()
                    .map(Connect::from_node)
                    .collect();
                for selection in select_combinations(&connects) {
                    alternatives.push(vec![ConnectionsCollection {
                        filename: candidate.path.clone(),
                        layer_type: layer_type.clone(),
                        from_project: false,
                        connects: selection,
                    }]);
                }
            }
        }
        if *optional {
            alternatives.push(Vec::new());
        }
        columns.push(alternatives);
    }

    // Cross-product the columns.
    let mut combinations: Vec<Vec<ConnectionsCollection>> = vec![vec![project_collection]];
    for column in columns {
        let mut next = Vec::new();
        for combination in &combinations {
            for alternative in &column {
                let mut extended = combination.clone();
                extended.extend(alternative.iter().cloned());
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations.sort();
    combinations.dedup();

    let mut valid: Vec<Vec<ConnectionsCollection>> = Vec::new();
    for combination in combinations {
        let result = validate_connections(&combination);
        if result.valid {
            valid.push(combination);
        }
    }
    remove_redundant_subsets(&mut valid);

    if valid.is_empty() {
        bail!("No valid combination of layers satisfies the required connections");
    }

    // Record compatible layers and the set selectors that participate in
    // valid combinations, for deterministic reporting.
    for combination in &valid {
        for collection in combination {
            if collection.from_project {
                continue;
            }
            let layers = context
                .compatible_layers
                .entry(collection.layer_type.clone())
                .or_default();
            if !layers.contains(&collection.filename) {
                layers.push(collection.filename.clone());
            }
            let sets = context
                .layer_sets
                .entry(collection.filename.clone())
                .or_default();
            for connect in &collection.connects {
                if !connect.set.is_empty() {
                    sets.insert(connect.set.clone());
                }
            }
        }
    }
    diagnostics.info(
        &context.name,
        format!(
            "{} valid layer combination(s) found",
            valid.len()
        ),
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn connect(
        set: &str,
        provides: &[(&str, &str)],
        consumes: &[(&str, &str)],
    ) -> Connect {
        Connect {
            description: String::new(),
            set: set.to_string(),
            provides: provides
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            consumes: consumes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn collection(
        filename: &str,
        from_project: bool,
        connects: Vec<Connect>,
    ) -> ConnectionsCollection {
        ConnectionsCollection {
            filename: filename.to_string(),
            layer_type: "Board".to_string(),
            from_project,
            connects,
        }
    }

    #[test]
    fn valid_combination() {
        let project = collection(
            "app.cproject.yml",
            true,
            vec![connect("", &[], &[("UART", "")])],
        );
        let layer = collection(
            "board.clayer.yml",
            false,
            vec![connect("", &[("UART", "")], &[])],
        );
        let result = validate_connections(&[project, layer]);
        assert!(result.valid, "{result:?}");
    }

    #[test]
    fn overflow_detection() {
        // Two consumers ask for +3 and +2 of a capacity of 4.
        let provider = collection(
            "board.clayer.yml",
            false,
            vec![connect("", &[("CMSIS_DEVICE_HCLK", "4")], &[])],
        );
        let consumer_a = collection(
            "app.cproject.yml",
            true,
            vec![connect("", &[], &[("CMSIS_DEVICE_HCLK", "+3")])],
        );
        let consumer_b = collection(
            "shield.clayer.yml",
            false,
            vec![connect(
                "",
                &[("Shield", "")],
                &[("CMSIS_DEVICE_HCLK", "+2")],
            )],
        );
        let app_consumes_shield = collection(
            "app2.cproject.yml",
            true,
            vec![connect("", &[], &[("Shield", "")])],
        );
        let result = validate_connections(&[
            provider,
            consumer_a,
            consumer_b,
            app_consumes_shield,
        ]);
        assert!(!result.valid);
        assert_eq!(
            result.overflows,
            vec![("CMSIS_DEVICE_HCLK".to_string(), "5 > 4".to_string())]
        );
    }

    #[test]
    fn conflict_detection() {
        let a = collection(
            "a.clayer.yml",
            false,
            vec![connect("", &[("UART", "1")], &[])],
        );
        let b = collection(
            "b.clayer.yml",
            false,
            vec![connect("", &[("UART", "2")], &[])],
        );
        let project = collection(
            "app.cproject.yml",
            true,
            vec![connect("", &[], &[("UART", "")])],
        );
        let result = validate_connections(&[a, b, project]);
        assert!(!result.valid);
        assert_eq!(result.conflicts, vec!["UART"]);
    }

    #[test]
    fn incompatible_value_and_missing_provider() {
        let project = collection(
            "app.cproject.yml",
            true,
            vec![connect("", &[], &[("MISSING", ""), ("SPEED", "fast")])],
        );
        let layer = collection(
            "board.clayer.yml",
            false,
            vec![connect("", &[("SPEED", "slow")], &[])],
        );
        let result = validate_connections(&[project, layer]);
        assert!(!result.valid);
        assert!(result
            .incompatibles
            .contains(&("MISSING".to_string(), String::new())));
        assert!(result
            .incompatibles
            .contains(&("SPEED".to_string(), "fast".to_string())));
    }

    #[test]
    fn unconsumed_layer_is_missed() {
        let project = collection("app.cproject.yml", true, vec![connect("", &[], &[])]);
        let layer = collection(
            "board.clayer.yml",
            false,
            vec![connect("", &[("UNUSED", "")], &[])],
        );
        let result = validate_connections(&[project, layer]);
        assert!(!result.valid);
        assert_eq!(result.missed_collections, vec!["board.clayer.yml"]);
    }

    #[test]
    fn project_orphan_provides_are_allowed() {
        let project = collection(
            "app.cproject.yml",
            true,
            vec![connect("", &[("HEARTBEAT", "")], &[])],
        );
        let result = validate_connections(&[project]);
        assert!(result.valid, "{result:?}");
    }

    #[test]
    fn set_combinations_group_by_config_id() {
        let connects = vec![
            connect("", &[("BASE", "")], &[]),
            connect("config1.a", &[("A", "")], &[]),
            connect("config1.b", &[("B", "")], &[]),
            connect("config2.x", &[("X", "")], &[]),
        ];
        let combinations = select_combinations(&connects);
        // config1 has two alternatives, config2 one: two combinations,
        // each holding the untagged connect.
        assert_eq!(combinations.len(), 2);
        for combination in &combinations {
            assert!(combination.iter().any(|c| c.set.is_empty()));
            assert!(combination.iter().any(|c| c.config_id() == "config2"));
        }
        assert!(combinations[0].iter().any(|c| c.set == "config1.a"));
        assert!(combinations[1].iter().any(|c| c.set == "config1.b"));
    }

    #[test]
    fn redundant_subsets_are_dropped() {
        let base = collection("a.clayer.yml", false, vec![connect("", &[("A", "")], &[])]);
        let extra = collection("b.clayer.yml", false, vec![connect("", &[("B", "")], &[])]);
        let mut combinations = vec![
            vec![base.clone()],
            vec![base.clone(), extra.clone()],
        ];
        remove_redundant_subsets(&mut combinations);
        assert_eq!(combinations.len(), 1);
        assert_eq!(combinations[0].len(), 2);
    }

    #[test]
    fn validation_is_idempotent_on_valid_sets() {
        let project = collection(
            "app.cproject.yml",
            true,
            vec![connect("", &[], &[("UART", "")])],
        );
        let layer = collection(
            "board.clayer.yml",
            false,
            vec![connect("", &[("UART", "")], &[])],
        );
        let combination = vec![project, layer];
        let first = validate_connections(&combination);
        let second = validate_connections(&combination);
        assert!(first.valid && second.valid);
        assert!(second.conflicts.is_empty());
        assert!(second.overflows.is_empty());
        assert!(second.incompatibles.is_empty());
        assert!(second.missed_collections.is_empty());
    }
}
