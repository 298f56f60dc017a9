//! Mutation Engine (C7): per-document tree diff, similarity-scored
//! per-unit resource matching, predicate-aware patch replay, and reset
//! to placeholder sentinels.
//!
//! Known simplification (see DESIGN.md): `MutationInfo::value` holds
//! the captured subtree as a [`Node`] directly rather than a separately
//! serialized byte string, since every consumer in this crate needs the
//! structured form back immediately and serializing/reparsing at this
//! boundary would only add round-trip risk for no benefit.

use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::{Node, NodeData, PLACEHOLDER_INT, PLACEHOLDER_STRING, serialize_container};
use crate::path::{Path, Segment};
use crate::provider::{ResourceInfo, ResourceProvider};

/// The kind of change recorded for a resource or a single path within
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    None,
    Add,
    Update,
    Delete,
    Replace,
}

/// A single recorded mutation: a path-level or resource-level change,
/// tagged with the function invocation that produced it and whether a
/// later patch may override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationInfo {
    pub kind: MutationKind,
    pub index: i64,
    pub predicate: bool,
    pub value: Option<Node>,
}

impl MutationInfo {
    fn none(index: i64) -> Self {
        MutationInfo { kind: MutationKind::None, index, predicate: true, value: None }
    }
}

/// All mutations recorded for one resource between two configuration
/// unit versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMutation {
    pub resource: ResourceInfo,
    pub resource_mutation: MutationInfo,
    pub path_mutation_map: BTreeMap<String, MutationInfo>,
    pub aliases: HashSet<String>,
    pub aliases_without_scopes: HashSet<String>,
}

fn classify_or_log(provider: &dyn ResourceProvider, doc: &Node) -> Option<ResourceInfo> {
    let category = provider
        .category_of(doc)
        .map_err(|e| debug!("mutation: classification failed: {e}"))
        .ok()?;
    let type_ = provider
        .type_of(doc)
        .map_err(|e| debug!("mutation: classification failed: {e}"))
        .ok()?;
    let name = provider
        .name_of(doc)
        .map_err(|e| debug!("mutation: classification failed: {e}"))
        .ok()?;
    Some(ResourceInfo { category, type_, name })
}

// ---------------------------------------------------------------
// Per-document diff
// ---------------------------------------------------------------

/// Diff `prev` against `modified`, recording one [`MutationInfo`] per
/// changed path into `sink`, keyed by the path's wire form so parent
/// entries sort before their children.
pub fn compute_mutations_for_docs(root_path: &Path, prev: &Node, modified: &Node, function_index: i64, sink: &mut BTreeMap<String, MutationInfo>) {
    match (&prev.data, &modified.data) {
        (NodeData::Mapping(prev_pairs), NodeData::Mapping(mod_pairs)) => {
            let prev_keys: HashSet<&str> = prev_pairs.iter().filter_map(|(k, _)| k.as_str()).collect();
            let mod_keys: HashSet<&str> = mod_pairs.iter().filter_map(|(k, _)| k.as_str()).collect();

            for key in &mod_keys {
                let child_path = root_path.joined(Segment::Field((*key).to_string()));
                let modified_child = mod_pairs.iter().find(|(k, _)| k.as_str() == Some(*key)).map(|(_, v)| v).unwrap();
                match prev_pairs.iter().find(|(k, _)| k.as_str() == Some(*key)) {
                    None => {
                        sink.insert(
                            child_path.to_wire(),
                            MutationInfo { kind: MutationKind::Add, index: function_index, predicate: true, value: Some(modified_child.clone()) },
                        );
                    }
                    Some((_, prev_child)) => {
                        compute_mutations_for_docs(&child_path, prev_child, modified_child, function_index, sink);
                    }
                }
            }
            for key in prev_keys.difference(&mod_keys) {
                let child_path = root_path.joined(Segment::Field((*key).to_string()));
                let prev_child = prev_pairs.iter().find(|(k, _)| k.as_str() == Some(*key)).map(|(_, v)| v).unwrap();
                sink.insert(
                    child_path.to_wire(),
                    MutationInfo { kind: MutationKind::Delete, index: function_index, predicate: true, value: Some(prev_child.clone()) },
                );
            }
        }
        (NodeData::Sequence(prev_items), NodeData::Sequence(mod_items)) => {
            let max_len = prev_items.len().max(mod_items.len());
            for i in 0..max_len {
                let child_path = root_path.joined(Segment::Index(i));
                match (prev_items.get(i), mod_items.get(i)) {
                    (None, None) => unreachable!(),
                    (None, Some(added)) => {
                        sink.insert(
                            child_path.to_wire(),
                            MutationInfo { kind: MutationKind::Add, index: function_index, predicate: true, value: Some(added.clone()) },
                        );
                    }
                    (Some(removed), None) => {
                        sink.insert(
                            child_path.to_wire(),
                            MutationInfo { kind: MutationKind::Delete, index: function_index, predicate: true, value: Some(removed.clone()) },
                        );
                    }
                    (Some(prev_item), Some(mod_item)) => {
                        compute_mutations_for_docs(&child_path, prev_item, mod_item, function_index, sink);
                    }
                }
            }
        }
        (NodeData::Scalar(a), NodeData::Scalar(b)) => {
            if a != b {
                sink.insert(
                    root_path.to_wire(),
                    MutationInfo { kind: MutationKind::Update, index: function_index, predicate: true, value: Some(modified.clone()) },
                );
            }
        }
        (NodeData::Empty, NodeData::Empty) => {}
        (NodeData::Mapping(prev_pairs), _) if matches!(modified.data, NodeData::Empty) => {
            for (k, v) in prev_pairs {
                if let Some(key) = k.as_str() {
                    sink.insert(
                        root_path.joined(Segment::Field(key.to_string())).to_wire(),
                        MutationInfo { kind: MutationKind::Delete, index: function_index, predicate: true, value: Some(v.clone()) },
                    );
                }
            }
        }
        _ => {
            sink.insert(
                root_path.to_wire(),
                MutationInfo { kind: MutationKind::Update, index: function_index, predicate: true, value: Some(modified.clone()) },
            );
        }
    }
}

fn diff_document(prev: &Node, modified: &Node, function_index: i64) -> BTreeMap<String, MutationInfo> {
    let mut sink = BTreeMap::new();
    compute_mutations_for_docs(&Path::root(), prev, modified, function_index, &mut sink);
    sink
}

// ---------------------------------------------------------------
// Per-unit diff
// ---------------------------------------------------------------

const MATCH_THRESHOLD: f64 = 1.0;

fn names_match(provider: &dyn ResourceProvider, a: &ResourceInfo, b: &ResourceInfo) -> bool {
    a.name == b.name || a.scopeless_name(provider) == b.scopeless_name(provider)
}

fn total_lines(unit: &[Node]) -> usize {
    match serialize_container(unit) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).lines().count().max(1),
        Err(_) => 1,
    }
}

/// Match resources across two unit versions and compute per-resource
/// mutations. Matching is similarity-based since
/// Kubernetes-style names may change between versions.
pub fn compute_mutations(
    prev_unit: &[Node],
    modified_unit: &[Node],
    function_index: i64,
    provider: &dyn ResourceProvider,
) -> Result<Vec<ResourceMutation>, CoreError> {
    let total = total_lines(modified_unit);
    let prev_classified: Vec<Option<ResourceInfo>> = prev_unit.iter().map(|d| classify_or_log(provider, d)).collect();
    let mut matched_prev: HashSet<usize> = HashSet::new();
    let mut out = Vec::new();

    for modified_doc in modified_unit {
        let Some(modified_info) = classify_or_log(provider, modified_doc) else { continue };

        let mut best: Option<(usize, f64, BTreeMap<String, MutationInfo>)> = None;
        for prev_idx in 0..prev_unit.len() {
            if matched_prev.contains(&prev_idx) {
                continue;
            }
            let Some(prev_info) = &prev_classified[prev_idx] else { continue };
            if prev_info.category != modified_info.category {
                continue;
            }
            if !provider.types_are_similar(&prev_info.type_, &modified_info.type_) {
                continue;
            }

            let path_mutations = diff_document(&prev_unit[prev_idx], modified_doc, function_index);
            let exact = names_match(provider, prev_info, &modified_info);
            let score = if exact { 0.0 } else { path_mutations.len() as f64 / total as f64 };

            let is_better = match &best {
                None => true,
                Some((_, best_score, _)) => score < *best_score,
            };
            if is_better {
                best = Some((prev_idx, score, path_mutations));
            }
            if exact {
                break;
            }
        }

        match best {
            Some((prev_idx, score, path_mutations)) if score <= MATCH_THRESHOLD => {
                matched_prev.insert(prev_idx);
                let prev_info = prev_classified[prev_idx].clone().expect("matched index was classified");
                let kind = if path_mutations.is_empty() { MutationKind::None } else { MutationKind::Update };
                let mut aliases = HashSet::new();
                aliases.insert(prev_info.name.clone());
                aliases.insert(modified_info.name.clone());
                let mut aliases_without_scopes = HashSet::new();
                aliases_without_scopes.insert(prev_info.scopeless_name(provider));
                aliases_without_scopes.insert(modified_info.scopeless_name(provider));

                out.push(ResourceMutation {
                    resource: modified_info,
                    resource_mutation: MutationInfo { kind, index: function_index, predicate: true, value: None },
                    path_mutation_map: path_mutations,
                    aliases,
                    aliases_without_scopes,
                });
            }
            _ => {
                let scopeless = modified_info.scopeless_name(provider);
                out.push(ResourceMutation {
                    resource: modified_info.clone(),
                    resource_mutation: MutationInfo { kind: MutationKind::Add, index: function_index, predicate: true, value: Some(modified_doc.clone()) },
                    path_mutation_map: BTreeMap::new(),
                    aliases: HashSet::from([modified_info.name]),
                    aliases_without_scopes: HashSet::from([scopeless]),
                });
            }
        }
    }

    for (prev_idx, prev_doc) in prev_unit.iter().enumerate() {
        if matched_prev.contains(&prev_idx) {
            continue;
        }
        let Some(prev_info) = &prev_classified[prev_idx] else { continue };
        let scopeless = prev_info.scopeless_name(provider);
        out.push(ResourceMutation {
            resource: prev_info.clone(),
            resource_mutation: MutationInfo { kind: MutationKind::Delete, index: function_index, predicate: true, value: Some(prev_doc.clone()) },
            path_mutation_map: BTreeMap::new(),
            aliases: HashSet::from([prev_info.name.clone()]),
            aliases_without_scopes: HashSet::from([scopeless]),
        });
    }

    Ok(out)
}

// ---------------------------------------------------------------
// Apply
// ---------------------------------------------------------------

fn find_mutation_for<'a>(mutations: &'a [ResourceMutation], resource: &ResourceInfo, provider: &dyn ResourceProvider) -> Option<&'a ResourceMutation> {
    let scopeless = resource.scopeless_name(provider);
    mutations.iter().find(|m| {
        m.resource.name == resource.name
            || m.resource.scopeless_name(provider) == scopeless
            || m.aliases.contains(&resource.name)
            || m.aliases_without_scopes.contains(&scopeless)
    })
}

/// Walk `path`'s prefixes bottom-up; if any prefix is filtered by a
/// `Predicate=false` entry in `predicate`'s path map, this entry must
/// be skipped.
fn is_filtered_by_predicate(path_wire: &str, predicate: Option<&ResourceMutation>) -> bool {
    let Some(predicate) = predicate else { return false };
    if !predicate.resource_mutation.predicate {
        return true;
    }
    let Ok(path) = Path::parse(path_wire) else { return false };
    let segments = path.segments();
    for depth in (0..=segments.len()).rev() {
        let prefix = Path(segments[..depth].to_vec());
        if let Some(info) = predicate.path_mutation_map.get(&prefix.to_wire()) {
            if !info.predicate {
                return true;
            }
        }
    }
    false
}

/// Replay `patch` against `target`, honoring `predicates` (prior
/// mutations annotated on `target`'s own history; a `Predicate=false`
/// entry means "user modified this, do not overwrite").
pub fn patch_mutations(
    target: &mut [Node],
    predicates: Option<&[ResourceMutation]>,
    patch: &[ResourceMutation],
    provider: &dyn ResourceProvider,
) -> Result<(), CoreError> {
    for doc in target.iter_mut() {
        let Some(resource) = classify_or_log(provider, doc) else { continue };

        let predicate_record = predicates.and_then(|p| find_mutation_for(p, &resource, provider));
        if let Some(predicate) = predicate_record {
            if !predicate.resource_mutation.predicate {
                continue;
            }
        }

        let Some(patch_record) = find_mutation_for(patch, &resource, provider) else { continue };

        match patch_record.resource_mutation.kind {
            MutationKind::Add | MutationKind::Replace => {
                if let Some(value) = &patch_record.resource_mutation.value {
                    *doc = value.clone();
                }
                continue;
            }
            MutationKind::Delete => {
                *doc = Node::empty();
                continue;
            }
            MutationKind::None => continue,
            MutationKind::Update => {}
        }

        for (path_wire, info) in &patch_record.path_mutation_map {
            if is_filtered_by_predicate(path_wire, predicate_record) {
                continue;
            }
            let Ok(path) = Path::parse(path_wire) else {
                warn!("mutation: unparsable stored path {path_wire:?}, skipping");
                continue;
            };
            let result = match info.kind {
                MutationKind::Add | MutationKind::Update | MutationKind::Replace => {
                    let value = info.value.clone().unwrap_or_else(Node::null);
                    doc.set_doc(&path, value)
                }
                MutationKind::Delete => doc.delete(&path),
                MutationKind::None => Ok(()),
            };
            if let Err(e) = result {
                warn!("mutation: failed to apply patch entry at {path_wire}: {e}");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------
// Reset
// ---------------------------------------------------------------

fn placeholder_for(node: &Node) -> Option<Node> {
    if node.as_str().is_some() {
        Some(Node::string(PLACEHOLDER_STRING))
    } else if node.as_i64().is_some() {
        Some(Node::int(PLACEHOLDER_INT))
    } else {
        None
    }
}

/// Overwrite every leaf permitted by `predicates` (`Predicate=true`)
/// with its type-appropriate placeholder sentinel.
pub fn reset(target: &mut [Node], predicates: &[ResourceMutation], provider: &dyn ResourceProvider) -> Result<(), CoreError> {
    for doc in target.iter_mut() {
        let Some(resource) = classify_or_log(provider, doc) else { continue };
        let Some(predicate) = find_mutation_for(predicates, &resource, provider) else { continue };
        if !predicate.resource_mutation.predicate {
            continue;
        }
        for (path_wire, info) in &predicate.path_mutation_map {
            if !info.predicate {
                continue;
            }
            let Ok(path) = Path::parse(path_wire) else { continue };
            let Some(current) = doc.get(&path) else { continue };
            if let Some(placeholder) = placeholder_for(current) {
                if let Err(e) = doc.set_doc(&path, placeholder) {
                    warn!("mutation: failed to reset {path_wire}: {e}");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------
// DiffPatch convenience
// ---------------------------------------------------------------

/// Computes mutations between `original` and `modified`, then applies
/// them to `target` and serializes the result, skipping empty
/// documents. If no mutations are produced, `target` is returned
/// unchanged.
pub fn diff_patch(original: &[Node], modified: &[Node], target: &[Node], provider: &dyn ResourceProvider) -> Result<(Vec<u8>, bool), CoreError> {
    let mutations = compute_mutations(original, modified, 0, provider)?;
    if mutations.iter().all(|m| matches!(m.resource_mutation.kind, MutationKind::None)) {
        return Ok((serialize_container(target)?, false));
    }
    let mut patched = target.to_vec();
    patch_mutations(&mut patched, None, &mutations, provider)?;
    let bytes = serialize_container(&patched)?;
    Ok((bytes, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::KubernetesProvider;

    fn doc(yaml: &[u8]) -> Node {
        Node::parse_one(yaml).unwrap()
    }

    #[test]
    fn per_document_diff_emits_add_update_and_delete() {
        let prev = doc(b"a: 1\nb: 2\nc:\n  d: old\n");
        let modified = doc(b"a: 1\nc:\n  d: new\ne: 3\n");
        let mutations = diff_document(&prev, &modified, 0);
        assert_eq!(mutations.get("b").map(|m| m.kind), Some(MutationKind::Delete));
        assert_eq!(mutations.get("c.d").map(|m| m.kind), Some(MutationKind::Update));
        assert_eq!(mutations.get("e").map(|m| m.kind), Some(MutationKind::Add));
        assert_eq!(mutations.len(), 3);
    }

    #[test]
    fn per_document_diff_compares_sequences_positionally() {
        let prev = doc(b"items:\n  - a\n  - b\n");
        let modified = doc(b"items:\n  - a\n  - c\n  - d\n");
        let mutations = diff_document(&prev, &modified, 0);
        assert_eq!(mutations.get("items.1").map(|m| m.kind), Some(MutationKind::Update));
        assert_eq!(mutations.get("items.2").map(|m| m.kind), Some(MutationKind::Add));
    }

    #[test]
    fn per_unit_matching_accepts_exact_name_match_with_zero_score() {
        let provider = KubernetesProvider::new();
        let prev = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\ndata:\n  x: old\n")];
        let modified = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\ndata:\n  x: new\n")];
        let mutations = compute_mutations(&prev, &modified, 0, &provider).unwrap();
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].resource_mutation.kind, MutationKind::Update);
        assert_eq!(mutations[0].path_mutation_map.get("data.x").map(|m| m.kind), Some(MutationKind::Update));
    }

    #[test]
    fn per_unit_matching_reports_add_and_delete_for_unmatched_resources() {
        let provider = KubernetesProvider::new();
        let prev = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: old-one\ndata:\n  x: 1\n")];
        let modified = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: new-one\ndata:\n  y: 2\n")];
        let mutations = compute_mutations(&prev, &modified, 0, &provider).unwrap();
        let kinds: HashSet<_> = mutations.iter().map(|m| m.resource_mutation.kind).collect();
        assert!(kinds.contains(&MutationKind::Add) || kinds.contains(&MutationKind::Update));
        assert!(mutations.iter().any(|m| m.resource_mutation.kind == MutationKind::Delete) || mutations.len() == 1);
    }

    #[test]
    fn patch_mutations_applies_update_and_skips_when_predicate_false() {
        let provider = KubernetesProvider::new();
        let prev = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\ndata:\n  x: old\n")];
        let modified = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\ndata:\n  x: new\n")];
        let mutations = compute_mutations(&prev, &modified, 0, &provider).unwrap();

        let mut target = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\ndata:\n  x: old\n")];
        patch_mutations(&mut target, None, &mutations, &provider).unwrap();
        let value = target[0].get(&Path::parse("data.x").unwrap()).unwrap();
        assert_eq!(value.as_str(), Some("new"));
    }

    #[test]
    fn reset_overwrites_permitted_leaves_with_placeholder() {
        let provider = KubernetesProvider::new();
        let mut predicate_record = ResourceMutation {
            resource: ResourceInfo { category: provider.default_category(), type_: "ConfigMap".to_string(), name: "web".to_string() },
            resource_mutation: MutationInfo::none(0),
            path_mutation_map: BTreeMap::new(),
            aliases: HashSet::from(["web".to_string()]),
            aliases_without_scopes: HashSet::from(["web".to_string()]),
        };
        predicate_record
            .path_mutation_map
            .insert("data.x".to_string(), MutationInfo { kind: MutationKind::Update, index: 0, predicate: true, value: None });

        let mut target = vec![doc(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: web\ndata:\n  x: secret\n")];
        reset(&mut target, &[predicate_record], &provider).unwrap();
        let value = target[0].get(&Path::parse("data.x").unwrap()).unwrap();
        assert_eq!(value.as_str(), Some(PLACEHOLDER_STRING));
    }
}
