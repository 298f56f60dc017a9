//! Visitor Engine (C6): classify → filter → resolve → fetch →
//! invoke-visitor traversal over multi-document inputs.
//!
//! Classify each document, filter by applicability, act, and continue
//! past a single document's classification failure — the same
//! "classify, filter, act, continue" control flow underlies both the
//! read-shaped and write-shaped traversals below.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::embedded::{RegexAccessor, accessor_for};
use crate::error::CoreError;
use crate::node::Node;
use crate::path::{self, Bindings, Path};
use crate::provider::{ResourceInfo, ResourceProvider};
use crate::registry::{AttributeName, DataType, PathVisitorInfo};

/// `(resource, path, registered metadata)` — the addressing half of a
/// `VisitorContext`.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub resource: ResourceInfo,
    pub path: Path,
    pub visitor_info: PathVisitorInfo,
}

/// Everything a visitor invocation needs: the attribute being visited,
/// any bindings captured while resolving its path pattern, and (when
/// the registered path has one) the cached embedded accessor plus the
/// subpath it should act on.
pub struct VisitorContext {
    pub attribute: AttributeInfo,
    pub bindings: Bindings,
    pub embedded_subpath: Option<String>,
    pub accessor: Option<Arc<RegexAccessor>>,
}

/// A `(resource, path, value)` triple collected by a "get"-shaped
/// traversal, sorted.6 before being returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeValue {
    pub resource: ResourceInfo,
    pub path: Path,
    pub value: Node,
}

fn sort_key(v: &AttributeValue) -> (String, String, String) {
    (v.resource.type_.clone(), v.resource.name.clone(), v.path.to_wire())
}

/// Sort collected attribute values by `(resource type, resource name,
/// path)` lexicographically.
pub fn sort_attribute_values(values: &mut [AttributeValue]) {
    values.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
}

/// Split a registered path's string form on an optional trailing
/// `#embedded-path` suffix.
fn split_embedded_suffix(pattern: &str) -> (&str, Option<&str>) {
    match pattern.split_once('#') {
        Some((path, sub)) => (path, Some(sub)),
        None => (pattern, None),
    }
}

/// Substitute caller-supplied `keys` positionally into a path pattern's
/// `%s` placeholders (the pattern-templating convention used by
/// registered paths whose associative/map-key segments are filled in
/// at call time rather than at registration time).
fn substitute_keys(pattern: &str, keys: &[String]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut key_iter = keys.iter();
    let mut rest = pattern;
    while let Some(idx) = rest.find("%s") {
        out.push_str(&rest[..idx]);
        if let Some(k) = key_iter.next() {
            out.push_str(k);
        }
        rest = &rest[idx + 2..];
    }
    out.push_str(rest);
    out
}

/// The set of registered paths applicable to a document of
/// `resource_type`: the per-type subset plus the `AnyResource` subset,
/// minus any path whose `TypeExceptions` name this type.
pub fn applicable_paths(
    provider: &dyn ResourceProvider,
    attribute_name: &AttributeName,
    resource_type: &str,
) -> Vec<PathVisitorInfo> {
    let registry = provider.path_registry();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for info in registry.paths_for_resource_type(attribute_name, resource_type) {
        let key = info.normalized_path.to_wire();
        if info.type_exceptions.contains(resource_type) {
            continue;
        }
        if seen.insert(key) {
            out.push(info);
        }
    }
    out
}

/// Classify `doc` via `provider`, logging (not propagating) the
/// failure so callers can continue to the next document.
fn classify(provider: &dyn ResourceProvider, doc: &Node) -> Option<ResourceInfo> {
    let category = match provider.category_of(doc) {
        Ok(c) => c,
        Err(e) => {
            debug!("visitor: classification failed: {e}");
            return None;
        }
    };
    let type_ = match provider.type_of(doc) {
        Ok(t) => t,
        Err(e) => {
            debug!("visitor: classification failed: {e}");
            return None;
        }
    };
    let name = match provider.name_of(doc) {
        Ok(n) => n,
        Err(e) => {
            debug!("visitor: classification failed: {e}");
            return None;
        }
    };
    Some(ResourceInfo { category, type_, name })
}

/// Run a get-shaped visitor over every document, collecting one
/// `AttributeValue` per resolved, non-absent path, then sorting the
/// result deterministically.
///
/// `data_type_filter`, when present, restricts output to leaves whose
/// runtime type matches; a mismatch is a typed error for that leaf
/// (logged and skipped, per the "continue on a per-document basis"
/// policy — a single bad leaf never aborts the whole traversal).
/// `needed_values_only` additionally restricts output to leaves that
/// currently hold the placeholder sentinel.
pub fn collect_attribute_values(
    documents: &[Node],
    provider: &dyn ResourceProvider,
    attribute_name: &AttributeName,
    keys: &[String],
    data_type_filter: Option<DataType>,
    needed_values_only: bool,
) -> Vec<AttributeValue> {
    let mut out = Vec::new();
    for doc in documents {
        let Some(resource) = classify(provider, doc) else { continue };
        for info in applicable_paths(provider, attribute_name, &resource.type_) {
            let (path_str, embedded_subpath) = split_embedded_suffix(&info.path.to_wire());
            let templated = substitute_keys(path_str, keys);
            let Ok(pattern) = Path::parse(&templated) else {
                warn!("visitor: unparsable path pattern {templated:?} for attribute {}", attribute_name.as_str());
                continue;
            };
            for (resolved, _bindings) in path::resolve(doc, &pattern, info.resolved_path_constraint.as_ref()) {
                let Some(node) = doc.get(&resolved) else { continue };

                let value = if let Some((accessor_type, config)) = &info.embedded_accessor {
                    let Some(subpath) = embedded_subpath else { continue };
                    let Some(scalar) = node.as_str() else { continue };
                    match accessor_for(accessor_type, config).and_then(|a| a.extract(scalar, subpath)) {
                        Ok(Some(extracted)) => Node::string(extracted),
                        Ok(None) => continue,
                        Err(e) => {
                            debug!("visitor: embedded accessor failed at {}: {e}", resolved.to_wire());
                            continue;
                        }
                    }
                } else {
                    node.clone()
                };

                // Bools have no placeholder sentinel, so they are always
                // admitted regardless of the needed-values-only filter.
                if needed_values_only && value.as_bool().is_none() && !value.is_placeholder() {
                    continue;
                }
                if let Some(filter) = data_type_filter {
                    if !matches_data_type(&value, filter) {
                        continue;
                    }
                }

                out.push(AttributeValue { resource: resource.clone(), path: resolved, value });
            }
        }
    }
    sort_attribute_values(&mut out);
    out
}

fn matches_data_type(value: &Node, data_type: DataType) -> bool {
    match data_type {
        DataType::String => value.as_str().is_some(),
        DataType::Int => value.as_i64().is_some(),
        DataType::Bool => value.as_bool().is_some(),
        DataType::Json => true,
        DataType::None => true,
    }
}

/// Run an update-shaped visitor over every document. `f` receives the
/// fully-built `VisitorContext` plus the current subtree and returns
/// the subtree that should hold afterwards; a `None` return leaves the
/// document unmodified at that path. Writes back via `set_doc` only
/// when the returned value differs from the original (measured by
/// [`Node::value_eq`]), yielding no-op idempotence.
pub fn update_subtrees(
    documents: &mut [Node],
    provider: &dyn ResourceProvider,
    attribute_name: &AttributeName,
    keys: &[String],
    mut f: impl FnMut(&VisitorContext, &Node) -> Option<Node>,
) -> Result<usize, CoreError> {
    let mut updated = 0;
    for doc in documents.iter_mut() {
        let Some(resource) = classify(provider, doc) else { continue };
        let applicable = applicable_paths(provider, attribute_name, &resource.type_);
        for info in applicable {
            let (path_str, embedded_subpath) = split_embedded_suffix(&info.path.to_wire());
            let templated = substitute_keys(path_str, keys);
            let Ok(pattern) = Path::parse(&templated) else { continue };
            let resolutions = path::resolve(doc, &pattern, info.resolved_path_constraint.as_ref());
            for (resolved, bindings) in resolutions {
                let Some(current) = doc.get(&resolved).cloned() else { continue };
                let accessor = match &info.embedded_accessor {
                    Some((accessor_type, config)) => match accessor_for(accessor_type, config) {
                        Ok(a) => Some(a),
                        Err(e) => {
                            debug!("visitor: embedded accessor unavailable at {}: {e}", resolved.to_wire());
                            None
                        }
                    },
                    None => None,
                };
                let ctx = VisitorContext {
                    attribute: AttributeInfo { resource: resource.clone(), path: resolved.clone(), visitor_info: info.clone() },
                    bindings,
                    embedded_subpath: embedded_subpath.map(str::to_string),
                    accessor,
                };
                if let Some(new_value) = f(&ctx, &current) {
                    if !new_value.value_eq(&current) {
                        doc.set_doc(&resolved, new_value)?;
                        updated += 1;
                    }
                }
            }
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::KubernetesProvider;
    use crate::registry::{AttributeDetails, PathVisitorInfo};

    fn register_replicas(provider: &KubernetesProvider) {
        let path = Path::parse("spec.replicas").unwrap();
        let info = PathVisitorInfo {
            normalized_path: path::normalize_path(&path, false),
            path: path.clone(),
            attribute_name: AttributeName::general(),
            data_type: DataType::Int,
            embedded_accessor: None,
            resolved_path_constraint: None,
            type_exceptions: HashSet::new(),
            attribute_details: AttributeDetails::default(),
        };
        provider
            .path_registry()
            .register_paths_by_attribute_name(AttributeName::general(), "Deployment", vec![(path, info)], provider)
            .unwrap();
    }

    #[test]
    fn collects_and_sorts_attribute_values_across_documents() {
        let provider = KubernetesProvider::new();
        register_replicas(&provider);
        let docs = Node::parse_all(
            b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web-b\nspec:\n  replicas: 3\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web-a\nspec:\n  replicas: 1\n",
        )
        .unwrap();
        let values = collect_attribute_values(&docs, &provider, &AttributeName::general(), &[], None, false);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].resource.name, "web-a");
        assert_eq!(values[1].resource.name, "web-b");
    }

    #[test]
    fn needed_values_only_admits_placeholder_leaves() {
        let provider = KubernetesProvider::new();
        register_replicas(&provider);
        let docs = Node::parse_all(b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 999999999\n").unwrap();
        let values = collect_attribute_values(&docs, &provider, &AttributeName::general(), &[], None, true);
        assert_eq!(values.len(), 1);

        let docs2 = Node::parse_all(b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 3\n").unwrap();
        let values2 = collect_attribute_values(&docs2, &provider, &AttributeName::general(), &[], None, true);
        assert!(values2.is_empty());
    }

    #[test]
    fn update_is_idempotent_on_no_op_writes() {
        let provider = KubernetesProvider::new();
        register_replicas(&provider);
        let mut docs = Node::parse_all(b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 3\n").unwrap();
        let updated = update_subtrees(&mut docs, &provider, &AttributeName::general(), &[], |_ctx, current| Some(current.clone())).unwrap();
        assert_eq!(updated, 0);

        let updated2 = update_subtrees(&mut docs, &provider, &AttributeName::general(), &[], |_ctx, _current| Some(Node::int(5))).unwrap();
        assert_eq!(updated2, 1);
        let replicas = docs[0].get(&Path::parse("spec.replicas").unwrap()).unwrap();
        assert_eq!(replicas.as_i64(), Some(5));
    }
}
