//! Path Registry (C5): per-provider catalog of semantically meaningful
//! paths, `AttributeName → ResourceType → NormalizedPath → PathVisitorInfo`.
//!
//! A nested `BTreeMap` keyed by stable strings gives the registry's
//! three-level lookup a deterministic iteration order, guarded by
//! `std::sync::RwLock` for the read-mostly/never-half-inserted
//! requirement.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use log::warn;

use crate::error::CoreError;
use crate::path::{Path, normalize_path, normalize_path_with_provider};
use crate::provider::ResourceProvider;

/// Wildcard resource-type key: a path registered under `AnyResource`
/// applies to every resource type.
pub const ANY_RESOURCE: &str = "AnyResource";

/// An enumerated-string domain for attribute tags,
/// extensible with arbitrary user tags.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeName(pub String);

impl AttributeName {
    pub const GENERAL: &'static str = "general";
    pub const NEEDED_VALUE: &'static str = "needed-value";
    pub const PROVIDED_VALUE: &'static str = "provided-value";
    pub const RESOURCE_NAME: &'static str = "resource-name";

    pub fn general() -> Self {
        AttributeName(Self::GENERAL.to_string())
    }

    pub fn needed_value() -> Self {
        AttributeName(Self::NEEDED_VALUE.to_string())
    }

    pub fn provided_value() -> Self {
        AttributeName(Self::PROVIDED_VALUE.to_string())
    }

    pub fn resource_name() -> Self {
        AttributeName(Self::RESOURCE_NAME.to_string())
    }

    pub fn tag(s: impl Into<String>) -> Self {
        AttributeName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The data type a path's leaf is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Int,
    Bool,
    Json,
    None,
}

/// A getter or setter invocation record. Structural equality (not
/// identity) decides whether a newly registered invocation is
/// redundant with one already stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
}

/// Getter/setter/description metadata attached to a registered path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeDetails {
    pub getter: Option<Invocation>,
    pub setters: Vec<Invocation>,
    pub description: Option<String>,
    pub generation_template: Option<String>,
}

/// Registered record for a `(resource type, path pattern)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PathVisitorInfo {
    /// The original path as registered, with bindings retained.
    pub path: Path,
    /// The normalized registry key for `path` (C2).
    pub normalized_path: Path,
    pub attribute_name: AttributeName,
    pub data_type: DataType,
    /// `(accessor type, config)`, if this path reads through an
    /// embedded accessor (C4).
    pub embedded_accessor: Option<(String, String)>,
    pub resolved_path_constraint: Option<Path>,
    pub type_exceptions: HashSet<String>,
    pub attribute_details: AttributeDetails,
}

impl PathVisitorInfo {
    /// Fields compared for "structural compatibility" when merging a
    /// re-registration — everything except the function invocations in
    /// `attribute_details`.
    fn compatible_with(&self, other: &PathVisitorInfo) -> bool {
        self.path == other.path
            && self.normalized_path == other.normalized_path
            && self.attribute_name == other.attribute_name
            && self.data_type == other.data_type
            && self.embedded_accessor == other.embedded_accessor
            && self.resolved_path_constraint == other.resolved_path_constraint
            && self.type_exceptions == other.type_exceptions
    }

    fn merge_details(&mut self, incoming: &PathVisitorInfo) {
        match (&self.attribute_details.getter, &incoming.attribute_details.getter) {
            (None, Some(g)) => self.attribute_details.getter = Some(g.clone()),
            (Some(existing), Some(incoming_getter)) if existing != incoming_getter => {
                warn!(
                    "path registry: inconsistent getter for {} ({:?} vs {:?})",
                    self.normalized_path.to_wire(),
                    existing,
                    incoming_getter
                );
            }
            _ => {}
        }
        for setter in &incoming.attribute_details.setters {
            if !self.attribute_details.setters.contains(setter) {
                self.attribute_details.setters.push(setter.clone());
            }
        }
    }
}

type ByPath = BTreeMap<String, PathVisitorInfo>;
type ByType = BTreeMap<String, ByPath>;
type ByAttribute = BTreeMap<AttributeName, ByType>;

/// The per-provider registry, a read-mostly structure
/// guarded by `RwLock`. Writes happen only during registration, which
/// should happen at provider-construction/startup time.
pub struct PathRegistry {
    entries: RwLock<ByAttribute>,
}

impl PathRegistry {
    pub fn new() -> Self {
        PathRegistry { entries: RwLock::new(BTreeMap::new()) }
    }

    /// Register `infos` (each already carrying its unresolved `path`)
    /// under `resource_type` for `attribute_name`. Each entry's
    /// registry key is `normalize_path_with_provider(path, false, provider)`,
    /// which also folds `provider`'s wildcard-prefix cache into the
    /// key so a literal segment at a previously-wildcarded prefix
    /// collapses to `*` like its siblings; the stored record's `path`
    /// field retains the original bindings.
    pub fn register_paths_by_attribute_name(
        &self,
        attribute_name: AttributeName,
        resource_type: &str,
        infos: Vec<(Path, PathVisitorInfo)>,
        provider: &dyn ResourceProvider,
    ) -> Result<(), CoreError> {
        let mut guard = self.entries.write().expect("path registry poisoned");
        let by_type = guard.entry(attribute_name).or_default();
        let by_path = by_type.entry(resource_type.to_string()).or_default();
        for (path, mut info) in infos {
            let normalized = normalize_path_with_provider(&path, false, provider);
            let key = normalized.to_wire();
            info.normalized_path = normalized;
            info.path = path;
            match by_path.get_mut(&key) {
                Some(existing) if existing.compatible_with(&info) => {
                    existing.merge_details(&info);
                }
                Some(existing) => {
                    warn!("path registry: structural mismatch re-registering {key} ({existing:?} vs {info:?})");
                }
                None => {
                    by_path.insert(key, info);
                }
            }
        }
        Ok(())
    }

    /// All `PathVisitorInfo`s registered under `attribute_name`, across
    /// every resource type, used to seed visitor invocations.
    pub fn paths_for_attribute(&self, attribute_name: &AttributeName) -> Vec<PathVisitorInfo> {
        let guard = self.entries.read().expect("path registry poisoned");
        guard
            .get(attribute_name)
            .into_iter()
            .flat_map(|by_type| by_type.values())
            .flat_map(|by_path| by_path.values().cloned())
            .collect()
    }

    /// `PathVisitorInfo`s registered under `attribute_name` that apply
    /// to `resource_type`: the exact-type subset unioned with the
    /// `AnyResource` subset. Unlike `paths_for_attribute`, this does not
    /// leak paths registered only under unrelated resource types.
    pub fn paths_for_resource_type(&self, attribute_name: &AttributeName, resource_type: &str) -> Vec<PathVisitorInfo> {
        let guard = self.entries.read().expect("path registry poisoned");
        let Some(by_type) = guard.get(attribute_name) else { return Vec::new() };
        let exact = by_type.get(resource_type).into_iter().flat_map(|by_path| by_path.values().cloned());
        let any = by_type.get(ANY_RESOURCE).into_iter().flat_map(|by_path| by_path.values().cloned());
        exact.chain(any).collect()
    }

    /// Look up the visitor info for `resource_type` + `unresolved_path`:
    /// normalizes the query path (consulting `provider`'s wildcard-prefix
    /// cache), looks up the exact type, then falls back to
    /// `AnyResource`.
    pub fn visitor_info(
        &self,
        attribute_name: &AttributeName,
        resource_type: &str,
        unresolved_path: &Path,
        provider: &dyn ResourceProvider,
    ) -> Option<PathVisitorInfo> {
        let key = normalize_path_with_provider(unresolved_path, false, provider).to_wire();
        let guard = self.entries.read().expect("path registry poisoned");
        let by_type = guard.get(attribute_name)?;
        if let Some(found) = by_type.get(resource_type).and_then(|by_path| by_path.get(&key)) {
            return Some(found.clone());
        }
        by_type.get(ANY_RESOURCE).and_then(|by_path| by_path.get(&key)).cloned()
    }

    /// Resource types registered under `attribute_name`, collapsed to
    /// a singleton `[AnyResource]` when that wildcard type is present.
    pub fn resource_types_for_attribute(&self, attribute_name: &AttributeName) -> Vec<String> {
        let guard = self.entries.read().expect("path registry poisoned");
        let Some(by_type) = guard.get(attribute_name) else { return Vec::new() };
        if by_type.contains_key(ANY_RESOURCE) {
            return vec![ANY_RESOURCE.to_string()];
        }
        by_type.keys().cloned().collect()
    }
}

impl Default for PathRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::KubernetesProvider;

    fn info(path: &str) -> PathVisitorInfo {
        let p = Path::parse(path).unwrap();
        PathVisitorInfo {
            normalized_path: normalize_path(&p, false),
            path: p,
            attribute_name: AttributeName::general(),
            data_type: DataType::String,
            embedded_accessor: None,
            resolved_path_constraint: None,
            type_exceptions: HashSet::new(),
            attribute_details: AttributeDetails::default(),
        }
    }

    #[test]
    fn registers_and_looks_up_exact_resource_type() {
        let registry = PathRegistry::new();
        let provider = KubernetesProvider::new();
        let path = Path::parse("spec.replicas").unwrap();
        registry
            .register_paths_by_attribute_name(
                AttributeName::general(),
                "Deployment",
                vec![(path.clone(), info("spec.replicas"))],
                &provider,
            )
            .unwrap();
        let found = registry.visitor_info(&AttributeName::general(), "Deployment", &path, &provider);
        assert!(found.is_some());
    }

    #[test]
    fn falls_back_to_any_resource_when_exact_type_absent() {
        let registry = PathRegistry::new();
        let provider = KubernetesProvider::new();
        let path = Path::parse("metadata.labels.app").unwrap();
        registry
            .register_paths_by_attribute_name(
                AttributeName::general(),
                ANY_RESOURCE,
                vec![(path.clone(), info("metadata.labels.app"))],
                &provider,
            )
            .unwrap();
        let found = registry.visitor_info(&AttributeName::general(), "Deployment", &path, &provider);
        assert!(found.is_some());
    }

    #[test]
    fn resource_types_collapse_to_any_resource_when_present() {
        let registry = PathRegistry::new();
        let provider = KubernetesProvider::new();
        let path = Path::parse("a").unwrap();
        registry
            .register_paths_by_attribute_name(AttributeName::general(), "Deployment", vec![(path.clone(), info("a"))], &provider)
            .unwrap();
        registry
            .register_paths_by_attribute_name(AttributeName::general(), ANY_RESOURCE, vec![(path, info("a"))], &provider)
            .unwrap();
        assert_eq!(registry.resource_types_for_attribute(&AttributeName::general()), vec![ANY_RESOURCE.to_string()]);
    }

    #[test]
    fn re_registration_merges_non_conflicting_setters() {
        let registry = PathRegistry::new();
        let provider = KubernetesProvider::new();
        let path = Path::parse("spec.replicas").unwrap();
        let mut first = info("spec.replicas");
        first.attribute_details.setters.push(Invocation { name: "setReplicas".to_string(), args: vec![] });
        registry
            .register_paths_by_attribute_name(AttributeName::general(), "Deployment", vec![(path.clone(), first)], &provider)
            .unwrap();

        let mut second = info("spec.replicas");
        second.attribute_details.setters.push(Invocation { name: "setReplicasViaPatch".to_string(), args: vec![] });
        registry
            .register_paths_by_attribute_name(AttributeName::general(), "Deployment", vec![(path.clone(), second)], &provider)
            .unwrap();

        let found = registry.visitor_info(&AttributeName::general(), "Deployment", &path, &provider).unwrap();
        assert_eq!(found.attribute_details.setters.len(), 2);
    }
}
