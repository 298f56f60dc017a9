//! Resource Provider (C3): classifies a document as a (Category, Type,
//! Name) triple independent of toolchain, and owns the per-provider
//! path registry and wildcard-prefix cache.
//!
//! Field-pulling closures that extract `apiVersion`/`kind`/
//! `metadata.name`/`metadata.namespace` out of a document generalize
//! into the `ResourceProvider` trait below, with a second concrete
//! implementation for HCL-style toolchains. The (Category, Type, Name)
//! triple is a fixed-shape struct rather than an open map, since every
//! provider here produces exactly three fields.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::Node;
use crate::path::Path;
use crate::registry::PathRegistry;

/// Coarse classification of a resource. Toolchains may add more than
/// the three named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Resource,
    Data,
    Invalid,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Resource => "Resource",
            Category::Data => "Data",
            Category::Invalid => "Invalid",
        };
        write!(f, "{s}")
    }
}

/// The `(Category, Type, Name)` triple attached to a document.
/// `name` may be scoped, e.g. `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub category: Category,
    pub type_: String,
    pub name: String,
}

impl ResourceInfo {
    /// The provider-removed-scope form of `name`.
    pub fn scopeless_name(&self, provider: &dyn ResourceProvider) -> String {
        provider.remove_scope_from_name(&self.name)
    }
}

/// A toolchain-independent capability interface over a document.
/// Implementations are stateless aside from their registry and
/// wildcard-prefix cache, both process-lifetime and guarded.
pub trait ResourceProvider: Send + Sync {
    fn default_category(&self) -> Category;

    /// Classify `doc`'s category. Fails with a user-facing message if
    /// the document lacks the relevant marker.
    fn category_of(&self, doc: &Node) -> Result<Category, CoreError>;

    /// Classify `doc`'s type (e.g. Kubernetes `kind`, HCL block type).
    fn type_of(&self, doc: &Node) -> Result<String, CoreError>;

    /// Extract `doc`'s name.
    fn name_of(&self, doc: &Node) -> Result<String, CoreError>;

    /// Path at which the (possibly scoped) name lives, sans scope.
    fn scopeless_name_path(&self) -> Path;

    fn set_name(&self, doc: &mut Node, name: &str) -> Result<(), CoreError>;

    fn remove_scope_from_name(&self, name: &str) -> String;

    /// Slugify: lowercase, strip accents, replace `_` with the
    /// provider's canonical separator, slug-safe.
    fn normalize_name(&self, s: &str) -> String {
        let sep = self.name_separator();
        s.trim()
            .chars()
            .map(|c| if c == '_' || c.is_whitespace() { sep } else { c.to_ascii_lowercase() })
            .filter(|c| c.is_ascii_alphanumeric() || *c == sep)
            .collect()
    }

    fn name_separator(&self) -> char {
        '-'
    }

    fn type_description(&self) -> &'static str;

    /// Whether two type tags should be treated as the same resource
    /// type for matching purposes.
    fn types_are_similar(&self, a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    /// Per-toolchain location for scoping annotations, or empty string
    /// if not supported by this toolchain.
    fn context_path(&self, field: &str) -> String;

    fn path_registry(&self) -> &PathRegistry;

    /// The toolchain tag exposed to consumers.
    fn data_type(&self) -> &'static str;

    /// Register that `prefix` (a normalized-path prefix) has been
    /// observed as a wildcard, so later path normalizations that share
    /// the prefix collapse to `*` even for literal segments
    ///.
    fn note_wildcard_prefix(&self, prefix: &str);

    /// Whether `prefix` has previously been observed as a wildcard.
    fn is_known_wildcard_prefix(&self, prefix: &str) -> bool;
}

fn get_string(doc: &Node, path_str: &str) -> Option<String> {
    let path = Path::parse(path_str).ok()?;
    doc.get(&path).and_then(Node::as_str).map(str::to_string)
}

/// A shared, thread-safe set of observed wildcard prefixes, reused by
/// both concrete providers below.
struct WildcardPrefixCache(RwLock<HashSet<String>>);

impl WildcardPrefixCache {
    fn new() -> Self {
        WildcardPrefixCache(RwLock::new(HashSet::new()))
    }

    fn note(&self, prefix: &str) {
        self.0.write().expect("wildcard prefix cache poisoned").insert(prefix.to_string());
    }

    fn contains(&self, prefix: &str) -> bool {
        self.0.read().expect("wildcard prefix cache poisoned").contains(prefix)
    }
}

/// Kubernetes/YAML: classification by `apiVersion`/`kind`, name by
/// `metadata.name` (scope: `metadata.namespace`).
pub struct KubernetesProvider {
    registry: PathRegistry,
    wildcard_prefixes: WildcardPrefixCache,
}

impl KubernetesProvider {
    pub fn new() -> Self {
        KubernetesProvider { registry: PathRegistry::new(), wildcard_prefixes: WildcardPrefixCache::new() }
    }
}

impl Default for KubernetesProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProvider for KubernetesProvider {
    fn default_category(&self) -> Category {
        Category::Resource
    }

    fn category_of(&self, doc: &Node) -> Result<Category, CoreError> {
        if get_string(doc, "kind").is_none() {
            return Err(CoreError::Classification { reason: "document has no `kind` field".to_string() });
        }
        Ok(Category::Resource)
    }

    fn type_of(&self, doc: &Node) -> Result<String, CoreError> {
        get_string(doc, "kind").ok_or_else(|| CoreError::Classification { reason: "missing `kind`".to_string() })
    }

    fn name_of(&self, doc: &Node) -> Result<String, CoreError> {
        let name = get_string(doc, "metadata.name")
            .ok_or_else(|| CoreError::Classification { reason: "missing `metadata.name`".to_string() })?;
        match get_string(doc, "metadata.namespace") {
            Some(ns) => Ok(format!("{ns}/{name}")),
            None => Ok(name),
        }
    }

    fn scopeless_name_path(&self) -> Path {
        Path::parse("metadata.name").expect("valid path literal")
    }

    fn set_name(&self, doc: &mut Node, name: &str) -> Result<(), CoreError> {
        doc.set(&self.scopeless_name_path(), Node::string(name))
    }

    fn remove_scope_from_name(&self, name: &str) -> String {
        name.rsplit('/').next().unwrap_or(name).to_string()
    }

    fn type_description(&self) -> &'static str {
        "Kubernetes kind"
    }

    fn context_path(&self, field: &str) -> String {
        format!("metadata.{field}")
    }

    fn path_registry(&self) -> &PathRegistry {
        &self.registry
    }

    fn data_type(&self) -> &'static str {
        "Kubernetes/YAML"
    }

    fn note_wildcard_prefix(&self, prefix: &str) {
        self.wildcard_prefixes.note(prefix);
    }

    fn is_known_wildcard_prefix(&self, prefix: &str) -> bool {
        self.wildcard_prefixes.contains(prefix)
    }
}

/// OpenTofu/HCL-as-YAML: classification by `block_category`/
/// `block_type`, name by `block_name` — flat scalar fields on an
/// already-normalized document, rather than HCL's own
/// `resource "type" "name" {}` block nesting. Only the (category,
/// type, name) shape is shared with `KubernetesProvider`.
pub struct HclProvider {
    registry: PathRegistry,
    wildcard_prefixes: WildcardPrefixCache,
}

impl HclProvider {
    pub fn new() -> Self {
        HclProvider { registry: PathRegistry::new(), wildcard_prefixes: WildcardPrefixCache::new() }
    }
}

impl Default for HclProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProvider for HclProvider {
    fn default_category(&self) -> Category {
        Category::Resource
    }

    fn category_of(&self, doc: &Node) -> Result<Category, CoreError> {
        match get_string(doc, "block_category").as_deref() {
            Some("data") => Ok(Category::Data),
            Some(_) => Ok(Category::Resource),
            None => Err(CoreError::Classification { reason: "missing `block_category`".to_string() }),
        }
    }

    fn type_of(&self, doc: &Node) -> Result<String, CoreError> {
        get_string(doc, "block_type")
            .ok_or_else(|| CoreError::Classification { reason: "missing `block_type`".to_string() })
    }

    fn name_of(&self, doc: &Node) -> Result<String, CoreError> {
        get_string(doc, "block_name")
            .ok_or_else(|| CoreError::Classification { reason: "missing `block_name`".to_string() })
    }

    fn scopeless_name_path(&self) -> Path {
        Path::parse("block_name").expect("valid path literal")
    }

    fn set_name(&self, doc: &mut Node, name: &str) -> Result<(), CoreError> {
        doc.set(&self.scopeless_name_path(), Node::string(name))
    }

    fn remove_scope_from_name(&self, name: &str) -> String {
        name.to_string()
    }

    fn type_description(&self) -> &'static str {
        "HCL block type"
    }

    fn context_path(&self, _field: &str) -> String {
        String::new()
    }

    fn path_registry(&self) -> &PathRegistry {
        &self.registry
    }

    fn data_type(&self) -> &'static str {
        "OpenTofu/HCL"
    }

    fn note_wildcard_prefix(&self, prefix: &str) {
        self.wildcard_prefixes.note(prefix);
    }

    fn is_known_wildcard_prefix(&self, prefix: &str) -> bool {
        self.wildcard_prefixes.contains(prefix)
    }
}

/// Process-lifetime memoization guard used by provider construction
/// paths that want a "build once" story. Kept here rather
/// than on each provider since it has no state of its own beyond a
/// mutex; providers needing it embed a `OnceRegistration` field.
pub struct OnceRegistration(Mutex<bool>);

impl OnceRegistration {
    pub fn new() -> Self {
        OnceRegistration(Mutex::new(false))
    }

    /// Run `f` only the first time this is called; subsequent calls
    /// are no-ops. Never observes a half-registered state because the
    /// mutex is held for the whole registration closure.
    pub fn run_once(&self, f: impl FnOnce()) {
        let mut done = self.0.lock().expect("registration guard poisoned");
        if !*done {
            f();
            *done = true;
        }
    }
}

impl Default for OnceRegistration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubernetes_provider_classifies_and_names_scoped_resource() {
        let doc = Node::parse_one(
            br#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: prod
"#,
        )
        .unwrap();
        let provider = KubernetesProvider::new();
        assert_eq!(provider.type_of(&doc).unwrap(), "Deployment");
        assert_eq!(provider.name_of(&doc).unwrap(), "prod/web");
        assert_eq!(provider.remove_scope_from_name("prod/web"), "web");
    }

    #[test]
    fn kubernetes_provider_reports_classification_error_on_missing_kind() {
        let doc = Node::parse_one(b"apiVersion: v1\n").unwrap();
        let provider = KubernetesProvider::new();
        assert!(provider.type_of(&doc).is_err());
    }

    #[test]
    fn hcl_provider_classifies_data_blocks() {
        let doc = Node::parse_one(
            b"block_category: data\nblock_type: aws_ami\nblock_name: ubuntu\n",
        )
        .unwrap();
        let provider = HclProvider::new();
        assert_eq!(provider.category_of(&doc).unwrap(), Category::Data);
        assert_eq!(provider.name_of(&doc).unwrap(), "ubuntu");
    }

    #[test]
    fn normalize_name_slugifies_with_provider_separator() {
        let provider = KubernetesProvider::new();
        assert_eq!(provider.normalize_name("My_Service Name"), "my-service-name");
    }

    #[test]
    fn wildcard_prefix_cache_remembers_noted_prefixes() {
        let provider = KubernetesProvider::new();
        assert!(!provider.is_known_wildcard_prefix("spec.containers"));
        provider.note_wildcard_prefix("spec.containers");
        assert!(provider.is_known_wildcard_prefix("spec.containers"));
    }
}
