//! Embedded Accessor (C4): access into a scalar string's internal
//! substructure via a regex with named capturing groups.
//!
//! A single hardcoded named-group regex generalizes into a registered,
//! memoized accessor keyed by `(type, config)`, so callers can plug in
//! whatever capture pattern their toolchain's scalar format needs
//! without this crate knowing about it ahead of time.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use regex::Regex;

use crate::error::CoreError;
use crate::node::Node;
use crate::path::Path;

/// A subpath into a scalar string's internal structure (one of the
/// regex's named capturing groups).
pub type EmbeddedSubpath = str;

/// An accessor into a scalar's internal structure.
pub trait EmbeddedAccessor: Send + Sync {
    fn exists(&self, doc: &Node, path: &Path, subpath: &EmbeddedSubpath) -> Result<bool, CoreError> {
        Ok(self.get(doc, path, subpath)?.is_some())
    }

    fn extract(&self, scalar: &str, subpath: &EmbeddedSubpath) -> Result<Option<String>, CoreError>;

    fn replace(&self, scalar: &str, value: &str, subpath: &EmbeddedSubpath) -> Result<String, CoreError>;

    fn get(&self, doc: &Node, path: &Path, subpath: &EmbeddedSubpath) -> Result<Option<String>, CoreError> {
        let Some(node) = doc.get(path) else { return Ok(None) };
        let scalar = node
            .as_str()
            .ok_or_else(|| CoreError::TypeMismatch { path: path.to_wire(), expected: "string", found: "non-string".to_string() })?;
        self.extract(scalar, subpath)
    }

    fn set(&self, doc: &mut Node, value: &str, path: &Path, subpath: &EmbeddedSubpath) -> Result<(), CoreError> {
        let node = doc.get(path).ok_or_else(|| CoreError::not_found(path))?;
        let scalar = node
            .as_str()
            .ok_or_else(|| CoreError::TypeMismatch { path: path.to_wire(), expected: "string", found: "non-string".to_string() })?;
        let replaced = self.replace(scalar, value, subpath)?;
        doc.set(path, Node::string(replaced))
    }
}

/// A regex-backed accessor: each named capturing group in the compiled
/// pattern is an available subpath. Only string values are supported;
/// `replace` edits the captured span within the scalar and leaves the
/// rest of it untouched.
pub struct RegexAccessor {
    config: String,
    regex: Regex,
}

impl RegexAccessor {
    pub fn compile(config: &str) -> Result<Self, CoreError> {
        let regex = Regex::new(config).map_err(|e| CoreError::path_invalid(config, e.to_string()))?;
        Ok(RegexAccessor { config: config.to_string(), regex })
    }

    fn group_span(&self, scalar: &str, subpath: &str) -> Option<(usize, usize)> {
        let captures = self.regex.captures(scalar)?;
        let m = captures.name(subpath)?;
        Some((m.start(), m.end()))
    }
}

impl EmbeddedAccessor for RegexAccessor {
    fn extract(&self, scalar: &str, subpath: &EmbeddedSubpath) -> Result<Option<String>, CoreError> {
        Ok(self.group_span(scalar, subpath).map(|(start, end)| scalar[start..end].to_string()))
    }

    fn replace(&self, scalar: &str, value: &str, subpath: &EmbeddedSubpath) -> Result<String, CoreError> {
        let (start, end) = self.group_span(scalar, subpath).ok_or_else(|| {
            CoreError::not_found(&Path::parse(subpath).unwrap_or_else(|_| Path::root()))
        })?;
        let mut out = String::with_capacity(scalar.len() + value.len());
        out.push_str(&scalar[..start]);
        out.push_str(value);
        out.push_str(&scalar[end..]);
        Ok(out)
    }
}

/// Process-lifetime cache of compiled accessors keyed by `(type, config)`.
/// Only the `"regex"` accessor type is registered today; the key
/// includes the type so a future second accessor kind can share the
/// cache without key collisions.
static ACCESSOR_CACHE: OnceLock<Mutex<HashMap<(String, String), std::sync::Arc<RegexAccessor>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<(String, String), std::sync::Arc<RegexAccessor>>> {
    ACCESSOR_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Look up (or compile and cache) the accessor for `(accessor_type, config)`.
/// Only `"regex"` is a recognized accessor type.
pub fn accessor_for(accessor_type: &str, config: &str) -> Result<std::sync::Arc<RegexAccessor>, CoreError> {
    if accessor_type != "regex" {
        return Err(CoreError::Classification { reason: format!("unknown embedded accessor type {accessor_type:?}") });
    }
    let key = (accessor_type.to_string(), config.to_string());
    let mut guard = cache().lock().expect("embedded accessor cache poisoned");
    if let Some(existing) = guard.get(&key) {
        return Ok(existing.clone());
    }
    let compiled = std::sync::Arc::new(RegexAccessor::compile(config)?);
    guard.insert(key, compiled.clone());
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_group_from_scalar() {
        let accessor = RegexAccessor::compile(r"^(?P<type>[^:\(!]+)(?:\((?P<scope>[^\)]+)\))?:\s*(?P<subject>.+)$").unwrap();
        let scalar = "fix(parser): handle trailing comments";
        assert_eq!(accessor.extract(scalar, "type").unwrap().as_deref(), Some("fix"));
        assert_eq!(accessor.extract(scalar, "scope").unwrap().as_deref(), Some("parser"));
        assert_eq!(accessor.extract(scalar, "subject").unwrap().as_deref(), Some("handle trailing comments"));
    }

    #[test]
    fn replace_edits_only_the_captured_span() {
        let accessor = RegexAccessor::compile(r"^(?P<type>[^:\(!]+)(?:\((?P<scope>[^\)]+)\))?:\s*(?P<subject>.+)$").unwrap();
        let scalar = "fix(parser): handle trailing comments";
        let replaced = accessor.replace(scalar, "feat", "type").unwrap();
        assert_eq!(replaced, "feat(parser): handle trailing comments");
    }

    #[test]
    fn accessor_cache_returns_same_instance_for_same_config() {
        let a = accessor_for("regex", r"^(?P<x>\d+)$").unwrap();
        let b = accessor_for("regex", r"^(?P<x>\d+)$").unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_accessor_type_is_rejected() {
        assert!(accessor_for("xpath", "//foo").is_err());
    }
}
