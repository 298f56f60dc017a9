//! Path Algebra (C2): escaping, the unresolved-path expression grammar,
//! and resolution of expression paths against a [`crate::node::Node`]
//! tree into concrete resolved paths plus captured bindings.
//!
//! A `nom`-based grammar (`ignore_path`, `text_field`, `escaped_field`)
//! covers the full expression language: literal, wildcard, associative,
//! and upsert segments, with escaping for `.` and `~` inside keys.

use std::collections::BTreeMap;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::char,
    combinator::{opt, rest},
    sequence::{preceded, terminated},
};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::{Node, NodeData};
use crate::provider::ResourceProvider;

/// One component of a path, in either its unresolved (expression) or
/// resolved (literal/index) form. A [`Path`] is resolved when every
/// segment is `Field` or `Index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    /// A literal map key, already unescaped.
    Field(String),
    /// A literal sequence index.
    Index(usize),
    /// `-`, the sequence-append marker accepted by `set`/`append`.
    Append,
    /// `*`
    Wildcard,
    /// `*?KEY[:NAME]`
    WildcardCapture { key: String, name: Option<String> },
    /// `*@:NAME`
    WildcardKey { name: String },
    /// `?KEY[:NAME]=VALUE`
    Associative {
        key: String,
        name: Option<String>,
        value: String,
    },
    /// `@[VALUE:]NAME`
    MapKeyBind { value: Option<String>, name: String },
    /// Trailing `|SEGMENT`, only meaningful as the final segment.
    Upsert(Box<Segment>),
}

impl Segment {
    pub fn is_expression(&self) -> bool {
        !matches!(self, Segment::Field(_) | Segment::Index(_) | Segment::Append)
    }

    fn render(&self) -> String {
        match self {
            Segment::Field(f) => escape_segment(f),
            Segment::Index(i) => i.to_string(),
            Segment::Append => "-".to_string(),
            Segment::Wildcard => "*".to_string(),
            Segment::WildcardCapture { key, name } => match name {
                Some(n) => format!("*?{key}:{n}"),
                None => format!("*?{key}"),
            },
            Segment::WildcardKey { name } => format!("*@:{name}"),
            Segment::Associative { key, name, value } => match name {
                Some(n) => format!("?{key}:{n}={value}"),
                None => format!("?{key}={value}"),
            },
            Segment::MapKeyBind { value, name } => match value {
                Some(v) => format!("@{v}:{name}"),
                None => format!("@{name}"),
            },
            Segment::Upsert(inner) => format!("|{}", inner.render()),
        }
    }
}

/// A dot-path: either an unresolved expression pattern or a fully
/// resolved literal path, depending on its segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Path(pub Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_resolved(&self) -> bool {
        self.0.iter().all(|s| !s.is_expression())
    }

    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    pub fn joined(&self, segment: Segment) -> Path {
        let mut out = self.clone();
        out.push(segment);
        out
    }

    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Parse the dot-path wire format into segments.
    pub fn parse(input: &str) -> Result<Path, CoreError> {
        let raw_segments = split_unquoted_dots(input).map_err(|e| CoreError::path_invalid(input, e))?;
        let mut out = Vec::with_capacity(raw_segments.len());
        for (i, raw) in raw_segments.iter().enumerate() {
            let is_last = i + 1 == raw_segments.len();
            out.push(parse_segment(raw, is_last)?);
        }
        Ok(Path(out))
    }

    /// Render back to the dot-path wire format. `join(split(p)) == p`
    /// for resolved paths.
    pub fn to_wire(&self) -> String {
        self.0.iter().map(Segment::render).collect::<Vec<_>>().join(".")
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

/// Escape `.` as `~1` and `~` as `~0`.
pub fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '~' => out.push_str("~0"),
            '.' => out.push_str("~1"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse of [`escape_segment`]. Decodes `~0` → `~`, `~1` → `.`.
pub fn unescape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.peek() {
                Some('0') => {
                    out.push('~');
                    chars.next();
                }
                Some('1') => {
                    out.push('.');
                    chars.next();
                }
                _ => out.push('~'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split a dot-path into raw segment strings, respecting `"..."`
/// quoted literal segments (which may contain unescaped dots).
fn split_unquoted_dots(input: &str) -> Result<Vec<String>, String> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '.' if !in_quotes => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    if in_quotes {
        return Err("unterminated quoted segment".to_string());
    }
    segments.push(current);
    Ok(segments)
}

fn parse_segment(raw: &str, is_last: bool) -> Result<Segment, CoreError> {
    if let Some(inner_raw) = raw.strip_prefix('|') {
        if !is_last {
            return Err(CoreError::path_invalid(
                raw,
                "upsert `|` marker is only valid as the final segment",
            ));
        }
        return Ok(Segment::Upsert(Box::new(parse_segment(inner_raw, true)?)));
    }
    if raw == "-" {
        return Ok(Segment::Append);
    }
    if let Ok((_, seg)) = parse_expression_segment(raw) {
        return Ok(seg);
    }
    if raw.starts_with('*') || raw.starts_with('?') || raw == "@" {
        return Err(CoreError::path_invalid(raw, "malformed path expression segment"));
    }
    parse_literal_segment(raw)
}

fn parse_literal_segment(raw: &str) -> Result<Segment, CoreError> {
    if let Some(stripped) = raw.strip_prefix('"') {
        let stripped = stripped
            .strip_suffix('"')
            .ok_or_else(|| CoreError::path_invalid(raw, "unterminated quoted segment"))?;
        return Ok(Segment::Field(unescape_segment(stripped)));
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        let idx: usize = raw.parse().map_err(|_| CoreError::path_invalid(raw, "index too large"))?;
        return Ok(Segment::Index(idx));
    }
    Ok(Segment::Field(unescape_segment(raw)))
}

fn parse_expression_segment(input: &str) -> IResult<&str, Segment> {
    alt((wildcard_capture, wildcard_key, wildcard_plain, associative, map_key_bind)).parse(input)
}

fn wildcard_plain(input: &str) -> IResult<&str, Segment> {
    let (r, _) = char('*')(input)?;
    if !r.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof)));
    }
    Ok((r, Segment::Wildcard))
}

fn wildcard_capture(input: &str) -> IResult<&str, Segment> {
    let (r, _) = tag("*?")(input)?;
    let (r, key) = take_till1(|c| c == ':')(r)?;
    let (r, name) = opt(preceded(char(':'), rest)).parse(r)?;
    Ok((
        r,
        Segment::WildcardCapture {
            key: key.to_string(),
            name: name.map(|n: &str| n.to_string()).filter(|n| !n.is_empty()),
        },
    ))
}

fn wildcard_key(input: &str) -> IResult<&str, Segment> {
    let (r, _) = tag("*@:")(input)?;
    let (r, name) = rest(r)?;
    Ok((r, Segment::WildcardKey { name: name.to_string() }))
}

fn associative(input: &str) -> IResult<&str, Segment> {
    let (r, _) = char('?')(input)?;
    let (r, key) = take_till1(|c| c == ':' || c == '=')(r)?;
    let (r, name) = opt(preceded(char(':'), take_till1(|c| c == '='))).parse(r)?;
    let (r, _) = char('=')(r)?;
    let (r, value) = rest(r)?;
    Ok((
        r,
        Segment::Associative {
            key: key.to_string(),
            name: name.map(|n: &str| n.to_string()),
            value: value.to_string(),
        },
    ))
}

fn map_key_bind(input: &str) -> IResult<&str, Segment> {
    let (r, _) = char('@')(input)?;
    if r.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)));
    }
    let (after, value) = opt(terminated(take_till1(|c| c == ':'), char(':'))).parse(r)?;
    match value {
        Some(v) => Ok((
            "",
            Segment::MapKeyBind {
                value: Some(v.to_string()),
                name: after.to_string(),
            },
        )),
        None => Ok((
            "",
            Segment::MapKeyBind {
                value: None,
                name: r.to_string(),
            },
        )),
    }
}

/// Bindings captured while resolving an expression path: e.g.
/// `cn -> "container-0"` from a `*?name:cn` capture.
pub type Bindings = BTreeMap<String, String>;

struct Frontier<'a> {
    node: &'a Node,
    resolved: Vec<Segment>,
    bindings: Bindings,
    remaining: &'a [Segment],
}

/// Resolve an unresolved path against `root`, yielding every matching
/// resolved path with its captured bindings.
///
/// `constraint`, when present, requires every emitted path to match it
/// segment-for-segment (used when the caller already knows the target
/// resolved path and wants resolution to just confirm bindings).
pub fn resolve(root: &Node, pattern: &Path, constraint: Option<&Path>) -> Vec<(Path, Bindings)> {
    let mut stack: Vec<Frontier> = vec![Frontier {
        node: root,
        resolved: Vec::new(),
        bindings: Bindings::new(),
        remaining: pattern.segments(),
    }];
    let mut out = Vec::new();

    while let Some(frontier) = stack.pop() {
        if frontier.remaining.is_empty() {
            let matches = match constraint {
                Some(c) => c.segments() == frontier.resolved.as_slice(),
                None => true,
            };
            if matches {
                out.push((Path(frontier.resolved), frontier.bindings));
            }
            continue;
        }
        let segment = &frontier.remaining[0];
        let rest = &frontier.remaining[1..];
        match segment {
            Segment::Field(name) => {
                if let Some(child) = map_child(frontier.node, name) {
                    push_literal(&mut stack, &frontier, Segment::Field(name.clone()), child, rest);
                }
            }
            Segment::Index(i) => {
                if let Some(child) = seq_child(frontier.node, *i) {
                    push_literal(&mut stack, &frontier, Segment::Index(*i), child, rest);
                }
            }
            Segment::Append => {}
            Segment::Wildcard => {
                for (seg, child) in enumerate_children(frontier.node) {
                    push_literal(&mut stack, &frontier, seg, child, rest);
                }
            }
            Segment::WildcardCapture { key, name } => {
                if let NodeData::Sequence(items) = &frontier.node.data {
                    for (i, child) in items.iter().enumerate() {
                        let mut bindings = frontier.bindings.clone();
                        if let Some(binding_name) = name {
                            if let Some(v) = scalar_field_as_string(child, key) {
                                bindings.insert(binding_name.clone(), v);
                            }
                        }
                        let mut resolved = frontier.resolved.clone();
                        resolved.push(Segment::Index(i));
                        stack.push(Frontier {
                            node: child,
                            resolved,
                            bindings,
                            remaining: rest,
                        });
                    }
                }
            }
            Segment::WildcardKey { name } => {
                if let NodeData::Mapping(pairs) = &frontier.node.data {
                    for (key_node, child) in pairs.iter() {
                        if let Some(key_str) = key_node.as_str() {
                            let mut bindings = frontier.bindings.clone();
                            bindings.insert(name.clone(), key_str.to_string());
                            let mut resolved = frontier.resolved.clone();
                            resolved.push(Segment::Field(key_str.to_string()));
                            stack.push(Frontier {
                                node: child,
                                resolved,
                                bindings,
                                remaining: rest,
                            });
                        }
                    }
                }
            }
            Segment::Associative { key, name, value } => {
                if let NodeData::Sequence(items) = &frontier.node.data {
                    if let Some((i, child)) = items
                        .iter()
                        .enumerate()
                        .find(|(_, c)| scalar_field_as_string(c, key).as_deref() == Some(value.as_str()))
                    {
                        let mut bindings = frontier.bindings.clone();
                        if let Some(n) = name {
                            bindings.insert(n.clone(), value.clone());
                        }
                        let mut resolved = frontier.resolved.clone();
                        resolved.push(Segment::Index(i));
                        stack.push(Frontier {
                            node: child,
                            resolved,
                            bindings,
                            remaining: rest,
                        });
                    }
                }
            }
            Segment::MapKeyBind { value, name } => {
                let literal = value.clone().unwrap_or_else(|| name.clone());
                if let Some(child) = map_child(frontier.node, &literal) {
                    let mut bindings = frontier.bindings.clone();
                    bindings.insert(name.clone(), literal.clone());
                    let mut resolved = frontier.resolved.clone();
                    resolved.push(Segment::Field(literal));
                    stack.push(Frontier {
                        node: child,
                        resolved,
                        bindings,
                        remaining: rest,
                    });
                }
            }
            Segment::Upsert(inner) => {
                let literal_segment = match inner.as_ref() {
                    Segment::Field(f) => Segment::Field(f.clone()),
                    Segment::Index(i) => Segment::Index(*i),
                    other => other.clone(),
                };
                let existing = match &literal_segment {
                    Segment::Field(f) => map_child(frontier.node, f),
                    Segment::Index(i) => seq_child(frontier.node, *i),
                    _ => None,
                };
                let mut resolved = frontier.resolved.clone();
                resolved.push(literal_segment);
                if let Some(child) = existing {
                    stack.push(Frontier {
                        node: child,
                        resolved,
                        bindings: frontier.bindings.clone(),
                        remaining: rest,
                    });
                } else if rest.is_empty() {
                    let matches = match constraint {
                        Some(c) => c.segments() == resolved.as_slice(),
                        None => true,
                    };
                    if matches {
                        out.push((Path(resolved), frontier.bindings.clone()));
                    }
                }
            }
        }
    }

    out
}

fn push_literal<'a>(
    stack: &mut Vec<Frontier<'a>>,
    frontier: &Frontier<'a>,
    segment: Segment,
    child: &'a Node,
    rest: &'a [Segment],
) {
    let mut resolved = frontier.resolved.clone();
    resolved.push(segment);
    stack.push(Frontier {
        node: child,
        resolved,
        bindings: frontier.bindings.clone(),
        remaining: rest,
    });
}

fn map_child<'a>(node: &'a Node, key: &str) -> Option<&'a Node> {
    match &node.data {
        NodeData::Mapping(pairs) => pairs.iter().find(|(k, _)| k.as_str() == Some(key)).map(|(_, v)| v),
        _ => None,
    }
}

fn seq_child(node: &Node, index: usize) -> Option<&Node> {
    match &node.data {
        NodeData::Sequence(items) => items.get(index),
        _ => None,
    }
}

fn enumerate_children(node: &Node) -> Vec<(Segment, &Node)> {
    match &node.data {
        NodeData::Mapping(pairs) => pairs
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|s| (Segment::Field(s.to_string()), v)))
            .collect(),
        NodeData::Sequence(items) => items.iter().enumerate().map(|(i, v)| (Segment::Index(i), v)).collect(),
        _ => Vec::new(),
    }
}

fn scalar_field_as_string(node: &Node, field: &str) -> Option<String> {
    map_child(node, field).and_then(|n| n.as_str().map(|s| s.to_string()))
}

/// Normalize an unresolved or resolved path into its Path Registry key
/// form: indices and associative/wildcard segments
/// collapse to `*`, unless `preserve_binding` keeps the capturing
/// variants intact.
pub fn normalize_path(path: &Path, preserve_binding: bool) -> Path {
    Path(path.segments().iter().map(|s| normalize_segment(s, preserve_binding)).collect())
}

/// Like [`normalize_path`], but also consults `provider`'s
/// wildcard-prefix cache: a literal segment whose prefix has
/// previously been observed (elsewhere) to behave as a wildcard
/// collapses to `*` too, and any segment that normalizes to a wildcard
/// here is recorded against its prefix for future calls.
pub fn normalize_path_with_provider(path: &Path, preserve_binding: bool, provider: &dyn ResourceProvider) -> Path {
    let mut out = Vec::with_capacity(path.segments().len());
    let mut prefix = String::new();
    for segment in path.segments() {
        let mut normalized = normalize_segment(segment, preserve_binding);
        if !matches!(normalized, Segment::Wildcard) {
            let candidate_prefix = if prefix.is_empty() { "*".to_string() } else { format!("{prefix}.*") };
            if provider.is_known_wildcard_prefix(&candidate_prefix) {
                normalized = Segment::Wildcard;
            }
        }
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(&normalized.render());
        if matches!(normalized, Segment::Wildcard) {
            provider.note_wildcard_prefix(&prefix);
        }
        out.push(normalized);
    }
    Path(out)
}

fn normalize_segment(segment: &Segment, preserve_binding: bool) -> Segment {
    match segment {
        Segment::Field(f) => Segment::Field(f.clone()),
        Segment::Append => Segment::Append,
        Segment::Index(_) | Segment::Associative { .. } | Segment::MapKeyBind { .. } => Segment::Wildcard,
        Segment::Wildcard => Segment::Wildcard,
        Segment::WildcardCapture { key, name } => {
            if preserve_binding {
                Segment::WildcardCapture { key: key.clone(), name: name.clone() }
            } else {
                Segment::Wildcard
            }
        }
        Segment::WildcardKey { name } => {
            if preserve_binding {
                Segment::WildcardKey { name: name.clone() }
            } else {
                Segment::Wildcard
            }
        }
        Segment::Upsert(inner) => Segment::Upsert(Box::new(normalize_segment(inner, preserve_binding))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn escape_round_trips_dots_and_tildes() {
        let raw = "weird~key.with.dots";
        let escaped = escape_segment(raw);
        assert_eq!(unescape_segment(&escaped), raw);
    }

    #[test]
    fn parses_literal_and_index_segments() {
        let p = Path::parse("spec.containers.1.image").unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Field("spec".into()),
                Segment::Field("containers".into()),
                Segment::Index(1),
                Segment::Field("image".into()),
            ]
        );
        assert!(p.is_resolved());
    }

    #[test]
    fn parses_quoted_literal_segment_with_embedded_dot() {
        let p = Path::parse(r#"metadata."a.b.c""#).unwrap();
        assert_eq!(p.segments()[1], Segment::Field("a.b.c".to_string()));
    }

    #[test]
    fn parses_associative_segment() {
        let p = Path::parse("spec.containers.?name=container-two.image").unwrap();
        assert_eq!(
            p.segments()[2],
            Segment::Associative {
                key: "name".into(),
                name: None,
                value: "container-two".into(),
            }
        );
    }

    #[test]
    fn parses_wildcard_capture_segment() {
        let p = Path::parse("spec.containers.*?name:cn.image").unwrap();
        assert_eq!(
            p.segments()[2],
            Segment::WildcardCapture { key: "name".into(), name: Some("cn".into()) }
        );
    }

    #[test]
    fn normalize_collapses_index_and_associative_to_wildcard() {
        let p = Path::parse("spec.containers.1.image").unwrap();
        let n = normalize_path(&p, false);
        assert_eq!(n.to_wire(), "spec.containers.*.image");
    }

    #[test]
    fn normalize_with_provider_collapses_literal_segment_at_known_wildcard_prefix() {
        use crate::provider::KubernetesProvider;

        let provider = KubernetesProvider::new();
        let indexed = Path::parse("spec.containers.1.image").unwrap();
        let n = normalize_path_with_provider(&indexed, false, &provider);
        assert_eq!(n.to_wire(), "spec.containers.*.image");

        // A later path with a literal field at the same structural
        // position collapses to the same wildcard key, since that
        // prefix was already observed to behave as a wildcard.
        let literal = Path::parse("spec.containers.sidecar.image").unwrap();
        let n2 = normalize_path_with_provider(&literal, false, &provider);
        assert_eq!(n2.to_wire(), "spec.containers.*.image");
    }

    #[test]
    fn resolves_associative_lookup_against_tree() {
        let doc = Node::parse_one(
            br#"
spec:
  containers:
    - name: container-one
      image: one:latest
    - name: container-two
      image: two:latest
"#,
        )
        .unwrap();
        let pattern = Path::parse("spec.containers.?name=container-two.image").unwrap();
        let results = resolve(&doc, &pattern, None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.to_wire(), "spec.containers.1.image");
        assert!(results[0].1.is_empty());
    }

    #[test]
    fn resolves_wildcard_capture_against_tree() {
        let doc = Node::parse_one(
            br#"
spec:
  containers:
    - name: container-0
      image: one:latest
    - name: container-1
      image: two:latest
"#,
        )
        .unwrap();
        let pattern = Path::parse("spec.containers.*?name:cn.image").unwrap();
        let mut results = resolve(&doc, &pattern, None);
        results.sort_by(|a, b| a.0.to_wire().cmp(&b.0.to_wire()));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1.get("cn").map(String::as_str), Some("container-0"));
        assert_eq!(results[1].1.get("cn").map(String::as_str), Some("container-1"));
    }
}
