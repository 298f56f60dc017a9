//! Document Tree (C1): a comment-preserving YAML node model with
//! path-indexed read/write.
//!
//! Parsing drives a `saphyr::MarkedYamlOwned` tree directly at the
//! boundary (`convert_node`/`convert_document` below), then converts
//! into an owned `Node`/`NodeData` tree of our own so the rest of the
//! crate (path resolution, the registry, the mutation engine) never has to
//! know about `saphyr`'s types.
//!
//! Known simplification (see DESIGN.md): re-serialization normalizes
//! formatting to this module's own 2-space block style rather than
//! reproducing the original byte-for-byte quote style and indentation
//! width. Structure, key order, and comments — the semantically
//! significant parts — are preserved across a no-mutation round-trip;
//! exact source bytes are not guaranteed for flow-style or irregularly
//! indented input.

use std::collections::{BTreeMap, HashSet};

use saphyr::{LoadableYamlNode, MarkedYamlOwned, ScalarOwned, YamlDataOwned};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::path::{Path, Segment};

/// A leaf scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Head (lines above), line (trailing, same line), and foot (lines
/// below, before dedent) comments attached to a node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Comments {
    pub head: Vec<String>,
    pub line: Option<String>,
    pub foot: Vec<String>,
}

/// The shape of a document node's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeData {
    Scalar(Scalar),
    /// Ordered `(key, value)` pairs; order is significant and preserved
    /// across round-trips.
    Mapping(Vec<(Node, Node)>),
    Sequence(Vec<Node>),
    /// A comment-only or otherwise semantically empty document.
    Empty,
}

/// A single YAML document node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub data: NodeData,
    pub tag: Option<String>,
    pub comments: Comments,
}

/// An ordered sequence of document nodes. Position is
/// significant; resource ordering is preserved across round-trips.
pub type Container = Vec<Node>;

/// Types a scalar leaf can be read into via [`Node::get_typed`].
pub trait FromNode: Sized {
    fn from_node(node: &Node, path: &Path) -> Result<Self, CoreError>;
}

impl FromNode for String {
    fn from_node(node: &Node, path: &Path) -> Result<Self, CoreError> {
        node.as_str().map(str::to_string).ok_or_else(|| CoreError::TypeMismatch {
            path: path.to_wire(),
            expected: "string",
            found: node.type_name().to_string(),
        })
    }
}

impl FromNode for i64 {
    fn from_node(node: &Node, path: &Path) -> Result<Self, CoreError> {
        node.as_i64().ok_or_else(|| CoreError::TypeMismatch {
            path: path.to_wire(),
            expected: "int",
            found: node.type_name().to_string(),
        })
    }
}

impl FromNode for bool {
    fn from_node(node: &Node, path: &Path) -> Result<Self, CoreError> {
        node.as_bool().ok_or_else(|| CoreError::TypeMismatch {
            path: path.to_wire(),
            expected: "bool",
            found: node.type_name().to_string(),
        })
    }
}

impl FromNode for f64 {
    fn from_node(node: &Node, path: &Path) -> Result<Self, CoreError> {
        node.as_f64().ok_or_else(|| CoreError::TypeMismatch {
            path: path.to_wire(),
            expected: "float",
            found: node.type_name().to_string(),
        })
    }
}

/// Placeholder sentinel for a reset string value.
pub const PLACEHOLDER_STRING: &str = "replaceme";
/// Placeholder sentinel for a reset integer value.
pub const PLACEHOLDER_INT: i64 = 999_999_999;

impl Node {
    pub fn empty() -> Node {
        Node { data: NodeData::Empty, tag: None, comments: Comments::default() }
    }

    pub fn null() -> Node {
        Node { data: NodeData::Scalar(Scalar::Null), tag: None, comments: Comments::default() }
    }

    pub fn string(s: impl Into<String>) -> Node {
        Node { data: NodeData::Scalar(Scalar::String(s.into())), tag: None, comments: Comments::default() }
    }

    pub fn int(i: i64) -> Node {
        Node { data: NodeData::Scalar(Scalar::Int(i)), tag: None, comments: Comments::default() }
    }

    pub fn boolean(b: bool) -> Node {
        Node { data: NodeData::Scalar(Scalar::Bool(b)), tag: None, comments: Comments::default() }
    }

    pub fn float(f: f64) -> Node {
        Node { data: NodeData::Scalar(Scalar::Float(f)), tag: None, comments: Comments::default() }
    }

    pub fn mapping(pairs: Vec<(Node, Node)>) -> Node {
        Node { data: NodeData::Mapping(pairs), tag: None, comments: Comments::default() }
    }

    pub fn sequence(items: Vec<Node>) -> Node {
        Node { data: NodeData::Sequence(items), tag: None, comments: Comments::default() }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            NodeData::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.data {
            NodeData::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.data {
            NodeData::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.data {
            NodeData::Scalar(Scalar::Float(f)) => Some(*f),
            NodeData::Scalar(Scalar::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.as_str() == Some(PLACEHOLDER_STRING) || self.as_i64() == Some(PLACEHOLDER_INT)
    }

    fn type_name(&self) -> &'static str {
        match &self.data {
            NodeData::Scalar(Scalar::Null) => "null",
            NodeData::Scalar(Scalar::Bool(_)) => "bool",
            NodeData::Scalar(Scalar::Int(_)) => "int",
            NodeData::Scalar(Scalar::Float(_)) => "float",
            NodeData::Scalar(Scalar::String(_)) => "string",
            NodeData::Mapping(_) => "mapping",
            NodeData::Sequence(_) => "sequence",
            NodeData::Empty => "empty",
        }
    }

    /// Semantic equality ignoring comments — used by the visitor engine
    /// to decide whether an update-variant visitor actually changed
    /// anything.
    pub fn value_eq(&self, other: &Node) -> bool {
        match (&self.data, &other.data) {
            (NodeData::Scalar(a), NodeData::Scalar(b)) => a == b,
            (NodeData::Mapping(a), NodeData::Mapping(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ak, av), (bk, bv))| ak.as_str() == bk.as_str() && av.value_eq(bv))
            }
            (NodeData::Sequence(a), NodeData::Sequence(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.value_eq(y))
            }
            (NodeData::Empty, NodeData::Empty) => true,
            _ => false,
        }
    }

    /// Parse a single document. A pure-comment (or otherwise
    /// content-free) input produces an `Empty` node carrying the
    /// comment block.
    pub fn parse_one(bytes: &[u8]) -> Result<Node, CoreError> {
        let content = normalize_source(bytes)?;
        let docs = MarkedYamlOwned::load_from_str(&content).map_err(|e| CoreError::Parse(e.to_string()))?;
        let Some(first) = docs.into_iter().next() else {
            return Err(CoreError::Parse("empty input".to_string()));
        };
        let lines: Vec<&str> = content.lines().collect();
        let mut claimed = HashSet::new();
        Ok(convert_document(&first, &lines, 0, &mut claimed))
    }

    /// Split a multi-document stream and parse each chunk. Chunks that
    /// parse to an `Empty` document are excluded from the returned
    /// container.
    pub fn parse_all(bytes: &[u8]) -> Result<Container, CoreError> {
        let content = normalize_source(bytes)?;
        let docs = MarkedYamlOwned::load_from_str(&content).map_err(|e| CoreError::Parse(e.to_string()))?;

        // A document separator is a line that is exactly "---", not just
        // any occurrence of the substring (which would also match inside
        // a scalar or comment). The separator line itself belongs to
        // neither document.
        let mut raw_chunks: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in content.lines() {
            if line == "---" {
                raw_chunks.push(std::mem::take(&mut current));
            } else {
                current.push(line);
            }
        }
        raw_chunks.push(current);

        let mut container = Vec::new();
        let mut doc_iter = docs.iter();
        let mut line_offset = 0usize;
        for lines in raw_chunks {
            let chunk_line_count = lines.len() + 1;
            if lines.iter().all(|l| l.trim().is_empty()) {
                line_offset += chunk_line_count;
                continue;
            }
            let Some(doc) = doc_iter.next() else { break };
            let mut claimed = HashSet::new();
            let node = convert_document(doc, &lines, line_offset, &mut claimed);
            if !matches!(node.data, NodeData::Empty) {
                container.push(node);
            }
            line_offset += chunk_line_count;
        }
        Ok(container)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    pub fn get(&self, path: &Path) -> Option<&Node> {
        let mut cur = self;
        for seg in path.segments() {
            cur = match (seg, &cur.data) {
                (Segment::Field(f), NodeData::Mapping(pairs)) => {
                    pairs.iter().find(|(k, _)| k.as_str() == Some(f.as_str())).map(|(_, v)| v)?
                }
                (Segment::Index(i), NodeData::Sequence(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn get_typed<T: FromNode>(&self, path: &Path, not_found_ok: bool) -> Result<Option<T>, CoreError> {
        match self.get(path) {
            Some(node) => T::from_node(node, path).map(Some),
            None if not_found_ok => Ok(None),
            None => Err(CoreError::not_found(path)),
        }
    }

    pub fn set(&mut self, path: &Path, value: Node) -> Result<(), CoreError> {
        self.set_at(path.segments(), value, path)
    }

    pub fn set_doc(&mut self, path: &Path, subtree: Node) -> Result<(), CoreError> {
        self.set(path, subtree)
    }

    fn set_at(&mut self, segments: &[Segment], value: Node, full_path: &Path) -> Result<(), CoreError> {
        let Some((seg, rest)) = segments.split_first() else {
            *self = value;
            return Ok(());
        };
        match seg {
            Segment::Field(f) => {
                if matches!(self.data, NodeData::Empty) {
                    self.data = NodeData::Mapping(Vec::new());
                }
                let NodeData::Mapping(pairs) = &mut self.data else {
                    return Err(CoreError::collision(full_path));
                };
                if let Some((_, child)) = pairs.iter_mut().find(|(k, _)| k.as_str() == Some(f.as_str())) {
                    child.set_at(rest, value, full_path)
                } else if rest.is_empty() {
                    pairs.push((Node::string(f.clone()), value));
                    Ok(())
                } else {
                    let mut child = Node::empty();
                    child.set_at(rest, value, full_path)?;
                    pairs.push((Node::string(f.clone()), child));
                    Ok(())
                }
            }
            Segment::Index(i) => {
                let NodeData::Sequence(items) = &mut self.data else {
                    return Err(CoreError::collision(full_path));
                };
                let len = items.len();
                let item = items
                    .get_mut(*i)
                    .ok_or_else(|| CoreError::BoundsOrIndex { path: full_path.to_wire(), index: *i as i64, len })?;
                item.set_at(rest, value, full_path)
            }
            Segment::Append => {
                let NodeData::Sequence(items) = &mut self.data else {
                    return Err(CoreError::collision(full_path));
                };
                if rest.is_empty() {
                    items.push(value);
                    Ok(())
                } else {
                    let mut child = Node::empty();
                    child.set_at(rest, value, full_path)?;
                    items.push(child);
                    Ok(())
                }
            }
            other => Err(CoreError::path_invalid(full_path.to_wire(), format!("{other:?} is not valid in a resolved path"))),
        }
    }

    fn get_mut_by_segments(&mut self, segments: &[Segment], full_path: &Path) -> Result<&mut Node, CoreError> {
        let mut cur = self;
        for seg in segments {
            cur = match (seg, &mut cur.data) {
                (Segment::Field(f), NodeData::Mapping(pairs)) => {
                    &mut pairs
                        .iter_mut()
                        .find(|(k, _)| k.as_str() == Some(f.as_str()))
                        .ok_or_else(|| CoreError::not_found(full_path))?
                        .1
                }
                (Segment::Index(i), NodeData::Sequence(items)) => {
                    let len = items.len();
                    items
                        .get_mut(*i)
                        .ok_or_else(|| CoreError::BoundsOrIndex { path: full_path.to_wire(), index: *i as i64, len })?
                }
                _ => return Err(CoreError::collision(full_path)),
            };
        }
        Ok(cur)
    }

    pub fn delete(&mut self, path: &Path) -> Result<(), CoreError> {
        let Some((last, init)) = path.segments().split_last() else {
            return Err(CoreError::path_invalid(path.to_wire(), "cannot delete root"));
        };
        let parent = self.get_mut_by_segments(init, path)?;
        match (last, &mut parent.data) {
            (Segment::Field(f), NodeData::Mapping(pairs)) => {
                let idx = pairs
                    .iter()
                    .position(|(k, _)| k.as_str() == Some(f.as_str()))
                    .ok_or_else(|| CoreError::not_found(path))?;
                pairs.remove(idx);
                Ok(())
            }
            (Segment::Index(i), NodeData::Sequence(items)) => {
                if *i >= items.len() {
                    return Err(CoreError::BoundsOrIndex { path: path.to_wire(), index: *i as i64, len: items.len() });
                }
                items.remove(*i);
                Ok(())
            }
            _ => Err(CoreError::collision(path)),
        }
    }

    pub fn children(&self) -> Option<Vec<&Node>> {
        match &self.data {
            NodeData::Sequence(items) => Some(items.iter().collect()),
            _ => None,
        }
    }

    pub fn children_map(&self) -> Option<Vec<(&Node, &Node)>> {
        match &self.data {
            NodeData::Mapping(pairs) => Some(pairs.iter().map(|(k, v)| (k, v)).collect()),
            _ => None,
        }
    }

    pub fn append(&mut self, path: &Path, v: Node) -> Result<(), CoreError> {
        let target = self.get_mut_by_segments(path.segments(), path)?;
        let NodeData::Sequence(items) = &mut target.data else {
            return Err(CoreError::collision(path));
        };
        items.push(v);
        Ok(())
    }

    pub fn insert(&mut self, path: &Path, index: usize, v: Node) -> Result<(), CoreError> {
        let target = self.get_mut_by_segments(path.segments(), path)?;
        let NodeData::Sequence(items) = &mut target.data else {
            return Err(CoreError::collision(path));
        };
        if index > items.len() {
            return Err(CoreError::BoundsOrIndex { path: path.to_wire(), index: index as i64, len: items.len() });
        }
        items.insert(index, v);
        Ok(())
    }

    pub fn concat(&mut self, path: &Path, v: Node) -> Result<(), CoreError> {
        let target = self.get_mut_by_segments(path.segments(), path)?;
        let NodeData::Sequence(items) = &mut target.data else {
            return Err(CoreError::collision(path));
        };
        match v.data {
            NodeData::Sequence(more) => items.extend(more),
            other => items.push(Node { data: other, tag: v.tag, comments: v.comments }),
        }
        Ok(())
    }

    pub fn merge(&mut self, src: &Node) {
        self.merge_with(src, &default_scalar_merge);
    }

    pub fn merge_with(&mut self, src: &Node, resolve_scalar_collision: &dyn Fn(&Node, &Node) -> Node) {
        match (&mut self.data, &src.data) {
            (NodeData::Mapping(dst_pairs), NodeData::Mapping(src_pairs)) => {
                for (k, v) in src_pairs {
                    if let Some((_, existing)) = dst_pairs.iter_mut().find(|(dk, _)| dk.as_str() == k.as_str()) {
                        existing.merge_with(v, resolve_scalar_collision);
                    } else {
                        dst_pairs.push((k.clone(), v.clone()));
                    }
                }
            }
            (NodeData::Sequence(dst_items), NodeData::Sequence(src_items)) => {
                dst_items.extend(src_items.iter().cloned());
            }
            (NodeData::Scalar(_), NodeData::Scalar(_)) => {
                *self = resolve_scalar_collision(self, src);
            }
            (NodeData::Empty, _) => {
                *self = src.clone();
            }
            _ => {
                *self = src.clone();
            }
        }
    }

    pub fn flatten(&self) -> BTreeMap<String, Node> {
        let mut out = BTreeMap::new();
        self.flatten_into(Path::root(), &mut out, false);
        out
    }

    pub fn flatten_include_empty(&self) -> BTreeMap<String, Node> {
        let mut out = BTreeMap::new();
        self.flatten_into(Path::root(), &mut out, true);
        out
    }

    fn flatten_into(&self, prefix: Path, out: &mut BTreeMap<String, Node>, include_empty: bool) {
        match &self.data {
            NodeData::Scalar(_) => {
                out.insert(prefix.to_wire(), self.clone());
            }
            NodeData::Mapping(pairs) => {
                if pairs.is_empty() && include_empty {
                    out.insert(prefix.to_wire(), self.clone());
                }
                for (k, v) in pairs {
                    if let Some(key) = k.as_str() {
                        v.flatten_into(prefix.joined(Segment::Field(key.to_string())), out, include_empty);
                    }
                }
            }
            NodeData::Sequence(items) => {
                if items.is_empty() && include_empty {
                    out.insert(prefix.to_wire(), self.clone());
                }
                for (i, item) in items.iter().enumerate() {
                    item.flatten_into(prefix.joined(Segment::Index(i)), out, include_empty);
                }
            }
            NodeData::Empty => {
                if include_empty {
                    out.insert(prefix.to_wire(), self.clone());
                }
            }
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CoreError> {
        self.serialize_indent(2)
    }

    pub fn serialize_indent(&self, indent: usize) -> Result<Vec<u8>, CoreError> {
        let mut out = String::new();
        render_node(self, indent, 0, &mut out);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

fn default_scalar_merge(a: &Node, b: &Node) -> Node {
    Node::sequence(vec![a.clone(), b.clone()])
}

/// Serialize a container, skipping empty documents, joined with
/// `---\n` separators.
pub fn serialize_container(container: &[Node]) -> Result<Vec<u8>, CoreError> {
    let mut out = String::new();
    let mut first = true;
    for doc in container {
        if matches!(doc.data, NodeData::Empty) {
            continue;
        }
        if !first {
            out.push_str("---\n");
        }
        first = false;
        let bytes = doc.serialize()?;
        out.push_str(&String::from_utf8_lossy(&bytes));
    }
    Ok(out.into_bytes())
}

fn normalize_source(bytes: &[u8]) -> Result<String, CoreError> {
    let s = std::str::from_utf8(bytes).map_err(|e| CoreError::Parse(e.to_string()))?;
    Ok(s.replace("\r\n", "\n").trim_matches('\n').to_string())
}

fn scalar_node(s: Scalar) -> Node {
    Node { data: NodeData::Scalar(s), tag: None, comments: Comments::default() }
}

fn convert_document(y: &MarkedYamlOwned, lines: &[&str], offset: usize, claimed: &mut HashSet<usize>) -> Node {
    let has_content = lines.iter().any(|l| {
        let t = l.trim();
        !t.is_empty() && !t.starts_with('#')
    });
    if !has_content {
        let head = lines
            .iter()
            .filter_map(|l| {
                let t = l.trim();
                t.strip_prefix('#').map(|c| c.trim_start().to_string())
            })
            .collect();
        return Node { data: NodeData::Empty, tag: None, comments: Comments { head, line: None, foot: Vec::new() } };
    }

    let mut node = convert_node(y, lines, offset, claimed);

    if let Some(first_idx) = lines.iter().position(|l| {
        let t = l.trim();
        !t.is_empty() && !t.starts_with('#')
    }) {
        let head = head_comments_before(lines, first_idx + 1, claimed);
        if node.comments.head.is_empty() {
            node.comments.head = head;
        }
    }

    let mut foot = Vec::new();
    for (idx, line) in lines.iter().enumerate().rev() {
        if claimed.contains(&idx) {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.strip_prefix('#') {
            Some(text) => {
                foot.push(text.trim_start().to_string());
                claimed.insert(idx);
            }
            None => break,
        }
    }
    foot.reverse();
    node.comments.foot = foot;
    node
}

fn convert_node(y: &MarkedYamlOwned, lines: &[&str], offset: usize, claimed: &mut HashSet<usize>) -> Node {
    match &y.data {
        YamlDataOwned::Value(ScalarOwned::Null) => scalar_node(Scalar::Null),
        YamlDataOwned::Value(ScalarOwned::Boolean(b)) => scalar_node(Scalar::Bool(*b)),
        YamlDataOwned::Value(ScalarOwned::Integer(i)) => scalar_node(Scalar::Int(*i)),
        YamlDataOwned::Value(ScalarOwned::FloatingPoint(fp)) => scalar_node(Scalar::Float(*fp)),
        YamlDataOwned::Value(ScalarOwned::String(s)) => scalar_node(Scalar::String(s.clone())),
        YamlDataOwned::Representation(s, _, _) => scalar_node(Scalar::String(s.to_string())),
        YamlDataOwned::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let item_line = item.span.start.line().saturating_sub(offset);
                let head = head_comments_before(lines, item_line, claimed);
                let mut node = convert_node(item, lines, offset, claimed);
                node.comments.head = head;
                if matches!(node.data, NodeData::Scalar(_)) {
                    node.comments.line = trailing_comment(lines, item.span.end.line().saturating_sub(offset));
                }
                out.push(node);
            }
            Node { data: NodeData::Sequence(out), tag: None, comments: Comments::default() }
        }
        YamlDataOwned::Mapping(pairs) => {
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in pairs.iter() {
                let key_line = k.span.start.line().saturating_sub(offset);
                let head = head_comments_before(lines, key_line, claimed);
                let mut key_node = convert_node(k, lines, offset, claimed);
                key_node.comments.head = head;
                let mut value_node = convert_node(v, lines, offset, claimed);
                if matches!(value_node.data, NodeData::Scalar(_)) {
                    value_node.comments.line = trailing_comment(lines, v.span.end.line().saturating_sub(offset));
                }
                out.push((key_node, value_node));
            }
            Node { data: NodeData::Mapping(out), tag: None, comments: Comments::default() }
        }
        YamlDataOwned::Tagged(_tag, inner) => convert_node(inner, lines, offset, claimed),
        YamlDataOwned::Alias(_) | YamlDataOwned::BadValue => scalar_node(Scalar::Null),
    }
}

/// Collect contiguous `#`-led comment lines directly above
/// `target_line_1indexed`, consuming them from `claimed` so a later
/// sibling doesn't re-attach the same lines as its own head comment.
fn head_comments_before(lines: &[&str], target_line_1indexed: usize, claimed: &mut HashSet<usize>) -> Vec<String> {
    if target_line_1indexed < 2 {
        return Vec::new();
    }
    let mut collected = Vec::new();
    let mut idx = target_line_1indexed - 2;
    loop {
        if claimed.contains(&idx) {
            break;
        }
        let Some(line) = lines.get(idx) else { break };
        let trimmed = line.trim();
        match trimmed.strip_prefix('#') {
            Some(text) => {
                collected.push(text.trim_start().to_string());
                claimed.insert(idx);
                if idx == 0 {
                    break;
                }
                idx -= 1;
            }
            None => break,
        }
    }
    collected.reverse();
    collected
}

/// A same-line trailing `# comment`, honoring simple quoting so a `#`
/// inside a quoted scalar is not mistaken for a comment marker.
fn trailing_comment(lines: &[&str], line_1indexed: usize) -> Option<String> {
    let idx = line_1indexed.checked_sub(1)?;
    let line = lines.get(idx)?;
    let bytes = line.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    for (i, ch) in line.char_indices() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => {
                let preceded_by_space = i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t';
                if preceded_by_space {
                    return Some(line[i + 1..].trim().to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn indent_str(width: usize, depth: usize) -> String {
    " ".repeat(width * depth)
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || matches!(s, "true" | "false" | "null" | "~")
        || s.parse::<i64>().is_ok()
        || s.parse::<f64>().is_ok()
        || s.contains(": ")
        || s.contains('#')
        || s.starts_with(['-', '*', '&', '!', '|', '>', '%', '@', '`', '"', '\''])
        || s.starts_with(' ')
        || s.ends_with(' ')
}

fn yaml_scalar_string(s: &str) -> String {
    if needs_quoting(s) {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

fn render_scalar(s: &Scalar) -> String {
    match s {
        Scalar::Null => "null".to_string(),
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::String(s) => yaml_scalar_string(s),
    }
}

fn render_key_node(key: &Node) -> String {
    match &key.data {
        NodeData::Scalar(s) => render_scalar(s),
        _ => String::new(),
    }
}

fn render_value_after_colon(value: &Node, width: usize, depth: usize, out: &mut String) {
    match &value.data {
        NodeData::Scalar(s) => {
            out.push(' ');
            out.push_str(&render_scalar(s));
            if let Some(c) = &value.comments.line {
                out.push_str(" # ");
                out.push_str(c);
            }
            out.push('\n');
        }
        NodeData::Empty => out.push_str(" null\n"),
        NodeData::Mapping(pairs) if pairs.is_empty() => out.push_str(" {}\n"),
        NodeData::Sequence(items) if items.is_empty() => out.push_str(" []\n"),
        NodeData::Mapping(_) | NodeData::Sequence(_) => {
            out.push('\n');
            render_node(value, width, depth, out);
        }
    }
}

fn render_mapping_entry(key: &Node, value: &Node, width: usize, depth: usize, out: &mut String) {
    for line in &key.comments.head {
        out.push_str(&indent_str(width, depth));
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&indent_str(width, depth));
    out.push_str(&render_key_node(key));
    out.push(':');
    render_value_after_colon(value, width, depth + 1, out);
}

fn render_sequence_item(item: &Node, width: usize, depth: usize, out: &mut String) {
    for line in &item.comments.head {
        out.push_str(&indent_str(width, depth));
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&indent_str(width, depth));
    out.push('-');
    match &item.data {
        NodeData::Scalar(s) => {
            out.push(' ');
            out.push_str(&render_scalar(s));
            if let Some(c) = &item.comments.line {
                out.push_str(" # ");
                out.push_str(c);
            }
            out.push('\n');
        }
        NodeData::Empty => out.push_str(" null\n"),
        NodeData::Mapping(pairs) if pairs.is_empty() => out.push_str(" {}\n"),
        NodeData::Sequence(items) if items.is_empty() => out.push_str(" []\n"),
        NodeData::Mapping(_) | NodeData::Sequence(_) => {
            out.push('\n');
            render_node(item, width, depth + 1, out);
        }
    }
}

fn render_node(node: &Node, width: usize, depth: usize, out: &mut String) {
    for line in &node.comments.head {
        out.push_str(&indent_str(width, depth));
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
    match &node.data {
        NodeData::Empty => {}
        NodeData::Scalar(s) => {
            out.push_str(&indent_str(width, depth));
            out.push_str(&render_scalar(s));
            if let Some(c) = &node.comments.line {
                out.push_str(" # ");
                out.push_str(c);
            }
            out.push('\n');
        }
        NodeData::Mapping(pairs) => {
            if pairs.is_empty() {
                out.push_str(&indent_str(width, depth));
                out.push_str("{}\n");
            } else {
                for (k, v) in pairs {
                    render_mapping_entry(k, v, width, depth, out);
                }
            }
        }
        NodeData::Sequence(items) => {
            if items.is_empty() {
                out.push_str(&indent_str(width, depth));
                out.push_str("[]\n");
            } else {
                for item in items {
                    render_sequence_item(item, width, depth, out);
                }
            }
        }
    }
    for line in &node.comments.foot {
        out.push_str(&indent_str(width, depth));
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_and_navigates_nested_mapping() {
        let doc = Node::parse_one(
            br#"
spec:
  replicas: 3
  containers:
    - name: app
      image: app:latest
"#,
        )
        .unwrap();
        let path = Path::parse("spec.replicas").unwrap();
        assert_eq!(doc.get_typed::<i64>(&path, false).unwrap(), Some(3));
        let image_path = Path::parse("spec.containers.0.image").unwrap();
        assert_eq!(doc.get(&image_path).and_then(Node::as_str), Some("app:latest"));
    }

    #[test]
    fn set_auto_vivifies_missing_mapping_segments() {
        let mut doc = Node::mapping(vec![]);
        let path = Path::parse("metadata.labels.app").unwrap();
        doc.set(&path, Node::string("nginx")).unwrap();
        assert_eq!(doc.get(&path).and_then(Node::as_str), Some("nginx"));
    }

    #[test]
    fn delete_removes_by_key_and_index() {
        let mut doc = Node::parse_one(b"a:\n  b: 1\n  c: 2\n").unwrap();
        doc.delete(&Path::parse("a.b").unwrap()).unwrap();
        assert!(!doc.exists(&Path::parse("a.b").unwrap()));
        assert!(doc.exists(&Path::parse("a.c").unwrap()));

        let mut seq_doc = Node::parse_one(b"items:\n  - 1\n  - 2\n  - 3\n").unwrap();
        seq_doc.delete(&Path::parse("items.1").unwrap()).unwrap();
        let remaining = seq_doc.get(&Path::parse("items").unwrap()).unwrap().children().unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn flatten_produces_dot_path_scalar_map() {
        let doc = Node::parse_one(b"a:\n  b: 1\n  c: two\n").unwrap();
        let flat = doc.flatten();
        assert_eq!(flat.get("a.b").and_then(Node::as_i64), Some(1));
        assert_eq!(flat.get("a.c").and_then(Node::as_str), Some("two"));
    }

    #[test]
    fn merge_default_resolves_scalar_collision_as_pair() {
        let mut a = Node::mapping(vec![(Node::string("x"), Node::int(1))]);
        let b = Node::mapping(vec![(Node::string("x"), Node::int(2))]);
        a.merge(&b);
        let merged = a.get(&Path::parse("x").unwrap()).unwrap();
        assert_eq!(merged.children().map(|c| c.len()), Some(2));
    }

    #[test]
    fn pure_comment_input_produces_empty_doc_with_comments() {
        let doc = Node::parse_one(b"# just a comment\n# and another\n").unwrap();
        assert!(matches!(doc.data, NodeData::Empty));
        assert_eq!(doc.comments.head, vec!["just a comment".to_string(), "and another".to_string()]);
    }

    #[test]
    fn parse_all_splits_multidoc_stream_and_drops_empty_chunks() {
        let docs = Node::parse_all(b"a: 1\n---\n# nothing here\n---\nb: 2\n").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].get(&Path::parse("a").unwrap()).and_then(Node::as_i64), Some(1));
        assert_eq!(docs[1].get(&Path::parse("b").unwrap()).and_then(Node::as_i64), Some(2));
    }

    #[test]
    fn no_mutation_round_trip_is_semantically_equal() {
        let original = Node::parse_one(b"a:\n  b: 1\n  c: two\n").unwrap();
        let bytes = original.serialize().unwrap();
        let reparsed = Node::parse_one(&bytes).unwrap();
        assert!(original.value_eq(&reparsed));
    }

    #[test]
    fn head_and_line_comments_survive_a_round_trip() {
        let doc = Node::parse_one(
            br#"
# head comment
name: value # line comment
"#,
        )
        .unwrap();
        let name_key_comments = doc
            .children_map()
            .unwrap()
            .into_iter()
            .find(|(k, _)| k.as_str() == Some("name"))
            .map(|(k, _)| k.comments.head.clone())
            .unwrap();
        assert_eq!(name_key_comments, vec!["head comment".to_string()]);
        let value = doc.get(&Path::parse("name").unwrap()).unwrap();
        assert_eq!(value.comments.line.as_deref(), Some("line comment"));
    }
}
