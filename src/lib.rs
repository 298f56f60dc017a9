//! A structured-configuration manipulation core for declarative
//! infrastructure documents (Kubernetes manifests, OpenTofu/HCL
//! blocks, and property files, uniformly represented as YAML). Reads,
//! mutates, diffs, and patches collections of configuration resources
//! at a semantic ("path within resource") level rather than as opaque
//! text, while preserving comments, key ordering, and user formatting
//! wherever possible.
//!
//! Seven components, in dependency order:
//!
//! - [`node`] (C1) — the comment-preserving document tree.
//! - [`path`] (C2) — the dot-path expression grammar and resolver.
//! - [`provider`] (C3) — per-toolchain `(Category, Type, Name)` classification.
//! - [`embedded`] (C4) — regex-based access into a scalar's internal structure.
//! - [`registry`] (C5) — the per-provider catalog of registered paths.
//! - [`visitor`] (C6) — classify/filter/resolve/fetch/invoke traversal.
//! - [`mutation`] (C7) — per-document and per-unit diff, patch replay, reset.
//!
//! This crate does not include a worker/connector RPC bridge, CLI
//! wrappers, toolchain bridges, text emitters, or an RFC 6902 patch
//! library — those are external collaborators that consume the value
//! types defined here.

pub mod config;
pub mod embedded;
pub mod error;
pub mod mutation;
pub mod node;
pub mod path;
pub mod provider;
pub mod registry;
pub mod visitor;

pub use embedded::{EmbeddedAccessor, RegexAccessor};
pub use error::{CoreError, Result};
pub use mutation::{MutationInfo, MutationKind, ResourceMutation};
pub use node::{Comments, Container, Node, NodeData, Scalar};
pub use path::{Bindings, Path, Segment};
pub use provider::{Category, HclProvider, KubernetesProvider, ResourceInfo, ResourceProvider};
pub use registry::{AttributeName, DataType, PathRegistry, PathVisitorInfo};
pub use visitor::{AttributeInfo, AttributeValue, VisitorContext};
