//! Typed build variables for toolchain expansion.
//!
//! The types in this crate form the value universe that flag and environment
//! templates are expanded against. A [`Variables`] bag is built once per
//! action request, viewed through a [`Scope`], and discarded afterwards.
//! Scopes never mutate; iterating a sequence variable derives a child scope
//! with one extra binding.

use std::borrow::Cow;
use std::collections::BTreeMap;

use compact_str::CompactString;

pub mod template;

pub use template::{Chunk, Template, TemplateError};

/// Errors from resolving or expanding build variables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VarError {
    #[error("build variable '{0}' is not available")]
    Missing(CompactString),
    #[error("build variable '{name}' is a {kind}, expected a {expected}")]
    WrongKind {
        name: CompactString,
        kind: &'static str,
        expected: &'static str,
    },
    #[error("no expander provided to materialize tree artifact variable '{0}'")]
    NoExpander(CompactString),
}

/// A single build variable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarValue {
    /// An opaque string.
    Str(CompactString),
    /// An integer, rendered decimally when a string is needed.
    Int(i64),
    /// A boolean, rendered as `1`/`0` when a string is needed.
    Bool(bool),
    /// A record of named fields, accessed with dotted paths.
    Struct(BTreeMap<CompactString, VarValue>),
    /// An ordered, restartable series of values.
    Sequence(Vec<VarValue>),
    /// A directory-shaped artifact whose contained files are materialized on
    /// demand by an [`ArtifactExpander`].
    TreeArtifact(TreeArtifact),
}

impl VarValue {
    /// A short name for this value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            VarValue::Str(_) => "string",
            VarValue::Int(_) => "integer",
            VarValue::Bool(_) => "boolean",
            VarValue::Struct(_) => "structure",
            VarValue::Sequence(_) => "sequence",
            VarValue::TreeArtifact(_) => "tree artifact",
        }
    }

    /// Whether this value counts as true in an `expand_if_true` or
    /// `expand_if_false` guard.
    ///
    /// Tree artifacts are always truthy: checking emptiness would force the
    /// expander, which truthiness must not do.
    pub fn is_truthy(&self) -> bool {
        match self {
            VarValue::Str(value) => !value.is_empty(),
            VarValue::Int(value) => *value != 0,
            VarValue::Bool(value) => *value,
            VarValue::Struct(_) => true,
            VarValue::Sequence(values) => !values.is_empty(),
            VarValue::TreeArtifact(_) => true,
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::Str(CompactString::new(value))
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::Str(CompactString::from(value))
    }
}

impl From<CompactString> for VarValue {
    fn from(value: CompactString) -> Self {
        VarValue::Str(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Int(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

impl From<TreeArtifact> for VarValue {
    fn from(value: TreeArtifact) -> Self {
        VarValue::TreeArtifact(value)
    }
}

impl From<BTreeMap<CompactString, VarValue>> for VarValue {
    fn from(fields: BTreeMap<CompactString, VarValue>) -> Self {
        VarValue::Struct(fields)
    }
}

impl<T: Into<VarValue>> From<Vec<T>> for VarValue {
    fn from(values: Vec<T>) -> Self {
        VarValue::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// Handle to a directory-shaped artifact whose contained files are only known
/// to the caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreeArtifact {
    /// Path of the tree artifact, as known to the build system.
    pub path: CompactString,
}

impl TreeArtifact {
    pub fn new(path: impl Into<CompactString>) -> TreeArtifact {
        TreeArtifact { path: path.into() }
    }
}

/// Materializes the files beneath a [`TreeArtifact`] on demand.
pub trait ArtifactExpander {
    /// Return the paths of the files contained in `tree`, in a stable order.
    fn expand(&self, tree: &TreeArtifact) -> Vec<CompactString>;
}

impl<F> ArtifactExpander for F
where
    F: Fn(&TreeArtifact) -> Vec<CompactString>,
{
    fn expand(&self, tree: &TreeArtifact) -> Vec<CompactString> {
        (self)(tree)
    }
}

/// A name-indexed bag of [`VarValue`]s, built once per expansion request.
#[derive(Debug, Default, Clone)]
pub struct Variables {
    values: BTreeMap<CompactString, VarValue>,
}

impl Variables {
    pub fn new() -> Variables {
        Variables::default()
    }

    /// Bind `name` to `value`, replacing any previous binding.
    pub fn set(&mut self, name: impl Into<CompactString>, value: impl Into<VarValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// The root [`Scope`] over this bag.
    pub fn scope(&self) -> Scope<'_> {
        Scope::Root(self)
    }
}

/// A lookup scope over [`Variables`].
///
/// Derived scopes chain one extra binding on top of a parent; lookup walks
/// inner to outer, so an iteration binding shadows the bag by name.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// The root scope over a full set of bindings.
    Root(&'a Variables),
    /// One extra binding on top of a parent scope, used while iterating a
    /// sequence variable.
    Derived {
        name: &'a str,
        value: &'a VarValue,
        parent: &'a Scope<'a>,
    },
}

impl<'a> Scope<'a> {
    /// A child scope in which `name` is bound to `value`, shadowing any
    /// binding of the same name in `self`.
    pub fn derive<'b>(&'b self, name: &'b str, value: &'b VarValue) -> Scope<'b> {
        Scope::Derived {
            name,
            value,
            parent: self,
        }
    }

    /// Look up a whole-name binding, innermost scope first.
    fn binding(&self, name: &str) -> Option<&VarValue> {
        match self {
            Scope::Root(vars) => vars.values.get(name),
            Scope::Derived {
                name: bound,
                value,
                parent,
            } => {
                if *bound == name {
                    Some(*value)
                } else {
                    parent.binding(name)
                }
            }
        }
    }

    /// Resolve `name`, walking structure fields for dotted paths.
    ///
    /// A whole-name binding wins; otherwise the longest bound prefix is
    /// located and the remaining segments are walked as structure fields.
    fn resolve(&self, name: &str) -> Option<&VarValue> {
        if let Some(value) = self.binding(name) {
            return Some(value);
        }
        let mut prefix = name;
        while let Some(split) = prefix.rfind('.') {
            prefix = &prefix[..split];
            if let Some(root) = self.binding(prefix) {
                return walk_fields(root, &name[prefix.len() + 1..]);
            }
        }
        None
    }

    /// True iff `name` resolves in this scope.
    ///
    /// Tree artifacts are never materialized here; only the binding is
    /// checked.
    pub fn is_available(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// The value bound to `name`.
    ///
    /// # Errors
    ///
    /// * [`VarError::Missing`] if `name` does not resolve.
    pub fn get_variable(&self, name: &str) -> Result<&VarValue, VarError> {
        self.resolve(name)
            .ok_or_else(|| VarError::Missing(CompactString::new(name)))
    }

    /// Resolve `name` to a string, coercing integers decimally and booleans
    /// to `1`/`0`.
    ///
    /// # Errors
    ///
    /// * [`VarError::WrongKind`] for sequences, structures, and tree
    ///   artifacts.
    pub fn get_string(&self, name: &str) -> Result<String, VarError> {
        match self.get_variable(name)? {
            VarValue::Str(value) => Ok(value.to_string()),
            VarValue::Int(value) => Ok(value.to_string()),
            VarValue::Bool(value) => Ok(if *value { "1" } else { "0" }.to_string()),
            other => Err(VarError::WrongKind {
                name: CompactString::new(name),
                kind: other.kind(),
                expected: "string",
            }),
        }
    }

    /// Resolve `name` to a sequence of values.
    ///
    /// Tree artifacts are materialized here, calling `expander` exactly once
    /// per call.
    pub fn get_sequence(
        &self,
        name: &str,
        expander: Option<&dyn ArtifactExpander>,
    ) -> Result<Cow<'_, [VarValue]>, VarError> {
        match self.get_variable(name)? {
            VarValue::Sequence(values) => Ok(Cow::Borrowed(&values[..])),
            VarValue::TreeArtifact(tree) => {
                let Some(expander) = expander else {
                    return Err(VarError::NoExpander(CompactString::new(name)));
                };
                let children = expander
                    .expand(tree)
                    .into_iter()
                    .map(VarValue::Str)
                    .collect();
                Ok(Cow::Owned(children))
            }
            other => Err(VarError::WrongKind {
                name: CompactString::new(name),
                kind: other.kind(),
                expected: "sequence",
            }),
        }
    }

    /// Whether `name` is available and truthy.
    ///
    /// # Errors
    ///
    /// * [`VarError::Missing`] if `name` does not resolve.
    pub fn is_truthy(&self, name: &str) -> Result<bool, VarError> {
        Ok(self.get_variable(name)?.is_truthy())
    }
}

/// Walk `path` segments through nested structure fields.
fn walk_fields<'v>(mut value: &'v VarValue, path: &str) -> Option<&'v VarValue> {
    for field in path.split('.') {
        match value {
            VarValue::Struct(fields) => value = fields.get(field)?,
            _ => return None,
        }
    }
    Some(value)
}
