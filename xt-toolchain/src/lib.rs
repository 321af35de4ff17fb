//! Feature configuration engine for a build toolchain.
//!
//! A toolchain description declares named *features* and *action configs*
//! (together: "selectables") tied to each other by `implies`, `requires`,
//! and `provides` relations. Given a set of requested selectable names, the
//! engine computes the maximal consistent enabled subset and, from that,
//! expands command lines, environments, and tool selections for a named
//! build action against a bag of typed build variables.
//!
//! The entry point is [`Toolchain`], built once from an already-deserialized
//! [`ToolchainSpec`] and shared immutably afterwards. Selection results are
//! [`FeatureConfiguration`]s, cached per request.

use compact_str::CompactString;

pub mod artifact;
pub mod defs;

mod engine;
mod expand;
mod graph;
mod select;

pub use artifact::ArtifactCategory;
pub use defs::ToolchainSpec;
pub use engine::Toolchain;
pub use expand::{Environment, Tool};
pub use select::FeatureConfiguration;

// The variable types callers build expansion requests from.
pub use xt_vars::{ArtifactExpander, TreeArtifact, VarValue, Variables};

use xt_vars::{TemplateError, VarError};

/// Errors produced by the feature configuration engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The toolchain description is statically malformed.
    #[error("invalid toolchain configuration: {0}")]
    InvalidConfiguration(String),
    /// Two enabled selectables provide the same symbol.
    #[error("symbol '{symbol}' is provided by all of the following features: {}", .providers.join(" "))]
    CollidingProvides {
        symbol: CompactString,
        providers: Vec<CompactString>,
    },
    /// A template referenced an unavailable or mistyped variable at
    /// expansion time.
    #[error("flag expansion failed: {0}")]
    ExpansionFailed(#[from] VarError),
    /// No tool of the enabled action config matched the enabled features.
    #[error("matching tool for action '{0}' not found for the given feature configuration")]
    NoMatchingTool(CompactString),
    /// No artifact name pattern is configured for the category.
    #[error("toolchain must provide an artifact name pattern for category '{0}'")]
    MissingArtifactPattern(&'static str),
}

impl From<TemplateError> for Error {
    fn from(err: TemplateError) -> Self {
        Error::InvalidConfiguration(err.to_string())
    }
}
