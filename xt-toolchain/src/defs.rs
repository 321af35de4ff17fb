//! Input records describing a toolchain.
//!
//! These are the in-memory form of the declarative toolchain description,
//! typically deserialized by the surrounding build system. [`Toolchain::new`]
//! consumes them; nothing here validates cross references.
//!
//! [`Toolchain::new`]: crate::Toolchain::new

use compact_str::CompactString;
use serde::Deserialize;

/// Definition of a toolchain: its features, action configs, and artifact
/// name patterns, in declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolchainSpec {
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
    #[serde(default)]
    pub action_configs: Vec<ActionConfigSpec>,
    #[serde(default)]
    pub artifact_name_patterns: Vec<ArtifactNamePatternSpec>,
}

impl ToolchainSpec {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// A named feature: flag sets, env sets, and its activation relations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureSpec {
    pub name: CompactString,
    /// Whether the feature is enabled by default.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub flag_sets: Vec<FlagSetSpec>,
    #[serde(default)]
    pub env_sets: Vec<EnvSetSpec>,
    /// Selectables enabled whenever this feature is enabled.
    #[serde(default)]
    pub implies: Vec<CompactString>,
    /// Requirement clauses; at least one clause must be fully enabled for
    /// this feature to stay enabled.
    #[serde(default)]
    pub requires: Vec<FeatureSetSpec>,
    /// Symbols claimed by this feature. A symbol may be claimed by at most
    /// one enabled selectable.
    #[serde(default)]
    pub provides: Vec<CompactString>,
}

/// A conjunction of feature names, used as one `requires` clause.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureSetSpec {
    #[serde(default)]
    pub features: Vec<CompactString>,
}

/// Flag groups applied to a set of actions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagSetSpec {
    /// Actions this flag set applies to. Must be empty inside an action
    /// config, where the action is implicit.
    #[serde(default)]
    pub actions: Vec<CompactString>,
    #[serde(default)]
    pub with_features: Vec<WithFeatureSpec>,
    #[serde(default)]
    pub expand_if_all_available: Vec<CompactString>,
    #[serde(default)]
    pub flag_groups: Vec<FlagGroupSpec>,
}

/// An ordered group of flags or nested groups, with expansion guards.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagGroupSpec {
    /// Flag patterns. Mutually exclusive with `flag_groups`.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Nested groups. Mutually exclusive with `flags`.
    #[serde(default)]
    pub flag_groups: Vec<FlagGroupSpec>,
    /// Sequence variable to iterate; children expand once per element with
    /// this name bound to the element.
    #[serde(default)]
    pub iterate_over: Option<CompactString>,
    #[serde(default)]
    pub expand_if_all_available: Vec<CompactString>,
    #[serde(default)]
    pub expand_if_none_available: Vec<CompactString>,
    #[serde(default)]
    pub expand_if_true: Option<CompactString>,
    #[serde(default)]
    pub expand_if_false: Option<CompactString>,
    #[serde(default)]
    pub expand_if_equal: Option<VariableWithValueSpec>,
}

/// A (variable, literal value) equality guard.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VariableWithValueSpec {
    pub variable: CompactString,
    pub value: String,
}

/// A positive/negative feature-name matcher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WithFeatureSpec {
    /// Every listed feature must be enabled.
    #[serde(default)]
    pub features: Vec<CompactString>,
    /// No listed feature may be enabled.
    #[serde(default)]
    pub not_features: Vec<CompactString>,
}

/// Environment entries applied to a set of actions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvSetSpec {
    #[serde(default)]
    pub actions: Vec<CompactString>,
    #[serde(default)]
    pub env_entries: Vec<EnvEntrySpec>,
    #[serde(default)]
    pub with_features: Vec<WithFeatureSpec>,
}

/// A single environment key with a value pattern.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvEntrySpec {
    pub key: CompactString,
    /// Value pattern, expanded per action request.
    pub value: String,
}

/// Binds a build action to an ordered tool list and flag sets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionConfigSpec {
    /// Name of this selectable.
    pub config_name: CompactString,
    /// The build action this config applies to.
    pub action_name: CompactString,
    /// Whether the action config is enabled by default.
    #[serde(default)]
    pub enabled: bool,
    /// Candidate tools, in preference order.
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub implies: Vec<CompactString>,
    /// Flag sets, implicitly scoped to `action_name`.
    #[serde(default)]
    pub flag_sets: Vec<FlagSetSpec>,
}

/// An executable with execution requirements and feature gating.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolSpec {
    /// Tool path, resolved relative to the toolchain root.
    pub tool_path: String,
    #[serde(default)]
    pub execution_requirements: Vec<CompactString>,
    #[serde(default)]
    pub with_features: Vec<WithFeatureSpec>,
}

/// How artifacts of one category are named.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactNamePatternSpec {
    /// Category name; must match a known [`ArtifactCategory`].
    ///
    /// [`ArtifactCategory`]: crate::ArtifactCategory
    pub category_name: CompactString,
    /// Name pattern, expanded with `output_name`, `base_name`, and
    /// `output_directory`.
    pub pattern: String,
}
