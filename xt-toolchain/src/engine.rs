//! The toolchain feature engine.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use compact_str::CompactString;
use derivative::Derivative;

use crate::artifact::{ArtifactCategory, ArtifactNamePattern};
use crate::defs::ToolchainSpec;
use crate::graph::ToolchainGraph;
use crate::select::{FeatureSelection, SelectionCache};
use crate::{Error, FeatureConfiguration};

/// Feature and action-config definitions for one toolchain, with cached
/// selection and expansion.
///
/// Built once from a [`ToolchainSpec`] and shared immutably afterwards;
/// concurrent readers need no locks.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Toolchain {
    graph: Arc<ToolchainGraph>,
    /// Artifact name patterns, in declaration order.
    artifact_patterns: Vec<ArtifactNamePattern>,
    /// Cache of selection results, keyed by the requested name set.
    #[derivative(Debug = "ignore")]
    cache: SelectionCache,
}

impl Toolchain {
    /// Build the engine from an already-deserialized toolchain description.
    ///
    /// Tool paths are resolved relative to `crosstool_top`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidConfiguration`] for duplicate names, references to
    ///   undefined selectables, malformed templates, or unknown artifact
    ///   categories.
    pub fn new(spec: ToolchainSpec, crosstool_top: &Path) -> Result<Toolchain, Error> {
        let ToolchainSpec {
            features,
            action_configs,
            artifact_name_patterns,
        } = spec;
        let artifact_patterns = artifact_name_patterns
            .into_iter()
            .map(ArtifactNamePattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        let graph = ToolchainGraph::new(features, action_configs, crosstool_top)?;
        tracing::info!(
            selectables = graph.len(),
            patterns = artifact_patterns.len(),
            "built toolchain feature graph"
        );
        Ok(Toolchain {
            graph: Arc::new(graph),
            artifact_patterns,
            cache: SelectionCache::new(),
        })
    }

    /// The feature configuration for the requested selectable names.
    ///
    /// Unknown names are dropped, and default-enabled selectables are always
    /// part of the request. Results are cached per canonicalized request,
    /// so the order and multiplicity of `requested` do not matter.
    ///
    /// # Errors
    ///
    /// * [`Error::CollidingProvides`] if two enabled selectables claim the
    ///   same symbol.
    pub fn feature_configuration<I, S>(&self, requested: I) -> Result<FeatureConfiguration, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        let key: BTreeSet<CompactString> = requested.into_iter().map(Into::into).collect();
        self.cache
            .get_or_compute(key.clone(), || FeatureSelection::new(&self.graph, &key).run())
    }

    /// Default-enabled selectable names, in declaration order.
    pub fn default_selectables(&self) -> &[CompactString] {
        self.graph.defaults()
    }

    /// Names of every feature and action config, in declaration order.
    pub fn selectable_names(&self) -> impl Iterator<Item = &str> {
        self.graph.names()
    }

    /// Whether a name pattern is configured for `category`.
    pub fn has_artifact_pattern(&self, category: ArtifactCategory) -> bool {
        self.artifact_patterns
            .iter()
            .any(|pattern| pattern.category == category)
    }

    /// The artifact name selected for `category` and `output_name`.
    ///
    /// When several patterns are configured for one category, the last one
    /// wins.
    ///
    /// # Errors
    ///
    /// * [`Error::MissingArtifactPattern`] if no pattern is configured for
    ///   `category`.
    /// * [`Error::ExpansionFailed`] if the pattern references a variable
    ///   other than the predefined ones.
    pub fn artifact_name(
        &self,
        category: ArtifactCategory,
        output_name: &str,
    ) -> Result<String, Error> {
        let pattern = self
            .artifact_patterns
            .iter()
            .filter(|pattern| pattern.category == category)
            .last()
            .ok_or(Error::MissingArtifactPattern(category.category_name()))?;
        pattern.artifact_name(output_name)
    }
}
