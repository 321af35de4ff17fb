//! Feature selection and the resulting immutable configuration.
//!
//! Selection runs in two monotone phases: requested selectables and
//! everything they transitively imply are enabled, then selectables whose
//! prerequisites are not met are disabled until a fixed point is reached.
//! Disabling propagates through the reverse relations, so anything that
//! implied or required a disabled selectable is reconsidered. Termination is
//! bounded by the selectable count.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use compact_str::CompactString;
use lru::LruCache;
use once_cell::sync::{Lazy, OnceCell};
use xt_vars::{ArtifactExpander, Variables};

use crate::expand::{with_features_satisfied, Environment, Tool};
use crate::graph::{Selectable, SelectableId, ToolchainGraph};
use crate::Error;

/// Upper bound on cached selection results.
const SELECTION_CACHE_CAPACITY: usize = 10_000;

/// Computes the maximal consistent enabled set for one request.
pub(crate) struct FeatureSelection<'g> {
    graph: &'g Arc<ToolchainGraph>,
    /// The user's request unioned with the defaults. Unknown names have
    /// already been dropped.
    requested: BTreeSet<SelectableId>,
    enabled: BTreeSet<SelectableId>,
}

impl<'g> FeatureSelection<'g> {
    pub(crate) fn new(
        graph: &'g Arc<ToolchainGraph>,
        requested_names: &BTreeSet<CompactString>,
    ) -> FeatureSelection<'g> {
        let mut requested = BTreeSet::new();
        for name in requested_names.iter().chain(graph.defaults()) {
            match graph.id_by_name(name) {
                Some(id) => {
                    requested.insert(id);
                }
                None => tracing::debug!(%name, "requested selectable is not defined, ignoring"),
            }
        }
        FeatureSelection {
            graph,
            requested,
            enabled: BTreeSet::new(),
        }
    }

    pub(crate) fn run(mut self) -> Result<FeatureConfiguration, Error> {
        for id in self.requested.clone() {
            self.enable_transitively(id);
        }
        self.prune_unsupported();
        self.check_provides()?;

        // Materialize in declaration order.
        let mut enabled_features = Vec::new();
        let mut enabled_feature_names = BTreeSet::new();
        let mut enabled_action_names = BTreeSet::new();
        let mut action_config_by_action = BTreeMap::new();
        for id in self.graph.ids() {
            if !self.enabled.contains(&id) {
                continue;
            }
            match self.graph.selectable(id) {
                Selectable::Feature(feature) => {
                    enabled_features.push(id);
                    enabled_feature_names.insert(feature.name.clone());
                }
                Selectable::ActionConfig(config) => {
                    enabled_action_names.insert(config.action_name.clone());
                    action_config_by_action.insert(config.action_name.clone(), id);
                }
            }
        }

        Ok(FeatureConfiguration {
            inner: Arc::new(Configuration {
                graph: Arc::clone(self.graph),
                enabled_features,
                enabled_feature_names,
                enabled_action_names,
                action_config_by_action,
            }),
        })
    }

    /// Unconditionally enable `id` and everything it transitively implies.
    fn enable_transitively(&mut self, id: SelectableId) {
        if !self.enabled.insert(id) {
            return;
        }
        for &implied in self.graph.implies(id) {
            self.enable_transitively(implied);
        }
    }

    /// Disable enabled selectables whose prerequisites are not met, until a
    /// fixed point is reached.
    fn prune_unsupported(&mut self) {
        let mut check: VecDeque<SelectableId> = self.enabled.iter().copied().collect();
        while let Some(id) = check.pop_front() {
            if !self.enabled.contains(&id) || self.is_satisfied(id) {
                continue;
            }
            self.enabled.remove(&id);
            tracing::debug!(
                name = %self.graph.selectable(id).name(),
                "disabling selectable with unmet prerequisites"
            );
            // Re-check everything the disabled selectable supported: its
            // impliers, its requirers, and what it implied (which may have
            // lost its only enabler).
            check.extend(self.graph.implied_by(id).iter().copied());
            check.extend(self.graph.required_by(id).iter().copied());
            check.extend(self.graph.implies(id).iter().copied());
        }
    }

    /// Whether `id` may stay enabled given the current enabled set.
    fn is_satisfied(&self, id: SelectableId) -> bool {
        (self.requested.contains(&id) || self.implied_by_enabled(id))
            && self.all_implications_enabled(id)
            && self.all_requirements_met(id)
    }

    fn implied_by_enabled(&self, id: SelectableId) -> bool {
        self.graph
            .implied_by(id)
            .iter()
            .any(|implier| self.enabled.contains(implier))
    }

    fn all_implications_enabled(&self, id: SelectableId) -> bool {
        self.graph
            .implies(id)
            .iter()
            .all(|implied| self.enabled.contains(implied))
    }

    /// At least one requirement clause fully enabled, or no clauses at all.
    fn all_requirements_met(&self, id: SelectableId) -> bool {
        let clauses = self.graph.requires(id);
        clauses.is_empty()
            || clauses
                .iter()
                .any(|clause| clause.iter().all(|required| self.enabled.contains(required)))
    }

    /// No symbol may be provided by more than one enabled selectable.
    fn check_provides(&self) -> Result<(), Error> {
        for (symbol, providers) in self.graph.provides() {
            let enabled: Vec<CompactString> = providers
                .iter()
                .filter(|&id| self.enabled.contains(id))
                .map(|&id| self.graph.selectable(id).name().clone())
                .collect();
            if enabled.len() > 1 {
                return Err(Error::CollidingProvides {
                    symbol: symbol.clone(),
                    providers: enabled,
                });
            }
        }
        Ok(())
    }
}

/// The set of enabled features and action configs computed for one request.
///
/// Immutable, cheap to clone, and safe to share across threads.
#[derive(Debug, Clone)]
pub struct FeatureConfiguration {
    inner: Arc<Configuration>,
}

#[derive(Debug, Default)]
struct Configuration {
    graph: Arc<ToolchainGraph>,
    /// Enabled features, in declaration order.
    enabled_features: Vec<SelectableId>,
    /// Names of the enabled features.
    enabled_feature_names: BTreeSet<CompactString>,
    /// Action names with an enabled action config.
    enabled_action_names: BTreeSet<CompactString>,
    /// Action name to its enabled action config.
    action_config_by_action: BTreeMap<CompactString, SelectableId>,
}

static EMPTY: Lazy<FeatureConfiguration> = Lazy::new(|| FeatureConfiguration {
    inner: Arc::new(Configuration::default()),
});

impl FeatureConfiguration {
    /// A configuration that enables nothing and produces no output.
    ///
    /// Usable when construction of the real configuration failed, the error
    /// was reported, and analysis should continue.
    pub fn empty() -> FeatureConfiguration {
        EMPTY.clone()
    }

    /// Whether the feature `name` is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.inner.enabled_feature_names.contains(name)
    }

    /// Names of the enabled features.
    pub fn enabled_feature_names(&self) -> impl Iterator<Item = &str> {
        self.inner.enabled_feature_names.iter().map(|n| n.as_str())
    }

    /// Whether an enabled action config exists for `action`.
    pub fn is_action_configured(&self, action: &str) -> bool {
        self.inner.action_config_by_action.contains_key(action)
    }

    /// The command line for `action`: the enabled action config's
    /// contribution first, then each enabled feature's, in declaration
    /// order.
    ///
    /// # Errors
    ///
    /// * [`Error::ExpansionFailed`] if an unguarded template references an
    ///   unavailable or mistyped variable.
    pub fn command_line(
        &self,
        action: &str,
        vars: &Variables,
        expander: Option<&dyn ArtifactExpander>,
    ) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        let scope = vars.scope();
        if let Some(&id) = self.inner.action_config_by_action.get(action) {
            let config = self.inner.graph.action_config(id);
            for flag_set in &config.flag_sets {
                flag_set.expand_command_line(
                    action,
                    &scope,
                    &self.inner.enabled_feature_names,
                    expander,
                    &mut out,
                )?;
            }
        }
        for &id in &self.inner.enabled_features {
            let feature = self.inner.graph.feature(id);
            for flag_set in &feature.flag_sets {
                flag_set.expand_command_line(
                    action,
                    &scope,
                    &self.inner.enabled_feature_names,
                    expander,
                    &mut out,
                )?;
            }
        }
        Ok(out)
    }

    /// The command line for `action` split into per-selectable buckets, the
    /// enabled action config first. Empty contributions are retained so
    /// callers can attribute absence.
    pub fn per_feature_expansions(
        &self,
        action: &str,
        vars: &Variables,
        expander: Option<&dyn ArtifactExpander>,
    ) -> Result<Vec<(CompactString, Vec<String>)>, Error> {
        let mut expansions = Vec::with_capacity(self.inner.enabled_features.len() + 1);
        let scope = vars.scope();
        if let Some(&id) = self.inner.action_config_by_action.get(action) {
            let config = self.inner.graph.action_config(id);
            let mut out = Vec::new();
            for flag_set in &config.flag_sets {
                flag_set.expand_command_line(
                    action,
                    &scope,
                    &self.inner.enabled_feature_names,
                    expander,
                    &mut out,
                )?;
            }
            expansions.push((config.config_name.clone(), out));
        }
        for &id in &self.inner.enabled_features {
            let feature = self.inner.graph.feature(id);
            let mut out = Vec::new();
            for flag_set in &feature.flag_sets {
                flag_set.expand_command_line(
                    action,
                    &scope,
                    &self.inner.enabled_feature_names,
                    expander,
                    &mut out,
                )?;
            }
            expansions.push((feature.name.clone(), out));
        }
        Ok(expansions)
    }

    /// The environment for `action`, from each enabled feature's env sets in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidConfiguration`] if two enabled features write the
    ///   same key.
    /// * [`Error::ExpansionFailed`] if a value template references an
    ///   unavailable variable.
    pub fn environment(&self, action: &str, vars: &Variables) -> Result<Environment, Error> {
        let mut env = Environment::default();
        let scope = vars.scope();
        for &id in &self.inner.enabled_features {
            let feature = self.inner.graph.feature(id);
            for env_set in &feature.env_sets {
                env_set.expand_environment(
                    action,
                    &scope,
                    &self.inner.enabled_feature_names,
                    &mut env,
                )?;
            }
        }
        Ok(env)
    }

    /// The first tool of `action`'s config whose feature sets match the
    /// enabled features.
    ///
    /// # Panics
    ///
    /// * If `action` has no enabled action config; check
    ///   [`FeatureConfiguration::is_action_configured`] first.
    ///
    /// # Errors
    ///
    /// * [`Error::NoMatchingTool`] if no tool matches.
    pub fn tool_for_action(&self, action: &str) -> Result<&Tool, Error> {
        let Some(&id) = self.inner.action_config_by_action.get(action) else {
            panic!("action '{action}' does not have an enabled configuration in the toolchain");
        };
        let config = self.inner.graph.action_config(id);
        config
            .tools
            .iter()
            .find(|tool| {
                with_features_satisfied(tool.with_features(), &self.inner.enabled_feature_names)
            })
            .ok_or_else(|| Error::NoMatchingTool(config.action_name.clone()))
    }
}

/// Bounded cache of selection results, keyed by the canonicalized requested
/// name set.
///
/// Concurrent lookups of the same key compute at most once; other callers
/// block on the winner's cell.
pub(crate) struct SelectionCache {
    inner: Mutex<SelectionLru>,
}

type SelectionLru =
    LruCache<BTreeSet<CompactString>, Arc<OnceCell<Result<FeatureConfiguration, Error>>>>;

impl SelectionCache {
    pub(crate) fn new() -> SelectionCache {
        let capacity = NonZeroUsize::new(SELECTION_CACHE_CAPACITY).expect("capacity is non-zero");
        SelectionCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn get_or_compute<F>(
        &self,
        key: BTreeSet<CompactString>,
        compute: F,
    ) -> Result<FeatureConfiguration, Error>
    where
        F: FnOnce() -> Result<FeatureConfiguration, Error>,
    {
        let cell = {
            let mut cache = self.inner.lock().expect("selection cache lock poisoned");
            Arc::clone(cache.get_or_insert(key, || Arc::new(OnceCell::new())))
        };
        cell.get_or_init(compute).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{ActionConfigSpec, FeatureSetSpec, FeatureSpec};
    use std::path::Path;

    fn feature(name: &str) -> FeatureSpec {
        FeatureSpec {
            name: name.into(),
            ..Default::default()
        }
    }

    fn graph(features: Vec<FeatureSpec>, action_configs: Vec<ActionConfigSpec>) -> Arc<ToolchainGraph> {
        Arc::new(ToolchainGraph::new(features, action_configs, Path::new("/crosstool")).unwrap())
    }

    fn select(
        graph: &Arc<ToolchainGraph>,
        requested: &[&str],
    ) -> Result<FeatureConfiguration, Error> {
        let names = requested.iter().map(|name| CompactString::new(name)).collect();
        FeatureSelection::new(graph, &names).run()
    }

    fn enabled_names(config: &FeatureConfiguration) -> Vec<String> {
        config
            .enabled_feature_names()
            .map(|name| name.to_string())
            .collect()
    }

    #[test]
    fn smoketest_requested_features_are_enabled() {
        let graph = graph(vec![feature("a"), feature("b")], vec![]);
        let config = select(&graph, &["a"]).unwrap();
        assert!(config.is_enabled("a"));
        assert!(!config.is_enabled("b"));
    }

    #[test]
    fn unknown_requested_names_are_dropped() {
        let graph = graph(vec![feature("a")], vec![]);
        let config = select(&graph, &["a", "no-such-feature"]).unwrap();
        assert_eq!(enabled_names(&config), ["a"]);
    }

    #[test]
    fn implication_closure_enables_transitively() {
        let mut a = feature("a");
        a.implies = vec!["b".into()];
        let mut b = feature("b");
        b.implies = vec!["c".into()];
        let graph = graph(vec![a, b, feature("c")], vec![]);

        let config = select(&graph, &["a"]).unwrap();
        assert_eq!(enabled_names(&config), ["a", "b", "c"]);
    }

    #[test]
    fn requirement_holds_when_clause_enabled() {
        // a implies b; c requires (b).
        let mut a = feature("a");
        a.implies = vec!["b".into()];
        let mut c = feature("c");
        c.requires = vec![FeatureSetSpec {
            features: vec!["b".into()],
        }];
        let graph = graph(vec![a, feature("b"), c], vec![]);

        let config = select(&graph, &["a", "c"]).unwrap();
        assert_eq!(enabled_names(&config), ["a", "b", "c"]);

        // Without a, b is never enabled and c is dropped.
        let config = select(&graph, &["c"]).unwrap();
        assert!(enabled_names(&config).is_empty());
    }

    #[test]
    fn requirement_clauses_are_a_disjunction() {
        let mut c = feature("c");
        c.requires = vec![
            FeatureSetSpec {
                features: vec!["a".into()],
            },
            FeatureSetSpec {
                features: vec!["b".into()],
            },
        ];
        let graph = graph(vec![feature("a"), feature("b"), c], vec![]);

        let config = select(&graph, &["b", "c"]).unwrap();
        assert_eq!(enabled_names(&config), ["b", "c"]);
    }

    #[test]
    fn disabling_cascades_through_implications() {
        // a implies b; b requires c. Without c, both a and b fall.
        let mut a = feature("a");
        a.implies = vec!["b".into()];
        let mut b = feature("b");
        b.requires = vec![FeatureSetSpec {
            features: vec!["c".into()],
        }];
        let graph = graph(vec![a, b, feature("c")], vec![]);

        let config = select(&graph, &["a"]).unwrap();
        assert!(enabled_names(&config).is_empty());

        let config = select(&graph, &["a", "c"]).unwrap();
        assert_eq!(enabled_names(&config), ["a", "b", "c"]);
    }

    #[test]
    fn disabling_a_supporter_disables_what_it_implied() {
        // z is declared first so the worklist checks it while y, its only
        // implier, is still enabled. When y falls to the unmet requirement
        // on w, z must be reconsidered and fall too.
        let mut y = feature("y");
        y.implies = vec!["z".into()];
        y.requires = vec![FeatureSetSpec {
            features: vec!["w".into()],
        }];
        let graph = graph(vec![feature("z"), y, feature("w")], vec![]);

        let config = select(&graph, &["y"]).unwrap();
        assert!(enabled_names(&config).is_empty());

        // With w enabled the chain holds.
        let config = select(&graph, &["y", "w"]).unwrap();
        assert_eq!(enabled_names(&config), ["w", "y", "z"]);
    }

    #[test]
    fn colliding_provides_is_an_error() {
        let mut gcc = feature("gcc");
        gcc.provides = vec!["compiler".into()];
        let mut clang = feature("clang");
        clang.provides = vec!["compiler".into()];
        let graph = graph(vec![gcc, clang], vec![]);

        let err = select(&graph, &["gcc", "clang"]).unwrap_err();
        assert_eq!(
            err,
            Error::CollidingProvides {
                symbol: "compiler".into(),
                providers: vec!["gcc".into(), "clang".into()],
            },
        );

        // Either one alone is fine.
        assert!(select(&graph, &["gcc"]).is_ok());
        assert!(select(&graph, &["clang"]).is_ok());
    }

    #[test]
    fn defaults_are_always_part_of_the_request() {
        let mut base = feature("base");
        base.enabled = true;
        let graph = graph(vec![base, feature("extra")], vec![]);

        let with_defaults = select(&graph, &["extra"]).unwrap();
        assert_eq!(enabled_names(&with_defaults), ["base", "extra"]);

        // Listing a default explicitly changes nothing.
        let explicit = select(&graph, &["base", "extra"]).unwrap();
        assert_eq!(enabled_names(&explicit), enabled_names(&with_defaults));
    }

    #[test]
    fn action_configs_enable_their_action() {
        let config_spec = ActionConfigSpec {
            config_name: "compile".into(),
            action_name: "c-compile".into(),
            ..Default::default()
        };
        let graph = graph(vec![], vec![config_spec]);

        let config = select(&graph, &["compile"]).unwrap();
        assert!(config.is_action_configured("c-compile"));
        // Action config names are not feature names.
        assert!(!config.is_enabled("compile"));

        let config = select(&graph, &[]).unwrap();
        assert!(!config.is_action_configured("c-compile"));
    }

    #[test]
    fn empty_configuration_enables_nothing() {
        let config = FeatureConfiguration::empty();
        assert!(!config.is_enabled("anything"));
        assert!(!config.is_action_configured("c-compile"));
        let vars = Variables::new();
        assert!(config.command_line("c-compile", &vars, None).unwrap().is_empty());
        assert!(config.environment("c-compile", &vars).unwrap().is_empty());
    }

    #[test]
    fn selection_cache_returns_cached_results() {
        let cache = SelectionCache::new();
        let key: BTreeSet<CompactString> = ["a".into()].into_iter().collect();

        let first = cache
            .get_or_compute(key.clone(), || Ok(FeatureConfiguration::empty()))
            .unwrap();
        // The second compute closure must not run.
        let second = cache
            .get_or_compute(key, || panic!("cache did not hit"))
            .unwrap();
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
    }
}
