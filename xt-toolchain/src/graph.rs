//! The selectable graph: features, action configs, and their relations.
//!
//! Selectables are stored in declaration order and referenced everywhere by
//! [`SelectableId`], an index into that order. The four activation relations
//! are adjacency lists keyed by index, stored forward and reverse so that
//! disabling a selectable can efficiently re-check everything that depended
//! on it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::defs::{ActionConfigSpec, FeatureSpec};
use crate::expand::{EnvSet, FlagSet, Tool};
use crate::Error;

/// Index of a selectable, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SelectableId(u32);

impl SelectableId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The unit of enablement: a feature or an action config.
#[derive(Debug, Clone)]
pub(crate) enum Selectable {
    Feature(Feature),
    ActionConfig(ActionConfig),
}

impl Selectable {
    pub(crate) fn name(&self) -> &CompactString {
        match self {
            Selectable::Feature(feature) => &feature.name,
            Selectable::ActionConfig(config) => &config.config_name,
        }
    }
}

/// A named bundle of flag sets and env sets.
#[derive(Debug, Clone)]
pub(crate) struct Feature {
    pub(crate) name: CompactString,
    pub(crate) flag_sets: Vec<FlagSet>,
    pub(crate) env_sets: Vec<EnvSet>,
}

/// Binds a build action to an ordered tool list and flag sets.
#[derive(Debug, Clone)]
pub(crate) struct ActionConfig {
    pub(crate) config_name: CompactString,
    pub(crate) action_name: CompactString,
    /// Candidate tools, in preference order.
    pub(crate) tools: Vec<Tool>,
    /// Flag sets, scoped to `action_name`.
    pub(crate) flag_sets: Vec<FlagSet>,
}

type Neighbors = SmallVec<[SelectableId; 2]>;

/// All selectables of a toolchain plus the activation relations over them.
///
/// Built once from the configuration records and never mutated.
#[derive(Debug, Default)]
pub(crate) struct ToolchainGraph {
    /// Selectables in declaration order.
    selectables: Vec<Selectable>,
    /// Selectable name to its id.
    by_name: BTreeMap<CompactString, SelectableId>,
    /// Action name to the action config for it.
    action_config_by_action: BTreeMap<CompactString, SelectableId>,

    /// Selectables directly enabled by a selectable.
    implies: Vec<Neighbors>,
    /// Reverse of `implies`.
    implied_by: Vec<Neighbors>,
    /// Requirement clauses. A clause is a conjunction; the requirement is
    /// satisfied when at least one clause is fully enabled.
    requires: Vec<Vec<Neighbors>>,
    /// Selectables whose requirement clauses reference a selectable.
    required_by: Vec<Neighbors>,
    /// Provided symbol to its claiming selectables, in declaration order.
    provides: BTreeMap<CompactString, Neighbors>,

    /// Default-enabled selectable names, in declaration order.
    defaults: Vec<CompactString>,
}

impl ToolchainGraph {
    /// Build the graph from configuration records, resolving tool paths
    /// against `crosstool_top`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidConfiguration`] for duplicate selectable or action
    ///   names, references to undefined selectables, malformed templates, or
    ///   an action config flag set that lists actions.
    pub(crate) fn new(
        features: Vec<FeatureSpec>,
        action_configs: Vec<ActionConfigSpec>,
        crosstool_top: &Path,
    ) -> Result<ToolchainGraph, Error> {
        let count = features.len() + action_configs.len();
        let mut selectables = Vec::with_capacity(count);
        let mut by_name = BTreeMap::new();
        let mut action_config_by_action = BTreeMap::new();
        let mut defaults = Vec::new();

        // Relation name lists, indexed like `selectables`. Resolved in a
        // second pass so earlier selectables can reference later ones.
        let mut implies_names: Vec<Vec<CompactString>> = Vec::with_capacity(count);
        let mut requires_names: Vec<Vec<Vec<CompactString>>> = Vec::with_capacity(count);
        let mut provides_names: Vec<Vec<CompactString>> = Vec::with_capacity(count);

        let register =
            |name: &CompactString, index: usize, by_name: &mut BTreeMap<CompactString, SelectableId>| {
                let id = SelectableId(u32::try_from(index).expect("selectable count fits in u32"));
                let prev = by_name.insert(name.clone(), id);
                if prev.is_some() {
                    return Err(Error::InvalidConfiguration(format!(
                        "feature or action config '{name}' was specified multiple times"
                    )));
                }
                Ok(id)
            };

        for feature in features {
            let FeatureSpec {
                name,
                enabled,
                flag_sets,
                env_sets,
                implies,
                requires,
                provides,
            } = feature;
            register(&name, selectables.len(), &mut by_name)?;
            if enabled {
                defaults.push(name.clone());
            }
            let flag_sets = flag_sets
                .into_iter()
                .map(FlagSet::new)
                .collect::<Result<_, _>>()?;
            let env_sets = env_sets
                .into_iter()
                .map(EnvSet::new)
                .collect::<Result<_, _>>()?;
            selectables.push(Selectable::Feature(Feature {
                name,
                flag_sets,
                env_sets,
            }));
            implies_names.push(implies);
            requires_names.push(requires.into_iter().map(|clause| clause.features).collect());
            provides_names.push(provides);
        }

        for config in action_configs {
            let ActionConfigSpec {
                config_name,
                action_name,
                enabled,
                tools,
                implies,
                flag_sets,
            } = config;
            let id = register(&config_name, selectables.len(), &mut by_name)?;
            let prev = action_config_by_action.insert(action_name.clone(), id);
            if prev.is_some() {
                return Err(Error::InvalidConfiguration(format!(
                    "multiple action configs for action '{action_name}'"
                )));
            }
            if enabled {
                defaults.push(config_name.clone());
            }
            // The action is implicit for an action config's flag sets.
            let mut sets = Vec::with_capacity(flag_sets.len());
            for flag_set in flag_sets {
                if !flag_set.actions.is_empty() {
                    return Err(Error::InvalidConfiguration(format!(
                        "action config '{config_name}' specifies actions; an action config's \
                         flag sets automatically apply to the configured action"
                    )));
                }
                sets.push(FlagSet::with_actions(
                    flag_set,
                    BTreeSet::from([action_name.clone()]),
                )?);
            }
            let tools = tools
                .into_iter()
                .map(|tool| Tool::new(tool, crosstool_top))
                .collect();
            selectables.push(Selectable::ActionConfig(ActionConfig {
                config_name,
                action_name,
                tools,
                flag_sets: sets,
            }));
            implies_names.push(implies);
            requires_names.push(Vec::new());
            provides_names.push(Vec::new());
        }

        // Resolve the relations now that every name is registered.
        let lookup = |name: &CompactString, referencer: &CompactString| {
            by_name.get(name).copied().ok_or_else(|| {
                Error::InvalidConfiguration(format!(
                    "feature '{name}', which is referenced from feature '{referencer}', \
                     is not defined"
                ))
            })
        };

        let count = selectables.len();
        let mut implies = vec![Neighbors::new(); count];
        let mut implied_by = vec![Neighbors::new(); count];
        let mut requires = vec![Vec::new(); count];
        let mut required_by = vec![Neighbors::new(); count];
        let mut provides: BTreeMap<CompactString, Neighbors> = BTreeMap::new();

        for (index, selectable) in selectables.iter().enumerate() {
            let id = SelectableId(index as u32);
            let referencer = selectable.name();
            for implied_name in &implies_names[index] {
                let implied = lookup(implied_name, referencer)?;
                implies[index].push(implied);
                implied_by[implied.index()].push(id);
            }
            for clause_names in &requires_names[index] {
                let mut clause = Neighbors::new();
                for required_name in clause_names {
                    let required = lookup(required_name, referencer)?;
                    clause.push(required);
                    required_by[required.index()].push(id);
                }
                requires[index].push(clause);
            }
            for symbol in &provides_names[index] {
                provides.entry(symbol.clone()).or_default().push(id);
            }
        }

        // Tool gating may only reference defined selectables.
        for selectable in &selectables {
            let Selectable::ActionConfig(config) = selectable else {
                continue;
            };
            for tool in &config.tools {
                for set in tool.with_features() {
                    for name in set.referenced_names() {
                        if !by_name.contains_key(name) {
                            return Err(Error::InvalidConfiguration(format!(
                                "feature '{name}', which is referenced from a tool of action \
                                 config '{}', is not defined",
                                config.config_name
                            )));
                        }
                    }
                }
            }
        }

        Ok(ToolchainGraph {
            selectables,
            by_name,
            action_config_by_action,
            implies,
            implied_by,
            requires,
            required_by,
            provides,
            defaults,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.selectables.len()
    }

    /// Ids in declaration order.
    pub(crate) fn ids(&self) -> impl Iterator<Item = SelectableId> + '_ {
        (0..self.selectables.len()).map(|index| SelectableId(index as u32))
    }

    /// Names of every selectable, in declaration order.
    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.selectables.iter().map(|s| s.name().as_str())
    }

    pub(crate) fn selectable(&self, id: SelectableId) -> &Selectable {
        &self.selectables[id.index()]
    }

    /// The feature with the given id.
    ///
    /// # Panics
    ///
    /// * If the id refers to an action config.
    pub(crate) fn feature(&self, id: SelectableId) -> &Feature {
        match &self.selectables[id.index()] {
            Selectable::Feature(feature) => feature,
            other => panic!("programming error, selectable '{}' is not a feature", other.name()),
        }
    }

    /// The action config with the given id.
    ///
    /// # Panics
    ///
    /// * If the id refers to a feature.
    pub(crate) fn action_config(&self, id: SelectableId) -> &ActionConfig {
        match &self.selectables[id.index()] {
            Selectable::ActionConfig(config) => config,
            other => panic!(
                "programming error, selectable '{}' is not an action config",
                other.name()
            ),
        }
    }

    pub(crate) fn id_by_name(&self, name: &str) -> Option<SelectableId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn implies(&self, id: SelectableId) -> &[SelectableId] {
        &self.implies[id.index()]
    }

    pub(crate) fn implied_by(&self, id: SelectableId) -> &[SelectableId] {
        &self.implied_by[id.index()]
    }

    pub(crate) fn requires(&self, id: SelectableId) -> &[Neighbors] {
        &self.requires[id.index()]
    }

    pub(crate) fn required_by(&self, id: SelectableId) -> &[SelectableId] {
        &self.required_by[id.index()]
    }

    pub(crate) fn provides(&self) -> &BTreeMap<CompactString, Neighbors> {
        &self.provides
    }

    pub(crate) fn defaults(&self) -> &[CompactString] {
        &self.defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{FeatureSetSpec, FlagSetSpec, ToolSpec, WithFeatureSpec};

    fn feature(name: &str) -> FeatureSpec {
        FeatureSpec {
            name: name.into(),
            ..Default::default()
        }
    }

    fn build(features: Vec<FeatureSpec>, action_configs: Vec<ActionConfigSpec>) -> Result<ToolchainGraph, Error> {
        ToolchainGraph::new(features, action_configs, Path::new("/crosstool"))
    }

    #[test]
    fn smoketest_relations() {
        let mut a = feature("a");
        a.implies = vec!["b".into()];
        let mut c = feature("c");
        c.requires = vec![FeatureSetSpec {
            features: vec!["a".into(), "b".into()],
        }];
        c.provides = vec!["thing".into()];

        let graph = build(vec![a, feature("b"), c], vec![]).unwrap();
        let a_id = graph.id_by_name("a").unwrap();
        let b_id = graph.id_by_name("b").unwrap();
        let c_id = graph.id_by_name("c").unwrap();

        assert_eq!(graph.implies(a_id), [b_id]);
        assert_eq!(graph.implied_by(b_id), [a_id]);
        assert_eq!(graph.requires(c_id).len(), 1);
        assert_eq!(&graph.requires(c_id)[0][..], [a_id, b_id]);
        assert_eq!(graph.required_by(a_id), [c_id]);
        assert_eq!(graph.required_by(b_id), [c_id]);
        assert_eq!(&graph.provides()["thing"][..], [c_id]);
    }

    #[test]
    fn duplicate_selectable_names_are_rejected() {
        let err = build(vec![feature("x"), feature("x")], vec![]).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfiguration(
                "feature or action config 'x' was specified multiple times".to_string()
            ),
        );
    }

    #[test]
    fn duplicate_action_names_are_rejected() {
        let config = |name: &str| ActionConfigSpec {
            config_name: name.into(),
            action_name: "compile".into(),
            ..Default::default()
        };
        let err = build(vec![], vec![config("one"), config("two")]).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfiguration("multiple action configs for action 'compile'".to_string()),
        );
    }

    #[test]
    fn undefined_references_are_rejected() {
        let mut a = feature("a");
        a.implies = vec!["ghost".into()];
        assert!(build(vec![a], vec![]).is_err());

        let mut b = feature("b");
        b.requires = vec![FeatureSetSpec {
            features: vec!["ghost".into()],
        }];
        assert!(build(vec![b], vec![]).is_err());
    }

    #[test]
    fn undefined_tool_feature_reference_is_rejected() {
        let config = ActionConfigSpec {
            config_name: "link".into(),
            action_name: "link".into(),
            tools: vec![ToolSpec {
                tool_path: "bin/ld".to_string(),
                with_features: vec![WithFeatureSpec {
                    features: vec!["ghost".into()],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(build(vec![], vec![config]).is_err());
    }

    #[test]
    fn action_config_flag_sets_must_not_list_actions() {
        let config = ActionConfigSpec {
            config_name: "compile".into(),
            action_name: "c-compile".into(),
            flag_sets: vec![FlagSetSpec {
                actions: vec!["c-compile".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(build(vec![], vec![config]).is_err());
    }

    #[test]
    fn defaults_keep_declaration_order() {
        let mut b = feature("b");
        b.enabled = true;
        let mut a = feature("a");
        a.enabled = true;
        let config = ActionConfigSpec {
            config_name: "link".into(),
            action_name: "link".into(),
            enabled: true,
            ..Default::default()
        };
        let graph = build(vec![b, a], vec![config]).unwrap();
        assert_eq!(graph.defaults(), ["b", "a", "link"]);
    }
}
