//! The expandable tree: flags, flag groups, flag sets, and env sets.
//!
//! Every node exposes the same contract: expand against a variable scope,
//! appending to the output being built. Guards are the only way a node may
//! silently contribute nothing; a reference to an unavailable variable inside
//! an expanded node is an error.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use xt_vars::{ArtifactExpander, Scope, Template, VarError};

use crate::defs::{EnvSetSpec, FlagGroupSpec, FlagSetSpec, ToolSpec, WithFeatureSpec};
use crate::Error;

/// A positive/negative feature-name matcher gating flag sets, env sets, and
/// tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WithFeatureSet {
    /// Every listed feature must be enabled.
    features: BTreeSet<CompactString>,
    /// No listed feature may be enabled.
    not_features: BTreeSet<CompactString>,
}

impl WithFeatureSet {
    pub(crate) fn new(spec: WithFeatureSpec) -> WithFeatureSet {
        WithFeatureSet {
            features: spec.features.into_iter().collect(),
            not_features: spec.not_features.into_iter().collect(),
        }
    }

    /// Names referenced by this matcher, for validation.
    pub(crate) fn referenced_names(&self) -> impl Iterator<Item = &CompactString> {
        self.features.iter().chain(self.not_features.iter())
    }

    fn satisfied(&self, enabled: &BTreeSet<CompactString>) -> bool {
        self.features.iter().all(|name| enabled.contains(name))
            && !self.not_features.iter().any(|name| enabled.contains(name))
    }
}

/// Whether at least one matcher is satisfied. An empty list always matches.
pub(crate) fn with_features_satisfied(
    sets: &[WithFeatureSet],
    enabled: &BTreeSet<CompactString>,
) -> bool {
    sets.is_empty() || sets.iter().any(|set| set.satisfied(enabled))
}

/// A node of the flag tree: a single flag or a nested group.
///
/// A flag contributes exactly one argument, the concatenation of its chunk
/// expansions. The single-chunk case is the common one; [`Template`] keeps
/// its chunks inline so it needs no separate representation.
#[derive(Debug, Clone)]
pub(crate) enum Expandable {
    Flag(Template),
    Group(FlagGroup),
}

impl Expandable {
    fn expand(
        &self,
        scope: &Scope<'_>,
        expander: Option<&dyn ArtifactExpander>,
        out: &mut Vec<String>,
    ) -> Result<(), VarError> {
        match self {
            Expandable::Flag(template) => {
                out.push(template.expand(scope)?);
                Ok(())
            }
            Expandable::Group(group) => group.expand(scope, expander, out),
        }
    }
}

/// An ordered group of flags or nested groups, with expansion guards and
/// optional iteration over a sequence variable.
#[derive(Debug, Clone)]
pub(crate) struct FlagGroup {
    /// Children in declaration order, either all flags or all groups.
    children: Vec<Expandable>,
    /// Sequence variable to iterate; children expand once per element with
    /// this name bound to the element.
    iterate_over: Option<CompactString>,
    expand_if_all_available: BTreeSet<CompactString>,
    expand_if_none_available: BTreeSet<CompactString>,
    expand_if_true: Option<CompactString>,
    expand_if_false: Option<CompactString>,
    expand_if_equal: Option<(CompactString, String)>,
}

impl FlagGroup {
    pub(crate) fn new(spec: FlagGroupSpec) -> Result<FlagGroup, Error> {
        // If both flags and nested groups were allowed the declared order
        // between them could not be preserved.
        if !spec.flags.is_empty() && !spec.flag_groups.is_empty() {
            return Err(Error::InvalidConfiguration(
                "a flag group must not contain both a flag and another flag group".to_string(),
            ));
        }
        let mut children = Vec::with_capacity(spec.flags.len() + spec.flag_groups.len());
        for flag in &spec.flags {
            children.push(Expandable::Flag(Template::parse(flag)?));
        }
        for group in spec.flag_groups {
            children.push(Expandable::Group(FlagGroup::new(group)?));
        }
        Ok(FlagGroup {
            children,
            iterate_over: spec.iterate_over,
            expand_if_all_available: spec.expand_if_all_available.into_iter().collect(),
            expand_if_none_available: spec.expand_if_none_available.into_iter().collect(),
            expand_if_true: spec.expand_if_true,
            expand_if_false: spec.expand_if_false,
            expand_if_equal: spec.expand_if_equal.map(|eq| (eq.variable, eq.value)),
        })
    }

    /// Evaluate the expansion guards. The first unsatisfied guard rejects.
    fn can_be_expanded(&self, scope: &Scope<'_>) -> Result<bool, VarError> {
        for name in &self.expand_if_all_available {
            if !scope.is_available(name) {
                return Ok(false);
            }
        }
        for name in &self.expand_if_none_available {
            if scope.is_available(name) {
                return Ok(false);
            }
        }
        if let Some(name) = &self.expand_if_true {
            if !scope.is_available(name) || !scope.is_truthy(name)? {
                return Ok(false);
            }
        }
        if let Some(name) = &self.expand_if_false {
            if !scope.is_available(name) || scope.is_truthy(name)? {
                return Ok(false);
            }
        }
        if let Some((name, value)) = &self.expand_if_equal {
            if !scope.is_available(name) || scope.get_string(name)? != *value {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn expand(
        &self,
        scope: &Scope<'_>,
        expander: Option<&dyn ArtifactExpander>,
        out: &mut Vec<String>,
    ) -> Result<(), VarError> {
        if !self.can_be_expanded(scope)? {
            return Ok(());
        }
        if let Some(sequence) = &self.iterate_over {
            // One full pass over the children per element. Naming a sequence
            // makes it required, so an unavailable one is an error.
            let elements = scope.get_sequence(sequence, expander)?;
            for element in elements.iter() {
                let nested = scope.derive(sequence.as_str(), element);
                for child in &self.children {
                    child.expand(&nested, expander, out)?;
                }
            }
        } else {
            for child in &self.children {
                child.expand(scope, expander, out)?;
            }
        }
        Ok(())
    }
}

/// Flag groups applied to a set of actions, gated by variable availability
/// and enabled features.
#[derive(Debug, Clone)]
pub(crate) struct FlagSet {
    actions: BTreeSet<CompactString>,
    expand_if_all_available: BTreeSet<CompactString>,
    with_features: Vec<WithFeatureSet>,
    flag_groups: Vec<FlagGroup>,
}

impl FlagSet {
    /// Build from a record, taking the action set from the record itself.
    pub(crate) fn new(spec: FlagSetSpec) -> Result<FlagSet, Error> {
        let actions = spec.actions.iter().cloned().collect();
        FlagSet::with_actions(spec, actions)
    }

    /// Build from a record with an overriding action set. Used by action
    /// configs, where the action is implicit.
    pub(crate) fn with_actions(
        spec: FlagSetSpec,
        actions: BTreeSet<CompactString>,
    ) -> Result<FlagSet, Error> {
        let flag_groups = spec
            .flag_groups
            .into_iter()
            .map(FlagGroup::new)
            .collect::<Result<_, _>>()?;
        Ok(FlagSet {
            actions,
            expand_if_all_available: spec.expand_if_all_available.into_iter().collect(),
            with_features: spec
                .with_features
                .into_iter()
                .map(WithFeatureSet::new)
                .collect(),
            flag_groups,
        })
    }

    /// Append the flags that apply to `action` to `out`.
    pub(crate) fn expand_command_line(
        &self,
        action: &str,
        scope: &Scope<'_>,
        enabled: &BTreeSet<CompactString>,
        expander: Option<&dyn ArtifactExpander>,
        out: &mut Vec<String>,
    ) -> Result<(), VarError> {
        for name in &self.expand_if_all_available {
            if !scope.is_available(name) {
                return Ok(());
            }
        }
        if !with_features_satisfied(&self.with_features, enabled) {
            return Ok(());
        }
        if !self.actions.contains(action) {
            return Ok(());
        }
        for group in &self.flag_groups {
            group.expand(scope, expander, out)?;
        }
        Ok(())
    }
}

/// A single environment key with a value template.
#[derive(Debug, Clone)]
struct EnvEntry {
    key: CompactString,
    value: Template,
}

/// Environment entries applied to a set of actions.
#[derive(Debug, Clone)]
pub(crate) struct EnvSet {
    actions: BTreeSet<CompactString>,
    entries: Vec<EnvEntry>,
    with_features: Vec<WithFeatureSet>,
}

impl EnvSet {
    pub(crate) fn new(spec: EnvSetSpec) -> Result<EnvSet, Error> {
        let entries = spec
            .env_entries
            .into_iter()
            .map(|entry| {
                Ok(EnvEntry {
                    key: entry.key,
                    value: Template::parse(&entry.value)?,
                })
            })
            .collect::<Result<_, Error>>()?;
        Ok(EnvSet {
            actions: spec.actions.into_iter().collect(),
            entries,
            with_features: spec
                .with_features
                .into_iter()
                .map(WithFeatureSet::new)
                .collect(),
        })
    }

    /// Add the key/value pairs that apply to `action` to `out`.
    pub(crate) fn expand_environment(
        &self,
        action: &str,
        scope: &Scope<'_>,
        enabled: &BTreeSet<CompactString>,
        out: &mut Environment,
    ) -> Result<(), Error> {
        if !self.actions.contains(action) {
            return Ok(());
        }
        if !with_features_satisfied(&self.with_features, enabled) {
            return Ok(());
        }
        for entry in &self.entries {
            let value = entry.value.expand(scope)?;
            out.insert(entry.key.clone(), value)?;
        }
        Ok(())
    }
}

/// An ordered environment mapping.
///
/// Entries keep insertion order. A key may only be written once per
/// expansion; a second write is a configuration mistake and is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    entries: Vec<(CompactString, String)>,
}

impl Environment {
    fn insert(&mut self, key: CompactString, value: String) -> Result<(), Error> {
        if self.entries.iter().any(|(existing, _)| *existing == key) {
            return Err(Error::InvalidConfiguration(format!(
                "environment key '{key}' is written by more than one enabled feature"
            )));
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// The value for `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Key/value pairs, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An executable bound to an action config, with execution requirements and
/// the feature sets it is valid under.
#[derive(Debug, Clone)]
pub struct Tool {
    path: PathBuf,
    execution_requirements: BTreeSet<CompactString>,
    with_features: Vec<WithFeatureSet>,
}

impl Tool {
    pub(crate) fn new(spec: ToolSpec, crosstool_top: &Path) -> Tool {
        Tool {
            path: crosstool_top.join(&spec.tool_path),
            execution_requirements: spec.execution_requirements.into_iter().collect(),
            with_features: spec
                .with_features
                .into_iter()
                .map(WithFeatureSet::new)
                .collect(),
        }
    }

    /// Path to the executable, resolved against the toolchain root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Requirement hints that apply to executions of this tool.
    pub fn execution_requirements(&self) -> impl Iterator<Item = &str> {
        self.execution_requirements.iter().map(|req| req.as_str())
    }

    pub(crate) fn with_features(&self) -> &[WithFeatureSet] {
        &self.with_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::VariableWithValueSpec;
    use xt_vars::Variables;

    fn names(values: &[&str]) -> Vec<CompactString> {
        values.iter().map(|name| CompactString::new(name)).collect()
    }

    fn enabled(values: &[&str]) -> BTreeSet<CompactString> {
        values.iter().map(|name| CompactString::new(name)).collect()
    }

    fn group(spec: FlagGroupSpec) -> FlagGroup {
        FlagGroup::new(spec).unwrap()
    }

    fn expand_group(group: &FlagGroup, vars: &Variables) -> Vec<String> {
        let mut out = Vec::new();
        group.expand(&vars.scope(), None, &mut out).unwrap();
        out
    }

    #[test]
    fn with_features_empty_list_matches() {
        assert!(with_features_satisfied(&[], &enabled(&["anything"])));
    }

    #[test]
    fn with_features_positive_and_negative() {
        let set = WithFeatureSet::new(WithFeatureSpec {
            features: names(&["a", "b"]),
            not_features: names(&["c"]),
        });

        assert!(set.satisfied(&enabled(&["a", "b"])));
        assert!(!set.satisfied(&enabled(&["a"])));
        assert!(!set.satisfied(&enabled(&["a", "b", "c"])));
        // Any one satisfied matcher is enough.
        let other = WithFeatureSet::new(WithFeatureSpec {
            features: names(&["z"]),
            not_features: vec![],
        });
        assert!(with_features_satisfied(
            &[other, set],
            &enabled(&["a", "b"]),
        ));
    }

    #[test]
    fn mixing_flags_and_groups_is_rejected() {
        let err = FlagGroup::new(FlagGroupSpec {
            flags: vec!["-a".to_string()],
            flag_groups: vec![FlagGroupSpec::default()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn smoketest_group_expansion() {
        let group = group(FlagGroupSpec {
            flags: vec!["-c".to_string(), "-o".to_string(), "%{out}".to_string()],
            ..Default::default()
        });
        let mut vars = Variables::new();
        vars.set("out", "main.o");
        assert_eq!(expand_group(&group, &vars), ["-c", "-o", "main.o"]);
    }

    #[test]
    fn guards_reject_before_iteration() {
        let group = group(FlagGroupSpec {
            flags: vec!["-x".to_string()],
            iterate_over: Some("paths".into()),
            expand_if_all_available: names(&["opt"]),
            ..Default::default()
        });
        // The guard rejects, so the missing sequence is never touched.
        let vars = Variables::new();
        assert_eq!(expand_group(&group, &vars), Vec::<String>::new());
    }

    #[test]
    fn named_iteration_sequence_is_required() {
        let group = group(FlagGroupSpec {
            flags: vec!["-x".to_string()],
            iterate_over: Some("paths".into()),
            ..Default::default()
        });
        let vars = Variables::new();
        let mut out = Vec::new();
        assert!(group.expand(&vars.scope(), None, &mut out).is_err());
    }

    #[test]
    fn expand_if_equal_compares_strings() {
        let group = group(FlagGroupSpec {
            flags: vec!["-shared".to_string()],
            expand_if_equal: Some(VariableWithValueSpec {
                variable: "mode".into(),
                value: "dynamic".to_string(),
            }),
            ..Default::default()
        });

        let mut vars = Variables::new();
        vars.set("mode", "dynamic");
        assert_eq!(expand_group(&group, &vars), ["-shared"]);

        let mut vars = Variables::new();
        vars.set("mode", "static");
        assert_eq!(expand_group(&group, &vars), Vec::<String>::new());

        // Unavailable rejects rather than errors.
        let vars = Variables::new();
        assert_eq!(expand_group(&group, &vars), Vec::<String>::new());
    }

    #[test]
    fn nested_iteration_preserves_order() {
        let group = group(FlagGroupSpec {
            flag_groups: vec![FlagGroupSpec {
                flags: vec!["-L%{dirs}".to_string(), "-R%{dirs}".to_string()],
                ..Default::default()
            }],
            iterate_over: Some("dirs".into()),
            ..Default::default()
        });
        let mut vars = Variables::new();
        vars.set("dirs", vec!["x", "y"]);
        // One full pass of the children per element.
        assert_eq!(expand_group(&group, &vars), ["-Lx", "-Rx", "-Ly", "-Ry"]);
    }

    #[test]
    fn flag_set_filters_by_action() {
        let flag_set = FlagSet::new(FlagSetSpec {
            actions: names(&["c-compile"]),
            flag_groups: vec![FlagGroupSpec {
                flags: vec!["-Wall".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        })
        .unwrap();

        let vars = Variables::new();
        let mut out = Vec::new();
        flag_set
            .expand_command_line("c-compile", &vars.scope(), &enabled(&[]), None, &mut out)
            .unwrap();
        assert_eq!(out, ["-Wall"]);

        let mut out = Vec::new();
        flag_set
            .expand_command_line("link", &vars.scope(), &enabled(&[]), None, &mut out)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn environment_rejects_duplicate_keys() {
        let mut env = Environment::default();
        env.insert("PATH".into(), "/bin".to_string()).unwrap();
        assert!(env.insert("PATH".into(), "/usr/bin".to_string()).is_err());
        assert_eq!(env.get("PATH"), Some("/bin"));
    }

    #[test]
    fn environment_keeps_insertion_order() {
        let mut env = Environment::default();
        env.insert("Z".into(), "1".to_string()).unwrap();
        env.insert("A".into(), "2".to_string()).unwrap();
        let keys: Vec<_> = env.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["Z", "A"]);
    }

    #[test]
    fn tool_path_is_resolved_against_the_toolchain_root() {
        let tool = Tool::new(
            ToolSpec {
                tool_path: "bin/gcc".to_string(),
                execution_requirements: names(&["requires-darwin"]),
                with_features: vec![],
            },
            Path::new("/crosstool"),
        );
        assert_eq!(tool.path(), Path::new("/crosstool/bin/gcc"));
        assert_eq!(
            tool.execution_requirements().collect::<Vec<_>>(),
            ["requires-darwin"],
        );
    }
}
