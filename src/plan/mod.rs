//! Calculation plans.
//!
//! A [`Plan`] is a validated graph of named [`Calc`] nodes. All static
//! analysis happens once, when the plan is built:
//!
//! * defaults declared by different nodes are unified,
//! * the transitive closure of every name's dependencies is computed and
//!   cycles are rejected,
//! * eager nodes are grouped by the afferents that trigger them.
//!
//! Plans are immutable. Every edit (`using`, `without`, `rename`, ...)
//! rebuilds a brand-new plan from the edited node set, so the checks above
//! are repeated on every edit.

mod analysis;
mod render;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::calc::Calc;
use crate::core::{Assignment, Name, Translation, Value};
use crate::error::{Error, KeyError, MissingParameterError, Result};
use crate::imap::IMap;

use self::analysis::{Analysis, Nodes, analyze};

/// An analysed, validated graph of calculation nodes.
///
/// Plans are cheap to clone, clones share the same analysed graph.
///
/// ```rust
/// use calcgraph::{Name, Plan};
///
/// let plan = Plan::builder()
///     .function("y", ["x"], |args: &[i64]| Ok(args[0] + 1))
///     .function("z", ["y"], |args: &[i64]| Ok(args[0] * 10))
///     .build()
///     .unwrap();
///
/// assert_eq!(plan.afferents(), &[Name::from("x")]);
///
/// let imap = plan.apply([("x", 1)]).unwrap();
/// assert_eq!(imap.get("z").unwrap(), 20);
/// ```
pub struct Plan<V = serde_json::Value>(Arc<PlanData<V>>);

struct PlanData<V> {
    nodes: Nodes<V>,
    analysis: Analysis<V>,
}

impl<V> Clone for Plan<V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<V: Value> Plan<V> {
    /// Builds a plan out of named nodes.
    ///
    /// Node names only identify nodes for later edits, they play no part in
    /// evaluation.
    pub fn new<I, K>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Calc<V>)>,
        K: Into<Name>,
    {
        Self::from_nodes(
            nodes
                .into_iter()
                .map(|(k, v)| (Into::<Name>::into(k), v))
                .collect(),
        )
    }

    /// Starts a builder which merges plans and nodes left-to-right.
    pub fn builder() -> PlanBuilder<V> {
        PlanBuilder::new()
    }

    fn from_nodes(nodes: Nodes<V>) -> Result<Self> {
        let analysis = analyze(&nodes)?;
        Ok(Self(Arc::new(PlanData { nodes, analysis })))
    }

    /// Whether both handles point at the same analysed graph.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn nodes(&self) -> &im::OrdMap<Name, Calc<V>> {
        &self.0.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Calc<V>> {
        self.0.nodes.get(name)
    }

    /// The true external inputs of the plan, in name order.
    pub fn afferents(&self) -> &[Name] {
        &self.0.analysis.afferents
    }

    pub fn is_afferent(&self, name: &str) -> bool {
        self.0.analysis.afferents.iter().any(|n| &**n == name)
    }

    /// Every value computed by some node of the plan, in name order.
    pub fn efferents(&self) -> impl Iterator<Item = &Name> {
        self.0.analysis.efferents.keys()
    }

    pub fn is_efferent(&self, name: &str) -> bool {
        self.0.analysis.efferents.contains_key(name)
    }

    /// Name of the node that computes the given value.
    pub fn owner(&self, efferent: &str) -> Option<&Name> {
        self.0.analysis.efferents.get(efferent)
    }

    /// The node that computes the given value.
    pub fn producer(&self, efferent: &str) -> Option<&Calc<V>> {
        self.owner(efferent).and_then(|node| self.0.nodes.get(node))
    }

    /// Defaults unified over all nodes.
    pub fn defaults(&self) -> &Assignment<V> {
        &self.0.analysis.defaults
    }

    /// Every name the given name transitively depends on.
    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<Name>> {
        self.0.analysis.dependencies.get(name)
    }

    /// Every name that transitively depends on the given name.
    pub fn dependants(&self, name: &str) -> Option<&BTreeSet<Name>> {
        self.0.analysis.dependants.get(name)
    }

    /// Names of the eager nodes triggered by a change of the given afferent.
    pub fn proactive_dependants(&self, afferent: &str) -> Option<&BTreeSet<Name>> {
        self.0.analysis.proactive.get(afferent)
    }

    /// Names of the eager nodes run once when an instance is created.
    pub fn initializers(&self) -> &[Name] {
        &self.0.analysis.initializers
    }

    /// Instantiates the plan.
    ///
    /// The given values are merged over the plan's defaults and must cover
    /// every afferent. Values for names which are not afferents are
    /// rejected.
    pub fn apply<I, K>(&self, values: I) -> Result<IMap<V>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Name>,
    {
        let supplied: Assignment<V> = crate::core::merge([values]);

        if let Some(key) = supplied.keys().find(|key| !self.is_afferent(key)) {
            return Err(KeyError::NotAfferent(key.clone()).into());
        }

        let mut afferents = Assignment::new();

        for name in self.afferents() {
            let value = supplied
                .get(name)
                .or_else(|| self.defaults().get(name))
                .cloned()
                .ok_or_else(|| MissingParameterError(name.clone()))?;

            afferents.insert(name.clone(), value);
        }

        IMap::create(self.clone(), afferents)
    }

    /// Returns a new plan in which the given nodes are added or replaced.
    pub fn using<I, K>(&self, nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Calc<V>)>,
        K: Into<Name>,
    {
        let mut next = self.0.nodes.clone();
        for (name, calc) in nodes {
            next.insert(name.into(), calc);
        }

        Self::from_nodes(next)
    }

    /// Returns a new plan without the given nodes.
    pub fn without<I, K>(&self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
    {
        let mut next = self.0.nodes.clone();
        for name in names {
            let name: Name = name.into();
            if next.remove(&name).is_none() {
                return Err(KeyError::NoSuchNode(name).into());
            }
        }

        Self::from_nodes(next)
    }

    /// Returns a new plan in which every node uses the given defaults.
    pub fn using_defaults<I, K>(&self, defaults: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Name>,
    {
        let defaults: Vec<(Name, V)> = defaults.into_iter().map(|(k, v)| (k.into(), v)).collect();

        self.map_nodes(|calc| Ok(calc.using_defaults(defaults.iter().cloned())))
    }

    /// Returns a new plan in which the given names have no default value.
    pub fn without_defaults<I, K>(&self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
    {
        let names: Vec<Name> = names.into_iter().map(Into::into).collect();

        self.map_nodes(|calc| Ok(calc.without_defaults(names.iter().cloned())))
    }

    /// Returns an isomorphic plan in which afferents and efferents of every
    /// node have been renamed.
    pub fn rename<I, A, B>(&self, translation: I) -> Result<Self>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<Name>,
        B: Into<Name>,
    {
        self.rename_with(&crate::core::translation(translation))
    }

    pub(crate) fn rename_with(&self, tr: &Translation) -> Result<Self> {
        self.map_nodes(|calc| Ok(calc.rename_with(tr)?))
    }

    fn map_nodes<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&Calc<V>) -> Result<Calc<V>>,
    {
        let nodes = self
            .0
            .nodes
            .iter()
            .map(|(name, calc)| Ok((name.clone(), f(calc)?)))
            .collect::<Result<Nodes<V>>>()?;

        Self::from_nodes(nodes)
    }
}

impl<V: Debug> Debug for Plan<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("nodes", &self.0.nodes)
            .field("afferents", &self.0.analysis.afferents)
            .field("efferents", &self.0.analysis.efferents)
            .finish()
    }
}

/// Collects nodes from several sources into a [`Plan`].
///
/// Sources are merged left-to-right: a node added later replaces an earlier
/// node with the same name.
pub struct PlanBuilder<V> {
    nodes: Nodes<V>,
    error: Option<Error>,
}

impl<V: Value> PlanBuilder<V> {
    fn new() -> Self {
        Self {
            nodes: Nodes::new(),
            error: None,
        }
    }

    /// Adds every node of an existing plan.
    pub fn plan(mut self, plan: &Plan<V>) -> Self {
        for (name, calc) in plan.nodes() {
            self.nodes.insert(name.clone(), calc.clone());
        }
        self
    }

    pub fn calc(mut self, name: impl Into<Name>, calc: Calc<V>) -> Self {
        self.nodes.insert(name.into(), calc);
        self
    }

    pub fn calcs<I, K>(self, nodes: I) -> Self
    where
        I: IntoIterator<Item = (K, Calc<V>)>,
        K: Into<Name>,
    {
        nodes
            .into_iter()
            .fold(self, |builder, (name, calc)| builder.calc(name, calc))
    }

    /// Adds a bare function as a lazy node with a single output named after
    /// the node itself.
    pub fn function<I, K, F>(mut self, name: impl Into<Name>, params: I, function: F) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
        F: Fn(&[V]) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        let name = name.into();

        match Calc::def().params(params).single(name.clone(), function) {
            Ok(calc) => self.calc(name, calc),
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(err.into());
                }
                self
            }
        }
    }

    pub fn build(self) -> Result<Plan<V>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        Plan::from_nodes(self.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DefinitionError, GraphError};
    use serde_json::{Value as Json, json};

    fn int(value: &Json) -> anyhow::Result<i64> {
        value
            .as_i64()
            .ok_or_else(|| anyhow::anyhow!("expected integer, got {value}"))
    }

    fn chain() -> Plan {
        Plan::builder()
            .function("y", ["x"], |args: &[Json]| Ok(json!(int(&args[0])? + 1)))
            .function("z", ["y"], |args: &[Json]| Ok(json!(int(&args[0])? * 2)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_plan_closure() {
        let plan = chain();

        assert_eq!(plan.afferents(), &[Name::from("x")]);
        let deps: Vec<&str> = plan.dependencies("z").unwrap().iter().map(|n| &**n).collect();
        assert_eq!(deps, vec!["x", "y"]);
        assert!(plan.is_efferent("y"));
        assert!(plan.is_efferent("z"));
        assert!(!plan.is_efferent("x"));
        assert_eq!(plan.owner("z").map(|n| &**n), Some("z"));
    }

    #[test]
    fn test_cycle_fails_construction() {
        let err = Plan::<Json>::builder()
            .function("x", ["y"], |args: &[Json]| Ok(args[0].clone()))
            .function("y", ["x"], |args: &[Json]| Ok(args[0].clone()))
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::Graph(GraphError::Cycle(_))));
    }

    #[test]
    fn test_default_conflict_fails_construction() {
        let a = Calc::def()
            .param_default("rate", json!(1))
            .single("a", |args: &[Json]| Ok(args[0].clone()))
            .unwrap();
        let b = Calc::def()
            .param_default("rate", json!(2))
            .single("b", |args: &[Json]| Ok(args[0].clone()))
            .unwrap();

        let err = Plan::new([("a", a), ("b", b)]).unwrap_err();
        assert!(matches!(
            err,
            Error::Graph(GraphError::ConflictingDefaults { .. })
        ));
    }

    #[test]
    fn test_builder_reports_definition_error() {
        let err = Plan::<Json>::builder()
            .function("x", ["x"], |args: &[Json]| Ok(args[0].clone()))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Definition(DefinitionError::Overlap(_))
        ));
    }

    #[test]
    fn test_builder_merges_left_to_right() {
        let base = chain();
        let plan = Plan::builder()
            .plan(&base)
            .function("z", ["y"], |args: &[Json]| Ok(json!(int(&args[0])? * 100)))
            .build()
            .unwrap();

        let imap = plan.apply([("x", json!(1))]).unwrap();
        assert_eq!(imap.get("z").unwrap(), json!(200));

        // a later plan overrides nodes added before it
        let plan = Plan::builder()
            .function("z", ["y"], |_: &[Json]| Ok(json!(0)))
            .plan(&base)
            .build()
            .unwrap();
        let imap = plan.apply([("x", json!(1))]).unwrap();
        assert_eq!(imap.get("z").unwrap(), json!(4));
    }

    #[test]
    fn test_builder_later_plan_wins_over_larger_builder() {
        let base = Plan::<Json>::builder()
            .function("z", ["y"], |_: &[Json]| Ok(json!(999)))
            .build()
            .unwrap();

        let plan = Plan::builder()
            .function("y", ["x"], |args: &[Json]| Ok(json!(int(&args[0])? + 1)))
            .function("z", ["y"], |_: &[Json]| Ok(json!(0)))
            .function("q", ["x"], |args: &[Json]| Ok(args[0].clone()))
            .plan(&base)
            .build()
            .unwrap();

        assert_eq!(plan.nodes().len(), 3);
        let imap = plan.apply([("x", json!(1))]).unwrap();
        assert_eq!(imap.get("z").unwrap(), json!(999));
    }

    #[test]
    fn test_apply_requires_full_assignment() {
        let plan = chain();

        let err = plan.apply(Vec::<(&str, Json)>::new()).unwrap_err();
        assert!(matches!(err, Error::MissingParameter(_)));

        let err = plan.apply([("x", json!(1)), ("q", json!(2))]).unwrap_err();
        assert!(matches!(err, Error::Key(KeyError::NotAfferent(ref k)) if &**k == "q"));

        let err = plan.apply([("y", json!(1))]).unwrap_err();
        assert!(matches!(err, Error::Key(KeyError::NotAfferent(_))));
    }

    #[test]
    fn test_apply_uses_defaults() {
        let plan = chain().using_defaults([("x", json!(10))]).unwrap();

        assert_eq!(plan.defaults().get("x"), Some(&json!(10)));
        let imap = plan.apply(Vec::<(&str, Json)>::new()).unwrap();
        assert_eq!(imap.get("z").unwrap(), json!(22));

        let stripped = plan.without_defaults(["x"]).unwrap();
        assert!(stripped.defaults().is_empty());
        assert!(stripped.apply(Vec::<(&str, Json)>::new()).is_err());
    }

    #[test]
    fn test_using_and_without_nodes() {
        let plan = chain();

        let double = Calc::def()
            .param("x")
            .single("y", |args: &[Json]| Ok(json!(int(&args[0])? * 3)))
            .unwrap();
        let replaced = plan.using([("y", double)]).unwrap();
        let imap = replaced.apply([("x", json!(2))]).unwrap();
        assert_eq!(imap.get("z").unwrap(), json!(12));

        // dropping the producer of `y` turns it into an afferent
        let dropped = plan.without(["y"]).unwrap();
        assert_eq!(dropped.afferents(), &[Name::from("y")]);

        let err = plan.without(["nope"]).unwrap_err();
        assert!(matches!(err, Error::Key(KeyError::NoSuchNode(_))));

        // the source plan is untouched
        assert_eq!(plan.afferents(), &[Name::from("x")]);
        assert_eq!(plan.nodes().len(), 2);
    }

    #[test]
    fn test_rename_round_trip() {
        let plan = chain();
        let renamed = plan.rename([("x", "x2")]).unwrap();

        assert_eq!(renamed.afferents(), &[Name::from("x2")]);

        let before = plan.apply([("x", json!(5))]).unwrap();
        let translated = renamed.apply([("x2", json!(5))]).unwrap();

        for key in ["y", "z"] {
            assert_eq!(before.get(key).unwrap(), translated.get(key).unwrap());
        }
    }

    #[test]
    fn test_edits_revalidate() {
        let plan = chain();
        let back = Calc::def()
            .param("z")
            .single("x", |args: &[Json]| Ok(args[0].clone()))
            .unwrap();

        let err = plan.using([("x", back)]).unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::Cycle(_))));
    }

    #[test]
    fn test_plan_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Plan>();
        assert_send_sync::<Calc>();
    }
}
