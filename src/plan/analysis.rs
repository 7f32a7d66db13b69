use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::calc::Calc;
use crate::core::{Assignment, Name, Value};
use crate::error::GraphError;

pub(crate) type Nodes<V> = im::OrdMap<Name, Calc<V>>;

/// Everything a plan knows about its graph after construction.
#[derive(Debug, Clone)]
pub(crate) struct Analysis<V> {
    /// True external inputs, consumed by some node and produced by none.
    pub afferents: Vec<Name>,
    /// Output name to the name of the node that owns it.
    pub efferents: BTreeMap<Name, Name>,
    pub defaults: Assignment<V>,
    /// Name to every name it transitively depends on.
    pub dependencies: BTreeMap<Name, BTreeSet<Name>>,
    /// Name to every name that transitively depends on it.
    pub dependants: BTreeMap<Name, BTreeSet<Name>>,
    /// Afferent to the eager nodes that must run when it changes.
    pub proactive: BTreeMap<Name, BTreeSet<Name>>,
    /// Eager nodes which no afferent can trigger, run once per instance.
    pub initializers: Vec<Name>,
}

pub(crate) fn analyze<V: Value>(nodes: &Nodes<V>) -> Result<Analysis<V>, GraphError> {
    let defaults = unify_defaults(nodes)?;

    let mut direct: BTreeMap<Name, BTreeSet<Name>> = BTreeMap::new();
    let mut efferents = BTreeMap::new();
    let mut consumed = BTreeSet::new();

    for (node, calc) in nodes {
        consumed.extend(calc.afferents().iter().cloned());

        for eff in calc.efferents() {
            // the last producer in node order owns the name
            efferents.insert(eff.clone(), node.clone());
            direct
                .entry(eff.clone())
                .or_default()
                .extend(calc.afferents().iter().cloned());
        }
    }

    for name in &consumed {
        direct.entry(name.clone()).or_default();
    }

    let dependencies = closure(&direct)?;

    let afferents: Vec<Name> = consumed
        .into_iter()
        .filter(|name| !efferents.contains_key(name))
        .collect();

    let mut dependants: BTreeMap<Name, BTreeSet<Name>> = BTreeMap::new();
    for (name, deps) in &dependencies {
        for dep in deps {
            dependants
                .entry(dep.clone())
                .or_default()
                .insert(name.clone());
        }
    }

    let (proactive, initializers) = partition_eager(nodes, &afferents, &dependencies);

    tracing::debug!(
        nodes = nodes.len(),
        afferents = afferents.len(),
        efferents = efferents.len(),
        initializers = initializers.len(),
        "analysed plan"
    );

    Ok(Analysis {
        afferents,
        efferents,
        defaults,
        dependencies,
        dependants,
        proactive,
        initializers,
    })
}

/// Collects the defaults of all nodes into one assignment, every node has to
/// agree on the default value of a shared name.
fn unify_defaults<V: Value>(nodes: &Nodes<V>) -> Result<Assignment<V>, GraphError> {
    let mut defaults = Assignment::new();

    for calc in nodes.values() {
        for (name, value) in calc.defaults() {
            match defaults.get(name) {
                Some(existing) if existing != value => {
                    return Err(GraphError::ConflictingDefaults {
                        name: name.clone(),
                        first: format!("{existing:?}"),
                        second: format!("{value:?}"),
                    });
                }
                Some(_) => {}
                None => {
                    defaults.insert(name.clone(), value.clone());
                }
            }
        }
    }

    Ok(defaults)
}

/// Computes the transitive closure of the direct dependency sets.
///
/// The names are sorted topologically first, which both rejects cycles and
/// lets the closure be built in a single pass: by the time a name is visited
/// the closures of all of its direct dependencies are final.
fn closure(
    direct: &BTreeMap<Name, BTreeSet<Name>>,
) -> Result<BTreeMap<Name, BTreeSet<Name>>, GraphError> {
    let mut graph = DiGraphMap::<&str, ()>::new();

    for (name, deps) in direct {
        graph.add_node(&**name);
        for dep in deps {
            graph.add_edge(&**dep, &**name, ());
        }
    }

    let order =
        toposort(&graph, None).map_err(|cycle| GraphError::Cycle(cycle.node_id().into()))?;

    let mut closed: BTreeMap<Name, BTreeSet<Name>> = BTreeMap::new();

    for name in order {
        let mut acc = BTreeSet::new();

        if let Some(deps) = direct.get(name) {
            for dep in deps {
                acc.insert(dep.clone());
                if let Some(upstream) = closed.get(dep) {
                    acc.extend(upstream.iter().cloned());
                }
            }
        }

        if acc.contains(name) {
            return Err(GraphError::Cycle(name.into()));
        }

        closed.insert(name.into(), acc);
    }

    Ok(closed)
}

/// Splits eager nodes into initializers and nodes triggered by afferents.
///
/// A node is triggered by every afferent that is either one of its own
/// inputs or somewhere upstream of them. Eager nodes with no such afferent
/// can never be triggered by an update, so they run once at construction.
fn partition_eager<V: Value>(
    nodes: &Nodes<V>,
    afferents: &[Name],
    dependencies: &BTreeMap<Name, BTreeSet<Name>>,
) -> (BTreeMap<Name, BTreeSet<Name>>, Vec<Name>) {
    let inputs: BTreeSet<&Name> = afferents.iter().collect();

    let mut proactive: BTreeMap<Name, BTreeSet<Name>> = afferents
        .iter()
        .map(|name| (name.clone(), BTreeSet::new()))
        .collect();
    let mut initializers = Vec::new();

    for (node, calc) in nodes.iter().filter(|(_, calc)| !calc.is_lazy()) {
        let mut triggers = BTreeSet::new();

        for aff in calc.afferents() {
            if inputs.contains(aff) {
                triggers.insert(aff.clone());
            }
            if let Some(upstream) = dependencies.get(aff) {
                triggers.extend(upstream.iter().filter(|n| inputs.contains(n)).cloned());
            }
        }

        if triggers.is_empty() {
            initializers.push(node.clone());
            continue;
        }

        for trigger in triggers {
            proactive.entry(trigger).or_default().insert(node.clone());
        }
    }

    (proactive, initializers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(afferents: &[&str], efferents: &[&str], lazy: bool) -> Calc<i64> {
        Calc::new(
            afferents.iter().copied(),
            |_: &[i64]| Ok(crate::Output::Unit),
            efferents.iter().copied(),
            Assignment::new(),
            lazy,
        )
        .unwrap()
    }

    fn nodes(list: Vec<(&str, Calc<i64>)>) -> Nodes<i64> {
        list.into_iter().map(|(k, v)| (Name::from(k), v)).collect()
    }

    fn set(names: &[&str]) -> BTreeSet<Name> {
        names.iter().map(|n| Name::from(*n)).collect()
    }

    #[test]
    fn test_closure_chain() {
        let nodes = nodes(vec![
            ("a", node(&["x"], &["y"], true)),
            ("b", node(&["y"], &["z"], true)),
        ]);

        let analysis = analyze(&nodes).unwrap();

        assert_eq!(analysis.afferents, vec![Name::from("x")]);
        assert_eq!(analysis.dependencies["z"], set(&["x", "y"]));
        assert_eq!(analysis.dependencies["y"], set(&["x"]));
        assert!(analysis.dependencies["x"].is_empty());
        assert_eq!(&*analysis.efferents["z"], "b");
    }

    #[test]
    fn test_dependants_are_transitive() {
        let nodes = nodes(vec![
            ("a", node(&["x"], &["y"], true)),
            ("b", node(&["y"], &["z"], true)),
        ]);

        let analysis = analyze(&nodes).unwrap();

        assert_eq!(analysis.dependants["x"], set(&["y", "z"]));
        assert_eq!(analysis.dependants["y"], set(&["z"]));
        assert!(!analysis.dependants.contains_key("z"));
    }

    #[test]
    fn test_cycle_detected() {
        let nodes = nodes(vec![
            ("a", node(&["y"], &["x"], true)),
            ("b", node(&["x"], &["y"], true)),
        ]);

        assert!(matches!(analyze(&nodes), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_longer_cycle_detected() {
        let nodes = nodes(vec![
            ("a", node(&["in", "z"], &["x"], true)),
            ("b", node(&["x"], &["y"], false)),
            ("c", node(&["y"], &["z"], true)),
        ]);

        assert!(matches!(analyze(&nodes), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_multiple_producers_union() {
        let nodes = nodes(vec![
            ("a", node(&["p"], &["out"], true)),
            ("b", node(&["q"], &["out"], true)),
        ]);

        let analysis = analyze(&nodes).unwrap();

        assert_eq!(analysis.dependencies["out"], set(&["p", "q"]));
        assert_eq!(&*analysis.efferents["out"], "b");
    }

    #[test]
    fn test_conflicting_defaults() {
        let a = node(&["x"], &["y"], true).using_defaults([("x", 1)]);
        let b = node(&["x"], &["z"], true).using_defaults([("x", 2)]);

        let err = analyze(&nodes(vec![("a", a), ("b", b)])).unwrap_err();
        assert!(matches!(err, GraphError::ConflictingDefaults { ref name, .. } if &**name == "x"));
    }

    #[test]
    fn test_agreeing_defaults() {
        let a = node(&["x"], &["y"], true).using_defaults([("x", 1)]);
        let b = node(&["x"], &["z"], true).using_defaults([("x", 1)]);

        let analysis = analyze(&nodes(vec![("a", a), ("b", b)])).unwrap();
        assert_eq!(analysis.defaults.get("x"), Some(&1));
    }

    #[test]
    fn test_eager_partition() {
        let nodes = nodes(vec![
            ("init", node(&[], &["seed"], false)),
            ("lazy", node(&["x"], &["y"], true)),
            ("eager", node(&["y", "w"], &["z"], false)),
            ("derived", node(&["seed"], &["s2"], false)),
        ]);

        let analysis = analyze(&nodes).unwrap();

        assert_eq!(
            analysis.initializers,
            vec![Name::from("derived"), Name::from("init")]
        );
        assert_eq!(analysis.proactive["x"], set(&["eager"]));
        assert_eq!(analysis.proactive["w"], set(&["eager"]));
        assert_eq!(analysis.afferents, vec![Name::from("w"), Name::from("x")]);

        // produced by a node without inputs: empty closure, yet not an input
        assert!(analysis.dependencies["seed"].is_empty());
        assert_eq!(&*analysis.efferents["seed"], "init");
        assert!(!analysis.afferents.contains(&Name::from("seed")));
    }
}
