use std::collections::BTreeMap;
use std::fmt::Display;

use serde::Serialize;

use crate::core::Value;

use super::Plan;

/// Serializable summary of a plan, used by [`Plan::to_json`].
#[derive(Serialize)]
struct Report<'a> {
    afferents: Vec<&'a str>,
    initializers: Vec<&'a str>,
    nodes: BTreeMap<&'a str, NodeReport<'a>>,
}

#[derive(Serialize)]
struct NodeReport<'a> {
    afferents: Vec<&'a str>,
    efferents: Vec<&'a str>,
    lazy: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    defaults: Vec<&'a str>,
}

impl<V: Value> Plan<V> {
    /// Serialize the structure of the plan to a JSON string.
    ///
    /// Only names and flags are written, values and functions are not.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let nodes = self
            .nodes()
            .iter()
            .map(|(name, calc)| {
                let report = NodeReport {
                    afferents: calc.afferents().iter().map(|n| &**n).collect(),
                    efferents: calc.efferents().iter().map(|n| &**n).collect(),
                    lazy: calc.is_lazy(),
                    defaults: calc.defaults().keys().map(|n| &**n).collect(),
                };
                (&**name, report)
            })
            .collect();

        let report = Report {
            afferents: self.afferents().iter().map(|n| &**n).collect(),
            initializers: self.initializers().iter().map(|n| &**n).collect(),
            nodes,
        };

        serde_json::to_string(&report)
    }
}

fn escape(name: &str) -> String {
    name.replace('"', "#quot;")
}

/// Renders the plan as a Mermaid flowchart.
///
/// Afferents are drawn as stadiums and computed values as rectangles. Lazy
/// nodes are rhombi, eager nodes are subroutines. Every value flows into the
/// node that reads it and out of the node that produces it.
impl<V: Value> Display for Plan<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let mut values: BTreeMap<&str, usize> = BTreeMap::new();
        for name in self.afferents().iter().chain(self.efferents()) {
            let next = values.len();
            values.entry(&**name).or_insert(next);
        }

        for (name, index) in &values {
            if self.is_afferent(name) {
                writeln!(f, "    v{index}([\"{}\"])", escape(name))?;
            } else {
                writeln!(f, "    v{index}[\"{}\"]", escape(name))?;
            }
        }

        for (index, (name, calc)) in self.nodes().iter().enumerate() {
            if calc.is_lazy() {
                writeln!(f, "    n{index}{{\"{}\"}}", escape(name))?;
            } else {
                writeln!(f, "    n{index}[[\"{}\"]]", escape(name))?;
            }

            for aff in calc.afferents() {
                if let Some(source) = values.get(&**aff) {
                    writeln!(f, "    v{source} --> n{index}")?;
                }
            }

            for eff in calc.efferents() {
                if let Some(target) = values.get(&**eff) {
                    writeln!(f, "    n{index} --> v{target}")?;
                }
            }
        }

        Ok(())
    }
}
