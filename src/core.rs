use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Atomic reference-counted string type used for afferent and efferent names.
pub type Name = Arc<str>;

/// Persistent mapping from names to values.
///
/// Every derivation in the crate (`using`, `without`, `rename`) produces a new
/// assignment which shares the unmodified parts of the old one, so the cost of
/// an edit tracks the size of the change rather than the size of the map.
pub type Assignment<V> = im::OrdMap<Name, V>;

/// Opaque metadata attached to a [`Calc`](crate::Calc). The engine never reads it.
pub type Meta = im::OrdMap<Name, serde_json::Value>;

/// Name-to-name mapping used when renaming afferents and efferents.
pub type Translation = BTreeMap<Name, Name>;

/// Anything that can flow through a computation graph.
///
/// Values must be comparable so that default values declared by different
/// nodes can be unified, and cloneable so that cached results can be handed
/// out without holding the cache lock.
pub trait Value: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Merges an ordered sequence of mapping-like sources into one assignment.
///
/// Sources are collapsed left-to-right, entries from later sources overwrite
/// entries from earlier ones.
///
/// ```rust
/// use calcgraph::merge;
///
/// let merged = merge([vec![("a", 1), ("b", 2)], vec![("b", 3)]]);
/// assert_eq!(merged.get("a"), Some(&1));
/// assert_eq!(merged.get("b"), Some(&3));
/// ```
pub fn merge<V, I, S, K>(sources: I) -> Assignment<V>
where
    V: Clone,
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = (K, V)>,
    K: Into<Name>,
{
    let mut acc = Assignment::new();

    for source in sources {
        for (key, value) in source {
            acc.insert(key.into(), value);
        }
    }

    acc
}

/// Builds a [`Translation`] from any sequence of `(from, to)` pairs.
pub(crate) fn translation<I, A, B>(pairs: I) -> Translation
where
    I: IntoIterator<Item = (A, B)>,
    A: Into<Name>,
    B: Into<Name>,
{
    pairs
        .into_iter()
        .map(|(from, to)| (from.into(), to.into()))
        .collect()
}

/// Looks a name up in a translation, falling back to the name itself.
pub(crate) fn translate(tr: &Translation, name: &Name) -> Name {
    tr.get(name).cloned().unwrap_or_else(|| name.clone())
}
