//! Calculation nodes.
//!
//! A [`Calc`] packages one pure function together with the names of the
//! values it reads (afferents) and the names of the values it produces
//! (efferents). Calcs carry no state: every derivation returns a new node and
//! the underlying function is shared between all of them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use crate::core::{Assignment, Meta, Name, Translation, Value, translate};
use crate::error::{DefinitionError, Error, MissingParameterError, Result, ReturnShapeError};

/// The value returned by a node function.
///
/// The variant tells the node how to line the result up with its efferents:
/// a single value belongs to the only efferent, a tuple is matched up
/// positionally and a named map must carry exactly the efferent names.
#[derive(Debug, Clone, PartialEq)]
pub enum Output<V> {
    /// No value at all; only valid for nodes without efferents.
    Unit,
    /// A raw value for a node with exactly one efferent.
    Single(V),
    /// Positional values, one per efferent.
    Tuple(Vec<V>),
    /// Values keyed by efferent name.
    Named(BTreeMap<Name, V>),
}

impl<V> Output<V> {
    /// Creates an [`Output::Named`] from any sequence of pairs.
    pub fn named<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Name>,
    {
        Output::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn rename_keys(self, tr: &Translation) -> Self {
        match self {
            Output::Named(map) => Output::Named(
                map.into_iter()
                    .map(|(key, value)| (translate(tr, &key), value))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Type-erased node function: afferent values in declared order in, one
/// [`Output`] out.
pub(crate) type CalcFn<V> = Arc<dyn Fn(&[V]) -> anyhow::Result<Output<V>> + Send + Sync>;

/// An immutable description of one pure computation step.
///
/// Calcs are usually built with [`Calc::def`], which mirrors the shapes a node
/// function can take:
///
/// ```rust
/// use calcgraph::Calc;
/// use serde_json::{Value, json};
///
/// // one output, named explicitly
/// let area = Calc::<Value>::def()
///     .params(["width", "height"])
///     .single("area", |args| Ok(json!(args[0].as_f64().unwrap() * args[1].as_f64().unwrap())))
///     .unwrap();
///
/// assert_eq!(&*area.efferents()[0], "area");
/// assert!(area.is_lazy());
/// ```
#[derive(Clone)]
pub struct Calc<V = serde_json::Value> {
    afferents: Arc<[Name]>,
    efferents: Arc<[Name]>,
    function: CalcFn<V>,
    defaults: Assignment<V>,
    lazy: bool,
    meta: Meta,
}

impl<V: Value> Calc<V> {
    /// Creates a node from its raw parts.
    ///
    /// Fails when a name is declared twice, when a parameter is also one of
    /// the outputs, or when the defaults do not cover a trailing run of the
    /// parameters.
    pub fn new<A, E, F, KA, KE>(
        afferents: A,
        function: F,
        efferents: E,
        defaults: Assignment<V>,
        lazy: bool,
    ) -> Result<Self, DefinitionError>
    where
        A: IntoIterator<Item = KA>,
        E: IntoIterator<Item = KE>,
        KA: Into<Name>,
        KE: Into<Name>,
        F: Fn(&[V]) -> anyhow::Result<Output<V>> + Send + Sync + 'static,
    {
        let afferents: Vec<Name> = afferents.into_iter().map(Into::into).collect();
        check_defaults(&afferents, &defaults)?;

        Self::from_parts(
            afferents,
            efferents.into_iter().map(Into::into).collect(),
            Arc::new(function),
            defaults,
            lazy,
            Meta::new(),
        )
    }

    /// Starts a builder for a new node.
    pub fn def() -> CalcDef<V> {
        CalcDef::new()
    }

    fn from_parts(
        afferents: Vec<Name>,
        efferents: Vec<Name>,
        function: CalcFn<V>,
        defaults: Assignment<V>,
        lazy: bool,
        meta: Meta,
    ) -> Result<Self, DefinitionError> {
        let mut seen = BTreeSet::new();
        for name in &afferents {
            if !seen.insert(name) {
                return Err(DefinitionError::DuplicateAfferent(name.clone()));
            }
        }

        let mut overlap = Vec::new();
        let mut seen_eff = BTreeSet::new();
        for name in &efferents {
            if !seen_eff.insert(name) {
                return Err(DefinitionError::DuplicateEfferent(name.clone()));
            }
            if seen.contains(name) {
                overlap.push(name.clone());
            }
        }

        if !overlap.is_empty() {
            return Err(DefinitionError::Overlap(overlap));
        }

        Ok(Self {
            afferents: afferents.into(),
            efferents: efferents.into(),
            function,
            defaults,
            lazy,
            meta,
        })
    }

    /// Input names, in the order the function receives them.
    pub fn afferents(&self) -> &[Name] {
        &self.afferents
    }

    /// Output names, in the order positional results are matched against.
    pub fn efferents(&self) -> &[Name] {
        &self.efferents
    }

    pub fn defaults(&self) -> &Assignment<V> {
        &self.defaults
    }

    /// Lazy nodes run when one of their outputs is first read, eager ones run
    /// as soon as any of their inputs is set.
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Invokes the node on the given arguments.
    ///
    /// Explicit arguments take precedence over the node's defaults; every
    /// afferent must be covered by one or the other. Arguments that the node
    /// does not read are ignored.
    pub fn call(&self, args: &Assignment<V>) -> Result<Assignment<V>> {
        let mut opts = self.defaults.clone();
        for (name, value) in args {
            opts.insert(name.clone(), value.clone());
        }

        let values = self
            .afferents
            .iter()
            .map(|name| {
                opts.get(name)
                    .cloned()
                    .ok_or_else(|| MissingParameterError(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.evaluate(&self.label(), &values)
    }

    /// Runs the function on positional values and lines the result up with
    /// the efferents. `node` is only used for error reporting.
    pub(crate) fn evaluate(&self, node: &Name, values: &[V]) -> Result<Assignment<V>> {
        let output = (self.function)(values).map_err(|error| Error::Function {
            node: node.clone(),
            error,
        })?;

        Ok(self.interpret(output)?)
    }

    fn interpret(&self, output: Output<V>) -> Result<Assignment<V>, ReturnShapeError> {
        let effs = &self.efferents;

        match output {
            Output::Named(map) => {
                let matches =
                    map.len() == effs.len() && effs.iter().all(|name| map.contains_key(name));

                if !matches {
                    return Err(ReturnShapeError::Keys {
                        expected: effs.to_vec(),
                        found: map.into_keys().collect(),
                    });
                }

                Ok(map.into_iter().collect())
            }
            Output::Tuple(values) => {
                if values.len() != effs.len() {
                    return Err(ReturnShapeError::Arity {
                        expected: effs.len(),
                        found: values.len(),
                    });
                }

                Ok(effs.iter().cloned().zip(values).collect())
            }
            Output::Single(value) => match &effs[..] {
                [name] => Ok(Assignment::unit(name.clone(), value)),
                _ => Err(ReturnShapeError::Single(effs.len())),
            },
            Output::Unit => match effs.len() {
                0 => Ok(Assignment::new()),
                n => Err(ReturnShapeError::Unit(n)),
            },
        }
    }

    /// Human-readable identifier used when the node has no name of its own.
    fn label(&self) -> Name {
        if self.efferents.is_empty() {
            Name::from("<sink>")
        } else {
            Name::from(self.efferents.join(", "))
        }
    }

    /// Returns a copy of this node with its metadata replaced.
    pub fn with_meta(&self, meta: Meta) -> Self {
        Self {
            meta,
            ..self.clone()
        }
    }

    /// Returns a copy of this node with the given defaults merged over the
    /// existing ones.
    pub fn using_defaults<I, K>(&self, defaults: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Name>,
    {
        let mut merged = self.defaults.clone();
        for (key, value) in defaults {
            merged.insert(key.into(), value);
        }

        Self {
            defaults: merged,
            ..self.clone()
        }
    }

    /// Returns a copy of this node in which the named parameters are required.
    pub fn without_defaults<I, K>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
    {
        let mut defaults = self.defaults.clone();
        for name in names {
            let name: Name = name.into();
            defaults.remove(&name);
        }

        Self {
            defaults,
            ..self.clone()
        }
    }

    /// Returns a copy of this node with afferents, efferents and default keys
    /// renamed.
    ///
    /// The function is wrapped so that named results come back under the new
    /// names; positional and single results need no translation.
    pub fn rename<I, A, B>(&self, translation: I) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<Name>,
        B: Into<Name>,
    {
        self.rename_with(&crate::core::translation(translation))
    }

    pub(crate) fn rename_with(&self, tr: &Translation) -> Result<Self, DefinitionError> {
        if tr.is_empty() {
            return Ok(self.clone());
        }

        let afferents = self.afferents.iter().map(|n| translate(tr, n)).collect();
        let efferents = self.efferents.iter().map(|n| translate(tr, n)).collect();
        let defaults = self
            .defaults
            .iter()
            .map(|(k, v)| (translate(tr, k), v.clone()))
            .collect();

        let inner = self.function.clone();
        let table = tr.clone();
        let function: CalcFn<V> = Arc::new(move |args: &[V]| Ok(inner(args)?.rename_keys(&table)));

        Self::from_parts(
            afferents,
            efferents,
            function,
            defaults,
            self.lazy,
            self.meta.clone(),
        )
    }
}

/// Defaults may only be given for parameters, and only for a suffix of them.
fn check_defaults<V: Value>(
    afferents: &[Name],
    defaults: &Assignment<V>,
) -> Result<(), DefinitionError> {
    if let Some(name) = defaults.keys().find(|name| !afferents.contains(name)) {
        return Err(DefinitionError::UnknownDefault(name.clone()));
    }

    let mut defaulted = false;
    for name in afferents {
        if defaults.contains_key(name) {
            defaulted = true;
        } else if defaulted {
            return Err(DefinitionError::RequiredAfterDefault(name.clone()));
        }
    }

    Ok(())
}

impl<V> Debug for Calc<V>
where
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calc")
            .field("afferents", &self.afferents)
            .field("efferents", &self.efferents)
            .field("defaults", &self.defaults)
            .field("lazy", &self.lazy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Calc`] nodes.
///
/// Parameters are declared in order. Once a parameter has been given a
/// default, every following parameter needs one as well, exactly like
/// trailing default arguments. The builder is finished by one of the return
/// shapes: [`single`](Self::single), [`tuple`](Self::tuple),
/// [`named`](Self::named), [`returns`](Self::returns) or [`sink`](Self::sink).
pub struct CalcDef<V> {
    afferents: Vec<Name>,
    defaults: Assignment<V>,
    lazy: bool,
    meta: Meta,
    error: Option<DefinitionError>,
}

impl<V: Value> CalcDef<V> {
    fn new() -> Self {
        Self {
            afferents: Vec::new(),
            defaults: Assignment::new(),
            lazy: true,
            meta: Meta::new(),
            error: None,
        }
    }

    /// Declares a required parameter.
    pub fn param(mut self, name: impl Into<Name>) -> Self {
        let name = name.into();

        if self.error.is_none() && !self.defaults.is_empty() {
            self.error = Some(DefinitionError::RequiredAfterDefault(name.clone()));
        }

        self.afferents.push(name);
        self
    }

    /// Declares several required parameters at once.
    pub fn params<I, K>(self, names: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
    {
        names.into_iter().fold(self, |def, name| def.param(name))
    }

    /// Declares a parameter with a default value.
    pub fn param_default(mut self, name: impl Into<Name>, value: V) -> Self {
        let name = name.into();
        self.defaults.insert(name.clone(), value);
        self.afferents.push(name);
        self
    }

    /// Eager nodes are run whenever one of their inputs is set.
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn meta(mut self, key: impl Into<Name>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Finishes a node with exactly one efferent.
    pub fn single<F>(self, name: impl Into<Name>, function: F) -> Result<Calc<V>, DefinitionError>
    where
        F: Fn(&[V]) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        self.finish(vec![name.into()], move |args| function(args).map(Output::Single))
    }

    /// Finishes a node whose function returns one value per efferent, in order.
    pub fn tuple<I, K, F>(self, names: I, function: F) -> Result<Calc<V>, DefinitionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
        F: Fn(&[V]) -> anyhow::Result<Vec<V>> + Send + Sync + 'static,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.finish(names, move |args| function(args).map(Output::Tuple))
    }

    /// Finishes a node whose function returns a map keyed by efferent name.
    pub fn named<I, K, F>(self, names: I, function: F) -> Result<Calc<V>, DefinitionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
        F: Fn(&[V]) -> anyhow::Result<BTreeMap<Name, V>> + Send + Sync + 'static,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.finish(names, move |args| function(args).map(Output::Named))
    }

    /// Finishes a node whose function picks its own [`Output`] shape.
    pub fn returns<I, K, F>(self, names: I, function: F) -> Result<Calc<V>, DefinitionError>
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
        F: Fn(&[V]) -> anyhow::Result<Output<V>> + Send + Sync + 'static,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.finish(names, function)
    }

    /// Finishes a node without efferents.
    ///
    /// Such a node only exists for its checks, so it is always eager: it runs
    /// whenever any of its inputs changes, regardless of [`lazy`](Self::lazy).
    pub fn sink<F>(mut self, function: F) -> Result<Calc<V>, DefinitionError>
    where
        F: Fn(&[V]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.lazy = false;
        self.finish(Vec::new(), move |args| function(args).map(|()| Output::Unit))
    }

    fn finish<F>(self, efferents: Vec<Name>, function: F) -> Result<Calc<V>, DefinitionError>
    where
        F: Fn(&[V]) -> anyhow::Result<Output<V>> + Send + Sync + 'static,
    {
        if let Some(error) = self.error {
            return Err(error);
        }

        Calc::from_parts(
            self.afferents,
            efferents,
            Arc::new(function),
            self.defaults,
            self.lazy,
            self.meta,
        )
    }
}
