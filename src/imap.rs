//! Evaluated plan instances.
//!
//! An [`IMap`] binds a [`Plan`] to one complete set of afferent values.
//! Efferents are computed on first read (lazy nodes) or as soon as one of
//! their inputs is set (eager nodes) and cached for the lifetime of the
//! instance. Replacing afferents never touches the receiver, a new instance
//! is returned with every value downstream of the change dropped from its
//! cache.

use std::collections::BTreeSet;
use std::fmt::{Debug, Display};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{Assignment, Name, Value, merge, translate, translation};
use crate::error::{ImmutabilityError, KeyError, Result};
use crate::plan::Plan;

/// A cached, immutable instantiation of a [`Plan`].
///
/// The afferent values and the key set never change. The cache only ever
/// grows, and the lock guarding it is never held while a node function runs.
/// Two threads reading the same uncached key may therefore both run its node,
/// which is harmless for pure functions.
pub struct IMap<V = serde_json::Value> {
    plan: Plan<V>,
    afferents: Assignment<V>,
    efferents: RwLock<Assignment<V>>,
}

impl<V: Value> IMap<V> {
    /// Runs every initializer, then every eager node triggered by any
    /// afferent.
    pub(crate) fn create(plan: Plan<V>, afferents: Assignment<V>) -> Result<Self> {
        let imap = Self::with_cache(plan, afferents, Assignment::new());

        for node in imap.plan.initializers() {
            imap.run_node(node, "init")?;
        }

        let triggered: BTreeSet<Name> = imap
            .afferents
            .keys()
            .filter_map(|key| imap.plan.proactive_dependants(key))
            .flatten()
            .cloned()
            .collect();

        imap.trigger(&triggered, "apply")?;
        Ok(imap)
    }

    fn with_cache(plan: Plan<V>, afferents: Assignment<V>, cache: Assignment<V>) -> Self {
        Self {
            plan,
            afferents,
            efferents: RwLock::new(cache),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Assignment<V>> {
        self.efferents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Assignment<V>> {
        self.efferents.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn trigger(&self, nodes: &BTreeSet<Name>, reason: &'static str) -> Result<()> {
        for node in nodes {
            self.run_node(node, reason)?;
        }
        Ok(())
    }

    /// Runs one node against the current values and caches every output
    /// the node owns.
    fn run_node(&self, node: &Name, reason: &'static str) -> Result<Assignment<V>> {
        let calc = self
            .plan
            .node(node)
            .ok_or_else(|| KeyError::NoSuchNode(node.clone()))?;

        let values = calc
            .afferents()
            .iter()
            .map(|name| self.get(name))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(node = %node, trigger = reason, "running calculation");
        let outputs = calc.evaluate(node, &values)?;

        let mut cache = self.write();
        for (name, value) in &outputs {
            // another node may have taken this name over
            if self.plan.owner(name) == Some(node) {
                cache.insert(name.clone(), value.clone());
            }
        }

        Ok(outputs)
    }

    /// Reads a value, computing it first if it is not cached yet.
    pub fn get(&self, key: &str) -> Result<V> {
        if let Some(value) = self.afferents.get(key) {
            return Ok(value.clone());
        }

        let Some(owner) = self.plan.owner(key) else {
            return Err(KeyError::NotFound(Name::from(key)).into());
        };

        let cached = self.read().get(key).cloned();
        if let Some(value) = cached {
            tracing::trace!(key, "cache hit");
            return Ok(value);
        }

        let mut outputs = self.run_node(owner, "read")?;
        outputs
            .remove(key)
            .ok_or_else(|| KeyError::NotFound(Name::from(key)).into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.afferents.contains_key(key) || self.plan.is_efferent(key)
    }

    /// Every afferent, then every efferent of the plan, each in name order.
    pub fn keys(&self) -> impl Iterator<Item = &Name> {
        self.afferents.keys().chain(self.plan.efferents())
    }

    pub fn len(&self) -> usize {
        self.afferents.len() + self.plan.efferents().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the given efferent has been computed already.
    pub fn is_cached(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// A snapshot of the values computed so far.
    pub fn cached(&self) -> Assignment<V> {
        self.read().clone()
    }

    pub fn afferents(&self) -> &Assignment<V> {
        &self.afferents
    }

    /// The plan this instance was created from.
    pub fn plan(&self) -> &Plan<V> {
        &self.plan
    }

    /// Computes every efferent and returns all values, afferents included.
    pub fn to_assignment(&self) -> Result<Assignment<V>> {
        let mut all = self.afferents.clone();
        for name in self.plan.efferents() {
            all.insert(name.clone(), self.get(name)?);
        }
        Ok(all)
    }

    /// Returns a new instance with some afferents replaced.
    ///
    /// Everything downstream of a changed afferent is dropped from the cache
    /// of the new instance, and the eager nodes the change triggers are run
    /// right away.
    pub fn using<I, K>(&self, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Name>,
    {
        let updates: Assignment<V> = merge([values]);

        if updates.is_empty() {
            return Ok(self.clone());
        }

        if let Some(key) = updates.keys().find(|key| !self.plan.is_afferent(key)) {
            return Err(KeyError::NotAfferent(key.clone()).into());
        }

        let mut cache = self.cached();
        let mut triggered = BTreeSet::new();

        for key in updates.keys() {
            if let Some(dependants) = self.plan.dependants(key) {
                for name in dependants {
                    cache.remove(name);
                }
            }
            if let Some(nodes) = self.plan.proactive_dependants(key) {
                triggered.extend(nodes.iter().cloned());
            }
        }

        tracing::debug!(
            changed = updates.len(),
            retained = cache.len(),
            triggered = triggered.len(),
            "replacing afferents"
        );

        let mut afferents = self.afferents.clone();
        for (key, value) in updates {
            afferents.insert(key, value);
        }
        let next = Self::with_cache(self.plan.clone(), afferents, cache);

        next.trigger(&triggered, "update")?;
        Ok(next)
    }

    /// Returns a new instance with one cached efferent dropped, so that the
    /// next read recomputes it.
    pub fn evict(&self, key: &str) -> Result<Self> {
        if self.afferents.contains_key(key) {
            return Err(KeyError::EvictAfferent(Name::from(key)).into());
        }

        if !self.plan.is_efferent(key) {
            return Err(KeyError::NotFound(Name::from(key)).into());
        }

        let mut cache = self.cached();
        if cache.remove(key).is_some() {
            tracing::trace!(key, "evicted");
        }

        Ok(Self::with_cache(self.plan.clone(), self.afferents.clone(), cache))
    }

    /// Renames afferents and efferents and instantiates the renamed plan on
    /// the current afferent values. The cache does not carry over.
    pub fn rename<I, A, B>(&self, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<Name>,
        B: Into<Name>,
    {
        let tr = translation(pairs);
        let plan = self.plan.rename_with(&tr)?;

        let afferents: Vec<(Name, V)> = self
            .afferents
            .iter()
            .map(|(name, value)| (translate(&tr, name), value.clone()))
            .collect();

        plan.apply(afferents)
    }

    /// Instances have a fixed key set, use [`evict`](Self::evict) to drop a
    /// cached value.
    pub fn without<I, K>(&self, _names: I) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<Name>,
    {
        Err(ImmutabilityError("IMap").into())
    }
}

impl<V: Value> Clone for IMap<V> {
    fn clone(&self) -> Self {
        Self::with_cache(self.plan.clone(), self.afferents.clone(), self.cached())
    }
}

impl<V: Value> PartialEq for IMap<V> {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }

        self.plan.ptr_eq(&other.plan)
            && self.afferents == other.afferents
            && *self.read() == *other.read()
    }
}

impl<V: Value> Display for IMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.read();

        write!(f, "<IMap{{")?;
        for (i, key) in self.keys().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match self.afferents.get(key).or_else(|| cache.get(key)) {
                Some(value) => write!(f, "{key}: {value:?}")?,
                None => write!(f, "{key}: <lazy>")?,
            }
        }
        write!(f, "}}>")
    }
}

impl<V: Value> Debug for IMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IMap")
            .field("afferents", &self.afferents)
            .field("efferents", &*self.read())
            .finish_non_exhaustive()
    }
}
