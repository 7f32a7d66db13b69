use thiserror::Error;

use crate::core::Name;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    ReturnShape(#[from] ReturnShapeError),

    #[error(transparent)]
    MissingParameter(#[from] MissingParameterError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Immutability(#[from] ImmutabilityError),

    #[error("Calculation '{node}' failed:\n{error}")]
    Function { node: Name, error: anyhow::Error },
}

/// A calculation node could not be defined.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Calculation may not overwrite its own parameters: {0:?}")]
    Overlap(Vec<Name>),

    #[error("Parameter '{0}' is declared more than once")]
    DuplicateAfferent(Name),

    #[error("Output '{0}' is declared more than once")]
    DuplicateEfferent(Name),

    #[error("Required parameter '{0}' follows a parameter with a default value")]
    RequiredAfterDefault(Name),

    #[error("Default given for '{0}', which is not a parameter")]
    UnknownDefault(Name),
}

/// A node function returned something that does not match its efferents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReturnShapeError {
    #[error("Returned keys {found:?} did not match efferents {expected:?}")]
    Keys { expected: Vec<Name>, found: Vec<Name> },

    #[error("Returned {found} positional values for {expected} efferents")]
    Arity { expected: usize, found: usize },

    #[error("Returned a single value for {0} efferents")]
    Single(usize),

    #[error("Returned nothing for {0} efferents")]
    Unit(usize),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Required parameter '{0}' not given")]
pub struct MissingParameterError(pub Name);

/// Static analysis of a plan failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Conflicting default values found for '{name}': {first} and {second}")]
    ConflictingDefaults {
        name: Name,
        first: String,
        second: String,
    },

    #[error("Self-loop detected in dependency graph at '{0}'")]
    Cycle(Name),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Key '{0}' not found")]
    NotFound(Name),

    #[error("Key '{0}' is not an afferent parameter")]
    NotAfferent(Name),

    #[error("Cannot evict parameter '{0}'")]
    EvictAfferent(Name),

    #[error("Plan has no node named '{0}'")]
    NoSuchNode(Name),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0} objects are immutable")]
pub struct ImmutabilityError(pub &'static str);
