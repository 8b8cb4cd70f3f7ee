//! Queries describe what a caller (or a bill of materials) wants from a
//! factory: a specific name, every component of a type, or the factory
//! itself. A query is a plain value until bound to a factory.

use crate::error::{FactoryError, UnsatisfiedDependencies, UnsatisfiedDependency};
use crate::factory::Factory;
use crate::name::{simple_type_name, ComponentPtr, Name, NamedComponent};
use itertools::Itertools;
use std::any::{type_name, TypeId};
use std::fmt;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum QueryKind {
    ByName(Name),
    ByType {
        type_id: TypeId,
        type_name: &'static str,
    },
    Factory,
}

/// A request for components, by name, by type, or for the factory itself.
/// Queries are mandatory by default; by-type queries may match any number of
/// components, by-name queries at most one.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Query {
    kind: QueryKind,
    mandatory: bool,
}

impl Query {
    pub fn by_name(name: impl Into<Name>) -> Self {
        Self {
            kind: QueryKind::ByName(name.into()),
            mandatory: true,
        }
    }

    pub fn by_type<T: Send + Sync + 'static>() -> Self {
        Self::by_type_id(TypeId::of::<T>(), type_name::<T>())
    }

    pub(crate) fn by_type_id(type_id: TypeId, type_name: &'static str) -> Self {
        Self {
            kind: QueryKind::ByType { type_id, type_name },
            mandatory: true,
        }
    }

    /// A query for the bound factory itself. Always satisfied, never errors.
    pub fn factory() -> Self {
        Self {
            kind: QueryKind::Factory,
            mandatory: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    /// Whether the query may legitimately match more than one component.
    pub fn is_multiple(&self) -> bool {
        matches!(self.kind, QueryKind::ByType { .. })
    }

    pub(crate) fn kind(&self) -> &QueryKind {
        &self.kind
    }

    /// Binds this query to a factory for evaluation.
    pub fn bind<'f>(&self, factory: &'f Factory) -> BoundQuery<'f> {
        BoundQuery {
            query: self.clone(),
            factory,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            QueryKind::ByName(name) => write!(f, "QueryByName{{{name}}}"),
            QueryKind::ByType { type_name, .. } => {
                write!(f, "QueryByType{{{}}}", simple_type_name(type_name))
            }
            QueryKind::Factory => write!(f, "FactoryQuery"),
        }
    }
}

/// A [Query] bound to a factory, ready for evaluation.
#[derive(Clone)]
pub struct BoundQuery<'f> {
    query: Query,
    factory: &'f Factory,
}

impl<'f> BoundQuery<'f> {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn optional(mut self) -> Self {
        self.query = self.query.optional();
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.query = self.query.mandatory();
        self
    }

    /// Enumerates the names this query targets, without building anything.
    /// By-name queries always answer their single name; by-type queries
    /// enumerate the rules in priority order, deduplicating by name.
    pub fn find_names(&self) -> Vec<Name> {
        self.factory.candidate_names(&self.query)
    }

    /// Builds (or fetches from the warehouse) every matching component.
    pub fn find(&self) -> Result<Vec<NamedComponent>, FactoryError> {
        self.factory.find_query(&self.query)
    }

    /// Like [find](Self::find), but expects at most one match. More than one
    /// match is ambiguous; zero matches is an error only for mandatory
    /// queries.
    pub fn find_one(&self) -> Result<Option<NamedComponent>, FactoryError> {
        let mut components = self.find()?;
        if components.len() > 1 {
            return Err(FactoryError::Ambiguous {
                query: self.query.to_string(),
                candidates: components
                    .iter()
                    .map(|component| component.name().clone())
                    .collect_vec(),
            });
        }

        Ok(components.pop())
    }

    /// Builds every matching component and downcasts it to `T`.
    pub fn find_as_components<T: Send + Sync + 'static>(
        &self,
    ) -> Result<Vec<ComponentPtr<T>>, FactoryError> {
        self.find()?
            .iter()
            .map(NamedComponent::downcast::<T>)
            .try_collect()
    }

    /// Verifies that every name targeted by this query has a satisfiable
    /// transitive bill of materials, without building anything.
    pub fn check_satisfy(&self) -> Result<(), FactoryError> {
        self.factory.check_satisfy_query(&self.query)
    }
}

impl fmt::Debug for BoundQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.query, f)
    }
}

pub(crate) fn no_rule_cause(factory: &Factory, name: &Name) -> String {
    let similar = factory
        .candidate_names(&Query::by_type_id(name.type_id(), name.type_name()))
        .into_iter()
        .filter(|candidate| candidate != name)
        .collect_vec();

    if similar.is_empty() {
        format!("no rule found to build {name}")
    } else {
        format!("no rule found to build {name}; buildable names of the same type: {similar:?}")
    }
}

pub(crate) fn unsatisfied(query: &Query, cause: impl Into<String>) -> FactoryError {
    UnsatisfiedDependencies::of(UnsatisfiedDependency::new(query, cause)).into()
}
