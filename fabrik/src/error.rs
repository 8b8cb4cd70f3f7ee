//! Errors raised while assembling factories and resolving components.

use crate::name::Name;
use crate::query::Query;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque pointer to an error produced by user code (engine constructors,
/// lifecycle hooks).
pub type ErrorPtr = Arc<dyn Error + Send + Sync>;

/// A single path from a root query through sub-queries to a leaf which cannot
/// be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiedDependency {
    path: Vec<String>,
    cause: String,
}

impl UnsatisfiedDependency {
    pub fn new(query: &Query, cause: impl Into<String>) -> Self {
        Self {
            path: vec![query.to_string()],
            cause: cause.into(),
        }
    }

    pub(crate) fn with_path(path: Vec<String>, cause: impl Into<String>) -> Self {
        Self {
            path,
            cause: cause.into(),
        }
    }

    /// Prepends an outer query to the path, keeping the leaf cause.
    pub fn prepend(mut self, query: &Query) -> Self {
        self.path.insert(0, query.to_string());
        self
    }

    /// The query path, ordered from the root query down to the failing leaf.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }
}

impl fmt::Display for UnsatisfiedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, query) in self.path.iter().enumerate() {
            if depth == 0 {
                write!(f, "{query}")?;
            } else {
                write!(f, "\n{:indent$}-> {query}", "", indent = depth * 2)?;
            }
        }
        write!(
            f,
            "\n{:indent$}{}",
            "",
            self.cause,
            indent = self.path.len() * 2
        )
    }
}

impl Error for UnsatisfiedDependency {}

/// An aggregate of one or more [UnsatisfiedDependency] instances, collected
/// over a whole resolution pass so a single report lists every missing leaf.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnsatisfiedDependencies {
    dependencies: Vec<UnsatisfiedDependency>,
}

impl UnsatisfiedDependencies {
    pub fn new(dependencies: Vec<UnsatisfiedDependency>) -> Self {
        Self { dependencies }
    }

    pub fn of(dependency: UnsatisfiedDependency) -> Self {
        Self {
            dependencies: vec![dependency],
        }
    }

    /// Prepends an outer query to every member path.
    pub fn prepend(self, query: &Query) -> Self {
        Self {
            dependencies: self
                .dependencies
                .into_iter()
                .map(|dependency| dependency.prepend(query))
                .collect(),
        }
    }

    pub fn merge(&mut self, other: UnsatisfiedDependencies) {
        self.dependencies.extend(other.dependencies);
    }

    pub(crate) fn push(&mut self, dependency: UnsatisfiedDependency) {
        self.dependencies.push(dependency);
    }

    pub fn dependencies(&self) -> &[UnsatisfiedDependency] {
        &self.dependencies
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

impl fmt::Display for UnsatisfiedDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsatisfied dependencies:")?;
        for dependency in &self.dependencies {
            write!(f, "\n{dependency}")?;
        }
        Ok(())
    }
}

impl Error for UnsatisfiedDependencies {}

/// Errors related to assembling factories and building components.
#[derive(Error, Debug, Clone)]
pub enum FactoryError {
    /// One or more query paths could not be satisfied.
    #[error(transparent)]
    Unsatisfied(#[from] UnsatisfiedDependencies),
    /// A single-component lookup matched more than one component.
    #[error("query {query} matched several components where at most one was expected: {candidates:?}")]
    Ambiguous {
        query: String,
        candidates: Vec<Name>,
    },
    /// Two rules in the same bucket declare the same name at the same
    /// priority, leaving no way to pick an effective rule.
    #[error("rules in bucket '{bucket}' both declare {name} at priority {priority}")]
    DuplicateName {
        bucket: String,
        name: Name,
        priority: i32,
    },
    /// The resolution graph contains a cycle.
    #[error("dependency cycle between: {names:?}")]
    Cycle { names: Vec<Name> },
    /// A component could not be downcast to the requested type.
    #[error("component {name} cannot be downcast to the requested type")]
    IncompatibleComponent { name: Name },
    /// An engine constructor returned an error.
    #[error("building {name} failed: {source}")]
    Construction {
        name: Name,
        #[source]
        source: ErrorPtr,
    },
    /// A start hook returned an error.
    #[error("starting {name} failed: {source}")]
    StartFailure {
        name: Name,
        #[source]
        source: ErrorPtr,
    },
}

impl From<FactoryError> for ErrorPtr {
    fn from(error: FactoryError) -> Self {
        Arc::new(error)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{UnsatisfiedDependencies, UnsatisfiedDependency};
    use crate::name::TypedName;
    use crate::query::Query;

    #[test]
    fn should_render_nested_path_indented() {
        let root = Query::by_name(&TypedName::<String>::new("a"));
        let leaf = Query::by_type::<i32>();

        let dependency = UnsatisfiedDependency::new(&leaf, "no rule found").prepend(&root);

        let rendered = dependency.to_string();
        let mut lines = rendered.lines();
        assert_eq!(lines.next(), Some("QueryByName{a[String]}"));
        assert_eq!(lines.next(), Some("  -> QueryByType{i32}"));
        assert_eq!(lines.next(), Some("    no rule found"));
    }

    #[test]
    fn should_prepend_to_every_member() {
        let outer = Query::by_type::<u8>();
        let inner = Query::by_type::<i32>();

        let aggregate = UnsatisfiedDependencies::new(vec![
            UnsatisfiedDependency::new(&inner, "missing"),
            UnsatisfiedDependency::new(&inner, "also missing"),
        ])
        .prepend(&outer);

        for dependency in aggregate.dependencies() {
            assert_eq!(dependency.path()[0], outer.to_string());
            assert_eq!(dependency.path().len(), 2);
        }
    }
}
