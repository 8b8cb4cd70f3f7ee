//! Names are the primary key of the whole system: a component type paired
//! with a string identifier. The type is carried as a [TypeId] so names stay
//! usable as type-erased map keys; [TypedName] adds call-site safety on top.

use crate::error::FactoryError;
use derivative::Derivative;
use std::any::{type_name, Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// Shared pointer to a built component.
pub type ComponentPtr<T> = Arc<T>;

/// Type-erased shared pointer to a built component.
pub type AnyComponentPtr = Arc<dyn Any + Send + Sync>;

/// Identifier of a buildable component: the component type plus a string id.
/// Equality and hashing use both fields.
#[derive(Clone)]
pub struct Name {
    type_id: TypeId,
    type_name: &'static str,
    id: Arc<str>,
}

impl Name {
    pub fn of<T: Send + Sync + 'static>(id: impl Into<Arc<str>>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            id: id.into(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Full path of the component type, as captured at creation.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Last path segment of the component type, without generic arguments.
    pub fn simple_type_name(&self) -> &'static str {
        simple_type_name(self.type_name)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) fn simple_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.id == other.id
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.type_name.cmp(other.type_name))
            .then_with(|| self.type_id.cmp(&other.type_id))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.id, self.simple_type_name())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

/// Typed wrapper over [Name], tying the identifier to the component type at
/// the call site.
pub struct TypedName<T: ?Sized> {
    name: Name,
    _type: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> TypedName<T> {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            name: Name::of::<T>(id),
            _type: PhantomData,
        }
    }
}

impl<T: ?Sized> TypedName<T> {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn into_name(self) -> Name {
        self.name
    }
}

impl<T: ?Sized> Clone for TypedName<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _type: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for TypedName<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.name, f)
    }
}

impl<T: ?Sized> fmt::Display for TypedName<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.name, f)
    }
}

impl<T: ?Sized> From<TypedName<T>> for Name {
    fn from(typed: TypedName<T>) -> Self {
        typed.name
    }
}

impl<T: ?Sized> From<&TypedName<T>> for Name {
    fn from(typed: &TypedName<T>) -> Self {
        typed.name.clone()
    }
}

/// A built component together with the name it was built under.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct NamedComponent {
    name: Name,
    #[derivative(Debug = "ignore")]
    component: AnyComponentPtr,
}

impl NamedComponent {
    pub fn new<T: Send + Sync + 'static>(name: impl Into<Name>, component: T) -> Self {
        Self {
            name: name.into(),
            component: Arc::new(component),
        }
    }

    pub fn from_ptr(name: Name, component: AnyComponentPtr) -> Self {
        Self { name, component }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn ptr(&self) -> &AnyComponentPtr {
        &self.component
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Result<ComponentPtr<T>, FactoryError> {
        self.component
            .clone()
            .downcast::<T>()
            .map_err(|_| FactoryError::IncompatibleComponent {
                name: self.name.clone(),
            })
    }
}

impl fmt::Display for NamedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.name, f)
    }
}
