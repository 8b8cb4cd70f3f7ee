//! Engines are the per-name build procedures. An engine is purely
//! declarative until invoked: it exposes the name it produces and a bill of
//! materials (the dependency queries it needs satisfied), and turns a
//! [SatisfiedBom] into a [ComponentBox] when the resolution engine asks.

use crate::error::{ErrorPtr, FactoryError, UnsatisfiedDependencies, UnsatisfiedDependency};
use crate::name::{AnyComponentPtr, ComponentPtr, Name, NamedComponent, TypedName};
use crate::query::Query;
use derivative::Derivative;
use itertools::Itertools;
use std::sync::Arc;

pub type EnginePtr = Arc<dyn Engine>;

/// Build procedure for a single [Name]. The bill of materials is a static
/// property; `build` runs once per name per factory in single-threaded use
/// (the warehouse write guards races between concurrent builders).
pub trait Engine: Send + Sync {
    fn name(&self) -> &Name;

    /// The dependency queries which must be satisfied before building.
    fn bom(&self) -> &Bom;

    /// Whether [Factory::start](crate::factory::Factory::start) should build
    /// this component and invoke its start hook.
    fn auto_start(&self) -> bool {
        false
    }

    fn build(&self, bom: &SatisfiedBom) -> Result<ComponentBox, FactoryError>;
}

/// Ordered, deduplicated set of dependency queries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bom {
    queries: Vec<Query>,
}

impl Bom {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(queries: impl IntoIterator<Item = Query>) -> Self {
        Self {
            queries: queries.into_iter().unique().collect_vec(),
        }
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// The components which satisfied each query of a [Bom].
#[derive(Clone, Debug, Default)]
pub struct SatisfiedBom {
    entries: Vec<(Query, Vec<NamedComponent>)>,
}

impl SatisfiedBom {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, query: Query, components: Vec<NamedComponent>) {
        self.entries.push((query, components));
    }

    pub fn entries(&self) -> &[(Query, Vec<NamedComponent>)] {
        &self.entries
    }

    /// All components which satisfied the given query; empty when the query
    /// was optional and nothing matched.
    pub fn components(&self, query: &Query) -> &[NamedComponent] {
        self.entries
            .iter()
            .find(|(satisfied, _)| satisfied == query)
            .map(|(_, components)| components.as_slice())
            .unwrap_or(&[])
    }

    pub fn one(&self, query: &Query) -> Option<&NamedComponent> {
        self.components(query).first()
    }

    /// Typed access to the single component satisfying the given query.
    pub fn one_as<T: Send + Sync + 'static>(
        &self,
        query: &Query,
    ) -> Result<ComponentPtr<T>, FactoryError> {
        self.one(query)
            .ok_or_else(|| {
                UnsatisfiedDependencies::of(UnsatisfiedDependency::new(
                    query,
                    "missing from the satisfied bill of materials",
                ))
                .into()
            })
            .and_then(NamedComponent::downcast::<T>)
    }

    /// Typed access to every component satisfying the given query.
    pub fn components_as<T: Send + Sync + 'static>(
        &self,
        query: &Query,
    ) -> Result<Vec<ComponentPtr<T>>, FactoryError> {
        self.components(query)
            .iter()
            .map(NamedComponent::downcast::<T>)
            .try_collect()
    }
}

type StartFn = Arc<dyn Fn(&AnyComponentPtr) -> Result<(), ErrorPtr> + Send + Sync>;
type CloseFn = Arc<dyn Fn(&AnyComponentPtr) -> Result<(), ErrorPtr> + Send + Sync>;

/// Components may opt into being built and started by
/// [Factory::start](crate::factory::Factory::start).
pub trait AutoStartable {
    fn start(&self) -> Result<(), ErrorPtr>;
}

/// Components may opt into being released when the warehouse closes.
pub trait Closeable {
    fn close(&self) -> Result<(), ErrorPtr>;
}

/// Start/close thunks attached to a box at build time. The thunks capture the
/// concrete component type, so the warehouse can run them on the type-erased
/// stored component.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    start: Option<StartFn>,
    close: Option<CloseFn>,
}

impl LifecycleHooks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn on_start<T, F>(mut self, hook: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Result<(), ErrorPtr> + Send + Sync + 'static,
    {
        self.start = Some(erase_hook(hook));
        self
    }

    pub fn on_close<T, F>(mut self, hook: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Result<(), ErrorPtr> + Send + Sync + 'static,
    {
        self.close = Some(erase_hook(hook));
        self
    }

    /// Hooks delegating to the [AutoStartable] implementation of `T`.
    pub fn startable<T: AutoStartable + Send + Sync + 'static>() -> Self {
        Self::none().on_start(T::start)
    }

    /// Hooks delegating to the [Closeable] implementation of `T`.
    pub fn closeable<T: Closeable + Send + Sync + 'static>() -> Self {
        Self::none().on_close(T::close)
    }

    pub(crate) fn start(&self) -> Option<&StartFn> {
        self.start.as_ref()
    }

    pub(crate) fn close(&self) -> Option<&CloseFn> {
        self.close.as_ref()
    }
}

fn erase_hook<T, F>(hook: F) -> Arc<dyn Fn(&AnyComponentPtr) -> Result<(), ErrorPtr> + Send + Sync>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Result<(), ErrorPtr> + Send + Sync + 'static,
{
    Arc::new(move |component: &AnyComponentPtr| match component.clone().downcast::<T>() {
        Ok(component) => hook(&component),
        // Hooks are attached by the engine which built the component, so the
        // stored type always matches.
        Err(_) => Ok(()),
    })
}

/// Whether a box expects a single consumer or may be handed out repeatedly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxKind {
    Singleton,
    Boundless,
}

/// Wrapper around a built (or legitimately absent) component, carrying the
/// lifecycle hooks its engine attached. Customizers transform boxes, never
/// raw components.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ComponentBox {
    name: Name,
    kind: BoxKind,
    content: Option<NamedComponent>,
    #[derivative(Debug = "ignore")]
    hooks: LifecycleHooks,
}

impl ComponentBox {
    pub fn singleton(name: Name, component: AnyComponentPtr) -> Self {
        Self {
            content: Some(NamedComponent::from_ptr(name.clone(), component)),
            name,
            kind: BoxKind::Singleton,
            hooks: LifecycleHooks::none(),
        }
    }

    pub fn boundless(name: Name, component: AnyComponentPtr) -> Self {
        Self {
            content: Some(NamedComponent::from_ptr(name.clone(), component)),
            name,
            kind: BoxKind::Boundless,
            hooks: LifecycleHooks::none(),
        }
    }

    /// A box for an engine which legitimately chose not to produce anything.
    pub fn absent(name: Name) -> Self {
        Self {
            name,
            kind: BoxKind::Singleton,
            content: None,
            hooks: LifecycleHooks::none(),
        }
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replaces the content, keeping name, kind and hooks. This is the seam
    /// customizers use to substitute a component.
    pub fn with_content(mut self, component: AnyComponentPtr) -> Self {
        self.content = Some(NamedComponent::from_ptr(self.name.clone(), component));
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn kind(&self) -> BoxKind {
        self.kind
    }

    pub fn is_absent(&self) -> bool {
        self.content.is_none()
    }

    pub fn pick(&self) -> Option<NamedComponent> {
        self.content.clone()
    }

    pub fn customize(self, customizer: &dyn crate::customizer::Customizer) -> ComponentBox {
        customizer.customize(self)
    }

    pub(crate) fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }
}

type Constructor =
    Box<dyn Fn(&SatisfiedBom) -> Result<Option<AnyComponentPtr>, ErrorPtr> + Send + Sync>;

/// Closure-based [Engine]: a typed name, a bill of materials and a
/// constructor. Most rules are assembled from these.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct StdEngine {
    name: Name,
    bom: Bom,
    kind: BoxKind,
    auto_start: bool,
    #[derivative(Debug = "ignore")]
    hooks: LifecycleHooks,
    #[derivative(Debug = "ignore")]
    constructor: Constructor,
}

impl StdEngine {
    pub fn new<T, F>(name: TypedName<T>, bom: Bom, constructor: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&SatisfiedBom) -> Result<T, ErrorPtr> + Send + Sync + 'static,
    {
        Self::erased(name.into_name(), bom, move |bom| {
            constructor(bom).map(|component| Some(Arc::new(component) as AnyComponentPtr))
        })
    }

    /// An engine which may legitimately decide not to produce a component.
    pub fn optional<T, F>(name: TypedName<T>, bom: Bom, constructor: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&SatisfiedBom) -> Result<Option<T>, ErrorPtr> + Send + Sync + 'static,
    {
        Self::erased(name.into_name(), bom, move |bom| {
            constructor(bom)
                .map(|component| component.map(|c| Arc::new(c) as AnyComponentPtr))
        })
    }

    /// Fully type-erased constructor, for rules producing components whose
    /// pointer they already hold.
    pub fn erased<F>(name: Name, bom: Bom, constructor: F) -> Self
    where
        F: Fn(&SatisfiedBom) -> Result<Option<AnyComponentPtr>, ErrorPtr> + Send + Sync + 'static,
    {
        Self {
            name,
            bom,
            kind: BoxKind::Boundless,
            auto_start: false,
            hooks: LifecycleHooks::none(),
            constructor: Box::new(constructor),
        }
    }

    pub fn with_kind(mut self, kind: BoxKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl Engine for StdEngine {
    fn name(&self) -> &Name {
        &self.name
    }

    fn bom(&self) -> &Bom {
        &self.bom
    }

    fn auto_start(&self) -> bool {
        self.auto_start
    }

    fn build(&self, bom: &SatisfiedBom) -> Result<ComponentBox, FactoryError> {
        let component = (self.constructor)(bom).map_err(|source| FactoryError::Construction {
            name: self.name.clone(),
            source,
        })?;

        let boxed = match component {
            Some(component) => match self.kind {
                BoxKind::Singleton => ComponentBox::singleton(self.name.clone(), component),
                BoxKind::Boundless => ComponentBox::boundless(self.name.clone(), component),
            },
            None => ComponentBox::absent(self.name.clone()),
        };

        Ok(boxed.with_hooks(self.hooks.clone()))
    }
}
