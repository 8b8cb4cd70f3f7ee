//! The warehouse memoizes built components and remembers how they were
//! built. It is the serialization point between concurrent builders: the
//! first check-in for a name wins and later ones are dropped, so lookups are
//! monotone for the lifetime of the owning factory.

use crate::engine::{ComponentBox, SatisfiedBom};
use crate::error::ErrorPtr;
use crate::name::{AnyComponentPtr, Name, NamedComponent};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A failure reported while releasing a stored component.
#[derive(Debug, Clone)]
pub struct CloseFailure {
    pub name: Name,
    pub error: ErrorPtr,
}

struct StoredBox {
    boxed: ComponentBox,
    satisfied_bom: SatisfiedBom,
    build_duration: Duration,
}

#[derive(Default)]
struct Inner {
    boxes: FxHashMap<Name, StoredBox>,
    build_order: Vec<Name>,
    closed: bool,
}

/// Memoization store of built components, keyed by name, with provenance and
/// an optional read-only chain of provider warehouses consulted on miss.
#[derive(Default)]
pub struct Warehouse {
    inner: Mutex<Inner>,
    providers: Vec<Arc<Warehouse>>,
}

impl Warehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(providers: Vec<Arc<Warehouse>>) -> Self {
        Self {
            inner: Mutex::default(),
            providers,
        }
    }

    /// Returns the stored component for `name`, consulting providers in
    /// declared order on local miss.
    pub fn check_out(&self, name: &Name) -> Option<NamedComponent> {
        let local = self
            .inner
            .lock()
            .boxes
            .get(name)
            .and_then(|stored| stored.boxed.pick());
        if local.is_some() {
            return local;
        }

        self.providers
            .iter()
            .find_map(|provider| provider.check_out(name))
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.check_out(name).is_some()
    }

    /// Stores a built box with its provenance. Absent boxes are never
    /// stored; a second check-in for an already-stored name is silently
    /// rejected, keeping the first writer's component.
    pub fn check_in(
        &self,
        boxed: ComponentBox,
        satisfied_bom: SatisfiedBom,
        build_duration: Duration,
    ) {
        if boxed.is_absent() {
            debug!(name = %boxed.name(), "skipping check-in of absent component");
            return;
        }

        let mut inner = self.inner.lock();
        let name = boxed.name().clone();
        if inner.boxes.contains_key(&name) {
            debug!(name = %name, "dropping duplicate check-in");
            return;
        }

        inner.build_order.push(name.clone());
        inner.boxes.insert(
            name,
            StoredBox {
                boxed,
                satisfied_bom,
                build_duration,
            },
        );
    }

    /// Locally stored names, in check-in order. Providers are not listed.
    pub fn stored_names(&self) -> Vec<Name> {
        self.inner.lock().build_order.clone()
    }

    pub fn provenance(&self, name: &Name) -> Option<(SatisfiedBom, Duration)> {
        self.inner
            .lock()
            .boxes
            .get(name)
            .map(|stored| (stored.satisfied_bom.clone(), stored.build_duration))
    }

    pub(crate) fn start_hook(
        &self,
        name: &Name,
    ) -> Option<(AnyComponentPtr, Arc<dyn Fn(&AnyComponentPtr) -> Result<(), ErrorPtr> + Send + Sync>)>
    {
        let inner = self.inner.lock();
        let stored = inner.boxes.get(name)?;
        let component = stored.boxed.pick()?;
        let hook = stored.boxed.hooks().start()?.clone();
        Some((component.ptr().clone(), hook))
    }

    /// Releases stored components in reverse check-in order, invoking their
    /// close hooks. Failures are reported and the release continues; a
    /// second call is a no-op. Providers belong to other factories and are
    /// left alone.
    pub fn close(&self) -> Vec<CloseFailure> {
        let to_close: Vec<(Name, AnyComponentPtr, _)> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Vec::new();
            }
            inner.closed = true;

            inner
                .build_order
                .iter()
                .rev()
                .filter_map(|name| {
                    let stored = inner.boxes.get(name)?;
                    let component = stored.boxed.pick()?;
                    let hook = stored.boxed.hooks().close()?.clone();
                    Some((name.clone(), component.ptr().clone(), hook))
                })
                .collect()
        };

        let mut failures = Vec::new();
        for (name, component, hook) in to_close {
            if let Err(error) = hook(&component) {
                warn!(name = %name, %error, "failed to close component");
                failures.push(CloseFailure { name, error });
            }
        }

        failures
    }
}
