//! Post-construction customization. After an engine produces a box, every
//! customizer engine which recognizes the name contributes one customizer;
//! customizers are stable-sorted by priority and folded over the box before
//! it is checked into the warehouse.

use crate::engine::ComponentBox;
use crate::name::{ComponentPtr, Name};
use std::fmt;
use std::sync::Arc;

pub type CustomizerPtr = Arc<dyn Customizer>;
pub type CustomizerEnginePtr = Arc<dyn CustomizerEngine>;

/// Transforms a box before check-in. Two customizers with equal priority are
/// applied in insertion order.
pub trait Customizer: Send + Sync + fmt::Debug {
    fn priority(&self) -> i32 {
        0
    }

    fn applies_to(&self, name: &Name) -> bool;

    fn customize(&self, boxed: ComponentBox) -> ComponentBox;
}

/// Produces [Customizer]s for the names it recognizes. Customizer engines
/// are themselves components, built once during factory bootstrap; they are
/// never customized.
pub trait CustomizerEngine: Send + Sync + fmt::Debug {
    fn can_customize(&self, name: &Name) -> bool;

    fn customizer_for(&self, name: &Name) -> Option<CustomizerPtr>;
}

struct ClosureCustomizer {
    label: String,
    priority: i32,
    predicate: Arc<dyn Fn(&Name) -> bool + Send + Sync>,
    transform: Arc<dyn Fn(ComponentBox) -> ComponentBox + Send + Sync>,
}

impl fmt::Debug for ClosureCustomizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl Customizer for ClosureCustomizer {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn applies_to(&self, name: &Name) -> bool {
        (self.predicate)(name)
    }

    fn customize(&self, boxed: ComponentBox) -> ComponentBox {
        (self.transform)(boxed)
    }
}

/// Customizer engine handing out a single closure-based customizer.
pub struct SingleCustomizerEngine {
    customizer: Arc<ClosureCustomizer>,
}

impl fmt::Debug for SingleCustomizerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.customizer, f)
    }
}

impl SingleCustomizerEngine {
    pub fn new<P, F>(label: impl Into<String>, priority: i32, predicate: P, transform: F) -> Self
    where
        P: Fn(&Name) -> bool + Send + Sync + 'static,
        F: Fn(ComponentBox) -> ComponentBox + Send + Sync + 'static,
    {
        Self {
            customizer: Arc::new(ClosureCustomizer {
                label: label.into(),
                priority,
                predicate: Arc::new(predicate),
                transform: Arc::new(transform),
            }),
        }
    }

    /// Customizes every component of type `T` by mapping its value.
    pub fn for_type<T, F>(label: impl Into<String>, priority: i32, transform: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Name, ComponentPtr<T>) -> T + Send + Sync + 'static,
    {
        Self::new(
            label,
            priority,
            |name| name.type_id() == std::any::TypeId::of::<T>(),
            move |boxed| match boxed.pick() {
                Some(component) => match component.downcast::<T>() {
                    Ok(component) => {
                        let name = boxed.name().clone();
                        let transformed = transform(&name, component);
                        boxed.with_content(Arc::new(transformed))
                    }
                    Err(_) => boxed,
                },
                None => boxed,
            },
        )
    }
}

impl CustomizerEngine for SingleCustomizerEngine {
    fn can_customize(&self, name: &Name) -> bool {
        self.customizer.applies_to(name)
    }

    fn customizer_for(&self, name: &Name) -> Option<CustomizerPtr> {
        self.can_customize(name)
            .then(|| self.customizer.clone() as CustomizerPtr)
    }
}
