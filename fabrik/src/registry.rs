//! Process-global factory registry, for code which needs to share a factory
//! by key instead of threading it through call sites.

use crate::factory::Factory;
use dashmap::DashMap;
use once_cell::sync::Lazy;

static FACTORIES: Lazy<DashMap<String, Factory>> = Lazy::new(DashMap::new);

/// Registers `factory` under `key` unless one is already registered, and
/// returns the registered factory either way. Safe to call concurrently;
/// exactly one registration wins.
pub fn register(key: impl Into<String>, factory: Factory) -> Factory {
    FACTORIES.entry(key.into()).or_insert(factory).clone()
}

pub fn get(key: &str) -> Option<Factory> {
    FACTORIES.get(key).map(|factory| factory.clone())
}

pub fn unregister(key: &str) -> Option<Factory> {
    FACTORIES.remove(key).map(|(_, factory)| factory)
}

/// Drops every registered factory. Intended for tests which need a clean
/// process-global state.
pub fn clear() {
    FACTORIES.clear();
}

#[cfg(test)]
mod tests {
    use crate::factory::FactoryBuilder;
    use crate::name::TypedName;
    use crate::registry;
    use crate::rule::SingletonRule;

    #[test]
    fn should_keep_first_registration() {
        let first = FactoryBuilder::new()
            .without_discovery()
            .add_rule(SingletonRule::new(TypedName::<i64>::new("which"), 1))
            .build()
            .unwrap();
        let second = FactoryBuilder::new()
            .without_discovery()
            .add_rule(SingletonRule::new(TypedName::<i64>::new("which"), 2))
            .build()
            .unwrap();

        let registered = registry::register("registry-first-wins", first);
        let collided = registry::register("registry-first-wins", second);

        let name = TypedName::<i64>::new("which");
        assert_eq!(*registered.component(&name).unwrap(), 1);
        assert_eq!(*collided.component(&name).unwrap(), 1);

        registry::unregister("registry-first-wins");
    }

    #[test]
    fn should_look_up_registered_factories() {
        assert!(registry::get("registry-never-registered").is_none());

        let factory = FactoryBuilder::new().without_discovery().build().unwrap();
        registry::register("registry-lookup", factory);
        assert!(registry::get("registry-lookup").is_some());

        registry::unregister("registry-lookup");
        assert!(registry::get("registry-lookup").is_none());
    }
}
