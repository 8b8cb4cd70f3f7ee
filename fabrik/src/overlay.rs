//! Scoped rule overlays. Overlays are process-global mutable rule sets which
//! the builder snapshots at build time: a per-thread overlay (created
//! lazily, keyed by a monotone thread identifier) and named context
//! overlays. Overlay setters register at a priority which overrides any
//! normal rule; mutations after a factory is built never affect it.

use crate::name::TypedName;
use crate::rule::{Rule, RulePtr, SingletonRule};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Priority of rules registered through [Overlay::set]; wins over any
/// normally prioritized rule.
pub const OVERLAY_RULE_PRIORITY: i32 = -1000;

/// A mutable list of rules merged into factories built while it is in scope.
#[derive(Debug, Default)]
pub struct Overlay {
    rules: Mutex<Vec<RulePtr>>,
}

impl Overlay {
    pub fn add_rule(&self, rule: impl Rule + 'static) {
        self.rules.lock().push(Arc::new(rule));
    }

    /// Registers `value` under `id` with [OVERLAY_RULE_PRIORITY], overriding
    /// whatever rule would normally build that name.
    pub fn set<T: Send + Sync + 'static>(&self, id: &str, value: T) {
        self.add_rule(
            SingletonRule::new(TypedName::<T>::new(id), value)
                .with_priority(OVERLAY_RULE_PRIORITY),
        );
    }

    pub fn clear(&self) {
        self.rules.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.rules.lock().is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<RulePtr> {
        self.rules.lock().clone()
    }
}

static CONTEXT_OVERLAYS: Lazy<DashMap<String, Arc<Overlay>>> = Lazy::new(DashMap::new);
static THREAD_OVERLAYS: Lazy<DashMap<String, Arc<Overlay>>> = Lazy::new(DashMap::new);
static NEXT_THREAD_KEY: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_OVERLAY_KEY: String =
        format!("thread-{}", NEXT_THREAD_KEY.fetch_add(1, Ordering::Relaxed));
}

/// The identifier under which the calling thread's overlay is registered.
pub fn current_thread_key() -> String {
    THREAD_OVERLAY_KEY.with(Clone::clone)
}

/// The calling thread's overlay, created and registered on first access.
pub fn current_thread() -> Arc<Overlay> {
    THREAD_OVERLAYS
        .entry(current_thread_key())
        .or_default()
        .clone()
}

/// Another thread's overlay by its identifier. An unknown identifier yields
/// an empty, unregistered overlay, so stray mutations do not leak anywhere.
pub fn thread(key: &str) -> Arc<Overlay> {
    THREAD_OVERLAYS
        .get(key)
        .map(|overlay| overlay.clone())
        .unwrap_or_default()
}

/// The overlay registered under the given context name, created on first
/// access.
pub fn context_local(name: &str) -> Arc<Overlay> {
    CONTEXT_OVERLAYS
        .entry(name.to_string())
        .or_default()
        .clone()
}

/// Drops every registered overlay. Intended for tests which need a clean
/// process-global state.
pub fn clear_all() {
    CONTEXT_OVERLAYS.clear();
    THREAD_OVERLAYS.clear();
}

#[cfg(test)]
mod tests {
    use crate::factory::FactoryBuilder;
    use crate::name::TypedName;
    use crate::overlay;
    use crate::rule::Rule;

    #[test]
    fn should_isolate_context_overlays() {
        let a = overlay::context_local("context-isolation-a");
        let b = overlay::context_local("context-isolation-b");

        a.set("n", 1i64);

        assert!(!a.is_empty());
        assert!(b.is_empty());
        assert!(!overlay::context_local("context-isolation-a").is_empty());

        a.clear();
    }

    #[test]
    fn should_hand_out_unregistered_overlay_for_unknown_thread_key() {
        let stray = overlay::thread("thread-that-never-existed");
        stray.set("n", 1i64);

        // the mutation stayed on the unregistered instance
        assert!(overlay::thread("thread-that-never-existed").is_empty());
    }

    #[test]
    fn should_expose_thread_overlay_across_threads_by_key() {
        let (key, overlay) = std::thread::spawn(|| {
            let overlay = overlay::current_thread();
            overlay.set("cross", 7i64);
            (overlay::current_thread_key(), overlay)
        })
        .join()
        .unwrap();

        let seen = overlay::thread(&key);
        assert!(!seen.is_empty());

        overlay.clear();
    }

    #[test]
    fn should_apply_thread_overlay_only_on_its_thread() {
        let name = TypedName::<i64>::new("overlay-scoped-n");

        let overlay = overlay::current_thread();
        overlay.set("overlay-scoped-n", 42i64);

        let factory = FactoryBuilder::new().without_discovery().build().unwrap();
        assert_eq!(*factory.component(&name).unwrap(), 42);

        // a build on another thread does not see this thread's overlay
        let other = std::thread::spawn({
            let name = name.clone();
            move || {
                let factory = FactoryBuilder::new().without_discovery().build().unwrap();
                factory.component(&name).is_err()
            }
        })
        .join()
        .unwrap();
        assert!(other);

        overlay.clear();
    }

    #[test]
    fn should_snapshot_overlay_at_build_time() {
        let name = TypedName::<i64>::new("overlay-snapshot-n");

        let overlay = overlay::current_thread();
        overlay.set("overlay-snapshot-n", 1i64);

        let factory = FactoryBuilder::new().without_discovery().build().unwrap();

        overlay.set("overlay-snapshot-other", 2i64);
        overlay.clear();

        // the factory still resolves from the snapshot taken at build time
        assert_eq!(*factory.component(&name).unwrap(), 1);
    }

    #[test]
    fn should_register_overlay_rules_at_overriding_priority() {
        let overlay = overlay::context_local("priority-check");
        overlay.set("x", 5i64);

        let rules = overlay.snapshot();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].priority(), overlay::OVERLAY_RULE_PRIORITY);

        overlay.clear();
    }
}
