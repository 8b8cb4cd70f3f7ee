//! Rules (factory machines) declare which names they can produce and hand
//! out an [Engine] per declared name. A factory holds its rules grouped in
//! source buckets; within a factory the effective rule for a name is the one
//! with the lowest priority, ties broken by insertion order.

use crate::engine::{BoxKind, Engine, EnginePtr, StdEngine};
use crate::error::FactoryError;
use crate::name::{AnyComponentPtr, Name, TypedName};
use derivative::Derivative;
use fxhash::FxHashMap;
use itertools::Itertools;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

pub type RulePtr = Arc<dyn Rule>;

/// A named producer of engines for a set of component names. Implementations
/// must be side-effect-free: `engine_for` may be called repeatedly and only
/// for declared names.
pub trait Rule: Send + Sync + fmt::Debug {
    /// Smaller priorities are consulted first and override larger ones.
    fn priority(&self) -> i32 {
        0
    }

    /// Every name this rule can produce, for any component type.
    fn names_produced(&self) -> Vec<Name>;

    /// The declared names whose component type matches `target`.
    fn names_produced_for(&self, target: TypeId) -> Vec<Name> {
        self.names_produced()
            .into_iter()
            .filter(|name| name.type_id() == target)
            .collect_vec()
    }

    fn can_build(&self, name: &Name) -> bool {
        self.names_produced().iter().any(|produced| produced == name)
    }

    fn engine_for(&self, name: &Name) -> Option<EnginePtr>;
}

/// Rule producing an already-built value under a fixed name. Every lookup
/// yields the same shared instance.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SingletonRule {
    priority: i32,
    name: Name,
    #[derivative(Debug = "ignore")]
    engine: Arc<StdEngine>,
}

impl SingletonRule {
    pub fn new<T: Send + Sync + 'static>(name: TypedName<T>, value: T) -> Self {
        Self::from_ptr(name.into_name(), Arc::new(value))
    }

    pub fn from_ptr(name: Name, value: AnyComponentPtr) -> Self {
        let engine = StdEngine::erased(name.clone(), crate::engine::Bom::empty(), move |_| {
            Ok(Some(value.clone()))
        })
        .with_kind(BoxKind::Singleton);

        Self {
            priority: 0,
            name,
            engine: Arc::new(engine),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Rule for SingletonRule {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn names_produced(&self) -> Vec<Name> {
        vec![self.name.clone()]
    }

    fn engine_for(&self, name: &Name) -> Option<EnginePtr> {
        (*name == self.name).then(|| self.engine.clone() as EnginePtr)
    }
}

/// Rule assembled from one or more engines.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct StdRule {
    priority: i32,
    names: Vec<Name>,
    #[derivative(Debug = "ignore")]
    engines: Vec<EnginePtr>,
}

impl StdRule {
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self {
            priority: 0,
            names: vec![engine.name().clone()],
            engines: vec![Arc::new(engine)],
        }
    }

    pub fn with_engine(mut self, engine: impl Engine + 'static) -> Self {
        self.names.push(engine.name().clone());
        self.engines.push(Arc::new(engine));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Rule for StdRule {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn names_produced(&self) -> Vec<Name> {
        self.names.clone()
    }

    fn engine_for(&self, name: &Name) -> Option<EnginePtr> {
        self.engines
            .iter()
            .find(|engine| engine.name() == name)
            .cloned()
    }
}

/// Source bucket names used by the builder.
pub mod bucket {
    /// Rules found through static registration plus explicit rule sources.
    pub const DISCOVERED: &str = "discovered";
    /// Rules added directly on the builder or through `concat`.
    pub const PROGRAMMATIC: &str = "programmatic";
    /// Rules snapshotted from overlays at build time.
    pub const OVERLAY: &str = "overlay";
    /// Rules produced by other rules during bootstrap.
    pub const BOOTSTRAP: &str = "bootstrap";
}

/// Rules grouped by the source they came from, preserving insertion order.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    buckets: Vec<RuleBucket>,
}

#[derive(Clone, Debug)]
pub struct RuleBucket {
    name: String,
    rules: Vec<RulePtr>,
}

impl RuleBucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[RulePtr] {
        &self.rules
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bucket: &str, rule: RulePtr) {
        match self.buckets.iter_mut().find(|b| b.name == bucket) {
            Some(existing) => existing.rules.push(rule),
            None => self.buckets.push(RuleBucket {
                name: bucket.to_string(),
                rules: vec![rule],
            }),
        }
    }

    pub fn buckets(&self) -> &[RuleBucket] {
        &self.buckets
    }

    pub fn all_rules(&self) -> impl Iterator<Item = &RulePtr> {
        self.buckets.iter().flat_map(|bucket| bucket.rules.iter())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rules in effective order: stable sort by priority, insertion order
    /// preserved for equal priorities.
    pub fn sorted_rules(&self) -> Vec<RulePtr> {
        self.all_rules()
            .cloned()
            .sorted_by_key(|rule| rule.priority())
            .collect_vec()
    }

    /// Rejects two rules of one bucket declaring the same name at the same
    /// priority, since neither could override the other.
    pub(crate) fn check_duplicates(&self) -> Result<(), FactoryError> {
        for bucket in &self.buckets {
            let mut seen: FxHashMap<(Name, i32), usize> = FxHashMap::default();
            for rule in &bucket.rules {
                for name in rule.names_produced() {
                    let priority = rule.priority();
                    let counter = seen.entry((name.clone(), priority)).or_insert(0);
                    *counter += 1;
                    if *counter > 1 {
                        return Err(FactoryError::DuplicateName {
                            bucket: bucket.name.clone(),
                            name,
                            priority,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
