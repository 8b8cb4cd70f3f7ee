//! The factory: an immutable set of rules, the customizer engines built
//! during bootstrap, and a warehouse of memoized components. Factories are
//! assembled by [FactoryBuilder], which runs a fixed-point loop so rules may
//! themselves be produced by other rules.

use crate::customizer::CustomizerEnginePtr;
use crate::engine::EnginePtr;
use crate::error::{FactoryError, UnsatisfiedDependencies};
use crate::metrics::{InMemoryMetricsSink, MetricsSinkPtr};
use crate::name::{ComponentPtr, Name, NamedComponent, TypedName};
use crate::overlay::Overlay;
use crate::query::{no_rule_cause, unsatisfied, BoundQuery, Query, QueryKind};
use crate::resolver::Resolver;
use crate::rule::{bucket, Rule, RulePtr, RuleSet};
use crate::warehouse::{CloseFailure, Warehouse};
use fxhash::FxHashSet;
use itertools::Itertools;
use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Handle to a factory, injectable as a component. The factory satisfies
/// [Query::factory] and its own well-known name with one of these, so
/// engines can depend on the factory which is building them without creating
/// a reference cycle with the warehouse.
#[derive(Clone)]
pub struct FactoryRef {
    inner: Weak<FactoryInner>,
}

impl FactoryRef {
    /// The factory this handle points to; `None` once it has been dropped.
    pub fn upgrade(&self) -> Option<Factory> {
        self.inner.upgrade().map(|inner| Factory { inner })
    }
}

impl fmt::Debug for FactoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FactoryRef")
    }
}

struct FactoryInner {
    rules: RuleSet,
    /// Rules in effective order: priority ascending, insertion order on ties.
    sorted_rules: Vec<RulePtr>,
    customizer_engines: Vec<CustomizerEnginePtr>,
    warehouse: Arc<Warehouse>,
    metrics: MetricsSinkPtr,
}

/// An immutable component factory. Cloning is cheap and clones share the
/// same rules and warehouse; rule-set changes go through [Factory::concat]
/// or a new [FactoryBuilder].
#[derive(Clone)]
pub struct Factory {
    inner: Arc<FactoryInner>,
}

impl Factory {
    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::new()
    }

    /// The well-known name under which every factory answers for itself.
    pub fn self_name() -> Name {
        Name::of::<FactoryRef>("factory")
    }

    fn assemble(
        rules: RuleSet,
        customizer_engines: Vec<CustomizerEnginePtr>,
        warehouse: Arc<Warehouse>,
        metrics: MetricsSinkPtr,
    ) -> Result<Factory, FactoryError> {
        rules.check_duplicates()?;
        let sorted_rules = rules.sorted_rules();

        Ok(Factory {
            inner: Arc::new(FactoryInner {
                rules,
                sorted_rules,
                customizer_engines,
                warehouse,
                metrics,
            }),
        })
    }

    pub fn query_by_name<T: Send + Sync + 'static>(&self, name: &TypedName<T>) -> BoundQuery<'_> {
        Query::by_name(name).bind(self)
    }

    pub fn query_by_type<T: Send + Sync + 'static>(&self) -> BoundQuery<'_> {
        Query::by_type::<T>().bind(self)
    }

    pub fn query_factory(&self) -> BoundQuery<'_> {
        Query::factory().bind(self)
    }

    /// Builds (or fetches) the component registered under `name`.
    pub fn component<T: Send + Sync + 'static>(
        &self,
        name: &TypedName<T>,
    ) -> Result<ComponentPtr<T>, FactoryError> {
        let query = Query::by_name(name);
        query
            .bind(self)
            .find_one()?
            .ok_or_else(|| {
                unsatisfied(
                    &query,
                    format!("the engine for {} produced no component", name.name()),
                )
            })?
            .downcast::<T>()
    }

    /// Builds every component of type `T`; an empty result is not an error.
    pub fn components<T: Send + Sync + 'static>(
        &self,
    ) -> Result<Vec<ComponentPtr<T>>, FactoryError> {
        Query::by_type::<T>()
            .optional()
            .bind(self)
            .find_as_components()
    }

    /// Builds every component whose engine is flagged for automatic start
    /// and invokes its start hook.
    pub fn start(&self) -> Result<(), FactoryError> {
        let names = self
            .inner
            .sorted_rules
            .iter()
            .flat_map(|rule| rule.names_produced())
            .unique()
            .filter(|name| {
                self.effective_engine_for(name)
                    .map(|engine| engine.auto_start())
                    .unwrap_or(false)
            })
            .collect_vec();

        for name in names {
            self.find_query(&Query::by_name(name.clone()))?;
            if let Some((component, hook)) = self.inner.warehouse.start_hook(&name) {
                hook(&component).map_err(|source| FactoryError::StartFailure {
                    name: name.clone(),
                    source,
                })?;
                debug!(name = %name, "started component");
            }
        }

        Ok(())
    }

    /// Closes the warehouse, releasing built components in reverse build
    /// order. Idempotent; the factory handle itself stays usable for
    /// diagnostics.
    pub fn close(&self) -> Vec<CloseFailure> {
        self.inner.warehouse.close()
    }

    /// A new factory with one extra rule, sharing every component already
    /// built by this one through the warehouse provider chain.
    pub fn concat(&self, rule: impl Rule + 'static) -> Result<Factory, FactoryError> {
        let mut rules = self.inner.rules.clone();
        rules.push(bucket::PROGRAMMATIC, Arc::new(rule));

        Factory::assemble(
            rules,
            self.inner.customizer_engines.clone(),
            Arc::new(Warehouse::with_providers(vec![self.inner.warehouse.clone()])),
            self.inner.metrics.clone(),
        )
    }

    pub fn rules(&self) -> &RuleSet {
        &self.inner.rules
    }

    pub fn warehouse(&self) -> &Arc<Warehouse> {
        &self.inner.warehouse
    }

    pub(crate) fn metrics(&self) -> &MetricsSinkPtr {
        &self.inner.metrics
    }

    pub(crate) fn customizer_engines(&self) -> &[CustomizerEnginePtr] {
        &self.inner.customizer_engines
    }

    pub(crate) fn is_self(&self, name: &Name) -> bool {
        *name == Self::self_name()
    }

    pub(crate) fn self_component(&self) -> NamedComponent {
        NamedComponent::from_ptr(
            Self::self_name(),
            Arc::new(FactoryRef {
                inner: Arc::downgrade(&self.inner),
            }),
        )
    }

    /// The names a query targets, without building anything. By-type
    /// enumeration walks the rules in effective order and deduplicates by
    /// name, so overridden declarations silently collapse.
    pub(crate) fn candidate_names(&self, query: &Query) -> Vec<Name> {
        match query.kind() {
            QueryKind::ByName(name) => vec![name.clone()],
            QueryKind::Factory => vec![Self::self_name()],
            QueryKind::ByType { type_id, .. } => {
                let mut names = Vec::new();
                if *type_id == TypeId::of::<FactoryRef>() {
                    names.push(Self::self_name());
                }
                names.extend(
                    self.inner
                        .sorted_rules
                        .iter()
                        .flat_map(|rule| rule.names_produced_for(*type_id)),
                );
                names.into_iter().unique().collect_vec()
            }
        }
    }

    /// Every rule able to build `name`, in effective order.
    pub(crate) fn rules_for(&self, name: &Name) -> Vec<RulePtr> {
        self.inner
            .sorted_rules
            .iter()
            .filter(|rule| rule.can_build(name))
            .cloned()
            .collect_vec()
    }

    /// The engine of the highest-priority rule able to build `name`.
    pub(crate) fn effective_engine_for(&self, name: &Name) -> Option<EnginePtr> {
        self.inner
            .sorted_rules
            .iter()
            .filter(|rule| rule.can_build(name))
            .find_map(|rule| rule.engine_for(name))
    }

    /// Already-available component for `name`: the factory itself, or a
    /// warehouse hit (including providers).
    pub(crate) fn lookup_built(&self, name: &Name) -> Option<NamedComponent> {
        if self.is_self(name) {
            Some(self.self_component())
        } else {
            self.inner.warehouse.check_out(name)
        }
    }

    pub(crate) fn find_query(&self, query: &Query) -> Result<Vec<NamedComponent>, FactoryError> {
        match query.kind() {
            QueryKind::Factory => Ok(vec![self.self_component()]),
            QueryKind::ByName(name) => {
                let name = name.clone();
                if let Some(component) = self.lookup_built(&name) {
                    return Ok(vec![component]);
                }

                match self.effective_engine_for(&name) {
                    Some(engine) => {
                        match Resolver::new(self).build(query, &name, engine)? {
                            Some(component) => Ok(vec![component]),
                            None if query.is_mandatory() => Err(unsatisfied(
                                query,
                                format!("the engine for {name} produced no component"),
                            )),
                            None => Ok(Vec::new()),
                        }
                    }
                    None if query.is_mandatory() => {
                        Err(unsatisfied(query, no_rule_cause(self, &name)))
                    }
                    None => Ok(Vec::new()),
                }
            }
            QueryKind::ByType { .. } => {
                let names = self.candidate_names(query);
                let mut components = Vec::new();
                for name in &names {
                    if let Some(component) = self.lookup_built(name) {
                        components.push(component);
                    } else if let Some(engine) = self.effective_engine_for(name) {
                        if let Some(component) = Resolver::new(self).build(query, name, engine)? {
                            components.push(component);
                        }
                    } else {
                        debug!(name = %name, "declared name has no usable engine");
                    }
                }

                if components.is_empty() && query.is_mandatory() {
                    return Err(unsatisfied(
                        query,
                        "no rule found producing components of this type",
                    ));
                }
                Ok(components)
            }
        }
    }

    pub(crate) fn check_satisfy_query(&self, query: &Query) -> Result<(), FactoryError> {
        match query.kind() {
            QueryKind::Factory => Ok(()),
            QueryKind::ByName(name) => {
                let name = name.clone();
                if self.lookup_built(&name).is_some() {
                    return Ok(());
                }

                match self.effective_engine_for(&name) {
                    Some(engine) => Resolver::new(self).check_satisfy(query, &name, engine),
                    None if query.is_mandatory() => {
                        Err(unsatisfied(query, no_rule_cause(self, &name)))
                    }
                    None => Ok(()),
                }
            }
            QueryKind::ByType { .. } => {
                let names = self.candidate_names(query);
                if names.is_empty() && query.is_mandatory() {
                    return Err(unsatisfied(
                        query,
                        "no rule found producing components of this type",
                    ));
                }

                let mut aggregate = UnsatisfiedDependencies::default();
                for name in &names {
                    if self.lookup_built(name).is_some() {
                        continue;
                    }
                    if let Some(engine) = self.effective_engine_for(name) {
                        match Resolver::new(self).check_satisfy(query, name, engine) {
                            Ok(()) => {}
                            Err(FactoryError::Unsatisfied(unsatisfied)) => {
                                aggregate.merge(unsatisfied)
                            }
                            Err(error) => return Err(error),
                        }
                    }
                }

                if aggregate.is_empty() {
                    Ok(())
                } else {
                    Err(aggregate.into())
                }
            }
        }
    }

    /// Human-readable snapshot of the factory: rules by priority and by
    /// source, buildable names with their chosen engine, overridden and
    /// inconsistent declarations, per-query satisfaction status, and the
    /// warehouse contents.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "--- factory dump ---");

        let _ = writeln!(out, "= RULES BY PRIORITY =");
        for rule in &self.inner.sorted_rules {
            let _ = writeln!(out, "  [{:>6}] {rule:?}", rule.priority());
        }

        let _ = writeln!(out, "= RULES BY SOURCE =");
        for bucket in self.inner.rules.buckets() {
            let _ = writeln!(out, "  [{}]", bucket.name());
            for rule in bucket.rules() {
                let _ = writeln!(out, "    {rule:?}");
            }
        }

        let _ = writeln!(out, "= BUILDABLE COMPONENTS =");
        let _ = writeln!(out, "  {} (built-in)", Self::self_name());
        let names = self
            .inner
            .sorted_rules
            .iter()
            .flat_map(|rule| rule.names_produced())
            .unique()
            .collect_vec();
        for name in &names {
            let rules = self.rules_for(name);
            let chosen = rules
                .iter()
                .find(|rule| rule.engine_for(name).is_some())
                .cloned();

            match chosen {
                Some(chosen) => {
                    let _ = writeln!(out, "  {name}");
                    let _ = writeln!(out, "    engine from {chosen:?}");
                    for overridden in rules
                        .iter()
                        .filter(|rule| !Arc::ptr_eq(*rule, &chosen))
                    {
                        let _ = writeln!(out, "    OVERRIDING {overridden:?}");
                    }
                    if let Some(engine) = chosen.engine_for(name) {
                        for query in engine.bom().queries() {
                            match self.check_satisfy_query(query) {
                                Ok(()) => {
                                    let _ = writeln!(out, "    {query}: satisfied");
                                }
                                Err(error) => {
                                    let _ = writeln!(out, "    {query}: UNSATISFIED: {error}");
                                }
                            }
                        }
                    }
                }
                None => {
                    let _ = writeln!(out, "  {name} INCONSISTENT: declared but not buildable");
                }
            }
        }

        let _ = writeln!(out, "= WAREHOUSE =");
        for name in self.inner.warehouse.stored_names() {
            match self.inner.warehouse.provenance(&name) {
                Some((_, duration)) => {
                    let _ = writeln!(out, "  {name} built in {duration:?}");
                }
                None => {
                    let _ = writeln!(out, "  {name}");
                }
            }
        }

        out
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("rules", &self.inner.sorted_rules.len())
            .field("customizer_engines", &self.inner.customizer_engines.len())
            .field("built", &self.inner.warehouse.stored_names().len())
            .finish()
    }
}

/// Assembles factories. Rule sources come from static discovery, explicit
/// registration and overlays; `build` runs the bootstrap fixed point before
/// handing out the final factory.
pub struct FactoryBuilder {
    rules: Vec<RulePtr>,
    sources: Vec<RulePtr>,
    overlays: Vec<Arc<Overlay>>,
    providers: Vec<Arc<Warehouse>>,
    metrics: Option<MetricsSinkPtr>,
    discovery: bool,
}

impl Default for FactoryBuilder {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            sources: Vec::new(),
            overlays: Vec::new(),
            providers: Vec::new(),
            metrics: None,
            discovery: true,
        }
    }
}

impl FactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Adds a rule to the same bucket statically discovered rule sources
    /// land in.
    pub fn add_rule_source(mut self, rule: impl Rule + 'static) -> Self {
        self.sources.push(Arc::new(rule));
        self
    }

    /// Adds an overlay beyond the calling thread's, which is always read.
    pub fn add_overlay(mut self, overlay: Arc<Overlay>) -> Self {
        self.overlays.push(overlay);
        self
    }

    /// Seeds the factory's warehouse with read-only provider warehouses.
    pub fn with_provider(mut self, warehouse: Arc<Warehouse>) -> Self {
        self.providers.push(warehouse);
        self
    }

    pub fn with_metrics_sink(mut self, sink: MetricsSinkPtr) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Skips statically registered rule sources; mainly for tests needing a
    /// precisely known rule set.
    pub fn without_discovery(mut self) -> Self {
        self.discovery = false;
        self
    }

    /// Snapshots overlays, runs the meta-rule fixed point, builds customizer
    /// engines and assembles the final factory.
    pub fn build(self) -> Result<Factory, FactoryError> {
        let metrics: MetricsSinkPtr = self
            .metrics
            .unwrap_or_else(|| Arc::new(InMemoryMetricsSink::new()));

        let mut rules = RuleSet::new();
        if self.discovery {
            for rule in crate::discovery::discovered_rules() {
                rules.push(bucket::DISCOVERED, rule);
            }
        }
        for rule in self.sources {
            rules.push(bucket::DISCOVERED, rule);
        }
        for rule in self.rules {
            rules.push(bucket::PROGRAMMATIC, rule);
        }

        let mut overlays = self.overlays;
        overlays.push(crate::overlay::current_thread());
        for overlay in overlays {
            for rule in overlay.snapshot() {
                rules.push(bucket::OVERLAY, rule);
            }
        }

        let rules = Self::bootstrap_rules(rules, &metrics)?;
        let customizer_engines = Self::bootstrap_customizer_engines(&rules, &metrics)?;

        let warehouse = Arc::new(if self.providers.is_empty() {
            Warehouse::new()
        } else {
            Warehouse::with_providers(self.providers)
        });

        let factory = Factory::assemble(rules, customizer_engines, warehouse, metrics)?;
        debug!(rules = factory.inner.sorted_rules.len(), "factory ready");
        Ok(factory)
    }

    /// Iteratively builds every component of type [RulePtr] and feeds it
    /// back into the working rule set, until a round discovers nothing new.
    /// Each round probes with a fresh immutable factory. A round which adds
    /// nothing while builds are still failing reports those failures.
    fn bootstrap_rules(
        mut rules: RuleSet,
        metrics: &MetricsSinkPtr,
    ) -> Result<RuleSet, FactoryError> {
        let rule_query = Query::by_type::<RulePtr>().optional();
        let mut built: FxHashSet<Name> = FxHashSet::default();
        let mut round = 0u32;

        loop {
            round += 1;
            let probe = Factory::assemble(
                rules.clone(),
                Vec::new(),
                Arc::new(Warehouse::new()),
                metrics.clone(),
            )?;

            let pending = probe
                .candidate_names(&rule_query)
                .into_iter()
                .filter(|name| !built.contains(name))
                .collect_vec();
            if pending.is_empty() {
                break;
            }

            let mut failed = UnsatisfiedDependencies::default();
            let mut added = 0usize;
            for name in pending {
                match probe.find_query(&Query::by_name(name.clone())) {
                    Ok(components) => {
                        if let Some(component) = components.into_iter().next() {
                            let rule = (*component.downcast::<RulePtr>()?).clone();
                            rules.push(bucket::BOOTSTRAP, rule);
                            built.insert(name);
                            added += 1;
                        }
                    }
                    Err(FactoryError::Unsatisfied(unsatisfied)) => failed.merge(unsatisfied),
                    Err(error) => return Err(error),
                }
            }

            debug!(round, added, "bootstrap round finished");
            if added == 0 {
                if failed.is_empty() {
                    break;
                }
                return Err(failed.into());
            }
        }

        Ok(rules)
    }

    /// Builds every component of type [CustomizerEnginePtr] once the rule
    /// set is stable. Customizer engines are built with a customizer-free
    /// probe factory, so customizers are never customized themselves.
    fn bootstrap_customizer_engines(
        rules: &RuleSet,
        metrics: &MetricsSinkPtr,
    ) -> Result<Vec<CustomizerEnginePtr>, FactoryError> {
        let probe = Factory::assemble(
            rules.clone(),
            Vec::new(),
            Arc::new(Warehouse::new()),
            metrics.clone(),
        )?;

        let query = Query::by_type::<CustomizerEnginePtr>().optional();
        let mut engines = Vec::new();
        for name in probe.candidate_names(&query) {
            let components = probe.find_query(&Query::by_name(name))?;
            if let Some(component) = components.into_iter().next() {
                engines.push((*component.downcast::<CustomizerEnginePtr>()?).clone());
            }
        }

        Ok(engines)
    }
}

#[cfg(test)]
mod tests {
    use crate::customizer::{CustomizerEnginePtr, SingleCustomizerEngine};
    use crate::engine::{AutoStartable, Bom, Closeable, LifecycleHooks, StdEngine};
    use crate::error::{ErrorPtr, FactoryError};
    use crate::factory::{Factory, FactoryBuilder, FactoryRef};
    use crate::metrics::{InMemoryMetricsSink, MockMetricsSink};
    use crate::name::{Name, TypedName};
    use crate::query::Query;
    use crate::rule::{bucket, Rule, RulePtr, SingletonRule, StdRule};
    use std::any::TypeId;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn builder() -> FactoryBuilder {
        FactoryBuilder::new().without_discovery()
    }

    /// A string component copying the value of another string component.
    fn depends(id: &str, dependency: &str) -> StdRule {
        let dependency = Query::by_name(&TypedName::<String>::new(dependency));
        StdRule::new(StdEngine::new(
            TypedName::<String>::new(id),
            Bom::of([dependency.clone()]),
            move |bom| Ok((*bom.one_as::<String>(&dependency)?).clone()),
        ))
    }

    #[test]
    fn should_build_chain_in_dependency_order() {
        let factory = builder()
            .add_rule(SingletonRule::new(TypedName::<String>::new("c"), "ok".to_string()))
            .add_rule(depends("b", "c"))
            .add_rule(depends("a", "b"))
            .build()
            .unwrap();

        let a = factory.component(&TypedName::<String>::new("a")).unwrap();
        assert_eq!(*a, "ok");

        assert_eq!(
            factory.warehouse().stored_names(),
            [
                Name::of::<String>("c"),
                Name::of::<String>("b"),
                Name::of::<String>("a"),
            ]
        );

        let dump = factory.dump();
        assert!(dump.contains("satisfied"));
        assert!(!dump.contains("UNSATISFIED"));
    }

    #[test]
    fn should_memoize_components_and_invoke_engine_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting_calls = calls.clone();

        let name = TypedName::<String>::new("counted");
        let factory = builder()
            .add_rule(StdRule::new(StdEngine::new(name.clone(), Bom::empty(), move |_| {
                counting_calls.fetch_add(1, Ordering::SeqCst);
                Ok("built".to_string())
            })))
            .build()
            .unwrap();

        let first = factory.component(&name).unwrap();
        let second = factory.component(&name).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_prefer_lowest_priority_rule_and_report_overriding() {
        let name = TypedName::<String>::new("x");
        let factory = builder()
            .add_rule(
                SingletonRule::new(name.clone(), "default".to_string()).with_priority(10),
            )
            .add_rule(
                SingletonRule::new(name.clone(), "override".to_string()).with_priority(-100),
            )
            .build()
            .unwrap();

        assert_eq!(*factory.component(&name).unwrap(), "override");
        assert!(factory.dump().contains("OVERRIDING"));
    }

    #[test]
    fn should_reject_dependency_cycles() {
        let factory = builder()
            .add_rule(depends("a", "b"))
            .add_rule(depends("b", "a"))
            .build()
            .unwrap();

        match factory.component(&TypedName::<String>::new("a")).unwrap_err() {
            FactoryError::Cycle { names } => {
                assert_eq!(
                    names,
                    [Name::of::<String>("a"), Name::of::<String>("b")]
                );
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn should_report_missing_rule_with_query_path() {
        struct Widget;

        let factory = builder()
            .add_rule(StdRule::new(StdEngine::new(
                TypedName::<String>::new("a"),
                Bom::of([Query::by_type::<Widget>()]),
                |_| Ok("never".to_string()),
            )))
            .build()
            .unwrap();

        match factory.component(&TypedName::<String>::new("a")).unwrap_err() {
            FactoryError::Unsatisfied(unsatisfied) => {
                let dependency = &unsatisfied.dependencies()[0];
                assert_eq!(
                    dependency.path(),
                    ["QueryByName{a[String]}", "QueryByType{Widget}"]
                );
                assert!(dependency.cause().contains("no rule"));
            }
            other => panic!("expected unsatisfied dependency, got {other}"),
        }
    }

    #[test]
    fn should_accumulate_every_missing_leaf() {
        struct WidgetA;
        struct WidgetB;

        let factory = builder()
            .add_rule(StdRule::new(StdEngine::new(
                TypedName::<String>::new("root"),
                Bom::of([Query::by_type::<WidgetA>(), Query::by_type::<WidgetB>()]),
                |_| Ok("never".to_string()),
            )))
            .build()
            .unwrap();

        match factory.component(&TypedName::<String>::new("root")).unwrap_err() {
            FactoryError::Unsatisfied(unsatisfied) => {
                assert_eq!(unsatisfied.dependencies().len(), 2);
            }
            other => panic!("expected unsatisfied dependencies, got {other}"),
        }
    }

    #[test]
    fn should_include_same_type_names_as_hint() {
        let factory = builder()
            .add_rule(SingletonRule::new(TypedName::<String>::new("known"), "v".to_string()))
            .build()
            .unwrap();

        let error = factory
            .component(&TypedName::<String>::new("unknown"))
            .unwrap_err();
        assert!(error.to_string().contains("known"));
    }

    #[test]
    fn should_converge_meta_rules_to_a_fixed_point() {
        let produced = TypedName::<String>::new("produced-by-r");
        let meta = StdRule::new(StdEngine::new(
            TypedName::<RulePtr>::new("rule-r"),
            Bom::empty(),
            move |_| {
                Ok(Arc::new(SingletonRule::new(produced.clone(), "from-r".to_string()))
                    as RulePtr)
            },
        ));

        let factory = builder().add_rule(meta).build().unwrap();

        assert_eq!(
            *factory
                .component(&TypedName::<String>::new("produced-by-r"))
                .unwrap(),
            "from-r"
        );
        assert!(factory
            .rules()
            .buckets()
            .iter()
            .any(|bucket| bucket.name() == bucket::BOOTSTRAP && !bucket.rules().is_empty()));
    }

    #[test]
    fn should_report_meta_rules_which_never_become_buildable() {
        struct Widget;

        let meta = StdRule::new(StdEngine::new(
            TypedName::<RulePtr>::new("rule-x"),
            Bom::of([Query::by_type::<Widget>()]),
            |_| {
                Ok(Arc::new(SingletonRule::new(TypedName::<i64>::new("n"), 1i64)) as RulePtr)
            },
        ));

        match builder().add_rule(meta).build().unwrap_err() {
            FactoryError::Unsatisfied(unsatisfied) => {
                assert!(!unsatisfied.is_empty());
            }
            other => panic!("expected unsatisfied dependencies, got {other}"),
        }
    }

    fn customizer_engine_rule(id: &str, label: &str, priority: i32, suffix: &str) -> StdRule {
        let label = label.to_string();
        let suffix = suffix.to_string();
        StdRule::new(StdEngine::new(
            TypedName::<CustomizerEnginePtr>::new(id),
            Bom::empty(),
            move |_| {
                let suffix = suffix.clone();
                Ok(Arc::new(SingleCustomizerEngine::for_type::<String, _>(
                    label.clone(),
                    priority,
                    move |_, value| format!("{value}{suffix}"),
                )) as CustomizerEnginePtr)
            },
        ))
    }

    #[test]
    fn should_apply_customizers_sorted_by_priority_with_stable_ties() {
        let name = TypedName::<String>::new("x");
        let factory = builder()
            .add_rule(SingletonRule::new(name.clone(), "base".to_string()))
            .add_rule(customizer_engine_rule("ce-a", "append-a", 5, "a"))
            .add_rule(customizer_engine_rule("ce-b", "append-b", 5, "b"))
            .add_rule(customizer_engine_rule("ce-z", "append-z", 1, "z"))
            .build()
            .unwrap();

        assert_eq!(*factory.component(&name).unwrap(), "basezab");
    }

    #[test]
    fn should_satisfy_factory_queries_from_bills_of_materials() {
        let name = TypedName::<bool>::new("sees-factory");
        let factory = builder()
            .add_rule(StdRule::new(StdEngine::new(
                name.clone(),
                Bom::of([Query::factory()]),
                |bom| {
                    let factory = bom.one_as::<FactoryRef>(&Query::factory())?;
                    Ok(factory.upgrade().is_some())
                },
            )))
            .build()
            .unwrap();

        assert!(*factory.component(&name).unwrap());
    }

    #[test]
    fn should_succeed_factory_query_on_empty_rule_set() {
        let factory = builder().build().unwrap();

        let component = factory.query_factory().find_one().unwrap().unwrap();
        assert_eq!(component.name(), &Factory::self_name());
        assert!(component.downcast::<FactoryRef>().is_ok());

        assert!(factory
            .component(&TypedName::<String>::new("anything"))
            .is_err());
    }

    #[test]
    fn should_close_idempotently() {
        let factory = builder().build().unwrap();
        assert!(factory.close().is_empty());
        assert!(factory.close().is_empty());
    }

    #[test]
    fn should_share_built_components_through_concat() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting_calls = calls.clone();

        let name = TypedName::<String>::new("shared");
        let extra = TypedName::<i64>::new("extra");

        let factory = builder()
            .add_rule(StdRule::new(StdEngine::new(name.clone(), Bom::empty(), move |_| {
                counting_calls.fetch_add(1, Ordering::SeqCst);
                Ok("shared".to_string())
            })))
            .build()
            .unwrap();

        let first = factory.component(&name).unwrap();
        assert!(factory.component(&extra).is_err());

        let extended = factory
            .concat(SingletonRule::new(extra.clone(), 9i64))
            .unwrap();
        let second = extended.component(&name).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*extended.component(&extra).unwrap(), 9);
        // the original factory is unaffected
        assert!(factory.component(&extra).is_err());
    }

    #[test]
    fn should_check_satisfy_exactly_when_building_would_succeed() {
        let factory = builder()
            .add_rule(SingletonRule::new(TypedName::<String>::new("c"), "ok".to_string()))
            .add_rule(depends("b", "c"))
            .add_rule(depends("broken", "missing"))
            .build()
            .unwrap();

        let b = TypedName::<String>::new("b");
        assert!(factory.query_by_name(&b).check_satisfy().is_ok());
        assert!(factory.component(&b).is_ok());

        let broken = TypedName::<String>::new("broken");
        assert!(factory.query_by_name(&broken).check_satisfy().is_err());
        assert!(factory.component(&broken).is_err());
    }

    #[test]
    fn should_raise_ambiguous_on_multi_match_find_one() {
        let factory = builder()
            .add_rule(SingletonRule::new(TypedName::<u8>::new("one"), 1u8))
            .add_rule(SingletonRule::new(TypedName::<u8>::new("two"), 2u8))
            .build()
            .unwrap();

        assert!(matches!(
            factory.query_by_type::<u8>().find_one().unwrap_err(),
            FactoryError::Ambiguous { ref candidates, .. } if candidates.len() == 2
        ));
        assert_eq!(factory.components::<u8>().unwrap().len(), 2);
    }

    #[test]
    fn should_satisfy_optional_multi_queries_with_empty_collections() {
        struct Widget;

        let dependency = Query::by_type::<Widget>().optional();
        let name = TypedName::<usize>::new("counter");
        let factory = builder()
            .add_rule(StdRule::new(StdEngine::new(
                name.clone(),
                Bom::of([dependency.clone()]),
                move |bom| Ok(bom.components(&dependency).len()),
            )))
            .build()
            .unwrap();

        assert_eq!(*factory.component(&name).unwrap(), 0);
        assert!(factory.components::<Widget>().unwrap().is_empty());
    }

    #[test]
    fn should_propagate_absent_engine_output() {
        let name = TypedName::<String>::new("maybe");
        let factory = builder()
            .add_rule(StdRule::new(StdEngine::optional(
                name.clone(),
                Bom::empty(),
                |_| Ok(None::<String>),
            )))
            .build()
            .unwrap();

        // the mandatory flag of the consuming query applies
        assert!(factory.component(&name).is_err());
        assert!(Query::by_name(&name)
            .optional()
            .bind(&factory)
            .find()
            .unwrap()
            .is_empty());
        // nothing was checked in
        assert!(factory.warehouse().stored_names().is_empty());
    }

    #[test]
    fn should_fail_parents_of_absent_mandatory_dependencies() {
        let child = TypedName::<String>::new("absent-child");
        let factory = builder()
            .add_rule(StdRule::new(StdEngine::optional(
                child.clone(),
                Bom::empty(),
                |_| Ok(None::<String>),
            )))
            .add_rule(depends("parent", "absent-child"))
            .build()
            .unwrap();

        let error = factory
            .component(&TypedName::<String>::new("parent"))
            .unwrap_err();
        assert!(error.to_string().contains("produced no component"));
    }

    #[test]
    fn should_start_auto_start_components() {
        struct Service {
            started: AtomicBool,
        }

        impl AutoStartable for Service {
            fn start(&self) -> Result<(), ErrorPtr> {
                self.started.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let name = TypedName::<Service>::new("service");
        let factory = builder()
            .add_rule(StdRule::new(
                StdEngine::new(name.clone(), Bom::empty(), |_| {
                    Ok(Service {
                        started: AtomicBool::new(false),
                    })
                })
                .with_auto_start()
                .with_hooks(LifecycleHooks::startable::<Service>()),
            ))
            .build()
            .unwrap();

        factory.start().unwrap();

        let service = factory.component(&name).unwrap();
        assert!(service.started.load(Ordering::SeqCst));
    }

    #[test]
    fn should_release_components_on_close() {
        struct Connection {
            closed: Arc<AtomicBool>,
        }

        impl Closeable for Connection {
            fn close(&self) -> Result<(), ErrorPtr> {
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();

        let name = TypedName::<Connection>::new("connection");
        let factory = builder()
            .add_rule(StdRule::new(
                StdEngine::new(name.clone(), Bom::empty(), move |_| {
                    Ok(Connection {
                        closed: closed_flag.clone(),
                    })
                })
                .with_hooks(LifecycleHooks::closeable::<Connection>()),
            ))
            .build()
            .unwrap();

        factory.component(&name).unwrap();
        assert!(factory.close().is_empty());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn should_record_build_and_customize_timers() {
        let sink = Arc::new(InMemoryMetricsSink::new());

        let name = TypedName::<String>::new("timed");
        let factory = builder()
            .with_metrics_sink(sink.clone())
            .add_rule(SingletonRule::new(name.clone(), "v".to_string()))
            .add_rule(customizer_engine_rule("ce", "tagger", 0, "!"))
            .build()
            .unwrap();

        factory.component(&name).unwrap();

        let stats = sink.timer("<BUILD> String").unwrap();
        assert!(stats.count >= 1);
        assert!(sink
            .snapshot()
            .iter()
            .any(|(key, _)| key == "<CUSTOMIZE> timed[String] <WITH> tagger"));
    }

    #[test]
    fn should_report_single_build_to_the_metrics_sink() {
        let mut sink = MockMetricsSink::new();
        sink.expect_record_timer()
            .withf(|key, _| key == "<BUILD> i64")
            .times(1)
            .return_const(());

        let name = TypedName::<i64>::new("n");
        let factory = builder()
            .with_metrics_sink(Arc::new(sink))
            .add_rule(SingletonRule::new(name.clone(), 4i64))
            .build()
            .unwrap();

        factory.component(&name).unwrap();
        factory.component(&name).unwrap();
    }

    #[test]
    fn should_reject_duplicate_names_within_a_bucket() {
        let name = TypedName::<i64>::new("dup");
        let result = builder()
            .add_rule(SingletonRule::new(name.clone(), 1i64))
            .add_rule(SingletonRule::new(name, 2i64))
            .build();

        assert!(matches!(result, Err(FactoryError::DuplicateName { .. })));
    }

    #[test]
    fn should_report_inconsistent_declarations_in_dump() {
        #[derive(Debug)]
        struct BrokenRule;

        impl Rule for BrokenRule {
            fn names_produced(&self) -> Vec<Name> {
                vec![Name::of::<String>("declared-only")]
            }

            fn can_build(&self, _name: &Name) -> bool {
                false
            }

            fn engine_for(&self, _name: &Name) -> Option<crate::engine::EnginePtr> {
                None
            }
        }

        let factory = builder().add_rule(BrokenRule).build().unwrap();
        assert!(factory.dump().contains("INCONSISTENT"));
    }

    #[test]
    fn should_enumerate_names_by_type_in_priority_order() {
        let factory = builder()
            .add_rule(SingletonRule::new(TypedName::<u8>::new("late"), 1u8).with_priority(5))
            .add_rule(SingletonRule::new(TypedName::<u8>::new("early"), 2u8).with_priority(-5))
            .build()
            .unwrap();

        assert_eq!(
            factory.query_by_type::<u8>().find_names(),
            [Name::of::<u8>("early"), Name::of::<u8>("late")]
        );
        // the factory answers for its own well-known type
        assert_eq!(
            factory.query_by_type::<FactoryRef>().find_names(),
            [Factory::self_name()]
        );
        assert_eq!(
            Factory::self_name().type_id(),
            TypeId::of::<FactoryRef>()
        );
    }
}
