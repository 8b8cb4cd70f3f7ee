//! The resolution engine. A request for a name is expanded breadth-first
//! into a graph of pending builds, sorted topologically (leaves first), and
//! materialized in dependency-safe order: satisfy the bill of materials,
//! invoke the engine, customize the resulting box, check it in.

use crate::engine::{ComponentBox, EnginePtr, SatisfiedBom};
use crate::error::{FactoryError, UnsatisfiedDependencies, UnsatisfiedDependency};
use crate::factory::Factory;
use crate::metrics::{build_timer_key, customize_timer_key};
use crate::name::{Name, NamedComponent};
use crate::query::{no_rule_cause, Query};
use fxhash::FxHashMap;
use itertools::Itertools;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// Transient node of the resolution graph.
struct BuildingBox {
    engine: EnginePtr,
    /// Query chain from the root request down to this box, for diagnostics.
    path: Vec<Query>,
    /// Names resolved for each query of the engine's bill of materials.
    bom_names: Vec<(Query, Vec<Name>)>,
    /// Outgoing edges: names this box needs built first.
    deps: Vec<Name>,
    /// Incoming edges: boxes waiting on this one, one entry per edge.
    predecessors: Vec<Name>,
}

struct Graph {
    boxes: FxHashMap<Name, BuildingBox>,
    /// Insertion order, kept so the build order is deterministic.
    insertion: Vec<Name>,
}

impl Graph {
    fn insert(&mut self, name: Name, building: BuildingBox) {
        self.insertion.push(name.clone());
        self.boxes.insert(name, building);
    }
}

pub(crate) struct Resolver<'f> {
    factory: &'f Factory,
}

impl<'f> Resolver<'f> {
    pub(crate) fn new(factory: &'f Factory) -> Self {
        Self { factory }
    }

    /// Builds `name` with `engine`, along with everything it transitively
    /// needs, and returns the checked-in component.
    pub(crate) fn build(
        &self,
        root_query: &Query,
        name: &Name,
        engine: EnginePtr,
    ) -> Result<Option<NamedComponent>, FactoryError> {
        let graph = self.construct_graph(root_query, name, engine)?;
        let order = topological_order(&graph)?;
        self.materialize(&graph, &order)?;

        Ok(self.factory.lookup_built(name))
    }

    /// Validates that the transitive bill of materials of `name` can be
    /// satisfied, without invoking any engine.
    pub(crate) fn check_satisfy(
        &self,
        root_query: &Query,
        name: &Name,
        engine: EnginePtr,
    ) -> Result<(), FactoryError> {
        let graph = self.construct_graph(root_query, name, engine)?;
        topological_order(&graph).map(|_| ())
    }

    /// Breadth-first expansion of the dependency graph. Unsatisfied leaves
    /// are accumulated over the whole pass so one error reports all of them.
    fn construct_graph(
        &self,
        root_query: &Query,
        name: &Name,
        engine: EnginePtr,
    ) -> Result<Graph, FactoryError> {
        let mut graph = Graph {
            boxes: FxHashMap::default(),
            insertion: Vec::new(),
        };
        let mut queue = VecDeque::new();
        let mut unsatisfied = UnsatisfiedDependencies::default();

        graph.insert(
            name.clone(),
            BuildingBox {
                engine,
                path: vec![root_query.clone()],
                bom_names: Vec::new(),
                deps: Vec::new(),
                predecessors: Vec::new(),
            },
        );
        queue.push_back(name.clone());

        while let Some(current) = queue.pop_front() {
            let (engine, path) = match graph.boxes.get(&current) {
                Some(building) => (building.engine.clone(), building.path.clone()),
                None => continue,
            };

            for query in engine.bom().queries() {
                let candidates = self.factory.candidate_names(query);
                let mut resolved = Vec::new();
                let mut edges = Vec::new();

                for candidate in &candidates {
                    if self.factory.is_self(candidate)
                        || self.factory.warehouse().check_out(candidate).is_some()
                    {
                        resolved.push(candidate.clone());
                    } else if graph.boxes.contains_key(candidate) {
                        resolved.push(candidate.clone());
                        edges.push(candidate.clone());
                    } else {
                        match self.factory.effective_engine_for(candidate) {
                            Some(child_engine) => {
                                let mut child_path = path.clone();
                                child_path.push(query.clone());
                                graph.insert(
                                    candidate.clone(),
                                    BuildingBox {
                                        engine: child_engine,
                                        path: child_path,
                                        bom_names: Vec::new(),
                                        deps: Vec::new(),
                                        predecessors: Vec::new(),
                                    },
                                );
                                queue.push_back(candidate.clone());
                                resolved.push(candidate.clone());
                                edges.push(candidate.clone());
                            }
                            None if query.is_mandatory() => {
                                unsatisfied.push(UnsatisfiedDependency::with_path(
                                    render_path(&path, query),
                                    no_rule_cause(self.factory, candidate),
                                ));
                            }
                            None => {}
                        }
                    }
                }

                if candidates.is_empty() && query.is_mandatory() {
                    unsatisfied.push(UnsatisfiedDependency::with_path(
                        render_path(&path, query),
                        "no rule found producing components of this type",
                    ));
                }

                if let Some(parent) = graph.boxes.get_mut(&current) {
                    parent.bom_names.push((query.clone(), resolved));
                }
                for child in edges {
                    let new_edge = graph
                        .boxes
                        .get_mut(&current)
                        .map(|parent| {
                            if parent.deps.contains(&child) {
                                false
                            } else {
                                parent.deps.push(child.clone());
                                true
                            }
                        })
                        .unwrap_or(false);
                    if new_edge {
                        if let Some(child_box) = graph.boxes.get_mut(&child) {
                            child_box.predecessors.push(current.clone());
                        }
                    }
                }
            }
        }

        if unsatisfied.is_empty() {
            Ok(graph)
        } else {
            Err(unsatisfied.into())
        }
    }

    fn materialize(&self, graph: &Graph, order: &[Name]) -> Result<(), FactoryError> {
        for name in order {
            let building = match graph.boxes.get(name) {
                Some(building) => building,
                None => continue,
            };
            // another thread may have won the race for this name already
            if self.factory.lookup_built(name).is_some() {
                continue;
            }

            let satisfied = self.satisfy_bom(building)?;

            let started = Instant::now();
            let boxed = building.engine.build(&satisfied)?;
            let build_duration = started.elapsed();
            self.factory
                .metrics()
                .record_timer(&build_timer_key(name), build_duration);
            debug!(name = %name, ?build_duration, "built component");

            let boxed = if boxed.is_absent() {
                boxed
            } else {
                self.customize(boxed)
            };

            self.factory
                .warehouse()
                .check_in(boxed, satisfied, build_duration);
        }

        Ok(())
    }

    fn satisfy_bom(&self, building: &BuildingBox) -> Result<SatisfiedBom, FactoryError> {
        let mut satisfied = SatisfiedBom::empty();
        for (query, names) in &building.bom_names {
            let components = names
                .iter()
                .filter_map(|name| self.factory.lookup_built(name))
                .collect_vec();

            if components.is_empty() && !names.is_empty() && query.is_mandatory() {
                return Err(UnsatisfiedDependencies::of(UnsatisfiedDependency::with_path(
                    render_path(&building.path, query),
                    "the engine produced no component",
                ))
                .into());
            }

            satisfied.insert(query.clone(), components);
        }

        Ok(satisfied)
    }

    fn customize(&self, boxed: ComponentBox) -> ComponentBox {
        let name = boxed.name().clone();
        let mut customizers = self
            .factory
            .customizer_engines()
            .iter()
            .filter(|engine| engine.can_customize(&name))
            .filter_map(|engine| engine.customizer_for(&name))
            .filter(|customizer| customizer.applies_to(&name))
            .collect_vec();
        // stable sort keeps insertion order for equal priorities
        customizers.sort_by_key(|customizer| customizer.priority());

        let mut boxed = boxed;
        for customizer in customizers {
            let started = Instant::now();
            boxed = boxed.customize(customizer.as_ref());
            let duration = started.elapsed();
            self.factory.metrics().record_timer(
                &customize_timer_key(&name, customizer.as_ref()),
                duration,
            );
            debug!(name = %name, customizer = ?customizer, "customized component");
        }

        boxed
    }
}

fn render_path(path: &[Query], failing: &Query) -> Vec<String> {
    path.iter()
        .map(ToString::to_string)
        .chain([failing.to_string()])
        .collect_vec()
}

/// Kahn's algorithm over the resolution graph: leaves first, root last.
fn topological_order(graph: &Graph) -> Result<Vec<Name>, FactoryError> {
    let mut remaining: FxHashMap<&Name, usize> = graph
        .boxes
        .iter()
        .map(|(name, building)| (name, building.deps.len()))
        .collect();
    let mut queue: VecDeque<Name> = graph
        .insertion
        .iter()
        .filter(|name| remaining.get(*name).copied() == Some(0))
        .cloned()
        .collect();

    let mut order = Vec::with_capacity(graph.boxes.len());
    while let Some(name) = queue.pop_front() {
        if let Some(building) = graph.boxes.get(&name) {
            for predecessor in &building.predecessors {
                if let Some(count) = remaining.get_mut(predecessor) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(predecessor.clone());
                    }
                }
            }
        }
        order.push(name);
    }

    if order.len() == graph.boxes.len() {
        Ok(order)
    } else {
        let mut names = graph
            .boxes
            .keys()
            .filter(|name| !order.contains(name))
            .cloned()
            .collect_vec();
        names.sort();
        Err(FactoryError::Cycle { names })
    }
}
