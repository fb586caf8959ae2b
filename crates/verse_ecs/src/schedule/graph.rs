//! The system graph and its compilation into an executable schedule.

use super::condition::BoxedCondition;
use super::config::{
    Ambiguity, DependencyKind, GraphInfo, ScheduleConfig, ScheduleConfigs, ScheduleSystem,
};
use super::label::{AnonymousSet, InternedSystemSet, SystemSet};
use crate::bitset::BitSet;
use crate::component::{ComponentId, Components};
use crate::system::System;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// A node of the schedule graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NodeId {
    System(usize),
    Set(usize),
}

/// A small directed graph with deterministic (insertion-ordered) iteration.
#[derive(Default)]
pub(crate) struct DiGraph {
    adjacency: IndexMap<NodeId, Vec<NodeId>>,
}

impl DiGraph {
    pub(crate) fn add_node(&mut self, node: NodeId) {
        self.adjacency.entry(node).or_default();
    }

    pub(crate) fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_node(to);
        let edges = self.adjacency.entry(from).or_default();
        if !edges.contains(&to) {
            edges.push(to);
        }
    }

    pub(crate) fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.adjacency
            .iter()
            .flat_map(|(&from, tos)| tos.iter().map(move |&to| (from, to)))
    }

    /// Kahn's algorithm. On a cycle, returns the nodes stuck in it.
    pub(crate) fn topsort(&self) -> Result<Vec<NodeId>, Vec<NodeId>> {
        let mut in_degree: IndexMap<NodeId, usize> =
            self.adjacency.keys().map(|&node| (node, 0)).collect();
        for (_, to) in self.edges() {
            *in_degree.get_mut(&to).expect("edge target is a node") += 1;
        }
        let mut queue: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&node, _)| node)
            .collect();
        let mut sorted = Vec::with_capacity(in_degree.len());
        let mut cursor = 0;
        while cursor < queue.len() {
            let node = queue[cursor];
            cursor += 1;
            sorted.push(node);
            for &next in self.neighbors(node) {
                let degree = in_degree.get_mut(&next).expect("edge target is a node");
                *degree -= 1;
                if *degree == 0 {
                    queue.push(next);
                }
            }
        }
        if sorted.len() == in_degree.len() {
            Ok(sorted)
        } else {
            Err(in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&node, _)| node)
                .collect())
        }
    }
}

/// A failure to compile the graph into a runnable order. Surfaced when the
/// schedule is first built; each kind has its own variant.
#[derive(Error, Debug)]
pub enum ScheduleBuildError {
    #[error("the system-set hierarchy contains a cycle involving: {0}")]
    HierarchyCycle(String),
    #[error("the dependency graph contains a cycle involving: {0}")]
    DependencyCycle(String),
    #[error("{0} and {1} have both an `in_set` and a `before`/`after` relationship")]
    CrossDependency(String, String),
    #[error(
        "systems with conflicting access have indeterminate run order; \
         order them explicitly or mark them `ambiguous_with` each other:\n{0}"
    )]
    Ambiguity(String),
}

pub(crate) struct SystemNode {
    pub(crate) system: Option<ScheduleSystem>,
    pub(crate) conditions: Vec<BoxedCondition>,
}

/// The user-facing graph of systems, sets, ordering edges and conditions.
/// [`ScheduleGraph::build`] compiles it into a [`SystemSchedule`].
#[derive(Default)]
pub struct ScheduleGraph {
    pub(crate) systems: Vec<SystemNode>,
    pub(crate) system_sets: Vec<InternedSystemSet>,
    pub(crate) system_set_conditions: Vec<Vec<BoxedCondition>>,
    system_set_ids: HashMap<InternedSystemSet, usize>,
    hierarchy: DiGraph,
    dependency: DiGraph,
    dependency_kinds: HashMap<(NodeId, NodeId), DependencyKind>,
    ambiguous_with: Vec<(NodeId, NodeId)>,
    ambiguous_with_all: HashSet<NodeId>,
    pub(crate) changed: bool,
}

impl ScheduleGraph {
    pub(crate) fn add_systems(&mut self, configs: ScheduleConfigs<ScheduleSystem>) {
        self.process_system_configs(configs);
    }

    fn process_system_configs(&mut self, configs: ScheduleConfigs<ScheduleSystem>) -> Vec<NodeId> {
        match configs {
            ScheduleConfigs::Node(config) => vec![self.add_system_inner(config)],
            ScheduleConfigs::Configs {
                mut configs,
                collective_conditions,
                chained,
            } => {
                if !collective_conditions.is_empty() {
                    // a tuple's collective conditions gate an anonymous set
                    // containing every member
                    let set = AnonymousSet::new().intern();
                    for config in &mut configs {
                        config.in_set_inner(set.clone());
                    }
                    let set_id = self.get_or_add_set(set);
                    self.system_set_conditions[set_id].extend(collective_conditions);
                }
                let mut all_nodes = Vec::new();
                let mut previous: Vec<NodeId> = Vec::new();
                for config in configs {
                    let nodes = self.process_system_configs(config);
                    if chained {
                        for &before in &previous {
                            for &after in &nodes {
                                self.dependency.add_edge(before, after);
                                self.dependency_kinds
                                    .insert((before, after), DependencyKind::Before);
                            }
                        }
                    }
                    previous = nodes.clone();
                    all_nodes.extend(nodes);
                }
                all_nodes
            }
        }
    }

    fn add_system_inner(&mut self, config: ScheduleConfig<ScheduleSystem>) -> NodeId {
        let ScheduleConfig {
            node: system,
            mut graph_info,
            conditions,
        } = config;
        if let Some(type_set) = system.type_set() {
            graph_info.hierarchy.push(type_set);
        }
        let id = NodeId::System(self.systems.len());
        self.systems.push(SystemNode {
            system: Some(system),
            conditions,
        });
        self.hierarchy.add_node(id);
        self.dependency.add_node(id);
        self.apply_graph_info(id, graph_info);
        id
    }

    pub(crate) fn configure_sets(&mut self, configs: ScheduleConfigs<InternedSystemSet>) {
        self.process_set_configs(configs);
    }

    fn process_set_configs(&mut self, configs: ScheduleConfigs<InternedSystemSet>) -> Vec<NodeId> {
        match configs {
            ScheduleConfigs::Node(config) => vec![self.configure_set_inner(config)],
            ScheduleConfigs::Configs {
                mut configs,
                collective_conditions,
                chained,
            } => {
                if !collective_conditions.is_empty() {
                    let set = AnonymousSet::new().intern();
                    for config in &mut configs {
                        config.in_set_inner(set.clone());
                    }
                    let set_id = self.get_or_add_set(set);
                    self.system_set_conditions[set_id].extend(collective_conditions);
                }
                let mut all_nodes = Vec::new();
                let mut previous: Vec<NodeId> = Vec::new();
                for config in configs {
                    let nodes = self.process_set_configs(config);
                    if chained {
                        for &before in &previous {
                            for &after in &nodes {
                                self.dependency.add_edge(before, after);
                                self.dependency_kinds
                                    .insert((before, after), DependencyKind::Before);
                            }
                        }
                    }
                    previous = nodes.clone();
                    all_nodes.extend(nodes);
                }
                all_nodes
            }
        }
    }

    fn configure_set_inner(&mut self, config: ScheduleConfig<InternedSystemSet>) -> NodeId {
        let ScheduleConfig {
            node: set,
            graph_info,
            conditions,
        } = config;
        let set_id = self.get_or_add_set(set);
        self.system_set_conditions[set_id].extend(conditions);
        let id = NodeId::Set(set_id);
        self.apply_graph_info(id, graph_info);
        id
    }

    fn get_or_add_set(&mut self, set: InternedSystemSet) -> usize {
        if let Some(&id) = self.system_set_ids.get(&set) {
            return id;
        }
        let id = self.system_sets.len();
        self.system_sets.push(set.clone());
        self.system_set_conditions.push(Vec::new());
        self.system_set_ids.insert(set, id);
        self.hierarchy.add_node(NodeId::Set(id));
        self.dependency.add_node(NodeId::Set(id));
        self.changed = true;
        id
    }

    fn apply_graph_info(&mut self, node: NodeId, graph_info: GraphInfo) {
        for set in graph_info.hierarchy {
            let set_id = self.get_or_add_set(set);
            self.hierarchy.add_edge(NodeId::Set(set_id), node);
        }
        for dependency in graph_info.dependencies {
            let set_id = self.get_or_add_set(dependency.set);
            let target = NodeId::Set(set_id);
            let (from, to) = match dependency.kind {
                DependencyKind::Before | DependencyKind::BeforeNoSync => (node, target),
                DependencyKind::After | DependencyKind::AfterNoSync => (target, node),
            };
            self.dependency.add_edge(from, to);
            self.dependency_kinds.insert((from, to), dependency.kind);
        }
        match graph_info.ambiguous_with {
            Ambiguity::Check => {}
            Ambiguity::IgnoreWithSet(sets) => {
                for set in sets {
                    let set_id = self.get_or_add_set(set);
                    self.ambiguous_with.push((node, NodeId::Set(set_id)));
                }
            }
            Ambiguity::IgnoreAll => {
                self.ambiguous_with_all.insert(node);
            }
        }
        self.changed = true;
    }

    /// The declared kind of an ordering edge, if one exists. The executors
    /// do not currently distinguish the `NoSync` kinds (deferred buffers
    /// only flush at explicit barriers and schedule end), but the intent is
    /// preserved here.
    pub fn dependency_kind(&self, from: NodeId, to: NodeId) -> Option<DependencyKind> {
        self.dependency_kinds.get(&(from, to)).copied()
    }

    fn node_name(&self, node: NodeId) -> String {
        match node {
            NodeId::System(index) => self.systems[index]
                .system
                .as_ref()
                .map(|system| system.name().into_owned())
                .unwrap_or_else(|| format!("<system {index}>")),
            NodeId::Set(index) => format!("{:?}", self.system_sets[index]),
        }
    }

    fn names(&self, nodes: &[NodeId]) -> String {
        nodes
            .iter()
            .map(|&node| self.node_name(node))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Compiles the graph. See the module docs for the passes performed.
    pub(crate) fn build(
        &mut self,
        components: &Components,
        ignored_ambiguities: &BTreeSet<ComponentId>,
    ) -> Result<SystemSchedule, ScheduleBuildError> {
        let num_systems = self.systems.len();
        let num_sets = self.system_sets.len();
        let dense = |node: NodeId| match node {
            NodeId::System(index) => index,
            NodeId::Set(index) => num_systems + index,
        };

        // (i) flatten set membership
        let hierarchy_topo = self
            .hierarchy
            .topsort()
            .map_err(|cycle| ScheduleBuildError::HierarchyCycle(self.names(&cycle)))?;
        let mut hierarchy_reach: Vec<BitSet> = (0..num_systems + num_sets)
            .map(|_| BitSet::new())
            .collect();
        for &node in hierarchy_topo.iter().rev() {
            let mut reach = BitSet::new();
            for &child in self.hierarchy.neighbors(node) {
                reach.insert(dense(child));
                reach.union_with(&hierarchy_reach[dense(child)]);
            }
            hierarchy_reach[dense(node)] = reach;
        }
        let set_systems: Vec<Vec<usize>> = (0..num_sets)
            .map(|set| {
                hierarchy_reach[num_systems + set]
                    .ones()
                    .filter(|&index| index < num_systems)
                    .collect()
            })
            .collect();

        // a set must not be ordered against one of its own members
        for (from, to) in self.dependency.edges() {
            if hierarchy_reach[dense(from)].contains(dense(to))
                || hierarchy_reach[dense(to)].contains(dense(from))
            {
                return Err(ScheduleBuildError::CrossDependency(
                    self.node_name(from),
                    self.node_name(to),
                ));
            }
        }

        // (ii, iii) expand set edges to their member systems (sets with no
        // systems stay as passthrough nodes so ordering is preserved
        // through them) and topologically sort
        let mut flat = DiGraph::default();
        for index in 0..num_systems {
            flat.add_node(NodeId::System(index));
        }
        let expand = |node: NodeId| -> Vec<NodeId> {
            match node {
                NodeId::System(index) => vec![NodeId::System(index)],
                NodeId::Set(index) if set_systems[index].is_empty() => vec![NodeId::Set(index)],
                NodeId::Set(index) => set_systems[index]
                    .iter()
                    .map(|&system| NodeId::System(system))
                    .collect(),
            }
        };
        for (from, to) in self.dependency.edges() {
            for expanded_from in expand(from) {
                for expanded_to in expand(to) {
                    if expanded_from != expanded_to {
                        flat.add_edge(expanded_from, expanded_to);
                    }
                }
            }
        }
        let topo = flat
            .topsort()
            .map_err(|cycle| ScheduleBuildError::DependencyCycle(self.names(&cycle)))?;

        // schedule order (graph system index per position)
        let order: Vec<usize> = topo
            .iter()
            .filter_map(|&node| match node {
                NodeId::System(index) => Some(index),
                NodeId::Set(_) => None,
            })
            .collect();
        let mut schedule_position = vec![usize::MAX; num_systems];
        for (position, &system) in order.iter().enumerate() {
            schedule_position[system] = position;
        }

        // reachability over the flattened graph, by topo position
        let mut topo_position: HashMap<NodeId, usize> = HashMap::new();
        for (position, &node) in topo.iter().enumerate() {
            topo_position.insert(node, position);
        }
        let mut reach: Vec<BitSet> = (0..topo.len()).map(|_| BitSet::new()).collect();
        for (position, &node) in topo.iter().enumerate().rev() {
            let mut bits = BitSet::new();
            for &next in flat.neighbors(node) {
                let next_position = topo_position[&next];
                bits.insert(next_position);
                bits.union_with(&reach[next_position]);
            }
            reach[position] = bits;
        }
        // order-relation between systems, in schedule positions
        let system_reaches = |a: usize, b: usize| -> bool {
            let (pa, pb) = (
                topo_position[&NodeId::System(order[a])],
                topo_position[&NodeId::System(order[b])],
            );
            reach[pa].contains(pb)
        };

        // (iv) pairwise conflict check between unordered systems
        let permitted = self.permitted_ambiguities(&set_systems);
        let mut ambiguities = Vec::new();
        for a in 0..order.len() {
            for b in a + 1..order.len() {
                if system_reaches(a, b) || system_reaches(b, a) {
                    continue;
                }
                let (sys_a, sys_b) = (order[a], order[b]);
                let pair = (sys_a.min(sys_b), sys_a.max(sys_b));
                if permitted.all.contains(&sys_a)
                    || permitted.all.contains(&sys_b)
                    || permitted.pairs.contains(&pair)
                {
                    continue;
                }
                let access_a = self.systems[sys_a]
                    .system
                    .as_ref()
                    .expect("system present during build")
                    .component_access();
                let access_b = self.systems[sys_b]
                    .system
                    .as_ref()
                    .expect("system present during build")
                    .component_access();
                if access_a.is_compatible(access_b) {
                    continue;
                }
                let conflicts = access_a.get_conflicts(access_b);
                if !conflicts.is_empty()
                    && conflicts.iter().all(|id| ignored_ambiguities.contains(id))
                {
                    continue;
                }
                let what = if conflicts.is_empty() {
                    "the whole world".to_string()
                } else {
                    conflicts
                        .iter()
                        .map(|&id| components.get_name(id).to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                ambiguities.push(format!(
                    "-- {} and {} conflict on: {}",
                    self.node_name(NodeId::System(sys_a)),
                    self.node_name(NodeId::System(sys_b)),
                    what
                ));
            }
        }
        if !ambiguities.is_empty() {
            return Err(ScheduleBuildError::Ambiguity(ambiguities.join("\n")));
        }

        // (v) assemble the executable schedule
        let mut dependencies = vec![0usize; order.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
        for a in 0..order.len() {
            for b in 0..order.len() {
                if a != b && system_reaches(a, b) {
                    dependencies[b] += 1;
                    dependents[a].push(b);
                }
            }
        }

        let sets_with_conditions: Vec<usize> = (0..num_sets)
            .filter(|&set| !self.system_set_conditions[set].is_empty())
            .collect();
        let mut sets_with_conditions_of_systems: Vec<BitSet> =
            (0..order.len()).map(|_| BitSet::new()).collect();
        let mut systems_in_sets_with_conditions: Vec<BitSet> =
            (0..sets_with_conditions.len()).map(|_| BitSet::new()).collect();
        for (conditioned_position, &set) in sets_with_conditions.iter().enumerate() {
            for &system in &set_systems[set] {
                let position = schedule_position[system];
                if position == usize::MAX {
                    continue;
                }
                sets_with_conditions_of_systems[position].insert(conditioned_position);
                systems_in_sets_with_conditions[conditioned_position].insert(position);
            }
        }

        let mut systems = Vec::with_capacity(order.len());
        let mut system_conditions = Vec::with_capacity(order.len());
        for &system in &order {
            let node = &mut self.systems[system];
            systems.push(node.system.take().expect("system present during build"));
            system_conditions.push(std::mem::take(&mut node.conditions));
        }
        let set_conditions = sets_with_conditions
            .iter()
            .map(|&set| std::mem::take(&mut self.system_set_conditions[set]))
            .collect();

        self.changed = false;
        Ok(SystemSchedule {
            system_ids: order,
            systems,
            system_conditions,
            system_dependencies: dependencies,
            system_dependents: dependents,
            set_ids: sets_with_conditions,
            set_conditions,
            sets_with_conditions_of_systems,
            systems_in_sets_with_conditions,
        })
    }

    /// Moves systems and conditions back from a previously built schedule so
    /// the graph can be recompiled.
    pub(crate) fn restore(&mut self, schedule: &mut SystemSchedule) {
        for &system in schedule.system_ids.iter().rev() {
            let node = &mut self.systems[system];
            node.system = Some(schedule.systems.pop().expect("schedule systems intact"));
            node.conditions = schedule
                .system_conditions
                .pop()
                .expect("schedule conditions intact");
        }
        for (&set, conditions) in schedule
            .set_ids
            .iter()
            .zip(schedule.set_conditions.drain(..))
        {
            self.system_set_conditions[set] = conditions;
        }
        schedule.system_ids.clear();
        schedule.set_ids.clear();
    }

    fn permitted_ambiguities(&self, set_systems: &[Vec<usize>]) -> PermittedAmbiguities {
        let expand = |node: NodeId| -> Vec<usize> {
            match node {
                NodeId::System(index) => vec![index],
                NodeId::Set(index) => set_systems[index].clone(),
            }
        };
        let mut permitted = PermittedAmbiguities::default();
        for &node in &self.ambiguous_with_all {
            permitted.all.extend(expand(node));
        }
        for &(a, b) in &self.ambiguous_with {
            for expanded_a in expand(a) {
                for &expanded_b in &expand(b) {
                    permitted
                        .pairs
                        .insert((expanded_a.min(expanded_b), expanded_a.max(expanded_b)));
                }
            }
        }
        permitted
    }
}

#[derive(Default)]
struct PermittedAmbiguities {
    all: HashSet<usize>,
    pairs: HashSet<(usize, usize)>,
}

/// The compiled, executable form of a schedule: systems in topological
/// order, their conditions, the dependency counts the parallel executor
/// consumes, and the set-membership bitsets used for condition-based
/// skipping.
#[derive(Default)]
pub struct SystemSchedule {
    /// Graph system index per schedule position (used to restore).
    pub(crate) system_ids: Vec<usize>,
    pub(crate) systems: Vec<ScheduleSystem>,
    pub(crate) system_conditions: Vec<Vec<BoxedCondition>>,
    /// Number of systems that must complete before each system may start.
    pub(crate) system_dependencies: Vec<usize>,
    /// Schedule positions unblocked by each system's completion.
    pub(crate) system_dependents: Vec<Vec<usize>>,
    /// Graph set index per conditioned-set position (used to restore).
    pub(crate) set_ids: Vec<usize>,
    pub(crate) set_conditions: Vec<Vec<BoxedCondition>>,
    /// Per system: which conditioned sets it belongs to.
    pub(crate) sets_with_conditions_of_systems: Vec<BitSet>,
    /// Per conditioned set: which schedule positions it contains.
    pub(crate) systems_in_sets_with_conditions: Vec<BitSet>,
}
