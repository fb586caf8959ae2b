//! Builder configs attaching ordering, set membership and conditions to
//! systems and sets before they are added to a schedule.

use super::condition::{new_condition, BoxedCondition, Condition};
use super::label::{InternedSystemSet, IntoSystemSet, SystemSet};
use crate::system::{BoxedSystem, IntoSystem};
use variadics_please::all_tuples;

/// A system as stored in a schedule.
pub type ScheduleSystem = BoxedSystem<(), ()>;

/// How an ordering edge treats deferred-flush barriers between the two
/// nodes. With no automatic sync-point insertion both kinds order
/// identically today; the distinction is kept on the edge for a future
/// sync-point pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DependencyKind {
    Before,
    After,
    BeforeNoSync,
    AfterNoSync,
}

/// One ordering constraint against a set (a plain system is addressed via
/// its type set).
pub struct Dependency {
    pub(crate) kind: DependencyKind,
    pub(crate) set: InternedSystemSet,
}

/// Ambiguity-check opt-outs for one node.
#[derive(Default)]
pub enum Ambiguity {
    /// Conflicts with unordered systems are errors.
    #[default]
    Check,
    /// Conflicts with members of these sets are permitted.
    IgnoreWithSet(Vec<InternedSystemSet>),
    /// All conflicts are permitted.
    IgnoreAll,
}

/// Everything the graph needs to know about one node's edges.
#[derive(Default)]
pub struct GraphInfo {
    pub(crate) hierarchy: Vec<InternedSystemSet>,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) ambiguous_with: Ambiguity,
}

/// A node (system or set) plus its graph info and conditions.
pub struct ScheduleConfig<T> {
    pub(crate) node: T,
    pub(crate) graph_info: GraphInfo,
    pub(crate) conditions: Vec<BoxedCondition>,
}

/// A tree of configs, as produced by tuples of systems/sets. `chained`
/// orders the children pairwise.
pub enum ScheduleConfigs<T> {
    Node(ScheduleConfig<T>),
    Configs {
        configs: Vec<ScheduleConfigs<T>>,
        collective_conditions: Vec<BoxedCondition>,
        chained: bool,
    },
}

impl<T> ScheduleConfigs<T> {
    fn for_each_node(&mut self, f: &mut impl FnMut(&mut ScheduleConfig<T>)) {
        match self {
            Self::Node(config) => f(config),
            Self::Configs { configs, .. } => {
                for config in configs {
                    config.for_each_node(f);
                }
            }
        }
    }

    pub(crate) fn in_set_inner(&mut self, set: InternedSystemSet) {
        self.for_each_node(&mut |config| {
            config.graph_info.hierarchy.push(set.clone());
        });
    }

    fn dependency_inner(&mut self, kind: DependencyKind, set: InternedSystemSet) {
        self.for_each_node(&mut |config| {
            config.graph_info.dependencies.push(Dependency {
                kind,
                set: set.clone(),
            });
        });
    }

    fn ambiguous_with_inner(&mut self, set: InternedSystemSet) {
        self.for_each_node(&mut |config| {
            match &mut config.graph_info.ambiguous_with {
                Ambiguity::Check => {
                    config.graph_info.ambiguous_with = Ambiguity::IgnoreWithSet(vec![set.clone()]);
                }
                Ambiguity::IgnoreWithSet(sets) => sets.push(set.clone()),
                Ambiguity::IgnoreAll => {}
            }
        });
    }

    fn ambiguous_with_all_inner(&mut self) {
        self.for_each_node(&mut |config| {
            config.graph_info.ambiguous_with = Ambiguity::IgnoreAll;
        });
    }

    fn run_if_inner(&mut self, condition: BoxedCondition) {
        match self {
            Self::Node(config) => config.conditions.push(condition),
            Self::Configs {
                collective_conditions,
                ..
            } => collective_conditions.push(condition),
        }
    }
}

/// Types that can be added to a schedule, with ordering/condition
/// combinators. `T` is the node type: [`ScheduleSystem`] for systems,
/// [`InternedSystemSet`] for set configuration.
pub trait IntoScheduleConfigs<T, Marker>: Sized {
    fn into_configs(self) -> ScheduleConfigs<T>;

    /// Adds the nodes to `set`.
    fn in_set(self, set: impl SystemSet + Clone) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        assert!(
            set.system_type().is_none(),
            "cannot add arbitrary systems to a system-type set"
        );
        configs.in_set_inner(set.intern());
        configs
    }

    /// Orders these nodes before `other`.
    fn before<M>(self, other: impl IntoSystemSet<M>) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.dependency_inner(DependencyKind::Before, other.into_system_set().intern());
        configs
    }

    /// Orders these nodes after `other`.
    fn after<M>(self, other: impl IntoSystemSet<M>) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.dependency_inner(DependencyKind::After, other.into_system_set().intern());
        configs
    }

    /// Like [`before`](Self::before), without forcing a deferred-flush
    /// barrier between the two nodes.
    fn before_ignore_deferred<M>(self, other: impl IntoSystemSet<M>) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.dependency_inner(DependencyKind::BeforeNoSync, other.into_system_set().intern());
        configs
    }

    /// Like [`after`](Self::after), without forcing a deferred-flush barrier
    /// between the two nodes.
    fn after_ignore_deferred<M>(self, other: impl IntoSystemSet<M>) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.dependency_inner(DependencyKind::AfterNoSync, other.into_system_set().intern());
        configs
    }

    /// Gates the node (a whole tuple gets an anonymous set) on a condition.
    fn run_if<M>(self, condition: impl Condition<M>) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.run_if_inner(new_condition(condition));
        configs
    }

    /// Clones the condition onto each contained system individually.
    fn distributive_run_if<M>(
        self,
        condition: impl Condition<M> + Clone,
    ) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.for_each_node(&mut |config| {
            config.conditions.push(new_condition(condition.clone()));
        });
        configs
    }

    /// Suppresses the ambiguity error between these nodes and `other`.
    fn ambiguous_with<M>(self, other: impl IntoSystemSet<M>) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.ambiguous_with_inner(other.into_system_set().intern());
        configs
    }

    /// Suppresses all ambiguity errors involving these nodes.
    fn ambiguous_with_all(self) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        configs.ambiguous_with_all_inner();
        configs
    }

    /// Orders the tuple's members pairwise (first before second, and so on).
    fn chain(self) -> ScheduleConfigs<T> {
        let mut configs = self.into_configs();
        if let ScheduleConfigs::Configs { chained, .. } = &mut configs {
            *chained = true;
        }
        configs
    }
}

impl<T> IntoScheduleConfigs<T, ()> for ScheduleConfigs<T> {
    fn into_configs(self) -> ScheduleConfigs<T> {
        self
    }
}

/// Marker for the system impl of [`IntoScheduleConfigs`].
pub struct SystemConfigMarker;

impl<Marker, F> IntoScheduleConfigs<ScheduleSystem, (SystemConfigMarker, Marker)> for F
where
    F: IntoSystem<(), (), Marker>,
{
    fn into_configs(self) -> ScheduleConfigs<ScheduleSystem> {
        let system: ScheduleSystem = Box::new(IntoSystem::into_system(self));
        ScheduleConfigs::Node(ScheduleConfig {
            node: system,
            graph_info: GraphInfo::default(),
            conditions: Vec::new(),
        })
    }
}

/// Marker for the set impl of [`IntoScheduleConfigs`].
pub struct SetConfigMarker;

impl<S> IntoScheduleConfigs<InternedSystemSet, SetConfigMarker> for S
where
    S: SystemSet + Clone,
{
    fn into_configs(self) -> ScheduleConfigs<InternedSystemSet> {
        assert!(
            self.system_type().is_none(),
            "system type sets cannot be configured"
        );
        ScheduleConfigs::Node(ScheduleConfig {
            node: self.intern(),
            graph_info: GraphInfo::default(),
            conditions: Vec::new(),
        })
    }
}

macro_rules! impl_schedule_config_tuple {
    ($(#[$meta:meta])* $(($config: ident, $marker: ident)),*) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        impl<T, $($config, $marker),*> IntoScheduleConfigs<T, (($($marker,)*),)> for ($($config,)*)
        where
            $($config: IntoScheduleConfigs<T, $marker>),*
        {
            fn into_configs(self) -> ScheduleConfigs<T> {
                let ($($config,)*) = self;
                ScheduleConfigs::Configs {
                    configs: vec![$($config.into_configs()),*],
                    collective_conditions: Vec::new(),
                    chained: false,
                }
            }
        }
    };
}

all_tuples!(impl_schedule_config_tuple, 1, 16, C, M);
