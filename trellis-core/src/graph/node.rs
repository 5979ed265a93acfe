//! Graph Nodes
//!
//! This module defines the arena records that live inside a graph: resources,
//! behaviors, extents and lifetimes. Nodes refer to each other by index, never
//! by pointer, so the mutual resource/behavior sets and the lifetime
//! hierarchy carry no reference cycles.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::GraphResult;
use crate::reactive::{Demand, Extent, Resource, Subscriber};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }

            /// Get the raw ID value.
            pub fn raw(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Identifier of a resource within its graph.
    ResourceId,
    "resource"
);
arena_id!(
    /// Identifier of a behavior within its graph.
    BehaviorId,
    "behavior"
);
arena_id!(
    /// Identifier of an extent within its graph.
    ExtentId,
    "extent"
);
arena_id!(
    /// Identifier of a lifetime record within its graph.
    LifetimeId,
    "lifetime"
);

/// The kind of value a resource carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResourceKind {
    /// A valueless resource, used for ordering or plain notification.
    Plain,

    /// A transient occurrence, visible only during the event it happened in.
    Moment,

    /// Durable state with duplicate filtering.
    State,
}

/// Where a behavior is in the incremental ordering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderingState {
    /// Constructed, but its links have never been tracked.
    Untracked,

    /// Its order may be stale and must be recomputed.
    NeedsOrdering,

    /// Collected into the current ordering pass.
    Clearing,

    /// On the depth-first stack of the current ordering pass.
    Ordering,

    /// Its order is consistent with its suppliers.
    Ordered,
}

/// Lifecycle of an extent relative to its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtentStatus {
    /// Constructed but not yet added.
    Pending,

    /// Added during the event with this sequence number.
    Added(u64),

    /// Removed during the event with this sequence number.
    Removed(u64),
}

impl ExtentStatus {
    /// Whether the extent is currently part of the graph.
    pub fn is_added(self) -> bool {
        matches!(self, Self::Added(_))
    }
}

/// A value slot the graph must reset when an event closes.
pub(crate) trait Transient: Send + Sync {
    fn clear(&self);
}

/// A resolved demand edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Link {
    pub(crate) resource: ResourceId,
    pub(crate) ordering_only: bool,
}

pub(crate) type RunFn = Arc<dyn Fn(&Extent) -> GraphResult<()> + Send + Sync>;
pub(crate) type DemandsFn = Arc<dyn Fn(&Extent) -> GraphResult<Vec<Option<Demand>>> + Send + Sync>;
pub(crate) type SuppliesFn =
    Arc<dyn Fn(&Extent) -> GraphResult<Vec<Option<Resource>>> + Send + Sync>;

/// What the engine does when a behavior is popped from the queue.
#[derive(Clone)]
pub(crate) enum BehaviorRun {
    /// Run the user's closure.
    User(RunFn),

    /// Recompute the dynamic links of another behavior.
    Relink(Relink),
}

#[derive(Clone)]
pub(crate) struct Relink {
    pub(crate) target: BehaviorId,
    pub(crate) demands: Option<DemandsFn>,
    pub(crate) supplies: Option<SuppliesFn>,
}

/// A resource in the graph.
pub(crate) struct ResourceNode {
    pub(crate) label: Option<String>,
    pub(crate) kind: ResourceKind,
    pub(crate) extent: ExtentId,

    /// The single behavior allowed to update this resource.
    pub(crate) supplied_by: Option<BehaviorId>,

    /// Behaviors that demand this resource.
    pub(crate) subsequents: IndexSet<BehaviorId>,

    /// Sequence of the last event that updated this resource.
    pub(crate) touched_in: Option<u64>,

    pub(crate) subscribers: Vec<Subscriber>,
}

impl ResourceNode {
    pub(crate) fn new(kind: ResourceKind, extent: ExtentId, label: Option<String>) -> Self {
        Self {
            label,
            kind,
            extent,
            supplied_by: None,
            subsequents: IndexSet::new(),
            touched_in: None,
            subscribers: Vec::new(),
        }
    }
}

/// A behavior in the graph.
pub(crate) struct BehaviorNode {
    pub(crate) label: Option<String>,
    pub(crate) extent: ExtentId,
    pub(crate) run: BehaviorRun,

    /// Links fixed at construction.
    pub(crate) static_demands: SmallVec<[Link; 4]>,
    pub(crate) static_supplies: SmallVec<[ResourceId; 4]>,

    /// Links last set by relinking.
    pub(crate) dynamic_demands: Vec<Link>,
    pub(crate) dynamic_supplies: Vec<ResourceId>,

    /// Tracked links, as committed by the last update pass.
    pub(crate) demands: IndexSet<ResourceId>,
    pub(crate) ordering_demands: IndexSet<ResourceId>,
    pub(crate) supplies: IndexSet<ResourceId>,

    pub(crate) order: u32,
    pub(crate) ordering: OrderingState,
    pub(crate) enqueued_when: Option<u64>,
    pub(crate) removed_when: Option<u64>,
}

impl BehaviorNode {
    pub(crate) fn new(
        extent: ExtentId,
        label: Option<String>,
        run: BehaviorRun,
        static_demands: SmallVec<[Link; 4]>,
        static_supplies: SmallVec<[ResourceId; 4]>,
    ) -> Self {
        Self {
            label,
            extent,
            run,
            static_demands,
            static_supplies,
            dynamic_demands: Vec::new(),
            dynamic_supplies: Vec::new(),
            demands: IndexSet::new(),
            ordering_demands: IndexSet::new(),
            supplies: IndexSet::new(),
            order: 0,
            ordering: OrderingState::Untracked,
            enqueued_when: None,
            removed_when: None,
        }
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed_when.is_some()
    }

    /// Every demanded resource, static first, mapped to whether the demand
    /// is ordering-only. A resource demanded both ways counts as reactive.
    pub(crate) fn wanted_demands(&self) -> IndexMap<ResourceId, bool> {
        let mut wanted = IndexMap::new();
        for link in self.static_demands.iter().chain(self.dynamic_demands.iter()) {
            let ordering_only = wanted.entry(link.resource).or_insert(true);
            *ordering_only &= link.ordering_only;
        }
        wanted
    }

    pub(crate) fn wanted_supplies(&self) -> IndexSet<ResourceId> {
        self.static_supplies
            .iter()
            .chain(self.dynamic_supplies.iter())
            .copied()
            .collect()
    }
}

/// An extent's registration record.
pub(crate) struct ExtentNode {
    pub(crate) label: Option<String>,
    pub(crate) handle: Extent,
    pub(crate) resources: Vec<ResourceId>,
    pub(crate) behaviors: Vec<BehaviorId>,
    pub(crate) status: ExtentStatus,
    pub(crate) lifetime: Option<LifetimeId>,
}

/// Extents sharing one lifetime, plus that lifetime's place in the hierarchy.
#[derive(Default)]
pub(crate) struct LifetimeNode {
    pub(crate) extents: IndexSet<ExtentId>,
    pub(crate) children: IndexSet<LifetimeId>,
    pub(crate) parents: IndexSet<LifetimeId>,
    pub(crate) added_when: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(index: usize, ordering_only: bool) -> Link {
        Link {
            resource: ResourceId::from_index(index),
            ordering_only,
        }
    }

    fn behavior(static_demands: &[Link], dynamic_demands: &[Link]) -> BehaviorNode {
        let mut node = BehaviorNode::new(
            ExtentId::from_index(0),
            None,
            BehaviorRun::User(Arc::new(|_| Ok(()))),
            static_demands.iter().copied().collect(),
            SmallVec::new(),
        );
        node.dynamic_demands = dynamic_demands.to_vec();
        node
    }

    #[test]
    fn ids_display_with_their_kind() {
        assert_eq!(ResourceId::from_index(3).to_string(), "resource#3");
        assert_eq!(BehaviorId::from_index(0).to_string(), "behavior#0");
        assert_eq!(ExtentId::from_index(7).raw(), 7);
    }

    #[test]
    fn new_behavior_starts_untracked() {
        let node = behavior(&[], &[]);
        assert_eq!(node.ordering, OrderingState::Untracked);
        assert_eq!(node.order, 0);
        assert!(!node.is_removed());
    }

    #[test]
    fn reactive_demand_wins_over_ordering_demand() {
        let node = behavior(&[link(1, true)], &[link(1, false), link(2, true)]);
        let wanted: Vec<_> = node.wanted_demands().into_iter().collect();
        assert_eq!(
            wanted,
            vec![
                (ResourceId::from_index(1), false),
                (ResourceId::from_index(2), true)
            ]
        );

        let node = behavior(&[link(1, false)], &[link(1, true)]);
        let wanted: Vec<_> = node.wanted_demands().into_iter().collect();
        assert_eq!(wanted, vec![(ResourceId::from_index(1), false)]);
    }

    #[test]
    fn supplies_merge_static_and_dynamic() {
        let mut node = behavior(&[], &[]);
        node.static_supplies.push(ResourceId::from_index(4));
        node.dynamic_supplies = vec![ResourceId::from_index(5), ResourceId::from_index(4)];
        let wanted: Vec<_> = node.wanted_supplies().into_iter().collect();
        assert_eq!(
            wanted,
            vec![ResourceId::from_index(4), ResourceId::from_index(5)]
        );
    }

    #[test]
    fn extent_status_reports_membership() {
        assert!(!ExtentStatus::Pending.is_added());
        assert!(ExtentStatus::Added(2).is_added());
        assert!(!ExtentStatus::Removed(3).is_added());
    }
}
