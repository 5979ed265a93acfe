//! Behavior Implementation
//!
//! A Behavior is a unit of computation with declared demands (resources it
//! reads) and supplies (resources it writes). It runs at most once per event,
//! after the suppliers of everything it demands.
//!
//! # How Dynamic Links Work
//!
//! Demands and supplies can be static, fixed when the behavior is built, or
//! dynamic, recomputed whenever one of a set of "switch" resources updates.
//!
//! For a behavior with dynamic links the builder creates two more nodes in
//! the same extent:
//!
//! - a placeholder resource that only carries ordering, and
//! - a relinking behavior demanding the switches and the extent's `did_add`
//!   state, so links are also computed in the event the extent is added.
//!
//! With [`RelinkingOrder::Prior`] the relinking behavior supplies the
//! placeholder and the main behavior ordering-demands it, so relinking runs
//! first. With [`RelinkingOrder::Subsequent`] the roles are reversed.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::GraphResult;
use crate::graph::{
    BehaviorId, BehaviorNode, BehaviorRun, DemandsFn, Link, Relink, ResourceId, ResourceKind,
    SuppliesFn, WeakGraph,
};

use super::extent::Extent;
use super::resource::{Demand, Linkable, Resource};

/// When the relinking behavior runs relative to the behavior it relinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelinkingOrder {
    /// Relink before the main behavior runs.
    #[default]
    Prior,

    /// Relink after the main behavior runs.
    Subsequent,
}

/// Handle to a behavior in a graph.
#[derive(Clone)]
pub struct Behavior {
    graph: WeakGraph,
    id: BehaviorId,
}

impl Behavior {
    pub(crate) fn from_parts(graph: WeakGraph, id: BehaviorId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> BehaviorId {
        self.id
    }

    /// Topological depth; behaviors with lower orders run first.
    pub fn order(&self) -> GraphResult<u32> {
        let graph = self.graph.upgrade()?;
        let order = graph.lock().behaviors[self.id.index()].order;
        Ok(order)
    }

    /// The resources this behavior currently demands, ordering-only
    /// demands included.
    pub fn demands(&self) -> GraphResult<Vec<ResourceId>> {
        let graph = self.graph.upgrade()?;
        let state = graph.lock();
        Ok(state.behaviors[self.id.index()].demands.iter().copied().collect())
    }

    pub fn supplies(&self) -> GraphResult<Vec<ResourceId>> {
        let graph = self.graph.upgrade()?;
        let state = graph.lock();
        Ok(state.behaviors[self.id.index()].supplies.iter().copied().collect())
    }

    pub fn describe(&self) -> GraphResult<String> {
        let graph = self.graph.upgrade()?;
        let description = graph.lock().describe_behavior(self.id);
        Ok(description.unwrap_or_else(|| self.id.to_string()))
    }

    /// Replace the dynamic demands. `None` entries are skipped.
    ///
    /// Only legal during an event, on a behavior whose extent is in the
    /// graph. The new links are committed before the next behavior runs.
    pub fn set_dynamic_demands<I>(&self, demands: I) -> GraphResult<()>
    where
        I: IntoIterator<Item = Option<Demand>>,
    {
        let graph = self.graph.upgrade()?;
        let links = graph.resolve_demands(demands.into_iter().flatten())?;
        let result = graph.lock().set_dynamic_demands(self.id, links);
        result
    }

    /// Replace the dynamic supplies. `None` entries are skipped.
    pub fn set_dynamic_supplies<I>(&self, supplies: I) -> GraphResult<()>
    where
        I: IntoIterator<Item = Option<Resource>>,
    {
        let graph = self.graph.upgrade()?;
        let resources = graph.resolve_supplies(supplies.into_iter().flatten())?;
        let result = graph.lock().set_dynamic_supplies(self.id, resources);
        result
    }
}

impl std::fmt::Debug for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Behavior").field(&self.id).finish()
    }
}

/// Builds a behavior on an extent. Created by [`Extent::behavior`].
///
/// # Example
///
/// ```rust,ignore
/// let total = extent
///     .behavior()
///     .label("total")
///     .demands(&[&price, &quantity])
///     .supplies(&[&sum])
///     .runs(move |_| sum.update(price.value()? * quantity.value()?))?;
/// ```
pub struct BehaviorBuilder {
    extent: Extent,
    label: Option<String>,
    demands: Vec<Demand>,
    supplies: Vec<Resource>,
    switches: Vec<Resource>,
    dynamic_demands: Option<DemandsFn>,
    dynamic_supplies: Option<SuppliesFn>,
    relinking_order: RelinkingOrder,
}

impl BehaviorBuilder {
    pub(crate) fn new(extent: Extent) -> Self {
        Self {
            extent,
            label: None,
            demands: Vec::new(),
            supplies: Vec::new(),
            switches: Vec::new(),
            dynamic_demands: None,
            dynamic_supplies: None,
            relinking_order: RelinkingOrder::default(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Run whenever any of `resources` updates.
    pub fn demands(mut self, resources: &[&dyn Linkable]) -> Self {
        self.demands
            .extend(resources.iter().map(|resource| resource.demand()));
        self
    }

    /// Order after the suppliers of `resources` without being activated by
    /// them.
    pub fn ordering_demands(mut self, resources: &[&dyn Linkable]) -> Self {
        self.demands
            .extend(resources.iter().map(|resource| resource.ordering_demand()));
        self
    }

    pub fn supplies(mut self, resources: &[&dyn Linkable]) -> Self {
        self.supplies
            .extend(resources.iter().map(|resource| resource.as_resource().clone()));
        self
    }

    /// Recompute demands with `compute` whenever a switch updates.
    pub fn dynamic_demands<F>(mut self, switches: &[&dyn Linkable], compute: F) -> Self
    where
        F: Fn(&Extent) -> GraphResult<Vec<Option<Demand>>> + Send + Sync + 'static,
    {
        self.add_switches(switches);
        self.dynamic_demands = Some(Arc::new(compute));
        self
    }

    /// Recompute supplies with `compute` whenever a switch updates.
    pub fn dynamic_supplies<F>(mut self, switches: &[&dyn Linkable], compute: F) -> Self
    where
        F: Fn(&Extent) -> GraphResult<Vec<Option<Resource>>> + Send + Sync + 'static,
    {
        self.add_switches(switches);
        self.dynamic_supplies = Some(Arc::new(compute));
        self
    }

    pub fn relinking_order(mut self, order: RelinkingOrder) -> Self {
        self.relinking_order = order;
        self
    }

    fn add_switches(&mut self, switches: &[&dyn Linkable]) {
        self.switches
            .extend(switches.iter().map(|switch| switch.as_resource().clone()));
    }

    /// Register the behavior with `run` as its body.
    ///
    /// Fails if the extent was already added or a linked resource belongs to
    /// another graph.
    pub fn runs<F>(self, run: F) -> GraphResult<Behavior>
    where
        F: Fn(&Extent) -> GraphResult<()> + Send + Sync + 'static,
    {
        let graph = self.extent.graph()?;
        let extent_id = self.extent.id();

        let mut demands: SmallVec<[Link; 4]> =
            graph.resolve_demands(self.demands.iter().cloned())?.into();
        let mut supplies: SmallVec<[ResourceId; 4]> =
            graph.resolve_supplies(self.supplies.iter().cloned())?.into();
        let switches = graph.resolve_supplies(self.switches.iter().cloned())?;
        let dynamic = self.dynamic_demands.is_some() || self.dynamic_supplies.is_some();

        let mut state = graph.lock();
        state.ensure_pending(extent_id)?;

        if !dynamic {
            let node = BehaviorNode::new(
                extent_id,
                self.label,
                BehaviorRun::User(Arc::new(run)),
                demands,
                supplies,
            );
            let id = state.push_behavior(node);
            return Ok(Behavior::from_parts(graph.downgrade(), id));
        }

        let name = self.label.clone().unwrap_or_else(|| "behavior".to_string());
        let placeholder = state.push_resource(
            ResourceKind::Plain,
            extent_id,
            Some(format!("{name} relink order")),
        );

        let mut relink_demands: SmallVec<[Link; 4]> = switches
            .into_iter()
            .chain(Some(self.extent.did_add().id()))
            .map(|resource| Link {
                resource,
                ordering_only: false,
            })
            .collect();
        let mut relink_supplies: SmallVec<[ResourceId; 4]> = SmallVec::new();
        let placeholder_link = Link {
            resource: placeholder,
            ordering_only: true,
        };
        match self.relinking_order {
            RelinkingOrder::Prior => {
                relink_supplies.push(placeholder);
                demands.push(placeholder_link);
            }
            RelinkingOrder::Subsequent => {
                supplies.push(placeholder);
                relink_demands.push(placeholder_link);
            }
        }

        let main = state.push_behavior(BehaviorNode::new(
            extent_id,
            self.label,
            BehaviorRun::User(Arc::new(run)),
            demands,
            supplies,
        ));
        state.push_behavior(BehaviorNode::new(
            extent_id,
            Some(format!("{name} relink")),
            BehaviorRun::Relink(Relink {
                target: main,
                demands: self.dynamic_demands,
                supplies: self.dynamic_supplies,
            }),
            relink_demands,
            relink_supplies,
        ));
        Ok(Behavior::from_parts(graph.downgrade(), main))
    }
}
