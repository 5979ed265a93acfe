//! Linking
//!
//! Structural changes are never applied at the moment they are requested.
//! Adding an extent or relinking a behavior only records the behavior in one
//! of the pending lists; the Updates phase commits them in a fixed order:
//!
//! 1. Newly added behaviors are queued for demand and supply tracking.
//! 2. Changed supplies are committed. Every old assignment is released
//!    before any new one is made, so two behaviors can swap a resource
//!    within one pass without tripping the duplicate check.
//! 3. Changed demands are committed, updating each resource's subsequents.
//! 4. Everything marked is reordered (see `scheduler.rs`).

use indexmap::IndexSet;
use tracing::trace;

use crate::error::{GraphError, GraphResult, LinkViolation};

use super::event::Phase;
use super::node::{BehaviorId, ExtentStatus, Link, OrderingState, ResourceId};
use super::state::GraphState;

impl GraphState {
    pub(crate) fn structural_work_pending(&self) -> bool {
        !self.untracked.is_empty()
            || !self.modified_supplies.is_empty()
            || !self.modified_demands.is_empty()
            || !self.needs_ordering.is_empty()
    }

    pub(crate) fn process_structural_changes(&mut self) -> GraphResult<()> {
        self.track_new_behaviors();
        if !self.modified_supplies.is_empty() {
            self.commit_supplies()?;
        }
        if !self.modified_demands.is_empty() {
            self.commit_demands()?;
        }
        if !self.needs_ordering.is_empty() {
            self.order_behaviors()?;
        }
        Ok(())
    }

    fn track_new_behaviors(&mut self) {
        for id in std::mem::take(&mut self.untracked) {
            let behavior = &mut self.behaviors[id.index()];
            if behavior.is_removed() {
                continue;
            }
            behavior.ordering = OrderingState::NeedsOrdering;
            self.needs_ordering.push(id);
            self.modified_supplies.insert(id);
            self.modified_demands.insert(id);
        }
    }

    fn commit_supplies(&mut self) -> GraphResult<()> {
        let changed: Vec<BehaviorId> = self.modified_supplies.drain(..).collect();

        for &id in &changed {
            let behavior = &self.behaviors[id.index()];
            let wanted = if behavior.is_removed() {
                IndexSet::new()
            } else {
                behavior.wanted_supplies()
            };
            for resource in behavior.supplies.difference(&wanted) {
                let node = &mut self.resources[resource.index()];
                if node.supplied_by == Some(id) {
                    node.supplied_by = None;
                }
            }
        }

        for id in changed {
            if self.behaviors[id.index()].is_removed() {
                continue;
            }
            let wanted = self.behaviors[id.index()].wanted_supplies();
            for &resource in &wanted {
                if !self.is_live(resource) {
                    return Err(GraphError::UnregisteredSupply {
                        behavior: id,
                        behavior_name: self.behavior_name(id),
                        resource,
                        name: self.resource_name(resource),
                    });
                }
                let current = self.resources[resource.index()].supplied_by;
                match current {
                    Some(existing) if existing != id => {
                        return Err(GraphError::DuplicateSupplier {
                            resource,
                            name: self.resource_name(resource),
                            existing,
                            existing_name: self.behavior_name(existing),
                            attempted: id,
                            attempted_name: self.behavior_name(id),
                        });
                    }
                    _ => self.resources[resource.index()].supplied_by = Some(id),
                }
            }

            let behavior = &mut self.behaviors[id.index()];
            behavior.supplies = wanted;
            behavior.ordering = OrderingState::NeedsOrdering;
            if !self.needs_ordering.contains(&id) {
                self.needs_ordering.push(id);
            }
        }
        Ok(())
    }

    fn commit_demands(&mut self) -> GraphResult<()> {
        let sequence = self.current_event.map(|event| event.sequence);

        for id in self.modified_demands.drain(..).collect::<Vec<_>>() {
            if self.behaviors[id.index()].is_removed() {
                continue;
            }
            let wanted = self.behaviors[id.index()].wanted_demands();
            let previous = std::mem::take(&mut self.behaviors[id.index()].demands);

            for resource in previous.iter().filter(|r| !wanted.contains_key(*r)) {
                self.resources[resource.index()].subsequents.shift_remove(&id);
            }

            let (order, ordering) = {
                let behavior = &self.behaviors[id.index()];
                (behavior.order, behavior.ordering)
            };
            let mut reorder = matches!(
                ordering,
                OrderingState::Untracked | OrderingState::NeedsOrdering
            );
            let mut activate = false;

            for (&resource, &ordering_only) in &wanted {
                if !self.is_live(resource) {
                    return Err(GraphError::UnregisteredDemand {
                        behavior: id,
                        behavior_name: self.behavior_name(id),
                        resource,
                        name: self.resource_name(resource),
                    });
                }
                if previous.contains(&resource) {
                    continue;
                }

                let node = &mut self.resources[resource.index()];
                node.subsequents.insert(id);
                if let Some(supplier) = node.supplied_by {
                    let supplier = &self.behaviors[supplier.index()];
                    if supplier.ordering != OrderingState::Ordered || supplier.order >= order {
                        reorder = true;
                    }
                }
                if !ordering_only && sequence.is_some() && node.touched_in == sequence {
                    activate = true;
                }
            }

            let behavior = &mut self.behaviors[id.index()];
            behavior.demands = wanted.keys().copied().collect();
            behavior.ordering_demands = wanted
                .iter()
                .filter(|(_, ordering_only)| **ordering_only)
                .map(|(resource, _)| *resource)
                .collect();

            if reorder && !self.needs_ordering.contains(&id) {
                behavior.ordering = OrderingState::NeedsOrdering;
                self.needs_ordering.push(id);
            }
            if let (true, Some(sequence)) = (activate, sequence) {
                self.activate(id, sequence);
            }
        }
        Ok(())
    }

    fn check_relink(&self, id: BehaviorId) -> GraphResult<()> {
        let reject = |reason| GraphError::IllegalLink {
            behavior: id,
            behavior_name: self.behavior_name(id),
            reason,
        };
        if self.current_event.is_none() {
            return Err(reject(LinkViolation::NoEvent));
        }
        if self.phase == Phase::SideEffects {
            return Err(reject(LinkViolation::SideEffectPhase));
        }
        let extent = self.behaviors[id.index()].extent;
        match self.extents[extent.index()].status {
            ExtentStatus::Added(_) => Ok(()),
            ExtentStatus::Pending => Err(reject(LinkViolation::NotRegistered)),
            ExtentStatus::Removed(_) => Err(reject(LinkViolation::Removed)),
        }
    }

    /// Replace a behavior's dynamic demands. Takes effect on the next
    /// structural pass.
    pub(crate) fn set_dynamic_demands(
        &mut self,
        id: BehaviorId,
        links: Vec<Link>,
    ) -> GraphResult<()> {
        self.check_relink(id)?;
        trace!(behavior = %id, count = links.len(), "dynamic demands changed");
        self.behaviors[id.index()].dynamic_demands = links;
        self.modified_demands.insert(id);
        Ok(())
    }

    /// Replace a behavior's dynamic supplies. Takes effect on the next
    /// structural pass.
    pub(crate) fn set_dynamic_supplies(
        &mut self,
        id: BehaviorId,
        resources: Vec<ResourceId>,
    ) -> GraphResult<()> {
        self.check_relink(id)?;
        trace!(behavior = %id, count = resources.len(), "dynamic supplies changed");
        self.behaviors[id.index()].dynamic_supplies = resources;
        self.modified_supplies.insert(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GraphError;
    use crate::graph::{Graph, OrderingState};
    use crate::reactive::{Extent, Linkable};

    #[test]
    fn supplier_is_assigned_once_tracked() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let input = extent.state(0, "input").unwrap();
        let output = extent.state(0, "output").unwrap();
        let behavior = extent
            .behavior()
            .demands(&[&input])
            .supplies(&[&output])
            .runs(|_| Ok(()))
            .unwrap();
        extent.add_to_graph_with_action().unwrap();

        let state = graph.lock();
        assert_eq!(
            state.resources[output.id().index()].supplied_by,
            Some(behavior.id())
        );
        assert!(state.resources[input.id().index()]
            .subsequents
            .contains(&behavior.id()));
        assert_eq!(
            state.behaviors[behavior.id().index()].ordering,
            OrderingState::Ordered
        );
        assert!(!state.structural_work_pending());
    }

    #[test]
    fn two_suppliers_are_rejected() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let shared = extent.state(0, "shared").unwrap();
        extent.behavior().label("first").supplies(&[&shared]).runs(|_| Ok(())).unwrap();
        extent.behavior().label("second").supplies(&[&shared]).runs(|_| Ok(())).unwrap();

        let err = extent.add_to_graph_with_action().unwrap_err();
        match err {
            GraphError::DuplicateSupplier {
                existing_name,
                attempted_name,
                ..
            } => {
                assert_eq!(existing_name, "first");
                assert_eq!(attempted_name, "second");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn demanding_a_pending_extent_is_rejected() {
        let graph = Graph::new();
        let pending = Extent::new(&graph);
        let remote = pending.state(0, "remote").unwrap();

        let extent = Extent::new(&graph);
        extent
            .behavior()
            .dynamic_demands(&[], move |_| Ok(vec![Some(remote.demand())]))
            .runs(|_| Ok(()))
            .unwrap();

        let err = extent.add_to_graph_with_action().unwrap_err();
        assert!(matches!(err, GraphError::UnregisteredDemand { .. }));
        assert!(graph.current_event().is_none());
    }

    #[test]
    fn relinking_outside_an_event_is_rejected() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let behavior = extent.behavior().runs(|_| Ok(())).unwrap();

        let err = behavior.set_dynamic_demands(Vec::new()).unwrap_err();
        assert!(matches!(err, GraphError::IllegalLink { .. }));
    }
}
