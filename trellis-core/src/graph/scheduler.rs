//! Incremental Ordering
//!
//! Every behavior carries an integer `order`: one more than the largest
//! order among the suppliers of its demands, or 0 when none of its demands
//! is supplied. Activated behaviors run in ascending order, so a behavior
//! always runs after everything it reads from.
//!
//! # Algorithm
//!
//! Orders are recomputed incrementally rather than by a full sort:
//!
//! 1. Seed a worklist with every behavior marked `NeedsOrdering`.
//! 2. Forward-propagate: every `Ordered` behavior demanding a supply of a
//!    worklist member joins the worklist (marked `Clearing` while collected).
//! 3. Visit each worklist member depth first, on an explicit stack. A
//!    behavior is marked `Ordering` while on the stack; its suppliers are
//!    ordered first. Meeting an `Ordering` behavior again means the links form
//!    a cycle.
//! 4. If any order value changed, the activated queue is unsorted so the heap
//!    is rebuilt with the new keys on the next pop.
//!
//! Only the affected subgraph is revisited; everything else stays `Ordered`
//! and is never touched.

use std::collections::VecDeque;

use indexmap::IndexSet;
use tracing::trace;

use crate::error::{GraphError, GraphResult};

use super::node::{BehaviorId, OrderingState, ResourceId};
use super::state::GraphState;

impl GraphState {
    /// Reorder every behavior marked since the last pass.
    pub(crate) fn order_behaviors(&mut self) -> GraphResult<()> {
        let worklist = self.collect_affected();
        for &id in &worklist {
            self.behaviors[id.index()].ordering = OrderingState::NeedsOrdering;
        }

        let mut changed = false;
        for &id in &worklist {
            self.sort_dfs(id, &mut changed)?;
        }

        if changed {
            self.activated.unsort();
        }
        trace!(count = worklist.len(), changed, "behaviors reordered");
        Ok(())
    }

    /// Seeds plus every ordered behavior downstream of them.
    fn collect_affected(&mut self) -> Vec<BehaviorId> {
        let mut worklist = Vec::new();
        let mut pending: VecDeque<BehaviorId> = std::mem::take(&mut self.needs_ordering).into();

        while let Some(id) = pending.pop_front() {
            let behavior = &mut self.behaviors[id.index()];
            if behavior.is_removed() || behavior.ordering == OrderingState::Clearing {
                continue;
            }
            behavior.ordering = OrderingState::Clearing;
            worklist.push(id);

            for resource in &self.behaviors[id.index()].supplies {
                for &subsequent in &self.resources[resource.index()].subsequents {
                    if self.behaviors[subsequent.index()].ordering == OrderingState::Ordered {
                        pending.push_back(subsequent);
                    }
                }
            }
        }
        worklist
    }

    /// Order `root` and everything upstream of it that still needs ordering.
    ///
    /// The walk keeps its own stack of `(behavior, next demand)` frames, so
    /// chains of any depth are ordered without recursing.
    fn sort_dfs(&mut self, root: BehaviorId, changed: &mut bool) -> GraphResult<()> {
        match self.behaviors[root.index()].ordering {
            OrderingState::Ordered => return Ok(()),
            OrderingState::Ordering => return Err(self.cycle_error(root)),
            _ => {}
        }
        self.behaviors[root.index()].ordering = OrderingState::Ordering;

        let mut stack: Vec<(BehaviorId, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (id, next) = *frame;
            frame.1 += 1;

            if let Some(&resource) = self.behaviors[id.index()].demands.get_index(next) {
                let Some(supplier) = self.resources[resource.index()].supplied_by else {
                    continue;
                };
                let upstream = &self.behaviors[supplier.index()];
                if upstream.is_removed() {
                    continue;
                }
                let ordering = upstream.ordering;
                match ordering {
                    OrderingState::Ordered => {}
                    OrderingState::Ordering => return Err(self.cycle_error(supplier)),
                    _ => {
                        self.behaviors[supplier.index()].ordering = OrderingState::Ordering;
                        stack.push((supplier, 0));
                    }
                }
                continue;
            }

            // Every supplier is ordered now.
            stack.pop();
            let order = self.behaviors[id.index()]
                .demands
                .iter()
                .filter_map(|resource| self.resources[resource.index()].supplied_by)
                .map(|supplier| self.behaviors[supplier.index()].order + 1)
                .max()
                .unwrap_or(0);

            let behavior = &mut self.behaviors[id.index()];
            if behavior.order != order {
                behavior.order = order;
                *changed = true;
            }
            behavior.ordering = OrderingState::Ordered;
        }
        Ok(())
    }

    /// Build the error for a cycle found at `id`, listing the resources
    /// walked from `id` back to itself.
    fn cycle_error(&self, id: BehaviorId) -> GraphError {
        let cycle = self.cycle_path(id);
        let labels = cycle
            .iter()
            .map(|resource| self.resource_name(*resource))
            .collect();
        GraphError::DependencyCycle {
            behavior: id,
            behavior_name: self.behavior_name(id),
            cycle,
            labels,
        }
    }

    /// Search the behaviors on the ordering stack for a path back to
    /// `target`, recording the demanded resources along the way.
    fn cycle_path(&self, target: BehaviorId) -> Vec<ResourceId> {
        let mut path = Vec::new();
        let mut visited = IndexSet::new();
        visited.insert(target);

        let mut stack: Vec<(BehaviorId, usize)> = vec![(target, 0)];
        while let Some(frame) = stack.last_mut() {
            let (current, next) = *frame;
            frame.1 += 1;

            let Some(&resource) = self.behaviors[current.index()].demands.get_index(next) else {
                stack.pop();
                path.pop();
                continue;
            };
            let Some(supplier) = self.resources[resource.index()].supplied_by else {
                continue;
            };
            if supplier == target {
                path.push(resource);
                return path;
            }
            if self.behaviors[supplier.index()].ordering != OrderingState::Ordering
                || !visited.insert(supplier)
            {
                continue;
            }
            path.push(resource);
            stack.push((supplier, 0));
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GraphError;
    use crate::graph::Graph;
    use crate::reactive::{Extent, Linkable};

    #[test]
    fn chain_orders_ascend() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let a = extent.state(0, "a").unwrap();
        let b = extent.state(0, "b").unwrap();
        let c = extent.state(0, "c").unwrap();

        // Declared out of order on purpose.
        let last = extent.behavior().demands(&[&b]).supplies(&[&c]).runs(|_| Ok(())).unwrap();
        let first = extent.behavior().demands(&[&a]).supplies(&[&b]).runs(|_| Ok(())).unwrap();
        let reader = extent.behavior().demands(&[&c]).runs(|_| Ok(())).unwrap();
        extent.add_to_graph_with_action().unwrap();

        assert_eq!(first.order().unwrap(), 0);
        assert_eq!(last.order().unwrap(), 1);
        assert_eq!(reader.order().unwrap(), 2);
    }

    #[test]
    fn ordering_demands_count_toward_order() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let token = extent.resource("token").unwrap();

        let writer = extent.behavior().supplies(&[&token]).runs(|_| Ok(())).unwrap();
        let after = extent
            .behavior()
            .demands(&[&token.ordering_demand()])
            .runs(|_| Ok(()))
            .unwrap();
        extent.add_to_graph_with_action().unwrap();

        assert!(after.order().unwrap() > writer.order().unwrap());
    }

    #[test]
    fn cycle_reports_the_resource_chain() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let x = extent.state(0, "x").unwrap();
        let y = extent.state(0, "y").unwrap();

        extent.behavior().label("a").demands(&[&x]).supplies(&[&y]).runs(|_| Ok(())).unwrap();
        extent.behavior().label("b").demands(&[&y]).supplies(&[&x]).runs(|_| Ok(())).unwrap();

        match extent.add_to_graph_with_action().unwrap_err() {
            GraphError::DependencyCycle { cycle, labels, .. } => {
                assert_eq!(cycle, vec![x.id(), y.id()]);
                assert_eq!(labels, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_supply_is_a_cycle() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let looped = extent.state(0, "looped").unwrap();
        extent
            .behavior()
            .demands(&[&looped])
            .supplies(&[&looped])
            .runs(|_| Ok(()))
            .unwrap();

        match extent.add_to_graph_with_action().unwrap_err() {
            GraphError::DependencyCycle { cycle, .. } => assert_eq!(cycle, vec![looped.id()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn long_chains_declared_downstream_first_are_ordered() {
        const LENGTH: usize = 10_000;
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let links: Vec<_> = (0..=LENGTH)
            .map(|link| extent.state(0u32, format!("link {link}")).unwrap())
            .collect();

        let mut behaviors = Vec::with_capacity(LENGTH);
        for link in (0..LENGTH).rev() {
            let (from, to) = (links[link].clone(), links[link + 1].clone());
            let behavior = extent
                .behavior()
                .demands(&[&links[link]])
                .supplies(&[&links[link + 1]])
                .runs(move |_| to.update(from.value()? + 1))
                .unwrap();
            behaviors.push(behavior);
        }
        extent.add_to_graph_with_action().unwrap();

        assert_eq!(behaviors[0].order().unwrap(), LENGTH as u32 - 1);
        assert_eq!(behaviors[LENGTH - 1].order().unwrap(), 0);

        links[0].update_with_action(1).unwrap();
        assert_eq!(links[LENGTH].value().unwrap(), LENGTH as u32 + 1);
    }

    #[test]
    fn long_cycles_are_reported() {
        const LENGTH: usize = 10_000;
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let links: Vec<_> = (0..LENGTH)
            .map(|link| extent.state(0u32, format!("link {link}")).unwrap())
            .collect();

        for link in (0..LENGTH).rev() {
            extent
                .behavior()
                .demands(&[&links[link]])
                .supplies(&[&links[(link + 1) % LENGTH]])
                .runs(|_| Ok(()))
                .unwrap();
        }

        match extent.add_to_graph_with_action().unwrap_err() {
            GraphError::DependencyCycle { cycle, .. } => assert_eq!(cycle.len(), LENGTH),
            other => panic!("unexpected error: {other}"),
        }
    }
}
