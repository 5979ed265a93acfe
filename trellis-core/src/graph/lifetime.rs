//! Extent Lifetimes
//!
//! Extents are added to and removed from the graph as units. Two extents may
//! share a lifetime (unified), or one lifetime may be the child of another.
//! A behavior may statically link to a resource in a foreign extent only if
//! that extent's lifetime is the same as its own or one of its ancestors.
//!
//! # Validation
//!
//! Most lifetime rules can only be judged once an event's structural work has
//! settled, since unified peers may be added by later statements of the same
//! action. Adds and removals are recorded as they happen and checked by
//! `validate_settled` after the activated queue drains. The whole pass is
//! skipped when `GraphOptions::validate_lifetimes` is off.

use std::collections::VecDeque;

use indexmap::IndexSet;
use tracing::debug;

use crate::error::{GraphError, GraphResult, LifetimeRule};

use super::event::Phase;
use super::node::{ExtentId, ExtentStatus, LifetimeId, LifetimeNode, ResourceId};
use super::state::GraphState;

/// Which extents `remove_from_graph` takes with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoveStrategy {
    /// Remove only this extent.
    #[default]
    ExtentOnly,

    /// Also remove unified peers and every descendant lifetime.
    ContainedLifetimes,
}

impl GraphState {
    fn lifetime_error(&self, extent: ExtentId, rule: LifetimeRule) -> GraphError {
        GraphError::LifetimeViolation {
            extent,
            name: self.extent_name(extent),
            rule,
        }
    }

    /// Sequence of the open event, if extents may change right now.
    fn structural_event(&self, extent: ExtentId) -> GraphResult<u64> {
        match self.current_event {
            Some(event) if self.phase != Phase::SideEffects => Ok(event.sequence),
            _ => Err(self.lifetime_error(extent, LifetimeRule::OutsideEvent)),
        }
    }

    /// Fail unless the extent has not been added yet.
    pub(crate) fn ensure_pending(&self, extent: ExtentId) -> GraphResult<()> {
        match self.extents[extent.index()].status {
            ExtentStatus::Pending => Ok(()),
            _ => Err(self.lifetime_error(extent, LifetimeRule::DeclaredAfterAdd)),
        }
    }

    pub(crate) fn add_extent(&mut self, id: ExtentId) -> GraphResult<()> {
        let sequence = self.structural_event(id)?;
        match self.extents[id.index()].status {
            ExtentStatus::Pending => {}
            ExtentStatus::Added(_) => {
                return Err(self.lifetime_error(id, LifetimeRule::AlreadyAdded))
            }
            ExtentStatus::Removed(_) => {
                return Err(self.lifetime_error(id, LifetimeRule::AlreadyRemoved))
            }
        }

        if let Some(lifetime) = self.extents[id.index()].lifetime {
            if self.options.validate_lifetimes {
                let parents = &self.lifetimes[lifetime.index()].parents;
                if parents
                    .iter()
                    .any(|parent| self.lifetimes[parent.index()].added_when.is_none())
                {
                    return Err(self.lifetime_error(id, LifetimeRule::ParentNotAdded));
                }
            }
            self.lifetimes[lifetime.index()]
                .added_when
                .get_or_insert(sequence);
        }

        let extent = &mut self.extents[id.index()];
        extent.status = ExtentStatus::Added(sequence);
        self.untracked.extend(extent.behaviors.iter().copied());
        self.extents_added.push(id);

        let did_add = extent.handle.did_add().clone();
        if let Some(event) = self.current_event {
            did_add.record(true, event);
        }
        self.resource_touched(did_add.id(), sequence);

        debug!(extent = %id, name = %self.extent_name(id), "extent added");
        Ok(())
    }

    pub(crate) fn remove_extent(
        &mut self,
        id: ExtentId,
        strategy: RemoveStrategy,
    ) -> GraphResult<()> {
        let sequence = self.structural_event(id)?;
        match self.extents[id.index()].status {
            ExtentStatus::Added(_) => {}
            ExtentStatus::Pending => return Err(self.lifetime_error(id, LifetimeRule::NotAdded)),
            ExtentStatus::Removed(_) => {
                return Err(self.lifetime_error(id, LifetimeRule::AlreadyRemoved))
            }
        }

        let targets = match strategy {
            RemoveStrategy::ExtentOnly => vec![id],
            RemoveStrategy::ContainedLifetimes => self.contained_extents(id),
        };
        for target in targets {
            if self.extents[target.index()].status.is_added() {
                self.remove_single(target, sequence);
            }
        }
        Ok(())
    }

    /// Detach one extent. Edges between the extent's own nodes are left in
    /// place; nothing outside the extent can reach them once the foreign
    /// edges are cut.
    fn remove_single(&mut self, id: ExtentId, sequence: u64) {
        let behaviors = self.extents[id.index()].behaviors.clone();
        for behavior_id in behaviors {
            let behavior = &self.behaviors[behavior_id.index()];
            let foreign = |resource: &ResourceId| self.resources[resource.index()].extent != id;
            let foreign_demands: Vec<ResourceId> =
                behavior.demands.iter().copied().filter(foreign).collect();
            let foreign_supplies: Vec<ResourceId> =
                behavior.supplies.iter().copied().filter(foreign).collect();

            for resource in &foreign_demands {
                self.resources[resource.index()]
                    .subsequents
                    .shift_remove(&behavior_id);
            }
            for resource in &foreign_supplies {
                let node = &mut self.resources[resource.index()];
                if node.supplied_by == Some(behavior_id) {
                    node.supplied_by = None;
                }
            }

            let behavior = &mut self.behaviors[behavior_id.index()];
            behavior.removed_when = Some(sequence);
            for resource in &foreign_demands {
                behavior.demands.shift_remove(resource);
                behavior.ordering_demands.shift_remove(resource);
            }
            for resource in &foreign_supplies {
                behavior.supplies.shift_remove(resource);
            }
        }

        let extent = &mut self.extents[id.index()];
        extent.status = ExtentStatus::Removed(sequence);
        self.extents_removed.push(id);

        let did_add = extent.handle.did_add().clone();
        if let Some(event) = self.current_event {
            did_add.record(false, event);
        }
        self.resource_touched(did_add.id(), sequence);

        debug!(extent = %id, name = %self.extent_name(id), "extent removed");
    }

    /// The extent itself, its unified peers and every extent in a descendant
    /// lifetime.
    fn contained_extents(&self, id: ExtentId) -> Vec<ExtentId> {
        let Some(root) = self.extents[id.index()].lifetime else {
            return vec![id];
        };

        let mut extents = IndexSet::from([id]);
        let mut seen = IndexSet::new();
        let mut pending = VecDeque::from([root]);
        while let Some(lifetime) = pending.pop_front() {
            if !seen.insert(lifetime) {
                continue;
            }
            let node = &self.lifetimes[lifetime.index()];
            extents.extend(node.extents.iter().copied());
            pending.extend(node.children.iter().copied());
        }
        extents.into_iter().collect()
    }

    /// The extent's lifetime record, created on first use.
    fn ensure_lifetime(&mut self, id: ExtentId) -> LifetimeId {
        if let Some(lifetime) = self.extents[id.index()].lifetime {
            return lifetime;
        }
        let lifetime = LifetimeId::from_index(self.lifetimes.len());
        let mut node = LifetimeNode::default();
        node.extents.insert(id);
        if let ExtentStatus::Added(when) = self.extents[id.index()].status {
            node.added_when = Some(when);
        }
        self.lifetimes.push(node);
        self.extents[id.index()].lifetime = Some(lifetime);
        lifetime
    }

    /// Whether `ancestor` is reachable from `lifetime` through parent links.
    fn is_ancestor(&self, ancestor: LifetimeId, lifetime: LifetimeId) -> bool {
        let mut seen = IndexSet::new();
        let mut pending: Vec<LifetimeId> =
            self.lifetimes[lifetime.index()].parents.iter().copied().collect();
        while let Some(current) = pending.pop() {
            if current == ancestor {
                return true;
            }
            if seen.insert(current) {
                pending.extend(self.lifetimes[current.index()].parents.iter().copied());
            }
        }
        false
    }

    pub(crate) fn unify_lifetimes(&mut self, a: ExtentId, b: ExtentId) -> GraphResult<()> {
        for extent in [a, b] {
            if self.extents[extent.index()].status != ExtentStatus::Pending {
                return Err(self.lifetime_error(extent, LifetimeRule::RelationshipAfterAdd));
            }
        }
        if a == b {
            return Ok(());
        }

        let keep = self.ensure_lifetime(a);
        let merge = self.ensure_lifetime(b);
        if keep == merge {
            return Ok(());
        }
        if self.is_ancestor(keep, merge) || self.is_ancestor(merge, keep) {
            return Err(self.lifetime_error(b, LifetimeRule::CyclicRelationship));
        }

        let merged = std::mem::take(&mut self.lifetimes[merge.index()]);
        for &extent in &merged.extents {
            self.extents[extent.index()].lifetime = Some(keep);
        }
        for &child in &merged.children {
            let parents = &mut self.lifetimes[child.index()].parents;
            parents.shift_remove(&merge);
            parents.insert(keep);
        }
        for &parent in &merged.parents {
            let children = &mut self.lifetimes[parent.index()].children;
            children.shift_remove(&merge);
            children.insert(keep);
        }

        let node = &mut self.lifetimes[keep.index()];
        node.extents.extend(merged.extents);
        node.children.extend(merged.children);
        node.parents.extend(merged.parents);
        Ok(())
    }

    pub(crate) fn add_child_lifetime(
        &mut self,
        parent: ExtentId,
        child: ExtentId,
    ) -> GraphResult<()> {
        if self.extents[child.index()].status != ExtentStatus::Pending {
            return Err(self.lifetime_error(child, LifetimeRule::RelationshipAfterAdd));
        }

        let parent_lifetime = self.ensure_lifetime(parent);
        let child_lifetime = self.ensure_lifetime(child);
        if parent_lifetime == child_lifetime || self.is_ancestor(child_lifetime, parent_lifetime) {
            return Err(self.lifetime_error(child, LifetimeRule::CyclicRelationship));
        }

        self.lifetimes[parent_lifetime.index()]
            .children
            .insert(child_lifetime);
        self.lifetimes[child_lifetime.index()]
            .parents
            .insert(parent_lifetime);
        Ok(())
    }

    /// Whether something in `from` may statically link to something in `to`.
    pub(crate) fn has_compatible_lifetime(&self, from: ExtentId, to: ExtentId) -> bool {
        if from == to {
            return true;
        }
        match (
            self.extents[from.index()].lifetime,
            self.extents[to.index()].lifetime,
        ) {
            (Some(from), Some(to)) => from == to || self.is_ancestor(to, from),
            _ => false,
        }
    }

    /// Check the extents added and removed during this event once its
    /// behaviors have settled.
    pub(crate) fn validate_settled(&mut self) -> GraphResult<()> {
        let added = std::mem::take(&mut self.extents_added);
        let removed = std::mem::take(&mut self.extents_removed);
        if !self.options.validate_lifetimes {
            return Ok(());
        }

        for id in added {
            if !self.extents[id.index()].status.is_added() {
                continue;
            }
            self.validate_added(id)?;
        }
        for id in removed {
            self.validate_removed(id)?;
        }
        Ok(())
    }

    fn validate_added(&self, id: ExtentId) -> GraphResult<()> {
        let extent = &self.extents[id.index()];
        if let Some(lifetime) = extent.lifetime {
            let peers = &self.lifetimes[lifetime.index()].extents;
            if peers
                .iter()
                .any(|peer| self.extents[peer.index()].status == ExtentStatus::Pending)
            {
                return Err(self.lifetime_error(id, LifetimeRule::UnifiedNotAdded));
            }
        }

        for &behavior in &extent.behaviors {
            let node = &self.behaviors[behavior.index()];
            let statics = node
                .static_demands
                .iter()
                .map(|link| link.resource)
                .chain(node.static_supplies.iter().copied());
            for resource in statics {
                let target = self.resources[resource.index()].extent;
                if !self.has_compatible_lifetime(id, target) {
                    return Err(self.lifetime_error(
                        id,
                        LifetimeRule::IncompatibleStaticLink { behavior, resource },
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_removed(&self, id: ExtentId) -> GraphResult<()> {
        let extent = &self.extents[id.index()];
        if let Some(lifetime) = extent.lifetime {
            let node = &self.lifetimes[lifetime.index()];
            if node
                .extents
                .iter()
                .any(|peer| self.extents[peer.index()].status.is_added())
            {
                return Err(self.lifetime_error(id, LifetimeRule::UnifiedNotRemoved));
            }
            let child_left = node.children.iter().any(|child| {
                self.lifetimes[child.index()]
                    .extents
                    .iter()
                    .any(|extent| self.extents[extent.index()].status.is_added())
            });
            if child_left {
                return Err(self.lifetime_error(id, LifetimeRule::ChildNotRemoved));
            }
        }

        for &resource in &extent.resources {
            let node = &self.resources[resource.index()];
            let dangling = node
                .subsequents
                .iter()
                .copied()
                .chain(node.supplied_by)
                .find(|behavior| !self.behaviors[behavior.index()].is_removed());
            if let Some(behavior) = dangling {
                return Err(self.lifetime_error(
                    id,
                    LifetimeRule::DanglingLink { behavior, resource },
                ));
            }
        }
        Ok(())
    }
}
