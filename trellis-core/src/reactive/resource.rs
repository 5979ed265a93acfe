//! Resource Implementation
//!
//! A Resource is a node in the graph that behaviors demand and supply. The
//! plain `Resource` carries no value: it is used as an ordering token, as a
//! bare notification, and as the untyped handle in dynamic link lists.
//! [`Moment`](super::Moment) and [`State`](super::State) wrap a `Resource`
//! and add a typed value slot.
//!
//! # How Updates Work
//!
//! 1. The graph checks that the caller may update the resource right now: an
//!    event must be open, and only the resource's supplier (or an action, if
//!    it has none) may write it.
//!
//! 2. The value is recorded together with the current event.
//!
//! 3. Behaviors demanding the resource are activated, and subscribers are
//!    queued as side effects.

use std::sync::Arc;

use tracing::trace;

use crate::error::GraphResult;
use crate::graph::{EventStamp, Graph, GraphState, ResourceId, Transient, WeakGraph};

use super::subscriber::{Subscriber, Subscription};

/// Values stored in resources.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}

/// A valueless resource.
#[derive(Clone)]
pub struct Resource {
    graph: WeakGraph,
    id: ResourceId,
}

impl Resource {
    pub(crate) fn from_parts(graph: WeakGraph, id: ResourceId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn graph(&self) -> GraphResult<Graph> {
        self.graph.upgrade()
    }

    pub(crate) fn belongs_to(&self, graph: &Graph) -> bool {
        self.graph.is(graph)
    }

    /// Run `read` against the graph after checking the running behavior may
    /// see this resource.
    pub(crate) fn read<R>(&self, read: impl FnOnce(&GraphState) -> R) -> GraphResult<R> {
        let graph = self.graph.upgrade()?;
        let state = graph.lock();
        state.check_access(self.id)?;
        Ok(read(&state))
    }

    /// Check the caller may update this resource, then let `apply` record the
    /// new value. Propagates only if `apply` reports a change.
    pub(crate) fn write(
        &self,
        transient: Option<Arc<dyn Transient>>,
        apply: impl FnOnce(EventStamp) -> bool,
    ) -> GraphResult<()> {
        let graph = self.graph.upgrade()?;
        let mut state = graph.lock();
        let event = state.check_updater(self.id)?;
        if !apply(event) {
            trace!(resource = %self.id, "update filtered");
            return Ok(());
        }
        if let Some(slot) = transient {
            state.track_transient(self.id, slot);
        }
        state.resource_touched(self.id, event.sequence);
        trace!(resource = %self.id, sequence = event.sequence, "resource updated");
        Ok(())
    }

    /// Mark the resource updated in the open event.
    pub fn update(&self) -> GraphResult<()> {
        self.write(None, |_| true)
    }

    /// Open an action whose only work is [`Resource::update`].
    pub fn update_with_action(&self) -> GraphResult<()> {
        let graph = self.graph.upgrade()?;
        let resource = self.clone();
        graph.action_labeled(self.action_label()?, move || resource.update())
    }

    /// Whether the resource updated during the open event.
    pub fn just_updated(&self) -> GraphResult<bool> {
        self.read(|state| state.touched_now(self.id))
    }

    pub fn describe(&self) -> GraphResult<String> {
        let graph = self.graph.upgrade()?;
        let description = graph.lock().describe_resource(self.id);
        Ok(description.unwrap_or_else(|| self.id.to_string()))
    }

    /// Call `callback` from a side effect after every event that updates
    /// this resource.
    pub fn subscribe_to_just_updated<F>(&self, callback: F) -> GraphResult<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let graph = self.graph.upgrade()?;
        let subscriber = Subscriber::new(callback);
        let id = subscriber.id();
        graph.lock().resources[self.id.index()]
            .subscribers
            .push(subscriber);
        Ok(Subscription {
            graph: self.graph.clone(),
            resource: self.id,
            id,
        })
    }

    pub(crate) fn action_label(&self) -> GraphResult<String> {
        let graph = self.graph.upgrade()?;
        let name = graph.lock().resource_name(self.id);
        Ok(format!("update {name}"))
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Resource").field(&self.id).finish()
    }
}

/// A demand on a resource, as passed to behavior builders and returned by
/// dynamic demand functions.
#[derive(Debug, Clone)]
pub struct Demand {
    pub resource: Resource,

    /// Order after the resource's supplier without being activated by it.
    pub ordering_only: bool,
}

/// Anything a behavior can link to.
pub trait Linkable {
    fn as_resource(&self) -> &Resource;

    /// A demand that activates the behavior when the resource updates.
    fn demand(&self) -> Demand {
        Demand {
            resource: self.as_resource().clone(),
            ordering_only: false,
        }
    }

    /// A demand used only to order the behavior after the resource's
    /// supplier.
    fn ordering_demand(&self) -> Demand {
        Demand {
            resource: self.as_resource().clone(),
            ordering_only: true,
        }
    }
}

impl Linkable for Resource {
    fn as_resource(&self) -> &Resource {
        self
    }
}

impl Linkable for Demand {
    fn as_resource(&self) -> &Resource {
        &self.resource
    }

    fn demand(&self) -> Demand {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GraphError, UpdateViolation};
    use crate::reactive::Extent;

    #[test]
    fn plain_resources_track_updates_per_event() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let ping = extent.resource("ping").unwrap();
        extent.add_to_graph_with_action().unwrap();

        let during = Arc::new(parking_lot::Mutex::new(None));
        let seen = during.clone();
        let inner = ping.clone();
        graph
            .action(move || {
                inner.update()?;
                *seen.lock() = Some(inner.just_updated()?);
                Ok(())
            })
            .unwrap();

        assert_eq!(*during.lock(), Some(true));
        assert!(!ping.just_updated().unwrap());
    }

    #[test]
    fn updates_outside_an_event_are_rejected() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let ping = extent.resource("ping").unwrap();

        match ping.update().unwrap_err() {
            GraphError::IllegalUpdate { reason, name, .. } => {
                assert_eq!(reason, UpdateViolation::NoEvent);
                assert_eq!(name, "ping");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn updates_before_add_are_rejected() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let ping = extent.resource("ping").unwrap();

        let err = ping.update_with_action().unwrap_err();
        assert!(matches!(
            err,
            GraphError::IllegalUpdate {
                reason: UpdateViolation::NotInGraph,
                ..
            }
        ));
    }

    #[test]
    fn demands_carry_their_kind() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let ping = extent.resource("ping").unwrap();

        assert!(!ping.demand().ordering_only);
        let ordering = ping.ordering_demand();
        assert!(ordering.ordering_only);
        assert!(ordering.demand().ordering_only);
        assert_eq!(ordering.as_resource().id(), ping.id());
    }
}
