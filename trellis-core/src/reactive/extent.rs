//! Extent Implementation
//!
//! An Extent groups resources and behaviors that enter and leave the graph
//! together. Everything is declared on the extent while it is pending; adding
//! the extent registers it all in one step, and removing it detaches it for
//! good.
//!
//! Every extent owns a `did_add` state that turns `true` in the event the
//! extent is added (observable by its own behaviors in that same event) and
//! `false` when it is removed.

use crate::error::{GraphError, GraphResult};
use crate::graph::{
    ExtentId, ExtentNode, ExtentStatus, Graph, RemoveStrategy, ResourceId, ResourceKind, WeakGraph,
};

use super::behavior::BehaviorBuilder;
use super::moment::Moment;
use super::resource::{Resource, Value};
use super::state::State;

/// Handle to an extent.
#[derive(Clone)]
pub struct Extent {
    graph: WeakGraph,
    id: ExtentId,
    did_add: State<bool>,
}

impl Extent {
    /// Create a pending extent in `graph`.
    pub fn new(graph: &Graph) -> Self {
        Self::register(graph, None)
    }

    pub fn with_label(graph: &Graph, label: impl Into<String>) -> Self {
        Self::register(graph, Some(label.into()))
    }

    fn register(graph: &Graph, label: Option<String>) -> Self {
        let weak = graph.downgrade();
        let mut state = graph.lock();
        let id = ExtentId::from_index(state.extents.len());

        let did_add = ResourceId::from_index(state.resources.len());
        let extent = Extent {
            graph: weak.clone(),
            id,
            did_add: State::from_resource(Resource::from_parts(weak, did_add), false),
        };
        state.extents.push(ExtentNode {
            label,
            handle: extent.clone(),
            resources: Vec::new(),
            behaviors: Vec::new(),
            status: ExtentStatus::Pending,
            lifetime: None,
        });
        state.push_resource(ResourceKind::State, id, Some("did_add".to_string()));
        extent
    }

    pub fn id(&self) -> ExtentId {
        self.id
    }

    pub fn graph(&self) -> GraphResult<Graph> {
        self.graph.upgrade()
    }

    /// `true` while the extent is part of the graph.
    pub fn did_add(&self) -> &State<bool> {
        &self.did_add
    }

    pub fn status(&self) -> GraphResult<ExtentStatus> {
        let graph = self.graph.upgrade()?;
        let status = graph.lock().extents[self.id.index()].status;
        Ok(status)
    }

    // ---- Declarations ----

    fn declare(&self, kind: ResourceKind, label: String) -> GraphResult<Resource> {
        let graph = self.graph.upgrade()?;
        let mut state = graph.lock();
        state.ensure_pending(self.id)?;
        let id = state.push_resource(kind, self.id, Some(label));
        Ok(Resource::from_parts(self.graph.clone(), id))
    }

    /// Declare a valueless resource.
    pub fn resource(&self, label: impl Into<String>) -> GraphResult<Resource> {
        self.declare(ResourceKind::Plain, label.into())
    }

    pub fn moment<T: Value>(&self, label: impl Into<String>) -> GraphResult<Moment<T>> {
        let resource = self.declare(ResourceKind::Moment, label.into())?;
        Ok(Moment::from_resource(resource))
    }

    pub fn state<T: Value>(&self, initial: T, label: impl Into<String>) -> GraphResult<State<T>> {
        let resource = self.declare(ResourceKind::State, label.into())?;
        Ok(State::from_resource(resource, initial))
    }

    /// Start declaring a behavior.
    pub fn behavior(&self) -> BehaviorBuilder {
        BehaviorBuilder::new(self.clone())
    }

    // ---- Graph membership ----

    /// Add the extent to the graph. Must be called inside an action or a
    /// behavior.
    pub fn add_to_graph(&self) -> GraphResult<()> {
        let graph = self.graph.upgrade()?;
        let result = graph.lock().add_extent(self.id);
        result
    }

    /// Open an action that adds the extent.
    pub fn add_to_graph_with_action(&self) -> GraphResult<()> {
        let extent = self.clone();
        self.action_labeled("add extent", move || extent.add_to_graph())
    }

    /// Remove the extent from the graph. Must be called inside an action or
    /// a behavior.
    pub fn remove_from_graph(&self, strategy: RemoveStrategy) -> GraphResult<()> {
        let graph = self.graph.upgrade()?;
        let result = graph.lock().remove_extent(self.id, strategy);
        result
    }

    pub fn remove_from_graph_with_action(&self, strategy: RemoveStrategy) -> GraphResult<()> {
        let extent = self.clone();
        self.action_labeled("remove extent", move || {
            extent.remove_from_graph(strategy)
        })
    }

    // ---- Lifetimes ----

    /// Share a lifetime with `other`. Both extents must still be pending.
    pub fn unify_lifetime(&self, other: &Extent) -> GraphResult<()> {
        let graph = self.graph.upgrade()?;
        self.ensure_same_graph(&graph, other)?;
        let result = graph.lock().unify_lifetimes(self.id, other.id);
        result
    }

    /// Make `child`'s lifetime a child of this extent's lifetime. `child`
    /// must still be pending.
    pub fn add_child_lifetime(&self, child: &Extent) -> GraphResult<()> {
        let graph = self.graph.upgrade()?;
        self.ensure_same_graph(&graph, child)?;
        let result = graph.lock().add_child_lifetime(self.id, child.id);
        result
    }

    /// Whether behaviors in this extent may statically link to resources in
    /// `other`.
    pub fn has_compatible_lifetime(&self, other: &Extent) -> GraphResult<bool> {
        let graph = self.graph.upgrade()?;
        self.ensure_same_graph(&graph, other)?;
        let compatible = graph.lock().has_compatible_lifetime(self.id, other.id);
        Ok(compatible)
    }

    fn ensure_same_graph(&self, graph: &Graph, other: &Extent) -> GraphResult<()> {
        if other.graph.is(graph) {
            Ok(())
        } else {
            Err(GraphError::ForeignGraph)
        }
    }

    // ---- Conveniences ----

    pub fn action<F>(&self, body: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        self.graph.upgrade()?.action(body)
    }

    pub fn action_labeled<F>(&self, label: impl Into<String>, body: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        self.graph.upgrade()?.action_labeled(label, body)
    }

    pub fn side_effect<F>(&self, body: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        self.graph.upgrade()?.side_effect(body)
    }
}

impl std::fmt::Debug for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Extent").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifetimeRule;

    #[test]
    fn did_add_follows_membership() {
        let graph = Graph::new();
        let extent = Extent::with_label(&graph, "panel");
        assert_eq!(extent.status().unwrap(), ExtentStatus::Pending);
        assert!(!extent.did_add().value().unwrap());

        extent.add_to_graph_with_action().unwrap();
        assert_eq!(extent.status().unwrap(), ExtentStatus::Added(1));
        assert!(extent.did_add().value().unwrap());
        assert_eq!(extent.did_add().event().unwrap().sequence, 1);

        extent
            .remove_from_graph_with_action(RemoveStrategy::ExtentOnly)
            .unwrap();
        assert_eq!(extent.status().unwrap(), ExtentStatus::Removed(2));
        assert!(!extent.did_add().value().unwrap());
    }

    #[test]
    fn declarations_close_once_added() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        extent.add_to_graph_with_action().unwrap();

        let err = extent.state(0, "late").unwrap_err();
        assert!(matches!(
            err,
            GraphError::LifetimeViolation {
                rule: LifetimeRule::DeclaredAfterAdd,
                ..
            }
        ));
    }

    #[test]
    fn lifetimes_cannot_span_graphs() {
        let graph = Graph::new();
        let other = Graph::new();
        let extent = Extent::new(&graph);
        let stranger = Extent::new(&other);

        assert!(matches!(
            extent.unify_lifetime(&stranger),
            Err(GraphError::ForeignGraph)
        ));
    }
}
