//! Behavior Graph
//!
//! This module implements the engine: the arenas of resources, behaviors and
//! extents, the event loop that drives propagation, and the incremental
//! ordering that keeps behaviors running in dependency order.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Resources hold values and remember which behavior supplies them
//! - Behaviors demand (read) and supply (write) resources
//! - A demand edge from resource R to behavior B means B runs whenever R
//!   updates, after R's supplier has run
//!
//! Work enters the graph through actions. Each action opens an event; every
//! behavior activated by the action's updates runs exactly once, in
//! ascending order, and side effects run once all behaviors have settled.
//!
//! # Design Decisions
//!
//! 1. Nodes live in arenas inside one `GraphState` and refer to each other by
//!    index, so the mutual resource/behavior links carry no reference cycles.
//!
//! 2. `Graph` is a cheap handle around `Arc<Mutex<GraphState>>`. Node handles
//!    keep only a weak reference, so closures capturing them never keep the
//!    graph alive.
//!
//! 3. The lock is never held while user code runs. The phase state machine,
//!    not the lock, guarantees that one action, behavior or side effect runs
//!    at a time.

mod debug;
mod event;
mod event_loop;
mod lifetime;
mod linking;
mod node;
mod options;
mod queue;
mod scheduler;
mod state;

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::error::{GraphError, GraphResult};
use crate::reactive::Behavior;

pub use debug::{BehaviorInfo, ExtentInfo, GraphSnapshot, ResourceInfo};
pub use event::{Clock, EventStamp, ManualClock, Phase, SystemClock};
pub use lifetime::RemoveStrategy;
pub use node::{
    BehaviorId, ExtentId, ExtentStatus, LifetimeId, OrderingState, ResourceId, ResourceKind,
};
pub use options::GraphOptions;
pub use queue::OrderedQueue;

pub(crate) use node::{
    BehaviorNode, BehaviorRun, DemandsFn, ExtentNode, Link, Relink, SuppliesFn, Transient,
};
pub(crate) use state::GraphState;

/// Handle to a behavior graph.
///
/// Cloning is cheap; every clone drives the same graph.
///
/// # Example
///
/// ```rust,ignore
/// let graph = Graph::new();
/// let extent = Extent::new(&graph);
/// let increment = extent.moment::<()>("increment")?;
/// let count = extent.state(0, "count")?;
///
/// let counter = count.clone();
/// extent
///     .behavior()
///     .demands(&[&increment])
///     .supplies(&[&count])
///     .runs(move |_| counter.update(counter.value()? + 1))?;
/// extent.add_to_graph_with_action()?;
///
/// increment.update_with_action(())?;
/// assert_eq!(count.value()?, 1);
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Arc<Mutex<GraphState>>,
}

/// Non-owning reference to a graph, held by node handles.
#[derive(Clone)]
pub(crate) struct WeakGraph(Weak<Mutex<GraphState>>);

impl WeakGraph {
    pub(crate) fn upgrade(&self) -> GraphResult<Graph> {
        self.0
            .upgrade()
            .map(|inner| Graph { inner })
            .ok_or(GraphError::GraphDropped)
    }

    pub(crate) fn is(&self, graph: &Graph) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&graph.inner))
    }
}

/// Configures a [`Graph`] before construction.
#[derive(Default)]
pub struct GraphBuilder {
    options: GraphOptions,
    clock: Option<Arc<dyn Clock>>,
}

impl GraphBuilder {
    pub fn options(mut self, options: GraphOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `clock` for event timestamps instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Graph {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        Graph {
            inner: Arc::new(Mutex::new(GraphState::new(self.options, clock))),
        }
    }
}

impl Graph {
    /// Create a graph with default options and the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_options(options: GraphOptions) -> Self {
        Self::builder().options(options).build()
    }

    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.inner.lock()
    }

    pub(crate) fn downgrade(&self) -> WeakGraph {
        WeakGraph(Arc::downgrade(&self.inner))
    }

    // ---- Actions ----

    /// Run `body` as an action.
    ///
    /// If the graph is idle the action's event runs to completion before this
    /// returns. Called from a side effect, the action is queued behind the
    /// current event and this returns immediately. Calling it from an action
    /// body or a behavior is an error.
    pub fn action<F>(&self, body: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        self.action_labeled("action", body)
    }

    /// Like [`Graph::action`], with a label for logs and errors.
    pub fn action_labeled<F>(&self, label: impl Into<String>, body: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        let drive = self
            .lock()
            .submit_action(label.into(), Box::new(body), None)?;
        if drive {
            self.run_event_loop()
        } else {
            Ok(())
        }
    }

    /// Queue `body` as an action and return a future resolving once that
    /// action's event has closed.
    ///
    /// When the graph is idle the action runs before this returns, and the
    /// future is already resolved.
    pub fn action_async<F>(&self, body: F) -> impl Future<Output = GraphResult<()>> + Send + 'static
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        self.action_async_labeled("action", body)
    }

    pub fn action_async_labeled<F>(
        &self,
        label: impl Into<String>,
        body: F,
    ) -> impl Future<Output = GraphResult<()>> + Send + 'static
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        let label = label.into();
        let (sender, receiver) = oneshot::channel();
        let submitted = self
            .lock()
            .submit_action(label.clone(), Box::new(body), Some(sender));

        let rejected = match submitted {
            Ok(true) => {
                // Failures reach the completions of the actions they hit.
                let _ = self.run_event_loop();
                None
            }
            Ok(false) => None,
            Err(error) => Some(error),
        };

        async move {
            if let Some(error) = rejected {
                return Err(error);
            }
            receiver
                .await
                .unwrap_or(Err(GraphError::ActionDiscarded(label)))
        }
    }

    /// Queue `body` to run once the current event's behaviors have settled.
    pub fn side_effect<F>(&self, body: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        self.side_effect_labeled("side effect", body)
    }

    pub fn side_effect_labeled<F>(&self, label: impl Into<String>, body: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()> + Send + 'static,
    {
        self.lock().submit_side_effect(label.into(), Box::new(body))
    }

    // ---- Introspection ----

    pub fn options(&self) -> GraphOptions {
        self.lock().options
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// The open event, if any.
    pub fn current_event(&self) -> Option<EventStamp> {
        self.lock().current_event
    }

    /// The most recently closed (or aborted) event.
    pub fn last_event(&self) -> EventStamp {
        self.lock().last_event
    }

    /// The behavior running right now, if any.
    pub fn current_behavior(&self) -> Option<Behavior> {
        let current = self.lock().current_behavior;
        current.map(|id| Behavior::from_parts(self.downgrade(), id))
    }

    pub fn describe_resource(&self, id: ResourceId) -> Option<String> {
        self.lock().describe_resource(id)
    }

    pub fn describe_behavior(&self, id: BehaviorId) -> Option<String> {
        self.lock().describe_behavior(id)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.lock().snapshot()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
