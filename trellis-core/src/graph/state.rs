//! Graph State
//!
//! `GraphState` is the single mutable engine instance behind a [`Graph`]
//! handle. It owns the node arenas, the activated-behavior queue, the lists
//! of pending structural work, and the queues of actions and side effects.
//!
//! Every phase transition is an explicit method on this struct; the event
//! loop in `event_loop.rs` only decides which one to call next and runs user
//! code with the lock released.
//!
//! [`Graph`]: super::Graph

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::error::{GraphError, GraphResult, NestingViolation, UpdateViolation};
use crate::reactive::SubscriberId;

use super::event::{Clock, EventStamp, Phase};
use super::node::{
    BehaviorId, BehaviorNode, ExtentId, ExtentNode, LifetimeNode, OrderingState, ResourceId,
    ResourceKind, ResourceNode, Transient,
};
use super::options::GraphOptions;
use super::queue::OrderedQueue;

/// A deferred unit of user work: an action body or a side effect.
pub(crate) type Job = Box<dyn FnOnce() -> GraphResult<()> + Send>;

/// Resolves the future returned by `Graph::action_async`.
pub(crate) type Completion = oneshot::Sender<GraphResult<()>>;

pub(crate) struct QueuedAction {
    pub(crate) label: String,
    pub(crate) body: Job,
    pub(crate) completion: Option<Completion>,
}

pub(crate) struct QueuedSideEffect {
    pub(crate) label: String,
    pub(crate) body: Job,
}

/// The action whose event is currently open.
pub(crate) struct CurrentAction {
    pub(crate) label: String,
    pub(crate) completion: Option<Completion>,
}

/// Work discarded by an abort, released once the graph lock is dropped.
pub(crate) struct Aborted {
    current: Option<CurrentAction>,
    actions: Vec<QueuedAction>,
    side_effects: Vec<QueuedSideEffect>,
}

impl Aborted {
    /// Hand the error to the failing action and discard everything queued.
    pub(crate) fn resolve(self, error: &GraphError) {
        if let Some(completion) = self.current.and_then(|current| current.completion) {
            let _ = completion.send(Err(error.clone()));
        }
        for action in self.actions {
            if let Some(completion) = action.completion {
                let _ = completion.send(Err(GraphError::ActionDiscarded(action.label)));
            }
        }
        drop(self.side_effects);
    }
}

pub(crate) struct GraphState {
    pub(crate) options: GraphOptions,
    pub(crate) clock: Arc<dyn Clock>,

    pub(crate) resources: Vec<ResourceNode>,
    pub(crate) behaviors: Vec<BehaviorNode>,
    pub(crate) extents: Vec<ExtentNode>,
    pub(crate) lifetimes: Vec<LifetimeNode>,

    pub(crate) phase: Phase,
    /// Set while some caller is running the event loop.
    pub(crate) driving: bool,
    pub(crate) current_event: Option<EventStamp>,
    pub(crate) last_event: EventStamp,
    pub(crate) current_behavior: Option<BehaviorId>,
    pub(crate) current_action: Option<CurrentAction>,

    pub(crate) activated: OrderedQueue<BehaviorId>,
    pub(crate) untracked: Vec<BehaviorId>,
    pub(crate) modified_demands: IndexSet<BehaviorId>,
    pub(crate) modified_supplies: IndexSet<BehaviorId>,
    pub(crate) needs_ordering: Vec<BehaviorId>,
    pub(crate) extents_added: Vec<ExtentId>,
    pub(crate) extents_removed: Vec<ExtentId>,

    pub(crate) actions: VecDeque<QueuedAction>,
    pub(crate) side_effects: VecDeque<QueuedSideEffect>,
    pub(crate) transients: IndexMap<ResourceId, Arc<dyn Transient>>,
}

impl GraphState {
    pub(crate) fn new(options: GraphOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            options,
            clock,
            resources: Vec::new(),
            behaviors: Vec::new(),
            extents: Vec::new(),
            lifetimes: Vec::new(),
            phase: Phase::Idle,
            driving: false,
            current_event: None,
            last_event: EventStamp::INITIAL,
            current_behavior: None,
            current_action: None,
            activated: OrderedQueue::new(),
            untracked: Vec::new(),
            modified_demands: IndexSet::new(),
            modified_supplies: IndexSet::new(),
            needs_ordering: Vec::new(),
            extents_added: Vec::new(),
            extents_removed: Vec::new(),
            actions: VecDeque::new(),
            side_effects: VecDeque::new(),
            transients: IndexMap::new(),
        }
    }

    // ---- Arena ----

    pub(crate) fn push_resource(
        &mut self,
        kind: ResourceKind,
        extent: ExtentId,
        label: Option<String>,
    ) -> ResourceId {
        let id = ResourceId::from_index(self.resources.len());
        self.resources.push(ResourceNode::new(kind, extent, label));
        self.extents[extent.index()].resources.push(id);
        id
    }

    pub(crate) fn push_behavior(&mut self, node: BehaviorNode) -> BehaviorId {
        let id = BehaviorId::from_index(self.behaviors.len());
        self.extents[node.extent.index()].behaviors.push(id);
        self.behaviors.push(node);
        id
    }

    pub(crate) fn resource_name(&self, id: ResourceId) -> String {
        self.resources
            .get(id.index())
            .and_then(|node| node.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn behavior_name(&self, id: BehaviorId) -> String {
        self.behaviors
            .get(id.index())
            .and_then(|node| node.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn extent_name(&self, id: ExtentId) -> String {
        self.extents
            .get(id.index())
            .and_then(|node| node.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Whether the resource's extent is currently part of the graph.
    pub(crate) fn is_live(&self, id: ResourceId) -> bool {
        let extent = self.resources[id.index()].extent;
        self.extents[extent.index()].status.is_added()
    }

    // ---- Reads and updates ----

    /// Validate that whoever is running right now may update `id`, returning
    /// the stamp of the open event.
    pub(crate) fn check_updater(&self, id: ResourceId) -> GraphResult<EventStamp> {
        let reject = |reason| GraphError::IllegalUpdate {
            resource: id,
            name: self.resource_name(id),
            reason,
        };

        let Some(event) = self.current_event else {
            return Err(reject(UpdateViolation::NoEvent));
        };
        if self.phase == Phase::SideEffects {
            return Err(reject(UpdateViolation::SideEffectPhase));
        }
        if !self.is_live(id) {
            return Err(reject(UpdateViolation::NotInGraph));
        }

        match (self.resources[id.index()].supplied_by, self.current_behavior) {
            (Some(supplier), Some(current)) if supplier == current => Ok(event),
            (Some(supplier), current) => {
                Err(reject(UpdateViolation::WrongSupplier { supplier, current }))
            }
            (None, Some(current)) => Err(reject(UpdateViolation::UnsuppliedInBehavior { current })),
            (None, None) => Ok(event),
        }
    }

    /// Validate that the running behavior, if any, declared `id`.
    pub(crate) fn check_access(&self, id: ResourceId) -> GraphResult<()> {
        if !self.options.validate_dependencies {
            return Ok(());
        }
        let Some(current) = self.current_behavior else {
            return Ok(());
        };

        let behavior = &self.behaviors[current.index()];
        let declared = behavior.demands.contains(&id)
            || behavior.supplies.contains(&id)
            || self.resources[id.index()].supplied_by == Some(current);
        if declared {
            Ok(())
        } else {
            Err(GraphError::IllegalAccess {
                resource: id,
                name: self.resource_name(id),
                behavior: current,
                behavior_name: self.behavior_name(current),
            })
        }
    }

    /// Whether `id` was updated during the open event.
    pub(crate) fn touched_now(&self, id: ResourceId) -> bool {
        match self.current_event {
            Some(event) => self.resources[id.index()].touched_in == Some(event.sequence),
            None => false,
        }
    }

    /// Register a value slot to be cleared when the open event ends.
    pub(crate) fn track_transient(&mut self, id: ResourceId, slot: Arc<dyn Transient>) {
        self.transients.entry(id).or_insert(slot);
    }

    pub(crate) fn clear_transients(&mut self) {
        for (_, slot) in self.transients.drain(..) {
            slot.clear();
        }
    }

    /// Propagate an update: activate reactive subsequents and queue one
    /// side effect per subscriber.
    pub(crate) fn resource_touched(&mut self, id: ResourceId, sequence: u64) {
        let node = &mut self.resources[id.index()];
        node.touched_in = Some(sequence);

        let subsequents: Vec<BehaviorId> = node.subsequents.iter().copied().collect();
        for behavior in subsequents {
            if !self.behaviors[behavior.index()].ordering_demands.contains(&id) {
                self.activate(behavior, sequence);
            }
        }

        if self.resources[id.index()].subscribers.is_empty() {
            return;
        }
        let label = format!("{} subscriber", self.resource_name(id));
        for subscriber in &self.resources[id.index()].subscribers {
            let subscriber = subscriber.clone();
            self.side_effects.push_back(QueuedSideEffect {
                label: label.clone(),
                body: Box::new(move || {
                    subscriber.notify();
                    Ok(())
                }),
            });
        }
    }

    /// Enqueue a behavior for this event, at most once.
    pub(crate) fn activate(&mut self, id: BehaviorId, sequence: u64) {
        let behavior = &mut self.behaviors[id.index()];
        if behavior.is_removed() || behavior.enqueued_when == Some(sequence) {
            return;
        }
        behavior.enqueued_when = Some(sequence);
        self.activated.push(id);
        trace!(behavior = %id, "behavior activated");
    }

    pub(crate) fn unsubscribe(&mut self, resource: ResourceId, id: SubscriberId) {
        self.resources[resource.index()]
            .subscribers
            .retain(|subscriber| subscriber.id() != id);
    }

    // ---- Actions and side effects ----

    /// Queue an action. Returns `true` when the caller must drive the event
    /// loop because no one else is.
    pub(crate) fn submit_action(
        &mut self,
        label: String,
        body: Job,
        completion: Option<Completion>,
    ) -> GraphResult<bool> {
        match self.phase {
            Phase::Action => {
                return Err(GraphError::IllegalActionNesting(
                    NestingViolation::ActionInAction,
                ))
            }
            Phase::Updates => {
                return Err(GraphError::IllegalActionNesting(
                    NestingViolation::ActionInBehavior,
                ))
            }
            Phase::Idle | Phase::SideEffects => {}
        }

        trace!(action = %label, "action queued");
        self.actions.push_back(QueuedAction {
            label,
            body,
            completion,
        });
        if self.driving {
            Ok(false)
        } else {
            self.driving = true;
            Ok(true)
        }
    }

    pub(crate) fn submit_side_effect(&mut self, label: String, body: Job) -> GraphResult<()> {
        if self.current_event.is_none() {
            return Err(GraphError::IllegalActionNesting(
                NestingViolation::SideEffectOutsideEvent,
            ));
        }
        if self.phase == Phase::SideEffects {
            return Err(GraphError::IllegalActionNesting(
                NestingViolation::SideEffectInSideEffect,
            ));
        }
        self.side_effects.push_back(QueuedSideEffect { label, body });
        Ok(())
    }

    // ---- Abort ----

    /// Unwind the open event after an error.
    ///
    /// The aborted event keeps its sequence number so the next event gets a
    /// fresh one. Discarded work is returned rather than dropped here so
    /// closures are never destroyed while the graph is locked.
    pub(crate) fn abort(&mut self, error: &GraphError) -> Aborted {
        let sequence = self.current_event.map(|event| event.sequence);
        let action = self.current_action.as_ref().map(|action| action.label.as_str());
        warn!(?sequence, ?action, %error, "event aborted");

        if let Some(event) = self.current_event.take() {
            self.last_event = event;
        }
        self.phase = Phase::Idle;
        self.driving = false;
        self.current_behavior = None;

        self.activated.clear();
        self.untracked.clear();
        self.modified_demands.clear();
        self.modified_supplies.clear();
        self.needs_ordering.clear();
        self.extents_added.clear();
        self.extents_removed.clear();
        for behavior in &mut self.behaviors {
            if matches!(
                behavior.ordering,
                OrderingState::Clearing | OrderingState::Ordering
            ) {
                behavior.ordering = OrderingState::NeedsOrdering;
            }
        }
        self.clear_transients();

        Aborted {
            current: self.current_action.take(),
            actions: self.actions.drain(..).collect(),
            side_effects: self.side_effects.drain(..).collect(),
        }
    }

    // ---- Introspection ----

    pub(crate) fn describe_resource(&self, id: ResourceId) -> Option<String> {
        let node = self.resources.get(id.index())?;
        let kind = match node.kind {
            ResourceKind::Plain => "resource",
            ResourceKind::Moment => "moment",
            ResourceKind::State => "state",
        };
        let supplier = node
            .supplied_by
            .map(|behavior| self.behavior_name(behavior))
            .unwrap_or_else(|| "none".to_string());
        let subsequents: Vec<String> = node
            .subsequents
            .iter()
            .map(|behavior| self.behavior_name(*behavior))
            .collect();
        Some(format!(
            "{} {} ({}) in {}; supplied by {}; demanded by [{}]",
            kind,
            self.resource_name(id),
            id,
            self.extent_name(node.extent),
            supplier,
            subsequents.join(", ")
        ))
    }

    pub(crate) fn describe_behavior(&self, id: BehaviorId) -> Option<String> {
        let node = self.behaviors.get(id.index())?;
        let names = |ids: &IndexSet<ResourceId>| {
            ids.iter()
                .map(|resource| self.resource_name(*resource))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let removed = if node.is_removed() { ", removed" } else { "" };
        Some(format!(
            "behavior {} ({}) in {}; order {}{}; demands [{}]; supplies [{}]",
            self.behavior_name(id),
            id,
            self.extent_name(node.extent),
            node.order,
            removed,
            names(&node.demands),
            names(&node.supplies)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::reactive::Extent;

    #[test]
    fn updates_need_an_open_event() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let count = extent.state(0, "count").unwrap();

        let state = graph.lock();
        let err = state.check_updater(count.id()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::IllegalUpdate {
                reason: UpdateViolation::NoEvent,
                ..
            }
        ));
    }

    #[test]
    fn side_effects_need_an_open_event() {
        let graph = Graph::new();
        let mut state = graph.lock();
        let err = state
            .submit_side_effect("late".into(), Box::new(|| Ok(())))
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::IllegalActionNesting(NestingViolation::SideEffectOutsideEvent)
        ));
    }

    #[test]
    fn first_submitter_drives_the_loop() {
        let graph = Graph::new();
        let mut state = graph.lock();
        assert!(state
            .submit_action("first".into(), Box::new(|| Ok(())), None)
            .unwrap());
        assert!(!state
            .submit_action("second".into(), Box::new(|| Ok(())), None)
            .unwrap());
        assert_eq!(state.actions.len(), 2);
    }

    #[test]
    fn abort_discards_queued_actions() {
        let graph = Graph::new();
        let (sender, mut receiver) = oneshot::channel();
        let mut state = graph.lock();
        state
            .submit_action("queued".into(), Box::new(|| Ok(())), Some(sender))
            .unwrap();

        let aborted = state.abort(&GraphError::ForeignGraph);
        assert!(!state.driving);
        assert!(state.actions.is_empty());
        drop(state);

        aborted.resolve(&GraphError::ForeignGraph);
        match receiver.try_recv() {
            Ok(Err(GraphError::ActionDiscarded(label))) => assert_eq!(label, "queued"),
            other => panic!("unexpected completion: {other:?}"),
        }
    }

    #[test]
    fn descriptions_name_links() {
        let graph = Graph::new();
        let extent = Extent::with_label(&graph, "counter");
        let count = extent.state(0, "count").unwrap();

        let state = graph.lock();
        let description = state.describe_resource(count.id()).unwrap();
        assert_eq!(
            description,
            format!(
                "state count ({}) in counter; supplied by none; demanded by []",
                count.id()
            )
        );
        assert!(state.describe_resource(ResourceId::from_index(99)).is_none());
    }
}
