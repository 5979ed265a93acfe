//! State Implementation
//!
//! A State holds durable data. Each value is stamped with the event that
//! wrote it, and updating to an equal value is filtered out: the stamp does
//! not move and nothing downstream is activated.
//!
//! # Trace Values
//!
//! The first update of a State within an event saves the value it replaced.
//! `trace_value` and `trace_event` read that saved value while the event is
//! open, answering "what was true before this cascade began". Outside the
//! updating event they return the current value.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::GraphResult;
use crate::graph::{EventStamp, GraphState, ResourceId};

use super::resource::{Linkable, Resource, Value};
use super::subscriber::Subscription;

pub(crate) struct StateSlot<T> {
    current: T,
    event: EventStamp,
    previous: Option<(T, EventStamp)>,
}

impl<T> StateSlot<T> {
    fn record(&mut self, value: T, event: EventStamp) {
        let replaced = std::mem::replace(&mut self.current, value);
        if self.event.sequence != event.sequence {
            self.previous = Some((replaced, self.event));
        }
        self.event = event;
    }

    fn updated_in(&self, state: &GraphState) -> bool {
        state
            .current_event
            .is_some_and(|event| event.sequence == self.event.sequence)
    }

    /// The value and stamp as of the start of the open event.
    fn traced(&self, state: &GraphState) -> (&T, EventStamp) {
        match &self.previous {
            Some((value, event)) if self.updated_in(state) => (value, *event),
            _ => (&self.current, self.event),
        }
    }
}

/// A durable resource holding a value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = extent.state(0, "count")?;
///
/// // Inside an action:
/// count.update(1)?;
/// assert_eq!(count.value()?, 1);
/// assert_eq!(count.trace_value()?, 0);
///
/// // Equal values are filtered; force them through with update_force.
/// count.update(1)?;
/// count.update_force(1)?;
/// ```
pub struct State<T: Value> {
    resource: Resource,
    slot: Arc<RwLock<StateSlot<T>>>,
}

impl<T: Value> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T: Value> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("State").field(&self.resource.id()).finish()
    }
}

impl<T: Value> State<T> {
    pub(crate) fn from_resource(resource: Resource, initial: T) -> Self {
        Self {
            resource,
            slot: Arc::new(RwLock::new(StateSlot {
                current: initial,
                event: EventStamp::INITIAL,
                previous: None,
            })),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    /// Write the slot directly, bypassing update checks and propagation.
    pub(crate) fn record(&self, value: T, event: EventStamp) {
        self.slot.write().record(value, event);
    }

    /// Set a new value. Equal values are ignored.
    pub fn update(&self, value: T) -> GraphResult<()>
    where
        T: PartialEq,
    {
        self.resource.write(None, |event| {
            let mut slot = self.slot.write();
            if slot.current == value {
                return false;
            }
            slot.record(value, event);
            true
        })
    }

    /// Set a new value even if it equals the current one.
    pub fn update_force(&self, value: T) -> GraphResult<()> {
        self.resource.write(None, |event| {
            self.slot.write().record(value, event);
            true
        })
    }

    /// Open an action whose only work is [`State::update`].
    pub fn update_with_action(&self, value: T) -> GraphResult<()>
    where
        T: PartialEq,
    {
        let graph = self.resource.graph()?;
        let state = self.clone();
        graph.action_labeled(self.resource.action_label()?, move || state.update(value))
    }

    pub fn value(&self) -> GraphResult<T> {
        self.resource.read(|_| self.slot.read().current.clone())
    }

    /// The event that wrote the current value.
    pub fn event(&self) -> GraphResult<EventStamp> {
        self.resource.read(|_| self.slot.read().event)
    }

    /// Whether the value changed during the open event.
    pub fn just_updated(&self) -> GraphResult<bool> {
        self.resource.read(|state| self.slot.read().updated_in(state))
    }

    pub fn just_updated_to(&self, value: &T) -> GraphResult<bool>
    where
        T: PartialEq,
    {
        self.resource.read(|state| {
            let slot = self.slot.read();
            slot.updated_in(state) && slot.current == *value
        })
    }

    pub fn just_updated_from(&self, value: &T) -> GraphResult<bool>
    where
        T: PartialEq,
    {
        self.resource.read(|state| {
            let slot = self.slot.read();
            slot.updated_in(state) && slot.traced(state).0 == value
        })
    }

    pub fn just_updated_to_from(&self, to: &T, from: &T) -> GraphResult<bool>
    where
        T: PartialEq,
    {
        self.resource.read(|state| {
            let slot = self.slot.read();
            slot.updated_in(state) && slot.current == *to && slot.traced(state).0 == from
        })
    }

    /// The value as of the start of the open event.
    pub fn trace_value(&self) -> GraphResult<T> {
        self.resource
            .read(|state| self.slot.read().traced(state).0.clone())
    }

    /// The stamp as of the start of the open event.
    pub fn trace_event(&self) -> GraphResult<EventStamp> {
        self.resource.read(|state| self.slot.read().traced(state).1)
    }

    pub fn describe(&self) -> GraphResult<String> {
        self.resource.describe()
    }

    pub fn subscribe_to_just_updated<F>(&self, callback: F) -> GraphResult<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.resource.subscribe_to_just_updated(callback)
    }
}

impl<T: Value> Linkable for State<T> {
    fn as_resource(&self) -> &Resource {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::reactive::Extent;

    fn setup(initial: i32) -> (Graph, State<i32>) {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        let state = extent.state(initial, "value").unwrap();
        extent.add_to_graph_with_action().unwrap();
        (graph, state)
    }

    #[test]
    fn update_records_the_event() {
        let (graph, state) = setup(0);
        state.update_with_action(5).unwrap();

        assert_eq!(state.value().unwrap(), 5);
        assert_eq!(state.event().unwrap(), graph.last_event());
        assert!(!state.just_updated().unwrap());
    }

    #[test]
    fn equal_values_are_filtered() {
        let (graph, state) = setup(3);
        state.update_with_action(3).unwrap();
        assert_eq!(state.event().unwrap(), EventStamp::INITIAL);

        let forced = state.clone();
        graph.action(move || forced.update_force(3)).unwrap();
        assert_eq!(state.event().unwrap(), graph.last_event());
    }

    #[test]
    fn trace_reads_the_value_before_the_event() {
        let (graph, state) = setup(1);
        let inner = state.clone();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = seen.clone();
        graph
            .action(move || {
                inner.update(2)?;
                inner.update(3)?;
                log.lock().push((
                    inner.value()?,
                    inner.trace_value()?,
                    inner.trace_event()?.sequence,
                    inner.just_updated_to_from(&3, &1)?,
                    inner.just_updated_from(&2)?,
                ));
                Ok(())
            })
            .unwrap();

        assert_eq!(*seen.lock(), vec![(3, 1, 0, true, false)]);
        assert_eq!(state.trace_value().unwrap(), 3);
    }
}
