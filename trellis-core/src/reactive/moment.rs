//! Moment Implementation
//!
//! A Moment models a one-shot occurrence: a click, a message arriving, a
//! timer firing. Whether it happened, and the payload it carried, are only
//! visible during the event in which it was updated; the graph clears both
//! when the event closes. The stamp of the last occurrence persists.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::GraphResult;
use crate::graph::{EventStamp, ResourceId, Transient};

use super::resource::{Linkable, Resource, Value};
use super::subscriber::Subscription;

pub(crate) struct MomentSlot<T> {
    happened: bool,
    payload: Option<T>,
    event: Option<EventStamp>,
}

impl<T: Value> Transient for RwLock<MomentSlot<T>> {
    fn clear(&self) {
        let mut slot = self.write();
        slot.happened = false;
        slot.payload = None;
    }
}

/// A transient resource carrying an optional payload of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let clicked = extent.moment::<(u32, u32)>("clicked")?;
///
/// // Inside an action:
/// clicked.update((10, 20))?;
/// assert!(clicked.just_updated()?);
/// assert_eq!(clicked.value()?, Some((10, 20)));
///
/// // After the event closes:
/// assert!(!clicked.just_updated()?);
/// assert_eq!(clicked.value()?, None);
/// ```
pub struct Moment<T: Value = ()> {
    resource: Resource,
    slot: Arc<RwLock<MomentSlot<T>>>,
}

impl<T: Value> Clone for Moment<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T: Value> Moment<T> {
    pub(crate) fn from_resource(resource: Resource) -> Self {
        Self {
            resource,
            slot: Arc::new(RwLock::new(MomentSlot {
                happened: false,
                payload: None,
                event: None,
            })),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    /// Record an occurrence carrying `payload`.
    pub fn update(&self, payload: T) -> GraphResult<()> {
        let transient: Arc<dyn Transient> = self.slot.clone();
        self.resource.write(Some(transient), |event| {
            let mut slot = self.slot.write();
            slot.happened = true;
            slot.payload = Some(payload);
            slot.event = Some(event);
            true
        })
    }

    /// Open an action whose only work is [`Moment::update`].
    pub fn update_with_action(&self, payload: T) -> GraphResult<()> {
        let graph = self.resource.graph()?;
        let moment = self.clone();
        graph.action_labeled(self.resource.action_label()?, move || {
            moment.update(payload)
        })
    }

    /// Whether the moment happened during the open event.
    pub fn just_updated(&self) -> GraphResult<bool> {
        self.resource.read(|_| self.slot.read().happened)
    }

    /// The payload, while the event it happened in is open.
    pub fn value(&self) -> GraphResult<Option<T>> {
        self.resource.read(|_| self.slot.read().payload.clone())
    }

    /// The event of the most recent occurrence.
    pub fn event(&self) -> GraphResult<Option<EventStamp>> {
        self.resource.read(|_| self.slot.read().event)
    }

    /// Whether the moment happened this event with exactly `payload`.
    pub fn just_updated_to(&self, payload: &T) -> GraphResult<bool>
    where
        T: PartialEq,
    {
        self.resource.read(|_| {
            let slot = self.slot.read();
            slot.happened && slot.payload.as_ref() == Some(payload)
        })
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

impl<T: Value> Linkable for Moment<T> {
    fn as_resource(&self) -> &Resource {
        &self.resource
    }
}
