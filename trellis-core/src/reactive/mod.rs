//! Reactive Handles
//!
//! This module holds the typed handles user code works with: extents,
//! resources and behaviors. Handles are cheap to clone and refer back to the
//! graph weakly; all bookkeeping lives in [`crate::graph`].
//!
//! # Concepts
//!
//! ## Resources
//!
//! A Resource is a node that behaviors link to. Plain resources carry no
//! value. A [`Moment`] carries a payload that is visible only during the event
//! it happened in. A [`State`] holds a durable value stamped with the event
//! that wrote it.
//!
//! ## Behaviors
//!
//! A Behavior demands some resources and supplies others. Each resource has
//! at most one supplier, and a behavior runs only after the suppliers of
//! everything it demands. Only the supplier (or an action, for resources
//! without one) may update a resource, and a running behavior may only read
//! what it demands or supplies.
//!
//! ## Extents
//!
//! An [`Extent`] is the unit of graph membership. Resources and behaviors are
//! declared on a pending extent and enter the graph together when it is
//! added.
//!
//! # Implementation Notes
//!
//! Values live in per-resource slots guarded by `parking_lot` locks, apart
//! from the graph state. Reading a value takes the graph lock only long
//! enough to check access, so behaviors never run while the graph is locked.

mod behavior;
mod extent;
mod moment;
mod resource;
mod state;
mod subscriber;

pub use behavior::{Behavior, BehaviorBuilder, RelinkingOrder};
pub use extent::Extent;
pub use moment::Moment;
pub use resource::{Demand, Linkable, Resource, Value};
pub use state::State;
pub use subscriber::{Subscriber, SubscriberId, Subscription};
