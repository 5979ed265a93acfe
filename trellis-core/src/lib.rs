//! Trellis Core
//!
//! This crate provides the core engine for Trellis, a reactive behavior
//! graph. It implements:
//!
//! - Typed resources (plain resources, moments and states)
//! - Behaviors with static and dynamic demands and supplies
//! - Extents grouping nodes with a shared lifetime
//! - An event loop running actions, behaviors and side effects in order
//! - Incremental topological ordering with cycle detection
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `graph`: Arenas, the event loop, ordering and lifetime validation
//! - `reactive`: Typed handles for extents, resources and behaviors
//! - `error`: The error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Extent, Graph};
//!
//! let graph = Graph::new();
//! let extent = Extent::new(&graph);
//! let increment = extent.moment::<()>("increment")?;
//! let count = extent.state(0, "count")?;
//!
//! let counter = count.clone();
//! extent
//!     .behavior()
//!     .demands(&[&increment])
//!     .supplies(&[&count])
//!     .runs(move |_| counter.update(counter.value()? + 1))?;
//! extent.add_to_graph_with_action()?;
//!
//! increment.update_with_action(())?;
//! increment.update_with_action(())?;
//! assert_eq!(count.value()?, 2);
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{GraphError, GraphResult};
pub use graph::{EventStamp, Graph, GraphBuilder, GraphOptions, Phase, RemoveStrategy};
pub use reactive::{Behavior, Demand, Extent, Linkable, Moment, RelinkingOrder, Resource, State};
