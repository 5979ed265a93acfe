//! Errors
//!
//! Every engine error is a programming defect in the code driving the graph:
//! nothing here is retryable. Any error raised while an event is in flight
//! aborts that event and is handed back to the caller that submitted the
//! action (see [`crate::graph`]).

use std::sync::Arc;

use thiserror::Error;

use crate::graph::{BehaviorId, ExtentId, ResourceId};

/// Result alias used throughout the crate.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised by the behavior graph.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// A resource was updated from somewhere it may not be updated from.
    #[error("illegal update of {name}: {reason}")]
    IllegalUpdate {
        resource: ResourceId,
        name: String,
        reason: UpdateViolation,
    },

    /// A behavior read a resource it neither demands nor supplies.
    #[error("{behavior_name} read {name} without demanding or supplying it")]
    IllegalAccess {
        resource: ResourceId,
        name: String,
        behavior: BehaviorId,
        behavior_name: String,
    },

    /// A behavior demands a resource whose extent is not part of the graph.
    #[error("{behavior_name} demands {name}, which is not part of the graph")]
    UnregisteredDemand {
        behavior: BehaviorId,
        behavior_name: String,
        resource: ResourceId,
        name: String,
    },

    /// A behavior supplies a resource whose extent is not part of the graph.
    #[error("{behavior_name} supplies {name}, which is not part of the graph")]
    UnregisteredSupply {
        behavior: BehaviorId,
        behavior_name: String,
        resource: ResourceId,
        name: String,
    },

    /// Two behaviors tried to supply the same resource.
    #[error("{name} is supplied by {existing_name}; {attempted_name} cannot also supply it")]
    DuplicateSupplier {
        resource: ResourceId,
        name: String,
        existing: BehaviorId,
        existing_name: String,
        attempted: BehaviorId,
        attempted_name: String,
    },

    /// The demand/supply links form a cycle.
    ///
    /// `cycle` lists the resources walked from `behavior` back to itself.
    #[error("dependency cycle through {behavior_name}: {}", labels.join(" -> "))]
    DependencyCycle {
        behavior: BehaviorId,
        behavior_name: String,
        cycle: Vec<ResourceId>,
        labels: Vec<String>,
    },

    /// An extent lifetime rule was broken.
    #[error("lifetime violation on {name}: {rule}")]
    LifetimeViolation {
        extent: ExtentId,
        name: String,
        rule: LifetimeRule,
    },

    /// An action or side effect was created where it may not be.
    #[error("illegal nesting: {0}")]
    IllegalActionNesting(NestingViolation),

    /// Dynamic links were changed where they may not be.
    #[error("cannot relink {behavior_name}: {reason}")]
    IllegalLink {
        behavior: BehaviorId,
        behavior_name: String,
        reason: LinkViolation,
    },

    /// A node from one graph was linked into another.
    #[error("node belongs to a different graph")]
    ForeignGraph,

    /// A queued action never ran because an earlier event aborted.
    #[error("action {0} was discarded because an earlier event failed")]
    ActionDiscarded(String),

    /// The graph owning a handle has been dropped.
    #[error("the graph owning this handle has been dropped")]
    GraphDropped,

    /// User code panicked while the event was open. The panic itself keeps
    /// unwinding; this is what queued and awaiting actions are resolved with.
    #[error("{step} panicked: {message}")]
    Panicked { step: String, message: String },

    /// An error raised by user code inside an action, behavior or side effect.
    #[error("{0}")]
    Failed(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl GraphError {
    /// Wrap an error raised by user code so it can abort the current event.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }
}

/// Why a resource update was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UpdateViolation {
    #[error("resources can only be updated during an event")]
    NoEvent,

    #[error("side effects must start a new action to update resources")]
    SideEffectPhase,

    #[error("the resource's extent is not part of the graph")]
    NotInGraph,

    #[error("supplied by {supplier}, but updated by {current:?}")]
    WrongSupplier {
        supplier: BehaviorId,
        current: Option<BehaviorId>,
    },

    #[error("unsupplied resources can only be updated by an action, not by {current}")]
    UnsuppliedInBehavior { current: BehaviorId },
}

/// Which extent lifetime rule was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifetimeRule {
    #[error("extents can only be added or removed while an action or behavior runs")]
    OutsideEvent,

    #[error("extent was already added")]
    AlreadyAdded,

    #[error("a removed extent cannot be added again")]
    AlreadyRemoved,

    #[error("extent is not part of the graph")]
    NotAdded,

    #[error("resources and behaviors must be declared before the extent is added")]
    DeclaredAfterAdd,

    #[error("lifetime relationships must be established before either extent is added")]
    RelationshipAfterAdd,

    #[error("a lifetime cannot be its own ancestor")]
    CyclicRelationship,

    #[error("a child lifetime was added before its parent")]
    ParentNotAdded,

    #[error("every extent of a unified lifetime must be added in the same event")]
    UnifiedNotAdded,

    #[error("every extent of a unified lifetime must be removed in the same event")]
    UnifiedNotRemoved,

    #[error("child lifetimes must be removed with their parent")]
    ChildNotRemoved,

    #[error("{behavior} statically links {resource}, whose extent has an incompatible lifetime")]
    IncompatibleStaticLink {
        behavior: BehaviorId,
        resource: ResourceId,
    },

    #[error("{behavior} still links removed resource {resource}")]
    DanglingLink {
        behavior: BehaviorId,
        resource: ResourceId,
    },
}

/// Which nesting rule was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NestingViolation {
    #[error("actions cannot be created directly inside another action; use a side effect")]
    ActionInAction,

    #[error("actions cannot be created inside a behavior; use a side effect")]
    ActionInBehavior,

    #[error("side effects cannot be created inside another side effect")]
    SideEffectInSideEffect,

    #[error("side effects can only be created during an event")]
    SideEffectOutsideEvent,
}

/// Why a dynamic relink was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkViolation {
    #[error("links can only change during an event")]
    NoEvent,

    #[error("side effects cannot change links")]
    SideEffectPhase,

    #[error("the behavior's extent has not been added to the graph")]
    NotRegistered,

    #[error("the behavior's extent has been removed from the graph")]
    Removed,
}
