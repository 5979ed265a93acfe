//! Event Loop
//!
//! The loop is a state machine over [`Phase`]:
//!
//! ```text
//! Idle -> Action -> Updates -> SideEffects -> Idle
//!            ^                      |
//!            +---- next action -----+
//! ```
//!
//! Each turn locks the graph, asks `GraphState::next_step` what to do, and
//! unlocks before running any user code (action bodies, behaviors, side
//! effects, relink functions). User code may therefore call back into the
//! graph freely: updates, reads, new side effects and queued actions all take
//! the lock themselves.
//!
//! Any error aborts the open event (see `GraphState::abort`) and is returned
//! to whoever is driving the loop. A panic in user code aborts the event the
//! same way and then resumes unwinding into the driver.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, debug_span, trace, Span};

use crate::error::{GraphError, GraphResult};
use crate::reactive::{Demand, Extent, Resource};

use super::event::{EventStamp, Phase};
use super::node::{BehaviorId, BehaviorRun, Link, Relink, ResourceId};
use super::state::{Completion, CurrentAction, GraphState, Job, QueuedSideEffect};
use super::Graph;

/// The next thing the loop should do.
pub(crate) enum Step {
    /// Run the body of the action that just opened an event.
    Action {
        event: EventStamp,
        label: String,
        body: Job,
    },

    /// Run behaviors sharing the lowest activated order.
    Behaviors(Vec<BehaviorId>),

    SideEffect(QueuedSideEffect),

    /// The event closed; resolve its action's completion.
    Closed(Option<Completion>),

    /// Nothing left to do.
    Idle,
}

impl GraphState {
    pub(crate) fn next_step(&mut self) -> GraphResult<Step> {
        if self.current_event.is_some() {
            self.phase = Phase::Updates;
            if self.structural_work_pending() {
                self.process_structural_changes()?;
            }

            let batch = self.pop_batch();
            if !batch.is_empty() {
                return Ok(Step::Behaviors(batch));
            }

            self.validate_settled()?;
            if let Some(effect) = self.side_effects.pop_front() {
                self.phase = Phase::SideEffects;
                return Ok(Step::SideEffect(effect));
            }
            return Ok(Step::Closed(self.close_event()));
        }

        if let Some(action) = self.actions.pop_front() {
            let event = self.open_event();
            self.phase = Phase::Action;
            self.current_action = Some(CurrentAction {
                label: action.label.clone(),
                completion: action.completion,
            });
            return Ok(Step::Action {
                event,
                label: action.label,
                body: action.body,
            });
        }

        self.phase = Phase::Idle;
        self.driving = false;
        Ok(Step::Idle)
    }

    fn open_event(&mut self) -> EventStamp {
        let event = EventStamp {
            sequence: self.last_event.sequence + 1,
            timestamp: self.clock.now(),
        };
        self.current_event = Some(event);
        debug!(sequence = event.sequence, timestamp = event.timestamp, "event opened");
        event
    }

    fn close_event(&mut self) -> Option<Completion> {
        self.clear_transients();
        if let Some(event) = self.current_event.take() {
            self.last_event = event;
            debug!(sequence = event.sequence, "event closed");
        }
        self.phase = Phase::Idle;
        self.current_action
            .take()
            .and_then(|action| action.completion)
    }

    /// Pop every activated behavior sharing the lowest order. Behaviors
    /// removed since activation are dropped on the way.
    fn pop_batch(&mut self) -> Vec<BehaviorId> {
        let behaviors = &self.behaviors;
        let activated = &mut self.activated;
        let key = |id: &BehaviorId| behaviors[id.index()].order;

        let mut batch = Vec::new();
        let mut batch_order = None;
        while let Some(&next) = activated.peek_by(key) {
            let behavior = &behaviors[next.index()];
            if !behavior.is_removed() {
                match batch_order {
                    None => batch_order = Some(behavior.order),
                    Some(order) if order != behavior.order => break,
                    Some(_) => {}
                }
                batch.push(next);
            }
            activated.pop_by(key);
        }
        batch
    }
}

impl Graph {
    /// Run events until no action is left. Only the caller that flipped
    /// `driving` on may call this.
    pub(crate) fn run_event_loop(&self) -> GraphResult<()> {
        let mut span = Span::none();
        loop {
            let step = self.lock().next_step();
            let step = match step {
                Ok(step) => step,
                Err(error) => return Err(self.abort(error)),
            };

            let result = match step {
                Step::Action { event, label, body } => {
                    span = debug_span!("event", sequence = event.sequence);
                    let _entered = span.enter();
                    trace!(action = %label, "running action");
                    self.unwinding(&label, body)
                }
                Step::Behaviors(batch) => {
                    let _entered = span.enter();
                    self.unwinding("behavior", || self.run_batch(batch))
                }
                Step::SideEffect(effect) => {
                    let _entered = span.enter();
                    trace!(side_effect = %effect.label, "running side effect");
                    self.unwinding(&effect.label, effect.body)
                }
                Step::Closed(completion) => {
                    if let Some(completion) = completion {
                        let _ = completion.send(Ok(()));
                    }
                    span = Span::none();
                    Ok(())
                }
                Step::Idle => return Ok(()),
            };

            if let Err(error) = result {
                return Err(self.abort(error));
            }
        }
    }

    /// Run user code. If it panics, the open event is aborted before the
    /// panic carries on, so the graph is left idle and usable.
    fn unwinding<F>(&self, step: &str, run: F) -> GraphResult<()>
    where
        F: FnOnce() -> GraphResult<()>,
    {
        match panic::catch_unwind(AssertUnwindSafe(run)) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "opaque panic payload".to_string());
                self.abort(GraphError::Panicked {
                    step: step.to_string(),
                    message,
                });
                panic::resume_unwind(payload)
            }
        }
    }

    fn run_batch(&self, batch: Vec<BehaviorId>) -> GraphResult<()> {
        let mut pending = batch.into_iter();
        while let Some(id) = pending.next() {
            let (run, extent) = {
                let mut state = self.lock();
                let behavior = &state.behaviors[id.index()];
                if behavior.is_removed() {
                    continue;
                }
                let run = behavior.run.clone();
                let extent = state.extents[behavior.extent.index()].handle.clone();
                state.current_behavior = Some(id);
                (run, extent)
            };

            trace!(behavior = %id, "running behavior");
            let result = match &run {
                BehaviorRun::User(run) => run(&extent),
                BehaviorRun::Relink(relink) => self.relink(relink, &extent),
            };
            drop(run);

            let mut state = self.lock();
            state.current_behavior = None;
            result?;

            // Structural changes must be committed before anything else runs.
            if state.structural_work_pending() {
                for rest in pending {
                    state.activated.push(rest);
                }
                break;
            }
        }
        Ok(())
    }

    fn relink(&self, relink: &Relink, extent: &Extent) -> GraphResult<()> {
        trace!(behavior = %relink.target, "relinking");
        if let Some(compute) = &relink.demands {
            let links = self.resolve_demands(compute(extent)?.into_iter().flatten())?;
            self.lock().set_dynamic_demands(relink.target, links)?;
        }
        if let Some(compute) = &relink.supplies {
            let resources = self.resolve_supplies(compute(extent)?.into_iter().flatten())?;
            self.lock().set_dynamic_supplies(relink.target, resources)?;
        }
        Ok(())
    }

    pub(crate) fn resolve_demands(
        &self,
        demands: impl IntoIterator<Item = Demand>,
    ) -> GraphResult<Vec<Link>> {
        demands
            .into_iter()
            .map(|demand| {
                Ok(Link {
                    resource: self.resolve(&demand.resource)?,
                    ordering_only: demand.ordering_only,
                })
            })
            .collect()
    }

    pub(crate) fn resolve_supplies(
        &self,
        supplies: impl IntoIterator<Item = Resource>,
    ) -> GraphResult<Vec<ResourceId>> {
        supplies
            .into_iter()
            .map(|resource| self.resolve(&resource))
            .collect()
    }

    /// The id of a resource, provided it belongs to this graph.
    pub(crate) fn resolve(&self, resource: &Resource) -> GraphResult<ResourceId> {
        if resource.belongs_to(self) {
            Ok(resource.id())
        } else {
            Err(GraphError::ForeignGraph)
        }
    }

    /// Unwind the open event and hand the error back.
    pub(crate) fn abort(&self, error: GraphError) -> GraphError {
        let aborted = self.lock().abort(&error);
        aborted.resolve(&error);
        error
    }
}
