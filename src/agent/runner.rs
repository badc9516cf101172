/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::agent::managed_agent::ManagedAgent;
use crate::agent::shared::{AgentShared, LifecyclePhase};
use crate::agent::ExceptionReaction;
use crate::common::fatal::{abort_process, panic_message};
use crate::coop::DeregReason;
use crate::dispatch::{DemandKind, EventReceiver, ExecutionDemand};
use crate::error::{Error, ServiceError};

/// Executes demands against one typed agent.
///
/// The runner owns the agent behind a mutex. The mutex is never contended,
/// since dispatchers guarantee at most one demand of an agent executes at
/// a time; it exists to hand the type-erased `process` entry point safe
/// mutable access. A demand holds a strong reference to its runner, so an
/// agent stays alive for exactly as long as work for it is pending.
pub(crate) struct AgentRunner<A: Send + 'static> {
    shared: Arc<AgentShared>,
    cell: Mutex<ManagedAgent<A>>,
}

impl<A: Send + 'static> AgentRunner<A> {
    /// Wraps `agent` and wires the weak runner reference into its shared
    /// record so mailboxes can address demands at it.
    pub(crate) fn new(agent: ManagedAgent<A>) -> Arc<Self> {
        let shared = agent.shared.clone();
        let runner = Arc::new(Self {
            shared,
            cell: Mutex::new(agent),
        });
        let erased: Arc<dyn EventReceiver> = runner.clone();
        let weak: Weak<dyn EventReceiver> = Arc::downgrade(&erased);
        let _ = runner.shared.runner.set(weak);
        runner
    }

    /// Runs registration-time setup steps with exclusive agent access.
    pub(crate) fn configure(
        &self,
        setup: impl FnOnce(&mut ManagedAgent<A>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        setup(&mut self.cell.lock())
    }

    fn run_on_start(&self, agent: &mut ManagedAgent<A>) {
        if self.shared.phase() != LifecyclePhase::Bound {
            return;
        }
        self.shared.set_phase(LifecyclePhase::Running);
        trace!(agent = self.shared.id, "on_start");
        if let Some(hook) = agent.on_start.clone() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(agent))) {
                self.react_to_panic(agent, &*panic, "on_start");
            }
        }
    }

    fn run_on_finish(&self, agent: &mut ManagedAgent<A>) {
        match self.shared.phase() {
            LifecyclePhase::Bound | LifecyclePhase::Running => {}
            _ => return,
        }
        self.shared.set_phase(LifecyclePhase::Finishing);
        trace!(agent = self.shared.id, "on_finish");
        if let Some(hook) = agent.on_finish.clone() {
            // Teardown must not fail; a panic here is unrecoverable.
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(agent))) {
                abort_process("on_finish hook", &*panic);
            }
        }
        agent.teardown_subscriptions();
        if let Some(queue) = self.shared.release_queue() {
            // Remaining demands go to the ground: limits released,
            // service futures failed as skipped, handlers not invoked.
            queue.purge_agent(self.shared.id);
        }
        self.shared.set_phase(LifecyclePhase::Finished);
        if let Some(coop) = self.shared.coop.get() {
            coop.agent_finished();
        }
    }

    fn run_user_event(&self, agent: &mut ManagedAgent<A>, demand: ExecutionDemand) {
        if self.shared.phase() != LifecyclePhase::Running {
            trace!(
                agent = self.shared.id,
                r#type = demand.msg_type.type_name(),
                "agent not running, demand discarded"
            );
            return;
        }
        let ExecutionDemand {
            mbox_id,
            msg_type,
            payload,
            promise,
            limit,
            ..
        } = demand;

        // The handler is resolved once, against the state current at
        // dequeue time. No fallback to the default state.
        let Some(slot) = agent.find_handler(mbox_id, msg_type.type_id()) else {
            trace!(
                agent = self.shared.id,
                r#type = msg_type.type_name(),
                state = %agent.current_state_name(),
                "no handler for message in current state"
            );
            if let Some(promise) = promise {
                promise.fail(ServiceError::NoHandler);
            }
            return;
        };

        trace!(
            agent = self.shared.id,
            r#type = msg_type.type_name(),
            safety = ?slot.thread_safety,
            "dispatching event"
        );
        let outcome = catch_unwind(AssertUnwindSafe(|| (slot.handler)(agent, payload.as_ref())));
        match (outcome, promise) {
            (Ok(reply), Some(promise)) => promise.complete(reply),
            (Ok(_), None) => {}
            (Err(panic), Some(promise)) => {
                // A service handler's failure belongs to the caller, not
                // to the agent's exception reaction.
                promise.fail(ServiceError::HandlerPanicked(panic_message(&*panic)));
            }
            (Err(panic), None) => {
                self.react_to_panic(agent, &*panic, msg_type.type_name());
            }
        }
        drop(limit);
    }

    fn react_to_panic(&self, agent: &mut ManagedAgent<A>, panic: &(dyn Any + Send), context: &str) {
        let reaction = self.resolve_reaction(agent);
        error!(
            agent = self.shared.id,
            context,
            panic = %panic_message(panic),
            ?reaction,
            "event handler panicked"
        );
        match reaction {
            ExceptionReaction::Abort | ExceptionReaction::Inherit => {
                abort_process(context, panic);
            }
            ExceptionReaction::ShutdownEnvironment => {
                agent.switch_to_sentinel();
                agent.env().stop();
            }
            ExceptionReaction::DeregisterCoop => {
                agent.switch_to_sentinel();
                if let Some(coop) = self.shared.coop.get() {
                    coop.deregister(DeregReason::UnhandledException);
                }
            }
            ExceptionReaction::Ignore => {}
        }
    }

    /// Resolves `Inherit` through the cooperation up to the environment
    /// default. The result is never `Inherit`.
    fn resolve_reaction(&self, agent: &ManagedAgent<A>) -> ExceptionReaction {
        let mut reaction = agent.exception_reaction;
        if reaction == ExceptionReaction::Inherit {
            if let Some(coop) = self.shared.coop.get() {
                reaction = coop.exception_reaction();
            }
        }
        if reaction == ExceptionReaction::Inherit {
            reaction = agent.env().default_exception_reaction();
        }
        reaction
    }
}

impl<A: Send + 'static> EventReceiver for AgentRunner<A> {
    fn shared(&self) -> &Arc<AgentShared> {
        &self.shared
    }

    fn process(&self, demand: ExecutionDemand) {
        let mut agent = self.cell.lock();
        // Whoever executes the demand is, for its duration, the only
        // thread allowed to mutate the agent's tables.
        self.shared.pin_working_thread();
        match demand.kind {
            DemandKind::OnStart => self.run_on_start(&mut agent),
            DemandKind::OnFinish => self.run_on_finish(&mut agent),
            DemandKind::UserEvent | DemandKind::ServiceRequest => {
                self.run_user_event(&mut agent, demand);
            }
        }
    }
}
