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

//! Cooperations: sets of agents with an atomic lifetime.
//!
//! A [`Coop`] is built, populated with agent builders, and handed to
//! [`Environment::register_coop`](crate::common::environment::Environment::register_coop).
//! Registration is all-or-none: either every agent is constructed, set
//! up, and bound, and then every agent receives `on_start`, or nothing
//! of the cooperation remains. Cooperations form a tree by parent name; a
//! parent cannot finish deregistering before all of its descendants have.

pub(crate) mod registry;

mod notifications;

pub use notifications::{
    coop_dereg_notificator, coop_reg_notificator, CoopDeregistered, CoopRegistered,
    DeregNotificator, RegNotificator,
};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::agent::builder::{AgentBuilder, AgentSeed, HatchedAgent};
use crate::agent::shared::AgentShared;
use crate::agent::ExceptionReaction;
use crate::common::environment::Environment;
use crate::common::fatal::abort_process;
use crate::dispatch::{DemandKind, EventReceiver, ExecutionDemand};
use crate::traits::EventQueue;

/// Why a cooperation was (or is being) deregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregReason {
    /// Ordinary, application-requested deregistration.
    Normal,
    /// The environment is shutting down.
    Shutdown,
    /// An agent's event handler panicked with the deregister-cooperation
    /// reaction.
    UnhandledException,
    /// Application-defined reason code.
    UserCode(u32),
}

/// A cooperation under construction.
#[derive(Default)]
pub struct Coop {
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<String>,
    pub(crate) exception_reaction: ExceptionReaction,
    pub(crate) agents: Vec<Box<dyn AgentSeed>>,
    pub(crate) reg_notificators: Vec<RegNotificator>,
    pub(crate) dereg_notificators: Vec<DeregNotificator>,
}

impl Coop {
    /// Starts an anonymous cooperation; a unique name is generated at
    /// registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a named cooperation. The name must be unique among
    /// registered cooperations.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Names the cooperation. The name must be unique among registered
    /// cooperations; without one, a name is generated at registration.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Names the parent cooperation, making this one its child. The
    /// parent must be registered and not deregistering.
    pub fn set_parent(&mut self, parent: impl Into<String>) -> &mut Self {
        self.parent = Some(parent.into());
        self
    }

    /// Sets the panic reaction agents inherit when theirs is `Inherit`.
    pub fn set_exception_reaction(&mut self, reaction: ExceptionReaction) -> &mut Self {
        self.exception_reaction = reaction;
        self
    }

    /// Appends an agent to the cooperation.
    pub fn add_agent<A: Send + 'static>(&mut self, builder: AgentBuilder<A>) -> &mut Self {
        self.agents.push(Box::new(builder));
        self
    }

    /// Adds a callback fired when registration completes.
    pub fn add_reg_notificator(&mut self, notificator: RegNotificator) -> &mut Self {
        self.reg_notificators.push(notificator);
        self
    }

    /// Adds a callback fired when deregistration finalizes.
    pub fn add_dereg_notificator(&mut self, notificator: DeregNotificator) -> &mut Self {
        self.dereg_notificators.push(notificator);
        self
    }
}

impl std::fmt::Debug for Coop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coop")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("agents", &self.agents.len())
            .finish()
    }
}

/// One registered agent as its cooperation tracks it.
pub(crate) struct CoopAgent {
    pub(crate) runner: Arc<dyn EventReceiver>,
    pub(crate) shared: Arc<AgentShared>,
    pub(crate) queue: Arc<dyn EventQueue>,
}

impl From<HatchedAgent> for CoopAgent {
    fn from(hatched: HatchedAgent) -> Self {
        Self {
            runner: hatched.runner,
            shared: hatched.shared,
            queue: hatched.queue,
        }
    }
}

enum CoopState {
    Registered,
    Deregistering(DeregReason),
}

struct CoopCounts {
    live_agents: usize,
    live_children: usize,
    finalized: bool,
}

pub(crate) struct CoopInner {
    name: String,
    parent: Option<String>,
    env: Environment,
    exception_reaction: ExceptionReaction,
    agents: Mutex<Vec<CoopAgent>>,
    counts: Mutex<CoopCounts>,
    children: Mutex<Vec<String>>,
    state: Mutex<CoopState>,
    reg_notificators: Vec<RegNotificator>,
    dereg_notificators: Vec<DeregNotificator>,
}

/// Shared handle to a registered cooperation.
#[derive(Clone)]
pub(crate) struct CoopHandle(Arc<CoopInner>);

impl CoopHandle {
    pub(crate) fn new(
        name: String,
        parent: Option<String>,
        env: Environment,
        exception_reaction: ExceptionReaction,
        agents: Vec<CoopAgent>,
        reg_notificators: Vec<RegNotificator>,
        dereg_notificators: Vec<DeregNotificator>,
    ) -> Self {
        let live_agents = agents.len();
        Self(Arc::new(CoopInner {
            name,
            parent,
            env,
            exception_reaction,
            agents: Mutex::new(agents),
            counts: Mutex::new(CoopCounts {
                live_agents,
                live_children: 0,
                finalized: false,
            }),
            children: Mutex::new(Vec::new()),
            state: Mutex::new(CoopState::Registered),
            reg_notificators,
            dereg_notificators,
        }))
    }

    pub(crate) fn name(&self) -> &str {
        &self.0.name
    }

    pub(crate) fn parent_name(&self) -> Option<&str> {
        self.0.parent.as_deref()
    }

    /// Unbinds and discards every agent without running `on_start` or
    /// `on_finish`. Used when registration fails after construction.
    pub(crate) fn rollback_agents(&self) {
        for agent in self.0.agents.lock().drain(..) {
            agent.shared.release_queue();
            agent.queue.purge_agent(agent.shared.id);
        }
    }

    pub(crate) fn exception_reaction(&self) -> ExceptionReaction {
        self.0.exception_reaction
    }

    pub(crate) fn is_deregistering(&self) -> bool {
        matches!(*self.0.state.lock(), CoopState::Deregistering(_))
    }

    /// Records `child` and bumps the live-children count. Called under
    /// the registry lock while the child's registration finalizes.
    pub(crate) fn register_child(&self, child: &str) {
        self.0.children.lock().push(child.to_string());
        self.0.counts.lock().live_children += 1;
    }

    /// Marks the cooperation deregistering. Returns `false` if it
    /// already was; the first reason wins.
    pub(crate) fn begin_deregister(&self, reason: DeregReason) -> bool {
        let mut state = self.0.state.lock();
        if matches!(*state, CoopState::Deregistering(_)) {
            return false;
        }
        trace!(coop = %self.0.name, ?reason, "deregistering");
        *state = CoopState::Deregistering(reason);
        true
    }

    pub(crate) fn children_snapshot(&self) -> Vec<String> {
        self.0.children.lock().clone()
    }

    /// Queues the `on_finish` demand for every agent.
    pub(crate) fn push_finish_demands(&self) {
        let agents: Vec<(Arc<dyn EventReceiver>, Arc<dyn EventQueue>)> = self
            .0
            .agents
            .lock()
            .iter()
            .map(|agent| (agent.runner.clone(), agent.queue.clone()))
            .collect();
        for (runner, queue) in agents {
            queue.push(ExecutionDemand::lifecycle(runner, DemandKind::OnFinish));
        }
    }

    /// Convenience entry point used by agents and panic reactions.
    pub(crate) fn deregister(&self, reason: DeregReason) {
        // Already-finalized cooperations are simply gone from the
        // registry; nothing to do then.
        let _ = self.0.env.deregister_coop(&self.0.name, reason);
    }

    /// Makes every agent eligible for execution, `on_start` first.
    pub(crate) fn activate_agents(&self) {
        for agent in self.0.agents.lock().iter() {
            agent
                .queue
                .activate(ExecutionDemand::lifecycle(agent.runner.clone(), DemandKind::OnStart));
        }
    }

    pub(crate) fn attach_agents(&self) {
        for agent in self.0.agents.lock().iter() {
            let _ = agent.shared.coop.set(self.clone());
        }
    }

    pub(crate) fn fire_reg_notificators(&self) {
        for notificator in &self.0.reg_notificators {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                notificator(&self.0.env, &self.0.name);
            }));
            if let Err(panic) = result {
                abort_process("registration notificator", &*panic);
            }
        }
    }

    /// Called by an agent's runner when its `on_finish` completed and the
    /// queue binding was released.
    pub(crate) fn agent_finished(&self) {
        let finalize = {
            let mut counts = self.0.counts.lock();
            counts.live_agents = counts.live_agents.saturating_sub(1);
            self.should_finalize(&mut counts)
        };
        if finalize {
            self.finalize();
        }
    }

    /// Called by a child cooperation when its deregistration finalized.
    fn child_deregistered(&self, child: &str) {
        self.0.children.lock().retain(|name| name != child);
        let finalize = {
            let mut counts = self.0.counts.lock();
            counts.live_children = counts.live_children.saturating_sub(1);
            self.should_finalize(&mut counts)
        };
        if finalize {
            self.finalize();
        }
    }

    fn should_finalize(&self, counts: &mut CoopCounts) -> bool {
        if counts.finalized || counts.live_agents != 0 || counts.live_children != 0 {
            return false;
        }
        if !matches!(*self.0.state.lock(), CoopState::Deregistering(_)) {
            return false;
        }
        counts.finalized = true;
        true
    }

    /// Completes deregistration: leave the registry, fire notificators,
    /// release the parent (which may cascade), wake the environment.
    fn finalize(&self) {
        let reason = match *self.0.state.lock() {
            CoopState::Deregistering(reason) => reason,
            CoopState::Registered => unreachable!("finalize outside deregistration"),
        };
        trace!(coop = %self.0.name, ?reason, "deregistration finalized");

        // Drop the agent slots; pending-work references are gone, so the
        // runners (and with them the agents) die here.
        self.0.agents.lock().clear();

        self.0.env.registry().remove(&self.0.name);

        for notificator in &self.0.dereg_notificators {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                notificator(&self.0.env, &self.0.name, reason);
            }));
            if let Err(panic) = result {
                abort_process("deregistration notificator", &*panic);
            }
        }

        if let Some(parent) = &self.0.parent {
            if let Some(parent_handle) = self.0.env.registry().lookup(parent) {
                parent_handle.child_deregistered(&self.0.name);
            }
        }

        self.0.env.on_coop_removed();
    }
}

impl std::fmt::Debug for CoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CoopHandle({})", self.0.name)
    }
}
