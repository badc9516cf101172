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

//! The deliver-facing half of an agent.
//!
//! Mailboxes and dispatchers never see a `ManagedAgent` directly; they
//! work against this shared record. Everything here is either immutable
//! after construction (`id`, `priority`, `limits`) or guarded for
//! cross-thread access (`phase`, `working_thread`, `queue`, `filters`).
//! The agent's own tables (subscriptions, states, hooks) live inside
//! the runner's cell and are only touched on the working thread.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};

use crate::agent::filters::FilterStore;
use crate::agent::limits::{LimitGuard, MessageLimit, OverflowReaction};
use crate::common::{AgentId, Priority};
use crate::coop::CoopHandle;
use crate::dispatch::EventReceiver;
use crate::traits::{EventQueue, Message};

/// Strictly sequential lifecycle phases of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecyclePhase {
    /// Built, but its setup steps have not run yet.
    Constructed,
    /// Setup steps completed on the registering thread.
    Defined,
    /// Bound to an event queue; the binding is not live until the start
    /// demand is activated.
    Bound,
    /// Between `on_start` and `on_finish`; the only phase in which user
    /// events execute.
    Running,
    /// `on_finish` is executing or has executed; pending demands are
    /// discarded.
    Finishing,
    /// Fully detached from its queue and cooperation.
    Finished,
}

/// Outcome of charging an agent's message limit during delivery.
pub(crate) enum ChargeOutcome {
    /// No limit is configured for the message type.
    Unlimited,
    /// The demand was admitted; the guard releases the charge on drop.
    Charged(LimitGuard),
    /// The limit is full; the reaction tells the mailbox what to do, and
    /// the limit itself travels along so redirected deliveries can skip
    /// re-checking it.
    Overflow(OverflowReaction, Arc<MessageLimit>),
}

/// Agent state shared between its runner, its mailboxes, and its
/// cooperation.
pub(crate) struct AgentShared {
    pub(crate) id: AgentId,
    pub(crate) priority: Priority,
    pub(crate) phase: Mutex<LifecyclePhase>,
    /// Thread currently allowed to mutate the agent's tables. Set to the
    /// constructing thread at birth and re-pinned by the work thread at
    /// the start of every demand.
    pub(crate) working_thread: Mutex<Option<ThreadId>>,
    /// The bound event queue, if any. `None` before binding and again
    /// after `on_finish` releases the binding.
    pub(crate) queue: Mutex<Option<Arc<dyn EventQueue>>>,
    pub(crate) filters: RwLock<FilterStore>,
    /// Message limits, fixed before registration.
    pub(crate) limits: HashMap<TypeId, Arc<MessageLimit>>,
    /// The runner that executes demands for this agent. Weak: the runner
    /// owns the agent, not the other way around.
    pub(crate) runner: OnceLock<Weak<dyn EventReceiver>>,
    /// The owning cooperation, set when registration finalizes.
    pub(crate) coop: OnceLock<CoopHandle>,
}

impl AgentShared {
    pub(crate) fn new(
        id: AgentId,
        priority: Priority,
        limits: HashMap<TypeId, Arc<MessageLimit>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            priority,
            phase: Mutex::new(LifecyclePhase::Constructed),
            working_thread: Mutex::new(Some(std::thread::current().id())),
            queue: Mutex::new(None),
            filters: RwLock::new(FilterStore::default()),
            limits,
            runner: OnceLock::new(),
            coop: OnceLock::new(),
        })
    }

    /// Whether the calling thread is the agent's current working thread.
    pub(crate) fn on_working_thread(&self) -> bool {
        *self.working_thread.lock() == Some(std::thread::current().id())
    }

    /// Pins the calling thread as the working thread. Done by the work
    /// thread before each demand, which is what makes mutations legal
    /// from inside handlers on pool dispatchers.
    pub(crate) fn pin_working_thread(&self) {
        *self.working_thread.lock() = Some(std::thread::current().id());
    }

    pub(crate) fn phase(&self) -> LifecyclePhase {
        *self.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: LifecyclePhase) {
        *self.phase.lock() = phase;
    }

    /// The queue demands should be pushed to, if the agent is bound.
    pub(crate) fn current_queue(&self) -> Option<Arc<dyn EventQueue>> {
        self.queue.lock().clone()
    }

    /// Releases the event-queue binding; later deliveries go to the
    /// ground.
    pub(crate) fn release_queue(&self) -> Option<Arc<dyn EventQueue>> {
        self.queue.lock().take()
    }

    pub(crate) fn upgrade_runner(&self) -> Option<Arc<dyn EventReceiver>> {
        self.runner.get().and_then(Weak::upgrade)
    }

    /// Consults the delivery filter for `(mbox, ty)`.
    pub(crate) fn passes_filter(
        &self,
        mbox: crate::common::MailboxId,
        ty: TypeId,
        message: &dyn Message,
    ) -> bool {
        self.filters.read().passes(mbox, ty, message)
    }

    /// Charges the limit for `ty`, if one exists. `bypass` carries the
    /// limit that already overflowed on a redirected delivery; the same
    /// limit is not applied twice.
    pub(crate) fn charge_limit(
        &self,
        ty: TypeId,
        bypass: Option<&Arc<MessageLimit>>,
    ) -> ChargeOutcome {
        let Some(limit) = self.limits.get(&ty) else {
            return ChargeOutcome::Unlimited;
        };
        if let Some(bypassed) = bypass {
            if Arc::ptr_eq(bypassed, limit) {
                return ChargeOutcome::Unlimited;
            }
        }
        match limit.try_charge() {
            Ok(guard) => ChargeOutcome::Charged(guard),
            Err(reaction) => ChargeOutcome::Overflow(reaction, limit.clone()),
        }
    }
}

impl std::fmt::Debug for AgentShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentShared")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("phase", &*self.phase.lock())
            .finish()
    }
}
