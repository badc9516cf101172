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

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::limits::{MessageLimit, OverflowReaction};
use crate::agent::managed_agent::{LifecycleHook, ManagedAgent};
use crate::agent::runner::AgentRunner;
use crate::agent::shared::{AgentShared, LifecyclePhase};
use crate::agent::subscription::SubscriptionStorageKind;
use crate::agent::ExceptionReaction;
use crate::common::environment::Environment;
use crate::common::Priority;
use crate::dispatch::{DispatcherHandle, EventReceiver};
use crate::error::Error;
use crate::traits::{EventQueue, Message};

/// Configures one agent of a cooperation.
///
/// A builder collects everything known before registration: the model,
/// scheduling attributes, message limits, lifecycle hooks, and the setup
/// steps that create the agent's initial subscriptions. It is consumed by
/// [`Coop::add_agent`](crate::coop::Coop::add_agent); construction itself
/// happens during cooperation registration.
///
/// ```rust,ignore
/// coop.add_agent(
///     AgentBuilder::new(Counter::default())
///         .limit::<Tick>(8, OverflowReaction::Drop)
///         .on_start(|agent| agent.direct_mbox().signal::<Go>())
///         .setup(|agent| {
///             let mbox = agent.direct_mbox();
///             agent.subscribe(&mbox).signal::<Go>(|agent| agent.model.running = true)
///         }),
/// );
/// ```
pub struct AgentBuilder<A> {
    model: A,
    priority: Priority,
    exception_reaction: ExceptionReaction,
    storage: SubscriptionStorageKind,
    dispatcher: Option<DispatcherHandle>,
    limits: Vec<(TypeId, &'static str, usize, OverflowReaction)>,
    setups: Vec<SetupFn<A>>,
    on_start: Option<LifecycleHook<A>>,
    on_finish: Option<LifecycleHook<A>>,
}

type SetupFn<A> = Box<dyn FnOnce(&mut ManagedAgent<A>) -> Result<(), Error> + Send>;

impl<A: Send + 'static> AgentBuilder<A> {
    /// Starts a builder around the user model.
    pub fn new(model: A) -> Self {
        Self {
            model,
            priority: Priority::default(),
            exception_reaction: ExceptionReaction::default(),
            storage: SubscriptionStorageKind::default(),
            dispatcher: None,
            limits: Vec::new(),
            setups: Vec::new(),
            on_start: None,
            on_finish: None,
        }
    }

    /// Sets the agent's scheduling priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets how the agent reacts to a panicking event handler. The
    /// default inherits the cooperation's reaction.
    #[must_use]
    pub fn exception_reaction(mut self, reaction: ExceptionReaction) -> Self {
        self.exception_reaction = reaction;
        self
    }

    /// Selects the subscription-storage implementation.
    #[must_use]
    pub fn subscription_storage(mut self, kind: SubscriptionStorageKind) -> Self {
        self.storage = kind;
        self
    }

    /// Binds the agent to `dispatcher` instead of the environment's
    /// default dispatcher.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: &DispatcherHandle) -> Self {
        self.dispatcher = Some(dispatcher.clone());
        self
    }

    /// Bounds pending demands of message type `M` to `soft_cap`, applying
    /// `reaction` on overflow. Limits are fixed once the agent registers.
    #[must_use]
    pub fn limit<M: Message>(mut self, soft_cap: usize, reaction: OverflowReaction) -> Self {
        self.limits.push((
            TypeId::of::<M>(),
            std::any::type_name::<M>(),
            soft_cap,
            reaction,
        ));
        self
    }

    /// Registers the hook run as the agent's first demand, before any
    /// user event.
    #[must_use]
    pub fn on_start(mut self, hook: impl Fn(&mut ManagedAgent<A>) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Registers the hook run as the agent's last demand, after which no
    /// user event executes.
    #[must_use]
    pub fn on_finish(
        mut self,
        hook: impl Fn(&mut ManagedAgent<A>) + Send + Sync + 'static,
    ) -> Self {
        self.on_finish = Some(Arc::new(hook));
        self
    }

    /// Adds a setup step run on the registering thread during
    /// registration. This is where the agent defines states and creates
    /// its initial subscriptions; an error here rolls the whole
    /// cooperation back.
    #[must_use]
    pub fn setup(
        mut self,
        setup: impl FnOnce(&mut ManagedAgent<A>) -> Result<(), Error> + Send + 'static,
    ) -> Self {
        self.setups.push(Box::new(setup));
        self
    }
}

/// A fully constructed and bound agent, ready for its cooperation to
/// finalize registration.
pub(crate) struct HatchedAgent {
    pub(crate) runner: Arc<dyn EventReceiver>,
    pub(crate) shared: Arc<AgentShared>,
    pub(crate) queue: Arc<dyn EventQueue>,
}

/// Type-erased agent builder, as held by a [`Coop`](crate::coop::Coop).
pub(crate) trait AgentSeed: Send {
    /// Constructs the agent, binds it to its dispatcher, and runs its
    /// setup steps on the calling (registering) thread. The binding is
    /// gated: nothing executes until the cooperation activates the agent
    /// with its `on_start` demand.
    fn hatch(self: Box<Self>, env: &Environment) -> Result<HatchedAgent, Error>;
}

impl<A: Send + 'static> AgentSeed for AgentBuilder<A> {
    fn hatch(self: Box<Self>, env: &Environment) -> Result<HatchedAgent, Error> {
        let builder = *self;

        let limits: HashMap<TypeId, Arc<MessageLimit>> = builder
            .limits
            .into_iter()
            .map(|(ty, name, cap, reaction)| (ty, MessageLimit::new(cap, reaction, name)))
            .collect();
        let shared = AgentShared::new(env.next_agent_id(), builder.priority, limits);
        let direct_mbox = env.create_direct_mbox(&shared);

        // Bind before setup: subscriptions made during setup may already
        // attract deliveries, which buffer behind the gated lane until
        // activation pushes on_start ahead of them.
        let dispatcher = builder
            .dispatcher
            .unwrap_or_else(|| env.default_dispatcher());
        let queue = dispatcher.bind(&shared);
        *shared.queue.lock() = Some(queue.clone());

        let agent = ManagedAgent::new(
            builder.model,
            shared.clone(),
            env.clone(),
            builder.storage,
            builder.on_start,
            builder.on_finish,
            builder.exception_reaction,
            direct_mbox,
        );
        let runner = AgentRunner::new(agent);

        for setup in builder.setups {
            if let Err(e) = runner.configure(setup) {
                shared.release_queue();
                queue.purge_agent(shared.id);
                return Err(e);
            }
        }
        shared.set_phase(LifecyclePhase::Defined);
        // The lane already exists, so with setup done the agent counts as
        // bound. on_start only runs from the Bound phase.
        shared.set_phase(LifecyclePhase::Bound);

        Ok(HatchedAgent {
            runner,
            shared,
            queue,
        })
    }
}
