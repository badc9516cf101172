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

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, trace};

use crate::agent::filters::DeliveryFilterFn;
use crate::agent::state::{
    State, StateListenerFn, DEFAULT_STATE, SENTINEL_STATE, SENTINEL_STATE_NAME,
};
use crate::agent::subscription::{
    make_storage, HandlerSlot, SubscriptionKey, SubscriptionStorage, SubscriptionStorageKind,
};
use crate::agent::shared::AgentShared;
use crate::agent::ExceptionReaction;
use crate::common::environment::Environment;
use crate::common::fatal::abort_process;
use crate::common::{AgentId, MailboxId, Priority, StateId, ThreadSafety};
use crate::coop::DeregReason;
use crate::error::Error;
use crate::mailbox::{MailboxKind, MailboxRef};
use crate::message::MessageType;
use crate::traits::{Message, Signal};

/// Lifecycle hook invoked with exclusive access to the agent.
pub(crate) type LifecycleHook<A> = Arc<dyn Fn(&mut ManagedAgent<A>) + Send + Sync>;

/// An agent: the user model `A` plus the runtime tables that drive its
/// event processing.
///
/// Handlers, lifecycle hooks, and setup closures all receive
/// `&mut ManagedAgent<A>`; the user's own data lives in [`model`](Self::model)
/// and the methods here are the agent-side API: subscribing, changing
/// state, installing delivery filters, deregistering the cooperation.
///
/// All of these methods must run on the agent's current working thread.
/// Before registration completes that is the registering thread; afterwards
/// it is whichever work thread is executing the agent's current demand.
/// Calls from anywhere else fail with [`Error::ThreadMismatch`].
pub struct ManagedAgent<A> {
    /// The user-defined model this agent wraps.
    pub model: A,
    pub(crate) shared: Arc<AgentShared>,
    env: Environment,
    subscriptions: Box<dyn SubscriptionStorage<A>>,
    /// Mailboxes this agent subscribed to, for teardown.
    mbox_refs: HashMap<MailboxId, MailboxRef>,
    states: Vec<Arc<str>>,
    current_state: StateId,
    state_listeners: Vec<StateListenerFn>,
    pub(crate) on_start: Option<LifecycleHook<A>>,
    pub(crate) on_finish: Option<LifecycleHook<A>>,
    pub(crate) exception_reaction: ExceptionReaction,
    direct_mbox: MailboxRef,
}

impl<A: Send + 'static> ManagedAgent<A> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        model: A,
        shared: Arc<AgentShared>,
        env: Environment,
        storage: SubscriptionStorageKind,
        on_start: Option<LifecycleHook<A>>,
        on_finish: Option<LifecycleHook<A>>,
        exception_reaction: ExceptionReaction,
        direct_mbox: MailboxRef,
    ) -> Self {
        Self {
            model,
            shared,
            env,
            subscriptions: make_storage(storage),
            mbox_refs: HashMap::new(),
            states: vec![Arc::from("default")],
            current_state: DEFAULT_STATE,
            state_listeners: Vec::new(),
            on_start,
            on_finish,
            exception_reaction,
            direct_mbox,
        }
    }

    /// The agent's process-unique id.
    pub fn id(&self) -> AgentId {
        self.shared.id
    }

    /// The environment this agent lives in.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// The agent's scheduling priority.
    pub fn priority(&self) -> Priority {
        self.shared.priority
    }

    /// The agent's direct (single-consumer) mailbox.
    pub fn direct_mbox(&self) -> MailboxRef {
        self.direct_mbox.clone()
    }

    /// Name of the cooperation this agent belongs to, once registered.
    pub fn coop_name(&self) -> Option<&str> {
        self.shared.coop.get().map(|coop| coop.name())
    }

    /// The implicitly created default state.
    pub fn default_state(&self) -> State {
        State::new(self.id(), DEFAULT_STATE, self.states[DEFAULT_STATE].clone())
    }

    /// The state the agent is currently in.
    pub fn current_state(&self) -> State {
        let name = if self.current_state == SENTINEL_STATE {
            Arc::from(SENTINEL_STATE_NAME)
        } else {
            self.states[self.current_state].clone()
        };
        State::new(self.id(), self.current_state, name)
    }

    /// Creates a new named state owned by this agent.
    ///
    /// # Errors
    ///
    /// [`Error::ThreadMismatch`] off the working thread.
    pub fn define_state(&mut self, name: impl Into<String>) -> Result<State, Error> {
        self.ensure_working_thread()?;
        let name: Arc<str> = Arc::from(name.into());
        let index = self.states.len();
        self.states.push(name.clone());
        Ok(State::new(self.id(), index, name))
    }

    /// Registers a listener fired synchronously after every state change,
    /// in registration order. A panicking listener aborts the process.
    ///
    /// # Errors
    ///
    /// [`Error::ThreadMismatch`] off the working thread.
    pub fn add_state_listener(
        &mut self,
        listener: impl Fn(&State) + Send + Sync + 'static,
    ) -> Result<(), Error> {
        self.ensure_working_thread()?;
        self.state_listeners.push(Arc::new(listener));
        Ok(())
    }

    /// Switches the agent to `state`.
    ///
    /// Switching to the current state is a no-op. The handler chosen for a
    /// demand is resolved at dequeue time, so a state change mid-handler
    /// affects the next demand, not the running one.
    ///
    /// # Errors
    ///
    /// [`Error::StateOwnerMismatch`] if `state` belongs to another agent,
    /// [`Error::ThreadMismatch`] off the working thread.
    pub fn change_state(&mut self, state: &State) -> Result<(), Error> {
        self.ensure_working_thread()?;
        self.ensure_owned_state(state)?;
        if state.index == self.current_state {
            return Ok(());
        }
        trace!(
            agent = self.id(),
            from = %self.current_state(),
            to = %state,
            "state change"
        );
        self.current_state = state.index;
        let snapshot = state.clone();
        for listener in self.state_listeners.clone() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&snapshot))) {
                abort_process("state listener", &*panic);
            }
        }
        Ok(())
    }

    /// Starts a subscription to `mbox`. Chain with
    /// [`in_state`](SubscriptionBind::in_state) and finish with
    /// [`event`](SubscriptionBind::event) or
    /// [`signal`](SubscriptionBind::signal).
    pub fn subscribe(&mut self, mbox: &MailboxRef) -> SubscriptionBind<'_, A> {
        SubscriptionBind {
            mbox: mbox.clone(),
            state: DEFAULT_STATE,
            agent: self,
        }
    }

    /// Removes the subscription for `M` on `mbox` in `state`. Removing a
    /// subscription that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::StateOwnerMismatch`] for a foreign state,
    /// [`Error::ThreadMismatch`] off the working thread.
    pub fn drop_subscription<M: Message>(
        &mut self,
        mbox: &MailboxRef,
        state: &State,
    ) -> Result<(), Error> {
        self.ensure_working_thread()?;
        self.ensure_owned_state(state)?;
        let key = SubscriptionKey {
            mbox: mbox.id(),
            ty: TypeId::of::<M>(),
            state: state.index,
        };
        let outcome = self.subscriptions.remove(&key);
        if outcome.removed {
            trace!(
                agent = self.id(),
                mbox = key.mbox,
                r#type = std::any::type_name::<M>(),
                "subscription dropped"
            );
        }
        if outcome.pair_empty {
            mbox.backend().unsubscribe(key.ty, self.id());
        }
        Ok(())
    }

    /// Removes the subscriptions for `M` on `mbox` in every state.
    ///
    /// # Errors
    ///
    /// [`Error::ThreadMismatch`] off the working thread.
    pub fn drop_subscription_for_all_states<M: Message>(
        &mut self,
        mbox: &MailboxRef,
    ) -> Result<(), Error> {
        self.ensure_working_thread()?;
        if self
            .subscriptions
            .remove_all_states(mbox.id(), TypeId::of::<M>())
        {
            mbox.backend().unsubscribe(TypeId::of::<M>(), self.id());
        }
        Ok(())
    }

    /// Installs a delivery filter for `M` on the shared mailbox `mbox`.
    /// Messages failing the predicate are skipped for this agent before
    /// any limit is charged.
    ///
    /// # Errors
    ///
    /// [`Error::FilterOnDirectMailbox`] for a direct mailbox,
    /// [`Error::ThreadMismatch`] off the working thread.
    pub fn set_delivery_filter<M, F>(&mut self, mbox: &MailboxRef, filter: F) -> Result<(), Error>
    where
        M: Message,
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.ensure_working_thread()?;
        if mbox.kind() == MailboxKind::Mpsc {
            return Err(Error::FilterOnDirectMailbox);
        }
        let erased: DeliveryFilterFn = Arc::new(move |message| {
            message
                .as_any()
                .downcast_ref::<M>()
                .is_some_and(&filter)
        });
        self.shared
            .filters
            .write()
            .set(mbox.id(), TypeId::of::<M>(), erased);
        Ok(())
    }

    /// Removes the delivery filter for `M` on `mbox`, if any.
    ///
    /// # Errors
    ///
    /// [`Error::ThreadMismatch`] off the working thread.
    pub fn drop_delivery_filter<M: Message>(&mut self, mbox: &MailboxRef) -> Result<(), Error> {
        self.ensure_working_thread()?;
        self.shared
            .filters
            .write()
            .remove(mbox.id(), TypeId::of::<M>());
        Ok(())
    }

    /// Deregisters the cooperation this agent belongs to, with `reason`.
    /// A no-op before the cooperation is registered.
    pub fn deregister_own_coop(&mut self, reason: DeregReason) {
        match self.shared.coop.get() {
            Some(coop) => coop.deregister(reason),
            None => trace!(agent = self.id(), "no cooperation to deregister yet"),
        }
    }

    // ---- crate-internal plumbing ----------------------------------------

    pub(crate) fn find_handler(&self, mbox: MailboxId, ty: TypeId) -> Option<HandlerSlot<A>> {
        self.subscriptions.find(mbox, ty, self.current_state)
    }

    pub(crate) fn current_state_name(&self) -> String {
        self.current_state().name().to_string()
    }

    /// Switches to the terminal sentinel state after a fatal handler
    /// panic. Nothing can subscribe to it, so dispatch misses until the
    /// agent finishes.
    pub(crate) fn switch_to_sentinel(&mut self) {
        self.current_state = SENTINEL_STATE;
    }

    /// Drops every subscription and filter. Part of `on_finish`
    /// processing.
    pub(crate) fn teardown_subscriptions(&mut self) {
        for (mbox_id, ty) in self.subscriptions.drain_pairs() {
            if let Some(mbox) = self.mbox_refs.get(&mbox_id) {
                mbox.backend().unsubscribe(ty, self.shared.id);
            }
        }
        self.mbox_refs.clear();
        *self.shared.filters.write() = Default::default();
    }

    fn ensure_working_thread(&self) -> Result<(), Error> {
        if self.shared.on_working_thread() {
            Ok(())
        } else {
            Err(Error::ThreadMismatch { agent: self.id() })
        }
    }

    fn ensure_owned_state(&self, state: &State) -> Result<(), Error> {
        if state.agent == self.id() {
            Ok(())
        } else {
            Err(Error::StateOwnerMismatch {
                agent: self.id(),
                state: state.name().to_string(),
            })
        }
    }

    fn state_display_name(&self, state: StateId) -> String {
        if state == SENTINEL_STATE {
            SENTINEL_STATE_NAME.to_string()
        } else {
            self.states
                .get(state)
                .map_or_else(|| format!("state#{state}"), |name| name.to_string())
        }
    }

    fn insert_subscription(
        &mut self,
        mbox: MailboxRef,
        msg_type: MessageType,
        state: StateId,
        handler: crate::agent::subscription::EventHandlerFn<A>,
        thread_safety: ThreadSafety,
    ) -> Result<(), Error> {
        self.ensure_working_thread()?;
        let key = SubscriptionKey {
            mbox: mbox.id(),
            ty: msg_type.type_id(),
            state,
        };
        let inserted = self.subscriptions.insert(
            key,
            HandlerSlot {
                handler,
                thread_safety,
            },
        );
        let Ok(first) = inserted else {
            return Err(Error::SubscriptionAlreadyExists {
                mbox: key.mbox,
                type_name: msg_type.type_name(),
                state: self.state_display_name(state),
            });
        };
        if first {
            if let Err(e) = mbox.backend().subscribe(msg_type, &self.shared) {
                self.subscriptions.remove(&key);
                return Err(e);
            }
        }
        self.mbox_refs.entry(mbox.id()).or_insert(mbox);
        trace!(
            agent = self.id(),
            mbox = key.mbox,
            r#type = msg_type.type_name(),
            state = %self.state_display_name(state),
            "subscription created"
        );
        Ok(())
    }
}

/// In-progress subscription, created by [`ManagedAgent::subscribe`].
///
/// Without an explicit [`in_state`](Self::in_state) the subscription is
/// bound to the agent's default state.
pub struct SubscriptionBind<'a, A> {
    agent: &'a mut ManagedAgent<A>,
    mbox: MailboxRef,
    state: StateId,
}

impl<A: Send + 'static> SubscriptionBind<'_, A> {
    /// Binds the subscription to `state` instead of the default state.
    ///
    /// # Errors
    ///
    /// [`Error::StateOwnerMismatch`] if `state` belongs to another agent.
    pub fn in_state(mut self, state: &State) -> Result<Self, Error> {
        self.agent.ensure_owned_state(state)?;
        self.state = state.index;
        Ok(self)
    }

    /// Completes the subscription with a message handler.
    ///
    /// The handler's return value is ignored for plain messages and
    /// becomes the reply for service requests.
    ///
    /// # Errors
    ///
    /// [`Error::SubscriptionAlreadyExists`] for a duplicate
    /// `(mailbox, type, state)` triple, [`Error::ThreadMismatch`] off the
    /// working thread.
    pub fn event<M, R, F>(self, handler: F) -> Result<(), Error>
    where
        M: Message,
        R: Any + Send,
        F: Fn(&mut ManagedAgent<A>, &M) -> R + Send + Sync + 'static,
    {
        self.event_with_safety(handler, ThreadSafety::default())
    }

    /// Like [`event`](Self::event), declaring the handler's thread
    /// safety.
    ///
    /// # Errors
    ///
    /// As [`event`](Self::event).
    pub fn event_with_safety<M, R, F>(
        self,
        handler: F,
        thread_safety: ThreadSafety,
    ) -> Result<(), Error>
    where
        M: Message,
        R: Any + Send,
        F: Fn(&mut ManagedAgent<A>, &M) -> R + Send + Sync + 'static,
    {
        let erased: crate::agent::subscription::EventHandlerFn<A> =
            Arc::new(move |agent, payload| {
                match payload.and_then(|p| p.as_any().downcast_ref::<M>()) {
                    Some(message) => Box::new(handler(agent, message)) as Box<dyn Any + Send>,
                    None => {
                        error!(
                            r#type = std::any::type_name::<M>(),
                            "handler invoked with incompatible payload"
                        );
                        Box::new(())
                    }
                }
            });
        self.agent.insert_subscription(
            self.mbox,
            MessageType::of::<M>(),
            self.state,
            erased,
            thread_safety,
        )
    }

    /// Completes the subscription with a signal handler, which receives
    /// no payload.
    ///
    /// # Errors
    ///
    /// As [`event`](Self::event).
    pub fn signal<S, R, F>(self, handler: F) -> Result<(), Error>
    where
        S: Signal,
        R: Any + Send,
        F: Fn(&mut ManagedAgent<A>) -> R + Send + Sync + 'static,
    {
        let erased: crate::agent::subscription::EventHandlerFn<A> =
            Arc::new(move |agent, _payload| Box::new(handler(agent)) as Box<dyn Any + Send>);
        self.agent.insert_subscription(
            self.mbox,
            MessageType::signal_of::<S>(),
            self.state,
            erased,
            ThreadSafety::default(),
        )
    }
}
