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

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{error, instrument, trace};

use crate::agent::shared::AgentShared;
use crate::agent::ExceptionReaction;
use crate::common::config::{CoveyConfig, CONFIG};
use crate::common::{AgentId, MailboxId};
use crate::coop::registry::CoopRegistry;
use crate::coop::{Coop, DeregReason};
use crate::dispatch::{DispatcherHandle, OneThreadDispatcher};
use crate::error::Error;
use crate::mailbox::{DirectMailbox, LocalMailbox, MailboxRef};

/// The top-level runtime object.
///
/// Owns the cooperation registry, the named-mailbox table, the default
/// dispatcher, and the shutdown coordinator. Cheap to clone; every clone
/// refers to the same environment.
///
/// The usual entry point is [`Environment::launch`], which builds the
/// environment, runs the caller's initialization, and blocks until the
/// environment stops and every cooperation has deregistered.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

struct EnvInner {
    config: CoveyConfig,
    registry: CoopRegistry,
    named_mboxes: DashMap<String, MailboxRef>,
    dispatchers: DashMap<String, DispatcherHandle>,
    default_dispatcher: OnceLock<DispatcherHandle>,
    mbox_ids: AtomicU64,
    agent_ids: AtomicU64,
    coop_names: AtomicU64,
    stopping: AtomicBool,
    autoshutdown_armed: AtomicBool,
    completion_lock: Mutex<()>,
    completion: Condvar,
    default_exception_reaction: ExceptionReaction,
}

impl Environment {
    /// Builds and runs an environment with the process-wide
    /// configuration: construct, run `init`, then block until [`stop`]
    /// has been called (or autoshutdown fired) and every cooperation has
    /// deregistered.
    ///
    /// [`stop`]: Environment::stop
    ///
    /// # Errors
    ///
    /// Whatever `init` returns; a failing `init` still shuts the
    /// environment down cleanly first.
    pub fn launch<F>(init: F) -> Result<(), Error>
    where
        F: FnOnce(Environment) -> Result<(), Error>,
    {
        Self::launch_with_config(CONFIG.clone(), init)
    }

    /// [`launch`](Self::launch) with an explicit configuration.
    ///
    /// # Errors
    ///
    /// As [`launch`](Self::launch).
    pub fn launch_with_config<F>(config: CoveyConfig, init: F) -> Result<(), Error>
    where
        F: FnOnce(Environment) -> Result<(), Error>,
    {
        let env = Environment::new(config);
        let result = init(env.clone());
        if result.is_err() {
            env.stop();
        }
        env.arm_autoshutdown();
        env.wait_for_completion();
        env.shutdown_dispatchers();
        trace!("environment finished");
        result
    }

    fn new(config: CoveyConfig) -> Self {
        let env = Self {
            inner: Arc::new(EnvInner {
                registry: CoopRegistry::new(),
                named_mboxes: DashMap::new(),
                dispatchers: DashMap::new(),
                default_dispatcher: OnceLock::new(),
                // Mailbox id 0 is reserved for lifecycle demands.
                mbox_ids: AtomicU64::new(1),
                agent_ids: AtomicU64::new(1),
                coop_names: AtomicU64::new(0),
                stopping: AtomicBool::new(false),
                autoshutdown_armed: AtomicBool::new(false),
                completion_lock: Mutex::new(()),
                completion: Condvar::new(),
                default_exception_reaction: ExceptionReaction::Abort,
                config,
            }),
        };
        let default = OneThreadDispatcher::start(
            &env,
            env.inner.config.defaults.default_dispatcher_name.clone(),
        );
        let _ = env.inner.default_dispatcher.set(default);
        env
    }

    /// The environment's configuration.
    pub fn config(&self) -> &CoveyConfig {
        &self.inner.config
    }

    /// Creates an anonymous shared (MPMC) mailbox.
    pub fn create_mbox(&self) -> MailboxRef {
        MailboxRef::from_backend(LocalMailbox::new(self.next_mbox_id(), None))
    }

    /// Creates a named shared mailbox. Names are unique within the
    /// environment.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxNameCollision`] if the name is taken.
    pub fn create_named_mbox(&self, name: impl Into<String>) -> Result<MailboxRef, Error> {
        let name = name.into();
        match self.inner.named_mboxes.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::MailboxNameCollision(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mbox = MailboxRef::from_backend(LocalMailbox::new(
                    self.next_mbox_id(),
                    Some(name),
                ));
                slot.insert(mbox.clone());
                Ok(mbox)
            }
        }
    }

    /// Builds a cooperation with `build` and registers it. Returns the
    /// registered name (generated for anonymous cooperations).
    ///
    /// # Errors
    ///
    /// As [`register_coop`](Self::register_coop), plus whatever `build`
    /// returns.
    pub fn introduce_coop<F>(&self, build: F) -> Result<String, Error>
    where
        F: FnOnce(&mut Coop) -> Result<(), Error>,
    {
        let mut coop = Coop::new();
        build(&mut coop)?;
        self.register_coop(coop)
    }

    /// Registers a cooperation atomically: either every agent is
    /// constructed, set up, bound, and receives `on_start`, or the
    /// registry is left unchanged and no agent of the cooperation runs
    /// anything.
    ///
    /// # Errors
    ///
    /// [`Error::CoopNameCollision`], [`Error::ParentCoopMissing`],
    /// [`Error::EmptyCoop`], [`Error::ShuttingDown`], or the error of a
    /// failing agent setup step.
    #[instrument(skip(self, coop))]
    pub fn register_coop(&self, coop: Coop) -> Result<String, Error> {
        self.inner.registry.register(self, coop)
    }

    /// Starts deregistration of the named cooperation and all of its
    /// descendants with the same reason. Completion is asynchronous.
    ///
    /// # Errors
    ///
    /// [`Error::CoopNotFound`] if no such cooperation is registered.
    pub fn deregister_coop(&self, name: &str, reason: DeregReason) -> Result<(), Error> {
        self.inner.registry.deregister(name, reason)
    }

    /// Requests shutdown: every root cooperation is deregistered with
    /// reason [`DeregReason::Shutdown`], and [`launch`](Self::launch)
    /// returns once the registry drains. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("environment stop requested");
        for root in self.inner.registry.root_names() {
            let _ = self.inner.registry.deregister(&root, DeregReason::Shutdown);
        }
        let _guard = self.inner.completion_lock.lock();
        self.inner.completion.notify_all();
    }

    /// The dispatcher agents are bound to when their builder names none.
    pub fn default_dispatcher(&self) -> DispatcherHandle {
        self.inner
            .default_dispatcher
            .get()
            .expect("default dispatcher exists after construction")
            .clone()
    }

    // ---- crate-internal plumbing ----------------------------------------

    pub(crate) fn add_dispatcher(&self, dispatcher: DispatcherHandle) {
        self.inner
            .dispatchers
            .insert(dispatcher.name().to_string(), dispatcher);
    }

    pub(crate) fn create_direct_mbox(&self, owner: &Arc<AgentShared>) -> MailboxRef {
        MailboxRef::from_backend(DirectMailbox::new(self.next_mbox_id(), owner))
    }

    pub(crate) fn next_agent_id(&self) -> AgentId {
        self.inner.agent_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn generate_coop_name(&self) -> String {
        let n = self.inner.coop_names.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.inner.config.defaults.anonymous_coop_prefix)
    }

    pub(crate) fn registry(&self) -> &CoopRegistry {
        &self.inner.registry
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn default_exception_reaction(&self) -> ExceptionReaction {
        self.inner.default_exception_reaction
    }

    /// Called whenever a cooperation leaves the registry: triggers
    /// autoshutdown when armed, and wakes `launch` when the last
    /// cooperation of a stopping environment is gone.
    pub(crate) fn on_coop_removed(&self) {
        if !self.inner.registry.is_empty() {
            return;
        }
        if !self.is_stopping()
            && self.inner.autoshutdown_armed.load(Ordering::Acquire)
            && self.inner.config.behavior.autoshutdown
        {
            trace!("last cooperation deregistered, autoshutdown");
            self.inner.stopping.store(true, Ordering::Release);
        }
        if self.is_stopping() {
            let _guard = self.inner.completion_lock.lock();
            self.inner.completion.notify_all();
        }
    }

    fn next_mbox_id(&self) -> MailboxId {
        self.inner.mbox_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Autoshutdown only arms once initialization finished, so an `init`
    /// that registers and quickly loses a cooperation cannot stop the
    /// environment out from under the rest of its own setup.
    fn arm_autoshutdown(&self) {
        self.inner.autoshutdown_armed.store(true, Ordering::Release);
        self.on_coop_removed_if_empty();
    }

    fn on_coop_removed_if_empty(&self) {
        if self.inner.registry.is_empty() {
            self.on_coop_removed();
        }
    }

    fn wait_for_completion(&self) {
        let mut guard = self.inner.completion_lock.lock();
        while !(self.is_stopping() && self.inner.registry.is_empty()) {
            self.inner.completion.wait(&mut guard);
        }
    }

    fn shutdown_dispatchers(&self) {
        for entry in self.inner.dispatchers.iter() {
            entry.value().shutdown();
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

/// Runs an environment to completion and maps the outcome to a process
/// exit code: `0` for a clean shutdown, `1` when initialization failed.
pub fn launch<F>(init: F) -> i32
where
    F: FnOnce(Environment) -> Result<(), Error>,
{
    match Environment::launch(init) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "environment finished with an error");
            1
        }
    }
}
