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

//! The cooperation registry.
//!
//! One table, one lock. The lock guards registration and deregistration
//! transitions only; steady-state message delivery never touches it.
//! User code (agent setup steps) runs in the middle of registration, so
//! the transaction is split: reserve the name under the lock, construct
//! outside it, finalize under the lock again with a full rollback path.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{instrument, trace};

use crate::agent::builder::HatchedAgent;
use crate::common::environment::Environment;
use crate::coop::{Coop, CoopAgent, CoopHandle, DeregReason};
use crate::error::Error;

enum RegistryEntry {
    /// Name reserved by an in-flight registration.
    Reserved,
    Live(CoopHandle),
}

/// The environment's cooperation table.
pub(crate) struct CoopRegistry {
    table: Mutex<HashMap<String, RegistryEntry>>,
}

impl CoopRegistry {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `coop` atomically. On any failure every constructed
    /// agent is unbound and discarded, no `on_start` fires, and the
    /// registry is left unchanged.
    #[instrument(skip(self, env, coop), fields(coop = coop.name.as_deref().unwrap_or("<anonymous>")))]
    pub(crate) fn register(&self, env: &Environment, coop: Coop) -> Result<String, Error> {
        let Coop {
            name,
            parent,
            exception_reaction,
            agents,
            reg_notificators,
            dereg_notificators,
        } = coop;
        let name = name.unwrap_or_else(|| env.generate_coop_name());
        if agents.is_empty() {
            return Err(Error::EmptyCoop(name));
        }

        // Stage 1: validate and reserve the name.
        {
            let mut table = self.table.lock();
            if env.is_stopping() {
                return Err(Error::ShuttingDown);
            }
            if table.contains_key(&name) {
                return Err(Error::CoopNameCollision(name));
            }
            if let Some(parent) = &parent {
                match table.get(parent) {
                    Some(RegistryEntry::Live(handle)) if !handle.is_deregistering() => {}
                    _ => return Err(Error::ParentCoopMissing(parent.clone())),
                }
            }
            table.insert(name.clone(), RegistryEntry::Reserved);
        }

        // Stage 2: construct, set up, and bind the agents outside the
        // lock; setup steps are user code.
        let mut hatched: Vec<HatchedAgent> = Vec::with_capacity(agents.len());
        for seed in agents {
            match seed.hatch(env) {
                Ok(agent) => hatched.push(agent),
                Err(e) => {
                    rollback(&mut hatched);
                    self.table.lock().remove(&name);
                    return Err(e);
                }
            }
        }

        // Stage 3: finalize under the lock, re-validating what may have
        // changed while user code ran.
        let handle = CoopHandle::new(
            name.clone(),
            parent.clone(),
            env.clone(),
            exception_reaction,
            hatched.drain(..).map(CoopAgent::from).collect(),
            reg_notificators,
            dereg_notificators,
        );
        {
            let mut table = self.table.lock();
            let parent_alive = match &parent {
                None => true,
                Some(parent) => matches!(
                    table.get(parent),
                    Some(RegistryEntry::Live(handle)) if !handle.is_deregistering()
                ),
            };
            if env.is_stopping() || !parent_alive {
                drop(table);
                handle.rollback_agents();
                self.table.lock().remove(&name);
                return match parent {
                    Some(parent) if !env.is_stopping() => Err(Error::ParentCoopMissing(parent)),
                    _ => Err(Error::ShuttingDown),
                };
            }
            handle.attach_agents();
            table.insert(name.clone(), RegistryEntry::Live(handle.clone()));
            if let Some(parent) = &parent {
                if let Some(RegistryEntry::Live(parent_handle)) = table.get(parent) {
                    parent_handle.register_child(&name);
                }
            }
        }

        // Stage 4: make it live. on_start demands first, then the
        // registration notificators.
        handle.activate_agents();
        handle.fire_reg_notificators();
        trace!(coop = %name, "registered");
        Ok(name)
    }

    /// Starts deregistration of `name` and its whole subtree with the
    /// same reason. Completion is asynchronous: each coop leaves the
    /// registry once its agents have finished and its children are gone.
    pub(crate) fn deregister(&self, name: &str, reason: DeregReason) -> Result<(), Error> {
        // Mark the subtree under the table lock so no new child can
        // attach to any of its members mid-cascade.
        let mut marked: Vec<CoopHandle> = Vec::new();
        {
            let table = self.table.lock();
            let Some(RegistryEntry::Live(root)) = table.get(name) else {
                return Err(Error::CoopNotFound(name.to_string()));
            };
            let mut stack = vec![root.clone()];
            while let Some(handle) = stack.pop() {
                if handle.begin_deregister(reason) {
                    for child in handle.children_snapshot() {
                        if let Some(RegistryEntry::Live(child_handle)) = table.get(&child) {
                            stack.push(child_handle.clone());
                        }
                    }
                    marked.push(handle);
                }
            }
        }
        for handle in &marked {
            handle.push_finish_demands();
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<CoopHandle> {
        match self.table.lock().get(name) {
            Some(RegistryEntry::Live(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub(crate) fn remove(&self, name: &str) {
        self.table.lock().remove(name);
    }

    /// Names of registered cooperations without a parent.
    pub(crate) fn root_names(&self) -> Vec<String> {
        self.table
            .lock()
            .iter()
            .filter_map(|(name, entry)| match entry {
                RegistryEntry::Live(handle) if handle.parent_name().is_none() => {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

fn rollback(hatched: &mut Vec<HatchedAgent>) {
    for agent in hatched.drain(..) {
        agent.shared.release_queue();
        agent.queue.purge_agent(agent.shared.id);
    }
}
