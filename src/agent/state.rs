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

use std::sync::Arc;

use crate::common::{AgentId, StateId};

/// Index of the implicitly created default state.
pub(crate) const DEFAULT_STATE: StateId = 0;

/// Pseudo-index of the terminal state an agent is switched to after a
/// fatal handler panic. No subscription can target it, so handler lookup
/// always misses until the agent finishes.
pub(crate) const SENTINEL_STATE: StateId = usize::MAX;

/// Display name of the sentinel state.
pub(crate) const SENTINEL_STATE_NAME: &str = "awaiting_deregistration";

/// A named machine state of an agent.
///
/// States gate handler lookup: a subscription bound to a state only fires
/// while the agent is in that state. Every agent implicitly owns a default
/// state; further states are created with
/// [`ManagedAgent::define_state`](crate::agent::ManagedAgent::define_state).
/// The handle is cheap to clone and can be stored in the agent's model,
/// but it is only meaningful on the agent that created it; passing it to
/// another agent's operations fails with a state-owner mismatch.
#[derive(Clone, Debug)]
pub struct State {
    pub(crate) agent: AgentId,
    pub(crate) index: StateId,
    pub(crate) name: Arc<str>,
}

impl State {
    pub(crate) fn new(agent: AgentId, index: StateId, name: impl Into<Arc<str>>) -> Self {
        Self {
            agent,
            index,
            name: name.into(),
        }
    }

    /// The display name the state was created with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.agent == other.agent && self.index == other.index
    }
}

impl Eq for State {}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Observer invoked synchronously after each state change of an agent.
pub(crate) type StateListenerFn = Arc<dyn Fn(&State) + Send + Sync>;
