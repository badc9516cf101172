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

use crate::common::AgentId;
use crate::dispatch::ExecutionDemand;

/// Dispatcher-side intake of execution demands.
///
/// An agent is bound to exactly one event queue at a time. Mailboxes push
/// demands through this interface without knowing which dispatcher serves
/// the agent. Pushes for one agent are executed in push order; nothing is
/// promised across agents.
pub(crate) trait EventQueue: Send + Sync {
    /// Enqueues a demand for its target agent. Demands for unknown or
    /// already-finished agents are delivered to the ground.
    fn push(&self, demand: ExecutionDemand);

    /// Makes a freshly bound agent eligible for execution, with `start` as
    /// the first demand it will ever run. Demands buffered between binding
    /// and activation stay queued behind `start`.
    fn activate(&self, start: ExecutionDemand);

    /// Discards every pending demand of `agent` without running handlers
    /// and removes the agent from the queue.
    fn purge_agent(&self, agent: AgentId);
}
