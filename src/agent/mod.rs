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

//! Agents: state machines processing messages one at a time.
//!
//! The user-facing pieces are [`AgentBuilder`] (pre-registration
//! configuration), [`ManagedAgent`] (what handlers and hooks receive),
//! [`State`], and the limit/overflow types. The runner and shared record
//! are internal plumbing between the agent and its dispatcher.

pub(crate) mod builder;
pub(crate) mod filters;
pub(crate) mod limits;
pub(crate) mod managed_agent;
pub(crate) mod runner;
pub(crate) mod shared;
pub(crate) mod state;
pub(crate) mod subscription;

pub use builder::AgentBuilder;
pub use limits::{OverflowReaction, TransformFn};
pub use managed_agent::{ManagedAgent, SubscriptionBind};
pub use state::State;
pub use subscription::SubscriptionStorageKind;

/// How the runtime reacts to a panic escaping one of an agent's event
/// handlers.
///
/// Agents default to [`Inherit`](Self::Inherit), which defers to the
/// cooperation's reaction and ultimately to the environment default
/// ([`Abort`](Self::Abort)).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExceptionReaction {
    /// Log and abort the process.
    Abort,
    /// Switch the agent to its terminal sentinel state and stop the
    /// environment.
    ShutdownEnvironment,
    /// Switch the agent to its terminal sentinel state and deregister its
    /// cooperation with reason "unhandled exception".
    DeregisterCoop,
    /// Swallow the panic; the agent keeps running.
    Ignore,
    /// Defer to the cooperation (and ultimately environment) reaction.
    #[default]
    Inherit,
}
