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

//! Error types surfaced by the runtime.
//!
//! The [`Error`] enum covers failures of the synchronous API surface
//! (subscription management, state changes, mailbox and cooperation
//! registration). Failures that travel back through a service-request
//! future use [`ServiceError`] instead, because they are produced on the
//! receiving side and observed on the calling side.

use thiserror::Error;

use crate::common::{AgentId, MailboxId};

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the agent, mailbox, and cooperation APIs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A handler is already registered for the same
    /// `(mailbox, message type, state)` triple on this agent.
    #[error("subscription for `{type_name}` in state `{state}` already exists on mailbox {mbox}")]
    SubscriptionAlreadyExists {
        /// Mailbox the duplicate subscription targeted.
        mbox: MailboxId,
        /// Message type of the duplicate subscription.
        type_name: &'static str,
        /// Display name of the state the subscription was bound to.
        state: String,
    },

    /// A [`State`](crate::prelude::State) handle belonging to a different
    /// agent was passed to a state-aware operation.
    #[error("state `{state}` does not belong to agent {agent}")]
    StateOwnerMismatch {
        /// Agent the operation was invoked on.
        agent: AgentId,
        /// Display name of the foreign state.
        state: String,
    },

    /// A subscription or state mutation was attempted from a thread other
    /// than the agent's current working thread.
    #[error("agent {agent} was mutated off its working thread")]
    ThreadMismatch {
        /// Agent whose tables were touched.
        agent: AgentId,
    },

    /// A named mailbox with this name already exists in the environment.
    #[error("a mailbox named `{0}` already exists")]
    MailboxNameCollision(String),

    /// An agent other than the owner tried to subscribe to a direct
    /// (single-consumer) mailbox.
    #[error("agent {agent} is not the owner of this direct mailbox")]
    NotMailboxOwner {
        /// The foreign agent.
        agent: AgentId,
    },

    /// A delivery filter was requested on a direct mailbox. Filters only
    /// apply to shared (multi-consumer) mailboxes.
    #[error("delivery filters cannot be installed on a direct mailbox")]
    FilterOnDirectMailbox,

    /// A cooperation with this name is already registered.
    #[error("a cooperation named `{0}` is already registered")]
    CoopNameCollision(String),

    /// The parent named during cooperation registration is unknown or is
    /// already deregistering.
    #[error("parent cooperation `{0}` is not registered or is deregistering")]
    ParentCoopMissing(String),

    /// The named cooperation is not currently registered.
    #[error("cooperation `{0}` is not registered")]
    CoopNotFound(String),

    /// A cooperation without agents was submitted for registration.
    #[error("cooperation `{0}` has no agents")]
    EmptyCoop(String),

    /// The environment is shutting down and no longer accepts new
    /// cooperations.
    #[error("the environment is shutting down")]
    ShuttingDown,

    /// A user-supplied agent setup step failed, aborting registration of
    /// the whole cooperation.
    #[error("{0}")]
    Setup(String),
}

impl Error {
    /// Builds an [`Error::Setup`] from anything printable. Intended for
    /// user code inside agent setup closures that needs to abort
    /// registration of the enclosing cooperation.
    pub fn setup(reason: impl std::fmt::Display) -> Self {
        Self::Setup(reason.to_string())
    }
}

/// Errors observed by the caller of a service request.
///
/// Whatever prevents a service handler from producing a value is captured
/// on the receiving side and re-raised here when the future is awaited.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// No subscribed handler could serve the request.
    #[error("no event handler accepted the service request")]
    NoHandler,

    /// More than one subscriber was eligible; a service request needs
    /// exactly one.
    #[error("more than one subscriber is eligible for the service request")]
    MultipleHandlers,

    /// The handler panicked while computing the reply. The payload of the
    /// panic is carried as text.
    #[error("service handler panicked: {0}")]
    HandlerPanicked(String),

    /// The demand was discarded before the handler ran, typically because
    /// the receiving agent's cooperation was deregistered.
    #[error("service handler was skipped")]
    HandlerSkipped,

    /// The handler completed, but its reply was not of the requested type.
    #[error("service reply was not of the requested type")]
    ReplyTypeMismatch,

    /// The caller's wait deadline elapsed before a reply arrived.
    #[error("timed out waiting for the service reply")]
    Timeout,
}
