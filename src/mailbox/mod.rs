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

//! Mailboxes: named delivery endpoints.
//!
//! A mailbox turns a posted message into execution demands on the event
//! queues of its subscribers. Two kinds exist: the shared
//! multi-producer/multi-consumer [`LocalMailbox`] created through the
//! environment, and the per-agent multi-producer/single-consumer
//! [`DirectMailbox`]. User code only ever holds a [`MailboxRef`].

mod direct;
mod local;

pub(crate) use direct::DirectMailbox;
pub(crate) use local::LocalMailbox;

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::{error, trace};

use crate::agent::limits::{MessageLimit, OverflowReaction};
use crate::agent::shared::AgentShared;
use crate::common::MailboxId;
use crate::error::Error;
use crate::message::{service_channel, MessageType, Payload, ServiceFuture, ServicePromise};
use crate::traits::{Message, Signal};

/// The two mailbox kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxKind {
    /// Shared mailbox: any number of producers and subscribers.
    Mpmc,
    /// An agent's direct mailbox: any number of producers, exactly one
    /// consumer (the owning agent).
    Mpsc,
}

/// Behavior common to both mailbox kinds, behind the [`MailboxRef`]
/// handle.
pub(crate) trait MailboxBackend: Send + Sync {
    fn id(&self) -> MailboxId;
    fn kind(&self) -> MailboxKind;
    fn name(&self) -> Option<&str> {
        None
    }

    /// Adds `agent` to the subscriber set for `msg_type`. Called by the
    /// agent's subscription storage on the first subscription for the
    /// `(mailbox, type)` pair, in any state.
    fn subscribe(&self, msg_type: MessageType, agent: &Arc<AgentShared>) -> Result<(), Error>;

    /// Removes `agent` from the subscriber set for the type.
    fn unsubscribe(&self, ty: std::any::TypeId, agent: crate::common::AgentId);

    /// Fans `payload` out to subscribers, applying delivery filters and
    /// message limits per subscriber. `bypass` names a limit that already
    /// overflowed upstream and must not be re-applied; `depth` counts
    /// overflow redirections.
    fn deliver(
        &self,
        msg_type: MessageType,
        payload: Option<Payload>,
        promise: Option<ServicePromise>,
        bypass: Option<&Arc<MessageLimit>>,
        depth: u32,
    );
}

/// A clonable handle to a mailbox.
///
/// Equality and hashing use the mailbox id, so handles work as map keys
/// and two handles to the same mailbox compare equal.
#[derive(Clone)]
pub struct MailboxRef {
    backend: Arc<dyn MailboxBackend>,
}

impl MailboxRef {
    pub(crate) fn from_backend(backend: Arc<dyn MailboxBackend>) -> Self {
        Self { backend }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn MailboxBackend> {
        &self.backend
    }

    /// The mailbox's process-unique id.
    pub fn id(&self) -> MailboxId {
        self.backend.id()
    }

    /// The mailbox kind.
    pub fn kind(&self) -> MailboxKind {
        self.backend.kind()
    }

    /// The mailbox's name, for named shared mailboxes.
    pub fn name(&self) -> Option<&str> {
        self.backend.name()
    }

    /// Posts a message. Every current subscriber receives the same shared
    /// instance, in subscription-registration order.
    pub fn post<M: Message>(&self, message: M) {
        self.backend.deliver(
            MessageType::of::<M>(),
            Some(Arc::new(message) as Payload),
            None,
            None,
            0,
        );
    }

    /// Posts a signal: delivery by type identity alone, no payload.
    pub fn signal<S: Signal>(&self) {
        self.backend
            .deliver(MessageType::signal_of::<S>(), None, None, None, 0);
    }

    /// Sends a service request and returns the future holding the reply.
    ///
    /// Exactly one subscriber must be eligible for the message type;
    /// otherwise the future fails. The handler's return value becomes the
    /// future's value; a handler panic is captured and re-raised on the
    /// future.
    pub fn request<M: Message, R: Any + Send>(&self, message: M) -> ServiceFuture<R> {
        let (promise, future) = service_channel::<R>();
        self.backend.deliver(
            MessageType::of::<M>(),
            Some(Arc::new(message) as Payload),
            Some(promise),
            None,
            0,
        );
        future
    }
}

impl PartialEq for MailboxRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for MailboxRef {}

impl Hash for MailboxRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl std::fmt::Debug for MailboxRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "MailboxRef({}, `{name}`)", self.id()),
            None => write!(f, "MailboxRef({}, {:?})", self.id(), self.kind()),
        }
    }
}

/// An overflow whose reaction could not be applied while the mailbox lock
/// was held. Redirection re-enters `deliver`, possibly on the same
/// mailbox, so reactions run after the fan-out releases the lock.
pub(crate) struct DeferredOverflow {
    pub(crate) reaction: OverflowReaction,
    pub(crate) limit: Arc<MessageLimit>,
    pub(crate) msg_type: MessageType,
    pub(crate) payload: Option<Payload>,
    pub(crate) promise: Option<ServicePromise>,
    pub(crate) depth: u32,
}

/// Applies one overflow reaction.
pub(crate) fn apply_overflow(overflow: DeferredOverflow) {
    let DeferredOverflow {
        reaction,
        limit,
        msg_type,
        payload,
        promise,
        depth,
    } = overflow;
    match reaction {
        OverflowReaction::Drop => {
            trace!(r#type = msg_type.type_name(), "limit overflow, message dropped");
            drop(promise);
        }
        OverflowReaction::Abort => {
            error!(
                r#type = msg_type.type_name(),
                "message limit overflow with abort reaction"
            );
            std::process::abort();
        }
        OverflowReaction::RedirectTo(target) => {
            trace!(
                r#type = msg_type.type_name(),
                target = target.id(),
                "limit overflow, redirecting"
            );
            target
                .backend()
                .deliver(msg_type, payload, promise, Some(&limit), depth + 1);
        }
        OverflowReaction::Transform(transform) => match transform.0(payload.as_ref()) {
            Some((target, new_type, new_payload)) => {
                trace!(
                    from = msg_type.type_name(),
                    to = new_type.type_name(),
                    target = target.id(),
                    "limit overflow, transformed and redirected"
                );
                target
                    .backend()
                    .deliver(new_type, new_payload, promise, Some(&limit), depth + 1);
            }
            None => {
                trace!(
                    r#type = msg_type.type_name(),
                    "limit overflow, transform produced nothing"
                );
                drop(promise);
            }
        },
    }
}
