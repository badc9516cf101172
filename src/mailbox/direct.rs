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
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::agent::limits::MessageLimit;
use crate::agent::shared::{AgentShared, ChargeOutcome};
use crate::common::{AgentId, MailboxId};
use crate::common::config::CONFIG;
use crate::dispatch::{DemandKind, ExecutionDemand};
use crate::error::Error;
use crate::mailbox::{apply_overflow, DeferredOverflow, MailboxBackend, MailboxKind};
use crate::message::{MessageType, Payload, ServicePromise};

/// An agent's direct mailbox: many producers, one consumer.
///
/// Delivery bypasses subscriber iteration (the owner is the only
/// receiver) and never consults delivery filters. Message limits still
/// apply. The owner reference is weak; the agent owns its direct mailbox,
/// not the other way around, and deliveries after the agent is gone fall
/// to the ground.
pub(crate) struct DirectMailbox {
    id: MailboxId,
    owner_id: AgentId,
    owner: Weak<AgentShared>,
}

impl DirectMailbox {
    pub(crate) fn new(id: MailboxId, owner: &Arc<AgentShared>) -> Arc<Self> {
        Arc::new(Self {
            id,
            owner_id: owner.id,
            owner: Arc::downgrade(owner),
        })
    }
}

impl MailboxBackend for DirectMailbox {
    fn id(&self) -> MailboxId {
        self.id
    }

    fn kind(&self) -> MailboxKind {
        MailboxKind::Mpsc
    }

    fn subscribe(&self, _msg_type: MessageType, agent: &Arc<AgentShared>) -> Result<(), Error> {
        // The owner is the permanent, sole subscriber; nothing is stored.
        if agent.id == self.owner_id {
            Ok(())
        } else {
            Err(Error::NotMailboxOwner { agent: agent.id })
        }
    }

    fn unsubscribe(&self, _ty: TypeId, _agent: AgentId) {}

    fn deliver(
        &self,
        msg_type: MessageType,
        payload: Option<Payload>,
        promise: Option<ServicePromise>,
        bypass: Option<&Arc<MessageLimit>>,
        depth: u32,
    ) {
        if depth > CONFIG.limits.max_redirection_depth {
            tracing::error!(
                mbox = self.id,
                r#type = msg_type.type_name(),
                "redirection depth exceeded, message dropped"
            );
            return;
        }
        let Some(owner) = self.owner.upgrade() else {
            trace!(mbox = self.id, "owner gone, message delivered to the ground");
            return;
        };
        let limit = match owner.charge_limit(msg_type.type_id(), bypass) {
            ChargeOutcome::Unlimited => None,
            ChargeOutcome::Charged(guard) => Some(guard),
            ChargeOutcome::Overflow(reaction, limit) => {
                apply_overflow(DeferredOverflow {
                    reaction,
                    limit,
                    msg_type,
                    payload,
                    promise,
                    depth,
                });
                return;
            }
        };
        let Some(queue) = owner.current_queue() else {
            trace!(
                agent = owner.id,
                r#type = msg_type.type_name(),
                "owner not bound, message delivered to the ground"
            );
            return;
        };
        let Some(runner) = owner.upgrade_runner() else {
            return;
        };
        let kind = if promise.is_some() {
            DemandKind::ServiceRequest
        } else {
            DemandKind::UserEvent
        };
        queue.push(ExecutionDemand {
            target: runner,
            mbox_id: self.id,
            msg_type,
            payload,
            limit,
            promise,
            kind,
        });
    }
}

impl std::fmt::Debug for DirectMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectMailbox")
            .field("id", &self.id)
            .field("owner", &self.owner_id)
            .finish()
    }
}
