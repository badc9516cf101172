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
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::agent::limits::MessageLimit;
use crate::agent::shared::{AgentShared, ChargeOutcome};
use crate::common::{AgentId, MailboxId};
use crate::common::config::CONFIG;
use crate::dispatch::{DemandKind, ExecutionDemand};
use crate::error::{Error, ServiceError};
use crate::mailbox::{apply_overflow, DeferredOverflow, MailboxBackend, MailboxKind};
use crate::message::{MessageType, Payload, ServicePromise};

/// The shared multi-producer/multi-consumer mailbox.
///
/// Subscribers are kept per message type, in subscription-registration
/// order. One `deliver` call fans out to every current subscriber for the
/// type under the subscriber-table lock, which makes the pushes of one
/// delivery an atomic batch relative to concurrent deliveries on the same
/// mailbox. Subscriber entries hold weak agent references; entries whose
/// agent is gone are pruned during delivery.
pub(crate) struct LocalMailbox {
    id: MailboxId,
    name: Option<String>,
    subscribers: Mutex<HashMap<TypeId, Vec<SubscriberEntry>>>,
}

struct SubscriberEntry {
    agent_id: AgentId,
    agent: Weak<AgentShared>,
}

impl LocalMailbox {
    pub(crate) fn new(id: MailboxId, name: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    /// Queues a demand for one subscriber, or defers its overflow
    /// reaction. Filters were already consulted by the caller.
    fn push_to(
        &self,
        agent: &Arc<AgentShared>,
        msg_type: MessageType,
        payload: Option<Payload>,
        promise: Option<ServicePromise>,
        bypass: Option<&Arc<MessageLimit>>,
        depth: u32,
        deferred: &mut Vec<DeferredOverflow>,
    ) {
        let limit = match agent.charge_limit(msg_type.type_id(), bypass) {
            ChargeOutcome::Unlimited => None,
            ChargeOutcome::Charged(guard) => Some(guard),
            ChargeOutcome::Overflow(reaction, limit) => {
                deferred.push(DeferredOverflow {
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
        let Some(queue) = agent.current_queue() else {
            trace!(
                agent = agent.id,
                r#type = msg_type.type_name(),
                "subscriber not bound, message delivered to the ground"
            );
            return;
        };
        let Some(runner) = agent.upgrade_runner() else {
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

impl MailboxBackend for LocalMailbox {
    fn id(&self) -> MailboxId {
        self.id
    }

    fn kind(&self) -> MailboxKind {
        MailboxKind::Mpmc
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn subscribe(&self, msg_type: MessageType, agent: &Arc<AgentShared>) -> Result<(), Error> {
        let mut subscribers = self.subscribers.lock();
        let entries = subscribers.entry(msg_type.type_id()).or_default();
        if entries.iter().all(|entry| entry.agent_id != agent.id) {
            entries.push(SubscriberEntry {
                agent_id: agent.id,
                agent: Arc::downgrade(agent),
            });
        }
        Ok(())
    }

    fn unsubscribe(&self, ty: TypeId, agent: AgentId) {
        let mut subscribers = self.subscribers.lock();
        if let Some(entries) = subscribers.get_mut(&ty) {
            entries.retain(|entry| entry.agent_id != agent);
            if entries.is_empty() {
                subscribers.remove(&ty);
            }
        }
    }

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

        let mut deferred = Vec::new();
        {
            let mut subscribers = self.subscribers.lock();
            let entries = match subscribers.get_mut(&msg_type.type_id()) {
                Some(entries) => {
                    entries.retain(|entry| entry.agent.strong_count() > 0);
                    entries
                }
                None => {
                    trace!(mbox = self.id, r#type = msg_type.type_name(), "no subscribers");
                    if let Some(promise) = promise {
                        promise.fail(ServiceError::NoHandler);
                    }
                    return;
                }
            };

            // Filters apply to messages only; a signal has no payload to
            // inspect.
            let eligible: Vec<Arc<AgentShared>> = entries
                .iter()
                .filter_map(|entry| entry.agent.upgrade())
                .filter(|agent| match (&payload, msg_type.is_signal()) {
                    (Some(message), false) => {
                        agent.passes_filter(self.id, msg_type.type_id(), message.as_ref())
                    }
                    _ => true,
                })
                .collect();

            if let Some(promise) = promise {
                // A service request needs exactly one receiver.
                match eligible.as_slice() {
                    [] => promise.fail(ServiceError::NoHandler),
                    [agent] => self.push_to(
                        agent,
                        msg_type,
                        payload,
                        Some(promise),
                        bypass,
                        depth,
                        &mut deferred,
                    ),
                    _ => promise.fail(ServiceError::MultipleHandlers),
                }
            } else {
                for agent in &eligible {
                    self.push_to(
                        agent,
                        msg_type,
                        payload.clone(),
                        None,
                        bypass,
                        depth,
                        &mut deferred,
                    );
                }
            }
        }

        // Overflow reactions may re-enter this mailbox; run them unlocked.
        for overflow in deferred {
            apply_overflow(overflow);
        }
    }
}

impl std::fmt::Debug for LocalMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMailbox")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
