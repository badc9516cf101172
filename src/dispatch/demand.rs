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

use crate::agent::shared::AgentShared;
use crate::agent::limits::LimitGuard;
use crate::common::{MailboxId, SYSTEM_MBOX_ID};
use crate::message::{MessageType, Payload, ServicePromise};

/// What a demand asks the agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DemandKind {
    /// Invoke the handler subscribed for the message in the current state.
    UserEvent,
    /// Like `UserEvent`, but the handler's return value completes the
    /// carried promise.
    ServiceRequest,
    /// Run the agent's `on_start` hook. Always the first demand.
    OnStart,
    /// Run the agent's `on_finish` hook and detach the agent. Always the
    /// last demand.
    OnFinish,
}

/// Executes demands for one agent.
///
/// Implemented by the typed agent runner; everything downstream of the
/// event queue works against this erased view. At most one `process` call
/// per receiver runs at a time; the dispatcher's per-agent exclusion
/// guarantees it, the runner does not re-check.
pub(crate) trait EventReceiver: Send + Sync {
    /// The deliver-facing record of the agent.
    fn shared(&self) -> &Arc<AgentShared>;

    /// Executes one demand to completion.
    fn process(&self, demand: ExecutionDemand);
}

/// A unit of work queued for a work thread: one message (or lifecycle
/// step) for one agent. Immutable once enqueued.
///
/// The demand owns a strong reference to its target, keeping the agent
/// alive for as long as work for it is pending, and a limit guard whose
/// drop releases the limit charge no matter how the demand ends.
pub(crate) struct ExecutionDemand {
    pub(crate) target: Arc<dyn EventReceiver>,
    pub(crate) mbox_id: MailboxId,
    pub(crate) msg_type: MessageType,
    pub(crate) payload: Option<Payload>,
    pub(crate) limit: Option<LimitGuard>,
    pub(crate) promise: Option<ServicePromise>,
    pub(crate) kind: DemandKind,
}

impl ExecutionDemand {
    /// Builds an `on_start`/`on_finish` demand, which has no originating
    /// mailbox, payload, limit, or promise.
    pub(crate) fn lifecycle(target: Arc<dyn EventReceiver>, kind: DemandKind) -> Self {
        debug_assert!(matches!(kind, DemandKind::OnStart | DemandKind::OnFinish));
        Self {
            target,
            mbox_id: SYSTEM_MBOX_ID,
            msg_type: MessageType::lifecycle(),
            payload: None,
            limit: None,
            promise: None,
            kind,
        }
    }

    pub(crate) fn target_agent(&self) -> crate::common::AgentId {
        self.target.shared().id
    }
}

impl std::fmt::Debug for ExecutionDemand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDemand")
            .field("agent", &self.target_agent())
            .field("mbox", &self.mbox_id)
            .field("type", &self.msg_type.type_name())
            .field("kind", &self.kind)
            .finish()
    }
}
