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

//! Per-agent inbound message limits.
//!
//! A limit bounds how many demands for one message type may be pending on
//! an agent at a time. The counter is charged when a demand is enqueued
//! and released when the demand completes or is discarded, so the bound is
//! on *pending* work, not on throughput. Enqueues race: the counter may
//! transiently exceed the soft cap by up to the number of concurrent
//! producers; this implementation does not offer the stricter bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::mailbox::MailboxRef;
use crate::message::{MessageType, Payload};
use crate::traits::Message;

/// What a mailbox does with a message that would exceed an agent's limit.
#[derive(Clone)]
pub enum OverflowReaction {
    /// Discard the message silently (a trace event is still emitted).
    Drop,
    /// Log and abort the process.
    Abort,
    /// Re-post the message, unchanged, through another mailbox. The limit
    /// that overflowed is not re-applied on the redirected path.
    RedirectTo(MailboxRef),
    /// Derive a replacement message and post it through another mailbox.
    /// Use [`OverflowReaction::transform`] to construct this variant.
    Transform(TransformFn),
}

impl OverflowReaction {
    /// Builds a [`Transform`](OverflowReaction::Transform) reaction from a
    /// typed function mapping the overflowing message to a target mailbox
    /// and a replacement message.
    pub fn transform<M, N, F>(transform: F) -> Self
    where
        M: Message,
        N: Message,
        F: Fn(&M) -> (MailboxRef, N) + Send + Sync + 'static,
    {
        Self::Transform(TransformFn(Arc::new(move |payload| {
            let message = payload?.as_any().downcast_ref::<M>()?;
            let (target, replacement) = transform(message);
            Some((
                target,
                MessageType::of::<N>(),
                Some(Arc::new(replacement) as Payload),
            ))
        })))
    }
}

impl std::fmt::Debug for OverflowReaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drop => f.write_str("Drop"),
            Self::Abort => f.write_str("Abort"),
            Self::RedirectTo(mbox) => write!(f, "RedirectTo({})", mbox.id()),
            Self::Transform(_) => f.write_str("Transform"),
        }
    }
}

/// Type-erased transformation used by
/// [`OverflowReaction::Transform`]. Produced by
/// [`OverflowReaction::transform`].
#[derive(Clone)]
pub struct TransformFn(
    pub(crate) Arc<
        dyn Fn(Option<&Payload>) -> Option<(MailboxRef, MessageType, Option<Payload>)>
            + Send
            + Sync,
    >,
);

/// The limit record for one `(agent, message type)` pair.
pub(crate) struct MessageLimit {
    soft_cap: usize,
    count: AtomicUsize,
    reaction: OverflowReaction,
    type_name: &'static str,
}

impl MessageLimit {
    pub(crate) fn new(
        soft_cap: usize,
        reaction: OverflowReaction,
        type_name: &'static str,
    ) -> Arc<Self> {
        Arc::new(Self {
            soft_cap,
            count: AtomicUsize::new(0),
            reaction,
            type_name,
        })
    }

    /// Charges the counter for one demand. On overflow the charge is
    /// revoked immediately and the configured reaction is returned for
    /// the mailbox to apply.
    pub(crate) fn try_charge(self: &Arc<Self>) -> Result<LimitGuard, OverflowReaction> {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        if previous >= self.soft_cap {
            self.count.fetch_sub(1, Ordering::AcqRel);
            Err(self.reaction.clone())
        } else {
            Ok(LimitGuard {
                limit: self.clone(),
            })
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MessageLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLimit")
            .field("type", &self.type_name)
            .field("soft_cap", &self.soft_cap)
            .field("pending", &self.count.load(Ordering::Relaxed))
            .finish()
    }
}

/// Releases one charge of its limit when dropped.
///
/// The guard rides inside the execution demand, which makes the release
/// uniform across every way a demand ends: handler completion, discard on
/// deregistration, and queue purge all just drop the demand.
pub(crate) struct LimitGuard {
    limit: Arc<MessageLimit>,
}

impl Drop for LimitGuard {
    fn drop(&mut self) {
        self.limit.count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for LimitGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LimitGuard({})", self.limit.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_and_release() {
        let limit = MessageLimit::new(2, OverflowReaction::Drop, "test");
        let first = limit.try_charge().unwrap();
        let _second = limit.try_charge().unwrap();
        assert_eq!(limit.pending(), 2);

        // Third charge overflows and is revoked.
        assert!(limit.try_charge().is_err());
        assert_eq!(limit.pending(), 2);

        drop(first);
        assert_eq!(limit.pending(), 1);
        let _third = limit.try_charge().unwrap();
    }
}
