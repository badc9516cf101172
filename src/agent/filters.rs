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

//! Delivery-filter storage.
//!
//! A delivery filter is a predicate an agent installs against a
//! `(shared mailbox, message type)` pair. The mailbox consults it during
//! fan-out, before the message limit, so filtered-out messages never
//! charge a limit or touch the agent's event queue. Filters do not exist
//! for direct mailboxes or signals.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::MailboxId;
use crate::traits::Message;

/// Type-erased delivery predicate.
pub(crate) type DeliveryFilterFn = Arc<dyn Fn(&dyn Message) -> bool + Send + Sync>;

/// Per-agent filter table, read by mailboxes during delivery.
#[derive(Default)]
pub(crate) struct FilterStore {
    filters: HashMap<(MailboxId, TypeId), DeliveryFilterFn>,
}

impl FilterStore {
    pub(crate) fn set(&mut self, mbox: MailboxId, ty: TypeId, filter: DeliveryFilterFn) {
        self.filters.insert((mbox, ty), filter);
    }

    pub(crate) fn remove(&mut self, mbox: MailboxId, ty: TypeId) {
        self.filters.remove(&(mbox, ty));
    }

    /// Applies the filter for `(mbox, ty)` to `message`; absence of a
    /// filter lets the message through.
    pub(crate) fn passes(&self, mbox: MailboxId, ty: TypeId, message: &dyn Message) -> bool {
        match self.filters.get(&(mbox, ty)) {
            Some(filter) => filter(message),
            None => true,
        }
    }
}

impl std::fmt::Debug for FilterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FilterStore({} filters)", self.filters.len())
    }
}
