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

//! Per-agent subscription storage.
//!
//! Maps `(mailbox, message type, state)` to a type-erased handler. Two
//! interchangeable implementations exist: a hash-based one for the
//! general case and a flat-vector one that trades asymptotics for cache
//! locality on agents with a handful of subscriptions.
//!
//! Lookup never falls back to the default state: a miss in the current
//! state is a miss, and the demand is discarded with a trace event.
//!
//! The storage also answers whether an insert is the first (or a remove
//! the last) for its `(mailbox, type)` pair, which is what drives the
//! mailbox-side subscriber set.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::ManagedAgent;
use crate::common::{MailboxId, StateId, ThreadSafety};
use crate::message::Payload;

/// Type-erased event handler as stored in a subscription record.
///
/// The wrapper closure downcasts the payload to the concrete message type
/// and boxes the user handler's return value, which only matters for
/// service requests.
pub(crate) type EventHandlerFn<A> =
    Arc<dyn Fn(&mut ManagedAgent<A>, Option<&Payload>) -> Box<dyn Any + Send> + Send + Sync>;

/// A stored handler plus its declared thread safety.
pub(crate) struct HandlerSlot<A> {
    pub(crate) handler: EventHandlerFn<A>,
    pub(crate) thread_safety: ThreadSafety,
}

impl<A> Clone for HandlerSlot<A> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            thread_safety: self.thread_safety,
        }
    }
}

/// Key of one subscription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionKey {
    pub(crate) mbox: MailboxId,
    pub(crate) ty: TypeId,
    pub(crate) state: StateId,
}

/// Marker error: a record with the same key already exists.
#[derive(Debug)]
pub(crate) struct DuplicateSubscription;

/// Result of removing one subscription record.
pub(crate) struct RemovalOutcome {
    /// A record was actually removed.
    pub(crate) removed: bool,
    /// No record remains for the `(mailbox, type)` pair in any state, so
    /// the mailbox-side subscription can be dropped.
    pub(crate) pair_empty: bool,
}

/// Contract shared by the storage implementations.
pub(crate) trait SubscriptionStorage<A>: Send {
    /// Adds a record. `Ok(true)` means this was the first record for its
    /// `(mailbox, type)` pair across all states.
    fn insert(
        &mut self,
        key: SubscriptionKey,
        slot: HandlerSlot<A>,
    ) -> Result<bool, DuplicateSubscription>;

    /// Removes the record with exactly this key, if present.
    fn remove(&mut self, key: &SubscriptionKey) -> RemovalOutcome;

    /// Removes the records for `(mbox, ty)` in every state. Returns
    /// whether anything was removed.
    fn remove_all_states(&mut self, mbox: MailboxId, ty: TypeId) -> bool;

    /// Hot-path lookup used by the dispatcher for every user event.
    fn find(&self, mbox: MailboxId, ty: TypeId, state: StateId) -> Option<HandlerSlot<A>>;

    /// Clears the storage and returns the distinct `(mailbox, type)`
    /// pairs that were subscribed, for mailbox-side cleanup.
    fn drain_pairs(&mut self) -> Vec<(MailboxId, TypeId)>;
}

/// Which subscription-storage implementation an agent uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionStorageKind {
    /// Hash-map based, O(1) amortized lookup. The default.
    #[default]
    Hash,
    /// Flat vector with linear scans; compact and cache-friendly for
    /// agents with few subscriptions.
    Vector,
}

pub(crate) fn make_storage<A: 'static>(
    kind: SubscriptionStorageKind,
) -> Box<dyn SubscriptionStorage<A>> {
    match kind {
        SubscriptionStorageKind::Hash => Box::new(HashStorage::default()),
        SubscriptionStorageKind::Vector => Box::new(VecStorage::default()),
    }
}

/// Hash-based storage: pair map to per-state handler map.
pub(crate) struct HashStorage<A> {
    pairs: HashMap<(MailboxId, TypeId), HashMap<StateId, HandlerSlot<A>>>,
}

impl<A> Default for HashStorage<A> {
    fn default() -> Self {
        Self {
            pairs: HashMap::new(),
        }
    }
}

impl<A: 'static> SubscriptionStorage<A> for HashStorage<A> {
    fn insert(
        &mut self,
        key: SubscriptionKey,
        slot: HandlerSlot<A>,
    ) -> Result<bool, DuplicateSubscription> {
        let pair = (key.mbox, key.ty);
        let first = !self.pairs.contains_key(&pair);
        let states = self.pairs.entry(pair).or_default();
        if states.contains_key(&key.state) {
            return Err(DuplicateSubscription);
        }
        states.insert(key.state, slot);
        Ok(first)
    }

    fn remove(&mut self, key: &SubscriptionKey) -> RemovalOutcome {
        let pair = (key.mbox, key.ty);
        let Some(states) = self.pairs.get_mut(&pair) else {
            return RemovalOutcome {
                removed: false,
                pair_empty: false,
            };
        };
        let removed = states.remove(&key.state).is_some();
        let pair_empty = states.is_empty();
        if pair_empty {
            self.pairs.remove(&pair);
        }
        RemovalOutcome {
            removed,
            pair_empty: removed && pair_empty,
        }
    }

    fn remove_all_states(&mut self, mbox: MailboxId, ty: TypeId) -> bool {
        self.pairs.remove(&(mbox, ty)).is_some()
    }

    fn find(&self, mbox: MailboxId, ty: TypeId, state: StateId) -> Option<HandlerSlot<A>> {
        self.pairs
            .get(&(mbox, ty))
            .and_then(|states| states.get(&state))
            .cloned()
    }

    fn drain_pairs(&mut self) -> Vec<(MailboxId, TypeId)> {
        self.pairs.drain().map(|(pair, _)| pair).collect()
    }
}

/// Vector-based storage with linear scans.
pub(crate) struct VecStorage<A> {
    entries: Vec<(SubscriptionKey, HandlerSlot<A>)>,
}

impl<A> Default for VecStorage<A> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<A> VecStorage<A> {
    fn pair_count(&self, mbox: MailboxId, ty: TypeId) -> usize {
        self.entries
            .iter()
            .filter(|(key, _)| key.mbox == mbox && key.ty == ty)
            .count()
    }
}

impl<A: 'static> SubscriptionStorage<A> for VecStorage<A> {
    fn insert(
        &mut self,
        key: SubscriptionKey,
        slot: HandlerSlot<A>,
    ) -> Result<bool, DuplicateSubscription> {
        if self.entries.iter().any(|(existing, _)| *existing == key) {
            return Err(DuplicateSubscription);
        }
        let first = self.pair_count(key.mbox, key.ty) == 0;
        self.entries.push((key, slot));
        Ok(first)
    }

    fn remove(&mut self, key: &SubscriptionKey) -> RemovalOutcome {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing != key);
        let removed = self.entries.len() != before;
        RemovalOutcome {
            removed,
            pair_empty: removed && self.pair_count(key.mbox, key.ty) == 0,
        }
    }

    fn remove_all_states(&mut self, mbox: MailboxId, ty: TypeId) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|(key, _)| !(key.mbox == mbox && key.ty == ty));
        self.entries.len() != before
    }

    fn find(&self, mbox: MailboxId, ty: TypeId, state: StateId) -> Option<HandlerSlot<A>> {
        self.entries
            .iter()
            .find(|(key, _)| key.mbox == mbox && key.ty == ty && key.state == state)
            .map(|(_, slot)| slot.clone())
    }

    fn drain_pairs(&mut self) -> Vec<(MailboxId, TypeId)> {
        let mut pairs: Vec<(MailboxId, TypeId)> = Vec::new();
        for (key, _) in self.entries.drain(..) {
            if !pairs.contains(&(key.mbox, key.ty)) {
                pairs.push((key.mbox, key.ty));
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> HandlerSlot<()> {
        HandlerSlot {
            handler: Arc::new(|_, _| Box::new(())),
            thread_safety: ThreadSafety::default(),
        }
    }

    fn key(mbox: MailboxId, state: StateId) -> SubscriptionKey {
        SubscriptionKey {
            mbox,
            ty: TypeId::of::<u32>(),
            state,
        }
    }

    fn exercise(mut storage: Box<dyn SubscriptionStorage<()>>) {
        // First insert for the pair, second in another state is not.
        assert!(storage.insert(key(1, 0), slot()).unwrap());
        assert!(!storage.insert(key(1, 1), slot()).unwrap());
        assert!(storage.insert(key(1, 0), slot()).is_err());

        assert!(storage.find(1, TypeId::of::<u32>(), 0).is_some());
        assert!(storage.find(1, TypeId::of::<u32>(), 2).is_none());
        assert!(storage.find(2, TypeId::of::<u32>(), 0).is_none());

        let outcome = storage.remove(&key(1, 0));
        assert!(outcome.removed);
        assert!(!outcome.pair_empty);
        let outcome = storage.remove(&key(1, 1));
        assert!(outcome.removed);
        assert!(outcome.pair_empty);

        assert!(storage.insert(key(3, 0), slot()).unwrap());
        assert!(storage.remove_all_states(3, TypeId::of::<u32>()));
        assert!(storage.find(3, TypeId::of::<u32>(), 0).is_none());

        assert!(storage.insert(key(4, 0), slot()).unwrap());
        assert!(!storage.insert(key(4, 7), slot()).unwrap());
        let pairs = storage.drain_pairs();
        assert_eq!(pairs, vec![(4, TypeId::of::<u32>())]);
        assert!(storage.find(4, TypeId::of::<u32>(), 0).is_none());
    }

    #[test]
    fn hash_storage_contract() {
        exercise(make_storage::<()>(SubscriptionStorageKind::Hash));
    }

    #[test]
    fn vector_storage_contract() {
        exercise(make_storage::<()>(SubscriptionStorageKind::Vector));
    }
}
