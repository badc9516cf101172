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
use std::hash::{Hash, Hasher};

use crate::traits::{Message, Signal};

/// Process-wide identity of a message or signal type.
///
/// Wraps the payload type's [`TypeId`] together with its name (for
/// diagnostics) and whether it is delivered as a signal. Equality and
/// hashing consider only the `TypeId`, so the identity is stable across
/// the whole process and cheap to use as a map key.
#[derive(Debug, Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
    signal: bool,
}

impl MessageType {
    /// The identity of message type `M`.
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
            signal: false,
        }
    }

    /// The identity of signal type `S`.
    pub fn signal_of<S: Signal>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
            signal: true,
        }
    }

    /// Identity used by lifecycle demands, which carry no user payload.
    pub(crate) fn lifecycle() -> Self {
        #[derive(Debug)]
        struct Lifecycle;
        Self {
            id: TypeId::of::<Lifecycle>(),
            name: "lifecycle",
            signal: true,
        }
    }

    /// The raw [`TypeId`] of the payload type.
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// The payload type's name, for diagnostics only.
    pub fn type_name(&self) -> &'static str {
        self.name
    }

    /// Whether this identity denotes a signal (no payload).
    pub fn is_signal(&self) -> bool {
        self.signal
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}
