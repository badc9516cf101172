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

use std::any::Any;
use std::fmt::Debug;

/// Marker trait for everything that can travel through a mailbox.
///
/// A blanket implementation covers any `'static` type that is `Send`,
/// `Sync`, and `Debug`, so plain structs work as messages without
/// ceremony. The `as_any` accessor supports the type-erased dispatch used
/// by subscription storage: handlers are stored erased and downcast the
/// payload back to its concrete type on invocation.
///
/// One message instance is shared by reference count across every
/// receiver; the runtime never mutates a payload after it is posted.
pub trait Message: Any + Send + Sync + Debug {
    /// Returns the message as [`Any`] for downcasting.
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

impl<T> Message for T
where
    T: Any + Send + Sync + Debug,
{
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Marker trait for signals: message types that carry no payload.
///
/// A signal is delivered by type identity alone; no instance is
/// constructed or shipped. Implement it on an empty struct:
///
/// ```rust,ignore
/// #[derive(Debug)]
/// struct Tick;
/// impl Signal for Tick {}
/// ```
///
/// Delivery filters never apply to signals, because there is no payload
/// to inspect.
pub trait Signal: Message {}
