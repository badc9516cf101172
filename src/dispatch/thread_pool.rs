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

use crate::common::environment::Environment;
use crate::dispatch::{DispatcherCore, DispatcherHandle};

/// Dispatcher with a pool of work threads over one shared demand store.
///
/// Demands of the *same* agent never execute concurrently: a lane being
/// served is ineligible for pickup until its worker finishes the batch
/// and re-queues it. Different agents run in parallel up to the worker
/// count.
#[derive(Debug)]
pub struct ThreadPoolDispatcher;

impl ThreadPoolDispatcher {
    /// Starts the dispatcher with `workers` threads (at least one) and
    /// registers it with `env` for shutdown at the end of `launch`.
    pub fn start(env: &Environment, name: impl Into<String>, workers: usize) -> DispatcherHandle {
        let handle = DispatcherHandle::new(DispatcherCore::start(name.into(), workers));
        env.add_dispatcher(handle.clone());
        handle
    }
}
