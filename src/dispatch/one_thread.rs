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

/// Dispatcher with a single work thread serving all of its agents.
///
/// Agents keep their individual demand lanes, so per-agent FIFO holds and
/// higher-priority agents are picked first; with one thread, at most one
/// handler of the whole dispatcher runs at a time.
///
/// The environment creates one of these at launch as the default
/// dispatcher.
#[derive(Debug)]
pub struct OneThreadDispatcher;

impl OneThreadDispatcher {
    /// Starts the dispatcher and registers it with `env` for shutdown at
    /// the end of `launch`.
    pub fn start(env: &Environment, name: impl Into<String>) -> DispatcherHandle {
        let handle = DispatcherHandle::new(DispatcherCore::start(name.into(), 1));
        env.add_dispatcher(handle.clone());
        handle
    }
}
