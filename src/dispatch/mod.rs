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

//! Dispatchers: thread-owning schedulers binding agents to event queues.
//!
//! The two canonical dispatchers are [`OneThreadDispatcher`] and
//! [`ThreadPoolDispatcher`]; both are a [`DemandPool`](queue::DemandPool)
//! plus work threads. User code holds a [`DispatcherHandle`] and passes
//! it to [`AgentBuilder::dispatcher`](crate::agent::AgentBuilder::dispatcher).

mod demand;
mod one_thread;
mod queue;
mod thread_pool;
mod work_thread;

pub use one_thread::OneThreadDispatcher;
pub use thread_pool::ThreadPoolDispatcher;

pub(crate) use demand::{DemandKind, EventReceiver, ExecutionDemand};
pub(crate) use work_thread::DispatcherCore;

use std::sync::Arc;

use crate::agent::shared::AgentShared;
use crate::traits::EventQueue;

/// Dispatcher behavior the rest of the runtime needs: bind agents, shut
/// down.
pub(crate) trait DispatcherBinder: Send + Sync {
    fn name(&self) -> &str;

    /// Creates the agent's (gated) lane and returns the queue demands for
    /// it should be pushed to.
    fn bind(&self, shared: &Arc<AgentShared>) -> Arc<dyn EventQueue>;

    /// Stops intake, discards pending user demands, drains remaining
    /// `on_finish` work, and joins the work threads. Idempotent.
    fn shutdown(&self);
}

/// A clonable handle to a dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    inner: Arc<dyn DispatcherBinder>,
}

impl DispatcherHandle {
    pub(crate) fn new(inner: Arc<dyn DispatcherBinder>) -> Self {
        Self { inner }
    }

    /// The dispatcher's name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Shuts the dispatcher down. Graceful and idempotent; normally done
    /// by the environment at the end of `launch`.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub(crate) fn bind(&self, shared: &Arc<AgentShared>) -> Arc<dyn EventQueue> {
        self.inner.bind(shared)
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DispatcherHandle({})", self.name())
    }
}
