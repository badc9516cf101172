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

//! The work-thread layer shared by every dispatcher.
//!
//! A dispatcher is a [`DispatcherCore`]: one [`DemandPool`] served by a
//! fixed set of OS threads. The one-thread and thread-pool dispatchers
//! differ only in how many threads they start.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::trace;

use crate::agent::shared::AgentShared;
use crate::common::config::CONFIG;
use crate::dispatch::queue::DemandPool;
use crate::dispatch::DispatcherBinder;
use crate::traits::EventQueue;

/// A demand pool plus the threads serving it.
pub(crate) struct DispatcherCore {
    name: String,
    pool: Arc<DemandPool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatcherCore {
    /// Starts `workers` threads over a fresh pool.
    pub(crate) fn start(name: String, workers: usize) -> Arc<Self> {
        let pool = DemandPool::new(CONFIG.limits.work_batch_size);
        let threads = (0..workers.max(1))
            .map(|index| spawn_worker(format!("{name}-{index}"), pool.clone()))
            .collect();
        trace!(dispatcher = %name, workers, "dispatcher started");
        Arc::new(Self {
            name,
            pool,
            threads: Mutex::new(threads),
        })
    }
}

impl DispatcherBinder for DispatcherCore {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&self, shared: &Arc<AgentShared>) -> Arc<dyn EventQueue> {
        self.pool.register_lane(shared.id, shared.priority);
        self.pool.clone()
    }

    fn shutdown(&self) {
        self.pool.shutdown();
        let current = std::thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // A worker asking its own dispatcher to stop must not join
            // itself; the thread exits when it drains the pool.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        trace!(dispatcher = %self.name, "dispatcher stopped");
    }
}

impl std::fmt::Debug for DispatcherCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DispatcherCore({})", self.name)
    }
}

fn spawn_worker(name: String, pool: Arc<DemandPool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || serve(&pool))
        .expect("failed to spawn a work thread")
}

/// The work-thread loop: pop a batch for one agent, execute it demand by
/// demand, yield the agent back to the pool.
fn serve(pool: &DemandPool) {
    while let Some((agent, batch)) = pool.next_batch() {
        for demand in batch {
            let target = demand.target.clone();
            target.process(demand);
        }
        pool.finish_batch(agent);
    }
    trace!("work thread draining complete, exiting");
}
