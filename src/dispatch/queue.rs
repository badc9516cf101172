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

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::common::{AgentId, Priority};
use crate::dispatch::{DemandKind, ExecutionDemand};
use crate::traits::EventQueue;

const PRIORITY_LEVELS: usize = 8;

/// The demand store shared by a dispatcher's work threads.
///
/// Each bound agent owns a *lane*: a FIFO of its pending demands plus the
/// flags that schedule it. Ready lanes are queued per priority level;
/// workers pick the highest non-empty level, FIFO within it. A lane being
/// served is `active` and not eligible for pickup, which is what makes
/// one agent's handlers mutually exclusive even with many workers.
///
/// A freshly bound lane starts `gated`: deliveries buffer but nothing
/// runs until [`activate`](EventQueue::activate) puts the `on_start`
/// demand at the lane head and lifts the gate. That keeps lifecycle
/// bracketing intact against senders racing with registration.
pub(crate) struct DemandPool {
    inner: Mutex<PoolInner>,
    available: Condvar,
    batch_size: usize,
}

struct PoolInner {
    lanes: HashMap<AgentId, Lane>,
    ready: Vec<VecDeque<AgentId>>,
    shutting_down: bool,
    /// Number of lanes currently being served by a worker.
    active: usize,
}

struct Lane {
    demands: VecDeque<ExecutionDemand>,
    priority: Priority,
    active: bool,
    queued: bool,
    gated: bool,
}

impl PoolInner {
    fn schedule(&mut self, agent: AgentId, available: &Condvar) {
        let Some(lane) = self.lanes.get_mut(&agent) else {
            return;
        };
        if lane.gated || lane.active || lane.queued || lane.demands.is_empty() {
            return;
        }
        lane.queued = true;
        self.ready[lane.priority.level() as usize].push_back(agent);
        available.notify_one();
    }

    fn pop_ready(&mut self) -> Option<AgentId> {
        for level in (0..PRIORITY_LEVELS).rev() {
            if let Some(agent) = self.ready[level].pop_front() {
                return Some(agent);
            }
        }
        None
    }

    fn all_ready_empty(&self) -> bool {
        self.ready.iter().all(VecDeque::is_empty)
    }
}

impl DemandPool {
    pub(crate) fn new(batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                lanes: HashMap::new(),
                ready: (0..PRIORITY_LEVELS).map(|_| VecDeque::new()).collect(),
                shutting_down: false,
                active: 0,
            }),
            available: Condvar::new(),
            batch_size: batch_size.max(1),
        })
    }

    /// Creates the (gated) lane for a freshly bound agent.
    pub(crate) fn register_lane(&self, agent: AgentId, priority: Priority) {
        let mut inner = self.inner.lock();
        inner.lanes.entry(agent).or_insert_with(|| Lane {
            demands: VecDeque::new(),
            priority,
            active: false,
            queued: false,
            gated: true,
        });
    }

    /// Blocks until a batch of demands is available for some agent, or
    /// the pool is drained after shutdown. Returns the served agent and
    /// its batch; the worker must call [`finish_batch`](Self::finish_batch)
    /// afterwards.
    pub(crate) fn next_batch(&self) -> Option<(AgentId, Vec<ExecutionDemand>)> {
        let mut inner = self.inner.lock();
        loop {
            while let Some(agent) = inner.pop_ready() {
                let batch_size = self.batch_size;
                let Some(lane) = inner.lanes.get_mut(&agent) else {
                    continue;
                };
                lane.queued = false;
                if lane.demands.is_empty() {
                    continue;
                }
                lane.active = true;
                let take = lane.demands.len().min(batch_size);
                let batch: Vec<ExecutionDemand> = lane.demands.drain(..take).collect();
                inner.active += 1;
                return Some((agent, batch));
            }
            if inner.shutting_down && inner.active == 0 {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    /// Clears the activity flag after a batch and re-queues the lane if
    /// demands remain.
    pub(crate) fn finish_batch(&self, agent: AgentId) {
        let mut inner = self.inner.lock();
        inner.active -= 1;
        if let Some(lane) = inner.lanes.get_mut(&agent) {
            lane.active = false;
        }
        inner.schedule(agent, &self.available);
        if inner.shutting_down && inner.active == 0 && inner.all_ready_empty() {
            self.available.notify_all();
        }
    }

    /// Stops intake of everything except `on_finish` demands, discards
    /// pending user demands, and wakes the workers so they can drain the
    /// rest and exit. Idempotent.
    pub(crate) fn shutdown(&self) {
        let mut discarded = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.shutting_down {
                return;
            }
            inner.shutting_down = true;
            let agents: Vec<AgentId> = inner.lanes.keys().copied().collect();
            for agent in agents {
                let lane = inner.lanes.get_mut(&agent).expect("lane exists");
                let kept: VecDeque<ExecutionDemand> = lane
                    .demands
                    .drain(..)
                    .filter_map(|demand| {
                        if demand.kind == DemandKind::OnFinish {
                            Some(demand)
                        } else {
                            discarded.push(demand);
                            None
                        }
                    })
                    .collect();
                lane.demands = kept;
                lane.gated = false;
                inner.schedule(agent, &self.available);
            }
            self.available.notify_all();
        }
        // Discarding releases limit charges and fails service futures.
        drop(discarded);
    }
}

impl EventQueue for DemandPool {
    fn push(&self, demand: ExecutionDemand) {
        let agent = demand.target_agent();
        let rejected = {
            let mut inner = self.inner.lock();
            let shutting_down = inner.shutting_down;
            match inner.lanes.get_mut(&agent) {
                Some(lane) if !(shutting_down && demand.kind != DemandKind::OnFinish) => {
                    lane.demands.push_back(demand);
                    inner.schedule(agent, &self.available);
                    None
                }
                _ => Some(demand),
            }
        };
        if let Some(demand) = rejected {
            trace!(agent, kind = ?demand.kind, "demand delivered to the ground");
            // Dropping outside the pool lock releases its limit charge and
            // fails any service future as skipped.
            drop(demand);
        }
    }

    fn activate(&self, start: ExecutionDemand) {
        let agent = start.target_agent();
        let mut inner = self.inner.lock();
        let Some(lane) = inner.lanes.get_mut(&agent) else {
            return;
        };
        lane.demands.push_front(start);
        lane.gated = false;
        inner.schedule(agent, &self.available);
    }

    fn purge_agent(&self, agent: AgentId) {
        let removed = {
            let mut inner = self.inner.lock();
            inner.lanes.remove(&agent)
        };
        if let Some(lane) = removed {
            if !lane.demands.is_empty() {
                trace!(
                    agent,
                    count = lane.demands.len(),
                    "pending demands discarded on purge"
                );
            }
            // Dropped outside the pool lock: discarding touches limit
            // counters and service futures.
            drop(lane.demands);
        }
    }
}

impl std::fmt::Debug for DemandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DemandPool")
            .field("lanes", &inner.lanes.len())
            .field("active", &inner.active)
            .field("shutting_down", &inner.shutting_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::agent::shared::AgentShared;
    use crate::dispatch::EventReceiver;
    use crate::message::MessageType;

    struct NullReceiver {
        shared: Arc<AgentShared>,
    }

    impl EventReceiver for NullReceiver {
        fn shared(&self) -> &Arc<AgentShared> {
            &self.shared
        }

        fn process(&self, _demand: ExecutionDemand) {}
    }

    fn receiver(id: AgentId, priority: Priority) -> Arc<NullReceiver> {
        Arc::new(NullReceiver {
            shared: AgentShared::new(id, priority, HashMap::new()),
        })
    }

    fn user_demand(target: &Arc<NullReceiver>, n: u64) -> ExecutionDemand {
        ExecutionDemand {
            target: target.clone(),
            mbox_id: n,
            msg_type: MessageType::of::<u64>(),
            payload: None,
            limit: None,
            promise: None,
            kind: DemandKind::UserEvent,
        }
    }

    #[test]
    fn gated_lane_buffers_until_activation_and_keeps_fifo() {
        let pool = DemandPool::new(16);
        let agent = receiver(1, Priority::default());
        pool.register_lane(1, Priority::default());

        // Buffered behind the gate; nothing is schedulable yet.
        pool.push(user_demand(&agent, 10));
        pool.push(user_demand(&agent, 11));
        pool.activate(ExecutionDemand::lifecycle(agent.clone(), DemandKind::OnStart));

        let (id, batch) = pool.next_batch().expect("a batch is ready");
        assert_eq!(id, 1);
        let kinds: Vec<DemandKind> = batch.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DemandKind::OnStart, DemandKind::UserEvent, DemandKind::UserEvent]
        );
        // on_start first, then the buffered demands in push order.
        assert_eq!(batch[1].mbox_id, 10);
        assert_eq!(batch[2].mbox_id, 11);
        pool.finish_batch(1);
    }

    #[test]
    fn higher_priority_lane_is_served_first() {
        let pool = DemandPool::new(16);
        let low = receiver(1, Priority::new(0));
        let high = receiver(2, Priority::new(5));
        pool.register_lane(1, Priority::new(0));
        pool.register_lane(2, Priority::new(5));
        pool.activate(ExecutionDemand::lifecycle(low.clone(), DemandKind::OnStart));
        pool.activate(ExecutionDemand::lifecycle(high.clone(), DemandKind::OnStart));

        let (first, _) = pool.next_batch().expect("high-priority batch");
        assert_eq!(first, 2);
        pool.finish_batch(2);
        let (second, _) = pool.next_batch().expect("low-priority batch");
        assert_eq!(second, 1);
        pool.finish_batch(1);
    }

    #[test]
    fn active_lane_is_not_picked_twice() {
        let pool = DemandPool::new(1);
        let agent = receiver(1, Priority::default());
        pool.register_lane(1, Priority::default());
        pool.activate(ExecutionDemand::lifecycle(agent.clone(), DemandKind::OnStart));
        pool.push(user_demand(&agent, 1));

        // Batch size 1: the lane still holds a demand, but while active
        // it must not be schedulable again.
        let (id, batch) = pool.next_batch().expect("first batch");
        assert_eq!((id, batch.len()), (1, 1));
        assert!(pool.inner.lock().all_ready_empty());

        pool.finish_batch(1);
        let (id, batch) = pool.next_batch().expect("second batch");
        assert_eq!((id, batch.len()), (1, 1));
        pool.finish_batch(1);
    }

    #[test]
    fn purged_lane_sends_demands_to_the_ground() {
        let pool = DemandPool::new(16);
        let agent = receiver(1, Priority::default());
        pool.register_lane(1, Priority::default());
        pool.activate(ExecutionDemand::lifecycle(agent.clone(), DemandKind::OnStart));
        pool.push(user_demand(&agent, 1));

        pool.purge_agent(1);
        // Pushes for an unknown lane are dropped, not queued.
        pool.push(user_demand(&agent, 2));
        assert!(pool.inner.lock().all_ready_empty());
    }

    #[test]
    fn shutdown_discards_user_demands_and_unblocks_workers() {
        let pool = DemandPool::new(16);
        let agent = receiver(1, Priority::default());
        pool.register_lane(1, Priority::default());
        pool.activate(ExecutionDemand::lifecycle(agent.clone(), DemandKind::OnStart));
        pool.push(user_demand(&agent, 1));

        pool.shutdown();
        // Only on_finish demands would survive; this lane had none left.
        assert!(pool.next_batch().is_none());
        // Idempotent.
        pool.shutdown();
        assert!(pool.next_batch().is_none());
    }
}
