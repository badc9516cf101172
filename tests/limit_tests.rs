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

mod setup;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use covey::prelude::*;

use crate::setup::initialize_tracing;

#[derive(Debug, Clone)]
struct Job(u32);

#[derive(Debug, Clone)]
struct Spilled(u32);

#[derive(Debug)]
struct Done;
impl Signal for Done {}

/// With `overflow = drop` and a slow handler, a burst larger than the
/// soft cap is trimmed: only what fits the cap (plus at most what was
/// admitted before the first completion) ever runs, and the agent stays
/// alive.
#[test]
fn drop_overflow_bounds_pending_work() -> anyhow::Result<()> {
    initialize_tracing();
    let handled = Arc::new(AtomicUsize::new(0));

    Environment::launch({
        let handled = handled.clone();
        move |env| {
            let mbox = env.create_mbox();
            env.introduce_coop({
                let mbox = mbox.clone();
                move |coop| {
                    coop.add_agent(
                        AgentBuilder::new(())
                            .limit::<Job>(2, OverflowReaction::Drop)
                            .setup({
                                let handled = handled.clone();
                                move |agent| {
                                    let h = handled.clone();
                                    agent.subscribe(&mbox).event(move |_agent, _msg: &Job| {
                                        h.fetch_add(1, Ordering::SeqCst);
                                        std::thread::sleep(Duration::from_millis(100));
                                    })?;
                                    agent.subscribe(&mbox).signal::<Done, _, _>(|agent| {
                                        agent.deregister_own_coop(DeregReason::Normal);
                                    })?;
                                    Ok(())
                                }
                            }),
                    );
                    Ok(())
                }
            })?;
            for n in 0..10 {
                mbox.post(Job(n));
            }
            mbox.signal::<Done>();
            Ok(())
        }
    })?;

    let handled = handled.load(Ordering::SeqCst);
    assert!((2..=3).contains(&handled), "handled {handled} jobs");
    Ok(())
}

/// Overflowing messages can be redirected to another mailbox; the
/// original message travels unchanged and the overflowed limit is not
/// re-applied on the redirected path.
#[test]
fn redirect_overflow_reroutes_messages() -> anyhow::Result<()> {
    initialize_tracing();
    let direct_handled = Arc::new(AtomicUsize::new(0));
    let rerouted = Arc::new(Mutex::new(Vec::new()));

    Environment::launch({
        let direct_handled = direct_handled.clone();
        let rerouted = rerouted.clone();
        move |env| {
            let front = env.create_mbox();
            let spill = env.create_mbox();
            env.introduce_coop({
                let front = front.clone();
                let spill = spill.clone();
                move |coop| {
                    // The overloaded worker: capacity 1, everything else
                    // spills over.
                    coop.add_agent(
                        AgentBuilder::new(())
                            .limit::<Job>(1, OverflowReaction::RedirectTo(spill.clone()))
                            .setup({
                                let front = front.clone();
                                let direct_handled = direct_handled.clone();
                                move |agent| {
                                    let h = direct_handled.clone();
                                    agent.subscribe(&front).event(move |_agent, _msg: &Job| {
                                        h.fetch_add(1, Ordering::SeqCst);
                                        std::thread::sleep(Duration::from_millis(80));
                                    })?;
                                    agent.subscribe(&front).signal::<Done, _, _>(|agent| {
                                        agent.deregister_own_coop(DeregReason::Normal);
                                    })?;
                                    Ok(())
                                }
                            }),
                    );
                    // The spill consumer.
                    coop.add_agent(AgentBuilder::new(()).setup({
                        let spill = spill.clone();
                        let rerouted = rerouted.clone();
                        move |agent| {
                            let seen = rerouted.clone();
                            agent.subscribe(&spill).event(move |_agent, msg: &Job| {
                                seen.lock().unwrap().push(msg.0);
                            })?;
                            Ok(())
                        }
                    }));
                    Ok(())
                }
            })?;
            for n in 0..5 {
                front.post(Job(n));
            }
            front.signal::<Done>();
            Ok(())
        }
    })?;

    let direct = direct_handled.load(Ordering::SeqCst);
    let spilled = rerouted.lock().unwrap().len();
    assert_eq!(direct + spilled, 5);
    assert!(spilled >= 3, "expected most of the burst to spill, got {spilled}");
    Ok(())
}

/// Overflowing messages can be transformed into a different message on a
/// different mailbox.
#[test]
fn transform_overflow_replaces_the_message() -> anyhow::Result<()> {
    initialize_tracing();
    let transformed = Arc::new(Mutex::new(Vec::new()));

    Environment::launch({
        let transformed = transformed.clone();
        move |env| {
            let front = env.create_mbox();
            let overflow = env.create_mbox();
            env.introduce_coop({
                let front = front.clone();
                let overflow = overflow.clone();
                move |coop| {
                    let reaction = OverflowReaction::transform({
                        let overflow = overflow.clone();
                        move |job: &Job| (overflow.clone(), Spilled(job.0))
                    });
                    coop.add_agent(AgentBuilder::new(()).limit::<Job>(1, reaction).setup({
                        let front = front.clone();
                        move |agent| {
                            agent.subscribe(&front).event(move |_agent, _msg: &Job| {
                                std::thread::sleep(Duration::from_millis(80));
                            })?;
                            agent.subscribe(&front).signal::<Done, _, _>(|agent| {
                                agent.deregister_own_coop(DeregReason::Normal);
                            })?;
                            Ok(())
                        }
                    }));
                    coop.add_agent(AgentBuilder::new(()).setup({
                        let overflow = overflow.clone();
                        let transformed = transformed.clone();
                        move |agent| {
                            let seen = transformed.clone();
                            agent
                                .subscribe(&overflow)
                                .event(move |_agent, msg: &Spilled| {
                                    seen.lock().unwrap().push(msg.0);
                                })?;
                            Ok(())
                        }
                    }));
                    Ok(())
                }
            })?;
            for n in 0..4 {
                front.post(Job(n));
            }
            front.signal::<Done>();
            Ok(())
        }
    })?;

    assert!(!transformed.lock().unwrap().is_empty());
    Ok(())
}

/// Completing a demand releases its limit charge, so sequential sends
/// under a tiny cap all get through.
#[test]
fn limit_charge_is_released_on_completion() -> anyhow::Result<()> {
    initialize_tracing();
    let handled = Arc::new(AtomicUsize::new(0));

    Environment::launch({
        let handled = handled.clone();
        move |env| {
            let mbox = env.create_mbox();
            env.introduce_coop({
                let mbox = mbox.clone();
                move |coop| {
                    coop.add_agent(
                        AgentBuilder::new(())
                            .limit::<Job>(1, OverflowReaction::Drop)
                            .setup({
                                let handled = handled.clone();
                                move |agent| {
                                    let h = handled.clone();
                                    agent.subscribe(&mbox).event(move |_agent, _msg: &Job| {
                                        h.fetch_add(1, Ordering::SeqCst);
                                    })?;
                                    agent.subscribe(&mbox).signal::<Done, _, _>(|agent| {
                                        agent.deregister_own_coop(DeregReason::Normal);
                                    })?;
                                    Ok(())
                                }
                            }),
                    );
                    Ok(())
                }
            })?;
            for _ in 0..5 {
                mbox.post(Job(0));
                // Let the fast handler drain before the next send.
                std::thread::sleep(Duration::from_millis(30));
            }
            mbox.signal::<Done>();
            Ok(())
        }
    })?;

    assert_eq!(handled.load(Ordering::SeqCst), 5);
    Ok(())
}
