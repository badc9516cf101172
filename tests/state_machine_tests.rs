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

use covey::prelude::*;

use crate::setup::{initialize_tracing, Recorder};

#[derive(Debug)]
struct S1;
impl Signal for S1 {}

#[derive(Debug)]
struct S2;
impl Signal for S2 {}

#[derive(Debug)]
struct S3;
impl Signal for S3 {}

#[derive(Debug)]
struct Finish;
impl Signal for Finish {}

#[derive(Debug)]
struct Probe(u32);

/// Walks an agent through a three-state cycle driven by self-sent
/// signals, ending in a normal deregistration of its cooperation.
///
/// Covers: state-gated dispatch, self-send ordering, lifecycle
/// bracketing, and clean environment shutdown through autoshutdown.
#[test]
fn state_cycle_runs_to_clean_shutdown() -> anyhow::Result<()> {
    initialize_tracing();
    let recorder = Recorder::new();
    let finishes = Arc::new(AtomicUsize::new(0));

    let result = Environment::launch({
        let recorder = recorder.clone();
        let finishes = finishes.clone();
        move |env| {
            env.introduce_coop(move |coop| {
                coop.add_agent(
                    AgentBuilder::new(())
                        .on_start(|agent| {
                            agent.direct_mbox().signal::<S1>();
                        })
                        .on_finish({
                            let finishes = finishes.clone();
                            move |_agent| {
                                finishes.fetch_add(1, Ordering::SeqCst);
                            }
                        })
                        .setup({
                            let recorder = recorder.clone();
                            move |agent| {
                                let mbox = agent.direct_mbox();
                                let st1 = agent.define_state("st1")?;
                                let st2 = agent.define_state("st2")?;
                                let st3 = agent.define_state("st3")?;

                                let r = recorder.clone();
                                let next = st2.clone();
                                agent.subscribe(&mbox).in_state(&st1)?.signal::<S1, _, _>(
                                    move |agent| {
                                        r.record("s1@st1");
                                        agent.change_state(&next).unwrap();
                                        agent.direct_mbox().signal::<S2>();
                                    },
                                )?;

                                let r = recorder.clone();
                                let next = st3.clone();
                                agent.subscribe(&mbox).in_state(&st2)?.signal::<S2, _, _>(
                                    move |agent| {
                                        r.record("s2@st2");
                                        agent.change_state(&next).unwrap();
                                        agent.direct_mbox().signal::<S3>();
                                    },
                                )?;

                                let r = recorder.clone();
                                agent.subscribe(&mbox).in_state(&st3)?.signal::<S3, _, _>(
                                    move |agent| {
                                        r.record("s3@st3");
                                        agent.deregister_own_coop(DeregReason::Normal);
                                    },
                                )?;

                                agent.change_state(&st1)?;
                                Ok(())
                            }
                        }),
                );
                Ok(())
            })?;
            Ok(())
        }
    });

    assert!(result.is_ok());
    assert_eq!(recorder.events(), vec!["s1@st1", "s2@st2", "s3@st3"]);
    assert_eq!(finishes.load(Ordering::SeqCst), 1);
    Ok(())
}

/// State listeners fire synchronously, in registration order, and only
/// on actual changes: switching to the current state is a no-op.
#[test]
fn state_listeners_fire_in_order_on_real_changes() -> anyhow::Result<()> {
    initialize_tracing();
    let recorder = Recorder::new();

    Environment::launch({
        let recorder = recorder.clone();
        move |env| {
            env.introduce_coop(move |coop| {
                coop.add_agent(AgentBuilder::new(()).setup(move |agent| {
                    let worker = agent.define_state("worker")?;

                    let r = recorder.clone();
                    agent.add_state_listener(move |state| r.record(format!("first:{state}")))?;
                    let r = recorder.clone();
                    agent.add_state_listener(move |state| r.record(format!("second:{state}")))?;

                    agent.change_state(&worker)?;
                    // Re-entering the current state must not re-fire.
                    agent.change_state(&worker)?;
                    Ok(())
                }));
                Ok(())
            })?;
            env.stop();
            Ok(())
        }
    })?;

    assert_eq!(recorder.events(), vec!["first:worker", "second:worker"]);
    Ok(())
}

/// A state handle is only meaningful on the agent that created it.
#[test]
fn foreign_state_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let smuggled: Arc<Mutex<Option<State>>> = Arc::new(Mutex::new(None));

    Environment::launch({
        let smuggled = smuggled.clone();
        move |env| {
            env.introduce_coop(move |coop| {
                coop.add_agent(AgentBuilder::new(()).setup({
                    let smuggled = smuggled.clone();
                    move |agent| {
                        let state = agent.define_state("private")?;
                        *smuggled.lock().unwrap() = Some(state);
                        Ok(())
                    }
                }));
                coop.add_agent(AgentBuilder::new(()).setup({
                    let smuggled = smuggled.clone();
                    move |agent| {
                        let foreign = smuggled.lock().unwrap().take().expect("set by first agent");
                        assert!(matches!(
                            agent.change_state(&foreign),
                            Err(Error::StateOwnerMismatch { .. })
                        ));
                        Ok(())
                    }
                }));
                Ok(())
            })?;
            env.stop();
            Ok(())
        }
    })?;
    Ok(())
}

/// A subscription bound to the default state does not fire in another
/// state: handler lookup never falls back to the default state.
#[test]
fn no_fallback_to_default_state() -> anyhow::Result<()> {
    initialize_tracing();
    let handled = Arc::new(AtomicUsize::new(0));

    Environment::launch({
        let handled = handled.clone();
        move |env| {
            let mbox = env.create_mbox();
            env.introduce_coop({
                let mbox = mbox.clone();
                move |coop| {
                    coop.add_agent(AgentBuilder::new(()).setup({
                        let handled = handled.clone();
                        move |agent| {
                            let elsewhere = agent.define_state("elsewhere")?;
                            let h = handled.clone();
                            agent
                                .subscribe(&mbox)
                                .event(move |_agent, _msg: &Probe| {
                                    h.fetch_add(1, Ordering::SeqCst);
                                })?;
                            agent
                                .subscribe(&mbox)
                                .in_state(&elsewhere)?
                                .signal::<Finish, _, _>(|agent| {
                                    agent.deregister_own_coop(DeregReason::Normal);
                                })?;
                            agent.change_state(&elsewhere)?;
                            Ok(())
                        }
                    }));
                    Ok(())
                }
            })?;
            // Probe is subscribed in the default state only; the agent
            // sits in `elsewhere`, so it must be dropped.
            mbox.post(Probe(1));
            mbox.signal::<Finish>();
            Ok(())
        }
    })?;

    assert_eq!(handled.load(Ordering::SeqCst), 0);
    Ok(())
}

/// Subscribing the same (mailbox, message, state) triple twice fails.
#[test]
fn duplicate_subscription_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();

    Environment::launch(move |env| {
        let mbox = env.create_mbox();
        env.introduce_coop(move |coop| {
            coop.add_agent(AgentBuilder::new(()).setup(move |agent| {
                agent
                    .subscribe(&mbox)
                    .event(|_agent, _msg: &Probe| {})?;
                assert!(matches!(
                    agent.subscribe(&mbox).event(|_agent, _msg: &Probe| {}),
                    Err(Error::SubscriptionAlreadyExists { .. })
                ));
                Ok(())
            }));
            Ok(())
        })?;
        env.stop();
        Ok(())
    })?;
    Ok(())
}
