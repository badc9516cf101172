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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use covey::prelude::*;

use crate::setup::{initialize_tracing, Recorder};

/// A parent agent registers a child cooperation whose single agent
/// panics in `on_start` with the deregister-cooperation reaction. The
/// parent observes the registration notification first, then the
/// deregistration notification carrying the unhandled-exception reason.
#[test]
fn coop_notifications_carry_lifecycle_and_reason() -> anyhow::Result<()> {
    initialize_tracing();
    let recorder = Recorder::new();

    Environment::launch({
        let recorder = recorder.clone();
        move |env| {
            env.introduce_coop(move |coop| {
                coop.set_name("parent");
                coop.add_agent(
                    AgentBuilder::new(())
                        .on_start(|agent| {
                            let me = agent.direct_mbox();
                            let mut child = Coop::named("child");
                            child.set_parent("parent");
                            child.add_reg_notificator(coop_reg_notificator(&me));
                            child.add_dereg_notificator(coop_dereg_notificator(&me));
                            child.add_agent(
                                AgentBuilder::new(())
                                    .exception_reaction(ExceptionReaction::DeregisterCoop)
                                    .on_start(|_agent| panic!("a child agent failure")),
                            );
                            agent.env().register_coop(child).unwrap();
                        })
                        .setup({
                            let recorder = recorder.clone();
                            move |agent| {
                                let me = agent.direct_mbox();
                                let r = recorder.clone();
                                agent
                                    .subscribe(&me)
                                    .event(move |_agent, msg: &CoopRegistered| {
                                        r.record(format!("reg:{}", msg.coop));
                                    })?;
                                let r = recorder.clone();
                                agent
                                    .subscribe(&me)
                                    .event(move |agent, msg: &CoopDeregistered| {
                                        r.record(format!("dereg:{}:{:?}", msg.coop, msg.reason));
                                        agent.deregister_own_coop(DeregReason::Normal);
                                    })?;
                                Ok(())
                            }
                        }),
                );
                Ok(())
            })?;
            Ok(())
        }
    })?;

    assert_eq!(
        recorder.events(),
        vec!["reg:child", "dereg:child:UnhandledException"]
    );
    Ok(())
}

/// If any agent's setup fails, the whole cooperation rolls back: no
/// `on_start` fires for any of its agents and the name stays free.
#[test]
fn registration_is_atomic_on_setup_failure() -> anyhow::Result<()> {
    initialize_tracing();
    let started = Arc::new(AtomicBool::new(false));

    Environment::launch({
        let started = started.clone();
        move |env| {
            let mut coop = Coop::named("fragile");
            coop.add_agent(AgentBuilder::new(()).on_start({
                let started = started.clone();
                move |_agent| {
                    started.store(true, Ordering::SeqCst);
                }
            }));
            coop.add_agent(
                AgentBuilder::new(())
                    .setup(|_agent| Err(Error::setup("deliberately refusing to configure"))),
            );
            let result = env.register_coop(coop);
            assert!(matches!(result, Err(Error::Setup(_))));

            // The name must be free again after the rollback.
            let mut retry = Coop::named("fragile");
            retry.add_agent(AgentBuilder::new(()).on_start(|agent| {
                agent.deregister_own_coop(DeregReason::Normal);
            }));
            env.register_coop(retry)?;
            Ok(())
        }
    })?;

    assert!(!started.load(Ordering::SeqCst));
    Ok(())
}

/// Name collisions and missing parents fail registration outright.
#[test]
fn registration_validations() -> anyhow::Result<()> {
    initialize_tracing();

    Environment::launch(|env| {
        let mut first = Coop::named("taken");
        first.add_agent(AgentBuilder::new(()));
        env.register_coop(first)?;

        let mut duplicate = Coop::named("taken");
        duplicate.add_agent(AgentBuilder::new(()));
        assert!(matches!(
            env.register_coop(duplicate),
            Err(Error::CoopNameCollision(_))
        ));

        let mut orphan = Coop::named("orphan");
        orphan.set_parent("no-such-parent");
        orphan.add_agent(AgentBuilder::new(()));
        assert!(matches!(
            env.register_coop(orphan),
            Err(Error::ParentCoopMissing(_))
        ));

        let empty = Coop::named("empty");
        assert!(matches!(env.register_coop(empty), Err(Error::EmptyCoop(_))));

        assert!(matches!(
            env.deregister_coop("never-registered", DeregReason::Normal),
            Err(Error::CoopNotFound(_))
        ));

        env.stop();
        Ok(())
    })?;
    Ok(())
}

/// Deregistering a parent takes the whole subtree down with the same
/// reason, and the parent's deregistration notificator fires strictly
/// after those of all descendants.
#[test]
fn parent_finalizes_after_all_descendants() -> anyhow::Result<()> {
    initialize_tracing();
    let recorder = Recorder::new();

    Environment::launch({
        let recorder = recorder.clone();
        move |env| {
            let collector = env.create_mbox();

            // A watcher agent in its own cooperation records the
            // notifications and stops the environment after the last one.
            env.introduce_coop({
                let collector = collector.clone();
                let recorder = recorder.clone();
                move |coop| {
                    coop.set_name("watcher");
                    coop.add_agent(AgentBuilder::new(()).setup(move |agent| {
                        let r = recorder.clone();
                        agent
                            .subscribe(&collector)
                            .event(move |agent, msg: &CoopDeregistered| {
                                r.record(format!("dereg:{}", msg.coop));
                                if msg.coop == "family" {
                                    agent.env().stop();
                                }
                            })?;
                        Ok(())
                    }));
                    Ok(())
                }
            })?;

            let mut parent = Coop::named("family");
            parent.add_dereg_notificator(coop_dereg_notificator(&collector));
            parent.add_agent(AgentBuilder::new(()));
            env.register_coop(parent)?;

            for name in ["family-a", "family-b"] {
                let mut child = Coop::named(name);
                child.set_parent("family");
                child.add_dereg_notificator(coop_dereg_notificator(&collector));
                child.add_agent(AgentBuilder::new(()));
                env.register_coop(child)?;
            }

            env.deregister_coop("family", DeregReason::Normal)?;
            Ok(())
        }
    })?;

    let events = recorder.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last().map(String::as_str), Some("dereg:family"));
    assert!(events.contains(&"dereg:family-a".to_string()));
    assert!(events.contains(&"dereg:family-b".to_string()));
    Ok(())
}

/// An agent with the default `Inherit` reaction picks up its
/// cooperation's reaction: the cooperation deregisters with the
/// unhandled-exception reason.
#[test]
fn exception_reaction_is_inherited_from_the_coop() -> anyhow::Result<()> {
    initialize_tracing();
    let recorder = Recorder::new();

    #[derive(Debug)]
    struct Boom;
    impl Signal for Boom {}

    Environment::launch({
        let recorder = recorder.clone();
        move |env| {
            let collector = env.create_mbox();
            let trigger = env.create_mbox();

            env.introduce_coop({
                let collector = collector.clone();
                let recorder = recorder.clone();
                move |coop| {
                    coop.add_agent(AgentBuilder::new(()).setup(move |agent| {
                        let r = recorder.clone();
                        agent
                            .subscribe(&collector)
                            .event(move |agent, msg: &CoopDeregistered| {
                                r.record(format!("{:?}", msg.reason));
                                agent.env().stop();
                            })?;
                        Ok(())
                    }));
                    Ok(())
                }
            })?;

            let mut fragile = Coop::named("volatile");
            fragile.set_exception_reaction(ExceptionReaction::DeregisterCoop);
            fragile.add_dereg_notificator(coop_dereg_notificator(&collector));
            fragile.add_agent(AgentBuilder::new(()).setup({
                let trigger = trigger.clone();
                move |agent| {
                    agent
                        .subscribe(&trigger)
                        .signal::<Boom, _, _>(|_agent| panic!("handler blew up"))?;
                    Ok(())
                }
            }));
            env.register_coop(fragile)?;

            trigger.signal::<Boom>();
            Ok(())
        }
    })?;

    assert_eq!(recorder.events(), vec!["UnhandledException"]);
    Ok(())
}

/// With the ignore reaction, a panicking handler does not disturb the
/// agent: later messages are still handled.
#[test]
fn ignore_reaction_keeps_the_agent_alive() -> anyhow::Result<()> {
    initialize_tracing();
    let survived = Arc::new(AtomicBool::new(false));

    #[derive(Debug)]
    struct Boom;
    impl Signal for Boom {}

    #[derive(Debug)]
    struct StillThere;
    impl Signal for StillThere {}

    Environment::launch({
        let survived = survived.clone();
        move |env| {
            let mbox = env.create_mbox();
            env.introduce_coop({
                let mbox = mbox.clone();
                move |coop| {
                    coop.add_agent(
                        AgentBuilder::new(())
                            .exception_reaction(ExceptionReaction::Ignore)
                            .setup({
                                let survived = survived.clone();
                                move |agent| {
                                    agent
                                        .subscribe(&mbox)
                                        .signal::<Boom, _, _>(|_agent| panic!("ignored"))?;
                                    let s = survived.clone();
                                    agent.subscribe(&mbox).signal::<StillThere, _, _>(
                                        move |agent| {
                                            s.store(true, Ordering::SeqCst);
                                            agent.deregister_own_coop(DeregReason::Normal);
                                        },
                                    )?;
                                    Ok(())
                                }
                            }),
                    );
                    Ok(())
                }
            })?;
            mbox.signal::<Boom>();
            mbox.signal::<StillThere>();
            Ok(())
        }
    })?;

    assert!(survived.load(Ordering::SeqCst));
    Ok(())
}

/// Anonymous cooperations get generated, distinct names.
#[test]
fn anonymous_coops_get_distinct_names() -> anyhow::Result<()> {
    initialize_tracing();
    let finished = Arc::new(AtomicUsize::new(0));

    Environment::launch({
        let finished = finished.clone();
        move |env| {
            let mut names = Vec::new();
            for _ in 0..2 {
                let finished = finished.clone();
                let name = env.introduce_coop(move |coop| {
                    coop.add_agent(AgentBuilder::new(()).on_finish(move |_agent| {
                        finished.fetch_add(1, Ordering::SeqCst);
                    }));
                    Ok(())
                })?;
                names.push(name);
            }
            assert_ne!(names[0], names[1]);
            env.stop();
            Ok(())
        }
    })?;

    assert_eq!(finished.load(Ordering::SeqCst), 2);
    Ok(())
}
