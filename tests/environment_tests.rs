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
use std::sync::Arc;

use covey::prelude::*;

use crate::setup::initialize_tracing;

/// The exit-code wrapper maps a clean shutdown to zero.
#[test]
fn launch_exit_code_zero_on_clean_shutdown() {
    initialize_tracing();
    let code = launch(|env| {
        env.stop();
        Ok(())
    });
    assert_eq!(code, 0);
}

/// A failing initialization shuts the environment down and maps to a
/// non-zero exit code.
#[test]
fn launch_exit_code_nonzero_on_init_failure() {
    initialize_tracing();
    let code = launch(|_env| Err(Error::setup("init refused")));
    assert_eq!(code, 1);
}

/// With autoshutdown disabled, the environment waits for an explicit
/// `stop` even after the last cooperation deregistered.
#[test]
fn explicit_stop_with_autoshutdown_disabled() -> anyhow::Result<()> {
    initialize_tracing();
    let finishes = Arc::new(AtomicUsize::new(0));

    let mut config = CoveyConfig::default();
    config.behavior.autoshutdown = false;

    Environment::launch_with_config(config, {
        let finishes = finishes.clone();
        move |env| {
            env.introduce_coop(move |coop| {
                coop.add_agent(
                    AgentBuilder::new(())
                        .on_start(|agent| {
                            // Stop the whole environment rather than just
                            // this cooperation; nothing else would end it.
                            agent.env().stop();
                        })
                        .on_finish(move |_agent| {
                            finishes.fetch_add(1, Ordering::SeqCst);
                        }),
                );
                Ok(())
            })?;
            Ok(())
        }
    })?;

    assert_eq!(finishes.load(Ordering::SeqCst), 1);
    Ok(())
}

/// Once stopping, the environment rejects new cooperations.
#[test]
fn registration_after_stop_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();

    Environment::launch(|env| {
        env.stop();
        let mut coop = Coop::named("latecomer");
        coop.add_agent(AgentBuilder::new(()));
        assert!(matches!(env.register_coop(coop), Err(Error::ShuttingDown)));
        Ok(())
    })?;
    Ok(())
}

/// `stop` is idempotent.
#[test]
fn stop_twice_is_harmless() -> anyhow::Result<()> {
    initialize_tracing();

    Environment::launch(|env| {
        env.stop();
        env.stop();
        Ok(())
    })?;
    Ok(())
}
