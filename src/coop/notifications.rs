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

//! Cooperation lifecycle notifications.
//!
//! A cooperation can carry notificators: callbacks fired when its
//! registration completes and when its deregistration finalizes. The
//! usual notificator posts a [`CoopRegistered`]/[`CoopDeregistered`]
//! message to a mailbox of the interested party; the helpers here build
//! exactly those. A panicking notificator aborts the process.

use std::sync::Arc;

use crate::common::environment::Environment;
use crate::coop::DeregReason;
use crate::mailbox::MailboxRef;

/// Callback fired when a cooperation's registration completes.
pub type RegNotificator = Arc<dyn Fn(&Environment, &str) + Send + Sync>;

/// Callback fired when a cooperation's deregistration finalizes.
pub type DeregNotificator = Arc<dyn Fn(&Environment, &str, DeregReason) + Send + Sync>;

/// Message posted by [`coop_reg_notificator`] when the cooperation has
/// been registered and its agents' `on_start` demands are queued.
#[derive(Debug, Clone)]
pub struct CoopRegistered {
    /// Name of the registered cooperation.
    pub coop: String,
}

/// Message posted by [`coop_dereg_notificator`] when the cooperation has
/// fully left the registry: all agents finished, all children gone.
#[derive(Debug, Clone)]
pub struct CoopDeregistered {
    /// Name of the deregistered cooperation.
    pub coop: String,
    /// Why it was deregistered.
    pub reason: DeregReason,
}

/// Builds a notificator posting [`CoopRegistered`] to `mbox`.
pub fn coop_reg_notificator(mbox: &MailboxRef) -> RegNotificator {
    let mbox = mbox.clone();
    Arc::new(move |_env, coop| {
        mbox.post(CoopRegistered {
            coop: coop.to_string(),
        });
    })
}

/// Builds a notificator posting [`CoopDeregistered`] to `mbox`.
pub fn coop_dereg_notificator(mbox: &MailboxRef) -> DeregNotificator {
    let mbox = mbox.clone();
    Arc::new(move |_env, coop, reason| {
        mbox.post(CoopDeregistered {
            coop: coop.to_string(),
            reason,
        });
    })
}
