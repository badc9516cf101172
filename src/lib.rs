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

#![forbid(unsafe_code)]
#![forbid(missing_docs)] // Keep this to enforce coverage

//! # Covey
//!
//! An in-process agent runtime. Lightweight agents communicate solely by
//! asynchronous messages through mailboxes, are grouped into
//! *cooperations* whose registration and deregistration are atomic, and
//! run on pluggable dispatchers that own OS threads.
//!
//! ## Key Concepts
//!
//! - **Agents (`ManagedAgent`)**: state machines wrapping a user model.
//!   Each agent's handlers run serially, one demand at a time, gated by
//!   the agent's current [`State`](prelude::State).
//! - **Mailboxes (`MailboxRef`)**: delivery endpoints. Shared (MPMC)
//!   mailboxes fan a message out to every subscriber; each agent also
//!   owns a direct (MPSC) mailbox.
//! - **Service requests**: a delivery mode returning a
//!   [`ServiceFuture`](prelude::ServiceFuture) that yields the handler's
//!   reply, or re-raises its failure on the caller's side.
//! - **Cooperations (`Coop`)**: sets of agents registered and
//!   deregistered all-or-none, forming a parent/child tree.
//! - **Dispatchers**: schedulers owning OS work threads. The canonical
//!   pair is one-thread and thread-pool; both keep per-agent FIFO order
//!   and per-agent mutual exclusion.
//! - **Environment**: the top-level object owning the registry, the
//!   default dispatcher, and shutdown.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use covey::prelude::*;
//!
//! #[derive(Debug)]
//! struct Hello(String);
//!
//! Environment::launch(|env| {
//!     let mbox = env.create_mbox();
//!     env.introduce_coop(|coop| {
//!         coop.add_agent(AgentBuilder::new(()).setup({
//!             let mbox = mbox.clone();
//!             move |agent| {
//!                 agent.subscribe(&mbox).event(|agent, msg: &Hello| {
//!                     println!("{}", msg.0);
//!                     agent.deregister_own_coop(DeregReason::Normal);
//!                 })
//!             }
//!         }));
//!         Ok(())
//!     })?;
//!     mbox.post(Hello("hello, covey".into()));
//!     Ok(())
//! })
//! .unwrap();
//! ```

pub(crate) mod agent;
pub(crate) mod common;
pub(crate) mod coop;
pub(crate) mod dispatch;
pub(crate) mod error;
pub(crate) mod mailbox;
pub(crate) mod message;
pub(crate) mod traits;

/// A prelude re-exporting the commonly used types of the runtime.
pub mod prelude {
    pub use crate::agent::{
        AgentBuilder, ExceptionReaction, ManagedAgent, OverflowReaction, State,
        SubscriptionBind, SubscriptionStorageKind,
    };
    pub use crate::common::{
        launch, AgentId, CoveyConfig, Environment, MailboxId, Priority, ThreadSafety,
    };
    pub use crate::coop::{
        coop_dereg_notificator, coop_reg_notificator, Coop, CoopDeregistered, CoopRegistered,
        DeregNotificator, DeregReason, RegNotificator,
    };
    pub use crate::dispatch::{DispatcherHandle, OneThreadDispatcher, ThreadPoolDispatcher};
    pub use crate::error::{Error, Result, ServiceError};
    pub use crate::mailbox::{MailboxKind, MailboxRef};
    pub use crate::message::{MessageType, ServiceFuture};
    pub use crate::traits::{Message, Signal};
}

// The handles crossing thread boundaries must stay shareable.
static_assertions::assert_impl_all!(prelude::Environment: Send, Sync);
static_assertions::assert_impl_all!(prelude::MailboxRef: Send, Sync);
static_assertions::assert_impl_all!(prelude::DispatcherHandle: Send, Sync);
static_assertions::assert_impl_all!(prelude::State: Send, Sync);
static_assertions::assert_impl_all!(prelude::ServiceFuture<u32>: Send);
