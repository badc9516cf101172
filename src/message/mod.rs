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

//! Message identity and the service-request reply channel.

mod message_type;
mod service;

pub use message_type::MessageType;
pub use service::ServiceFuture;

pub(crate) use service::{service_channel, ServicePromise};

use std::sync::Arc;

use crate::traits::Message;

/// Shared, immutable message payload as it travels through the runtime.
pub(crate) type Payload = Arc<dyn Message>;
