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

//! Helpers for unrecoverable failures.
//!
//! Some callbacks must not fail: state listeners and cooperation
//! notificators run at points where no caller can meaningfully recover.
//! A panic escaping one of them terminates the process after logging.

use std::any::Any;

use tracing::error;

/// Renders a panic payload as text for logging and error propagation.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Logs the failure and aborts the process.
pub(crate) fn abort_process(context: &str, payload: &(dyn Any + Send)) -> ! {
    error!(
        context,
        panic = %panic_message(payload),
        "fatal error, aborting the process"
    );
    std::process::abort();
}
