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

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::ServiceError;

/// Reply slot shared by a [`ServicePromise`] and a [`ServiceFuture`].
///
/// A plain two-cell single-writer channel: the handler side writes a value
/// or an error exactly once, the caller side blocks on a condition
/// variable until something is written.
struct ServiceCell {
    state: Mutex<CellState>,
    ready: Condvar,
}

enum CellState {
    Pending,
    Value(Box<dyn Any + Send>),
    Failed(ServiceError),
    Taken,
}

/// Write side of a service request, carried inside the execution demand.
///
/// Completing or failing the promise wakes the caller. Dropping a promise
/// that was never completed fails it with
/// [`ServiceError::HandlerSkipped`], which is exactly what happens when a
/// pending demand is discarded during cooperation deregistration.
pub(crate) struct ServicePromise {
    cell: Arc<ServiceCell>,
}

impl ServicePromise {
    /// Writes the handler's reply. A no-op if the slot was already filled.
    pub(crate) fn complete(self, value: Box<dyn Any + Send>) {
        self.settle(CellState::Value(value));
    }

    /// Writes a failure. A no-op if the slot was already filled.
    pub(crate) fn fail(self, error: ServiceError) {
        self.settle(CellState::Failed(error));
    }

    fn settle(&self, outcome: CellState) {
        let mut state = self.cell.state.lock();
        if matches!(*state, CellState::Pending) {
            *state = outcome;
            self.cell.ready.notify_all();
        }
    }
}

impl Drop for ServicePromise {
    fn drop(&mut self) {
        self.settle(CellState::Failed(ServiceError::HandlerSkipped));
    }
}

impl std::fmt::Debug for ServicePromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServicePromise")
    }
}

/// Read side of a service request.
///
/// Returned by [`MailboxRef::request`](crate::mailbox::MailboxRef::request).
/// Awaiting blocks the calling thread; blocking inside an event handler
/// ties up that handler's work thread and is a caller error on shared
/// dispatchers.
pub struct ServiceFuture<R> {
    cell: Arc<ServiceCell>,
    _reply: PhantomData<fn() -> R>,
}

impl<R: Any + Send> ServiceFuture<R> {
    /// Blocks until the handler replies, then yields the reply.
    ///
    /// # Errors
    ///
    /// Yields the [`ServiceError`] captured on the handler side: the
    /// handler panicked, was never found, was skipped, or replied with a
    /// value of a different type.
    pub fn wait(self) -> Result<R, ServiceError> {
        let mut state = self.cell.state.lock();
        while matches!(*state, CellState::Pending) {
            self.cell.ready.wait(&mut state);
        }
        Self::take(&mut state)
    }

    /// Non-blocking variant: yields the reply if it is already there.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Timeout`] when the reply is still pending,
    /// otherwise as [`wait`](Self::wait).
    pub fn try_take(self) -> Result<R, ServiceError> {
        let mut state = self.cell.state.lock();
        if matches!(*state, CellState::Pending) {
            return Err(ServiceError::Timeout);
        }
        Self::take(&mut state)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Timeout`] if the deadline elapses first, otherwise
    /// as [`wait`](Self::wait).
    pub fn wait_timeout(self, timeout: Duration) -> Result<R, ServiceError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        while matches!(*state, CellState::Pending) {
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(ServiceError::Timeout);
            }
            if self
                .cell
                .ready
                .wait_for(&mut state, deadline - now)
                .timed_out()
                && matches!(*state, CellState::Pending)
            {
                return Err(ServiceError::Timeout);
            }
        }
        Self::take(&mut state)
    }

    fn take(state: &mut CellState) -> Result<R, ServiceError> {
        match std::mem::replace(state, CellState::Taken) {
            CellState::Value(value) => value
                .downcast::<R>()
                .map(|boxed| *boxed)
                .map_err(|_| ServiceError::ReplyTypeMismatch),
            CellState::Failed(error) => Err(error),
            CellState::Pending | CellState::Taken => unreachable!("reply slot settled twice"),
        }
    }
}

impl<R> std::fmt::Debug for ServiceFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServiceFuture")
    }
}

/// Creates a connected promise/future pair for one service request.
pub(crate) fn service_channel<R: Any + Send>() -> (ServicePromise, ServiceFuture<R>) {
    let cell = Arc::new(ServiceCell {
        state: Mutex::new(CellState::Pending),
        ready: Condvar::new(),
    });
    (
        ServicePromise { cell: cell.clone() },
        ServiceFuture {
            cell,
            _reply: PhantomData,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_with_value() {
        let (promise, future) = service_channel::<u32>();
        promise.complete(Box::new(7_u32));
        assert_eq!(future.wait().unwrap(), 7);
    }

    #[test]
    fn dropping_promise_skips_handler() {
        let (promise, future) = service_channel::<u32>();
        drop(promise);
        assert!(matches!(future.wait(), Err(ServiceError::HandlerSkipped)));
    }

    #[test]
    fn reply_type_is_checked() {
        let (promise, future) = service_channel::<u32>();
        promise.complete(Box::new("wrong"));
        assert!(matches!(future.wait(), Err(ServiceError::ReplyTypeMismatch)));
    }

    #[test]
    fn waiting_blocks_until_completion() {
        let (promise, future) = service_channel::<&'static str>();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            promise.complete(Box::new("done"));
        });
        assert_eq!(future.wait().unwrap(), "done");
        writer.join().unwrap();
    }

    #[test]
    fn timeout_elapses() {
        let (_promise, future) = service_channel::<u32>();
        assert!(matches!(
            future.wait_timeout(Duration::from_millis(10)),
            Err(ServiceError::Timeout)
        ));
    }
}
