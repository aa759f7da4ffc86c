// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Per-scan execution context.
//!
//! Responsibilities:
//! - Carries the cooperative cancellation state, the owning thread's latch,
//!   and the worker-slot budget as one explicit handle; there is no hidden
//!   per-process state behind operators.
//! - Worker threads run on a derived context that shares the cancellation
//!   state but owns its own latch and is marked as a parallel worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::runtime::latch::Latch;
use crate::runtime::parallel::{WorkerSlotPool, default_worker_slot_pool};

/// Shared cancellation flag plus first-error slot.
///
/// `check` is the cooperative interruption point: executors call it at the
/// top of every loop iteration and unwind with an error when a cancel or a
/// raised error is pending.
#[derive(Debug, Default)]
pub struct InterruptState {
    canceled: AtomicBool,
    error: Mutex<Option<String>>,
}

impl InterruptState {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Record an asynchronous error; the first one wins.
    pub fn raise(&self, message: String) {
        let mut guard = self.error.lock().expect("interrupt error lock");
        if guard.is_none() {
            *guard = Some(message);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().expect("interrupt error lock").clone()
    }

    pub fn check(&self) -> Result<(), String> {
        if let Some(err) = self.error() {
            return Err(err);
        }
        if self.is_canceled() {
            return Err("query canceled".to_string());
        }
        Ok(())
    }
}

/// The context handle threaded through `next_tuple`.
#[derive(Clone)]
pub struct ExecContext {
    interrupt: Arc<InterruptState>,
    latch: Arc<Latch>,
    worker_slots: Arc<WorkerSlotPool>,
    parallel_allowed: bool,
    is_parallel_worker: bool,
}

impl ExecContext {
    pub fn new(worker_slots: Arc<WorkerSlotPool>) -> Self {
        Self {
            interrupt: Arc::new(InterruptState::default()),
            latch: Arc::new(Latch::new()),
            worker_slots,
            parallel_allowed: true,
            is_parallel_worker: false,
        }
    }

    /// Context backed by the process-wide slot pool sized from config.
    pub fn with_default_pool() -> Self {
        Self::new(Arc::clone(default_worker_slot_pool()))
    }

    /// Forbid worker launches, as when the enclosing transaction does not
    /// permit parallelism.
    pub fn disallow_parallelism(mut self) -> Self {
        self.parallel_allowed = false;
        self
    }

    pub fn check_interrupts(&self) -> Result<(), String> {
        self.interrupt.check()
    }

    /// Request cooperative cancellation and poke the latch so a blocked
    /// owner re-checks interrupts.
    pub fn request_cancel(&self) {
        self.interrupt.cancel();
        self.latch.set();
    }

    pub fn interrupt(&self) -> &Arc<InterruptState> {
        &self.interrupt
    }

    pub fn latch(&self) -> &Arc<Latch> {
        &self.latch
    }

    pub fn worker_slots(&self) -> &Arc<WorkerSlotPool> {
        &self.worker_slots
    }

    pub fn parallel_allowed(&self) -> bool {
        self.parallel_allowed
    }

    pub fn is_parallel_worker(&self) -> bool {
        self.is_parallel_worker
    }

    /// Derive the context a parallel worker thread runs on: same
    /// cancellation state and slot pool, its own latch, marked as a worker.
    pub(crate) fn parallel_worker_context(&self) -> ExecContext {
        ExecContext {
            interrupt: Arc::clone(&self.interrupt),
            latch: Arc::new(Latch::new()),
            worker_slots: Arc::clone(&self.worker_slots),
            parallel_allowed: self.parallel_allowed,
            is_parallel_worker: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        Self::new(Arc::new(WorkerSlotPool::new(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_on_fresh_state() {
        let ctx = ExecContext::for_test();
        assert!(ctx.check_interrupts().is_ok());
    }

    #[test]
    fn cancel_fails_check_and_sets_latch() {
        let ctx = ExecContext::for_test();
        ctx.request_cancel();
        assert!(ctx.check_interrupts().is_err());
        assert!(ctx.latch().is_set());
    }

    #[test]
    fn first_raised_error_wins() {
        let state = InterruptState::default();
        state.raise("first".to_string());
        state.raise("second".to_string());
        assert_eq!(state.check().unwrap_err(), "first");
    }

    #[test]
    fn worker_context_shares_interrupt_but_not_latch() {
        let ctx = ExecContext::for_test();
        let worker = ctx.parallel_worker_context();
        assert!(worker.is_parallel_worker());
        ctx.interrupt().cancel();
        assert!(worker.check_interrupts().is_err());
        ctx.latch().set();
        assert!(!worker.latch().is_set());
    }
}
