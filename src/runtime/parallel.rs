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
//! Parallel worker harness.
//!
//! Responsibilities:
//! - `WorkerSlotPool` budgets how many parallel workers the process may run
//!   at once; launches degrade gracefully when the pool runs dry.
//! - `ParallelExecContext` owns one launch of worker threads attached to a
//!   child plan: per-worker tuple queues (or a direct sink), the shared
//!   early-termination flag, join-and-collect-stats teardown, and rescan
//!   reinitialization.
//!
//! Key exported interfaces:
//! - Types: `WorkerSlotPool`, `ParallelExecContext`, `ParallelSink`,
//!   `WorkerRunStats`.
//!
//! Worker statistics folded by `finish` must not be read before `finish`
//! returns; joining the worker threads is the synchronization point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use crate::common::config;
use crate::exec::node::{PlanNode, WorkerSlice};
use crate::exec::tuple::{Tuple, TupleDescriptor};
use crate::rowfunnel_logging::debug;
use crate::runtime::exec_context::ExecContext;
use crate::runtime::tqueue::{SendStatus, TupleQueueReader, TupleQueueSender, tuple_queue};

/// Process-wide budget of parallel worker slots.
///
/// `acquire` never blocks: a launch takes whatever is left, possibly
/// nothing, and the operator falls back to running the plan in the leader.
#[derive(Debug)]
pub struct WorkerSlotPool {
    capacity: usize,
    available: Mutex<usize>,
}

impl WorkerSlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        *self.available.lock().expect("worker slot pool lock")
    }

    /// Take up to `want` slots; returns how many were granted.
    pub fn acquire(&self, want: usize) -> usize {
        let mut available = self.available.lock().expect("worker slot pool lock");
        let granted = want.min(*available);
        *available -= granted;
        granted
    }

    pub fn release(&self, count: usize) {
        let mut available = self.available.lock().expect("worker slot pool lock");
        *available = (*available + count).min(self.capacity);
    }
}

static DEFAULT_POOL: OnceLock<Arc<WorkerSlotPool>> = OnceLock::new();

/// The shared pool sized from `runtime.max_parallel_workers`.
pub fn default_worker_slot_pool() -> &'static Arc<WorkerSlotPool> {
    DEFAULT_POOL.get_or_init(|| Arc::new(WorkerSlotPool::new(config::max_parallel_workers())))
}

/// Destination for worker tuples when the funnel is bypassed
/// (`parallel_send` mode): workers push straight to the consumer.
pub trait ParallelSink: Send + Sync {
    fn push(&self, worker_id: usize, tuple: Tuple) -> Result<(), String>;

    fn finish(&self, worker_id: usize);
}

/// Per-launch worker statistics, folded into the harness by `finish`.
#[derive(Copy, Clone, Debug, Default)]
pub struct WorkerRunStats {
    pub tuples: u64,
}

/// One parallel launch of a child plan: queues, worker threads, teardown.
///
/// The operator owns the harness exclusively; the harness owns queues and
/// worker handles; readers borrow queues for the duration of the scan.
pub struct ParallelExecContext {
    child: Arc<dyn PlanNode>,
    descriptor: TupleDescriptor,
    num_workers: usize,
    queue_capacity: usize,
    executor_done: Arc<AtomicBool>,
    sink: Option<Arc<dyn ParallelSink>>,
    pending_readers: Vec<TupleQueueReader>,
    handles: Vec<thread::JoinHandle<WorkerRunStats>>,
    launched: usize,
    slots_held: usize,
    pool: Option<Arc<WorkerSlotPool>>,
    total_stats: WorkerRunStats,
}

impl ParallelExecContext {
    pub fn new(child: Arc<dyn PlanNode>, num_workers: usize, queue_capacity: usize) -> Self {
        let descriptor = child.output_descriptor();
        Self {
            child,
            descriptor,
            num_workers,
            queue_capacity: queue_capacity.max(1),
            executor_done: Arc::new(AtomicBool::new(false)),
            sink: None,
            pending_readers: Vec::new(),
            handles: Vec::new(),
            launched: 0,
            slots_held: 0,
            pool: None,
            total_stats: WorkerRunStats::default(),
        }
    }

    /// Route worker output to a sink instead of per-worker queues.
    pub fn set_sink(&mut self, sink: Arc<dyn ParallelSink>) {
        self.sink = Some(sink);
    }

    pub fn executor_done(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.executor_done)
    }

    /// Ask workers to stop after the tuple they are currently producing.
    pub fn request_executor_done(&self) {
        self.executor_done.store(true, Ordering::Release);
    }

    /// Acquire worker slots and spawn up to `num_workers` worker threads.
    /// Returns how many actually started, possibly zero.
    pub fn launch(&mut self, ctx: &ExecContext) -> Result<usize, String> {
        if !self.handles.is_empty() {
            return Err("parallel workers already launched".to_string());
        }
        let pool = Arc::clone(ctx.worker_slots());
        let granted = pool.acquire(self.num_workers);
        self.pool = Some(pool);
        self.slots_held = granted;
        self.launched = granted;
        debug!(
            "parallel launch: requested={} granted={}",
            self.num_workers, granted
        );

        for worker_id in 0..granted {
            let child = Arc::clone(&self.child);
            let slice = WorkerSlice::new(worker_id, granted);
            let worker_ctx = ctx.parallel_worker_context();
            let done = Arc::clone(&self.executor_done);
            let handle = match self.sink.as_ref() {
                None => {
                    let (sender, reader) = tuple_queue(
                        self.queue_capacity,
                        self.descriptor.clone(),
                        Arc::clone(ctx.latch()),
                    );
                    self.pending_readers.push(reader);
                    thread::spawn(move || worker_main(child, slice, worker_ctx, sender, done))
                }
                Some(sink) => {
                    let sink = Arc::clone(sink);
                    thread::spawn(move || {
                        worker_main_direct(child, slice, worker_ctx, sink, done)
                    })
                }
            };
            self.handles.push(handle);
        }
        Ok(granted)
    }

    pub fn launched_count(&self) -> usize {
        self.launched
    }

    /// Hand the per-worker queue readers to the caller. Valid once per
    /// (re)launch; empty in sink mode or before launch.
    pub fn take_readers(&mut self) -> Vec<TupleQueueReader> {
        std::mem::take(&mut self.pending_readers)
    }

    /// Join all workers and fold their statistics. Idempotent. Must run
    /// before worker stats are read and before `cleanup`.
    pub fn finish(&mut self) -> Result<(), String> {
        let mut panicked = false;
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(stats) => {
                    self.total_stats.tuples += stats.tuples;
                }
                Err(_) => panicked = true,
            }
        }
        if let Some(pool) = self.pool.as_ref() {
            pool.release(self.slots_held);
        }
        self.slots_held = 0;
        if panicked {
            return Err("parallel worker panicked".to_string());
        }
        Ok(())
    }

    /// Reset shared state for a rescan, keeping the allocation. Callers must
    /// have run `finish` first.
    pub fn reinitialize(&mut self) {
        debug_assert!(self.handles.is_empty(), "reinitialize before finish");
        self.pending_readers.clear();
        self.executor_done.store(false, Ordering::Release);
        self.launched = 0;
    }

    /// Terminal teardown; any still-running workers are reaped best-effort.
    pub fn cleanup(&mut self) {
        let _ = self.finish();
        self.pending_readers.clear();
    }

    /// Statistics folded from worker exits. Only meaningful after `finish`.
    pub fn total_worker_stats(&self) -> WorkerRunStats {
        self.total_stats
    }
}

fn worker_main(
    child: Arc<dyn PlanNode>,
    slice: WorkerSlice,
    ctx: ExecContext,
    sender: TupleQueueSender,
    done: Arc<AtomicBool>,
) -> WorkerRunStats {
    let mut stats = WorkerRunStats::default();
    let mut executor = match child.build(slice) {
        Ok(executor) => executor,
        Err(err) => {
            sender.send_error(err);
            return stats;
        }
    };
    loop {
        if done.load(Ordering::Acquire) {
            break;
        }
        if let Err(err) = ctx.check_interrupts() {
            sender.send_error(err);
            break;
        }
        match executor.next_tuple(&ctx) {
            Ok(Some(tuple)) => match sender.send(&tuple) {
                Ok(SendStatus::Sent) => stats.tuples += 1,
                Ok(SendStatus::Detached) => break,
                Err(err) => {
                    sender.send_error(err);
                    break;
                }
            },
            Ok(None) => break,
            Err(err) => {
                sender.send_error(err);
                break;
            }
        }
    }
    executor.close();
    debug!(
        "parallel worker {} exiting: tuples={}",
        slice.worker_id, stats.tuples
    );
    // Dropping the sender marks end-of-stream.
    stats
}

fn worker_main_direct(
    child: Arc<dyn PlanNode>,
    slice: WorkerSlice,
    ctx: ExecContext,
    sink: Arc<dyn ParallelSink>,
    done: Arc<AtomicBool>,
) -> WorkerRunStats {
    let mut stats = WorkerRunStats::default();
    let mut executor = match child.build(slice) {
        Ok(executor) => executor,
        Err(err) => {
            ctx.interrupt().raise(err);
            sink.finish(slice.worker_id);
            return stats;
        }
    };
    loop {
        if done.load(Ordering::Acquire) {
            break;
        }
        if ctx.check_interrupts().is_err() {
            break;
        }
        match executor.next_tuple(&ctx) {
            Ok(Some(tuple)) => match sink.push(slice.worker_id, tuple) {
                Ok(()) => stats.tuples += 1,
                Err(err) => {
                    ctx.interrupt().raise(err);
                    break;
                }
            },
            Ok(None) => break,
            Err(err) => {
                ctx.interrupt().raise(err);
                break;
            }
        }
    }
    executor.close();
    sink.finish(slice.worker_id);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_pool_grants_at_most_available() {
        let pool = WorkerSlotPool::new(3);
        assert_eq!(pool.acquire(2), 2);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire(4), 1);
        assert_eq!(pool.acquire(1), 0);
        pool.release(3);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn slot_pool_release_is_capped_at_capacity() {
        let pool = WorkerSlotPool::new(2);
        pool.release(5);
        assert_eq!(pool.available(), 2);
    }
}
