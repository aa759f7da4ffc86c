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
//! Gather operator: fan-in over parallel copies of a child plan.
//!
//! Responsibilities:
//! - Launches worker threads that each run a copy of the child plan, and
//!   merges their tuple queues into a single unordered output stream.
//! - Runs the plan in the leader as well when workers are unavailable or
//!   slow, so the pipeline never starves on a failed launch.
//! - In single-copy mode runs exactly one worker and keeps the leader out of
//!   the scan; the leader executes the plan itself only when that worker
//!   could not be obtained, so a single-copy child need not be parallel-safe.
//!
//! Key exported interfaces:
//! - Types: `GatherNode`, `GatherState`, `WorkerSet`, `PollOutcome`,
//!   `GatherMetrics`.
//!
//! Output order across workers is unspecified; callers that need an order
//! must merge-sort above this operator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::config;
use crate::exec::expr::Projection;
use crate::exec::node::{ExecResult, Executor, PlanNode, WorkerSlice, build_local_executor};
use crate::exec::tuple::{Tuple, TupleDescriptor, TupleSlot};
use crate::rowfunnel_logging::debug;
use crate::runtime::exec_context::ExecContext;
use crate::runtime::parallel::{ParallelExecContext, ParallelSink};
use crate::runtime::tqueue::TupleQueueReader;

/// Plan description for a Gather operator.
pub struct GatherNode {
    pub child: Arc<dyn PlanNode>,
    pub num_workers: usize,
    pub single_copy: bool,
    pub parallel_send: bool,
    pub statistics_enabled: bool,
    pub projection: Option<Projection>,
    pub sink: Option<Arc<dyn ParallelSink>>,
}

impl GatherNode {
    pub fn new(child: Arc<dyn PlanNode>, num_workers: usize) -> Self {
        Self {
            child,
            num_workers,
            single_copy: false,
            parallel_send: false,
            statistics_enabled: config::gather_statistics(),
            projection: None,
            sink: None,
        }
    }

    /// One worker, leader excluded from the scan unless the worker cannot be
    /// obtained.
    pub fn single_copy(child: Arc<dyn PlanNode>) -> Self {
        let mut node = Self::new(child, 1);
        node.single_copy = true;
        node
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Workers push tuples straight to `sink`; the leader only waits for
    /// them to finish.
    pub fn with_parallel_send(mut self, sink: Arc<dyn ParallelSink>) -> Self {
        self.parallel_send = true;
        self.sink = Some(sink);
        self
    }

    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }
}

impl PlanNode for GatherNode {
    fn name(&self) -> &str {
        "Gather"
    }

    fn output_descriptor(&self) -> TupleDescriptor {
        match self.projection.as_ref() {
            Some(projection) => projection.output_descriptor().clone(),
            None => self.child.output_descriptor(),
        }
    }

    fn parallel_safe(&self) -> bool {
        false
    }

    fn build(&self, _slice: WorkerSlice) -> Result<Box<dyn Executor>, String> {
        Ok(Box::new(GatherState::new(self)?))
    }
}

/// Read statistics accumulated when `statistics_enabled` is set
/// (latch waits are counted unconditionally).
#[derive(Copy, Clone, Debug, Default)]
pub struct GatherMetrics {
    pub tuples: u64,
    pub read_time: Duration,
    pub latch_waits: u64,
}

/// Outcome of one non-blocking sweep over the surviving worker queues.
#[derive(Debug)]
pub enum PollOutcome {
    Tuple(Tuple),
    /// Every reader reported end-of-stream.
    ExhaustedAll,
    /// Full unproductive lap; the caller should produce a tuple locally.
    YieldToLocal,
    /// Full unproductive lap and no local scan; the caller should block on
    /// its latch.
    Wait,
}

/// The surviving worker queue readers plus the round-robin cursor.
pub struct WorkerSet {
    readers: Vec<TupleQueueReader>,
    next_reader: usize,
}

impl WorkerSet {
    pub fn new(readers: Vec<TupleQueueReader>) -> Result<Self, String> {
        if readers.is_empty() {
            return Err("worker set needs at least one queue reader".to_string());
        }
        Ok(Self {
            readers,
            next_reader: 0,
        })
    }

    pub fn num_readers(&self) -> usize {
        self.readers.len()
    }

    /// Sweep the queues without blocking until a tuple shows up or a full
    /// lap comes back empty.
    pub fn poll_one(
        &mut self,
        ctx: &ExecContext,
        leader_participating: bool,
    ) -> Result<PollOutcome, String> {
        let mut visited = 0;
        loop {
            ctx.check_interrupts()?;

            let (tuple, done) = self.readers[self.next_reader].read(true)?;

            if done {
                debug_assert!(tuple.is_none());
                // Compact in place; the cursor now points at the reader that
                // slid into this position, preserving launch order.
                self.readers.remove(self.next_reader);
                if self.readers.is_empty() {
                    return Ok(PollOutcome::ExhaustedAll);
                }
                if self.next_reader >= self.readers.len() {
                    self.next_reader = 0;
                }
                // A drained reader does not count as a visit.
                continue;
            }

            if let Some(tuple) = tuple {
                // Keep the cursor on the queue that just produced. Advancing
                // after every tuple is measurably slower than draining a
                // producing queue until it goes empty.
                return Ok(PollOutcome::Tuple(tuple));
            }

            self.next_reader += 1;
            if self.next_reader >= self.readers.len() {
                self.next_reader = 0;
            }
            visited += 1;
            if visited >= self.readers.len() {
                return Ok(if leader_participating {
                    PollOutcome::YieldToLocal
                } else {
                    PollOutcome::Wait
                });
            }
        }
    }

    /// Drop all remaining readers, detaching their queues. Idempotent.
    pub fn shutdown(&mut self) {
        self.readers.clear();
    }
}

/// Runtime state of one Gather operator.
///
/// Workers are launched lazily on the first `next_tuple` call rather than at
/// build time: the launch allocates queues and takes worker slots, so it is
/// better deferred until the scan is actually driven.
pub struct GatherState {
    child: Arc<dyn PlanNode>,
    projection: Projection,
    num_workers: usize,
    single_copy: bool,
    parallel_send: bool,
    statistics_enabled: bool,
    sink: Option<Arc<dyn ParallelSink>>,

    initialized: bool,
    need_to_scan_locally: bool,
    // Declared before `harness` so queue readers detach first on drop.
    workers: Option<WorkerSet>,
    harness: Option<ParallelExecContext>,
    local: Box<dyn Executor>,
    funnel_slot: TupleSlot,
    metrics: GatherMetrics,
    stats_reported: bool,
}

impl GatherState {
    pub fn new(node: &GatherNode) -> Result<Self, String> {
        if node.parallel_send && node.sink.is_none() {
            return Err("gather in parallel_send mode needs a sink".to_string());
        }
        // Single-copy means exactly that.
        let num_workers = if node.single_copy { 1 } else { node.num_workers };
        let projection = node
            .projection
            .clone()
            .unwrap_or_else(|| Projection::identity(node.child.output_descriptor()));
        let local = build_local_executor(&node.child)?;
        Ok(Self {
            child: Arc::clone(&node.child),
            projection,
            num_workers,
            single_copy: node.single_copy,
            parallel_send: node.parallel_send,
            statistics_enabled: node.statistics_enabled,
            sink: node.sink.clone(),
            initialized: false,
            need_to_scan_locally: !node.single_copy,
            workers: None,
            harness: None,
            local,
            funnel_slot: TupleSlot::new(),
            metrics: GatherMetrics::default(),
            stats_reported: false,
        })
    }

    /// Produce the next projected tuple, or `Ok(None)` at end-of-stream.
    /// End-of-stream is absorbing until `rescan`.
    pub fn next(&mut self, ctx: &ExecContext) -> ExecResult {
        ctx.check_interrupts()?;

        if !self.initialized {
            self.first_call_setup(ctx)?;
        }

        // Release whatever the previous cycle left in the funnel slot before
        // touching any queue.
        self.funnel_slot.clear();

        if self.parallel_send {
            // Workers deliver straight to the sink; the leader only waits
            // for them to finish.
            if let Some(harness) = self.harness.as_mut() {
                harness.finish()?;
            }
            return Ok(None);
        }

        // Statistics cover pure-worker reads only; the same gate decides
        // whether the end-of-stream summary is printed.
        let stats_active = self.statistics_enabled && !self.need_to_scan_locally;
        let timing = stats_active.then(Instant::now);

        let Some(tuple) = self.get_next(ctx)? else {
            if stats_active {
                self.report_stats();
            }
            return Ok(None);
        };
        if let Some(begin) = timing {
            self.metrics.tuples += 1;
            self.metrics.read_time += begin.elapsed();
        }

        self.projection.project(&tuple).map(Some)
    }

    /// Get the next tuple from one of the workers, or by running the plan in
    /// the leader when that is (still) permitted.
    fn get_next(&mut self, ctx: &ExecContext) -> Result<Option<Tuple>, String> {
        while self.workers.is_some() || self.need_to_scan_locally {
            ctx.check_interrupts()?;

            if let Some(workers) = self.workers.as_mut() {
                match workers.poll_one(ctx, self.need_to_scan_locally)? {
                    PollOutcome::Tuple(tuple) => {
                        self.funnel_slot.store(tuple);
                        return Ok(self.funnel_slot.take());
                    }
                    PollOutcome::ExhaustedAll => {
                        // Reap the workers now so their statistics are
                        // folded before anything reads them.
                        self.shutdown_workers()?;
                        continue;
                    }
                    PollOutcome::YieldToLocal => {}
                    PollOutcome::Wait => {
                        ctx.latch().wait();
                        ctx.latch().reset();
                        self.metrics.latch_waits += 1;
                        continue;
                    }
                }
            }

            if self.need_to_scan_locally {
                match self.local.next_tuple(ctx)? {
                    Some(tuple) => return Ok(Some(tuple)),
                    None => self.need_to_scan_locally = false,
                }
            }
        }
        Ok(None)
    }

    /// First-call setup: fire up workers if parallelism is permitted, then
    /// decide whether the leader scans locally.
    fn first_call_setup(&mut self, ctx: &ExecContext) -> Result<(), String> {
        if ctx.is_parallel_worker() {
            // Gather nested inside a worker's plan slice must not launch
            // another generation of workers.
            self.workers = None;
            self.need_to_scan_locally = true;
            self.initialized = true;
            return Ok(());
        }

        if self.num_workers > 0 && ctx.parallel_allowed() {
            if self.harness.is_none() {
                let mut harness = ParallelExecContext::new(
                    Arc::clone(&self.child),
                    self.num_workers,
                    config::tuple_queue_capacity(),
                );
                if let Some(sink) = self.sink.as_ref() {
                    harness.set_sink(Arc::clone(sink));
                }
                self.harness = Some(harness);
            } else if let Some(harness) = self.harness.as_mut() {
                harness.reinitialize();
            }

            let harness = self.harness.as_mut().expect("harness just set");
            let launched = harness.launch(ctx)?;
            if launched > 0 {
                if !self.parallel_send {
                    self.workers = Some(WorkerSet::new(harness.take_readers())?);
                }
            } else {
                // No workers? Then never mind.
                self.shutdown_workers()?;
            }
        }

        self.need_to_scan_locally = if self.parallel_send {
            false
        } else if self.single_copy {
            self.workers.is_none()
        } else {
            true
        };
        self.initialized = true;
        Ok(())
    }

    /// Destroy the queue readers, then reap the workers. Reader teardown
    /// must come first so workers blocked on a full queue can exit; the
    /// harness `finish` is where worker statistics become readable.
    /// Idempotent, and must run on error paths too.
    fn shutdown_workers(&mut self) -> Result<(), String> {
        if let Some(mut workers) = self.workers.take() {
            workers.shutdown();
        }
        if let Some(harness) = self.harness.as_mut() {
            harness.finish()?;
        }
        Ok(())
    }

    /// Terminal teardown: workers, then the parallel context itself.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.shutdown_workers() {
            debug!("gather shutdown: worker teardown reported: {}", err);
        }
        if let Some(mut harness) = self.harness.take() {
            harness.cleanup();
        }
        self.local.close();
    }

    /// Reset for a fresh scan. Existing workers are shut down gracefully so
    /// they can still report errors and statistics; the parallel context is
    /// kept and reinitialized, and the next call relaunches.
    pub fn reset_for_rescan(&mut self) -> Result<(), String> {
        self.shutdown_workers()?;
        self.initialized = false;
        self.stats_reported = false;
        self.funnel_slot.clear();
        if let Some(harness) = self.harness.as_mut() {
            harness.reinitialize();
        }
        self.local.rescan()
    }

    /// Ask workers to stop producing, then drain the stream. Used when the
    /// parent has decided it needs no more rows.
    pub fn finish_early(&mut self, ctx: &ExecContext) -> Result<(), String> {
        if let Some(harness) = self.harness.as_ref() {
            harness.request_executor_done();
        }
        while self.next(ctx)?.is_some() {}
        Ok(())
    }

    pub fn metrics(&self) -> GatherMetrics {
        self.metrics
    }

    fn report_stats(&mut self) {
        if !self.statistics_enabled || self.stats_reported {
            return;
        }
        self.stats_reported = true;
        let metrics = self.metrics;
        let avg_us = if metrics.tuples > 0 {
            metrics.read_time.as_micros() as f64 / metrics.tuples as f64
        } else {
            0.0
        };
        debug!(
            "Gather: tuples={} read_time_us={} avg_us={:.3} latch_waits={}",
            metrics.tuples,
            metrics.read_time.as_micros(),
            avg_us,
            metrics.latch_waits
        );
    }
}

impl Executor for GatherState {
    fn next_tuple(&mut self, ctx: &ExecContext) -> ExecResult {
        self.next(ctx)
    }

    fn rescan(&mut self) -> Result<(), String> {
        self.reset_for_rescan()
    }

    fn close(&mut self) {
        self.shutdown();
    }
}
