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
//! Plan node and executor contracts.
//!
//! Responsibilities:
//! - `PlanNode` is the shareable plan description: it is handed to worker
//!   threads, which each build a private `Executor` from it.
//! - `Executor` is the one-tuple-per-call iterator contract driven by parent
//!   operators and by the worker pump loop.
//!
//! Key exported interfaces:
//! - Types: `PlanNode`, `Executor`, `WorkerSlice`, `ExecResult`.

pub mod gather;
pub mod values;

use std::sync::Arc;

use crate::exec::tuple::{Tuple, TupleDescriptor};
use crate::runtime::exec_context::ExecContext;

/// Per-call production result: `Ok(None)` is end-of-stream.
pub type ExecResult = Result<Option<Tuple>, String>;

/// Which copy of a parallel plan an executor serves.
///
/// Leaf nodes that partition statically can slice their input by
/// `worker_id`/`num_workers`; nodes that partition dynamically (shared
/// cursor) may ignore it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WorkerSlice {
    pub worker_id: usize,
    pub num_workers: usize,
}

impl WorkerSlice {
    pub fn new(worker_id: usize, num_workers: usize) -> Self {
        Self {
            worker_id,
            num_workers: num_workers.max(1),
        }
    }

    /// The leader's local copy of the plan.
    pub fn leader() -> Self {
        Self {
            worker_id: 0,
            num_workers: 1,
        }
    }
}

/// Shareable plan description.
///
/// One `PlanNode` may be built into many executors: one per launched worker
/// plus the leader's local copy. A node advertising `parallel_safe` must
/// guarantee that those copies together produce the full rowset exactly once.
pub trait PlanNode: Send + Sync {
    fn name(&self) -> &str;

    fn output_descriptor(&self) -> TupleDescriptor;

    fn parallel_safe(&self) -> bool;

    fn build(&self, slice: WorkerSlice) -> Result<Box<dyn Executor>, String>;
}

/// Pull-based executor: one tuple per `next_tuple` call.
pub trait Executor: Send {
    fn next_tuple(&mut self, ctx: &ExecContext) -> ExecResult;

    /// Reset for a fresh scan of the same plan.
    fn rescan(&mut self) -> Result<(), String>;

    fn close(&mut self) {}
}

/// Build the leader-side executor for a child plan.
pub fn build_local_executor(plan: &Arc<dyn PlanNode>) -> Result<Box<dyn Executor>, String> {
    plan.build(WorkerSlice::leader())
}
