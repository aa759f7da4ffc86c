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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use arrow::datatypes::{DataType, Field};

use rowfunnel::exec::node::values::ValuesNode;
use rowfunnel::runtime::parallel::ParallelSink;
use rowfunnel::{Datum, ExecContext, Executor, GatherState, PlanNode, Tuple, TupleDescriptor,
    WorkerSlice};

pub fn int_descriptor() -> TupleDescriptor {
    TupleDescriptor::from_fields(vec![Field::new("v", DataType::Int64, false)])
}

pub fn int_tuple(v: i64) -> Tuple {
    Tuple::new(vec![Datum::Int64(v)])
}

pub fn int_values(n: i64) -> Arc<dyn PlanNode> {
    let rows = (0..n).map(int_tuple).collect();
    Arc::new(ValuesNode::new(int_descriptor(), rows).expect("valid rows"))
}

pub fn tuple_int(tuple: &Tuple) -> i64 {
    tuple.datum(0).and_then(Datum::as_i64).expect("int column")
}

/// Drain a gather operator and return the integer column of every tuple, in
/// arrival order.
pub fn collect_ints(state: &mut GatherState, ctx: &ExecContext) -> Result<Vec<i64>, String> {
    let mut out = Vec::new();
    while let Some(tuple) = state.next(ctx)? {
        out.push(tuple_int(&tuple));
    }
    Ok(out)
}

pub fn sorted(mut values: Vec<i64>) -> Vec<i64> {
    values.sort_unstable();
    values
}

/// Wraps a plan and counts `next_tuple` calls separately for the first
/// executor built (the leader's local copy, which `GatherState::new` always
/// builds first) and for every executor built afterwards (the workers).
pub struct CountingNode {
    inner: Arc<dyn PlanNode>,
    builds: AtomicUsize,
    leader_calls: Arc<AtomicUsize>,
    worker_calls: Arc<AtomicUsize>,
}

impl CountingNode {
    pub fn new(inner: Arc<dyn PlanNode>) -> Self {
        Self {
            inner,
            builds: AtomicUsize::new(0),
            leader_calls: Arc::new(AtomicUsize::new(0)),
            worker_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn leader_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.leader_calls)
    }

    pub fn worker_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.worker_calls)
    }
}

impl PlanNode for CountingNode {
    fn name(&self) -> &str {
        "CountingValues"
    }

    fn output_descriptor(&self) -> TupleDescriptor {
        self.inner.output_descriptor()
    }

    fn parallel_safe(&self) -> bool {
        self.inner.parallel_safe()
    }

    fn build(&self, slice: WorkerSlice) -> Result<Box<dyn Executor>, String> {
        let build_index = self.builds.fetch_add(1, Ordering::SeqCst);
        let calls = if build_index == 0 {
            Arc::clone(&self.leader_calls)
        } else {
            Arc::clone(&self.worker_calls)
        };
        Ok(Box::new(CountingExec {
            inner: self.inner.build(slice)?,
            calls,
        }))
    }
}

struct CountingExec {
    inner: Box<dyn Executor>,
    calls: Arc<AtomicUsize>,
}

impl Executor for CountingExec {
    fn next_tuple(&mut self, ctx: &ExecContext) -> Result<Option<Tuple>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.next_tuple(ctx)
    }

    fn rescan(&mut self) -> Result<(), String> {
        self.inner.rescan()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// A plan that blocks until the test feeds it tuples over a channel.
/// `Some(tuple)` emits a tuple; `None` or a dropped sender is end-of-stream.
///
/// The feed is claimed by the first executor that actually pulls, so the
/// leader's never-driven local copy (built eagerly by `GatherState::new`)
/// does not consume it; any other copy is immediately exhausted.
pub struct GatedNode {
    descriptor: TupleDescriptor,
    feed: Arc<Mutex<Option<mpsc::Receiver<Option<Tuple>>>>>,
}

impl GatedNode {
    pub fn new(descriptor: TupleDescriptor) -> (mpsc::Sender<Option<Tuple>>, Self) {
        let (tx, rx) = mpsc::channel();
        (
            tx,
            Self {
                descriptor,
                feed: Arc::new(Mutex::new(Some(rx))),
            },
        )
    }
}

impl PlanNode for GatedNode {
    fn name(&self) -> &str {
        "GatedValues"
    }

    fn output_descriptor(&self) -> TupleDescriptor {
        self.descriptor.clone()
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn build(&self, _slice: WorkerSlice) -> Result<Box<dyn Executor>, String> {
        Ok(Box::new(GatedExec {
            slot: Arc::clone(&self.feed),
            feed: None,
        }))
    }
}

struct GatedExec {
    slot: Arc<Mutex<Option<mpsc::Receiver<Option<Tuple>>>>>,
    feed: Option<mpsc::Receiver<Option<Tuple>>>,
}

impl Executor for GatedExec {
    fn next_tuple(&mut self, ctx: &ExecContext) -> Result<Option<Tuple>, String> {
        ctx.check_interrupts()?;
        if self.feed.is_none() {
            self.feed = self.slot.lock().expect("gated feed lock").take();
        }
        let Some(feed) = self.feed.as_ref() else {
            return Ok(None);
        };
        match feed.recv() {
            Ok(Some(tuple)) => Ok(Some(tuple)),
            Ok(None) | Err(_) => Ok(None),
        }
    }

    fn rescan(&mut self) -> Result<(), String> {
        Err("gated plan does not support rescan".to_string())
    }
}

/// A plan whose executors emit a fixed prefix and then fail.
pub struct FailingNode {
    descriptor: TupleDescriptor,
    rows_before_error: Vec<Tuple>,
    message: String,
}

impl FailingNode {
    pub fn new(descriptor: TupleDescriptor, rows_before_error: Vec<Tuple>, message: &str) -> Self {
        Self {
            descriptor,
            rows_before_error,
            message: message.to_string(),
        }
    }
}

impl PlanNode for FailingNode {
    fn name(&self) -> &str {
        "FailingValues"
    }

    fn output_descriptor(&self) -> TupleDescriptor {
        self.descriptor.clone()
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn build(&self, _slice: WorkerSlice) -> Result<Box<dyn Executor>, String> {
        Ok(Box::new(FailingExec {
            pending: self.rows_before_error.clone().into_iter().collect(),
            message: self.message.clone(),
        }))
    }
}

struct FailingExec {
    pending: std::collections::VecDeque<Tuple>,
    message: String,
}

impl Executor for FailingExec {
    fn next_tuple(&mut self, _ctx: &ExecContext) -> Result<Option<Tuple>, String> {
        match self.pending.pop_front() {
            Some(tuple) => Ok(Some(tuple)),
            None => Err(self.message.clone()),
        }
    }

    fn rescan(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Sink for parallel_send mode: collects pushed tuples and remembers which
/// workers called `finish`.
#[derive(Default)]
pub struct VecSink {
    rows: Mutex<Vec<Tuple>>,
    finished_workers: Mutex<Vec<usize>>,
}

impl VecSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ints(&self) -> Vec<i64> {
        self.rows
            .lock()
            .expect("sink rows lock")
            .iter()
            .map(tuple_int)
            .collect()
    }

    pub fn finished_workers(&self) -> usize {
        self.finished_workers
            .lock()
            .expect("sink finished lock")
            .len()
    }
}

impl ParallelSink for VecSink {
    fn push(&self, _worker_id: usize, tuple: Tuple) -> Result<(), String> {
        self.rows.lock().expect("sink rows lock").push(tuple);
        Ok(())
    }

    fn finish(&self, worker_id: usize) {
        self.finished_workers
            .lock()
            .expect("sink finished lock")
            .push(worker_id);
    }
}
