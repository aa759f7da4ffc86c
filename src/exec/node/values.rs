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
//! VALUES leaf node: literal rows, parallel-aware.
//!
//! All executors built from one node share an atomic row cursor, so N
//! concurrent copies claim disjoint rows and together emit the rowset exactly
//! once. This is the dynamic-partitioning analog of a parallel table scan's
//! shared block counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::exec::node::{ExecResult, Executor, PlanNode, WorkerSlice};
use crate::exec::tuple::{Tuple, TupleDescriptor};
use crate::runtime::exec_context::ExecContext;

pub struct ValuesNode {
    descriptor: TupleDescriptor,
    rows: Arc<Vec<Tuple>>,
    cursor: Arc<AtomicUsize>,
}

impl ValuesNode {
    pub fn new(descriptor: TupleDescriptor, rows: Vec<Tuple>) -> Result<Self, String> {
        for row in &rows {
            descriptor.validate(row)?;
        }
        Ok(Self {
            descriptor,
            rows: Arc::new(rows),
            cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl PlanNode for ValuesNode {
    fn name(&self) -> &str {
        "Values"
    }

    fn output_descriptor(&self) -> TupleDescriptor {
        self.descriptor.clone()
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn build(&self, _slice: WorkerSlice) -> Result<Box<dyn Executor>, String> {
        Ok(Box::new(ValuesExec {
            rows: Arc::clone(&self.rows),
            cursor: Arc::clone(&self.cursor),
        }))
    }
}

struct ValuesExec {
    rows: Arc<Vec<Tuple>>,
    cursor: Arc<AtomicUsize>,
}

impl Executor for ValuesExec {
    fn next_tuple(&mut self, ctx: &ExecContext) -> ExecResult {
        ctx.check_interrupts()?;
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        if idx >= self.rows.len() {
            return Ok(None);
        }
        Ok(Some(self.rows[idx].clone()))
    }

    fn rescan(&mut self) -> Result<(), String> {
        // Shared state reset; idempotent across the copies that share it.
        self.cursor.store(0, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::tuple::Datum;
    use arrow::datatypes::{DataType, Field};

    fn int_node(n: i64) -> ValuesNode {
        let descriptor =
            TupleDescriptor::from_fields(vec![Field::new("v", DataType::Int64, false)]);
        let rows = (0..n).map(|v| Tuple::new(vec![Datum::Int64(v)])).collect();
        ValuesNode::new(descriptor, rows).expect("valid rows")
    }

    fn drain(exec: &mut Box<dyn Executor>, ctx: &ExecContext) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(t) = exec.next_tuple(ctx).expect("next_tuple") {
            out.push(t.datum(0).and_then(Datum::as_i64).expect("int column"));
        }
        out
    }

    #[test]
    fn rejects_rows_that_do_not_match_descriptor() {
        let descriptor =
            TupleDescriptor::from_fields(vec![Field::new("v", DataType::Int64, false)]);
        let rows = vec![Tuple::new(vec![Datum::Utf8("bad".to_string())])];
        assert!(ValuesNode::new(descriptor, rows).is_err());
    }

    #[test]
    fn copies_partition_the_rowset() {
        let ctx = ExecContext::for_test();
        let node = int_node(10);
        let mut a = node.build(WorkerSlice::new(0, 2)).unwrap();
        let mut b = node.build(WorkerSlice::new(1, 2)).unwrap();

        let mut seen = Vec::new();
        // Interleave the two copies; every row must come out exactly once.
        loop {
            let ta = a.next_tuple(&ctx).unwrap();
            let tb = b.next_tuple(&ctx).unwrap();
            if ta.is_none() && tb.is_none() {
                break;
            }
            for t in [ta, tb].into_iter().flatten() {
                seen.push(t.datum(0).and_then(Datum::as_i64).unwrap());
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn rescan_resets_the_shared_cursor() {
        let ctx = ExecContext::for_test();
        let node = int_node(3);
        let mut exec = node.build(WorkerSlice::leader()).unwrap();
        assert_eq!(drain(&mut exec, &ctx), vec![0, 1, 2]);
        assert_eq!(drain(&mut exec, &ctx), Vec::<i64>::new());
        exec.rescan().unwrap();
        assert_eq!(drain(&mut exec, &ctx), vec![0, 1, 2]);
    }
}
