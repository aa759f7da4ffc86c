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
//! Integration tests for runtime components (worker harness, slot pool,
//! configuration).

use std::sync::Arc;

use rowfunnel::rowfunnel_config::RowfunnelConfig;
use rowfunnel::runtime::parallel::{ParallelExecContext, WorkerSlotPool};
use rowfunnel::runtime::tqueue::TupleQueueReader;
use rowfunnel::{ExecContext, WorkerSlice};

use crate::common::{int_values, tuple_int};

mod common;

fn drain_reader(reader: &mut TupleQueueReader) -> Vec<i64> {
    let mut out = Vec::new();
    loop {
        let (tuple, done) = reader.read(false).expect("queue read");
        if let Some(tuple) = tuple {
            out.push(tuple_int(&tuple));
            continue;
        }
        if done {
            return out;
        }
    }
}

#[test]
fn harness_launches_at_most_the_available_slots() {
    let pool = Arc::new(WorkerSlotPool::new(1));
    let ctx = ExecContext::new(Arc::clone(&pool));
    let mut harness = ParallelExecContext::new(int_values(6), 3, 8);

    let launched = harness.launch(&ctx).expect("launch");
    assert_eq!(launched, 1);
    assert_eq!(pool.available(), 0);

    let mut readers = harness.take_readers();
    assert_eq!(readers.len(), 1);
    let got = drain_reader(&mut readers[0]);
    assert_eq!(got, (0..6).collect::<Vec<_>>());

    harness.finish().expect("finish");
    assert_eq!(harness.total_worker_stats().tuples, 6);
    assert_eq!(pool.available(), 1);
}

#[test]
fn harness_reinitialize_supports_a_second_launch() {
    let pool = Arc::new(WorkerSlotPool::new(2));
    let ctx = ExecContext::new(Arc::clone(&pool));
    let node = int_values(4);
    let mut harness = ParallelExecContext::new(Arc::clone(&node), 2, 8);

    let launched = harness.launch(&ctx).expect("launch");
    assert_eq!(launched, 2);
    let mut first = Vec::new();
    for reader in harness.take_readers().iter_mut() {
        first.extend(drain_reader(reader));
    }
    first.sort_unstable();
    assert_eq!(first, (0..4).collect::<Vec<_>>());
    harness.finish().expect("finish");

    harness.reinitialize();
    // Reset the shared scan state before the relaunch, as a rescan would.
    let mut local = node.build(WorkerSlice::leader()).expect("build");
    local.rescan().expect("rescan");

    let relaunched = harness.launch(&ctx).expect("relaunch");
    assert_eq!(relaunched, 2);
    let mut second = Vec::new();
    for reader in harness.take_readers().iter_mut() {
        second.extend(drain_reader(reader));
    }
    second.sort_unstable();
    assert_eq!(second, (0..4).collect::<Vec<_>>());
    harness.finish().expect("finish again");
    assert_eq!(pool.available(), 2);
}

#[test]
fn executor_done_terminates_workers_early() {
    let pool = Arc::new(WorkerSlotPool::new(1));
    let ctx = ExecContext::new(Arc::clone(&pool));
    // Tiny queue so the worker is paced by the reader.
    let mut harness = ParallelExecContext::new(int_values(100_000), 1, 2);

    harness.launch(&ctx).expect("launch");
    let mut readers = harness.take_readers();
    let reader = &mut readers[0];

    for _ in 0..4 {
        let (tuple, done) = reader.read(false).expect("queue read");
        assert!(tuple.is_some());
        assert!(!done);
    }
    harness.request_executor_done();
    let remaining = drain_reader(reader);
    harness.finish().expect("finish");

    let produced = harness.total_worker_stats().tuples;
    assert_eq!(produced, 4 + remaining.len() as u64);
    assert!(produced < 100_000, "worker should have stopped early");
    assert_eq!(pool.available(), 1);
}

#[test]
fn config_defaults_are_sane() {
    let cfg = RowfunnelConfig::default();
    assert_eq!(cfg.log_level, "info");
    assert!(cfg.log_filter.is_none());
    assert_eq!(cfg.runtime.max_parallel_workers, 8);
    assert_eq!(cfg.runtime.tuple_queue_capacity, 1024);
    assert!(!cfg.runtime.gather_statistics);
}

#[test]
fn config_loads_from_toml_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rowfunnel.toml");
    std::fs::write(
        &path,
        r#"
log_level = "debug"

[runtime]
max_parallel_workers = 3
tuple_queue_capacity = 64
gather_statistics = true
"#,
    )
    .expect("write config");

    let cfg = RowfunnelConfig::load_from_file(&path).expect("load config");
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.runtime.max_parallel_workers, 3);
    assert_eq!(cfg.runtime.tuple_queue_capacity, 64);
    assert!(cfg.runtime.gather_statistics);
}

#[test]
fn config_rejects_malformed_toml() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rowfunnel.toml");
    std::fs::write(&path, "runtime = 5").expect("write config");
    assert!(RowfunnelConfig::load_from_file(&path).is_err());
}
