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
//! Tuple queue transport between one worker and the leader.
//!
//! Responsibilities:
//! - Single-producer/single-consumer bounded queue of serialized tuples with
//!   end-of-stream and out-of-band error delivery.
//! - Arrow IPC (de)serialization at the endpoints, driven by the stream's
//!   tuple descriptor.
//!
//! Key exported interfaces:
//! - Functions: `tuple_queue`, `encode_tuple`, `decode_tuple`.
//! - Types: `TupleQueueSender`, `TupleQueueReader`, `SendStatus`.
//!
//! Every enqueue, the end-of-stream mark, and the error mark set the
//! consumer's latch, so a leader blocked in a latch wait observes queue
//! activity without polling.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Condvar, Mutex};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::DataType;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;

use crate::exec::tuple::{Datum, Tuple, TupleDescriptor};
use crate::runtime::latch::Latch;

enum QueueMessage {
    Tuple(Vec<u8>),
    Error(String),
}

struct QueueState {
    messages: VecDeque<QueueMessage>,
    finished: bool,
    detached: bool,
}

struct QueueShared {
    capacity: usize,
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    latch: Arc<Latch>,
}

/// Result of a non-error `send`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendStatus {
    Sent,
    /// The reader is gone; the producer should stop quietly.
    Detached,
}

/// Producing endpoint, owned by a worker thread.
pub struct TupleQueueSender {
    shared: Arc<QueueShared>,
    descriptor: TupleDescriptor,
}

impl TupleQueueSender {
    /// Serialize and enqueue one tuple. Blocks while the queue is full.
    pub fn send(&self, tuple: &Tuple) -> Result<SendStatus, String> {
        let bytes = encode_tuple(&self.descriptor, tuple)?;
        let mut state = self.shared.state.lock().expect("tuple queue lock");
        loop {
            if state.detached {
                return Ok(SendStatus::Detached);
            }
            if state.messages.len() < self.shared.capacity {
                break;
            }
            state = self
                .shared
                .not_full
                .wait(state)
                .expect("tuple queue condvar wait");
        }
        state.messages.push_back(QueueMessage::Tuple(bytes));
        self.shared.not_empty.notify_one();
        drop(state);
        self.shared.latch.set();
        Ok(SendStatus::Sent)
    }

    /// Ship a worker-side failure out-of-band. Skips the capacity limit so
    /// the failure is not lost behind a full queue.
    pub fn send_error(&self, message: String) {
        let mut state = self.shared.state.lock().expect("tuple queue lock");
        if state.detached {
            return;
        }
        state.messages.push_back(QueueMessage::Error(message));
        self.shared.not_empty.notify_one();
        drop(state);
        self.shared.latch.set();
    }

    /// Mark end-of-stream. Idempotent; also run by drop.
    pub fn finish(&self) {
        let mut state = self.shared.state.lock().expect("tuple queue lock");
        if !state.finished {
            state.finished = true;
            self.shared.not_empty.notify_all();
        }
        drop(state);
        self.shared.latch.set();
    }
}

impl Drop for TupleQueueSender {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Consuming endpoint, owned by the leader.
///
/// Dropping the reader detaches the queue: buffered tuples are discarded and
/// a producer blocked on a full queue is released.
pub struct TupleQueueReader {
    shared: Arc<QueueShared>,
    descriptor: TupleDescriptor,
}

impl TupleQueueReader {
    /// Read one tuple.
    ///
    /// Returns `(Some(tuple), false)` when a tuple is available,
    /// `(None, true)` once the producer finished and the queue is drained,
    /// and — with `nowait` — `(None, false)` immediately when the queue is
    /// empty but still open. A worker-shipped error surfaces as `Err`.
    pub fn read(&mut self, nowait: bool) -> Result<(Option<Tuple>, bool), String> {
        let mut state = self.shared.state.lock().expect("tuple queue lock");
        loop {
            if let Some(message) = state.messages.pop_front() {
                self.shared.not_full.notify_one();
                drop(state);
                return match message {
                    QueueMessage::Tuple(bytes) => {
                        decode_tuple(&self.descriptor, &bytes).map(|t| (Some(t), false))
                    }
                    QueueMessage::Error(message) => Err(message),
                };
            }
            if state.finished {
                return Ok((None, true));
            }
            if nowait {
                return Ok((None, false));
            }
            state = self
                .shared
                .not_empty
                .wait(state)
                .expect("tuple queue condvar wait");
        }
    }

    pub fn descriptor(&self) -> &TupleDescriptor {
        &self.descriptor
    }
}

impl Drop for TupleQueueReader {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().expect("tuple queue lock");
        state.detached = true;
        state.messages.clear();
        self.shared.not_full.notify_all();
    }
}

/// Build a queue pair. The latch belongs to the consumer side and is set on
/// every state change a reader could be waiting for.
pub fn tuple_queue(
    capacity: usize,
    descriptor: TupleDescriptor,
    latch: Arc<Latch>,
) -> (TupleQueueSender, TupleQueueReader) {
    let shared = Arc::new(QueueShared {
        capacity: capacity.max(1),
        state: Mutex::new(QueueState {
            messages: VecDeque::new(),
            finished: false,
            detached: false,
        }),
        not_full: Condvar::new(),
        not_empty: Condvar::new(),
        latch,
    });
    (
        TupleQueueSender {
            shared: Arc::clone(&shared),
            descriptor: descriptor.clone(),
        },
        TupleQueueReader { shared, descriptor },
    )
}

/// Encode one tuple as an Arrow IPC stream holding a single one-row batch.
pub fn encode_tuple(descriptor: &TupleDescriptor, tuple: &Tuple) -> Result<Vec<u8>, String> {
    descriptor.validate(tuple)?;
    let schema = descriptor.schema();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for (idx, field) in schema.fields().iter().enumerate() {
        let datum = tuple.datum(idx).expect("arity validated");
        columns.push(datum_to_array(field.data_type(), datum)?);
    }
    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)
        .map_err(|e| format!("failed to build tuple batch: {e}"))?;

    let mut buffer = Vec::new();
    let mut writer = StreamWriter::try_new(&mut buffer, schema.as_ref())
        .map_err(|e| format!("failed to create tuple IPC writer: {e}"))?;
    writer
        .write(&batch)
        .map_err(|e| format!("failed to write tuple batch: {e}"))?;
    writer
        .finish()
        .map_err(|e| format!("failed to finish tuple IPC writer: {e}"))?;
    Ok(buffer)
}

/// Decode a tuple previously produced by `encode_tuple`.
pub fn decode_tuple(descriptor: &TupleDescriptor, bytes: &[u8]) -> Result<Tuple, String> {
    let cursor = Cursor::new(bytes);
    let mut reader = StreamReader::try_new(cursor, None)
        .map_err(|e| format!("failed to create tuple IPC reader: {e}"))?;
    let batch = reader
        .next()
        .ok_or_else(|| "tuple payload holds no record batch".to_string())?
        .map_err(|e| format!("failed to read tuple batch: {e}"))?;
    if batch.num_rows() != 1 {
        return Err(format!(
            "tuple payload holds {} rows, expected exactly 1",
            batch.num_rows()
        ));
    }
    let schema = descriptor.schema();
    if batch.schema().as_ref() != schema.as_ref() {
        return Err(format!(
            "tuple payload schema mismatch: expected={:?} actual={:?}",
            schema,
            batch.schema()
        ));
    }
    let mut values = Vec::with_capacity(batch.num_columns());
    for (idx, field) in schema.fields().iter().enumerate() {
        values.push(array_to_datum(field.data_type(), batch.column(idx))?);
    }
    Ok(Tuple::new(values))
}

fn datum_to_array(data_type: &DataType, datum: &Datum) -> Result<ArrayRef, String> {
    fn mismatch(datum: &Datum, data_type: &DataType) -> String {
        format!("datum {:?} does not fit column type {:?}", datum, data_type)
    }

    let array: ArrayRef = match data_type {
        DataType::Boolean => {
            let value = match datum {
                Datum::Null => None,
                Datum::Bool(v) => Some(*v),
                other => return Err(mismatch(other, data_type)),
            };
            Arc::new(BooleanArray::from(vec![value]))
        }
        DataType::Int64 => {
            let value = match datum {
                Datum::Null => None,
                Datum::Int64(v) => Some(*v),
                other => return Err(mismatch(other, data_type)),
            };
            Arc::new(Int64Array::from(vec![value]))
        }
        DataType::Float64 => {
            let value = match datum {
                Datum::Null => None,
                Datum::Float64(v) => Some(*v),
                other => return Err(mismatch(other, data_type)),
            };
            Arc::new(Float64Array::from(vec![value]))
        }
        DataType::Utf8 => {
            let value = match datum {
                Datum::Null => None,
                Datum::Utf8(v) => Some(v.clone()),
                other => return Err(mismatch(other, data_type)),
            };
            Arc::new(StringArray::from(vec![value]))
        }
        other => {
            return Err(format!(
                "unsupported column type {:?} in tuple queue",
                other
            ));
        }
    };
    Ok(array)
}

fn array_to_datum(data_type: &DataType, array: &ArrayRef) -> Result<Datum, String> {
    fn downcast<'a, T: 'static>(array: &'a ArrayRef, data_type: &DataType) -> Result<&'a T, String> {
        array.as_any().downcast_ref::<T>().ok_or_else(|| {
            format!(
                "tuple column does not match descriptor type {:?}",
                data_type
            )
        })
    }

    if array.is_null(0) {
        return Ok(Datum::Null);
    }
    let datum = match data_type {
        DataType::Boolean => Datum::Bool(downcast::<BooleanArray>(array, data_type)?.value(0)),
        DataType::Int64 => Datum::Int64(downcast::<Int64Array>(array, data_type)?.value(0)),
        DataType::Float64 => Datum::Float64(downcast::<Float64Array>(array, data_type)?.value(0)),
        DataType::Utf8 => Datum::Utf8(
            downcast::<StringArray>(array, data_type)?
                .value(0)
                .to_string(),
        ),
        other => {
            return Err(format!(
                "unsupported column type {:?} in tuple queue",
                other
            ));
        }
    };
    Ok(datum)
}
