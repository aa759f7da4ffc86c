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
//! Row model shared by executors and the tuple queue transport.
//!
//! Responsibilities:
//! - Defines `Datum`/`Tuple`, the row representation funneled between workers
//!   and the leader.
//! - Defines `TupleDescriptor`, an Arrow-schema-backed column layout used for
//!   validation and for queue (de)serialization.
//! - Defines `TupleSlot`, the reusable single-tuple holder on the leader side.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

/// A single scalar value inside a tuple.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Whether this datum can be stored in a column of the given Arrow type.
    pub fn fits(&self, data_type: &DataType) -> bool {
        match self {
            Datum::Null => true,
            Datum::Bool(_) => *data_type == DataType::Boolean,
            Datum::Int64(_) => *data_type == DataType::Int64,
            Datum::Float64(_) => *data_type == DataType::Float64,
            Datum::Utf8(_) => *data_type == DataType::Utf8,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Utf8(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(v) => write!(f, "{v}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::Float64(v) => write!(f, "{v}"),
            Datum::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// One row of datums, in descriptor column order.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    values: Vec<Datum>,
}

impl Tuple {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn datum(&self, index: usize) -> Option<&Datum> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Datum> {
        self.values
    }
}

/// Column layout of a tuple stream.
///
/// Wraps an Arrow schema so the same descriptor drives validation on the
/// executor side and IPC (de)serialization on the queue side.
#[derive(Clone, Debug)]
pub struct TupleDescriptor {
    schema: SchemaRef,
}

impl TupleDescriptor {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    pub fn from_fields(fields: Vec<Field>) -> Self {
        Self {
            schema: Arc::new(Schema::new(fields)),
        }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.index_of(name).ok()
    }

    pub fn field(&self, index: usize) -> Result<&Field, String> {
        self.schema
            .fields()
            .get(index)
            .map(|f| f.as_ref())
            .ok_or_else(|| {
                format!(
                    "column index {} out of range (num_columns={})",
                    index,
                    self.num_columns()
                )
            })
    }

    /// Check a tuple against the descriptor: arity, column types, nullability.
    pub fn validate(&self, tuple: &Tuple) -> Result<(), String> {
        if tuple.len() != self.num_columns() {
            return Err(format!(
                "tuple arity mismatch: descriptor has {} columns, tuple has {}",
                self.num_columns(),
                tuple.len()
            ));
        }
        for (idx, field) in self.schema.fields().iter().enumerate() {
            let datum = tuple.datum(idx).expect("arity checked");
            if datum.is_null() {
                if !field.is_nullable() {
                    return Err(format!(
                        "null value in non-nullable column `{}`",
                        field.name()
                    ));
                }
                continue;
            }
            if !datum.fits(field.data_type()) {
                return Err(format!(
                    "datum {:?} does not fit column `{}` of type {:?}",
                    datum,
                    field.name(),
                    field.data_type()
                ));
            }
        }
        Ok(())
    }
}

impl PartialEq for TupleDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.schema.as_ref() == other.schema.as_ref()
    }
}

/// Reusable single-tuple holder.
///
/// The gather operator materializes each worker-sourced tuple here before
/// projection, and clears it at the top of every call so nothing from the
/// previous cycle stays alive across a cancellation point.
#[derive(Debug, Default)]
pub struct TupleSlot {
    tuple: Option<Tuple>,
}

impl TupleSlot {
    pub fn new() -> Self {
        Self { tuple: None }
    }

    pub fn store(&mut self, tuple: Tuple) {
        self.tuple = Some(tuple);
    }

    pub fn take(&mut self) -> Option<Tuple> {
        self.tuple.take()
    }

    pub fn clear(&mut self) {
        self.tuple = None;
    }

    pub fn is_empty(&self) -> bool {
        self.tuple.is_none()
    }
}
