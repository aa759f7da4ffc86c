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
//! Row expression evaluation for target-list projection.

use crate::exec::tuple::{Datum, Tuple, TupleDescriptor};

/// Scalar expression over a single input tuple.
#[derive(Clone, Debug)]
pub enum Expr {
    ColumnRef(usize),
    Literal(Datum),
    Add(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
}

impl Expr {
    pub fn column(index: usize) -> Self {
        Expr::ColumnRef(index)
    }

    pub fn literal(value: Datum) -> Self {
        Expr::Literal(value)
    }

    pub fn eval(&self, tuple: &Tuple) -> Result<Datum, String> {
        match self {
            Expr::ColumnRef(index) => tuple
                .datum(*index)
                .cloned()
                .ok_or_else(|| format!("column ref {} out of range for tuple", index)),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Add(lhs, rhs) => {
                let l = lhs.eval(tuple)?;
                let r = rhs.eval(tuple)?;
                match (l, r) {
                    (Datum::Null, _) | (_, Datum::Null) => Ok(Datum::Null),
                    (Datum::Int64(a), Datum::Int64(b)) => Ok(Datum::Int64(a.wrapping_add(b))),
                    (Datum::Float64(a), Datum::Float64(b)) => Ok(Datum::Float64(a + b)),
                    (l, r) => Err(format!("cannot add {:?} and {:?}", l, r)),
                }
            }
            Expr::Eq(lhs, rhs) => {
                let l = lhs.eval(tuple)?;
                let r = rhs.eval(tuple)?;
                if l.is_null() || r.is_null() {
                    return Ok(Datum::Null);
                }
                Ok(Datum::Bool(l == r))
            }
            Expr::Not(inner) => match inner.eval(tuple)? {
                Datum::Null => Ok(Datum::Null),
                Datum::Bool(v) => Ok(Datum::Bool(!v)),
                other => Err(format!("NOT expects a boolean, got {:?}", other)),
            },
            Expr::IsNull(inner) => Ok(Datum::Bool(inner.eval(tuple)?.is_null())),
        }
    }
}

/// Target-list evaluator applied to every tuple leaving an operator.
#[derive(Clone, Debug)]
pub struct Projection {
    exprs: Vec<Expr>,
    descriptor: TupleDescriptor,
}

impl Projection {
    pub fn new(exprs: Vec<Expr>, descriptor: TupleDescriptor) -> Result<Self, String> {
        if exprs.len() != descriptor.num_columns() {
            return Err(format!(
                "projection has {} expressions but output descriptor has {} columns",
                exprs.len(),
                descriptor.num_columns()
            ));
        }
        Ok(Self { exprs, descriptor })
    }

    /// Pass-through projection: one column ref per descriptor column.
    pub fn identity(descriptor: TupleDescriptor) -> Self {
        let exprs = (0..descriptor.num_columns()).map(Expr::ColumnRef).collect();
        Self { exprs, descriptor }
    }

    pub fn output_descriptor(&self) -> &TupleDescriptor {
        &self.descriptor
    }

    pub fn project(&self, tuple: &Tuple) -> Result<Tuple, String> {
        let mut values = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            values.push(expr.eval(tuple)?);
        }
        Ok(Tuple::new(values))
    }
}
