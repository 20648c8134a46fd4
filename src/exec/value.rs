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
//! Logical column types and owned scalar values.
//!
//! The engine works with six primitive column types backed by Arrow arrays
//! with null bitmaps. [`Value`] is the owned scalar used for group-key
//! constants and join-key tuples; dispatch on it happens in a single match
//! per call site rather than through per-column vtables.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, TimeUnit};

use crate::common::error::{EngineError, Result};
use crate::exec::hash::{
    canonical_f64_bits, combine_hash, hash_bytes_with_seed, hash_null_with_seed,
    hash_u64_with_seed,
};

/// Runtime tag of a column.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ColumnType {
    Time,
    Int,
    UInt,
    Float,
    Bool,
    String,
}

impl ColumnType {
    /// The Arrow physical type backing this logical type.
    pub fn arrow_type(self) -> DataType {
        match self {
            ColumnType::Time => DataType::Timestamp(TimeUnit::Nanosecond, None),
            ColumnType::Int => DataType::Int64,
            ColumnType::UInt => DataType::UInt64,
            ColumnType::Float => DataType::Float64,
            ColumnType::Bool => DataType::Boolean,
            ColumnType::String => DataType::Utf8,
        }
    }

    pub fn from_arrow(data_type: &DataType) -> Result<Self> {
        match data_type {
            DataType::Timestamp(TimeUnit::Nanosecond, None) => Ok(ColumnType::Time),
            DataType::Int64 => Ok(ColumnType::Int),
            DataType::UInt64 => Ok(ColumnType::UInt),
            DataType::Float64 => Ok(ColumnType::Float),
            DataType::Boolean => Ok(ColumnType::Bool),
            DataType::Utf8 => Ok(ColumnType::String),
            other => Err(EngineError::invalid(format!(
                "unsupported arrow column type {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Time => "time",
            ColumnType::Int => "int",
            ColumnType::UInt => "uint",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::String => "string",
        };
        f.write_str(name)
    }
}

/// Owned scalar value of one of the six primitive column types, or null.
///
/// Equality is bit-exact for floats (NaN compares equal to NaN, and +0.0
/// differs from -0.0) so that equality stays consistent with hashing.
/// `Null == Null` holds here; join matching and output-key merging apply
/// their own null-rejecting comparison via [`Value::eq_non_null`].
#[derive(Clone, Debug)]
pub enum Value {
    Time(i64),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
    Null,
}

impl Value {
    pub fn str(value: impl Into<Arc<str>>) -> Self {
        Value::Str(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type of a non-null value; `None` for null.
    pub fn value_type(&self) -> Option<ColumnType> {
        match self {
            Value::Time(_) => Some(ColumnType::Time),
            Value::Int(_) => Some(ColumnType::Int),
            Value::UInt(_) => Some(ColumnType::UInt),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Str(_) => Some(ColumnType::String),
            Value::Null => None,
        }
    }

    /// Whether this value can be stored in a column of `column_type`.
    /// Null is storable in any column.
    pub fn matches_type(&self, column_type: ColumnType) -> bool {
        match self.value_type() {
            Some(t) => t == column_type,
            None => true,
        }
    }

    /// Null-rejecting equality: false whenever either side is null.
    pub fn eq_non_null(&self, other: &Value) -> bool {
        !self.is_null() && !other.is_null() && self == other
    }

    pub fn hash_with_seed(&self, seed: u64) -> u64 {
        match self {
            Value::Time(v) => hash_u64_with_seed(seed, *v as u64),
            Value::Int(v) => hash_u64_with_seed(seed, *v as u64),
            Value::UInt(v) => hash_u64_with_seed(seed, *v),
            Value::Float(v) => hash_u64_with_seed(seed, canonical_f64_bits(*v)),
            Value::Bool(v) => hash_u64_with_seed(seed, *v as u64),
            Value::Str(v) => hash_bytes_with_seed(seed, v.as_bytes()),
            Value::Null => hash_null_with_seed(seed),
        }
    }
}

/// Seeded hash of an ordered value tuple.
pub(crate) fn hash_values(seed: u64, values: &[Value]) -> u64 {
    let mut acc = seed;
    for value in values {
        acc = combine_hash(acc, value.hash_with_seed(seed));
    }
    acc
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => canonical_f64_bits(*a) == canonical_f64_bits(*b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Time(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "\"{}\"", v),
            Value::Null => f.write_str("null"),
        }
    }
}
