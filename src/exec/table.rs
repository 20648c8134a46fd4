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
//! Immutable columnar tables tagged with a group key.
//!
//! A table is an ordered set of equal-length Arrow columns. Construction is
//! strict: labels must be unique, array types must match the declared
//! column types, and every group-key column must be present and constant at
//! the key's value across all rows.

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayBuilder, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder,
    Int64Array, Int64Builder, StringArray, StringBuilder, TimestampNanosecondArray,
    TimestampNanosecondBuilder, UInt64Array, UInt64Builder,
};

use crate::common::error::{EngineError, Result};
use crate::exec::group_key::GroupKey;
use crate::exec::value::{ColumnType, Value};

/// Label and type of one column.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ColMeta {
    pub label: String,
    pub value_type: ColumnType,
}

impl ColMeta {
    pub fn new(label: impl Into<String>, value_type: ColumnType) -> Self {
        Self {
            label: label.into(),
            value_type,
        }
    }
}

impl fmt::Display for ColMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.value_type)
    }
}

/// Schema sorted by label, for order-independent comparison across sides.
pub(crate) fn canonical_schema(schema: &[ColMeta]) -> Vec<ColMeta> {
    let mut out = schema.to_vec();
    out.sort_by(|a, b| a.label.cmp(&b.label));
    out
}

#[derive(Clone, Debug)]
pub struct Table {
    schema: Vec<ColMeta>,
    columns: Vec<ArrayRef>,
    key: GroupKey,
}

impl Table {
    pub fn try_new(schema: Vec<ColMeta>, columns: Vec<ArrayRef>, key: GroupKey) -> Result<Self> {
        if schema.len() != columns.len() {
            return Err(EngineError::invalid(format!(
                "table has {} column labels but {} arrays",
                schema.len(),
                columns.len()
            )));
        }
        for (idx, meta) in schema.iter().enumerate() {
            if schema[..idx].iter().any(|m| m.label == meta.label) {
                return Err(EngineError::invalid(format!(
                    "duplicate column label \"{}\"",
                    meta.label
                )));
            }
            let array = &columns[idx];
            if ColumnType::from_arrow(array.data_type())? != meta.value_type {
                return Err(EngineError::invalid(format!(
                    "column \"{}\" declared as {} but backed by {:?}",
                    meta.label,
                    meta.value_type,
                    array.data_type()
                )));
            }
            if array.len() != columns[0].len() {
                return Err(EngineError::invalid(format!(
                    "column \"{}\" has {} rows, expected {}",
                    meta.label,
                    array.len(),
                    columns[0].len()
                )));
            }
        }
        let table = Self {
            schema,
            columns,
            key,
        };
        table.check_key_constancy()?;
        Ok(table)
    }

    fn check_key_constancy(&self) -> Result<()> {
        for (meta, value) in self.key.pairs() {
            let idx = self.column_index(&meta.label).ok_or_else(|| {
                EngineError::invalid(format!(
                    "group key column \"{}\" is missing from the table",
                    meta.label
                ))
            })?;
            let col = &self.schema[idx];
            if col.value_type != meta.value_type {
                return Err(EngineError::invalid(format!(
                    "group key column \"{}\" is {} but the table column is {}",
                    meta.label, meta.value_type, col.value_type
                )));
            }
            let array = &self.columns[idx];
            for row in 0..array.len() {
                let got = value_at(array, col.value_type, row)?;
                if &got != value {
                    return Err(EngineError::invalid(format!(
                        "group key column \"{}\" expected constant {} but row {} holds {}",
                        meta.label, value, row, got
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn schema(&self) -> &[ColMeta] {
        &self.schema
    }

    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.schema.iter().position(|m| m.label == label)
    }

    pub fn column_by_label(&self, label: &str) -> Option<(&ColMeta, &ArrayRef)> {
        self.column_index(label)
            .map(|idx| (&self.schema[idx], &self.columns[idx]))
    }

    pub fn value_at(&self, column: usize, row: usize) -> Result<Value> {
        let meta = self.schema.get(column).ok_or_else(|| {
            EngineError::internal(format!("column index {} out of bounds", column))
        })?;
        value_at(&self.columns[column], meta.value_type, row)
    }
}

/// Read one scalar out of an array, dispatching on the logical type tag.
pub(crate) fn value_at(array: &ArrayRef, value_type: ColumnType, row: usize) -> Result<Value> {
    if row >= array.len() {
        return Err(EngineError::internal(format!(
            "row {} out of bounds for column of {} rows",
            row,
            array.len()
        )));
    }
    if array.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match value_type {
        ColumnType::Time => {
            let arr = downcast::<TimestampNanosecondArray>(array, value_type)?;
            Value::Time(arr.value(row))
        }
        ColumnType::Int => {
            let arr = downcast::<Int64Array>(array, value_type)?;
            Value::Int(arr.value(row))
        }
        ColumnType::UInt => {
            let arr = downcast::<UInt64Array>(array, value_type)?;
            Value::UInt(arr.value(row))
        }
        ColumnType::Float => {
            let arr = downcast::<Float64Array>(array, value_type)?;
            Value::Float(arr.value(row))
        }
        ColumnType::Bool => {
            let arr = downcast::<BooleanArray>(array, value_type)?;
            Value::Bool(arr.value(row))
        }
        ColumnType::String => {
            let arr = downcast::<StringArray>(array, value_type)?;
            Value::str(arr.value(row))
        }
    };
    Ok(value)
}

fn downcast<T: Array + 'static>(array: &ArrayRef, value_type: ColumnType) -> Result<&T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        EngineError::internal(format!(
            "column tagged {} is backed by {:?}",
            value_type,
            array.data_type()
        ))
    })
}

/// Single-column builder dispatching on the runtime type tag.
pub enum ColumnBuilder {
    Time(TimestampNanosecondBuilder),
    Int(Int64Builder),
    UInt(UInt64Builder),
    Float(Float64Builder),
    Bool(BooleanBuilder),
    String(StringBuilder),
}

impl ColumnBuilder {
    pub fn new(value_type: ColumnType, capacity: usize) -> Self {
        match value_type {
            ColumnType::Time => {
                ColumnBuilder::Time(TimestampNanosecondBuilder::with_capacity(capacity))
            }
            ColumnType::Int => ColumnBuilder::Int(Int64Builder::with_capacity(capacity)),
            ColumnType::UInt => ColumnBuilder::UInt(UInt64Builder::with_capacity(capacity)),
            ColumnType::Float => ColumnBuilder::Float(Float64Builder::with_capacity(capacity)),
            ColumnType::Bool => ColumnBuilder::Bool(BooleanBuilder::with_capacity(capacity)),
            ColumnType::String => {
                ColumnBuilder::String(StringBuilder::with_capacity(capacity, capacity * 8))
            }
        }
    }

    pub fn value_type(&self) -> ColumnType {
        match self {
            ColumnBuilder::Time(_) => ColumnType::Time,
            ColumnBuilder::Int(_) => ColumnType::Int,
            ColumnBuilder::UInt(_) => ColumnType::UInt,
            ColumnBuilder::Float(_) => ColumnType::Float,
            ColumnBuilder::Bool(_) => ColumnType::Bool,
            ColumnBuilder::String(_) => ColumnType::String,
        }
    }

    pub fn append(&mut self, value: &Value) -> Result<()> {
        match (self, value) {
            (ColumnBuilder::Time(b), Value::Time(v)) => b.append_value(*v),
            (ColumnBuilder::Time(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Int(b), Value::Int(v)) => b.append_value(*v),
            (ColumnBuilder::Int(b), Value::Null) => b.append_null(),
            (ColumnBuilder::UInt(b), Value::UInt(v)) => b.append_value(*v),
            (ColumnBuilder::UInt(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Float(b), Value::Float(v)) => b.append_value(*v),
            (ColumnBuilder::Float(b), Value::Null) => b.append_null(),
            (ColumnBuilder::Bool(b), Value::Bool(v)) => b.append_value(*v),
            (ColumnBuilder::Bool(b), Value::Null) => b.append_null(),
            (ColumnBuilder::String(b), Value::Str(v)) => b.append_value(v.as_ref()),
            (ColumnBuilder::String(b), Value::Null) => b.append_null(),
            (builder, value) => {
                return Err(EngineError::invalid(format!(
                    "cannot append {} to a {} column",
                    value,
                    builder.value_type()
                )));
            }
        }
        Ok(())
    }

    /// Copy one cell from an existing array of the same logical type.
    pub fn append_from(&mut self, array: &ArrayRef, row: usize) -> Result<()> {
        let value = value_at(array, self.value_type(), row)?;
        self.append(&value)
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnBuilder::Time(b) => b.len(),
            ColumnBuilder::Int(b) => b.len(),
            ColumnBuilder::UInt(b) => b.len(),
            ColumnBuilder::Float(b) => b.len(),
            ColumnBuilder::Bool(b) => b.len(),
            ColumnBuilder::String(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Time(b) => Arc::new(b.finish()),
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::UInt(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::String(b) => Arc::new(b.finish()),
        }
    }
}

/// Row-at-a-time table construction, mainly for sources and tests.
pub struct TableBuilder {
    schema: Vec<ColMeta>,
    key: GroupKey,
    builders: Vec<ColumnBuilder>,
}

impl TableBuilder {
    pub fn new(schema: Vec<ColMeta>, key: GroupKey) -> Self {
        let builders = schema
            .iter()
            .map(|m| ColumnBuilder::new(m.value_type, 0))
            .collect();
        Self {
            schema,
            key,
            builders,
        }
    }

    pub fn append_row(&mut self, row: &[Value]) -> Result<()> {
        if row.len() != self.builders.len() {
            return Err(EngineError::invalid(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.builders.len()
            )));
        }
        for (builder, value) in self.builders.iter_mut().zip(row) {
            builder.append(value)?;
        }
        Ok(())
    }

    pub fn build(mut self) -> Result<Table> {
        let columns = self.builders.iter_mut().map(|b| b.finish()).collect();
        Table::try_new(self.schema, columns, self.key)
    }
}
