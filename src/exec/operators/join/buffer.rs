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
//! Buffered input rows, held per (side, input group key) until matching.
//!
//! Buffers are append-only: each arriving table lands in the buffer with the
//! same group key, identified by seeded canonical key hash with an equality
//! check on collision. Every appended byte is accounted against the injected
//! memory tracker and released when the buffer is dropped.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use hashbrown::HashMap;

use super::Side;
use crate::common::error::{EngineError, Result};
use crate::exec::group_key::GroupKey;
use crate::exec::table::{ColMeta, ColumnBuilder, Table, canonical_schema};
use crate::runtime::mem_tracker::MemTracker;

/// Accumulating column storage for one input bucket.
pub(crate) struct RowBuffer {
    key: GroupKey,
    schema: Vec<ColMeta>,
    builders: Vec<ColumnBuilder>,
    rows: usize,
    tracker: Arc<MemTracker>,
    accounted: i64,
}

impl RowBuffer {
    fn new(key: GroupKey, schema: Vec<ColMeta>, tracker: Arc<MemTracker>) -> Self {
        let builders = schema
            .iter()
            .map(|m| ColumnBuilder::new(m.value_type, 0))
            .collect();
        Self {
            key,
            schema,
            builders,
            rows: 0,
            tracker,
            accounted: 0,
        }
    }

    pub(crate) fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Append all rows of `table`. The table's schema must match the
    /// buffer's schema up to column order; widening an existing bucket is a
    /// runtime schema violation.
    fn append_table(&mut self, table: &Table) -> Result<()> {
        if canonical_schema(table.schema()) != canonical_schema(&self.schema) {
            return Err(EngineError::failed_precondition(format!(
                "table with group key {} does not match the schema already buffered for that key",
                table.key()
            )));
        }

        let bytes: i64 = table
            .columns()
            .iter()
            .map(|c| i64::try_from(c.get_array_memory_size()).unwrap_or(i64::MAX))
            .sum();
        self.tracker.try_consume(bytes)?;
        self.accounted += bytes;

        for (meta, builder) in self.schema.iter().zip(self.builders.iter_mut()) {
            // Presence is guaranteed by the schema comparison above.
            let (_, array) = table.column_by_label(&meta.label).ok_or_else(|| {
                EngineError::internal(format!("buffered column \"{}\" vanished", meta.label))
            })?;
            for row in 0..array.len() {
                builder.append_from(array, row)?;
            }
        }
        self.rows += table.num_rows();
        Ok(())
    }

    fn finish(mut self) -> FrozenBuffer {
        let columns = self.builders.iter_mut().map(|b| b.finish()).collect();
        let frozen = FrozenBuffer {
            key: std::mem::replace(&mut self.key, GroupKey::empty()),
            schema: std::mem::take(&mut self.schema),
            columns,
            rows: self.rows,
            tracker: Arc::clone(&self.tracker),
            accounted: self.accounted,
        };
        // Accounting moved to the frozen buffer.
        self.accounted = 0;
        frozen
    }
}

impl Drop for RowBuffer {
    fn drop(&mut self) {
        self.tracker.release(self.accounted);
    }
}

/// An input bucket whose columns have been materialized for matching.
pub(crate) struct FrozenBuffer {
    key: GroupKey,
    schema: Vec<ColMeta>,
    columns: Vec<ArrayRef>,
    rows: usize,
    tracker: Arc<MemTracker>,
    accounted: i64,
}

impl FrozenBuffer {
    pub(crate) fn key(&self) -> &GroupKey {
        &self.key
    }

    pub(crate) fn schema(&self) -> &[ColMeta] {
        &self.schema
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn column_index(&self, label: &str) -> Option<usize> {
        self.schema.iter().position(|m| m.label == label)
    }

    pub(crate) fn column_by_label(&self, label: &str) -> Option<(&ColMeta, &ArrayRef)> {
        self.column_index(label)
            .map(|idx| (&self.schema[idx], &self.columns[idx]))
    }
}

impl Drop for FrozenBuffer {
    fn drop(&mut self) {
        self.tracker.release(self.accounted);
    }
}

struct SideStore {
    // Canonical key hash -> buffer slots, equality-checked on collision.
    index: HashMap<u64, Vec<usize>>,
    buffers: Vec<RowBuffer>,
}

impl SideStore {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            buffers: Vec::new(),
        }
    }
}

/// All buffered input for one join, both sides.
pub(crate) struct RowBufferStore {
    seed: u64,
    tracker: Arc<MemTracker>,
    sides: [SideStore; 2],
}

impl RowBufferStore {
    pub(crate) fn new(seed: u64, tracker: Arc<MemTracker>) -> Self {
        Self {
            seed,
            tracker,
            sides: [SideStore::new(), SideStore::new()],
        }
    }

    /// Route `table` into the buffer for `(side, table.key())`, creating the
    /// buffer on first sight of the key.
    pub(crate) fn insert(&mut self, side: Side, table: &Table) -> Result<()> {
        let hash = table.key().canonical_hash(self.seed);
        let store = &mut self.sides[side.index()];
        let slots = store.index.entry(hash).or_default();
        for slot in slots.iter() {
            if store.buffers[*slot].key() == table.key() {
                return store.buffers[*slot].append_table(table);
            }
        }
        let mut buffer = RowBuffer::new(
            table.key().clone(),
            table.schema().to_vec(),
            Arc::clone(&self.tracker),
        );
        buffer.append_table(table)?;
        slots.push(store.buffers.len());
        store.buffers.push(buffer);
        Ok(())
    }

    pub(crate) fn bucket_count(&self, side: Side) -> usize {
        self.sides[side.index()].buffers.len()
    }

    /// Materialize and hand out all buckets of one side, in the order their
    /// keys were first seen.
    pub(crate) fn drain_side(&mut self, side: Side) -> Vec<FrozenBuffer> {
        let store = std::mem::replace(&mut self.sides[side.index()], SideStore::new());
        store.buffers.into_iter().map(RowBuffer::finish).collect()
    }
}
