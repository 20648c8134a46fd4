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
//! Inner merge-join executor.
//!
//! Responsibilities:
//! - Routes arriving tables into the per-side buffer store after validating
//!   the predicate columns.
//! - Once both parents finish, enumerates all bucket pairs, hash-joins each
//!   pair (index on the smaller side), and regroups the matched rows into
//!   output buckets addressed by output-group-key hash.
//! - Forwards the first observed error downstream and releases all buffered
//!   columns on any failure path.
//!
//! Delivery is serialized by the framework; all state is owned by the
//! transformation and mutated without locking.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::compute::{concat, take};

use super::buffer::{FrozenBuffer, RowBufferStore};
use super::hash_table::JoinKeyIndex;
use super::output_plan::OutputPlan;
use super::{JoinProcedureSpec, Side};
use crate::common::error::{EngineError, Result};
use crate::common::ids::DatasetId;
use crate::common::logging::{debug, warn};
use crate::exec::group_key::GroupKey;
use crate::exec::table::{ColMeta, Table, value_at};
use crate::exec::transformation::{DataSink, Transformation};
use crate::exec::value::{ColumnType, Value};
use crate::runtime::mem_tracker::MemTracker;

/// Streaming inner equijoin across two grouped table streams.
///
/// Input tables are buffered per (side, input group key). Matching is
/// deferred until both parents deliver finish, which is the earliest point
/// at which no further table can affect an output bucket for finite
/// streams.
pub struct MergeJoinTransformation {
    on: Vec<String>,
    parents: [DatasetId; 2],
    sink: Box<dyn DataSink>,
    store: Option<RowBufferStore>,
    // Child tracker shared by the buffer store and the per-pair key indexes.
    tracker: Arc<MemTracker>,
    seed: u64,
    // Predicate column types observed per side, for intra-side consistency.
    on_types: [HashMap<String, ColumnType>; 2],
    finished: [bool; 2],
    watermarks: HashMap<DatasetId, i64>,
    processing_times: HashMap<DatasetId, i64>,
    dead: bool,
}

impl MergeJoinTransformation {
    pub fn new(
        spec: &JoinProcedureSpec,
        sink: Box<dyn DataSink>,
        tracker: &Arc<MemTracker>,
    ) -> Result<Self> {
        spec.validate()?;
        let seed = crate::exec::hash::random_seed();
        let buffers = MemTracker::new_child("merge-join buffers", tracker);
        Ok(Self {
            on: spec.on.clone(),
            parents: [spec.left, spec.right],
            sink,
            store: Some(RowBufferStore::new(seed, Arc::clone(&buffers))),
            tracker: buffers,
            seed,
            on_types: [HashMap::new(), HashMap::new()],
            finished: [false, false],
            watermarks: HashMap::new(),
            processing_times: HashMap::new(),
            dead: false,
        })
    }

    fn side_of(&self, parent: DatasetId) -> Result<Side> {
        if parent == self.parents[0] {
            Ok(Side::A)
        } else if parent == self.parents[1] {
            Ok(Side::B)
        } else {
            Err(EngineError::internal(format!(
                "event from unknown parent {}",
                parent
            )))
        }
    }

    /// Fast arrival check: every predicate column must be present, and its
    /// type must agree with earlier tables on the same side.
    fn check_on_columns(&mut self, side: Side, table: &Table) -> Result<()> {
        for label in &self.on {
            let Some((meta, _)) = table.column_by_label(label) else {
                return Err(EngineError::invalid(format!(
                    "join column \"{}\" missing from table with group key {}",
                    label,
                    table.key()
                )));
            };
            match self.on_types[side.index()].get(label) {
                Some(seen) if *seen != meta.value_type => {
                    return Err(EngineError::invalid(format!(
                        "join column \"{}\" is {} in table with group key {} but {} in earlier input on side {}",
                        label,
                        meta.value_type,
                        table.key(),
                        seen,
                        side
                    )));
                }
                Some(_) => {}
                None => {
                    self.on_types[side.index()]
                        .insert(label.clone(), meta.value_type);
                }
            }
        }
        Ok(())
    }

    /// Cancel the transformation: release every buffered column and forward
    /// the error downstream exactly once.
    fn fail(&mut self, error: EngineError) {
        self.store = None;
        if !self.dead {
            self.dead = true;
            warn!("merge join failed: {}", error);
            self.sink.finish(Some(error));
        }
    }

    fn match_and_flush(&mut self) -> Result<Vec<Table>> {
        let mut store = self
            .store
            .take()
            .ok_or_else(|| EngineError::internal("merge join buffers already drained"))?;
        let buffers_a = store.drain_side(Side::A);
        let buffers_b = store.drain_side(Side::B);
        debug!(
            "matching {} left bucket(s) against {} right bucket(s)",
            buffers_a.len(),
            buffers_b.len()
        );

        let mut buckets: Vec<OutputBucket> = Vec::new();
        let mut bucket_index: HashMap<u64, Vec<usize>> = HashMap::new();
        for a in &buffers_a {
            for b in &buffers_b {
                self.check_pair_types(a, b)?;
                let (a_rows, b_rows) = match_pair(a, b, &self.on, self.seed, &self.tracker)?;
                if a_rows.is_empty() {
                    continue;
                }
                let plan = OutputPlan::plan(&self.on, a, b)?;
                debug!(
                    "bucket pair {} x {} matched {} row(s) into output key {}",
                    a.key(),
                    b.key(),
                    a_rows.len(),
                    plan.key
                );

                let hash = plan.key.canonical_hash(self.seed);
                let slots = bucket_index.entry(hash).or_default();
                let existing = slots
                    .iter()
                    .copied()
                    .find(|idx| buckets[*idx].key == plan.key);
                let bucket = match existing {
                    Some(idx) => {
                        let bucket = &mut buckets[idx];
                        if bucket.schema != plan_schema(&plan) {
                            return Err(EngineError::failed_precondition(format!(
                                "output buckets with group key {} have conflicting schemas",
                                plan.key
                            )));
                        }
                        bucket
                    }
                    None => {
                        let idx = buckets.len();
                        slots.push(idx);
                        buckets.push(OutputBucket::new(&plan));
                        &mut buckets[idx]
                    }
                };
                bucket.append(&plan, a, b, &a_rows, &b_rows)?;
            }
        }
        // Input buckets drain here; their column memory is released with
        // the frozen buffers.
        drop(buffers_a);
        drop(buffers_b);

        buckets.into_iter().map(OutputBucket::into_table).collect()
    }

    /// Cross-side predicate typing, checked once per bucket pair.
    fn check_pair_types(&self, a: &FrozenBuffer, b: &FrozenBuffer) -> Result<()> {
        for label in &self.on {
            let (a_meta, _) = a.column_by_label(label).ok_or_else(|| {
                EngineError::failed_precondition(format!(
                    "join column \"{}\" missing from buffered bucket {}",
                    label,
                    a.key()
                ))
            })?;
            let (b_meta, _) = b.column_by_label(label).ok_or_else(|| {
                EngineError::failed_precondition(format!(
                    "join column \"{}\" missing from buffered bucket {}",
                    label,
                    b.key()
                ))
            })?;
            if a_meta.value_type != b_meta.value_type {
                return Err(EngineError::failed_precondition(format!(
                    "join column \"{}\" is {} in bucket {} but {} in bucket {}",
                    label,
                    a_meta.value_type,
                    a.key(),
                    b_meta.value_type,
                    b.key()
                )));
            }
        }
        Ok(())
    }
}

impl Transformation for MergeJoinTransformation {
    fn process(&mut self, parent: DatasetId, table: Table) -> Result<()> {
        if self.dead {
            return Ok(());
        }
        let side = self.side_of(parent)?;
        if self.finished[side.index()] {
            return Err(EngineError::internal(format!(
                "table with group key {} arrived on side {} after finish",
                table.key(),
                side
            )));
        }
        self.check_on_columns(side, &table)?;
        debug!(
            "buffering {} row(s) with group key {} on side {}",
            table.num_rows(),
            table.key(),
            side
        );
        self.store
            .as_mut()
            .ok_or_else(|| EngineError::internal("merge join buffers already drained"))?
            .insert(side, &table)
    }

    fn update_watermark(&mut self, parent: DatasetId, time: i64) -> Result<()> {
        self.side_of(parent)?;
        self.watermarks.insert(parent, time);
        Ok(())
    }

    fn update_processing_time(&mut self, parent: DatasetId, time: i64) -> Result<()> {
        self.side_of(parent)?;
        self.processing_times.insert(parent, time);
        Ok(())
    }

    fn retract_table(&mut self, parent: DatasetId, key: &GroupKey) -> Result<()> {
        let side = self.side_of(parent)?;
        Err(EngineError::unimplemented(format!(
            "inner join cannot retract group {} from side {}",
            key, side
        )))
    }

    fn finish(&mut self, parent: DatasetId, error: Option<EngineError>) {
        if self.dead {
            return;
        }
        let side = match self.side_of(parent) {
            Ok(side) => side,
            Err(err) => {
                warn!("{}", err);
                return;
            }
        };
        if let Some(error) = error {
            self.fail(error);
            return;
        }
        if self.finished[side.index()] {
            return;
        }
        self.finished[side.index()] = true;
        if !self.finished.iter().all(|done| *done) {
            return;
        }
        match self.match_and_flush() {
            Ok(tables) => {
                for table in tables {
                    if let Err(err) = self.sink.process(table) {
                        self.fail(err);
                        return;
                    }
                }
                self.dead = true;
                self.sink.finish(None);
            }
            Err(err) => self.fail(err),
        }
    }
}

fn plan_schema(plan: &OutputPlan) -> Vec<ColMeta> {
    plan.columns.iter().map(|c| c.meta.clone()).collect()
}

/// Resolve the predicate columns of one buffer, in `on` order.
fn on_columns<'a>(
    buffer: &'a FrozenBuffer,
    on: &[String],
) -> Result<Vec<(ColumnType, &'a ArrayRef)>> {
    on.iter()
        .map(|label| {
            buffer
                .column_by_label(label)
                .map(|(meta, array)| (meta.value_type, array))
                .ok_or_else(|| {
                    EngineError::internal(format!(
                        "join column \"{}\" missing from buffered bucket {}",
                        label,
                        buffer.key()
                    ))
                })
        })
        .collect()
}

/// The predicate tuple of one row, or `None` if any predicate value is null.
fn on_tuple(columns: &[(ColumnType, &ArrayRef)], row: usize) -> Result<Option<Vec<Value>>> {
    let mut tuple = Vec::with_capacity(columns.len());
    for (value_type, array) in columns {
        let value = value_at(array, *value_type, row)?;
        if value.is_null() {
            return Ok(None);
        }
        tuple.push(value);
    }
    Ok(Some(tuple))
}

/// Hash-join one bucket pair. Returns matched row indices as parallel
/// vectors, ordered a-major then b, both in arrival order.
fn match_pair(
    a: &FrozenBuffer,
    b: &FrozenBuffer,
    on: &[String],
    seed: u64,
    tracker: &Arc<MemTracker>,
) -> Result<(Vec<u32>, Vec<u32>)> {
    if a.num_rows() == 0 || b.num_rows() == 0 {
        return Ok((Vec::new(), Vec::new()));
    }
    let a_cols = on_columns(a, on)?;
    let b_cols = on_columns(b, on)?;

    // Index the smaller side, probe with the other.
    let build_side = if b.num_rows() <= a.num_rows() {
        Side::B
    } else {
        Side::A
    };
    let (build, build_cols) = match build_side {
        Side::B => (b, &b_cols),
        Side::A => (a, &a_cols),
    };

    let mut index = JoinKeyIndex::new(seed, Arc::clone(tracker));
    for row in 0..build.num_rows() {
        if let Some(tuple) = on_tuple(build_cols, row)? {
            index.insert(tuple, row as u32)?;
        }
    }
    index.finalize()?;
    if index.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    match build_side {
        Side::B => {
            // Probe with a-rows in order; matches come out a-major directly.
            let mut groups = Vec::with_capacity(a.num_rows());
            let mut total = 0usize;
            for row in 0..a.num_rows() {
                let group = match on_tuple(&a_cols, row)? {
                    Some(tuple) => index.lookup(&tuple),
                    None => None,
                };
                if let Some(group) = group {
                    total += index.group_len(group)?;
                }
                groups.push(group);
            }
            let mut a_rows = Vec::with_capacity(total);
            let mut b_rows = Vec::with_capacity(total);
            for (row, group) in groups.iter().enumerate() {
                if let Some(group) = group {
                    for b_row in index.group_rows(*group)? {
                        a_rows.push(row as u32);
                        b_rows.push(*b_row);
                    }
                }
            }
            Ok((a_rows, b_rows))
        }
        Side::A => {
            // The index holds a-rows; collect the b-matches of every a-row
            // first so emission can still run a-major.
            let mut matches: Vec<Vec<u32>> = vec![Vec::new(); a.num_rows()];
            let mut total = 0usize;
            for row in 0..b.num_rows() {
                let group = match on_tuple(&b_cols, row)? {
                    Some(tuple) => index.lookup(&tuple),
                    None => None,
                };
                if let Some(group) = group {
                    for a_row in index.group_rows(group)? {
                        matches[*a_row as usize].push(row as u32);
                        total += 1;
                    }
                }
            }
            let mut a_rows = Vec::with_capacity(total);
            let mut b_rows = Vec::with_capacity(total);
            for (a_row, b_matches) in matches.iter().enumerate() {
                for b_row in b_matches {
                    a_rows.push(a_row as u32);
                    b_rows.push(*b_row);
                }
            }
            Ok((a_rows, b_rows))
        }
    }
}

/// Accumulating output for one output group key.
struct OutputBucket {
    key: GroupKey,
    schema: Vec<ColMeta>,
    chunks: Vec<Vec<ArrayRef>>,
}

impl OutputBucket {
    fn new(plan: &OutputPlan) -> Self {
        Self {
            key: plan.key.clone(),
            schema: plan_schema(plan),
            chunks: Vec::new(),
        }
    }

    /// Materialize the matched rows of one pair into this bucket. The take
    /// kernel performs a single allocation per output column.
    fn append(
        &mut self,
        plan: &OutputPlan,
        a: &FrozenBuffer,
        b: &FrozenBuffer,
        a_rows: &[u32],
        b_rows: &[u32],
    ) -> Result<()> {
        let a_indices = UInt32Array::from(a_rows.to_vec());
        let b_indices = UInt32Array::from(b_rows.to_vec());
        let mut chunk = Vec::with_capacity(plan.columns.len());
        for column in &plan.columns {
            let (side, label) = &column.source;
            let (buffer, indices) = match side {
                Side::A => (a, &a_indices),
                Side::B => (b, &b_indices),
            };
            let (_, array) = buffer.column_by_label(label).ok_or_else(|| {
                EngineError::internal(format!(
                    "source column \"{}\" missing from bucket {}",
                    label,
                    buffer.key()
                ))
            })?;
            let taken = take(array.as_ref(), indices, None)
                .map_err(|e| EngineError::internal(format!("row materialization failed: {}", e)))?;
            chunk.push(taken);
        }
        self.chunks.push(chunk);
        Ok(())
    }

    fn into_table(self) -> Result<Table> {
        let mut columns = Vec::with_capacity(self.schema.len());
        for idx in 0..self.schema.len() {
            let column = if self.chunks.len() == 1 {
                self.chunks[0][idx].clone()
            } else {
                let parts: Vec<&dyn Array> = self
                    .chunks
                    .iter()
                    .map(|chunk| chunk[idx].as_ref())
                    .collect();
                concat(&parts).map_err(|e| {
                    EngineError::internal(format!("output column concat failed: {}", e))
                })?
            };
            columns.push(column);
        }
        Table::try_new(self.schema, columns, self.key)
    }
}
