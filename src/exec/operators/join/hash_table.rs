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
//! Hash index over the build side's predicate tuples.
//!
//! Rows with equal predicate tuples form a group. Rows are linked into
//! per-group chains during insertion and flattened into contiguous
//! insertion-order slices by `finalize`, so probing can emit matches in
//! build-side arrival order. Hash collisions are resolved by comparing the
//! original typed tuples. Callers never insert or look up tuples containing
//! nulls; null predicate values reject the row before it reaches the index.
//!
//! Index storage is accounted against the injected memory tracker; growth
//! past the budget surfaces `ResourceExhausted` and aborts the join.

use std::mem;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::common::error::{EngineError, Result};
use crate::exec::value::{Value, hash_values};
use crate::runtime::mem_tracker::MemTracker;

const ROW_NONE: u32 = u32::MAX;

pub(crate) struct JoinKeyIndex {
    seed: u64,
    // Tuple hash -> group ids with that hash.
    slots: HashMap<u64, Vec<usize>>,
    keys: Vec<Vec<Value>>,
    group_head: Vec<u32>,
    row_next: Vec<u32>,
    group_offsets: Option<Vec<u32>>,
    group_rows: Option<Vec<u32>>,
    mem_tracker: Arc<MemTracker>,
    accounted: i64,
}

impl JoinKeyIndex {
    pub(crate) fn new(seed: u64, mem_tracker: Arc<MemTracker>) -> Self {
        Self {
            seed,
            slots: HashMap::new(),
            keys: Vec::new(),
            group_head: Vec::new(),
            row_next: Vec::new(),
            group_offsets: None,
            group_rows: None,
            mem_tracker,
            accounted: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.group_head.is_empty()
    }

    pub(crate) fn group_count(&self) -> usize {
        self.group_head.len()
    }

    /// Insert `row_id` under its predicate tuple. Row ids must be inserted
    /// in increasing order for groups to come out in arrival order.
    pub(crate) fn insert(&mut self, tuple: Vec<Value>, row_id: u32) -> Result<()> {
        if self.group_offsets.is_some() {
            return Err(EngineError::internal(
                "join key index already finalized",
            ));
        }
        debug_assert!(tuple.iter().all(|v| !v.is_null()));
        let group_id = match self.find_group(&tuple) {
            Some(group_id) => group_id,
            None => {
                let group_id = self.keys.len();
                let hash = hash_values(self.seed, &tuple);
                self.slots.entry(hash).or_default().push(group_id);
                self.keys.push(tuple);
                self.group_head.push(ROW_NONE);
                group_id
            }
        };
        let slot = row_id as usize;
        if slot >= self.row_next.len() {
            self.row_next.resize(slot + 1, ROW_NONE);
        }
        self.row_next[slot] = self.group_head[group_id];
        self.group_head[group_id] = row_id;
        self.refresh_accounting()
    }

    /// Flatten the per-group chains into contiguous row slices. Chains link
    /// newest-first, so slices are filled back to front to restore
    /// insertion order.
    pub(crate) fn finalize(&mut self) -> Result<()> {
        if self.group_offsets.is_some() {
            return Ok(());
        }
        let group_count = self.group_head.len();
        let mut counts = vec![0u32; group_count];
        for (group_id, count) in counts.iter_mut().enumerate() {
            let mut row = self.group_head[group_id];
            while row != ROW_NONE {
                *count = count
                    .checked_add(1)
                    .ok_or_else(|| EngineError::internal("join group row count overflow"))?;
                row = self.next_row(row)?;
            }
        }

        let mut offsets = Vec::with_capacity(group_count + 1);
        offsets.push(0u32);
        let mut total = 0u32;
        for count in &counts {
            total = total
                .checked_add(*count)
                .ok_or_else(|| EngineError::internal("join group rows overflow"))?;
            offsets.push(total);
        }

        let mut rows = vec![0u32; total as usize];
        for group_id in 0..group_count {
            let mut write = offsets[group_id + 1] as usize;
            let mut row = self.group_head[group_id];
            while row != ROW_NONE {
                write -= 1;
                rows[write] = row;
                row = self.next_row(row)?;
            }
        }

        self.group_offsets = Some(offsets);
        self.group_rows = Some(rows);
        self.refresh_accounting()
    }

    pub(crate) fn lookup(&self, tuple: &[Value]) -> Option<usize> {
        let hash = hash_values(self.seed, tuple);
        let slots = self.slots.get(&hash)?;
        slots
            .iter()
            .copied()
            .find(|group_id| self.keys[*group_id] == tuple)
    }

    fn find_group(&self, tuple: &[Value]) -> Option<usize> {
        let hash = hash_values(self.seed, tuple);
        let slots = self.slots.get(&hash)?;
        slots
            .iter()
            .copied()
            .find(|group_id| self.keys[*group_id] == *tuple)
    }

    pub(crate) fn group_len(&self, group_id: usize) -> Result<usize> {
        let offsets = self
            .group_offsets
            .as_ref()
            .ok_or_else(|| EngineError::internal("join key index not finalized"))?;
        if group_id + 1 >= offsets.len() {
            return Err(EngineError::internal("join group id out of bounds"));
        }
        Ok((offsets[group_id + 1] - offsets[group_id]) as usize)
    }

    pub(crate) fn group_rows(&self, group_id: usize) -> Result<&[u32]> {
        let offsets = self
            .group_offsets
            .as_ref()
            .ok_or_else(|| EngineError::internal("join key index not finalized"))?;
        let rows = self
            .group_rows
            .as_ref()
            .ok_or_else(|| EngineError::internal("join key index not finalized"))?;
        if group_id + 1 >= offsets.len() {
            return Err(EngineError::internal("join group id out of bounds"));
        }
        let start = offsets[group_id] as usize;
        let end = offsets[group_id + 1] as usize;
        Ok(&rows[start..end])
    }

    fn next_row(&self, row_id: u32) -> Result<u32> {
        self.row_next
            .get(row_id as usize)
            .copied()
            .ok_or_else(|| EngineError::internal("join row id out of bounds"))
    }

    fn refresh_accounting(&mut self) -> Result<()> {
        let bytes = self.tracked_bytes();
        let delta = bytes - self.accounted;
        if delta > 0 {
            self.mem_tracker.try_consume(delta)?;
        } else if delta < 0 {
            self.mem_tracker.release(-delta);
        }
        self.accounted = bytes;
        Ok(())
    }

    fn tracked_bytes(&self) -> i64 {
        fn vec_bytes<T>(v: &Vec<T>) -> i64 {
            let bytes = v.capacity().saturating_mul(mem::size_of::<T>());
            i64::try_from(bytes).unwrap_or(i64::MAX)
        }
        fn opt_vec_bytes<T>(v: &Option<Vec<T>>) -> i64 {
            v.as_ref().map(vec_bytes).unwrap_or(0)
        }

        let mut bytes = vec_bytes(&self.group_head)
            .saturating_add(vec_bytes(&self.row_next))
            .saturating_add(vec_bytes(&self.keys))
            .saturating_add(opt_vec_bytes(&self.group_offsets))
            .saturating_add(opt_vec_bytes(&self.group_rows));
        for key in &self.keys {
            bytes = bytes.saturating_add(vec_bytes(key));
        }
        let slot_bytes = self
            .slots
            .capacity()
            .saturating_mul(mem::size_of::<(u64, Vec<usize>)>());
        bytes = bytes.saturating_add(i64::try_from(slot_bytes).unwrap_or(i64::MAX));
        for group_ids in self.slots.values() {
            bytes = bytes.saturating_add(vec_bytes(group_ids));
        }
        bytes
    }
}

impl Drop for JoinKeyIndex {
    fn drop(&mut self) {
        self.mem_tracker.release(self.accounted);
    }
}
