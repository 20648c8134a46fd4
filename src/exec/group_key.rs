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
//! Group keys: ordered, label-addressed tuples of typed constants.
//!
//! Keys are canonicalized at construction by sorting on label, so equality
//! and hashing are independent of the order the planner listed the columns
//! in. The seeded canonical hash is what the buffer store and the output
//! bucket registry use for addressing.

use std::fmt;

use crate::common::error::{EngineError, Result};
use crate::exec::hash::{combine_hash, hash_bytes_with_seed};
use crate::exec::table::ColMeta;
use crate::exec::value::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupKey {
    cols: Vec<ColMeta>,
    values: Vec<Value>,
}

impl GroupKey {
    /// Canonicalize `pairs` into a key. Labels must be unique and every
    /// value must be storable in its declared column type.
    pub fn try_new(pairs: Vec<(ColMeta, Value)>) -> Result<Self> {
        let mut pairs = pairs;
        pairs.sort_by(|a, b| a.0.label.cmp(&b.0.label));
        for (idx, (meta, value)) in pairs.iter().enumerate() {
            if idx > 0 && pairs[idx - 1].0.label == meta.label {
                return Err(EngineError::invalid(format!(
                    "duplicate group key label \"{}\"",
                    meta.label
                )));
            }
            if !value.matches_type(meta.value_type) {
                return Err(EngineError::invalid(format!(
                    "group key column \"{}\" is {} but its value is {}",
                    meta.label, meta.value_type, value
                )));
            }
        }
        let (cols, values) = pairs.into_iter().unzip();
        Ok(Self { cols, values })
    }

    pub fn empty() -> Self {
        Self {
            cols: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.cols.iter().map(|m| m.label.as_str())
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&ColMeta, &Value)> {
        self.cols.iter().zip(self.values.iter())
    }

    pub fn has(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    pub fn col_of(&self, label: &str) -> Option<&ColMeta> {
        self.index_of(label).map(|idx| &self.cols[idx])
    }

    pub fn value_of(&self, label: &str) -> Option<&Value> {
        self.index_of(label).map(|idx| &self.values[idx])
    }

    fn index_of(&self, label: &str) -> Option<usize> {
        // Labels are sorted at construction.
        self.cols
            .binary_search_by(|m| m.label.as_str().cmp(label))
            .ok()
    }

    /// Labels present in both keys. A shared label whose declared types
    /// disagree across the keys is a planner-level fault.
    pub fn intersect_labels<'a>(&'a self, other: &GroupKey) -> Result<Vec<&'a str>> {
        let mut shared = Vec::new();
        for meta in &self.cols {
            if let Some(theirs) = other.col_of(&meta.label) {
                if theirs.value_type != meta.value_type {
                    return Err(EngineError::invalid(format!(
                        "group key column \"{}\" is {} on one side and {} on the other",
                        meta.label, meta.value_type, theirs.value_type
                    )));
                }
                shared.push(meta.label.as_str());
            }
        }
        Ok(shared)
    }

    /// Seeded 64-bit hash over the sorted (label, type, value) triples.
    pub fn canonical_hash(&self, seed: u64) -> u64 {
        let mut acc = seed;
        for (meta, value) in self.pairs() {
            acc = combine_hash(acc, hash_bytes_with_seed(seed, meta.label.as_bytes()));
            acc = combine_hash(acc, hash_bytes_with_seed(seed, meta.value_type.to_string().as_bytes()));
            acc = combine_hash(acc, value.hash_with_seed(seed));
        }
        acc
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (meta, value)) in self.pairs().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", meta.label, value)?;
        }
        f.write_str("}")
    }
}
