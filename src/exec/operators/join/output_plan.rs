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
//! Output planning for one bucket pair.
//!
//! Given the two input buckets of a candidate match, the planner derives the
//! output group key, the ordered output schema, and a per-column source map.
//! The rules:
//!
//! - A predicate (`on`) column appears once under its own label.
//! - A non-predicate label present on both sides is merged into a single
//!   key column when it is a key column on both sides with equal types and
//!   equal non-null values; otherwise it is renamed with the per-side
//!   suffixes, each copy keeping its own key membership.
//! - A label present on one side only keeps its bare label.
//! - Output order is canonical: key columns first, then the rest, each
//!   section sorted by label.
//!
//! Planning is pure: identical inputs yield an identical plan.

use super::Side;
use super::buffer::FrozenBuffer;
use crate::common::error::{EngineError, Result};
use crate::exec::group_key::GroupKey;
use crate::exec::table::ColMeta;
use crate::exec::value::Value;

/// One column of the join output.
#[derive(Clone, Debug)]
pub(crate) struct OutputColumn {
    pub(crate) meta: ColMeta,
    /// Which input bucket, and which label in it, supplies the values.
    pub(crate) source: (Side, String),
    /// `Some` when this is an output-group-key column (the value may itself
    /// be null); `None` for plain row columns.
    pub(crate) key_value: Option<Value>,
}

#[derive(Clone, Debug)]
pub(crate) struct OutputPlan {
    pub(crate) columns: Vec<OutputColumn>,
    pub(crate) key: GroupKey,
}

impl OutputPlan {
    pub(crate) fn plan(on: &[String], a: &FrozenBuffer, b: &FrozenBuffer) -> Result<OutputPlan> {
        let ka = a.key();
        let kb = b.key();
        let mut columns: Vec<OutputColumn> = Vec::new();

        for meta in a.schema() {
            let label = meta.label.as_str();
            if on.iter().any(|l| l == label) {
                // Matched rows agree on predicate values, so one copy
                // suffices; it is a key column when either side keys on it.
                let key_value = ka
                    .value_of(label)
                    .or_else(|| kb.value_of(label))
                    .cloned();
                columns.push(OutputColumn {
                    meta: meta.clone(),
                    source: (Side::A, meta.label.clone()),
                    key_value,
                });
                continue;
            }
            let Some((b_meta, _)) = b.column_by_label(label) else {
                columns.push(OutputColumn {
                    meta: meta.clone(),
                    source: (Side::A, meta.label.clone()),
                    key_value: ka.value_of(label).cloned(),
                });
                continue;
            };
            let merged = match (ka.value_of(label), kb.value_of(label)) {
                (Some(av), Some(bv))
                    if meta.value_type == b_meta.value_type && av.eq_non_null(bv) =>
                {
                    Some(av.clone())
                }
                _ => None,
            };
            if let Some(value) = merged {
                columns.push(OutputColumn {
                    meta: meta.clone(),
                    source: (Side::A, meta.label.clone()),
                    key_value: Some(value),
                });
            } else {
                columns.push(OutputColumn {
                    meta: ColMeta::new(
                        format!("{}{}", label, Side::A.suffix()),
                        meta.value_type,
                    ),
                    source: (Side::A, meta.label.clone()),
                    key_value: ka.value_of(label).cloned(),
                });
                columns.push(OutputColumn {
                    meta: ColMeta::new(
                        format!("{}{}", label, Side::B.suffix()),
                        b_meta.value_type,
                    ),
                    source: (Side::B, meta.label.clone()),
                    key_value: kb.value_of(label).cloned(),
                });
            }
        }

        for meta in b.schema() {
            if a.column_index(&meta.label).is_some() {
                continue;
            }
            columns.push(OutputColumn {
                meta: meta.clone(),
                source: (Side::B, meta.label.clone()),
                key_value: kb.value_of(&meta.label).cloned(),
            });
        }

        // Canonical order: key columns first, each section sorted by label.
        columns.sort_by(|x, y| {
            let x_key = x.key_value.is_some();
            let y_key = y.key_value.is_some();
            y_key.cmp(&x_key).then_with(|| x.meta.label.cmp(&y.meta.label))
        });

        for (idx, col) in columns.iter().enumerate() {
            if columns[..idx].iter().any(|c| c.meta.label == col.meta.label) {
                return Err(EngineError::failed_precondition(format!(
                    "join of buckets {} and {} produces duplicate output column \"{}\"",
                    ka, kb, col.meta.label
                )));
            }
        }

        let key = GroupKey::try_new(
            columns
                .iter()
                .filter_map(|c| c.key_value.clone().map(|v| (c.meta.clone(), v)))
                .collect(),
        )?;
        Ok(OutputPlan { columns, key })
    }
}
