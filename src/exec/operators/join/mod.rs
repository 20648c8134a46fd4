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
//! Streaming inner equijoin over two grouped table streams.
//!
//! Responsibilities:
//! - Buffers columnar input per (side, input group key) until both parents
//!   finish, then matches bucket pairs and regroups rows into output tables.
//! - Renames colliding non-predicate columns with per-side suffixes and
//!   derives the output group key per bucket pair.
//!
//! Key exported interfaces:
//! - Types: `JoinProcedureSpec`, `JoinMethod`, `Side`,
//!   `MergeJoinTransformation`.

mod buffer;
mod hash_table;
mod output_plan;
mod transformation;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use transformation::MergeJoinTransformation;

use crate::common::error::{EngineError, Result};
use crate::common::ids::DatasetId;

/// Which parent a buffered table came from. The side also fixes the rename
/// suffix applied to colliding output column labels.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn suffix(self) -> &'static str {
        match self {
            Side::A => "_a",
            Side::B => "_b",
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("a"),
            Side::B => f.write_str("b"),
        }
    }
}

/// Join algorithm selector. Only the inner join is implemented; the field
/// exists so plans stay forward compatible with outer variants.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMethod {
    Inner,
}

impl FromStr for JoinMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inner" => Ok(JoinMethod::Inner),
            other => Err(EngineError::invalid(format!(
                "unknown join method \"{}\"",
                other
            ))),
        }
    }
}

impl fmt::Display for JoinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinMethod::Inner => f.write_str("inner"),
        }
    }
}

/// Planner-produced specification of one join operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinProcedureSpec {
    /// Predicate column labels; equality on these is null-rejecting.
    pub on: Vec<String>,
    pub method: JoinMethod,
    /// Upstream operation feeding side `a`.
    pub left: DatasetId,
    /// Upstream operation feeding side `b`.
    pub right: DatasetId,
}

impl JoinProcedureSpec {
    pub fn validate(&self) -> Result<()> {
        if self.on.is_empty() {
            return Err(EngineError::invalid(
                "join requires at least one predicate column in 'on'",
            ));
        }
        for (idx, label) in self.on.iter().enumerate() {
            if self.on[..idx].contains(label) {
                return Err(EngineError::invalid(format!(
                    "duplicate predicate column \"{}\" in 'on'",
                    label
                )));
            }
        }
        if self.left == self.right {
            return Err(EngineError::invalid(format!(
                "join parents must be distinct, got {} twice",
                self.left
            )));
        }
        Ok(())
    }
}
