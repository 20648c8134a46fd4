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
//! Transformation and sink contracts.
//!
//! Responsibilities:
//! - Defines the event surface the framework drives a transformation with:
//!   table arrival, watermark/processing-time updates, retraction, finish.
//! - Defines the downstream sink contract that receives output tables.
//!
//! Delivery is serialized per transformation instance: the framework calls
//! these methods from a single logical consumer, so implementations mutate
//! through `&mut self` without internal locking.

use crate::common::error::{EngineError, Result};
use crate::common::ids::DatasetId;
use crate::exec::group_key::GroupKey;
use crate::exec::table::Table;

/// A streaming operator fed by one or more parent datasets.
pub trait Transformation {
    /// Deliver one table from `parent`. An error aborts the transformation;
    /// the framework is expected to route it into [`finish`](Self::finish).
    fn process(&mut self, parent: DatasetId, table: Table) -> Result<()>;

    fn update_watermark(&mut self, parent: DatasetId, time: i64) -> Result<()>;

    fn update_processing_time(&mut self, parent: DatasetId, time: i64) -> Result<()>;

    /// Withdraw a previously delivered group. Optional; transformations
    /// that cannot un-emit return `Unimplemented`.
    fn retract_table(&mut self, parent: DatasetId, key: &GroupKey) -> Result<()>;

    /// `parent` will send nothing further. A carried error cancels the
    /// transformation. Must be idempotent per parent.
    fn finish(&mut self, parent: DatasetId, error: Option<EngineError>);
}

/// Receives the output of a transformation and assumes ownership of it.
pub trait DataSink {
    fn process(&mut self, table: Table) -> Result<()>;

    fn finish(&mut self, error: Option<EngineError>);
}
