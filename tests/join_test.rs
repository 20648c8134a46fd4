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
//! End-to-end tests for the streaming inner join, driven through the public
//! transformation surface with a collecting sink.

use std::sync::{Arc, Mutex};

use tributary::exec::operators::join::{JoinMethod, JoinProcedureSpec, MergeJoinTransformation};
use tributary::{
    ColMeta, ColumnType, DataSink, DatasetId, EngineError, ErrorKind, GroupKey, MemTracker, Table,
    TableBuilder, Transformation, Value,
};

const PARENT_A: DatasetId = DatasetId::new(1);
const PARENT_B: DatasetId = DatasetId::new(2);

#[derive(Default)]
struct SinkState {
    tables: Vec<Table>,
    finishes: Vec<Option<EngineError>>,
}

#[derive(Clone, Default)]
struct CollectingSink {
    state: Arc<Mutex<SinkState>>,
}

impl CollectingSink {
    fn tables(&self) -> Vec<Table> {
        self.state.lock().unwrap().tables.clone()
    }

    fn finishes(&self) -> Vec<Option<EngineError>> {
        self.state.lock().unwrap().finishes.clone()
    }
}

impl DataSink for CollectingSink {
    fn process(&mut self, table: Table) -> Result<(), EngineError> {
        self.state.lock().unwrap().tables.push(table);
        Ok(())
    }

    fn finish(&mut self, error: Option<EngineError>) {
        self.state.lock().unwrap().finishes.push(error);
    }
}

fn spec(on: &[&str]) -> JoinProcedureSpec {
    JoinProcedureSpec {
        on: on.iter().map(|s| s.to_string()).collect(),
        method: JoinMethod::Inner,
        left: PARENT_A,
        right: PARENT_B,
    }
}

fn join(spec: &JoinProcedureSpec) -> (MergeJoinTransformation, CollectingSink, Arc<MemTracker>) {
    let sink = CollectingSink::default();
    let tracker = MemTracker::new_root("join-test");
    let jt = MergeJoinTransformation::new(spec, Box::new(sink.clone()), &tracker).expect("join");
    (jt, sink, tracker)
}

/// Build a table whose group key is the named subset of its columns, taking
/// the key values from the first row.
fn table(cols: &[(&str, ColumnType)], key_cols: &[&str], rows: &[&[Value]]) -> Table {
    let schema: Vec<ColMeta> = cols
        .iter()
        .map(|(label, t)| ColMeta::new(*label, *t))
        .collect();
    let key = GroupKey::try_new(
        key_cols
            .iter()
            .map(|label| {
                let idx = cols.iter().position(|(l, _)| l == label).expect("key label");
                (schema[idx].clone(), rows[0][idx].clone())
            })
            .collect(),
    )
    .expect("group key");
    let mut builder = TableBuilder::new(schema, key);
    for row in rows {
        builder.append_row(row).expect("row");
    }
    builder.build().expect("table")
}

fn time_value_table(rows: &[(Option<i64>, Option<f64>)]) -> Table {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|(t, v)| {
            vec![
                t.map(Value::Time).unwrap_or(Value::Null),
                v.map(Value::Float).unwrap_or(Value::Null),
            ]
        })
        .collect();
    let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
    table(
        &[("_time", ColumnType::Time), ("_value", ColumnType::Float)],
        &[],
        &refs,
    )
}

/// Run the join to completion over the given input tables.
fn run(
    spec: &JoinProcedureSpec,
    data_a: Vec<Table>,
    data_b: Vec<Table>,
) -> (CollectingSink, Arc<MemTracker>) {
    let (mut jt, sink, tracker) = join(spec);
    for t in data_a {
        jt.process(PARENT_A, t).expect("process a");
    }
    for t in data_b {
        jt.process(PARENT_B, t).expect("process b");
    }
    jt.finish(PARENT_A, None);
    jt.finish(PARENT_B, None);
    (sink, tracker)
}

fn labels_of(table: &Table) -> Vec<String> {
    table.schema().iter().map(|m| m.label.clone()).collect()
}

fn rows_of(table: &Table) -> Vec<Vec<Value>> {
    (0..table.num_rows())
        .map(|row| {
            (0..table.schema().len())
                .map(|col| table.value_at(col, row).expect("value"))
                .collect()
        })
        .collect()
}

fn key_labels_of(table: &Table) -> Vec<String> {
    table.key().labels().map(|l| l.to_string()).collect()
}

/// Sort output tables by rendered group key; emission order across buckets
/// is unspecified.
fn sorted_by_key(mut tables: Vec<Table>) -> Vec<Table> {
    tables.sort_by_key(|t| t.key().to_string());
    tables
}

fn float(v: f64) -> Value {
    Value::Float(v)
}

fn time(v: i64) -> Value {
    Value::Time(v)
}

fn string(v: &str) -> Value {
    Value::str(v)
}

#[test]
fn simple_inner_on_time() {
    let a = time_value_table(&[(Some(1), Some(1.0)), (Some(2), Some(2.0)), (Some(3), Some(3.0))]);
    let b = time_value_table(&[
        (Some(1), Some(10.0)),
        (Some(2), Some(20.0)),
        (Some(3), Some(30.0)),
    ]);
    let (sink, _) = run(&spec(&["_time"]), vec![a], vec![b]);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(labels_of(&tables[0]), ["_time", "_value_a", "_value_b"]);
    assert!(tables[0].key().is_empty());
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![time(1), float(1.0), float(10.0)],
            vec![time(2), float(2.0), float(20.0)],
            vec![time(3), float(3.0), float(30.0)],
        ]
    );
    assert_eq!(sink.finishes(), vec![None]);
}

#[test]
fn simple_inner_with_ints() {
    let make = |values: [i64; 3]| {
        let rows: Vec<Vec<Value>> = values
            .iter()
            .enumerate()
            .map(|(idx, v)| vec![time(idx as i64 + 1), Value::Int(*v)])
            .collect();
        let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
        table(
            &[("_time", ColumnType::Time), ("_value", ColumnType::Int)],
            &[],
            &refs,
        )
    };
    let (sink, _) = run(&spec(&["_time"]), vec![make([1, 2, 3])], vec![make([10, 20, 30])]);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![time(1), Value::Int(1), Value::Int(10)],
            vec![time(2), Value::Int(2), Value::Int(20)],
            vec![time(3), Value::Int(3), Value::Int(30)],
        ]
    );
}

#[test]
fn unsorted_inputs_emit_in_left_arrival_order() {
    let a = time_value_table(&[(Some(2), Some(1.0)), (Some(1), Some(2.0)), (Some(3), Some(3.0))]);
    let b = time_value_table(&[
        (Some(3), Some(10.0)),
        (Some(2), Some(30.0)),
        (Some(1), Some(20.0)),
    ]);
    let (sink, _) = run(&spec(&["_time"]), vec![a], vec![b]);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![time(2), float(1.0), float(30.0)],
            vec![time(1), float(2.0), float(20.0)],
            vec![time(3), float(3.0), float(10.0)],
        ]
    );
}

#[test]
fn null_join_values_are_rejected() {
    let a = time_value_table(&[
        (None, Some(100.0)),
        (Some(1), Some(1.0)),
        (Some(2), Some(2.0)),
        (None, Some(200.0)),
        (Some(3), Some(3.0)),
    ]);
    let b = time_value_table(&[
        (Some(1), Some(10.0)),
        (None, Some(300.0)),
        (Some(2), Some(20.0)),
        (Some(3), Some(30.0)),
        (None, Some(400.0)),
    ]);
    let (sink, _) = run(&spec(&["_time"]), vec![a], vec![b]);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    let rows = rows_of(&tables[0]);
    assert_eq!(
        rows,
        vec![
            vec![time(1), float(1.0), float(10.0)],
            vec![time(2), float(2.0), float(20.0)],
            vec![time(3), float(3.0), float(30.0)],
        ]
    );
    for row in rows {
        assert!(!row[0].is_null());
    }
}

#[test]
fn multiple_matches_emit_cartesian_in_order() {
    let a = time_value_table(&[(Some(1), Some(1.0)), (Some(2), Some(2.0)), (Some(3), Some(3.0))]);
    let b = time_value_table(&[
        (Some(1), Some(10.0)),
        (Some(1), Some(10.1)),
        (Some(2), Some(20.0)),
        (Some(3), Some(30.0)),
        (Some(3), Some(30.1)),
    ]);
    let (sink, _) = run(&spec(&["_time"]), vec![a], vec![b]);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![time(1), float(1.0), float(10.0)],
            vec![time(1), float(1.0), float(10.1)],
            vec![time(2), float(2.0), float(20.0)],
            vec![time(3), float(3.0), float(30.0)],
            vec![time(3), float(3.0), float(30.1)],
        ]
    );
}

#[test]
fn missing_matches_are_dropped() {
    let a = time_value_table(&[(Some(1), Some(1.0)), (Some(2), Some(2.0)), (Some(3), Some(3.0))]);
    let b = time_value_table(&[(Some(1), Some(10.0)), (Some(3), Some(30.0))]);
    let (sink, _) = run(&spec(&["_time"]), vec![a], vec![b]);

    assert_eq!(
        rows_of(&sink.tables()[0]),
        vec![
            vec![time(1), float(1.0), float(10.0)],
            vec![time(3), float(3.0), float(30.0)],
        ]
    );
}

fn tagged_table(tag: Option<&str>, rows: &[(i64, f64)]) -> Table {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|(t, v)| {
            vec![
                time(*t),
                float(*v),
                tag.map(string).unwrap_or(Value::Null),
            ]
        })
        .collect();
    let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
    table(
        &[
            ("_time", ColumnType::Time),
            ("_value", ColumnType::Float),
            ("t1", ColumnType::String),
        ],
        &["t1"],
        &refs,
    )
}

#[test]
fn shared_tag_in_predicate_stays_single_and_keyed() {
    let a = tagged_table(Some("a"), &[(1, 1.0), (2, 2.0), (3, 3.0)]);
    let b = tagged_table(Some("a"), &[(1, 10.0), (2, 20.0), (3, 30.0)]);
    let (sink, _) = run(&spec(&["_time", "t1"]), vec![a], vec![b]);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    // Output group key columns come first in the canonical column order.
    assert_eq!(labels_of(&tables[0]), ["t1", "_time", "_value_a", "_value_b"]);
    assert_eq!(key_labels_of(&tables[0]), ["t1"]);
    assert_eq!(tables[0].key().value_of("t1"), Some(&string("a")));
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![string("a"), time(1), float(1.0), float(10.0)],
            vec![string("a"), time(2), float(2.0), float(20.0)],
            vec![string("a"), time(3), float(3.0), float(30.0)],
        ]
    );
}

#[test]
fn null_tag_buckets_produce_no_output_when_tag_is_in_predicate() {
    let a = vec![
        tagged_table(Some("a"), &[(1, 1.0), (2, 2.0), (3, 3.0)]),
        tagged_table(None, &[(1, 1.1), (2, 2.1), (3, 3.1)]),
    ];
    let b = vec![
        tagged_table(Some("a"), &[(1, 10.0), (2, 20.0), (3, 30.0)]),
        tagged_table(None, &[(1, 10.1), (2, 20.1), (3, 30.1)]),
    ];
    let (sink, _) = run(&spec(&["_time", "t1"]), a, b);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].key().value_of("t1"), Some(&string("a")));
    assert_eq!(tables[0].num_rows(), 3);
}

fn keyed_kv_table(key: Option<Option<&str>>, rows: &[(Option<i64>, Option<f64>)]) -> Table {
    // key: None -> table without a "key" column; Some(v) -> keyed on "key"=v.
    match key {
        None => time_value_table(rows),
        Some(v) => {
            let key_value = v.map(string).unwrap_or(Value::Null);
            let rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|(t, val)| {
                    vec![
                        t.map(Value::Time).unwrap_or(Value::Null),
                        val.map(Value::Float).unwrap_or(Value::Null),
                        key_value.clone(),
                    ]
                })
                .collect();
            let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
            table(
                &[
                    ("_time", ColumnType::Time),
                    ("_value", ColumnType::Float),
                    ("key", ColumnType::String),
                ],
                &["key"],
                &refs,
            )
        }
    }
}

#[test]
fn mismatched_schemas_rename_per_pair() {
    let a = vec![
        keyed_kv_table(Some(Some("foo")), &[(Some(1), Some(1.0)), (Some(2), Some(2.0))]),
        keyed_kv_table(None, &[(Some(1), Some(1.5)), (Some(2), Some(2.5))]),
    ];
    let b = vec![keyed_kv_table(
        Some(Some("bar")),
        &[(Some(1), Some(10.0)), (Some(2), Some(20.0))],
    )];
    let (sink, _) = run(&spec(&["_time"]), a, b);

    let tables = sorted_by_key(sink.tables());
    assert_eq!(tables.len(), 2);

    // Pair (key="foo", key="bar"): differing values, renamed on both sides.
    assert_eq!(
        labels_of(&tables[1]),
        ["key_a", "key_b", "_time", "_value_a", "_value_b"]
    );
    assert_eq!(key_labels_of(&tables[1]), ["key_a", "key_b"]);
    assert_eq!(
        rows_of(&tables[1]),
        vec![
            vec![string("foo"), string("bar"), time(1), float(1.0), float(10.0)],
            vec![string("foo"), string("bar"), time(2), float(2.0), float(20.0)],
        ]
    );

    // Pair (no key column, key="bar"): the label exists on one side only.
    assert_eq!(
        labels_of(&tables[0]),
        ["key", "_time", "_value_a", "_value_b"]
    );
    assert_eq!(key_labels_of(&tables[0]), ["key"]);
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![string("bar"), time(1), float(1.5), float(10.0)],
            vec![string("bar"), time(2), float(2.5), float(20.0)],
        ]
    );
}

#[test]
fn null_group_key_value_is_preserved_and_never_merged() {
    let a = vec![
        keyed_kv_table(Some(Some("foo")), &[(Some(1), Some(1.0)), (Some(2), Some(2.0))]),
    ];
    let b = vec![keyed_kv_table(
        Some(None),
        &[(Some(1), Some(10.0)), (Some(2), Some(20.0))],
    )];
    let (sink, _) = run(&spec(&["_time"]), a, b);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(key_labels_of(&tables[0]), ["key_a", "key_b"]);
    assert_eq!(tables[0].key().value_of("key_a"), Some(&string("foo")));
    assert_eq!(tables[0].key().value_of("key_b"), Some(&Value::Null));
}

#[test]
fn equal_null_group_key_values_still_rename() {
    let a = vec![keyed_kv_table(Some(None), &[(Some(1), Some(1.0))])];
    let b = vec![keyed_kv_table(Some(None), &[(Some(1), Some(10.0))])];
    let (sink, _) = run(&spec(&["_time"]), a, b);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(key_labels_of(&tables[0]), ["key_a", "key_b"]);
    assert_eq!(tables[0].key().value_of("key_a"), Some(&Value::Null));
    assert_eq!(tables[0].key().value_of("key_b"), Some(&Value::Null));
}

#[test]
fn equal_group_key_values_merge_into_one_column() {
    // Both sides keyed on t1="a"; t1 is not part of the predicate. Equal
    // non-null values collapse into a single key column.
    let a = tagged_table(Some("a"), &[(1, 1.0), (2, 2.0)]);
    let b = tagged_table(Some("a"), &[(1, 10.0), (2, 20.0)]);
    let (sink, _) = run(&spec(&["_time"]), vec![a], vec![b]);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(labels_of(&tables[0]), ["t1", "_time", "_value_a", "_value_b"]);
    assert_eq!(key_labels_of(&tables[0]), ["t1"]);
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![string("a"), time(1), float(1.0), float(10.0)],
            vec![string("a"), time(2), float(2.0), float(20.0)],
        ]
    );
}

fn two_tag_table(key_cols: &[&str], rows: &[(i64, f64, &str, &str)]) -> Table {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|(t, v, t1, t2)| vec![time(*t), float(*v), string(t1), string(t2)])
        .collect();
    let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
    table(
        &[
            ("_time", ColumnType::Time),
            ("_value", ColumnType::Float),
            ("t1", ColumnType::String),
            ("t2", ColumnType::String),
        ],
        key_cols,
        &refs,
    )
}

#[test]
fn key_column_colliding_with_data_column_renames_into_key() {
    // Side a keys on t1 only; side b keys on t2, which is in the predicate.
    // b's t1 is a plain data column, so a's key column becomes t1_a and b's
    // data column becomes t1_b.
    let a = vec![two_tag_table(
        &["t1"],
        &[
            (1, 1.0, "a", "x"),
            (2, 2.0, "a", "x"),
            (1, 1.5, "a", "y"),
            (2, 2.5, "a", "y"),
        ],
    )];
    let b = vec![
        two_tag_table(&["t2"], &[(1, 10.0, "a", "x"), (2, 20.0, "a", "x")]),
        two_tag_table(&["t2"], &[(1, 10.1, "a", "y"), (2, 20.1, "a", "y")]),
    ];
    let (sink, _) = run(&spec(&["_time", "t2"]), a, b);

    let tables = sorted_by_key(sink.tables());
    assert_eq!(tables.len(), 2);
    for t in &tables {
        assert_eq!(
            labels_of(t),
            ["t1_a", "t2", "_time", "_value_a", "_value_b", "t1_b"]
        );
        assert_eq!(key_labels_of(t), ["t1_a", "t2"]);
    }
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![string("a"), string("x"), time(1), float(1.0), float(10.0), string("a")],
            vec![string("a"), string("x"), time(2), float(2.0), float(20.0), string("a")],
        ]
    );
    assert_eq!(
        rows_of(&tables[1]),
        vec![
            vec![string("a"), string("y"), time(1), float(1.5), float(10.1), string("a")],
            vec![string("a"), string("y"), time(2), float(2.5), float(20.1), string("a")],
        ]
    );
}

#[test]
fn intersecting_group_keys_merge_the_shared_tag() {
    // a keyed [t1, t2], b keyed [t1]; t2 is in the predicate and t1 carries
    // the same value on both sides, so both end up as single key columns.
    let a = vec![
        two_tag_table(
            &["t1", "t2"],
            &[(1, 1.0, "a", "x"), (2, 2.0, "a", "x")],
        ),
        two_tag_table(
            &["t1", "t2"],
            &[(1, 1.5, "a", "y"), (2, 2.5, "a", "y")],
        ),
    ];
    let b = vec![two_tag_table(
        &["t1"],
        &[
            (1, 10.0, "a", "x"),
            (1, 10.1, "a", "y"),
            (2, 20.0, "a", "x"),
            (2, 20.1, "a", "y"),
        ],
    )];
    let (sink, _) = run(&spec(&["_time", "t2"]), a, b);

    let tables = sorted_by_key(sink.tables());
    assert_eq!(tables.len(), 2);
    for t in &tables {
        assert_eq!(labels_of(t), ["t1", "t2", "_time", "_value_a", "_value_b"]);
        assert_eq!(key_labels_of(t), ["t1", "t2"]);
    }
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![string("a"), string("x"), time(1), float(1.0), float(10.0)],
            vec![string("a"), string("x"), time(2), float(2.0), float(20.0)],
        ]
    );
}

#[test]
fn multiple_tables_per_bucket_append_in_arrival_order() {
    let a = vec![
        time_value_table(&[(Some(1), Some(1.0)), (Some(2), Some(2.0))]),
        time_value_table(&[(Some(3), Some(3.0))]),
    ];
    let b = vec![
        time_value_table(&[(Some(3), Some(30.0))]),
        time_value_table(&[(Some(1), Some(10.0)), (Some(2), Some(20.0))]),
    ];
    let (sink, _) = run(&spec(&["_time"]), a, b);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![time(1), float(1.0), float(10.0)],
            vec![time(2), float(2.0), float(20.0)],
            vec![time(3), float(3.0), float(30.0)],
        ]
    );
}

#[test]
fn disjoint_tag_buckets_join_pairwise() {
    let mk = |tag: &str, t: i64, v: f64| {
        let rows = [(t, v)];
        let rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|(t, v)| vec![time(*t), float(*v), string(tag)])
            .collect();
        let refs: Vec<&[Value]> = rows.iter().map(|r| r.as_slice()).collect();
        table(
            &[
                ("_time", ColumnType::Time),
                ("_value", ColumnType::Float),
                ("tag", ColumnType::String),
            ],
            &["tag"],
            &refs,
        )
    };
    let a = vec![mk("a", 1, 1.0), mk("b", 2, 2.0), mk("c", 3, 3.0)];
    let b = vec![mk("a", 1, 1.0), mk("b", 2, 2.0), mk("c", 3, 3.0)];
    let (sink, _) = run(&spec(&["_time", "tag"]), a, b);

    let tables = sorted_by_key(sink.tables());
    assert_eq!(tables.len(), 3);
    for (t, tag) in tables.iter().zip(["a", "b", "c"]) {
        assert_eq!(labels_of(t), ["tag", "_time", "_value_a", "_value_b"]);
        assert_eq!(t.key().value_of("tag"), Some(&string(tag)));
        assert_eq!(t.num_rows(), 1);
    }
}

#[test]
fn pairs_with_identical_output_keys_share_a_bucket() {
    // Two different bucket pairs derive the same output group key {k="x"}:
    // once the key comes from side a, once from side b. Their rows must land
    // in one output table, a-side arrival order first.
    let keyed = |t: i64, v: f64| {
        table(
            &[
                ("_time", ColumnType::Time),
                ("_value", ColumnType::Float),
                ("k", ColumnType::String),
            ],
            &["k"],
            &[&[time(t), float(v), string("x")]],
        )
    };
    let a = vec![keyed(1, 1.0), time_value_table(&[(Some(2), Some(2.0))])];
    let b = vec![keyed(2, 20.0), time_value_table(&[(Some(1), Some(10.0))])];
    let (sink, _) = run(&spec(&["_time"]), a, b);

    let tables = sink.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(labels_of(&tables[0]), ["k", "_time", "_value_a", "_value_b"]);
    assert_eq!(tables[0].key().value_of("k"), Some(&string("x")));
    assert_eq!(
        rows_of(&tables[0]),
        vec![
            vec![string("x"), time(1), float(1.0), float(10.0)],
            vec![string("x"), time(2), float(2.0), float(20.0)],
        ]
    );
}

#[test]
fn conflicting_schemas_for_one_output_key_are_fatal() {
    // Same output group key as above, but the second pair carries an extra
    // row column, so the two pair results cannot share a bucket.
    let keyed = |t: i64, v: f64| {
        table(
            &[
                ("_time", ColumnType::Time),
                ("_value", ColumnType::Float),
                ("k", ColumnType::String),
            ],
            &["k"],
            &[&[time(t), float(v), string("x")]],
        )
    };
    let wide = table(
        &[
            ("_time", ColumnType::Time),
            ("_value", ColumnType::Float),
            ("w", ColumnType::Int),
        ],
        &[],
        &[&[time(2), float(2.0), Value::Int(7)]],
    );
    let a = vec![keyed(1, 1.0), wide];
    let b = vec![keyed(2, 20.0), time_value_table(&[(Some(1), Some(10.0))])];
    let (sink, _) = run(&spec(&["_time"]), a, b);

    assert!(sink.tables().is_empty());
    let finishes = sink.finishes();
    assert_eq!(finishes.len(), 1);
    assert_eq!(
        finishes[0].clone().expect("error").kind(),
        ErrorKind::FailedPrecondition
    );
}

#[test]
fn swapping_inputs_swaps_the_side_suffixes() {
    let foo = || keyed_kv_table(Some(Some("foo")), &[(Some(1), Some(1.0))]);
    let bar = || keyed_kv_table(Some(Some("bar")), &[(Some(1), Some(10.0))]);

    let (sink_ab, _) = run(&spec(&["_time"]), vec![foo()], vec![bar()]);
    let (sink_ba, _) = run(&spec(&["_time"]), vec![bar()], vec![foo()]);

    let ab = sink_ab.tables();
    let ba = sink_ba.tables();
    assert_eq!(ab.len(), 1);
    assert_eq!(ba.len(), 1);
    assert_eq!(ab[0].key().value_of("key_a"), Some(&string("foo")));
    assert_eq!(ab[0].key().value_of("key_b"), Some(&string("bar")));
    assert_eq!(ba[0].key().value_of("key_a"), Some(&string("bar")));
    assert_eq!(ba[0].key().value_of("key_b"), Some(&string("foo")));
    assert_eq!(
        &rows_of(&ab[0])[0][2..],
        &[time(1), float(1.0), float(10.0)][..]
    );
    assert_eq!(
        &rows_of(&ba[0])[0][2..],
        &[time(1), float(10.0), float(1.0)][..]
    );
}

#[test]
fn rerunning_the_same_inputs_is_deterministic() {
    let run_once = || {
        let a = vec![
            keyed_kv_table(Some(Some("foo")), &[(Some(1), Some(1.0)), (Some(2), Some(2.0))]),
            keyed_kv_table(None, &[(Some(1), Some(1.5))]),
        ];
        let b = vec![keyed_kv_table(
            Some(Some("bar")),
            &[(Some(1), Some(10.0)), (Some(2), Some(20.0))],
        )];
        let (sink, _) = run(&spec(&["_time"]), a, b);
        sorted_by_key(sink.tables())
            .iter()
            .map(|t| (labels_of(t), key_labels_of(t), rows_of(t)))
            .collect::<Vec<_>>()
    };
    assert_eq!(run_once(), run_once());
}

#[test]
fn missing_join_column_fails_invalid_at_arrival() {
    let (mut jt, _, _) = join(&spec(&["_time", "t0"]));
    let err = jt
        .process(PARENT_A, time_value_table(&[(Some(1), Some(1.0))]))
        .expect_err("missing join column");
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.message().contains("t0"), "{}", err);
}

#[test]
fn join_column_type_conflict_within_a_side_fails_invalid() {
    let (mut jt, _, _) = join(&spec(&["_time", "v"]));
    let int_table = table(
        &[("_time", ColumnType::Time), ("v", ColumnType::Int)],
        &[],
        &[&[time(1), Value::Int(1)]],
    );
    let float_table = table(
        &[("_time", ColumnType::Time), ("v", ColumnType::Float)],
        &[],
        &[&[time(1), float(1.0)]],
    );
    jt.process(PARENT_A, int_table).expect("first schema");
    let err = jt
        .process(PARENT_A, float_table)
        .expect_err("conflicting schema");
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[test]
fn join_column_type_conflict_across_sides_fails_at_matching() {
    let (mut jt, sink, _) = join(&spec(&["_time", "v"]));
    let int_table = table(
        &[("_time", ColumnType::Time), ("v", ColumnType::Int)],
        &[],
        &[&[time(1), Value::Int(1)]],
    );
    let float_table = table(
        &[("_time", ColumnType::Time), ("v", ColumnType::Float)],
        &[],
        &[&[time(1), float(1.0)]],
    );
    jt.process(PARENT_A, int_table).expect("side a");
    jt.process(PARENT_B, float_table).expect("side b");
    jt.finish(PARENT_A, None);
    jt.finish(PARENT_B, None);

    assert!(sink.tables().is_empty());
    let finishes = sink.finishes();
    assert_eq!(finishes.len(), 1);
    let err = finishes[0].clone().expect("error");
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert!(err.message().contains("\"v\""), "{}", err);
}

#[test]
fn parent_error_short_circuits_and_is_forwarded_once() {
    let (mut jt, sink, tracker) = join(&spec(&["_time"]));
    jt.process(PARENT_A, time_value_table(&[(Some(1), Some(1.0))]))
        .expect("buffered");
    assert!(tracker.current() > 0);

    let upstream = EngineError::internal("expected error");
    jt.finish(PARENT_A, Some(upstream.clone()));
    jt.finish(PARENT_B, Some(upstream.clone()));

    assert!(sink.tables().is_empty());
    assert_eq!(sink.finishes(), vec![Some(upstream)]);
    // Cancellation releases every buffered column.
    assert_eq!(tracker.current(), 0);
}

#[test]
fn tables_after_error_are_ignored() {
    let (mut jt, sink, _) = join(&spec(&["_time"]));
    jt.finish(PARENT_A, Some(EngineError::internal("boom")));
    jt.process(PARENT_B, time_value_table(&[(Some(1), Some(1.0))]))
        .expect("dropped quietly");
    jt.finish(PARENT_B, None);
    assert!(sink.tables().is_empty());
    assert_eq!(sink.finishes().len(), 1);
}

#[test]
fn finish_is_idempotent_per_parent() {
    let a = time_value_table(&[(Some(1), Some(1.0))]);
    let b = time_value_table(&[(Some(1), Some(10.0))]);
    let (mut jt, sink, _) = join(&spec(&["_time"]));
    jt.process(PARENT_A, a).unwrap();
    jt.process(PARENT_B, b).unwrap();
    jt.finish(PARENT_A, None);
    jt.finish(PARENT_A, None);
    assert!(sink.tables().is_empty());
    jt.finish(PARENT_B, None);
    assert_eq!(sink.tables().len(), 1);
    assert_eq!(sink.finishes(), vec![None]);
}

#[test]
fn retraction_is_unimplemented() {
    let (mut jt, _, _) = join(&spec(&["_time"]));
    let err = jt
        .retract_table(PARENT_A, &GroupKey::empty())
        .expect_err("retract");
    assert_eq!(err.kind(), ErrorKind::Unimplemented);
}

#[test]
fn watermarks_are_recorded_but_do_not_drive_matching() {
    let (mut jt, sink, _) = join(&spec(&["_time"]));
    jt.process(PARENT_A, time_value_table(&[(Some(1), Some(1.0))]))
        .unwrap();
    jt.process(PARENT_B, time_value_table(&[(Some(1), Some(10.0))]))
        .unwrap();
    jt.update_watermark(PARENT_A, 100).unwrap();
    jt.update_watermark(PARENT_B, 100).unwrap();
    jt.update_processing_time(PARENT_A, 200).unwrap();
    assert!(sink.tables().is_empty());
    jt.finish(PARENT_A, None);
    jt.finish(PARENT_B, None);
    assert_eq!(sink.tables().len(), 1);
}

#[test]
fn memory_budget_exhaustion_is_fatal() {
    let sink = CollectingSink::default();
    let tracker = MemTracker::new_root_with_limit("join-test", 64);
    let mut jt =
        MergeJoinTransformation::new(&spec(&["_time"]), Box::new(sink.clone()), &tracker)
            .expect("join");
    let big = time_value_table(&[
        (Some(1), Some(1.0)),
        (Some(2), Some(2.0)),
        (Some(3), Some(3.0)),
        (Some(4), Some(4.0)),
    ]);
    let err = jt.process(PARENT_A, big).expect_err("over budget");
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

#[test]
fn buffered_memory_is_released_after_flush() {
    let a = time_value_table(&[(Some(1), Some(1.0))]);
    let b = time_value_table(&[(Some(1), Some(10.0))]);
    let (mut jt, sink, tracker) = join(&spec(&["_time"]));
    jt.process(PARENT_A, a).unwrap();
    jt.process(PARENT_B, b).unwrap();
    assert!(tracker.current() > 0);
    jt.finish(PARENT_A, None);
    jt.finish(PARENT_B, None);
    assert_eq!(sink.tables().len(), 1);
    assert_eq!(tracker.current(), 0);
    assert!(tracker.peak() > 0);
}
