//! Integration tests for the full query workflow.

use colflow::{col, lit, Column, ExecutorConfig, JoinType, LazyFrame, QueryExecutor, Table, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ints(table: &Table, name: &str) -> Vec<Option<i64>> {
    table
        .column(name)
        .expect("column exists")
        .as_integer()
        .expect("integer column")
        .to_vec()
}

// =============================================================================
// Join Scenarios
// =============================================================================

mod join_scenarios {
    use super::*;

    fn a() -> LazyFrame {
        LazyFrame::scan(
            Table::new(vec![
                ("id", Column::from(vec![1i64, 2, 3])),
                ("v", Column::from(vec![10i64, 20, 30])),
            ])
            .expect("table A"),
        )
    }

    fn b() -> LazyFrame {
        LazyFrame::scan(
            Table::new(vec![
                ("id", Column::from(vec![2i64, 3, 4])),
                ("w", Column::from(vec![200i64, 300, 400])),
            ])
            .expect("table B"),
        )
    }

    #[test]
    fn test_left_join() {
        init_tracing();
        let out = a().join(b(), &["id"], JoinType::Left).collect().expect("collect");
        assert_eq!(out.column_names(), vec!["id", "v", "w"]);
        assert_eq!(ints(&out, "id"), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(ints(&out, "v"), vec![Some(10), Some(20), Some(30)]);
        assert_eq!(ints(&out, "w"), vec![None, Some(200), Some(300)]);
    }

    #[test]
    fn test_outer_join() {
        let out = a().join(b(), &["id"], JoinType::Outer).collect().expect("collect");
        assert_eq!(ints(&out, "id"), vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(ints(&out, "v"), vec![Some(10), Some(20), Some(30), None]);
        assert_eq!(ints(&out, "w"), vec![None, Some(200), Some(300), Some(400)]);
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = LazyFrame::scan(
            Table::new(vec![
                ("k", Column::from(vec![None, Some("x")])),
                ("l", Column::from(vec![1i64, 2])),
            ])
            .expect("left"),
        );
        let right = LazyFrame::scan(
            Table::new(vec![
                ("k", Column::from(vec![None, Some("x")])),
                ("r", Column::from(vec![3i64, 4])),
            ])
            .expect("right"),
        );
        let inner = left
            .clone()
            .join(right.clone(), &["k"], JoinType::Inner)
            .collect()
            .expect("inner");
        assert_eq!(inner.num_rows(), 1);
        assert_eq!(ints(&inner, "r"), vec![Some(4)]);

        let outer = left.join(right, &["k"], JoinType::Outer).collect().expect("outer");
        assert_eq!(outer.num_rows(), 3);
        assert_eq!(ints(&outer, "l"), vec![Some(1), Some(2), None]);
        assert_eq!(ints(&outer, "r"), vec![None, Some(4), Some(3)]);
    }

    #[test]
    fn test_join_on_different_names() {
        let right = LazyFrame::scan(
            Table::new(vec![
                ("key", Column::from(vec![3i64, 1])),
                ("v", Column::from(vec!["three", "one"])),
            ])
            .expect("right"),
        );
        let out = a()
            .join_on(right, &["id"], &["key"], JoinType::Inner)
            .collect()
            .expect("collect");
        assert_eq!(out.column_names(), vec!["id", "v", "v_right"]);
        assert_eq!(ints(&out, "id"), vec![Some(1), Some(3)]);
        assert_eq!(out.value(1, "v_right").expect("cell"), Value::String("three".into()));
    }
}

// =============================================================================
// Aggregation & Reshape
// =============================================================================

mod aggregation {
    use std::collections::HashSet;

    use colflow::executor::group_by;
    use colflow::AggregateFunction;

    use super::*;

    #[test]
    fn test_null_group_scenario() {
        let table = Table::new(vec![
            ("g", Column::from(vec![Some("a"), Some("a"), Some("b"), None])),
            ("x", Column::from(vec![1i64, 2, 3, 4])),
        ])
        .expect("table");
        let out = LazyFrame::scan(table)
            .group_by(&["g"])
            .agg(vec![col("x").sum()])
            .collect()
            .expect("collect");
        assert_eq!(out.column_names(), vec!["g", "x_sum"]);
        assert_eq!(out.value(0, "g").expect("cell"), Value::String("a".into()));
        assert_eq!(out.value(1, "g").expect("cell"), Value::String("b".into()));
        assert!(out.is_null(2, "g").expect("cell"));
        assert_eq!(ints(&out, "x_sum"), vec![Some(3), Some(3), Some(4)]);
    }

    #[test]
    fn test_all_null_group_sums_to_null() {
        let table = Table::new(vec![
            ("g", Column::from(vec!["a", "a", "b"])),
            ("x", Column::from(vec![None, None, Some(1i64)])),
        ])
        .expect("table");
        let out = LazyFrame::scan(table)
            .group_by(&["g"])
            .agg(vec![col("x").sum(), col("x").count()])
            .collect()
            .expect("collect");
        assert_eq!(ints(&out, "x_sum"), vec![None, Some(1)]);
        assert_eq!(ints(&out, "x_count"), vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_pivot_then_unpivot_round_trip() {
        let table = Table::new(vec![
            ("k", Column::from(vec!["p", "p", "q", "q", "r", "p"])),
            ("c", Column::from(vec!["x", "y", "x", "x", "y", "x"])),
            ("v", Column::from(vec![Some(1i64), Some(2), Some(3), None, None, Some(5)])),
        ])
        .expect("table");

        let executor = QueryExecutor::with_default_config().expect("executor");
        let aggregated = group_by(&table, &["k", "c"], &executor)
            .expect("group")
            .aggregate(&[("v", AggregateFunction::Sum)])
            .expect("aggregate");
        let expected: HashSet<(Value, Value, Value)> = (0..aggregated.num_rows())
            .filter(|&r| !aggregated.is_null(r, "v_sum").expect("cell"))
            .map(|r| {
                (
                    aggregated.value(r, "k").expect("cell"),
                    aggregated.value(r, "c").expect("cell"),
                    aggregated.value(r, "v_sum").expect("cell"),
                )
            })
            .collect();

        let wide = LazyFrame::scan(table)
            .pivot("k", "c", "v", AggregateFunction::Sum)
            .collect()
            .expect("pivot");
        assert_eq!(wide.column_names(), vec!["k", "x", "y"]);

        let long = LazyFrame::scan(wide)
            .unpivot(&["k"], &["x", "y"], "c", "v")
            .collect()
            .expect("unpivot");
        let actual: HashSet<(Value, Value, Value)> = (0..long.num_rows())
            .map(|r| {
                (
                    long.value(r, "k").expect("cell"),
                    long.value(r, "c").expect("cell"),
                    long.value(r, "v").expect("cell"),
                )
            })
            .collect();

        assert_eq!(actual, expected);
        assert_eq!(long.num_rows(), expected.len());
    }
}

// =============================================================================
// Error Attribution
// =============================================================================

mod errors {
    use colflow::ColflowError;

    use super::*;

    #[test]
    fn test_failing_node_is_named() {
        let table = Table::new(vec![("x", Column::from(vec![4i64, 0]))]).expect("table");
        let err = LazyFrame::scan(table)
            .sort(vec![colflow::SortExpr::asc("x")])
            .with_column("q", lit(8) / col("x"))
            .limit(1)
            .collect()
            .expect_err("division by zero");
        assert_eq!(err.failed_node(), Some("WithColumns"));
        assert!(matches!(err.root_cause(), ColflowError::DivisionByZero));
        assert!(err.to_string().contains("WithColumns"));
    }

    #[test]
    fn test_fused_failure_names_fused_node() {
        let table = Table::new(vec![("x", Column::from(vec![1i64, 2]))]).expect("table");
        let err = LazyFrame::scan(table)
            .with_column("s", col("x") + lit("oops"))
            .filter(col("x").gt(lit(0)))
            .with_fusion(true)
            .collect()
            .expect_err("type mismatch");
        assert_eq!(err.failed_node(), Some("Fused"));
        assert!(matches!(err.root_cause(), ColflowError::TypeMismatch { .. }));
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn test_shared_executor_across_threads() {
        init_tracing();
        let executor = QueryExecutor::new(
            ExecutorConfig::new()
                .with_num_threads(4)
                .with_chunk_size(64)
                .with_parallel_threshold(256),
        )
        .expect("executor");
        let n = 2_000i64;
        let facts = Table::new(vec![
            ("k", Column::from((0..n).map(|i| i % 50).collect::<Vec<_>>())),
            ("x", Column::from((0..n).collect::<Vec<_>>())),
        ])
        .expect("facts");
        let dims = Table::new(vec![
            ("k", Column::from((0..50i64).collect::<Vec<_>>())),
            ("w", Column::from((0..50i64).map(|i| i * 10).collect::<Vec<_>>())),
        ])
        .expect("dims");

        let query = LazyFrame::scan(facts)
            .with_column("y", col("x") * lit(2))
            .filter(col("y").gt(lit(100)))
            .join(LazyFrame::scan(dims), &["k"], JoinType::Inner)
            .group_by(&["k"])
            .agg(vec![col("w").count()])
            .with_fusion(true);
        let expected = query.collect_with(&executor).expect("baseline");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let out = query.collect_with(&executor).expect("collect");
                    assert_eq!(out, expected);
                });
            }
        });

        let stats = executor.memory_pool().stats();
        assert_eq!(stats.outstanding, 0);
        assert!(stats.reuses > 0);
        assert!(stats.reuse_rate() > 0.0 && stats.reuse_rate() <= 1.0);
    }
}

// =============================================================================
// Properties
// =============================================================================

mod properties {
    use proptest::prelude::*;

    use super::*;

    fn executor() -> QueryExecutor {
        QueryExecutor::new(ExecutorConfig::new().with_chunk_size(1000).with_num_threads(4))
            .expect("executor")
    }

    /// Builds a row-local chain whose steps only touch `x`, `f` or fresh columns.
    fn chain(frame: LazyFrame, ops: &[u8]) -> LazyFrame {
        ops.iter().enumerate().fold(frame, |frame, (i, op)| match op {
            0 => frame.with_column("x", col("x") + lit(1)),
            1 => frame.filter(col("x").gt(lit(-500)).or(col("x").is_null())),
            2 => frame.with_column(format!("y{i}"), col("x") * lit(3)),
            3 => frame.select(vec![col("x"), col("f")]),
            4 => frame.with_column("f", col("f") * lit(-1.0)),
            _ => frame.filter(col("f").lt(lit(0.5)).or(col("f").is_null())),
        })
    }

    /// Float cells lean on the awkward values: NaN, both zeros and null.
    fn float_cell() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![
            Just(Some(f64::NAN)),
            Just(Some(-0.0)),
            Just(Some(0.0)),
            Just(None),
            (-2.0f64..2.0).prop_map(Some),
        ]
    }

    fn table_strategy() -> impl Strategy<Value = Table> {
        prop_oneof![Just(0usize), Just(1usize), Just(10_000usize)].prop_flat_map(|rows| {
            (
                proptest::collection::vec(proptest::option::of(-1000i64..1000), rows),
                proptest::collection::vec(float_cell(), rows),
            )
                .prop_map(|(x, f)| {
                    Table::new(vec![("x", Column::from(x)), ("f", Column::from(f))])
                        .expect("table")
                })
        })
    }

    fn ops_strategy() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![Just(1usize), Just(2usize), Just(10usize)]
            .prop_flat_map(|len| proptest::collection::vec(0u8..6, len))
    }

    fn keyed(keys: Vec<Option<i64>>, payload: &str) -> Table {
        let n = keys.len() as i64;
        Table::new(vec![
            ("k", Column::from(keys)),
            (payload, Column::from((0..n).collect::<Vec<_>>())),
        ])
        .expect("table")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Property: fused execution matches unfused execution cell for cell
        #[test]
        fn test_fused_equals_unfused(table in table_strategy(), ops in ops_strategy()) {
            let executor = executor();
            let query = chain(LazyFrame::scan(table), &ops);
            let unfused = query.clone().with_fusion(false).collect_with(&executor).expect("unfused");
            let fused = query.with_fusion(true).collect_with(&executor).expect("fused");
            prop_assert_eq!(fused, unfused);
        }

        /// Property: joining a table with itself on every column is the identity
        #[test]
        fn test_identity_join(
            rows in 0usize..200,
            salt in proptest::collection::vec(0i64..5, 200),
        ) {
            let table = Table::new(vec![
                ("id", Column::from((0..rows as i64).collect::<Vec<_>>())),
                ("s", Column::from(salt[..rows].to_vec())),
            ])
            .expect("table");
            let out = LazyFrame::scan(table.clone())
                .join(LazyFrame::scan(table.clone()), &["id", "s"], JoinType::Inner)
                .collect()
                .expect("join");
            prop_assert_eq!(out.num_rows(), rows);
            prop_assert_eq!(out, table);
        }

        /// Property: outer join rows = matched pairs + unmatched left + unmatched right
        #[test]
        fn test_outer_join_cardinality(
            left in proptest::collection::vec(proptest::option::of(0i64..6), 0..40),
            right in proptest::collection::vec(proptest::option::of(0i64..6), 0..40),
        ) {
            let matches = |k: &Option<i64>, side: &[Option<i64>]| {
                k.map_or(0, |k| side.iter().filter(|o| **o == Some(k)).count())
            };
            let matched: usize = left.iter().map(|k| matches(k, &right)).sum();
            let left_unmatched = left.iter().filter(|k| matches(k, &right) == 0).count();
            let right_unmatched = right.iter().filter(|k| matches(k, &left) == 0).count();

            let executor = QueryExecutor::new(
                ExecutorConfig::new().with_num_threads(3).with_parallel_threshold(8).with_chunk_size(5),
            )
            .expect("executor");
            let l = LazyFrame::scan(keyed(left, "l"));
            let r = LazyFrame::scan(keyed(right, "r"));

            let outer = l.clone().join(r.clone(), &["k"], JoinType::Outer).collect_with(&executor).expect("outer");
            prop_assert_eq!(outer.num_rows(), matched + left_unmatched + right_unmatched);
            let inner = l.join(r, &["k"], JoinType::Inner).collect_with(&executor).expect("inner");
            prop_assert_eq!(inner.num_rows(), matched);
        }
    }
}
