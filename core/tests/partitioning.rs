//! Partition discovery, pruning and schema unification properties

mod common;

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use bytes::Bytes;
use common::*;
use strata_core::expression::{
    and, equal, field, greater, greater_equal, in_list, is_valid, less, lit, not, not_equal, or,
};
use strata_core::partition::NULL_PARTITION_VALUE;
use strata_core::schema::unify_schemas;
use strata_core::{
    DataSource, DataSourceDiscovery, Dataset, DatasetError, Expression,
    FileSystemDataSourceDiscovery, FileSystemDiscoveryOptions, HivePartitionScheme,
    ParquetFileFormat, PartitionScheme, Partitioning, Scalar,
};
use tracing_test::traced_test;

fn discovery(
    files: &[(&str, Bytes)],
    partitioning: Partitioning,
) -> FileSystemDataSourceDiscovery {
    FileSystemDataSourceDiscovery::new(
        filesystem_with(files),
        "",
        Arc::new(ParquetFileFormat::new()),
        FileSystemDiscoveryOptions::default().with_partitioning(partitioning),
    )
}

#[test]
#[traced_test]
fn test_non_strict_ignores_malformed_segment() {
    let data = id_val_parquet(0..3);
    let mut discovery = discovery(
        &[("region=west/bad_segment/data.parquet", data)],
        Partitioning::hive(false),
    );
    let source = discovery.finish().unwrap();
    let fragments = source.fragments();
    assert_eq!(fragments.len(), 1);
    assert_eq!(
        fragments[0].partition_expression(),
        &equal(field("region"), lit("west"))
    );
    assert!(logs_contain("ignoring partition segment"));
}

#[test]
fn test_strict_rejects_malformed_segment() {
    let data = id_val_parquet(0..3);
    let mut discovery = discovery(
        &[("region=west/bad_segment/data.parquet", data)],
        Partitioning::hive(true),
    );
    match discovery.inspect() {
        Err(DatasetError::ParseError(message)) => assert!(message.contains("bad_segment")),
        other => panic!("expected a parse error, got {:?}", other),
    }
    assert!(matches!(discovery.finish(), Err(DatasetError::ParseError(_))));
}

#[test]
fn test_strict_fixed_scheme_rejects_bad_value() {
    let scheme = HivePartitionScheme::new(Arc::new(Schema::new(vec![Field::new(
        "year",
        DataType::Int32,
        true,
    )])))
    .with_strict(true);
    let mut discovery = discovery(
        &[("year=twenty/data.parquet", id_val_parquet(0..3))],
        Partitioning::scheme(scheme),
    );
    assert!(matches!(discovery.inspect(), Err(DatasetError::ParseError(_))));
}

#[test]
fn test_hive_round_trip() {
    let mut discovery = discovery(
        &[("year=2020/month=01/part-0.parquet", id_val_parquet(0..3))],
        Partitioning::hive(true),
    );
    let schema = discovery.inspect().unwrap();
    assert_eq!(schema.field_with_name("year").unwrap().data_type(), &DataType::Int32);
    assert_eq!(schema.field_with_name("month").unwrap().data_type(), &DataType::Utf8);

    let partition_schema = Arc::new(Schema::new(vec![
        schema.field_with_name("year").unwrap().clone(),
        schema.field_with_name("month").unwrap().clone(),
    ]));
    let scheme = HivePartitionScheme::new(partition_schema);
    let expr = scheme.parse("year=2020/month=01/part-0.parquet").unwrap();
    let rendered = scheme.format(&expr).unwrap();
    assert_eq!(rendered, "year=2020/month=01");

    // Key order in the path does not matter.
    let reordered = scheme.parse("month=01/year=2020/part-0.parquet").unwrap();
    assert_eq!(reordered.known_bindings(), expr.known_bindings());
    assert_eq!(scheme.format(&reordered).unwrap(), rendered);
}

#[test]
fn test_hive_round_trip_escaped_and_null_values() {
    let scheme = HivePartitionScheme::new(Arc::new(Schema::new(vec![
        Field::new("city", DataType::Utf8, true),
        Field::new("zone", DataType::Utf8, true),
    ])));
    let path = format!("city=New%20York/zone={}/f.parquet", NULL_PARTITION_VALUE);
    let expr = scheme.parse(&path).unwrap();
    let bindings = expr.known_bindings();
    assert_eq!(bindings.get("city"), Some(&Scalar::from("New York")));
    assert_eq!(bindings.get("zone"), Some(&Scalar::Null));
    assert_eq!(
        scheme.format(&expr).unwrap(),
        format!("city=New%20York/zone={}", NULL_PARTITION_VALUE)
    );
}

#[test]
fn test_null_partition_is_pruned_by_equality() {
    let null_path = format!("zone={}/a.parquet", NULL_PARTITION_VALUE);
    let fs = filesystem_with(&[
        (null_path.as_str(), id_val_parquet(0..3)),
        ("zone=7/b.parquet", id_val_parquet(3..6)),
    ]);
    let dataset = Dataset::discover(
        fs,
        "",
        Arc::new(ParquetFileFormat::new()),
        FileSystemDiscoveryOptions::default().with_partitioning(Partitioning::hive(false)),
    )
    .unwrap();

    let scanner = dataset.new_scan().filter(equal(field("zone"), lit(7))).build().unwrap();
    let tasks = scanner.scan().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].fragment().path(), "zone=7/b.parquet");

    let nulls = dataset
        .new_scan()
        .filter(not(is_valid(field("zone"))))
        .build()
        .unwrap();
    assert_eq!(collect_ids(&nulls.to_batches().unwrap()), vec![0, 1, 2]);
}

#[test]
fn test_directory_partitioning() {
    let mut discovery = discovery(
        &[
            ("2021/eu/a.parquet", id_val_parquet(0..2)),
            ("2022/us/b.parquet", id_val_parquet(2..4)),
        ],
        Partitioning::directory(vec!["year".to_string(), "area".to_string()]),
    );
    let source = discovery.finish().unwrap();
    let fragments = source.fragments();
    assert_eq!(
        fragments[1].partition_expression(),
        &and(equal(field("year"), lit(2022)), equal(field("area"), lit("us")))
    );
    let dataset = Dataset::new(vec![source]).unwrap();
    let scanner = dataset
        .new_scan()
        .filter(greater(field("year"), lit(2021)))
        .build()
        .unwrap();
    assert_eq!(scanner.scan().unwrap().len(), 1);
    assert_eq!(collect_ids(&scanner.to_batches().unwrap()), vec![2, 3]);
}

/// Filters built solely over the `year`/`month` partition keys.
fn partition_filters() -> Vec<Expression> {
    vec![
        equal(field("year"), lit(2021)),
        not_equal(field("year"), lit(2020)),
        less(field("month"), lit(3)),
        and(greater_equal(field("year"), lit(2021)), equal(field("month"), lit(2))),
        and(equal(field("year"), lit(2019)), equal(field("month"), lit(1))),
        in_list(field("month"), vec![Scalar::from(1), Scalar::from(3)]),
        or(equal(field("year"), lit(2020)), equal(field("month"), lit(3))),
        not(equal(field("month"), lit(1))),
    ]
}

fn year_month_dataset() -> Dataset {
    let mut files = Vec::new();
    for year in 2020..2023 {
        for month in 1..4 {
            files.push((format!("year={}/month={}/data.parquet", year, month), id_val_parquet(0..2)));
        }
    }
    let refs: Vec<(&str, Bytes)> = files.iter().map(|(p, d)| (p.as_str(), d.clone())).collect();
    Dataset::discover(
        filesystem_with(&refs),
        "",
        Arc::new(ParquetFileFormat::new()),
        FileSystemDiscoveryOptions::default().with_partitioning(Partitioning::hive(true)),
    )
    .unwrap()
}

fn holds(filter: &Expression, year: i32, month: i32) -> bool {
    let bound = and(equal(field("year"), lit(year)), equal(field("month"), lit(month)));
    filter.simplify(&bound).unwrap().is_true()
}

#[test]
fn test_pruning_is_complete_for_partition_only_filters() {
    let dataset = year_month_dataset();
    for filter in partition_filters() {
        let scanner = dataset.new_scan().filter(filter.clone()).build().unwrap();
        let mut planned: Vec<String> = scanner
            .scan()
            .unwrap()
            .iter()
            .map(|t| t.fragment().path().to_string())
            .collect();
        planned.sort();

        let mut expected = Vec::new();
        for year in 2020..2023 {
            for month in 1..4 {
                if holds(&filter, year, month) {
                    expected.push(format!("year={}/month={}/data.parquet", year, month));
                }
            }
        }
        expected.sort();
        assert_eq!(planned, expected, "filter {}", filter);
    }
}

#[test]
fn test_simplify_is_idempotent() {
    let givens = vec![
        Expression::TRUE,
        equal(field("year"), lit(2021)),
        and(equal(field("year"), lit(2020)), equal(field("month"), lit(3))),
        not(is_valid(field("month"))),
        and(greater(field("id"), lit(5)), less(field("id"), lit(9))),
    ];
    let mut filters = partition_filters();
    filters.push(and(greater(field("id"), lit(3)), equal(field("year"), lit(2021))));
    filters.push(or(less(field("id"), lit(0)), is_valid(field("month"))));
    for filter in &filters {
        for given in &givens {
            let once = filter.simplify(given).unwrap();
            let twice = once.simplify(given).unwrap();
            assert_eq!(once, twice, "filter {} given {}", filter, given);
        }
    }
}

#[test]
fn test_unification_is_order_independent() {
    let a = Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("val", DataType::Float64, false),
    ]);
    let b = Schema::new(vec![
        Field::new("val", DataType::Float64, true),
        Field::new("tag", DataType::Utf8, false),
    ]);
    let c = Schema::new(vec![Field::new("id", DataType::Int32, false)]);
    let orders = [
        vec![&a, &b, &c],
        vec![&a, &c, &b],
        vec![&b, &a, &c],
        vec![&b, &c, &a],
        vec![&c, &a, &b],
        vec![&c, &b, &a],
    ];
    let first = unify_schemas(orders[0].iter().copied()).unwrap();
    for order in &orders[1..] {
        assert_eq!(unify_schemas(order.iter().copied()).unwrap(), first);
    }
    // Associativity: unifying a partial result gives the same schema.
    let ab = unify_schemas([&a, &b]).unwrap();
    assert_eq!(unify_schemas([&ab, &c]).unwrap(), first);

    let conflicting = Schema::new(vec![Field::new("id", DataType::Utf8, true)]);
    for order in [vec![&a, &conflicting], vec![&conflicting, &a]] {
        assert!(matches!(
            unify_schemas(order.into_iter()),
            Err(DatasetError::SchemaConflict(_))
        ));
    }
}

#[test]
fn test_discovery_order_does_not_change_schema() {
    let with_tag = {
        let batch = id_val_batch(0..2);
        let tag = arrow::array::StringArray::from(vec!["x", "y"]);
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("val", DataType::Float64, false),
            Field::new("tag", DataType::Utf8, true),
        ]));
        let mut columns = batch.columns().to_vec();
        columns.push(Arc::new(tag));
        parquet_bytes(&arrow::array::RecordBatch::try_new(schema, columns).unwrap())
    };
    let plain = id_val_parquet(0..2);

    let forward = discovery(
        &[("a.parquet", with_tag.clone()), ("b.parquet", plain.clone())],
        Partitioning::default(),
    )
    .inspect()
    .unwrap();
    let backward = discovery(
        &[("a.parquet", plain), ("b.parquet", with_tag)],
        Partitioning::default(),
    )
    .inspect()
    .unwrap();
    assert_eq!(forward, backward);
}
