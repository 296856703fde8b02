// Shared command and metadata builders for service tests

use std::sync::Arc;

use crate::models::{
    ColumnMetadata, Command, ComparisonOp, Condition, Expression, Insert, InsertSource, RuntimeType, Select,
    TableMetadata, TableReference, Value,
};

/// Logical table `T` stored natively as `T_NATIVE`, with `c1` in family `f` as `a`
pub fn t_native() -> TableMetadata {
    TableMetadata::new(
        "T",
        vec![
            ColumnMetadata::new("c1", RuntimeType::String).with_name_in_source("f.a"),
            ColumnMetadata::new("c2", RuntimeType::Integer),
            ColumnMetadata::new("payload", RuntimeType::Blob).with_name_in_source("f.payload"),
        ],
    )
    .with_name_in_source("T_NATIVE")
    .with_primary_key(["c2"])
}

pub fn people() -> TableMetadata {
    TableMetadata::new(
        "people",
        vec![
            ColumnMetadata::new("id", RuntimeType::Integer),
            ColumnMetadata::new("name", RuntimeType::String),
            ColumnMetadata::new("born", RuntimeType::Date),
            ColumnMetadata::new("photo", RuntimeType::Blob),
        ],
    )
    .with_primary_key(["id"])
}

/// `INSERT INTO T (c1, c2) VALUES (?, ?)` with the given parameter rows
pub fn parameterized_insert(rows: Vec<Vec<Value>>) -> Command {
    let table = TableReference::new(t_native());
    Command::Insert(Insert {
        columns: vec![table.column("c1"), table.column("c2")],
        source: InsertSource::Parameterized {
            values: vec![
                Expression::parameter(0, RuntimeType::String),
                Expression::parameter(1, RuntimeType::Integer),
            ],
            rows,
        },
        table,
    })
}

pub fn insert_rows(count: usize) -> Vec<Vec<Value>> {
    (0..count)
        .map(|i| vec![Value::String(format!("row-{}", i)), Value::Integer(i as i32)])
        .collect()
}

/// `SELECT <columns> FROM <table> WHERE <column> = <literal>`
pub fn select_where(table: TableMetadata, columns: &[&str], column: &str, literal: Expression) -> Command {
    let table = Arc::new(table);
    let reference = TableReference {
        name: table.full_name(),
        alias: None,
        metadata: Some(table),
    };
    Command::Select(Select {
        projection: columns
            .iter()
            .map(|c| Expression::from(reference.column(c)).into())
            .collect(),
        where_clause: Some(Condition::compare(reference.column(column), ComparisonOp::Eq, literal)),
        from: vec![reference],
        ..Default::default()
    })
}
