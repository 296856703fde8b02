// Schema Mapper
//
// Derives the native schema (table name, column family / qualifier, native type
// code) of a logical table for the column-family store, together with the DDL that
// registers the mapping with the store. Mappings are cached per logical table and
// never patched: metadata that no longer matches a cached mapping produces a fresh
// one. The mapper only registers the DDL with the publication cache; executing it
// is the execution controller's job.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::CompileError;
use crate::models::{RuntimeType, TableMetadata};
use crate::services::publication::SchemaPublicationCache;

/// Delimiter between family and qualifier in a cell annotation
pub const FAMILY_DELIMITER: char = '.';

/// Native column type codes of the column-family store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeTypeCode {
    Varchar,
    Char,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Float,
    Double,
    Date,
    Time,
    Timestamp,
    Varbinary,
}

impl NativeTypeCode {
    /// Explicit mapping from runtime types; `None` means the store cannot hold the type
    pub fn for_runtime_type(ty: RuntimeType) -> Option<Self> {
        let code = match ty {
            RuntimeType::String => NativeTypeCode::Varchar,
            RuntimeType::Char => NativeTypeCode::Char,
            RuntimeType::Boolean => NativeTypeCode::Boolean,
            RuntimeType::Byte => NativeTypeCode::TinyInt,
            RuntimeType::Short => NativeTypeCode::SmallInt,
            RuntimeType::Integer => NativeTypeCode::Integer,
            RuntimeType::Long => NativeTypeCode::BigInt,
            RuntimeType::BigInteger | RuntimeType::BigDecimal => NativeTypeCode::Decimal,
            RuntimeType::Float => NativeTypeCode::Float,
            RuntimeType::Double => NativeTypeCode::Double,
            RuntimeType::Date => NativeTypeCode::Date,
            RuntimeType::Time => NativeTypeCode::Time,
            RuntimeType::Timestamp => NativeTypeCode::Timestamp,
            RuntimeType::Varbinary | RuntimeType::Blob => NativeTypeCode::Varbinary,
            RuntimeType::Clob | RuntimeType::Xml | RuntimeType::Object => return None,
        };
        Some(code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NativeTypeCode::Varchar => "VARCHAR",
            NativeTypeCode::Char => "CHAR(1)",
            NativeTypeCode::Boolean => "BOOLEAN",
            NativeTypeCode::TinyInt => "TINYINT",
            NativeTypeCode::SmallInt => "SMALLINT",
            NativeTypeCode::Integer => "INTEGER",
            NativeTypeCode::BigInt => "BIGINT",
            NativeTypeCode::Decimal => "DECIMAL",
            NativeTypeCode::Float => "FLOAT",
            NativeTypeCode::Double => "DOUBLE",
            NativeTypeCode::Date => "DATE",
            NativeTypeCode::Time => "TIME",
            NativeTypeCode::Timestamp => "TIMESTAMP",
            NativeTypeCode::Varbinary => "VARBINARY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeColumn {
    pub logical_name: String,
    pub family: Option<String>,
    pub qualifier: String,
    pub type_code: NativeTypeCode,
    pub primary_key: bool,
}

impl NativeColumn {
    /// Name parts in store order: family (if any) then qualifier
    pub fn name_parts(&self) -> Vec<&str> {
        match &self.family {
            Some(family) => vec![family.as_str(), self.qualifier.as_str()],
            None => vec![self.qualifier.as_str()],
        }
    }
}

/// Mapping of one logical table onto the column-family store
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSchema {
    pub logical_table: String,
    pub native_table: String,
    pub columns: Vec<NativeColumn>,
    /// DDL registering this mapping with the store
    pub publication_statement: String,
    /// Metadata the mapping was derived from
    pub source: Arc<TableMetadata>,
}

impl NativeSchema {
    pub fn column(&self, logical_name: &str) -> Option<&NativeColumn> {
        self.columns
            .iter()
            .find(|c| c.logical_name.eq_ignore_ascii_case(logical_name))
    }
}

/// Split a cell annotation into (family, qualifier)
///
/// Exactly two non-empty parts around the first delimiter give a family and a
/// qualifier; anything else is a bare qualifier.
pub fn split_annotation(annotation: &str) -> (Option<String>, String) {
    match annotation.split_once(FAMILY_DELIMITER) {
        Some((family, qualifier)) if !family.is_empty() && !qualifier.is_empty() => {
            (Some(family.to_string()), qualifier.to_string())
        }
        _ => (None, annotation.to_string()),
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Caches one native schema per logical table
pub struct SchemaMapper {
    mappings: DashMap<String, Arc<NativeSchema>>,
    publication: Arc<SchemaPublicationCache>,
}

impl SchemaMapper {
    pub fn new(publication: Arc<SchemaPublicationCache>) -> Self {
        Self {
            mappings: DashMap::new(),
            publication,
        }
    }

    /// Get the native schema for a logical table, deriving it on first use
    pub fn map_table(&self, table: &Arc<TableMetadata>) -> Result<Arc<NativeSchema>, CompileError> {
        let key = table.full_name();

        let cached = self.mappings.get(&key).map(|entry| entry.value().clone());
        if let Some(schema) = cached {
            if schema.source.as_ref() == table.as_ref() {
                tracing::debug!("Schema mapping cache hit for {}", key);
                return Ok(schema);
            }
            tracing::info!("Metadata for {} changed, deriving a new schema mapping", key);
        }

        let derived = Arc::new(Self::derive(table)?);
        let schema = match self.mappings.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().source.as_ref() == table.as_ref() {
                    entry.get().clone()
                } else {
                    entry.insert(derived.clone());
                    derived
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(derived.clone());
                derived
            }
        };

        self.publication.register(&schema.publication_statement);
        Ok(schema)
    }

    /// Cached mapping for a logical table name, if any
    pub fn get(&self, full_name: &str) -> Option<Arc<NativeSchema>> {
        self.mappings.get(full_name).map(|entry| entry.value().clone())
    }

    pub fn invalidate(&self, full_name: &str) -> bool {
        self.mappings.remove(full_name).is_some()
    }

    pub fn clear(&self) {
        let count = self.mappings.len();
        self.mappings.clear();
        tracing::info!("Cleared {} schema mappings", count);
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    fn derive(table: &Arc<TableMetadata>) -> Result<NativeSchema, CompileError> {
        let table_name = table.full_name();
        if table.primary_key.is_empty() {
            return Err(CompileError::MissingMetadata(format!(
                "table '{}' declares no primary key; the column-family store keys rows by it",
                table_name
            )));
        }
        for pk in &table.primary_key {
            if table.column(pk).is_none() {
                return Err(CompileError::MissingMetadata(format!(
                    "primary key column '{}' is not a column of '{}'",
                    pk, table_name
                )));
            }
        }

        let mut columns = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            let element = format!("column '{}.{}'", table_name, column.name);
            let annotation = column.native_name();
            if annotation.trim().is_empty() {
                return Err(CompileError::MalformedAnnotation {
                    element,
                    annotation: annotation.to_string(),
                    reason: "annotation is empty".to_string(),
                });
            }

            let primary_key = table.is_primary_key(&column.name);
            let (family, qualifier) = split_annotation(annotation);
            if primary_key && family.is_some() {
                return Err(CompileError::MalformedAnnotation {
                    element,
                    annotation: annotation.to_string(),
                    reason: "row key columns cannot belong to a column family".to_string(),
                });
            }

            let type_code = NativeTypeCode::for_runtime_type(column.runtime_type).ok_or_else(|| {
                CompileError::UnmappedType {
                    runtime_type: column.runtime_type,
                    context: element.clone(),
                }
            })?;

            columns.push(NativeColumn {
                logical_name: column.name.clone(),
                family,
                qualifier,
                type_code,
                primary_key,
            });
        }

        let native_table = table.native_name().to_string();
        let publication_statement = Self::publication_ddl(&native_table, &columns, &table.primary_key, table);

        Ok(NativeSchema {
            logical_table: table_name,
            native_table,
            columns,
            publication_statement,
            source: table.clone(),
        })
    }

    fn publication_ddl(
        native_table: &str,
        columns: &[NativeColumn],
        primary_key: &[String],
        table: &TableMetadata,
    ) -> String {
        let single_key = primary_key.len() == 1;
        let mut definitions: Vec<String> = columns
            .iter()
            .map(|column| {
                let name = column
                    .name_parts()
                    .iter()
                    .map(|part| quote(part))
                    .collect::<Vec<_>>()
                    .join(".");
                let mut definition = format!("{} {}", name, column.type_code.as_str());
                if column.primary_key {
                    definition.push_str(if single_key { " PRIMARY KEY" } else { " NOT NULL" });
                }
                definition
            })
            .collect();

        if !single_key {
            let key_columns: Vec<String> = primary_key
                .iter()
                .filter_map(|pk| table.column(pk))
                .map(|c| quote(c.native_name()))
                .collect();
            definitions.push(format!(
                "CONSTRAINT \"PK\" PRIMARY KEY ({})",
                key_columns.join(", ")
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(native_table),
            definitions.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnMetadata;

    fn customer() -> Arc<TableMetadata> {
        Arc::new(
            TableMetadata::new(
                "Customer",
                vec![
                    ColumnMetadata::new("id", RuntimeType::String).with_name_in_source("ROW_ID"),
                    ColumnMetadata::new("city", RuntimeType::String).with_name_in_source("addr.city"),
                    ColumnMetadata::new("amount", RuntimeType::Integer).with_name_in_source("sales.amount"),
                    ColumnMetadata::new("note", RuntimeType::String),
                ],
            )
            .with_name_in_source("CUSTOMER_NATIVE")
            .with_primary_key(["id"]),
        )
    }

    fn mapper() -> (SchemaMapper, Arc<SchemaPublicationCache>) {
        let publication = Arc::new(SchemaPublicationCache::new());
        (SchemaMapper::new(publication.clone()), publication)
    }

    #[test]
    fn test_split_annotation() {
        assert_eq!(split_annotation("f.a"), (Some("f".into()), "a".into()));
        assert_eq!(split_annotation("f.a.b"), (Some("f".into()), "a.b".into()));
        assert_eq!(split_annotation("plain"), (None, "plain".into()));
        assert_eq!(split_annotation(".a"), (None, ".a".into()));
        assert_eq!(split_annotation("f."), (None, "f.".into()));
    }

    #[test]
    fn test_map_table_derives_families_and_ddl() {
        let (mapper, publication) = mapper();
        let schema = mapper.map_table(&customer()).unwrap();

        assert_eq!(schema.native_table, "CUSTOMER_NATIVE");
        let city = schema.column("city").unwrap();
        assert_eq!(city.family.as_deref(), Some("addr"));
        assert_eq!(city.qualifier, "city");
        assert_eq!(schema.column("note").unwrap().family, None);
        assert_eq!(schema.column("amount").unwrap().type_code, NativeTypeCode::Integer);

        assert_eq!(
            schema.publication_statement,
            r#"CREATE TABLE IF NOT EXISTS "CUSTOMER_NATIVE" ("ROW_ID" VARCHAR PRIMARY KEY, "addr"."city" VARCHAR, "sales"."amount" INTEGER, "note" VARCHAR)"#
        );
        assert!(publication.is_registered(&schema.publication_statement));
        assert!(!publication.is_published(&schema.publication_statement));
    }

    #[test]
    fn test_repeated_mapping_returns_cached_instance() {
        let (mapper, publication) = mapper();
        let table = customer();
        let first = mapper.map_table(&table).unwrap();
        let second = mapper.map_table(&table).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mapper.len(), 1);
        assert_eq!(publication.len(), 1);
    }

    #[test]
    fn test_changed_metadata_creates_new_mapping() {
        let (mapper, _) = mapper();
        let first = mapper.map_table(&customer()).unwrap();

        let mut changed = (*customer()).clone();
        changed.columns.push(ColumnMetadata::new("email", RuntimeType::String).with_name_in_source("addr.email"));
        let second = mapper.map_table(&Arc::new(changed)).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.columns.len(), 4);
        assert_eq!(second.columns.len(), 5);
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn test_unmapped_type_is_compile_error() {
        let (mapper, publication) = mapper();
        let mut table = (*customer()).clone();
        table.columns.push(ColumnMetadata::new("doc", RuntimeType::Xml));

        let err = mapper.map_table(&Arc::new(table)).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnmappedType { runtime_type: RuntimeType::Xml, .. }
        ));
        assert!(publication.is_empty());
    }

    #[test]
    fn test_row_key_with_family_is_malformed() {
        let (mapper, _) = mapper();
        let table = TableMetadata::new(
            "t",
            vec![ColumnMetadata::new("id", RuntimeType::String).with_name_in_source("f.id")],
        )
        .with_primary_key(["id"]);

        let err = mapper.map_table(&Arc::new(table)).unwrap_err();
        assert!(matches!(err, CompileError::MalformedAnnotation { .. }));
    }

    #[test]
    fn test_missing_primary_key() {
        let (mapper, _) = mapper();
        let table = TableMetadata::new("t", vec![ColumnMetadata::new("a", RuntimeType::String)]);
        assert!(matches!(
            mapper.map_table(&Arc::new(table)),
            Err(CompileError::MissingMetadata(_))
        ));
    }

    #[test]
    fn test_composite_key_ddl() {
        let (mapper, _) = mapper();
        let table = TableMetadata::new(
            "events",
            vec![
                ColumnMetadata::new("tenant", RuntimeType::String),
                ColumnMetadata::new("seq", RuntimeType::Long),
                ColumnMetadata::new("payload", RuntimeType::Varbinary).with_name_in_source("d.payload"),
            ],
        )
        .with_primary_key(["tenant", "seq"]);

        let schema = mapper.map_table(&Arc::new(table)).unwrap();
        assert_eq!(
            schema.publication_statement,
            r#"CREATE TABLE IF NOT EXISTS "events" ("tenant" VARCHAR NOT NULL, "seq" BIGINT NOT NULL, "d"."payload" VARBINARY, CONSTRAINT "PK" PRIMARY KEY ("tenant", "seq"))"#
        );
    }

    #[test]
    fn test_invalidate_and_clear() {
        let (mapper, _) = mapper();
        let table = customer();
        mapper.map_table(&table).unwrap();
        assert!(mapper.get("Customer").is_some());
        assert!(mapper.invalidate("Customer"));
        assert!(mapper.get("Customer").is_none());

        mapper.map_table(&table).unwrap();
        mapper.clear();
        assert!(mapper.is_empty());
    }
}
