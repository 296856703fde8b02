use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::types::RuntimeType;

/// Logical table metadata supplied by the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Dialect annotation: the native table name
    #[serde(default)]
    pub name_in_source: Option<String>,
    pub columns: Vec<ColumnMetadata>,
    /// Logical names of the primary key columns, in key order
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Logical column metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub runtime_type: RuntimeType,
    /// Dialect annotation, e.g. a native column name or a `family.qualifier` cell reference
    #[serde(default)]
    pub name_in_source: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_nullable() -> bool {
    true
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnMetadata>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            name_in_source: None,
            columns,
            primary_key: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_name_in_source(mut self, name_in_source: impl Into<String>) -> Self {
        self.name_in_source = Some(name_in_source.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Identity of the logical table, used as the schema mapping cache key
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    /// Name of the table in the backing store
    pub fn native_name(&self) -> &str {
        self.name_in_source.as_deref().unwrap_or(&self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|pk| pk.eq_ignore_ascii_case(column))
    }
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, runtime_type: RuntimeType) -> Self {
        Self {
            name: name.into(),
            runtime_type,
            name_in_source: None,
            nullable: true,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_name_in_source(mut self, name_in_source: impl Into<String>) -> Self {
        self.name_in_source = Some(name_in_source.into());
        self
    }

    /// Name of the column in the backing store
    pub fn native_name(&self) -> &str {
        self.name_in_source.as_deref().unwrap_or(&self.name)
    }
}

/// Catalog collaborator resolving logical table names to metadata
pub trait Catalog: Send + Sync {
    fn resolve(&self, table: &str) -> Option<Arc<TableMetadata>>;
}

/// Catalog backed by a fixed set of tables, keyed case-insensitively by full name
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    tables: HashMap<String, Arc<TableMetadata>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: TableMetadata) {
        let key = table.full_name().to_lowercase();
        self.tables.insert(key, Arc::new(table));
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl FromIterator<TableMetadata> for InMemoryCatalog {
    fn from_iter<T: IntoIterator<Item = TableMetadata>>(iter: T) -> Self {
        let mut catalog = Self::new();
        for table in iter {
            catalog.register(table);
        }
        catalog
    }
}

impl Catalog for InMemoryCatalog {
    fn resolve(&self, table: &str) -> Option<Arc<TableMetadata>> {
        self.tables.get(&table.to_lowercase()).cloned()
    }
}
