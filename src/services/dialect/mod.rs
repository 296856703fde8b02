// Dialect Rule Sets
//
// Defines the policy trait the command compiler consults for everything that
// differs between backing stores: identifier quoting and resolution, literal
// text, function rewrites, conversion emulation, bind requirements and limit
// syntax. Default methods give ANSI behaviour; each dialect overrides what it needs.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::CompileError;
use crate::models::{ColumnReference, Function, Limit, RuntimeType, TableReference, Value};
use crate::services::schema_mapper::NativeSchema;

pub mod column_family;
pub mod relational;

pub use column_family::ColumnFamilyDialect;
pub use relational::RelationalDialect;

/// Backing store dialects supported by the translation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    ColumnFamily,
    Relational,
}

impl DialectKind {
    /// Parse dialect kind from string
    pub fn from_str(s: &str) -> Result<Self, CompileError> {
        match s.trim().to_lowercase().as_str() {
            "phoenix" | "hbase" | "column-family" | "column_family" => Ok(DialectKind::ColumnFamily),
            "oracle" | "relational" => Ok(DialectKind::Relational),
            _ => Err(CompileError::InvalidCommand(format!("Unsupported dialect: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::ColumnFamily => "Phoenix",
            DialectKind::Relational => "Oracle",
        }
    }
}

/// One piece of rewritten function or conversion output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// The compiled text of the argument at this index
    Arg(usize),
}

impl Fragment {
    pub fn text(s: impl Into<String>) -> Self {
        Fragment::Text(s.into())
    }
}

/// `NAME(arg0, arg1, ...)` over the given argument indexes
pub fn call(name: &str, args: impl IntoIterator<Item = usize>) -> Vec<Fragment> {
    let mut fragments = vec![Fragment::text(format!("{}(", name))];
    for (position, index) in args.into_iter().enumerate() {
        if position > 0 {
            fragments.push(Fragment::text(", "));
        }
        fragments.push(Fragment::Arg(index));
    }
    fragments.push(Fragment::text(")"));
    fragments
}

/// Outcome of a conversion lookup for a (source, target) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    /// Emit these fragments; `Arg(0)` is the converted expression
    Rewrite(Vec<Fragment>),
    /// No native idiom: emit the inner expression unchanged
    Drop,
}

pub type FunctionRewrite = Arc<dyn Fn(&Function) -> Option<Vec<Fragment>> + Send + Sync>;

/// Function rewrites shared by every compilation using a dialect
#[derive(Default)]
pub struct FunctionRegistry {
    rewrites: DashMap<String, FunctionRewrite>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rewrite unless one already exists for `name`
    pub fn register_if_absent<F>(&self, name: &str, rewrite: F) -> bool
    where
        F: Fn(&Function) -> Option<Vec<Fragment>> + Send + Sync + 'static,
    {
        let mut inserted = false;
        self.rewrites.entry(name.to_lowercase()).or_insert_with(|| {
            inserted = true;
            Arc::new(rewrite)
        });
        inserted
    }

    /// Register a plain rename: `name(args...)` becomes `native(args...)`
    pub fn register_rename(&self, name: &str, native: &'static str) -> bool {
        self.register_if_absent(name, move |function: &Function| {
            Some(call(native, 0..function.args.len()))
        })
    }

    pub fn rewrite(&self, function: &Function) -> Option<Vec<Fragment>> {
        let rewrite = self
            .rewrites
            .get(&function.name.to_lowercase())
            .map(|entry| entry.value().clone())?;
        rewrite(function)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rewrites.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.rewrites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }
}

/// Per-backend compilation policy
pub trait DialectRules: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Whether tables must be mapped through the schema mapper before compiling
    fn requires_schema_mapping(&self) -> bool {
        false
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Native text for a table reference
    fn table_name(&self, table: &TableReference, schema: Option<&NativeSchema>) -> Result<String, CompileError> {
        if let Some(schema) = schema {
            return Ok(self.quote_identifier(&schema.native_table));
        }
        Ok(match &table.metadata {
            Some(metadata) => match (&metadata.name_in_source, &metadata.schema) {
                (Some(native), _) => native
                    .split('.')
                    .map(|part| self.quote_identifier(part))
                    .collect::<Vec<_>>()
                    .join("."),
                (None, Some(owner)) => format!(
                    "{}.{}",
                    self.quote_identifier(owner),
                    self.quote_identifier(&metadata.name)
                ),
                (None, None) => self.quote_identifier(&metadata.name),
            },
            None => self.quote_identifier(&table.name),
        })
    }

    /// Native text for an unqualified column reference
    fn column_name(&self, column: &ColumnReference, schema: Option<&NativeSchema>) -> Result<String, CompileError> {
        if let Some(schema) = schema {
            let native = schema.column(&column.name).ok_or_else(|| {
                CompileError::MissingMetadata(format!(
                    "column '{}' is not mapped for table '{}'",
                    column.name, schema.logical_table
                ))
            })?;
            return Ok(native
                .name_parts()
                .iter()
                .map(|part| self.quote_identifier(part))
                .collect::<Vec<_>>()
                .join("."));
        }
        let name = column
            .metadata
            .as_ref()
            .map(|m| m.native_name())
            .unwrap_or(&column.name);
        Ok(self.quote_identifier(name))
    }

    /// Inline text for a literal value
    fn format_literal(&self, value: &Value, _runtime_type: RuntimeType) -> Result<String, CompileError> {
        default_literal(self.name(), value)
    }

    /// Dialect rewrite for a function call, or `None` for the generic form
    fn rewrite_function(&self, function: &Function) -> Option<Vec<Fragment>> {
        self.functions().and_then(|registry| registry.rewrite(function))
    }

    fn functions(&self) -> Option<&FunctionRegistry> {
        None
    }

    /// Native idiom for converting from `source` to `target`
    fn convert(&self, source: RuntimeType, target: RuntimeType) -> Conversion {
        if source == target {
            return Conversion::Drop;
        }
        match self.native_type_name(target) {
            Some(native) => {
                let mut fragments = vec![Fragment::text("CAST("), Fragment::Arg(0)];
                fragments.push(Fragment::text(format!(" AS {})", native)));
                Conversion::Rewrite(fragments)
            }
            None => Conversion::Drop,
        }
    }

    /// Types whose literals are always bound, regardless of binding mode
    fn must_bind(&self, runtime_type: RuntimeType) -> bool {
        runtime_type.is_large_object()
    }

    fn max_alias_length(&self) -> Option<usize> {
        None
    }

    fn insert_keyword(&self) -> &str {
        "INSERT INTO"
    }

    /// Apply a row limit to a fully rendered query
    fn render_limit(&self, query: String, limit: &Limit) -> String {
        if limit.offset > 0 {
            format!("{} LIMIT {} OFFSET {}", query, limit.row_count, limit.offset)
        } else {
            format!("{} LIMIT {}", query, limit.row_count)
        }
    }

    fn supports_update(&self) -> bool {
        true
    }

    /// Table to select from when a query has no FROM clause
    fn empty_from(&self) -> Option<&str> {
        None
    }

    fn native_type_name(&self, runtime_type: RuntimeType) -> Option<&'static str>;
}

/// ANSI literal text shared by every dialect
pub fn default_literal(dialect: &str, value: &Value) -> Result<String, CompileError> {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) | Value::Clob(s) | Value::Xml(s) => quote_string(s),
        Value::Char(c) => quote_string(&c.to_string()),
        Value::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Byte(v) => v.to_string(),
        Value::Short(v) => v.to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::BigInteger(v) => v.to_string(),
        Value::Float(v) if v.is_finite() => v.to_string(),
        Value::Double(v) if v.is_finite() => v.to_string(),
        Value::Float(_) | Value::Double(_) => {
            return Err(CompileError::unsupported(dialect, "non-finite floating point literal"))
        }
        Value::BigDecimal(d) => d.to_string(),
        Value::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        Value::Time(t) => format!("TIME '{}'", t.format("%H:%M:%S")),
        Value::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        Value::Varbinary(bytes) | Value::Blob(bytes) => format!("X'{}'", hex(bytes)),
        Value::Object(_) => return Err(CompileError::unsupported(dialect, "inline object literal")),
    };
    Ok(text)
}

pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
