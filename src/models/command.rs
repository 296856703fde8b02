// Abstract Command Model
//
// The source-agnostic command tree handed over by the planner. Table and column
// references carry their resolved metadata; literals and parameters carry their
// runtime types. Commands are immutable once built and consumed by one execution.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::metadata::{ColumnMetadata, TableMetadata};
use super::types::{RuntimeType, Value};

/// A command to translate and execute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    BatchedUpdates { commands: Vec<Command> },
}

impl Command {
    pub fn is_query(&self) -> bool {
        matches!(self, Command::Select(_))
    }

    /// Every table reference in the command, in source order
    pub fn tables(&self) -> Vec<&TableReference> {
        match self {
            Command::Select(select) => select.from.iter().collect(),
            Command::Insert(insert) => vec![&insert.table],
            Command::Update(update) => vec![&update.table],
            Command::Delete(delete) => vec![&delete.table],
            Command::BatchedUpdates { commands } => {
                commands.iter().flat_map(|c| c.tables()).collect()
            }
        }
    }

    pub fn tables_mut(&mut self) -> Vec<&mut TableReference> {
        match self {
            Command::Select(select) => select.from.iter_mut().collect(),
            Command::Insert(insert) => vec![&mut insert.table],
            Command::Update(update) => vec![&mut update.table],
            Command::Delete(delete) => vec![&mut delete.table],
            Command::BatchedUpdates { commands } => {
                commands.iter_mut().flat_map(|c| c.tables_mut()).collect()
            }
        }
    }
}

/// A table in a FROM clause or the target of a write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableReference {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub metadata: Option<Arc<TableMetadata>>,
}

impl TableReference {
    pub fn new(metadata: TableMetadata) -> Self {
        Self {
            name: metadata.full_name(),
            alias: None,
            metadata: Some(Arc::new(metadata)),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name column references use to point at this table
    pub fn group_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Build a reference to one of this table's columns, resolving its metadata
    pub fn column(&self, name: &str) -> ColumnReference {
        let metadata = self
            .metadata
            .as_ref()
            .and_then(|t| t.column(name))
            .cloned();
        ColumnReference {
            group: Some(self.group_name().to_string()),
            name: name.to_string(),
            runtime_type: metadata
                .as_ref()
                .map(|c| c.runtime_type)
                .unwrap_or(RuntimeType::Object),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnReference {
    /// Group (table name or alias) the column belongs to
    #[serde(default)]
    pub group: Option<String>,
    pub name: String,
    pub runtime_type: RuntimeType,
    #[serde(default)]
    pub metadata: Option<ColumnMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Literal {
    pub value: Value,
    pub runtime_type: RuntimeType,
    /// Whether the planner allows this literal to become a bind value
    #[serde(default = "default_bind_eligible")]
    pub bind_eligible: bool,
}

fn default_bind_eligible() -> bool {
    true
}

/// A placeholder whose value comes from the parameter row at `index`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Parameter {
    pub index: usize,
    pub runtime_type: RuntimeType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expression>,
    pub runtime_type: RuntimeType,
}

impl Function {
    /// True for `convert`/`cast`, whose second argument names the target type
    pub fn is_conversion(&self) -> bool {
        self.name.eq_ignore_ascii_case("convert") || self.name.eq_ignore_ascii_case("cast")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Column(ColumnReference),
    Literal(Literal),
    Parameter(Parameter),
    Function(Function),
}

impl Expression {
    pub fn literal(value: Value, runtime_type: RuntimeType) -> Self {
        Expression::Literal(Literal {
            value,
            runtime_type,
            bind_eligible: true,
        })
    }

    pub fn parameter(index: usize, runtime_type: RuntimeType) -> Self {
        Expression::Parameter(Parameter { index, runtime_type })
    }

    pub fn function(name: impl Into<String>, args: Vec<Expression>, runtime_type: RuntimeType) -> Self {
        Expression::Function(Function {
            name: name.into(),
            args,
            runtime_type,
        })
    }

    /// `convert(expr, 'target')`
    pub fn convert(expr: Expression, target: RuntimeType) -> Self {
        Expression::function(
            "convert",
            vec![
                expr,
                Expression::literal(Value::String(target.as_str().to_string()), RuntimeType::String),
            ],
            target,
        )
    }

    pub fn runtime_type(&self) -> RuntimeType {
        match self {
            Expression::Column(c) => c.runtime_type,
            Expression::Literal(l) => l.runtime_type,
            Expression::Parameter(p) => p.runtime_type,
            Expression::Function(f) => f.runtime_type,
        }
    }
}

impl From<ColumnReference> for Expression {
    fn from(column: ColumnReference) -> Self {
        Expression::Column(column)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

/// Predicate tree for WHERE and HAVING
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Comparison {
        left: Expression,
        op: ComparisonOp,
        right: Expression,
    },
    And {
        conditions: Vec<Condition>,
    },
    Or {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    IsNull {
        expression: Expression,
        #[serde(default)]
        negated: bool,
    },
    Like {
        expression: Expression,
        pattern: Expression,
        #[serde(default)]
        negated: bool,
    },
    In {
        expression: Expression,
        list: Vec<Expression>,
        #[serde(default)]
        negated: bool,
    },
}

impl Condition {
    pub fn compare(left: impl Into<Expression>, op: ComparisonOp, right: Expression) -> Self {
        Condition::Comparison {
            left: left.into(),
            op,
            right,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedColumn {
    pub expression: Expression,
    #[serde(default)]
    pub alias: Option<String>,
}

impl From<Expression> for DerivedColumn {
    fn from(expression: Expression) -> Self {
        Self {
            expression,
            alias: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub expression: Expression,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Limit {
    pub row_count: u64,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Select {
    #[serde(default)]
    pub distinct: bool,
    pub projection: Vec<DerivedColumn>,
    pub from: Vec<TableReference>,
    #[serde(default)]
    pub where_clause: Option<Condition>,
    #[serde(default)]
    pub group_by: Vec<Expression>,
    #[serde(default)]
    pub having: Option<Condition>,
    #[serde(default)]
    pub order_by: Vec<OrderItem>,
    #[serde(default)]
    pub limit: Option<Limit>,
}

impl Select {
    /// Declared output types of the projection, in order
    pub fn output_types(&self) -> Vec<RuntimeType> {
        self.projection
            .iter()
            .map(|c| c.expression.runtime_type())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insert {
    pub table: TableReference,
    pub columns: Vec<ColumnReference>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsertSource {
    /// A single row of expressions
    Values { values: Vec<Expression> },
    /// A row template of parameters, executed once per parameter row
    Parameterized {
        values: Vec<Expression>,
        rows: Vec<Vec<Value>>,
    },
}

impl InsertSource {
    pub fn values(&self) -> &[Expression] {
        match self {
            InsertSource::Values { values } | InsertSource::Parameterized { values, .. } => values,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetClause {
    pub column: ColumnReference,
    pub value: Expression,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Update {
    pub table: TableReference,
    pub assignments: Vec<SetClause>,
    #[serde(default)]
    pub where_clause: Option<Condition>,
    #[serde(default)]
    pub parameter_rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delete {
    pub table: TableReference,
    #[serde(default)]
    pub where_clause: Option<Condition>,
    #[serde(default)]
    pub parameter_rows: Vec<Vec<Value>>,
}
