// Command Compiler
//
// Walks a command depth first and emits dialect text together with the ordered
// values that back its placeholders. Tables are mapped up front so every column
// emission in a statement resolves against the same native schema. Function and
// conversion rewrites are fragment lists emitted left to right, which keeps
// placeholder order equal to text order even when a rewrite reorders arguments.

use std::sync::Arc;

use crate::error::CompileError;
use crate::models::{
    BindingMode, BoundSource, BoundValue, ColumnReference, Command, CompiledCommand, CompiledStatement, Condition,
    Delete, Expression, Function, Insert, InsertSource, Literal, RuntimeType, Select, StatementKind,
    TableReference, Update, Value,
};
use crate::services::dialect::{Conversion, DialectRules, Fragment};
use crate::services::schema_mapper::{NativeSchema, SchemaMapper};

/// Compile `command` for `dialect`
pub fn compile(
    command: &Command,
    dialect: &dyn DialectRules,
    mapper: Option<&SchemaMapper>,
    mode: BindingMode,
) -> Result<CompiledCommand, CompileError> {
    CommandCompiler::new(dialect, mapper, mode).compile(command)
}

pub struct CommandCompiler<'a> {
    dialect: &'a dyn DialectRules,
    mapper: Option<&'a SchemaMapper>,
    mode: BindingMode,
}

impl<'a> CommandCompiler<'a> {
    pub fn new(dialect: &'a dyn DialectRules, mapper: Option<&'a SchemaMapper>, mode: BindingMode) -> Self {
        Self { dialect, mapper, mode }
    }

    pub fn compile(&self, command: &Command) -> Result<CompiledCommand, CompileError> {
        match command {
            Command::BatchedUpdates { commands } => {
                if commands.is_empty() {
                    return Err(CompileError::InvalidCommand("batched update contains no commands".into()));
                }
                let statements = commands
                    .iter()
                    .map(|command| match command {
                        Command::Select(_) => Err(CompileError::InvalidCommand(
                            "queries cannot be part of a batched update".into(),
                        )),
                        Command::BatchedUpdates { .. } => Err(CompileError::InvalidCommand(
                            "batched updates cannot be nested".into(),
                        )),
                        other => self.compile_statement(other),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledCommand::Batch(statements))
            }
            other => Ok(CompiledCommand::Single(self.compile_statement(other)?)),
        }
    }

    fn compile_statement(&self, command: &Command) -> Result<CompiledStatement, CompileError> {
        let scope = self.scope(command.tables())?;
        let mut writer = StatementWriter {
            dialect: self.dialect,
            mode: self.mode,
            scope: &scope,
            qualify: false,
            sql: String::new(),
            bound: Vec::new(),
        };

        let (kind, is_insert, output_types, parameter_rows) = match command {
            Command::Select(select) => {
                writer.select(select)?;
                (StatementKind::Query, false, select.output_types(), Vec::new())
            }
            Command::Insert(insert) => {
                writer.insert(insert)?;
                let rows = match &insert.source {
                    InsertSource::Parameterized { rows, .. } => rows.clone(),
                    InsertSource::Values { .. } => Vec::new(),
                };
                (StatementKind::Update, true, Vec::new(), rows)
            }
            Command::Update(update) => {
                writer.update(update)?;
                (StatementKind::Update, false, Vec::new(), update.parameter_rows.clone())
            }
            Command::Delete(delete) => {
                writer.delete(delete)?;
                (StatementKind::Update, false, Vec::new(), delete.parameter_rows.clone())
            }
            Command::BatchedUpdates { .. } => {
                return Err(CompileError::InvalidCommand("batched updates cannot be nested".into()))
            }
        };

        let mut schemas: Vec<Arc<NativeSchema>> = Vec::new();
        for schema in scope.entries.iter().filter_map(|e| e.schema.as_ref()) {
            if !schemas.iter().any(|s| Arc::ptr_eq(s, schema)) {
                schemas.push(schema.clone());
            }
        }

        tracing::debug!(
            "Compiled {} statement ({} bound values): {}",
            self.dialect.name(),
            writer.bound.len(),
            writer.sql
        );

        Ok(CompiledStatement {
            sql: writer.sql,
            bound_values: writer.bound,
            kind,
            is_insert,
            output_types,
            schemas,
            parameter_rows,
        })
    }

    fn scope<'c>(&self, tables: Vec<&'c TableReference>) -> Result<Scope<'c>, CompileError> {
        let mut entries = Vec::with_capacity(tables.len());
        for table in tables {
            let schema = if self.dialect.requires_schema_mapping() {
                let metadata = table.metadata.as_ref().ok_or_else(|| {
                    CompileError::MissingMetadata(format!("table '{}' has no resolved metadata", table.name))
                })?;
                let mapper = self.mapper.ok_or_else(|| {
                    CompileError::InvalidCommand(format!(
                        "the {} dialect requires a schema mapper",
                        self.dialect.name()
                    ))
                })?;
                Some(mapper.map_table(metadata)?)
            } else {
                None
            };
            entries.push(ScopeEntry { table, schema });
        }
        Ok(Scope { entries })
    }
}

struct ScopeEntry<'c> {
    table: &'c TableReference,
    schema: Option<Arc<NativeSchema>>,
}

struct Scope<'c> {
    entries: Vec<ScopeEntry<'c>>,
}

impl<'c> Scope<'c> {
    fn resolve(&self, group: Option<&str>) -> Result<&ScopeEntry<'c>, CompileError> {
        match group {
            Some(group) => self
                .entries
                .iter()
                .find(|e| e.table.group_name().eq_ignore_ascii_case(group))
                .ok_or_else(|| CompileError::InvalidCommand(format!("unknown table or alias '{}'", group))),
            None if self.entries.len() == 1 => Ok(&self.entries[0]),
            None => Err(CompileError::InvalidCommand(
                "column without a table group is ambiguous".into(),
            )),
        }
    }
}

struct StatementWriter<'w, 'c> {
    dialect: &'w dyn DialectRules,
    mode: BindingMode,
    scope: &'w Scope<'c>,
    /// Whether column references may be qualified by table or alias
    qualify: bool,
    sql: String,
    bound: Vec<BoundValue>,
}

impl<'w, 'c> StatementWriter<'w, 'c> {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn placeholder(&mut self, source: BoundSource, runtime_type: RuntimeType) {
        self.sql.push('?');
        self.bound.push(BoundValue { source, runtime_type });
    }

    fn alias(&self, alias: &str) -> String {
        let alias = match self.dialect.max_alias_length() {
            Some(max) => alias.chars().take(max).collect::<String>(),
            None => alias.to_string(),
        };
        self.dialect.quote_identifier(&alias)
    }

    fn table(&mut self, table: &TableReference, with_alias: bool) -> Result<(), CompileError> {
        let scope = self.scope;
        let entry = scope.resolve(Some(table.group_name()))?;
        let name = self.dialect.table_name(table, entry.schema.as_deref())?;
        self.push(&name);
        if with_alias {
            if let Some(alias) = &table.alias {
                let alias = self.alias(alias);
                self.push(" ");
                self.push(&alias);
            }
        }
        Ok(())
    }

    fn column(&mut self, column: &ColumnReference) -> Result<(), CompileError> {
        let scope = self.scope;
        let entry = scope.resolve(column.group.as_deref())?;

        if self.qualify && (entry.table.alias.is_some() || scope.entries.len() > 1) {
            let qualifier = match &entry.table.alias {
                Some(alias) => self.alias(alias),
                None => self.dialect.table_name(entry.table, entry.schema.as_deref())?,
            };
            self.push(&qualifier);
            self.push(".");
        }

        let resolved;
        let column = match (&column.metadata, &entry.table.metadata) {
            (None, Some(table)) => match table.column(&column.name) {
                Some(metadata) => {
                    resolved = ColumnReference {
                        metadata: Some(metadata.clone()),
                        ..column.clone()
                    };
                    &resolved
                }
                None => column,
            },
            _ => column,
        };
        let name = self.dialect.column_name(column, entry.schema.as_deref())?;
        self.push(&name);
        Ok(())
    }

    fn expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Column(column) => self.column(column),
            Expression::Literal(literal) => self.literal(literal),
            Expression::Parameter(parameter) => {
                self.placeholder(BoundSource::Parameter(parameter.index), parameter.runtime_type);
                Ok(())
            }
            Expression::Function(function) => self.function(function),
        }
    }

    fn literal(&mut self, literal: &Literal) -> Result<(), CompileError> {
        let must_bind = self.dialect.must_bind(literal.runtime_type)
            || literal
                .value
                .runtime_type()
                .map_or(false, |ty| self.dialect.must_bind(ty));
        if must_bind || (self.mode == BindingMode::Prepared && literal.bind_eligible) {
            self.placeholder(BoundSource::Literal(literal.value.clone()), literal.runtime_type);
        } else {
            let text = self.dialect.format_literal(&literal.value, literal.runtime_type)?;
            self.push(&text);
        }
        Ok(())
    }

    fn function(&mut self, function: &Function) -> Result<(), CompileError> {
        if function.is_conversion() {
            let inner = function.args.first().ok_or_else(|| {
                CompileError::InvalidCommand(format!("{} requires an argument", function.name))
            })?;
            let target = conversion_target(function);
            return match self.dialect.convert(inner.runtime_type(), target) {
                Conversion::Rewrite(fragments) => self.fragments(&fragments, &function.args[..1]),
                Conversion::Drop => self.expression(inner),
            };
        }

        match self.dialect.rewrite_function(function) {
            Some(fragments) => self.fragments(&fragments, &function.args),
            None => {
                self.push(&function.name.to_uppercase());
                self.push("(");
                self.expression_list(&function.args)?;
                self.push(")");
                Ok(())
            }
        }
    }

    fn fragments(&mut self, fragments: &[Fragment], args: &[Expression]) -> Result<(), CompileError> {
        for fragment in fragments {
            match fragment {
                Fragment::Text(text) => self.push(text),
                Fragment::Arg(index) => {
                    let arg = args.get(*index).ok_or_else(|| {
                        CompileError::InvalidCommand(format!("rewrite references missing argument {}", index))
                    })?;
                    self.expression(arg)?;
                }
            }
        }
        Ok(())
    }

    fn expression_list(&mut self, expressions: &[Expression]) -> Result<(), CompileError> {
        for (i, expression) in expressions.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expression(expression)?;
        }
        Ok(())
    }

    fn condition(&mut self, condition: &Condition) -> Result<(), CompileError> {
        match condition {
            Condition::Comparison { left, op, right } => {
                self.expression(left)?;
                self.push(" ");
                self.push(op.as_str());
                self.push(" ");
                self.expression(right)
            }
            Condition::And { conditions } => self.junction(conditions, " AND "),
            Condition::Or { conditions } => self.junction(conditions, " OR "),
            Condition::Not { condition } => {
                self.push("NOT (");
                self.condition(condition)?;
                self.push(")");
                Ok(())
            }
            Condition::IsNull { expression, negated } => {
                self.expression(expression)?;
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
                Ok(())
            }
            Condition::Like {
                expression,
                pattern,
                negated,
            } => {
                self.expression(expression)?;
                self.push(if *negated { " NOT LIKE " } else { " LIKE " });
                self.expression(pattern)
            }
            Condition::In {
                expression,
                list,
                negated,
            } => {
                if list.is_empty() {
                    return Err(CompileError::InvalidCommand("IN requires at least one value".into()));
                }
                self.expression(expression)?;
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.expression_list(list)?;
                self.push(")");
                Ok(())
            }
        }
    }

    fn junction(&mut self, conditions: &[Condition], separator: &str) -> Result<(), CompileError> {
        if conditions.is_empty() {
            return Err(CompileError::InvalidCommand("empty AND/OR condition".into()));
        }
        for (i, condition) in conditions.iter().enumerate() {
            if i > 0 {
                self.push(separator);
            }
            let nested = matches!(condition, Condition::And { .. } | Condition::Or { .. });
            if nested {
                self.push("(");
            }
            self.condition(condition)?;
            if nested {
                self.push(")");
            }
        }
        Ok(())
    }

    fn select(&mut self, select: &Select) -> Result<(), CompileError> {
        if select.projection.is_empty() {
            return Err(CompileError::InvalidCommand("SELECT requires at least one column".into()));
        }
        self.qualify = true;

        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        for (i, column) in select.projection.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expression(&column.expression)?;
            if let Some(alias) = &column.alias {
                let alias = self.alias(alias);
                self.push(" AS ");
                self.push(&alias);
            }
        }

        let dialect = self.dialect;
        if select.from.is_empty() {
            if let Some(table) = dialect.empty_from() {
                self.push(" FROM ");
                self.push(table);
            }
        } else {
            self.push(" FROM ");
            for (i, table) in select.from.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.table(table, true)?;
            }
        }

        if let Some(condition) = &select.where_clause {
            self.push(" WHERE ");
            self.condition(condition)?;
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.expression_list(&select.group_by)?;
        }
        if let Some(condition) = &select.having {
            self.push(" HAVING ");
            self.condition(condition)?;
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, item) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expression(&item.expression)?;
                if item.descending {
                    self.push(" DESC");
                }
            }
        }
        if let Some(limit) = &select.limit {
            let query = std::mem::take(&mut self.sql);
            self.sql = self.dialect.render_limit(query, limit);
        }
        Ok(())
    }

    fn insert(&mut self, insert: &Insert) -> Result<(), CompileError> {
        let values = insert.source.values();
        if insert.columns.is_empty() {
            return Err(CompileError::InvalidCommand("INSERT requires at least one column".into()));
        }
        if insert.columns.len() != values.len() {
            return Err(CompileError::InvalidCommand(format!(
                "INSERT names {} columns but supplies {} values",
                insert.columns.len(),
                values.len()
            )));
        }

        let keyword = self.dialect.insert_keyword().to_string();
        self.push(&keyword);
        self.push(" ");
        self.table(&insert.table, false)?;
        self.push(" (");
        for (i, column) in insert.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.column(column)?;
        }
        self.push(") VALUES (");
        self.expression_list(values)?;
        self.push(")");
        Ok(())
    }

    fn update(&mut self, update: &Update) -> Result<(), CompileError> {
        if !self.dialect.supports_update() {
            return Err(CompileError::unsupported(self.dialect.name(), "UPDATE"));
        }
        if update.assignments.is_empty() {
            return Err(CompileError::InvalidCommand("UPDATE requires at least one assignment".into()));
        }

        self.push("UPDATE ");
        self.table(&update.table, false)?;
        self.push(" SET ");
        for (i, assignment) in update.assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.column(&assignment.column)?;
            self.push(" = ");
            self.expression(&assignment.value)?;
        }
        if let Some(condition) = &update.where_clause {
            self.push(" WHERE ");
            self.condition(condition)?;
        }
        Ok(())
    }

    fn delete(&mut self, delete: &Delete) -> Result<(), CompileError> {
        self.push("DELETE FROM ");
        self.table(&delete.table, false)?;
        if let Some(condition) = &delete.where_clause {
            self.push(" WHERE ");
            self.condition(condition)?;
        }
        Ok(())
    }
}

/// Target type named by a conversion's second argument, else its return type
fn conversion_target(function: &Function) -> RuntimeType {
    match function.args.get(1) {
        Some(Expression::Literal(Literal {
            value: Value::String(name),
            ..
        })) => RuntimeType::from_name(name).unwrap_or(function.runtime_type),
        _ => function.runtime_type,
    }
}
