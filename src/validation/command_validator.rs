use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CompileError, EngineError, EngineResult};
use crate::models::{
    Catalog, ColumnReference, Command, Condition, Expression, InsertSource, TableMetadata, Value,
};

/// Resolves command metadata through the catalog and checks command structure
///
/// Commands arriving over the wire carry table and column names only; the compiler
/// needs every reference resolved, so validation runs first.
pub struct CommandValidator;

/// Lowercased group name to (group name, table)
type Scope = HashMap<String, (String, Arc<TableMetadata>)>;

impl CommandValidator {
    /// Resolve metadata in place and validate the command
    pub fn resolve(command: &mut Command, catalog: &dyn Catalog) -> EngineResult<()> {
        if let Command::BatchedUpdates { commands } = command {
            if commands.is_empty() {
                return Err(EngineError::Validation("Batched update contains no commands".to_string()));
            }
            for nested in commands.iter_mut() {
                if matches!(nested, Command::Select(_) | Command::BatchedUpdates { .. }) {
                    return Err(EngineError::Validation(
                        "Batched updates may only contain INSERT, UPDATE and DELETE".to_string(),
                    ));
                }
                Self::resolve(nested, catalog)?;
            }
            return Ok(());
        }

        let scope = Self::resolve_tables(command, catalog)?;
        Self::resolve_columns(command, &scope)?;
        Self::validate(command)
    }

    fn resolve_tables(command: &mut Command, catalog: &dyn Catalog) -> EngineResult<Scope> {
        let mut scope = Scope::new();
        for table in command.tables_mut() {
            let metadata = match &table.metadata {
                Some(metadata) => metadata.clone(),
                None => {
                    let metadata = catalog.resolve(&table.name).ok_or_else(|| {
                        CompileError::MissingMetadata(format!("unknown table '{}'", table.name))
                    })?;
                    tracing::debug!("Resolved table {} from catalog", table.name);
                    table.metadata = Some(metadata.clone());
                    metadata
                }
            };
            let group = table.group_name().to_string();
            scope.insert(group.to_lowercase(), (group, metadata));
        }
        Ok(scope)
    }

    fn resolve_columns(command: &mut Command, scope: &Scope) -> EngineResult<()> {
        match command {
            Command::Select(select) => {
                for column in select.projection.iter_mut() {
                    Self::resolve_expression(&mut column.expression, scope)?;
                }
                if let Some(condition) = select.where_clause.as_mut() {
                    Self::resolve_condition(condition, scope)?;
                }
                for expression in select.group_by.iter_mut() {
                    Self::resolve_expression(expression, scope)?;
                }
                if let Some(condition) = select.having.as_mut() {
                    Self::resolve_condition(condition, scope)?;
                }
                for item in select.order_by.iter_mut() {
                    Self::resolve_expression(&mut item.expression, scope)?;
                }
            }
            Command::Insert(insert) => {
                for column in insert.columns.iter_mut() {
                    Self::resolve_column(column, scope)?;
                }
                let values = match &mut insert.source {
                    InsertSource::Values { values } | InsertSource::Parameterized { values, .. } => values,
                };
                for value in values.iter_mut() {
                    Self::resolve_expression(value, scope)?;
                }
            }
            Command::Update(update) => {
                for assignment in update.assignments.iter_mut() {
                    Self::resolve_column(&mut assignment.column, scope)?;
                    Self::resolve_expression(&mut assignment.value, scope)?;
                }
                if let Some(condition) = update.where_clause.as_mut() {
                    Self::resolve_condition(condition, scope)?;
                }
            }
            Command::Delete(delete) => {
                if let Some(condition) = delete.where_clause.as_mut() {
                    Self::resolve_condition(condition, scope)?;
                }
            }
            Command::BatchedUpdates { .. } => {}
        }
        Ok(())
    }

    fn resolve_condition(condition: &mut Condition, scope: &Scope) -> EngineResult<()> {
        match condition {
            Condition::Comparison { left, right, .. } => {
                Self::resolve_expression(left, scope)?;
                Self::resolve_expression(right, scope)
            }
            Condition::And { conditions } | Condition::Or { conditions } => {
                if conditions.is_empty() {
                    return Err(EngineError::Validation("Empty AND/OR condition".to_string()));
                }
                for nested in conditions.iter_mut() {
                    Self::resolve_condition(nested, scope)?;
                }
                Ok(())
            }
            Condition::Not { condition } => Self::resolve_condition(condition, scope),
            Condition::IsNull { expression, .. } => Self::resolve_expression(expression, scope),
            Condition::Like {
                expression, pattern, ..
            } => {
                Self::resolve_expression(expression, scope)?;
                Self::resolve_expression(pattern, scope)
            }
            Condition::In { expression, list, .. } => {
                if list.is_empty() {
                    return Err(EngineError::Validation("IN list must not be empty".to_string()));
                }
                Self::resolve_expression(expression, scope)?;
                for item in list.iter_mut() {
                    Self::resolve_expression(item, scope)?;
                }
                Ok(())
            }
        }
    }

    fn resolve_expression(expression: &mut Expression, scope: &Scope) -> EngineResult<()> {
        match expression {
            Expression::Column(column) => Self::resolve_column(column, scope),
            Expression::Function(function) => {
                for arg in function.args.iter_mut() {
                    Self::resolve_expression(arg, scope)?;
                }
                Ok(())
            }
            Expression::Literal(_) | Expression::Parameter(_) => Ok(()),
        }
    }

    fn resolve_column(column: &mut ColumnReference, scope: &Scope) -> EngineResult<()> {
        if column.metadata.is_some() {
            return Ok(());
        }

        let (group, table) = match &column.group {
            Some(group) => scope.get(&group.to_lowercase()),
            None if scope.len() == 1 => scope.values().next(),
            None => {
                return Err(EngineError::Validation(format!(
                    "Column '{}' is ambiguous without a table qualifier",
                    column.name
                )))
            }
        }
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "Column '{}' refers to a table that is not in the command",
                column.name
            ))
        })?;

        let metadata = table.column(&column.name).ok_or_else(|| {
            CompileError::MissingMetadata(format!(
                "table '{}' has no column '{}'",
                table.full_name(),
                column.name
            ))
        })?;

        if column.group.is_none() {
            column.group = Some(group.clone());
        }
        column.runtime_type = metadata.runtime_type;
        column.metadata = Some(metadata.clone());
        Ok(())
    }

    /// Structural checks that need resolved metadata
    fn validate(command: &Command) -> EngineResult<()> {
        match command {
            Command::Select(select) => {
                // A SELECT without tables is left to the dialect's empty FROM
                if select.projection.is_empty() {
                    return Err(EngineError::Validation("SELECT list must not be empty".to_string()));
                }
                Ok(())
            }
            Command::Insert(insert) => {
                let values = insert.source.values();
                if insert.columns.len() != values.len() {
                    return Err(EngineError::Validation(format!(
                        "INSERT names {} columns but supplies {} values",
                        insert.columns.len(),
                        values.len()
                    )));
                }
                if let InsertSource::Parameterized { values, rows } = &insert.source {
                    Self::validate_parameter_rows(values.iter(), rows)?;
                }
                Ok(())
            }
            Command::Update(update) => {
                if update.assignments.is_empty() {
                    return Err(EngineError::Validation("UPDATE sets no columns".to_string()));
                }
                let mut expressions: Vec<&Expression> = update.assignments.iter().map(|a| &a.value).collect();
                if let Some(condition) = &update.where_clause {
                    collect_condition(condition, &mut expressions);
                }
                Self::validate_parameter_rows(expressions.into_iter(), &update.parameter_rows)
            }
            Command::Delete(delete) => {
                let mut expressions = Vec::new();
                if let Some(condition) = &delete.where_clause {
                    collect_condition(condition, &mut expressions);
                }
                Self::validate_parameter_rows(expressions.into_iter(), &delete.parameter_rows)
            }
            Command::BatchedUpdates { .. } => Ok(()),
        }
    }

    /// Every parameter index must fall inside every row
    fn validate_parameter_rows<'a>(
        expressions: impl Iterator<Item = &'a Expression>,
        rows: &[Vec<Value>],
    ) -> EngineResult<()> {
        let mut highest: Option<usize> = None;
        for expression in expressions {
            visit_parameters(expression, &mut |index| {
                highest = Some(highest.map_or(index, |h| h.max(index)));
            });
        }

        let Some(highest) = highest else {
            return Ok(());
        };
        if rows.is_empty() {
            return Err(EngineError::Validation(
                "Command uses parameters but supplies no parameter rows".to_string(),
            ));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() <= highest {
                return Err(EngineError::Validation(format!(
                    "Parameter row {} has {} values but parameter {} is referenced",
                    i,
                    row.len(),
                    highest
                )));
            }
        }
        Ok(())
    }
}

fn collect_condition<'a>(condition: &'a Condition, out: &mut Vec<&'a Expression>) {
    match condition {
        Condition::Comparison { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        Condition::And { conditions } | Condition::Or { conditions } => {
            for nested in conditions {
                collect_condition(nested, out);
            }
        }
        Condition::Not { condition } => collect_condition(condition, out),
        Condition::IsNull { expression, .. } => out.push(expression),
        Condition::Like {
            expression, pattern, ..
        } => {
            out.push(expression);
            out.push(pattern);
        }
        Condition::In { expression, list, .. } => {
            out.push(expression);
            out.extend(list.iter());
        }
    }
}

fn visit_parameters(expression: &Expression, visit: &mut impl FnMut(usize)) {
    match expression {
        Expression::Parameter(parameter) => visit(parameter.index),
        Expression::Function(function) => {
            for arg in &function.args {
                visit_parameters(arg, visit);
            }
        }
        Expression::Column(_) | Expression::Literal(_) => {}
    }
}
