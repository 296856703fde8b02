// Relational dialect (Oracle)
//
// Oracle has no boolean type, no LIMIT clause and no ODBC scalar functions, so
// this dialect rewrites functions, renders booleans as 1/0, wraps limited
// queries in ROWNUM filters and emulates CONVERT per (source, target) pair.

use crate::error::CompileError;
use crate::models::{Limit, RuntimeType, Value};

use super::{call, default_literal, quote_string, Conversion, DialectKind, DialectRules, Fragment, FunctionRegistry};

pub const DATE_FORMAT: &str = "YYYY-MM-DD";
pub const TIME_FORMAT: &str = "HH24:MI:SS";
pub const TIMESTAMP_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.FF";

/// Oracle identifier limit
pub const MAX_IDENTIFIER_LENGTH: usize = 30;

pub struct RelationalDialect {
    functions: FunctionRegistry,
}

impl RelationalDialect {
    pub fn new() -> Self {
        let functions = FunctionRegistry::new();
        functions.register_rename("substring", "SUBSTR");
        functions.register_rename("lcase", "LOWER");
        functions.register_rename("ucase", "UPPER");
        functions.register_rename("ifnull", "NVL");
        functions.register_rename("ceiling", "CEIL");
        functions.register_rename("char", "CHR");

        // locate(search, source[, start]) -> INSTR(source, search[, start])
        functions.register_if_absent("locate", |function| match function.args.len() {
            2 => Some(call("INSTR", [1, 0])),
            3 => Some(call("INSTR", [1, 0, 2])),
            _ => None,
        });
        functions.register_if_absent("log10", |function| match function.args.len() {
            1 => Some(vec![Fragment::text("LOG(10, "), Fragment::Arg(0), Fragment::text(")")]),
            _ => None,
        });
        functions.register_if_absent("concat", |function| {
            if function.args.len() < 2 {
                return None;
            }
            let mut fragments = vec![Fragment::text("(")];
            for index in 0..function.args.len() {
                if index > 0 {
                    fragments.push(Fragment::text(" || "));
                }
                fragments.push(Fragment::Arg(index));
            }
            fragments.push(Fragment::text(")"));
            Some(fragments)
        });

        Self { functions }
    }

    fn wrap(prefix: &str, suffix: &str) -> Conversion {
        Conversion::Rewrite(vec![Fragment::text(prefix), Fragment::Arg(0), Fragment::text(suffix)])
    }

    fn with_format(function: &str, format: &str) -> Conversion {
        Self::wrap(&format!("{}(", function), &format!(", '{}')", format))
    }

    fn from_string(target: RuntimeType) -> Conversion {
        match target {
            t if t.is_numeric() => Self::wrap("TO_NUMBER(", ")"),
            RuntimeType::Date => Self::with_format("TO_DATE", DATE_FORMAT),
            RuntimeType::Time => Self::with_format("TO_DATE", TIME_FORMAT),
            RuntimeType::Timestamp => Self::with_format("TO_TIMESTAMP", TIMESTAMP_FORMAT),
            RuntimeType::Boolean => Self::wrap(
                "CASE LOWER(",
                ") WHEN 'true' THEN 1 WHEN '1' THEN 1 WHEN 'false' THEN 0 WHEN '0' THEN 0 END",
            ),
            _ => Conversion::Drop,
        }
    }

    fn to_text(source: RuntimeType) -> Conversion {
        match source {
            RuntimeType::Date => Self::with_format("TO_CHAR", DATE_FORMAT),
            RuntimeType::Time => Self::with_format("TO_CHAR", TIME_FORMAT),
            RuntimeType::Timestamp => Self::with_format("TO_CHAR", TIMESTAMP_FORMAT),
            s if s.is_numeric() => Self::wrap("TO_CHAR(", ")"),
            RuntimeType::Boolean => Self::wrap("CASE ", " WHEN 1 THEN 'true' WHEN 0 THEN 'false' END"),
            _ => Conversion::Drop,
        }
    }
}

impl Default for RelationalDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl DialectRules for RelationalDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Relational
    }

    fn functions(&self) -> Option<&FunctionRegistry> {
        Some(&self.functions)
    }

    fn format_literal(&self, value: &Value, _runtime_type: RuntimeType) -> Result<String, CompileError> {
        match value {
            Value::Boolean(b) => Ok((if *b { "1" } else { "0" }).to_string()),
            Value::Date(d) => Ok(format!(
                "TO_DATE({}, '{}')",
                quote_string(&d.format("%Y-%m-%d").to_string()),
                DATE_FORMAT
            )),
            Value::Time(t) => Ok(format!(
                "TO_DATE({}, '{}')",
                quote_string(&t.format("%H:%M:%S").to_string()),
                TIME_FORMAT
            )),
            Value::Timestamp(ts) => Ok(format!(
                "TO_TIMESTAMP({}, '{}')",
                quote_string(&ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
                TIMESTAMP_FORMAT
            )),
            Value::Varbinary(bytes) | Value::Blob(bytes) => Ok(format!(
                "HEXTORAW('{}')",
                bytes.iter().map(|b| format!("{:02X}", b)).collect::<String>()
            )),
            other => default_literal(self.name(), other),
        }
    }

    /// Dispatch on the pair: the source type decides which native idiom applies
    fn convert(&self, source: RuntimeType, target: RuntimeType) -> Conversion {
        if source == target {
            return Conversion::Drop;
        }
        match (source, target) {
            (RuntimeType::String | RuntimeType::Char, target) => Self::from_string(target),
            (source, RuntimeType::String | RuntimeType::Char) => Self::to_text(source),
            (RuntimeType::Timestamp, RuntimeType::Date) => Self::wrap("TRUNC(", ")"),
            (RuntimeType::Date, RuntimeType::Timestamp) => Self::wrap("CAST(", " AS TIMESTAMP)"),
            _ => Conversion::Drop,
        }
    }

    fn max_alias_length(&self) -> Option<usize> {
        Some(MAX_IDENTIFIER_LENGTH)
    }

    fn render_limit(&self, query: String, limit: &Limit) -> String {
        if limit.offset == 0 {
            format!("SELECT * FROM ({}) WHERE ROWNUM <= {}", query, limit.row_count)
        } else {
            format!(
                "SELECT * FROM (SELECT VIEW_FOR_LIMIT.*, ROWNUM ROWNUM_ FROM ({}) VIEW_FOR_LIMIT WHERE ROWNUM <= {}) WHERE ROWNUM_ > {}",
                query,
                limit.offset.saturating_add(limit.row_count),
                limit.offset
            )
        }
    }

    fn empty_from(&self) -> Option<&str> {
        Some("DUAL")
    }

    fn native_type_name(&self, runtime_type: RuntimeType) -> Option<&'static str> {
        let name = match runtime_type {
            RuntimeType::String => "VARCHAR2(4000)",
            RuntimeType::Char => "CHAR(1)",
            RuntimeType::Boolean => "NUMBER(1)",
            RuntimeType::Byte => "NUMBER(3)",
            RuntimeType::Short => "NUMBER(5)",
            RuntimeType::Integer => "NUMBER(10)",
            RuntimeType::Long => "NUMBER(19)",
            RuntimeType::BigInteger => "NUMBER(38)",
            RuntimeType::Float => "BINARY_FLOAT",
            RuntimeType::Double => "BINARY_DOUBLE",
            RuntimeType::BigDecimal => "NUMBER",
            RuntimeType::Date | RuntimeType::Time => "DATE",
            RuntimeType::Timestamp => "TIMESTAMP",
            RuntimeType::Varbinary => "RAW(2000)",
            RuntimeType::Blob => "BLOB",
            RuntimeType::Clob => "CLOB",
            RuntimeType::Xml => "XMLTYPE",
            RuntimeType::Object => return None,
        };
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Expression, Function};
    use chrono::NaiveDate;

    fn rendered(conversion: Conversion, inner: &str) -> Option<String> {
        match conversion {
            Conversion::Rewrite(fragments) => Some(
                fragments
                    .into_iter()
                    .map(|f| match f {
                        Fragment::Text(text) => text,
                        Fragment::Arg(_) => inner.to_string(),
                    })
                    .collect(),
            ),
            Conversion::Drop => None,
        }
    }

    fn function(name: &str, arity: usize) -> Function {
        Function {
            name: name.into(),
            args: (0..arity)
                .map(|i| Expression::literal(Value::Integer(i as i32), RuntimeType::Integer))
                .collect(),
            runtime_type: RuntimeType::Integer,
        }
    }

    #[test]
    fn test_string_to_short_uses_string_source_path() {
        let dialect = RelationalDialect::new();
        assert_eq!(
            rendered(dialect.convert(RuntimeType::String, RuntimeType::Short), "x"),
            Some("TO_NUMBER(x)".to_string())
        );
    }

    #[test]
    fn test_conversion_dispatches_on_pair() {
        let dialect = RelationalDialect::new();
        assert_eq!(
            rendered(dialect.convert(RuntimeType::String, RuntimeType::Date), "x"),
            Some("TO_DATE(x, 'YYYY-MM-DD')".to_string())
        );
        assert_eq!(
            rendered(dialect.convert(RuntimeType::Timestamp, RuntimeType::String), "x"),
            Some("TO_CHAR(x, 'YYYY-MM-DD HH24:MI:SS.FF')".to_string())
        );
        assert_eq!(
            rendered(dialect.convert(RuntimeType::Integer, RuntimeType::String), "x"),
            Some("TO_CHAR(x)".to_string())
        );
        assert_eq!(
            rendered(dialect.convert(RuntimeType::Timestamp, RuntimeType::Date), "x"),
            Some("TRUNC(x)".to_string())
        );
        assert_eq!(
            rendered(dialect.convert(RuntimeType::Date, RuntimeType::Timestamp), "x"),
            Some("CAST(x AS TIMESTAMP)".to_string())
        );
    }

    #[test]
    fn test_unmapped_pairs_drop_the_conversion() {
        let dialect = RelationalDialect::new();
        assert_eq!(dialect.convert(RuntimeType::Integer, RuntimeType::Long), Conversion::Drop);
        assert_eq!(dialect.convert(RuntimeType::Blob, RuntimeType::Date), Conversion::Drop);
        assert_eq!(dialect.convert(RuntimeType::String, RuntimeType::String), Conversion::Drop);
    }

    #[test]
    fn test_function_rewrites() {
        let dialect = RelationalDialect::new();
        assert_eq!(dialect.rewrite_function(&function("substring", 3)), Some(call("SUBSTR", [0, 1, 2])));
        assert_eq!(dialect.rewrite_function(&function("locate", 2)), Some(call("INSTR", [1, 0])));
        assert_eq!(dialect.rewrite_function(&function("locate", 3)), Some(call("INSTR", [1, 0, 2])));
        assert_eq!(
            dialect.rewrite_function(&function("log10", 1)),
            Some(vec![Fragment::text("LOG(10, "), Fragment::Arg(0), Fragment::text(")")])
        );
        assert_eq!(dialect.rewrite_function(&function("ifnull", 2)), Some(call("NVL", [0, 1])));
        assert_eq!(dialect.rewrite_function(&function("abs", 1)), None);
    }

    #[test]
    fn test_literals() {
        let dialect = RelationalDialect::new();
        assert_eq!(dialect.format_literal(&Value::Boolean(true), RuntimeType::Boolean).unwrap(), "1");
        assert_eq!(
            dialect
                .format_literal(
                    &Value::Date(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()),
                    RuntimeType::Date
                )
                .unwrap(),
            "TO_DATE('2023-12-31', 'YYYY-MM-DD')"
        );
        assert_eq!(
            dialect.format_literal(&Value::String("it's".into()), RuntimeType::String).unwrap(),
            "'it''s'"
        );
    }

    #[test]
    fn test_rownum_limits() {
        let dialect = RelationalDialect::new();
        assert_eq!(
            dialect.render_limit("SELECT \"a\" FROM \"t\"".into(), &Limit { row_count: 5, offset: 0 }),
            "SELECT * FROM (SELECT \"a\" FROM \"t\") WHERE ROWNUM <= 5"
        );
        assert_eq!(
            dialect.render_limit("Q".into(), &Limit { row_count: 5, offset: 10 }),
            "SELECT * FROM (SELECT VIEW_FOR_LIMIT.*, ROWNUM ROWNUM_ FROM (Q) VIEW_FOR_LIMIT WHERE ROWNUM <= 15) WHERE ROWNUM_ > 10"
        );
    }
}
