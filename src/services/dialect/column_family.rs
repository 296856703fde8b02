// Column-family dialect (Phoenix over HBase)
//
// Tables and columns always resolve through the schema mapper's native schema,
// columns render as `"family"."qualifier"`, inserts are upserts and binary values
// are never written inline.

use crate::models::RuntimeType;
use crate::services::schema_mapper::NativeTypeCode;

use super::{call, DialectKind, DialectRules, FunctionRegistry};

pub struct ColumnFamilyDialect {
    functions: FunctionRegistry,
}

impl ColumnFamilyDialect {
    pub fn new() -> Self {
        let functions = FunctionRegistry::new();
        functions.register_rename("ucase", "UPPER");
        functions.register_rename("lcase", "LOWER");
        functions.register_rename("substring", "SUBSTR");
        // Phoenix INSTR takes (source, search), the reverse of locate
        functions.register_if_absent("locate", |function| match function.args.len() {
            2 => Some(call("INSTR", [1, 0])),
            _ => None,
        });
        Self { functions }
    }
}

impl Default for ColumnFamilyDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl DialectRules for ColumnFamilyDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::ColumnFamily
    }

    fn requires_schema_mapping(&self) -> bool {
        true
    }

    fn functions(&self) -> Option<&FunctionRegistry> {
        Some(&self.functions)
    }

    fn must_bind(&self, runtime_type: RuntimeType) -> bool {
        runtime_type.is_large_object() || runtime_type == RuntimeType::Varbinary
    }

    fn insert_keyword(&self) -> &str {
        "UPSERT INTO"
    }

    fn supports_update(&self) -> bool {
        false
    }

    fn native_type_name(&self, runtime_type: RuntimeType) -> Option<&'static str> {
        NativeTypeCode::for_runtime_type(runtime_type).map(|code| code.as_str())
    }
}
