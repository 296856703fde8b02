// Runtime Types and Values
//
// The finite set of runtime types a command can carry, the typed values that flow
// through literals, parameters and result rows, and the two-way table between
// runtime types and native parameter setters.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime type of an expression, literal, parameter or result column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    String,
    Char,
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    BigInteger,
    Float,
    Double,
    BigDecimal,
    Date,
    Time,
    Timestamp,
    Varbinary,
    Blob,
    Clob,
    Xml,
    Object,
}

impl RuntimeType {
    pub const ALL: [RuntimeType; 19] = [
        RuntimeType::String,
        RuntimeType::Char,
        RuntimeType::Boolean,
        RuntimeType::Byte,
        RuntimeType::Short,
        RuntimeType::Integer,
        RuntimeType::Long,
        RuntimeType::BigInteger,
        RuntimeType::Float,
        RuntimeType::Double,
        RuntimeType::BigDecimal,
        RuntimeType::Date,
        RuntimeType::Time,
        RuntimeType::Timestamp,
        RuntimeType::Varbinary,
        RuntimeType::Blob,
        RuntimeType::Clob,
        RuntimeType::Xml,
        RuntimeType::Object,
    ];

    /// Get the type name as written in CONVERT/CAST target literals
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeType::String => "string",
            RuntimeType::Char => "char",
            RuntimeType::Boolean => "boolean",
            RuntimeType::Byte => "byte",
            RuntimeType::Short => "short",
            RuntimeType::Integer => "integer",
            RuntimeType::Long => "long",
            RuntimeType::BigInteger => "biginteger",
            RuntimeType::Float => "float",
            RuntimeType::Double => "double",
            RuntimeType::BigDecimal => "bigdecimal",
            RuntimeType::Date => "date",
            RuntimeType::Time => "time",
            RuntimeType::Timestamp => "timestamp",
            RuntimeType::Varbinary => "varbinary",
            RuntimeType::Blob => "blob",
            RuntimeType::Clob => "clob",
            RuntimeType::Xml => "xml",
            RuntimeType::Object => "object",
        }
    }

    /// Parse a type name, accepting the common aliases used by planners
    pub fn from_name(s: &str) -> Option<Self> {
        let ty = match s.trim().to_lowercase().as_str() {
            "string" | "varchar" => RuntimeType::String,
            "char" => RuntimeType::Char,
            "boolean" => RuntimeType::Boolean,
            "byte" | "tinyint" => RuntimeType::Byte,
            "short" | "smallint" => RuntimeType::Short,
            "integer" | "int" => RuntimeType::Integer,
            "long" | "bigint" => RuntimeType::Long,
            "biginteger" => RuntimeType::BigInteger,
            "float" | "real" => RuntimeType::Float,
            "double" => RuntimeType::Double,
            "bigdecimal" | "decimal" => RuntimeType::BigDecimal,
            "date" => RuntimeType::Date,
            "time" => RuntimeType::Time,
            "timestamp" => RuntimeType::Timestamp,
            "varbinary" => RuntimeType::Varbinary,
            "blob" => RuntimeType::Blob,
            "clob" => RuntimeType::Clob,
            "xml" => RuntimeType::Xml,
            "object" => RuntimeType::Object,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            RuntimeType::Byte
                | RuntimeType::Short
                | RuntimeType::Integer
                | RuntimeType::Long
                | RuntimeType::BigInteger
                | RuntimeType::Float
                | RuntimeType::Double
                | RuntimeType::BigDecimal
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, RuntimeType::Date | RuntimeType::Time | RuntimeType::Timestamp)
    }

    /// Large-object and opaque types, which are never written inline
    pub fn is_large_object(&self) -> bool {
        matches!(
            self,
            RuntimeType::Blob | RuntimeType::Clob | RuntimeType::Xml | RuntimeType::Object
        )
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed value carried by literals, parameter rows and result rows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    String(String),
    Char(char),
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    BigInteger(i128),
    Float(f32),
    Double(f64),
    BigDecimal(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Varbinary(Vec<u8>),
    Blob(Vec<u8>),
    Clob(String),
    Xml(String),
    Object(serde_json::Value),
}

impl Value {
    /// The runtime type this value naturally carries (None for NULL)
    pub fn runtime_type(&self) -> Option<RuntimeType> {
        let ty = match self {
            Value::Null => return None,
            Value::String(_) => RuntimeType::String,
            Value::Char(_) => RuntimeType::Char,
            Value::Boolean(_) => RuntimeType::Boolean,
            Value::Byte(_) => RuntimeType::Byte,
            Value::Short(_) => RuntimeType::Short,
            Value::Integer(_) => RuntimeType::Integer,
            Value::Long(_) => RuntimeType::Long,
            Value::BigInteger(_) => RuntimeType::BigInteger,
            Value::Float(_) => RuntimeType::Float,
            Value::Double(_) => RuntimeType::Double,
            Value::BigDecimal(_) => RuntimeType::BigDecimal,
            Value::Date(_) => RuntimeType::Date,
            Value::Time(_) => RuntimeType::Time,
            Value::Timestamp(_) => RuntimeType::Timestamp,
            Value::Varbinary(_) => RuntimeType::Varbinary,
            Value::Blob(_) => RuntimeType::Blob,
            Value::Clob(_) => RuntimeType::Clob,
            Value::Xml(_) => RuntimeType::Xml,
            Value::Object(_) => RuntimeType::Object,
        };
        Some(ty)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Byte(v) => Some(*v as i128),
            Value::Short(v) => Some(*v as i128),
            Value::Integer(v) => Some(*v as i128),
            Value::Long(v) => Some(*v as i128),
            Value::BigInteger(v) => Some(*v),
            Value::Boolean(v) => Some(*v as i128),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::BigDecimal(d) => d.to_string().parse().ok(),
            other => other.as_i128().map(|v| v as f64),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::Clob(s) | Value::Xml(s) => Some(s.clone()),
            Value::Char(c) => Some(c.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Some(t.format("%H:%M:%S").to_string()),
            Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::BigDecimal(d) => Some(d.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Object(v) => Some(v.to_string()),
            other => other.as_i128().map(|v| v.to_string()),
        }
    }

    /// Coerce a value read from a native cursor into the declared output type
    pub fn coerce(self, target: RuntimeType) -> Result<Value, String> {
        if self.is_null() || self.runtime_type() == Some(target) {
            return Ok(self);
        }
        let fail = |v: &Value| format!("cannot convert {:?} to {}", v, target);
        let coerced = match target {
            RuntimeType::String => self.as_text().map(Value::String),
            RuntimeType::Clob => self.as_text().map(Value::Clob),
            RuntimeType::Xml => self.as_text().map(Value::Xml),
            RuntimeType::Char => self
                .as_text()
                .and_then(|s| {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(c),
                        _ => None,
                    }
                })
                .map(Value::Char),
            RuntimeType::Boolean => match &self {
                Value::String(s) => match s.to_lowercase().as_str() {
                    "true" | "1" => Some(Value::Boolean(true)),
                    "false" | "0" => Some(Value::Boolean(false)),
                    _ => None,
                },
                other => other.as_i128().map(|v| Value::Boolean(v != 0)),
            },
            RuntimeType::Byte => self.integral().and_then(|v| i8::try_from(v).ok()).map(Value::Byte),
            RuntimeType::Short => self.integral().and_then(|v| i16::try_from(v).ok()).map(Value::Short),
            RuntimeType::Integer => self
                .integral()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Integer),
            RuntimeType::Long => self.integral().and_then(|v| i64::try_from(v).ok()).map(Value::Long),
            RuntimeType::BigInteger => self.integral().map(Value::BigInteger),
            RuntimeType::Float => self.numeric().map(|v| Value::Float(v as f32)),
            RuntimeType::Double => self.numeric().map(Value::Double),
            RuntimeType::BigDecimal => match &self {
                Value::Float(_) | Value::Double(_) => self
                    .as_f64()
                    .and_then(|v| Decimal::try_from(v).ok())
                    .map(Value::BigDecimal),
                other => other
                    .as_text()
                    .and_then(|s| s.parse::<Decimal>().ok())
                    .map(Value::BigDecimal),
            },
            RuntimeType::Date => match &self {
                Value::Timestamp(ts) => Some(Value::Date(ts.date())),
                other => other
                    .as_text()
                    .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
                    .map(Value::Date),
            },
            RuntimeType::Time => match &self {
                Value::Timestamp(ts) => Some(Value::Time(ts.time())),
                other => other
                    .as_text()
                    .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M:%S%.f").ok())
                    .map(Value::Time),
            },
            RuntimeType::Timestamp => match &self {
                Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::Timestamp),
                other => other
                    .as_text()
                    .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f").ok())
                    .map(Value::Timestamp),
            },
            RuntimeType::Varbinary | RuntimeType::Blob => {
                let bytes = match &self {
                    Value::Varbinary(b) | Value::Blob(b) => Some(b.clone()),
                    Value::String(s) => Some(s.as_bytes().to_vec()),
                    _ => None,
                };
                bytes.map(|b| {
                    if target == RuntimeType::Blob {
                        Value::Blob(b)
                    } else {
                        Value::Varbinary(b)
                    }
                })
            }
            RuntimeType::Object => Some(Value::Object(match &self {
                Value::Object(v) => v.clone(),
                other => serde_json::Value::String(other.as_text().unwrap_or_default()),
            })),
        };
        coerced.ok_or_else(|| fail(&self))
    }

    fn integral(&self) -> Option<i128> {
        match self {
            Value::String(s) => s.trim().parse().ok(),
            Value::BigDecimal(d) if d.fract().is_zero() => d.trunc().to_string().parse().ok(),
            Value::Float(_) | Value::Double(_) => {
                let v = self.as_f64()?;
                (v.fract() == 0.0).then_some(v as i128)
            }
            other => other.as_i128(),
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_f64(),
        }
    }
}

/// Native parameter setter used to bind a value of a given runtime type
///
/// `for_type` and `runtime_type` form the two-way table between runtime types
/// and setters. Types without a dedicated setter fall back to `Object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeBinding {
    String,
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    BigDecimal,
    Date,
    Time,
    Timestamp,
    Bytes,
    Blob,
    Clob,
    Object,
}

impl TypeBinding {
    pub fn for_type(ty: RuntimeType) -> Self {
        match ty {
            RuntimeType::String | RuntimeType::Char => TypeBinding::String,
            RuntimeType::Boolean => TypeBinding::Boolean,
            RuntimeType::Byte => TypeBinding::Byte,
            RuntimeType::Short => TypeBinding::Short,
            RuntimeType::Integer => TypeBinding::Int,
            RuntimeType::Long => TypeBinding::Long,
            RuntimeType::Float => TypeBinding::Float,
            RuntimeType::Double => TypeBinding::Double,
            RuntimeType::BigDecimal => TypeBinding::BigDecimal,
            RuntimeType::Date => TypeBinding::Date,
            RuntimeType::Time => TypeBinding::Time,
            RuntimeType::Timestamp => TypeBinding::Timestamp,
            RuntimeType::Varbinary => TypeBinding::Bytes,
            RuntimeType::Blob => TypeBinding::Blob,
            RuntimeType::Clob => TypeBinding::Clob,
            RuntimeType::BigInteger | RuntimeType::Xml | RuntimeType::Object => TypeBinding::Object,
        }
    }

    /// The runtime type values read back through this setter's getter carry
    pub fn runtime_type(&self) -> RuntimeType {
        match self {
            TypeBinding::String => RuntimeType::String,
            TypeBinding::Boolean => RuntimeType::Boolean,
            TypeBinding::Byte => RuntimeType::Byte,
            TypeBinding::Short => RuntimeType::Short,
            TypeBinding::Int => RuntimeType::Integer,
            TypeBinding::Long => RuntimeType::Long,
            TypeBinding::Float => RuntimeType::Float,
            TypeBinding::Double => RuntimeType::Double,
            TypeBinding::BigDecimal => RuntimeType::BigDecimal,
            TypeBinding::Date => RuntimeType::Date,
            TypeBinding::Time => RuntimeType::Time,
            TypeBinding::Timestamp => RuntimeType::Timestamp,
            TypeBinding::Bytes => RuntimeType::Varbinary,
            TypeBinding::Blob => RuntimeType::Blob,
            TypeBinding::Clob => RuntimeType::Clob,
            TypeBinding::Object => RuntimeType::Object,
        }
    }
}
