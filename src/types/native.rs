//! Backend-native types and values.
//!
//! These mirror the storage engine's primitive catalogue. Temporal values are
//! kept in the engine's epoch encodings (days, seconds, microseconds), which is
//! why conversion to public [`Value`](super::Value)s lives in a separate mapper.

use bytes::Bytes;
use std::fmt;

/// A native column or parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    /// Arbitrary bytes (the engine calls this `String`).
    Bytes,
    /// UTF-8 text (the engine calls this `Utf8`).
    Text,
    Yson,
    Json,
    JsonDocument,
    Uuid,
    /// Days since the Unix epoch.
    Date,
    /// Seconds since the Unix epoch.
    Datetime,
    /// Microseconds since the Unix epoch.
    Timestamp,
    /// Signed microseconds.
    Interval,
    TzDate,
    TzDatetime,
    TzTimestamp,
    Decimal { precision: u8, scale: u8 },
    Optional(Box<NativeType>),
    /// Type of an untyped NULL literal.
    Null,
}

impl NativeType {
    /// Decimal type used for table columns.
    pub const DEFAULT_DECIMAL: NativeType = NativeType::Decimal {
        precision: 22,
        scale: 9,
    };

    /// Maximum decimal precision supported by the engine.
    pub const MAX_DECIMAL_PRECISION: u8 = 35;

    /// Wrap in `Optional<..>` unless already nullable.
    pub fn optional(self) -> Self {
        match self {
            NativeType::Optional(_) | NativeType::Null => self,
            other => NativeType::Optional(Box::new(other)),
        }
    }

    /// Whether values of this type may be absent.
    pub fn is_optional(&self) -> bool {
        matches!(self, NativeType::Optional(_) | NativeType::Null)
    }

    /// The type with any `Optional` wrapper removed.
    pub fn inner(&self) -> &NativeType {
        match self {
            NativeType::Optional(inner) => inner.inner(),
            other => other,
        }
    }

    /// Parse a type name as written in `DECLARE` clauses.
    ///
    /// Accepts `Int64`, `Int64?`, `Optional<Utf8>` and `Decimal(22,9)`.
    /// Names are case-insensitive.
    pub fn parse(name: &str) -> Option<NativeType> {
        let name = name.trim();
        if let Some(base) = name.strip_suffix('?') {
            return Self::parse(base).map(NativeType::optional);
        }
        let lower = name.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("optional<") {
            let inner = rest.strip_suffix('>')?;
            return Self::parse(inner).map(NativeType::optional);
        }
        if let Some(rest) = lower.strip_prefix("decimal") {
            let args = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
            let (p, s) = args.split_once(',')?;
            let precision: u8 = p.trim().parse().ok()?;
            let scale: u8 = s.trim().parse().ok()?;
            if precision == 0 || precision > Self::MAX_DECIMAL_PRECISION || scale > precision {
                return None;
            }
            return Some(NativeType::Decimal { precision, scale });
        }
        let ty = match lower.as_str() {
            "bool" => NativeType::Bool,
            "int8" => NativeType::Int8,
            "int16" => NativeType::Int16,
            "int32" => NativeType::Int32,
            "int64" => NativeType::Int64,
            "uint8" => NativeType::Uint8,
            "uint16" => NativeType::Uint16,
            "uint32" => NativeType::Uint32,
            "uint64" => NativeType::Uint64,
            "float" => NativeType::Float,
            "double" => NativeType::Double,
            "string" | "bytes" => NativeType::Bytes,
            "utf8" | "text" => NativeType::Text,
            "yson" => NativeType::Yson,
            "json" => NativeType::Json,
            "jsondocument" => NativeType::JsonDocument,
            "uuid" => NativeType::Uuid,
            "date" => NativeType::Date,
            "datetime" => NativeType::Datetime,
            "timestamp" => NativeType::Timestamp,
            "interval" => NativeType::Interval,
            "tzdate" => NativeType::TzDate,
            "tzdatetime" => NativeType::TzDatetime,
            "tztimestamp" => NativeType::TzTimestamp,
            "null" => NativeType::Null,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Bool => f.write_str("Bool"),
            NativeType::Int8 => f.write_str("Int8"),
            NativeType::Int16 => f.write_str("Int16"),
            NativeType::Int32 => f.write_str("Int32"),
            NativeType::Int64 => f.write_str("Int64"),
            NativeType::Uint8 => f.write_str("Uint8"),
            NativeType::Uint16 => f.write_str("Uint16"),
            NativeType::Uint32 => f.write_str("Uint32"),
            NativeType::Uint64 => f.write_str("Uint64"),
            NativeType::Float => f.write_str("Float"),
            NativeType::Double => f.write_str("Double"),
            NativeType::Bytes => f.write_str("String"),
            NativeType::Text => f.write_str("Utf8"),
            NativeType::Yson => f.write_str("Yson"),
            NativeType::Json => f.write_str("Json"),
            NativeType::JsonDocument => f.write_str("JsonDocument"),
            NativeType::Uuid => f.write_str("Uuid"),
            NativeType::Date => f.write_str("Date"),
            NativeType::Datetime => f.write_str("Datetime"),
            NativeType::Timestamp => f.write_str("Timestamp"),
            NativeType::Interval => f.write_str("Interval"),
            NativeType::TzDate => f.write_str("TzDate"),
            NativeType::TzDatetime => f.write_str("TzDatetime"),
            NativeType::TzTimestamp => f.write_str("TzTimestamp"),
            NativeType::Decimal { precision, scale } => write!(f, "Decimal({},{})", precision, scale),
            NativeType::Optional(inner) => write!(f, "Optional<{}>", inner),
            NativeType::Null => f.write_str("Null"),
        }
    }
}

/// A value in the backend's native encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    Bytes(Bytes),
    Text(String),
    Yson(Bytes),
    Json(String),
    JsonDocument(String),
    Uuid(u128),
    Date(u16),
    Datetime(u32),
    Timestamp(u64),
    Interval(i64),
    /// `YYYY-MM-DD,<offset>`
    TzDate(String),
    /// `YYYY-MM-DDTHH:MM:SS,<offset>`
    TzDatetime(String),
    /// `YYYY-MM-DDTHH:MM:SS.ffffff,<offset>`
    TzTimestamp(String),
    /// Unscaled integer with its type's precision and scale.
    Decimal {
        unscaled: i128,
        precision: u8,
        scale: u8,
    },
    /// Present value of an `Optional<T>`.
    Optional(Box<NativeValue>),
    /// Absent value of `Optional<T>`; carries `T`.
    Empty(NativeType),
    Null,
}

impl NativeValue {
    /// The native type of this value.
    pub fn native_type(&self) -> NativeType {
        match self {
            NativeValue::Bool(_) => NativeType::Bool,
            NativeValue::Int8(_) => NativeType::Int8,
            NativeValue::Int16(_) => NativeType::Int16,
            NativeValue::Int32(_) => NativeType::Int32,
            NativeValue::Int64(_) => NativeType::Int64,
            NativeValue::Uint8(_) => NativeType::Uint8,
            NativeValue::Uint16(_) => NativeType::Uint16,
            NativeValue::Uint32(_) => NativeType::Uint32,
            NativeValue::Uint64(_) => NativeType::Uint64,
            NativeValue::Float(_) => NativeType::Float,
            NativeValue::Double(_) => NativeType::Double,
            NativeValue::Bytes(_) => NativeType::Bytes,
            NativeValue::Text(_) => NativeType::Text,
            NativeValue::Yson(_) => NativeType::Yson,
            NativeValue::Json(_) => NativeType::Json,
            NativeValue::JsonDocument(_) => NativeType::JsonDocument,
            NativeValue::Uuid(_) => NativeType::Uuid,
            NativeValue::Date(_) => NativeType::Date,
            NativeValue::Datetime(_) => NativeType::Datetime,
            NativeValue::Timestamp(_) => NativeType::Timestamp,
            NativeValue::Interval(_) => NativeType::Interval,
            NativeValue::TzDate(_) => NativeType::TzDate,
            NativeValue::TzDatetime(_) => NativeType::TzDatetime,
            NativeValue::TzTimestamp(_) => NativeType::TzTimestamp,
            NativeValue::Decimal {
                precision, scale, ..
            } => NativeType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            NativeValue::Optional(inner) => inner.native_type().optional(),
            NativeValue::Empty(inner) => inner.clone().optional(),
            NativeValue::Null => NativeType::Null,
        }
    }

    /// Whether this is an absent value (typed or untyped).
    pub fn is_absent(&self) -> bool {
        match self {
            NativeValue::Empty(_) | NativeValue::Null => true,
            NativeValue::Optional(inner) => inner.is_absent(),
            _ => false,
        }
    }

    /// The present value with optional wrappers removed, or `None` if absent.
    pub fn present(&self) -> Option<&NativeValue> {
        match self {
            NativeValue::Empty(_) | NativeValue::Null => None,
            NativeValue::Optional(inner) => inner.present(),
            other => Some(other),
        }
    }
}

/// Generic SQL type vocabulary used by portable callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Char,
    Varchar,
    NChar,
    NVarchar,
    Clob,
    NClob,
    Real,
    Float,
    Double,
    Binary,
    Varbinary,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampWithTimeZone,
    TimeWithTimeZone,
    Numeric,
    Decimal,
    Collection,
}

impl SqlType {
    /// Native type used to carry values of this SQL type.
    pub fn native_type(self) -> Option<NativeType> {
        let ty = match self {
            SqlType::Boolean => NativeType::Bool,
            SqlType::TinyInt => NativeType::Int8,
            SqlType::SmallInt => NativeType::Int16,
            SqlType::Integer => NativeType::Int32,
            SqlType::BigInt => NativeType::Int64,
            SqlType::Char
            | SqlType::Varchar
            | SqlType::NChar
            | SqlType::NVarchar
            | SqlType::Clob
            | SqlType::NClob => NativeType::Text,
            SqlType::Real | SqlType::Float => NativeType::Float,
            SqlType::Double => NativeType::Double,
            SqlType::Binary | SqlType::Varbinary | SqlType::Blob => NativeType::Bytes,
            SqlType::Date => NativeType::Date,
            SqlType::Time => NativeType::Datetime,
            SqlType::Timestamp => NativeType::Timestamp,
            SqlType::TimestampWithTimeZone => NativeType::TzTimestamp,
            SqlType::TimeWithTimeZone => NativeType::TzDatetime,
            SqlType::Numeric | SqlType::Decimal => NativeType::DEFAULT_DECIMAL,
            SqlType::Collection => return None,
        };
        Some(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declared_types() {
        assert_eq!(NativeType::parse("Int64"), Some(NativeType::Int64));
        assert_eq!(NativeType::parse("utf8"), Some(NativeType::Text));
        assert_eq!(
            NativeType::parse("Int32?"),
            Some(NativeType::Optional(Box::new(NativeType::Int32)))
        );
        assert_eq!(
            NativeType::parse("Optional<Utf8>"),
            Some(NativeType::Optional(Box::new(NativeType::Text)))
        );
        assert_eq!(
            NativeType::parse("Decimal(22, 9)"),
            Some(NativeType::DEFAULT_DECIMAL)
        );
        assert_eq!(NativeType::parse("Decimal(40,2)"), None);
        assert_eq!(NativeType::parse("List<Int32>"), None);
    }

    #[test]
    fn test_display_uses_engine_names() {
        assert_eq!(NativeType::Bytes.to_string(), "String");
        assert_eq!(NativeType::Text.to_string(), "Utf8");
        assert_eq!(
            NativeType::Int64.optional().to_string(),
            "Optional<Int64>"
        );
    }

    #[test]
    fn test_optional_does_not_double_wrap() {
        let ty = NativeType::Text.optional().optional();
        assert_eq!(ty, NativeType::Optional(Box::new(NativeType::Text)));
        assert_eq!(ty.inner(), &NativeType::Text);
    }

    #[test]
    fn test_absent_values() {
        assert!(NativeValue::Null.is_absent());
        assert!(NativeValue::Empty(NativeType::Int64).is_absent());
        assert!(!NativeValue::Optional(Box::new(NativeValue::Int64(0))).is_absent());
        assert_eq!(
            NativeValue::Empty(NativeType::Int64).native_type(),
            NativeType::Int64.optional()
        );
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(SqlType::BigInt.native_type(), Some(NativeType::Int64));
        assert_eq!(SqlType::NVarchar.native_type(), Some(NativeType::Text));
        assert_eq!(SqlType::Blob.native_type(), Some(NativeType::Bytes));
        assert_eq!(SqlType::Time.native_type(), Some(NativeType::Datetime));
        assert_eq!(
            SqlType::Numeric.native_type(),
            Some(NativeType::DEFAULT_DECIMAL)
        );
        assert_eq!(SqlType::Collection.native_type(), None);
    }
}
