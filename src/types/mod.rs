//! Application-facing values and their conversion to and from the backend.
//!
//! [`Value`] is what callers bind and read. [`NativeValue`] is what the
//! session API carries. The [`mapper`] module converts between the two.

pub mod decimal;
pub mod mapper;
pub mod native;
pub mod temporal;

pub use native::{NativeType, NativeValue, SqlType};

use crate::error::{DriverError, DriverResult};
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A value as seen by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
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
    Decimal(Decimal),
    Text(String),
    Bytes(Bytes),
    Json(String),
    JsonDocument(String),
    Yson(Bytes),
    Uuid(Uuid),
    Date(NaiveDate),
    /// Second precision.
    Datetime(DateTime<Utc>),
    /// Microsecond precision.
    Timestamp(DateTime<Utc>),
    Interval(TimeDelta),
    TzDate(DateTime<FixedOffset>),
    TzDatetime(DateTime<FixedOffset>),
    TzTimestamp(DateTime<FixedOffset>),
    /// Time of day. Has no backend counterpart.
    Time(NaiveTime),
}

/// Discriminant of a [`Value`], used as a conversion hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Whatever the backend type maps to naturally.
    Any,
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
    Decimal,
    Text,
    Bytes,
    Json,
    JsonDocument,
    Yson,
    Uuid,
    Date,
    Datetime,
    Timestamp,
    Interval,
    TzDate,
    TzDatetime,
    TzTimestamp,
    Time,
}

impl ValueKind {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ValueKind::Int8
                | ValueKind::Int16
                | ValueKind::Int32
                | ValueKind::Int64
                | ValueKind::Uint8
                | ValueKind::Uint16
                | ValueKind::Uint32
                | ValueKind::Uint64
        )
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Value {
    /// Kind of this value, `None` for NULL.
    pub fn kind(&self) -> Option<ValueKind> {
        let kind = match self {
            Value::Null => return None,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Uint8(_) => ValueKind::Uint8,
            Value::Uint16(_) => ValueKind::Uint16,
            Value::Uint32(_) => ValueKind::Uint32,
            Value::Uint64(_) => ValueKind::Uint64,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Json(_) => ValueKind::Json,
            Value::JsonDocument(_) => ValueKind::JsonDocument,
            Value::Yson(_) => ValueKind::Yson,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Date(_) => ValueKind::Date,
            Value::Datetime(_) => ValueKind::Datetime,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Interval(_) => ValueKind::Interval,
            Value::TzDate(_) => ValueKind::TzDate,
            Value::TzDatetime(_) => ValueKind::TzDatetime,
            Value::TzTimestamp(_) => ValueKind::TzTimestamp,
            Value::Time(_) => ValueKind::Time,
        };
        Some(kind)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name used in error messages.
    pub fn type_name(&self) -> String {
        match self.kind() {
            Some(kind) => kind.to_string(),
            None => "Null".to_string(),
        }
    }
}

// ==================== Into Value ====================

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float,
    f64 => Double,
    Decimal => Decimal,
    String => Text,
    Bytes => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    TimeDelta => Interval,
    NaiveTime => Time,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

/// UTC instants bind as microsecond timestamps.
impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::TzTimestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

// ==================== From Value ====================

/// Types that can be read out of a row.
pub trait FromValue: Sized {
    /// Hint passed to the mapper when converting the backend value.
    const KIND: ValueKind;

    fn from_value(value: Value) -> DriverResult<Self>;
}

fn unexpected(expected: ValueKind, got: &Value) -> DriverError {
    if got.is_null() {
        DriverError::conversion(format!("Unexpected NULL where {} was expected", expected))
    } else {
        DriverError::conversion(format!(
            "Cannot read {} as {}",
            got.type_name(),
            expected
        ))
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const KIND: ValueKind = ValueKind::$variant;

                fn from_value(value: Value) -> DriverResult<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(unexpected(Self::KIND, &other)),
                    }
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float,
    f64 => Double,
    Decimal => Decimal,
    String => Text,
    Bytes => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    TimeDelta => Interval,
}

impl FromValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn from_value(value: Value) -> DriverResult<Self> {
        match value {
            Value::Bytes(v) => Ok(v.to_vec()),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::Timestamp;

    fn from_value(value: Value) -> DriverResult<Self> {
        match value {
            Value::Timestamp(v) | Value::Datetime(v) => Ok(v),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

impl FromValue for DateTime<FixedOffset> {
    const KIND: ValueKind = ValueKind::TzTimestamp;

    fn from_value(value: Value) -> DriverResult<Self> {
        match value {
            Value::TzTimestamp(v) | Value::TzDatetime(v) | Value::TzDate(v) => Ok(v),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

impl FromValue for Value {
    const KIND: ValueKind = ValueKind::Any;

    fn from_value(value: Value) -> DriverResult<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const KIND: ValueKind = T::KIND;

    fn from_value(value: Value) -> DriverResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_value() {
        assert_eq!(Value::from(1i64), Value::Int64(1));
        assert_eq!(Value::from("a"), Value::Text("a".to_string()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(7i32)), Value::Int32(7));
    }

    #[test]
    fn test_from_value() {
        assert_eq!(i64::from_value(Value::Int64(5)).unwrap(), 5);
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert!(i64::from_value(Value::Null).is_err());
        assert!(String::from_value(Value::Int64(1)).is_err());
    }

    #[test]
    fn test_kind() {
        assert_eq!(Value::Null.kind(), None);
        assert_eq!(Value::Text(String::new()).kind(), Some(ValueKind::Text));
        assert_eq!(Value::Null.type_name(), "Null");
    }
}
