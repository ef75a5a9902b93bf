//! Bidirectional mapping between [`Value`] and [`NativeValue`].
//!
//! Three entry points:
//! - [`to_backend`]: a value in its natural native type, for undeclared parameters.
//! - [`to_backend_as`]: a value checked against a declared parameter type.
//!   Only lossless widening is applied; anything else is a type mismatch.
//! - [`from_backend`]: a native value converted towards a requested kind.
//!   Absent values of any type read as [`Value::Null`].

use super::decimal;
use super::temporal::{self, TzPrecision};
use super::{NativeType, NativeValue, Value, ValueKind};
use crate::error::{DriverError, DriverResult};
use bytes::Bytes;
use chrono::NaiveTime;
use rust_decimal::Decimal;
use uuid::Uuid;

// ==================== Value -> backend ====================

/// Convert a value to its natural native representation.
pub fn to_backend(value: &Value) -> DriverResult<NativeValue> {
    let native = match value {
        Value::Null => NativeValue::Null,
        Value::Bool(v) => NativeValue::Bool(*v),
        Value::Int8(v) => NativeValue::Int8(*v),
        Value::Int16(v) => NativeValue::Int16(*v),
        Value::Int32(v) => NativeValue::Int32(*v),
        Value::Int64(v) => NativeValue::Int64(*v),
        Value::Uint8(v) => NativeValue::Uint8(*v),
        Value::Uint16(v) => NativeValue::Uint16(*v),
        Value::Uint32(v) => NativeValue::Uint32(*v),
        Value::Uint64(v) => NativeValue::Uint64(*v),
        Value::Float(v) => NativeValue::Float(*v),
        Value::Double(v) => NativeValue::Double(*v),
        Value::Decimal(d) => encode_decimal(d, 22, 9)?,
        Value::Text(v) => NativeValue::Text(v.clone()),
        Value::Bytes(v) => NativeValue::Bytes(v.clone()),
        Value::Json(v) => NativeValue::Json(v.clone()),
        Value::JsonDocument(v) => NativeValue::JsonDocument(v.clone()),
        Value::Yson(v) => NativeValue::Yson(v.clone()),
        Value::Uuid(v) => NativeValue::Uuid(v.as_u128()),
        Value::Date(v) => NativeValue::Date(temporal::date_to_days(*v)?),
        Value::Datetime(v) => NativeValue::Datetime(temporal::datetime_to_secs(v)?),
        Value::Timestamp(v) => NativeValue::Timestamp(temporal::timestamp_to_micros(v)?),
        Value::Interval(v) => NativeValue::Interval(temporal::interval_to_micros(*v)?),
        Value::TzDate(v) => NativeValue::TzDate(temporal::format_tz(v, TzPrecision::Day)?),
        Value::TzDatetime(v) => {
            NativeValue::TzDatetime(temporal::format_tz(v, TzPrecision::Second)?)
        }
        Value::TzTimestamp(v) => {
            NativeValue::TzTimestamp(temporal::format_tz(v, TzPrecision::Microsecond)?)
        }
        Value::Time(_) => {
            return Err(DriverError::UnsupportedType(
                "time of day has no backend representation".to_string(),
            ));
        }
    };
    Ok(native)
}

/// Convert a value for a parameter declared as `ty`.
///
/// `target` names the parameter in error messages.
pub fn to_backend_as(value: &Value, ty: &NativeType, target: &str) -> DriverResult<NativeValue> {
    if value.is_null() {
        if ty.is_optional() {
            return Ok(match ty {
                NativeType::Null => NativeValue::Null,
                other => NativeValue::Empty(other.inner().clone()),
            });
        }
        return Err(DriverError::mismatch(target, ty, "Null"));
    }

    let inner = ty.inner();
    let native = coerce_to(value, inner, target)?;
    if matches!(ty, NativeType::Optional(_)) {
        Ok(NativeValue::Optional(Box::new(native)))
    } else {
        Ok(native)
    }
}

fn coerce_to(value: &Value, ty: &NativeType, target: &str) -> DriverResult<NativeValue> {
    if let NativeType::Decimal { precision, scale } = *ty {
        let decimal = match value {
            Value::Decimal(d) => Some(*d),
            other => integer_of_value(other).and_then(|i| Decimal::try_from_i128_with_scale(i, 0).ok()),
        };
        if let Some(d) = decimal {
            return encode_decimal(&d, precision, scale)
                .map_err(|_| DriverError::mismatch(target, ty, format!("{} ({})", value.type_name(), d)));
        }
    }

    let natural = to_backend(value)?;
    let natural_ty = natural.native_type();
    if natural_ty == *ty {
        return Ok(natural);
    }
    widen(&natural, ty).ok_or_else(|| DriverError::mismatch(target, ty, natural_ty))
}

/// Lossless native-to-native widening.
fn widen(native: &NativeValue, ty: &NativeType) -> Option<NativeValue> {
    if let (Some(v), Some(from), Some(to)) = (
        integer_of_native(native),
        integer_range(&native.native_type()),
        integer_range(ty),
    ) {
        if from.0 >= to.0 && from.1 <= to.1 {
            return native_integer(v, ty);
        }
        return None;
    }
    match (native, ty) {
        (NativeValue::Float(v), NativeType::Double) => Some(NativeValue::Double(f64::from(*v))),
        (NativeValue::Text(v), NativeType::Json) => Some(NativeValue::Json(v.clone())),
        (NativeValue::Text(v), NativeType::JsonDocument) => {
            Some(NativeValue::JsonDocument(v.clone()))
        }
        (NativeValue::Text(v), NativeType::Bytes) => {
            Some(NativeValue::Bytes(Bytes::copy_from_slice(v.as_bytes())))
        }
        (NativeValue::Bytes(v), NativeType::Yson) => Some(NativeValue::Yson(v.clone())),
        (NativeValue::Datetime(secs), NativeType::Timestamp) => {
            Some(NativeValue::Timestamp(u64::from(*secs) * 1_000_000))
        }
        _ => None,
    }
}

fn encode_decimal(d: &Decimal, precision: u8, scale: u8) -> DriverResult<NativeValue> {
    Ok(NativeValue::Decimal {
        unscaled: decimal::to_unscaled(d, precision, scale)?,
        precision,
        scale,
    })
}

// ==================== Backend -> Value ====================

/// Convert a native value, honouring `hint` where the conversion is lossless.
pub fn from_backend(native: &NativeValue, hint: ValueKind) -> DriverResult<Value> {
    let Some(present) = native.present() else {
        return Ok(Value::Null);
    };
    let natural = natural_value(present)?;
    if hint == ValueKind::Any || natural.kind() == Some(hint) {
        return Ok(natural);
    }
    convert(natural, hint).ok_or_else(|| {
        DriverError::conversion(format!(
            "Cannot convert {} to {}",
            present.native_type(),
            hint
        ))
    })
}

fn natural_value(native: &NativeValue) -> DriverResult<Value> {
    let value = match native {
        NativeValue::Bool(v) => Value::Bool(*v),
        NativeValue::Int8(v) => Value::Int8(*v),
        NativeValue::Int16(v) => Value::Int16(*v),
        NativeValue::Int32(v) => Value::Int32(*v),
        NativeValue::Int64(v) => Value::Int64(*v),
        NativeValue::Uint8(v) => Value::Uint8(*v),
        NativeValue::Uint16(v) => Value::Uint16(*v),
        NativeValue::Uint32(v) => Value::Uint32(*v),
        NativeValue::Uint64(v) => Value::Uint64(*v),
        NativeValue::Float(v) => Value::Float(*v),
        NativeValue::Double(v) => Value::Double(*v),
        NativeValue::Bytes(v) => Value::Bytes(v.clone()),
        NativeValue::Text(v) => Value::Text(v.clone()),
        NativeValue::Yson(v) => Value::Yson(v.clone()),
        NativeValue::Json(v) => Value::Json(v.clone()),
        NativeValue::JsonDocument(v) => Value::JsonDocument(v.clone()),
        NativeValue::Uuid(v) => Value::Uuid(Uuid::from_u128(*v)),
        NativeValue::Date(v) => Value::Date(temporal::days_to_date(*v)?),
        NativeValue::Datetime(v) => Value::Datetime(temporal::secs_to_datetime(*v)?),
        NativeValue::Timestamp(v) => Value::Timestamp(temporal::micros_to_timestamp(*v)?),
        NativeValue::Interval(v) => Value::Interval(temporal::micros_to_interval(*v)),
        NativeValue::TzDate(v) => Value::TzDate(temporal::parse_tz(v, TzPrecision::Day)?),
        NativeValue::TzDatetime(v) => {
            Value::TzDatetime(temporal::parse_tz(v, TzPrecision::Second)?)
        }
        NativeValue::TzTimestamp(v) => {
            Value::TzTimestamp(temporal::parse_tz(v, TzPrecision::Microsecond)?)
        }
        NativeValue::Decimal {
            unscaled, scale, ..
        } => Value::Decimal(decimal::from_unscaled(*unscaled, *scale)?),
        NativeValue::Optional(inner) => natural_value(inner)?,
        NativeValue::Empty(_) | NativeValue::Null => Value::Null,
    };
    Ok(value)
}

/// Lossless value-to-kind conversion.
fn convert(value: Value, hint: ValueKind) -> Option<Value> {
    if let Some(i) = integer_of_value(&value) {
        return integer_to_kind(i, hint);
    }
    let converted = match (value, hint) {
        (Value::Float(v), ValueKind::Double) => Value::Double(f64::from(v)),
        (Value::Text(v), ValueKind::Bytes) => Value::Bytes(Bytes::from(v.into_bytes())),
        (Value::Json(v), ValueKind::Text) | (Value::JsonDocument(v), ValueKind::Text) => {
            Value::Text(v)
        }
        (Value::Json(v), ValueKind::JsonDocument) => Value::JsonDocument(v),
        (Value::JsonDocument(v), ValueKind::Json) => Value::Json(v),
        (Value::Yson(v), ValueKind::Bytes) => Value::Bytes(v),
        (Value::Datetime(v), ValueKind::Timestamp) => Value::Timestamp(v),
        (Value::Date(d), ValueKind::Timestamp) => {
            Value::Timestamp(d.and_time(NaiveTime::default()).and_utc())
        }
        (Value::Date(d), ValueKind::Datetime) => {
            Value::Datetime(d.and_time(NaiveTime::default()).and_utc())
        }
        (Value::TzDate(v), ValueKind::TzTimestamp) | (Value::TzDatetime(v), ValueKind::TzTimestamp) => {
            Value::TzTimestamp(v)
        }
        (Value::Timestamp(v), ValueKind::Datetime) if v.timestamp_subsec_nanos() == 0 => {
            Value::Datetime(v)
        }
        _ => return None,
    };
    Some(converted)
}

// ==================== Integers ====================

fn integer_of_value(value: &Value) -> Option<i128> {
    Some(match value {
        Value::Int8(v) => i128::from(*v),
        Value::Int16(v) => i128::from(*v),
        Value::Int32(v) => i128::from(*v),
        Value::Int64(v) => i128::from(*v),
        Value::Uint8(v) => i128::from(*v),
        Value::Uint16(v) => i128::from(*v),
        Value::Uint32(v) => i128::from(*v),
        Value::Uint64(v) => i128::from(*v),
        _ => return None,
    })
}

fn integer_of_native(native: &NativeValue) -> Option<i128> {
    Some(match native {
        NativeValue::Int8(v) => i128::from(*v),
        NativeValue::Int16(v) => i128::from(*v),
        NativeValue::Int32(v) => i128::from(*v),
        NativeValue::Int64(v) => i128::from(*v),
        NativeValue::Uint8(v) => i128::from(*v),
        NativeValue::Uint16(v) => i128::from(*v),
        NativeValue::Uint32(v) => i128::from(*v),
        NativeValue::Uint64(v) => i128::from(*v),
        _ => return None,
    })
}

fn integer_range(ty: &NativeType) -> Option<(i128, i128)> {
    Some(match ty {
        NativeType::Int8 => (i128::from(i8::MIN), i128::from(i8::MAX)),
        NativeType::Int16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
        NativeType::Int32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
        NativeType::Int64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
        NativeType::Uint8 => (0, i128::from(u8::MAX)),
        NativeType::Uint16 => (0, i128::from(u16::MAX)),
        NativeType::Uint32 => (0, i128::from(u32::MAX)),
        NativeType::Uint64 => (0, i128::from(u64::MAX)),
        _ => return None,
    })
}

fn native_integer(v: i128, ty: &NativeType) -> Option<NativeValue> {
    Some(match ty {
        NativeType::Int8 => NativeValue::Int8(i8::try_from(v).ok()?),
        NativeType::Int16 => NativeValue::Int16(i16::try_from(v).ok()?),
        NativeType::Int32 => NativeValue::Int32(i32::try_from(v).ok()?),
        NativeType::Int64 => NativeValue::Int64(i64::try_from(v).ok()?),
        NativeType::Uint8 => NativeValue::Uint8(u8::try_from(v).ok()?),
        NativeType::Uint16 => NativeValue::Uint16(u16::try_from(v).ok()?),
        NativeType::Uint32 => NativeValue::Uint32(u32::try_from(v).ok()?),
        NativeType::Uint64 => NativeValue::Uint64(u64::try_from(v).ok()?),
        _ => return None,
    })
}

/// Integer to any kind that holds it exactly. Fails on overflow.
fn integer_to_kind(v: i128, kind: ValueKind) -> Option<Value> {
    Some(match kind {
        ValueKind::Int8 => Value::Int8(i8::try_from(v).ok()?),
        ValueKind::Int16 => Value::Int16(i16::try_from(v).ok()?),
        ValueKind::Int32 => Value::Int32(i32::try_from(v).ok()?),
        ValueKind::Int64 => Value::Int64(i64::try_from(v).ok()?),
        ValueKind::Uint8 => Value::Uint8(u8::try_from(v).ok()?),
        ValueKind::Uint16 => Value::Uint16(u16::try_from(v).ok()?),
        ValueKind::Uint32 => Value::Uint32(u32::try_from(v).ok()?),
        ValueKind::Uint64 => Value::Uint64(u64::try_from(v).ok()?),
        ValueKind::Decimal => Value::Decimal(Decimal::try_from_i128_with_scale(v, 0).ok()?),
        // 2^53 is the largest range f64 holds exactly.
        ValueKind::Double if v.abs() <= (1i128 << 53) => Value::Double(v as f64),
        ValueKind::Float if v.abs() <= (1i128 << 24) => Value::Float(v as f32),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeDelta, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn samples() -> Vec<Value> {
        let offset = FixedOffset::east_opt(-5 * 3600).unwrap();
        vec![
            Value::Bool(true),
            Value::Int8(-8),
            Value::Int16(-16),
            Value::Int32(-32),
            Value::Int64(i64::MIN),
            Value::Uint8(8),
            Value::Uint16(16),
            Value::Uint32(32),
            Value::Uint64(u64::MAX),
            Value::Float(1.5),
            Value::Double(-2.25),
            Value::Decimal(Decimal::from_str("-1234.567890123").unwrap()),
            Value::Text("héllo".to_string()),
            Value::Bytes(Bytes::from_static(b"\x00\x01")),
            Value::Json("{\"a\":1}".to_string()),
            Value::JsonDocument("[]".to_string()),
            Value::Yson(Bytes::from_static(b"{a=1}")),
            Value::Uuid(Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0)),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
            Value::Datetime(Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 1).unwrap()),
            Value::Timestamp(
                Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 1).unwrap() + TimeDelta::microseconds(7),
            ),
            Value::Interval(TimeDelta::microseconds(-1_500_000)),
            Value::TzDate(offset.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()),
            Value::TzDatetime(offset.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()),
            Value::TzTimestamp(
                offset.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()
                    + TimeDelta::microseconds(42),
            ),
        ]
    }

    #[test]
    fn test_supported_values_survive_the_backend() {
        for value in samples() {
            let native = to_backend(&value).unwrap();
            let kind = value.kind().unwrap();
            assert_eq!(from_backend(&native, kind).unwrap(), value);
            assert_eq!(from_backend(&native, ValueKind::Any).unwrap(), value);
        }
    }

    #[test]
    fn test_absent_reads_as_null() {
        assert_eq!(from_backend(&NativeValue::Null, ValueKind::Int64).unwrap(), Value::Null);
        assert_eq!(
            from_backend(&NativeValue::Empty(NativeType::Text), ValueKind::Text).unwrap(),
            Value::Null
        );
        let present = NativeValue::Optional(Box::new(NativeValue::Int32(3)));
        assert_eq!(from_backend(&present, ValueKind::Any).unwrap(), Value::Int32(3));
    }

    #[test]
    fn test_time_of_day_is_unsupported() {
        let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        assert!(matches!(
            to_backend(&Value::Time(time)),
            Err(DriverError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_declared_type_mismatch() {
        let err = to_backend_as(&Value::Int64(1), &NativeType::Text, "$name").unwrap_err();
        match err {
            DriverError::TypeMismatch {
                target,
                expected,
                actual,
            } => {
                assert_eq!(target, "$name");
                assert_eq!(expected, "Utf8");
                assert_eq!(actual, "Int64");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_declared_type_widening() {
        assert_eq!(
            to_backend_as(&Value::Int32(5), &NativeType::Int64, "$id").unwrap(),
            NativeValue::Int64(5)
        );
        assert_eq!(
            to_backend_as(&Value::Uint32(5), &NativeType::Int64, "$id").unwrap(),
            NativeValue::Int64(5)
        );
        assert!(to_backend_as(&Value::Int64(5), &NativeType::Int32, "$id").is_err());
        assert!(to_backend_as(&Value::Int8(-1), &NativeType::Uint64, "$id").is_err());
        assert_eq!(
            to_backend_as(&Value::from("{}"), &NativeType::Json, "$doc").unwrap(),
            NativeValue::Json("{}".to_string())
        );
    }

    #[test]
    fn test_declared_optional() {
        let ty = NativeType::Int64.optional();
        assert_eq!(
            to_backend_as(&Value::Null, &ty, "$id").unwrap(),
            NativeValue::Empty(NativeType::Int64)
        );
        assert_eq!(
            to_backend_as(&Value::Int64(1), &ty, "$id").unwrap(),
            NativeValue::Optional(Box::new(NativeValue::Int64(1)))
        );
        assert!(to_backend_as(&Value::Null, &NativeType::Int64, "$id").is_err());
    }

    #[test]
    fn test_declared_decimal() {
        let ty = NativeType::Decimal {
            precision: 10,
            scale: 2,
        };
        let d = Decimal::from_str("12.5").unwrap();
        assert_eq!(
            to_backend_as(&Value::Decimal(d), &ty, "$price").unwrap(),
            NativeValue::Decimal {
                unscaled: 1250,
                precision: 10,
                scale: 2
            }
        );
        let too_fine = Decimal::from_str("12.505").unwrap();
        assert!(matches!(
            to_backend_as(&Value::Decimal(too_fine), &ty, "$price"),
            Err(DriverError::TypeMismatch { .. })
        ));
        assert_eq!(
            to_backend_as(&Value::Int32(3), &ty, "$price").unwrap(),
            NativeValue::Decimal {
                unscaled: 300,
                precision: 10,
                scale: 2
            }
        );
    }

    #[test]
    fn test_precision_is_not_truncated() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::milliseconds(1);
        assert!(to_backend(&Value::Datetime(ts)).is_err());
        assert!(to_backend(&Value::Timestamp(ts)).is_ok());
    }

    #[test]
    fn test_hint_conversions() {
        let native = NativeValue::Int32(42);
        assert_eq!(from_backend(&native, ValueKind::Int64).unwrap(), Value::Int64(42));
        assert_eq!(from_backend(&native, ValueKind::Uint8).unwrap(), Value::Uint8(42));
        assert_eq!(
            from_backend(&native, ValueKind::Decimal).unwrap(),
            Value::Decimal(Decimal::from(42))
        );
        assert!(from_backend(&NativeValue::Int32(-1), ValueKind::Uint32).is_err());
        assert!(from_backend(&NativeValue::Text("x".into()), ValueKind::Int64).is_err());
        assert_eq!(
            from_backend(&NativeValue::Json("{}".into()), ValueKind::Text).unwrap(),
            Value::Text("{}".to_string())
        );
    }
}
