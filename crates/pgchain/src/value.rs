//! Loosely typed values bound to `$n` placeholders.
//!
//! Payloads reaching this layer are JSON-shaped, so [`Value`] is a small tagged
//! union. Its [`ToSql`] impl adapts to the parameter type Postgres inferred for
//! the placeholder (e.g. an `Int` bound to an `int4` column is sent as `i32`,
//! a `Text` bound to a `uuid` column is parsed first).

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::str::FromStr;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type};

type BindResult = Result<IsNull, Box<dyn Error + Sync + Send>>;

/// A value bound to a single placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    /// Map a JSON value onto the closest variant.
    ///
    /// Scalars become their typed variant; arrays and objects stay `Json`.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }

    /// Render back into JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Json(j) => j.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn mismatch(value: &str, ty: &Type) -> Box<dyn Error + Sync + Send> {
    format!("cannot bind {value} to parameter of type {}", ty.name()).into()
}

fn is_text(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN)
}

fn bind_bool(b: bool, ty: &Type, out: &mut BytesMut) -> BindResult {
    match *ty {
        Type::BOOL => b.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::Bool(b).to_sql(ty, out),
        _ if is_text(ty) => b.to_string().to_sql(ty, out),
        _ => Err(mismatch("a boolean", ty)),
    }
}

fn bind_int(i: i64, ty: &Type, out: &mut BytesMut) -> BindResult {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql(ty, out),
        Type::INT8 => i.to_sql(ty, out),
        Type::OID => u32::try_from(i)?.to_sql(ty, out),
        Type::FLOAT4 => (i as f32).to_sql(ty, out),
        Type::FLOAT8 => (i as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(i).to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::from(i).to_sql(ty, out),
        _ if is_text(ty) => i.to_string().to_sql(ty, out),
        _ => Err(mismatch("an integer", ty)),
    }
}

fn bind_float(f: f64, ty: &Type, out: &mut BytesMut) -> BindResult {
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => match whole_number(f) {
            Some(i) => bind_int(i, ty, out),
            None => Err(mismatch(&format!("non-integral float {f}"), ty)),
        },
        Type::FLOAT4 => (f as f32).to_sql(ty, out),
        Type::FLOAT8 => f.to_sql(ty, out),
        Type::NUMERIC => Decimal::try_from(f)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::from(f).to_sql(ty, out),
        _ if is_text(ty) => f.to_string().to_sql(ty, out),
        _ => Err(mismatch("a float", ty)),
    }
}

fn bind_text(s: &str, ty: &Type, out: &mut BytesMut) -> BindResult {
    match *ty {
        Type::INT2 => i16::from_str(s.trim())?.to_sql(ty, out),
        Type::INT4 => i32::from_str(s.trim())?.to_sql(ty, out),
        Type::INT8 => i64::from_str(s.trim())?.to_sql(ty, out),
        Type::FLOAT4 => f32::from_str(s.trim())?.to_sql(ty, out),
        Type::FLOAT8 => f64::from_str(s.trim())?.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_str(s.trim())?.to_sql(ty, out),
        Type::BOOL => parse_bool(s)
            .ok_or_else(|| mismatch(&format!("'{s}'"), ty))?
            .to_sql(ty, out),
        Type::UUID => uuid::Uuid::parse_str(s.trim())?.to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_timestamptz(s)
            .ok_or_else(|| mismatch(&format!("'{s}'"), ty))?
            .to_sql(ty, out),
        Type::TIMESTAMP => parse_naive_timestamp(s)
            .ok_or_else(|| mismatch(&format!("'{s}'"), ty))?
            .to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?.to_sql(ty, out),
        Type::JSON | Type::JSONB => {
            // Postgres would parse text input as JSON; fall back to a JSON string.
            let json = serde_json::from_str::<serde_json::Value>(s)
                .unwrap_or_else(|_| serde_json::Value::String(s.to_string()));
            json.to_sql(ty, out)
        }
        _ if is_text(ty) || matches!(ty.kind(), Kind::Enum(_)) => s.to_sql(ty, out),
        _ => Err(mismatch("text", ty)),
    }
}

fn bind_json(json: &serde_json::Value, ty: &Type, out: &mut BytesMut) -> BindResult {
    match (json, ty.kind()) {
        (_, _) if matches!(*ty, Type::JSON | Type::JSONB) => json.to_sql(ty, out),
        (serde_json::Value::Array(items), Kind::Array(_)) => {
            let items: Vec<Value> = items.iter().cloned().map(Value::from_json).collect();
            items.to_sql(ty, out)
        }
        (serde_json::Value::Array(_) | serde_json::Value::Object(_), _) if is_text(ty) => {
            serde_json::to_string(json)?.to_sql(ty, out)
        }
        (serde_json::Value::Array(_) | serde_json::Value::Object(_), _) => {
            Err(mismatch("a JSON document", ty))
        }
        (scalar, _) => Value::from_json(scalar.clone()).to_sql(ty, out),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// `2.0` binds to an integer column; `2.5` and values out of `i64` range don't.
fn whole_number(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M%#z",
];

fn parse_with_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    })
}

fn parse_without_offset(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Timestamp text for a `timestamptz` parameter. Input without an offset,
/// including a bare date (midnight), is taken as UTC.
fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    parse_with_offset(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| parse_without_offset(s).map(|naive| naive.and_utc()))
}

/// Timestamp text for a `timestamp` parameter. As in Postgres, an explicit
/// offset is ignored and the written wall-clock time is kept.
fn parse_naive_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    parse_without_offset(s).or_else(|| parse_with_offset(s).map(|dt| dt.naive_local()))
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> BindResult {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => bind_bool(*b, ty, out),
            Value::Int(i) => bind_int(*i, ty, out),
            Value::Float(f) => bind_float(*f, ty, out),
            Value::Text(s) => bind_text(s, ty, out),
            Value::Json(j) => bind_json(j, ty, out),
        }
    }

    // Conversion is decided per type in `to_sql`; unsupported pairs error there.
    fn accepts(_: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Text(v.to_rfc3339())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Text(v.format("%Y-%m-%d").to_string())
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
