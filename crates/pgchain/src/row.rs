//! Row decoding into JSON records.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as Json;
use std::error::Error;
use std::fmt;
use std::net::IpAddr;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Kind, Type};

/// A decoded row: column name to JSON value, in column order.
pub type Record = serde_json::Map<String, Json>;

/// Decode a single row into a [`Record`].
///
/// Numeric values are rendered as strings so no precision is lost; timestamps
/// are RFC 3339 strings.
pub fn decode_row(row: &Row) -> DbResult<Record> {
    let mut record = Record::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_())
            .map_err(|message| DbError::decode(column.name(), message))?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, String>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
}

fn json_or_null<T>(value: Option<T>, f: impl FnOnce(T) -> Json) -> Json {
    value.map_or(Json::Null, f)
}

fn array_of<T>(values: Vec<Option<T>>, f: impl Fn(T) -> Json) -> Json {
    Json::Array(values.into_iter().map(|v| json_or_null(v, &f)).collect())
}

fn string<T: ToString>(value: T) -> Json {
    Json::String(value.to_string())
}

fn timestamptz(t: DateTime<Utc>) -> Json {
    Json::String(t.to_rfc3339())
}

fn timestamp(t: NaiveDateTime) -> Json {
    Json::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn date(d: NaiveDate) -> Json {
    Json::String(d.format("%Y-%m-%d").to_string())
}

/// `bytea` in Postgres hex output format (`\x0a1b...`).
fn bytea(bytes: Vec<u8>) -> Json {
    Json::String(format!("\\x{}", hex::encode(bytes)))
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> Result<Json, String> {
    let value = match *ty {
        Type::BOOL => json_or_null(get::<bool>(row, idx)?, Json::Bool),
        Type::INT2 => json_or_null(get::<i16>(row, idx)?, Json::from),
        Type::INT4 => json_or_null(get::<i32>(row, idx)?, Json::from),
        Type::INT8 => json_or_null(get::<i64>(row, idx)?, Json::from),
        Type::OID => json_or_null(get::<u32>(row, idx)?, Json::from),
        Type::FLOAT4 => json_or_null(get::<f32>(row, idx)?, |f| Json::from(f64::from(f))),
        Type::FLOAT8 => json_or_null(get::<f64>(row, idx)?, Json::from),
        Type::NUMERIC => json_or_null(get::<Decimal>(row, idx)?, string),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            json_or_null(get::<String>(row, idx)?, Json::String)
        }
        Type::JSON | Type::JSONB => get::<Json>(row, idx)?.unwrap_or(Json::Null),
        Type::UUID => json_or_null(get::<uuid::Uuid>(row, idx)?, string),
        Type::TIMESTAMPTZ => json_or_null(get::<DateTime<Utc>>(row, idx)?, timestamptz),
        Type::TIMESTAMP => json_or_null(get::<NaiveDateTime>(row, idx)?, timestamp),
        Type::DATE => json_or_null(get::<NaiveDate>(row, idx)?, date),
        Type::TIME => json_or_null(get::<NaiveTime>(row, idx)?, string),
        Type::BYTEA => json_or_null(get::<Vec<u8>>(row, idx)?, bytea),
        Type::INTERVAL => json_or_null(get::<Interval>(row, idx)?, |i| {
            Json::String(i.to_iso8601())
        }),
        Type::INET | Type::CIDR => json_or_null(get::<NetAddr>(row, idx)?, string),

        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            json_or_null(get::<Vec<Option<String>>>(row, idx)?, |v| array_of(v, Json::String))
        }
        Type::INT2_ARRAY => json_or_null(get::<Vec<Option<i16>>>(row, idx)?, |v| array_of(v, Json::from)),
        Type::INT4_ARRAY => json_or_null(get::<Vec<Option<i32>>>(row, idx)?, |v| array_of(v, Json::from)),
        Type::INT8_ARRAY => json_or_null(get::<Vec<Option<i64>>>(row, idx)?, |v| array_of(v, Json::from)),
        Type::FLOAT4_ARRAY => json_or_null(get::<Vec<Option<f32>>>(row, idx)?, |v| {
            array_of(v, |f| Json::from(f64::from(f)))
        }),
        Type::FLOAT8_ARRAY => json_or_null(get::<Vec<Option<f64>>>(row, idx)?, |v| array_of(v, Json::from)),
        Type::NUMERIC_ARRAY => json_or_null(get::<Vec<Option<Decimal>>>(row, idx)?, |v| array_of(v, string)),
        Type::BOOL_ARRAY => json_or_null(get::<Vec<Option<bool>>>(row, idx)?, |v| array_of(v, Json::Bool)),
        Type::UUID_ARRAY => json_or_null(get::<Vec<Option<uuid::Uuid>>>(row, idx)?, |v| array_of(v, string)),
        Type::TIMESTAMPTZ_ARRAY => json_or_null(get::<Vec<Option<DateTime<Utc>>>>(row, idx)?, |v| {
            array_of(v, timestamptz)
        }),
        Type::TIMESTAMP_ARRAY => json_or_null(get::<Vec<Option<NaiveDateTime>>>(row, idx)?, |v| {
            array_of(v, timestamp)
        }),
        Type::DATE_ARRAY => json_or_null(get::<Vec<Option<NaiveDate>>>(row, idx)?, |v| array_of(v, date)),
        Type::INTERVAL_ARRAY => json_or_null(get::<Vec<Option<Interval>>>(row, idx)?, |v| {
            array_of(v, |i| Json::String(i.to_iso8601()))
        }),
        Type::INET_ARRAY | Type::CIDR_ARRAY => {
            json_or_null(get::<Vec<Option<NetAddr>>>(row, idx)?, |v| array_of(v, string))
        }
        Type::BYTEA_ARRAY => json_or_null(get::<Vec<Option<Vec<u8>>>>(row, idx)?, |v| array_of(v, bytea)),
        Type::JSONB_ARRAY | Type::JSON_ARRAY => {
            json_or_null(get::<Vec<Json>>(row, idx)?, Json::Array)
        }
        _ => match ty.kind() {
            Kind::Enum(_) => json_or_null(get::<EnumLabel>(row, idx)?, |label| Json::String(label.0)),
            Kind::Array(member) if matches!(member.kind(), Kind::Enum(_)) => {
                json_or_null(get::<Vec<Option<EnumLabel>>>(row, idx)?, |v| {
                    array_of(v, |label| Json::String(label.0))
                })
            }
            _ => return Err(format!("unsupported column type '{}'", ty.name())),
        },
    };
    Ok(value)
}

/// Label of a user-defined enum value, sent by the server as plain UTF-8.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(EnumLabel(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

/// `interval` in its binary wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    micros: i64,
    days: i32,
    months: i32,
}

impl Interval {
    /// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`; components keep their own sign.
    fn to_iso8601(self) -> String {
        let mut out = String::from("P");
        let (years, months) = (self.months / 12, self.months % 12);
        for (n, unit) in [(years as i64, 'Y'), (months as i64, 'M'), (self.days as i64, 'D')] {
            if n != 0 {
                out.push_str(&format!("{n}{unit}"));
            }
        }

        if self.micros != 0 {
            let sign = if self.micros < 0 { "-" } else { "" };
            let abs = self.micros.unsigned_abs();
            let hours = abs / 3_600_000_000;
            let minutes = abs / 60_000_000 % 60;
            let seconds = abs / 1_000_000 % 60;
            let fraction = abs % 1_000_000;

            out.push('T');
            if hours != 0 {
                out.push_str(&format!("{sign}{hours}H"));
            }
            if minutes != 0 {
                out.push_str(&format!("{sign}{minutes}M"));
            }
            if fraction != 0 {
                let fraction = format!("{fraction:06}");
                out.push_str(&format!("{sign}{seconds}.{}S", fraction.trim_end_matches('0')));
            } else if seconds != 0 {
                out.push_str(&format!("{sign}{seconds}S"));
            }
        }

        if out == "P" {
            out.push_str("T0S");
        }
        out
    }
}

impl<'a> FromSql<'a> for Interval {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let raw: &[u8; 16] = raw
            .try_into()
            .map_err(|_| format!("interval must be 16 bytes, got {}", raw.len()))?;
        let (micros, rest) = raw.split_at(8);
        let (days, months) = rest.split_at(4);
        Ok(Interval {
            micros: i64::from_be_bytes(micros.try_into()?),
            days: i32::from_be_bytes(days.try_into()?),
            months: i32::from_be_bytes(months.try_into()?),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// `inet`/`cidr` value rendered the way Postgres prints it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NetAddr {
    addr: IpAddr,
    bits: u8,
    is_cidr: bool,
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = if self.addr.is_ipv4() { 32 } else { 128 };
        if self.is_cidr || self.bits != full {
            write!(f, "{}/{}", self.addr, self.bits)
        } else {
            write!(f, "{}", self.addr)
        }
    }
}

impl<'a> FromSql<'a> for NetAddr {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let [family, bits, is_cidr, len, addr @ ..] = raw else {
            return Err("inet value too short".into());
        };
        if addr.len() != usize::from(*len) {
            return Err(format!("inet address length {} does not match header {len}", addr.len()).into());
        }
        let addr = match (*family, addr.len()) {
            // PGSQL_AF_INET / PGSQL_AF_INET6
            (2, 4) => IpAddr::from(<[u8; 4]>::try_from(addr)?),
            (3, 16) => IpAddr::from(<[u8; 16]>::try_from(addr)?),
            _ => return Err(format!("unknown inet family {family}").into()),
        };
        Ok(NetAddr {
            addr,
            bits: *bits,
            is_cidr: *is_cidr != 0,
        })
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::INET | Type::CIDR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(micros: i64, days: i32, months: i32) -> Vec<u8> {
        let mut raw = micros.to_be_bytes().to_vec();
        raw.extend(days.to_be_bytes());
        raw.extend(months.to_be_bytes());
        raw
    }

    #[test]
    fn interval_renders_iso8601() {
        let decode = |raw: Vec<u8>| Interval::from_sql(&Type::INTERVAL, &raw).unwrap().to_iso8601();

        let hms = ((4 * 60 + 5) * 60 + 6) * 1_000_000 + 500_000;
        assert_eq!(decode(interval(hms, 3, 14)), "P1Y2M3DT4H5M6.5S");
        assert_eq!(decode(interval(0, 30, 0)), "P30D");
        assert_eq!(decode(interval(0, 0, 0)), "PT0S");
        assert_eq!(decode(interval(-90 * 60 * 1_000_000, 0, 0)), "PT-1H-30M");
        assert!(Interval::from_sql(&Type::INTERVAL, &[0; 8]).is_err());
    }

    #[test]
    fn inet_and_cidr_render_like_postgres() {
        let decode = |ty: &Type, raw: &[u8]| NetAddr::from_sql(ty, raw).unwrap().to_string();

        assert_eq!(decode(&Type::INET, &[2, 32, 0, 4, 10, 0, 0, 7]), "10.0.0.7");
        assert_eq!(decode(&Type::INET, &[2, 24, 0, 4, 10, 0, 0, 7]), "10.0.0.7/24");
        assert_eq!(decode(&Type::CIDR, &[2, 32, 1, 4, 10, 0, 0, 7]), "10.0.0.7/32");

        let mut v6 = vec![3, 128, 0, 16];
        v6.extend(std::net::Ipv6Addr::LOCALHOST.octets());
        assert_eq!(decode(&Type::INET, &v6), "::1");

        assert!(NetAddr::from_sql(&Type::INET, &[2, 32, 0, 4, 10]).is_err());
    }

    #[test]
    fn bytea_uses_hex_output_format() {
        assert_eq!(bytea(vec![0x0a, 0xff]), Json::String("\\x0aff".to_string()));
    }
}
