//! Reverse conversion: MySQL values → SqlValue
//!
//! Converts values decoded by `mysql_async` into `SqlValue`, and parses the
//! literal text produced by [`SqlValue::write_literal`] back into values so
//! dump output can be verified.

use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::ColumnType;
use mysql_async::Value;
use thiserror::Error;

use crate::forward::SqlValue;

/// MySQL value with the column type it was read from.
#[derive(Debug, Clone)]
pub struct MySQLValueWithSchema {
    /// The raw MySQL value.
    pub value: Value,
    /// The MySQL column type.
    pub column_type: ColumnType,
}

/// Error while converting or parsing a value.
#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Invalid escape sequence '\\{0}'")]
    InvalidEscape(char),
    #[error("Unrecognized literal: {0}")]
    UnrecognizedLiteral(String),
    #[error("Malformed value tuple: {0}")]
    MalformedTuple(String),
}

impl MySQLValueWithSchema {
    pub fn new(value: Value, column_type: ColumnType) -> Self {
        Self { value, column_type }
    }

    /// Convert to SqlValue.
    pub fn into_sql_value(self) -> SqlValue {
        SqlValue::from(self)
    }
}

impl From<MySQLValueWithSchema> for SqlValue {
    fn from(mv: MySQLValueWithSchema) -> Self {
        use ColumnType::*;

        match mv.value {
            Value::NULL => SqlValue::Null,
            Value::Int(i) => SqlValue::Int(i),
            Value::UInt(u) => SqlValue::UInt(u),
            Value::Float(f) => SqlValue::Raw(f.to_string().into_bytes()),
            Value::Double(d) => SqlValue::Raw(d.to_string().into_bytes()),
            // DECIMAL arrives as text; keep it exact and unquoted.
            Value::Bytes(bytes)
                if matches!(mv.column_type, MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL) =>
            {
                SqlValue::Raw(bytes)
            }
            Value::Bytes(bytes) => SqlValue::Bytes(bytes),
            Value::Date(year, month, day, hour, minute, second, micros) => {
                let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32);
                let date_only = matches!(mv.column_type, MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE);
                match date {
                    Some(d) if date_only => SqlValue::Date(d),
                    Some(d) => match d.and_hms_micro_opt(
                        hour as u32,
                        minute as u32,
                        second as u32,
                        micros,
                    ) {
                        Some(dt) => SqlValue::DateTime(dt),
                        None => zero_date_text(
                            date_only, year, month, day, hour, minute, second, micros,
                        ),
                    },
                    // Zero dates ('0000-00-00') have no calendar representation.
                    None => zero_date_text(
                        date_only, year, month, day, hour, minute, second, micros,
                    ),
                }
            }
            Value::Time(negative, days, hours, minutes, seconds, micros) => {
                let total_hours = days * 24 + hours as u32;
                let sign = if negative { "-" } else { "" };
                let text = if micros > 0 {
                    format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
                } else {
                    format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}")
                };
                SqlValue::Bytes(text.into_bytes())
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn zero_date_text(
    date_only: bool,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
) -> SqlValue {
    let text = if date_only {
        format!("{year:04}-{month:02}-{day:02}")
    } else {
        format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}")
    };
    SqlValue::Bytes(text.into_bytes())
}

/// Parse a single SQL literal as written by [`SqlValue::write_literal`].
///
/// Quoted text that looks like a timestamp or a date is returned as
/// `DateTime`/`Date`; other quoted text as `Bytes`. Unquoted numbers that
/// are not integers come back as `Raw`.
pub fn parse_literal(text: &str) -> Result<SqlValue, ConversionError> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("NULL") {
        return Ok(SqlValue::Null);
    }
    if text.starts_with('\'') {
        let (content, rest) = unescape_quoted(text.as_bytes())?;
        if !rest.is_empty() {
            return Err(ConversionError::UnrecognizedLiteral(text.to_string()));
        }
        return Ok(classify_quoted(content));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(SqlValue::Int(i));
    }
    if let Ok(u) = text.parse::<u64>() {
        return Ok(SqlValue::UInt(u));
    }
    if text.parse::<f64>().is_ok() {
        return Ok(SqlValue::Raw(text.as_bytes().to_vec()));
    }
    Err(ConversionError::UnrecognizedLiteral(text.to_string()))
}

/// Parse one row tuple such as `(1,'a, b',NULL)`.
///
/// A trailing `,` or `;` after the closing parenthesis is accepted so that
/// lines of an INSERT statement can be fed in directly.
pub fn parse_tuple(text: &str) -> Result<Vec<SqlValue>, ConversionError> {
    let malformed = || ConversionError::MalformedTuple(text.to_string());
    let bytes = text.trim().as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(malformed());
    }

    let mut values = Vec::new();
    let mut rest = &bytes[1..];
    loop {
        rest = skip_whitespace(rest);
        if rest.first() == Some(&b'\'') {
            let (content, remaining) = unescape_quoted(rest)?;
            values.push(classify_quoted(content));
            rest = remaining;
        } else {
            let end = rest
                .iter()
                .position(|b| *b == b',' || *b == b')')
                .ok_or_else(malformed)?;
            let token = std::str::from_utf8(&rest[..end]).map_err(|_| malformed())?;
            values.push(parse_literal(token)?);
            rest = &rest[end..];
        }

        rest = skip_whitespace(rest);
        match rest.first() {
            Some(b',') => rest = &rest[1..],
            Some(b')') => {
                rest = &rest[1..];
                break;
            }
            _ => return Err(malformed()),
        }
    }

    match rest {
        [] | [b','] | [b';'] => Ok(values),
        _ => Err(malformed()),
    }
}

fn skip_whitespace(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    &input[start..]
}

/// Read a quoted literal starting at `input[0] == '\''`, returning the
/// unescaped content and whatever follows the closing quote.
fn unescape_quoted(input: &[u8]) -> Result<(Vec<u8>, &[u8]), ConversionError> {
    let mut out = Vec::new();
    let mut i = 1;
    while i < input.len() {
        match input[i] {
            b'\\' => {
                let escaped = *input.get(i + 1).ok_or(ConversionError::UnterminatedString)?;
                out.push(match escaped {
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b'0' => 0,
                    b'Z' => 0x1a,
                    b'\\' | b'\'' | b'"' => escaped,
                    other => return Err(ConversionError::InvalidEscape(other as char)),
                });
                i += 2;
            }
            b'\'' => return Ok((out, &input[i + 1..])),
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(ConversionError::UnterminatedString)
}

fn classify_quoted(content: Vec<u8>) -> SqlValue {
    if let Ok(s) = std::str::from_utf8(&content) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
            return SqlValue::DateTime(dt);
        }
        if s.len() == 10 {
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return SqlValue::Date(d);
            }
        }
    }
    SqlValue::Bytes(content)
}
