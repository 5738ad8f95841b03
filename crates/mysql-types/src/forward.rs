//! Forward conversion: SqlValue → SQL literal text
//!
//! Literals are written straight into a byte buffer so that binary column
//! content survives untouched apart from the escaped characters.

use chrono::{NaiveDate, NaiveDateTime};

/// chrono format for DATETIME/TIMESTAMP literals (always six fractional digits).
pub const DATETIME_LITERAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// chrono format for DATE literals.
pub const DATE_LITERAL_FORMAT: &str = "%Y-%m-%d";

/// A single column value as it will appear in a dump file.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// Signed integer, written as decimal digits.
    Int(i64),
    /// Unsigned integer, written as decimal digits.
    UInt(u64),
    /// Character or binary data, written single-quoted and escaped.
    Bytes(Vec<u8>),
    /// Date and time, written as `'YYYY-MM-DD HH:MM:SS.ffffff'`.
    DateTime(NaiveDateTime),
    /// Date only, written as `'YYYY-MM-DD'`.
    Date(NaiveDate),
    /// Text written verbatim without quotes (floats, decimals).
    Raw(Vec<u8>),
}

impl SqlValue {
    /// Append the literal form of this value to `out`.
    pub fn write_literal(&self, out: &mut Vec<u8>) {
        match self {
            SqlValue::Null => out.extend_from_slice(b"NULL"),
            SqlValue::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
            SqlValue::UInt(u) => out.extend_from_slice(u.to_string().as_bytes()),
            SqlValue::Bytes(bytes) => {
                out.push(b'\'');
                escape_into(bytes, out);
                out.push(b'\'');
            }
            SqlValue::DateTime(dt) => {
                out.push(b'\'');
                out.extend_from_slice(dt.format(DATETIME_LITERAL_FORMAT).to_string().as_bytes());
                out.push(b'\'');
            }
            SqlValue::Date(d) => {
                out.push(b'\'');
                out.extend_from_slice(d.format(DATE_LITERAL_FORMAT).to_string().as_bytes());
                out.push(b'\'');
            }
            SqlValue::Raw(raw) => out.extend_from_slice(raw),
        }
    }

    /// Literal form as a `String` (lossy for non UTF-8 binary content).
    pub fn to_literal(&self) -> String {
        let mut buf = Vec::new();
        self.write_literal(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// Escape string content for a single-quoted MySQL literal.
///
/// Backslash, both quote characters, newline and carriage return are
/// backslash-escaped; every other byte is copied as is.
pub fn escape_into(input: &[u8], out: &mut Vec<u8>) {
    for &b in input {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\'' => out.extend_from_slice(b"\\'"),
            b'"' => out.extend_from_slice(b"\\\""),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::UInt(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Bytes(v.into_bytes())
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
