//! MySQL value rendering for chunk-dump.
//!
//! This crate converts values read from MySQL into SQL literal text that can
//! be replayed with the `mysql` client, and provides the identifier quoting
//! used by every generated statement.
//!
//! # Structure
//!
//! - `forward`: Render `SqlValue` → SQL literal text (for INSERT output)
//! - `reverse`: Convert MySQL values and literal text → `SqlValue`
//! - `ddl`: Identifier quoting and small statement builders
//! - `schema`: Which column types can drive range chunking
//!
//! # Example
//!
//! ```rust
//! use mysql_types::{quote_identifier, SqlValue};
//!
//! assert_eq!(SqlValue::from("it's").to_literal(), "'it\\'s'");
//! assert_eq!(SqlValue::Null.to_literal(), "NULL");
//! assert_eq!(quote_identifier("city"), "city");
//! assert_eq!(quote_identifier("order"), "`order`");
//! ```

pub mod ddl;
pub mod forward;
pub mod reverse;
pub mod schema;

pub use ddl::{
    drop_table_statement, insert_prefix, lock_tables_statement, qualified_identifier,
    quote_identifier, use_statement,
};
pub use forward::{escape_into, SqlValue, DATETIME_LITERAL_FORMAT, DATE_LITERAL_FORMAT};
pub use reverse::{parse_literal, parse_tuple, ConversionError, MySQLValueWithSchema};
pub use schema::{is_chunkable_key_type, CHUNKABLE_KEY_TYPES};
