//! Column types that can drive range chunking.
//!
//! The planner walks keys with a signed 64-bit cursor, so only integer
//! columns whose whole range fits in `i64` qualify.

/// `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE` values usable as a chunking key.
pub const CHUNKABLE_KEY_TYPES: &[&str] = &["tinyint", "smallint", "mediumint", "int", "bigint"];

/// Whether a column can serve as a chunking key.
///
/// # Arguments
///
/// * `data_type` - `DATA_TYPE` (e.g. `"int"`, `"varchar"`)
/// * `column_type` - `COLUMN_TYPE` (e.g. `"bigint unsigned"`, `"int(11)"`)
///
/// # Example
///
/// ```
/// use mysql_types::is_chunkable_key_type;
///
/// assert!(is_chunkable_key_type("int", "int(10) unsigned"));
/// assert!(!is_chunkable_key_type("bigint", "bigint unsigned"));
/// assert!(!is_chunkable_key_type("varchar", "varchar(50)"));
/// ```
pub fn is_chunkable_key_type(data_type: &str, column_type: &str) -> bool {
    let data_type = data_type.to_ascii_lowercase();
    if !CHUNKABLE_KEY_TYPES.contains(&data_type.as_str()) {
        return false;
    }
    // BIGINT UNSIGNED can exceed i64::MAX.
    !(data_type == "bigint" && column_type.to_ascii_lowercase().contains("unsigned"))
}
