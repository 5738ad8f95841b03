//! Output files: per-worker data files and per-table definition files.

use flate2::write::GzEncoder;
use flate2::Compression;
use mysql_types::{drop_table_statement, use_statement};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DumpError, Result};
use crate::table::Table;

/// Settings shared by every file a dump writes.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub destination: PathBuf,
    /// gzip level, `None` for plain files.
    pub compression: Option<u32>,
    pub use_database: bool,
    pub add_drop_table: bool,
}

impl OutputOptions {
    fn with_extension(&self, base: String) -> PathBuf {
        match self.compression {
            Some(_) => self.destination.join(format!("{base}.gz")),
            None => self.destination.join(base),
        }
    }

    /// `<dest>/<schema>.<table>-thread<worker>.sql[.gz]`
    pub fn data_file_path(&self, table: &Table, worker_id: usize) -> PathBuf {
        self.with_extension(format!(
            "{}-thread{}.sql",
            table.qualified_name(),
            worker_id
        ))
    }

    /// `<dest>/<schema>.<table>-definition.sql[.gz]`
    pub fn definition_file_path(&self, table: &Table) -> PathBuf {
        self.with_extension(format!("{}-definition.sql", table.qualified_name()))
    }
}

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

/// A buffered, optionally gzip-compressed output file.
pub struct OutputFile {
    path: PathBuf,
    sink: Sink,
}

impl OutputFile {
    pub fn create(path: impl Into<PathBuf>, compression: Option<u32>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| DumpError::io(&path, e))?;
        let writer = BufWriter::new(file);
        let sink = match compression {
            Some(level) => Sink::Gzip(GzEncoder::new(writer, Compression::new(level))),
            None => Sink::Plain(writer),
        };
        debug!("Created {}", path.display());
        Ok(Self { path, sink })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let result = match &mut self.sink {
            Sink::Plain(w) => w.write_all(bytes),
            Sink::Gzip(w) => w.write_all(bytes),
        };
        result.map_err(|e| DumpError::io(&self.path, e))
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    /// Flush buffers and finalize the gzip stream.
    pub fn finish(self) -> Result<()> {
        let path = self.path;
        let result = match self.sink {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(w) => w.finish().and_then(|mut inner| inner.flush()),
        };
        result.map_err(|e| DumpError::io(&path, e))
    }
}

/// Session settings written once at the top of each data file.
pub fn data_file_header(table: &Table, use_database: bool) -> String {
    let mut header = String::from(
        "SET NAMES utf8mb4;\n\
         SET TIME_ZONE='+00:00';\n\
         SET UNIQUE_CHECKS=0;\n\
         SET FOREIGN_KEY_CHECKS=0;\n\
         SET SQL_MODE='NO_AUTO_VALUE_ON_ZERO';\n",
    );
    if use_database {
        header.push_str(&use_statement(&table.schema));
        header.push('\n');
    }
    header
}

/// Write the table's definition file and return its path.
pub fn write_definition_file(options: &OutputOptions, table: &Table) -> Result<PathBuf> {
    let path = options.definition_file_path(table);
    let mut file = OutputFile::create(&path, options.compression)?;

    if options.use_database {
        file.write_str(&use_statement(&table.schema))?;
        file.write_str("\n")?;
    }
    file.write_str("/*!40101 SET NAMES binary*/;\n")?;
    file.write_str("/*!40014 SET FOREIGN_KEY_CHECKS=0*/;\n")?;
    if options.add_drop_table {
        file.write_str(&drop_table_statement(&table.escaped_qualified_name()))?;
        file.write_str("\n")?;
    }
    file.write_str(&table.create_table_sql)?;
    file.write_str(";\n")?;
    file.finish()?;
    Ok(path)
}
