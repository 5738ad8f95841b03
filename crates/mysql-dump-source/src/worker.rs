//! Workers drain the chunk queue inside their snapshot transaction and
//! serialize rows into `INSERT` statements.

use mysql_types::{insert_prefix, SqlValue};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::chunk::DataChunk;
use crate::connector::{RowSink, SnapshotSession};
use crate::error::Result;
use crate::output::{data_file_header, OutputFile, OutputOptions};
use crate::progress::Progress;

/// Queue receiver shared by every worker.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<DataChunk>>>;

/// Writes one chunk's rows as batched multi-row INSERT statements.
pub struct ChunkWriter<'a> {
    file: &'a mut OutputFile,
    prefix: String,
    batch_size: u64,
    rows_in_statement: u64,
    rows: u64,
    row_buf: Vec<u8>,
}

impl<'a> ChunkWriter<'a> {
    pub fn new(file: &'a mut OutputFile, chunk: &DataChunk) -> Self {
        Self {
            file,
            prefix: insert_prefix(&chunk.table.escaped_qualified_name()),
            batch_size: chunk.output_batch_size.max(1),
            rows_in_statement: 0,
            rows: 0,
            row_buf: Vec::new(),
        }
    }

    /// Close the open statement, if any. Returns the rows written.
    pub fn finish(self) -> Result<u64> {
        if self.rows_in_statement > 0 {
            self.file.write_str(");\n")?;
        }
        Ok(self.rows)
    }
}

impl RowSink for ChunkWriter<'_> {
    fn write_row(&mut self, row: Vec<SqlValue>) -> Result<()> {
        self.row_buf.clear();
        if self.rows_in_statement == 0 {
            self.row_buf.extend_from_slice(self.prefix.as_bytes());
            self.row_buf.push(b'(');
        } else {
            self.row_buf.extend_from_slice(b"),\n(");
        }
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                self.row_buf.push(b',');
            }
            value.write_literal(&mut self.row_buf);
        }
        self.rows_in_statement += 1;
        self.rows += 1;
        if self.rows_in_statement == self.batch_size {
            self.row_buf.extend_from_slice(b");\n");
            self.rows_in_statement = 0;
        }
        self.file.write_bytes(&self.row_buf)
    }
}

/// Rows written by one worker, keyed by `schema.table`.
#[derive(Debug, Default)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub chunks: u64,
    pub rows_by_table: HashMap<String, u64>,
}

/// One worker: a snapshot session plus the data files it has opened.
pub struct Worker {
    id: usize,
    session: Box<dyn SnapshotSession>,
    receiver: SharedReceiver,
    output: Arc<OutputOptions>,
    progress: Progress,
    files: HashMap<String, OutputFile>,
    report: WorkerReport,
}

impl Worker {
    pub fn new(
        id: usize,
        session: Box<dyn SnapshotSession>,
        receiver: SharedReceiver,
        output: Arc<OutputOptions>,
        progress: Progress,
    ) -> Self {
        Self {
            id,
            session,
            receiver,
            output,
            progress,
            files: HashMap::new(),
            report: WorkerReport {
                worker_id: id,
                ..Default::default()
            },
        }
    }

    /// Process chunks until the queue is closed and empty, then finish
    /// every file and commit the snapshot transaction.
    pub async fn run(mut self) -> Result<WorkerReport> {
        debug!("Worker {} started", self.id);
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(chunk) = next else {
                break;
            };
            self.progress.chunk_taken();
            self.process(&chunk).await?;
        }

        for (_, file) in self.files.drain() {
            file.finish()?;
        }
        self.session.commit().await?;
        info!(
            "Worker {} finished: {} chunks",
            self.id, self.report.chunks
        );
        Ok(self.report)
    }

    async fn process(&mut self, chunk: &DataChunk) -> Result<()> {
        let name = chunk.table.qualified_name();
        let file = match self.files.entry(name.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.output.data_file_path(&chunk.table, self.id);
                let mut file = OutputFile::create(path, self.output.compression)?;
                file.write_str(&data_file_header(&chunk.table, self.output.use_database))?;
                entry.insert(file)
            }
        };

        file.write_str(&chunk.header_comment())?;
        file.write_str("\n")?;

        let mut writer = ChunkWriter::new(file, chunk);
        self.session.stream_chunk(chunk, &mut writer).await?;
        let rows = writer.finish()?;

        debug!(
            "Worker {} wrote {} rows for {} chunk {}",
            self.id, rows, name, chunk.sequence
        );
        self.progress.add_rows(rows);
        self.report.chunks += 1;
        *self.report.rows_by_table.entry(name).or_insert(0) += rows;
        Ok(())
    }
}
