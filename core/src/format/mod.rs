//! File formats.
//!
//! A [`FileFormat`] knows how to recognise a file, read its schema and
//! stream its record batches. Dataset discovery and scanning only talk to
//! formats through this trait, so a new format plugs in by implementing it.

mod ipc;
mod parquet;

pub use self::ipc::IpcFileFormat;
pub use self::parquet::{ParquetFileFormat, ParquetOptions};

use std::fmt::Debug;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use strata_common::{BufferFile, FileSystem, ReadableFile};

use crate::error::DatasetResult;
use crate::expression::Expression;
use crate::fragment::FragmentRef;
use crate::scan_task::{ScanContext, ScanTask};

/// Lazy stream of record batches read from one file.
pub type BatchIterator = Box<dyn Iterator<Item = DatasetResult<RecordBatch>> + Send>;

pub type FileFormatRef = Arc<dyn FileFormat>;

/// Where the bytes of a fragment live.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A file on a filesystem.
    Path {
        path: String,
        filesystem: Arc<dyn FileSystem>,
    },
    /// An in-memory buffer.
    Buffer { name: String, data: Bytes },
}

impl FileSource {
    pub fn from_path(path: impl Into<String>, filesystem: Arc<dyn FileSystem>) -> Self {
        FileSource::Path {
            path: path.into(),
            filesystem,
        }
    }

    pub fn from_buffer(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        FileSource::Buffer {
            name: name.into(),
            data: data.into(),
        }
    }

    /// The file path, or the buffer's name.
    pub fn path(&self) -> &str {
        match self {
            FileSource::Path { path, .. } => path,
            FileSource::Buffer { name, .. } => name,
        }
    }

    /// Open for reading. The handle is released when dropped.
    pub fn open(&self) -> DatasetResult<Arc<dyn ReadableFile>> {
        match self {
            FileSource::Path { path, filesystem } => Ok(filesystem.open(path)?),
            FileSource::Buffer { name, data } => {
                Ok(Arc::new(BufferFile::new(name.clone(), data.clone())))
            }
        }
    }
}

/// What a scan needs from one file.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Physical columns to read, in file order. `None` reads every column.
    pub columns: Option<Vec<String>>,
    /// Maximum rows per batch.
    pub batch_size: usize,
    /// Filter the caller will apply to the rows; formats may use it to skip
    /// data that cannot match.
    pub predicate: Expression,
}

impl ReadRequest {
    pub fn all_columns(batch_size: usize) -> Self {
        Self {
            columns: None,
            batch_size,
            predicate: Expression::TRUE,
        }
    }
}

/// How to recognise, inspect and read one kind of file.
pub trait FileFormat: Send + Sync + Debug {
    /// The name identifying the format.
    fn type_name(&self) -> &str;

    /// Whether the file looks like this format, judged by its content.
    fn is_supported(&self, source: &FileSource) -> DatasetResult<bool>;

    /// The schema of the file.
    fn inspect(&self, source: &FileSource) -> DatasetResult<SchemaRef>;

    /// Stream batches from an opened file. The file handle is held by the
    /// returned iterator and released when it is dropped.
    fn open_reader(
        &self,
        file: Arc<dyn ReadableFile>,
        request: &ReadRequest,
    ) -> DatasetResult<BatchIterator>;

    /// Split a fragment into scan tasks. One task per fragment by default.
    fn create_scan_tasks(
        &self,
        fragment: FragmentRef,
        filter: Expression,
        context: Arc<ScanContext>,
    ) -> DatasetResult<Vec<ScanTask>> {
        Ok(vec![ScanTask::new(fragment, filter, context)])
    }
}

/// Slice batches down to at most `batch_size` rows.
pub(crate) fn rebatch(
    batches: impl Iterator<Item = DatasetResult<RecordBatch>> + Send + 'static,
    batch_size: usize,
) -> BatchIterator {
    let batch_size = batch_size.max(1);
    Box::new(batches.flat_map(move |item| -> Vec<DatasetResult<RecordBatch>> {
        match item {
            Ok(batch) if batch.num_rows() > batch_size => (0..batch.num_rows())
                .step_by(batch_size)
                .map(|offset| {
                    let len = batch_size.min(batch.num_rows() - offset);
                    Ok(batch.slice(offset, len))
                })
                .collect(),
            other => vec![other],
        }
    }))
}
