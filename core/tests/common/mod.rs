//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, Float64Array, Int32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use strata_common::{CommonError, FileInfo, FileSystem, ObjectStoreFileSystem, ReadableFile};

/// An empty in-memory filesystem.
pub fn memory_filesystem() -> Arc<ObjectStoreFileSystem> {
    Arc::new(ObjectStoreFileSystem::in_memory().unwrap())
}

/// An in-memory filesystem holding the given files.
pub fn filesystem_with(files: &[(&str, Bytes)]) -> Arc<ObjectStoreFileSystem> {
    let fs = memory_filesystem();
    for (path, data) in files {
        fs.put(path, data.clone()).unwrap();
    }
    fs
}

/// Encode a batch as a Parquet file.
pub fn parquet_bytes(batch: &RecordBatch) -> Bytes {
    parquet_bytes_with_row_groups(batch, 1024 * 1024)
}

pub fn parquet_bytes_with_row_groups(batch: &RecordBatch, rows_per_group: usize) -> Bytes {
    let props = WriterProperties::builder()
        .set_max_row_group_size(rows_per_group)
        .build();
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props)).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
    Bytes::from(buffer)
}

/// A batch with columns `id: Int32` and `val: Float64`.
pub fn id_val_batch(ids: Range<i32>) -> RecordBatch {
    let ids: Vec<i32> = ids.collect();
    let vals: Vec<f64> = ids.iter().map(|i| *i as f64 * 1.5).collect();
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("val", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(ids)),
        Arc::new(Float64Array::from(vals)),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

/// Parquet file with `id`/`val` rows for the given id range.
pub fn id_val_parquet(ids: Range<i32>) -> Bytes {
    parquet_bytes(&id_val_batch(ids))
}

/// Every `id` value of the batches, in order.
pub fn collect_ids(batches: &[RecordBatch]) -> Vec<i32> {
    batches
        .iter()
        .flat_map(|batch| {
            let column = batch
                .column_by_name("id")
                .expect("id column")
                .as_any()
                .downcast_ref::<Int32Array>()
                .expect("id is Int32")
                .clone();
            column.values().to_vec()
        })
        .collect()
}

/// Wraps a filesystem and fails `open` for selected paths.
#[derive(Debug)]
pub struct FlakyFileSystem {
    inner: Arc<dyn FileSystem>,
    failing: Mutex<HashSet<String>>,
}

impl FlakyFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make later opens of `path` fail.
    pub fn fail(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }
}

impl FileSystem for FlakyFileSystem {
    fn type_name(&self) -> &str {
        "flaky"
    }

    fn list(&self, root: &str) -> strata_common::Result<Vec<FileInfo>> {
        self.inner.list(root)
    }

    fn open(&self, path: &str) -> strata_common::Result<Arc<dyn ReadableFile>> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(CommonError::io_error(format!("injected failure for '{}'", path)));
        }
        self.inner.open(path)
    }
}

/// Wraps a filesystem and counts opened and still-open file handles.
#[derive(Debug)]
pub struct TrackingFileSystem {
    inner: Arc<dyn FileSystem>,
    opened: Arc<AtomicUsize>,
    open_handles: Arc<AtomicUsize>,
}

impl TrackingFileSystem {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            opened: Arc::new(AtomicUsize::new(0)),
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.opened.store(0, Ordering::SeqCst);
    }
}

impl FileSystem for TrackingFileSystem {
    fn type_name(&self) -> &str {
        "tracking"
    }

    fn list(&self, root: &str) -> strata_common::Result<Vec<FileInfo>> {
        self.inner.list(root)
    }

    fn open(&self, path: &str) -> strata_common::Result<Arc<dyn ReadableFile>> {
        let file = self.inner.open(path)?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TrackedFile {
            inner: file,
            open_handles: self.open_handles.clone(),
        }))
    }
}

#[derive(Debug)]
struct TrackedFile {
    inner: Arc<dyn ReadableFile>,
    open_handles: Arc<AtomicUsize>,
}

impl ReadableFile for TrackedFile {
    fn path(&self) -> &str {
        self.inner.path()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read_range(&self, range: Range<u64>) -> strata_common::Result<Bytes> {
        self.inner.read_range(range)
    }
}

impl Drop for TrackedFile {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
