//! Filesystem capability used by dataset discovery and scanning.
//!
//! Discovery and scan tasks only ever see the narrow [`FileSystem`] /
//! [`ReadableFile`] interface. The bundled implementation adapts any
//! `object_store::ObjectStore` (in-memory, local disk or a cloud bucket) and
//! drives its async API on a runtime owned by the filesystem, so the
//! synchronous scan pipeline can run on plain worker threads.

use std::fmt::Debug;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    ObjectStore, PutPayload, local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::{debug, trace};

use crate::error::{CommonError, Result};

/// A file discovered by [`FileSystem::list`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileInfo {
    /// Path of the file, using `/` as the separator and no leading slash.
    pub path: String,
    /// Size of the file in bytes.
    pub size: u64,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }

    /// The final path component.
    pub fn base_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// An open file supporting random access reads.
///
/// Dropping the handle releases it.
pub trait ReadableFile: Send + Sync + Debug {
    /// Path the file was opened from.
    fn path(&self) -> &str;

    /// Total size of the file in bytes.
    fn size(&self) -> u64;

    /// Read the given byte range.
    fn read_range(&self, range: Range<u64>) -> Result<Bytes>;

    /// Read the whole file.
    fn read_all(&self) -> Result<Bytes> {
        self.read_range(0..self.size())
    }
}

/// Filesystem capability: enumerate files and open them for reading.
pub trait FileSystem: Send + Sync + Debug {
    /// The name identifying the kind of filesystem.
    fn type_name(&self) -> &str;

    /// Recursively list the files below `root`, sorted by path.
    fn list(&self, root: &str) -> Result<Vec<FileInfo>>;

    /// Open a file for reading.
    fn open(&self, path: &str) -> Result<Arc<dyn ReadableFile>>;
}

/// A file backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BufferFile {
    name: String,
    data: Bytes,
}

impl BufferFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl ReadableFile for BufferFile {
    fn path(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        if range.start > range.end || range.end > self.size() {
            return Err(CommonError::io_error(format!(
                "range {}..{} out of bounds for buffer '{}' of {} bytes",
                range.start,
                range.end,
                self.name,
                self.size()
            )));
        }
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }
}

/// Filesystem backend configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FileSystemBackend {
    /// In-memory storage for testing and development.
    #[default]
    Memory,
    /// Local filesystem rooted at `root_path`.
    LocalFileSystem { root_path: String },
    /// AWS S3 storage.
    #[cfg(feature = "aws")]
    S3 {
        bucket: String,
        region: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        endpoint: Option<String>,
    },
    /// Azure Blob Storage.
    #[cfg(feature = "azure")]
    Azure {
        account: String,
        container: String,
        access_key: Option<String>,
    },
    /// Google Cloud Storage.
    #[cfg(feature = "gcp")]
    Gcs {
        bucket: String,
        service_account_path: Option<String>,
    },
}

/// Configuration for filesystem creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileSystemConfig {
    /// Storage backend to use.
    pub backend: FileSystemBackend,
    /// Worker threads of the runtime driving the object store.
    pub io_threads: usize,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            backend: FileSystemBackend::default(),
            io_threads: 2,
        }
    }
}

/// Builder for creating filesystem instances.
pub struct FileSystemBuilder {
    config: FileSystemConfig,
}

impl FileSystemBuilder {
    /// Create a new filesystem builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: FileSystemConfig::default(),
        }
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: FileSystemConfig) -> Self {
        Self { config }
    }

    /// Set the storage backend.
    pub fn backend(mut self, backend: FileSystemBackend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the number of runtime worker threads used for object store calls.
    pub fn io_threads(mut self, threads: usize) -> Self {
        self.config.io_threads = threads;
        self
    }

    /// Build a filesystem with the specified configuration.
    pub fn build(self) -> Result<Arc<ObjectStoreFileSystem>> {
        let store: Arc<dyn ObjectStore> = match &self.config.backend {
            FileSystemBackend::Memory => Arc::new(InMemory::new()),
            FileSystemBackend::LocalFileSystem { root_path } => {
                let fs = LocalFileSystem::new_with_prefix(root_path).map_err(|e| {
                    CommonError::configuration_error_with_source(
                        format!("Failed to open local filesystem at '{}'", root_path),
                        e,
                    )
                })?;
                Arc::new(fs)
            }
            #[cfg(feature = "aws")]
            FileSystemBackend::S3 {
                bucket,
                region,
                access_key_id,
                secret_access_key,
                endpoint,
            } => {
                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_region(region);
                if let Some(key) = access_key_id {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                Arc::new(builder.build().map_err(|e| {
                    CommonError::configuration_error_with_source("Failed to configure S3", e)
                })?)
            }
            #[cfg(feature = "azure")]
            FileSystemBackend::Azure {
                account,
                container,
                access_key,
            } => {
                let mut builder = object_store::azure::MicrosoftAzureBuilder::from_env()
                    .with_account(account)
                    .with_container_name(container);
                if let Some(key) = access_key {
                    builder = builder.with_access_key(key);
                }
                Arc::new(builder.build().map_err(|e| {
                    CommonError::configuration_error_with_source("Failed to configure Azure", e)
                })?)
            }
            #[cfg(feature = "gcp")]
            FileSystemBackend::Gcs {
                bucket,
                service_account_path,
            } => {
                let mut builder = object_store::gcp::GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket);
                if let Some(path) = service_account_path {
                    builder = builder.with_service_account_path(path);
                }
                Arc::new(builder.build().map_err(|e| {
                    CommonError::configuration_error_with_source("Failed to configure GCS", e)
                })?)
            }
        };

        let fs = ObjectStoreFileSystem::with_io_threads(store, self.config.io_threads)?;
        Ok(Arc::new(fs))
    }
}

impl Default for FileSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Filesystem operation statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSystemStats {
    pub list_count: u64,
    pub open_count: u64,
    pub read_count: u64,
    pub bytes_read: u64,
    pub error_count: u64,
}

/// Internal statistics tracker for filesystem operations.
#[derive(Debug, Default)]
struct InternalFileSystemStats {
    lists: AtomicU64,
    opens: AtomicU64,
    reads: AtomicU64,
    bytes_read: AtomicU64,
    errors: AtomicU64,
}

impl InternalFileSystemStats {
    fn record_list(&self) {
        self.lists.fetch_add(1, Ordering::Relaxed);
    }

    fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn get_stats(&self) -> FileSystemStats {
        FileSystemStats {
            list_count: self.lists.load(Ordering::Acquire),
            open_count: self.opens.load(Ordering::Acquire),
            read_count: self.reads.load(Ordering::Acquire),
            bytes_read: self.bytes_read.load(Ordering::Acquire),
            error_count: self.errors.load(Ordering::Acquire),
        }
    }
}

/// [`FileSystem`] implementation on top of an `object_store::ObjectStore`.
///
/// Must not be called from inside an async runtime: every call blocks the
/// current thread on the filesystem's own runtime.
pub struct ObjectStoreFileSystem {
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
    stats: Arc<InternalFileSystemStats>,
}

impl Debug for ObjectStoreFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreFileSystem")
            .field("store", &self.store.to_string())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ObjectStoreFileSystem {
    /// Wrap an object store, driving it on a two-thread runtime.
    pub fn new(store: Arc<dyn ObjectStore>) -> Result<Self> {
        Self::with_io_threads(store, FileSystemConfig::default().io_threads)
    }

    /// Wrap an object store, driving it on a runtime with `io_threads` workers.
    pub fn with_io_threads(store: Arc<dyn ObjectStore>, io_threads: usize) -> Result<Self> {
        if io_threads == 0 {
            return Err(CommonError::configuration_error(
                "io_threads must be positive",
            ));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(io_threads)
            .thread_name("strata-io")
            .enable_all()
            .build()
            .map_err(|e| CommonError::internal_error_with_source("Failed to start IO runtime", e))?;
        debug!(store = %store, io_threads, "created object store filesystem");
        Ok(Self {
            store,
            runtime: Arc::new(runtime),
            stats: Arc::new(InternalFileSystemStats::default()),
        })
    }

    /// An empty in-memory filesystem.
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(InMemory::new()))
    }

    /// The wrapped object store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Operation counters since creation.
    pub fn stats(&self) -> FileSystemStats {
        self.stats.get_stats()
    }

    /// Write a whole object. Used to stage files for tests and tooling.
    pub fn put(&self, path: &str, data: impl Into<Bytes>) -> Result<()> {
        let location = to_object_path(path);
        let payload = PutPayload::from(data.into());
        let store = self.store.clone();
        block_on(&self.runtime, async move { store.put(&location, payload).await })?
            .map(|_| ())
            .map_err(|e| {
                self.stats.record_error();
                convert_error(e, path)
            })
    }

    /// Delete an object.
    pub fn delete(&self, path: &str) -> Result<()> {
        let location = to_object_path(path);
        let store = self.store.clone();
        block_on(&self.runtime, async move { store.delete(&location).await })?.map_err(|e| {
            self.stats.record_error();
            convert_error(e, path)
        })
    }
}

impl FileSystem for ObjectStoreFileSystem {
    fn type_name(&self) -> &str {
        "object_store"
    }

    fn list(&self, root: &str) -> Result<Vec<FileInfo>> {
        let prefix = normalize(root);
        let location = (!prefix.is_empty()).then(|| ObjectPath::from(prefix.as_str()));
        let store = self.store.clone();
        let listed = block_on(&self.runtime, async move {
            store
                .list(location.as_ref())
                .try_collect::<Vec<_>>()
                .await
        })?;
        let metas = listed.map_err(|e| {
            self.stats.record_error();
            convert_error(e, root)
        })?;
        self.stats.record_list();

        let mut files: Vec<FileInfo> = metas
            .into_iter()
            .map(|meta| FileInfo::new(meta.location.as_ref(), meta.size))
            .collect();
        files.sort();
        debug!(root = %root, files = files.len(), "listed files");
        Ok(files)
    }

    fn open(&self, path: &str) -> Result<Arc<dyn ReadableFile>> {
        let location = to_object_path(path);
        let store = self.store.clone();
        let head_location = location.clone();
        let meta = block_on(&self.runtime, async move { store.head(&head_location).await })?
            .map_err(|e| {
                self.stats.record_error();
                convert_error(e, path)
            })?;
        self.stats.record_open();
        trace!(path = %path, size = meta.size, "opened file");
        Ok(Arc::new(ObjectStoreFile {
            display: path.to_string(),
            location,
            size: meta.size,
            store: self.store.clone(),
            runtime: self.runtime.clone(),
            stats: self.stats.clone(),
        }))
    }
}

/// An object opened through [`ObjectStoreFileSystem`].
struct ObjectStoreFile {
    display: String,
    location: ObjectPath,
    size: u64,
    store: Arc<dyn ObjectStore>,
    runtime: Arc<Runtime>,
    stats: Arc<InternalFileSystemStats>,
}

impl Debug for ObjectStoreFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreFile")
            .field("path", &self.display)
            .field("size", &self.size)
            .finish()
    }
}

impl ReadableFile for ObjectStoreFile {
    fn path(&self) -> &str {
        &self.display
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        if range.start > range.end || range.end > self.size {
            return Err(CommonError::io_error(format!(
                "range {}..{} out of bounds for '{}' of {} bytes",
                range.start, range.end, self.display, self.size
            )));
        }
        if range.start == range.end {
            return Ok(Bytes::new());
        }
        let store = self.store.clone();
        let location = self.location.clone();
        let requested = range.clone();
        let bytes = block_on(&self.runtime, async move {
            store.get_range(&location, requested).await
        })?
        .map_err(|e| {
            self.stats.record_error();
            convert_error(e, &self.display)
        })?;
        self.stats.record_read(bytes.len() as u64);
        Ok(bytes)
    }
}

/// Run a future to completion on the filesystem runtime.
fn block_on<F: Future>(runtime: &Runtime, future: F) -> Result<F::Output> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(CommonError::internal_error(
            "object store filesystem cannot be driven from within an async runtime",
        ));
    }
    Ok(runtime.block_on(future))
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn to_object_path(path: &str) -> ObjectPath {
    ObjectPath::from(normalize(path).as_str())
}

/// Convert an object store error to a CommonError.
fn convert_error(error: object_store::Error, path: &str) -> CommonError {
    match error {
        object_store::Error::NotFound { .. } => {
            CommonError::not_found_error_with_source(format!("'{}' does not exist", path), error)
        }
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => {
            CommonError::permission_error_with_source(format!("cannot access '{}'", path), error)
        }
        other => CommonError::io_error_with_source(
            format!("object store operation on '{}' failed", path),
            other,
        ),
    }
}
