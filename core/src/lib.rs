//! Strata Core - dataset discovery and scanning over Arrow
//!
//! A dataset is a collection of files, possibly spread over partitioned
//! directories, read as one logical table. This crate discovers the files,
//! derives partition predicates from their paths, unifies their schemas and
//! scans them with filter pushdown, projection and parallel execution.

pub mod datasource;
pub mod dataset;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod expression;
pub mod format;
pub mod fragment;
pub mod partition;
pub mod scalar;
pub mod scan_task;
pub mod scanner;
pub mod schema;

pub use datasource::{
    DataSource, DataSourceRef, FileSystemDataSource, InMemoryDataSource, TreeDataSource,
};
pub use dataset::Dataset;
pub use discovery::{DataSourceDiscovery, FileSystemDataSourceDiscovery, FileSystemDiscoveryOptions};
pub use error::{DatasetError, DatasetResult, FragmentError};
pub use executor::{ScanExecutor, ScanItem, ScanResults};
pub use expression::{CompareOperator, Expression};
pub use format::{
    BatchIterator, FileFormat, FileFormatRef, FileSource, IpcFileFormat, ParquetFileFormat,
    ParquetOptions, ReadRequest,
};
pub use fragment::{Fragment, FragmentRef};
pub use partition::{
    DefaultPartitionScheme, FunctionPartitionScheme, HivePartitionScheme,
    HivePartitionSchemeDiscovery, PartitionScheme, PartitionSchemeDiscovery, PartitionSchemeRef,
    Partitioning, SchemaPartitionScheme, SchemaPartitionSchemeDiscovery,
    SegmentDictionaryPartitionScheme,
};
pub use scalar::Scalar;
pub use scan_task::{ScanContext, ScanTask, ScanTaskBatches};
pub use scanner::{Parallelism, ScanOptions, ScanOrdering, Scanner, ScannerBuilder};
