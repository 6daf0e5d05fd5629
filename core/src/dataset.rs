//! Datasets: one logical table over any number of data sources.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use strata_common::FileSystem;

use crate::datasource::DataSourceRef;
use crate::discovery::{DataSourceDiscovery, FileSystemDataSourceDiscovery, FileSystemDiscoveryOptions};
use crate::error::DatasetResult;
use crate::format::FileFormatRef;
use crate::scanner::ScannerBuilder;
use crate::schema::unify_schemas;

/// A collection of data sources read through one unified schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    sources: Vec<DataSourceRef>,
    schema: SchemaRef,
}

impl Dataset {
    /// Combine sources, unifying their schemas.
    pub fn new(sources: Vec<DataSourceRef>) -> DatasetResult<Self> {
        let schemas: Vec<SchemaRef> = sources.iter().map(|s| s.schema()).collect();
        let schema = unify_schemas(schemas.iter().map(|s| s.as_ref()))?;
        Ok(Self {
            sources,
            schema: Arc::new(schema),
        })
    }

    /// Combine sources under an explicit schema. Fragment columns are cast to
    /// it while scanning.
    pub fn with_schema(sources: Vec<DataSourceRef>, schema: SchemaRef) -> Self {
        Self { sources, schema }
    }

    /// Discover a single filesystem source below `root`.
    pub fn discover(
        filesystem: Arc<dyn FileSystem>,
        root: impl Into<String>,
        format: FileFormatRef,
        options: FileSystemDiscoveryOptions,
    ) -> DatasetResult<Self> {
        let mut discovery = FileSystemDataSourceDiscovery::new(filesystem, root, format, options);
        let source = discovery.finish()?;
        Ok(Self {
            schema: source.schema(),
            sources: vec![source],
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn sources(&self) -> &[DataSourceRef] {
        &self.sources
    }

    /// Start configuring a scan of this dataset.
    pub fn new_scan(&self) -> ScannerBuilder {
        ScannerBuilder::new(self.clone())
    }
}
