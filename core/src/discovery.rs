//! Data source discovery.
//!
//! Discovery walks a filesystem (or an explicit file list), keeps the files a
//! format supports, derives each file's partition expression from its path
//! and unifies the file schemas into one dataset schema.

use std::fmt::Debug;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use strata_common::FileSystem;
use tracing::{debug, info};

use crate::datasource::{DataSourceRef, FileSystemDataSource};
use crate::error::{DatasetError, DatasetResult};
use crate::expression::Expression;
use crate::format::{FileFormatRef, FileSource};
use crate::fragment::Fragment;
use crate::partition::{PartitionSchemeRef, Partitioning};
use crate::schema::{append_partition_fields, unify_schemas};

/// Two-phase construction of a [`DataSource`](crate::datasource::DataSource):
/// inspect the schema first, then build the source.
pub trait DataSourceDiscovery: Send + Debug {
    /// Discover files and return the unified schema.
    fn inspect(&mut self) -> DatasetResult<SchemaRef>;

    /// Build the data source. Inspects first if that has not happened yet.
    fn finish(&mut self) -> DatasetResult<DataSourceRef>;
}

/// Options for [`FileSystemDataSourceDiscovery`].
#[derive(Debug, Clone)]
pub struct FileSystemDiscoveryOptions {
    /// Directory partition paths are taken relative to. Defaults to the
    /// discovery root.
    pub partition_base_dir: Option<String>,
    pub partitioning: Partitioning,
    /// Files or directories whose name starts with one of these are skipped.
    pub ignore_prefixes: Vec<String>,
    /// Skip files the format does not recognise instead of failing.
    pub exclude_invalid_files: bool,
    /// Use this schema instead of unifying the file schemas.
    pub schema: Option<SchemaRef>,
}

impl Default for FileSystemDiscoveryOptions {
    fn default() -> Self {
        Self {
            partition_base_dir: None,
            partitioning: Partitioning::default(),
            ignore_prefixes: vec![".".to_string(), "_".to_string()],
            exclude_invalid_files: false,
            schema: None,
        }
    }
}

impl FileSystemDiscoveryOptions {
    pub fn with_partitioning(mut self, partitioning: Partitioning) -> Self {
        self.partitioning = partitioning;
        self
    }

    pub fn with_partition_base_dir(mut self, dir: impl Into<String>) -> Self {
        self.partition_base_dir = Some(dir.into());
        self
    }

    pub fn with_exclude_invalid_files(mut self, exclude: bool) -> Self {
        self.exclude_invalid_files = exclude;
        self
    }

    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone)]
enum FileSelector {
    Root(String),
    Files(Vec<String>),
}

#[derive(Debug)]
struct DiscoveredFile {
    path: String,
    physical_schema: SchemaRef,
    partition_expression: Expression,
}

#[derive(Debug)]
struct Inspection {
    files: Vec<DiscoveredFile>,
    schema: SchemaRef,
}

/// Discovers the files of a dataset stored on a filesystem.
#[derive(Debug)]
pub struct FileSystemDataSourceDiscovery {
    filesystem: Arc<dyn FileSystem>,
    selector: FileSelector,
    format: FileFormatRef,
    options: FileSystemDiscoveryOptions,
    inspection: Option<Inspection>,
}

impl FileSystemDataSourceDiscovery {
    /// Discover every file below `root`.
    pub fn new(
        filesystem: Arc<dyn FileSystem>,
        root: impl Into<String>,
        format: FileFormatRef,
        options: FileSystemDiscoveryOptions,
    ) -> Self {
        Self {
            filesystem,
            selector: FileSelector::Root(normalize(&root.into())),
            format,
            options,
            inspection: None,
        }
    }

    /// Use an explicit list of files.
    pub fn from_files(
        filesystem: Arc<dyn FileSystem>,
        paths: Vec<String>,
        format: FileFormatRef,
        options: FileSystemDiscoveryOptions,
    ) -> Self {
        let paths = paths.iter().map(|p| normalize(p)).collect();
        Self {
            filesystem,
            selector: FileSelector::Files(paths),
            format,
            options,
            inspection: None,
        }
    }

    fn root(&self) -> &str {
        match &self.selector {
            FileSelector::Root(root) => root,
            FileSelector::Files(_) => "",
        }
    }

    fn is_ignored(&self, path: &str) -> bool {
        relative_to(path, self.root())
            .split('/')
            .any(|component| {
                self.options
                    .ignore_prefixes
                    .iter()
                    .any(|prefix| !prefix.is_empty() && component.starts_with(prefix.as_str()))
            })
    }

    /// The path partition parsing sees, or `None` when the file lies outside
    /// the partition base directory.
    fn partition_path<'a>(&'a self, path: &'a str) -> Option<&'a str> {
        let base = match &self.options.partition_base_dir {
            Some(dir) => normalize(dir),
            None => self.root().to_string(),
        };
        if base.is_empty() {
            return Some(path);
        }
        path.strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    fn candidate_paths(&self) -> DatasetResult<Vec<String>> {
        let paths = match &self.selector {
            FileSelector::Root(root) => self
                .filesystem
                .list(root)?
                .into_iter()
                .map(|info| info.path)
                .collect(),
            FileSelector::Files(paths) => paths.clone(),
        };
        Ok(paths.into_iter().filter(|p| !self.is_ignored(p)).collect())
    }

    fn resolve_scheme(&self, paths: &[String]) -> DatasetResult<PartitionSchemeRef> {
        match &self.options.partitioning {
            Partitioning::Scheme(scheme) => Ok(scheme.clone()),
            Partitioning::Discovery(discovery) => {
                let relative: Vec<String> = paths
                    .iter()
                    .filter_map(|p| self.partition_path(p))
                    .map(str::to_string)
                    .collect();
                let schema = discovery.inspect(&relative)?;
                debug!(partition_schema = ?schema.fields(), "discovered partition schema");
                discovery.finish(schema)
            }
        }
    }

    fn run_inspection(&self) -> DatasetResult<Inspection> {
        let mut paths = Vec::new();
        for path in self.candidate_paths()? {
            let source = FileSource::from_path(path.clone(), self.filesystem.clone());
            if self.format.is_supported(&source)? {
                paths.push(path);
            } else if self.options.exclude_invalid_files {
                debug!(path = %path, format = %self.format.type_name(), "skipping unsupported file");
            } else {
                return Err(DatasetError::UnsupportedFormat(format!(
                    "'{}' is not a {} file",
                    path,
                    self.format.type_name()
                )));
            }
        }

        let scheme = self.resolve_scheme(&paths)?;
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let partition_expression = match self.partition_path(&path) {
                Some(relative) => scheme.parse(relative)?,
                None => Expression::TRUE,
            };
            let source = FileSource::from_path(path.clone(), self.filesystem.clone());
            let physical_schema = self.format.inspect(&source)?;
            files.push(DiscoveredFile {
                path,
                physical_schema,
                partition_expression,
            });
        }

        let schema = match &self.options.schema {
            Some(schema) => schema.clone(),
            None => {
                let unified = unify_schemas(files.iter().map(|f| f.physical_schema.as_ref()))?;
                Arc::new(append_partition_fields(&unified, &scheme.schema())?)
            }
        };
        info!(
            root = %self.root(),
            files = files.len(),
            fields = schema.fields().len(),
            partitioning = %scheme.type_name(),
            "discovered data source"
        );
        Ok(Inspection { files, schema })
    }
}

impl DataSourceDiscovery for FileSystemDataSourceDiscovery {
    fn inspect(&mut self) -> DatasetResult<SchemaRef> {
        if let Some(inspection) = &self.inspection {
            return Ok(inspection.schema.clone());
        }
        let inspection = self.run_inspection()?;
        let schema = inspection.schema.clone();
        self.inspection = Some(inspection);
        Ok(schema)
    }

    fn finish(&mut self) -> DatasetResult<DataSourceRef> {
        self.inspect()?;
        let Some(inspection) = &self.inspection else {
            return Err(DatasetError::Internal("discovery was not inspected".to_string()));
        };
        let fragments = inspection
            .files
            .iter()
            .map(|file| {
                Arc::new(Fragment::new(
                    FileSource::from_path(file.path.clone(), self.filesystem.clone()),
                    self.format.clone(),
                    file.partition_expression.clone(),
                    file.physical_schema.clone(),
                ))
            })
            .collect();
        Ok(Arc::new(FileSystemDataSource::new(
            inspection.schema.clone(),
            fragments,
        )))
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn relative_to<'a>(path: &'a str, root: &str) -> &'a str {
    if root.is_empty() {
        return path;
    }
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(path)
}
