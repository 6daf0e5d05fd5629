//! Scanner construction and execution.
//!
//! A [`ScannerBuilder`] collects a filter, a projection and [`ScanOptions`]
//! and validates them against the dataset schema without touching any file.
//! The resulting [`Scanner`] prunes fragments by their partition
//! expressions and turns the rest into [`ScanTask`]s.

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::error::{DatasetError, DatasetResult};
use crate::executor::{ScanExecutor, ScanResults};
use crate::expression::Expression;
use crate::scan_task::{ScanContext, ScanTask};
use crate::schema::project_schema;

pub const DEFAULT_BATCH_SIZE: usize = 32 * 1024;

/// Number of worker threads used by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parallelism {
    /// One thread per CPU core.
    #[default]
    Default,
    Threads(usize),
}

impl Parallelism {
    pub fn resolve(&self) -> usize {
        match self {
            Parallelism::Default => num_cpus::get().max(1),
            Parallelism::Threads(n) => *n,
        }
    }
}

/// Order in which a threaded scan yields batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanOrdering {
    /// Fragment by fragment, in discovery order.
    #[default]
    Ordered,
    /// As soon as any worker produces a batch.
    Unordered,
}

/// Scan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanOptions {
    /// Maximum rows per output batch.
    pub batch_size: usize,
    /// Run tasks on a thread pool; otherwise on the calling thread.
    pub use_threads: bool,
    pub parallelism: Parallelism,
    pub ordering: ScanOrdering,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            use_threads: true,
            parallelism: Parallelism::Default,
            ordering: ScanOrdering::Ordered,
        }
    }
}

impl ScanOptions {
    fn validate(&self) -> DatasetResult<()> {
        if self.batch_size == 0 {
            return Err(DatasetError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        if self.parallelism == Parallelism::Threads(0) {
            return Err(DatasetError::InvalidArgument(
                "parallelism must be at least one thread".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Scanner`].
#[derive(Debug, Clone)]
pub struct ScannerBuilder {
    dataset: Dataset,
    filter: Expression,
    projection: Option<Vec<String>>,
    options: ScanOptions,
}

impl ScannerBuilder {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            filter: Expression::TRUE,
            projection: None,
            options: ScanOptions::default(),
        }
    }

    /// Only yield rows for which `filter` is true.
    pub fn filter(mut self, filter: Expression) -> Self {
        self.filter = filter;
        self
    }

    /// Output exactly these columns, in this order.
    pub fn project<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    pub fn use_threads(mut self, use_threads: bool) -> Self {
        self.options.use_threads = use_threads;
        self
    }

    pub fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.options.parallelism = parallelism;
        self
    }

    pub fn ordering(mut self, ordering: ScanOrdering) -> Self {
        self.options.ordering = ordering;
        self
    }

    pub fn options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and build. No file is opened.
    pub fn build(self) -> DatasetResult<Scanner> {
        self.options.validate()?;
        let schema = self.dataset.schema().clone();

        let projection = match self.projection {
            Some(columns) => {
                for (i, name) in columns.iter().enumerate() {
                    if columns[..i].contains(name) {
                        return Err(DatasetError::InvalidArgument(format!(
                            "column '{}' projected more than once",
                            name
                        )));
                    }
                }
                columns
            }
            None => schema.fields().iter().map(|f| f.name().clone()).collect(),
        };
        let projected_schema = project_schema(&schema, &projection)?;

        match self.filter.data_type(&schema)? {
            DataType::Boolean | DataType::Null => {}
            other => {
                return Err(DatasetError::TypeMismatch(format!(
                    "filter '{}' has type {}, expected boolean",
                    self.filter, other
                )));
            }
        }
        let filter = self.filter.fold_constants()?;
        debug!(filter = %filter, columns = ?projection, "built scanner");

        Ok(Scanner {
            dataset: self.dataset,
            filter,
            projected_schema,
            options: self.options,
        })
    }
}

/// A validated scan over a dataset.
#[derive(Debug, Clone)]
pub struct Scanner {
    dataset: Dataset,
    filter: Expression,
    projected_schema: SchemaRef,
    options: ScanOptions,
}

impl Scanner {
    /// Schema of the batches this scan yields.
    pub fn schema(&self) -> &SchemaRef {
        &self.projected_schema
    }

    pub fn filter(&self) -> &Expression {
        &self.filter
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Plan the scan: one or more tasks per fragment that may hold matching
    /// rows. Fragments ruled out by their partition expression are skipped
    /// without being opened.
    pub fn scan(&self) -> DatasetResult<Vec<ScanTask>> {
        self.plan(self.projected_schema.clone())
    }

    fn plan(&self, projected_schema: SchemaRef) -> DatasetResult<Vec<ScanTask>> {
        let context = Arc::new(ScanContext::new(
            self.dataset.schema().clone(),
            projected_schema,
            self.options.batch_size,
        ));
        let mut tasks = Vec::new();
        let mut total = 0;
        for source in self.dataset.sources() {
            total += source.fragments().len();
            for (fragment, residual) in source.candidate_fragments(&self.filter)? {
                let format = fragment.format().clone();
                tasks.extend(format.create_scan_tasks(fragment, residual, context.clone())?);
            }
        }
        info!(
            fragments = total,
            tasks = tasks.len(),
            filter = %self.filter,
            "planned scan"
        );
        Ok(tasks)
    }

    /// Start executing the scan and stream its batches.
    pub fn execute(&self) -> DatasetResult<ScanResults> {
        let tasks = self.scan()?;
        self.run(tasks)
    }

    fn run(&self, tasks: Vec<ScanTask>) -> DatasetResult<ScanResults> {
        if !self.options.use_threads {
            return Ok(ScanResults::serial(tasks));
        }
        let executor = ScanExecutor::new(self.options.parallelism.resolve())?;
        Ok(executor.execute(tasks, self.options.ordering))
    }

    /// Collect every batch. Fails on the first fragment error.
    pub fn to_batches(&self) -> DatasetResult<Vec<RecordBatch>> {
        self.execute()?
            .map(|item| item.map_err(DatasetError::from))
            .collect()
    }

    /// Collect the scan into a single batch.
    pub fn to_table(&self) -> DatasetResult<RecordBatch> {
        let batches = self.to_batches()?;
        Ok(concat_batches(&self.projected_schema, &batches)?)
    }

    /// Number of rows matching the filter. Only filter columns are read.
    pub fn count_rows(&self) -> DatasetResult<usize> {
        if !self.filter.is_satisfiable() {
            return Ok(0);
        }
        let tasks = self.plan(Arc::new(Schema::empty()))?;
        let mut rows = 0;
        for item in self.run(tasks)? {
            rows += item.map_err(DatasetError::from)?.num_rows();
        }
        Ok(rows)
    }
}
