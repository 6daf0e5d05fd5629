//! Scan tasks: the unit of work a scan is split into.
//!
//! A task reads one fragment (or part of one) and yields batches that match
//! the dataset schema restricted to the scan's projection. Nothing is
//! opened until the first batch is requested.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, new_null_array};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use tracing::{debug, trace};

use crate::error::DatasetResult;
use crate::expression::Expression;
use crate::format::{BatchIterator, ReadRequest};
use crate::fragment::FragmentRef;
use crate::scalar::Scalar;

/// Scan-wide settings shared by every task of one scan.
#[derive(Debug)]
pub struct ScanContext {
    pub dataset_schema: SchemaRef,
    /// Output column names, in output order.
    pub projection: Vec<String>,
    pub projected_schema: SchemaRef,
    pub batch_size: usize,
}

impl ScanContext {
    pub fn new(dataset_schema: SchemaRef, projected_schema: SchemaRef, batch_size: usize) -> Self {
        let projection = projected_schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        Self {
            dataset_schema,
            projection,
            projected_schema,
            batch_size,
        }
    }
}

/// A lazily executed read of one fragment.
#[derive(Debug, Clone)]
pub struct ScanTask {
    fragment: FragmentRef,
    filter: Expression,
    context: Arc<ScanContext>,
}

impl ScanTask {
    /// `filter` is the scan filter already simplified against the
    /// fragment's partition expression.
    pub fn new(fragment: FragmentRef, filter: Expression, context: Arc<ScanContext>) -> Self {
        Self {
            fragment,
            filter,
            context,
        }
    }

    pub fn fragment(&self) -> &FragmentRef {
        &self.fragment
    }

    /// The residual filter applied to the rows of this task.
    pub fn filter(&self) -> &Expression {
        &self.filter
    }

    pub fn projected_schema(&self) -> &SchemaRef {
        &self.context.projected_schema
    }

    /// Start the task. The file is opened on the first call to `next`.
    pub fn execute(self) -> ScanTaskBatches {
        ScanTaskBatches {
            task: self,
            state: TaskState::Pending,
        }
    }

    /// Open the fragment and prepare the reader.
    fn open(&self) -> DatasetResult<TaskState> {
        let fragment = &self.fragment;
        let context = &self.context;
        let mut needed: Vec<String> = self.filter.fields();
        for name in &context.projection {
            if !needed.contains(name) {
                needed.push(name.clone());
            }
        }

        // Intermediate layout: the needed dataset fields, in dataset order.
        let fields: Vec<Field> = context
            .dataset_schema
            .fields()
            .iter()
            .filter(|f| needed.contains(f.name()))
            .map(|f| f.as_ref().clone().with_nullable(true))
            .collect();
        let conformed_schema = Arc::new(Schema::new(fields));

        // Partition bindings override file columns of the same name.
        let bindings = fragment.partition_expression().known_bindings();
        let physical = fragment.physical_schema();
        let columns: Vec<String> = conformed_schema
            .fields()
            .iter()
            .filter(|f| physical.field_with_name(f.name()).is_ok())
            .filter(|f| !bindings.contains_key(f.name()))
            .map(|f| f.name().clone())
            .collect();

        let request = ReadRequest {
            columns: Some(columns),
            batch_size: context.batch_size,
            predicate: self.filter.clone(),
        };
        debug!(path = %fragment.path(), filter = %self.filter, "opening fragment");
        let file = fragment.source().open()?;
        let reader = fragment.format().open_reader(file, &request)?;

        let projection = context
            .projection
            .iter()
            .filter_map(|name| conformed_schema.index_of(name).ok())
            .collect();
        Ok(TaskState::Reading {
            reader,
            bindings,
            conformed_schema,
            projection,
        })
    }

    /// Shape a physical batch into the conformed layout, filter it and
    /// project it to the output schema.
    fn process(
        &self,
        batch: RecordBatch,
        bindings: &HashMap<String, Scalar>,
        conformed_schema: &SchemaRef,
        projection: &[usize],
    ) -> DatasetResult<RecordBatch> {
        let num_rows = batch.num_rows();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(conformed_schema.fields().len());
        for target in conformed_schema.fields() {
            let name = target.name();
            let column = match (bindings.get(name), batch.column_by_name(name)) {
                (Some(value), _) if value.is_null() => new_null_array(target.data_type(), num_rows),
                (Some(value), _) => value.cast_to(target.data_type())?.to_array(num_rows),
                (None, Some(array)) if array.data_type() == target.data_type() => array.clone(),
                (None, Some(array)) => cast(array, target.data_type())?,
                (None, None) => new_null_array(target.data_type(), num_rows),
            };
            columns.push(column);
        }
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let conformed =
            RecordBatch::try_new_with_options(conformed_schema.clone(), columns, &options)?;

        let filtered = if self.filter.is_true() {
            conformed
        } else {
            let mask = self.filter.evaluate_predicate(&conformed)?;
            filter_record_batch(&conformed, &mask)?
        };

        let columns: Vec<ArrayRef> = projection
            .iter()
            .map(|&index| filtered.column(index).clone())
            .collect();
        let options = RecordBatchOptions::new().with_row_count(Some(filtered.num_rows()));
        Ok(RecordBatch::try_new_with_options(
            self.context.projected_schema.clone(),
            columns,
            &options,
        )?)
    }
}

enum TaskState {
    Pending,
    Reading {
        reader: BatchIterator,
        bindings: HashMap<String, Scalar>,
        conformed_schema: SchemaRef,
        projection: Vec<usize>,
    },
    Done,
}

/// Batches of one running scan task. Fused after the first error.
pub struct ScanTaskBatches {
    task: ScanTask,
    state: TaskState,
}

impl ScanTaskBatches {
    pub fn task(&self) -> &ScanTask {
        &self.task
    }
}

impl Iterator for ScanTaskBatches {
    type Item = DatasetResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                TaskState::Done => return None,
                TaskState::Pending => match self.task.open() {
                    Ok(state) => self.state = state,
                    Err(e) => {
                        self.state = TaskState::Done;
                        return Some(Err(e));
                    }
                },
                TaskState::Reading {
                    reader,
                    bindings,
                    conformed_schema,
                    projection,
                } => match reader.next() {
                    None => {
                        trace!(path = %self.task.fragment.path(), "fragment exhausted");
                        self.state = TaskState::Done;
                        return None;
                    }
                    Some(Err(e)) => {
                        self.state = TaskState::Done;
                        return Some(Err(e));
                    }
                    Some(Ok(batch)) => {
                        match self.task.process(batch, bindings, conformed_schema, projection) {
                            Ok(batch) if batch.num_rows() == 0 => continue,
                            Ok(batch) => return Some(Ok(batch)),
                            Err(e) => {
                                self.state = TaskState::Done;
                                return Some(Err(e));
                            }
                        }
                    }
                },
            }
        }
    }
}
