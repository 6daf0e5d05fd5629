//! Data sources: collections of fragments sharing a schema.

use std::fmt::Debug;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use tracing::debug;

use crate::error::DatasetResult;
use crate::expression::Expression;
use crate::format::{FileFormatRef, FileSource};
use crate::fragment::{Fragment, FragmentRef};
use crate::schema::unify_schemas;

pub type DataSourceRef = Arc<dyn DataSource>;

/// An enumerable collection of fragments, or of child sources.
pub trait DataSource: Send + Sync + Debug {
    /// The name identifying the kind of source.
    fn type_name(&self) -> &str;

    fn schema(&self) -> SchemaRef;

    /// Predicate true for every row of every fragment in this source.
    fn partition_expression(&self) -> &Expression;

    /// Fragments owned directly by this source.
    fn own_fragments(&self) -> &[FragmentRef];

    /// Child sources whose fragments belong to this source too.
    fn children(&self) -> &[DataSourceRef] {
        &[]
    }

    /// Every fragment of this source and its children.
    fn fragments(&self) -> Vec<FragmentRef> {
        let mut out: Vec<FragmentRef> = self.own_fragments().to_vec();
        for child in self.children() {
            out.extend(child.fragments());
        }
        out
    }

    /// Fragments that may contain rows matching `filter`, each paired with
    /// the filter simplified against what is known about the fragment.
    ///
    /// Whole sources are skipped when their own partition expression
    /// contradicts the filter; fragments are skipped the same way using
    /// their path-derived partition expression. Nothing is opened.
    fn candidate_fragments(&self, filter: &Expression) -> DatasetResult<Vec<(FragmentRef, Expression)>> {
        let filter = filter.simplify(self.partition_expression())?;
        if !filter.is_satisfiable() {
            debug!(source = %self.type_name(), "pruned data source");
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for fragment in self.own_fragments() {
            let residual = filter.simplify(fragment.partition_expression())?;
            if residual.is_satisfiable() {
                out.push((fragment.clone(), residual));
            } else {
                debug!(
                    path = %fragment.path(),
                    partition = %fragment.partition_expression(),
                    "pruned fragment"
                );
            }
        }
        for child in self.children() {
            out.extend(child.candidate_fragments(&filter)?);
        }
        Ok(out)
    }
}

/// Fragments discovered on a filesystem.
#[derive(Debug)]
pub struct FileSystemDataSource {
    schema: SchemaRef,
    fragments: Vec<FragmentRef>,
    partition_expression: Expression,
}

impl FileSystemDataSource {
    pub fn new(schema: SchemaRef, fragments: Vec<FragmentRef>) -> Self {
        Self {
            schema,
            fragments,
            partition_expression: Expression::TRUE,
        }
    }

    pub fn with_partition_expression(mut self, expr: Expression) -> Self {
        self.partition_expression = expr;
        self
    }
}

impl DataSource for FileSystemDataSource {
    fn type_name(&self) -> &str {
        "filesystem"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn own_fragments(&self) -> &[FragmentRef] {
        &self.fragments
    }
}

/// Aggregates child sources, e.g. several roots in different layouts.
#[derive(Debug)]
pub struct TreeDataSource {
    schema: SchemaRef,
    children: Vec<DataSourceRef>,
    partition_expression: Expression,
}

impl TreeDataSource {
    /// Combine children, unifying their schemas.
    pub fn try_new(children: Vec<DataSourceRef>) -> DatasetResult<Self> {
        let schemas: Vec<SchemaRef> = children.iter().map(|c| c.schema()).collect();
        let schema = unify_schemas(schemas.iter().map(|s| s.as_ref()))?;
        Ok(Self {
            schema: Arc::new(schema),
            children,
            partition_expression: Expression::TRUE,
        })
    }

    pub fn with_partition_expression(mut self, expr: Expression) -> Self {
        self.partition_expression = expr;
        self
    }
}

impl DataSource for TreeDataSource {
    fn type_name(&self) -> &str {
        "tree"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn own_fragments(&self) -> &[FragmentRef] {
        &[]
    }

    fn children(&self) -> &[DataSourceRef] {
        &self.children
    }
}

/// Fragments backed by in-memory buffers.
#[derive(Debug)]
pub struct InMemoryDataSource {
    schema: SchemaRef,
    fragments: Vec<FragmentRef>,
    partition_expression: Expression,
}

impl InMemoryDataSource {
    /// Build from named buffers and their partition expressions, inspecting
    /// each buffer with `format`.
    pub fn try_new(
        format: FileFormatRef,
        buffers: Vec<(String, Bytes, Expression)>,
    ) -> DatasetResult<Self> {
        let mut fragments = Vec::with_capacity(buffers.len());
        for (name, data, partition_expression) in buffers {
            let source = FileSource::from_buffer(name, data);
            let physical_schema = format.inspect(&source)?;
            fragments.push(Arc::new(Fragment::new(
                source,
                format.clone(),
                partition_expression,
                physical_schema,
            )));
        }
        let schema = unify_schemas(fragments.iter().map(|f| f.physical_schema().as_ref()))?;
        Ok(Self {
            schema: Arc::new(schema),
            fragments,
            partition_expression: Expression::TRUE,
        })
    }

    pub fn with_partition_expression(mut self, expr: Expression) -> Self {
        self.partition_expression = expr;
        self
    }
}

impl DataSource for InMemoryDataSource {
    fn type_name(&self) -> &str {
        "in_memory"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    fn own_fragments(&self) -> &[FragmentRef] {
        &self.fragments
    }
}
