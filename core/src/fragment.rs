//! Fragments: one physical file of a dataset.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::expression::Expression;
use crate::format::{FileFormatRef, FileSource};

/// One file plus the partition expression derived from its path.
#[derive(Debug)]
pub struct Fragment {
    source: FileSource,
    format: FileFormatRef,
    partition_expression: Expression,
    physical_schema: SchemaRef,
}

pub type FragmentRef = Arc<Fragment>;

impl Fragment {
    pub fn new(
        source: FileSource,
        format: FileFormatRef,
        partition_expression: Expression,
        physical_schema: SchemaRef,
    ) -> Self {
        Self {
            source,
            format,
            partition_expression,
            physical_schema,
        }
    }

    pub fn path(&self) -> &str {
        self.source.path()
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn format(&self) -> &FileFormatRef {
        &self.format
    }

    /// Predicate true for every row of the fragment.
    pub fn partition_expression(&self) -> &Expression {
        &self.partition_expression
    }

    /// Schema of the file itself, without partition fields.
    pub fn physical_schema(&self) -> &SchemaRef {
        &self.physical_schema
    }
}
