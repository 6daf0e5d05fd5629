//! Parquet file format.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use bytes::{Buf, Bytes};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder,
};
use parquet::errors::ParquetError;
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::reader::{ChunkReader, Length};
use parquet::file::statistics::Statistics;
use serde::{Deserialize, Serialize};
use strata_common::ReadableFile;
use tracing::debug;

use super::{BatchIterator, FileFormat, FileSource, ReadRequest};
use crate::error::DatasetResult;
use crate::expression::{
    Expression, and_all, field, greater_equal, is_valid, less_equal, lit, not,
};
use crate::scalar::Scalar;

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// Parquet reading options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParquetOptions {
    /// Rows per batch. Falls back to the scan's batch size when unset.
    pub batch_size: Option<usize>,
    /// String and binary columns to read dictionary encoded.
    pub dictionary_columns: Vec<String>,
    /// Skip row groups whose min/max statistics contradict the filter.
    pub use_row_group_statistics: bool,
}

impl Default for ParquetOptions {
    fn default() -> Self {
        Self {
            batch_size: None,
            dictionary_columns: Vec::new(),
            use_row_group_statistics: true,
        }
    }
}

/// Reads Parquet files through the `parquet` crate's Arrow reader.
#[derive(Debug, Clone, Default)]
pub struct ParquetFileFormat {
    options: ParquetOptions,
}

impl ParquetFileFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ParquetOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParquetOptions {
        &self.options
    }

    /// Apply dictionary encoding to the configured columns.
    fn read_schema(&self, file_schema: &Schema) -> Schema {
        let fields: Vec<Field> = file_schema
            .fields()
            .iter()
            .map(|f| {
                let dictionary = self.options.dictionary_columns.contains(f.name())
                    && matches!(
                        f.data_type(),
                        DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary
                    );
                if dictionary {
                    f.as_ref().clone().with_data_type(DataType::Dictionary(
                        Box::new(DataType::Int32),
                        Box::new(f.data_type().clone()),
                    ))
                } else {
                    f.as_ref().clone()
                }
            })
            .collect();
        Schema::new_with_metadata(fields, file_schema.metadata().clone())
    }

    fn load_metadata(&self, reader: &ParquetFileReader) -> DatasetResult<ArrowReaderMetadata> {
        let metadata = ArrowReaderMetadata::load(reader, ArrowReaderOptions::new())?;
        if self.options.dictionary_columns.is_empty() {
            return Ok(metadata);
        }
        let schema = self.read_schema(metadata.schema());
        if &schema == metadata.schema().as_ref() {
            return Ok(metadata);
        }
        let options = ArrowReaderOptions::new().with_schema(Arc::new(schema));
        Ok(ArrowReaderMetadata::try_new(
            metadata.metadata().clone(),
            options,
        )?)
    }
}

impl FileFormat for ParquetFileFormat {
    fn type_name(&self) -> &str {
        "parquet"
    }

    fn is_supported(&self, source: &FileSource) -> DatasetResult<bool> {
        let file = source.open()?;
        let size = file.size();
        if size < 12 {
            return Ok(false);
        }
        let header = file.read_range(0..4)?;
        let footer = file.read_range(size - 4..size)?;
        Ok(header.as_ref() == PARQUET_MAGIC && footer.as_ref() == PARQUET_MAGIC)
    }

    fn inspect(&self, source: &FileSource) -> DatasetResult<SchemaRef> {
        let reader = ParquetFileReader::new(source.open()?);
        let metadata = self.load_metadata(&reader)?;
        Ok(metadata.schema().clone())
    }

    fn open_reader(
        &self,
        file: Arc<dyn ReadableFile>,
        request: &ReadRequest,
    ) -> DatasetResult<BatchIterator> {
        let path = file.path().to_string();
        let reader = ParquetFileReader::new(file);
        let metadata = self.load_metadata(&reader)?;
        let schema = metadata.schema().clone();
        let mut builder = ParquetRecordBatchReaderBuilder::new_with_metadata(reader, metadata);

        if let Some(columns) = &request.columns {
            let indices: Vec<usize> = schema
                .fields()
                .iter()
                .enumerate()
                .filter(|(_, f)| columns.contains(f.name()))
                .map(|(i, _)| i)
                .collect();
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
            builder = builder.with_projection(mask);
        }

        if self.options.use_row_group_statistics && !request.predicate.is_true() {
            let row_groups = builder.metadata().row_groups();
            let total = row_groups.len();
            let selected: Vec<usize> = row_groups
                .iter()
                .enumerate()
                .filter(|(_, rg)| row_group_may_match(&request.predicate, rg, &schema))
                .map(|(i, _)| i)
                .collect();
            if selected.len() < total {
                debug!(
                    path = %path,
                    skipped = total - selected.len(),
                    total,
                    "skipping row groups by statistics"
                );
            }
            builder = builder.with_row_groups(selected);
        }

        let batch_size = self.options.batch_size.unwrap_or(request.batch_size).max(1);
        let reader = builder.with_batch_size(batch_size).build()?;
        Ok(Box::new(reader.map(|batch| batch.map_err(Into::into))))
    }
}

/// Whether any row of the row group may satisfy `predicate`.
fn row_group_may_match(predicate: &Expression, row_group: &RowGroupMetaData, schema: &Schema) -> bool {
    let guarantee = row_group_guarantee(row_group, schema);
    if guarantee.is_true() {
        return true;
    }
    match predicate.simplify(&guarantee) {
        Ok(simplified) => simplified.is_satisfiable(),
        Err(_) => true,
    }
}

/// Facts the statistics establish for every row of a row group.
///
/// Only top-level columns are used. A column contributes a `min <= c <= max`
/// range when it has no nulls and `not(is_valid(c))` when it is all null.
fn row_group_guarantee(row_group: &RowGroupMetaData, schema: &Schema) -> Expression {
    let mut conjuncts = Vec::new();
    let num_rows = row_group.num_rows().max(0) as u64;
    for column in row_group.columns() {
        let path = column.column_path().parts();
        if path.len() != 1 {
            continue;
        }
        let name = &path[0];
        let Ok(target) = schema.field_with_name(name) else {
            continue;
        };
        let Some(stats) = column.statistics() else {
            continue;
        };
        match stats.null_count_opt() {
            Some(nulls) if nulls == num_rows && num_rows > 0 => {
                conjuncts.push(not(is_valid(field(name))));
            }
            Some(0) => {
                if let Some((min, max)) = min_max(stats, target.data_type()) {
                    conjuncts.push(greater_equal(field(name), lit(min)));
                    conjuncts.push(less_equal(field(name), lit(max)));
                }
            }
            _ => {}
        }
    }
    and_all(conjuncts)
}

fn min_max(stats: &Statistics, data_type: &DataType) -> Option<(Scalar, Scalar)> {
    let (min, max) = match (stats, data_type) {
        (Statistics::Boolean(s), DataType::Boolean) => {
            (Scalar::from(*s.min_opt()?), Scalar::from(*s.max_opt()?))
        }
        (Statistics::Int32(s), DataType::Int8 | DataType::Int16 | DataType::Int32) => {
            let min = Scalar::from(*s.min_opt()?).cast_to(data_type).ok()?;
            let max = Scalar::from(*s.max_opt()?).cast_to(data_type).ok()?;
            (min, max)
        }
        (Statistics::Int32(s), DataType::Date32) => (
            Scalar::Date32 {
                days: Some(*s.min_opt()?),
            },
            Scalar::Date32 {
                days: Some(*s.max_opt()?),
            },
        ),
        (Statistics::Int64(s), DataType::Int64) => {
            (Scalar::from(*s.min_opt()?), Scalar::from(*s.max_opt()?))
        }
        (Statistics::ByteArray(s), DataType::Utf8) => {
            if !s.min_is_exact() || !s.max_is_exact() {
                return None;
            }
            let min = s.min_opt()?.as_utf8().ok()?;
            let max = s.max_opt()?.as_utf8().ok()?;
            (Scalar::from(min), Scalar::from(max))
        }
        // Float statistics leave NaN out, and NaN sorts above every number
        // in filter evaluation, so they bound nothing.
        _ => return None,
    };
    Some((min, max))
}

/// Adapts a [`ReadableFile`] to the parquet reader's random access interface.
struct ParquetFileReader {
    file: Arc<dyn ReadableFile>,
}

impl ParquetFileReader {
    fn new(file: Arc<dyn ReadableFile>) -> Self {
        Self { file }
    }
}

impl Length for ParquetFileReader {
    fn len(&self) -> u64 {
        self.file.size()
    }
}

impl ChunkReader for ParquetFileReader {
    type T = bytes::buf::Reader<Bytes>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        let length = self.file.size().saturating_sub(start);
        Ok(self.get_bytes(start, length as usize)?.reader())
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<Bytes> {
        self.file
            .read_range(start..start + length as u64)
            .map_err(|e| ParquetError::External(Box::new(e)))
    }
}
