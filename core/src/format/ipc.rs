//! Arrow IPC file format.

use std::io::Cursor;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader;
use strata_common::ReadableFile;

use super::{BatchIterator, FileFormat, FileSource, ReadRequest, rebatch};
use crate::error::DatasetResult;

const ARROW_MAGIC: &[u8; 6] = b"ARROW1";

/// Reads Arrow IPC files. The whole file is fetched before decoding.
#[derive(Debug, Clone, Default)]
pub struct IpcFileFormat;

impl IpcFileFormat {
    pub fn new() -> Self {
        Self
    }
}

impl FileFormat for IpcFileFormat {
    fn type_name(&self) -> &str {
        "ipc"
    }

    fn is_supported(&self, source: &FileSource) -> DatasetResult<bool> {
        let file = source.open()?;
        let size = file.size();
        if size < 2 * ARROW_MAGIC.len() as u64 {
            return Ok(false);
        }
        let header = file.read_range(0..ARROW_MAGIC.len() as u64)?;
        let footer = file.read_range(size - ARROW_MAGIC.len() as u64..size)?;
        Ok(header.as_ref() == ARROW_MAGIC && footer.as_ref() == ARROW_MAGIC)
    }

    fn inspect(&self, source: &FileSource) -> DatasetResult<SchemaRef> {
        let data = source.open()?.read_all()?;
        let reader = FileReader::try_new(Cursor::new(data), None)?;
        Ok(reader.schema())
    }

    fn open_reader(
        &self,
        file: Arc<dyn ReadableFile>,
        request: &ReadRequest,
    ) -> DatasetResult<BatchIterator> {
        let data = file.read_all()?;
        let projection = match &request.columns {
            Some(columns) => {
                let schema = FileReader::try_new(Cursor::new(data.clone()), None)?.schema();
                let indices: Vec<usize> = schema
                    .fields()
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| columns.contains(f.name()))
                    .map(|(i, _)| i)
                    .collect();
                Some(indices)
            }
            None => None,
        };
        let reader = FileReader::try_new(Cursor::new(data), projection)?;
        Ok(rebatch(
            reader.map(|batch| batch.map_err(Into::into)),
            request.batch_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::writer::FileWriter;
    use arrow::record_batch::RecordBatch;
    use bytes::Bytes;

    fn ipc_bytes() -> Bytes {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, false),
            Field::new("v", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
                Arc::new(StringArray::from(vec!["a", "b", "c", "d", "e"])),
            ],
        )
        .unwrap();
        let mut buffer = Vec::new();
        let mut writer = FileWriter::try_new(&mut buffer, &schema).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
        drop(writer);
        Bytes::from(buffer)
    }

    #[test]
    fn test_is_supported_and_inspect() {
        let format = IpcFileFormat::new();
        let source = FileSource::from_buffer("a.arrow", ipc_bytes());
        assert!(format.is_supported(&source).unwrap());
        assert_eq!(format.inspect(&source).unwrap().fields().len(), 2);

        let other = FileSource::from_buffer("b.arrow", Bytes::from_static(b"PAR1....PAR1"));
        assert!(!format.is_supported(&other).unwrap());
    }

    #[test]
    fn test_projection_and_rebatch() {
        let format = IpcFileFormat::new();
        let source = FileSource::from_buffer("a.arrow", ipc_bytes());
        let request = ReadRequest {
            columns: Some(vec!["v".to_string()]),
            batch_size: 2,
            predicate: crate::expression::Expression::TRUE,
        };
        let batches: Vec<RecordBatch> = format
            .open_reader(source.open().unwrap(), &request)
            .unwrap()
            .collect::<DatasetResult<_>>()
            .unwrap();
        assert_eq!(
            batches.iter().map(|b| b.num_rows()).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert!(batches.iter().all(|b| b.num_columns() == 1));
        assert_eq!(batches[0].schema().field(0).name(), "v");
    }
}
