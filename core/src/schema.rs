//! Schema unification and projection helpers.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{Field, FieldRef, Schema, SchemaRef};

use crate::error::{DatasetError, DatasetResult};

/// Merge schemas by nullability widening.
///
/// Fields with the same name must have the same type. A field is nullable in
/// the result if it is nullable anywhere or missing from any input. The
/// inputs are put in a canonical order first, so the result (or the
/// conflict reported) does not depend on the order schemas were discovered.
pub fn unify_schemas<'a>(schemas: impl IntoIterator<Item = &'a Schema>) -> DatasetResult<Schema> {
    let mut inputs: Vec<&Schema> = schemas.into_iter().collect();
    inputs.sort_by_cached_key(|schema| canonical_key(schema));

    let mut fields: Vec<Field> = Vec::new();
    let mut seen: Vec<usize> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for schema in &inputs {
        for field in schema.fields() {
            match index.get(field.name()) {
                Some(&i) => {
                    let existing = &fields[i];
                    if existing.data_type() != field.data_type() {
                        return Err(DatasetError::SchemaConflict(format!(
                            "field '{}' has type {} in one schema and {} in another",
                            field.name(),
                            existing.data_type(),
                            field.data_type()
                        )));
                    }
                    if field.is_nullable() && !existing.is_nullable() {
                        fields[i] = existing.clone().with_nullable(true);
                    }
                    seen[i] += 1;
                }
                None => {
                    index.insert(field.name().clone(), fields.len());
                    fields.push(field.as_ref().clone());
                    seen.push(1);
                }
            }
        }
    }

    let total = inputs.len();
    let fields: Vec<Field> = fields
        .into_iter()
        .zip(seen)
        .map(|(field, count)| {
            if count < total {
                field.with_nullable(true)
            } else {
                field
            }
        })
        .collect();
    Ok(Schema::new(fields))
}

fn canonical_key(schema: &Schema) -> Vec<(String, String, bool)> {
    schema
        .fields()
        .iter()
        .map(|f| (f.name().clone(), f.data_type().to_string(), f.is_nullable()))
        .collect()
}

/// Append partition fields to a data schema.
///
/// A partition field that also appears in the data must have the same type.
/// While scanning, the partition value replaces the file column.
pub fn append_partition_fields(schema: &Schema, partition: &Schema) -> DatasetResult<Schema> {
    let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
    for field in partition.fields() {
        match schema.field_with_name(field.name()) {
            Ok(existing) if existing.data_type() != field.data_type() => {
                return Err(DatasetError::SchemaConflict(format!(
                    "partition field '{}' of type {} conflicts with file column of type {}",
                    field.name(),
                    field.data_type(),
                    existing.data_type()
                )));
            }
            Ok(_) => {}
            Err(_) => fields.push(field.clone()),
        }
    }
    Ok(Schema::new(fields))
}

/// The schema of the given columns, in the given order.
pub fn project_schema(schema: &Schema, columns: &[String]) -> DatasetResult<SchemaRef> {
    let mut fields = Vec::with_capacity(columns.len());
    for name in columns {
        let field = schema
            .field_with_name(name)
            .map_err(|_| DatasetError::UnknownField(name.clone()))?;
        fields.push(field.clone());
    }
    Ok(Arc::new(Schema::new(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    fn schema(fields: &[(&str, DataType, bool)]) -> Schema {
        Schema::new(
            fields
                .iter()
                .map(|(name, dt, nullable)| Field::new(*name, dt.clone(), *nullable))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_unify_widens_nullability() {
        let a = schema(&[("id", DataType::Int32, false), ("val", DataType::Float64, false)]);
        let b = schema(&[("id", DataType::Int32, true), ("val", DataType::Float64, false)]);
        let unified = unify_schemas([&a, &b]).unwrap();
        assert!(unified.field_with_name("id").unwrap().is_nullable());
        assert!(!unified.field_with_name("val").unwrap().is_nullable());
    }

    #[test]
    fn test_unify_missing_fields_become_nullable() {
        let a = schema(&[("id", DataType::Int32, false)]);
        let b = schema(&[("id", DataType::Int32, false), ("extra", DataType::Utf8, false)]);
        let unified = unify_schemas([&a, &b]).unwrap();
        assert_eq!(unified.fields().len(), 2);
        assert!(!unified.field_with_name("id").unwrap().is_nullable());
        assert!(unified.field_with_name("extra").unwrap().is_nullable());
    }

    #[test]
    fn test_unify_conflict() {
        let a = schema(&[("id", DataType::Int32, false)]);
        let b = schema(&[("id", DataType::Utf8, false)]);
        assert!(matches!(
            unify_schemas([&a, &b]),
            Err(DatasetError::SchemaConflict(_))
        ));
    }

    #[test]
    fn test_unify_is_order_independent() {
        let a = schema(&[("id", DataType::Int32, false), ("b", DataType::Utf8, true)]);
        let b = schema(&[("z", DataType::Int64, false), ("id", DataType::Int32, true)]);
        let c = schema(&[("id", DataType::Int32, false)]);

        let expected = unify_schemas([&a, &b, &c]).unwrap();
        let orders: [[&Schema; 3]; 5] = [
            [&a, &c, &b],
            [&b, &a, &c],
            [&b, &c, &a],
            [&c, &a, &b],
            [&c, &b, &a],
        ];
        for order in orders {
            assert_eq!(unify_schemas(order).unwrap(), expected);
        }

        let ab = unify_schemas([&a, &b]).unwrap();
        let bc = unify_schemas([&b, &c]).unwrap();
        let left = unify_schemas([&ab, &c]).unwrap();
        let right = unify_schemas([&a, &bc]).unwrap();
        let names = |s: &Schema| {
            let mut v: Vec<(String, bool)> = s
                .fields()
                .iter()
                .map(|f| (f.name().clone(), f.is_nullable()))
                .collect();
            v.sort();
            v
        };
        assert_eq!(names(&left), names(&right));
    }

    #[test]
    fn test_unify_empty() {
        let unified = unify_schemas(std::iter::empty()).unwrap();
        assert!(unified.fields().is_empty());
    }

    #[test]
    fn test_append_partition_fields() {
        let data = schema(&[("id", DataType::Int32, false)]);
        let partition = schema(&[("region", DataType::Utf8, true)]);
        let combined = append_partition_fields(&data, &partition).unwrap();
        assert_eq!(combined.fields().len(), 2);
        assert_eq!(combined.field(1).name(), "region");

        let clash = schema(&[("id", DataType::Utf8, true)]);
        assert!(matches!(
            append_partition_fields(&data, &clash),
            Err(DatasetError::SchemaConflict(_))
        ));
    }

    #[test]
    fn test_project_schema() {
        let data = schema(&[("a", DataType::Int32, false), ("b", DataType::Utf8, true)]);
        let projected = project_schema(&data, &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(projected.field(0).name(), "b");
        assert!(matches!(
            project_schema(&data, &["c".to_string()]),
            Err(DatasetError::UnknownField(_))
        ));
    }
}
