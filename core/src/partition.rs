//! Partition schemes: deriving partition expressions from file paths.
//!
//! A scheme turns each directory segment of a path (relative to the
//! dataset's partition base directory) into an expression, and the
//! conjunction of those expressions becomes the fragment's partition
//! expression. Schemes are either given up front or produced by a
//! [`PartitionSchemeDiscovery`] that inspects the discovered paths first.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tracing::debug;

use crate::error::{DatasetError, DatasetResult};
use crate::expression::{Expression, and_all, equal, field, is_valid, lit, not};
use crate::scalar::Scalar;

/// Value of a Hive partition key that is null.
pub const NULL_PARTITION_VALUE: &str = "__HIVE_DEFAULT_PARTITION__";

const RFC3986_PART: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Maps the directory segments of a path to a partition expression.
pub trait PartitionScheme: Send + Sync + Debug {
    /// The name identifying the kind of scheme.
    fn type_name(&self) -> &str;

    /// Schema of the partition fields this scheme can produce.
    fn schema(&self) -> SchemaRef;

    /// Parse one directory segment found at depth `index`.
    fn parse_segment(&self, segment: &str, index: usize) -> DatasetResult<Expression>;

    /// Parse every directory segment of a relative path. The final component
    /// (the file name) is never parsed.
    fn parse(&self, path: &str) -> DatasetResult<Expression> {
        let mut conjuncts = Vec::new();
        for (index, segment) in directory_segments(path).into_iter().enumerate() {
            let expr = self.parse_segment(segment, index).map_err(|e| match e {
                DatasetError::ParseError(message) => {
                    DatasetError::ParseError(format!("{} in path '{}'", message, path))
                }
                other => other,
            })?;
            if !expr.is_true() {
                conjuncts.push(expr);
            }
        }
        Ok(and_all(conjuncts))
    }
}

pub type PartitionSchemeRef = Arc<dyn PartitionScheme>;

/// Directory components of a relative path, excluding the file name.
pub fn directory_segments(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    segments
}

/// No partitioning: every path yields `true`.
#[derive(Debug, Clone, Default)]
pub struct DefaultPartitionScheme;

impl PartitionScheme for DefaultPartitionScheme {
    fn type_name(&self) -> &str {
        "default"
    }

    fn schema(&self) -> SchemaRef {
        Arc::new(Schema::empty())
    }

    fn parse_segment(&self, _segment: &str, _index: usize) -> DatasetResult<Expression> {
        Ok(Expression::TRUE)
    }
}

/// Positional partitioning: segment `i` holds the value of field `i`.
///
/// `2009/11/part-0.parquet` with schema `(year: Int32, month: Int32)` yields
/// `year == 2009 and month == 11`. Segments beyond the schema are ignored.
#[derive(Debug, Clone)]
pub struct SchemaPartitionScheme {
    schema: SchemaRef,
}

impl SchemaPartitionScheme {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }
}

impl PartitionScheme for SchemaPartitionScheme {
    fn type_name(&self) -> &str {
        "schema"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn parse_segment(&self, segment: &str, index: usize) -> DatasetResult<Expression> {
        let Some(target) = self.schema.fields().get(index) else {
            return Ok(Expression::TRUE);
        };
        let value = Scalar::parse(target.data_type(), segment)?;
        Ok(equal(field(target.name()), Expression::Literal(value)))
    }
}

/// Hive-style partitioning: `key=value` segments anywhere in the path.
///
/// Keys missing from the path are simply absent from the expression, and
/// keys not in the schema are ignored. Values are percent-decoded; an empty
/// value or [`NULL_PARTITION_VALUE`] means the key is null. Malformed
/// segments (no `=`, empty key, unparseable value) fail only in strict mode
/// and are otherwise left out of the expression.
#[derive(Debug, Clone)]
pub struct HivePartitionScheme {
    schema: SchemaRef,
    strict: bool,
}

impl HivePartitionScheme {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            strict: false,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Render the bindings of a partition expression as `key=value` segments
    /// in schema order. Unbound keys are omitted.
    pub fn format(&self, expr: &Expression) -> DatasetResult<String> {
        let bindings = expr.known_bindings();
        let mut segments = Vec::new();
        for target in self.schema.fields() {
            let Some(value) = bindings.get(target.name()) else {
                continue;
            };
            let text = if value.is_null() {
                NULL_PARTITION_VALUE.to_string()
            } else {
                let value = value.cast_to(target.data_type())?;
                utf8_percent_encode(&value.to_string(), RFC3986_PART).to_string()
            };
            segments.push(format!(
                "{}={}",
                utf8_percent_encode(target.name(), RFC3986_PART),
                text
            ));
        }
        Ok(segments.join("/"))
    }

    fn malformed(&self, segment: &str, reason: &str) -> DatasetResult<Expression> {
        if self.strict {
            return Err(DatasetError::ParseError(format!(
                "malformed partition segment '{}': {}",
                segment, reason
            )));
        }
        debug!(segment = %segment, reason = %reason, "ignoring partition segment");
        Ok(Expression::TRUE)
    }
}

/// Split a `key=value` segment on the first `=` and percent-decode both sides.
fn parse_hive_segment(segment: &str) -> Result<(String, String), &'static str> {
    let (key, value) = segment.split_once('=').ok_or("expected key=value")?;
    let key = percent_decode_str(key)
        .decode_utf8()
        .map_err(|_| "key is not valid UTF-8")?;
    if key.is_empty() {
        return Err("empty key");
    }
    let value = percent_decode_str(value)
        .decode_utf8()
        .map_err(|_| "value is not valid UTF-8")?;
    Ok((key.into_owned(), value.into_owned()))
}

impl PartitionScheme for HivePartitionScheme {
    fn type_name(&self) -> &str {
        "hive"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn parse_segment(&self, segment: &str, _index: usize) -> DatasetResult<Expression> {
        let (key, value) = match parse_hive_segment(segment) {
            Ok(pair) => pair,
            Err(reason) => return self.malformed(segment, reason),
        };
        let Ok(target) = self.schema.field_with_name(&key) else {
            return Ok(Expression::TRUE);
        };
        if value.is_empty() || value == NULL_PARTITION_VALUE {
            return Ok(not(is_valid(field(key))));
        }
        match Scalar::parse(target.data_type(), &value) {
            Ok(parsed) => Ok(equal(field(key), Expression::Literal(parsed))),
            Err(e) => self.malformed(segment, &e.to_string()),
        }
    }
}

/// Looks each segment up in a per-depth dictionary of expressions.
/// Unknown segments yield `true`.
#[derive(Debug, Clone)]
pub struct SegmentDictionaryPartitionScheme {
    schema: SchemaRef,
    dictionaries: Vec<HashMap<String, Expression>>,
}

impl SegmentDictionaryPartitionScheme {
    pub fn new(schema: SchemaRef, dictionaries: Vec<HashMap<String, Expression>>) -> Self {
        Self {
            schema,
            dictionaries,
        }
    }
}

impl PartitionScheme for SegmentDictionaryPartitionScheme {
    fn type_name(&self) -> &str {
        "segment_dictionary"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn parse_segment(&self, segment: &str, index: usize) -> DatasetResult<Expression> {
        Ok(self
            .dictionaries
            .get(index)
            .and_then(|d| d.get(segment))
            .cloned()
            .unwrap_or(Expression::TRUE))
    }
}

pub type SegmentParser = Arc<dyn Fn(&str, usize) -> DatasetResult<Expression> + Send + Sync>;

/// Delegates segment parsing to a closure.
#[derive(Clone)]
pub struct FunctionPartitionScheme {
    schema: SchemaRef,
    parser: SegmentParser,
}

impl FunctionPartitionScheme {
    pub fn new(schema: SchemaRef, parser: SegmentParser) -> Self {
        Self { schema, parser }
    }
}

impl Debug for FunctionPartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionPartitionScheme")
            .field("schema", &self.schema)
            .field("parser", &"<function>")
            .finish()
    }
}

impl PartitionScheme for FunctionPartitionScheme {
    fn type_name(&self) -> &str {
        "function"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn parse_segment(&self, segment: &str, index: usize) -> DatasetResult<Expression> {
        (self.parser)(segment, index)
    }
}

/// Infers a partition schema from paths, then builds the scheme for it.
pub trait PartitionSchemeDiscovery: Send + Sync + Debug {
    /// Infer the partition schema from relative paths.
    fn inspect(&self, paths: &[String]) -> DatasetResult<SchemaRef>;

    /// Build the scheme for an inferred (or user adjusted) schema.
    fn finish(&self, schema: SchemaRef) -> DatasetResult<PartitionSchemeRef>;
}

/// Discovers the keys and value types of Hive-style paths.
#[derive(Debug, Clone, Default)]
pub struct HivePartitionSchemeDiscovery {
    strict: bool,
}

impl HivePartitionSchemeDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

impl PartitionSchemeDiscovery for HivePartitionSchemeDiscovery {
    fn inspect(&self, paths: &[String]) -> DatasetResult<SchemaRef> {
        let mut keys: Vec<String> = Vec::new();
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for path in paths {
            for segment in directory_segments(path) {
                let (key, value) = match parse_hive_segment(segment) {
                    Ok(pair) => pair,
                    Err(reason) if self.strict => {
                        return Err(DatasetError::ParseError(format!(
                            "malformed partition segment '{}': {} in path '{}'",
                            segment, reason, path
                        )));
                    }
                    Err(reason) => {
                        debug!(segment = %segment, reason = %reason, "ignoring partition segment");
                        continue;
                    }
                };
                if !values.contains_key(&key) {
                    keys.push(key.clone());
                }
                let entry = values.entry(key).or_default();
                if !value.is_empty() && value != NULL_PARTITION_VALUE {
                    entry.push(value);
                }
            }
        }
        let fields: Vec<Field> = keys
            .iter()
            .map(|key| {
                let observed = values.get(key).map(Vec::as_slice).unwrap_or_default();
                Field::new(key, infer_partition_type(observed), true)
            })
            .collect();
        Ok(Arc::new(Schema::new(fields)))
    }

    fn finish(&self, schema: SchemaRef) -> DatasetResult<PartitionSchemeRef> {
        Ok(Arc::new(
            HivePartitionScheme::new(schema).with_strict(self.strict),
        ))
    }
}

/// Discovers the value types of positional segments with known field names.
#[derive(Debug, Clone)]
pub struct SchemaPartitionSchemeDiscovery {
    field_names: Vec<String>,
}

impl SchemaPartitionSchemeDiscovery {
    pub fn new(field_names: Vec<String>) -> Self {
        Self { field_names }
    }
}

impl PartitionSchemeDiscovery for SchemaPartitionSchemeDiscovery {
    fn inspect(&self, paths: &[String]) -> DatasetResult<SchemaRef> {
        let mut values: Vec<Vec<String>> = vec![Vec::new(); self.field_names.len()];
        for path in paths {
            for (index, segment) in directory_segments(path).into_iter().enumerate() {
                if let Some(observed) = values.get_mut(index) {
                    observed.push(segment.to_string());
                }
            }
        }
        let fields: Vec<Field> = self
            .field_names
            .iter()
            .zip(values.iter())
            .map(|(name, observed)| Field::new(name, infer_partition_type(observed), true))
            .collect();
        Ok(Arc::new(Schema::new(fields)))
    }

    fn finish(&self, schema: SchemaRef) -> DatasetResult<PartitionSchemeRef> {
        Ok(Arc::new(SchemaPartitionScheme::new(schema)))
    }
}

/// `Int32` when every value is a canonical integer that fits, `Int64` when
/// they fit there, otherwise `Utf8`. Values with leading zeros stay strings
/// so that `month=01` keeps its spelling.
fn infer_partition_type(values: &[String]) -> DataType {
    if values.is_empty() || !values.iter().all(|v| is_canonical_integer(v)) {
        return DataType::Utf8;
    }
    if values.iter().all(|v| v.parse::<i32>().is_ok()) {
        DataType::Int32
    } else if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        DataType::Int64
    } else {
        DataType::Utf8
    }
}

fn is_canonical_integer(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
}

/// How discovery obtains the partition scheme.
#[derive(Debug, Clone)]
pub enum Partitioning {
    /// A fixed scheme.
    Scheme(PartitionSchemeRef),
    /// A scheme inferred from the discovered paths.
    Discovery(Arc<dyn PartitionSchemeDiscovery>),
}

impl Partitioning {
    /// Discover Hive-style `key=value` partitioning.
    pub fn hive(strict: bool) -> Self {
        Partitioning::Discovery(Arc::new(
            HivePartitionSchemeDiscovery::new().with_strict(strict),
        ))
    }

    /// Discover positional partitioning with the given field names.
    pub fn directory(field_names: Vec<String>) -> Self {
        Partitioning::Discovery(Arc::new(SchemaPartitionSchemeDiscovery::new(field_names)))
    }

    pub fn scheme(scheme: impl PartitionScheme + 'static) -> Self {
        Partitioning::Scheme(Arc::new(scheme))
    }
}

impl Default for Partitioning {
    fn default() -> Self {
        Partitioning::Scheme(Arc::new(DefaultPartitionScheme))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{and, less};

    fn hive_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("year", DataType::Int32, true),
            Field::new("month", DataType::Utf8, true),
        ]))
    }

    #[test]
    fn test_directory_segments() {
        assert_eq!(
            directory_segments("year=2020/month=01/part-0.parquet"),
            vec!["year=2020", "month=01"]
        );
        assert!(directory_segments("part-0.parquet").is_empty());
        assert_eq!(directory_segments("/a//b/f"), vec!["a", "b"]);
    }

    #[test]
    fn test_default_scheme() {
        let scheme = DefaultPartitionScheme;
        assert!(scheme.parse("a=1/b/c.parquet").unwrap().is_true());
        assert_eq!(scheme.type_name(), "default");
    }

    #[test]
    fn test_schema_scheme() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("year", DataType::Int32, true),
            Field::new("month", DataType::Int32, true),
        ]));
        let scheme = SchemaPartitionScheme::new(schema);
        assert_eq!(
            scheme.parse("2009/11/extra/part-0.parquet").unwrap(),
            and(
                equal(field("year"), lit(2009)),
                equal(field("month"), lit(11))
            )
        );
        assert!(matches!(
            scheme.parse("abc/11/part-0.parquet"),
            Err(DatasetError::ParseError(_))
        ));
    }

    #[test]
    fn test_hive_scheme() {
        let scheme = HivePartitionScheme::new(hive_schema());
        assert_eq!(
            scheme.parse("month=01/other=x/year=2020/part-0.parquet").unwrap(),
            and(
                equal(field("month"), lit("01")),
                equal(field("year"), lit(2020))
            )
        );
        assert_eq!(
            scheme.parse("year=2020/data.parquet").unwrap(),
            equal(field("year"), lit(2020))
        );
        assert_eq!(
            scheme.parse("year=2020=1/data.parquet").unwrap(),
            Expression::TRUE
        );
    }

    #[test]
    fn test_hive_null_and_encoded_values() {
        let scheme = HivePartitionScheme::new(hive_schema());
        assert_eq!(
            scheme
                .parse("year=__HIVE_DEFAULT_PARTITION__/month=a%2Fb/f")
                .unwrap(),
            and(
                not(is_valid(field("year"))),
                equal(field("month"), lit("a/b"))
            )
        );
        assert_eq!(
            scheme.parse("month=/f").unwrap(),
            not(is_valid(field("month")))
        );
    }

    #[test]
    fn test_hive_malformed_segments() {
        let lenient = HivePartitionScheme::new(hive_schema());
        assert_eq!(
            lenient.parse("bad_segment/year=2020/f.parquet").unwrap(),
            equal(field("year"), lit(2020))
        );
        assert_eq!(
            lenient.parse("year=abc/f.parquet").unwrap(),
            Expression::TRUE
        );

        let strict = HivePartitionScheme::new(hive_schema()).with_strict(true);
        let error = strict.parse("bad_segment/year=2020/f.parquet").unwrap_err();
        assert!(matches!(&error, DatasetError::ParseError(m) if m.contains("bad_segment")));
        assert!(matches!(
            strict.parse("=5/f.parquet"),
            Err(DatasetError::ParseError(_))
        ));
    }

    #[test]
    fn test_hive_format_roundtrip() {
        let scheme = HivePartitionScheme::new(hive_schema());
        let path = "year=2020/month=01/part-0.parquet";
        let expr = scheme.parse(path).unwrap();
        let formatted = scheme.format(&expr).unwrap();
        assert_eq!(formatted, "year=2020/month=01");
        assert_eq!(
            scheme.parse(&format!("{}/part-0.parquet", formatted)).unwrap(),
            expr
        );

        let expr = and(not(is_valid(field("year"))), equal(field("month"), lit("a b")));
        assert_eq!(
            scheme.format(&expr).unwrap(),
            "year=__HIVE_DEFAULT_PARTITION__/month=a%20b"
        );
    }

    #[test]
    fn test_segment_dictionary_scheme() {
        let mut first = HashMap::new();
        first.insert("old".to_string(), less(field("year"), lit(2000)));
        let scheme = SegmentDictionaryPartitionScheme::new(hive_schema(), vec![first]);
        assert_eq!(
            scheme.parse("old/x/f").unwrap(),
            less(field("year"), lit(2000))
        );
        assert!(scheme.parse("new/f").unwrap().is_true());
    }

    #[test]
    fn test_function_scheme() {
        let parser: SegmentParser = Arc::new(|segment: &str, index: usize| {
            if index == 0 {
                Ok(equal(field("month"), lit(segment.to_uppercase())))
            } else {
                Ok(Expression::TRUE)
            }
        });
        let scheme = FunctionPartitionScheme::new(hive_schema(), parser);
        assert_eq!(
            scheme.parse("jan/x/f").unwrap(),
            equal(field("month"), lit("JAN"))
        );
        assert_eq!(scheme.type_name(), "function");
    }

    #[test]
    fn test_hive_discovery() {
        let paths = vec![
            "year=2020/month=01/a.parquet".to_string(),
            "year=2021/month=12/b.parquet".to_string(),
            "year=__HIVE_DEFAULT_PARTITION__/month=11/c.parquet".to_string(),
            "year=2022/big=9999999999/d.parquet".to_string(),
            "junk/e.parquet".to_string(),
        ];
        let discovery = HivePartitionSchemeDiscovery::new();
        let schema = discovery.inspect(&paths).unwrap();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["year", "month", "big"]);
        assert_eq!(schema.field(0).data_type(), &DataType::Int32);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(2).data_type(), &DataType::Int64);

        let scheme = discovery.finish(schema).unwrap();
        assert_eq!(scheme.type_name(), "hive");

        let strict = HivePartitionSchemeDiscovery::new().with_strict(true);
        assert!(matches!(
            strict.inspect(&paths),
            Err(DatasetError::ParseError(_))
        ));
    }

    #[test]
    fn test_schema_discovery() {
        let paths = vec!["2009/11/a".to_string(), "2010/x/b".to_string()];
        let discovery = SchemaPartitionSchemeDiscovery::new(vec![
            "year".to_string(),
            "month".to_string(),
        ]);
        let schema = discovery.inspect(&paths).unwrap();
        assert_eq!(schema.field(0).data_type(), &DataType::Int32);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_infer_partition_type() {
        let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(infer_partition_type(&strings(&["1", "-2", "0"])), DataType::Int32);
        assert_eq!(infer_partition_type(&strings(&["01"])), DataType::Utf8);
        assert_eq!(infer_partition_type(&strings(&["1.5"])), DataType::Utf8);
        assert_eq!(infer_partition_type(&[]), DataType::Utf8);
    }
}
