//! Command-line filter and partitioning arguments.

use std::cmp::Reverse;

use anyhow::{Context, Result, anyhow, bail};
use arrow::datatypes::Schema;
use strata_core::expression::{and_all, compare, field};
use strata_core::{CompareOperator, Expression, Partitioning, Scalar};

/// Operators recognised in `--filter`.
const OPERATORS: [(&str, CompareOperator); 7] = [
    (">=", CompareOperator::GreaterEqual),
    ("<=", CompareOperator::LessEqual),
    ("!=", CompareOperator::NotEqual),
    ("==", CompareOperator::Equal),
    ("=", CompareOperator::Equal),
    ("<", CompareOperator::Less),
    (">", CompareOperator::Greater),
];

/// Parse `column<op>value`, typing the value by the column's type.
///
/// The leftmost operator splits the text, so the value may itself contain
/// operator characters. At the same position the longer operator wins.
pub fn parse_comparison(text: &str, schema: &Schema) -> Result<Expression> {
    let (start, symbol, op) = OPERATORS
        .iter()
        .filter_map(|(symbol, op)| text.find(symbol).map(|start| (start, *symbol, *op)))
        .min_by_key(|(start, symbol, _)| (*start, Reverse(symbol.len())))
        .ok_or_else(|| anyhow!("filter '{}' has no comparison operator", text))?;
    let name = text[..start].trim();
    let value = text[start + symbol.len()..].trim();
    let target = schema
        .field_with_name(name)
        .map_err(|_| anyhow!("filter '{}' references unknown column '{}'", text, name))?;
    let value = Scalar::parse(target.data_type(), value)
        .with_context(|| format!("invalid value in filter '{}'", text))?;
    Ok(compare(op, field(name), Expression::Literal(value)))
}

/// Conjunction of every `--filter` argument.
pub fn parse_filters(filters: &[String], schema: &Schema) -> Result<Expression> {
    let conjuncts = filters
        .iter()
        .map(|text| parse_comparison(text, schema))
        .collect::<Result<Vec<_>>>()?;
    Ok(and_all(conjuncts))
}

/// `none`, `hive` or `directory:a,b,...`.
pub fn parse_partitioning(text: &str, strict: bool) -> Result<Partitioning> {
    match text.split_once(':') {
        None if text == "none" => Ok(Partitioning::default()),
        None if text == "hive" => Ok(Partitioning::hive(strict)),
        Some(("directory", names)) => {
            let names: Vec<String> = names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect();
            if names.is_empty() {
                bail!("directory partitioning needs at least one field name");
            }
            Ok(Partitioning::directory(names))
        }
        _ => bail!(
            "unknown partitioning '{}', expected none, hive or directory:<fields>",
            text
        ),
    }
}
