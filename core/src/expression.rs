//! Filter expressions.
//!
//! An [`Expression`] is an immutable tree used for scan filters and partition
//! predicates. Expressions are type checked against a schema, evaluated
//! column-at-a-time over record batches with Arrow kernels, and simplified
//! against the known bindings of a fragment to decide whether the fragment
//! has to be read at all.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Datum, Scalar as ArrowScalar};
use arrow::compute::kernels::cmp;
use arrow::compute::{and_kleene, can_cast_types, cast, is_not_null, not as not_kernel, or_kleene};
use arrow::datatypes::{DataType, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult};
use crate::scalar::{Scalar, comparison_coercion};

/// The six comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOperator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl CompareOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOperator::Equal => "==",
            CompareOperator::NotEqual => "!=",
            CompareOperator::Less => "<",
            CompareOperator::LessEqual => "<=",
            CompareOperator::Greater => ">",
            CompareOperator::GreaterEqual => ">=",
        }
    }

    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn flip(&self) -> Self {
        match self {
            CompareOperator::Equal => CompareOperator::Equal,
            CompareOperator::NotEqual => CompareOperator::NotEqual,
            CompareOperator::Less => CompareOperator::Greater,
            CompareOperator::LessEqual => CompareOperator::GreaterEqual,
            CompareOperator::Greater => CompareOperator::Less,
            CompareOperator::GreaterEqual => CompareOperator::LessEqual,
        }
    }

    /// Whether `left op right` holds given `left.cmp(right)`.
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOperator::Equal => ordering == Ordering::Equal,
            CompareOperator::NotEqual => ordering != Ordering::Equal,
            CompareOperator::Less => ordering == Ordering::Less,
            CompareOperator::LessEqual => ordering != Ordering::Greater,
            CompareOperator::Greater => ordering == Ordering::Greater,
            CompareOperator::GreaterEqual => ordering != Ordering::Less,
        }
    }

    fn kernel(&self) -> fn(&dyn Datum, &dyn Datum) -> Result<BooleanArray, ArrowError> {
        match self {
            CompareOperator::Equal => cmp::eq,
            CompareOperator::NotEqual => cmp::neq,
            CompareOperator::Less => cmp::lt,
            CompareOperator::LessEqual => cmp::lt_eq,
            CompareOperator::Greater => cmp::gt,
            CompareOperator::GreaterEqual => cmp::gt_eq,
        }
    }
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Reference to a column by name.
    Field(String),
    Literal(Scalar),
    Comparison {
        op: CompareOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    /// Set membership over literal values.
    In {
        expr: Box<Expression>,
        set: Vec<Scalar>,
    },
    /// True where the operand is not null.
    IsValid(Box<Expression>),
    Cast {
        expr: Box<Expression>,
        to: DataType,
    },
}

pub fn field(name: impl Into<String>) -> Expression {
    Expression::Field(name.into())
}

pub fn lit(value: impl Into<Scalar>) -> Expression {
    Expression::Literal(value.into())
}

pub fn compare(op: CompareOperator, left: Expression, right: Expression) -> Expression {
    Expression::Comparison {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn equal(left: Expression, right: Expression) -> Expression {
    compare(CompareOperator::Equal, left, right)
}

pub fn not_equal(left: Expression, right: Expression) -> Expression {
    compare(CompareOperator::NotEqual, left, right)
}

pub fn less(left: Expression, right: Expression) -> Expression {
    compare(CompareOperator::Less, left, right)
}

pub fn less_equal(left: Expression, right: Expression) -> Expression {
    compare(CompareOperator::LessEqual, left, right)
}

pub fn greater(left: Expression, right: Expression) -> Expression {
    compare(CompareOperator::Greater, left, right)
}

pub fn greater_equal(left: Expression, right: Expression) -> Expression {
    compare(CompareOperator::GreaterEqual, left, right)
}

pub fn and(left: Expression, right: Expression) -> Expression {
    Expression::And(Box::new(left), Box::new(right))
}

pub fn or(left: Expression, right: Expression) -> Expression {
    Expression::Or(Box::new(left), Box::new(right))
}

pub fn not(expr: Expression) -> Expression {
    Expression::Not(Box::new(expr))
}

pub fn is_valid(expr: Expression) -> Expression {
    Expression::IsValid(Box::new(expr))
}

pub fn in_list(expr: Expression, set: Vec<Scalar>) -> Expression {
    Expression::In {
        expr: Box::new(expr),
        set,
    }
}

pub fn cast_to(expr: Expression, to: DataType) -> Expression {
    Expression::Cast {
        expr: Box::new(expr),
        to,
    }
}

/// Conjunction of all expressions; `true` when empty.
pub fn and_all(exprs: impl IntoIterator<Item = Expression>) -> Expression {
    exprs
        .into_iter()
        .reduce(and)
        .unwrap_or(Expression::TRUE)
}

/// Disjunction of all expressions; `false` when empty.
pub fn or_all(exprs: impl IntoIterator<Item = Expression>) -> Expression {
    exprs
        .into_iter()
        .reduce(or)
        .unwrap_or(Expression::FALSE)
}

impl Expression {
    pub const TRUE: Expression = Expression::Literal(Scalar::Boolean { value: Some(true) });
    pub const FALSE: Expression = Expression::Literal(Scalar::Boolean { value: Some(false) });

    pub fn is_true(&self) -> bool {
        matches!(self, Expression::Literal(Scalar::Boolean { value: Some(true) }))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expression::Literal(Scalar::Boolean { value: Some(false) }))
    }

    /// False only when the expression can never select a row: literal false
    /// or a null literal.
    pub fn is_satisfiable(&self) -> bool {
        !matches!(
            self,
            Expression::Literal(Scalar::Boolean {
                value: Some(false) | None
            }) | Expression::Literal(Scalar::Null)
        )
    }

    /// Result type of the expression over `schema`, checking operand types.
    pub fn data_type(&self, schema: &Schema) -> DatasetResult<DataType> {
        match self {
            Expression::Field(name) => schema
                .field_with_name(name)
                .map(|f| f.data_type().clone())
                .map_err(|_| DatasetError::UnknownField(name.clone())),
            Expression::Literal(value) => Ok(value.data_type()),
            Expression::Comparison { op, left, right } => {
                let l = left.data_type(schema)?;
                let r = right.data_type(schema)?;
                if comparison_coercion(&l, &r).is_none() {
                    return Err(DatasetError::TypeMismatch(format!(
                        "cannot compare {} with {} in '{} {} {}'",
                        l, r, left, op, right
                    )));
                }
                Ok(DataType::Boolean)
            }
            Expression::And(left, right) | Expression::Or(left, right) => {
                expect_boolean(left, schema)?;
                expect_boolean(right, schema)?;
                Ok(DataType::Boolean)
            }
            Expression::Not(inner) => {
                expect_boolean(inner, schema)?;
                Ok(DataType::Boolean)
            }
            Expression::In { expr, set } => {
                let t = expr.data_type(schema)?;
                for value in set {
                    if comparison_coercion(&t, &value.data_type()).is_none() {
                        return Err(DatasetError::TypeMismatch(format!(
                            "set element {} of type {} does not match {} of type {}",
                            value,
                            value.data_type(),
                            expr,
                            t
                        )));
                    }
                }
                Ok(DataType::Boolean)
            }
            Expression::IsValid(inner) => {
                inner.data_type(schema)?;
                Ok(DataType::Boolean)
            }
            Expression::Cast { expr, to } => {
                let from = expr.data_type(schema)?;
                if !can_cast_types(&from, to) {
                    return Err(DatasetError::TypeMismatch(format!(
                        "cannot cast {} from {} to {}",
                        expr, from, to
                    )));
                }
                Ok(to.clone())
            }
        }
    }

    /// Names of all referenced fields, in order of first appearance.
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Expression::Field(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expression::Literal(_) => {}
            Expression::Comparison { left, right, .. }
            | Expression::And(left, right)
            | Expression::Or(left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expression::Not(inner) | Expression::IsValid(inner) => inner.collect_fields(out),
            Expression::In { expr, .. } | Expression::Cast { expr, .. } => {
                expr.collect_fields(out)
            }
        }
    }

    /// The operands of a top-level conjunction.
    pub fn conjuncts(&self) -> Vec<&Expression> {
        match self {
            Expression::And(left, right) => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Field values fixed by this expression: `field == literal` conjuncts,
    /// plus `not(is_valid(field))` conjuncts binding the field to null.
    pub fn known_bindings(&self) -> HashMap<String, Scalar> {
        let mut bindings = HashMap::new();
        for conjunct in self.conjuncts() {
            match conjunct {
                Expression::Comparison {
                    op: CompareOperator::Equal,
                    left,
                    right,
                } => match (left.as_ref(), right.as_ref()) {
                    (Expression::Field(name), Expression::Literal(value))
                    | (Expression::Literal(value), Expression::Field(name)) => {
                        bindings
                            .entry(name.clone())
                            .or_insert_with(|| value.clone());
                    }
                    _ => {}
                },
                Expression::Not(inner) => {
                    if let Expression::IsValid(operand) = inner.as_ref() {
                        if let Expression::Field(name) = operand.as_ref() {
                            bindings.entry(name.clone()).or_insert(Scalar::Null);
                        }
                    }
                }
                _ => {}
            }
        }
        bindings
    }

    /// Evaluate over a batch, producing one value per row.
    pub fn evaluate(&self, batch: &RecordBatch) -> DatasetResult<ArrayRef> {
        Ok(self.evaluate_columnar(batch)?.into_array(batch.num_rows()))
    }

    /// Evaluate a boolean expression into a filter mask.
    pub fn evaluate_predicate(&self, batch: &RecordBatch) -> DatasetResult<BooleanArray> {
        let value = self.evaluate_columnar(batch)?;
        to_boolean(value, batch.num_rows())
    }

    fn evaluate_columnar(&self, batch: &RecordBatch) -> DatasetResult<ColumnarValue> {
        match self {
            Expression::Field(name) => batch
                .column_by_name(name)
                .cloned()
                .map(ColumnarValue::Array)
                .ok_or_else(|| DatasetError::UnknownField(name.clone())),
            Expression::Literal(value) => Ok(ColumnarValue::Scalar(value.clone())),
            Expression::Comparison { op, left, right } => {
                let l = left.evaluate_columnar(batch)?;
                let r = right.evaluate_columnar(batch)?;
                compare_values(*op, l, r)
            }
            Expression::And(left, right) => {
                let l = left.evaluate_columnar(batch)?;
                let r = right.evaluate_columnar(batch)?;
                if let (ColumnarValue::Scalar(a), ColumnarValue::Scalar(b)) = (&l, &r) {
                    let value = kleene_and(scalar_bool(a)?, scalar_bool(b)?);
                    return Ok(ColumnarValue::Scalar(Scalar::Boolean { value }));
                }
                let n = batch.num_rows();
                let result = and_kleene(&to_boolean(l, n)?, &to_boolean(r, n)?)?;
                Ok(ColumnarValue::Array(Arc::new(result)))
            }
            Expression::Or(left, right) => {
                let l = left.evaluate_columnar(batch)?;
                let r = right.evaluate_columnar(batch)?;
                if let (ColumnarValue::Scalar(a), ColumnarValue::Scalar(b)) = (&l, &r) {
                    let value = kleene_or(scalar_bool(a)?, scalar_bool(b)?);
                    return Ok(ColumnarValue::Scalar(Scalar::Boolean { value }));
                }
                let n = batch.num_rows();
                let result = or_kleene(&to_boolean(l, n)?, &to_boolean(r, n)?)?;
                Ok(ColumnarValue::Array(Arc::new(result)))
            }
            Expression::Not(inner) => match inner.evaluate_columnar(batch)? {
                ColumnarValue::Scalar(s) => Ok(ColumnarValue::Scalar(Scalar::Boolean {
                    value: scalar_bool(&s)?.map(|b| !b),
                })),
                value => {
                    let result = not_kernel(&to_boolean(value, batch.num_rows())?)?;
                    Ok(ColumnarValue::Array(Arc::new(result)))
                }
            },
            Expression::IsValid(inner) => match inner.evaluate_columnar(batch)? {
                ColumnarValue::Scalar(s) => Ok(ColumnarValue::Scalar(Scalar::from(!s.is_null()))),
                ColumnarValue::Array(array) => {
                    Ok(ColumnarValue::Array(Arc::new(is_not_null(array.as_ref())?)))
                }
            },
            Expression::In { expr, set } => {
                let membership = or_all(
                    set.iter()
                        .map(|value| equal(expr.as_ref().clone(), Expression::Literal(value.clone()))),
                );
                membership.evaluate_columnar(batch)
            }
            Expression::Cast { expr, to } => match expr.evaluate_columnar(batch)? {
                ColumnarValue::Scalar(s) => Ok(ColumnarValue::Scalar(s.cast_to(to)?)),
                ColumnarValue::Array(array) => Ok(ColumnarValue::Array(cast(&array, to)?)),
            },
        }
    }

    /// Simplify using facts known to hold for every row.
    ///
    /// `given` is typically a fragment's partition expression. Equality
    /// bindings are substituted, comparisons against fields with known ranges
    /// are decided where possible, and constant subtrees are folded. The
    /// result is `false` when no row matching `given` can satisfy `self` and
    /// `true` when every such row does.
    pub fn simplify(&self, given: &Expression) -> DatasetResult<Expression> {
        let guarantees = Guarantees::from_expression(given);
        self.simplify_with(&guarantees)
    }

    /// Fold constant subtrees without any outside knowledge.
    pub fn fold_constants(&self) -> DatasetResult<Expression> {
        self.simplify_with(&Guarantees::default())
    }

    fn simplify_with(&self, guarantees: &Guarantees) -> DatasetResult<Expression> {
        match self {
            Expression::Field(name) => Ok(guarantees
                .value(name)
                .map(|v| Expression::Literal(v.clone()))
                .unwrap_or_else(|| self.clone())),
            Expression::Literal(_) => Ok(self.clone()),
            Expression::Comparison { op, left, right } => {
                let l = left.simplify_with(guarantees)?;
                let r = right.simplify_with(guarantees)?;
                match (&l, &r) {
                    (Expression::Literal(a), Expression::Literal(b)) => {
                        let value = a.try_cmp(b)?.map(|o| op.matches(o));
                        return Ok(Expression::Literal(Scalar::Boolean { value }));
                    }
                    (Expression::Field(name), Expression::Literal(value)) => {
                        if let Some(decided) = guarantees.decide(name, *op, value) {
                            return Ok(lit(decided));
                        }
                    }
                    (Expression::Literal(value), Expression::Field(name)) => {
                        if let Some(decided) = guarantees.decide(name, op.flip(), value) {
                            return Ok(lit(decided));
                        }
                    }
                    _ => {}
                }
                Ok(compare(*op, l, r))
            }
            Expression::And(left, right) => {
                let l = left.simplify_with(guarantees)?;
                let r = right.simplify_with(guarantees)?;
                if l.is_false() || r.is_false() {
                    return Ok(Expression::FALSE);
                }
                if l.is_true() {
                    return Ok(r);
                }
                if r.is_true() {
                    return Ok(l);
                }
                if let (Expression::Literal(a), Expression::Literal(b)) = (&l, &r) {
                    let value = kleene_and(scalar_bool(a)?, scalar_bool(b)?);
                    return Ok(Expression::Literal(Scalar::Boolean { value }));
                }
                Ok(and(l, r))
            }
            Expression::Or(left, right) => {
                let l = left.simplify_with(guarantees)?;
                let r = right.simplify_with(guarantees)?;
                if l.is_true() || r.is_true() {
                    return Ok(Expression::TRUE);
                }
                if l.is_false() {
                    return Ok(r);
                }
                if r.is_false() {
                    return Ok(l);
                }
                if let (Expression::Literal(a), Expression::Literal(b)) = (&l, &r) {
                    let value = kleene_or(scalar_bool(a)?, scalar_bool(b)?);
                    return Ok(Expression::Literal(Scalar::Boolean { value }));
                }
                Ok(or(l, r))
            }
            Expression::Not(inner) => {
                let simplified = inner.simplify_with(guarantees)?;
                if let Expression::Literal(value) = &simplified {
                    return Ok(Expression::Literal(Scalar::Boolean {
                        value: scalar_bool(value)?.map(|b| !b),
                    }));
                }
                Ok(not(simplified))
            }
            Expression::IsValid(inner) => {
                let simplified = inner.simplify_with(guarantees)?;
                match &simplified {
                    Expression::Literal(value) => Ok(lit(!value.is_null())),
                    Expression::Field(name) => match guarantees.validity(name) {
                        Some(valid) => Ok(lit(valid)),
                        None => Ok(is_valid(simplified)),
                    },
                    _ => Ok(is_valid(simplified)),
                }
            }
            Expression::In { expr, set } => {
                if set.is_empty() {
                    return Ok(Expression::FALSE);
                }
                let simplified = expr.simplify_with(guarantees)?;
                match &simplified {
                    Expression::Literal(value) => {
                        if value.is_null() {
                            return Ok(Expression::Literal(Scalar::Boolean { value: None }));
                        }
                        let mut saw_null = false;
                        for candidate in set {
                            match value.try_cmp(candidate)? {
                                Some(Ordering::Equal) => return Ok(Expression::TRUE),
                                None => saw_null = true,
                                Some(_) => {}
                            }
                        }
                        if saw_null {
                            Ok(Expression::Literal(Scalar::Boolean { value: None }))
                        } else {
                            Ok(Expression::FALSE)
                        }
                    }
                    Expression::Field(name) => {
                        let decisions: Vec<Option<bool>> = set
                            .iter()
                            .map(|v| guarantees.decide(name, CompareOperator::Equal, v))
                            .collect();
                        if decisions.contains(&Some(true)) {
                            Ok(Expression::TRUE)
                        } else if decisions.iter().all(|d| *d == Some(false)) {
                            Ok(Expression::FALSE)
                        } else {
                            Ok(in_list(simplified, set.clone()))
                        }
                    }
                    _ => Ok(in_list(simplified, set.clone())),
                }
            }
            Expression::Cast { expr, to } => {
                let simplified = expr.simplify_with(guarantees)?;
                if let Expression::Literal(value) = &simplified {
                    return Ok(Expression::Literal(value.cast_to(to)?));
                }
                Ok(cast_to(simplified, to.clone()))
            }
        }
    }
}

fn expect_boolean(expr: &Expression, schema: &Schema) -> DatasetResult<()> {
    match expr.data_type(schema)? {
        DataType::Boolean | DataType::Null => Ok(()),
        other => Err(DatasetError::TypeMismatch(format!(
            "expected a boolean operand, found {} of type {}",
            expr, other
        ))),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Field(name) => write!(f, "{}", name),
            Expression::Literal(value) => fmt_literal(f, value),
            Expression::Comparison { op, left, right } => {
                write!(f, "({} {} {})", left, op, right)
            }
            Expression::And(left, right) => write!(f, "({} and {})", left, right),
            Expression::Or(left, right) => write!(f, "({} or {})", left, right),
            Expression::Not(inner) => write!(f, "not({})", inner),
            Expression::IsValid(inner) => write!(f, "is_valid({})", inner),
            Expression::In { expr, set } => {
                write!(f, "({} in [", expr)?;
                for (i, value) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_literal(f, value)?;
                }
                write!(f, "])")
            }
            Expression::Cast { expr, to } => write!(f, "cast({} as {})", expr, to),
        }
    }
}

fn fmt_literal(f: &mut fmt::Formatter<'_>, value: &Scalar) -> fmt::Result {
    match value.as_str() {
        Some(s) => write!(f, "\"{}\"", s),
        None => write!(f, "{}", value),
    }
}

/// Intermediate result of evaluation: a full column or a single value.
#[derive(Debug, Clone)]
enum ColumnarValue {
    Array(ArrayRef),
    Scalar(Scalar),
}

impl ColumnarValue {
    fn into_array(self, num_rows: usize) -> ArrayRef {
        match self {
            ColumnarValue::Array(array) => array,
            ColumnarValue::Scalar(value) => value.to_array(num_rows),
        }
    }

    fn data_type(&self) -> DataType {
        match self {
            ColumnarValue::Array(array) => array.data_type().clone(),
            ColumnarValue::Scalar(value) => value.data_type(),
        }
    }
}

enum Operand {
    Array(ArrayRef),
    Scalar(ArrowScalar<ArrayRef>),
}

impl Operand {
    /// Cast at the array level, so comparison types without a [`Scalar`]
    /// counterpart (`Decimal128`) work for literals too.
    fn coerce(value: ColumnarValue, to: &DataType) -> DatasetResult<Self> {
        let cast_array = |array: ArrayRef| -> DatasetResult<ArrayRef> {
            if array.data_type() == to {
                Ok(array)
            } else {
                Ok(cast(&array, to)?)
            }
        };
        Ok(match value {
            ColumnarValue::Array(array) => Operand::Array(cast_array(array)?),
            ColumnarValue::Scalar(value) => {
                Operand::Scalar(ArrowScalar::new(cast_array(value.to_array(1))?))
            }
        })
    }

    fn as_datum(&self) -> &dyn Datum {
        match self {
            Operand::Array(array) => array,
            Operand::Scalar(scalar) => scalar,
        }
    }
}

fn compare_values(
    op: CompareOperator,
    left: ColumnarValue,
    right: ColumnarValue,
) -> DatasetResult<ColumnarValue> {
    if let (ColumnarValue::Scalar(a), ColumnarValue::Scalar(b)) = (&left, &right) {
        let value = a.try_cmp(b)?.map(|o| op.matches(o));
        return Ok(ColumnarValue::Scalar(Scalar::Boolean { value }));
    }
    let (lt, rt) = (left.data_type(), right.data_type());
    let common = comparison_coercion(&lt, &rt).ok_or_else(|| {
        DatasetError::TypeMismatch(format!("cannot compare {} with {}", lt, rt))
    })?;
    if common == DataType::Null {
        return Ok(ColumnarValue::Scalar(Scalar::Boolean { value: None }));
    }
    let l = Operand::coerce(left, &common)?;
    let r = Operand::coerce(right, &common)?;
    let result = (op.kernel())(l.as_datum(), r.as_datum())?;
    Ok(ColumnarValue::Array(Arc::new(result)))
}

fn to_boolean(value: ColumnarValue, num_rows: usize) -> DatasetResult<BooleanArray> {
    let array = value.into_array(num_rows);
    let array = match array.data_type() {
        DataType::Null => cast(&array, &DataType::Boolean)?,
        _ => array,
    };
    array
        .as_boolean_opt()
        .cloned()
        .ok_or_else(|| DatasetError::TypeMismatch(format!(
            "expected a boolean column, found {}",
            array.data_type()
        )))
}

fn scalar_bool(value: &Scalar) -> DatasetResult<Option<bool>> {
    match value {
        Scalar::Null => Ok(None),
        Scalar::Boolean { value } => Ok(*value),
        other => Err(DatasetError::TypeMismatch(format!(
            "expected a boolean value, found {} of type {}",
            other,
            other.data_type()
        ))),
    }
}

fn kleene_and(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn kleene_or(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// Per-field facts extracted from the conjuncts of a guarantee expression.
#[derive(Debug, Default)]
struct Guarantees {
    fields: HashMap<String, FieldGuarantee>,
}

#[derive(Debug, Default)]
struct FieldGuarantee {
    value: Option<Scalar>,
    valid: Option<bool>,
    lower: Option<Bound>,
    upper: Option<Bound>,
    excluded: Vec<Scalar>,
}

#[derive(Debug, Clone)]
struct Bound {
    value: Scalar,
    inclusive: bool,
}

impl Guarantees {
    fn from_expression(given: &Expression) -> Self {
        let mut guarantees = Guarantees::default();
        for conjunct in given.conjuncts() {
            match conjunct {
                Expression::Comparison { op, left, right } => {
                    match (left.as_ref(), right.as_ref()) {
                        (Expression::Field(name), Expression::Literal(value)) => {
                            guarantees.add_comparison(name, *op, value)
                        }
                        (Expression::Literal(value), Expression::Field(name)) => {
                            guarantees.add_comparison(name, op.flip(), value)
                        }
                        _ => {}
                    }
                }
                Expression::IsValid(inner) => {
                    if let Expression::Field(name) = inner.as_ref() {
                        guarantees.entry(name).valid.get_or_insert(true);
                    }
                }
                Expression::Not(inner) => {
                    if let Expression::IsValid(operand) = inner.as_ref() {
                        if let Expression::Field(name) = operand.as_ref() {
                            let entry = guarantees.entry(name);
                            entry.valid.get_or_insert(false);
                            entry.value.get_or_insert(Scalar::Null);
                        }
                    }
                }
                _ => {}
            }
        }
        guarantees
    }

    fn entry(&mut self, name: &str) -> &mut FieldGuarantee {
        self.fields.entry(name.to_string()).or_default()
    }

    fn add_comparison(&mut self, name: &str, op: CompareOperator, value: &Scalar) {
        if value.is_null() {
            return;
        }
        let entry = self.entry(name);
        entry.valid.get_or_insert(true);
        match op {
            CompareOperator::Equal => {
                entry.value.get_or_insert_with(|| value.clone());
            }
            CompareOperator::NotEqual => entry.excluded.push(value.clone()),
            CompareOperator::Less | CompareOperator::LessEqual => {
                let bound = Bound {
                    value: value.clone(),
                    inclusive: op == CompareOperator::LessEqual,
                };
                let tighter = match &entry.upper {
                    Some(current) => is_tighter_upper(&bound, current),
                    None => true,
                };
                if tighter {
                    entry.upper = Some(bound);
                }
            }
            CompareOperator::Greater | CompareOperator::GreaterEqual => {
                let bound = Bound {
                    value: value.clone(),
                    inclusive: op == CompareOperator::GreaterEqual,
                };
                let tighter = match &entry.lower {
                    Some(current) => is_tighter_lower(&bound, current),
                    None => true,
                };
                if tighter {
                    entry.lower = Some(bound);
                }
            }
        }
    }

    fn value(&self, name: &str) -> Option<&Scalar> {
        self.fields.get(name).and_then(|g| g.value.as_ref())
    }

    fn validity(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(|g| g.valid)
    }

    /// Decide `field op value` for every row, if the known facts allow it.
    fn decide(&self, name: &str, op: CompareOperator, value: &Scalar) -> Option<bool> {
        if value.is_null() {
            return None;
        }
        let g = self.fields.get(name)?;
        if g.excluded.iter().any(|e| ordering(e, value) == Some(Ordering::Equal)) {
            match op {
                CompareOperator::Equal => return Some(false),
                CompareOperator::NotEqual => return Some(true),
                _ => {}
            }
        }
        // Position of the value relative to each bound of the field's interval.
        let lower = g.lower.as_ref().and_then(|b| Some((ordering(&b.value, value)?, b.inclusive)));
        let upper = g.upper.as_ref().and_then(|b| Some((ordering(&b.value, value)?, b.inclusive)));

        // lower/upper hold `bound.cmp(value)`.
        let above_value = |bound: Option<(Ordering, bool)>, allow_equal: bool| match bound {
            Some((Ordering::Greater, _)) => true,
            Some((Ordering::Equal, inclusive)) => allow_equal || !inclusive,
            _ => false,
        };
        let below_value = |bound: Option<(Ordering, bool)>, allow_equal: bool| match bound {
            Some((Ordering::Less, _)) => true,
            Some((Ordering::Equal, inclusive)) => allow_equal || !inclusive,
            _ => false,
        };

        // Every row is strictly above / at-or-above / strictly below / at-or-below the value.
        let all_gt = above_value(lower, false);
        let all_ge = above_value(lower, true);
        let all_lt = below_value(upper, false);
        let all_le = below_value(upper, true);

        match op {
            CompareOperator::Equal => (all_gt || all_lt).then_some(false),
            CompareOperator::NotEqual => (all_gt || all_lt).then_some(true),
            CompareOperator::Less => {
                if all_lt {
                    Some(true)
                } else if all_ge {
                    Some(false)
                } else {
                    None
                }
            }
            CompareOperator::LessEqual => {
                if all_le {
                    Some(true)
                } else if all_gt {
                    Some(false)
                } else {
                    None
                }
            }
            CompareOperator::Greater => {
                if all_gt {
                    Some(true)
                } else if all_le {
                    Some(false)
                } else {
                    None
                }
            }
            CompareOperator::GreaterEqual => {
                if all_ge {
                    Some(true)
                } else if all_lt {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }
}

/// Ordering of two scalars, treating incomparable or null values as unknown.
fn ordering(left: &Scalar, right: &Scalar) -> Option<Ordering> {
    left.try_cmp(right).ok().flatten()
}

fn is_tighter_upper(candidate: &Bound, current: &Bound) -> bool {
    match ordering(&candidate.value, &current.value) {
        Some(Ordering::Less) => true,
        Some(Ordering::Equal) => !candidate.inclusive && current.inclusive,
        _ => false,
    }
}

fn is_tighter_lower(candidate: &Bound, current: &Bound) -> bool {
    match ordering(&candidate.value, &current.value) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Equal) => !candidate.inclusive && current.inclusive,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int32Array, StringArray, UInt64Array};
    use arrow::datatypes::Field;

    fn test_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("val", DataType::Float64, true),
            Field::new("region", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3, 4])),
                Arc::new(Float64Array::from(vec![Some(0.5), None, Some(2.5), Some(4.0)])),
                Arc::new(StringArray::from(vec![
                    Some("west"),
                    Some("east"),
                    None,
                    Some("west"),
                ])),
            ],
        )
        .unwrap()
    }

    fn mask(values: &BooleanArray) -> Vec<Option<bool>> {
        values.iter().collect()
    }

    #[test]
    fn test_evaluate_comparison() {
        let batch = test_batch();
        let result = greater(field("id"), lit(2i64))
            .evaluate_predicate(&batch)
            .unwrap();
        assert_eq!(mask(&result), vec![Some(false), Some(false), Some(true), Some(true)]);

        let result = equal(field("region"), lit("west"))
            .evaluate_predicate(&batch)
            .unwrap();
        assert_eq!(mask(&result), vec![Some(true), Some(false), None, Some(true)]);
    }

    #[test]
    fn test_evaluate_kleene_logic() {
        let batch = test_batch();
        let expr = and(
            equal(field("region"), lit("west")),
            greater(field("val"), lit(1.0)),
        );
        let result = expr.evaluate_predicate(&batch).unwrap();
        assert_eq!(mask(&result), vec![Some(false), Some(false), None, Some(true)]);

        let expr = or(equal(field("region"), lit("west")), lit(true));
        let result = expr.evaluate_predicate(&batch).unwrap();
        assert_eq!(result.true_count(), 4);
    }

    #[test]
    fn test_evaluate_in_is_valid_and_cast() {
        let batch = test_batch();
        let result = in_list(field("id"), vec![Scalar::from(1), Scalar::from(4)])
            .evaluate_predicate(&batch)
            .unwrap();
        assert_eq!(mask(&result), vec![Some(true), Some(false), Some(false), Some(true)]);

        let result = is_valid(field("val")).evaluate_predicate(&batch).unwrap();
        assert_eq!(result.true_count(), 3);

        let result = cast_to(field("id"), DataType::Utf8).evaluate(&batch).unwrap();
        assert_eq!(result.data_type(), &DataType::Utf8);

        let result = in_list(field("id"), vec![]).evaluate_predicate(&batch).unwrap();
        assert_eq!(result.true_count(), 0);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_evaluate_literal_broadcasts() {
        let batch = test_batch();
        let result = Expression::TRUE.evaluate(&batch).unwrap();
        assert_eq!(result.len(), batch.num_rows());
    }

    #[test]
    fn test_evaluate_unknown_field() {
        let batch = test_batch();
        let error = equal(field("missing"), lit(1)).evaluate(&batch).unwrap_err();
        assert!(matches!(error, DatasetError::UnknownField(name) if name == "missing"));
    }

    #[test]
    fn test_evaluate_unsigned_against_signed() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("u", DataType::UInt64, false)])),
            vec![Arc::new(UInt64Array::from(vec![u64::MAX, 5, 0]))],
        )
        .unwrap();
        let result = greater(field("u"), lit(0i64)).evaluate_predicate(&batch).unwrap();
        assert_eq!(result.null_count(), 0);
        assert_eq!(mask(&result), vec![Some(true), Some(true), Some(false)]);

        let result = less(field("u"), lit(-1i32)).evaluate_predicate(&batch).unwrap();
        assert_eq!(result.true_count(), 0);
        assert_eq!(result.null_count(), 0);

        // Row evaluation and simplification agree on the same binding.
        let given = equal(field("u"), Expression::Literal(Scalar::from(u64::MAX)));
        let expr = greater(field("u"), lit(i64::MAX));
        assert!(expr.simplify(&given).unwrap().is_true());
        assert!(expr.evaluate_predicate(&batch).unwrap().value(0));
    }

    #[test]
    fn test_nan_ordering_matches_kernels() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("f", DataType::Float64, false)])),
            vec![Arc::new(Float64Array::from(vec![f64::NAN, 1.0]))],
        )
        .unwrap();
        let expr = greater(field("f"), lit(100.0));
        assert_eq!(mask(&expr.evaluate_predicate(&batch).unwrap()), vec![Some(true), Some(false)]);

        let nan_row = equal(field("f"), lit(f64::NAN));
        assert!(expr.simplify(&nan_row).unwrap().is_true());
        assert!(greater(lit(f64::NAN), lit(100.0)).fold_constants().unwrap().is_true());
    }

    #[test]
    fn test_data_type_checks() {
        let batch = test_batch();
        let schema = batch.schema();
        assert_eq!(
            equal(field("id"), lit(1.5)).data_type(&schema).unwrap(),
            DataType::Boolean
        );
        assert!(matches!(
            equal(field("id"), lit("x")).data_type(&schema),
            Err(DatasetError::TypeMismatch(_))
        ));
        assert!(matches!(
            and(field("id"), lit(true)).data_type(&schema),
            Err(DatasetError::TypeMismatch(_))
        ));
        assert!(matches!(
            is_valid(field("nope")).data_type(&schema),
            Err(DatasetError::UnknownField(_))
        ));
    }

    #[test]
    fn test_simplify_with_equality_bindings() {
        let partition = and(
            equal(field("year"), lit(2020)),
            equal(field("region"), lit("west")),
        );
        let filter = equal(field("region"), lit("east"));
        assert!(filter.simplify(&partition).unwrap().is_false());

        let filter = and(equal(field("region"), lit("west")), greater(field("val"), lit(1.0)));
        assert_eq!(
            filter.simplify(&partition).unwrap(),
            greater(field("val"), lit(1.0))
        );

        let filter = equal(field("year"), lit(2020i64));
        assert!(filter.simplify(&partition).unwrap().is_true());
    }

    #[test]
    fn test_simplify_with_ranges() {
        let stats = and(
            greater_equal(field("id"), lit(10)),
            less_equal(field("id"), lit(20)),
        );
        assert!(less(field("id"), lit(10)).simplify(&stats).unwrap().is_false());
        assert!(less_equal(field("id"), lit(20)).simplify(&stats).unwrap().is_true());
        assert!(greater(field("id"), lit(20)).simplify(&stats).unwrap().is_false());
        assert!(equal(field("id"), lit(25)).simplify(&stats).unwrap().is_false());
        assert!(not_equal(lit(5), field("id")).simplify(&stats).unwrap().is_true());
        assert_eq!(
            equal(field("id"), lit(15)).simplify(&stats).unwrap(),
            equal(field("id"), lit(15))
        );
        assert!(is_valid(field("id")).simplify(&stats).unwrap().is_true());
        assert!(in_list(field("id"), vec![Scalar::from(1), Scalar::from(30)])
            .simplify(&stats)
            .unwrap()
            .is_false());
    }

    #[test]
    fn test_simplify_with_null_binding() {
        let partition = not(is_valid(field("region")));
        assert!(!equal(field("region"), lit("west"))
            .simplify(&partition)
            .unwrap()
            .is_satisfiable());
        assert!(is_valid(field("region")).simplify(&partition).unwrap().is_false());
        assert!(not(is_valid(field("region")))
            .simplify(&partition)
            .unwrap()
            .is_true());
    }

    #[test]
    fn test_fold_constants() {
        let expr = and(Expression::TRUE, equal(lit(1), lit(1)));
        assert!(expr.fold_constants().unwrap().is_true());

        let expr = or(Expression::FALSE, field("flag"));
        assert_eq!(expr.fold_constants().unwrap(), field("flag"));

        let expr = not(less(lit("a"), lit("b")));
        assert!(expr.fold_constants().unwrap().is_false());

        let expr = cast_to(lit("7"), DataType::Int32);
        assert_eq!(expr.fold_constants().unwrap(), lit(7));

        assert!(matches!(
            equal(lit(1), lit("1")).fold_constants(),
            Err(DatasetError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_simplify_is_idempotent() {
        let partition = and_all([
            equal(field("year"), lit(2020)),
            greater_equal(field("id"), lit(0)),
            not(is_valid(field("tag"))),
        ]);
        let filters = vec![
            and(equal(field("year"), lit(2020)), less(field("id"), lit(5))),
            or(equal(field("tag"), lit("a")), greater(field("val"), lit(1.0))),
            not(and(is_valid(field("val")), equal(field("year"), lit(2019)))),
            in_list(field("id"), vec![Scalar::from(-1), Scalar::from(3)]),
            and(cast_to(field("val"), DataType::Int64), lit(true)),
            equal(field("tag"), Expression::Literal(Scalar::Null)),
        ];
        for filter in filters {
            let once = filter.simplify(&partition).unwrap();
            let twice = once.simplify(&partition).unwrap();
            assert_eq!(once, twice, "simplify not idempotent for {}", filter);
        }
    }

    #[test]
    fn test_known_bindings() {
        let partition = and_all([
            equal(field("year"), lit(2020)),
            equal(lit("west"), field("region")),
            not(is_valid(field("month"))),
            greater(field("id"), lit(1)),
        ]);
        let bindings = partition.known_bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings["year"], Scalar::from(2020));
        assert_eq!(bindings["region"], Scalar::from("west"));
        assert_eq!(bindings["month"], Scalar::Null);
    }

    #[test]
    fn test_fields_and_satisfiable() {
        let expr = and(equal(field("a"), field("b")), is_valid(field("a")));
        assert_eq!(expr.fields(), vec!["a".to_string(), "b".to_string()]);
        assert!(!Expression::FALSE.is_satisfiable());
        assert!(!Expression::Literal(Scalar::Boolean { value: None }).is_satisfiable());
        assert!(expr.is_satisfiable());
    }

    #[test]
    fn test_display() {
        let expr = and(
            equal(field("region"), lit("west")),
            not(in_list(field("id"), vec![Scalar::from(1), Scalar::from(2)])),
        );
        assert_eq!(
            expr.to_string(),
            "((region == \"west\") and not((id in [1, 2])))"
        );
        assert_eq!(
            cast_to(field("id"), DataType::Int64).to_string(),
            "cast(id as Int64)"
        );
    }
}
