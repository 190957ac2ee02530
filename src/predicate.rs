use crate::field::Field;
use crate::tuple::Tuple;

/// Comparison operators usable in a `Filter`/`Join` predicate or a B+-tree
/// range scan. Six variants; no `Like` — string pattern matching isn't
/// part of this engine's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
}

impl Op {
    pub fn matches(&self, lhs: &Field, rhs: &Field) -> bool {
        match self {
            Op::Equals => lhs == rhs,
            Op::NotEquals => lhs != rhs,
            Op::GreaterThan => lhs > rhs,
            Op::GreaterThanOrEq => lhs >= rhs,
            Op::LessThan => lhs < rhs,
            Op::LessThanOrEq => lhs <= rhs,
        }
    }

    /// For a field visited in ascending order, once this returns `true` no
    /// later (larger) value can ever satisfy the predicate again — lets a
    /// sorted scan stop early instead of reading to the end of the file.
    pub fn exhausted_by(&self, lhs: &Field, rhs: &Field) -> bool {
        match self {
            Op::Equals => lhs > rhs,
            Op::LessThan => lhs >= rhs,
            Op::LessThanOrEq => lhs > rhs,
            Op::GreaterThan | Op::GreaterThanOrEq | Op::NotEquals => false,
        }
    }
}

/// A single-field comparison against a constant, e.g. `field[1] >= 10`.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field_index: usize,
    pub op: Op,
    pub value: Field,
}

impl Predicate {
    pub fn new(field_index: usize, op: Op, value: Field) -> Self {
        Predicate { field_index, op, value }
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        self.op.matches(tuple.get_field(self.field_index), &self.value)
    }
}
