//! SQL-shaped operators built on top of the storage core. These are thin by
//! design — spec.md treats the operator tree as an external collaborator of
//! the four core subsystems, so nothing here does its own page management;
//! everything reaches through `Engine`/`BufferPool` like any other caller.

use crate::engine::Engine;
use crate::error::DbResult;
use crate::field::Field;
use crate::predicate::{Op, Predicate};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};

/// Full scan of one table through the buffer pool, in page/slot order.
pub struct SeqScan<'a> {
    inner: Box<dyn Iterator<Item = DbResult<Tuple>> + 'a>,
}

impl<'a> SeqScan<'a> {
    pub fn new(engine: &'a Engine, tid: TransactionId, table_id: u64) -> DbResult<Self> {
        Ok(SeqScan {
            inner: engine.scan(tid, table_id)?,
        })
    }
}

impl<'a> Iterator for SeqScan<'a> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Passes through only the rows of `child` that satisfy `predicate`.
pub struct Filter<I> {
    child: I,
    predicate: Predicate,
}

impl<I: Iterator<Item = DbResult<Tuple>>> Filter<I> {
    pub fn new(child: I, predicate: Predicate) -> Self {
        Filter { child, predicate }
    }
}

impl<I: Iterator<Item = DbResult<Tuple>>> Iterator for Filter<I> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.child.next()? {
                Ok(t) if self.predicate.matches(&t) => return Some(Ok(t)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// A comparison between one field of the left-hand row and one field of the
/// right-hand row, as opposed to `Predicate`'s comparison against a fixed
/// constant.
#[derive(Debug, Clone)]
pub struct JoinPredicate {
    pub left_field: usize,
    pub op: Op,
    pub right_field: usize,
}

impl JoinPredicate {
    pub fn new(left_field: usize, op: Op, right_field: usize) -> Self {
        JoinPredicate { left_field, op, right_field }
    }

    fn matches(&self, left: &Tuple, right: &Tuple) -> bool {
        self.op.matches(left.get_field(self.left_field), right.get_field(self.right_field))
    }
}

/// Nested-loop join: the right side is materialized once up front and
/// re-scanned per left-hand row. Join-order selection is a Non-goal, so
/// which side the caller passes as `left` vs. `right` is entirely up to
/// them (or, elsewhere, a histogram-driven planner this crate doesn't own).
/// Generic over the left child's concrete iterator type, same as `Filter`,
/// so it can wrap a borrowing `SeqScan` without forcing it to be `'static`.
pub struct Join<L> {
    left: L,
    right_rows: Vec<Tuple>,
    predicate: JoinPredicate,
    desc: TupleDesc,
    current_left: Option<Tuple>,
    right_idx: usize,
}

impl<L: Iterator<Item = DbResult<Tuple>>> Join<L> {
    pub fn new(
        left: L,
        right: impl Iterator<Item = DbResult<Tuple>>,
        left_desc: TupleDesc,
        right_desc: TupleDesc,
        predicate: JoinPredicate,
    ) -> DbResult<Self> {
        let right_rows = right.collect::<DbResult<Vec<Tuple>>>()?;
        Ok(Join {
            left,
            right_rows,
            predicate,
            desc: TupleDesc::merge(&left_desc, &right_desc),
            current_left: None,
            right_idx: 0,
        })
    }

    fn combine(&self, left: &Tuple, right: &Tuple) -> Tuple {
        let mut fields = Vec::with_capacity(self.desc.num_fields());
        for i in 0..left.desc().num_fields() {
            fields.push(left.get_field(i).clone());
        }
        for i in 0..right.desc().num_fields() {
            fields.push(right.get_field(i).clone());
        }
        Tuple::new(self.desc.clone(), fields)
    }
}

impl<L: Iterator<Item = DbResult<Tuple>>> Iterator for Join<L> {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_left.is_none() {
                match self.left.next() {
                    Some(Ok(t)) => {
                        self.current_left = Some(t);
                        self.right_idx = 0;
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => return None,
                }
            }
            let left = self.current_left.as_ref().unwrap();
            while self.right_idx < self.right_rows.len() {
                let right = &self.right_rows[self.right_idx];
                self.right_idx += 1;
                if self.predicate.matches(left, right) {
                    return Some(Ok(self.combine(left, right)));
                }
            }
            self.current_left = None;
        }
    }
}

/// Inserts every row of `rows` into `table_id` under `tid`, returning the
/// count inserted rather than the rows themselves.
pub struct Insert;

impl Insert {
    pub fn execute(engine: &Engine, tid: TransactionId, table_id: u64, rows: impl IntoIterator<Item = Tuple>) -> DbResult<usize> {
        let mut count = 0;
        for row in rows {
            engine.insert_tuple(tid, table_id, row)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Deletes every row produced by `source` (typically a `Filter` over a
/// `SeqScan`, carrying the `RecordId` each row was read from).
pub struct Delete;

impl Delete {
    pub fn execute(engine: &Engine, tid: TransactionId, source: impl Iterator<Item = DbResult<Tuple>>) -> DbResult<usize> {
        let mut count = 0;
        for row in source {
            let row = row?;
            engine.delete_tuple(tid, &row)?;
            count += 1;
        }
        Ok(count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

enum AggState {
    Count(i64),
    Sum(i64),
    Avg { sum: i64, count: i64 },
    MinMax(Field),
}

impl AggState {
    fn new(op: AggOp, first: &Field) -> Self {
        match op {
            AggOp::Count => AggState::Count(1),
            AggOp::Sum => AggState::Sum(first.as_int().unwrap_or(0) as i64),
            AggOp::Avg => AggState::Avg { sum: first.as_int().unwrap_or(0) as i64, count: 1 },
            AggOp::Min | AggOp::Max => AggState::MinMax(first.clone()),
        }
    }

    fn update(&mut self, op: AggOp, value: &Field) {
        match self {
            AggState::Count(c) => *c += 1,
            AggState::Sum(s) => *s += value.as_int().unwrap_or(0) as i64,
            AggState::Avg { sum, count } => {
                *sum += value.as_int().unwrap_or(0) as i64;
                *count += 1;
            }
            AggState::MinMax(cur) => {
                let better = match op {
                    AggOp::Min => *value < *cur,
                    AggOp::Max => *value > *cur,
                    _ => false,
                };
                if better {
                    *cur = value.clone();
                }
            }
        }
    }

    fn finish(self) -> Field {
        match self {
            AggState::Count(c) => Field::Int(c as i32),
            AggState::Sum(s) => Field::Int(s as i32),
            AggState::Avg { sum, count } => Field::Int(if count == 0 { 0 } else { (sum / count) as i32 }),
            AggState::MinMax(v) => v,
        }
    }
}

/// COUNT/SUM/AVG/MIN/MAX over one field, optionally grouped by another.
/// Groups are kept in first-seen order in a plain `Vec` rather than a
/// hash map, matching the small-scale, linear-scan texture the rest of
/// this engine uses (buffer pool lists, lock tables) rather than reaching
/// for a hash-based accumulator for what is, in a teaching engine, always
/// a handful of groups.
pub struct Aggregate {
    op: AggOp,
    field_index: usize,
    group_field: Option<usize>,
}

impl Aggregate {
    pub fn new(op: AggOp, field_index: usize, group_field: Option<usize>) -> Self {
        Aggregate { op, field_index, group_field }
    }

    pub fn execute(&self, rows: impl Iterator<Item = DbResult<Tuple>>) -> DbResult<Vec<(Option<Field>, Field)>> {
        let mut groups: Vec<(Option<Field>, AggState)> = Vec::new();
        for row in rows {
            let row = row?;
            let value = row.get_field(self.field_index);
            let key = self.group_field.map(|i| row.get_field(i).clone());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, state)) => state.update(self.op, value),
                None => groups.push((key, AggState::new(self.op, value))),
            }
        }
        Ok(groups.into_iter().map(|(k, s)| (k, s.finish())).collect())
    }
}
