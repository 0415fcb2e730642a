//! Squashed Frame Store: a small typed-column dataframe plus the
//! row-bind/row-slice operations Fit Information's `merge`/`split` are
//! built on.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::monoid::BorrowingMonoid;

/// One column's storage. `Float32` is used to persist per-bin null
/// log-probabilities on disk as a space optimization.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Str(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float32(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    fn slice(&self, range: std::ops::Range<usize>) -> Column {
        match self {
            Column::Int(v) => Column::Int(v[range].to_vec()),
            Column::Float32(v) => Column::Float32(v[range].to_vec()),
            Column::Float64(v) => Column::Float64(v[range].to_vec()),
            Column::Str(v) => Column::Str(v[range].to_vec()),
        }
    }

    fn extend_from(&mut self, other: &Column) {
        match (self, other) {
            (Column::Int(a), Column::Int(b)) => a.extend_from_slice(b),
            (Column::Float32(a), Column::Float32(b)) => a.extend_from_slice(b),
            (Column::Float64(a), Column::Float64(b)) => a.extend_from_slice(b),
            (Column::Str(a), Column::Str(b)) => a.extend_from_slice(b),
            _ => panic!("column dtype mismatch during row-bind"),
        }
    }
}

/// An ordered set of named, typed columns with a shared row count.
/// Duplicate column names overwrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: IndexMap<String, Column>,
    rows: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self { columns: IndexMap::new(), rows: 0 }
    }

    pub fn with_column(mut self, name: impl Into<String>, col: Column) -> Self {
        self.set_column(name, col);
        self
    }

    pub fn set_column(&mut self, name: impl Into<String>, col: Column) {
        let name = name.into();
        if self.columns.is_empty() {
            self.rows = col.len();
        } else {
            assert_eq!(
                col.len(),
                self.rows,
                "column {name} has {} rows, frame has {}",
                col.len(),
                self.rows
            );
        }
        self.columns.insert(name, col);
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }

    /// Row-slice `[start, end)`. Used by `split`.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Frame {
        let mut out = Frame::new();
        out.rows = range.len();
        for (name, col) in &self.columns {
            out.columns.insert(name.clone(), col.slice(range.clone()));
        }
        out
    }

    /// Row-binds `frames` in the given order. All frames must share the
    /// same column names and dtypes. A thin wrapper over the
    /// `BorrowingMonoid` fold below, so row-binding two frames and
    /// row-binding a whole chromosome order go through the same
    /// mutate-in-place combine.
    pub fn row_bind(frames: &[Frame]) -> Frame {
        let mut out = Frame::zero();
        for frame in frames {
            out.op_mut(frame);
        }
        out
    }
}

/// Row-bind is the natural `BorrowingMonoid` for a `Frame`: `zero()` is
/// the empty frame, `op_mut` extends each column in place rather than
/// reallocating, so folding over many per-chromosome frames stays
/// linear in the total row count.
impl BorrowingMonoid for Frame {
    fn zero() -> Self {
        Frame::new()
    }

    fn op(mut self, other: &Self) -> Self {
        self.op_mut(other);
        self
    }

    fn op_mut(&mut self, other: &Self) {
        if self.columns.is_empty() {
            *self = other.clone();
            return;
        }
        if other.columns.is_empty() {
            return;
        }
        let names: Vec<String> = self.columns.keys().cloned().collect();
        for name in names {
            let col = self
                .columns
                .get_mut(&name)
                .unwrap_or_else(|| panic!("frame missing column {name}"));
            let other_col = other
                .column(&name)
                .unwrap_or_else(|| panic!("frame missing column {name}"));
            col.extend_from(other_col);
        }
        self.rows += other.rows;
    }
}

/// Maps chromosome name -> its squashed row range `[start, end)`, the
/// prefix-sum offsets over chromosome bin counts. `merge`/`split` in
/// `fit_info.rs` are built directly on top of this.
pub fn merge_by_chrom(frames: &HashMap<String, Frame>, order: &[String]) -> Frame {
    let ordered: Vec<Frame> =
        order.iter().map(|c| frames.get(c).cloned().unwrap_or_default()).collect();
    Frame::row_bind(&ordered)
}

pub fn split_by_offsets(
    frame: &Frame,
    order: &[String],
    offsets: &[u64],
) -> HashMap<String, Frame> {
    let mut out = HashMap::new();
    for (i, chrom) in order.iter().enumerate() {
        let start = offsets[i] as usize;
        let end = offsets[i + 1] as usize;
        out.insert(chrom.clone(), frame.slice(start..end));
    }
    out
}
