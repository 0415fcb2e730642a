//! Small local reduction trait, in the spirit of `dmr/llr_model.rs`'s
//! `AggregatedCounts` (which folds per-region evidence through an
//! explicit `zero()`/`op()` pair). Used here to combine per-chromosome
//! frames and multi-start fit results without bespoke glue at each call
//! site.

pub trait Monoid: Sized {
    fn zero() -> Self;
    fn combine(self, other: Self) -> Self;
}

/// Variant that combines by reference, for accumulation loops that don't
/// want to move the running total in and out on every iteration.
pub trait BorrowingMonoid: Sized {
    fn zero() -> Self;
    fn op(self, other: &Self) -> Self;
    fn op_mut(&mut self, other: &Self);
}

pub fn fold_all<T: Monoid>(items: impl IntoIterator<Item = T>) -> T {
    items.into_iter().fold(T::zero(), Monoid::combine)
}
