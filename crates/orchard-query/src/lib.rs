//! Query construction and execution for orchard.
//!
//! [`Expr`] is the composable SQL expression tree; [`kwargs`] compiles
//! `field__operator` strings into it; [`QuerySet`] accumulates filters,
//! ordering and paging against one model and executes through a
//! [`DatabaseScope`](orchard_core::DatabaseScope); [`hydrate`] loads
//! related objects after a fetch.

pub mod expr;
pub mod hydrate;
pub mod kwargs;
pub mod queryset;

#[cfg(test)]
mod testing;

pub use expr::{BinaryOp, Expr, UnaryOp, and_, eq, ge, gt, le, lt, ne, not_, or_};
pub use hydrate::{fetch_related_many, fetch_related_one};
pub use queryset::{CoalesceQuery, DictQuery, OrderDir, Prefetch, QuerySet, ValuesQuery};

/// Unwrap a `Result` inside a function returning `Outcome`.
macro_rules! try_res {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => return ::asupersync::Outcome::Err(e),
        }
    };
}
pub(crate) use try_res;
