//! tabedit Ops
//!
//! The closed operation catalog and its atomic executor.
//!
//! # Core Concepts
//!
//! - [`OpKind`]: one typed table mutation
//! - [`Operation`]: a kind plus its [`DeclaredEffect`]
//! - [`Batch`]: operations applied all-or-nothing
//! - [`Executor`]: applies a batch to a copy of the table
//! - [`Formula`]: row-wise expressions used by assignments and filters
//! - [`ground_batch`]: checks selectors before execution
//!
//! # Example
//!
//! ```rust,ignore
//! use tabedit_ops::{Batch, Executor, Formula, OpKind};
//!
//! let batch = Batch::new().with(OpKind::Filter {
//!     predicate: Formula::parse("Age >= 30")?,
//! });
//! let next = Executor::new().execute(&table, &batch)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod executor;
mod expr;
mod group;
mod grounding;
mod operation;
mod stats;

pub use error::{ApplyResult, EvalError, ExprError, OperationError, OperationErrorKind};
pub use executor::Executor;
pub use expr::{BinaryOp, Expr, Formula, UnaryOp};
pub use group::{aggregate, group_rows, Group};
pub use grounding::{ground_batch, require_column, GroundingError, GroundingIssue};
pub use operation::{
    AggFunc, Assignment, Batch, CellEffect, ChangedRows, ColumnEffect, DeclaredEffect, Direction,
    Keep, Measure, OpKind, Operation, OutlierPolicy, OutlierRule, RowEffect, SortKey,
};
pub use stats::{is_outlier, mean, outlier_bounds, quantile, sample_std_dev};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
