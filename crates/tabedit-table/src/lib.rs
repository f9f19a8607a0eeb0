//! tabedit Table
//!
//! Tabular values, their JSON wire format and per-thread version history.
//!
//! # Core Concepts
//!
//! - [`Table`]: ordered unique columns plus sparse rows, cheap to clone
//! - [`Value`]: scalar cell content (`null`, bool, number, text)
//! - [`WireTable`]: `{headers, data}` exchange shape
//! - [`TableFingerprint`]: Blake3 content hash of a table
//! - [`SnapshotStore`]: bounded history used for rollback
//!
//! # Example
//!
//! ```rust,ignore
//! use tabedit_table::{from_json_str, to_json_string};
//!
//! let table = from_json_str(r#"{"headers":["Name"],"data":[{"Name":"A"}]}"#)?;
//! assert_eq!(table.row_count(), 1);
//! let json = to_json_string(&table)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod fingerprint;
mod snapshot;
mod table;
mod value;
mod wire;

pub use error::{FingerprintError, SnapshotError, TableError};
pub use fingerprint::TableFingerprint;
pub use snapshot::{Snapshot, SnapshotStore};
pub use table::{row, Row, Table};
pub use value::{Value, ValueKey};
pub use wire::{from_json_str, to_json, to_json_string, WireTable};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
