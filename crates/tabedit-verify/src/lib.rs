//! tabedit Verify
//!
//! Checks that an applied batch did what it declared. The verifier never
//! trusts the executor's output on its own: it recomputes symbolic counts
//! from each step's input and tests the properties the request implies.
//!
//! # Example
//!
//! ```rust,ignore
//! use tabedit_verify::verify;
//!
//! let post = executor.execute(&pre, &batch)?;
//! let result = verify(&pre, &post, &batch);
//! if !result.pass {
//!     eprintln!("{}", result.mismatch.unwrap_or_default());
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod result;
mod verifier;

pub use result::{Aspect, Check, VerificationResult};
pub use verifier::verify;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
