//! Least-Squares Monte Carlo (Longstaff-Schwartz) valuation on pre-simulated
//! path ensembles: American-style options, the option to invest in a project
//! (real option), and real options with suspension, resumption and
//! abandonment after investment.
//!
//! The crate never simulates paths. Callers supply a time x path (x factor)
//! [`PathEnsemble`] whose row 0 is the valuation date.
pub mod basis;
pub mod error;
pub mod regression;
pub mod scenarios;
pub mod stats;
pub mod types;

#[cfg(feature = "american")]
pub mod american;

#[cfg(feature = "real_options")]
pub mod real_options;

pub use error::LsmError;
pub use types::*;

/// Standard result type for all LSM valuation operations
pub type LsmResult<T> = Result<T, LsmError>;
