// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]

//! bedsweep: set algebra and statistical reduction over sorted genomic
//! interval streams.
//!
//! The core is a single-pass sweep engine: a sliding window over one or
//! two sorted BED streams, classified by a pluggable range predicate and
//! fanned out to interval-accumulating visitors that each emit one value
//! per reference.
//!
//! # Example
//!
//! ```rust,no_run
//! use bedsweep::commands::{run_map, MapConfig, MapOp};
//! use bedsweep::predicate::Predicate;
//!
//! let mut cfg = MapConfig::new(Predicate::Overlapping(1));
//! cfg.ops = vec![MapOp::Mean];
//! cfg.echo = true;
//! let mut out = std::io::stdout();
//! run_map(&cfg, "ref.bed", Some("map.bed"), &mut out).unwrap();
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod interval;
pub mod output;
pub mod pool;
pub mod predicate;
pub mod reader;
pub mod sweep;
pub mod visitors;

pub use error::{Result, SweepError};
pub use interval::{Interval, Strand};
pub use pool::{Pool, PoolId, PoolStats};
pub use predicate::{Denominator, Predicate, Relation};
pub use reader::{open_source, ReaderConfig, ValidatingReader};
pub use sweep::{sweep_paired, sweep_single, SweepStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::{run_check_sort, run_closest, run_map, ClosestConfig, MapConfig, MapOp};
    pub use crate::error::{Result, SweepError};
    pub use crate::interval::{Interval, Strand};
    pub use crate::pool::Pool;
    pub use crate::predicate::{Denominator, Predicate, Relation};
    pub use crate::reader::{open_source, ReaderConfig, ValidatingReader};
    pub use crate::sweep::{sweep_paired, sweep_single};
    pub use crate::visitors::{MultiVisitor, Visitor};
}
