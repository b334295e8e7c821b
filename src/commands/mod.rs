//! Command drivers invoked by the CLI: one module per subcommand.

pub mod check;
pub mod closest;
pub mod map;

pub use check::run_check_sort;
pub use closest::{run_closest, ClosestConfig};
pub use map::{run_map, MapConfig, MapOp};
