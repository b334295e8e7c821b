//! Validation-only pass: confirm inputs parse and sit in sort order.

use crate::error::Result;
use crate::pool::Pool;
use crate::reader::{open_source, ReaderConfig};

/// Validate each input ("-" for stdin). Succeeds quietly; the first bad
/// row aborts with its file and line.
pub fn run_check_sort(paths: &[String], nested: bool) -> Result<()> {
    for path in paths {
        let cfg = ReaderConfig::new(path.as_str()).with_nested_check(nested);
        let mut reader = open_source(path, cfg)?;
        let mut pool = Pool::new();
        let rows = reader.validate_to_end(&mut pool)?;
        log::info!("{path}: {rows} rows in sort order");
    }
    Ok(())
}
