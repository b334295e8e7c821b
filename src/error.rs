//! Error kinds surfaced by the sweep core.
//!
//! Every variant is fatal: errors propagate straight to the caller of the
//! sweep, are never retried, and never downgrade to warnings. The `NAN`
//! output sentinel is a value, not an error.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("{file}, line {line}: {msg}")]
    Parse {
        file: String,
        line: usize,
        msg: String,
    },

    #[error("{file}, line {line}: not sorted: {msg}")]
    SortOrder {
        file: String,
        line: usize,
        msg: String,
    },

    #[error("usage: {0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("resource exhausted: {0}")]
    Resource(String),
}

pub type Result<T> = std::result::Result<T, SweepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_file_and_line() {
        let e = SweepError::Parse {
            file: "x.bed".into(),
            line: 7,
            msg: "start coordinate contains non-numeric character: q".into(),
        };
        let s = e.to_string();
        assert!(s.contains("x.bed"));
        assert!(s.contains("line 7"));
    }
}
