//! The visitor protocol driven by the sweep, and the composite that lets
//! independent reducers share one pass.
//!
//! Callback ordering contract (the drivers guarantee this, visitors may
//! rely on it):
//! 1. `on_start(r)` precedes every other callback for reference `r`.
//! 2. For one reference, all `on_delete` calls come before any `on_add`.
//! 3. `on_delete` calls arrive in ascending sort order.
//! 4. `on_done` fires exactly once per `on_start`.
//! 5. `on_purge` fires between references when the window goes empty with
//!    input remaining.
//! 6. `on_end` is the final callback.

pub mod bed;
pub mod numeric;
pub mod ranked;

use std::fmt::Write as _;

use crate::error::Result;
use crate::interval::Interval;
use crate::output::RowWriter;

pub use bed::{EchoOverlapSize, NeighborCount, WeightedAverage, WeightedMean};
pub use numeric::{CoeffVariation, Count, Extreme, Extremum, Indicator, Mean, StdDev, Sum, Variance};
pub use ranked::{MedianAbsoluteDeviation, RollingKth, RollingKthAverage, TrimmedMean};

/// An accumulator observing window transitions; emits one output per
/// reference from `on_done`.
pub trait Visitor {
    fn on_start(&mut self, _reference: &Interval, _seq: u64) {}
    fn on_add(&mut self, map: &Interval, seq: u64);
    fn on_delete(&mut self, map: &Interval, seq: u64);
    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()>;
    fn on_purge(&mut self) {}
    fn on_end(&mut self, _out: &mut RowWriter<'_>) -> Result<()> {
        Ok(())
    }
}

/// The measurement a numeric visitor accumulates; rows without one poison
/// the statistic into the NAN sentinel rather than panicking.
#[inline]
pub(crate) fn score(iv: &Interval) -> f64 {
    iv.measure.unwrap_or(f64::NAN)
}

/// Dispatches every event to all registered visitors in registration
/// order, and assembles one delimited output row per reference (optionally
/// prefixed by the reference row itself).
pub struct MultiVisitor {
    visitors: Vec<Box<dyn Visitor>>,
    echo: bool,
    delim: String,
    ref_line: String,
}

impl MultiVisitor {
    pub fn new(visitors: Vec<Box<dyn Visitor>>, echo: bool, delim: impl Into<String>) -> Self {
        Self {
            visitors,
            echo,
            delim: delim.into(),
            ref_line: String::new(),
        }
    }

    fn silent(&self) -> bool {
        !self.echo && self.visitors.is_empty()
    }
}

impl Visitor for MultiVisitor {
    fn on_start(&mut self, reference: &Interval, seq: u64) {
        self.ref_line.clear();
        let _ = write!(self.ref_line, "{reference}");
        for v in &mut self.visitors {
            v.on_start(reference, seq);
        }
    }

    fn on_add(&mut self, map: &Interval, seq: u64) {
        for v in &mut self.visitors {
            v.on_add(map, seq);
        }
    }

    fn on_delete(&mut self, map: &Interval, seq: u64) {
        for v in &mut self.visitors {
            v.on_delete(map, seq);
        }
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        if self.silent() {
            return Ok(());
        }
        if self.echo {
            out.text(&self.ref_line)?;
        }
        for (i, v) in self.visitors.iter_mut().enumerate() {
            if self.echo || i > 0 {
                out.text(&self.delim)?;
            }
            v.on_done(out)?;
        }
        out.newline()
    }

    fn on_purge(&mut self) {
        for v in &mut self.visitors {
            v.on_purge();
        }
    }

    fn on_end(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        for v in &mut self.visitors {
            v.on_end(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records the callback stream for ordering assertions.
    #[derive(Default)]
    pub struct Recorder {
        pub events: Vec<String>,
    }

    impl Visitor for Recorder {
        fn on_start(&mut self, r: &Interval, _seq: u64) {
            self.events.push(format!("start {} {} {}", r.chrom, r.start, r.end));
        }
        fn on_add(&mut self, m: &Interval, _seq: u64) {
            self.events.push(format!("add {} {} {}", m.chrom, m.start, m.end));
        }
        fn on_delete(&mut self, m: &Interval, _seq: u64) {
            self.events.push(format!("del {} {} {}", m.chrom, m.start, m.end));
        }
        fn on_done(&mut self, _out: &mut RowWriter<'_>) -> Result<()> {
            self.events.push("done".to_string());
            Ok(())
        }
        fn on_purge(&mut self) {
            self.events.push("purge".to_string());
        }
        fn on_end(&mut self, _out: &mut RowWriter<'_>) -> Result<()> {
            self.events.push("end".to_string());
            Ok(())
        }
    }

    pub fn run_row(v: &mut dyn Visitor) -> String {
        let mut buf = Vec::new();
        {
            let mut w = RowWriter::new(&mut buf);
            v.on_done(&mut w).unwrap();
        }
        String::from_utf8(buf).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::run_row;
    use super::*;

    #[test]
    fn multi_visitor_joins_ops_with_delim() {
        let mut mv = MultiVisitor::new(
            vec![Box::new(Count::new()), Box::new(Indicator::new())],
            true,
            "|",
        );
        let r = Interval::new("chr1", 0, 100);
        let m = Interval::new("chr1", 10, 20);
        mv.on_start(&r, 0);
        mv.on_add(&m, 1);
        assert_eq!(run_row(&mut mv), "chr1\t0\t100|1|1\n");
    }

    #[test]
    fn multi_visitor_without_echo() {
        let mut mv = MultiVisitor::new(vec![Box::new(Count::new())], false, "|");
        let r = Interval::new("chr1", 0, 100);
        mv.on_start(&r, 0);
        assert_eq!(run_row(&mut mv), "0\n");
    }

    #[test]
    fn empty_multi_visitor_emits_nothing() {
        let mut mv = MultiVisitor::new(Vec::new(), false, "|");
        let r = Interval::new("chr1", 0, 100);
        mv.on_start(&r, 0);
        assert_eq!(run_row(&mut mv), "");
    }
}
