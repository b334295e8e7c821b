//! Set-algebra visitors that need the reference's coordinates, not just
//! the window's measurements.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::interval::{overlap_len, Interval};
use crate::output::RowWriter;
use crate::visitors::{score, Visitor};

/// Per-map-item overlap lengths with the reference, in sort order, joined
/// by the list delimiter.
pub struct EchoOverlapSize {
    multidelim: String,
    ref_span: (u64, u64),
    window: BTreeMap<u64, (u64, u64)>,
}

impl EchoOverlapSize {
    pub fn new(multidelim: impl Into<String>) -> Self {
        Self {
            multidelim: multidelim.into(),
            ref_span: (0, 0),
            window: BTreeMap::new(),
        }
    }
}

impl Visitor for EchoOverlapSize {
    fn on_start(&mut self, reference: &Interval, _seq: u64) {
        self.ref_span = (reference.start, reference.end);
    }

    fn on_add(&mut self, map: &Interval, seq: u64) {
        self.window.insert(seq, (map.start, map.end));
    }

    fn on_delete(&mut self, _map: &Interval, seq: u64) {
        self.window.remove(&seq);
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        if self.window.is_empty() {
            return out.nan();
        }
        let (rs, re) = self.ref_span;
        for (i, (s, e)) in self.window.values().enumerate() {
            if i > 0 {
                out.text(&self.multidelim)?;
            }
            out.uint(overlap_len(*s, *e, rs, re))?;
        }
        Ok(())
    }
}

/// Base-pair weighted mean: Σ overlap(map, ref) * score / ref length.
#[derive(Default)]
pub struct WeightedMean {
    ref_span: (u64, u64),
    ref_len: u64,
    window: FxHashMap<u64, (u64, u64, f64)>,
}

impl WeightedMean {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Visitor for WeightedMean {
    fn on_start(&mut self, reference: &Interval, _seq: u64) {
        self.ref_span = (reference.start, reference.end);
        self.ref_len = reference.len();
    }

    fn on_add(&mut self, map: &Interval, seq: u64) {
        self.window.insert(seq, (map.start, map.end, score(map)));
    }

    fn on_delete(&mut self, _map: &Interval, seq: u64) {
        self.window.remove(&seq);
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        if self.window.is_empty() || self.ref_len == 0 {
            return out.nan();
        }
        let (rs, re) = self.ref_span;
        let mut total = 0.0;
        let mut any = false;
        for (s, e, v) in self.window.values() {
            let ovl = overlap_len(*s, *e, rs, re);
            if ovl > 0 {
                any = true;
                total += ovl as f64 * v;
            }
        }
        if any {
            out.value(total / self.ref_len as f64)
        } else {
            out.nan()
        }
    }
}

/// Fraction-weighted average: Σ w·score / Σ w with w = overlap / ref length.
#[derive(Default)]
pub struct WeightedAverage {
    ref_span: (u64, u64),
    ref_len: u64,
    window: FxHashMap<u64, (u64, u64, f64)>,
}

impl WeightedAverage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Visitor for WeightedAverage {
    fn on_start(&mut self, reference: &Interval, _seq: u64) {
        self.ref_span = (reference.start, reference.end);
        self.ref_len = reference.len();
    }

    fn on_add(&mut self, map: &Interval, seq: u64) {
        self.window.insert(seq, (map.start, map.end, score(map)));
    }

    fn on_delete(&mut self, _map: &Interval, seq: u64) {
        self.window.remove(&seq);
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        if self.window.is_empty() || self.ref_len == 0 {
            return out.nan();
        }
        let (rs, re) = self.ref_span;
        let mut total = 0.0;
        let mut weight_sum = 0.0;
        for (s, e, v) in self.window.values() {
            let w = overlap_len(*s, *e, rs, re) as f64 / self.ref_len as f64;
            total += w * v;
            weight_sum += w;
        }
        // all-zero weights divide out to NaN, rendered as the sentinel
        out.value(total / weight_sum)
    }
}

/// Window size excluding the reference itself. Used by the single-stream
/// sweep, where the reference is one of the map items.
#[derive(Default)]
pub struct NeighborCount {
    members: std::collections::BTreeSet<u64>,
    ref_seq: u64,
}

impl NeighborCount {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Visitor for NeighborCount {
    fn on_start(&mut self, _reference: &Interval, seq: u64) {
        self.ref_seq = seq;
    }

    fn on_add(&mut self, _map: &Interval, seq: u64) {
        self.members.insert(seq);
    }

    fn on_delete(&mut self, _map: &Interval, seq: u64) {
        self.members.remove(&seq);
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        let n = self.members.len() - usize::from(self.members.contains(&self.ref_seq));
        out.uint(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitors::testing::run_row;

    fn m(start: u64, end: u64, v: f64) -> Interval {
        let mut iv = Interval::new("chr1", start, end);
        iv.measure = Some(v);
        iv
    }

    #[test]
    fn echo_overlap_lengths_in_sort_order() {
        let mut e = EchoOverlapSize::new(";");
        e.on_start(&Interval::new("chr1", 0, 100), 0);
        e.on_add(&m(10, 20, 0.0), 1);
        e.on_add(&m(90, 150, 0.0), 2);
        assert_eq!(run_row(&mut e), "10;10");
        e.on_delete(&m(10, 20, 0.0), 1);
        assert_eq!(run_row(&mut e), "10");
        e.on_delete(&m(90, 150, 0.0), 2);
        assert_eq!(run_row(&mut e), "NAN");
    }

    #[test]
    fn weighted_mean_is_bp_scaled() {
        // ref 100 long; 10bp at 2.0 and 10bp at 4.0 -> (20+40)/100
        let mut w = WeightedMean::new();
        w.on_start(&Interval::new("chr1", 0, 100), 0);
        w.on_add(&m(10, 20, 2.0), 1);
        w.on_add(&m(50, 60, 4.0), 2);
        assert_eq!(run_row(&mut w), "0.6");
    }

    #[test]
    fn weighted_mean_needs_real_overlap() {
        // a ranged-predicate window can hold items that do not overlap
        let mut w = WeightedMean::new();
        w.on_start(&Interval::new("chr1", 50, 60), 0);
        w.on_add(&m(0, 10, 3.0), 1);
        assert_eq!(run_row(&mut w), "NAN");
    }

    #[test]
    fn weighted_average_normalizes_by_weight() {
        // equal quarter-length overlaps: plain average of the two scores
        let mut w = WeightedAverage::new();
        w.on_start(&Interval::new("chr1", 0, 100), 0);
        w.on_add(&m(10, 35, 2.0), 1);
        w.on_add(&m(50, 75, 4.0), 2);
        assert_eq!(run_row(&mut w), "3.0");
    }

    #[test]
    fn neighbor_count_excludes_the_reference() {
        let mut n = NeighborCount::new();
        let a = Interval::new("chr1", 10, 20);
        let b = Interval::new("chr1", 15, 25);
        n.on_start(&a, 0);
        n.on_add(&a, 0);
        n.on_add(&b, 1);
        assert_eq!(run_row(&mut n), "1");
        // same window, the other element as reference
        n.on_start(&b, 1);
        assert_eq!(run_row(&mut n), "1");
    }
}
