//! Order-statistic visitors over an incrementally maintained rank cursor.
//!
//! The window's measurements live in an ordered multiset keyed by
//! (value, allocation sequence); the sequence breaks value ties with a
//! stable total order. A cursor into the multiset moves at most one rank
//! per add/delete and is re-seeked to the target rank at report time, so a
//! sliding window never re-sorts.

use std::collections::BTreeSet;
use std::ops::Bound::{Excluded, Unbounded};

use crate::error::{Result, SweepError};
use crate::interval::Interval;
use crate::output::RowWriter;
use crate::visitors::{score, Visitor};

/// Multiset key: measurement value, then allocation sequence.
#[derive(Debug, Clone, Copy)]
pub struct ScoreKey {
    pub value: f64,
    pub seq: u64,
}

impl ScoreKey {
    pub fn new(value: f64, seq: u64) -> Self {
        Self { value, seq }
    }
}

impl PartialEq for ScoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for ScoreKey {}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// `ceil(x)` with protection against float dust on mathematically integral
/// products like `0.3 * 10`.
fn fuzzy_ceil(x: f64) -> usize {
    let nearest = x.round();
    if (x - nearest).abs() < 1e-9 {
        nearest as usize
    } else {
        x.ceil() as usize
    }
}

fn is_integral(x: f64) -> bool {
    (x - x.round()).abs() < 1e-9
}

/// Ordered multiset plus a rank cursor.
#[derive(Default)]
pub(crate) struct RankedScores {
    set: BTreeSet<ScoreKey>,
    cursor: Option<ScoreKey>,
    pos: usize,
}

impl RankedScores {
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.set.iter().map(|k| k.value)
    }

    pub fn insert(&mut self, key: ScoreKey) {
        self.set.insert(key);
        match self.cursor {
            None => {
                // fresh cursor lands on the smallest element
                self.cursor = self.set.iter().next().copied();
                self.pos = 0;
            }
            Some(cur) => {
                if key < cur {
                    self.pos += 1;
                }
            }
        }
    }

    pub fn remove(&mut self, key: ScoreKey) {
        let cur = self.cursor.expect("cursor present while removing");
        if key < cur {
            self.pos -= 1;
        } else if key == cur {
            if let Some(prev) = self.set.range(..cur).next_back().copied() {
                self.cursor = Some(prev);
                self.pos -= 1;
            } else {
                // cursor at the bottom: slide right; rank stays put
                self.cursor = self.set.range((Excluded(cur), Unbounded)).next().copied();
            }
        }
        self.set.remove(&key);
    }

    /// Step the cursor to `target` and return the element there.
    pub fn seek(&mut self, target: usize) -> ScoreKey {
        debug_assert!(target < self.set.len());
        let mut cur = self.cursor.expect("cursor present while seeking");
        while self.pos < target {
            cur = self
                .set
                .range((Excluded(cur), Unbounded))
                .next()
                .copied()
                .expect("rank below multiset size");
            self.pos += 1;
        }
        while self.pos > target {
            cur = self
                .set
                .range(..cur)
                .next_back()
                .copied()
                .expect("rank is non-negative");
            self.pos -= 1;
        }
        self.cursor = Some(cur);
        cur
    }

    fn next_after(&self, key: ScoreKey) -> Option<ScoreKey> {
        self.set.range((Excluded(key), Unbounded)).next().copied()
    }

    /// The k-th value for quantile `q`, `k = ceil(q*n)`, 1-based.
    pub fn kth_value(&mut self, q: f64) -> f64 {
        debug_assert!(!self.is_empty());
        let n = self.len();
        let idx = fuzzy_ceil(q * n as f64).saturating_sub(1).min(n - 1);
        self.seek(idx).value
    }

    /// The k-th value, averaging the two bracketing elements when `q*n`
    /// lands on an integer rank.
    pub fn kth_average(&mut self, q: f64) -> f64 {
        debug_assert!(!self.is_empty());
        let n = self.len();
        if n == 1 {
            return self.seek(0).value;
        }
        let x = q * n as f64;
        let idx = fuzzy_ceil(x).saturating_sub(1).min(n - 1);
        let at = self.seek(idx);
        if is_integral(x) && idx + 1 < n {
            let next = self
                .next_after(at)
                .expect("bracketing element exists below the top rank");
            (at.value + next.value) / 2.0
        } else {
            at.value
        }
    }
}

/// The k-th order statistic of the window, `k = ceil(q*n)`.
pub struct RollingKth {
    q: f64,
    ranked: RankedScores,
}

impl RollingKth {
    pub fn new(q: f64) -> Result<Self> {
        check_quantile(q)?;
        Ok(Self {
            q,
            ranked: RankedScores::default(),
        })
    }
}

impl Visitor for RollingKth {
    fn on_add(&mut self, map: &Interval, seq: u64) {
        self.ranked.insert(ScoreKey::new(score(map), seq));
    }

    fn on_delete(&mut self, map: &Interval, seq: u64) {
        self.ranked.remove(ScoreKey::new(score(map), seq));
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        if self.ranked.is_empty() {
            return out.nan();
        }
        let v = self.ranked.kth_value(self.q);
        out.value(v)
    }
}

/// As `RollingKth`, but interpolating between bracketing elements at
/// integral ranks. The median is the `q = 0.5` specialization.
pub struct RollingKthAverage {
    q: f64,
    ranked: RankedScores,
}

impl RollingKthAverage {
    pub fn new(q: f64) -> Result<Self> {
        check_quantile(q)?;
        Ok(Self {
            q,
            ranked: RankedScores::default(),
        })
    }

    pub fn median() -> Self {
        Self {
            q: 0.5,
            ranked: RankedScores::default(),
        }
    }
}

impl Visitor for RollingKthAverage {
    fn on_add(&mut self, map: &Interval, seq: u64) {
        self.ranked.insert(ScoreKey::new(score(map), seq));
    }

    fn on_delete(&mut self, map: &Interval, seq: u64) {
        self.ranked.remove(ScoreKey::new(score(map), seq));
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        if self.ranked.is_empty() {
            return out.nan();
        }
        let v = self.ranked.kth_average(self.q);
        out.value(v)
    }
}

/// `mult * median(|x - median(x)|)`; needs at least two values.
pub struct MedianAbsoluteDeviation {
    mult: f64,
    ranked: RankedScores,
}

impl MedianAbsoluteDeviation {
    pub fn new(mult: f64) -> Self {
        Self {
            mult,
            ranked: RankedScores::default(),
        }
    }
}

impl Visitor for MedianAbsoluteDeviation {
    fn on_add(&mut self, map: &Interval, seq: u64) {
        self.ranked.insert(ScoreKey::new(score(map), seq));
    }

    fn on_delete(&mut self, map: &Interval, seq: u64) {
        self.ranked.remove(ScoreKey::new(score(map), seq));
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        let n = self.ranked.len();
        if n <= 1 {
            return out.nan();
        }
        let median = self.ranked.kth_average(0.5);
        let mut devs: Vec<f64> = self.ranked.values().map(|v| (v - median).abs()).collect();
        let mad = if n % 2 == 0 {
            let (_, lo, _) = devs.select_nth_unstable_by(n / 2 - 1, f64::total_cmp);
            let a = *lo;
            let (_, hi, _) = devs.select_nth_unstable_by(n / 2, f64::total_cmp);
            (a + *hi) / 2.0
        } else {
            *devs.select_nth_unstable_by(n / 2, f64::total_cmp).1
        };
        out.value(mad * self.mult)
    }
}

/// A marker into the multiset carrying its rank and the running sum of
/// everything at or below it.
#[derive(Default)]
struct Marker {
    key: Option<ScoreKey>,
    pos: usize,
    sum: f64,
}

/// Mean of the window with the bottom `lo_q` and top `hi_q` quantiles
/// trimmed away. Two cursors with running sums; the mean between them
/// falls out without revisiting the window.
pub struct TrimmedMean {
    lo_q: f64,
    hi_q: f64,
    /// `lo_q + hi_q == 1`: degenerates to a single k-th element.
    do_kth: bool,
    /// `lo_q == hi_q`: force the same number trimmed from both ends.
    symmetric: bool,
    set: BTreeSet<ScoreKey>,
    lower: Marker,
    upper: Marker,
}

impl TrimmedMean {
    pub fn new(lo_q: f64, hi_q: f64) -> Result<Self> {
        let eps = f64::EPSILON * 4.0;
        if !(0.0..=1.0).contains(&lo_q) || !(0.0..=1.0).contains(&hi_q) {
            return Err(SweepError::Argument(format!(
                "trim fractions must be within [0, 1], got {lo_q} and {hi_q}"
            )));
        }
        if lo_q + hi_q > 1.0 + eps {
            return Err(SweepError::Argument(format!(
                "trim fractions must satisfy lo + hi <= 1, got {lo_q} + {hi_q}"
            )));
        }
        Ok(Self {
            lo_q,
            hi_q,
            do_kth: (1.0 - lo_q - hi_q).abs() <= eps,
            symmetric: (lo_q - hi_q).abs() <= eps,
            set: BTreeSet::new(),
            lower: Marker::default(),
            upper: Marker::default(),
        })
    }

    fn track_lower(&self) -> bool {
        self.lo_q > 0.0 && !self.do_kth
    }

    fn marker_add(marker: &mut Marker, key: ScoreKey) {
        match marker.key {
            None => {
                // first element of a fresh multiset
                marker.key = Some(key);
                marker.pos = 0;
                marker.sum = key.value;
            }
            Some(cur) => {
                if key < cur {
                    marker.pos += 1;
                    marker.sum += key.value;
                }
            }
        }
    }

    fn marker_remove(set: &BTreeSet<ScoreKey>, marker: &mut Marker, key: ScoreKey) {
        let cur = marker.key.expect("marker present while removing");
        if key < cur {
            marker.pos -= 1;
            marker.sum -= key.value;
        } else if key == cur {
            marker.sum -= key.value;
            if let Some(prev) = set.range(..cur).next_back().copied() {
                marker.key = Some(prev);
                marker.pos -= 1;
            } else {
                let next = set.range((Excluded(cur), Unbounded)).next().copied();
                if let Some(nk) = next {
                    marker.sum += nk.value;
                }
                marker.key = next;
            }
        }
    }

    fn marker_seek(set: &BTreeSet<ScoreKey>, marker: &mut Marker, target: usize) {
        let mut cur = marker.key.expect("marker present while seeking");
        while marker.pos < target {
            cur = set
                .range((Excluded(cur), Unbounded))
                .next()
                .copied()
                .expect("rank below multiset size");
            marker.sum += cur.value;
            marker.pos += 1;
        }
        while marker.pos > target {
            marker.sum -= cur.value;
            cur = set
                .range(..cur)
                .next_back()
                .copied()
                .expect("rank is non-negative");
            marker.pos -= 1;
        }
        marker.key = Some(cur);
    }
}

impl Visitor for TrimmedMean {
    fn on_add(&mut self, map: &Interval, seq: u64) {
        let key = ScoreKey::new(score(map), seq);
        self.set.insert(key);
        if self.track_lower() {
            Self::marker_add(&mut self.lower, key);
        }
        Self::marker_add(&mut self.upper, key);
    }

    fn on_delete(&mut self, map: &Interval, seq: u64) {
        let key = ScoreKey::new(score(map), seq);
        if self.track_lower() {
            Self::marker_remove(&self.set, &mut self.lower, key);
        }
        Self::marker_remove(&self.set, &mut self.upper, key);
        self.set.remove(&key);
    }

    fn on_done(&mut self, out: &mut RowWriter<'_>) -> Result<()> {
        if self.set.is_empty() {
            return out.nan();
        }
        let n = self.set.len();
        let mut k_low = fuzzy_ceil(self.lo_q * n as f64);
        let mut k_high = n - fuzzy_ceil(self.hi_q * n as f64).min(n);
        if self.symmetric {
            k_low = k_low.max(n - k_high);
            k_high = n - k_low;
        }
        let do_low = k_low > 0 && !self.do_kth;
        let low_idx = k_low.saturating_sub(1);
        let high_idx = k_high.saturating_sub(1);

        if do_low {
            Self::marker_seek(&self.set, &mut self.lower, low_idx);
        }
        // the degenerate lo + hi == 1 form reports the k-th element itself,
        // at the same ceiling rank the rolling k-th uses
        let upper_idx = if self.do_kth { low_idx } else { high_idx };
        Self::marker_seek(&self.set, &mut self.upper, upper_idx);

        let upper = &self.upper;
        let lower = &self.lower;
        if self.do_kth || (do_low && upper.pos == lower.pos) {
            let key = upper.key.expect("marker present on non-empty window");
            out.value(key.value)
        } else if do_low {
            out.value((upper.sum - lower.sum) / (upper.pos - lower.pos) as f64)
        } else {
            out.value(upper.sum / (upper.pos + 1) as f64)
        }
    }
}

fn check_quantile(q: f64) -> Result<()> {
    if !(q > 0.0 && q <= 1.0) {
        return Err(SweepError::Argument(format!(
            "quantile must be in (0, 1], got {q}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitors::testing::run_row;

    fn m(start: u64, v: f64) -> Interval {
        let mut iv = Interval::new("chr1", start, start + 10);
        iv.measure = Some(v);
        iv
    }

    fn feed(v: &mut dyn Visitor, values: &[f64]) {
        for (i, &x) in values.iter().enumerate() {
            v.on_add(&m(i as u64 * 10, x), i as u64);
        }
    }

    #[test]
    fn cursor_tracks_adds_and_deletes() {
        let mut r = RankedScores::default();
        for (seq, v) in [3.0, 1.0, 2.0, 5.0].into_iter().enumerate() {
            r.insert(ScoreKey::new(v, seq as u64));
        }
        assert_eq!(r.seek(0).value, 1.0);
        assert_eq!(r.seek(3).value, 5.0);
        assert_eq!(r.seek(1).value, 2.0);

        // removing the cursor element slides it to a neighbor
        r.remove(ScoreKey::new(2.0, 2));
        assert_eq!(r.seek(1).value, 3.0);
        r.remove(ScoreKey::new(1.0, 1));
        assert_eq!(r.seek(0).value, 3.0);
        r.remove(ScoreKey::new(3.0, 0));
        r.remove(ScoreKey::new(5.0, 3));
        assert!(r.is_empty());

        // the cursor recovers after draining to empty
        r.insert(ScoreKey::new(9.0, 10));
        assert_eq!(r.seek(0).value, 9.0);
    }

    #[test]
    fn kth_uses_ceiling_rank() {
        let mut k = RollingKth::new(0.35).unwrap();
        feed(&mut k, &[10.0, 20.0, 30.0, 40.0]);
        // ceil(0.35 * 4) = 2 -> second smallest
        assert_eq!(run_row(&mut k), "20.0");

        let mut top = RollingKth::new(1.0).unwrap();
        feed(&mut top, &[10.0, 20.0, 30.0]);
        assert_eq!(run_row(&mut top), "30.0");

        let mut empty = RollingKth::new(0.5).unwrap();
        assert_eq!(run_row(&mut empty), "NAN");
    }

    #[test]
    fn quantile_bounds_are_argument_errors() {
        assert!(RollingKth::new(0.0).is_err());
        assert!(RollingKth::new(1.1).is_err());
        assert!(RollingKthAverage::new(-0.5).is_err());
    }

    #[test]
    fn median_of_even_and_odd_windows() {
        let mut med = RollingKthAverage::median();
        feed(&mut med, &[1.0, 9.0]);
        assert_eq!(run_row(&mut med), "5.0");

        let mut med = RollingKthAverage::median();
        feed(&mut med, &[1.0, 2.0, 9.0]);
        assert_eq!(run_row(&mut med), "2.0");

        let mut med = RollingKthAverage::median();
        feed(&mut med, &[4.0]);
        assert_eq!(run_row(&mut med), "4.0");
    }

    #[test]
    fn median_slides_with_the_window() {
        let mut med = RollingKthAverage::median();
        let rows: Vec<Interval> = [1.0, 3.0, 5.0, 7.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| m(i as u64 * 10, v))
            .collect();
        for (i, r) in rows.iter().enumerate() {
            med.on_add(r, i as u64);
        }
        assert_eq!(run_row(&mut med), "4.0");
        med.on_delete(&rows[0], 0);
        med.on_delete(&rows[1], 1);
        assert_eq!(run_row(&mut med), "6.0");
    }

    #[test]
    fn mad_matches_hand_computation() {
        // values 1, 2, 4, 8: median 3; |x-3| = 2,1,1,5; mad = 1.5
        let mut mad = MedianAbsoluteDeviation::new(1.0);
        feed(&mut mad, &[1.0, 2.0, 4.0, 8.0]);
        assert_eq!(run_row(&mut mad), "1.5");

        let mut scaled = MedianAbsoluteDeviation::new(2.0);
        feed(&mut scaled, &[1.0, 2.0, 4.0, 8.0]);
        assert_eq!(run_row(&mut scaled), "3.0");

        let mut single = MedianAbsoluteDeviation::new(1.0);
        feed(&mut single, &[5.0]);
        assert_eq!(run_row(&mut single), "NAN");
    }

    #[test]
    fn trimmed_mean_symmetric() {
        // 10 values 1..=10, trim 20% each end: mean of 3..=8 = 5.5
        let mut t = TrimmedMean::new(0.2, 0.2).unwrap();
        feed(&mut t, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        assert_eq!(run_row(&mut t), "5.5");
    }

    #[test]
    fn trimmed_mean_untrimmed_low_end() {
        // lo = 0: mean of everything below the upper cut
        let mut t = TrimmedMean::new(0.0, 0.5).unwrap();
        feed(&mut t, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(run_row(&mut t), "1.5");
    }

    #[test]
    fn trimmed_mean_degenerates_to_kth() {
        let mut t = TrimmedMean::new(0.3, 0.7).unwrap();
        feed(&mut t, &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]);
        assert_eq!(run_row(&mut t), "30.0");
    }

    #[test]
    fn degenerate_kth_agrees_with_rolling_kth_at_non_integral_ranks() {
        // lo*n = 2.1: the ceiling rank is 3, so both must report idx 2
        let values = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0];
        let mut t = TrimmedMean::new(0.3, 0.7).unwrap();
        let mut k = RollingKth::new(0.3).unwrap();
        feed(&mut t, &values);
        feed(&mut k, &values);
        assert_eq!(run_row(&mut t), "30.0");
        assert_eq!(run_row(&mut k), "30.0");
    }

    #[test]
    fn symmetric_degenerate_matches_the_median_on_odd_windows() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mut t = TrimmedMean::new(0.5, 0.5).unwrap();
        let mut med = RollingKthAverage::median();
        feed(&mut t, &values);
        feed(&mut med, &values);
        assert_eq!(run_row(&mut t), "3.0");
        assert_eq!(run_row(&mut med), "3.0");
    }

    #[test]
    fn trimmed_mean_slides_with_deletes() {
        let mut t = TrimmedMean::new(0.25, 0.25).unwrap();
        let rows: Vec<Interval> = [1.0, 2.0, 3.0, 100.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| m(i as u64 * 10, v))
            .collect();
        for (i, r) in rows.iter().enumerate() {
            t.on_add(r, i as u64);
        }
        // trim 1 from each end: mean(2, 3)
        assert_eq!(run_row(&mut t), "2.5");
        t.on_delete(&rows[3], 3);
        // window 1,2,3: ceil(.25*3)=1 trimmed each side -> single middle
        assert_eq!(run_row(&mut t), "2.0");
        assert_eq!(run_row(&mut t), "2.0"); // report is repeatable
    }

    #[test]
    fn trimmed_mean_rejects_bad_fractions() {
        assert!(TrimmedMean::new(0.6, 0.6).is_err());
        assert!(TrimmedMean::new(-0.1, 0.2).is_err());
    }

    #[test]
    fn trimmed_mean_empty_window() {
        let mut t = TrimmedMean::new(0.2, 0.2).unwrap();
        assert_eq!(run_row(&mut t), "NAN");
    }
}
