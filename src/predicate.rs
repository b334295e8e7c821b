//! Range predicates: three-valued classification of a map item against a
//! reference, consistent with the sort order.
//!
//! The predicate set is closed, so it is a plain enum dispatched by `match`
//! rather than a trait object; the drivers only ever need `relation`,
//! `is_symmetric`, and `admits`.

use std::cmp::Ordering;

use crate::error::{Result, SweepError};
use crate::interval::{overlap_len, Interval};

/// Where a map item sits relative to the current reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Entirely left of the reference's range; will never match again.
    Before,
    /// In range of the reference.
    Within,
    /// Right of the reference's range; may match a later reference.
    After,
}

/// Which interval's length divides the shared length in percent predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denominator {
    Reference,
    Mapping,
    Either,
    Both,
}

#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    /// Within iff at least `k` shared positions. `k = 0` means any single
    /// shared position counts.
    Overlapping(u64),
    /// Within iff the intervals come within `d` positions of each other;
    /// the reference is treated as padded by `d` on each side.
    Ranged(u64),
    /// Within iff the shared length exceeds `frac` of the denominator
    /// interval's length, or covers it completely.
    Percent { denom: Denominator, frac: f64 },
    /// Within iff chromosome, start, and end all match.
    Exact,
}

impl Predicate {
    /// Build a percent predicate, validating `0 < frac <= 1`.
    pub fn percent(denom: Denominator, frac: f64) -> Result<Self> {
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(SweepError::Argument(format!(
                "overlap fraction must be in (0, 1], got {frac}"
            )));
        }
        Ok(Predicate::Percent { denom, frac })
    }

    /// True when `relation(a, b)` is the mirror of `relation(b, a)`.
    /// The single-stream sweep requires a symmetric predicate.
    pub fn is_symmetric(&self) -> bool {
        match self {
            Predicate::Overlapping(_) | Predicate::Ranged(_) | Predicate::Exact => true,
            Predicate::Percent { denom, .. } => matches!(denom, Denominator::Both),
        }
    }

    /// False for items the predicate can never classify Within (an
    /// overlap-count requirement larger than the item itself). The
    /// single-stream driver keeps such items in the window for ordering
    /// but suppresses their visitor callbacks.
    pub fn admits(&self, item: &Interval) -> bool {
        match self {
            Predicate::Overlapping(k) => item.len() >= *k,
            _ => true,
        }
    }

    /// Classify `map` relative to `reference`.
    pub fn relation(&self, map: &Interval, reference: &Interval) -> Relation {
        match self {
            Predicate::Overlapping(required) => overlapping(map, reference, *required),
            Predicate::Ranged(max_dist) => ranged(map, reference, *max_dist),
            Predicate::Percent { denom, frac } => percent(map, reference, *denom, *frac),
            Predicate::Exact => exact(map, reference),
        }
    }
}

fn chrom_relation(map: &Interval, reference: &Interval) -> Option<Relation> {
    match map.chrom.as_bytes().cmp(reference.chrom.as_bytes()) {
        Ordering::Less => Some(Relation::Before),
        Ordering::Greater => Some(Relation::After),
        Ordering::Equal => None,
    }
}

fn overlapping(map: &Interval, reference: &Interval, required: u64) -> Relation {
    if let Some(rel) = chrom_relation(map, reference) {
        return rel;
    }
    let shared = overlap_len(map.start, map.end, reference.start, reference.end);
    if shared > 0 {
        if shared >= required {
            return Relation::Within;
        }
        // overlapping but under the required count: fall back to the sort
        // order so the window keeps moving; identical rows rank by arrival
        if map.start != reference.start {
            return before_after(map.start < reference.start);
        }
        if map.end != reference.end {
            return before_after(map.end < reference.end);
        }
        if map.tail != reference.tail {
            return before_after(map.tail < reference.tail);
        }
        Relation::After
    } else {
        before_after(map.start < reference.start)
    }
}

fn ranged(map: &Interval, reference: &Interval, max_dist: u64) -> Relation {
    if let Some(rel) = chrom_relation(map, reference) {
        return rel;
    }
    // additive form: no clamping needed near coordinate zero
    if map.start < reference.end {
        if map.end + max_dist > reference.start {
            Relation::Within
        } else {
            Relation::Before
        }
    } else if reference.end + max_dist > map.start {
        Relation::Within
    } else {
        Relation::After
    }
}

fn percent(map: &Interval, reference: &Interval, denom: Denominator, frac: f64) -> Relation {
    if let Some(rel) = chrom_relation(map, reference) {
        return rel;
    }
    if reference.end < map.start {
        return Relation::After;
    }
    if map.end < reference.start {
        return Relation::Before;
    }
    let shared = overlap_len(map.start, map.end, reference.start, reference.end);
    let by_map = fraction_reached(shared, map.len(), frac);
    let by_ref = fraction_reached(shared, reference.len(), frac);
    // a failed test orders by the denominator interval's start so the
    // window still advances monotonically
    let map_dir = before_after(reference.start > map.start);
    let ref_dir = before_after(map.start <= reference.start);
    match denom {
        Denominator::Mapping => {
            if by_map {
                Relation::Within
            } else {
                map_dir
            }
        }
        Denominator::Reference => {
            if by_ref {
                Relation::Within
            } else {
                ref_dir
            }
        }
        Denominator::Either => {
            if by_map || by_ref {
                Relation::Within
            } else {
                map_dir
            }
        }
        Denominator::Both => {
            if !by_map {
                map_dir
            } else if !by_ref {
                ref_dir
            } else {
                Relation::Within
            }
        }
    }
}

/// A partial overlap must strictly exceed the fraction of the denominator;
/// covering the denominator completely always qualifies. A zero denominator
/// never does.
fn fraction_reached(shared: u64, denom_len: u64, frac: f64) -> bool {
    denom_len > 0 && (shared == denom_len || (shared as f64) > frac * denom_len as f64)
}

fn exact(map: &Interval, reference: &Interval) -> Relation {
    if let Some(rel) = chrom_relation(map, reference) {
        return rel;
    }
    match (map.start, map.end).cmp(&(reference.start, reference.end)) {
        Ordering::Equal => Relation::Within,
        Ordering::Less => Relation::Before,
        Ordering::Greater => Relation::After,
    }
}

#[inline]
fn before_after(before: bool) -> Relation {
    if before {
        Relation::Before
    } else {
        Relation::After
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(chrom: &str, start: u64, end: u64) -> Interval {
        Interval::new(chrom, start, end)
    }

    #[test]
    fn overlapping_zero_means_any_shared_position() {
        let p = Predicate::Overlapping(0);
        assert_eq!(p.relation(&iv("chr1", 10, 20), &iv("chr1", 19, 30)), Relation::Within);
        // touching is not overlap under half-open coordinates
        assert_eq!(p.relation(&iv("chr1", 10, 20), &iv("chr1", 20, 30)), Relation::Before);
        assert_eq!(p.relation(&iv("chr1", 30, 40), &iv("chr1", 10, 20)), Relation::After);
    }

    #[test]
    fn overlapping_requirement_above_item_length() {
        // 5-long item can never satisfy a 10-position requirement but must
        // still order consistently against the reference
        let p = Predicate::Overlapping(10);
        let short = iv("chr1", 10, 15);
        let long = iv("chr1", 0, 100);
        assert_eq!(p.relation(&short, &long), Relation::After);
        assert!(!p.admits(&short));
        assert!(p.admits(&long));
    }

    #[test]
    fn overlapping_chromosome_order_dominates() {
        let p = Predicate::Overlapping(1);
        assert_eq!(p.relation(&iv("chr1", 0, 10), &iv("chr2", 0, 10)), Relation::Before);
        assert_eq!(p.relation(&iv("chr3", 0, 10), &iv("chr2", 0, 10)), Relation::After);
    }

    #[test]
    fn ranged_pads_both_sides_and_survives_coordinate_zero() {
        let p = Predicate::Ranged(10);
        let r = iv("chr1", 5, 15);
        assert_eq!(p.relation(&iv("chr1", 0, 2), &r), Relation::Within); // gap 3 <= 10
        assert_eq!(p.relation(&iv("chr1", 20, 30), &r), Relation::Within); // gap 5 <= 10
        assert_eq!(p.relation(&iv("chr1", 30, 40), &r), Relation::After); // gap 15
        let far_left = iv("chr1", 0, 1);
        let far_ref = iv("chr1", 50, 60);
        assert_eq!(p.relation(&far_left, &far_ref), Relation::Before);
    }

    #[test]
    fn ranged_zero_is_plain_overlap_plus_adjacency_exclusion() {
        let p = Predicate::Ranged(0);
        let r = iv("chr1", 10, 20);
        assert_eq!(p.relation(&iv("chr1", 15, 25), &r), Relation::Within);
        assert_eq!(p.relation(&iv("chr1", 20, 30), &r), Relation::After);
        assert_eq!(p.relation(&iv("chr1", 0, 10), &r), Relation::Before);
    }

    #[test]
    fn percent_reference_threshold() {
        let p = Predicate::percent(Denominator::Reference, 0.5).unwrap();
        let r = iv("chr1", 0, 100);
        assert_eq!(p.relation(&iv("chr1", 0, 40), &r), Relation::Before);
        // an overlap landing exactly on the threshold does not qualify
        assert_eq!(p.relation(&iv("chr1", 0, 50), &r), Relation::Before);
        assert_eq!(p.relation(&iv("chr1", 0, 60), &r), Relation::Within);
        // covering the whole reference qualifies at any fraction
        assert_eq!(p.relation(&iv("chr1", 0, 100), &r), Relation::Within);
    }

    #[test]
    fn percent_mapping_and_both() {
        let pm = Predicate::percent(Denominator::Mapping, 1.0).unwrap();
        let r = iv("chr1", 0, 100);
        assert_eq!(pm.relation(&iv("chr1", 10, 20), &r), Relation::Within);
        assert_eq!(pm.relation(&iv("chr1", 90, 110), &r), Relation::After);

        let pb = Predicate::percent(Denominator::Both, 0.5).unwrap();
        assert_eq!(pb.relation(&iv("chr1", 0, 60), &r), Relation::Within);
        assert_eq!(pb.relation(&iv("chr1", 0, 40), &r), Relation::Before);
        assert!(pb.is_symmetric());
        assert!(!pm.is_symmetric());
    }

    #[test]
    fn percent_rejects_out_of_range_fraction() {
        assert!(Predicate::percent(Denominator::Reference, 0.0).is_err());
        assert!(Predicate::percent(Denominator::Reference, 1.5).is_err());
    }

    #[test]
    fn exact_matches_coordinates_only() {
        let p = Predicate::Exact;
        let r = iv("chr1", 10, 20);
        assert_eq!(p.relation(&iv("chr1", 10, 20), &r), Relation::Within);
        assert_eq!(p.relation(&iv("chr1", 10, 19), &r), Relation::Before);
        assert_eq!(p.relation(&iv("chr1", 11, 20), &r), Relation::After);
    }

    #[test]
    fn self_relation_is_within_for_standard_predicates() {
        let r = iv("chr1", 10, 20);
        for p in [
            Predicate::Overlapping(1),
            Predicate::Ranged(0),
            Predicate::Exact,
            Predicate::percent(Denominator::Both, 1.0).unwrap(),
        ] {
            assert_eq!(p.relation(&r, &r), Relation::Within);
        }
    }
}
