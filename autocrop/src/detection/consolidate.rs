//! Merging of bounding boxes whose (x, y) projections overlap.
//!
//! Boxes are grouped by the transitive closure of the overlap predicate and
//! every group is replaced by its union box. Unions can grow enough to overlap
//! boxes they did not overlap before, so passes repeat until no pair of output
//! boxes satisfies the predicate.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use super::union_find::UnionFind;
use crate::math::Box3;

/// Reference area the projected intersection is compared against.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OverlapBasis {
    /// Projection of the smaller box.
    #[default]
    Smaller,
    /// Projection of the larger box.
    Larger,
    /// Union of both projections.
    Union,
}

/// Pairwise overlap predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapRule {
    /// Required share of the reference area, 0..=100.
    pub percent: u8,
    pub basis: OverlapBasis,
}

impl Default for OverlapRule {
    fn default() -> Self {
        Self {
            percent: 50,
            basis: OverlapBasis::Smaller,
        }
    }
}

impl OverlapRule {
    pub const fn new(percent: u8, basis: OverlapBasis) -> Self {
        Self { percent, basis }
    }

    /// True if the projected intersection is non-empty and covers at least
    /// `percent`% of the reference area.
    pub fn overlaps(&self, a: &Box3, b: &Box3) -> bool {
        let intersection = a.projected_intersection_area(b);
        if intersection == 0 {
            return false;
        }
        let (area_a, area_b) = (a.projected_area(), b.projected_area());
        let reference = match self.basis {
            OverlapBasis::Smaller => area_a.min(area_b),
            OverlapBasis::Larger => area_a.max(area_b),
            OverlapBasis::Union => area_a + area_b - intersection,
        };
        intersection * 100 >= self.percent as u64 * reference
    }
}

/// Merge boxes until no two output boxes overlap under `rule`.
///
/// Output order follows the first member of each group, so input that is
/// already consolidated comes back unchanged.
pub fn consolidate(boxes: &[Box3], rule: &OverlapRule) -> Vec<Box3> {
    let mut current = boxes.to_vec();
    let mut passes = 0;
    loop {
        passes += 1;
        let merged = merge_pass(&current, rule);
        if merged.len() == current.len() {
            break;
        }
        current = merged;
    }

    tracing::debug!(
        input = boxes.len(),
        output = current.len(),
        passes,
        "Consolidated bounding boxes"
    );
    current
}

/// One round of grouping by transitive overlap.
fn merge_pass(boxes: &[Box3], rule: &OverlapRule) -> Vec<Box3> {
    if boxes.len() < 2 {
        return boxes.to_vec();
    }

    let mut uf = UnionFind::with_sets(boxes.len());

    // Sweep along x: only boxes whose x-ranges intersect can overlap.
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by_key(|&i| boxes[i].x_min);
    for (pos, &i) in order.iter().enumerate() {
        for &j in &order[pos + 1..] {
            if boxes[j].x_min > boxes[i].x_max {
                break;
            }
            if rule.overlaps(&boxes[i], &boxes[j]) {
                uf.union(i as u32 + 1, j as u32 + 1);
            }
        }
    }

    let (label_map, num_groups) = uf.build_label_map();
    if num_groups == boxes.len() {
        return boxes.to_vec();
    }

    // Dense ids are numbered by smallest member index, i.e. first member order.
    let mut groups: Vec<Option<Box3>> = vec![None; num_groups];
    for (i, b) in boxes.iter().enumerate() {
        let slot = &mut groups[label_map[i + 1] as usize - 1];
        *slot = Some(match slot {
            Some(acc) => acc.union(b),
            None => *b,
        });
    }
    groups.into_iter().flatten().collect()
}
