//! 6-connected component labeling of a 3D mask using union-find.
//!
//! - Run-length encoding: each row is scanned word by word into x-runs
//! - A run is linked to overlapping runs in the row above (same slice) and the
//!   same row of the previous slice; no diagonal links
//! - Large masks are linked in parallel by z-slab with a lock-free union-find,
//!   then slab boundaries are merged
//! - Components are assembled straight from the runs, so no per-voxel label
//!   volume is ever allocated


use rayon::prelude::*;

use super::mask::BitBuffer3;
use super::union_find::{AtomicSetsRef, AtomicUnionFind, LabelSets, UnionFind};
use crate::math::Box3;

/// Voxel count below which sequential labeling is faster than parallel.
const PARALLEL_LABEL_THRESHOLD: usize = 2_000_000;

/// Minimum slices per slab in parallel labeling.
const MIN_SLICES_PER_SLAB: usize = 4;

// ============================================================================
// Run-Length Encoding
// ============================================================================

/// A horizontal run of foreground voxels within one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Run {
    start: u32, // inclusive
    end: u32,   // exclusive
    label: u32, // provisional, 0 = unassigned
}

impl Run {
    /// Face adjacency between runs of neighbouring rows: the x-ranges must share
    /// at least one column.
    #[inline]
    fn overlaps(&self, other: &Run) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Extract runs from a single row of the mask using word-level bit scanning.
///
/// Uses trailing zero counting (CTZ) to jump between run boundaries inside
/// mixed words; all-zero and all-one words are handled in one step.
#[inline]
pub(super) fn extract_runs_from_row(
    mask_words: &[u64],
    word_row_start: usize,
    words_per_row: usize,
    width: usize,
    runs: &mut Vec<Run>,
) {
    let mut in_run = false;
    let mut run_start = 0u32;

    for word_idx in 0..words_per_row {
        let word = mask_words[word_row_start + word_idx];
        let base_x = (word_idx * 64) as u32;

        if word == 0 {
            if in_run {
                runs.push(Run {
                    start: run_start,
                    end: base_x.min(width as u32),
                    label: 0,
                });
                in_run = false;
            }
            continue;
        }

        if word == !0u64 {
            if !in_run {
                run_start = base_x;
                in_run = true;
            }
            continue;
        }

        extract_runs_from_mixed_word(
            word,
            base_x,
            width as u32,
            &mut in_run,
            &mut run_start,
            runs,
        );
    }

    if in_run {
        runs.push(Run {
            start: run_start,
            end: width as u32,
            label: 0,
        });
    }
}

/// Extract runs from a word containing both 0s and 1s.
#[inline]
fn extract_runs_from_mixed_word(
    word: u64,
    base_x: u32,
    width: u32,
    in_run: &mut bool,
    run_start: &mut u32,
    runs: &mut Vec<Run>,
) {
    let word_end = (base_x + 64).min(width);
    let mut pos = base_x;

    while pos < word_end {
        let bit_offset = pos - base_x;
        let remaining_bits = word >> bit_offset;

        if *in_run {
            // Next 0 bit ends the run
            if remaining_bits == !0u64 >> bit_offset {
                break;
            }
            let end_pos = pos + (!remaining_bits).trailing_zeros();
            if end_pos >= word_end {
                break;
            }
            runs.push(Run {
                start: *run_start,
                end: end_pos,
                label: 0,
            });
            *in_run = false;
            pos = end_pos;
        } else {
            // Next 1 bit starts one
            if remaining_bits == 0 {
                break;
            }
            let start_pos = pos + remaining_bits.trailing_zeros();
            if start_pos >= word_end {
                break;
            }
            *run_start = start_pos;
            *in_run = true;
            pos = start_pos;
        }
    }
}

/// Runs of one z-slice, row after row.
#[derive(Debug, Default, Clone)]
pub(super) struct PlaneRuns {
    runs: Vec<Run>,
    /// `row_offsets[y]..row_offsets[y + 1]` are the runs of row `y`.
    row_offsets: Vec<usize>,
}

impl PlaneRuns {
    fn extract(mask: &BitBuffer3, z: usize) -> Self {
        let mut plane = Self {
            runs: Vec::new(),
            row_offsets: Vec::with_capacity(mask.height() + 1),
        };
        plane.row_offsets.push(0);
        for y in 0..mask.height() {
            extract_runs_from_row(
                mask.words(),
                mask.row_start(y, z),
                mask.words_per_row(),
                mask.width(),
                &mut plane.runs,
            );
            plane.row_offsets.push(plane.runs.len());
        }
        plane
    }

    #[inline]
    fn row(&self, y: usize) -> &[Run] {
        &self.runs[self.row_offsets[y]..self.row_offsets[y + 1]]
    }

    #[inline]
    fn len(&self) -> usize {
        self.runs.len()
    }
}

// ============================================================================
// Run linking
// ============================================================================

/// Link each run of `curr` to the overlapping runs of `prev`.
///
/// An unassigned run adopts the first overlapping label; any further
/// overlapping label is unioned with it. Both slices must be sorted by `start`.
#[inline]
fn link_runs(curr: &mut [Run], prev: &[Run], uf: &mut impl LabelSets) {
    let mut prev_idx = 0;
    for run in curr.iter_mut() {
        while prev_idx < prev.len() && prev[prev_idx].end <= run.start {
            prev_idx += 1;
        }

        let mut check_idx = prev_idx;
        while check_idx < prev.len() && prev[check_idx].start < run.end {
            let prev_run = &prev[check_idx];
            if prev_run.overlaps(run) {
                if run.label == 0 {
                    run.label = prev_run.label;
                } else if run.label != prev_run.label {
                    uf.union(run.label, prev_run.label);
                }
            }
            check_idx += 1;
        }
    }
}

/// Assign labels to every run of `curr`, linking within the slice and to
/// `prev` (the slice below, if it belongs to the same pass).
fn link_plane(curr: &mut PlaneRuns, prev: Option<&PlaneRuns>, uf: &mut impl LabelSets) {
    let height = curr.row_offsets.len() - 1;
    for y in 0..height {
        let row_start = curr.row_offsets[y];
        let row_end = curr.row_offsets[y + 1];
        if row_start == row_end {
            continue;
        }

        let (before, rest) = curr.runs.split_at_mut(row_start);
        let row = &mut rest[..row_end - row_start];
        if y > 0 {
            link_runs(row, &before[curr.row_offsets[y - 1]..], uf);
        }
        if let Some(prev) = prev {
            link_runs(row, prev.row(y), uf);
        }
        for run in row.iter_mut().filter(|r| r.label == 0) {
            run.label = uf.make_set();
        }
    }
}

/// Union the labels of overlapping runs in the same row of two adjacent
/// slices that were linked by different workers.
fn merge_slab_boundary(below: &PlaneRuns, above: &PlaneRuns, uf: &AtomicUnionFind) {
    let height = below.row_offsets.len() - 1;
    for y in 0..height {
        let (a_runs, b_runs) = (below.row(y), above.row(y));
        let (mut a_idx, mut b_idx) = (0, 0);
        while a_idx < a_runs.len() && b_idx < b_runs.len() {
            let (a, b) = (&a_runs[a_idx], &b_runs[b_idx]);
            if a.overlaps(b) && a.label != b.label {
                uf.union(a.label, b.label);
            }
            // Advance whichever run ends first
            if a.end <= b.end {
                a_idx += 1;
            } else {
                b_idx += 1;
            }
        }
    }
}

// ============================================================================
// Components
// ============================================================================

/// A run of voxels `x_start..x_end` in row `(y, z)` belonging to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelRun {
    pub z: u32,
    pub y: u32,
    pub x_start: u32,
    /// Exclusive.
    pub x_end: u32,
}

impl VoxelRun {
    #[inline]
    pub fn len(&self) -> u32 {
        self.x_end - self.x_start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x_end == self.x_start
    }
}

/// A maximal 6-connected set of foreground voxels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub voxel_count: u64,
    pub bbox: Box3,
    /// True if any voxel lies on the outer face of the volume.
    pub touches_boundary: bool,
    /// Membership, in (z, y, x) scan order.
    pub runs: Vec<VoxelRun>,
}

impl Component {
    fn new() -> Self {
        Self {
            voxel_count: 0,
            bbox: Box3::empty(),
            touches_boundary: false,
            runs: Vec::new(),
        }
    }

    /// First voxel in (z, y, x) scan order as `(x, y, z)`.
    pub fn first_voxel(&self) -> (usize, usize, usize) {
        let first = self.runs[0];
        (first.x_start as usize, first.y as usize, first.z as usize)
    }

    /// Every member voxel as `(x, y, z)`, in scan order.
    pub fn voxels(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.runs.iter().flat_map(|r| {
            (r.x_start..r.x_end).map(move |x| (x as usize, r.y as usize, r.z as usize))
        })
    }

    fn push_run(&mut self, run: VoxelRun, (width, height, depth): (usize, usize, usize)) {
        let (y, z) = (run.y as usize, run.z as usize);
        self.voxel_count += run.len() as u64;
        self.bbox.include(run.x_start as usize, y, z);
        self.bbox.include(run.x_end as usize - 1, y, z);
        self.touches_boundary |= run.x_start == 0
            || run.x_end as usize == width
            || y == 0
            || y == height - 1
            || z == 0
            || z == depth - 1;
        self.runs.push(run);
    }
}

/// Components of a mask that do not touch the volume boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labeling {
    pub components: Vec<Component>,
    /// Components dropped because they touch the volume boundary.
    pub discarded_at_boundary: usize,
}

/// Label every 6-connected component of `mask`, boundary-touching ones
/// included, ordered by first voxel in (z, y, x) scan order.
///
/// Picks sequential or slab-parallel labeling by mask size; the result does
/// not depend on the choice.
pub fn label_components(mask: &BitBuffer3) -> Vec<Component> {
    let voxels = mask.width() * mask.height() * mask.depth();
    let num_slabs = if voxels < PARALLEL_LABEL_THRESHOLD {
        1
    } else {
        (mask.depth() / MIN_SLICES_PER_SLAB).clamp(1, rayon::current_num_threads())
    };
    label_components_with_slabs(mask, num_slabs)
}

/// Like [`label_components`] but drops components touching the boundary.
pub fn extract_components(mask: &BitBuffer3) -> Labeling {
    let all = label_components(mask);
    let total = all.len();
    let components: Vec<Component> = all.into_iter().filter(|c| !c.touches_boundary).collect();
    let discarded_at_boundary = total - components.len();

    tracing::debug!(
        found = total,
        discarded_at_boundary,
        "Labeled connected components"
    );

    Labeling {
        components,
        discarded_at_boundary,
    }
}

/// Label with an explicit number of z-slabs; `1` runs the sequential path.
pub(crate) fn label_components_with_slabs(mask: &BitBuffer3, num_slabs: usize) -> Vec<Component> {
    if mask.is_empty() {
        return Vec::new();
    }

    // Phase 1: extract runs per slice (independent)
    let mut planes: Vec<PlaneRuns> = (0..mask.depth())
        .into_par_iter()
        .map(|z| PlaneRuns::extract(mask, z))
        .collect();
    let total_runs: usize = planes.iter().map(PlaneRuns::len).sum();
    if total_runs == 0 {
        return Vec::new();
    }

    // Phase 2: link runs and resolve labels
    let num_slabs = num_slabs.clamp(1, mask.depth());
    let label_map = if num_slabs == 1 {
        link_sequential(&mut planes, total_runs)
    } else {
        link_parallel(&mut planes, total_runs, num_slabs)
    };

    // Phase 3: assemble components in scan order
    let dims = (mask.width(), mask.height(), mask.depth());
    let num_components = label_map.iter().copied().max().unwrap_or(0) as usize;
    let mut components: Vec<Component> = (0..num_components).map(|_| Component::new()).collect();
    for (z, plane) in planes.iter().enumerate() {
        for y in 0..mask.height() {
            for run in plane.row(y) {
                let id = label_map[run.label as usize] as usize;
                components[id - 1].push_run(
                    VoxelRun {
                        z: z as u32,
                        y: y as u32,
                        x_start: run.start,
                        x_end: run.end,
                    },
                    dims,
                );
            }
        }
    }

    components.sort_unstable_by_key(|c| c.runs[0]);
    components
}

fn link_sequential(planes: &mut [PlaneRuns], total_runs: usize) -> Vec<u32> {
    let mut uf = UnionFind::with_capacity(total_runs);
    for z in 0..planes.len() {
        let (below, rest) = planes.split_at_mut(z);
        link_plane(&mut rest[0], below.last(), &mut uf);
    }
    uf.build_label_map().0
}

fn link_parallel(planes: &mut [PlaneRuns], total_runs: usize, num_slabs: usize) -> Vec<u32> {
    let depth = planes.len();
    let slab_len = depth.div_ceil(num_slabs);
    let uf = AtomicUnionFind::new(total_runs);

    planes.par_chunks_mut(slab_len).for_each(|slab| {
        let mut sets = AtomicSetsRef(&uf);
        for z in 0..slab.len() {
            let (below, rest) = slab.split_at_mut(z);
            link_plane(&mut rest[0], below.last(), &mut sets);
        }
    });

    for boundary in (slab_len..depth).step_by(slab_len) {
        merge_slab_boundary(&planes[boundary - 1], &planes[boundary], &uf);
    }

    uf.build_label_map().0
}
