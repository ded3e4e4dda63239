//! Axis-aligned bounding box for voxel regions.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box with `usize` voxel coordinates.
///
/// Uses inclusive bounds: a voxel at (x, y, z) is inside if
/// `x_min <= x <= x_max`, `y_min <= y <= y_max` and `z_min <= z <= z_max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Box3 {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
    pub z_min: usize,
    pub z_max: usize,
}

impl Box3 {
    /// Create a new bounding box with the given bounds.
    #[inline]
    pub const fn new(
        x_min: usize,
        x_max: usize,
        y_min: usize,
        y_max: usize,
        z_min: usize,
        z_max: usize,
    ) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
            z_min,
            z_max,
        }
    }

    /// Box covering a whole `width × height × depth` grid.
    #[inline]
    pub const fn covering(width: usize, height: usize, depth: usize) -> Self {
        Self::new(0, width - 1, 0, height - 1, 0, depth - 1)
    }

    /// Create an empty bounding box (for accumulation).
    ///
    /// The empty box has inverted bounds so that any point
    /// included via `include()` will set the initial bounds.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            x_min: usize::MAX,
            x_max: 0,
            y_min: usize::MAX,
            y_max: 0,
            z_min: usize::MAX,
            z_max: 0,
        }
    }

    /// True for a box produced by `empty()` that never included a point.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.x_min > self.x_max || self.y_min > self.y_max || self.z_min > self.z_max
    }

    /// Expand this bounding box to include the given point.
    #[inline]
    pub fn include(&mut self, x: usize, y: usize, z: usize) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
        self.z_min = self.z_min.min(z);
        self.z_max = self.z_max.max(z);
    }

    /// Smallest box containing both boxes.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            x_min: self.x_min.min(other.x_min),
            x_max: self.x_max.max(other.x_max),
            y_min: self.y_min.min(other.y_min),
            y_max: self.y_max.max(other.y_max),
            z_min: self.z_min.min(other.z_min),
            z_max: self.z_max.max(other.z_max),
        }
    }

    /// Number of columns.
    #[inline]
    pub const fn width(&self) -> usize {
        self.x_max.saturating_sub(self.x_min) + 1
    }

    /// Number of rows.
    #[inline]
    pub const fn height(&self) -> usize {
        self.y_max.saturating_sub(self.y_min) + 1
    }

    /// Number of slices.
    #[inline]
    pub const fn depth(&self) -> usize {
        self.z_max.saturating_sub(self.z_min) + 1
    }

    /// Check if a point is inside the bounding box.
    #[inline]
    pub const fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x >= self.x_min
            && x <= self.x_max
            && y >= self.y_min
            && y <= self.y_max
            && z >= self.z_min
            && z <= self.z_max
    }

    /// Check if `other` lies entirely inside this box.
    #[inline]
    pub const fn contains_box(&self, other: &Self) -> bool {
        self.contains(other.x_min, other.y_min, other.z_min)
            && self.contains(other.x_max, other.y_max, other.z_max)
    }

    /// Area of the (x, y) projection.
    #[inline]
    pub const fn projected_area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Area of the intersection of both (x, y) projections; 0 if they are disjoint.
    #[inline]
    pub fn projected_intersection_area(&self, other: &Self) -> u64 {
        let x_lo = self.x_min.max(other.x_min);
        let x_hi = self.x_max.min(other.x_max);
        let y_lo = self.y_min.max(other.y_min);
        let y_hi = self.y_max.min(other.y_max);
        if x_lo > x_hi || y_lo > y_hi {
            return 0;
        }
        (x_hi - x_lo + 1) as u64 * (y_hi - y_lo + 1) as u64
    }

    /// Number of voxels inside the box.
    #[inline]
    pub const fn volume(&self) -> u64 {
        self.projected_area() * self.depth() as u64
    }

    /// Grow the box by the given margin on both sides of every axis, clamped to
    /// a `width × height × depth` grid.
    pub fn expand_clamped(
        &self,
        (x_margin, y_margin, z_margin): (usize, usize, usize),
        (width, height, depth): (usize, usize, usize),
    ) -> Self {
        debug_assert!(width > 0 && height > 0 && depth > 0);
        Self {
            x_min: self.x_min.saturating_sub(x_margin),
            x_max: self.x_max.saturating_add(x_margin).min(width - 1),
            y_min: self.y_min.saturating_sub(y_margin),
            y_max: self.y_max.saturating_add(y_margin).min(height - 1),
            z_min: self.z_min.saturating_sub(z_margin),
            z_max: self.z_max.saturating_add(z_margin).min(depth - 1),
        }
    }
}
