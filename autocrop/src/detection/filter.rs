use super::labeling::Component;

/// Inclusive voxel-count range a component must fall in to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeRange {
    pub min: u64,
    pub max: u64,
}

impl Default for VolumeRange {
    fn default() -> Self {
        Self {
            min: 1,
            max: i32::MAX as u64,
        }
    }
}

impl VolumeRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub const fn contains(&self, voxel_count: u64) -> bool {
        self.min <= voxel_count && voxel_count <= self.max
    }

    /// Keep the components whose voxel count is inside the range, in order.
    pub fn retain(&self, components: Vec<Component>) -> Vec<Component> {
        components
            .into_iter()
            .filter(|c| self.contains(c.voxel_count))
            .collect()
    }
}
