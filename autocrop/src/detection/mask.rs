//! Bit-packed 3D foreground mask.

use rayon::prelude::*;

use crate::volume::Volume;

const BITS_PER_WORD: usize = 64;

/// A `width × height × depth` boolean grid packed into `u64` words.
///
/// Every row starts on a word boundary (`words_per_row` words, the tail bits
/// of the last word are always zero), so row `(y, z)` starts at word
/// `(z * height + y) * words_per_row`. This lets the labeler scan a row with
/// whole-word operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer3 {
    words: Vec<u64>,
    width: usize,
    height: usize,
    depth: usize,
    words_per_row: usize,
}

impl BitBuffer3 {
    /// All-background mask.
    pub fn new_default(width: usize, height: usize, depth: usize) -> Self {
        let words_per_row = width.div_ceil(BITS_PER_WORD);
        Self {
            words: vec![0u64; words_per_row * height * depth],
            width,
            height,
            depth,
            words_per_row,
        }
    }

    /// Foreground is every voxel of `channel` with intensity `>= threshold`.
    ///
    /// Planes are packed in parallel.
    pub fn from_threshold(volume: &Volume, channel: usize, threshold: u16) -> Self {
        assert!(channel < volume.channels(), "channel {channel} out of range");
        let (width, height, depth) = volume.dimensions().xyz();
        let mut mask = Self::new_default(width, height, depth);
        if mask.words.is_empty() {
            return mask;
        }

        let words_per_row = mask.words_per_row;
        let words_per_plane = words_per_row * height;
        mask.words
            .par_chunks_mut(words_per_plane)
            .enumerate()
            .for_each(|(z, plane_words)| {
                let plane = volume.plane(channel, z);
                for (y, row_words) in plane_words.chunks_mut(words_per_row).enumerate() {
                    let row = &plane[y * width..(y + 1) * width];
                    for (word_idx, samples) in row.chunks(BITS_PER_WORD).enumerate() {
                        let mut word = 0u64;
                        for (bit, &value) in samples.iter().enumerate() {
                            if value >= threshold {
                                word |= 1u64 << bit;
                            }
                        }
                        row_words[word_idx] = word;
                    }
                }
            });

        mask
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }

    #[inline]
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Index of the first word of row `(y, z)`.
    #[inline]
    pub fn row_start(&self, y: usize, z: usize) -> usize {
        (z * self.height + y) * self.words_per_row
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> bool {
        debug_assert!(x < self.width && y < self.height && z < self.depth);
        let word = self.words[self.row_start(y, z) + x / BITS_PER_WORD];
        (word >> (x % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: bool) {
        assert!(
            x < self.width && y < self.height && z < self.depth,
            "({x}, {y}, {z}) outside {}x{}x{} mask",
            self.width,
            self.height,
            self.depth
        );
        let idx = self.row_start(y, z) + x / BITS_PER_WORD;
        let bit = 1u64 << (x % BITS_PER_WORD);
        if value {
            self.words[idx] |= bit;
        } else {
            self.words[idx] &= !bit;
        }
    }

    /// Number of foreground voxels.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Box3;
    use crate::volume::{BitDepth, VolumeDimensions};

    #[test]
    fn test_row_padding() {
        let mask = BitBuffer3::new_default(65, 3, 2);
        assert_eq!(mask.words_per_row(), 2);
        assert_eq!(mask.words().len(), 12);
        assert_eq!(mask.row_start(1, 1), 8);
    }

    #[test]
    fn test_set_get() {
        let mut mask = BitBuffer3::new_default(70, 4, 3);
        mask.set(0, 0, 0, true);
        mask.set(69, 3, 2, true);
        mask.set(64, 1, 1, true);
        assert!(mask.get(0, 0, 0));
        assert!(mask.get(69, 3, 2));
        assert!(mask.get(64, 1, 1));
        assert!(!mask.get(63, 1, 1));
        assert_eq!(mask.count_ones(), 3);

        mask.set(64, 1, 1, false);
        assert!(!mask.get(64, 1, 1));
        assert_eq!(mask.count_ones(), 2);
    }

    #[test]
    fn test_from_threshold_is_inclusive() {
        let dims = VolumeDimensions::new(100, 5, 4, 2);
        let mut volume = Volume::new_filled(dims, BitDepth::Sixteen, 10);
        volume.fill_box(&Box3::new(60, 70, 1, 2, 1, 2), 0, 50);
        volume.fill_box(&Box3::new(0, 99, 0, 4, 0, 3), 1, 50);

        let mask = BitBuffer3::from_threshold(&volume, 0, 50);
        assert_eq!(mask.count_ones(), 11 * 2 * 2);
        assert!(mask.get(60, 1, 1));
        assert!(mask.get(70, 2, 2));
        assert!(!mask.get(71, 2, 2));
        assert!(!mask.get(60, 0, 1));

        // Threshold one above the cube intensity selects nothing
        let mask = BitBuffer3::from_threshold(&volume, 0, 51);
        assert_eq!(mask.count_ones(), 0);
    }
}
