//! Union-find over 1-based labels, in a sequential and a lock-free flavor.
//!
//! Label 0 is reserved for "unassigned". Unions always point the larger root
//! at the smaller one, so the root of a set is its smallest label and the final
//! numbering is independent of the order unions were applied in.

use std::sync::atomic::{AtomicU32, Ordering};

/// Operations the run linker needs from a union-find.
pub(crate) trait LabelSets {
    fn make_set(&mut self) -> u32;
    fn union(&mut self, a: u32, b: u32);
}

// ============================================================================
// Sequential
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            parent: Vec::with_capacity(capacity),
        }
    }

    /// `count` singleton sets labeled `1..=count`.
    pub(crate) fn with_sets(count: usize) -> Self {
        Self {
            parent: (1..=count as u32).collect(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.parent.len()
    }

    #[inline]
    pub(crate) fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32 + 1;
        self.parent.push(label);
        label
    }

    /// Root of `label`, with two-pass path compression.
    #[inline]
    pub(crate) fn find(&mut self, label: u32) -> u32 {
        debug_assert!(label >= 1 && label as usize <= self.parent.len());

        let mut root = label;
        loop {
            let parent = self.parent[(root - 1) as usize];
            if parent == root {
                break;
            }
            root = parent;
        }

        let mut current = label;
        while current != root {
            let idx = (current - 1) as usize;
            let parent = self.parent[idx];
            self.parent[idx] = root;
            current = parent;
        }

        root
    }

    #[inline]
    pub(crate) fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            let (smaller, larger) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[(larger - 1) as usize] = smaller;
        }
    }

    /// Map from label to dense component id `1..=n`, numbered in order of each
    /// set's smallest label. Index 0 maps to 0.
    pub(crate) fn build_label_map(&mut self) -> (Vec<u32>, usize) {
        let len = self.parent.len();
        let mut label_map = vec![0u32; len + 1];
        let mut num_labels = 0u32;

        for i in 1..=len as u32 {
            let root = self.find(i);
            if label_map[root as usize] == 0 {
                num_labels += 1;
                label_map[root as usize] = num_labels;
            }
            label_map[i as usize] = label_map[root as usize];
        }

        (label_map, num_labels as usize)
    }
}

impl LabelSets for UnionFind {
    #[inline]
    fn make_set(&mut self) -> u32 {
        UnionFind::make_set(self)
    }

    #[inline]
    fn union(&mut self, a: u32, b: u32) {
        UnionFind::union(self, a, b);
    }
}

// ============================================================================
// Atomic
// ============================================================================

/// Lock-free union-find shared by the slab workers.
///
/// Capacity is fixed up front; callers count runs before linking so that it
/// can never be exceeded.
pub(crate) struct AtomicUnionFind {
    parent: Vec<AtomicU32>,
    next_label: AtomicU32,
}

impl std::fmt::Debug for AtomicUnionFind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicUnionFind")
            .field("capacity", &self.parent.len())
            .field("next_label", &self.next_label.load(Ordering::Relaxed))
            .finish()
    }
}

impl AtomicUnionFind {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            parent: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            next_label: AtomicU32::new(1),
        }
    }

    #[inline]
    pub(crate) fn make_set(&self) -> u32 {
        // SeqCst: labels must be globally unique across threads.
        let label = self.next_label.fetch_add(1, Ordering::SeqCst);
        assert!(
            (label as usize) <= self.parent.len(),
            "AtomicUnionFind capacity exceeded: label {label} > capacity {}",
            self.parent.len()
        );
        self.parent[label as usize - 1].store(label, Ordering::SeqCst);
        label
    }

    #[inline]
    pub(crate) fn find(&self, label: u32) -> u32 {
        let mut current = label;
        loop {
            // Relaxed: stale reads only cost extra iterations; union's CAS
            // provides the synchronization.
            let parent = self.parent[(current - 1) as usize].load(Ordering::Relaxed);
            if parent == current || parent == 0 {
                return current;
            }
            current = parent;
        }
    }

    pub(crate) fn union(&self, a: u32, b: u32) {
        let mut root_a = self.find(a);
        let mut root_b = self.find(b);

        while root_a != root_b {
            if root_a > root_b {
                std::mem::swap(&mut root_a, &mut root_b);
            }

            match self.parent[(root_b - 1) as usize].compare_exchange_weak(
                root_b,
                root_a,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(_) => {
                    root_a = self.find(root_a);
                    root_b = self.find(root_b);
                }
            }
        }
    }

    #[inline]
    pub(crate) fn label_count(&self) -> usize {
        (self.next_label.load(Ordering::Relaxed) - 1) as usize
    }

    /// Same contract as [`UnionFind::build_label_map`]. Call only after every
    /// worker has finished.
    pub(crate) fn build_label_map(&self) -> (Vec<u32>, usize) {
        let total = self.label_count();
        let mut label_map = vec![0u32; total + 1];
        let mut num_labels = 0u32;

        for i in 1..=total {
            let root = self.find(i as u32);
            if label_map[root as usize] == 0 {
                num_labels += 1;
                label_map[root as usize] = num_labels;
            }
            label_map[i] = label_map[root as usize];
        }

        (label_map, num_labels as usize)
    }
}

/// Adapts `&AtomicUnionFind` (which uses `&self`) to [`LabelSets`].
#[derive(Debug)]
pub(crate) struct AtomicSetsRef<'a>(pub(crate) &'a AtomicUnionFind);

impl LabelSets for AtomicSetsRef<'_> {
    #[inline]
    fn make_set(&mut self) -> u32 {
        self.0.make_set()
    }

    #[inline]
    fn union(&mut self, a: u32, b: u32) {
        self.0.union(a, b);
    }
}
