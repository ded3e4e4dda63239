//! Concurrency-limited parallel iteration utilities.
//!
//! Wraps rayon's `par_iter` to process items in parallel while limiting
//! the number of items in flight at once (e.g. to cap memory or IO pressure).

use rayon::prelude::*;

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in
/// flight, and stops starting new items once `cancelled` returns true.
///
/// Items that were already started finish normally. Items that were never
/// started yield `None`. The output keeps the input order.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited_until<T, R, C, F>(
    items: &[T],
    max_concurrent: usize,
    cancelled: C,
    f: F,
) -> Vec<Option<R>>
where
    T: Sync,
    R: Send,
    C: Fn() -> bool + Sync,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        if cancelled() {
            results.extend(chunk.iter().map(|_| None));
            continue;
        }
        let chunk_results: Vec<Option<R>> = chunk
            .par_iter()
            .map(|item| if cancelled() { None } else { Some(f(item)) })
            .collect();
        results.extend(chunk_results);
    }
    results
}
