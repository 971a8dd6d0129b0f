//! Disjoint-slot output buffers for parallel emission.

use std::cell::UnsafeCell;

/// A shared view over an output slice whose slots are claimed through an
/// atomic counter.
///
/// The emission kernels reserve one index per output element
/// (`fetch_add(1)`), so every index is written by at most one rayon task;
/// the writer only makes that contract expressible without locking each
/// element.
pub(crate) struct SlotWriter<'a, T> {
    slots: &'a [UnsafeCell<T>],
}

// SAFETY: concurrent tasks write disjoint slots (unique indices from an
// atomic counter) and nobody reads until the parallel pass has joined.
unsafe impl<T: Send> Sync for SlotWriter<'_, T> {}

impl<'a, T> SlotWriter<'a, T> {
    pub(crate) fn new(data: &'a mut [T]) -> Self {
        let ptr = std::ptr::from_mut::<[T]>(data) as *const [UnsafeCell<T>];
        // SAFETY: UnsafeCell<T> is repr(transparent) over T, and we hold the
        // unique borrow of `data` for 'a.
        Self {
            slots: unsafe { &*ptr },
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.slots.len()
    }

    /// Writes `value` into slot `idx`.
    ///
    /// # Safety
    ///
    /// No other task may write the same `idx` during this parallel pass.
    pub(crate) unsafe fn write(&self, idx: usize, value: T) {
        *self.slots[idx].get() = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parallel_claimed_writes_land() {
        let mut out = vec![0_usize; 1000];
        let counter = AtomicUsize::new(0);
        {
            let writer = SlotWriter::new(&mut out);
            (0..1000_usize).into_par_iter().for_each(|task| {
                let idx = counter.fetch_add(1, Ordering::Relaxed);
                // SAFETY: fetch_add hands every task a unique index.
                unsafe { writer.write(idx, task + 1) };
            });
        }
        out.sort_unstable();
        let expected: Vec<usize> = (1..=1000).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn len_matches_backing_slice() {
        let mut out = vec![0.0_f32; 7];
        let writer = SlotWriter::new(&mut out);
        assert_eq!(writer.len(), 7);
    }
}
