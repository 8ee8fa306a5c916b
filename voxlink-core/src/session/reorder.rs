//! Inbound sequence reordering.
//!
//! Releases items in strictly increasing sequence order. Late and duplicate
//! sequence numbers are rejected. When more than `window` items wait behind
//! a gap, the gap is skipped.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    window: usize,
    /// `None` until the first item of a link arrives.
    next_expected: Option<u64>,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            next_expected: None,
            pending: BTreeMap::new(),
        }
    }

    /// Offer one item. Releasable items are appended to `out` in order.
    ///
    /// Returns `false` when the item was late or a duplicate and was dropped.
    pub fn push(&mut self, seq: u64, item: T, out: &mut Vec<T>) -> bool {
        let next = *self.next_expected.get_or_insert(seq);
        if seq < next || self.pending.contains_key(&seq) {
            return false;
        }
        self.pending.insert(seq, item);
        self.release_contiguous(out);

        while self.pending.len() > self.window {
            let Some((&first, _)) = self.pending.first_key_value() else {
                break;
            };
            self.next_expected = Some(first);
            self.release_contiguous(out);
        }
        true
    }

    /// Release everything pending in order and forget the sequence baseline.
    pub fn flush(&mut self, out: &mut Vec<T>) {
        out.extend(std::mem::take(&mut self.pending).into_values());
        self.next_expected = None;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn release_contiguous(&mut self, out: &mut Vec<T>) {
        let Some(mut next) = self.next_expected else {
            return;
        };
        while let Some(item) = self.pending.remove(&next) {
            out.push(item);
            next += 1;
        }
        self.next_expected = Some(next);
    }
}
