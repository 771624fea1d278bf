//! Bounded, newest-first history of committed buffer values.

use std::collections::VecDeque;

use kairos_core::Tensor;

/// Previously committed values of one buffer, newest first.
///
/// Capacity is negotiated upward: every consumer asks for the depth it
/// needs and the history keeps the maximum ever requested. Capacity never
/// shrinks, so a multistep solver registered after a shallower consumer
/// still gets its full lookback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History {
    entries: VecDeque<Tensor>,
    capacity: usize,
}

impl History {
    /// An empty history with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been committed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry `back` commits ago (`0` is the most recent).
    pub fn get(&self, back: usize) -> Option<&Tensor> {
        self.entries.get(back)
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Tensor> + '_ {
        self.entries.iter()
    }

    /// Raise capacity to `max(capacity, depth)`. Returns the new capacity.
    pub(crate) fn grow(&mut self, depth: usize) -> usize {
        self.capacity = self.capacity.max(depth);
        self.capacity
    }

    /// Push a committed value to the front, dropping the oldest entry
    /// once capacity is exceeded. No-op at capacity zero.
    pub(crate) fn push(&mut self, value: Tensor) {
        if self.capacity == 0 {
            return;
        }
        let recycled = if self.entries.len() >= self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        let entry = match recycled {
            Some(mut old) => {
                old.assign(&value);
                old
            }
            None => value,
        };
        self.entries.push_front(entry);
    }

    /// Drop every entry, keeping the capacity.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(v: f64) -> Tensor {
        Tensor::filled(&[1], v)
    }

    #[test]
    fn zero_capacity_ignores_pushes() {
        let mut h = History::default();
        h.push(scalar(1.0));
        assert!(h.is_empty());
    }

    #[test]
    fn newest_first_and_bounded() {
        let mut h = History::with_capacity(2);
        for v in 1..=3 {
            h.push(scalar(v as f64));
        }
        assert_eq!(h.len(), 2);
        assert_eq!(h.get(0).unwrap().as_slice(), &[3.0]);
        assert_eq!(h.get(1).unwrap().as_slice(), &[2.0]);
    }

    #[test]
    fn grow_never_shrinks() {
        let mut h = History::with_capacity(3);
        assert_eq!(h.grow(1), 3);
        assert_eq!(h.grow(5), 5);
        assert_eq!(h.capacity(), 5);
    }
}
