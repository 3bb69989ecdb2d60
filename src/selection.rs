use std::sync::Arc;

use parking_lot::RwLock;

/// The set operation merging a decision into the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetOp {
    /// Clear the selection first.
    #[default]
    Replace,

    /// Bitwise or.
    Add,

    /// Bitwise and-not.
    Subtract,
}

/// The selection of splats as a densely packed bitvec.
///
/// Bit `i % 32` of word `i / 32` is splat `i`, bits past the length are always zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionBitset {
    words: Vec<u32>,
    len: usize,
}

impl SelectionBitset {
    /// Create an empty selection of `len` splats.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(32)],
            len,
        }
    }

    /// Create a selection from packed words.
    ///
    /// Missing words are zero, extra words and bits past the length are dropped.
    pub fn from_words(mut words: Vec<u32>, len: usize) -> Self {
        words.resize(len.div_ceil(32), 0);
        let mut bitset = Self { words, len };
        bitset.clear_tail();
        bitset
    }

    /// Create a selection from booleans.
    pub fn from_bools(bools: &[bool]) -> Self {
        let mut bitset = Self::new(bools.len());
        for (i, &selected) in bools.iter().enumerate() {
            bitset.set(i, selected);
        }
        bitset
    }

    /// Get the number of splats.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the selection covers no splats.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the packed words.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Check if a splat is selected, out of range indices are never selected.
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 32] & (1 << (index % 32)) != 0
    }

    /// Set whether a splat is selected, out of range indices are ignored.
    pub fn set(&mut self, index: usize, selected: bool) {
        if index >= self.len {
            log::warn!(
                "Selection index {index} out of range for {} splats",
                self.len
            );
            return;
        }

        let bit = 1 << (index % 32);
        match selected {
            true => self.words[index / 32] |= bit,
            false => self.words[index / 32] &= !bit,
        }
    }

    /// Deselect every splat.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Select every splat.
    pub fn select_all(&mut self) {
        self.words.fill(u32::MAX);
        self.clear_tail();
    }

    /// Invert the selection.
    pub fn invert(&mut self) {
        self.words.iter_mut().for_each(|w| *w = !*w);
        self.clear_tail();
    }

    /// Count the selected splats.
    pub fn count_selected(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Change the number of splats, new splats are not selected.
    pub fn resize(&mut self, len: usize) {
        self.words.resize(len.div_ceil(32), 0);
        self.len = len;
        self.clear_tail();
    }

    /// Merge a decision into the selection.
    ///
    /// The selection takes the length of the decision, which is sized by the current splat
    /// count.
    pub fn apply(&mut self, decision: &SelectionBitset, op: SetOp) {
        if self.len != decision.len {
            log::debug!(
                "Resizing selection from {} to {} splats",
                self.len,
                decision.len
            );
            self.resize(decision.len);
        }

        match op {
            SetOp::Replace => self.words.copy_from_slice(&decision.words),
            SetOp::Add => self
                .words
                .iter_mut()
                .zip(&decision.words)
                .for_each(|(w, d)| *w |= d),
            SetOp::Subtract => self
                .words
                .iter_mut()
                .zip(&decision.words)
                .for_each(|(w, d)| *w &= !d),
        }
    }

    /// Iterate over the selected indices.
    pub fn iter_selected(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut word = word;
            std::iter::from_fn(move || {
                (word != 0).then(|| {
                    let bit = word.trailing_zeros() as usize;
                    word &= word - 1;
                    i * 32 + bit
                })
            })
        })
    }

    /// Remove the items of selected indices from a vector, keeping the order of the rest.
    ///
    /// Items past the selection length are kept.
    pub fn retain_unselected<T>(&self, items: &mut Vec<T>) {
        let mut index = 0;
        items.retain(|_| {
            let keep = !self.contains(index);
            index += 1;
            keep
        });
    }

    fn clear_tail(&mut self) {
        let rem = self.len % 32;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u32 << rem) - 1;
            }
        }
    }
}

/// A selection shared between the single writer and any number of readers.
///
/// Readers take immutable snapshots, a write replaces the snapshot atomically so an in-flight
/// write is never observed half done.
#[derive(Debug, Clone, Default)]
pub struct SharedSelection(Arc<RwLock<Arc<SelectionBitset>>>);

impl SharedSelection {
    /// Create a new shared selection.
    pub fn new(selection: SelectionBitset) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(selection))))
    }

    /// Get a snapshot of the selection.
    pub fn snapshot(&self) -> Arc<SelectionBitset> {
        self.0.read().clone()
    }

    /// Count the selected splats of the current snapshot.
    pub fn count_selected(&self) -> usize {
        self.snapshot().count_selected()
    }

    /// Modify a copy of the selection and publish it, returns the closure output.
    pub fn update<R>(&self, f: impl FnOnce(&mut SelectionBitset) -> R) -> R {
        let mut guard = self.0.write();
        let mut next = SelectionBitset::clone(&guard);
        let output = f(&mut next);
        *guard = Arc::new(next);
        output
    }
}
