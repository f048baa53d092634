//! Word arenas backing recurrent state and per-frame scratch.
//!
//! Every allocation is planned once when a model is initialized. Nothing in
//! the run path allocates from the heap.

use std::ops::Range;
use crate::error::{MlError, Result};

/// A bump-pointer arena of 64-bit words.
///
/// `alloc` hands out index ranges rather than slices so several regions can
/// be borrowed at once through [`Arena::words_mut`] and `split_at_mut`.
#[derive(Debug)]
pub struct Arena {
    words: Vec<i64>,
    offset: usize,
}

impl Arena {
    /// Create a zeroed arena with room for `capacity` words.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut words = Vec::new();
        words.try_reserve_exact(capacity).map_err(|e| {
            MlError::OutOfMemory(format!("arena of {} words: {}", capacity, e))
        })?;
        words.resize(capacity, 0);
        Ok(Self { words, offset: 0 })
    }

    /// Allocate `n` words, returning their index range.
    /// Returns `None` if the arena is exhausted.
    pub fn alloc(&mut self, n: usize) -> Option<Range<usize>> {
        let end = self.offset.checked_add(n)?;
        if end > self.words.len() {
            return None;
        }
        let range = self.offset..end;
        self.offset = end;
        Some(range)
    }

    /// Forget every allocation. Contents are kept.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Zero the words of every live allocation.
    pub fn clear(&mut self) {
        self.words[..self.offset].fill(0);
    }

    /// Words handed out so far.
    pub fn used(&self) -> usize {
        self.offset
    }

    /// Total capacity in words.
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn remaining(&self) -> usize {
        self.words.len() - self.offset
    }

    pub fn words(&self) -> &[i64] {
        &self.words[..self.offset]
    }

    pub fn words_mut(&mut self) -> &mut [i64] {
        &mut self.words[..self.offset]
    }

    pub fn slice(&self, range: Range<usize>) -> &[i64] {
        &self.words[range]
    }

    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [i64] {
        &mut self.words[range]
    }
}
