use std::{fmt::Debug, ops::Range};

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-width bit set.
///
/// Bits at positions `>= len` are always zero, so the derived equality and
/// hashing compare set contents.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitVector {
    words: Vec<u64>,
    len: usize,
}

impl BitVector {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; (len + WORD_BITS - 1) / WORD_BITS],
            len,
        }
    }

    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bits = Self::new(len);
        for index in indices {
            bits.set(index);
        }
        bits
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {} out of range {}", index, self.len);
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Returns `true` if the bit was previously clear.
    pub fn set(&mut self, index: usize) -> bool {
        assert!(index < self.len, "bit {} out of range {}", index, self.len);
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1 << (index % WORD_BITS);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Returns `true` if the bit was previously set.
    pub fn reset(&mut self, index: usize) -> bool {
        assert!(index < self.len, "bit {} out of range {}", index, self.len);
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1 << (index % WORD_BITS);
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    pub fn set_range(&mut self, range: Range<usize>) {
        self.for_range(range, |word, mask| *word |= mask);
    }

    pub fn reset_range(&mut self, range: Range<usize>) {
        self.for_range(range, |word, mask| *word &= !mask);
    }

    fn for_range(&mut self, range: Range<usize>, mut f: impl FnMut(&mut u64, u64)) {
        assert!(range.end <= self.len, "range {:?} out of {}", range, self.len);
        if range.start >= range.end {
            return;
        }
        let (first, last) = (range.start / WORD_BITS, (range.end - 1) / WORD_BITS);
        for idx in first..=last {
            let lo = if idx == first { range.start % WORD_BITS } else { 0 };
            let hi = if idx == last {
                (range.end - 1) % WORD_BITS + 1
            } else {
                WORD_BITS
            };
            let mask = if hi - lo == WORD_BITS {
                u64::MAX
            } else {
                ((1u64 << (hi - lo)) - 1) << lo
            };
            f(&mut self.words[idx], mask);
        }
    }

    /// In-place union. Returns `true` if any bit changed.
    pub fn union(&mut self, other: &BitVector) -> bool {
        assert_eq!(self.len, other.len);
        let mut changed = false;
        for (word, &other) in self.words.iter_mut().zip(other.words.iter()) {
            let new = *word | other;
            changed |= new != *word;
            *word = new;
        }
        changed
    }

    /// In-place difference.
    pub fn difference(&mut self, other: &BitVector) {
        assert_eq!(self.len, other.len);
        for (word, &other) in self.words.iter_mut().zip(other.words.iter()) {
            *word &= !other;
        }
    }

    /// Value-returning difference: `self - other`.
    pub fn without(&self, other: &BitVector) -> BitVector {
        let mut result = self.clone();
        result.difference(other);
        result
    }

    /// In-place intersection.
    pub fn intersect(&mut self, other: &BitVector) {
        assert_eq!(self.len, other.len);
        for (word, &other) in self.words.iter_mut().zip(other.words.iter()) {
            *word &= other;
        }
    }

    /// Value-returning intersection.
    pub fn and(&self, other: &BitVector) -> BitVector {
        let mut result = self.clone();
        result.intersect(other);
        result
    }

    /// Superset test: every bit of `other` is also set in `self`.
    pub fn includes(&self, other: &BitVector) -> bool {
        assert_eq!(self.len, other.len);
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(&word, &other)| other & !word == 0)
    }

    pub fn all_zero(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }

    /// Ascending indices of set bits.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            words: &self.words,
            index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl Debug for BitVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

pub struct Iter<'a> {
    words: &'a [u64],
    index: usize,
    current: u64,
}

impl<'a> Iterator for Iter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.current == 0 {
            self.index += 1;
            if self.index >= self.words.len() {
                return None;
            }
            self.current = self.words[self.index];
        }
        let bit = self.current.trailing_zeros() as usize;
        self.current &= self.current - 1;
        Some(self.index * WORD_BITS + bit)
    }
}

impl<'a> IntoIterator for &'a BitVector {
    type Item = usize;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reset() {
        let mut bits = BitVector::new(130);
        assert!(bits.all_zero());
        assert!(bits.set(0));
        assert!(!bits.set(0));
        assert!(bits.set(64));
        assert!(bits.set(129));
        assert!(bits.test(64));
        assert!(!bits.test(65));
        assert!(bits.reset(64));
        assert!(!bits.reset(64));
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![0, 129]);
        assert_eq!(bits.count(), 2);
    }

    #[test]
    fn test_range() {
        let mut bits = BitVector::new(200);
        bits.set_range(3..140);
        assert_eq!(bits.count(), 137);
        assert!(!bits.test(2));
        assert!(bits.test(3));
        assert!(bits.test(63));
        assert!(bits.test(64));
        assert!(bits.test(139));
        assert!(!bits.test(140));

        bits.reset_range(60..70);
        assert!(bits.test(59));
        assert!(!bits.test(60));
        assert!(!bits.test(69));
        assert!(bits.test(70));

        bits.reset_range(0..200);
        assert!(bits.all_zero());

        bits.set_range(0..128);
        assert_eq!(bits.count(), 128);
        bits.set_range(5..5);
        assert_eq!(bits.count(), 128);
    }

    #[test]
    fn test_set_operations() {
        let a = BitVector::from_indices(100, [1, 5, 70]);
        let b = BitVector::from_indices(100, [5, 99]);

        let mut union = a.clone();
        assert!(union.union(&b));
        assert!(!union.union(&b));
        assert_eq!(union, BitVector::from_indices(100, [1, 5, 70, 99]));
        assert!(union.includes(&a));
        assert!(union.includes(&b));
        assert!(!a.includes(&b));

        assert_eq!(a.without(&b), BitVector::from_indices(100, [1, 70]));
        let mut diff = union.clone();
        diff.difference(&a);
        assert_eq!(diff, BitVector::from_indices(100, [99]));

        assert_eq!(a.and(&b), BitVector::from_indices(100, [5]));
        let mut both = union;
        both.intersect(&a);
        assert_eq!(both, a);
        assert!(a.and(&diff).all_zero());
    }

    #[test]
    fn test_iter_skips_zero_words() {
        let bits = BitVector::from_indices(1000, [999, 0, 512, 63, 64]);
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![0, 63, 64, 512, 999]);
        assert_eq!(BitVector::new(0).iter().next(), None);
        assert_eq!(format!("{:?}", BitVector::from_indices(8, [2, 4])), "{2, 4}");
    }
}
