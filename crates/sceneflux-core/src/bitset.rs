//! Growable bitset packed into `u64` words.

/// Compact bitset with a cached population count.
///
/// Used both for per-slot dirty flags in the render state and for poller
/// bookkeeping in the dirty tracker. Storage grows on demand; `clear` keeps
/// the allocated words.
#[derive(Debug, Clone, Default)]
pub struct BitSet {
    bits: Vec<u64>,
    count: usize,
}

impl BitSet {
    /// Create a new bitset with capacity for at least `capacity` bits, all unset.
    pub fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(64);
        Self {
            bits: vec![0u64; words],
            count: 0,
        }
    }

    /// Mark bit at `index` as set. Idempotent: only increments count on first set.
    pub fn set(&mut self, index: usize) {
        self.ensure_capacity(index + 1);
        let word = index / 64;
        let mask = 1u64 << (index % 64);
        if self.bits[word] & mask == 0 {
            self.bits[word] |= mask;
            self.count += 1;
        }
    }

    /// Clear bit at `index`. Out-of-bounds indices are already unset.
    pub fn unset(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.bits.len() {
            return;
        }
        let mask = 1u64 << (index % 64);
        if self.bits[word] & mask != 0 {
            self.bits[word] &= !mask;
            self.count -= 1;
        }
    }

    /// Check if bit at `index` is set. Returns false for out-of-bounds indices.
    pub fn get(&self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.bits.len() {
            return false;
        }
        self.bits[word] & (1u64 << (index % 64)) != 0
    }

    /// Clear all bits and reset count to zero.
    pub fn clear(&mut self) {
        if self.count == 0 {
            return;
        }
        self.bits.fill(0);
        self.count = 0;
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of bits the current storage can hold without growing.
    pub fn capacity(&self) -> usize {
        self.bits.len() * 64
    }

    /// Grow the bitset if needed to hold at least `capacity` bits.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        let words_needed = capacity.div_ceil(64);
        if words_needed > self.bits.len() {
            self.bits.resize(words_needed, 0);
        }
    }

    /// Indices of all set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0)
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(base + bit)
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_idempotent() {
        let mut bits = BitSet::new(10);
        bits.set(3);
        bits.set(3);
        assert!(bits.get(3));
        assert_eq!(bits.count(), 1);
    }

    #[test]
    fn set_grows_storage() {
        let mut bits = BitSet::new(0);
        assert_eq!(bits.capacity(), 0);
        bits.set(130);
        assert!(bits.get(130));
        assert!(bits.capacity() >= 131);
        assert!(!bits.get(129));
    }

    #[test]
    fn unset_out_of_bounds_is_noop() {
        let mut bits = BitSet::new(64);
        bits.unset(1000);
        bits.set(5);
        bits.unset(5);
        bits.unset(5);
        assert!(bits.is_empty());
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut bits = BitSet::new(256);
        bits.set(0);
        bits.set(255);
        bits.clear();
        assert_eq!(bits.count(), 0);
        assert!(!bits.get(255));
        assert_eq!(bits.capacity(), 256);
    }

    #[test]
    fn iter_ones_is_ascending() {
        let mut bits = BitSet::new(0);
        for i in [200, 3, 64, 63, 0] {
            bits.set(i);
        }
        let ones: Vec<usize> = bits.iter_ones().collect();
        assert_eq!(ones, vec![0, 3, 63, 64, 200]);
    }
}
