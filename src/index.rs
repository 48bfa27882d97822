//! The inverted index over term components that makes a flip step O(1).

use ahash::AHashMap;
use rand::Rng;

use crate::tensor::Slot;


/// Maps every slot value to the set of component positions currently holding
/// it, and keeps the subset of values held by two or more positions in a
/// sampleable side structure.
///
/// `twoplus` is a plain vector paired with a value → index map, so membership
/// changes are swap-pop against the stored index and uniform sampling is one
/// array read. Every operation here is O(1); the flip loop performs a fixed
/// number of them per step.
pub struct SlotIndex {
    uniques: AHashMap<Slot, Vec<usize>>,
    twoplus: Vec<Slot>,
    twoplus_pos: AHashMap<Slot, usize>,
}

impl SlotIndex {
    pub fn new() -> Self {
        Self {
            uniques: AHashMap::new(),
            twoplus: Vec::new(),
            twoplus_pos: AHashMap::new(),
        }
    }

    /// Indexes every nonzero slot of the flat component array. Zero slots are
    /// reserved space and must stay invisible to flip selection.
    pub fn from_slots(slots: &[Slot]) -> Self {
        let mut index = Self::new();
        for (pos, &v) in slots.iter().enumerate() {
            if v != 0 {
                index.add(pos, v);
            }
        }
        index
    }

    pub fn add(&mut self, pos: usize, v: Slot) {
        if let Some(bucket) = self.uniques.get_mut(&v) {
            bucket.push(pos);
            if bucket.len() == 2 {
                self.twoplus_pos.insert(v, self.twoplus.len());
                self.twoplus.push(v);
            }
        } else {
            self.uniques.insert(v, vec![pos]);
        }
    }

    pub fn remove(&mut self, pos: usize, v: Slot) {
        let bucket = self.uniques.get_mut(&v).expect("removing unindexed value");
        match bucket.len() {
            1 => {
                self.uniques.remove(&v);
            }
            len => {
                if len == 2 {
                    let at = self.twoplus_pos.remove(&v).expect("twoplus desync");
                    let last = *self.twoplus.last().unwrap();
                    self.twoplus[at] = last;
                    self.twoplus.pop();
                    if last != v {
                        self.twoplus_pos.insert(last, at);
                    }
                }
                // Buckets are order-insensitive, so a swap-remove suffices.
                let at = bucket.iter().position(|&p| p == pos).expect("position not in bucket");
                bucket.swap_remove(at);
            }
        }
    }

    /// The positions currently holding `v`. Empty for unindexed values.
    pub fn bucket(&self, v: Slot) -> &[usize] {
        self.uniques.get(&v).map(|b| b.as_slice()).unwrap_or(&[])
    }

    /// True if at least one value is held by two or more positions, i.e. a
    /// flip candidate exists at all.
    pub fn has_pairs(&self) -> bool {
        !self.twoplus.is_empty()
    }

    /// All values with multiplicity ≥ 2.
    pub fn pair_values(&self) -> &[Slot] {
        &self.twoplus
    }

    /// Uniform sample over the values with multiplicity ≥ 2.
    pub fn sample_value<R: Rng>(&self, rng: &mut R) -> Slot {
        self.twoplus[rng.gen_range(0..self.twoplus.len())]
    }

    /// Full consistency check against the component array, for debug
    /// assertions at snapshot points.
    #[cfg(debug_assertions)]
    pub fn check_consistency(&self, slots: &[Slot]) {
        for (pos, &v) in slots.iter().enumerate() {
            if v != 0 {
                assert!(
                    self.bucket(v).contains(&pos),
                    "position {} with value {:#x} missing from its bucket", pos, v,
                );
            }
        }
        for (&v, bucket) in &self.uniques {
            for &pos in bucket {
                assert_eq!(slots[pos], v, "stale bucket entry at position {}", pos);
            }
            assert_eq!(
                bucket.len() >= 2,
                self.twoplus_pos.contains_key(&v),
                "twoplus desync for value {:#x}", v,
            );
        }
        for (at, &v) in self.twoplus.iter().enumerate() {
            assert_eq!(self.twoplus_pos.get(&v), Some(&at));
        }
    }
}


/// Precomputed ordered pairs for sampling two distinct entries of a bucket.
///
/// `ps[x]`/`qs[x]` list every ordered pair of distinct indices, grouped so
/// that the first `combs[len]` pairs are exactly those valid for a bucket of
/// `len` entries. One random number then yields an unbiased ordered pair.
/// Covers buckets up to 80 entries, far beyond what a run produces.
pub struct PairTable {
    ps: Vec<usize>,
    qs: Vec<usize>,
    combs: Vec<usize>,
}

impl PairTable {
    pub fn new() -> Self {
        let mut ps = Vec::new();
        let mut qs = Vec::new();
        let mut combs = vec![0, 0];
        for x in 1..80 {
            for y in 0..x {
                ps.push(x);
                qs.push(y);
                ps.push(y);
                qs.push(x);
            }
            combs.push(ps.len());
        }
        Self { ps, qs, combs }
    }

    /// Uniform ordered pair of distinct indices below `bucket_len`.
    pub fn sample<R: Rng>(&self, rng: &mut R, bucket_len: usize) -> (usize, usize) {
        let x = rng.gen_range(0..self.combs[bucket_len]);
        (self.ps[x], self.qs[x])
    }
}
