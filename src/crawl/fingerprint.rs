//! Near-duplicate detection with SimHash fingerprints
//!
//! Every accepted page contributes one 64-bit SimHash. A new page is a
//! near-duplicate when some stored fingerprint lies within Hamming distance
//! `k` of its own.
//!
//! Lookup uses the pigeonhole principle: the 64 bits are split into `k + 1`
//! contiguous blocks, and two fingerprints that differ in at most `k` bits
//! must agree exactly on at least one block. Each block has its own table
//! from block value to full fingerprints, so a query only compares against
//! candidates sharing a block and the distance contract stays exact.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::types::DocumentId;
use crate::util::fast_hash;

/// Width of a fingerprint in bits
pub const FINGERPRINT_BITS: u32 = 64;

/// SimHash of a page's visible text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimHash(pub u64);

impl SimHash {
    /// Compute SimHash for text content using word 3-grams
    pub fn compute(text: &str) -> Self {
        let features = Self::extract_features(text);
        SimHash(Self::compute_from_features(features.iter().map(|s| s.as_str())))
    }

    /// Lowercased word 3-grams; short texts fall back to single words
    fn extract_features(text: &str) -> Vec<String> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        if words.len() < 3 {
            return words;
        }

        words.windows(3).map(|w| w.join(" ")).collect()
    }

    fn compute_from_features<'a>(features: impl Iterator<Item = &'a str>) -> u64 {
        let mut weights = [0i64; FINGERPRINT_BITS as usize];

        for feature in features {
            let hash = fast_hash(feature);
            for (bit, weight) in weights.iter_mut().enumerate() {
                if (hash >> bit) & 1 == 1 {
                    *weight += 1;
                } else {
                    *weight -= 1;
                }
            }
        }

        weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit))
    }

    /// Calculate Hamming distance between two SimHashes
    pub fn hamming_distance(&self, other: &SimHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// One contiguous bit range of the fingerprint
#[derive(Debug, Clone, Copy)]
struct Block {
    shift: u32,
    mask: u64,
}

impl Block {
    fn key(&self, fingerprint: u64) -> u64 {
        (fingerprint >> self.shift) & self.mask
    }
}

/// Split 64 bits into `count` contiguous blocks of near-equal width
fn split_blocks(count: u32) -> Vec<Block> {
    let base = FINGERPRINT_BITS / count;
    let extra = FINGERPRINT_BITS % count;
    let mut shift = 0;

    (0..count)
        .map(|i| {
            let width = base + u32::from(i < extra);
            let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
            let block = Block { shift, mask };
            shift += width;
            block
        })
        .collect()
}

/// Fingerprint store answering "is anything within distance k?"
#[derive(Debug)]
pub struct FingerprintIndex {
    max_distance: u32,
    blocks: Vec<Block>,
    /// Per block: block value → fingerprints having that value
    tables: Vec<HashMap<u64, Vec<u64>>>,
    /// Page id → fingerprint (the durable artifact)
    pages: HashMap<DocumentId, u64>,
}

impl FingerprintIndex {
    /// Create an empty index. `max_distance` must be below 64.
    pub fn new(max_distance: u32) -> Self {
        let max_distance = max_distance.min(FINGERPRINT_BITS - 1);
        let blocks = split_blocks(max_distance + 1);
        let tables = vec![HashMap::new(); blocks.len()];
        Self {
            max_distance,
            blocks,
            tables,
            pages: HashMap::new(),
        }
    }

    /// Rebuild an index from persisted (page id, fingerprint) pairs
    pub fn from_entries(
        max_distance: u32,
        entries: impl IntoIterator<Item = (DocumentId, u64)>,
    ) -> Self {
        let mut index = Self::new(max_distance);
        for (id, fingerprint) in entries {
            index.insert(id, fingerprint);
        }
        index
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    /// Find a stored fingerprint within `max_distance`, returning it and its distance
    pub fn find_near(&self, fingerprint: u64) -> Option<(u64, u32)> {
        for (block, table) in self.blocks.iter().zip(&self.tables) {
            if let Some(candidates) = table.get(&block.key(fingerprint)) {
                for &candidate in candidates {
                    let distance = (candidate ^ fingerprint).count_ones();
                    if distance <= self.max_distance {
                        return Some((candidate, distance));
                    }
                }
            }
        }
        None
    }

    /// Admit a page unless it is a near-duplicate of a stored one. Rejected
    /// pages leave the index untouched.
    ///
    /// A page whose id is already stored is admitted again when its content
    /// is still within `max_distance` of the stored fingerprint. That happens
    /// when a URL is re-fetched after a restart because its body never reached
    /// disk; the stored fingerprint is kept.
    pub fn try_admit(&mut self, id: DocumentId, fingerprint: u64) -> bool {
        if let Some(&stored) = self.pages.get(&id) {
            return (stored ^ fingerprint).count_ones() <= self.max_distance;
        }
        if self.find_near(fingerprint).is_some() {
            return false;
        }
        self.insert(id, fingerprint);
        true
    }

    /// Store without the near-duplicate check (used when restoring)
    fn insert(&mut self, id: DocumentId, fingerprint: u64) {
        if let Some(previous) = self.pages.insert(id, fingerprint) {
            self.remove_from_tables(previous);
        }
        for (block, table) in self.blocks.iter().zip(self.tables.iter_mut()) {
            table.entry(block.key(fingerprint)).or_default().push(fingerprint);
        }
    }

    fn remove_from_tables(&mut self, fingerprint: u64) {
        for (block, table) in self.blocks.iter().zip(self.tables.iter_mut()) {
            if let Some(bucket) = table.get_mut(&block.key(fingerprint)) {
                if let Some(pos) = bucket.iter().position(|&f| f == fingerprint) {
                    bucket.swap_remove(pos);
                }
            }
        }
    }

    pub fn fingerprint_of(&self, id: &DocumentId) -> Option<u64> {
        self.pages.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Sorted copy of every (page id, fingerprint) pair
    pub fn entries(&self) -> BTreeMap<DocumentId, u64> {
        self.pages.iter().map(|(id, fp)| (id.clone(), *fp)).collect()
    }
}

/// Thread-safe wrapper making each admission atomic
#[derive(Debug)]
pub struct SharedFingerprintIndex {
    inner: Mutex<FingerprintIndex>,
}

impl SharedFingerprintIndex {
    pub fn new(index: FingerprintIndex) -> Self {
        Self {
            inner: Mutex::new(index),
        }
    }

    /// Check-and-insert under one lock acquisition
    pub fn try_admit(&self, id: DocumentId, fingerprint: SimHash) -> bool {
        self.inner.lock().try_admit(id, fingerprint.0)
    }

    /// Fingerprint `text` (outside the lock) and admit it
    pub fn try_admit_text(&self, id: DocumentId, text: &str) -> bool {
        let fingerprint = SimHash::compute(text);
        self.try_admit(id, fingerprint)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn entries(&self) -> BTreeMap<DocumentId, u64> {
        self.inner.lock().entries()
    }
}
