//! Recent-message cache for loop detection.
//!
//! Two pages of fingerprints, 50 each. Inserts go to the current page; when
//! it is full the other page is cleared and becomes current. Lookups check
//! both, so a fingerprint stays visible for at least 50 and at most 100
//! later inserts, and memory never exceeds 100 entries.

use std::collections::HashSet;

use waypost_core::wire::Fingerprint;

pub const PAGE_CAPACITY: usize = 50;

#[derive(Debug, Default)]
pub struct RecentCache {
    pages: [HashSet<Fingerprint>; 2],
    current: usize,
}

impl RecentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.pages[0].contains(fp) || self.pages[1].contains(fp)
    }

    pub fn insert(&mut self, fp: Fingerprint) {
        if self.pages[self.current].len() >= PAGE_CAPACITY {
            self.current ^= 1;
            self.pages[self.current].clear();
        }
        self.pages[self.current].insert(fp);
    }

    /// Returns true if `fp` was already known. Unknown fingerprints are
    /// recorded.
    pub fn check_and_insert(&mut self, fp: Fingerprint) -> bool {
        if self.contains(&fp) {
            return true;
        }
        self.insert(fp);
        false
    }

    pub fn len(&self) -> usize {
        self.pages[0].len() + self.pages[1].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
