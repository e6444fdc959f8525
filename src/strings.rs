use ahash::AHashMap;

use crate::osmpbf;

/// Builds one output block's string table.
///
/// Slot 0 is reserved and stays empty; real strings are assigned
/// consecutive indices starting at 1. Strings are deduplicated, so
/// repeated insertion returns the previously assigned index.
#[derive(Debug)]
pub struct StringTableBuilder {
    strings: Vec<Vec<u8>>,
    indexed: AHashMap<String, u32>,
}

impl StringTableBuilder {
    pub fn new() -> Self {
        Self {
            // slot 0 is the reserved unassigned sentinel
            strings: vec![Vec::new()],
            indexed: AHashMap::new(),
        }
    }

    /// Inserts a string and returns its index, reusing the index of an
    /// earlier identical string.
    pub fn insert(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.indexed.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.as_bytes().to_vec());
        self.indexed.insert(s.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn into_string_table(self) -> osmpbf::StringTable {
        osmpbf::StringTable { s: self.strings }
    }
}

impl Default for StringTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
