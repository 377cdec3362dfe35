//! Parameter set dictionaries.
//!
//! SPS and PPS units are remembered by id as they are observed, each
//! with the ES offset and length of its original bytes so the reverse
//! writer can re-emit the current value of every set byte-for-byte.

use revmux_es::EsOffset;
use std::collections::BTreeMap;

/// One remembered parameter set.
#[derive(Debug, Clone)]
pub struct ParamSetEntry<T> {
    /// ES offset of the unit's first byte.
    pub offset: EsOffset,
    /// Exact byte length of the unit in the ES view.
    pub data_len: u32,
    /// The parsed set.
    pub set: T,
}

/// A dictionary from parameter set id to its latest value.
///
/// Iteration is in id order, which keeps re-emission deterministic.
#[derive(Debug, Clone)]
pub struct ParamDictionary<T> {
    entries: BTreeMap<u8, ParamSetEntry<T>>,
}

impl<T> Default for ParamDictionary<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> ParamDictionary<T> {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a set, replacing any previous value for the id.
    pub fn insert(&mut self, id: u8, offset: EsOffset, data_len: u32, set: T) {
        self.entries.insert(
            id,
            ParamSetEntry {
                offset,
                data_len,
                set,
            },
        );
    }

    /// Look up a set by id.
    pub fn get(&self, id: u8) -> Option<&ParamSetEntry<T>> {
        self.entries.get(&id)
    }

    /// Iterate entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &ParamSetEntry<T>)> {
        self.entries.iter().map(|(&id, entry)| (id, entry))
    }

    /// Number of remembered sets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_and_iterates_in_order() {
        let mut dict: ParamDictionary<&'static str> = ParamDictionary::new();
        dict.insert(3, EsOffset::new(300, 0), 10, "three");
        dict.insert(0, EsOffset::new(0, 0), 12, "zero");
        dict.insert(3, EsOffset::new(900, 4), 11, "three again");

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(3).unwrap().offset, EsOffset::new(900, 4));

        let ids: Vec<u8> = dict.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 3]);
    }
}
