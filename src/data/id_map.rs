//! Append-only interning of (biome, material) pairs.

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::core::wire::{ReadBe, WriteBe};

/// Separates the biome from the material in the encoded entry string.
const ENTRY_SEPARATOR: char = '\u{1f}';

/// A (biome, material) pair as stored in an [`IdMap`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdEntry {
    pub biome: String,
    pub material: String,
}

impl IdEntry {
    pub fn new(biome: impl Into<String>, material: impl Into<String>) -> Self {
        Self {
            biome: biome.into(),
            material: material.into(),
        }
    }

    fn encode(&self) -> String {
        format!("{}{}{}", self.biome, ENTRY_SEPARATOR, self.material)
    }

    fn decode(text: &str) -> Result<Self> {
        let (biome, material) = text
            .split_once(ENTRY_SEPARATOR)
            .ok_or_else(|| Error::Format(format!("id map entry without separator: {:?}", text)))?;
        Ok(Self::new(biome, material))
    }
}

/// Bidirectional id <-> entry map. Ids are positional and never reused or removed.
#[derive(Clone, Debug, Default)]
pub struct IdMap {
    entries: Vec<IdEntry>,
    lookup: HashMap<IdEntry, u32>,
}

impl PartialEq for IdMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for IdMap {}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&IdEntry> {
        self.entries.get(id as usize)
    }

    pub fn id_of(&self, entry: &IdEntry) -> Option<u32> {
        self.lookup.get(entry).copied()
    }

    pub fn entries(&self) -> &[IdEntry] {
        &self.entries
    }

    /// Existing id for `entry`, or the next id after appending it.
    pub fn add_if_not_present_and_get_id(&mut self, entry: IdEntry) -> u32 {
        if let Some(&id) = self.lookup.get(&entry) {
            return id;
        }
        let id = self.entries.len() as u32;
        self.lookup.insert(entry.clone(), id);
        self.entries.push(entry);
        id
    }

    /// Import every entry of `other`; element `i` of the result is this map's id for `other`'s id `i`.
    pub fn merge_and_return_remapped_ids(&mut self, other: &IdMap) -> Vec<u32> {
        other
            .entries
            .iter()
            .map(|entry| self.add_if_not_present_and_get_id(entry.clone()))
            .collect()
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.put_u32(self.entries.len() as u32)?;
        for entry in &self.entries {
            w.put_str(&entry.encode())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let count = r.take_u32()?;
        let mut map = IdMap::new();
        for _ in 0..count {
            let entry = IdEntry::decode(&r.take_str()?)?;
            let expected = map.entries.len() as u32;
            if map.add_if_not_present_and_get_id(entry) != expected {
                return Err(Error::Format("duplicate id map entry".into()));
            }
        }
        Ok(map)
    }
}
